//! Console surface
//!
//! Stdin stands in for every capture modality and stdout for the avatar. One
//! reader task owns stdin; each line either starts a dialog, answers the
//! running one, or stops it.

use std::io::Write;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parley_core::intake::NORMAL;
use parley_core::{
    Conductor, DialogError, DialogHooks, DialogInput, DialogStatus, ListenOptions,
    PerformableUnit, Performer, Request, RequestIntake, RequestProvider, RequestProviders,
    RequestType, TurnContext,
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;

/// Line that stops the running dialog
pub const STOP_COMMAND: &str = "/stop";

// ============================================================================
// Output
// ============================================================================

/// Format a unit the way the console shows it
pub fn render(unit: &PerformableUnit) -> Option<String> {
    if unit.is_empty() {
        return None;
    }
    let mut line = String::from("parley>");
    if let Some(face) = &unit.face {
        line.push_str(&format!(" ({})", face.name));
    }
    for animation in &unit.animations {
        line.push_str(&format!(" <{}>", animation.name));
    }
    if let Some(voice) = unit.voice.as_ref().filter(|v| !v.text.trim().is_empty()) {
        line.push(' ');
        line.push_str(voice.text.trim());
    }
    Some(line)
}

fn print_flush(text: &str) -> std::io::Result<()> {
    let mut out = std::io::stdout().lock();
    out.write_all(text.as_bytes())?;
    out.flush()
}

/// Prints performable units to stdout
#[derive(Debug, Default)]
pub struct ConsolePerformer {
    interrupted: AtomicUsize,
}

impl ConsolePerformer {
    /// How often playback was interrupted
    pub fn interruptions(&self) -> usize {
        self.interrupted.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl Performer for ConsolePerformer {
    async fn perform(&self, unit: &PerformableUnit, ctx: &TurnContext) -> anyhow::Result<()> {
        if ctx.is_cancelled() {
            return Ok(());
        }
        if let Some(line) = render(unit) {
            print_flush(&format!("{line}\n"))?;
        }
        Ok(())
    }

    fn interrupt(&self) {
        self.interrupted.fetch_add(1, Ordering::Relaxed);
        tracing::debug!("Console playback interrupted");
    }
}

// ============================================================================
// Input
// ============================================================================

/// Follow-up lines from the console, served for one modality
///
/// Several providers share one receiver so that text typed after any prompt
/// reaches the dialog, whichever modality the skill asked for.
#[derive(Clone, Debug)]
pub struct ConsoleInput {
    request_type: RequestType,
    lines: Arc<Mutex<mpsc::Receiver<String>>>,
}

impl ConsoleInput {
    /// Providers for text and voice fed by one channel
    pub fn providers(capacity: usize) -> (mpsc::Sender<String>, RequestProviders) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let lines = Arc::new(Mutex::new(rx));
        let mut providers = RequestProviders::new();
        for request_type in [RequestType::Text, RequestType::Voice] {
            providers.insert(Arc::new(Self {
                request_type,
                lines: lines.clone(),
            }));
        }
        (tx, providers)
    }
}

#[async_trait]
impl RequestProvider for ConsoleInput {
    fn request_type(&self) -> RequestType {
        self.request_type
    }

    async fn get_request(
        &self,
        options: &ListenOptions,
        ctx: &TurnContext,
    ) -> anyhow::Result<Option<Request>> {
        let mut lines = self.lines.lock().await;
        let line = tokio::select! {
            biased;
            () = ctx.cancelled() => return Ok(None),
            line = tokio::time::timeout(options.max_duration, lines.recv()) => line.ok().flatten(),
        };
        if line.is_none() {
            tracing::debug!(user_id = %options.user_id, "No console input before timeout");
        }
        Ok(line.map(|text| Request::with_text(self.request_type, options.user_id.clone(), text)))
    }
}

/// Where a typed line goes
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LineTarget {
    /// Start a new dialog
    NewDialog,
    /// Answer the running dialog
    FollowUp,
    /// Stop the running dialog
    Stop,
    /// Nothing to do
    Ignore,
}

/// Decide what a typed line means given the controller status
pub fn route_line(line: &str, status: DialogStatus) -> LineTarget {
    let line = line.trim();
    let idle = matches!(status, DialogStatus::Idling | DialogStatus::Error);
    if line.is_empty() {
        LineTarget::Ignore
    } else if line == STOP_COMMAND {
        if idle {
            LineTarget::Ignore
        } else {
            LineTarget::Stop
        }
    } else if idle {
        LineTarget::NewDialog
    } else {
        LineTarget::FollowUp
    }
}

/// Read stdin until EOF or shutdown, dispatching every line
///
/// Returning drops `follow_ups`, so a dialog still listening sees closed
/// input instead of waiting out its capture bound.
pub async fn read_lines(
    user_id: String,
    conductor: Arc<Conductor>,
    intake: Arc<RequestIntake>,
    follow_ups: mpsc::Sender<String>,
    shutdown: CancellationToken,
) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            () = shutdown.cancelled() => break,
            line = lines.next_line() => line,
        };
        let line = match line {
            Ok(Some(line)) => line,
            Ok(None) => {
                tracing::info!("Console input closed");
                break;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to read console input");
                break;
            }
        };

        match route_line(&line, conductor.status()) {
            LineTarget::NewDialog => {
                intake.enqueue(user_id.as_str(), DialogInput::Text(line.trim().to_string()), NORMAL);
            }
            LineTarget::FollowUp => {
                if follow_ups.send(line.trim().to_string()).await.is_err() {
                    break;
                }
            }
            LineTarget::Stop => conductor.stop_dialog(false, true).await,
            LineTarget::Ignore => {}
        }
    }
}

/// Wait until queued dialogs have run and the controller is idle
pub async fn drain(conductor: &Conductor, intake: &RequestIntake, shutdown: &CancellationToken) {
    let mut status = conductor.subscribe();
    while !intake.is_empty() || *status.borrow_and_update() != DialogStatus::Idling {
        tokio::select! {
            () = shutdown.cancelled() => return,
            changed = status.changed() => {
                if changed.is_err() {
                    return;
                }
            }
        }
    }
}

// ============================================================================
// Hooks
// ============================================================================

/// Prompts and error reporting on the terminal
#[derive(Clone, Copy, Debug, Default)]
pub struct ConsoleHooks;

#[async_trait]
impl DialogHooks for ConsoleHooks {
    async fn on_prompt(
        &self,
        user_id: &str,
        request_type: RequestType,
        _ctx: &TurnContext,
    ) -> anyhow::Result<()> {
        tracing::debug!(user_id = %user_id, ?request_type, "Prompting for input");
        print_flush(&format!("{user_id}> "))?;
        Ok(())
    }

    async fn on_error(&self, error: &DialogError, _ctx: &TurnContext) -> anyhow::Result<()> {
        tracing::warn!(error = %error, "Dialog failed");
        eprintln!("parley: {error}");
        Ok(())
    }

    async fn on_end(&self, user_id: &str, _ctx: &TurnContext) -> anyhow::Result<()> {
        tracing::debug!(user_id = %user_id, "Dialog ended");
        Ok(())
    }

    async fn on_stop(&self) -> anyhow::Result<()> {
        println!("parley> (stopped)");
        Ok(())
    }
}
