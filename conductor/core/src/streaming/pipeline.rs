//! Parse/Perform Pipeline
//!
//! Drains a [`GenerationStream`] while it is still being written:
//!
//! ```text
//!   GenerationStream ──tick──► parse task ──units──► perform task ──► Performer
//!                              (split, directives,    (one unit at a time,
//!                               prefetch speech)       in order)
//! ```
//!
//! Both tasks run on the turn's task via `tokio::join!`, so no unit outlives
//! the turn. The parse side owns the channel sender; when it exits for any
//! reason the sender drops and the perform side drains what is left and stops.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures::FutureExt;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;

use super::directives::DirectiveParser;
use super::splitter::SentenceSplitter;
use super::stream::GenerationStream;
use crate::config::PipelineConfig;
use crate::context::TurnContext;
use crate::error::{DialogError, DialogResult};
use crate::performance::{PerformableUnit, Performer};

/// Progress flags, written only by the parse task and read by the perform task
#[derive(Debug, Default)]
pub struct PipelineFlags {
    parsing: AtomicBool,
    stream_done: AtomicBool,
}

/// Clears `parsing` when the parse task ends, including by panic
struct ParsingGuard<'a>(&'a PipelineFlags);

impl<'a> ParsingGuard<'a> {
    fn start(flags: &'a PipelineFlags) -> Self {
        flags.parsing.store(true, Ordering::Release);
        Self(flags)
    }
}

impl Drop for ParsingGuard<'_> {
    fn drop(&mut self) {
        self.0.parsing.store(false, Ordering::Release);
    }
}

impl PipelineFlags {
    /// Whether the parse task is still running
    #[must_use]
    pub fn is_parsing(&self) -> bool {
        self.parsing.load(Ordering::Acquire)
    }

    /// Whether the parse task saw the end of the stream
    #[must_use]
    pub fn is_stream_done(&self) -> bool {
        self.stream_done.load(Ordering::Acquire)
    }
}

/// What one `play` call did
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PlaybackReport {
    /// Units emitted by the parse task
    pub units_parsed: usize,
    /// Units the performer finished
    pub units_performed: usize,
    /// Whether the parse task reached the end of the stream
    pub stream_done: bool,
    /// Whether the parse task failed and stopped early
    pub parse_failed: bool,
    /// Whether the parsing-in-progress flag was still set after playback
    pub parsing_left_set: bool,
}

/// Concurrent parse/perform driver for generation streams
#[derive(Clone, Debug)]
pub struct ContentPipeline {
    splitter: SentenceSplitter,
    parse_interval: Duration,
}

impl Default for ContentPipeline {
    fn default() -> Self {
        Self::new(&PipelineConfig::default())
    }
}

impl ContentPipeline {
    /// Create a pipeline from settings
    #[must_use]
    pub fn new(config: &PipelineConfig) -> Self {
        Self {
            splitter: SentenceSplitter::from_config(config),
            parse_interval: config.parse_interval(),
        }
    }

    /// Parse and perform `stream` until it is exhausted or `ctx` is cancelled
    ///
    /// `on_started` runs alongside the two tasks; the turn processor passes the
    /// request-received hook here.
    ///
    /// # Errors
    ///
    /// Returns [`DialogError::Performance`] when the performer fails (the rest
    /// of the stream is abandoned) and [`DialogError::Stream`] when the
    /// producer reported a failure. Cancellation is not an error.
    pub async fn play<F>(
        &self,
        stream: &GenerationStream,
        performer: &dyn Performer,
        ctx: &TurnContext,
        on_started: F,
    ) -> DialogResult<PlaybackReport>
    where
        F: Future<Output = ()>,
    {
        let (tx, rx) = mpsc::unbounded_channel();
        let flags = PipelineFlags::default();
        let scope = ctx.child();

        let parse = AssertUnwindSafe(self.parse(stream, performer, &scope, tx, &flags)).catch_unwind();
        let perform = Self::perform(rx, performer, &scope, &flags);
        let completion = scope.run(stream.wait());

        let (parsed, (), performed, completion) = tokio::join!(parse, on_started, perform, completion);

        let mut report = PlaybackReport {
            stream_done: flags.is_stream_done(),
            ..Default::default()
        };
        match parsed {
            Ok(count) => report.units_parsed = count,
            Err(_) => {
                tracing::error!("Stream parse task panicked; remaining content dropped");
                report.parse_failed = true;
            }
        }
        report.parsing_left_set = flags.is_parsing();

        let (count, perform_error) = performed;
        report.units_performed = count;
        if let Some(e) = perform_error {
            return Err(DialogError::Performance(e));
        }
        if ctx.is_cancelled() {
            tracing::debug!(?report, "Playback cancelled");
            return Ok(report);
        }
        if let Some(result) = completion {
            result?;
        }

        tracing::debug!(?report, "Playback finished");
        Ok(report)
    }

    async fn parse(
        &self,
        stream: &GenerationStream,
        performer: &dyn Performer,
        ctx: &TurnContext,
        tx: mpsc::UnboundedSender<PerformableUnit>,
        flags: &PipelineFlags,
    ) -> usize {
        let _parsing = ParsingGuard::start(flags);
        let mut interval = tokio::time::interval(self.parse_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut parser = DirectiveParser::new();
        let mut offset = 0;
        let mut parsed = 0;

        'ticks: while ctx.run(interval.tick()).await.is_some() {
            // Done must be read before the buffer, or text written between the
            // two reads would be lost.
            let done = stream.is_done();
            let pending = stream.read_from(offset);

            let (mut segments, consumed) = self.splitter.split(&pending, done);
            offset += consumed;
            if done {
                let tail = pending[consumed..].trim();
                if !tail.is_empty() {
                    segments.push(tail.to_string());
                }
                offset += pending.len() - consumed;
            }

            for segment in segments {
                let unit = parser.parse_unit(&segment);
                if unit.is_empty() {
                    continue;
                }
                if let Some(voice) = &unit.voice {
                    performer.prefetch(voice);
                }
                if tx.send(unit).is_err() {
                    break 'ticks;
                }
                parsed += 1;
            }

            if done {
                flags.stream_done.store(true, Ordering::Release);
                break;
            }
        }

        parsed
    }

    async fn perform(
        mut rx: mpsc::UnboundedReceiver<PerformableUnit>,
        performer: &dyn Performer,
        ctx: &TurnContext,
        flags: &PipelineFlags,
    ) -> (usize, Option<anyhow::Error>) {
        let mut performed = 0;
        while let Some(Some(unit)) = ctx.run(rx.recv()).await {
            match ctx.run(performer.perform(&unit, ctx)).await {
                Some(Ok(())) => performed += 1,
                Some(Err(e)) => {
                    tracing::warn!(error = %e, "Performer failed; abandoning stream");
                    ctx.cancel();
                    return (performed, Some(e));
                }
                None => break,
            }
        }
        // The queue only closes once the parse task, and its guard, are gone
        if flags.is_parsing() && !ctx.is_cancelled() {
            tracing::warn!("Unit queue closed while parsing was still flagged");
        }
        tracing::trace!(
            performed,
            stream_done = flags.is_stream_done(),
            "Perform task finished"
        );
        (performed, None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use pretty_assertions::assert_eq;

    use crate::performance::Voice;

    #[derive(Default)]
    struct Recorder {
        spoken: Mutex<Vec<String>>,
        prefetched: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Performer for Recorder {
        async fn perform(&self, unit: &PerformableUnit, _ctx: &TurnContext) -> anyhow::Result<()> {
            let text = unit.voice.as_ref().map(|v| v.text.clone()).unwrap_or_default();
            self.spoken.lock().push(text);
            Ok(())
        }

        fn prefetch(&self, voice: &Voice) {
            self.prefetched.lock().push(voice.text.clone());
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_complete_stream_is_performed_in_order() {
        let recorder = Recorder::default();
        let stream = GenerationStream::from_text("One. Two! [face:Joy]Three");

        let report = ContentPipeline::default()
            .play(&stream, &recorder, &TurnContext::new(), async {})
            .await
            .unwrap();

        assert_eq!(*recorder.spoken.lock(), vec!["One.", "Two!", "Three"]);
        assert_eq!(*recorder.prefetched.lock(), vec!["One.", "Two!", "Three"]);
        assert_eq!(report.units_parsed, 3);
        assert_eq!(report.units_performed, 3);
        assert!(report.stream_done);
        assert!(!report.parsing_left_set);
    }

    #[tokio::test(start_paused = true)]
    async fn test_incremental_writes() {
        let recorder = Recorder::default();
        let (writer, stream) = GenerationStream::channel();

        let producer = async move {
            writer.push("Hello the");
            tokio::time::sleep(Duration::from_millis(120)).await;
            writer.push("re. How");
            tokio::time::sleep(Duration::from_millis(120)).await;
            writer.push(" are you?");
            writer.finish();
        };
        let pipeline = ContentPipeline::default();
        let ctx = TurnContext::new();
        let (report, ()) = tokio::join!(pipeline.play(&stream, &recorder, &ctx, async {}), producer);

        assert_eq!(report.unwrap().units_performed, 2);
        assert_eq!(*recorder.spoken.lock(), vec!["Hello there.", "How are you?"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_stops_both_tasks() {
        let recorder = Recorder::default();
        let (_writer, stream) = GenerationStream::channel();
        let ctx = TurnContext::new();

        let canceller = async {
            tokio::time::sleep(Duration::from_millis(200)).await;
            ctx.cancel();
        };
        let pipeline = ContentPipeline::default();
        let (report, ()) = tokio::join!(pipeline.play(&stream, &recorder, &ctx, async {}), canceller);

        let report = report.unwrap();
        assert!(!report.stream_done);
        assert_eq!(report.units_performed, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stream_error_surfaces_after_playback() {
        let recorder = Recorder::default();
        let (writer, stream) = GenerationStream::channel();
        writer.push("Partial answer. ");
        writer.fail("backend went away");
        writer.finish();

        let err = ContentPipeline::default()
            .play(&stream, &recorder, &TurnContext::new(), async {})
            .await
            .unwrap_err();

        assert!(matches!(err, DialogError::Stream(_)));
        assert_eq!(*recorder.spoken.lock(), vec!["Partial answer."]);
    }

    struct PanickingPrefetch;

    #[async_trait]
    impl Performer for PanickingPrefetch {
        async fn perform(&self, _unit: &PerformableUnit, _ctx: &TurnContext) -> anyhow::Result<()> {
            Ok(())
        }

        fn prefetch(&self, _voice: &Voice) {
            panic!("tts cache corrupted");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_parse_failure_releases_perform_task() {
        let stream = GenerationStream::from_text("Never spoken.");
        let report = ContentPipeline::default()
            .play(&stream, &PanickingPrefetch, &TurnContext::new(), async {})
            .await
            .unwrap();

        assert!(report.parse_failed);
        assert!(!report.parsing_left_set);
        assert_eq!(report.units_performed, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_on_started_runs_concurrently() {
        let recorder = Recorder::default();
        let stream = GenerationStream::from_text("Hi.");
        let started = AtomicBool::new(false);

        ContentPipeline::default()
            .play(&stream, &recorder, &TurnContext::new(), async {
                started.store(true, Ordering::SeqCst);
            })
            .await
            .unwrap();

        assert!(started.load(Ordering::SeqCst));
    }
}
