//! Parley console host
//!
//! Runs the dialog conductor against the terminal: every stdin line that
//! arrives while no dialog is running starts one, lines typed while a skill
//! is listening answer it, and `/stop` interrupts the current dialog.
//!
//! # Usage
//!
//! ```bash
//! # Built-in skills only, in-memory state
//! parley
//!
//! # Persist users and states, chat with a local Ollama model
//! parley --data-dir ~/.local/share/parley --chat --chat-model llama3.2
//!
//! # One dialog, then exit
//! parley --once "echo hello world"
//! ```

mod console;
mod skills;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use parley_core::store::{
    FileStateStore, FileUserStore, MemoryStateStore, MemoryUserStore, StateStore, UserStore,
};
use parley_core::skills::ChatSkill;
use parley_core::{
    default_config_path, load_config_from_path, Conductor, ConductorConfig, ConfigOverrides,
    DialogInput, DialogOutcome, Intent, KeywordIntentExtractor, LlmBackend, OllamaBackend, Priority,
    RequestIntake, SkillRegistry, TopicRouter,
};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use crate::console::{ConsoleHooks, ConsoleInput, ConsolePerformer};
use crate::skills::{EchoSkill, HelpSkill, StopSkill};

/// Parley - conversational turn orchestration on the console
#[derive(Parser, Debug)]
#[command(name = "parley")]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Configuration file (defaults to $XDG_CONFIG_HOME/parley/parley.toml)
    #[arg(short, long, env = "PARLEY_CONFIG", value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Directory for persisted users and states (in-memory when unset)
    #[arg(long, value_name = "DIR")]
    pub data_dir: Option<PathBuf>,

    /// User id the console speaks for
    #[arg(short, long, env = "PARLEY_USER", default_value = "you")]
    pub user: String,

    /// Merge requests closer together than this many seconds (0 disables)
    #[arg(long, value_name = "SECS")]
    pub merge_threshold: Option<f64>,

    /// Seconds after which a saved state is considered stale
    #[arg(long, value_name = "SECS")]
    pub state_timeout: Option<u64>,

    /// Streaming parse interval in milliseconds
    #[arg(long, value_name = "MS")]
    pub parse_interval: Option<u64>,

    /// Enable the LLM chat skill as the fallback topic
    #[arg(long)]
    pub chat: bool,

    /// Model used by the chat skill
    #[arg(long, value_name = "MODEL")]
    pub chat_model: Option<String>,

    /// Delay between streamed words of the echo skill, in milliseconds
    #[arg(long, value_name = "MS", default_value_t = 60)]
    pub echo_interval: u64,

    /// Run a single dialog with this text and exit
    #[arg(long, value_name = "TEXT")]
    pub once: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, env = "PARLEY_LOG_LEVEL", default_value = "warn")]
    pub log_level: String,
}

impl Args {
    /// Overrides for the loaded configuration
    fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            merge_request_threshold_secs: self.merge_threshold,
            state_timeout_secs: self.state_timeout,
            data_dir: self.data_dir.clone(),
            parse_interval_ms: self.parse_interval,
            chat_enabled: self.chat.then_some(true),
            chat_model: self.chat_model.clone(),
        }
    }
}

/// Initialize logging on stderr so it never interleaves with the dialog
fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("parley={level},parley_core={level}")));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();
}

fn load_config(args: &Args) -> anyhow::Result<ConductorConfig> {
    let path = args.config.clone().or_else(default_config_path);
    let mut config =
        load_config_from_path(path.as_deref()).context("Failed to load configuration")?;
    args.overrides().apply(&mut config);
    config.validate().context("Invalid configuration")?;
    Ok(config)
}

fn build_registry(
    config: &ConductorConfig,
    echo_interval: Duration,
) -> anyhow::Result<SkillRegistry> {
    let mut topics = vec![
        skills::ECHO.to_string(),
        skills::HELP.to_string(),
        skills::STOP.to_string(),
    ];
    if config.chat.enabled {
        topics.push(config.chat.topic.clone());
    }

    let mut registry = SkillRegistry::new()
        .with(EchoSkill::new(echo_interval))?
        .with(HelpSkill::new(topics))?
        .with(StopSkill)?;
    if config.chat.enabled {
        let backend = Arc::new(OllamaBackend::from_config(&config.chat));
        registry.register(ChatSkill::from_config(&config.chat, backend))?;
    }
    Ok(registry)
}

fn build_extractor(config: &ConductorConfig) -> KeywordIntentExtractor {
    let extractor = skills::keyword_rules(KeywordIntentExtractor::new());
    if config.chat.enabled {
        extractor.fallback(Intent::new(config.chat.topic.clone()).with_priority(Priority::LOWEST))
    } else {
        extractor
    }
}

fn build_stores(config: &ConductorConfig) -> (Arc<dyn UserStore>, Arc<dyn StateStore>) {
    let Some(dir) = &config.data_dir else {
        return (
            Arc::new(MemoryUserStore::new()),
            Arc::new(MemoryStateStore::new(config.state_timeout_secs)),
        );
    };
    tracing::info!(data_dir = %dir.display(), "Using file stores");
    let users: Arc<dyn UserStore> = Arc::new(FileUserStore::new(dir.join("users")));
    let states: Arc<dyn StateStore> =
        Arc::new(FileStateStore::new(dir.join("states"), config.state_timeout_secs));
    (users, states)
}

/// Resolve when the process is asked to terminate
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {
                        tracing::info!("Received SIGINT, shutting down");
                    }
                    _ = sigterm.recv() => {
                        tracing::info!("Received SIGTERM, shutting down");
                    }
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to install SIGTERM handler");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!("Received Ctrl+C, shutting down");
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logging(&args.log_level);

    let config = load_config(&args)?;
    tracing::info!(source = %config.source, "Configuration loaded");

    let registry = build_registry(&config, Duration::from_millis(args.echo_interval.max(1)))?;
    tracing::info!(topics = ?registry.topics(), "Skills registered");
    if config.chat.enabled && !OllamaBackend::from_config(&config.chat).health_check().await {
        tracing::warn!(
            host = %config.chat.host,
            port = config.chat.port,
            "Chat backend unreachable, chat turns will fail until it is up"
        );
    }
    let router = Arc::new(TopicRouter::new(registry).with_extractor(build_extractor(&config)));
    let (users, states) = build_stores(&config);

    let performer = Arc::new(ConsolePerformer::default());
    let (follow_ups, providers) = ConsoleInput::providers(16);
    let conductor = Arc::new(
        Conductor::from_parts(config, router, users, states, performer.clone())
            .with_providers(providers)
            .with_hooks(ConsoleHooks),
    );

    if let Some(text) = args.once {
        drop(follow_ups);
        return match conductor.start_dialog(&args.user, DialogInput::Text(text)).await {
            DialogOutcome::Failed(e) => Err(e.into()),
            outcome => {
                tracing::info!(?outcome, "Dialog finished");
                Ok(())
            }
        };
    }

    println!(
        "parley {} - type to talk, /stop to interrupt, Ctrl+D to quit",
        env!("CARGO_PKG_VERSION")
    );

    let shutdown = CancellationToken::new();
    let intake = Arc::new(RequestIntake::new());

    let runner = tokio::spawn({
        let conductor = conductor.clone();
        let intake = intake.clone();
        let shutdown = shutdown.clone();
        async move { intake.run(&conductor, &shutdown).await }
    });

    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            shutdown_signal().await;
            shutdown.cancel();
        }
    });

    console::read_lines(
        args.user.clone(),
        conductor.clone(),
        intake.clone(),
        follow_ups,
        shutdown.clone(),
    )
    .await;
    console::drain(&conductor, &intake, &shutdown).await;
    shutdown.cancel();

    let dialogs = runner.await.context("Request intake task failed")?;
    tracing::info!(
        dialogs,
        interruptions = performer.interruptions(),
        "Parley stopped"
    );
    Ok(())
}
