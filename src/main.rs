use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use totochat::config::{Config, SinkKind};
use totochat::{
    ChatInput, ContainerSink, HttpEndpoint, MessageSink, PollSession, RemoteEndpoint, SendAction,
    Transcript, TranscriptSink, Trigger,
};

/// How long unfinished posts get before the process exits.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    // Logs go to stderr, stdout is the chat view
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,totochat=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    // Load configuration
    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config.toml"));

    info!("Loading configuration from: {}", config_path.display());
    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;

    info!("Configuration loaded successfully");
    info!("  Server: {}", config.endpoint.base_url);
    info!("  Retry delay: {} ms", config.poll.retry_delay_ms);
    info!("  View: {}", config.view.sink);

    let endpoint: Arc<dyn RemoteEndpoint> =
        Arc::new(HttpEndpoint::new(&config.endpoint.base_url)?);

    let sink: Box<dyn MessageSink> = match config.view.sink {
        SinkKind::Container => Box::new(ContainerSink::new(std::io::stdout())),
        SinkKind::Transcript => Box::new(TranscriptSink::new(
            Transcript::new(config.view.history),
            std::io::stdout(),
        )),
    };

    let mut session = PollSession::from_config(endpoint.clone(), sink, &config.poll);
    session.start()?;

    let mut input = ChatInput::new(SendAction::new(endpoint));
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    info!("Type a message and press Enter. /send <text> sends explicitly, /quit exits.");

    loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                info!("Interrupted");
                break;
            }
            line = lines.next_line() => {
                let Some(line) = line.context("Failed to read input")? else {
                    break;
                };
                match line.trim() {
                    "" => continue,
                    "/quit" => break,
                    text => {
                        if let Some(rest) = text.strip_prefix("/send ") {
                            input.set_text(rest.trim_start());
                            input.trigger(Trigger::Send);
                        } else {
                            input.set_text(text);
                            input.trigger(Trigger::Submit);
                        }
                    }
                }
            }
        }
    }

    session.cancel();
    session.join().await;

    if input.in_flight() > 0 {
        info!("Waiting for {} post(s) to finish", input.in_flight());
    }
    input.drain(SHUTDOWN_GRACE).await;
    info!("Bye");

    Ok(())
}
