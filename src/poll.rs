use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::PollConfig;
use crate::message::Message;
use crate::rpc::{Params, RemoteEndpoint};
use crate::sink::MessageSink;

/// Remote operation that blocks server-side until a message is available.
pub const RECEIVE_MESSAGE: &str = "receive_message";

pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(5000);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollState {
    /// No call outstanding.
    Idle,
    /// One `receive_message` call in flight.
    Awaiting,
    /// Terminal.
    Cancelled,
}

/// One long-polling subscription to the chat server.
///
/// The loop keeps exactly one `receive_message` call outstanding. A message
/// is handed to the sink and the next call goes out straight away; a failure
/// (transport error, server error, malformed payload) is logged and the next
/// call goes out after `retry_delay`. It runs until [`PollSession::cancel`] or
/// until the session is dropped.
pub struct PollSession {
    endpoint: Arc<dyn RemoteEndpoint>,
    sink: Option<Box<dyn MessageSink>>,
    retry_delay: Duration,
    /// Current state; flipping it to `Cancelled` is also the stop signal.
    state: Arc<watch::Sender<PollState>>,
    task: Option<JoinHandle<()>>,
}

impl PollSession {
    pub fn new(
        endpoint: Arc<dyn RemoteEndpoint>,
        sink: Box<dyn MessageSink>,
        retry_delay: Duration,
    ) -> Self {
        let (state, _) = watch::channel(PollState::Idle);
        Self {
            endpoint,
            sink: Some(sink),
            retry_delay,
            state: Arc::new(state),
            task: None,
        }
    }

    pub fn from_config(
        endpoint: Arc<dyn RemoteEndpoint>,
        sink: Box<dyn MessageSink>,
        config: &PollConfig,
    ) -> Self {
        Self::new(endpoint, sink, config.retry_delay())
    }

    /// Spawn the poll loop on the current Tokio runtime.
    ///
    /// A session runs once: starting it again, or after cancelling it, is an
    /// error.
    pub fn start(&mut self) -> Result<()> {
        if self.state() == PollState::Cancelled {
            anyhow::bail!("Poll session was cancelled, create a new one to resume");
        }
        let runtime = tokio::runtime::Handle::try_current()
            .context("Poll session must be started inside a Tokio runtime")?;
        let sink = self
            .sink
            .take()
            .context("Poll session is already running")?;

        info!(
            "Starting poll loop (retry delay {} ms)",
            self.retry_delay.as_millis()
        );

        self.state.send_replace(PollState::Awaiting);
        self.task = Some(runtime.spawn(run(
            self.endpoint.clone(),
            sink,
            self.retry_delay,
            self.state.clone(),
        )));
        Ok(())
    }

    /// Stop issuing calls. A call already in flight is abandoned and its
    /// result, if any, is discarded.
    pub fn cancel(&self) {
        let previous = self.state.send_replace(PollState::Cancelled);
        if previous != PollState::Cancelled && self.task.is_some() {
            info!("Poll loop cancelled");
        }
    }

    pub fn state(&self) -> PollState {
        *self.state.borrow()
    }

    pub fn retry_delay(&self) -> Duration {
        self.retry_delay
    }

    /// Wait for the loop task to wind down. Only returns once the session has
    /// been cancelled (or was never started).
    pub async fn join(&mut self) {
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!("Poll loop ended abnormally: {}", e);
            }
        }
    }
}

impl Drop for PollSession {
    fn drop(&mut self) {
        self.cancel();
    }
}

/// Move to `next` unless the session has been cancelled meanwhile.
fn advance(state: &watch::Sender<PollState>, next: PollState) -> bool {
    let mut live = true;
    state.send_if_modified(|current| {
        if *current == PollState::Cancelled {
            live = false;
            return false;
        }
        let changed = *current != next;
        *current = next;
        changed
    });
    live
}

async fn cancelled(rx: &mut watch::Receiver<PollState>) {
    // An error means the sender is gone, which only happens on teardown.
    let _ = rx.wait_for(|state| *state == PollState::Cancelled).await;
}

async fn run(
    endpoint: Arc<dyn RemoteEndpoint>,
    mut sink: Box<dyn MessageSink>,
    retry_delay: Duration,
    state: Arc<watch::Sender<PollState>>,
) {
    let mut stop = state.subscribe();
    let mut failures: u32 = 0;

    loop {
        if !advance(&state, PollState::Awaiting) {
            break;
        }

        debug!("Waiting for next message");

        let outcome = tokio::select! {
            biased;
            _ = cancelled(&mut stop) => break,
            outcome = endpoint.call(RECEIVE_MESSAGE, Params::new()) => outcome,
        };

        // A result that lands after cancel is dropped on the floor.
        if !advance(&state, PollState::Idle) {
            break;
        }

        match outcome.and_then(Message::from_payload) {
            Ok(message) => {
                if failures > 0 {
                    info!("Poll loop recovered after {} failed attempt(s)", failures);
                    failures = 0;
                }
                sink.on_message(message);
            }
            Err(e) => {
                failures = failures.saturating_add(1);
                warn!(
                    "Receiving failed ({} in a row), retrying in {} ms: {:#}",
                    failures,
                    retry_delay.as_millis(),
                    e
                );
                tokio::select! {
                    biased;
                    _ = cancelled(&mut stop) => break,
                    _ = tokio::time::sleep(retry_delay) => {}
                }
            }
        }
    }

    debug!("Poll loop stopped");
}
