use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, warn};

use crate::rpc::{Params, RemoteEndpoint};

/// Remote operation that broadcasts a message to every listener.
pub const POST_MESSAGE: &str = "post_message";

/// Posts user-authored messages. Has nothing to do with the poll loop.
#[derive(Clone)]
pub struct SendAction {
    endpoint: Arc<dyn RemoteEndpoint>,
}

impl SendAction {
    pub fn new(endpoint: Arc<dyn RemoteEndpoint>) -> Self {
        Self { endpoint }
    }

    /// Post `text` once, in the background. Nobody waits for the outcome:
    /// a failed post is logged and the message is lost.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn send(&self, text: String) -> JoinHandle<()> {
        tokio::spawn(self.post(text))
    }

    /// Same as [`SendAction::send`], but the task joins `tasks` so the host
    /// can let it finish before shutting down.
    pub fn send_in(&self, tasks: &mut JoinSet<()>, text: String) {
        tasks.spawn(self.post(text));
    }

    fn post(&self, text: String) -> impl Future<Output = ()> + Send + 'static {
        let endpoint = self.endpoint.clone();
        async move {
            let mut params = Params::new();
            params.insert("message".to_string(), Value::String(text));
            match endpoint.call(POST_MESSAGE, params).await {
                Ok(_) => debug!("Message posted"),
                Err(e) => warn!("Failed to post message, dropping it: {:#}", e),
            }
        }
    }
}

/// The two user gestures that post the input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    /// Activation key pressed in the input field.
    Submit,
    /// Explicit send action.
    Send,
}

/// The text the user is composing, plus the posts it has fired that may still
/// be on the wire.
pub struct ChatInput {
    text: String,
    action: SendAction,
    in_flight: JoinSet<()>,
}

impl ChatInput {
    pub fn new(action: SendAction) -> Self {
        Self {
            text: String::new(),
            action,
            in_flight: JoinSet::new(),
        }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn set_text(&mut self, text: impl Into<String>) {
        self.text = text.into();
    }

    pub fn push_str(&mut self, text: &str) {
        self.text.push_str(text);
    }

    /// Post whatever is in the input and clear it. Both triggers do the same.
    pub fn trigger(&mut self, trigger: Trigger) {
        debug!("{:?} triggered with {} chars", trigger, self.text.len());
        // Reap posts that already finished.
        while self.in_flight.try_join_next().is_some() {}
        self.action
            .send_in(&mut self.in_flight, std::mem::take(&mut self.text));
    }

    /// Posts not known to be finished yet.
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// Give outstanding posts up to `limit` to complete, then abort the rest.
    /// Returns how many were aborted.
    pub async fn drain(&mut self, limit: Duration) -> usize {
        let in_flight = &mut self.in_flight;
        let finished = tokio::time::timeout(limit, async {
            while in_flight.join_next().await.is_some() {}
        })
        .await;

        if finished.is_ok() {
            return 0;
        }
        let aborted = self.in_flight.len();
        warn!("Giving up on {} unfinished post(s)", aborted);
        self.in_flight.shutdown().await;
        aborted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::poll::{PollSession, PollState};
    use crate::rpc::{HttpEndpoint, Payload};
    use crate::sink::ChannelSink;
    use crate::test_support::{chat_router, serve};
    use anyhow::Result;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;
    use tokio::sync::broadcast;

    /// Records every call; fails all of them when `failing` is set. Each
    /// call takes `latency` to answer.
    struct RecordingEndpoint {
        calls: Mutex<Vec<(String, Params)>>,
        answered: AtomicUsize,
        failing: bool,
        latency: Duration,
    }

    impl RecordingEndpoint {
        fn new(failing: bool) -> Arc<Self> {
            Self::slow(failing, Duration::ZERO)
        }

        fn slow(failing: bool, latency: Duration) -> Arc<Self> {
            Arc::new(Self {
                calls: Mutex::new(Vec::new()),
                answered: AtomicUsize::new(0),
                failing,
                latency,
            })
        }
    }

    #[async_trait]
    impl RemoteEndpoint for RecordingEndpoint {
        async fn call(&self, operation: &str, params: Params) -> Result<Payload> {
            self.calls
                .lock()
                .unwrap()
                .push((operation.to_string(), params));
            if !self.latency.is_zero() {
                tokio::time::sleep(self.latency).await;
            }
            self.answered.fetch_add(1, Ordering::SeqCst);
            if self.failing {
                anyhow::bail!("connection refused");
            }
            Ok(json!("message sent!"))
        }
    }

    const DRAIN_LIMIT: Duration = Duration::from_secs(5);

    #[tokio::test]
    async fn test_send_posts_message_once() {
        let endpoint = RecordingEndpoint::new(false);
        let action = SendAction::new(endpoint.clone());

        action.send("hello".to_string()).await.unwrap();

        let calls = endpoint.calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, POST_MESSAGE);
        assert_eq!(calls[0].1["message"], json!("hello"));
    }

    #[tokio::test]
    async fn test_failed_send_is_swallowed() {
        let endpoint = RecordingEndpoint::new(true);
        let action = SendAction::new(endpoint.clone());

        // The task finishes normally instead of panicking.
        assert!(action.send("lost".to_string()).await.is_ok());
        assert_eq!(endpoint.calls.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_both_triggers_send_and_clear_input() {
        let endpoint = RecordingEndpoint::new(false);
        let mut input = ChatInput::new(SendAction::new(endpoint.clone()));

        input.set_text("first");
        input.trigger(Trigger::Submit);
        assert_eq!(input.text(), "");

        input.push_str("sec");
        input.push_str("ond");
        input.trigger(Trigger::Send);
        assert_eq!(input.text(), "");

        assert_eq!(input.drain(DRAIN_LIMIT).await, 0);
        assert_eq!(input.in_flight(), 0);

        let calls = endpoint.calls.lock().unwrap();
        let sent: Vec<&Value> = calls.iter().map(|(_, p)| &p["message"]).collect();
        assert_eq!(sent, vec![&json!("first"), &json!("second")]);
    }

    #[tokio::test]
    async fn test_send_leaves_poll_session_alone() {
        let poll_endpoint = RecordingEndpoint::new(true);
        let (sink, _rx) = ChannelSink::channel();
        let mut session = PollSession::new(
            poll_endpoint.clone(),
            Box::new(sink),
            Duration::from_secs(3600),
        );
        session.start().unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        let before = session.state();

        let send_endpoint = RecordingEndpoint::new(true);
        let mut input = ChatInput::new(SendAction::new(send_endpoint));
        input.set_text("hi");
        input.trigger(Trigger::Submit);
        assert_eq!(input.drain(DRAIN_LIMIT).await, 0);

        assert_eq!(session.state(), before);
        assert_eq!(poll_endpoint.calls.lock().unwrap().len(), 1);

        session.cancel();
        session.join().await;
    }

    #[tokio::test]
    async fn test_posted_message_comes_back_through_long_poll() {
        let (events, _) = broadcast::channel(16);
        let base = serve(chat_router(events.clone())).await;
        let endpoint: Arc<dyn RemoteEndpoint> = Arc::new(HttpEndpoint::new(&base).unwrap());

        let (sink, mut rx) = ChannelSink::channel();
        let mut session =
            PollSession::new(endpoint.clone(), Box::new(sink), Duration::from_millis(100));
        session.start().unwrap();

        // Wait until the long-poll is parked on the server.
        tokio::time::timeout(Duration::from_secs(5), async {
            while events.receiver_count() == 0 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
        assert_eq!(session.state(), PollState::Awaiting);

        let mut input = ChatInput::new(SendAction::new(endpoint));
        input.set_text("hello from the other side");
        input.trigger(Trigger::Submit);

        let message = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(message.text, "hello from the other side");

        session.cancel();
        session.join().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_drain_lets_slow_post_finish() {
        let endpoint = RecordingEndpoint::slow(false, Duration::from_secs(2));
        let mut input = ChatInput::new(SendAction::new(endpoint.clone()));

        input.set_text("last words");
        input.trigger(Trigger::Submit);
        assert_eq!(input.in_flight(), 1);

        assert_eq!(input.drain(DRAIN_LIMIT).await, 0);
        assert_eq!(endpoint.answered.load(Ordering::SeqCst), 1);
        assert_eq!(endpoint.calls.lock().unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_drain_aborts_posts_past_the_limit() {
        let endpoint = RecordingEndpoint::slow(false, Duration::from_secs(60));
        let mut input = ChatInput::new(SendAction::new(endpoint.clone()));

        input.set_text("stuck");
        input.trigger(Trigger::Submit);

        assert_eq!(input.drain(Duration::from_secs(1)).await, 1);
        assert_eq!(input.in_flight(), 0);
        assert_eq!(endpoint.answered.load(Ordering::SeqCst), 0);
    }
}
