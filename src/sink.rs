use std::collections::VecDeque;
use std::io::Write;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::message::Message;

/// Receives every message the poll loop delivers, in delivery order, on the
/// loop's own task. Must not block for long: the next call only goes out once
/// it returns. A short write to a terminal is fine.
pub trait MessageSink: Send {
    fn on_message(&mut self, message: Message);
}

impl<F> MessageSink for F
where
    F: FnMut(Message) + Send,
{
    fn on_message(&mut self, message: Message) {
        self(message)
    }
}

/// Renders each message as a new line of the container and scrolls (flushes)
/// to it.
pub struct ContainerSink<W> {
    container: W,
}

impl<W: Write + Send> ContainerSink<W> {
    pub fn new(container: W) -> Self {
        Self { container }
    }

    pub fn into_inner(self) -> W {
        self.container
    }
}

impl<W: Write + Send> MessageSink for ContainerSink<W> {
    fn on_message(&mut self, message: Message) {
        // A broken terminal shouldn't stop the loop.
        if let Err(e) = writeln!(self.container, "{}", message.text)
            .and_then(|_| self.container.flush())
        {
            warn!("Failed to render message: {}", e);
        }
    }
}

/// Bounded message history shared between a [`TranscriptSink`] and whatever
/// view reads it.
#[derive(Clone)]
pub struct Transcript {
    inner: Arc<Mutex<TranscriptInner>>,
}

struct TranscriptInner {
    entries: VecDeque<Message>,
    capacity: usize,
    /// Position of the next entry since the transcript was created.
    next_position: u64,
}

impl Transcript {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(TranscriptInner {
                entries: VecDeque::with_capacity(capacity),
                capacity: capacity.max(1),
                next_position: 1,
            })),
        }
    }

    // A panicking view must not take the transcript down with it.
    fn lock(&self) -> MutexGuard<'_, TranscriptInner> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Insert after the last entry, dropping the oldest one if full.
    /// Returns the new entry's position.
    fn push_after_last(&self, message: Message) -> u64 {
        let mut inner = self.lock();
        if inner.entries.len() == inner.capacity {
            inner.entries.pop_front();
        }
        inner.entries.push_back(message);
        let position = inner.next_position;
        inner.next_position += 1;
        position
    }

    pub fn last(&self) -> Option<Message> {
        self.lock().entries.back().cloned()
    }

    pub fn snapshot(&self) -> Vec<Message> {
        self.lock().entries.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Appends each message right after the transcript's last entry, then echoes
/// it with its position.
pub struct TranscriptSink<W> {
    transcript: Transcript,
    output: W,
}

impl<W: Write + Send> TranscriptSink<W> {
    pub fn new(transcript: Transcript, output: W) -> Self {
        Self { transcript, output }
    }
}

impl<W: Write + Send> MessageSink for TranscriptSink<W> {
    fn on_message(&mut self, message: Message) {
        let text = message.text.clone();
        let position = self.transcript.push_after_last(message);
        if let Err(e) = writeln!(self.output, "[{}] {}", position, text)
            .and_then(|_| self.output.flush())
        {
            warn!("Failed to render message #{}: {}", position, e);
        }
    }
}

/// Hands messages to a view running on another task.
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<Message>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::UnboundedSender<Message>) -> Self {
        Self { tx }
    }

    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Message>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tx), rx)
    }
}

impl MessageSink for ChannelSink {
    fn on_message(&mut self, message: Message) {
        if self.tx.send(message).is_err() {
            debug!("View is gone, dropping message");
        }
    }
}
