//! Long-polling chat client.
//!
//! A [`PollSession`] keeps one `receive_message` call open against the chat
//! server and hands every message to a [`MessageSink`]. [`SendAction`] posts
//! the user's messages on a separate, fire-and-forget path.

pub mod config;
pub mod message;
pub mod poll;
pub mod rpc;
pub mod send;
pub mod sink;

#[cfg(test)]
mod test_support;

pub use config::Config;
pub use message::Message;
pub use poll::{PollSession, PollState};
pub use rpc::{HttpEndpoint, RemoteEndpoint};
pub use send::{ChatInput, SendAction, Trigger};
pub use sink::{ChannelSink, ContainerSink, MessageSink, Transcript, TranscriptSink};
