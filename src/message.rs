use anyhow::{Context, Result};
use serde::Deserialize;
use serde_json::{Map, Value};

/// A chat message delivered by the server.
///
/// The server sends the text under `message`. Any other fields, `text`
/// included, are kept as-is and handed to the sink untouched.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Message {
    #[serde(rename = "message")]
    pub text: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Message {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            extra: Map::new(),
        }
    }

    /// Decode a `receive_message` result. Anything that is not an object
    /// with a string text field is rejected.
    pub fn from_payload(payload: Value) -> Result<Self> {
        if !payload.is_object() {
            anyhow::bail!("Expected a message object, got: {}", payload);
        }
        serde_json::from_value(payload).context("Malformed message payload")
    }
}
