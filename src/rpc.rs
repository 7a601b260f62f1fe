use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

/// Parameters of a remote call. May be empty.
pub type Params = Map<String, Value>;

/// Whatever the server put under `result`.
pub type Payload = Value;

/// A remote procedure endpoint at a fixed base address.
///
/// One `call` is one network round trip. No retries, no timeouts: the caller
/// decides what to do with a failure, and every failure looks the same.
#[async_trait]
pub trait RemoteEndpoint: Send + Sync {
    async fn call(&self, operation: &str, params: Params) -> Result<Payload>;
}

#[derive(Debug, Serialize)]
struct RpcRequest<'a> {
    method: &'a str,
    parameters: Params,
}

#[derive(Debug, Deserialize)]
struct RpcResponse {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<RpcError>,
}

#[derive(Debug, Deserialize)]
struct RpcError {
    code: i64,
    #[serde(default)]
    value: String,
}

/// Human-readable name for the server's numeric error codes.
fn error_kind(code: i64) -> &'static str {
    match code {
        1000 => "server error",
        1001 => "invalid method",
        1002 => "missing method",
        1003 => "missing parameters",
        1004 => "not authorized",
        _ => "error",
    }
}

/// JSON-over-HTTP client: `POST {"method", "parameters"}` to the base address,
/// answered with `{"result": ...}` or `{"error": {"code", "value"}}`.
pub struct HttpEndpoint {
    client: reqwest::Client,
    base_url: String,
}

impl HttpEndpoint {
    pub fn new(base_url: &str) -> Result<Self> {
        let base_url = base_url.trim();
        if base_url.is_empty() {
            anyhow::bail!("Chat server base address must not be empty");
        }
        Ok(Self {
            client: reqwest::Client::new(),
            base_url: base_url.to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait]
impl RemoteEndpoint for HttpEndpoint {
    async fn call(&self, operation: &str, params: Params) -> Result<Payload> {
        if operation.is_empty() {
            anyhow::bail!("Operation name must not be empty");
        }

        let request = RpcRequest {
            method: operation,
            parameters: params,
        };

        debug!("Calling '{}' on {}", operation, self.base_url);

        let response = self
            .client
            .post(&self.base_url)
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await
            .with_context(|| format!("Failed to send '{}' request", operation))?;

        let status = response.status();
        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            anyhow::bail!("Chat server error ({}): {}", status, error_body);
        }

        let body: RpcResponse = response
            .json()
            .await
            .with_context(|| format!("Failed to parse '{}' response", operation))?;

        if let Some(err) = body.error {
            anyhow::bail!(
                "'{}' failed with {} {}: {}",
                operation,
                error_kind(err.code),
                err.code,
                err.value
            );
        }

        body.result
            .with_context(|| format!("Response to '{}' carried no result", operation))
    }
}
