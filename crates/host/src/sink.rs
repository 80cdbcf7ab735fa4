use async_trait::async_trait;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use slackline_core::envelope::MessageEnvelope;

use crate::protocol::{self, AgentContext, AgentData, ProtocolError};

/// Output channel name the host subscribes to for forwarded messages.
const DATA_CHANNEL: &str = "data";

#[derive(Debug, Error)]
pub enum HostError {
    #[error("host unavailable: {0}")]
    Unavailable(String),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

/// Inbound interface of the workflow host: one call per forwarded message.
/// Delivery is at-most-once per process; the listener applies dedup before
/// calling this.
#[async_trait]
pub trait HostSink: Send + Sync {
    async fn on_message(&self, envelope: &MessageEnvelope) -> Result<(), HostError>;
}

/// Production sink: serializes each envelope as a `.OUT` line on stdout,
/// flushed immediately so the host sees messages as they arrive.
pub struct StdioHostSink {
    stdout: Mutex<tokio::io::Stdout>,
}

impl Default for StdioHostSink {
    fn default() -> Self {
        Self { stdout: Mutex::new(tokio::io::stdout()) }
    }
}

impl StdioHostSink {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl HostSink for StdioHostSink {
    async fn on_message(&self, envelope: &MessageEnvelope) -> Result<(), HostError> {
        let value = serde_json::to_value(envelope).map_err(ProtocolError::from)?;
        let data = AgentData { kind: "object".to_owned(), value };
        let line = protocol::render_out(&AgentContext::default(), DATA_CHANNEL, &data)?;

        let mut stdout = self.stdout.lock().await;
        stdout
            .write_all(line.as_bytes())
            .await
            .map_err(|error| HostError::Unavailable(error.to_string()))?;
        stdout
            .write_all(b"\n")
            .await
            .map_err(|error| HostError::Unavailable(error.to_string()))?;
        stdout.flush().await.map_err(|error| HostError::Unavailable(error.to_string()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use serde_json::json;

    use slackline_core::envelope::MessageEnvelope;

    use crate::protocol::{self, AgentContext, AgentData};

    #[test]
    fn envelope_serializes_into_out_line_shape() {
        let envelope = MessageEnvelope {
            channel: "C1".to_owned(),
            author: "U1".to_owned(),
            ts: "1730000000.000100".to_owned(),
            text: "hi".to_owned(),
            thread_ts: None,
            files: Vec::new(),
            team: Some("T1".to_owned()),
            received_at: Utc::now(),
        };

        let value = serde_json::to_value(&envelope).expect("serialize");
        let data = AgentData { kind: "object".to_owned(), value };
        let line = protocol::render_out(&AgentContext::default(), "data", &data).expect("render");

        let parsed: serde_json::Value =
            serde_json::from_str(line.strip_prefix(".OUT ").expect("prefix")).expect("json");
        assert_eq!(parsed["data"]["value"]["channel"], json!("C1"));
        assert_eq!(parsed["data"]["value"]["ts"], json!("1730000000.000100"));
        assert_eq!(parsed["data"]["value"]["team"], json!("T1"));
    }
}
