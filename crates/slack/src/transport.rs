use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use secrecy::{ExposeSecret, SecretString};
use serde_json::{json, Value};
use thiserror::Error;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, trace};

use crate::api::DEFAULT_API_BASE;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("socket mode authentication rejected: {0}")]
    Auth(String),
    #[error("failed to establish socket mode connection: {0}")]
    Connect(String),
    #[error("socket mode connection closed: {0}")]
    Closed(String),
    #[error("malformed socket mode frame: {0}")]
    Protocol(String),
}

impl TransportError {
    /// Everything except an auth rejection is transient from the session
    /// manager's point of view: a fresh connection may succeed.
    pub fn is_transient(&self) -> bool {
        !matches!(self, Self::Auth(_))
    }
}

/// One decoded frame off the socket mode stream.
#[derive(Clone, Debug, PartialEq)]
pub enum SocketEnvelope {
    /// Server greeting after the upgrade. The session is live once seen.
    Hello,
    /// An event delivery. `envelope_id` must be acked promptly or the
    /// server redelivers on a later connection.
    Event { envelope_id: Option<String>, payload: Value },
    /// Server-initiated teardown notice. The connection should be dropped
    /// and re-established.
    Disconnect { reason: String },
}

/// A live socket mode session: connect once, then pull envelopes and push
/// acks until the peer goes away. The session manager owns reconnection.
#[async_trait]
pub trait SessionTransport: Send {
    async fn connect(&mut self) -> Result<(), TransportError>;
    async fn next_envelope(&mut self) -> Result<SocketEnvelope, TransportError>;
    async fn ack(&mut self, envelope_id: &str) -> Result<(), TransportError>;
    async fn close(&mut self);
}

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Real transport: `apps.connections.open` with the app-level token, then a
/// websocket to the returned `wss://` URL.
pub struct SocketModeTransport {
    http: reqwest::Client,
    app_token: SecretString,
    api_base: String,
    read_timeout: Duration,
    stream: Option<WsStream>,
}

impl SocketModeTransport {
    pub fn new(app_token: SecretString) -> Self {
        Self {
            http: reqwest::Client::new(),
            app_token,
            api_base: DEFAULT_API_BASE.to_owned(),
            read_timeout: Duration::from_secs(60),
            stream: None,
        }
    }

    /// The server pings within tens of seconds on a healthy connection, so a
    /// read that exceeds this window means the link is dead even if TCP has
    /// not noticed yet.
    pub fn with_read_timeout(mut self, read_timeout: Duration) -> Self {
        self.read_timeout = read_timeout;
        self
    }

    async fn open_url(&self) -> Result<String, TransportError> {
        let response = self
            .http
            .post(format!("{}/apps.connections.open", self.api_base))
            .bearer_auth(self.app_token.expose_secret())
            .send()
            .await
            .map_err(|error| TransportError::Connect(error.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::Connect(format!("http status {status}")));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|error| TransportError::Connect(error.to_string()))?;

        if body.get("ok").and_then(Value::as_bool) != Some(true) {
            let code = body.get("error").and_then(Value::as_str).unwrap_or("unknown");
            if matches!(code, "invalid_auth" | "not_authed" | "forbidden_team") {
                return Err(TransportError::Auth(code.to_owned()));
            }
            return Err(TransportError::Connect(code.to_owned()));
        }

        let url = body
            .get("url")
            .and_then(Value::as_str)
            .ok_or_else(|| TransportError::Connect("response carried no url".to_owned()))?;
        validate_socket_url(url)?;
        Ok(url.to_owned())
    }

    fn stream_mut(&mut self) -> Result<&mut WsStream, TransportError> {
        self.stream
            .as_mut()
            .ok_or_else(|| TransportError::Closed("not connected".to_owned()))
    }
}

#[async_trait]
impl SessionTransport for SocketModeTransport {
    async fn connect(&mut self) -> Result<(), TransportError> {
        let url = self.open_url().await?;
        debug!("opening socket mode websocket");
        let (stream, _) = connect_async(&url)
            .await
            .map_err(|error| TransportError::Connect(error.to_string()))?;
        self.stream = Some(stream);
        Ok(())
    }

    async fn next_envelope(&mut self) -> Result<SocketEnvelope, TransportError> {
        loop {
            let read_timeout = self.read_timeout;
            let read = tokio::time::timeout(read_timeout, self.stream_mut()?.next()).await;
            let message = match read {
                Err(_) => {
                    self.stream = None;
                    return Err(TransportError::Closed(format!(
                        "no traffic for {}s",
                        read_timeout.as_secs()
                    )));
                }
                Ok(frame) => frame,
            };

            let message = match message {
                Some(Ok(message)) => message,
                Some(Err(error)) => {
                    self.stream = None;
                    return Err(TransportError::Closed(error.to_string()));
                }
                None => {
                    self.stream = None;
                    return Err(TransportError::Closed("stream ended".to_owned()));
                }
            };

            match message {
                Message::Text(text) => return parse_socket_frame(text.as_str()),
                Message::Ping(payload) => {
                    trace!("ping from server");
                    self.stream_mut()?
                        .send(Message::Pong(payload))
                        .await
                        .map_err(|error| TransportError::Closed(error.to_string()))?;
                }
                Message::Close(frame) => {
                    self.stream = None;
                    let reason = frame
                        .map(|f| f.reason.to_string())
                        .unwrap_or_else(|| "close frame".to_owned());
                    return Err(TransportError::Closed(reason));
                }
                Message::Pong(_) | Message::Binary(_) | Message::Frame(_) => {}
            }
        }
    }

    async fn ack(&mut self, envelope_id: &str) -> Result<(), TransportError> {
        let frame = build_ack(envelope_id);
        self.stream_mut()?
            .send(Message::text(frame))
            .await
            .map_err(|error| TransportError::Closed(error.to_string()))
    }

    async fn close(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            let _ = stream.close(None).await;
        }
    }
}

fn validate_socket_url(url: &str) -> Result<(), TransportError> {
    if url.starts_with("wss://") {
        Ok(())
    } else {
        Err(TransportError::Connect(format!("refusing non-wss socket url `{url}`")))
    }
}

pub(crate) fn build_ack(envelope_id: &str) -> String {
    json!({"envelope_id": envelope_id}).to_string()
}

pub(crate) fn parse_socket_frame(text: &str) -> Result<SocketEnvelope, TransportError> {
    let frame: Value = serde_json::from_str(text)
        .map_err(|error| TransportError::Protocol(error.to_string()))?;

    match frame.get("type").and_then(Value::as_str) {
        Some("hello") => Ok(SocketEnvelope::Hello),
        Some("disconnect") => {
            let reason = frame
                .get("reason")
                .and_then(Value::as_str)
                .unwrap_or("unspecified")
                .to_owned();
            Ok(SocketEnvelope::Disconnect { reason })
        }
        Some(_) => Ok(SocketEnvelope::Event {
            envelope_id: frame
                .get("envelope_id")
                .and_then(Value::as_str)
                .map(str::to_owned),
            payload: frame,
        }),
        None => Err(TransportError::Protocol("frame carried no type".to_owned())),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{build_ack, parse_socket_frame, validate_socket_url, SocketEnvelope, TransportError};

    #[test]
    fn hello_and_disconnect_frames_decode() {
        assert_eq!(
            parse_socket_frame(r#"{"type":"hello","num_connections":1}"#).expect("hello"),
            SocketEnvelope::Hello
        );
        assert_eq!(
            parse_socket_frame(r#"{"type":"disconnect","reason":"refresh_requested"}"#)
                .expect("disconnect"),
            SocketEnvelope::Disconnect { reason: "refresh_requested".to_owned() }
        );
    }

    #[test]
    fn event_frames_keep_their_envelope_id_and_payload() {
        let text = json!({
            "type": "events_api",
            "envelope_id": "env-1",
            "payload": {"event": {"type": "message"}}
        })
        .to_string();

        match parse_socket_frame(&text).expect("event") {
            SocketEnvelope::Event { envelope_id, payload } => {
                assert_eq!(envelope_id.as_deref(), Some("env-1"));
                assert_eq!(payload["payload"]["event"]["type"], "message");
            }
            other => panic!("unexpected frame {other:?}"),
        }
    }

    #[test]
    fn malformed_frames_are_protocol_errors() {
        assert!(matches!(parse_socket_frame("not json"), Err(TransportError::Protocol(_))));
        assert!(matches!(parse_socket_frame(r#"{"no":"type"}"#), Err(TransportError::Protocol(_))));
    }

    #[test]
    fn ack_frame_shape() {
        assert_eq!(build_ack("env-9"), r#"{"envelope_id":"env-9"}"#);
    }

    #[test]
    fn only_wss_urls_are_accepted() {
        assert!(validate_socket_url("wss://wss.slack.com/link/abc").is_ok());
        assert!(validate_socket_url("ws://wss.slack.com/link/abc").is_err());
        assert!(validate_socket_url("https://example.com").is_err());
    }

    #[test]
    fn transience_classification() {
        assert!(TransportError::Closed("eof".into()).is_transient());
        assert!(TransportError::Connect("dns".into()).is_transient());
        assert!(!TransportError::Auth("invalid_auth".into()).is_transient());
    }
}
