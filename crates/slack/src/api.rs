use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde_json::{json, Value};
use thiserror::Error;

pub const DEFAULT_API_BASE: &str = "https://slack.com/api";

/// Auth error codes the backend uses to reject a credential outright.
/// These are terminal: retrying the same token cannot succeed.
const AUTH_ERROR_CODES: &[&str] =
    &["invalid_auth", "not_authed", "account_inactive", "token_revoked", "token_expired"];

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("authentication rejected by slack: {0}")]
    Auth(String),
    #[error("rate limited by slack (retry after {retry_after:?})")]
    RateLimited { retry_after: Option<Duration> },
    #[error("slack api `{method}` returned http status {status}")]
    Http { method: &'static str, status: u16 },
    #[error("slack api `{method}` failed: {code}")]
    Slack { method: &'static str, code: String },
    #[error("transport failure calling `{method}`: {message}")]
    Transport { method: &'static str, message: String },
}

impl ApiError {
    /// Whether a retry with backoff can plausibly succeed. Auth rejections
    /// and application-level error codes are terminal.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::RateLimited { .. } | Self::Transport { .. } => true,
            Self::Http { status, .. } => (500..600).contains(status),
            Self::Auth(_) | Self::Slack { .. } => false,
        }
    }

    /// Backend-specified wait, when the failure carried one.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }
}

/// Identity of the bot behind the bot-level token, from `auth.test`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BotIdentity {
    pub user_id: String,
    pub user: Option<String>,
    pub team: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChannelEntry {
    pub id: String,
    pub name: String,
    pub is_archived: bool,
}

/// Backend acknowledgment of a posted message. `ts` doubles as the message
/// id for threading follow-ups.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PostedMessage {
    pub channel: String,
    pub ts: String,
}

/// One outbound publish request. `channel` may still be a human-facing name;
/// the delivery agent resolves it before the send API is contacted.
#[derive(Clone, Debug, PartialEq)]
pub struct OutboundMessage {
    pub channel: String,
    pub text: String,
    pub thread_ts: Option<String>,
    pub blocks: Option<Value>,
    pub attachments: Option<Value>,
    pub unfurl_links: bool,
}

impl OutboundMessage {
    pub fn text(channel: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            channel: channel.into(),
            text: text.into(),
            thread_ts: None,
            blocks: None,
            attachments: None,
            unfurl_links: true,
        }
    }

    pub(crate) fn to_body(&self) -> Value {
        let mut body = json!({
            "channel": self.channel,
            "text": self.text,
            "unfurl_links": self.unfurl_links,
            "unfurl_media": self.unfurl_links,
        });
        if let Some(thread_ts) = &self.thread_ts {
            body["thread_ts"] = Value::String(thread_ts.clone());
        }
        if let Some(blocks) = &self.blocks {
            body["blocks"] = blocks.clone();
        }
        if let Some(attachments) = &self.attachments {
            body["attachments"] = attachments.clone();
        }
        body
    }
}

/// Request/response surface of the Slack Web API, authenticated with the
/// bot-level token. One attempt per call; retry loops live with callers so
/// bounds and backoff stay independently testable.
#[async_trait]
pub trait SlackApi: Send + Sync {
    async fn auth_test(&self) -> Result<BotIdentity, ApiError>;
    async fn list_channels(&self) -> Result<Vec<ChannelEntry>, ApiError>;
    async fn post_message(&self, message: &OutboundMessage) -> Result<PostedMessage, ApiError>;
}

pub struct HttpSlackApi {
    http: reqwest::Client,
    bot_token: SecretString,
    api_base: String,
}

impl HttpSlackApi {
    pub fn new(bot_token: SecretString) -> Self {
        Self { http: reqwest::Client::new(), bot_token, api_base: DEFAULT_API_BASE.to_owned() }
    }

    pub fn with_api_base(bot_token: SecretString, api_base: impl Into<String>) -> Self {
        Self { http: reqwest::Client::new(), bot_token, api_base: api_base.into() }
    }

    async fn call(
        &self,
        method: &'static str,
        request: reqwest::RequestBuilder,
    ) -> Result<Value, ApiError> {
        let response = request
            .bearer_auth(self.bot_token.expose_secret())
            .send()
            .await
            .map_err(|error| ApiError::Transport { method, message: error.to_string() })?;

        let status = response.status();
        if status.as_u16() == 429 {
            let retry_after = parse_retry_after(response.headers());
            return Err(ApiError::RateLimited { retry_after });
        }
        if !status.is_success() {
            return Err(ApiError::Http { method, status: status.as_u16() });
        }

        let value: Value = response
            .json()
            .await
            .map_err(|error| ApiError::Transport { method, message: error.to_string() })?;

        if value.get("ok").and_then(Value::as_bool) != Some(true) {
            let code =
                value.get("error").and_then(Value::as_str).unwrap_or("unknown").to_owned();
            return Err(classify_slack_error(method, code));
        }

        Ok(value)
    }
}

#[async_trait]
impl SlackApi for HttpSlackApi {
    async fn auth_test(&self) -> Result<BotIdentity, ApiError> {
        let value =
            self.call("auth.test", self.http.post(format!("{}/auth.test", self.api_base))).await?;

        let user_id = value
            .get("user_id")
            .and_then(Value::as_str)
            .ok_or_else(|| ApiError::Slack {
                method: "auth.test",
                code: "missing user_id in response".to_owned(),
            })?
            .to_owned();

        Ok(BotIdentity {
            user_id,
            user: value.get("user").and_then(Value::as_str).map(str::to_owned),
            team: value.get("team").and_then(Value::as_str).map(str::to_owned),
        })
    }

    async fn list_channels(&self) -> Result<Vec<ChannelEntry>, ApiError> {
        let mut channels = Vec::new();
        let mut cursor: Option<String> = None;

        // 50 pages x 200 channels bounds a pathological workspace listing.
        for _ in 0..50 {
            let mut query = vec![
                ("types", "public_channel,private_channel".to_owned()),
                ("exclude_archived", "true".to_owned()),
                ("limit", "200".to_owned()),
            ];
            if let Some(next) = &cursor {
                query.push(("cursor", next.clone()));
            }

            let value = self
                .call(
                    "conversations.list",
                    self.http.get(format!("{}/conversations.list", self.api_base)).query(&query),
                )
                .await?;

            channels.extend(extract_channels(&value));
            cursor = next_cursor(&value);
            if cursor.is_none() {
                break;
            }
        }

        Ok(channels)
    }

    async fn post_message(&self, message: &OutboundMessage) -> Result<PostedMessage, ApiError> {
        let value = self
            .call(
                "chat.postMessage",
                self.http
                    .post(format!("{}/chat.postMessage", self.api_base))
                    .json(&message.to_body()),
            )
            .await?;

        let ts = value
            .get("ts")
            .and_then(Value::as_str)
            .ok_or_else(|| ApiError::Slack {
                method: "chat.postMessage",
                code: "missing ts in response".to_owned(),
            })?
            .to_owned();
        let channel = value
            .get("channel")
            .and_then(Value::as_str)
            .unwrap_or(message.channel.as_str())
            .to_owned();

        Ok(PostedMessage { channel, ts })
    }
}

fn classify_slack_error(method: &'static str, code: String) -> ApiError {
    if AUTH_ERROR_CODES.contains(&code.as_str()) {
        return ApiError::Auth(code);
    }
    if code == "ratelimited" {
        return ApiError::RateLimited { retry_after: None };
    }
    ApiError::Slack { method, code }
}

fn parse_retry_after(headers: &reqwest::header::HeaderMap) -> Option<Duration> {
    headers
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

fn extract_channels(value: &Value) -> Vec<ChannelEntry> {
    value
        .get("channels")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(|channel| {
            let id = channel.get("id").and_then(Value::as_str)?;
            let name = channel.get("name").and_then(Value::as_str)?;
            Some(ChannelEntry {
                id: id.to_owned(),
                name: name.to_owned(),
                is_archived: channel
                    .get("is_archived")
                    .and_then(Value::as_bool)
                    .unwrap_or(false),
            })
        })
        .collect()
}

fn next_cursor(value: &Value) -> Option<String> {
    value
        .get("response_metadata")
        .and_then(|metadata| metadata.get("next_cursor"))
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|cursor| !cursor.is_empty())
        .map(str::to_owned)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::json;

    use super::{
        classify_slack_error, extract_channels, next_cursor, parse_retry_after, ApiError,
        OutboundMessage,
    };

    #[test]
    fn auth_codes_classify_as_auth_errors() {
        assert!(matches!(
            classify_slack_error("auth.test", "invalid_auth".to_owned()),
            ApiError::Auth(_)
        ));
        assert!(matches!(
            classify_slack_error("chat.postMessage", "channel_not_found".to_owned()),
            ApiError::Slack { code, .. } if code == "channel_not_found"
        ));
        assert!(matches!(
            classify_slack_error("chat.postMessage", "ratelimited".to_owned()),
            ApiError::RateLimited { retry_after: None }
        ));
    }

    #[test]
    fn retryability_follows_the_taxonomy() {
        assert!(ApiError::RateLimited { retry_after: None }.is_retryable());
        assert!(ApiError::Transport { method: "auth.test", message: "timeout".into() }
            .is_retryable());
        assert!(ApiError::Http { method: "auth.test", status: 503 }.is_retryable());
        assert!(!ApiError::Http { method: "auth.test", status: 404 }.is_retryable());
        assert!(!ApiError::Auth("invalid_auth".into()).is_retryable());
        assert!(!ApiError::Slack { method: "chat.postMessage", code: "is_archived".into() }
            .is_retryable());
    }

    #[test]
    fn retry_after_header_parses_to_duration() {
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(reqwest::header::RETRY_AFTER, "17".parse().expect("header"));
        assert_eq!(parse_retry_after(&headers), Some(Duration::from_secs(17)));

        let empty = reqwest::header::HeaderMap::new();
        assert_eq!(parse_retry_after(&empty), None);
    }

    #[test]
    fn outbound_body_includes_optional_fields_only_when_set() {
        let plain = OutboundMessage::text("C1", "hi").to_body();
        assert_eq!(plain["channel"], "C1");
        assert!(plain.get("thread_ts").is_none());
        assert!(plain.get("blocks").is_none());

        let mut threaded = OutboundMessage::text("C1", "hi");
        threaded.thread_ts = Some("1730000000.000100".to_owned());
        threaded.blocks = Some(json!([{"type": "section"}]));
        let body = threaded.to_body();
        assert_eq!(body["thread_ts"], "1730000000.000100");
        assert_eq!(body["blocks"][0]["type"], "section");
    }

    #[test]
    fn channel_listing_and_cursor_extraction() {
        let page = json!({
            "ok": true,
            "channels": [
                {"id": "C1", "name": "general", "is_archived": false},
                {"id": "C2", "name": "old", "is_archived": true},
                {"name": "no-id"}
            ],
            "response_metadata": {"next_cursor": "abc"}
        });

        let channels = extract_channels(&page);
        assert_eq!(channels.len(), 2);
        assert_eq!(channels[0].id, "C1");
        assert!(channels[1].is_archived);
        assert_eq!(next_cursor(&page), Some("abc".to_owned()));

        let last_page = json!({"ok": true, "channels": [], "response_metadata": {"next_cursor": ""}});
        assert_eq!(next_cursor(&last_page), None);
    }
}
