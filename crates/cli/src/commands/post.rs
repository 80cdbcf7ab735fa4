use std::path::PathBuf;
use std::sync::Arc;

use serde_json::Value;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info, warn};

use slackline_core::config::{AppConfig, ConfigError, ConfigOverrides, LoadOptions};
use slackline_core::DedupWindow;
use slackline_host::{protocol, AgentData, HostCommand};
use slackline_slack::{DeliveryAgent, DeliveryError, HttpSlackApi, OutboundMessage};

use super::CommandResult;

pub async fn run(
    config_path: Option<PathBuf>,
    channel: Option<String>,
    text: Option<String>,
) -> CommandResult {
    let config = match load_config(config_path, channel) {
        Ok(config) => config,
        Err(error) => {
            return CommandResult::failure("post", "config_validation", error.to_string(), 2)
        }
    };
    super::init_logging(&config);

    let api = Arc::new(HttpSlackApi::new(config.slack.bot_token.clone()));
    let agent =
        DeliveryAgent::new(api, config.delivery_retry(), Arc::new(DedupWindow::default()));
    let mut default_channel =
        (!config.channel.name.is_empty()).then(|| config.channel.name.clone());

    // One-shot mode for operators and scripts.
    if let Some(text) = text {
        let Some(channel) = default_channel else {
            return CommandResult::failure(
                "post",
                "config_validation",
                "a channel is required: pass --channel or set channel.name",
                2,
            );
        };
        return match agent.deliver(&OutboundMessage::text(channel, text)).await {
            Ok(posted) => CommandResult::success(
                "post",
                format!("delivered to {} at ts {}", posted.channel, posted.ts),
            ),
            Err(error) => {
                CommandResult::failure("post", delivery_error_class(&error), error.to_string(), 1)
            }
        };
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => {
                info!("host closed stdin; delivery agent stopping");
                break;
            }
            Err(read_error) => {
                return CommandResult::failure("post", "host_unavailable", read_error.to_string(), 1)
            }
        };

        match protocol::parse_line(&line) {
            Ok(Some(HostCommand::Quit)) => {
                info!("host requested shutdown");
                break;
            }
            Ok(Some(HostCommand::Config(value))) => {
                if let Some(name) = super::config_channel(&value) {
                    info!(channel = %name, "default channel updated");
                    default_channel = Some(name.to_owned());
                }
            }
            Ok(Some(HostCommand::In { ctx, data })) => {
                let Some(message) = outbound_from(&data, default_channel.as_deref()) else {
                    warn!(ch = %ctx.ch, kind = %data.kind, "payload had no deliverable text or channel");
                    continue;
                };
                // A failed delivery is reported and the stream continues;
                // one bad payload must not stall the host's queue.
                match agent.deliver(&message).await {
                    Ok(posted) => {
                        info!(channel = %posted.channel, ts = %posted.ts, "payload delivered")
                    }
                    Err(delivery_error) => {
                        error!(channel = %message.channel, error = %delivery_error,
                            "payload delivery failed");
                    }
                }
            }
            Ok(None) => {}
            Err(parse_error) => warn!(error = %parse_error, "unparseable host line"),
        }
    }

    CommandResult::success("post", "delivery agent stopped")
}

fn load_config(
    config_path: Option<PathBuf>,
    channel: Option<String>,
) -> Result<AppConfig, ConfigError> {
    AppConfig::load(LoadOptions {
        require_file: config_path.is_some(),
        config_path,
        overrides: ConfigOverrides { channel_name: channel, ..ConfigOverrides::default() },
    })
}

fn delivery_error_class(error: &DeliveryError) -> &'static str {
    match error {
        DeliveryError::Resolve(_) => "channel_not_found",
        DeliveryError::RetriesExhausted { .. } => "delivery_failed",
        DeliveryError::Api(_) => "delivery_rejected",
    }
}

/// Builds the outbound message for one host payload. A string payload is the
/// message text itself; object payloads may override the channel and thread
/// and carry `blocks`/`attachments`; list payloads join their items one per
/// line; anything else renders as a JSON code block. A payload with no
/// channel anywhere, or with nothing to say, is undeliverable.
fn outbound_from(data: &AgentData, default_channel: Option<&str>) -> Option<OutboundMessage> {
    let mut channel = None;
    let mut thread_ts = None;
    let mut blocks = None;
    let mut attachments = None;

    let text = match &data.value {
        Value::Null => return None,
        Value::String(text) => text.clone(),
        Value::Object(fields) => {
            channel = fields.get("channel").and_then(Value::as_str).map(str::to_owned);
            thread_ts = fields.get("thread_ts").and_then(Value::as_str).map(str::to_owned);
            blocks = fields.get("blocks").cloned();
            attachments = fields.get("attachments").cloned();
            fields.get("text").and_then(Value::as_str).unwrap_or_default().to_owned()
        }
        Value::Array(items) => {
            items.iter().map(render_item).collect::<Vec<_>>().join("\n")
        }
        other => format!("```{other}```"),
    };

    if text.trim().is_empty() && blocks.is_none() && attachments.is_none() {
        return None;
    }
    let channel = channel.or_else(|| default_channel.map(str::to_owned))?;

    let mut message = OutboundMessage::text(channel, text);
    message.thread_ts = thread_ts;
    message.blocks = blocks;
    message.attachments = attachments;
    Some(message)
}

fn render_item(item: &Value) -> String {
    match item {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use slackline_host::AgentData;

    use super::outbound_from;

    fn data(kind: &str, value: serde_json::Value) -> AgentData {
        AgentData { kind: kind.to_owned(), value }
    }

    #[test]
    fn text_payloads_use_the_default_channel() {
        let message =
            outbound_from(&data("text", json!("deploy finished")), Some("ops")).expect("message");
        assert_eq!(message.channel, "ops");
        assert_eq!(message.text, "deploy finished");
        assert!(message.thread_ts.is_none());
    }

    #[test]
    fn object_payloads_can_override_channel_and_thread() {
        let payload = json!({"text": "reply", "channel": "C9", "thread_ts": "1.0001"});
        let message = outbound_from(&data("object", payload), Some("ops")).expect("message");
        assert_eq!(message.channel, "C9");
        assert_eq!(message.thread_ts.as_deref(), Some("1.0001"));
    }

    #[test]
    fn object_payloads_carry_blocks_and_attachments() {
        let payload = json!({
            "text": "release 1.4",
            "blocks": [{"type": "section", "text": {"type": "mrkdwn", "text": "release 1.4"}}],
            "attachments": [{"color": "#36a64f", "text": "all checks green"}]
        });
        let message = outbound_from(&data("object", payload.clone()), Some("ops")).expect("message");
        assert_eq!(message.blocks, Some(payload["blocks"].clone()));
        assert_eq!(message.attachments, Some(payload["attachments"].clone()));
    }

    #[test]
    fn blocks_alone_are_deliverable_without_text() {
        let payload = json!({"blocks": [{"type": "divider"}]});
        let message = outbound_from(&data("object", payload), Some("ops")).expect("message");
        assert_eq!(message.text, "");
        assert!(message.blocks.is_some());
    }

    #[test]
    fn list_payloads_join_one_item_per_line() {
        let message =
            outbound_from(&data("list", json!(["one", "two", 3])), Some("ops")).expect("message");
        assert_eq!(message.text, "one\ntwo\n3");
    }

    #[test]
    fn scalar_payloads_render_as_json_blocks() {
        let message = outbound_from(&data("number", json!(42)), Some("ops")).expect("message");
        assert_eq!(message.text, "```42```");
    }

    #[test]
    fn missing_text_or_channel_is_undeliverable() {
        assert!(outbound_from(&data("text", json!("hello")), None).is_none());
        assert!(outbound_from(&data("object", json!({"channel": "C9"})), Some("ops")).is_none());
        assert!(outbound_from(&data("text", json!("")), Some("ops")).is_none());
        assert!(outbound_from(&data("object", json!(null)), Some("ops")).is_none());
    }
}
