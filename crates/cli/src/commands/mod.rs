pub mod config;
pub mod doctor;
pub mod listen;
pub mod post;

use serde::Serialize;

use slackline_core::config::AppConfig;

#[derive(Debug, Clone)]
pub struct CommandResult {
    pub exit_code: u8,
    pub output: String,
}

#[derive(Debug, Serialize)]
struct CommandOutcome {
    command: String,
    status: String,
    error_class: Option<String>,
    message: String,
}

impl CommandResult {
    pub fn success(command: &str, message: impl Into<String>) -> Self {
        let payload = CommandOutcome {
            command: command.to_string(),
            status: "ok".to_string(),
            error_class: None,
            message: message.into(),
        };
        Self { exit_code: 0, output: serialize_payload(payload) }
    }

    pub fn failure(
        command: &str,
        error_class: &str,
        message: impl Into<String>,
        exit_code: u8,
    ) -> Self {
        let payload = CommandOutcome {
            command: command.to_string(),
            status: "error".to_string(),
            error_class: Some(error_class.to_string()),
            message: message.into(),
        };
        Self { exit_code, output: serialize_payload(payload) }
    }
}

fn serialize_payload(payload: CommandOutcome) -> String {
    serde_json::to_string(&payload).unwrap_or_else(|error| {
        format!(
            "{{\"command\":\"unknown\",\"status\":\"error\",\"error_class\":\"serialization\",\"message\":\"{}\"}}",
            error.to_string().replace('\\', "\\\\").replace('"', "\\\"")
        )
    })
}

/// Channel from a host `.CONFIG` payload. `channel_name` is the key the
/// agents' configuration uses; bare `channel` is accepted as an alias.
pub(crate) fn config_channel(value: &serde_json::Value) -> Option<&str> {
    value
        .get("channel_name")
        .or_else(|| value.get("channel"))
        .and_then(serde_json::Value::as_str)
}

/// Structured logs go to stderr; stdout belongs to the host protocol.
pub(crate) fn init_logging(config: &AppConfig) {
    use slackline_core::config::LogFormat::*;
    use tracing::Level;

    let log_level = config.logging.level.parse::<Level>().unwrap_or(Level::INFO);
    let builder = tracing_subscriber::fmt()
        .with_target(false)
        .with_max_level(log_level)
        .with_writer(std::io::stderr);

    let initialized = match config.logging.format {
        Compact => builder.compact().try_init(),
        Pretty => builder.pretty().try_init(),
        Json => builder.json().try_init(),
    };
    let _ = initialized;
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::config_channel;

    #[test]
    fn config_channel_reads_the_agents_key_with_an_alias() {
        assert_eq!(config_channel(&json!({"channel_name": "ops"})), Some("ops"));
        assert_eq!(config_channel(&json!({"channel": "ops"})), Some("ops"));
        assert_eq!(
            config_channel(&json!({"channel_name": "ops", "channel": "other"})),
            Some("ops")
        );
        assert_eq!(config_channel(&json!({"include_replies": true})), None);
    }
}
