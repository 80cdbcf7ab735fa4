use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use secrecy::ExposeSecret;
use slackline_core::config::{AppConfig, LoadOptions};
use toml::Value;

pub fn run() -> String {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => return format!("config validation failed: {error}"),
    };

    let config_file_path = detect_config_path();
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());
    let doc = config_file_doc.as_ref();
    let file = config_file_path.as_deref();

    let channel_name =
        if config.channel.name.is_empty() { "<any>".to_string() } else { config.channel.name.clone() };

    let fields: Vec<(&str, String, &[&str])> = vec![
        (
            "slack.app_token",
            redact_token(config.slack.app_token.expose_secret()),
            &["SLACKLINE_SLACK_APP_TOKEN", "SLACK_APP_TOKEN"],
        ),
        (
            "slack.bot_token",
            redact_token(config.slack.bot_token.expose_secret()),
            &["SLACKLINE_SLACK_BOT_TOKEN", "SLACK_BOT_TOKEN"],
        ),
        ("channel.name", channel_name, &["SLACKLINE_CHANNEL_NAME"]),
        (
            "channel.include_replies",
            config.channel.include_replies.to_string(),
            &["SLACKLINE_INCLUDE_REPLIES"],
        ),
        (
            "session.reconnect_base_delay_ms",
            config.session.reconnect_base_delay_ms.to_string(),
            &["SLACKLINE_SESSION_RECONNECT_BASE_DELAY_MS"],
        ),
        (
            "session.reconnect_max_delay_ms",
            config.session.reconnect_max_delay_ms.to_string(),
            &["SLACKLINE_SESSION_RECONNECT_MAX_DELAY_MS"],
        ),
        (
            "session.ping_timeout_secs",
            config.session.ping_timeout_secs.to_string(),
            &["SLACKLINE_SESSION_PING_TIMEOUT_SECS"],
        ),
        (
            "delivery.max_attempts",
            config.delivery.max_attempts.to_string(),
            &["SLACKLINE_DELIVERY_MAX_ATTEMPTS"],
        ),
        (
            "delivery.retry_base_delay_ms",
            config.delivery.retry_base_delay_ms.to_string(),
            &["SLACKLINE_DELIVERY_RETRY_BASE_DELAY_MS"],
        ),
        (
            "delivery.retry_max_delay_ms",
            config.delivery.retry_max_delay_ms.to_string(),
            &["SLACKLINE_DELIVERY_RETRY_MAX_DELAY_MS"],
        ),
        ("host.max_attempts", config.host.max_attempts.to_string(), &["SLACKLINE_HOST_MAX_ATTEMPTS"]),
        ("host.retry_delay_ms", config.host.retry_delay_ms.to_string(), &["SLACKLINE_HOST_RETRY_DELAY_MS"]),
        (
            "logging.level",
            config.logging.level.clone(),
            &["SLACKLINE_LOGGING_LEVEL", "SLACKLINE_LOG_LEVEL"],
        ),
        (
            "logging.format",
            format!("{:?}", config.logging.format).to_ascii_lowercase(),
            &["SLACKLINE_LOGGING_FORMAT", "SLACKLINE_LOG_FORMAT"],
        ),
    ];

    let mut lines = vec!["effective config (source precedence: env > file > default):".to_string()];
    for (key, value, env_keys) in fields {
        lines.push(render_line(key, &value, field_source(key, env_keys, doc, file)));
    }

    lines.join("\n")
}

fn detect_config_path() -> Option<PathBuf> {
    let root = PathBuf::from("slackline.toml");
    if root.exists() {
        return Some(root);
    }

    let nested = PathBuf::from("config/slackline.toml");
    if nested.exists() {
        return Some(nested);
    }

    None
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let path = path?;
    let raw = fs::read_to_string(path).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(
    key_path: &str,
    env_keys: &[&str],
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    for env_key in env_keys {
        if env::var_os(env_key).is_some() {
            return format!("env ({env_key})");
        }
    }

    if let Some(doc) = config_file_doc {
        if contains_path(doc, key_path) {
            let file_path = config_file_path
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "config file".to_string());
            return format!("file ({file_path})");
        }
    }

    "default".to_string()
}

fn contains_path(root: &Value, key_path: &str) -> bool {
    let mut current = root;
    for key in key_path.split('.') {
        let Some(next) = current.get(key) else {
            return false;
        };
        current = next;
    }
    true
}

fn render_line(key: &str, value: &str, source: String) -> String {
    format!("- {key} = {value} (source: {source})")
}

fn redact_token(token: &str) -> String {
    let trimmed = token.trim();
    if trimmed.is_empty() {
        return "<empty>".to_string();
    }

    if let Some((prefix, _)) = trimmed.split_once('-') {
        return format!("{prefix}-***");
    }

    "<redacted>".to_string()
}
