use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::retry::{BackoffPolicy, RetryPolicy};

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub slack: SlackConfig,
    pub channel: ChannelConfig,
    pub session: SessionConfig,
    pub delivery: DeliveryConfig,
    pub host: HostConfig,
    pub logging: LoggingConfig,
}

/// Workspace credentials. Both tokens are required: the app-level token opens
/// the Socket Mode session, the bot-level token signs Web API calls.
#[derive(Clone, Debug)]
pub struct SlackConfig {
    pub app_token: SecretString,
    pub bot_token: SecretString,
}

/// Which channel the bridge is pinned to. An empty name means listen on every
/// channel the bot can see, exactly as the poster requires an explicit one.
#[derive(Clone, Debug, Default)]
pub struct ChannelConfig {
    pub name: String,
    pub include_replies: bool,
}

#[derive(Clone, Debug)]
pub struct SessionConfig {
    pub reconnect_base_delay_ms: u64,
    pub reconnect_max_delay_ms: u64,
    pub ping_timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct DeliveryConfig {
    pub max_attempts: u32,
    pub retry_base_delay_ms: u64,
    pub retry_max_delay_ms: u64,
}

#[derive(Clone, Debug)]
pub struct HostConfig {
    pub max_attempts: u32,
    pub retry_delay_ms: u64,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub slack_app_token: Option<String>,
    pub slack_bot_token: Option<String>,
    pub channel_name: Option<String>,
    pub include_replies: Option<bool>,
    pub log_level: Option<String>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("environment variable interpolation failed for `{var}`")]
    MissingEnvInterpolation { var: String },
    #[error("unterminated environment interpolation expression")]
    UnterminatedInterpolation,
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            slack: SlackConfig { app_token: String::new().into(), bot_token: String::new().into() },
            channel: ChannelConfig::default(),
            session: SessionConfig {
                reconnect_base_delay_ms: 500,
                reconnect_max_delay_ms: 60_000,
                ping_timeout_secs: 60,
            },
            delivery: DeliveryConfig {
                max_attempts: 5,
                retry_base_delay_ms: 250,
                retry_max_delay_ms: 5_000,
            },
            host: HostConfig { max_attempts: 3, retry_delay_ms: 200 },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch);
        } else if options.require_file {
            let expected = options.config_path.unwrap_or_else(|| PathBuf::from("slackline.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    /// Backoff schedule for session reconnection: unbounded, jittered.
    pub fn reconnect_backoff(&self) -> BackoffPolicy {
        BackoffPolicy {
            base_delay_ms: self.session.reconnect_base_delay_ms,
            max_delay_ms: self.session.reconnect_max_delay_ms,
            jitter: true,
        }
    }

    /// Bounded retry schedule for outbound message delivery.
    pub fn delivery_retry(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.delivery.max_attempts,
            backoff: BackoffPolicy {
                base_delay_ms: self.delivery.retry_base_delay_ms,
                max_delay_ms: self.delivery.retry_max_delay_ms,
                jitter: false,
            },
        }
    }

    /// Bounded retry schedule for forwarding envelopes to the host.
    pub fn host_retry(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.host.max_attempts,
            backoff: BackoffPolicy {
                base_delay_ms: self.host.retry_delay_ms,
                max_delay_ms: self.host.retry_delay_ms,
                jitter: false,
            },
        }
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(slack) = patch.slack {
            if let Some(app_token_value) = slack.app_token {
                self.slack.app_token = app_token_value.into();
            }
            if let Some(bot_token_value) = slack.bot_token {
                self.slack.bot_token = bot_token_value.into();
            }
        }

        if let Some(channel) = patch.channel {
            if let Some(name) = channel.name {
                self.channel.name = name;
            }
            if let Some(include_replies) = channel.include_replies {
                self.channel.include_replies = include_replies;
            }
        }

        if let Some(session) = patch.session {
            if let Some(base) = session.reconnect_base_delay_ms {
                self.session.reconnect_base_delay_ms = base;
            }
            if let Some(max) = session.reconnect_max_delay_ms {
                self.session.reconnect_max_delay_ms = max;
            }
            if let Some(secs) = session.ping_timeout_secs {
                self.session.ping_timeout_secs = secs;
            }
        }

        if let Some(delivery) = patch.delivery {
            if let Some(max_attempts) = delivery.max_attempts {
                self.delivery.max_attempts = max_attempts;
            }
            if let Some(base) = delivery.retry_base_delay_ms {
                self.delivery.retry_base_delay_ms = base;
            }
            if let Some(max) = delivery.retry_max_delay_ms {
                self.delivery.retry_max_delay_ms = max;
            }
        }

        if let Some(host) = patch.host {
            if let Some(max_attempts) = host.max_attempts {
                self.host.max_attempts = max_attempts;
            }
            if let Some(delay) = host.retry_delay_ms {
                self.host.retry_delay_ms = delay;
            }
        }

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        // The unprefixed names match what the Slack docs tell operators to
        // export, so both spellings are honored.
        let app_token =
            read_env("SLACKLINE_SLACK_APP_TOKEN").or_else(|| read_env("SLACK_APP_TOKEN"));
        if let Some(value) = app_token {
            self.slack.app_token = value.into();
        }
        let bot_token =
            read_env("SLACKLINE_SLACK_BOT_TOKEN").or_else(|| read_env("SLACK_BOT_TOKEN"));
        if let Some(value) = bot_token {
            self.slack.bot_token = value.into();
        }

        if let Some(value) = read_env("SLACKLINE_CHANNEL_NAME") {
            self.channel.name = value;
        }
        if let Some(value) = read_env("SLACKLINE_INCLUDE_REPLIES") {
            self.channel.include_replies = parse_bool("SLACKLINE_INCLUDE_REPLIES", &value)?;
        }

        if let Some(value) = read_env("SLACKLINE_SESSION_RECONNECT_BASE_DELAY_MS") {
            self.session.reconnect_base_delay_ms =
                parse_u64("SLACKLINE_SESSION_RECONNECT_BASE_DELAY_MS", &value)?;
        }
        if let Some(value) = read_env("SLACKLINE_SESSION_RECONNECT_MAX_DELAY_MS") {
            self.session.reconnect_max_delay_ms =
                parse_u64("SLACKLINE_SESSION_RECONNECT_MAX_DELAY_MS", &value)?;
        }
        if let Some(value) = read_env("SLACKLINE_SESSION_PING_TIMEOUT_SECS") {
            self.session.ping_timeout_secs =
                parse_u64("SLACKLINE_SESSION_PING_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("SLACKLINE_DELIVERY_MAX_ATTEMPTS") {
            self.delivery.max_attempts = parse_u32("SLACKLINE_DELIVERY_MAX_ATTEMPTS", &value)?;
        }
        if let Some(value) = read_env("SLACKLINE_DELIVERY_RETRY_BASE_DELAY_MS") {
            self.delivery.retry_base_delay_ms =
                parse_u64("SLACKLINE_DELIVERY_RETRY_BASE_DELAY_MS", &value)?;
        }
        if let Some(value) = read_env("SLACKLINE_DELIVERY_RETRY_MAX_DELAY_MS") {
            self.delivery.retry_max_delay_ms =
                parse_u64("SLACKLINE_DELIVERY_RETRY_MAX_DELAY_MS", &value)?;
        }

        if let Some(value) = read_env("SLACKLINE_HOST_MAX_ATTEMPTS") {
            self.host.max_attempts = parse_u32("SLACKLINE_HOST_MAX_ATTEMPTS", &value)?;
        }
        if let Some(value) = read_env("SLACKLINE_HOST_RETRY_DELAY_MS") {
            self.host.retry_delay_ms = parse_u64("SLACKLINE_HOST_RETRY_DELAY_MS", &value)?;
        }

        let log_level =
            read_env("SLACKLINE_LOGGING_LEVEL").or_else(|| read_env("SLACKLINE_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("SLACKLINE_LOGGING_FORMAT").or_else(|| read_env("SLACKLINE_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(app_token) = overrides.slack_app_token {
            self.slack.app_token = app_token.into();
        }
        if let Some(bot_token) = overrides.slack_bot_token {
            self.slack.bot_token = bot_token.into();
        }
        if let Some(channel_name) = overrides.channel_name {
            self.channel.name = channel_name;
        }
        if let Some(include_replies) = overrides.include_replies {
            self.channel.include_replies = include_replies;
        }
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_slack(&self.slack)?;
        validate_session(&self.session)?;
        validate_delivery(&self.delivery)?;
        validate_host(&self.host)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("slackline.toml"), PathBuf::from("config/slackline.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;

    let interpolated = interpolate_env_vars(&raw)?;
    toml::from_str::<ConfigPatch>(&interpolated)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next();
            let mut key = String::new();

            loop {
                match chars.next() {
                    Some('}') => break,
                    Some(next) => key.push(next),
                    None => return Err(ConfigError::UnterminatedInterpolation),
                }
            }

            let value = env::var(&key)
                .map_err(|_| ConfigError::MissingEnvInterpolation { var: key.clone() })?;
            output.push_str(&value);
            continue;
        }

        output.push(ch);
    }

    Ok(output)
}

fn validate_slack(slack: &SlackConfig) -> Result<(), ConfigError> {
    let app_token = slack.app_token.expose_secret();
    if app_token.is_empty() {
        return Err(ConfigError::Validation(
            "slack.app_token is required. Get it from https://api.slack.com/apps > Your App > Basic Information > App-Level Tokens".to_string()
        ));
    }
    if !app_token.starts_with("xapp-") {
        let hint = if app_token.starts_with("xoxb-") {
            " (hint: you may have used the bot token instead of the app token)"
        } else {
            ""
        };
        return Err(ConfigError::Validation(format!(
            "slack.app_token must start with `xapp-`{hint}. Get it from https://api.slack.com/apps"
        )));
    }

    let bot_token = slack.bot_token.expose_secret();
    if bot_token.is_empty() {
        return Err(ConfigError::Validation(
            "slack.bot_token is required. Get it from https://api.slack.com/apps > Your App > OAuth & Permissions > Bot User OAuth Token".to_string()
        ));
    }
    if !bot_token.starts_with("xoxb-") {
        let hint = if bot_token.starts_with("xapp-") {
            " (hint: you may have used the app token instead of the bot token)"
        } else {
            ""
        };
        return Err(ConfigError::Validation(format!(
            "slack.bot_token must start with `xoxb-`{hint}. Get it from https://api.slack.com/apps"
        )));
    }

    Ok(())
}

fn validate_session(session: &SessionConfig) -> Result<(), ConfigError> {
    if session.reconnect_base_delay_ms == 0 {
        return Err(ConfigError::Validation(
            "session.reconnect_base_delay_ms must be greater than zero".to_string(),
        ));
    }
    if session.reconnect_max_delay_ms < session.reconnect_base_delay_ms {
        return Err(ConfigError::Validation(
            "session.reconnect_max_delay_ms must be >= session.reconnect_base_delay_ms".to_string(),
        ));
    }
    if session.ping_timeout_secs == 0 || session.ping_timeout_secs > 600 {
        return Err(ConfigError::Validation(
            "session.ping_timeout_secs must be in range 1..=600".to_string(),
        ));
    }
    Ok(())
}

fn validate_delivery(delivery: &DeliveryConfig) -> Result<(), ConfigError> {
    if delivery.max_attempts == 0 {
        return Err(ConfigError::Validation(
            "delivery.max_attempts must be greater than zero".to_string(),
        ));
    }
    if delivery.retry_max_delay_ms < delivery.retry_base_delay_ms {
        return Err(ConfigError::Validation(
            "delivery.retry_max_delay_ms must be >= delivery.retry_base_delay_ms".to_string(),
        ));
    }
    Ok(())
}

fn validate_host(host: &HostConfig) -> Result<(), ConfigError> {
    if host.max_attempts == 0 {
        return Err(ConfigError::Validation(
            "host.max_attempts must be greater than zero".to_string(),
        ));
    }
    Ok(())
}

fn validate_logging(logging: &LoggingConfig) -> Result<(), ConfigError> {
    let level = logging.level.trim().to_ascii_lowercase();
    match level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ConfigError::Validation(
            "logging.level must be one of trace|debug|info|warn|error".to_string(),
        )),
    }
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_u32(key: &str, value: &str) -> Result<u32, ConfigError> {
    value.parse::<u32>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u64(key: &str, value: &str) -> Result<u64, ConfigError> {
    value.parse::<u64>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    value.parse::<bool>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    slack: Option<SlackPatch>,
    channel: Option<ChannelPatch>,
    session: Option<SessionPatch>,
    delivery: Option<DeliveryPatch>,
    host: Option<HostPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct SlackPatch {
    app_token: Option<String>,
    bot_token: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ChannelPatch {
    name: Option<String>,
    include_replies: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
struct SessionPatch {
    reconnect_base_delay_ms: Option<u64>,
    reconnect_max_delay_ms: Option<u64>,
    ping_timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct DeliveryPatch {
    max_attempts: Option<u32>,
    retry_base_delay_ms: Option<u64>,
    retry_max_delay_ms: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct HostPatch {
    max_attempts: Option<u32>,
    retry_delay_ms: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}
