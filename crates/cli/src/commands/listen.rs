use std::path::PathBuf;
use std::sync::{Arc, PoisonError};

use serde_json::Value;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use slackline_core::config::{AppConfig, ConfigError, ConfigOverrides, LoadOptions};
use slackline_core::DedupWindow;
use slackline_host::{protocol, HostCommand, StdioHostSink};
use slackline_slack::{
    ChannelResolver, HttpSlackApi, ListenerAgent, ReconnectPolicy, SessionManager, SlackApi,
    SocketModeTransport,
};
use slackline_slack::normalize::SharedNormalizerContext;

use super::CommandResult;

pub async fn run(
    config_path: Option<PathBuf>,
    channel: Option<String>,
    include_replies: bool,
) -> CommandResult {
    let config = match load_config(config_path, channel, include_replies) {
        Ok(config) => config,
        Err(error) => {
            return CommandResult::failure("listen", "config_validation", error.to_string(), 2)
        }
    };
    super::init_logging(&config);

    let api = Arc::new(HttpSlackApi::new(config.slack.bot_token.clone()));
    let sink = Arc::new(StdioHostSink::new());
    let dedup = Arc::new(DedupWindow::default());
    let listener = ListenerAgent::new(api.clone(), sink, dedup, config.host_retry());

    let pinned = (!config.channel.name.is_empty()).then_some(config.channel.name.as_str());
    if let Err(error) = listener.initialize(pinned, config.channel.include_replies).await {
        return CommandResult::failure("listen", "startup", error.to_string(), 1);
    }

    let transport = SocketModeTransport::new(config.slack.app_token.clone())
        .with_read_timeout(std::time::Duration::from_secs(config.session.ping_timeout_secs));
    let session = SessionManager::new(
        transport,
        ReconnectPolicy { backoff: config.reconnect_backoff() },
    );

    let cancel = CancellationToken::new();
    let (events_tx, events_rx) = mpsc::channel(256);

    let session_task = tokio::spawn({
        let cancel = cancel.clone();
        session.run(events_tx, cancel)
    });
    let stdin_task = tokio::spawn(host_command_loop(
        api.clone() as Arc<dyn SlackApi>,
        listener.context(),
        cancel.clone(),
    ));
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("interrupt received; shutting down");
                cancel.cancel();
            }
        }
    });

    listener.run(events_rx, cancel.clone()).await;
    cancel.cancel();
    let session_result = session_task.await;
    stdin_task.abort();

    match session_result {
        Ok(Err(error)) => CommandResult::failure("listen", "authentication", error.to_string(), 1),
        Err(join_error) => {
            CommandResult::failure("listen", "session", join_error.to_string(), 1)
        }
        Ok(Ok(())) => CommandResult::success("listen", "listener stopped"),
    }
}

fn load_config(
    config_path: Option<PathBuf>,
    channel: Option<String>,
    include_replies: bool,
) -> Result<AppConfig, ConfigError> {
    AppConfig::load(LoadOptions {
        require_file: config_path.is_some(),
        config_path,
        overrides: ConfigOverrides {
            channel_name: channel,
            include_replies: include_replies.then_some(true),
            ..ConfigOverrides::default()
        },
    })
}

/// Reads host control lines until `.QUIT`, EOF, or shutdown. `.CONFIG`
/// updates take effect on the live session without a reconnect.
async fn host_command_loop(
    api: Arc<dyn SlackApi>,
    context: SharedNormalizerContext,
    cancel: CancellationToken,
) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        let line = tokio::select! {
            line = lines.next_line() => line,
            _ = cancel.cancelled() => return,
        };

        match line {
            Ok(Some(line)) => match protocol::parse_line(&line) {
                Ok(Some(HostCommand::Quit)) => {
                    info!("host requested shutdown");
                    cancel.cancel();
                    return;
                }
                Ok(Some(HostCommand::Config(value))) => {
                    apply_runtime_config(&api, &context, &value).await;
                }
                Ok(Some(HostCommand::In { .. })) => {
                    debug!("ignoring delivery payload in listen mode");
                }
                Ok(None) => {}
                Err(error) => warn!(error = %error, "unparseable host line"),
            },
            Ok(None) => {
                info!("host closed stdin; shutting down");
                cancel.cancel();
                return;
            }
            Err(error) => {
                warn!(error = %error, "stdin read failed; shutting down");
                cancel.cancel();
                return;
            }
        }
    }
}

async fn apply_runtime_config(
    api: &Arc<dyn SlackApi>,
    context: &SharedNormalizerContext,
    value: &Value,
) {
    if let Some(include_replies) = value.get("include_replies").and_then(Value::as_bool) {
        let mut context = context.write().unwrap_or_else(PoisonError::into_inner);
        context.include_replies = include_replies;
        info!(include_replies, "reply handling updated");
    }

    if let Some(name) = super::config_channel(value) {
        let resolver = ChannelResolver::new(api.clone());
        match resolver.resolve(name).await {
            Ok(id) => {
                let mut context = context.write().unwrap_or_else(PoisonError::into_inner);
                context.channel = Some(id.clone());
                info!(channel = %name, channel_id = %id, "listening channel re-pinned");
            }
            Err(error) => {
                // The current pin stays in effect.
                warn!(channel = %name, error = %error, "channel update did not resolve; keeping current pin");
            }
        }
    }
}
