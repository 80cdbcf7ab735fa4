use std::sync::{Arc, PoisonError};

use serde_json::Value;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use slackline_core::{DedupWindow, MessageEnvelope, RetryPolicy};
use slackline_host::{HostError, HostSink};

use crate::api::{ApiError, BotIdentity, SlackApi};
use crate::normalize::{Normalized, NormalizerContext, SharedNormalizerContext};
use crate::resolver::{ChannelResolver, ResolveError};

#[derive(Debug, Error)]
pub enum ListenerError {
    #[error(transparent)]
    Api(#[from] ApiError),
    #[error(transparent)]
    Resolve(#[from] ResolveError),
}

/// Inbound half of the bridge: consumes raw socket frames, filters and
/// normalizes them, drops replays, and forwards what remains to the host.
///
/// The agent is a single consumer of the event channel, so envelopes reach
/// the host in arrival order. Forwarding is best-effort: a host that stays
/// unreachable past the retry bound costs that envelope, not the session.
pub struct ListenerAgent {
    api: Arc<dyn SlackApi>,
    sink: Arc<dyn HostSink>,
    dedup: Arc<DedupWindow>,
    context: SharedNormalizerContext,
    host_retry: RetryPolicy,
}

impl ListenerAgent {
    pub fn new(
        api: Arc<dyn SlackApi>,
        sink: Arc<dyn HostSink>,
        dedup: Arc<DedupWindow>,
        host_retry: RetryPolicy,
    ) -> Self {
        Self {
            api,
            sink,
            dedup,
            context: Arc::new(std::sync::RwLock::new(NormalizerContext::default())),
            host_retry,
        }
    }

    /// Handle to the filter state, for runtime configuration updates.
    pub fn context(&self) -> SharedNormalizerContext {
        self.context.clone()
    }

    /// Verify credentials and pin the configured channel before any frame
    /// flows. An unresolvable channel name is fatal here.
    pub async fn initialize(
        &self,
        channel: Option<&str>,
        include_replies: bool,
    ) -> Result<BotIdentity, ListenerError> {
        let identity = self.api.auth_test().await?;
        info!(bot_user = %identity.user_id, "authenticated with slack");

        let pinned = match channel {
            Some(name) => {
                let resolver = ChannelResolver::new(self.api.clone());
                let id = resolver.resolve(name).await?;
                info!(channel = %name, channel_id = %id, "pinned listening channel");
                Some(id)
            }
            None => None,
        };

        let mut context = self.context.write().unwrap_or_else(PoisonError::into_inner);
        context.bot_user_id = Some(identity.user_id.clone());
        context.channel = pinned;
        context.include_replies = include_replies;
        drop(context);

        Ok(identity)
    }

    /// Consume raw frames until the channel closes or shutdown is signalled.
    pub async fn run(&self, mut events: mpsc::Receiver<Value>, cancel: CancellationToken) {
        loop {
            let frame = tokio::select! {
                frame = events.recv() => frame,
                _ = cancel.cancelled() => return,
            };
            let Some(frame) = frame else {
                debug!("event channel closed; listener stopping");
                return;
            };

            let outcome = {
                let context = self.context.read().unwrap_or_else(PoisonError::into_inner);
                context.normalize(&frame)
            };

            match outcome {
                Normalized::Ignored { reason } => debug!(reason, "frame ignored"),
                Normalized::Message(envelope) => {
                    if !self.dedup.insert(envelope.key()) {
                        debug!(channel = %envelope.channel, ts = %envelope.ts,
                            "duplicate delivery dropped");
                        continue;
                    }
                    self.forward(&envelope).await;
                }
            }
        }
    }

    async fn forward(&self, envelope: &MessageEnvelope) {
        let mut attempt: u32 = 0;
        loop {
            match self.sink.on_message(envelope).await {
                Ok(()) => {
                    info!(channel = %envelope.channel, ts = %envelope.ts, author = %envelope.author,
                        "message forwarded to host");
                    return;
                }
                Err(HostError::Protocol(error)) => {
                    // A frame we cannot encode will not improve on retry.
                    warn!(ts = %envelope.ts, error = %error, "dropping unencodable message");
                    return;
                }
                Err(error @ HostError::Unavailable(_)) => {
                    attempt += 1;
                    if !self.host_retry.allows(attempt) {
                        warn!(channel = %envelope.channel, ts = %envelope.ts, attempts = attempt,
                            error = %error, "host unreachable; dropping envelope");
                        return;
                    }
                    let delay = self.host_retry.delay(attempt - 1, None);
                    warn!(attempt, error = %error, delay_ms = delay.as_millis() as u64,
                        "host unavailable; retrying forward");
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}
