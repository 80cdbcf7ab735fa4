use std::sync::Arc;

use thiserror::Error;
use tokio::sync::watch;
use tracing::{info, warn};

use slackline_core::{DedupWindow, EnvelopeKey, RetryPolicy};

use crate::api::{ApiError, OutboundMessage, PostedMessage, SlackApi};
use crate::resolver::{ChannelResolver, ResolveError};
use crate::session::SessionState;

#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error(transparent)]
    Resolve(#[from] ResolveError),
    #[error("delivery failed after {attempts} attempts: {last}")]
    RetriesExhausted { attempts: u32, last: ApiError },
    #[error(transparent)]
    Api(ApiError),
}

/// Outbound half of the bridge: resolves the target channel, posts with
/// bounded retries, and defers to backend-specified waits when rate limited.
///
/// Posted messages are registered in the replay window so the inbound side
/// drops their echo. When a session handle is attached, sends are gated on
/// the session being live; a gated attempt counts against the retry bound
/// rather than being silently dropped.
pub struct DeliveryAgent {
    api: Arc<dyn SlackApi>,
    resolver: ChannelResolver,
    retry: RetryPolicy,
    dedup: Arc<DedupWindow>,
    session: Option<watch::Receiver<SessionState>>,
}

impl DeliveryAgent {
    pub fn new(api: Arc<dyn SlackApi>, retry: RetryPolicy, dedup: Arc<DedupWindow>) -> Self {
        let resolver = ChannelResolver::new(api.clone());
        Self { api, resolver, retry, dedup, session: None }
    }

    /// Gate sends on the socket mode session being live.
    pub fn with_session(mut self, session: watch::Receiver<SessionState>) -> Self {
        self.session = Some(session);
        self
    }

    pub async fn deliver(&self, message: &OutboundMessage) -> Result<PostedMessage, DeliveryError> {
        let channel_id = self.resolver.resolve(&message.channel).await?;
        let mut resolved = message.clone();
        resolved.channel = channel_id;

        let mut attempt: u32 = 0;
        loop {
            let result = match self.gate() {
                Some(state) => Err(ApiError::Transport {
                    method: "chat.postMessage",
                    message: format!("session not connected (state {state:?})"),
                }),
                None => self.api.post_message(&resolved).await,
            };

            match result {
                Ok(posted) => {
                    info!(channel = %posted.channel, ts = %posted.ts, attempt,
                        "message delivered");
                    self.dedup.insert(EnvelopeKey {
                        channel: posted.channel.clone(),
                        ts: posted.ts.clone(),
                    });
                    return Ok(posted);
                }
                Err(error) if error.is_retryable() => {
                    attempt += 1;
                    if !self.retry.allows(attempt) {
                        return Err(DeliveryError::RetriesExhausted { attempts: attempt, last: error });
                    }
                    let delay = self.retry.delay(attempt - 1, error.retry_after());
                    warn!(attempt, error = %error, delay_ms = delay.as_millis() as u64,
                        "delivery attempt failed; retrying");
                    tokio::time::sleep(delay).await;
                }
                Err(error) => return Err(DeliveryError::Api(error)),
            }
        }
    }

    /// Returns the blocking state when the attached session is not live.
    fn gate(&self) -> Option<SessionState> {
        let session = self.session.as_ref()?;
        let state = *session.borrow();
        if state.is_connected() {
            None
        } else {
            Some(state)
        }
    }
}
