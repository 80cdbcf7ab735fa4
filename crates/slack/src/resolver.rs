use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use thiserror::Error;
use tracing::debug;

use crate::api::{ApiError, SlackApi};

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("channel `{name}` not found in the workspace channel listing")]
    NotFound { name: String },
    #[error(transparent)]
    Api(#[from] ApiError),
}

/// Maps human-facing channel names to native channel ids.
///
/// Identifiers that already look native (`C…`, `G…`, `D…`) pass through
/// untouched so callers can mix names and ids freely. Name lookups hit the
/// listing API once and are cached; a cache miss refreshes the listing before
/// giving up, so channels created after startup still resolve.
pub struct ChannelResolver {
    api: Arc<dyn SlackApi>,
    cache: Mutex<HashMap<String, String>>,
}

impl ChannelResolver {
    pub fn new(api: Arc<dyn SlackApi>) -> Self {
        Self { api, cache: Mutex::new(HashMap::new()) }
    }

    pub async fn resolve(&self, channel: &str) -> Result<String, ResolveError> {
        if is_native_id(channel) {
            return Ok(channel.to_owned());
        }

        let name = normalize_name(channel);
        if let Some(id) = self.cached(&name) {
            return Ok(id);
        }

        self.refresh().await?;
        self.cached(&name).ok_or(ResolveError::NotFound { name })
    }

    fn cached(&self, name: &str) -> Option<String> {
        let cache = self.cache.lock().unwrap_or_else(PoisonError::into_inner);
        cache.get(name).cloned()
    }

    async fn refresh(&self) -> Result<(), ResolveError> {
        let channels = self.api.list_channels().await?;
        let mut fresh = HashMap::with_capacity(channels.len());
        for channel in channels {
            if !channel.is_archived {
                fresh.insert(channel.name.to_ascii_lowercase(), channel.id);
            }
        }
        debug!(channels = fresh.len(), "refreshed channel listing");

        let mut cache = self.cache.lock().unwrap_or_else(PoisonError::into_inner);
        *cache = fresh;
        Ok(())
    }
}

/// Native conversation ids start with C (public), G (private/mpim) or
/// D (im) followed by uppercase alphanumerics. Ids always mix in digits,
/// which keeps shouted channel names like `GENERAL` out of this branch.
fn is_native_id(channel: &str) -> bool {
    let mut chars = channel.chars();
    matches!(chars.next(), Some('C' | 'G' | 'D'))
        && channel.len() > 1
        && channel[1..].contains(|c: char| c.is_ascii_digit())
        && chars.all(|c| c.is_ascii_alphanumeric() && !c.is_ascii_lowercase())
}

fn normalize_name(channel: &str) -> String {
    channel.trim().trim_start_matches('#').to_ascii_lowercase()
}
