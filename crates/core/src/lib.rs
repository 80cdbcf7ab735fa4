//! Core domain types for the slackline bridge.
//!
//! This crate holds everything the Slack-facing and host-facing crates share:
//! - **Configuration** (`config`) - layered TOML + environment loading
//! - **Envelope model** (`envelope`) - the canonical message record exchanged
//!   with the workflow host
//! - **Dedup window** (`dedup`) - bounded recency set guarding against
//!   post-reconnect redelivery
//! - **Backoff policies** (`retry`) - reconnect and delivery retry schedules

pub mod config;
pub mod dedup;
pub mod envelope;
pub mod retry;

pub use config::{AppConfig, ConfigError, ConfigOverrides, LoadOptions};
pub use dedup::DedupWindow;
pub use envelope::{EnvelopeKey, FileRef, MessageEnvelope};
pub use retry::{BackoffPolicy, RetryPolicy};
