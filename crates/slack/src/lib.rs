//! Slack Integration - Socket Mode listener and Web API delivery
//!
//! This crate owns everything that talks to Slack:
//! - **Web API** (`api`) - `auth.test`, `conversations.list`, `chat.postMessage`
//! - **Channel resolution** (`resolver`) - name → stable id with a
//!   process-lifetime cache
//! - **Socket Mode transport** (`transport`) - `apps.connections.open` +
//!   WebSocket event stream behind an injectable trait
//! - **Session lifecycle** (`session`) - reconnection state machine with
//!   jittered backoff
//! - **Normalization** (`normalize`) - raw push events → canonical envelopes
//! - **Listener agent** (`listener`) - dedup + forwarding to the host
//! - **Delivery agent** (`poster`) - rate-limit-aware outbound publishing
//!
//! # Architecture
//!
//! ```text
//! Slack gateway → SessionManager → Normalizer → ListenerAgent → host
//! host → DeliveryAgent → ChannelResolver → Slack Web API
//! ```
//!
//! Every I/O edge sits behind a trait (`SessionTransport`, `SlackApi`,
//! `HostSink`) so the agents are tested against scripted fakes.

pub mod api;
pub mod listener;
pub mod normalize;
pub mod poster;
pub mod resolver;
pub mod session;
pub mod transport;

pub use api::{ApiError, BotIdentity, ChannelEntry, HttpSlackApi, OutboundMessage, PostedMessage, SlackApi};
pub use listener::{ListenerAgent, ListenerError};
pub use normalize::{NormalizerContext, Normalized, SharedNormalizerContext};
pub use poster::{DeliveryAgent, DeliveryError};
pub use resolver::{ChannelResolver, ResolveError};
pub use session::{ReconnectPolicy, SessionError, SessionManager, SessionState};
pub use transport::{SessionTransport, SocketEnvelope, SocketModeTransport, TransportError};
