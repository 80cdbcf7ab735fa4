//! Host Interface - workflow-engine wire protocol and sink seam
//!
//! The workflow host runs bridge agents as child processes and speaks a
//! line-oriented protocol over stdio:
//! - **stdin**: `.CONFIG {json}`, `.IN {json}`, `.QUIT`
//! - **stdout**: `.OUT {json}` (one flushed line per forwarded envelope)
//!
//! Everything else the process prints goes to stderr so stdout stays a clean
//! protocol stream.
//!
//! # Key Types
//!
//! - `HostCommand` / `parse_line` - typed view of inbound control lines
//! - `HostSink` - trait the listener emits envelopes through
//! - `StdioHostSink` - production sink writing `.OUT` lines

pub mod protocol;
pub mod sink;

pub use protocol::{AgentContext, AgentData, HostCommand, ProtocolError};
pub use sink::{HostError, HostSink, StdioHostSink};
