use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Routing context attached to every host message.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentContext {
    #[serde(default)]
    pub ch: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vars: Option<Value>,
}

/// Tagged payload exchanged with the host. `kind` describes the shape of
/// `value` ("text", "object", ...); the bridge treats it as opaque.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AgentData {
    pub kind: String,
    pub value: Value,
}

/// One inbound control line, already parsed.
#[derive(Clone, Debug, PartialEq)]
pub enum HostCommand {
    /// `.CONFIG {json}` - partial configuration update.
    Config(Value),
    /// `.IN {json}` - payload for the delivery agent.
    In { ctx: AgentContext, data: AgentData },
    /// `.QUIT` - cooperative shutdown request.
    Quit,
}

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("malformed host line: {0}")]
    Malformed(String),
    #[error("invalid host payload: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Deserialize)]
struct InPayload {
    ctx: AgentContext,
    data: AgentData,
}

#[derive(Debug, Serialize)]
struct OutPayload<'a> {
    ctx: &'a AgentContext,
    ch: &'a str,
    data: &'a AgentData,
}

/// Parses one line from the host. Unknown or empty lines yield `Ok(None)`;
/// the host may interleave chatter the bridge does not understand, and
/// ignoring it matches the protocol's forward-compatibility intent.
pub fn parse_line(line: &str) -> Result<Option<HostCommand>, ProtocolError> {
    let line = line.trim();

    if line == ".QUIT" {
        return Ok(Some(HostCommand::Quit));
    }

    if let Some(rest) = line.strip_prefix(".CONFIG ") {
        let value: Value = serde_json::from_str(rest)?;
        if !value.is_object() {
            return Err(ProtocolError::Malformed(".CONFIG payload must be a JSON object".into()));
        }
        return Ok(Some(HostCommand::Config(value)));
    }

    if let Some(rest) = line.strip_prefix(".IN ") {
        let payload: InPayload = serde_json::from_str(rest)?;
        return Ok(Some(HostCommand::In { ctx: payload.ctx, data: payload.data }));
    }

    Ok(None)
}

/// Renders one outbound line (without trailing newline).
pub fn render_out(ctx: &AgentContext, ch: &str, data: &AgentData) -> Result<String, ProtocolError> {
    let payload = OutPayload { ctx, ch, data };
    Ok(format!(".OUT {}", serde_json::to_string(&payload)?))
}
