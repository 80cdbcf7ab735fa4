use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Dedup/ordering key for an envelope: the source channel plus the
/// backend-assigned event timestamp. Slack timestamps are strictly increasing
/// within a channel, so the pair is unique per message.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EnvelopeKey {
    pub channel: String,
    pub ts: String,
}

impl EnvelopeKey {
    pub fn new(channel: impl Into<String>, ts: impl Into<String>) -> Self {
        Self { channel: channel.into(), ts: ts.into() }
    }
}

/// Reference to a file attached to a message. Only identity and retrieval
/// metadata are carried; the bridge never downloads contents.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRef {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mimetype: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url_private: Option<String>,
}

/// Canonical message record exchanged with the workflow host.
///
/// Immutable once constructed. `ts` is the backend event timestamp and serves
/// as the per-channel ordering and dedup key; `received_at` is local wall
/// clock, informational only.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MessageEnvelope {
    pub channel: String,
    pub author: String,
    pub ts: String,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread_ts: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub files: Vec<FileRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub team: Option<String>,
    pub received_at: DateTime<Utc>,
}

impl MessageEnvelope {
    pub fn key(&self) -> EnvelopeKey {
        EnvelopeKey::new(self.channel.clone(), self.ts.clone())
    }

    /// True when the message is a reply inside an existing thread rather than
    /// a thread root.
    pub fn is_thread_reply(&self) -> bool {
        self.thread_ts.as_deref().is_some_and(|root| root != self.ts)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::{EnvelopeKey, MessageEnvelope};

    fn envelope(channel: &str, ts: &str, thread_ts: Option<&str>) -> MessageEnvelope {
        MessageEnvelope {
            channel: channel.to_owned(),
            author: "U1".to_owned(),
            ts: ts.to_owned(),
            text: "hi".to_owned(),
            thread_ts: thread_ts.map(str::to_owned),
            files: Vec::new(),
            team: None,
            received_at: Utc::now(),
        }
    }

    #[test]
    fn key_combines_channel_and_timestamp() {
        let env = envelope("C1", "1730000000.000100", None);
        assert_eq!(env.key(), EnvelopeKey::new("C1", "1730000000.000100"));
    }

    #[test]
    fn thread_root_is_not_a_reply() {
        let root = envelope("C1", "1730000000.000100", Some("1730000000.000100"));
        assert!(!root.is_thread_reply());

        let reply = envelope("C1", "1730000000.000200", Some("1730000000.000100"));
        assert!(reply.is_thread_reply());
    }

    #[test]
    fn optional_fields_are_omitted_from_wire_form() {
        let env = envelope("C1", "1730000000.000100", None);
        let json = serde_json::to_value(&env).expect("serialize");
        assert!(json.get("thread_ts").is_none());
        assert!(json.get("files").is_none());
        assert_eq!(json["channel"], "C1");
    }
}
