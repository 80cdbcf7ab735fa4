use std::sync::{Arc, RwLock};

use chrono::Utc;
use serde_json::Value;

use slackline_core::{FileRef, MessageEnvelope};

/// Filter state for inbound frames. Shared behind a lock because a runtime
/// configuration update can re-pin the channel or toggle reply handling
/// while the session is live.
#[derive(Clone, Debug, Default)]
pub struct NormalizerContext {
    /// Our own user id, learned at startup. Messages from it are echoes.
    pub bot_user_id: Option<String>,
    /// Native id of the pinned channel, when listening to a single channel.
    pub channel: Option<String>,
    /// Whether thread replies flow through or only top-level messages.
    pub include_replies: bool,
}

pub type SharedNormalizerContext = Arc<RwLock<NormalizerContext>>;

/// Outcome of normalizing one socket frame. Ignores carry a reason so the
/// listener can log why traffic was dropped without guessing.
#[derive(Clone, Debug, PartialEq)]
pub enum Normalized {
    Message(MessageEnvelope),
    Ignored { reason: &'static str },
}

fn ignored(reason: &'static str) -> Normalized {
    Normalized::Ignored { reason }
}

impl NormalizerContext {
    /// Reduce a raw socket mode frame to a canonical message envelope, or
    /// explain why it does not qualify. Edits, deletions and other subtyped
    /// messages never qualify.
    pub fn normalize(&self, frame: &Value) -> Normalized {
        if frame.get("type").and_then(Value::as_str) != Some("events_api") {
            return ignored("not an events api envelope");
        }
        let Some(event) = frame.get("payload").and_then(|p| p.get("event")) else {
            return ignored("envelope carried no event");
        };
        if event.get("type").and_then(Value::as_str) != Some("message") {
            return ignored("not a message event");
        }
        if event.get("subtype").and_then(Value::as_str).is_some() {
            return ignored("subtyped message");
        }
        if event.get("bot_id").and_then(Value::as_str).is_some() {
            return ignored("bot message");
        }

        let Some(author) = event.get("user").and_then(Value::as_str) else {
            return ignored("message carried no author");
        };
        if self.bot_user_id.as_deref() == Some(author) {
            return ignored("own message echoed back");
        }

        let Some(channel) = event.get("channel").and_then(Value::as_str) else {
            return ignored("message carried no channel");
        };
        if let Some(pinned) = &self.channel {
            if pinned != channel {
                return ignored("message from an unpinned channel");
            }
        }

        let Some(ts) = event.get("ts").and_then(Value::as_str) else {
            return ignored("message carried no ts");
        };
        let thread_ts = event.get("thread_ts").and_then(Value::as_str).map(str::to_owned);
        let is_reply = thread_ts.as_deref().is_some_and(|thread| thread != ts);
        if is_reply && !self.include_replies {
            return ignored("thread reply");
        }

        let text = event.get("text").and_then(Value::as_str).unwrap_or_default().to_owned();
        let files = extract_files(event);
        if text.trim().is_empty() && files.is_empty() {
            return ignored("message carried neither text nor files");
        }

        let team = event
            .get("team")
            .and_then(Value::as_str)
            .or_else(|| frame.get("payload").and_then(|p| p.get("team_id")).and_then(Value::as_str))
            .map(str::to_owned);

        Normalized::Message(MessageEnvelope {
            channel: channel.to_owned(),
            author: author.to_owned(),
            ts: ts.to_owned(),
            text,
            thread_ts,
            files,
            team,
            received_at: Utc::now(),
        })
    }
}

fn extract_files(event: &Value) -> Vec<FileRef> {
    event
        .get("files")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(|file| {
            let id = file.get("id").and_then(Value::as_str)?;
            Some(FileRef {
                id: id.to_owned(),
                name: file.get("name").and_then(Value::as_str).map(str::to_owned),
                mimetype: file.get("mimetype").and_then(Value::as_str).map(str::to_owned),
                url_private: file.get("url_private").and_then(Value::as_str).map(str::to_owned),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use serde_json::{json, Value};

    use super::{Normalized, NormalizerContext};

    fn message_frame(event: Value) -> Value {
        json!({
            "type": "events_api",
            "envelope_id": "env-1",
            "payload": {"team_id": "T1", "event": event}
        })
    }

    fn context() -> NormalizerContext {
        NormalizerContext {
            bot_user_id: Some("UBOT".to_owned()),
            channel: Some("C1".to_owned()),
            include_replies: false,
        }
    }

    fn expect_ignored(outcome: Normalized) -> &'static str {
        match outcome {
            Normalized::Ignored { reason } => reason,
            Normalized::Message(envelope) => panic!("expected ignore, got {envelope:?}"),
        }
    }

    #[test]
    fn plain_message_normalizes() {
        let frame = message_frame(json!({
            "type": "message",
            "channel": "C1",
            "user": "U2",
            "ts": "1730000000.000100",
            "text": "hello there",
            "team": "T1"
        }));

        match context().normalize(&frame) {
            Normalized::Message(envelope) => {
                assert_eq!(envelope.channel, "C1");
                assert_eq!(envelope.author, "U2");
                assert_eq!(envelope.ts, "1730000000.000100");
                assert_eq!(envelope.text, "hello there");
                assert_eq!(envelope.team.as_deref(), Some("T1"));
                assert!(envelope.thread_ts.is_none());
            }
            other => panic!("expected message, got {other:?}"),
        }
    }

    #[test]
    fn own_messages_and_bot_messages_are_echoes() {
        let own = message_frame(json!({
            "type": "message", "channel": "C1", "user": "UBOT", "ts": "1.0", "text": "mine"
        }));
        assert_eq!(expect_ignored(context().normalize(&own)), "own message echoed back");

        let bot = message_frame(json!({
            "type": "message", "channel": "C1", "user": "U2", "bot_id": "B9",
            "ts": "1.0", "text": "from a bot"
        }));
        assert_eq!(expect_ignored(context().normalize(&bot)), "bot message");
    }

    #[test]
    fn edits_and_deletions_are_subtyped_and_ignored() {
        for subtype in ["message_changed", "message_deleted", "channel_join"] {
            let frame = message_frame(json!({
                "type": "message", "subtype": subtype, "channel": "C1",
                "user": "U2", "ts": "1.0"
            }));
            assert_eq!(expect_ignored(context().normalize(&frame)), "subtyped message");
        }
    }

    #[test]
    fn unpinned_channels_are_filtered_out() {
        let frame = message_frame(json!({
            "type": "message", "channel": "C_OTHER", "user": "U2", "ts": "1.0", "text": "hi"
        }));
        assert_eq!(expect_ignored(context().normalize(&frame)), "message from an unpinned channel");

        let mut open = context();
        open.channel = None;
        assert!(matches!(open.normalize(&frame), Normalized::Message(_)));
    }

    #[test]
    fn thread_replies_follow_the_toggle() {
        let reply = message_frame(json!({
            "type": "message", "channel": "C1", "user": "U2",
            "ts": "2.0", "thread_ts": "1.0", "text": "reply"
        }));
        assert_eq!(expect_ignored(context().normalize(&reply)), "thread reply");

        let mut with_replies = context();
        with_replies.include_replies = true;
        match with_replies.normalize(&reply) {
            Normalized::Message(envelope) => {
                assert!(envelope.is_thread_reply());
                assert_eq!(envelope.thread_ts.as_deref(), Some("1.0"));
            }
            other => panic!("expected message, got {other:?}"),
        }

        // A thread parent carries thread_ts == ts and is not a reply.
        let parent = message_frame(json!({
            "type": "message", "channel": "C1", "user": "U2",
            "ts": "1.0", "thread_ts": "1.0", "text": "parent"
        }));
        assert!(matches!(context().normalize(&parent), Normalized::Message(_)));
    }

    #[test]
    fn file_attachments_survive_normalization() {
        let frame = message_frame(json!({
            "type": "message", "channel": "C1", "user": "U2", "ts": "1.0",
            "text": "see attached",
            "files": [
                {"id": "F1", "name": "report.pdf", "mimetype": "application/pdf",
                 "url_private": "https://files.example/F1"},
                {"name": "no-id-dropped"}
            ]
        }));

        match context().normalize(&frame) {
            Normalized::Message(envelope) => {
                assert_eq!(envelope.files.len(), 1);
                assert_eq!(envelope.files[0].id, "F1");
                assert_eq!(envelope.files[0].mimetype.as_deref(), Some("application/pdf"));
            }
            other => panic!("expected message, got {other:?}"),
        }
    }

    #[test]
    fn empty_messages_without_files_are_ignored() {
        let empty = message_frame(json!({
            "type": "message", "channel": "C1", "user": "U2", "ts": "1.0", "text": "  "
        }));
        assert_eq!(
            expect_ignored(context().normalize(&empty)),
            "message carried neither text nor files"
        );

        let file_only = message_frame(json!({
            "type": "message", "channel": "C1", "user": "U2", "ts": "1.0", "text": "",
            "files": [{"id": "F1", "name": "shot.png"}]
        }));
        assert!(matches!(context().normalize(&file_only), Normalized::Message(_)));
    }

    #[test]
    fn non_message_traffic_is_ignored() {
        let slash = json!({"type": "slash_commands", "payload": {}});
        assert_eq!(expect_ignored(context().normalize(&slash)), "not an events api envelope");

        let reaction = message_frame(json!({"type": "reaction_added", "user": "U2"}));
        assert_eq!(expect_ignored(context().normalize(&reaction)), "not a message event");
    }
}
