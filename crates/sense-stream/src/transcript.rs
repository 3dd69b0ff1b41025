use chrono::{DateTime, Utc};

use crate::draft::EmailDraft;
use crate::errors::ClientError;
use crate::message::{AccumulatingMessage, MessageStatus};
use crate::model::ConversationId;
use crate::transport::HistoryMessage;

/// Author of a transcript entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    /// Maps a backend role name; anything other than `user` is the assistant.
    pub fn from_wire(role: &str) -> Self {
        if role.eq_ignore_ascii_case("user") {
            Self::User
        } else {
            Self::Assistant
        }
    }
}

/// One finished message of a conversation.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct TranscriptEntry {
    pub role: Role,
    pub text: String,
    pub metadata: Option<serde_json::Value>,
    /// `None` for user messages and replies loaded from history.
    pub status: Option<MessageStatus>,
    pub created_at: DateTime<Utc>,
}

/// Display/history list of one conversation.
///
/// Streamed replies are handed over only once their exchange is terminal, so
/// entries never change after insertion.
#[derive(Clone, Debug)]
pub struct Transcript {
    conversation_id: ConversationId,
    entries: Vec<TranscriptEntry>,
}

impl Transcript {
    pub fn new(conversation_id: impl Into<ConversationId>) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            entries: Vec::new(),
        }
    }

    /// Seeds a transcript from stored backend messages.
    pub fn from_history(
        conversation_id: impl Into<ConversationId>,
        messages: impl IntoIterator<Item = HistoryMessage>,
    ) -> Self {
        let mut transcript = Self::new(conversation_id);
        let now = Utc::now();
        transcript
            .entries
            .extend(messages.into_iter().map(|m| TranscriptEntry {
                role: Role::from_wire(&m.role),
                text: m.content,
                metadata: None,
                status: None,
                created_at: now,
            }));
        transcript
    }

    pub fn conversation_id(&self) -> &ConversationId {
        &self.conversation_id
    }

    pub fn entries(&self) -> &[TranscriptEntry] {
        &self.entries
    }

    /// Records the user's outbound text.
    pub fn push_user(&mut self, text: impl Into<String>) -> &TranscriptEntry {
        self.entries.push(TranscriptEntry {
            role: Role::User,
            text: text.into(),
            metadata: None,
            status: None,
            created_at: Utc::now(),
        });
        &self.entries[self.entries.len() - 1]
    }

    /// Takes ownership of a finished reply.
    ///
    /// Fails with `NotTerminal` while the reply is still streaming and with
    /// `InvalidArgument` when it belongs to another conversation.
    pub fn push_reply(&mut self, reply: AccumulatingMessage) -> Result<(), ClientError> {
        if !reply.status.is_terminal() {
            return Err(ClientError::NotTerminal(reply.id));
        }
        if reply.conversation_id != self.conversation_id {
            return Err(ClientError::InvalidArgument(format!(
                "reply belongs to conversation {}, not {}",
                reply.conversation_id, self.conversation_id
            )));
        }
        self.entries.push(TranscriptEntry {
            role: Role::Assistant,
            text: reply.text,
            metadata: reply.metadata,
            status: Some(reply.status),
            created_at: reply.created_at,
        });
        Ok(())
    }

    /// Most recent assistant entry.
    pub fn last_reply(&self) -> Option<&TranscriptEntry> {
        self.entries.iter().rev().find(|e| e.role == Role::Assistant)
    }

    /// Email draft carried by the most recent reply that has one.
    pub fn latest_email_draft(&self) -> Option<EmailDraft> {
        self.entries
            .iter()
            .rev()
            .filter_map(|e| e.metadata.as_ref())
            .find_map(EmailDraft::from_metadata)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reply(status: MessageStatus, text: &str) -> AccumulatingMessage {
        let mut message = AccumulatingMessage::new(ConversationId::from("chat"));
        message.text = text.into();
        message.status = status;
        message
    }

    #[test]
    fn streaming_reply_is_rejected() {
        let mut transcript = Transcript::new("chat");
        let streaming = reply(MessageStatus::Streaming, "half");
        let id = streaming.id;
        let err = transcript.push_reply(streaming).expect_err("still streaming");
        assert_eq!(err, ClientError::NotTerminal(id));
        assert_eq!(err.to_string(), format!("message {id} is still streaming"));
        assert!(transcript.entries().is_empty());
    }

    #[test]
    fn reply_from_other_conversation_is_rejected() {
        let mut transcript = Transcript::new("other");
        let err = transcript
            .push_reply(reply(MessageStatus::Completed, "hi"))
            .expect_err("wrong conversation");
        assert!(matches!(err, ClientError::InvalidArgument(_)));
    }

    #[test]
    fn failed_reply_is_kept_with_its_status() {
        let mut transcript = Transcript::new("chat");
        transcript.push_user("question");
        transcript
            .push_reply(reply(MessageStatus::Failed, "part\n[Error receiving response]"))
            .expect("terminal reply");
        let last = transcript.last_reply().expect("reply");
        assert_eq!(last.status, Some(MessageStatus::Failed));
        assert!(last.text.starts_with("part"));
        assert_eq!(transcript.entries().len(), 2);
    }

    #[test]
    fn history_roles_are_mapped() {
        let transcript = Transcript::from_history(
            "chat",
            vec![
                HistoryMessage {
                    role: "user".into(),
                    content: "hi".into(),
                },
                HistoryMessage {
                    role: "assistant".into(),
                    content: "hello".into(),
                },
            ],
        );
        let roles: Vec<Role> = transcript.entries().iter().map(|e| e.role).collect();
        assert_eq!(roles, vec![Role::User, Role::Assistant]);
        assert_eq!(transcript.last_reply().map(|e| e.text.as_str()), Some("hello"));
    }

    #[test]
    fn latest_email_draft_prefers_newest_reply() {
        let mut transcript = Transcript::new("chat");
        let mut first = reply(MessageStatus::Completed, "first");
        first.metadata = Some(serde_json::json!({"to":"a@x.com","subject":"s1","body":"b1"}));
        let mut second = reply(MessageStatus::Completed, "second");
        second.metadata = Some(serde_json::json!({"to":"b@x.com","subject":"s2","body":"b2"}));
        transcript.push_reply(first).expect("first");
        transcript.push_reply(second).expect("second");
        transcript.push_reply(reply(MessageStatus::Completed, "no draft")).expect("third");

        let draft = transcript.latest_email_draft().expect("draft");
        assert_eq!(draft.to, "b@x.com");
    }
}
