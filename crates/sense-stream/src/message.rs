use chrono::{DateTime, Utc};
use tokio::sync::watch;

use crate::draft::EmailDraft;
use crate::errors::ExchangeFailure;
use crate::frame::Increment;
use crate::model::{ConversationId, MessageId};

/// Lifecycle status of a streamed reply.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageStatus {
    /// Frames are still arriving.
    Streaming,
    /// The stream ended cleanly (sentinel or end-of-body).
    Completed,
    /// Transport error or cancellation.
    Failed,
}

impl MessageStatus {
    /// Returns true for `Completed` and `Failed`.
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Streaming)
    }
}

/// Snapshot of the reply built by one exchange.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct AccumulatingMessage {
    pub id: MessageId,
    pub conversation_id: ConversationId,
    /// Concatenation of every `content` fragment, in arrival order.
    pub text: String,
    /// Last metadata object seen on the stream.
    pub metadata: Option<serde_json::Value>,
    pub status: MessageStatus,
    /// Set only when `status` is `Failed`.
    pub failure: Option<ExchangeFailure>,
    pub created_at: DateTime<Utc>,
}

impl AccumulatingMessage {
    pub(crate) fn new(conversation_id: ConversationId) -> Self {
        Self {
            id: MessageId::new_v4(),
            conversation_id,
            text: String::new(),
            metadata: None,
            status: MessageStatus::Streaming,
            failure: None,
            created_at: Utc::now(),
        }
    }

    /// Email draft proposed in the reply metadata, if any.
    pub fn email_draft(&self) -> Option<EmailDraft> {
        self.metadata.as_ref().and_then(EmailDraft::from_metadata)
    }
}

/// Write side of a message, owned by the exchange task.
///
/// Every mutation is a no-op once the message reached a terminal status.
pub(crate) struct MessageWriter {
    tx: watch::Sender<AccumulatingMessage>,
}

impl MessageWriter {
    pub(crate) fn new(message: AccumulatingMessage) -> (Self, MessageHandle) {
        let (tx, rx) = watch::channel(message);
        (Self { tx }, MessageHandle { rx })
    }

    /// Applies one frame's increment in a single update.
    pub(crate) fn apply(&self, increment: &Increment) {
        self.tx.send_if_modified(|message| {
            if message.status.is_terminal() {
                return false;
            }
            let mut modified = false;
            if let Some(content) = increment.content.as_deref()
                && !content.is_empty()
            {
                message.text.push_str(content);
                modified = true;
            }
            if let Some(metadata) = &increment.metadata
                && !metadata.is_null()
            {
                message.metadata = Some(metadata.clone());
                modified = true;
            }
            modified
        });
    }

    /// Moves a streaming message to `Completed`. Returns false if it was
    /// already terminal.
    pub(crate) fn complete(&self) -> bool {
        self.tx.send_if_modified(|message| {
            if message.status.is_terminal() {
                return false;
            }
            message.status = MessageStatus::Completed;
            true
        })
    }

    /// Moves a streaming message to `Failed`, keeping its partial text and
    /// appending the failure marker. Returns false if it was already terminal.
    pub(crate) fn fail(&self, failure: ExchangeFailure) -> bool {
        self.tx.send_if_modified(|message| {
            if message.status.is_terminal() {
                return false;
            }
            message.text.push_str(failure.suffix());
            message.status = MessageStatus::Failed;
            message.failure = Some(failure);
            true
        })
    }

    /// Resolves once every `MessageHandle` has been dropped.
    pub(crate) async fn closed(&self) {
        self.tx.closed().await
    }
}

/// Read side of a message. Cheap to clone; every clone observes the same
/// exchange.
#[derive(Clone, Debug)]
pub struct MessageHandle {
    rx: watch::Receiver<AccumulatingMessage>,
}

impl MessageHandle {
    /// Returns a copy of the current state.
    pub fn snapshot(&self) -> AccumulatingMessage {
        self.rx.borrow().clone()
    }

    /// Current status.
    pub fn status(&self) -> MessageStatus {
        self.rx.borrow().status
    }

    /// Current accumulated text.
    pub fn text(&self) -> String {
        self.rx.borrow().text.clone()
    }

    /// Waits for the next update and returns the new snapshot.
    ///
    /// Returns `None` once the exchange task is gone and no further update
    /// can arrive.
    pub async fn changed(&mut self) -> Option<AccumulatingMessage> {
        match self.rx.changed().await {
            Ok(()) => Some(self.rx.borrow_and_update().clone()),
            Err(_) => None,
        }
    }

    /// Waits until the message reaches `Completed` or `Failed`.
    pub async fn wait_terminal(mut self) -> AccumulatingMessage {
        let terminal = self
            .rx
            .wait_for(|message| message.status.is_terminal())
            .await
            .map(|message| message.clone());
        terminal.unwrap_or_else(|_| self.rx.borrow().clone())
    }
}
