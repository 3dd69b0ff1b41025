//! Common imports for typical client usage.
pub use crate::{
    AccumulatingMessage, CancelHandle, ClientConfig, ClientError, ConversationId, EventKind,
    Exchange, ExchangeFailure, MessageHandle, MessageStatus, Notification, NotificationChannel,
    StreamingReplyClient, Transcript,
};
