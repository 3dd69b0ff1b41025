//! Streaming reply client for the Sense conversation backend.
//!
//! A reply arrives as newline-delimited `data:` frames. The client decodes
//! them incrementally into an [`AccumulatingMessage`] that callers can observe
//! while it grows, and that always ends in exactly one terminal status.
//!
//! # Usage
//!
//! ```no_run
//! use sense_stream::prelude::*;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), ClientError> {
//! let client = StreamingReplyClient::http(ClientConfig::from_env()?)?;
//! let exchange = client.send("chat-42", "Summarize the loss runs")?;
//!
//! let mut message = exchange.message();
//! while let Some(snapshot) = message.changed().await {
//!     println!("{} chars so far", snapshot.text.len());
//!     if snapshot.status.is_terminal() {
//!         break;
//!     }
//! }
//!
//! let reply = exchange.finish().await;
//! println!("{:?}: {}", reply.status, reply.text);
//! # Ok(())
//! # }
//! ```

/// Exchange driver and cancellation handle.
pub mod client;
/// HTTP client configuration.
pub mod config;
/// Email drafts carried in reply metadata.
pub mod draft;
/// Public error types.
pub mod errors;
/// Incremental frame decoding.
pub mod frame;
/// Accumulating reply state and its observer handle.
pub mod message;
/// Conversation and message identifiers.
pub mod model;
/// Push notification fan-out.
pub mod notify;
/// Logging setup.
pub mod observability;
/// Common imports for typical usage.
pub mod prelude;
/// Caller-side conversation history.
pub mod transcript;
/// Backend transport contract and HTTP implementation.
pub mod transport;

pub use client::{CancelHandle, Exchange, StreamingReplyClient};
pub use config::ClientConfig;
pub use draft::EmailDraft;
pub use errors::{ClientError, ExchangeFailure, MalformedFrame, TransportError};
pub use frame::{FrameDecoder, FramePayload, Increment, StreamFrame};
pub use message::{AccumulatingMessage, MessageHandle, MessageStatus};
pub use model::{ConversationId, MessageId};
pub use notify::{CallbackSubscription, EventKind, Notification, NotificationChannel, Subscription};
pub use transcript::{Role, Transcript, TranscriptEntry};
pub use transport::{ConversationTransport, HistoryMessage, HttpTransport, ReplyStream};
