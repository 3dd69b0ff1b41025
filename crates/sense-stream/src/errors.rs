/// Errors raised by a `ConversationTransport` while opening or reading a
/// streamed reply.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, serde::Serialize, serde::Deserialize)]
pub enum TransportError {
    /// The request could not be sent (DNS, connect, TLS, timeout).
    #[error("connect error: {message}")]
    Connect { message: String },
    /// The backend answered with a non-success status code.
    #[error("backend returned status {status}: {body}")]
    Status { status: u16, body: String },
    /// Reading the response body failed mid-stream.
    #[error("read error: {message}")]
    Read { message: String },
}

impl TransportError {
    /// Creates a connect-level error.
    pub fn connect(message: impl Into<String>) -> Self {
        Self::Connect {
            message: message.into(),
        }
    }

    /// Creates a non-success status error.
    pub fn status(status: u16, body: impl Into<String>) -> Self {
        Self::Status {
            status,
            body: body.into(),
        }
    }

    /// Creates a body read error.
    pub fn read(message: impl Into<String>) -> Self {
        Self::Read {
            message: message.into(),
        }
    }

    /// Returns the HTTP status code when the backend rejected the request.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            Self::Connect { .. } | Self::Read { .. } => None,
        }
    }
}

/// Reason recorded on a message whose exchange ended in `Failed`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, serde::Serialize, serde::Deserialize)]
pub enum ExchangeFailure {
    /// Network or protocol failure reported by the transport.
    #[error(transparent)]
    Transport(TransportError),
    /// The caller cancelled the exchange before it finished.
    #[error("exchange cancelled")]
    Cancelled,
}

impl ExchangeFailure {
    /// Marker appended to the partial text of a failed exchange.
    pub fn suffix(&self) -> &'static str {
        match self {
            Self::Transport(_) => "\n[Error receiving response]",
            Self::Cancelled => "\n[Response cancelled]",
        }
    }
}

impl From<TransportError> for ExchangeFailure {
    fn from(value: TransportError) -> Self {
        ExchangeFailure::Transport(value)
    }
}

/// A single frame payload that could not be decoded.
///
/// Never surfaced to callers; the decoder logs it and moves on.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("malformed frame ({reason}): {raw}")]
pub struct MalformedFrame {
    pub raw: String,
    pub reason: String,
}

/// Top-level error type for the public client API.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClientError {
    /// Caller misuse detected before any network activity.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    /// Invalid client configuration.
    #[error("config error: {0}")]
    Config(String),
    /// A message was handed over before its exchange reached a terminal status.
    #[error("message {0} is still streaming")]
    NotTerminal(crate::model::MessageId),
    /// Transport failure outside of a streamed exchange (history fetches).
    #[error(transparent)]
    Transport(TransportError),
}

impl From<TransportError> for ClientError {
    fn from(value: TransportError) -> Self {
        ClientError::Transport(value)
    }
}
