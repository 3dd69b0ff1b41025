use std::sync::Arc;

use futures::StreamExt as _;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::config::ClientConfig;
use crate::errors::{ClientError, ExchangeFailure};
use crate::frame::{FrameDecoder, StreamFrame};
use crate::message::{AccumulatingMessage, MessageHandle, MessageWriter};
use crate::model::{ConversationId, MessageId};
use crate::transport::{ConversationTransport, HttpTransport};

/// Handle used to cancel an in-flight exchange.
#[derive(Clone)]
pub struct CancelHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl CancelHandle {
    /// Requests cancellation.
    ///
    /// The exchange drops its reply stream and ends in `Failed` with
    /// `ExchangeFailure::Cancelled`. No-op once the exchange is terminal.
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }
}

/// Client that submits messages and accumulates streamed replies.
#[derive(Clone)]
pub struct StreamingReplyClient {
    transport: Arc<dyn ConversationTransport>,
}

impl StreamingReplyClient {
    /// Creates a client over any transport.
    pub fn new(transport: Arc<dyn ConversationTransport>) -> Self {
        Self { transport }
    }

    /// Creates a client over the HTTP transport.
    pub fn http(config: ClientConfig) -> Result<Self, ClientError> {
        Ok(Self::new(Arc::new(HttpTransport::new(config)?)))
    }

    /// Validates the input and starts one exchange.
    ///
    /// Returns immediately with the reply in `Streaming` status; frames are
    /// applied by a spawned task. Must be called from within a tokio runtime.
    pub fn send(
        &self,
        conversation_id: impl Into<ConversationId>,
        user_text: impl Into<String>,
    ) -> Result<Exchange, ClientError> {
        let conversation_id = conversation_id.into();
        let user_text = user_text.into();
        if conversation_id.as_str().trim().is_empty() {
            return Err(ClientError::InvalidArgument(
                "conversation id must not be empty".into(),
            ));
        }
        if user_text.trim().is_empty() {
            return Err(ClientError::InvalidArgument(
                "message text must not be empty".into(),
            ));
        }

        let (writer, message) =
            MessageWriter::new(AccumulatingMessage::new(conversation_id.clone()));
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let id = message.snapshot().id;
        debug!(message_id = %id, %conversation_id, "starting exchange");

        tokio::spawn(run_exchange(
            self.transport.clone(),
            conversation_id,
            user_text,
            id,
            writer,
            cancel_rx,
        ));

        Ok(Exchange {
            id,
            message,
            cancel: CancelHandle {
                tx: Arc::new(cancel_tx),
            },
        })
    }
}

/// One in-flight (or finished) exchange returned by
/// [`StreamingReplyClient::send`].
pub struct Exchange {
    id: MessageId,
    message: MessageHandle,
    cancel: CancelHandle,
}

impl Exchange {
    /// Id of the reply message.
    pub fn id(&self) -> MessageId {
        self.id
    }

    /// Observer for the reply message.
    pub fn message(&self) -> MessageHandle {
        self.message.clone()
    }

    /// Current state of the reply.
    pub fn snapshot(&self) -> AccumulatingMessage {
        self.message.snapshot()
    }

    /// Returns a handle that can cancel the exchange.
    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    /// Cancels the exchange.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Waits for the terminal state of the reply.
    pub async fn finish(self) -> AccumulatingMessage {
        self.message.wait_terminal().await
    }
}

/// Resolves once cancellation has been requested. Never resolves if every
/// `CancelHandle` was dropped without cancelling.
async fn cancel_requested(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

enum Flow {
    Continue,
    Done,
}

/// How the read loop ended.
enum Outcome {
    Completed,
    Failed(ExchangeFailure),
    /// Every observer is gone; nothing left to report to.
    Abandoned,
}

struct ExchangeState {
    writer: MessageWriter,
    message_id: MessageId,
    frames: u64,
    malformed: u64,
}

impl ExchangeState {
    fn apply_frames(&mut self, frames: Vec<StreamFrame>) -> Flow {
        for frame in frames {
            if frame.is_terminal {
                debug!(message_id = %self.message_id, frames = self.frames, "sentinel received");
                return Flow::Done;
            }
            self.frames += 1;
            match frame.increment() {
                Some(increment) => self.writer.apply(increment),
                None => {
                    self.malformed += 1;
                    warn!(message_id = %self.message_id, "ignoring malformed frame");
                }
            }
        }
        Flow::Continue
    }

    fn finish(&self, outcome: Outcome, conversation_id: &ConversationId) {
        match outcome {
            Outcome::Completed => {
                if self.writer.complete() {
                    info!(
                        message_id = %self.message_id,
                        %conversation_id,
                        frames = self.frames,
                        malformed = self.malformed,
                        "exchange completed"
                    );
                }
            }
            Outcome::Failed(failure) => {
                warn!(
                    message_id = %self.message_id,
                    %conversation_id,
                    error = %failure,
                    "exchange failed"
                );
                self.writer.fail(failure);
            }
            Outcome::Abandoned => {
                debug!(message_id = %self.message_id, "all observers dropped, exchange abandoned");
            }
        }
    }
}

async fn run_exchange(
    transport: Arc<dyn ConversationTransport>,
    conversation_id: ConversationId,
    user_text: String,
    message_id: MessageId,
    writer: MessageWriter,
    mut cancel_rx: watch::Receiver<bool>,
) {
    let mut state = ExchangeState {
        writer,
        message_id,
        frames: 0,
        malformed: 0,
    };

    let opened = tokio::select! {
        biased;
        _ = cancel_requested(&mut cancel_rx) => Err(Outcome::Failed(ExchangeFailure::Cancelled)),
        _ = state.writer.closed() => Err(Outcome::Abandoned),
        opened = transport.submit_message(&conversation_id, &user_text) => {
            opened.map_err(|err| Outcome::Failed(err.into()))
        }
    };
    let mut stream = match opened {
        Ok(stream) => stream,
        Err(outcome) => {
            state.finish(outcome, &conversation_id);
            return;
        }
    };

    let mut decoder = FrameDecoder::default();
    let outcome = loop {
        tokio::select! {
            biased;
            _ = cancel_requested(&mut cancel_rx) => {
                break Outcome::Failed(ExchangeFailure::Cancelled);
            }
            _ = state.writer.closed() => break Outcome::Abandoned,
            next = stream.next() => match next {
                Some(Ok(chunk)) => {
                    if let Flow::Done = state.apply_frames(decoder.push_chunk(&chunk)) {
                        break Outcome::Completed;
                    }
                }
                Some(Err(err)) => break Outcome::Failed(err.into()),
                None => {
                    state.apply_frames(decoder.finish());
                    debug!(%message_id, "stream ended without sentinel");
                    break Outcome::Completed;
                }
            }
        }
    };
    // Release the connection before publishing the terminal state.
    drop(stream);
    state.finish(outcome, &conversation_id);
}
