//! Incremental decoding of a streamed reply body into frames.
//!
//! The body is a sequence of newline-delimited lines. Data frames look like
//! `data: {"content":"..."}`; the literal `data: [DONE]` ends the stream.
//! Anything else on the wire is inert.
use tracing::debug;

use crate::errors::MalformedFrame;

/// Marker that starts every data frame line.
pub const EVENT_PREFIX: &str = "data:";
/// Payload of the frame that terminates a stream.
pub const SENTINEL: &str = "[DONE]";

/// Structured increment carried by a data frame.
#[derive(Clone, Debug, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Increment {
    /// Text to append to the reply.
    #[serde(default)]
    pub content: Option<String>,
    /// Side-channel data; replaces whatever the reply carried before.
    #[serde(default)]
    pub metadata: Option<serde_json::Value>,
}

/// Payload of a decoded frame.
#[derive(Clone, Debug, PartialEq)]
pub enum FramePayload {
    /// Valid JSON object payload.
    Increment(Increment),
    /// Payload that is not a valid increment (or the sentinel token itself).
    Raw(String),
}

/// One decoded unit of server-sent data.
#[derive(Clone, Debug, PartialEq)]
pub struct StreamFrame {
    pub payload: FramePayload,
    /// True only for the sentinel frame.
    pub is_terminal: bool,
}

impl StreamFrame {
    /// Parses a single line (without its `\n`).
    ///
    /// Returns `None` for lines that do not carry the event prefix and for
    /// prefixed lines with an empty payload.
    pub fn parse_line(line: &str) -> Option<StreamFrame> {
        let line = line.trim_end_matches('\r');
        let data = line.trim_start().strip_prefix(EVENT_PREFIX)?.trim();
        if data.is_empty() {
            return None;
        }
        if data == SENTINEL {
            return Some(StreamFrame {
                payload: FramePayload::Raw(data.to_string()),
                is_terminal: true,
            });
        }
        let payload = match serde_json::from_str::<Increment>(data) {
            Ok(increment) => FramePayload::Increment(increment),
            Err(err) => {
                let malformed = MalformedFrame {
                    raw: data.to_string(),
                    reason: err.to_string(),
                };
                debug!(error = %malformed, "malformed frame payload");
                FramePayload::Raw(malformed.raw)
            }
        };
        Some(StreamFrame {
            payload,
            is_terminal: false,
        })
    }

    /// Returns the increment when the payload parsed successfully.
    pub fn increment(&self) -> Option<&Increment> {
        match &self.payload {
            FramePayload::Increment(increment) => Some(increment),
            FramePayload::Raw(_) => None,
        }
    }

    /// True for non-terminal frames whose payload failed to parse.
    pub fn is_malformed(&self) -> bool {
        !self.is_terminal && matches!(self.payload, FramePayload::Raw(_))
    }
}

/// UTF-8 decoder that keeps an incomplete trailing sequence between chunks.
#[derive(Default)]
struct Utf8Decoder {
    pending: Vec<u8>,
}

impl Utf8Decoder {
    fn decode(&mut self, chunk: &[u8], out: &mut String) {
        self.pending.extend_from_slice(chunk);
        let mut consumed = 0;
        while consumed < self.pending.len() {
            match std::str::from_utf8(&self.pending[consumed..]) {
                Ok(valid) => {
                    out.push_str(valid);
                    consumed = self.pending.len();
                }
                Err(err) => {
                    let valid_up_to = err.valid_up_to();
                    out.push_str(&String::from_utf8_lossy(
                        &self.pending[consumed..consumed + valid_up_to],
                    ));
                    consumed += valid_up_to;
                    match err.error_len() {
                        Some(len) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            consumed += len;
                        }
                        // Incomplete sequence at the end: wait for the next chunk.
                        None => break,
                    }
                }
            }
        }
        self.pending.drain(..consumed);
    }

    fn finish(&mut self, out: &mut String) {
        if !self.pending.is_empty() {
            out.push(char::REPLACEMENT_CHARACTER);
            self.pending.clear();
        }
    }
}

/// Incremental line-oriented frame decoder.
///
/// Feed raw body chunks with [`FrameDecoder::push_chunk`]; chunk boundaries
/// may fall anywhere, including inside a multi-byte character or a line.
#[derive(Default)]
pub struct FrameDecoder {
    utf8: Utf8Decoder,
    line: String,
    scanned: usize,
}

impl FrameDecoder {
    /// Decodes one body chunk and returns every frame completed by it.
    pub fn push_chunk(&mut self, chunk: &[u8]) -> Vec<StreamFrame> {
        self.utf8.decode(chunk, &mut self.line);
        let mut frames = Vec::new();
        while let Some(offset) = self.line[self.scanned..].find('\n') {
            let end = self.scanned + offset;
            if let Some(frame) = StreamFrame::parse_line(&self.line[..end]) {
                frames.push(frame);
            }
            self.line.drain(..=end);
            self.scanned = 0;
        }
        self.scanned = self.line.len();
        frames
    }

    /// Flushes buffered input at end-of-stream.
    ///
    /// A final line without a trailing newline still yields its frame.
    pub fn finish(&mut self) -> Vec<StreamFrame> {
        self.utf8.finish(&mut self.line);
        self.scanned = 0;
        let rest = std::mem::take(&mut self.line);
        StreamFrame::parse_line(&rest).into_iter().collect()
    }
}
