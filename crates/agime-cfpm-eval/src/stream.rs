//! Incremental decoder for the server-sent-event stream of `/reply`.
//!
//! Bytes arrive in arbitrary chunks; lines may be split across chunks. Each
//! complete line carrying the `data:` marker is parsed as JSON, and object
//! payloads become [`ReplyEvent`]s. Everything else (blank keep-alives,
//! comments, `event:`/`id:` fields, malformed JSON, non-object JSON) is
//! skipped. Decoding stops after the first `Finish` or `Error` event.

use crate::conversation::ReplyEvent;
use tracing::debug;

pub const DATA_MARKER: &str = "data:";

#[derive(Debug, Default)]
pub struct EventStreamDecoder {
    pending: Vec<u8>,
    terminated: bool,
}

impl EventStreamDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// True once a terminal event has been yielded. Further input is ignored.
    pub fn is_terminated(&self) -> bool {
        self.terminated
    }

    /// Feed a chunk and return the events completed by it, in order.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<ReplyEvent> {
        let mut events = Vec::new();
        if self.terminated {
            return events;
        }
        self.pending.extend_from_slice(chunk);

        while let Some(newline) = self.pending.iter().position(|byte| *byte == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=newline).collect();
            if let Some(event) = self.decode_line(&line) {
                events.push(event);
                if self.terminated {
                    self.pending.clear();
                    break;
                }
            }
        }
        events
    }

    /// Flush a trailing line left without a newline when the stream closes.
    pub fn finish(&mut self) -> Option<ReplyEvent> {
        if self.terminated || self.pending.is_empty() {
            self.pending.clear();
            return None;
        }
        let line = std::mem::take(&mut self.pending);
        self.decode_line(&line)
    }

    fn decode_line(&mut self, raw: &[u8]) -> Option<ReplyEvent> {
        let line = String::from_utf8_lossy(raw);
        let payload = line.trim().strip_prefix(DATA_MARKER)?.trim();
        if payload.is_empty() {
            return None;
        }

        let value = match serde_json::from_str::<serde_json::Value>(payload) {
            Ok(value) => value,
            Err(e) => {
                debug!("Skipping malformed stream payload: {}", e);
                return None;
            }
        };

        let event = ReplyEvent::from_value(value)?;
        if event.is_terminal() {
            self.terminated = true;
        }
        Some(event)
    }
}

/// Decode a complete buffered stream in one go.
pub fn decode_all(body: &[u8]) -> Vec<ReplyEvent> {
    let mut decoder = EventStreamDecoder::new();
    let mut events = decoder.push(body);
    events.extend(decoder.finish());
    events
}
