//! Incremental `text/event-stream` decoder.
//!
//! Bytes arrive in arbitrary chunks; a record is emitted once its
//! terminating blank line has been seen. Lines end in `\n`, `\r\n` or `\r`,
//! and a `\r\n` pair split across two chunks is handled.
//!
//! Malformed records (invalid UTF-8, oversized) are reported as `Err` items
//! and skipped; decoding always continues with the next record.

use crate::defaults::MAX_RECORD_BYTES;
use crate::error::DecodeError;

/// One dispatched event-stream record.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SseRecord {
    /// `event:` field, if present.
    pub event: Option<String>,
    /// All `data:` lines joined with `\n`.
    pub data: String,
    pub id: Option<String>,
    /// `retry:` in milliseconds.
    pub retry: Option<u64>,
}

/// Fields accumulated for the record currently being read.
#[derive(Debug, Default)]
struct PendingRecord {
    event: Option<String>,
    data: Vec<String>,
    id: Option<String>,
    retry: Option<u64>,
    size: usize,
    malformed: Option<DecodeError>,
}

impl PendingRecord {
    fn is_empty(&self) -> bool {
        self.event.is_none()
            && self.data.is_empty()
            && self.id.is_none()
            && self.retry.is_none()
            && self.size == 0
            && self.malformed.is_none()
    }

    fn mark(&mut self, err: DecodeError) {
        if self.malformed.is_none() {
            self.malformed = Some(err);
        }
    }

    fn apply_field(&mut self, name: &str, value: &str) {
        match name {
            "event" => self.event = Some(value.to_owned()),
            "data" => self.data.push(value.to_owned()),
            "id" => {
                if !value.contains('\0') {
                    self.id = Some(value.to_owned());
                }
            }
            "retry" => {
                if !value.is_empty() && value.bytes().all(|b| b.is_ascii_digit()) {
                    self.retry = value.parse().ok();
                }
            }
            _ => {}
        }
    }

    /// Finish the record. `None` when there is nothing to dispatch.
    fn dispatch(self) -> Option<Result<SseRecord, DecodeError>> {
        if let Some(err) = self.malformed {
            return Some(Err(err));
        }
        if self.data.is_empty() {
            return None;
        }
        Some(Ok(SseRecord {
            event: self.event,
            data: self.data.join("\n"),
            id: self.id,
            retry: self.retry,
        }))
    }
}

/// Stateful decoder fed with raw byte chunks.
#[derive(Debug)]
pub struct SseDecoder {
    /// Bytes of the current, not yet terminated line.
    line: Vec<u8>,
    record: PendingRecord,
    /// Previous chunk ended on `\r`; a leading `\n` belongs to it.
    skip_lf: bool,
    /// Dropping bytes until the next line end (oversized line).
    discarding: bool,
    at_stream_start: bool,
    max_record_bytes: usize,
}

impl Default for SseDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::with_max_record_bytes(MAX_RECORD_BYTES)
    }

    pub fn with_max_record_bytes(max_record_bytes: usize) -> Self {
        Self {
            line: Vec::new(),
            record: PendingRecord::default(),
            skip_lf: false,
            discarding: false,
            at_stream_start: true,
            max_record_bytes,
        }
    }

    /// Feed one chunk; returns every record completed by it, in order.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Result<SseRecord, DecodeError>> {
        let mut out = Vec::new();
        let mut start = 0;

        for (i, &b) in chunk.iter().enumerate() {
            if self.skip_lf {
                self.skip_lf = false;
                if b == b'\n' {
                    start = i + 1;
                    continue;
                }
            }
            if b == b'\n' || b == b'\r' {
                self.skip_lf = b == b'\r';
                self.extend_line(&chunk[start..i]);
                self.end_line(&mut out);
                start = i + 1;
            }
        }

        self.extend_line(&chunk[start..]);
        out
    }

    /// True when bytes of an unterminated record are buffered.
    ///
    /// At end of stream such a record is discarded, never dispatched.
    pub fn has_partial(&self) -> bool {
        !self.line.is_empty() || !self.record.is_empty()
    }

    fn extend_line(&mut self, bytes: &[u8]) {
        if self.discarding || bytes.is_empty() {
            return;
        }
        if self.record.size + self.line.len() + bytes.len() > self.max_record_bytes {
            self.record.mark(DecodeError::Oversized {
                limit: self.max_record_bytes,
            });
            self.line.clear();
            self.discarding = true;
            return;
        }
        self.line.extend_from_slice(bytes);
    }

    fn end_line(&mut self, out: &mut Vec<Result<SseRecord, DecodeError>>) {
        let was_discarding = std::mem::replace(&mut self.discarding, false);
        let line = std::mem::take(&mut self.line);

        if line.is_empty() && !was_discarding {
            self.at_stream_start = false;
            let record = std::mem::take(&mut self.record);
            if let Some(item) = record.dispatch() {
                out.push(item);
            }
            return;
        }
        if was_discarding || self.record.malformed.is_some() {
            return;
        }

        self.record.size += line.len() + 1;
        let text = match std::str::from_utf8(&line) {
            Ok(text) => text,
            Err(_) => {
                self.record.mark(DecodeError::InvalidUtf8);
                return;
            }
        };
        let text = if std::mem::replace(&mut self.at_stream_start, false) {
            text.strip_prefix('\u{feff}').unwrap_or(text)
        } else {
            text
        };

        if text.starts_with(':') {
            return;
        }
        let (name, value) = match text.split_once(':') {
            Some((name, value)) => (name, value.strip_prefix(' ').unwrap_or(value)),
            None => (text, ""),
        };
        self.record.apply_field(name, value);
    }
}


#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    const STREAM: &[u8] = b": hello\r\n\r\nevent: a\ndata: {\"type\":\"session.updated\"}\n\n\
data: \xff\n\ndata: {\"type\":\"tool.called\"}\r\ndata: x\r\rid: 3\ndata: y\n\n";

    fn decode_chunked(splits: &[usize]) -> Vec<Result<SseRecord, DecodeError>> {
        let mut dec = SseDecoder::new();
        let mut out = Vec::new();
        let mut prev = 0;
        for &at in splits {
            out.extend(dec.push(&STREAM[prev..at]));
            prev = at;
        }
        out.extend(dec.push(&STREAM[prev..]));
        out
    }

    proptest! {
        #[test]
        fn chunking_does_not_change_output(
            mut splits in proptest::collection::vec(0..STREAM.len(), 0..12),
        ) {
            splits.sort_unstable();
            let whole = SseDecoder::new().push(STREAM);
            prop_assert_eq!(decode_chunked(&splits), whole);
        }
    }
}
