//! Server-sent-event framing for upload progress.
//!
//! A record is one or more lines terminated by a blank line. Only `data:`
//! lines carry content; their payload is a JSON [`ProgressEvent`].

use bytes::Bytes;
use tracing::debug;

use crate::event::ProgressEvent;

const DATA_PREFIX: &str = "data:";
const SEPARATOR: &[u8] = b"\n\n";
const FALLBACK_ERROR_RECORD: &str = "data: {\"status\":\"error\",\"error\":\"Upload failed\"}\n\n";

/// Frame a single event as `data: <json>\n\n`.
pub fn encode_record(event: &ProgressEvent) -> Bytes {
    match serde_json::to_string(event) {
        Ok(json) => Bytes::from(format!("{DATA_PREFIX} {json}\n\n")),
        Err(e) => {
            debug!("Failed to encode progress event: {}", e);
            Bytes::from_static(FALLBACK_ERROR_RECORD.as_bytes())
        }
    }
}

/// Frame a terminal error record carrying `message`.
pub fn error_record(message: impl Into<String>) -> Bytes {
    encode_record(&ProgressEvent::error(message))
}

/// Outcome of decoding one complete record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodedRecord {
    Event(ProgressEvent),
    /// Non-data record, malformed JSON or unknown status. Kept for logging only.
    Ignored(String),
}

impl DecodedRecord {
    pub fn into_event(self) -> Option<ProgressEvent> {
        match self {
            DecodedRecord::Event(event) => Some(event),
            DecodedRecord::Ignored(_) => None,
        }
    }
}

/// Incremental decoder for a chunked event stream.
///
/// Bytes are buffered until a record separator arrives, so records (and UTF-8
/// sequences) split across chunks decode exactly once.
#[derive(Debug, Default)]
pub struct EventStreamDecoder {
    buffer: Vec<u8>,
}

impl EventStreamDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one chunk, returning every record it completed, in order.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<DecodedRecord> {
        self.buffer
            .extend(chunk.iter().copied().filter(|b| *b != b'\r'));

        let mut records = Vec::new();
        while let Some(end) = find_separator(&self.buffer) {
            let raw: Vec<u8> = self.buffer.drain(..end + SEPARATOR.len()).collect();
            let raw = &raw[..end];
            if raw.iter().all(u8::is_ascii_whitespace) {
                continue;
            }
            records.push(decode_record(raw));
        }
        records
    }

    /// Whether an unterminated record is waiting for more bytes.
    pub fn has_partial(&self) -> bool {
        !self.buffer.iter().all(u8::is_ascii_whitespace)
    }

    /// Drop whatever is buffered. Returns `true` if an unterminated record was
    /// discarded.
    pub fn finish(&mut self) -> bool {
        let discarded = self.has_partial();
        if discarded {
            debug!(
                "Discarding unterminated event record: {}",
                String::from_utf8_lossy(&self.buffer)
            );
        }
        self.buffer.clear();
        discarded
    }
}

fn find_separator(buffer: &[u8]) -> Option<usize> {
    buffer
        .windows(SEPARATOR.len())
        .position(|window| window == SEPARATOR)
}

fn decode_record(raw: &[u8]) -> DecodedRecord {
    let text = String::from_utf8_lossy(raw);

    let data: Vec<&str> = text
        .split('\n')
        .filter_map(|line| line.strip_prefix(DATA_PREFIX))
        .map(|payload| payload.strip_prefix(' ').unwrap_or(payload))
        .collect();

    if data.is_empty() {
        debug!("Skipping non-data event record: {}", text);
        return DecodedRecord::Ignored(text.into_owned());
    }

    match serde_json::from_str::<ProgressEvent>(&data.join("\n")) {
        Ok(event) => DecodedRecord::Event(event),
        Err(e) => {
            debug!("Skipping malformed event record ({}): {}", e, text);
            DecodedRecord::Ignored(text.into_owned())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn events(records: Vec<DecodedRecord>) -> Vec<ProgressEvent> {
        records
            .into_iter()
            .filter_map(DecodedRecord::into_event)
            .collect()
    }

    #[test]
    fn decodes_sequence_in_order() {
        let mut decoder = EventStreamDecoder::new();
        let records = decoder.push(
            b"data: {\"status\":\"progress\",\"percent\":30}\n\n\
              data: {\"status\":\"progress\",\"percent\":70}\n\n\
              data: {\"status\":\"complete\"}\n\n",
        );
        assert_eq!(
            events(records),
            vec![
                ProgressEvent::progress(30),
                ProgressEvent::progress(70),
                ProgressEvent::complete(),
            ]
        );
        assert!(!decoder.has_partial());
    }

    #[test]
    fn record_split_before_blank_line_decodes_once() {
        let mut decoder = EventStreamDecoder::new();
        assert!(
            decoder
                .push(b"data: {\"status\":\"progress\",\"percent\":55}")
                .is_empty()
        );
        assert!(decoder.has_partial());
        assert!(decoder.push(b"\n").is_empty());

        let records = decoder.push(b"\n");
        assert_eq!(events(records), vec![ProgressEvent::progress(55)]);
        assert!(decoder.push(b"").is_empty());
        assert!(!decoder.has_partial());
    }

    #[test]
    fn record_split_inside_json_and_utf8() {
        let record = "data: {\"status\":\"error\",\"error\":\"Versión duplicada\"}\n\n".as_bytes();
        let split = record.iter().position(|b| *b == 0xC3).unwrap() + 1;

        let mut decoder = EventStreamDecoder::new();
        assert!(decoder.push(&record[..split]).is_empty());
        let records = decoder.push(&record[split..]);
        assert_eq!(
            events(records),
            vec![ProgressEvent::error("Versión duplicada")]
        );
    }

    #[test]
    fn malformed_records_are_skipped_without_stopping() {
        let mut decoder = EventStreamDecoder::new();
        let records = decoder.push(
            b": keep-alive\n\n\
              data: not json\n\n\
              data: {\"status\":\"paused\"}\n\n\
              event: progress\ndata: {\"status\":\"progress\",\"percent\":10}\n\n",
        );
        assert_eq!(records.len(), 4);
        assert_eq!(events(records), vec![ProgressEvent::progress(10)]);
    }

    #[test]
    fn crlf_separators_are_accepted() {
        let mut decoder = EventStreamDecoder::new();
        let records = decoder.push(b"data: {\"status\":\"complete\"}\r\n\r\n");
        assert_eq!(events(records), vec![ProgressEvent::complete()]);
    }

    #[test]
    fn finish_reports_discarded_tail() {
        let mut decoder = EventStreamDecoder::new();
        decoder.push(b"data: {\"status\":\"progress\"");
        assert!(decoder.finish());
        assert!(!decoder.finish());
    }

    #[test]
    fn encoded_records_decode_back() {
        let mut decoder = EventStreamDecoder::new();
        let records = decoder.push(&error_record("Backend said no"));
        assert_eq!(events(records), vec![ProgressEvent::error("Backend said no")]);
        assert_eq!(
            &encode_record(&ProgressEvent::progress(5))[..],
            b"data: {\"status\":\"progress\",\"percent\":5}\n\n"
        );
    }
}
