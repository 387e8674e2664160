//! Chunk-boundary independent record splitter.

use bytes::{Buf, BytesMut};
use memchr::memmem::Finder;
use tracing::debug;

use super::{constants::RECORD_DELIMITER, message::Message};

/// Incremental parser that turns arbitrarily sized byte chunks into records.
///
/// The internal buffer only ever holds the bytes after the last complete
/// delimiter seen so far. Feeding a stream in one call or split at any byte
/// positions produces the same ordered sequence of records.
#[derive(Debug, Clone)]
pub struct EventSourceParser {
    buffer: BytesMut,
    finder: Finder<'static>,
}

impl Default for EventSourceParser {
    fn default() -> Self {
        Self::new()
    }
}

impl EventSourceParser {
    /// Create a parser with an empty buffer.
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::new(),
            finder: Finder::new(RECORD_DELIMITER),
        }
    }

    /// Append `chunk` and return every record completed by it.
    ///
    /// A record is the text between two delimiters. Spans that are not valid
    /// UTF-8 are skipped; the parser carries on with the next span.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<String> {
        if chunk.is_empty() {
            return Vec::new();
        }

        // The buffer never contains a full delimiter, but its last byte may be
        // the first half of one.
        let mut search_from = self
            .buffer
            .len()
            .saturating_sub(RECORD_DELIMITER.len() - 1);
        self.buffer.extend_from_slice(chunk);

        let mut records = Vec::new();
        let mut record_start = 0;
        while let Some(offset) = self.finder.find(&self.buffer[search_from..]) {
            let record_end = search_from + offset;
            match std::str::from_utf8(&self.buffer[record_start..record_end]) {
                Ok(record) => records.push(record.to_owned()),
                Err(error) => debug!(
                    len = record_end - record_start,
                    error = %error,
                    "Dropping event stream record with invalid UTF-8"
                ),
            }
            record_start = record_end + RECORD_DELIMITER.len();
            search_from = record_start;
        }

        self.buffer.advance(record_start);
        records
    }

    /// Append `chunk` and return the messages of every record completed by it.
    pub fn parse(&mut self, chunk: &[u8]) -> Vec<Message> {
        self.feed(chunk)
            .iter()
            .map(|record| Message::parse(record))
            .collect()
    }

    /// Number of bytes waiting for a delimiter.
    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    /// The bytes waiting for a delimiter.
    pub fn buffered(&self) -> &[u8] {
        &self.buffer
    }

    /// Drop any partially received record.
    pub fn reset(&mut self) {
        self.buffer.clear();
    }
}
