//! Textual segmentation of a chunked stream into complete lines.
//!
//! Nothing in here looks at JSON. A line is only emitted once its delimiter
//! has arrived; whatever follows the last delimiter waits in the buffer for
//! the next chunk.

use std::borrow::Cow;

pub const DEFAULT_DELIMITER: char = '\n';

/// Line splitter over already-decoded text chunks.
#[derive(Debug, Clone)]
pub struct LineDecoder {
    buffer: String,
    delimiter: char,
}

impl Default for LineDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl LineDecoder {
    pub fn new() -> Self {
        Self::with_delimiter(DEFAULT_DELIMITER)
    }

    pub fn with_delimiter(delimiter: char) -> Self {
        Self {
            buffer: String::new(),
            delimiter,
        }
    }

    pub fn delimiter(&self) -> char {
        self.delimiter
    }

    /// Text received after the last delimiter.
    pub fn pending(&self) -> &str {
        &self.buffer
    }

    /// Appends `chunk` and returns every line it completed, trimmed, in order.
    ///
    /// Blank lines are dropped here and never reach the parser.
    pub fn push(&mut self, chunk: &str) -> Vec<String> {
        let searched_from = self.buffer.len();
        self.buffer.push_str(chunk);

        // Only the appended text can contain a delimiter the buffer did not already consume.
        let Some(relative) = self.buffer[searched_from..].rfind(self.delimiter) else {
            return Vec::new();
        };
        let last_delimiter = searched_from + relative;

        let lines = self.buffer[..last_delimiter]
            .split(self.delimiter)
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_owned)
            .collect();

        self.buffer
            .drain(..last_delimiter + self.delimiter.len_utf8());
        lines
    }

    /// Ends the stream, discarding any unterminated fragment.
    ///
    /// Returns the length in bytes of the discarded fragment, ignoring
    /// surrounding whitespace.
    pub fn finish(self) -> usize {
        self.buffer.trim().len()
    }
}

/// Byte-level front of [`LineDecoder`].
///
/// Multi-byte UTF-8 sequences split across chunks are held back until the
/// rest arrives. Bytes that can never form valid UTF-8 become U+FFFD.
#[derive(Debug, Clone, Default)]
pub struct ChunkDecoder {
    lines: LineDecoder,
    incomplete: Vec<u8>,
}

impl ChunkDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delimiter(delimiter: char) -> Self {
        Self {
            lines: LineDecoder::with_delimiter(delimiter),
            incomplete: Vec::new(),
        }
    }

    pub fn push_bytes(&mut self, chunk: &[u8]) -> Vec<String> {
        let text = self.decode_utf8(chunk);
        self.lines.push(&text)
    }

    pub fn push_str(&mut self, chunk: &str) -> Vec<String> {
        if self.incomplete.is_empty() {
            return self.lines.push(chunk);
        }
        self.push_bytes(chunk.as_bytes())
    }

    /// Bytes currently held back: the unterminated line plus any partial character.
    pub fn pending_len(&self) -> usize {
        self.lines.pending().len() + self.incomplete.len()
    }

    pub fn finish(self) -> usize {
        self.lines.finish() + self.incomplete.len()
    }

    fn decode_utf8(&mut self, chunk: &[u8]) -> String {
        let bytes: Cow<'_, [u8]> = if self.incomplete.is_empty() {
            Cow::Borrowed(chunk)
        } else {
            let mut joined = std::mem::take(&mut self.incomplete);
            joined.extend_from_slice(chunk);
            Cow::Owned(joined)
        };

        let mut text = String::with_capacity(bytes.len());
        let mut rest: &[u8] = &bytes;
        loop {
            match std::str::from_utf8(rest) {
                Ok(valid) => {
                    text.push_str(valid);
                    break;
                }
                Err(error) => {
                    let (valid, tail) = rest.split_at(error.valid_up_to());
                    text.push_str(&String::from_utf8_lossy(valid));
                    match error.error_len() {
                        Some(invalid_len) => {
                            text.push(char::REPLACEMENT_CHARACTER);
                            rest = &tail[invalid_len..];
                        }
                        None => {
                            self.incomplete = tail.to_vec();
                            break;
                        }
                    }
                }
            }
        }
        text
    }
}
