//! Newline framing with bounded memory.
//!
//! [`LineFramer`] is a [`Decoder`] yielding one `String` per non-empty line.
//! Two limits keep a misbehaving peer from growing the buffer:
//!
//! - a line longer than `max_line` is skipped: the framer discards bytes
//!   until the next newline and never yields the line;
//! - if the pending bytes exceed `max_buffer`, the oldest half is dropped and
//!   framing resumes after the next newline.
//!
//! Both events log a warning and bump a counter. Neither is an error: the
//! connection stays open.

use bytes::{Buf, BytesMut};
use tokio_util::codec::Decoder;

pub const MAX_BUFFER_SIZE: usize = 1024 * 1024;
pub const MAX_LINE_LENGTH: usize = 100 * 1024;

#[derive(Debug)]
pub struct LineFramer {
    max_buffer: usize,
    max_line: usize,
    /// Skipping the remainder of an over-long or truncated line.
    discarding: bool,
    /// Bytes already scanned for a newline in the current frame.
    scanned: usize,
    oversized_lines: u64,
    buffer_overflows: u64,
}

impl Default for LineFramer {
    fn default() -> Self {
        Self::new(MAX_BUFFER_SIZE, MAX_LINE_LENGTH)
    }
}

impl LineFramer {
    pub fn new(max_buffer: usize, max_line: usize) -> Self {
        Self {
            max_buffer: max_buffer.max(2),
            max_line: max_line.max(1),
            discarding: false,
            scanned: 0,
            oversized_lines: 0,
            buffer_overflows: 0,
        }
    }

    pub fn oversized_lines(&self) -> u64 {
        self.oversized_lines
    }

    pub fn buffer_overflows(&self) -> u64 {
        self.buffer_overflows
    }

    fn take_line(&mut self, src: &mut BytesMut, newline: usize) -> Option<String> {
        let frame = src.split_to(newline + 1);
        self.scanned = 0;
        if std::mem::take(&mut self.discarding) {
            return None;
        }
        let mut line = &frame[..newline];
        if line.last() == Some(&b'\r') {
            line = &line[..line.len() - 1];
        }
        if line.len() > self.max_line {
            self.oversized_lines += 1;
            tracing::warn!(bytes = line.len(), limit = self.max_line, "skipping over-long line");
            return None;
        }
        let text = String::from_utf8_lossy(line);
        let text = text.trim();
        (!text.is_empty()).then(|| text.to_string())
    }
}

impl Decoder for LineFramer {
    type Item = String;
    type Error = std::io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<String>, Self::Error> {
        loop {
            if let Some(offset) = src[self.scanned..].iter().position(|&b| b == b'\n') {
                let newline = self.scanned + offset;
                match self.take_line(src, newline) {
                    Some(line) => return Ok(Some(line)),
                    None => continue,
                }
            }
            self.scanned = src.len();

            if self.discarding {
                src.clear();
                self.scanned = 0;
                return Ok(None);
            }
            if src.len() > self.max_buffer {
                let half = src.len() / 2;
                src.advance(half);
                self.scanned = 0;
                // The kept half starts mid-line; resync at the next newline.
                self.discarding = true;
                self.buffer_overflows += 1;
                tracing::warn!(
                    dropped = half,
                    limit = self.max_buffer,
                    "receive buffer overflow; dropped oldest half"
                );
                continue;
            }
            if src.len() > self.max_line {
                self.oversized_lines += 1;
                tracing::warn!(
                    bytes = src.len(),
                    limit = self.max_line,
                    "line exceeds limit; skipping to next newline"
                );
                self.discarding = true;
                src.clear();
                self.scanned = 0;
            }
            return Ok(None);
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<String>, Self::Error> {
        if let Some(line) = self.decode(src)? {
            return Ok(Some(line));
        }
        if src.is_empty() || self.discarding {
            src.clear();
            return Ok(None);
        }
        // Unterminated final line.
        src.extend_from_slice(b"\n");
        self.decode(src)
    }
}
