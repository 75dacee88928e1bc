//! Incremental per-connection frame decoder.
//!
//! TCP is a *stream* protocol: a single read may return half a line, several
//! lines, or a file header together with the first bytes of its payload.  The
//! decoder accumulates everything it is fed and hands back frames as soon as
//! they are complete.
//!
//! # Modes
//!
//! ```text
//!            FILE|name|N (N > 0)
//!   Text  ─────────────────────────►  Binary { remaining: N }
//!    ▲                                        │
//!    └────────────── remaining == 0 ──────────┘
//! ```
//!
//! In `Text` mode the buffer is scanned for `\n` and each complete line is
//! classified.  A file header switches the decoder to `Binary` mode *at the
//! delimiter*: whatever follows the header in the same read is payload and is
//! never re-parsed as text.  In `Binary` mode the next `remaining` bytes are
//! handed out as [`Frame::BinaryChunk`]s, after which any further bytes are
//! parsed as text again within the same call.
//!
//! The decoder never performs I/O.  End of stream is detected by the caller
//! (a read returning 0 bytes), not by the decoder.

use tracing::debug;

use crate::protocol::frame::{Frame, LINE_DELIMITER};

/// Longest text line the decoder buffers before giving up on it.
///
/// A longer line is reported once as [`Frame::Unknown`] holding its first
/// `MAX_LINE_LEN` bytes, and the remainder up to the next delimiter is dropped.
pub const MAX_LINE_LEN: usize = 64 * 1024;

/// The decoder's current parsing mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DecoderMode {
    /// Scanning for `\n`-terminated lines.
    #[default]
    Text,
    /// Passing raw payload bytes through.
    Binary { remaining: u64 },
}

/// Turns a raw byte stream into a sequence of [`Frame`]s.
///
/// # Examples
///
/// ```rust
/// use relay_core::{Frame, FrameDecoder};
///
/// let mut decoder = FrameDecoder::new();
/// assert_eq!(decoder.feed(b"USER|Al").count(), 0);
///
/// let frames: Vec<Frame> = decoder.feed(b"ice\nFILE|a.bin|3\nxyzMSG|Alice: hi\n").collect();
/// assert_eq!(frames.len(), 4);
/// assert_eq!(frames[2], Frame::BinaryChunk { bytes: b"xyz".to_vec() });
/// ```
#[derive(Debug, Default)]
pub struct FrameDecoder {
    /// Bytes fed but not yet turned into frames, starting at `pos`.
    buf: Vec<u8>,
    /// Read cursor into `buf`.
    pos: usize,
    /// Number of bytes after `pos` already known to contain no delimiter.
    scanned: usize,
    mode: DecoderMode,
    /// Set after an over-long line was reported; its tail is skipped.
    discarding_line: bool,
}

impl FrameDecoder {
    /// Creates a decoder in [`DecoderMode::Text`] with an empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the current mode.
    pub fn mode(&self) -> DecoderMode {
        self.mode
    }

    /// Number of bytes buffered but not yet emitted as frames.
    pub fn buffered_len(&self) -> usize {
        self.buf.len() - self.pos
    }

    /// Appends `input` and returns an iterator over the frames now available.
    ///
    /// The iterator is lazy: frames it does not yield before being dropped
    /// stay buffered and come out of the next `feed` call.  Feeding an empty
    /// slice just drains whatever is already buffered.
    pub fn feed(&mut self, input: &[u8]) -> Frames<'_> {
        self.buf.extend_from_slice(input);
        Frames { decoder: self }
    }

    /// Decodes the next complete frame from the buffer, if there is one.
    pub fn next_frame(&mut self) -> Option<Frame> {
        loop {
            match self.mode {
                DecoderMode::Binary { remaining } => return self.next_chunk(remaining),
                DecoderMode::Text => match self.next_line() {
                    LineStep::Frame(frame) => return Some(frame),
                    LineStep::Skipped => continue,
                    LineStep::NeedMore => {
                        self.compact();
                        return None;
                    }
                },
            }
        }
    }

    fn next_chunk(&mut self, remaining: u64) -> Option<Frame> {
        let available = self.buffered_len();
        if available == 0 {
            self.compact();
            return None;
        }

        let take = usize::try_from(remaining).map_or(available, |r| r.min(available));
        let bytes = self.buf[self.pos..self.pos + take].to_vec();
        self.pos += take;
        self.scanned = 0;

        let remaining = remaining - take as u64;
        self.mode = if remaining == 0 {
            DecoderMode::Text
        } else {
            DecoderMode::Binary { remaining }
        };
        Some(Frame::BinaryChunk { bytes })
    }

    fn next_line(&mut self) -> LineStep {
        let unread = &self.buf[self.pos..];
        let search_from = self.scanned.min(unread.len());
        let found = unread[search_from..]
            .iter()
            .position(|&b| b == LINE_DELIMITER)
            .map(|offset| search_from + offset);

        let Some(line_len) = found else {
            return self.await_delimiter();
        };

        let line_start = self.pos;
        self.pos += line_len + 1;
        self.scanned = 0;

        if self.discarding_line {
            self.discarding_line = false;
            return LineStep::Skipped;
        }

        let line = &self.buf[line_start..line_start + line_len];
        if line_len > MAX_LINE_LEN {
            return LineStep::Frame(oversized_line(&line[..MAX_LINE_LEN]));
        }

        match Frame::from_line(&String::from_utf8_lossy(line)) {
            Some(frame) => {
                if let Frame::FileHeader { size, .. } = &frame {
                    if *size > 0 {
                        self.mode = DecoderMode::Binary { remaining: *size };
                    }
                }
                LineStep::Frame(frame)
            }
            None => LineStep::Skipped,
        }
    }

    /// Handles a buffer that holds no delimiter yet.
    fn await_delimiter(&mut self) -> LineStep {
        let unread_len = self.buffered_len();

        if self.discarding_line {
            self.pos = self.buf.len();
            self.scanned = 0;
            return LineStep::NeedMore;
        }

        if unread_len > MAX_LINE_LEN {
            let frame = oversized_line(&self.buf[self.pos..self.pos + MAX_LINE_LEN]);
            self.pos = self.buf.len();
            self.scanned = 0;
            self.discarding_line = true;
            return LineStep::Frame(frame);
        }

        self.scanned = unread_len;
        LineStep::NeedMore
    }

    /// Drops consumed bytes from the front of the buffer.
    fn compact(&mut self) {
        if self.pos == self.buf.len() {
            self.buf.clear();
        } else if self.pos > 0 {
            self.buf.drain(..self.pos);
        }
        self.pos = 0;
    }
}

enum LineStep {
    Frame(Frame),
    Skipped,
    NeedMore,
}

fn oversized_line(prefix: &[u8]) -> Frame {
    debug!(limit = MAX_LINE_LEN, "text line exceeds limit; reporting as unknown");
    Frame::Unknown {
        raw: String::from_utf8_lossy(prefix).into_owned(),
    }
}

/// Lazy iterator over the frames produced by one [`FrameDecoder::feed`] call.
#[derive(Debug)]
pub struct Frames<'a> {
    decoder: &'a mut FrameDecoder,
}

impl Iterator for Frames<'_> {
    type Item = Frame;

    fn next(&mut self) -> Option<Frame> {
        self.decoder.next_frame()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
