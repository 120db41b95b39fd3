//! Wire frame parser for the change stream
//!
//! Assembles the line-oriented event-stream framing (`event:` / `data:`
//! lines, blank-line terminator) into complete frames.

use tracing::trace;

use super::types::{StreamError, StreamResult};

/// Default bound on an assembling frame, in bytes
pub const DEFAULT_MAX_FRAME_SIZE: usize = 16 * 1024;

/// One complete wire frame: an event name plus its accumulated data
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawFrame {
    /// Wire event name (`put`, `patch`, `keep-alive`, ...)
    pub event: String,
    /// Accumulated `data:` payload; may be empty for control frames
    pub data: String,
}

/// Outcome of feeding one line to the parser
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameResult {
    /// Frame still assembling
    Incomplete,
    /// A frame is ready
    Complete(RawFrame),
    /// Unrecognized field prefix; line ignored, assembly continues
    Skipped,
}

/// Incremental parser state
///
/// The accumulator grows as needed but is bounded by `max_frame_size`; an
/// oversized frame is discarded and reported as
/// [`StreamError::FrameTooLarge`], never silently truncated. Parsing resumes
/// with the next frame.
#[derive(Debug)]
pub struct SseParser {
    /// Buffer for an incomplete trailing line
    line_buffer: Vec<u8>,
    /// Event name of the frame being assembled
    event_name: Option<String>,
    /// Data accumulated for the frame being assembled
    data_buffer: String,
    /// Bound on per-frame accumulation
    max_frame_size: usize,
}

impl Default for SseParser {
    fn default() -> Self {
        Self::with_max_frame_size(DEFAULT_MAX_FRAME_SIZE)
    }
}

impl SseParser {
    /// Create a parser with the default frame-size bound
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a parser with an explicit frame-size bound
    pub fn with_max_frame_size(max_frame_size: usize) -> Self {
        Self {
            line_buffer: Vec::new(),
            event_name: None,
            data_buffer: String::new(),
            max_frame_size,
        }
    }

    /// Feed raw bytes and collect every frame they complete.
    ///
    /// Partial trailing lines are buffered until the newline arrives;
    /// `\r\n` endings are accepted.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<StreamResult<RawFrame>> {
        let mut out = Vec::new();

        self.line_buffer.extend_from_slice(bytes);

        while let Some(pos) = self.line_buffer.iter().position(|&b| b == b'\n') {
            let mut line: Vec<u8> = self.line_buffer.drain(..=pos).collect();
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }

            match std::str::from_utf8(&line) {
                Ok(text) => match self.feed_line(text) {
                    Ok(FrameResult::Complete(frame)) => out.push(Ok(frame)),
                    Ok(_) => {}
                    Err(e) => out.push(Err(e)),
                },
                Err(_) => {
                    out.push(Err(StreamError::Protocol(
                        "invalid UTF-8 in stream line".to_string(),
                    )));
                }
            }
        }

        // A line that never terminates must not grow without bound either.
        if self.line_buffer.len() > self.max_frame_size {
            self.line_buffer.clear();
            self.reset();
            out.push(Err(StreamError::FrameTooLarge {
                limit: self.max_frame_size,
            }));
        }

        out
    }

    /// Feed a single framing line.
    ///
    /// Blank lines dispatch the assembled frame. Comment lines (leading `:`)
    /// are the server's liveness signal and surface as immediate keep-alive
    /// frames without disturbing an in-progress frame. Unrecognized field
    /// prefixes are skipped and assembly continues.
    pub fn feed_line(&mut self, line: &str) -> StreamResult<FrameResult> {
        if line.is_empty() {
            return Ok(self.dispatch());
        }

        if let Some(comment) = line.strip_prefix(':') {
            trace!(comment = comment.trim(), "keep-alive comment");
            return Ok(FrameResult::Complete(RawFrame {
                event: "keep-alive".to_string(),
                data: String::new(),
            }));
        }

        let (field, value) = match line.find(':') {
            Some(pos) => {
                let (field, rest) = line.split_at(pos);
                // Skip the colon and exactly one leading space
                let rest = &rest[1..];
                (field, rest.strip_prefix(' ').unwrap_or(rest))
            }
            None => (line, ""),
        };

        match field {
            "event" => {
                self.check_capacity(value.len())?;
                self.event_name = Some(value.to_string());
                Ok(FrameResult::Incomplete)
            }
            "data" => {
                self.check_capacity(value.len() + 1)?;
                // Multiple data lines before the terminator are joined
                if !self.data_buffer.is_empty() {
                    self.data_buffer.push('\n');
                }
                self.data_buffer.push_str(value);
                Ok(FrameResult::Incomplete)
            }
            other => {
                trace!(field = other, "unrecognized stream field");
                Ok(FrameResult::Skipped)
            }
        }
    }

    fn check_capacity(&mut self, incoming: usize) -> StreamResult<()> {
        let held = self.data_buffer.len() + self.event_name.as_deref().map_or(0, str::len);
        if held + incoming > self.max_frame_size {
            self.reset();
            return Err(StreamError::FrameTooLarge {
                limit: self.max_frame_size,
            });
        }
        Ok(())
    }

    fn dispatch(&mut self) -> FrameResult {
        // A blank line with nothing accumulated separates frames.
        if self.event_name.is_none() && self.data_buffer.is_empty() {
            return FrameResult::Incomplete;
        }
        FrameResult::Complete(RawFrame {
            event: self.event_name.take().unwrap_or_default(),
            data: std::mem::take(&mut self.data_buffer),
        })
    }

    fn reset(&mut self) {
        self.event_name = None;
        self.data_buffer.clear();
    }
}
