//! Splits the inbound byte stream into blank-line separated blocks.

use std::io::{self, Read};

use super::TransportError;

const READ_CHUNK: usize = 4096;
const END_COMMAND: &[u8] = b"--END COMMAND--";

/// One line without its terminator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct RawLine {
    pub(crate) bytes: Vec<u8>,
    /// The line ended with a bare LF rather than CRLF.
    pub(crate) bare_lf: bool,
}

/// Lines of one message block, separator excluded.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct RawBlock {
    pub(crate) lines: Vec<RawLine>,
    /// The block is command output closed by the end-of-command marker.
    pub(crate) follows: bool,
}

/// Result of one read attempt.
#[derive(Debug)]
pub(crate) enum Frame {
    Block(RawBlock),
    /// The read poll timed out before a block completed.
    Idle,
}

/// Incremental block reader.
///
/// Partial lines and partial blocks survive a poll timeout, so the reader can
/// be polled repeatedly on a socket with a short read timeout.
pub(crate) struct BlockReader<R> {
    source: R,
    buffer: Vec<u8>,
    current: RawBlock,
}

impl<R: Read> BlockReader<R> {
    pub(crate) const fn new(source: R) -> Self {
        Self {
            source,
            buffer: Vec::new(),
            current: RawBlock {
                lines: Vec::new(),
                follows: false,
            },
        }
    }

    /// Reads the single greeting line sent when the connection opens.
    pub(crate) fn read_greeting(&mut self) -> Result<String, TransportError> {
        loop {
            if let Some(line) = self.take_line() {
                let text = String::from_utf8_lossy(&line.bytes).trim().to_owned();
                if text.is_empty() {
                    continue;
                }
                return Ok(text);
            }
            if !self.fill()? {
                return Err(TransportError::Greeting {
                    line: String::from_utf8_lossy(&self.buffer).into_owned(),
                });
            }
        }
    }

    /// Returns the next complete block, or [`Frame::Idle`] on a poll timeout.
    pub(crate) fn next_frame(&mut self) -> Result<Frame, TransportError> {
        loop {
            while let Some(line) = self.take_line() {
                if let Some(block) = self.push_line(line) {
                    return Ok(Frame::Block(block));
                }
            }
            if !self.fill()? {
                return Ok(Frame::Idle);
            }
        }
    }

    /// Reads more bytes. Returns `false` when the read timed out.
    fn fill(&mut self) -> Result<bool, TransportError> {
        let mut chunk = [0_u8; READ_CHUNK];
        loop {
            match self.source.read(&mut chunk) {
                Ok(0) => return Err(TransportError::Closed),
                Ok(count) => {
                    self.buffer.extend(chunk.iter().take(count));
                    return Ok(true);
                }
                Err(error) if error.kind() == io::ErrorKind::Interrupted => {}
                Err(error)
                    if matches!(
                        error.kind(),
                        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
                    ) =>
                {
                    return Ok(false);
                }
                Err(error) => return Err(TransportError::Io(error)),
            }
        }
    }

    fn take_line(&mut self) -> Option<RawLine> {
        let end = self.buffer.iter().position(|byte| *byte == b'\n')?;
        let mut bytes: Vec<u8> = self.buffer.drain(..=end).collect();
        bytes.pop();
        let bare_lf = bytes.last() != Some(&b'\r');
        if !bare_lf {
            bytes.pop();
        }
        Some(RawLine { bytes, bare_lf })
    }

    fn push_line(&mut self, line: RawLine) -> Option<RawBlock> {
        if self.current.follows {
            if line.bytes.trim_ascii() == END_COMMAND {
                return Some(std::mem::take(&mut self.current));
            }
            self.current.lines.push(line);
            return None;
        }
        if line.bytes.trim_ascii().is_empty() {
            if self.current.lines.is_empty() {
                return None;
            }
            return Some(std::mem::take(&mut self.current));
        }
        if is_follows_header(&line.bytes) {
            self.current.follows = true;
        }
        self.current.lines.push(line);
        None
    }
}

fn is_follows_header(bytes: &[u8]) -> bool {
    let Ok(text) = std::str::from_utf8(bytes) else {
        return false;
    };
    text.split_once(':').is_some_and(|(key, value)| {
        key.trim().eq_ignore_ascii_case("Response") && value.trim().eq_ignore_ascii_case("Follows")
    })
}
