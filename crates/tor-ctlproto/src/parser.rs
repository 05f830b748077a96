//! The reply-stream state machine.
//!
//! Bytes in, frames out.  Each reply line is `XYZ<sep>payload`, where
//! `<sep>` is a space (final line), a dash (more lines follow), or a
//! plus (a dot-terminated data block follows).  Lines with a `6xx`
//! status accumulate into asynchronous events, independently of the
//! lines of whatever command reply is being assembled; a `6xx` frame
//! never terminates a command reply.

use crate::err::ProtocolError;
use crate::event::AsyncEvent;
use crate::reply::{Reply, ReplyLine};
use crate::status::ReplyStatus;

/// A completed frame from the stream.
#[derive(Clone, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub enum Frame {
    /// A command's complete reply.
    Sync(Reply),
    /// An asynchronous event.
    Async(AsyncEvent),
}

/// An open dot-terminated data block.
#[derive(Clone, Debug)]
struct DataBlock {
    /// Status of the `+` line that opened the block.
    status: ReplyStatus,
    /// Payload of the `+` line.
    payload: String,
    /// Block lines collected so far, dot-unescaped.
    lines: Vec<String>,
}

/// Incremental parser over the control connection's read stream.
#[derive(Debug, Default)]
pub struct ReplyParser {
    /// Bytes of an incomplete trailing line.
    buf: Vec<u8>,
    /// Lines of the synchronous reply being assembled.
    sync_lines: Vec<ReplyLine>,
    /// Lines of the asynchronous event being assembled.
    async_lines: Vec<ReplyLine>,
    /// The open data block, if a `+` line is being continued.
    data: Option<DataBlock>,
}

impl ReplyParser {
    /// Return a parser with no buffered state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Consume `bytes`, appending completed frames to `out`.
    pub fn feed(&mut self, bytes: &[u8], out: &mut Vec<Frame>) -> Result<(), ProtocolError> {
        self.buf.extend_from_slice(bytes);
        while let Some(nl) = self.buf.iter().position(|b| *b == b'\n') {
            let mut line: Vec<u8> = self.buf.drain(..=nl).collect();
            line.pop(); // the newline
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            let line = String::from_utf8(line)
                .map_err(|e| ProtocolError::MalformedLine(format!("not UTF-8: {e}")))?;
            self.handle_line(&line, out)?;
        }
        Ok(())
    }

    /// Note that the stream has ended.  An open data block or a
    /// partially-assembled reply at EOF is a framing violation.
    pub fn finish(&self) -> Result<(), ProtocolError> {
        if self.data.is_some() {
            return Err(ProtocolError::TruncatedDataBlock);
        }
        if !self.buf.is_empty() || !self.sync_lines.is_empty() || !self.async_lines.is_empty() {
            return Err(ProtocolError::MalformedLine(
                "stream ended mid-reply".to_owned(),
            ));
        }
        Ok(())
    }

    /// Process one complete line.
    fn handle_line(&mut self, line: &str, out: &mut Vec<Frame>) -> Result<(), ProtocolError> {
        if self.data.is_some() {
            if line == "." {
                let block = self.data.take().expect("data checked above");
                let status = block.status;
                let reply_line = ReplyLine {
                    status,
                    payload: block.payload,
                    data: Some(block.lines),
                };
                // A `+` line never terminates its reply; the final line
                // is still to come.
                if status.is_async() {
                    self.async_lines.push(reply_line);
                } else {
                    self.sync_lines.push(reply_line);
                }
            } else {
                // Within a block, a leading dot is escaped by doubling.
                let content = line.strip_prefix('.').filter(|_| line.starts_with(".."));
                let block = self.data.as_mut().expect("data checked above");
                block.lines.push(content.unwrap_or(line).to_owned());
            }
            return Ok(());
        }

        let (status, sep, payload) = split_line(line)?;
        match sep {
            b'+' => {
                self.data = Some(DataBlock {
                    status,
                    payload: payload.to_owned(),
                    lines: Vec::new(),
                });
            }
            b'-' => {
                let reply_line = ReplyLine::new(status, payload);
                if status.is_async() {
                    self.async_lines.push(reply_line);
                } else {
                    self.sync_lines.push(reply_line);
                }
            }
            b' ' => {
                let reply_line = ReplyLine::new(status, payload);
                if status.is_async() {
                    self.async_lines.push(reply_line);
                    let lines = std::mem::take(&mut self.async_lines);
                    out.push(Frame::Async(AsyncEvent::from_lines(lines)));
                } else {
                    self.sync_lines.push(reply_line);
                    let lines = std::mem::take(&mut self.sync_lines);
                    out.push(Frame::Sync(Reply::from_lines(lines)));
                }
            }
            _ => unreachable!("split_line only yields the three separators"),
        }
        Ok(())
    }
}

/// Split a reply line into status code, separator, and payload.
fn split_line(line: &str) -> Result<(ReplyStatus, u8, &str), ProtocolError> {
    let bytes = line.as_bytes();
    if bytes.len() < 4
        || !bytes[..3].iter().all(u8::is_ascii_digit)
        || !matches!(bytes[3], b' ' | b'-' | b'+')
    {
        return Err(ProtocolError::MalformedLine(line.to_owned()));
    }
    let code: u16 = line[..3]
        .parse()
        .map_err(|_| ProtocolError::MalformedLine(line.to_owned()))?;
    Ok((ReplyStatus::from(code), bytes[3], &line[4..]))
}
