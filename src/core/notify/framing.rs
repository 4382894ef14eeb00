//! Terminator-delimited frame reader.
//!
//! Accumulates bytes from any `AsyncRead` until a terminator shows up, the
//! peer closes, or a read times out. Bytes received past the terminator are
//! kept for the next frame.

use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt};

use super::NotifyError;

pub const CRLF: &[u8] = b"\r\n";
/// End of a manager-protocol message block.
pub const BLOCK_END: &[u8] = b"\r\n\r\n";
/// Frames larger than this abort the exchange.
pub const MAX_FRAME_LEN: usize = 64 * 1024;

const READ_CHUNK: usize = 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Decoded text, terminator excluded
    pub text: String,
    /// False when the peer closed before sending the terminator
    pub complete: bool,
}

pub struct FrameReader<R> {
    inner: R,
    buf: Vec<u8>,
    timeout: Duration,
    eof: bool,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(inner: R, timeout: Duration) -> Self {
        Self {
            inner,
            buf: Vec::new(),
            timeout,
            eof: false,
        }
    }

    /// Read up to and including `terminator`.
    ///
    /// If the peer closes first, whatever was buffered is returned with
    /// `complete == false`.
    pub async fn read_frame(&mut self, terminator: &[u8]) -> Result<Frame, NotifyError> {
        self.read_until(terminator, false).await
    }

    /// Read one message block, ignoring blank lines that precede it.
    pub async fn read_block(&mut self) -> Result<Frame, NotifyError> {
        self.read_until(BLOCK_END, true).await
    }

    async fn read_until(&mut self, terminator: &[u8], skip_blank: bool) -> Result<Frame, NotifyError> {
        loop {
            if skip_blank {
                self.skip_leading_crlf();
            }
            if let Some(pos) = find(&self.buf, terminator) {
                let rest = self.buf.split_off(pos + terminator.len());
                let frame = std::mem::replace(&mut self.buf, rest);
                return Ok(Frame {
                    text: decode(&frame[..pos]),
                    complete: true,
                });
            }
            if self.eof {
                let frame = std::mem::take(&mut self.buf);
                return Ok(Frame {
                    text: decode(&frame),
                    complete: false,
                });
            }
            if self.buf.len() > MAX_FRAME_LEN {
                return Err(NotifyError::FrameTooLarge(self.buf.len()));
            }
            self.fill().await?;
        }
    }

    fn skip_leading_crlf(&mut self) {
        let mut start = 0;
        while self.buf[start..].starts_with(CRLF) {
            start += CRLF.len();
        }
        if start > 0 {
            self.buf.drain(..start);
        }
    }

    async fn fill(&mut self) -> Result<(), NotifyError> {
        let mut chunk = [0u8; READ_CHUNK];
        let n = match tokio::time::timeout(self.timeout, self.inner.read(&mut chunk)).await {
            Ok(read) => read?,
            Err(_) => return Err(NotifyError::Timeout),
        };
        if n == 0 {
            self.eof = true;
        } else {
            self.buf.extend_from_slice(&chunk[..n]);
        }
        Ok(())
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}

fn decode(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).into_owned()
}
