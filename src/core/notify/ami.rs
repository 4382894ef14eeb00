//! Asterisk Manager Interface session.
//!
//! One session per call: banner, `Login`, `Originate`. Requests are blocks of
//! `Key: Value` lines, each CRLF-terminated, closed by an empty line.
//! Responses are only searched for the literal success marker. Blocks without
//! a `Response:` header (greeting extras, unsolicited events) are skipped.

use std::time::Duration;

use lazy_static::lazy_static;
use log::debug;
use regex::Regex;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};

use super::framing::{FrameReader, CRLF};
use super::NotifyError;

pub const BANNER_PREFIX: &str = "Asterisk";
pub const SUCCESS_MARKER: &str = "Success";
const RESPONSE_HEADER: &str = "Response:";

lazy_static! {
    static ref BANNER_VERSION: Regex = Regex::new(r"^Asterisk Call Manager/(\S+)").unwrap();
}

/// A manager request block.
#[derive(Debug, Clone)]
pub struct Action {
    fields: Vec<(String, String)>,
}

impl Action {
    pub fn new(name: &str) -> Self {
        Self {
            fields: vec![("Action".to_string(), clean(name))],
        }
    }

    pub fn field(mut self, key: &str, value: &str) -> Self {
        self.fields.push((clean(key), clean(value)));
        self
    }

    pub fn encode(&self) -> String {
        let mut out = String::new();
        for (key, value) in &self.fields {
            out.push_str(key);
            out.push_str(": ");
            out.push_str(value);
            out.push_str("\r\n");
        }
        out.push_str("\r\n");
        out
    }
}

/// Line breaks inside a value would end the line, or the whole block, early.
fn clean(value: &str) -> String {
    value.chars().filter(|c| *c != '\r' && *c != '\n').collect()
}

/// Version from a banner like `Asterisk Call Manager/5.0.1`.
pub fn banner_version(banner: &str) -> Option<&str> {
    BANNER_VERSION
        .captures(banner)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
}

pub struct AmiSession<S> {
    reader: FrameReader<ReadHalf<S>>,
    writer: WriteHalf<S>,
    timeout: Duration,
}

impl<S: AsyncRead + AsyncWrite> AmiSession<S> {
    pub fn new(stream: S, timeout: Duration) -> Self {
        let (read, write) = tokio::io::split(stream);
        Self {
            reader: FrameReader::new(read, timeout),
            writer: write,
            timeout,
        }
    }

    /// Wait for the greeting line and check it names the expected protocol.
    ///
    /// Only the first line is consumed here, since Asterisk sends nothing more
    /// until it sees a request. Any header lines a peer sends after it are
    /// dropped by `request` when it looks for the reply.
    pub async fn expect_banner(&mut self) -> Result<String, NotifyError> {
        let frame = self.reader.read_frame(CRLF).await?;
        if !frame.complete {
            return Err(NotifyError::Closed);
        }
        let banner = frame.text.trim().to_string();
        if !banner.starts_with(BANNER_PREFIX) {
            return Err(NotifyError::Banner(banner));
        }
        debug!(
            "Manager interface version {}",
            banner_version(&banner).unwrap_or("unknown")
        );
        Ok(banner)
    }

    pub async fn login(&mut self, username: &str, secret: &str) -> Result<(), NotifyError> {
        let action = Action::new("Login")
            .field("Username", username)
            .field("Secret", secret);
        let response = self.request(&action).await?;
        if response.contains(SUCCESS_MARKER) {
            Ok(())
        } else {
            Err(NotifyError::LoginRejected(response))
        }
    }

    /// Place an async call on `channel` that plays `message`. Returns the raw response.
    pub async fn originate(&mut self, channel: &str, message: &str) -> Result<String, NotifyError> {
        let action = Action::new("Originate")
            .field("Channel", channel)
            .field("Application", "Playback")
            .field("Data", message)
            .field("Async", "true");
        let response = self.request(&action).await?;
        if response.contains(SUCCESS_MARKER) {
            Ok(response)
        } else {
            Err(NotifyError::OriginateRejected(response))
        }
    }

    async fn request(&mut self, action: &Action) -> Result<String, NotifyError> {
        let bytes = action.encode();
        match tokio::time::timeout(self.timeout, self.writer.write_all(bytes.as_bytes())).await {
            Ok(written) => written?,
            Err(_) => return Err(NotifyError::Timeout),
        }
        loop {
            let frame = self.reader.read_block().await?;
            if !frame.complete {
                return Err(NotifyError::Closed);
            }
            if is_response(&frame.text) {
                return Ok(frame.text);
            }
            debug!("Skipping manager block without a response header: {:?}", frame.text);
        }
    }
}

fn is_response(block: &str) -> bool {
    block
        .lines()
        .any(|line| line.trim_start().starts_with(RESPONSE_HEADER))
}
