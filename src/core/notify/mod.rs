//! Voice notification dispatch.
//!
//! - framing.rs: terminator-delimited frame reader over any async stream
//! - ami.rs: Asterisk Manager Interface session (banner, login, originate)
//! - message.rs: PHI-free announcement text
//! - dispatcher.rs: config gate, TCP transport and simulated fallback

pub mod ami;
pub mod dispatcher;
pub mod framing;
pub mod message;

use async_trait::async_trait;
use thiserror::Error;

use crate::core::alerts::model::AlertRecord;

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("connect to {addr} failed: {source}")]
    Connect {
        addr: String,
        #[source]
        source: std::io::Error,
    },
    #[error("timed out waiting for the manager interface")]
    Timeout,
    #[error("manager interface closed the connection")]
    Closed,
    #[error("unexpected banner {0:?}")]
    Banner(String),
    #[error("login rejected: {0:?}")]
    LoginRejected(String),
    #[error("originate rejected: {0:?}")]
    OriginateRejected(String),
    #[error("frame exceeded {0} bytes")]
    FrameTooLarge(usize),
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

/// Anything that can deliver an alert notification.
///
/// Delivery is best-effort: `false` means the attempt failed and was logged.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, alert: &AlertRecord) -> bool;
}
