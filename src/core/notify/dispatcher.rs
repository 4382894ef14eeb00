//! Voice dispatcher.
//!
//! Routes every call either to the manager interface (host, user, secret and
//! destination all configured) or to a simulated announcement. Neither path
//! retries or queues; the alert is already stored by the time this runs.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, error, info, warn};
use tokio::net::TcpStream;
use tokio::process::Command;

use super::ami::AmiSession;
use super::message::announcement;
use super::{Notifier, NotifyError};
use crate::core::alerts::model::AlertRecord;
use crate::core::config::{AmiSettings, Secret};

/// Timeout for connecting and for every socket read/write.
pub const AMI_IO_TIMEOUT: Duration = Duration::from_secs(10);
/// Upper bound on a simulated announcement.
const TTS_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryPath {
    Manager,
    Simulated,
}

impl DeliveryPath {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Manager => "ami",
            Self::Simulated => "simulated",
        }
    }
}

/// Everything needed to place a real call.
#[derive(Debug, Clone)]
struct ManagerEndpoint {
    host: String,
    port: u16,
    username: String,
    secret: Secret,
    channel: String,
}

impl ManagerEndpoint {
    fn from_settings(ami: &AmiSettings) -> Option<Self> {
        if !ami.is_complete() {
            return None;
        }
        Some(Self {
            host: ami.host.clone()?,
            port: ami.port,
            username: ami.username.clone()?,
            secret: ami.secret.clone()?,
            channel: format!("{}/{}", ami.channel_tech, ami.destination.as_deref()?),
        })
    }

    fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

pub struct VoiceDispatcher {
    endpoint: Option<ManagerEndpoint>,
    destination: Option<String>,
    tts_command: Option<String>,
    io_timeout: Duration,
}

impl VoiceDispatcher {
    pub fn new(ami: &AmiSettings, tts_command: Option<String>) -> Self {
        let endpoint = ManagerEndpoint::from_settings(ami);
        if endpoint.is_none() {
            warn!("Asterisk AMI configuration incomplete, voice alerts will be simulated");
        }
        Self {
            endpoint,
            destination: ami.destination.clone(),
            tts_command,
            io_timeout: AMI_IO_TIMEOUT,
        }
    }

    pub fn with_io_timeout(mut self, timeout: Duration) -> Self {
        self.io_timeout = timeout;
        self
    }

    pub fn path(&self) -> DeliveryPath {
        if self.endpoint.is_some() {
            DeliveryPath::Manager
        } else {
            DeliveryPath::Simulated
        }
    }

    /// Deliver and report which path was used, or why it failed.
    pub async fn deliver(&self, alert: &AlertRecord) -> Result<DeliveryPath, NotifyError> {
        let message = announcement(alert);
        match &self.endpoint {
            Some(endpoint) => {
                let response = self.call(endpoint, &message).await?;
                info!("Voice alert sent for case {}", alert.alert_id);
                debug!("Originate response: {}", response);
                Ok(DeliveryPath::Manager)
            }
            None => {
                self.simulate(&message).await;
                Ok(DeliveryPath::Simulated)
            }
        }
    }

    async fn call(&self, endpoint: &ManagerEndpoint, message: &str) -> Result<String, NotifyError> {
        let addr = endpoint.addr();
        let stream = match tokio::time::timeout(self.io_timeout, TcpStream::connect(&addr)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(source)) => return Err(NotifyError::Connect { addr, source }),
            Err(_) => return Err(NotifyError::Timeout),
        };

        // The session owns the socket; it closes when this scope ends on any path.
        let mut session = AmiSession::new(stream, self.io_timeout);
        session.expect_banner().await?;
        session
            .login(&endpoint.username, endpoint.secret.expose())
            .await?;
        session.originate(&endpoint.channel, message).await
    }

    async fn simulate(&self, message: &str) {
        info!("SIMULATED VOIP CALL");
        info!("   To: {}", self.destination.as_deref().unwrap_or("Unknown"));
        info!("   Message: {}", message);

        let Some(command) = self.tts_command.as_deref() else {
            info!("   Text-to-speech not available on this system");
            return;
        };
        match speak(command, message).await {
            Ok(()) => info!("   Voice message played"),
            Err(e) => info!("   Text-to-speech not available: {}", e),
        }
    }
}

/// Run `command` with the message as its last argument. `command` is split
/// on whitespace, so `say -v Alex -r 150` passes voice and rate through.
async fn speak(command: &str, message: &str) -> std::io::Result<()> {
    let mut parts = command.split_whitespace();
    let program = parts.next().ok_or_else(|| {
        std::io::Error::new(std::io::ErrorKind::InvalidInput, "empty speech command")
    })?;
    let mut child = Command::new(program)
        .args(parts)
        .arg(message)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .spawn()?;
    match tokio::time::timeout(TTS_TIMEOUT, child.wait()).await {
        Ok(status) => {
            let status = status?;
            if status.success() {
                Ok(())
            } else {
                Err(std::io::Error::new(
                    std::io::ErrorKind::Other,
                    format!("{} exited with {}", program, status),
                ))
            }
        }
        Err(_) => Err(std::io::Error::new(
            std::io::ErrorKind::TimedOut,
            format!("{} timed out", program),
        )),
    }
}

#[async_trait]
impl Notifier for VoiceDispatcher {
    async fn notify(&self, alert: &AlertRecord) -> bool {
        match self.deliver(alert).await {
            Ok(_) => true,
            Err(e) => {
                error!("Voice alert for case {} failed: {}", alert.alert_id, e);
                false
            }
        }
    }
}
