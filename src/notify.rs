use async_trait::async_trait;
use tokio::sync::broadcast;
use tracing::info;

use crate::engine::EngineError;

const OUTBOX_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub filename: String,
    pub content: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mail {
    pub to: String,
    pub subject: String,
    pub body: String,
    pub attachments: Vec<Attachment>,
}

/// Outbound mail. Delivery is best-effort; callers log failures and move on.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, mail: Mail) -> Result<(), EngineError>;
}

/// Writes each mail to the log instead of delivering it.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, mail: Mail) -> Result<(), EngineError> {
        info!(
            to = %mail.to,
            subject = %mail.subject,
            attachments = mail.attachments.len(),
            "mail queued"
        );
        Ok(())
    }
}

/// Fans mails out to in-process subscribers (a delivery worker, or a test).
pub struct ChannelNotifier {
    tx: broadcast::Sender<Mail>,
}

impl ChannelNotifier {
    pub fn new() -> Self {
        Self {
            tx: broadcast::channel(OUTBOX_CAPACITY).0,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Mail> {
        self.tx.subscribe()
    }
}

impl Default for ChannelNotifier {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Notifier for ChannelNotifier {
    async fn send(&self, mail: Mail) -> Result<(), EngineError> {
        self.tx
            .send(mail)
            .map(|_| ())
            .map_err(|_| EngineError::Upstream("no mail subscriber".into()))
    }
}
