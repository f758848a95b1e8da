//! Outbound notification sink

use async_trait::async_trait;
use flipper_core::FlipperResult;

/// Fire-and-forget delivery of plain-text announcements.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, text: &str) -> FlipperResult<()>;
}

/// Deliver a notification, logging instead of propagating a failure.
pub async fn announce(notifier: &dyn Notifier, text: &str) {
    if let Err(e) = notifier.notify(text).await {
        tracing::warn!(error = %e, "Notification delivery failed");
    }
}

/// Notifier that only writes announcements to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, text: &str) -> FlipperResult<()> {
        tracing::info!(target: "flipper::announce", "{}", text);
        Ok(())
    }
}
