// src/notify.rs - Best-effort operator notifications.
use async_trait::async_trait;

/// Notifies the operator about noteworthy transitions (status changes,
/// transmit failures). Best-effort: errors are swallowed by implementors.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, subject: &str, body: &str);
}

/// Default notifier: the subject and body go to the log.
#[derive(Debug, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, subject: &str, body: &str) {
        tracing::info!("Notify [{}]: {}", subject, body);
    }
}
