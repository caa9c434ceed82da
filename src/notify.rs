//! Non-blocking user notifications.
//!
//! Failures that matter to the operator are published here instead of being
//! returned up a view. Nobody listening is not an error.

use serde::Serialize;
use tokio::sync::broadcast;

const CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Notification {
    Error {
        message: String,
    },
    #[serde(rename_all = "camelCase")]
    BatchSummary {
        success_count: u32,
        error_count: u32,
        skipped_count: u32,
    },
    Info {
        message: String,
    },
}

impl Notification {
    pub fn error(message: impl Into<String>) -> Self {
        Notification::Error {
            message: message.into(),
        }
    }

    pub fn info(message: impl Into<String>) -> Self {
        Notification::Info {
            message: message.into(),
        }
    }
}

#[derive(Clone)]
pub struct Notifier {
    sender: broadcast::Sender<Notification>,
}

impl Notifier {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.sender.subscribe()
    }

    pub fn notify(&self, notification: Notification) {
        if self.sender.send(notification.clone()).is_err() {
            log::debug!("No notification listeners, dropped {notification:?}");
        }
    }
}

impl Default for Notifier {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribers_receive_notifications() {
        let notifier = Notifier::new();
        let mut rx = notifier.subscribe();

        notifier.notify(Notification::error("fetch failed"));

        assert_eq!(rx.recv().await.expect("notification"), Notification::error("fetch failed"));
    }

    #[test]
    fn notify_without_listeners_is_fine() {
        Notifier::new().notify(Notification::info("nobody home"));
    }

    #[test]
    fn summary_serializes_in_camel_case() {
        let json = serde_json::to_value(Notification::BatchSummary {
            success_count: 2,
            error_count: 1,
            skipped_count: 0,
        })
        .expect("serialize");

        assert_eq!(json["kind"], "batchSummary");
        assert_eq!(json["successCount"], 2);
        assert_eq!(json["errorCount"], 1);
    }
}
