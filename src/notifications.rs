use crate::errors::AppError;
use crate::models::{Notice, NoticeLevel};
use chrono::Utc;
use tokio::sync::broadcast;

const DEFAULT_CAPACITY: usize = 64;

/// Fan-out of transient, user-visible notices.
#[derive(Debug, Clone)]
pub struct Notifier {
    sender: broadcast::Sender<Notice>,
}

impl Default for Notifier {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl Notifier {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notice> {
        self.sender.subscribe()
    }

    pub fn publish(&self, level: NoticeLevel, code: &str, message: impl Into<String>) {
        let notice = Notice {
            level,
            code: code.to_string(),
            message: message.into(),
            created_at: Utc::now(),
        };
        // no subscribers is fine, the notice is simply dropped
        let _ = self.sender.send(notice);
    }

    pub fn report(&self, context: &str, error: &AppError) {
        match error {
            AppError::NotFound(_) => {
                tracing::debug!(context, error = %error, "ignored missing target");
            }
            AppError::StoreUnavailable(_) | AppError::StaleRecord(_) => {
                tracing::warn!(context, error = %error, "persistence failure");
                self.publish(NoticeLevel::Warning, error.code(), format!("{}: {}", context, error));
            }
            _ => {
                tracing::warn!(context, error = %error, "operation failed");
                self.publish(NoticeLevel::Error, error.code(), format!("{}: {}", context, error));
            }
        }
    }
}
