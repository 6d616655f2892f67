use crate::errors::{AppError, AppResult};
use crate::models::{RecordItem, Scope};
use crate::notifications::Notifier;
use crate::persistence::ScopedPersistence;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Duration;

pub const DEFAULT_WINDOW: Duration = Duration::from_millis(300);

struct Snapshot<T> {
    scope: Scope,
    items: Vec<T>,
}

enum Message<T> {
    Schedule(Snapshot<T>),
    WriteNow(Snapshot<T>, oneshot::Sender<AppResult<()>>),
    Flush(oneshot::Sender<()>),
}

/// Timer-armed writer: every scheduled snapshot restarts the quiet window, and
/// when the window closes only the latest snapshot is saved. Saves are awaited
/// one at a time, in the order their windows close.
pub struct DebouncedWriter<T> {
    sender: mpsc::UnboundedSender<Message<T>>,
    window: Duration,
}

impl<T: RecordItem> DebouncedWriter<T> {
    /// Must be called from within a tokio runtime.
    pub fn spawn(persistence: ScopedPersistence<T>, window: Duration, notifier: Notifier) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        tokio::spawn(run_writer(persistence, window, notifier, receiver));
        Self { sender, window }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub fn schedule(&self, scope: Scope, items: Vec<T>) {
        if self
            .sender
            .send(Message::Schedule(Snapshot { scope, items }))
            .is_err()
        {
            tracing::warn!(kind = T::KIND.as_str(), "debounced writer has stopped; snapshot dropped");
        }
    }

    /// Saves `items` right away, superseding any pending snapshot for the same
    /// scope. Unlike debounced saves, the outcome goes back to the caller.
    pub async fn write_now(&self, scope: Scope, items: Vec<T>) -> AppResult<()> {
        let (done, wait) = oneshot::channel();
        self.sender
            .send(Message::WriteNow(Snapshot { scope, items }, done))
            .map_err(|_| AppError::Internal(format!("{} writer has stopped", T::KIND.as_str())))?;
        wait.await
            .map_err(|_| AppError::Internal(format!("{} writer dropped the request", T::KIND.as_str())))?
    }

    /// Writes any pending snapshot immediately and waits for it to land.
    pub async fn flush(&self) {
        let (done, wait) = oneshot::channel();
        if self.sender.send(Message::Flush(done)).is_ok() {
            let _ = wait.await;
        }
    }
}

async fn run_writer<T: RecordItem>(
    persistence: ScopedPersistence<T>,
    window: Duration,
    notifier: Notifier,
    mut receiver: mpsc::UnboundedReceiver<Message<T>>,
) {
    let mut pending: Option<Snapshot<T>> = None;

    loop {
        let message = if pending.is_some() {
            match tokio::time::timeout(window, receiver.recv()).await {
                Ok(Some(message)) => message,
                Ok(None) => {
                    if let Some(snapshot) = pending.take() {
                        write_snapshot(&persistence, &notifier, snapshot);
                    }
                    return;
                }
                Err(_) => {
                    if let Some(snapshot) = pending.take() {
                        write_snapshot(&persistence, &notifier, snapshot);
                    }
                    continue;
                }
            }
        } else {
            match receiver.recv().await {
                Some(message) => message,
                None => return,
            }
        };

        match message {
            Message::Schedule(snapshot) => {
                if let Some(previous) = pending.take() {
                    // a snapshot for another scope is never folded into the new one
                    if previous.scope != snapshot.scope {
                        write_snapshot(&persistence, &notifier, previous);
                    }
                }
                pending = Some(snapshot);
            }
            Message::WriteNow(snapshot, done) => {
                if let Some(previous) = pending.take() {
                    if previous.scope != snapshot.scope {
                        write_snapshot(&persistence, &notifier, previous);
                    }
                }
                let result = persistence.save_snapshot(snapshot.scope, snapshot.items).map(|_| ());
                let _ = done.send(result);
            }
            Message::Flush(done) => {
                if let Some(snapshot) = pending.take() {
                    write_snapshot(&persistence, &notifier, snapshot);
                }
                let _ = done.send(());
            }
        }
    }
}

fn write_snapshot<T: RecordItem>(persistence: &ScopedPersistence<T>, notifier: &Notifier, snapshot: Snapshot<T>) {
    let count = snapshot.items.len();
    match persistence.save_snapshot(snapshot.scope, snapshot.items) {
        Ok(record) => {
            tracing::debug!(
                kind = T::KIND.as_str(),
                profile_id = record.scope.profile_id,
                game_id = record.scope.game_id,
                count,
                "persisted snapshot"
            );
        }
        Err(error) => notifier.report(&format!("saving {}", T::KIND.as_str()), &error),
    }
}

#[cfg(test)]
mod tests {
    use super::DebouncedWriter;
    use crate::models::{ActivationItem, EntityKind, Scope};
    use crate::notifications::Notifier;
    use crate::persistence::testing::MemoryBackend;
    use crate::persistence::ScopedPersistence;
    use std::sync::atomic::Ordering;
    use std::sync::Arc;
    use tokio::time::Duration;

    fn activation(mod_id: &str, is_active: bool) -> ActivationItem {
        ActivationItem {
            mod_id: mod_id.to_string(),
            is_active,
            title: mod_id.to_uppercase(),
        }
    }

    fn writer(backend: &Arc<MemoryBackend>, notifier: Notifier) -> DebouncedWriter<ActivationItem> {
        DebouncedWriter::spawn(
            ScopedPersistence::new(backend.clone()),
            Duration::from_millis(300),
            notifier,
        )
    }

    #[tokio::test(start_paused = true)]
    async fn burst_collapses_into_one_write_of_last_value() {
        let backend = Arc::new(MemoryBackend::default());
        let writer = writer(&backend, Notifier::default());
        let scope = Scope::new(1, 1142710);

        for round in 0..5 {
            writer.schedule(scope, vec![activation("mod-a", round % 2 == 0)]);
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        assert!(backend.writes().is_empty());

        tokio::time::sleep(Duration::from_millis(400)).await;
        let writes = backend.writes();
        assert_eq!(writes.len(), 1);
        let stored: Vec<ActivationItem> = serde_json::from_str(&writes[0].2).expect("decode");
        assert_eq!(stored, vec![activation("mod-a", true)]);
    }

    #[tokio::test(start_paused = true)]
    async fn separate_windows_write_separately() {
        let backend = Arc::new(MemoryBackend::default());
        let writer = writer(&backend, Notifier::default());
        let scope = Scope::new(1, 594570);

        writer.schedule(scope, vec![activation("mod-a", true)]);
        tokio::time::sleep(Duration::from_millis(500)).await;
        writer.schedule(scope, vec![activation("mod-a", false)]);
        tokio::time::sleep(Duration::from_millis(500)).await;

        assert_eq!(backend.writes().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn scope_switch_lands_previous_snapshot_on_its_own_scope() {
        let backend = Arc::new(MemoryBackend::default());
        let writer = writer(&backend, Notifier::default());
        let old_scope = Scope::new(1, 594570);
        let new_scope = Scope::new(2, 594570);

        writer.schedule(old_scope, vec![activation("mod-a", true)]);
        writer.schedule(new_scope, vec![activation("mod-b", false)]);
        writer.flush().await;

        let writes = backend.writes();
        assert_eq!(writes.len(), 2);
        assert_eq!(writes[0].1, old_scope);
        assert_eq!(writes[1].1, new_scope);
        assert!(backend
            .stored(EntityKind::ModActivation, old_scope)
            .expect("old scope row")
            .contains("mod-a"));
        assert!(!backend
            .stored(EntityKind::ModActivation, new_scope)
            .expect("new scope row")
            .contains("mod-a"));
    }

    #[tokio::test(start_paused = true)]
    async fn failed_write_is_reported_not_retried() {
        let backend = Arc::new(MemoryBackend::default());
        backend.unavailable.store(true, Ordering::SeqCst);
        let notifier = Notifier::default();
        let mut notices = notifier.subscribe();
        let writer = writer(&backend, notifier);

        writer.schedule(Scope::new(1, 594570), vec![activation("mod-a", true)]);
        writer.flush().await;

        let notice = notices.recv().await.expect("failure notice");
        assert_eq!(notice.code, "STORE_UNAVAILABLE");

        backend.unavailable.store(false, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(backend.writes().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn write_now_supersedes_pending_snapshot() {
        let backend = Arc::new(MemoryBackend::default());
        let writer = writer(&backend, Notifier::default());
        let scope = Scope::new(3, 1142710);

        writer.schedule(scope, vec![activation("mod-a", false)]);
        writer
            .write_now(scope, vec![activation("mod-a", true)])
            .await
            .expect("immediate save");
        tokio::time::sleep(Duration::from_secs(1)).await;

        let writes = backend.writes();
        assert_eq!(writes.len(), 1);
        assert!(writes[0].2.contains("true"));
    }

    #[tokio::test]
    async fn write_now_returns_failures() {
        let backend = Arc::new(MemoryBackend::default());
        backend.unavailable.store(true, Ordering::SeqCst);
        let writer = writer(&backend, Notifier::default());

        let err = writer
            .write_now(Scope::new(1, 594570), Vec::new())
            .await
            .expect_err("offline");
        assert_eq!(err.code(), "STORE_UNAVAILABLE");
    }
}
