use std::sync::Arc;
use std::time::Duration;
use telemon_storage::FileDumpStore;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// Saves the file store's snapshot on a fixed period until cancelled.
pub struct DumpScheduler {
    store: Arc<FileDumpStore>,
    period: Duration,
}

impl DumpScheduler {
    pub fn new(store: Arc<FileDumpStore>, period: Duration) -> Self {
        Self { store, period }
    }

    pub async fn run(self, cancel: CancellationToken) {
        let mut tick = interval(self.period);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick fires immediately; nothing new to save yet.
        tick.tick().await;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tick.tick() => save(&self.store).await,
            }
        }
        tracing::debug!("Dump scheduler stopped");
    }
}

/// Writes the snapshot, logging the outcome.
pub async fn save(store: &FileDumpStore) {
    match store.save_dump().await {
        Ok(count) => tracing::info!(path = %store.path().display(), count, "Metrics dump saved"),
        Err(e) => tracing::error!(path = %store.path().display(), error = %e, "Metrics dump failed"),
    }
}
