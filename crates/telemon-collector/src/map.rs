use std::collections::HashMap;
use std::sync::Arc;
use telemon_common::types::{Metric, MetricError, MetricKey, MetricKind, RawValue};
use tokio::sync::Mutex;

/// Lock-guarded map shared between the collector and the sender.
#[derive(Clone, Default)]
pub struct MetricMap {
    inner: Arc<Mutex<HashMap<MetricKey, Metric>>>,
}

impl MetricMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates the metric if absent, then applies `input` with the per-kind
    /// rule. A rejected input leaves the map unchanged.
    pub async fn apply(
        &self,
        kind: MetricKind,
        name: &str,
        input: &RawValue,
    ) -> Result<Metric, MetricError> {
        let key = MetricKey::new(kind, name);
        let mut map = self.inner.lock().await;
        let mut next = match map.get(&key) {
            Some(existing) => existing.clone(),
            None => Metric::new(kind, name)?,
        };
        next.update(input)?;
        map.insert(key, next.clone());
        Ok(next)
    }

    pub async fn get(&self, kind: MetricKind, name: &str) -> Option<Metric> {
        self.inner
            .lock()
            .await
            .get(&MetricKey::new(kind, name))
            .cloned()
    }

    /// Copy of every metric, ordered by kind then name.
    pub async fn snapshot(&self) -> Vec<Metric> {
        let map = self.inner.lock().await;
        let mut all: Vec<Metric> = map.values().cloned().collect();
        all.sort_by(|a, b| a.key().cmp(&b.key()));
        all
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.lock().await.is_empty()
    }
}
