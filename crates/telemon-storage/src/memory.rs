use crate::{Result, StorageEngine, StorageError};
use async_trait::async_trait;
use std::collections::HashMap;
use telemon_common::types::{Metric, MetricKey, MetricKind, RawValue};
use tokio::sync::Mutex;

/// Volatile backend: one mutex-guarded map, held for the full duration of
/// every operation.
#[derive(Default)]
pub struct MemoryStore {
    metrics: Mutex<HashMap<MetricKey, Metric>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.metrics.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.metrics.lock().await.is_empty()
    }

    /// Inserts a batch of fully built metrics while holding the lock once.
    /// Used by dump restoration, which must see an empty map.
    pub(crate) async fn load_into_empty(&self, metrics: Vec<Metric>) -> Result<usize> {
        let mut map = self.metrics.lock().await;
        if !map.is_empty() {
            return Err(StorageError::RestoreIntoNonEmpty);
        }
        let count = metrics.len();
        map.extend(metrics.into_iter().map(|m| (m.key(), m)));
        Ok(count)
    }
}

fn upsert(map: &mut HashMap<MetricKey, Metric>, item: &Metric) -> Result<Metric> {
    let key = item.key();
    let mut next = match map.get(&key) {
        Some(existing) => existing.clone(),
        None => Metric::new(key.kind, key.name.clone())?,
    };
    next.update(&item.value().into())?;
    map.insert(key, next.clone());
    Ok(next)
}

#[async_trait]
impl StorageEngine for MemoryStore {
    async fn add(&self, metric: Metric) -> Result<()> {
        let mut map = self.metrics.lock().await;
        let key = metric.key();
        if map.contains_key(&key) {
            return Err(StorageError::AlreadyExists(key));
        }
        map.insert(key, metric);
        Ok(())
    }

    async fn update(&self, key: &MetricKey, input: &RawValue) -> Result<Metric> {
        let mut map = self.metrics.lock().await;
        let metric = map
            .get_mut(key)
            .ok_or_else(|| StorageError::NotFound(key.clone()))?;
        metric.update(input)?;
        Ok(metric.clone())
    }

    async fn retrieve(&self, kind: MetricKind, name: &str) -> Result<Metric> {
        let key = MetricKey::new(kind, name);
        self.metrics
            .lock()
            .await
            .get(&key)
            .cloned()
            .ok_or(StorageError::NotFound(key))
    }

    async fn retrieve_all(&self) -> Result<Vec<Metric>> {
        let map = self.metrics.lock().await;
        let mut all: Vec<Metric> = map.values().cloned().collect();
        all.sort_by(|a, b| a.key().cmp(&b.key()));
        Ok(all)
    }

    async fn update_batch(&self, metrics: &[Metric]) -> Result<Vec<Metric>> {
        let mut map = self.metrics.lock().await;
        let mut applied = Vec::with_capacity(metrics.len());
        for item in metrics {
            match upsert(&mut map, item) {
                Ok(m) => applied.push(m),
                Err(e) => {
                    tracing::warn!(metric = %item.key(), error = %e, "Skipping batch item");
                }
            }
        }
        Ok(applied)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use telemon_common::types::MetricValue;

    #[tokio::test]
    async fn duplicate_add_keeps_prior_value() {
        let store = MemoryStore::new();
        let original = Metric::with_value("Alloc", MetricValue::Gauge(3.5)).unwrap();
        store.add(original.clone()).await.unwrap();

        let dup = Metric::with_value("Alloc", MetricValue::Gauge(99.0)).unwrap();
        let err = store.add(dup).await.unwrap_err();
        assert!(matches!(err, StorageError::AlreadyExists(_)));
        assert_eq!(
            store.retrieve(MetricKind::Gauge, "Alloc").await.unwrap(),
            original
        );
    }

    #[tokio::test]
    async fn batch_skips_overflowing_item() {
        let store = MemoryStore::new();
        store
            .add(Metric::with_value("big", MetricValue::Counter(i64::MAX)).unwrap())
            .await
            .unwrap();

        let batch = vec![
            Metric::with_value("big", MetricValue::Counter(1)).unwrap(),
            Metric::with_value("small", MetricValue::Counter(2)).unwrap(),
        ];
        let applied = store.update_batch(&batch).await.unwrap();
        assert_eq!(applied.len(), 1);
        assert_eq!(applied[0].name(), "small");
        assert_eq!(
            store.retrieve(MetricKind::Counter, "big").await.unwrap().value(),
            MetricValue::Counter(i64::MAX)
        );
    }

    #[tokio::test]
    async fn load_requires_empty_map() {
        let store = MemoryStore::new();
        store
            .add(Metric::new(MetricKind::Counter, "x").unwrap())
            .await
            .unwrap();
        let err = store
            .load_into_empty(vec![Metric::new(MetricKind::Gauge, "y").unwrap()])
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::RestoreIntoNonEmpty));
        assert_eq!(store.len().await, 1);
    }
}
