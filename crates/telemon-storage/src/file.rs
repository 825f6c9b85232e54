//! Flat-file snapshots layered over [`MemoryStore`].
//!
//! A dump holds one `name:kind:value` line per metric. Names are written
//! as-is, so a name containing `:` produces a dump that cannot be restored.

use crate::{MemoryStore, Result, StorageEngine, StorageError};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use telemon_common::types::{Metric, MetricKey, MetricKind, RawValue};
use tokio::sync::Mutex;

pub struct FileDumpStore {
    inner: MemoryStore,
    path: PathBuf,
    /// Held across snapshot and write so saves never interleave.
    save_lock: Mutex<()>,
}

impl FileDumpStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            inner: MemoryStore::new(),
            path: path.into(),
            save_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Replaces the dump file with the current contents. The snapshot goes
    /// to a sibling temp file first and is renamed over the dump, so a
    /// reader never sees a partial file. Returns the number of metrics
    /// written.
    pub async fn save_dump(&self) -> Result<usize> {
        let _guard = self.save_lock.lock().await;
        let metrics = self.inner.retrieve_all().await?;
        let body = render_dump(&metrics);
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp = self.tmp_path();
        tokio::fs::write(&tmp, body).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        tracing::debug!(path = %self.path.display(), count = metrics.len(), "Saved metrics dump");
        Ok(metrics.len())
    }

    fn tmp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }

    /// Loads the dump file into an empty store. A missing file restores
    /// nothing. Any malformed line aborts the restore before a single metric
    /// is inserted.
    pub async fn restore_dump(&self) -> Result<usize> {
        let body = match tokio::fs::read_to_string(&self.path).await {
            Ok(body) => body,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = %self.path.display(), "No metrics dump to restore");
                return Ok(0);
            }
            Err(e) => return Err(e.into()),
        };
        let metrics = parse_dump(&body)?;
        let count = self.inner.load_into_empty(metrics).await?;
        tracing::info!(path = %self.path.display(), count, "Restored metrics dump");
        Ok(count)
    }
}

fn render_dump(metrics: &[Metric]) -> String {
    let mut out = String::new();
    for m in metrics {
        out.push_str(&format!("{}:{}:{}\n", m.name(), m.kind(), m.value()));
    }
    out
}

fn parse_line(line: &str) -> std::result::Result<Metric, String> {
    let parts: Vec<&str> = line.split(':').collect();
    let [name, kind, value] = parts.as_slice() else {
        return Err(format!("expected 3 ':'-separated fields, found {}", parts.len()));
    };
    let mut metric = Metric::parse(kind, name).map_err(|e| e.to_string())?;
    metric
        .update(&RawValue::from(*value))
        .map_err(|e| e.to_string())?;
    Ok(metric)
}

fn parse_dump(body: &str) -> Result<Vec<Metric>> {
    body.lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(idx, line)| {
            parse_line(line).map_err(|reason| StorageError::Parse {
                line: idx + 1,
                reason,
            })
        })
        .collect()
}

#[async_trait]
impl StorageEngine for FileDumpStore {
    async fn add(&self, metric: Metric) -> Result<()> {
        self.inner.add(metric).await
    }

    async fn update(&self, key: &MetricKey, input: &RawValue) -> Result<Metric> {
        self.inner.update(key, input).await
    }

    async fn retrieve(&self, kind: MetricKind, name: &str) -> Result<Metric> {
        self.inner.retrieve(kind, name).await
    }

    async fn retrieve_all(&self) -> Result<Vec<Metric>> {
        self.inner.retrieve_all().await
    }

    async fn update_batch(&self, metrics: &[Metric]) -> Result<Vec<Metric>> {
        self.inner.update_batch(metrics).await
    }
}
