//! Transport-independent request handling. HTTP handlers and the gRPC
//! service both funnel into these functions.

use telemon_common::dto::{DtoError, MetricDto};
use telemon_common::types::{Metric, MetricError, MetricKind, RawValue};
use telemon_storage::{StorageEngine, StorageError};

#[derive(Debug, thiserror::Error)]
pub enum UsecaseError {
    /// Caller input that can never succeed as sent.
    #[error("{0}")]
    Invalid(String),

    #[error("metric {kind}/{name} not found")]
    NotFound { kind: MetricKind, name: String },

    #[error(transparent)]
    Storage(StorageError),
}

impl From<MetricError> for UsecaseError {
    fn from(e: MetricError) -> Self {
        UsecaseError::Invalid(e.to_string())
    }
}

impl From<DtoError> for UsecaseError {
    fn from(e: DtoError) -> Self {
        UsecaseError::Invalid(e.to_string())
    }
}

impl From<StorageError> for UsecaseError {
    fn from(e: StorageError) -> Self {
        match e {
            StorageError::NotFound(key) => UsecaseError::NotFound {
                kind: key.kind,
                name: key.name,
            },
            StorageError::Metric(e) => e.into(),
            other => UsecaseError::Storage(other),
        }
    }
}

pub type Result<T> = std::result::Result<T, UsecaseError>;

/// Upsert: updates the stored metric, creating it holding exactly `raw`
/// when the key is unseen.
///
/// Kind and name are validated before storage is touched.
pub async fn update_metric_by_value(
    storage: &dyn StorageEngine,
    kind: &str,
    name: &str,
    raw: RawValue,
) -> Result<Metric> {
    let mut fresh = Metric::parse(kind, name)?;
    let key = fresh.key();

    match storage.update(&key, &raw).await {
        Ok(metric) => return Ok(metric),
        Err(StorageError::NotFound(_)) => {}
        Err(e) => return Err(e.into()),
    }

    fresh.update(&raw)?;
    match storage.add(fresh.clone()).await {
        Ok(()) => Ok(fresh),
        // Lost a race with a concurrent creator; apply on top of theirs.
        Err(StorageError::AlreadyExists(_)) => Ok(storage.update(&key, &raw).await?),
        Err(e) => Err(e.into()),
    }
}

/// Single update from a JSON/proto DTO.
pub async fn update_metric(storage: &dyn StorageEngine, dto: &MetricDto) -> Result<Metric> {
    let raw = dto.raw_value()?;
    update_metric_by_value(storage, dto.kind.as_str(), &dto.id, raw).await
}

/// Batch upsert. Every item is validated before the batch reaches storage.
pub async fn update_metrics(storage: &dyn StorageEngine, dtos: &[MetricDto]) -> Result<Vec<Metric>> {
    let metrics = dtos
        .iter()
        .map(MetricDto::to_metric)
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(storage.update_batch(&metrics).await?)
}

/// Point lookup. An unknown kind is rejected as invalid; a well-formed key
/// that is not stored is not-found.
pub async fn get_metric(storage: &dyn StorageEngine, kind: &str, name: &str) -> Result<Metric> {
    let kind: MetricKind = kind.parse()?;
    Ok(storage.retrieve(kind, name).await?)
}

pub async fn list_metrics(storage: &dyn StorageEngine) -> Result<Vec<Metric>> {
    Ok(storage.retrieve_all().await?)
}
