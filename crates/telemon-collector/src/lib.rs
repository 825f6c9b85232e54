//! Periodic sampling of host and process statistics into a shared metric map.
//!
//! A [`StatsSource`] produces raw readings; the [`Collector`] loop turns them
//! into gauges in a [`MetricMap`] together with the `PollCount` counter and
//! the `RandomValue` gauge. The agent's sender drains the same map.

pub mod map;
pub mod system;

pub use map::MetricMap;
pub use system::SystemStats;

use std::time::Duration;
use telemon_common::types::{MetricKind, RawValue};
use tokio_util::sync::CancellationToken;

/// Name of the counter incremented once per poll.
pub const POLL_COUNT: &str = "PollCount";

/// Name of the gauge set to a fresh random number every poll.
pub const RANDOM_VALUE: &str = "RandomValue";

/// One statistic read by a [`StatsSource`].
#[derive(Debug)]
pub struct Reading {
    pub name: String,
    pub value: anyhow::Result<f64>,
}

impl Reading {
    pub fn ok(name: impl Into<String>, value: f64) -> Self {
        Self {
            name: name.into(),
            value: Ok(value),
        }
    }

    pub fn failed(name: impl Into<String>, err: anyhow::Error) -> Self {
        Self {
            name: name.into(),
            value: Err(err),
        }
    }
}

/// Source of the gauge readings taken at each tick.
pub trait StatsSource: Send {
    /// Reads every statistic. A statistic that cannot be read is returned as
    /// a failed [`Reading`] rather than failing the whole sample.
    fn sample(&mut self) -> Vec<Reading>;
}

pub struct Collector<S> {
    source: S,
    map: MetricMap,
    poll_interval: Duration,
}

impl<S: StatsSource> Collector<S> {
    pub fn new(source: S, map: MetricMap, poll_interval: Duration) -> Self {
        Self {
            source,
            map,
            poll_interval,
        }
    }

    /// Takes one sample and applies it to the map. Returns the number of
    /// metrics updated.
    pub async fn poll_once(&mut self) -> usize {
        let mut updated = 0;
        for reading in self.source.sample() {
            let value = match reading.value {
                Ok(v) => v,
                Err(e) => {
                    tracing::warn!(metric = %reading.name, error = %e, "Failed to read statistic");
                    continue;
                }
            };
            match self
                .map
                .apply(MetricKind::Gauge, &reading.name, &RawValue::Float(value))
                .await
            {
                Ok(_) => updated += 1,
                Err(e) => tracing::warn!(metric = %reading.name, error = %e, "Rejected reading"),
            }
        }

        let extras = [
            (MetricKind::Counter, POLL_COUNT, RawValue::Int(1)),
            (MetricKind::Gauge, RANDOM_VALUE, RawValue::Float(rand::random::<f64>())),
        ];
        for (kind, name, input) in extras {
            match self.map.apply(kind, name, &input).await {
                Ok(_) => updated += 1,
                Err(e) => tracing::warn!(metric = name, error = %e, "Rejected reading"),
            }
        }

        tracing::debug!(updated, "Poll complete");
        updated
    }

    /// Polls on every tick until `cancel` fires.
    pub async fn run(mut self, cancel: CancellationToken) {
        let mut tick = tokio::time::interval(self.poll_interval);
        tracing::info!(
            interval_ms = self.poll_interval.as_millis() as u64,
            "Starting collection loop"
        );
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("Collection loop stopped");
                    break;
                }
                _ = tick.tick() => {
                    self.poll_once().await;
                }
            }
        }
    }
}
