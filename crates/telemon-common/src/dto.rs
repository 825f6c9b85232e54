//! JSON wire format shared by the agent and the HTTP transport, plus the
//! conversions to and from the gRPC messages.

use crate::proto::MetricProto;
use crate::types::{Metric, MetricError, MetricKind, MetricValue, RawValue};
use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum DtoError {
    #[error(transparent)]
    Metric(#[from] MetricError),

    #[error("metric '{id}' of type {kind} must carry exactly one matching value field")]
    MalformedValue { id: String, kind: MetricKind },
}

/// One metric on the wire.
///
/// `delta` is set for counters, `value` for gauges, never both.
///
/// # Examples
///
/// ```
/// use telemon_common::dto::MetricDto;
/// use telemon_common::types::{Metric, MetricKind};
///
/// let mut m = Metric::new(MetricKind::Counter, "PollCount").unwrap();
/// m.update(&"4".into()).unwrap();
/// let json = serde_json::to_string(&MetricDto::from(&m)).unwrap();
/// assert_eq!(json, r#"{"id":"PollCount","type":"counter","delta":4}"#);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricDto {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: MetricKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delta: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<f64>,
}

impl MetricDto {
    /// A lookup request carries identity only.
    pub fn query(kind: MetricKind, id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind,
            delta: None,
            value: None,
        }
    }

    /// Extracts the update payload, enforcing the one-field-per-kind rule.
    pub fn raw_value(&self) -> Result<RawValue, DtoError> {
        match (self.kind, self.delta, self.value) {
            (MetricKind::Counter, Some(delta), None) => Ok(RawValue::Int(delta)),
            (MetricKind::Gauge, None, Some(value)) => Ok(RawValue::Float(value)),
            _ => Err(DtoError::MalformedValue {
                id: self.id.clone(),
                kind: self.kind,
            }),
        }
    }

    /// Builds a metric holding exactly the carried delta or reading.
    pub fn to_metric(&self) -> Result<Metric, DtoError> {
        let raw = self.raw_value()?;
        let mut metric = Metric::new(self.kind, self.id.clone())?;
        metric.update(&raw)?;
        Ok(metric)
    }
}

impl From<&Metric> for MetricDto {
    fn from(m: &Metric) -> Self {
        let (delta, value) = match m.value() {
            MetricValue::Counter(d) => (Some(d), None),
            MetricValue::Gauge(g) => (None, Some(g)),
        };
        Self {
            id: m.name().to_string(),
            kind: m.kind(),
            delta,
            value,
        }
    }
}

impl From<&MetricDto> for MetricProto {
    fn from(dto: &MetricDto) -> Self {
        MetricProto {
            id: dto.id.clone(),
            kind: dto.kind.to_string(),
            delta: dto.delta,
            value: dto.value,
        }
    }
}

impl TryFrom<MetricProto> for MetricDto {
    type Error = DtoError;

    fn try_from(p: MetricProto) -> Result<Self, Self::Error> {
        Ok(MetricDto {
            kind: p.kind.parse()?,
            id: p.id,
            delta: p.delta,
            value: p.value,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gauge_dto_carries_value_only() {
        let mut m = Metric::new(MetricKind::Gauge, "Alloc").unwrap();
        m.update(&RawValue::Float(12.5)).unwrap();
        let dto = MetricDto::from(&m);
        assert_eq!(dto.delta, None);
        assert_eq!(dto.value, Some(12.5));
        let json = serde_json::to_string(&dto).unwrap();
        assert_eq!(json, r#"{"id":"Alloc","type":"gauge","value":12.5}"#);
    }

    #[test]
    fn mismatched_fields_are_rejected() {
        let both: MetricDto =
            serde_json::from_str(r#"{"id":"x","type":"counter","delta":1,"value":2.0}"#).unwrap();
        assert!(both.raw_value().is_err());

        let wrong: MetricDto =
            serde_json::from_str(r#"{"id":"x","type":"gauge","delta":1}"#).unwrap();
        assert!(wrong.raw_value().is_err());

        let none = MetricDto::query(MetricKind::Counter, "x");
        assert!(none.to_metric().is_err());
    }

    #[test]
    fn unknown_type_fails_to_decode() {
        let res = serde_json::from_str::<MetricDto>(r#"{"id":"x","type":"summary","value":1}"#);
        assert!(res.is_err());
    }

    #[test]
    fn to_metric_validates_name() {
        let dto: MetricDto =
            serde_json::from_str(r#"{"id":"bad name","type":"gauge","value":1}"#).unwrap();
        assert!(matches!(
            dto.to_metric(),
            Err(DtoError::Metric(MetricError::InvalidName(_)))
        ));
    }

    #[test]
    fn proto_conversion_keeps_fields() {
        let dto: MetricDto =
            serde_json::from_str(r#"{"id":"PollCount","type":"counter","delta":9}"#).unwrap();
        let proto = MetricProto::from(&dto);
        assert_eq!(proto.kind, "counter");
        assert_eq!(proto.delta, Some(9));
        assert_eq!(MetricDto::try_from(proto).unwrap(), dto);

        let bad = MetricProto {
            id: "x".into(),
            kind: "timer".into(),
            delta: None,
            value: Some(1.0),
        };
        assert!(MetricDto::try_from(bad).is_err());
    }
}
