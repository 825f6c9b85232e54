use serde::{Deserialize, Serialize};
use std::fmt;

/// Errors raised while constructing or updating a [`Metric`].
///
/// # Examples
///
/// ```
/// use telemon_common::types::{Metric, MetricError, MetricKind};
///
/// let err = Metric::new(MetricKind::Gauge, "9lives").unwrap_err();
/// assert_eq!(err, MetricError::InvalidName("9lives".to_string()));
/// ```
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum MetricError {
    #[error("invalid metric name '{0}'")]
    InvalidName(String),

    #[error("invalid metric kind '{0}'")]
    InvalidKind(String),

    #[error("invalid {kind} value '{input}'")]
    InvalidValue { kind: MetricKind, input: String },
}

/// The two supported metric kinds.
///
/// # Examples
///
/// ```
/// use telemon_common::types::MetricKind;
///
/// let kind: MetricKind = "counter".parse().unwrap();
/// assert_eq!(kind, MetricKind::Counter);
/// assert_eq!(kind.to_string(), "counter");
/// assert!("histogram".parse::<MetricKind>().is_err());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricKind {
    Counter,
    Gauge,
}

impl MetricKind {
    pub fn as_str(self) -> &'static str {
        match self {
            MetricKind::Counter => "counter",
            MetricKind::Gauge => "gauge",
        }
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for MetricKind {
    type Err = MetricError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "counter" => Ok(MetricKind::Counter),
            "gauge" => Ok(MetricKind::Gauge),
            _ => Err(MetricError::InvalidKind(s.to_string())),
        }
    }
}

/// Current value of a metric. The variant always agrees with the metric kind.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum MetricValue {
    Counter(i64),
    Gauge(f64),
}

impl MetricValue {
    pub fn zero(kind: MetricKind) -> Self {
        match kind {
            MetricKind::Counter => MetricValue::Counter(0),
            MetricKind::Gauge => MetricValue::Gauge(0.0),
        }
    }

    pub fn kind(&self) -> MetricKind {
        match self {
            MetricValue::Counter(_) => MetricKind::Counter,
            MetricValue::Gauge(_) => MetricKind::Gauge,
        }
    }

    pub fn as_counter(&self) -> Option<i64> {
        match self {
            MetricValue::Counter(v) => Some(*v),
            MetricValue::Gauge(_) => None,
        }
    }

    pub fn as_gauge(&self) -> Option<f64> {
        match self {
            MetricValue::Gauge(v) => Some(*v),
            MetricValue::Counter(_) => None,
        }
    }
}

impl fmt::Display for MetricValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetricValue::Counter(v) => write!(f, "{v}"),
            MetricValue::Gauge(v) => write!(f, "{v}"),
        }
    }
}

/// Update input as it arrives from a caller: already typed, or as text that
/// still has to be parsed for the target kind.
#[derive(Debug, Clone, PartialEq)]
pub enum RawValue {
    Int(i64),
    Float(f64),
    Text(String),
}

impl RawValue {
    /// Interprets the input as a counter delta. Floats are rejected.
    pub fn as_delta(&self) -> Option<i64> {
        match self {
            RawValue::Int(v) => Some(*v),
            RawValue::Float(_) => None,
            RawValue::Text(s) => s.trim().parse().ok(),
        }
    }

    /// Interprets the input as a gauge reading. Non-finite values are rejected.
    pub fn as_reading(&self) -> Option<f64> {
        let v = match self {
            RawValue::Int(v) => *v as f64,
            RawValue::Float(v) => *v,
            RawValue::Text(s) => s.trim().parse().ok()?,
        };
        v.is_finite().then_some(v)
    }
}

impl fmt::Display for RawValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RawValue::Int(v) => write!(f, "{v}"),
            RawValue::Float(v) => write!(f, "{v}"),
            RawValue::Text(s) => f.write_str(s),
        }
    }
}

impl From<i64> for RawValue {
    fn from(v: i64) -> Self {
        RawValue::Int(v)
    }
}

impl From<f64> for RawValue {
    fn from(v: f64) -> Self {
        RawValue::Float(v)
    }
}

impl From<&str> for RawValue {
    fn from(v: &str) -> Self {
        RawValue::Text(v.to_string())
    }
}

impl From<String> for RawValue {
    fn from(v: String) -> Self {
        RawValue::Text(v)
    }
}

impl From<MetricValue> for RawValue {
    fn from(v: MetricValue) -> Self {
        match v {
            MetricValue::Counter(d) => RawValue::Int(d),
            MetricValue::Gauge(g) => RawValue::Float(g),
        }
    }
}

/// Composite identity of a metric.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MetricKey {
    pub kind: MetricKind,
    pub name: String,
}

impl MetricKey {
    pub fn new(kind: MetricKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
        }
    }
}

impl fmt::Display for MetricKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.kind, self.name)
    }
}

/// Checks a metric name against `^[a-zA-Z_:][a-zA-Z0-9_:]*$`.
///
/// # Examples
///
/// ```
/// use telemon_common::types::validate_name;
///
/// assert!(validate_name("HeapAlloc").is_ok());
/// assert!(validate_name("http:requests_total").is_ok());
/// assert!(validate_name("").is_err());
/// assert!(validate_name("cpu.usage").is_err());
/// ```
pub fn validate_name(name: &str) -> Result<(), MetricError> {
    let mut chars = name.chars();
    let valid = match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' || first == ':' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == ':')
        }
        _ => false,
    };
    if valid {
        Ok(())
    } else {
        Err(MetricError::InvalidName(name.to_string()))
    }
}

/// A named counter or gauge.
///
/// Counters accumulate every update, gauges keep the last one.
///
/// # Examples
///
/// ```
/// use telemon_common::types::{Metric, MetricKind, MetricValue};
///
/// let mut polls = Metric::new(MetricKind::Counter, "PollCount").unwrap();
/// polls.update(&2i64.into()).unwrap();
/// polls.update(&"3".into()).unwrap();
/// assert_eq!(polls.value(), MetricValue::Counter(5));
///
/// let mut heap = Metric::new(MetricKind::Gauge, "HeapAlloc").unwrap();
/// heap.update(&1.5f64.into()).unwrap();
/// heap.update(&"2.25".into()).unwrap();
/// assert_eq!(heap.value(), MetricValue::Gauge(2.25));
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct Metric {
    name: String,
    value: MetricValue,
}

impl Metric {
    /// Creates a zero-valued metric after validating the name.
    pub fn new(kind: MetricKind, name: impl Into<String>) -> Result<Self, MetricError> {
        let name = name.into();
        validate_name(&name)?;
        Ok(Self {
            name,
            value: MetricValue::zero(kind),
        })
    }

    /// Like [`Metric::new`] with the kind given as text.
    pub fn parse(kind: &str, name: &str) -> Result<Self, MetricError> {
        Self::new(kind.parse()?, name)
    }

    /// Creates a metric that already holds `value`.
    pub fn with_value(name: impl Into<String>, value: MetricValue) -> Result<Self, MetricError> {
        let name = name.into();
        validate_name(&name)?;
        if let MetricValue::Gauge(v) = value {
            if !v.is_finite() {
                return Err(MetricError::InvalidValue {
                    kind: MetricKind::Gauge,
                    input: v.to_string(),
                });
            }
        }
        Ok(Self { name, value })
    }

    pub fn kind(&self) -> MetricKind {
        self.value.kind()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn value(&self) -> MetricValue {
        self.value
    }

    pub fn key(&self) -> MetricKey {
        MetricKey::new(self.kind(), self.name.clone())
    }

    /// Applies `input` with the per-kind rule. On error the value is unchanged.
    pub fn update(&mut self, input: &RawValue) -> Result<(), MetricError> {
        let kind = self.kind();
        let invalid = || MetricError::InvalidValue {
            kind,
            input: input.to_string(),
        };
        match &mut self.value {
            MetricValue::Counter(current) => {
                let delta = input.as_delta().ok_or_else(invalid)?;
                *current = current.checked_add(delta).ok_or_else(invalid)?;
            }
            MetricValue::Gauge(current) => {
                *current = input.as_reading().ok_or_else(invalid)?;
            }
        }
        Ok(())
    }
}
