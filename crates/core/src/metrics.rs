//! Metric model and the JSON wire envelope.
//!
//! A gauge write replaces the stored value; a counter write adds to it.
//! That asymmetry is the one rule everything downstream depends on, so
//! the value is a sum type and the kind is never carried separately
//! from the number it describes.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::PulseError;

pub const GAUGE_TYPE: &str = "gauge";
pub const COUNTER_TYPE: &str = "counter";

/// The two metric kinds accepted on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricKind {
    Gauge,
    Counter,
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetricKind::Gauge => write!(f, "{}", GAUGE_TYPE),
            MetricKind::Counter => write!(f, "{}", COUNTER_TYPE),
        }
    }
}

impl FromStr for MetricKind {
    type Err = PulseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            GAUGE_TYPE => Ok(MetricKind::Gauge),
            COUNTER_TYPE => Ok(MetricKind::Counter),
            _ => Err(PulseError::BadMetricType),
        }
    }
}

/// A metric value tagged with its kind.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MetricValue {
    Gauge(f64),
    Counter(i64),
}

impl MetricValue {
    pub fn kind(&self) -> MetricKind {
        match self {
            MetricValue::Gauge(_) => MetricKind::Gauge,
            MetricValue::Counter(_) => MetricKind::Counter,
        }
    }
}

impl fmt::Display for MetricValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetricValue::Gauge(v) => write!(f, "{}", v),
            MetricValue::Counter(d) => write!(f, "{}", d),
        }
    }
}

/// A named metric, the only payload unit of the pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct Metric {
    pub id: String,
    pub value: MetricValue,
}

impl Metric {
    pub fn gauge(id: impl Into<String>, value: f64) -> Self {
        Self {
            id: id.into(),
            value: MetricValue::Gauge(value),
        }
    }

    pub fn counter(id: impl Into<String>, delta: i64) -> Self {
        Self {
            id: id.into(),
            value: MetricValue::Counter(delta),
        }
    }
}

/// The canonical JSON envelope.
///
/// Field names are part of the wire contract: `id`, `type`, `delta`,
/// `value`. `delta` is present iff the metric is a counter, `value`
/// iff it is a gauge; batches are plain JSON arrays of envelopes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricEnvelope {
    pub id: String,
    #[serde(rename = "type")]
    pub mtype: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delta: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<f64>,
}

impl From<&Metric> for MetricEnvelope {
    fn from(m: &Metric) -> Self {
        match m.value {
            MetricValue::Gauge(v) => MetricEnvelope {
                id: m.id.clone(),
                mtype: GAUGE_TYPE.to_string(),
                delta: None,
                value: Some(v),
            },
            MetricValue::Counter(d) => MetricEnvelope {
                id: m.id.clone(),
                mtype: COUNTER_TYPE.to_string(),
                delta: Some(d),
                value: None,
            },
        }
    }
}

impl TryFrom<&MetricEnvelope> for Metric {
    type Error = PulseError;

    /// An envelope whose discriminated field is absent is rejected with
    /// `WrongMetricValueType`; an unknown `type` token with
    /// `BadMetricType`.
    fn try_from(e: &MetricEnvelope) -> Result<Self, Self::Error> {
        match e.mtype.parse::<MetricKind>()? {
            MetricKind::Gauge => {
                let value = e.value.ok_or(PulseError::WrongMetricValueType)?;
                Ok(Metric::gauge(e.id.clone(), value))
            }
            MetricKind::Counter => {
                let delta = e.delta.ok_or(PulseError::WrongMetricValueType)?;
                Ok(Metric::counter(e.id.clone(), delta))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gauge_envelope_field_names() {
        let m = Metric::gauge("heap", 0.1);
        let json = serde_json::to_string(&MetricEnvelope::from(&m)).unwrap();
        assert_eq!(json, r#"{"id":"heap","type":"gauge","value":0.1}"#);
    }

    #[test]
    fn test_counter_envelope_field_names() {
        let m = Metric::counter("polls", 5);
        let json = serde_json::to_string(&MetricEnvelope::from(&m)).unwrap();
        assert_eq!(json, r#"{"id":"polls","type":"counter","delta":5}"#);
    }

    #[test]
    fn test_envelope_roundtrip() {
        let m = Metric::counter("requests", 42);
        let json = serde_json::to_string(&MetricEnvelope::from(&m)).unwrap();
        let parsed: MetricEnvelope = serde_json::from_str(&json).unwrap();
        assert_eq!(Metric::try_from(&parsed).unwrap(), m);
    }

    #[test]
    fn test_envelope_missing_discriminated_field() {
        let e: MetricEnvelope = serde_json::from_str(r#"{"id":"x","type":"gauge"}"#).unwrap();
        assert!(matches!(
            Metric::try_from(&e),
            Err(PulseError::WrongMetricValueType)
        ));
    }

    #[test]
    fn test_envelope_unknown_kind() {
        let e: MetricEnvelope =
            serde_json::from_str(r#"{"id":"x","type":"qwe","value":0.1}"#).unwrap();
        assert!(matches!(Metric::try_from(&e), Err(PulseError::BadMetricType)));
    }

    #[test]
    fn test_kind_parse() {
        assert_eq!("gauge".parse::<MetricKind>().unwrap(), MetricKind::Gauge);
        assert_eq!("counter".parse::<MetricKind>().unwrap(), MetricKind::Counter);
        assert!("histogram".parse::<MetricKind>().is_err());
    }

    #[test]
    fn test_value_display() {
        assert_eq!(MetricValue::Gauge(0.1).to_string(), "0.1");
        assert_eq!(MetricValue::Counter(150).to_string(), "150");
    }
}
