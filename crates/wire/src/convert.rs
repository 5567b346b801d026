//! Conversions between the core metric model and the protobuf records.

use pulse_core::{Metric, MetricValue, PulseError, COUNTER_TYPE, GAUGE_TYPE};

use crate::pb::metrics_request::MetricRequest;
use crate::pb::MetricsRequest;

/// Encode metrics into the binary envelope. Both `delta` and `value`
/// are always present on the wire; the non-discriminated field is zero.
pub fn to_proto(metrics: &[Metric]) -> MetricsRequest {
    let mut request = MetricsRequest::default();
    for m in metrics {
        let record = match m.value {
            MetricValue::Gauge(value) => MetricRequest {
                mtype: GAUGE_TYPE.to_string(),
                id: m.id.clone(),
                delta: 0,
                value,
            },
            MetricValue::Counter(delta) => MetricRequest {
                mtype: COUNTER_TYPE.to_string(),
                id: m.id.clone(),
                delta,
                value: 0.0,
            },
        };
        request.metric.push(record);
    }
    request
}

/// Decode a single record, discriminating by `mtype`.
pub fn from_proto_record(record: &MetricRequest) -> Result<Metric, PulseError> {
    match record.mtype.as_str() {
        GAUGE_TYPE => Ok(Metric::gauge(record.id.clone(), record.value)),
        COUNTER_TYPE => Ok(Metric::counter(record.id.clone(), record.delta)),
        _ => Err(PulseError::BadMetricType),
    }
}
