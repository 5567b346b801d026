//! Snapshot buffer encoders.
//!
//! The encoder takes a read lock on the buffer; the caller clears the
//! buffer right after the encoder returns, regardless of how the
//! shipment goes.

use tokio::sync::RwLock;

use pulse_core::{Metric, MetricEnvelope, PulseError};
use pulse_wire::convert;
use pulse_wire::pb::MetricsRequest;

/// A prepared shipment. The variant is fixed by the configured
/// transport: JSON ships over HTTP, protobuf over gRPC.
#[derive(Debug, Clone)]
pub enum Payload {
    Json(String),
    Proto(MetricsRequest),
}

/// Serialize the buffer as a JSON array of envelopes.
pub async fn encode_json(buffer: &RwLock<Vec<Metric>>) -> Result<String, PulseError> {
    let buf = buffer.read().await;
    let envelopes: Vec<MetricEnvelope> = buf.iter().map(MetricEnvelope::from).collect();
    serde_json::to_string(&envelopes).map_err(|e| PulseError::Decode(format!("encode batch: {}", e)))
}

/// Serialize the buffer as the binary envelope.
pub async fn encode_proto(buffer: &RwLock<Vec<Metric>>) -> MetricsRequest {
    let buf = buffer.read().await;
    convert::to_proto(&buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_encode_json_is_envelope_array() {
        let buffer = RwLock::new(vec![Metric::gauge("m1", 0.1), Metric::counter("m2", 1)]);
        let json = encode_json(&buffer).await.unwrap();
        assert_eq!(
            json,
            r#"[{"id":"m1","type":"gauge","value":0.1},{"id":"m2","type":"counter","delta":1}]"#
        );
    }

    #[tokio::test]
    async fn test_encode_empty_buffer() {
        let buffer = RwLock::new(Vec::new());
        assert_eq!(encode_json(&buffer).await.unwrap(), "[]");
        assert!(encode_proto(&buffer).await.metric.is_empty());
    }

    #[tokio::test]
    async fn test_encode_proto_keeps_order() {
        let buffer = RwLock::new(vec![Metric::counter("a", 1), Metric::gauge("b", 2.0)]);
        let req = encode_proto(&buffer).await;
        assert_eq!(req.metric[0].id, "a");
        assert_eq!(req.metric[1].id, "b");
    }
}
