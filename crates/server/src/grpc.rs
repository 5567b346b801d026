//! gRPC ingest: the unary `SendMetrics` call behind the trusted-subnet
//! gate, feeding the same store through the same retry wrapper as the
//! HTTP batch route.

use std::net::{IpAddr, ToSocketAddrs};

use ipnet::IpNet;
use tonic::codec::CompressionEncoding;
use tonic::metadata::MetadataMap;
use tonic::transport::Server;
use tonic::{Request, Response, Status};
use tracing::{info, warn};

use pulse_core::shutdown::Shutdown;
use pulse_core::PulseError;
use pulse_wire::convert::from_proto_record;
use pulse_wire::pb::monitoring_server::{Monitoring, MonitoringServer};
use pulse_wire::pb::{MetricResponse, MetricsRequest};

use crate::state::SharedState;

pub struct MonitoringService {
    state: SharedState,
    /// Empty means the gate is open.
    trusted: Vec<IpNet>,
}

impl MonitoringService {
    pub fn new(state: SharedState, trusted_subnet: Option<&str>) -> Result<Self, PulseError> {
        let mut trusted = Vec::new();
        if let Some(list) = trusted_subnet {
            for cidr in list.split(',').map(str::trim).filter(|s| !s.is_empty()) {
                let net: IpNet = cidr
                    .parse()
                    .map_err(|e| PulseError::Config(format!("trusted subnet '{}': {}", cidr, e)))?;
                trusted.push(net);
            }
        }
        Ok(Self { state, trusted })
    }

    fn check_subnet(&self, metadata: &MetadataMap) -> Result<(), Status> {
        if self.trusted.is_empty() {
            return Ok(());
        }
        let claimed = metadata
            .get("x-real-ip")
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| Status::permission_denied("source address missing"))?;
        let ip: IpAddr = claimed
            .parse()
            .map_err(|_| Status::permission_denied("source address unparseable"))?;
        if self.trusted.iter().any(|net| net.contains(&ip)) {
            Ok(())
        } else {
            Err(Status::permission_denied(
                "source address outside trusted subnet",
            ))
        }
    }
}

#[tonic::async_trait]
impl Monitoring for MonitoringService {
    async fn send_metrics(
        &self,
        request: Request<MetricsRequest>,
    ) -> Result<Response<MetricResponse>, Status> {
        self.check_subnet(request.metadata())?;

        let peer = request
            .metadata()
            .get("x-real-ip")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("unknown")
            .to_string();
        let batch = request.into_inner();
        info!(peer = %peer, records = batch.metric.len(), "grpc batch received");

        let mut metrics = Vec::with_capacity(batch.metric.len());
        for record in &batch.metric {
            match from_proto_record(record) {
                Ok(m) => metrics.push(m),
                Err(e) => warn!("skipping record '{}': {}", record.id, e),
            }
        }

        // Store writes run on their own task so a panic in the backend
        // surfaces as an error instead of tearing down the connection.
        let state = self.state.clone();
        let outcome = tokio::spawn(async move {
            state.retrier.write_batch(state.store.as_ref(), &metrics).await
        })
        .await;

        match outcome {
            Ok(Ok(())) => Ok(Response::new(MetricResponse {
                error: "OK".to_string(),
            })),
            Ok(Err(e)) => Err(Status::internal(e.to_string())),
            Err(join_err) => Err(Status::internal(format!("ingest task failed: {}", join_err))),
        }
    }
}

/// Serve the RPC transport until shutdown.
pub async fn serve(
    addr: String,
    service: MonitoringService,
    shutdown: Shutdown,
) -> Result<(), PulseError> {
    let socket_addr = addr
        .to_socket_addrs()
        .map_err(|e| PulseError::Config(format!("grpc bind address '{}': {}", addr, e)))?
        .next()
        .ok_or_else(|| PulseError::Config(format!("grpc bind address '{}' unresolvable", addr)))?;

    info!("grpc listening on {}", socket_addr);
    Server::builder()
        .trace_fn(|_| tracing::info_span!("grpc_ingest"))
        .add_service(
            MonitoringServer::new(service)
                .accept_compressed(CompressionEncoding::Gzip)
                .send_compressed(CompressionEncoding::Gzip),
        )
        .serve_with_shutdown(socket_addr, async move { shutdown.cancelled().await })
        .await
        .map_err(|e| PulseError::Transport(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::AppState;
    use pulse_core::{MetricKind, MetricValue};
    use pulse_storage::memory::MemStorage;
    use pulse_storage::retry::Retrier;
    use pulse_storage::MetricStore;
    use pulse_wire::convert::to_proto;
    use pulse_wire::pb::metrics_request::MetricRequest;
    use std::sync::Arc;

    fn service(trusted: Option<&str>) -> (MonitoringService, Arc<MemStorage>) {
        let mem = Arc::new(MemStorage::new());
        let state = Arc::new(AppState {
            store: mem.clone(),
            retrier: Retrier::with_params(
                std::time::Duration::from_millis(1),
                std::time::Duration::from_secs(5),
                0,
            ),
            sign_key: None,
            decryptor: None,
        });
        (MonitoringService::new(state, trusted).unwrap(), mem)
    }

    fn request_from(ip: Option<&str>) -> Request<MetricsRequest> {
        let batch = to_proto(&[
            pulse_core::Metric::gauge("g", 0.1),
            pulse_core::Metric::counter("c", 2),
        ]);
        let mut request = Request::new(batch);
        if let Some(ip) = ip {
            request
                .metadata_mut()
                .insert("x-real-ip", ip.parse().unwrap());
        }
        request
    }

    #[tokio::test]
    async fn test_outside_subnet_is_denied() {
        let (service, _) = service(Some("192.168.0.0/16"));
        let status = service
            .send_metrics(request_from(Some("10.0.0.5")))
            .await
            .unwrap_err();
        assert_eq!(status.code(), tonic::Code::PermissionDenied);
    }

    #[tokio::test]
    async fn test_missing_ip_is_denied_when_gated() {
        let (service, _) = service(Some("192.168.0.0/16"));
        let status = service.send_metrics(request_from(None)).await.unwrap_err();
        assert_eq!(status.code(), tonic::Code::PermissionDenied);
    }

    #[tokio::test]
    async fn test_inside_subnet_writes_batch() {
        let (service, store) = service(Some("192.168.0.0/16"));
        let response = service
            .send_metrics(request_from(Some("192.168.1.2")))
            .await
            .unwrap();
        assert_eq!(response.into_inner().error, "OK");
        assert_eq!(
            store.get_metric(MetricKind::Counter, "c").await.unwrap(),
            MetricValue::Counter(2)
        );
    }

    #[tokio::test]
    async fn test_open_gate_accepts_anyone() {
        let (service, _) = service(None);
        let response = service.send_metrics(request_from(None)).await.unwrap();
        assert_eq!(response.into_inner().error, "OK");
    }

    #[tokio::test]
    async fn test_unknown_kind_records_are_skipped() {
        let (service, store) = service(None);
        let mut request = Request::new(MetricsRequest::default());
        request.get_mut().metric.push(MetricRequest {
            mtype: "histogram".to_string(),
            id: "h".to_string(),
            delta: 0,
            value: 1.0,
        });
        request.get_mut().metric.push(MetricRequest {
            mtype: "counter".to_string(),
            id: "ok".to_string(),
            delta: 1,
            value: 0.0,
        });
        service.send_metrics(request).await.unwrap();
        assert!(store.get_metric(MetricKind::Gauge, "h").await.is_err());
        assert_eq!(
            store.get_metric(MetricKind::Counter, "ok").await.unwrap(),
            MetricValue::Counter(1)
        );
    }

    #[test]
    fn test_bad_cidr_is_config_error() {
        let mem = Arc::new(MemStorage::new());
        let state = Arc::new(AppState {
            store: mem,
            retrier: Retrier::new(),
            sign_key: None,
            decryptor: None,
        });
        assert!(matches!(
            MonitoringService::new(state, Some("not-a-cidr")),
            Err(PulseError::Config(_))
        ));
    }
}
