//! Outbound transports: HTTP batch POST and unary gRPC.
//!
//! The HTTP path applies the payload transformations in contract
//! order: sign the plaintext, encrypt, compress, send. gRPC payloads
//! are typed messages; compression is negotiated by the transport and
//! signing/encryption do not apply.

use std::net::IpAddr;
use std::net::UdpSocket;

use reqwest::header::{ACCEPT_ENCODING, CONTENT_ENCODING, CONTENT_TYPE};
use tonic::codec::CompressionEncoding;
use tonic::metadata::MetadataValue;

use pulse_core::{AgentConfig, PulseError};
use pulse_storage::retry::Retrier;
use pulse_wire::crypt::Encryptor;
use pulse_wire::pb::monitoring_client::MonitoringClient;
use pulse_wire::pb::MetricsRequest;
use pulse_wire::{gzip, sign};

use crate::encode::Payload;

/// Local address an unconnected UDP socket towards the server would
/// use; sent as `X-Real-IP` so the ingest gate sees the agent's
/// outbound interface rather than a proxy hop.
pub fn local_outbound_ip(server_addr: &str) -> Result<IpAddr, PulseError> {
    let socket = UdpSocket::bind(("0.0.0.0", 0))
        .map_err(|e| PulseError::Transport(format!("bind probe socket: {}", e)))?;
    socket
        .connect(server_addr)
        .map_err(|e| PulseError::Transport(format!("resolve {}: {}", server_addr, e)))?;
    let local = socket
        .local_addr()
        .map_err(|e| PulseError::Transport(format!("local addr: {}", e)))?;
    Ok(local.ip())
}

pub struct HttpSender {
    client: reqwest::Client,
    url: String,
    real_ip: String,
    secret: Option<String>,
    encryptor: Option<Encryptor>,
    retrier: Retrier,
}

impl HttpSender {
    pub fn new(cfg: &AgentConfig, real_ip: IpAddr, retrier: Retrier) -> Result<Self, PulseError> {
        let encryptor = match &cfg.pub_key_file {
            Some(path) => Some(Encryptor::from_pem_file(path)?),
            None => None,
        };
        Ok(Self {
            client: reqwest::Client::new(),
            url: format!("http://{}/updates/", cfg.server_addr),
            real_ip: real_ip.to_string(),
            secret: cfg.key_enc.clone(),
            encryptor,
            retrier,
        })
    }

    pub async fn send(&self, payload: &str) -> Result<(), PulseError> {
        // Sign over the plaintext: the server verifies after decrypting.
        let signature = self.secret.as_deref().map(|k| sign::sign(k, payload.as_bytes()));

        let body = match &self.encryptor {
            Some(enc) => enc.encrypt(payload.as_bytes())?.into_bytes(),
            None => payload.as_bytes().to_vec(),
        };
        let body = gzip::compress(&body)?;

        let body_ref = &body;
        let signature_ref = &signature;
        self.retrier
            .run(|| async move {
                let mut request = self
                    .client
                    .post(&self.url)
                    .header(CONTENT_TYPE, "application/json")
                    .header(CONTENT_ENCODING, "gzip")
                    .header(ACCEPT_ENCODING, "gzip")
                    .header("X-Real-IP", self.real_ip.as_str());
                if let Some(sig) = signature_ref {
                    request = request.header(sign::SIGN_HEADER, sig.as_str());
                }
                let response = request
                    .body(body_ref.clone())
                    .send()
                    .await
                    .map_err(|e| PulseError::Transport(e.to_string()))?;
                if !response.status().is_success() {
                    return Err(PulseError::Transport(format!(
                        "status_code: {}",
                        response.status().as_u16()
                    )));
                }
                Ok(())
            })
            .await
    }
}

pub struct GrpcSender {
    endpoint: String,
    real_ip: String,
    retrier: Retrier,
}

impl GrpcSender {
    pub fn new(cfg: &AgentConfig, real_ip: IpAddr, retrier: Retrier) -> Self {
        Self {
            endpoint: format!("http://{}", cfg.server_addr),
            real_ip: real_ip.to_string(),
            retrier,
        }
    }

    pub async fn send(&self, batch: &MetricsRequest) -> Result<(), PulseError> {
        self.retrier
            .run(|| async move {
                // One dial per attempt: a fresh connection after a
                // transport error beats retrying a poisoned one.
                let mut client = MonitoringClient::connect(self.endpoint.clone())
                    .await
                    .map_err(|e| PulseError::Transport(format!("connect: {}", e)))?
                    .send_compressed(CompressionEncoding::Gzip)
                    .accept_compressed(CompressionEncoding::Gzip);

                let mut request = tonic::Request::new(batch.clone());
                let real_ip = MetadataValue::try_from(self.real_ip.as_str())
                    .map_err(|e| PulseError::Transport(format!("metadata: {}", e)))?;
                request.metadata_mut().insert("x-real-ip", real_ip);

                client
                    .send_metrics(request)
                    .await
                    .map_err(|e| PulseError::Transport(e.to_string()))?;
                Ok(())
            })
            .await
    }
}

/// The transport the worker pool ships through; fixed at startup.
pub enum Transport {
    Http(HttpSender),
    Grpc(GrpcSender),
}

impl Transport {
    pub async fn send(&self, payload: &Payload) -> Result<(), PulseError> {
        match (self, payload) {
            (Transport::Http(sender), Payload::Json(body)) => sender.send(body).await,
            (Transport::Grpc(sender), Payload::Proto(batch)) => sender.send(batch).await,
            _ => Err(PulseError::Transport(
                "payload does not match configured transport".to_string(),
            )),
        }
    }
}
