//! Ingest pipeline middleware, outermost first: access log, gzip,
//! asymmetric decrypt, HMAC verify. Each layer either recovers locally
//! (replacing the request body) or writes the HTTP error itself.
//!
//! Decryption runs before signature verification: the agent signs the
//! plaintext and encrypts afterwards, so the server must verify what
//! it decrypted.

use std::sync::Arc;
use std::time::Instant;

use axum::body::{Body, Bytes, HttpBody};
use axum::extract::{Request, State};
use axum::http::{header, HeaderName, HeaderValue, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use tracing::info;

use pulse_wire::{gzip, sign};

use crate::api::error_response;
use crate::state::AppState;

/// Upper bound when buffering request and response bodies.
const BODY_LIMIT: usize = 32 * 1024 * 1024;

/// Content types worth compressing on the way out.
const COMPRESSIBLE_TYPES: [&str; 2] = ["text/html", "application/json"];

// ── Access log ────────────────────────────────────────────────

pub async fn access_log(req: Request, next: Next) -> Response {
    let method = req.method().clone();
    let uri = req.uri().clone();
    let start = Instant::now();

    let response = next.run(req).await;

    info!(
        method = %method,
        uri = %uri,
        status = response.status().as_u16(),
        duration_ms = start.elapsed().as_millis() as u64,
        bytes = response.body().size_hint().exact().unwrap_or(0),
        "request"
    );
    response
}

// ── Gzip ──────────────────────────────────────────────────────

fn header_contains(req_headers: &axum::http::HeaderMap, name: header::HeaderName, token: &str) -> bool {
    req_headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.contains(token))
        .unwrap_or(false)
}

/// Decode gzip request bodies; compress compressible responses when
/// the client advertises `Accept-Encoding: gzip`.
pub async fn gzip_codec(req: Request, next: Next) -> Response {
    let accepts_gzip = header_contains(req.headers(), header::ACCEPT_ENCODING, "gzip");
    let sends_gzip = header_contains(req.headers(), header::CONTENT_ENCODING, "gzip");

    let req = if sends_gzip {
        let (mut parts, body) = req.into_parts();
        let bytes = match axum::body::to_bytes(body, BODY_LIMIT).await {
            Ok(b) => b,
            Err(_) => return StatusCode::BAD_REQUEST.into_response(),
        };
        match gzip::decompress(&bytes) {
            Ok(plain) => {
                parts.headers.remove(header::CONTENT_ENCODING);
                Request::from_parts(parts, Body::from(plain))
            }
            Err(e) => return error_response(&e),
        }
    } else {
        req
    };

    let response = next.run(req).await;

    if !accepts_gzip {
        return response;
    }
    let compressible = response
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|ct| COMPRESSIBLE_TYPES.iter().any(|t| ct.starts_with(t)))
        .unwrap_or(false);
    if !compressible {
        return response;
    }

    let (mut parts, body) = response.into_parts();
    let bytes = match axum::body::to_bytes(body, BODY_LIMIT).await {
        Ok(b) => b,
        Err(_) => return StatusCode::INTERNAL_SERVER_ERROR.into_response(),
    };
    match gzip::compress(&bytes) {
        Ok(packed) => {
            parts
                .headers
                .insert(header::CONTENT_ENCODING, HeaderValue::from_static("gzip"));
            parts.headers.remove(header::CONTENT_LENGTH);
            Response::from_parts(parts, Body::from(packed))
        }
        Err(_) => StatusCode::INTERNAL_SERVER_ERROR.into_response(),
    }
}

// ── Asymmetric decrypt ────────────────────────────────────────

/// When a private key is configured, the whole request body is a
/// Base64 ciphertext; replace it with the plaintext.
pub async fn decrypt_body(
    State(state): State<Arc<AppState>>,
    req: Request,
    next: Next,
) -> Response {
    let Some(decryptor) = &state.decryptor else {
        return next.run(req).await;
    };

    let (parts, body) = req.into_parts();
    let bytes = match axum::body::to_bytes(body, BODY_LIMIT).await {
        Ok(b) => b,
        Err(_) => return StatusCode::BAD_REQUEST.into_response(),
    };
    match decryptor.decrypt(&bytes) {
        Ok(plain) => next.run(Request::from_parts(parts, Body::from(plain))).await,
        Err(e) => error_response(&e),
    }
}

// ── HMAC verify + response signing ────────────────────────────

pub async fn verify_signature(
    State(state): State<Arc<AppState>>,
    req: Request,
    next: Next,
) -> Response {
    let Some(secret) = state.sign_key.as_deref() else {
        return next.run(req).await;
    };

    let claimed = req
        .headers()
        .get(sign::SIGN_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.to_string());

    let response = match claimed {
        Some(signature) => {
            let (parts, body) = req.into_parts();
            let bytes = match axum::body::to_bytes(body, BODY_LIMIT).await {
                Ok(b) => b,
                Err(_) => return StatusCode::BAD_REQUEST.into_response(),
            };
            if let Err(e) = sign::verify(secret, &bytes, &signature) {
                return error_response(&e);
            }
            next.run(Request::from_parts(parts, Body::from(bytes))).await
        }
        None => next.run(req).await,
    };

    sign_response(secret, response).await
}

/// Symmetric half of the contract: outgoing bodies carry their own
/// HMAC header.
async fn sign_response(secret: &str, response: Response) -> Response {
    let (mut parts, body) = response.into_parts();
    let bytes: Bytes = match axum::body::to_bytes(body, BODY_LIMIT).await {
        Ok(b) => b,
        Err(_) => return StatusCode::INTERNAL_SERVER_ERROR.into_response(),
    };
    let signature = sign::sign(secret, &bytes);
    if let Ok(value) = HeaderValue::from_str(&signature) {
        let name = HeaderName::from_static("hashsha256");
        parts.headers.insert(name, value);
    }
    Response::from_parts(parts, Body::from(bytes))
}
