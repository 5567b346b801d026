//! HTTP routes: single and batch writes, point reads, the HTML
//! listing, and the store health probe.

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::middleware::{from_fn, from_fn_with_state};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use tracing::warn;

use pulse_core::{Metric, MetricEnvelope, MetricKind, MetricValue, PulseError};

use crate::middleware as mw;
use crate::state::SharedState;

const LISTING_TEMPLATE: &str = r#"<!DOCTYPE html>
<html>
<head><title>Metrics</title></head>
<body>
<pre>
{{ metrics }}</pre>
</body>
</html>
"#;

/// Map the error taxonomy onto HTTP statuses. Bodies are plain text
/// with a trailing newline.
pub(crate) fn error_response(err: &PulseError) -> Response {
    let status = match err {
        PulseError::NoValue => StatusCode::NOT_FOUND,
        PulseError::BadMetricType
        | PulseError::WrongMetricType
        | PulseError::WrongMetricValueType
        | PulseError::Decode(_)
        | PulseError::Auth(_) => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    let message = match err {
        PulseError::BadMetricType => "metric_type not found".to_string(),
        other => other.to_string(),
    };
    (status, format!("{}\n", message)).into_response()
}

pub fn router(state: SharedState) -> Router {
    Router::new()
        .route("/update/{mtype}/{id}/{value}", post(update_url))
        .route("/update/", post(update_json))
        .route("/updates/", post(updates_json))
        .route("/value/{mtype}/{id}", get(value_url))
        .route("/value/", post(value_json))
        .route("/", get(index))
        .route("/ping", get(ping))
        .layer(from_fn_with_state(state.clone(), mw::verify_signature))
        .layer(from_fn_with_state(state.clone(), mw::decrypt_body))
        .layer(from_fn(mw::gzip_codec))
        .layer(from_fn(mw::access_log))
        .with_state(state)
}

// ── Writes ────────────────────────────────────────────────────

async fn update_url(
    State(state): State<SharedState>,
    Path((mtype, id, value)): Path<(String, String, String)>,
    headers: HeaderMap,
) -> Response {
    if let Some(ct) = headers.get(header::CONTENT_TYPE).and_then(|v| v.to_str().ok()) {
        if !ct.is_empty() && !ct.starts_with("text/plain") {
            return (
                StatusCode::BAD_REQUEST,
                format!("wrong content type: {}\n", ct),
            )
                .into_response();
        }
    }

    let kind = match mtype.parse::<MetricKind>() {
        Ok(kind) => kind,
        Err(e) => return error_response(&e),
    };
    let metric_value = match kind {
        MetricKind::Gauge => match value.parse::<f64>() {
            Ok(v) => MetricValue::Gauge(v),
            Err(_) => {
                return (StatusCode::BAD_REQUEST, "can't parse gauge metric\n").into_response()
            }
        },
        MetricKind::Counter => match value.parse::<i64>() {
            Ok(d) => MetricValue::Counter(d),
            Err(_) => {
                return (StatusCode::BAD_REQUEST, "can't parse counter metric\n").into_response()
            }
        },
    };

    match state
        .retrier
        .write_metric(state.store.as_ref(), &id, metric_value)
        .await
    {
        Ok(()) => (StatusCode::OK, "OK").into_response(),
        Err(e) => error_response(&e),
    }
}

fn require_json(headers: &HeaderMap) -> Result<(), Response> {
    let is_json = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|ct| ct.starts_with("application/json"))
        .unwrap_or(false);
    if is_json {
        Ok(())
    } else {
        Err((StatusCode::BAD_REQUEST, "expected application/json\n").into_response())
    }
}

async fn update_json(
    State(state): State<SharedState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if let Err(resp) = require_json(&headers) {
        return resp;
    }
    let envelope: MetricEnvelope = match serde_json::from_slice(&body) {
        Ok(e) => e,
        Err(e) => return error_response(&PulseError::Decode(e.to_string())),
    };
    let metric = match Metric::try_from(&envelope) {
        Ok(m) => m,
        Err(e) => return error_response(&e),
    };

    match state
        .retrier
        .write_metric(state.store.as_ref(), &metric.id, metric.value)
        .await
    {
        Ok(()) => Json(envelope).into_response(),
        Err(e) => error_response(&e),
    }
}

async fn updates_json(
    State(state): State<SharedState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if let Err(resp) = require_json(&headers) {
        return resp;
    }
    let envelopes: Vec<MetricEnvelope> = match serde_json::from_slice(&body) {
        Ok(e) => e,
        Err(e) => return error_response(&PulseError::Decode(e.to_string())),
    };

    let mut accepted = Vec::with_capacity(envelopes.len());
    let mut metrics = Vec::with_capacity(envelopes.len());
    for envelope in envelopes {
        match Metric::try_from(&envelope) {
            Ok(m) => {
                metrics.push(m);
                accepted.push(envelope);
            }
            Err(e) => warn!("skipping batch entry '{}': {}", envelope.id, e),
        }
    }

    match state
        .retrier
        .write_batch(state.store.as_ref(), &metrics)
        .await
    {
        Ok(()) => Json(accepted).into_response(),
        Err(e) => error_response(&e),
    }
}

// ── Reads ─────────────────────────────────────────────────────

async fn value_url(
    State(state): State<SharedState>,
    Path((mtype, id)): Path<(String, String)>,
) -> Response {
    let kind = match mtype.parse::<MetricKind>() {
        Ok(kind) => kind,
        Err(e) => return error_response(&e),
    };
    match state.retrier.get_metric(state.store.as_ref(), kind, &id).await {
        Ok(value) => (StatusCode::OK, format!("{}\n", value)).into_response(),
        Err(e) => error_response(&e),
    }
}

async fn value_json(
    State(state): State<SharedState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if let Err(resp) = require_json(&headers) {
        return resp;
    }
    let mut envelope: MetricEnvelope = match serde_json::from_slice(&body) {
        Ok(e) => e,
        Err(e) => return error_response(&PulseError::Decode(e.to_string())),
    };
    let kind = match envelope.mtype.parse::<MetricKind>() {
        Ok(kind) => kind,
        Err(e) => return error_response(&e),
    };

    match state
        .retrier
        .get_metric(state.store.as_ref(), kind, &envelope.id)
        .await
    {
        Ok(MetricValue::Gauge(v)) => {
            envelope.value = Some(v);
            envelope.delta = None;
            Json(envelope).into_response()
        }
        Ok(MetricValue::Counter(d)) => {
            envelope.delta = Some(d);
            envelope.value = None;
            Json(envelope).into_response()
        }
        Err(e) => error_response(&e),
    }
}

// ── Listing & health ──────────────────────────────────────────

async fn index(State(state): State<SharedState>) -> Response {
    match state.retrier.get_all_text(state.store.as_ref()).await {
        Ok(text) => Html(minijinja::render!(LISTING_TEMPLATE, metrics => text)).into_response(),
        Err(e) => error_response(&e),
    }
}

async fn ping(State(state): State<SharedState>) -> Response {
    match state.retrier.ping(state.store.as_ref()).await {
        Ok(()) => (StatusCode::OK, "OK").into_response(),
        Err(e) => error_response(&e),
    }
}
