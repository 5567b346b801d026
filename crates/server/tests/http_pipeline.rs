//! End-to-end tests of the HTTP ingest pipeline: routes, middleware
//! chain, signing, encryption, and compression.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use tower::ServiceExt;

use pulse_server::api;
use pulse_server::state::AppState;
use pulse_storage::memory::MemStorage;
use pulse_storage::retry::Retrier;
use pulse_wire::crypt::{Decryptor, Encryptor};
use pulse_wire::{gzip, sign};

fn fast_retrier() -> Retrier {
    Retrier::with_params(Duration::from_millis(1), Duration::from_secs(5), 0)
}

fn app(sign_key: Option<&str>, decryptor: Option<Decryptor>) -> Router {
    let state = Arc::new(AppState {
        store: Arc::new(MemStorage::new()),
        retrier: fast_retrier(),
        sign_key: sign_key.map(String::from),
        decryptor,
    });
    api::router(state)
}

async fn body_string(response: axum::response::Response) -> String {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    String::from_utf8(bytes.to_vec()).unwrap()
}

fn post(uri: &str, content_type: &str, body: impl Into<Body>) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, content_type)
        .body(body.into())
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

// ── Plaintext URL routes ──────────────────────────────────────

#[tokio::test]
async fn test_gauge_roundtrip() {
    let app = app(None, None);

    let response = app
        .clone()
        .oneshot(post("/update/gauge/testGauge/0.1", "text/plain", Body::empty()))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_string(response).await, "OK");

    let response = app.oneshot(get("/value/gauge/testGauge")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_string(response).await, "0.1\n");
}

#[tokio::test]
async fn test_counter_accumulates_across_writes() {
    let app = app(None, None);

    for delta in ["100", "50"] {
        let uri = format!("/update/counter/testCounter/{}", delta);
        let response = app
            .clone()
            .oneshot(post(&uri, "text/plain", Body::empty()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    let response = app.oneshot(get("/value/counter/testCounter")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_string(response).await, "150\n");
}

#[tokio::test]
async fn test_unknown_metric_type_is_rejected() {
    let app = app(None, None);
    let response = app
        .oneshot(post("/update/qwe/x/0.1", "text/plain", Body::empty()))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_string(response).await, "metric_type not found\n");
}

#[tokio::test]
async fn test_unparseable_value_is_rejected() {
    let app = app(None, None);
    let response = app
        .clone()
        .oneshot(post("/update/gauge/g/abc", "text/plain", Body::empty()))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_string(response).await, "can't parse gauge metric\n");

    let response = app
        .oneshot(post("/update/counter/c/1.5", "text/plain", Body::empty()))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_string(response).await, "can't parse counter metric\n");
}

#[tokio::test]
async fn test_wrong_content_type_on_url_route() {
    let app = app(None, None);
    let response = app
        .oneshot(post("/update/gauge/g/0.1", "application/xml", Body::empty()))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_missing_metric_is_not_found() {
    let app = app(None, None);
    let response = app.oneshot(get("/value/gauge/absent")).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

// ── JSON routes ───────────────────────────────────────────────

#[tokio::test]
async fn test_single_json_write_echoes_envelope() {
    let app = app(None, None);
    let body = r#"{"id":"heap","type":"gauge","value":2.5}"#;
    let response = app
        .clone()
        .oneshot(post("/update/", "application/json", body))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        body_string(response).await,
        r#"{"id":"heap","type":"gauge","value":2.5}"#
    );

    let response = app
        .oneshot(post("/value/", "application/json", r#"{"id":"heap","type":"gauge"}"#))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        body_string(response).await,
        r#"{"id":"heap","type":"gauge","value":2.5}"#
    );
}

#[tokio::test]
async fn test_batch_json_write_then_point_reads() {
    let app = app(None, None);
    let body = r#"[{"id":"m1","type":"gauge","value":0.1},{"id":"m2","type":"counter","delta":1}]"#;
    let response = app
        .clone()
        .oneshot(post("/updates/", "application/json", body))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app.clone().oneshot(get("/value/gauge/m1")).await.unwrap();
    assert_eq!(body_string(response).await, "0.1\n");
    let response = app.oneshot(get("/value/counter/m2")).await.unwrap();
    assert_eq!(body_string(response).await, "1\n");
}

#[tokio::test]
async fn test_json_route_requires_json_content_type() {
    let app = app(None, None);
    let response = app
        .oneshot(post("/update/", "text/plain", r#"{"id":"x","type":"counter","delta":1}"#))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

// ── Listing & ping ────────────────────────────────────────────

#[tokio::test]
async fn test_listing_renders_sorted_sections() {
    let app = app(None, None);
    for uri in [
        "/update/gauge/zeta/1.5",
        "/update/gauge/alpha/0.5",
        "/update/counter/hits/3",
    ] {
        app.clone()
            .oneshot(post(uri, "text/plain", Body::empty()))
            .await
            .unwrap();
    }

    let response = app.oneshot(get("/")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let html = body_string(response).await;
    assert!(html.contains("---Counters---\nhits: 3\n---Gauge---\nalpha: 0.5\nzeta: 1.5\n"));
}

#[tokio::test]
async fn test_ping_reports_store_liveness() {
    let app = app(None, None);
    let response = app.oneshot(get("/ping")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_string(response).await, "OK");
}

// ── Gzip ──────────────────────────────────────────────────────

#[tokio::test]
async fn test_gzip_request_body_is_decoded() {
    let app = app(None, None);
    let body = r#"[{"id":"packed","type":"counter","delta":4}]"#;
    let packed = gzip::compress(body.as_bytes()).unwrap();

    let request = Request::builder()
        .method("POST")
        .uri("/updates/")
        .header(header::CONTENT_TYPE, "application/json")
        .header(header::CONTENT_ENCODING, "gzip")
        .body(Body::from(packed))
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app.oneshot(get("/value/counter/packed")).await.unwrap();
    assert_eq!(body_string(response).await, "4\n");
}

#[tokio::test]
async fn test_html_response_is_compressed_on_request() {
    let app = app(None, None);
    let request = Request::builder()
        .uri("/")
        .header(header::ACCEPT_ENCODING, "gzip")
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get(header::CONTENT_ENCODING).unwrap(),
        "gzip"
    );
    let packed = response.into_body().collect().await.unwrap().to_bytes();
    let html = String::from_utf8(gzip::decompress(&packed).unwrap()).unwrap();
    assert!(html.contains("---Counters---"));
}

#[tokio::test]
async fn test_plain_text_response_is_not_compressed() {
    let app = app(None, None);
    let request = Request::builder()
        .method("POST")
        .uri("/update/gauge/g/1")
        .header(header::CONTENT_TYPE, "text/plain")
        .header(header::ACCEPT_ENCODING, "gzip")
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().get(header::CONTENT_ENCODING).is_none());
}

// ── Signing ───────────────────────────────────────────────────

const SECRET: &str = "Kaib8eel";
const SIGNED_BODY: &str = "Test body need to sign server ans";

#[tokio::test]
async fn test_wrong_signature_is_rejected() {
    let app = app(Some(SECRET), None);
    let request = Request::builder()
        .method("POST")
        .uri("/updates/")
        .header(header::CONTENT_TYPE, "application/json")
        .header(sign::SIGN_HEADER, "wronghash")
        .body(Body::from(SIGNED_BODY))
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_correct_signature_is_accepted() {
    let app = app(Some(SECRET), None);
    let body = r#"[{"id":"signed","type":"counter","delta":2}]"#;
    let request = Request::builder()
        .method("POST")
        .uri("/updates/")
        .header(header::CONTENT_TYPE, "application/json")
        .header(sign::SIGN_HEADER, sign::sign(SECRET, body.as_bytes()))
        .body(Body::from(body))
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_responses_are_signed_when_key_configured() {
    let app = app(Some(SECRET), None);
    let response = app.oneshot(get("/ping")).await.unwrap();
    let signature = response
        .headers()
        .get(sign::SIGN_HEADER)
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();
    let body = body_string(response).await;
    assert!(sign::verify(SECRET, body.as_bytes(), &signature).is_ok());
}

// ── Encryption ────────────────────────────────────────────────

fn keypair() -> (Encryptor, Decryptor) {
    let mut rng = rand::thread_rng();
    let private = rsa::RsaPrivateKey::new(&mut rng, 2048).unwrap();
    let public = rsa::RsaPublicKey::from(&private);
    (Encryptor::new(public), Decryptor::new(private))
}

#[tokio::test]
async fn test_encrypted_batch_is_decrypted_and_stored() {
    let (encryptor, decryptor) = keypair();
    let app = app(None, Some(decryptor));

    let plaintext = r#"[{"id":"sealed","type":"gauge","value":7.5}]"#;
    let body = encryptor.encrypt(plaintext.as_bytes()).unwrap();
    let response = app
        .clone()
        .oneshot(post("/updates/", "application/json", body))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app.oneshot(get("/value/gauge/sealed")).await.unwrap();
    assert_eq!(body_string(response).await, "7.5\n");
}

#[tokio::test]
async fn test_signature_verified_over_plaintext_after_decrypt() {
    let (encryptor, decryptor) = keypair();
    let app = app(Some(SECRET), Some(decryptor));

    let plaintext = r#"[{"id":"both","type":"counter","delta":9}]"#;
    // Sign-before-encrypt on the sending side.
    let signature = sign::sign(SECRET, plaintext.as_bytes());
    let body = encryptor.encrypt(plaintext.as_bytes()).unwrap();

    let request = Request::builder()
        .method("POST")
        .uri("/updates/")
        .header(header::CONTENT_TYPE, "application/json")
        .header(sign::SIGN_HEADER, signature)
        .body(Body::from(body))
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app.oneshot(get("/value/counter/both")).await.unwrap();
    assert_eq!(body_string(response).await, "9\n");
}

#[tokio::test]
async fn test_garbage_ciphertext_is_rejected() {
    let (_, decryptor) = keypair();
    let app = app(None, Some(decryptor));
    let response = app
        .oneshot(post("/updates/", "application/json", "%%% not base64 %%%"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}
