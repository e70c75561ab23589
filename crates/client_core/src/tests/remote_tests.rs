use super::*;

use std::sync::Arc;

use axum::{
    extract::{Multipart, State},
    http::{header, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};
use tokio::{net::TcpListener, sync::Mutex};

#[derive(Clone, Default)]
struct BackendState {
    pdf_fields: Arc<Mutex<Vec<(String, String)>>>,
    saved_cases: Arc<Mutex<Vec<Value>>>,
}

async fn spawn_backend(app: Router) -> anyhow::Result<String> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    Ok(format!("http://{addr}/api"))
}

fn client(base_url: &str) -> HttpRemoteClient {
    HttpRemoteClient::new(base_url, Duration::from_secs(5), Duration::from_secs(1))
        .expect("http client")
}

fn image() -> ImageUpload {
    ImageUpload::new("chest.png", b"\x89PNG fake".to_vec()).with_mime_type("image/png")
}

async fn healthy_backend(state: BackendState) -> String {
    async fn caption() -> Json<Value> {
        Json(json!({
            "success": true,
            "caption": "Remote caption: no acute findings.",
            "confidence": 0.93,
            "processing_time": 1.25
        }))
    }

    async fn save_case(State(state): State<BackendState>, Json(body): Json<Value>) -> Json<Value> {
        state.saved_cases.lock().await.push(body);
        Json(json!({ "success": true, "case_id": "CASE-0007" }))
    }

    async fn pdf(State(state): State<BackendState>, mut multipart: Multipart) -> impl IntoResponse {
        while let Ok(Some(field)) = multipart.next_field().await {
            let name = field.name().unwrap_or_default().to_string();
            let value = if name == "image" {
                format!("{} bytes", field.bytes().await.map(|b| b.len()).unwrap_or(0))
            } else {
                field.text().await.unwrap_or_default()
            };
            state.pdf_fields.lock().await.push((name, value));
        }
        (
            [(header::CONTENT_TYPE, "application/pdf")],
            b"%PDF-1.4 remote".to_vec(),
        )
    }

    async fn health() -> Json<Value> {
        Json(json!({ "model_loaded": true, "status": "healthy", "device": "cpu" }))
    }

    let app = Router::new()
        .route("/api/generate-caption", post(caption))
        .route("/api/save-case", post(save_case))
        .route("/api/generate-pdf", post(pdf))
        .route("/api/health", get(health))
        .with_state(state);
    spawn_backend(app).await.expect("spawn backend")
}

#[tokio::test]
async fn caption_success_maps_to_caption_record() {
    let base_url = healthy_backend(BackendState::default()).await;
    let record = client(&base_url)
        .generate_caption(&image())
        .await
        .expect("caption");

    assert_eq!(record.text, "Remote caption: no acute findings.");
    assert_eq!(record.confidence, 0.93);
    assert_eq!(record.latency_seconds, 1.25);
}

#[tokio::test]
async fn save_case_posts_flat_metadata_and_returns_backend_id() {
    let state = BackendState::default();
    let base_url = healthy_backend(state.clone()).await;
    let case = CaseMetadata::new()
        .with_field("patientName", "Jane Roe")
        .with_caption("Clear lungs.");

    let case_id = client(&base_url).save_case(&case).await.expect("save");
    assert_eq!(case_id, CaseId("CASE-0007".into()));

    let saved = state.saved_cases.lock().await;
    assert_eq!(saved.len(), 1);
    assert_eq!(saved[0]["patientName"], "Jane Roe");
    assert_eq!(saved[0]["aiCaption"], "Clear lungs.");
}

#[tokio::test]
async fn pdf_forwards_image_and_every_field() {
    let state = BackendState::default();
    let base_url = healthy_backend(state.clone()).await;
    let case = CaseMetadata::new()
        .with_field("patientId", "P-1")
        .with_field("findings", "Normal")
        .with_caption("Clear.");

    let bytes = client(&base_url)
        .generate_pdf(&image(), &case)
        .await
        .expect("pdf");
    assert_eq!(bytes, b"%PDF-1.4 remote".to_vec());

    let fields = state.pdf_fields.lock().await.clone();
    assert!(fields.contains(&("image".to_string(), "9 bytes".to_string())));
    assert!(fields.contains(&("patientId".to_string(), "P-1".to_string())));
    assert!(fields.contains(&("findings".to_string(), "Normal".to_string())));
    assert!(fields.contains(&("aiCaption".to_string(), "Clear.".to_string())));
}

#[tokio::test]
async fn health_reads_model_loaded() {
    let base_url = healthy_backend(BackendState::default()).await;
    let health = client(&base_url).health().await.expect("health");
    assert!(health.model_loaded);
    assert_eq!(health.device.as_deref(), Some("cpu"));
}

#[tokio::test]
async fn connection_refused_is_a_transport_error() {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    drop(listener);

    let err = client(&format!("http://{addr}/api"))
        .generate_caption(&image())
        .await
        .expect_err("nothing listening");
    assert_eq!(err.code(), ErrorCode::Transport);
}

#[tokio::test]
async fn server_error_status_carries_backend_message() {
    let app = Router::new().route(
        "/api/generate-caption",
        post(|| async {
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": "Model not loaded" })),
            )
        }),
    );
    let base_url = spawn_backend(app).await.expect("spawn");

    let err = client(&base_url)
        .generate_caption(&image())
        .await
        .expect_err("500");
    match err {
        RemoteError::Status { status, message } => {
            assert_eq!(status, 500);
            assert_eq!(message, "Model not loaded");
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn unparsable_body_is_malformed() {
    let app = Router::new().route(
        "/api/generate-caption",
        post(|| async { "definitely not json" }),
    );
    let base_url = spawn_backend(app).await.expect("spawn");

    let err = client(&base_url)
        .generate_caption(&image())
        .await
        .expect_err("bad body");
    assert_eq!(err.code(), ErrorCode::Malformed);
}

#[tokio::test]
async fn success_false_is_an_application_error() {
    let app = Router::new()
        .route(
            "/api/generate-caption",
            post(|| async { Json(json!({ "success": false, "error": "No image provided" })) }),
        )
        .route(
            "/api/save-case",
            post(|| async { Json(json!({ "success": false, "error": "Database locked" })) }),
        )
        .route(
            "/api/generate-pdf",
            post(|| async { Json(json!({ "error": "Template missing" })) }),
        );
    let base_url = spawn_backend(app).await.expect("spawn");
    let remote = client(&base_url);

    let err = remote.generate_caption(&image()).await.expect_err("caption");
    assert!(err.is_application());
    assert_eq!(err.to_api_error().message, "No image provided");

    let err = remote
        .save_case(&CaseMetadata::new())
        .await
        .expect_err("save");
    assert!(err.is_application());

    let err = remote
        .generate_pdf(&image(), &CaseMetadata::new())
        .await
        .expect_err("pdf");
    assert!(err.is_application());
    assert_eq!(err.to_api_error().message, "Template missing");
}

#[tokio::test]
async fn missing_backend_always_fails_at_transport_level() {
    let remote = MissingRemoteBackend;
    let err = remote.health().await.expect_err("missing");
    assert_eq!(err.code(), ErrorCode::Transport);
}

#[test]
fn caption_without_text_is_malformed() {
    let body = CaptionResponse {
        success: Some(true),
        caption: Some("   ".into()),
        ..CaptionResponse::default()
    };
    let err = caption_from_response(body, Duration::from_millis(10)).expect_err("empty");
    assert_eq!(err.code(), ErrorCode::Malformed);
}

#[test]
fn caption_defaults_fill_confidence_and_measured_latency() {
    let body = CaptionResponse {
        status: Some("success".into()),
        caption: Some("Clear.".into()),
        ..CaptionResponse::default()
    };
    let record = caption_from_response(body, Duration::from_millis(1500)).expect("record");
    assert_eq!(record.confidence, DEFAULT_REMOTE_CONFIDENCE);
    assert_eq!(record.latency_seconds, 1.5);
}

#[tokio::test]
async fn base_url_trailing_slash_is_trimmed() {
    let remote = client("http://localhost:5000/api/");
    assert_eq!(remote.base_url(), "http://localhost:5000/api");
    assert_eq!(remote.endpoint("health"), "http://localhost:5000/api/health");
}
