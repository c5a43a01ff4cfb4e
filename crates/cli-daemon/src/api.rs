//! HTTP surface of the daemon.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use log::{error, warn};
use serde::Deserialize;
use serde_json::{json, Value};
use tower_http::cors::{AllowOrigin, Any, CorsLayer};

use subflix::{ContentCategory, ProcessingJob, ScanSummary, Settings, SettingsUpdate, SubflixError, SubflixService, VideoFile};

type AppState = Arc<SubflixService>;

/// Wrapper so core errors can be returned from handlers
pub struct AppError(SubflixError);

impl From<SubflixError> for AppError {
    fn from(e: SubflixError) -> Self {
        AppError(e)
    }
}

pub fn status_for(err: &SubflixError) -> StatusCode {
    match err.code() {
        "not_configured" | "invalid_category" | "no_subtitle" => StatusCode::BAD_REQUEST,
        "not_found" => StatusCode::NOT_FOUND,
        "job_already_active" | "invalid_transition" => StatusCode::CONFLICT,
        "queue_full" | "pool_closed" => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = status_for(&self.0);
        if status.is_server_error() {
            error!("Request failed ({}): {}", status, self.0);
        }
        let body = json!({
            "detail": self.0.to_string(),
            "code": self.0.code(),
        });
        (status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<T, AppError>;

fn cors_layer(origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    if origins.iter().any(|o| o == "*") {
        return layer.allow_origin(Any);
    }
    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|o| match HeaderValue::from_str(o) {
            Ok(value) => Some(value),
            Err(_) => {
                warn!("Ignoring invalid CORS origin: {}", o);
                None
            }
        })
        .collect();
    layer.allow_origin(AllowOrigin::list(allowed))
}

/// Build the complete router
pub fn router(service: AppState) -> Router {
    let cors = cors_layer(&service.config().cors_origins);

    Router::new()
        .route("/health", get(health))
        .route("/api/", get(banner))
        .route("/api/settings", get(get_settings).put(update_settings))
        .route("/api/scan", post(scan))
        .route("/api/video-files", get(list_videos).delete(clear_videos))
        .route("/api/process/:video_file_id", post(process_video))
        .route("/api/jobs", get(list_jobs).delete(clear_jobs))
        .route("/api/jobs/:job_id", get(get_job))
        .layer(cors)
        .with_state(service)
}

async fn health() -> &'static str {
    "ok"
}

async fn banner() -> Json<Value> {
    Json(json!({ "message": "Subflix subtitle embedding API" }))
}

async fn get_settings(State(service): State<AppState>) -> ApiResult<Json<Settings>> {
    Ok(Json(service.settings().await?))
}

async fn update_settings(
    State(service): State<AppState>,
    Json(update): Json<SettingsUpdate>,
) -> ApiResult<Json<Settings>> {
    Ok(Json(service.update_settings(&update).await?))
}

#[derive(Debug, Deserialize)]
struct ScanRequest {
    content_type: String,
}

async fn scan(
    State(service): State<AppState>,
    Json(request): Json<ScanRequest>,
) -> ApiResult<Json<ScanSummary>> {
    let category: ContentCategory = request.content_type.parse()?;
    Ok(Json(service.scan(category).await?))
}

#[derive(Debug, Deserialize)]
struct VideoQuery {
    content_type: Option<String>,
}

async fn list_videos(
    State(service): State<AppState>,
    Query(query): Query<VideoQuery>,
) -> ApiResult<Json<Vec<VideoFile>>> {
    let category = match query.content_type.as_deref() {
        Some(raw) if !raw.is_empty() => Some(raw.parse::<ContentCategory>()?),
        _ => None,
    };
    Ok(Json(service.list_videos(category).await?))
}

async fn clear_videos(State(service): State<AppState>) -> ApiResult<Json<Value>> {
    let deleted = service.clear_videos().await?;
    Ok(Json(json!({
        "message": format!("Deleted {} video files", deleted),
        "deleted": deleted,
    })))
}

async fn process_video(
    State(service): State<AppState>,
    Path(video_file_id): Path<String>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    let job = service.process_video(&video_file_id).await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(json!({
            "message": "Processing started",
            "job_id": job.id,
        })),
    ))
}

async fn list_jobs(State(service): State<AppState>) -> ApiResult<Json<Vec<ProcessingJob>>> {
    Ok(Json(service.list_jobs().await?))
}

async fn get_job(
    State(service): State<AppState>,
    Path(job_id): Path<String>,
) -> ApiResult<Json<ProcessingJob>> {
    Ok(Json(service.get_job(&job_id).await?))
}

async fn clear_jobs(State(service): State<AppState>) -> ApiResult<Json<Value>> {
    let deleted = service.clear_jobs().await?;
    Ok(Json(json!({
        "message": format!("Deleted {} finished jobs", deleted),
        "deleted": deleted,
    })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::{Method, Request};
    use http_body_util::BodyExt;
    use std::fs;
    use subflix::ffmpeg::{EmbedRequest, EncodeReport, Encoder};
    use subflix::{MemoryStore, RecordStore, SubflixConfig};
    use tower::ServiceExt;

    /// Never finishes, so jobs stay active for the duration of a test
    struct StalledEncoder;

    #[async_trait]
    impl Encoder for StalledEncoder {
        async fn embed(&self, _request: &EmbedRequest) -> Result<EncodeReport, SubflixError> {
            std::future::pending().await
        }
    }

    struct TestApp {
        router: Router,
        dir: tempfile::TempDir,
    }

    fn test_app() -> TestApp {
        let dir = tempfile::tempdir().unwrap();
        let mut config = SubflixConfig::default();
        config.library.movies_source_path = dir.path().join("movies").to_string_lossy().into_owned();
        config.library.movies_output_path = dir.path().join("out").to_string_lossy().into_owned();
        let store: Arc<dyn RecordStore> = Arc::new(MemoryStore::new());
        let service = Arc::new(SubflixService::new(store, config, Arc::new(StalledEncoder)));
        TestApp {
            router: router(service),
            dir,
        }
    }

    async fn call(app: &TestApp, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let request = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(json) => request
                .header("content-type", "application/json")
                .body(Body::from(json.to_string())),
            None => request.body(Body::empty()),
        }
        .unwrap();

        let response = app.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let value = serde_json::from_slice(&bytes).unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()));
        (status, value)
    }

    fn seed_library(app: &TestApp, names: &[&str]) {
        let movies = app.dir.path().join("movies");
        fs::create_dir_all(&movies).unwrap();
        for name in names {
            fs::write(movies.join(name), b"x").unwrap();
        }
    }

    #[tokio::test]
    async fn health_and_banner() {
        let app = test_app();
        let (status, body) = call(&app, Method::GET, "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, Value::String("ok".to_string()));

        let (status, body) = call(&app, Method::GET, "/api/", None).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body["message"].is_string());
    }

    #[tokio::test]
    async fn settings_round_trip() {
        let app = test_app();
        let (status, body) = call(&app, Method::GET, "/api/settings", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["tvshows_source_path"], "");

        let (status, body) = call(
            &app,
            Method::PUT,
            "/api/settings",
            Some(json!({"tvshows_source_path": "/media/tv"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["tvshows_source_path"], "/media/tv");
        assert!(body["movies_source_path"].as_str().unwrap().ends_with("movies"));
    }

    #[tokio::test]
    async fn scan_validates_category_and_configuration() {
        let app = test_app();
        let (status, body) = call(&app, Method::POST, "/api/scan", Some(json!({"content_type": "anime"}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "invalid_category");
        assert!(body["detail"].is_string());

        let (status, body) = call(&app, Method::POST, "/api/scan", Some(json!({"content_type": "tvshows"}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "not_configured");

        let (status, _) = call(&app, Method::GET, "/api/video-files?content_type=cartoons", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn scan_then_list_and_clear_videos() {
        let app = test_app();
        seed_library(&app, &["a.mkv", "a.en.srt", "b.mp4"]);

        let (status, body) = call(&app, Method::POST, "/api/scan", Some(json!({"content_type": "movies"}))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["scanned_files"], 2);
        assert_eq!(body["new_files"], 2);
        assert_eq!(body["updated_files"], 0);

        let (_, body) = call(&app, Method::GET, "/api/video-files?content_type=movie", None).await;
        assert_eq!(body.as_array().unwrap().len(), 2);
        let (_, body) = call(&app, Method::GET, "/api/video-files?content_type=tvshows", None).await;
        assert!(body.as_array().unwrap().is_empty());

        let (status, body) = call(&app, Method::DELETE, "/api/video-files", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["deleted"], 2);
    }

    #[tokio::test]
    async fn process_maps_each_failure_to_its_status() {
        let app = test_app();
        seed_library(&app, &["tagged.mkv", "tagged.eng.srt", "bare.mkv"]);
        let (_, scan) = call(&app, Method::POST, "/api/scan", Some(json!({"content_type": "movies"}))).await;
        let id_of = |name: &str| {
            scan["files"]
                .as_array()
                .unwrap()
                .iter()
                .find(|f| f["file_name"] == name)
                .unwrap()["id"]
                .as_str()
                .unwrap()
                .to_string()
        };

        let (status, body) = call(&app, Method::POST, "/api/process/nope", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["code"], "not_found");

        let (status, body) = call(&app, Method::POST, &format!("/api/process/{}", id_of("bare.mkv")), None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "no_subtitle");

        let uri = format!("/api/process/{}", id_of("tagged.mkv"));
        let (status, body) = call(&app, Method::POST, &uri, None).await;
        assert_eq!(status, StatusCode::ACCEPTED);
        let job_id = body["job_id"].as_str().unwrap().to_string();

        let (status, body) = call(&app, Method::POST, &uri, None).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["code"], "job_already_active");

        let (status, body) = call(&app, Method::GET, &format!("/api/jobs/{}", job_id), None).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body["output_path"].as_str().unwrap().ends_with("tagged.en.mkv"));

        let (_, jobs) = call(&app, Method::GET, "/api/jobs", None).await;
        assert_eq!(jobs.as_array().unwrap().len(), 1);

        // Active jobs survive a clear
        let (_, body) = call(&app, Method::DELETE, "/api/jobs", None).await;
        assert_eq!(body["deleted"], 0);
    }

    #[tokio::test]
    async fn unknown_job_is_404() {
        let app = test_app();
        let (status, body) = call(&app, Method::GET, "/api/jobs/missing", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["code"], "not_found");
    }

    #[test]
    fn dispatch_errors_are_unavailable() {
        assert_eq!(
            status_for(&SubflixError::QueueFull { capacity: 64 }),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(status_for(&SubflixError::PoolClosed), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(
            status_for(&SubflixError::EncoderTimeout {
                limit: std::time::Duration::from_secs(1)
            }),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        let response = AppError(SubflixError::QueueFull { capacity: 1 }).into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
