//! HTTP request handlers
//!
//! Routing is a plain match on method and path. Every handler produces a
//! complete response; errors become JSON `{"error": ...}` payloads with the
//! status from [`MediaError::to_http_status`].

use crate::error::MediaError;
use crate::metrics::MediaMetrics;
use crate::models::UploadedFile;
use crate::service::{MediaContent, MediaService};
use bytes::{Bytes, BytesMut};
use chrono::Utc;
use http::header::{HeaderValue, ACCEPT_RANGES, CONTENT_LENGTH, CONTENT_RANGE, CONTENT_TYPE, RANGE};
use http::{Method, Request, Response, StatusCode};
use http_body_util::{BodyExt, Full};
use serde_json::json;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, warn};

pub type HttpResponse = Response<Full<Bytes>>;

pub const UPLOAD_PATH: &str = "/api/video/upload/video";
pub const VIDEO_PREFIX: &str = "/api/video/static/video/";
pub const LIST_PATH: &str = "/api/video/list";
pub const HEALTH_PATH: &str = "/api/health";
pub const METRICS_PATH: &str = "/metrics";

const UPLOAD_FIELD: &str = "video";
const VIDEO_CONTENT_TYPE: &str = "video/mp4";
const JSON_CONTENT_TYPE: &str = "application/json";

/// Shared state of the HTTP layer
pub struct AppState {
    pub service: Arc<MediaService>,
    pub metrics: Arc<MediaMetrics>,
}

impl AppState {
    pub fn new(service: Arc<MediaService>, metrics: Arc<MediaMetrics>) -> Self {
        Self { service, metrics }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Route {
    Upload,
    Video,
    List,
    Health,
    Metrics,
    NotFound,
}

impl Route {
    fn resolve(method: &Method, path: &str) -> Self {
        match (method, path) {
            (&Method::POST, UPLOAD_PATH) => Route::Upload,
            (&Method::GET, LIST_PATH) => Route::List,
            (&Method::GET, HEALTH_PATH) => Route::Health,
            (&Method::GET, METRICS_PATH) => Route::Metrics,
            (&Method::GET, p) if p.starts_with(VIDEO_PREFIX) => Route::Video,
            _ => Route::NotFound,
        }
    }

    fn label(&self) -> &'static str {
        match self {
            Route::Upload => "upload",
            Route::Video => "video",
            Route::List => "list",
            Route::Health => "health",
            Route::Metrics => "metrics",
            Route::NotFound => "not_found",
        }
    }
}

/// Dispatch one request and record its metrics
pub async fn handle_request<B>(
    state: Arc<AppState>,
    req: Request<B>,
) -> Result<HttpResponse, http::Error>
where
    B: hyper::body::Body<Data = Bytes> + Send + 'static,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    let started = Instant::now();
    let route = Route::resolve(req.method(), req.uri().path());
    debug!("{} {} -> {}", req.method(), req.uri().path(), route.label());

    let response = match route {
        Route::Upload => upload(&state, req).await,
        Route::Video => {
            let raw = &req.uri().path()[VIDEO_PREFIX.len()..];
            let range = req
                .headers()
                .get(RANGE)
                .and_then(|value| value.to_str().ok())
                .map(str::to_string);
            match urlencoding::decode(raw) {
                Ok(filename) => video(&state, &filename, range.as_deref()).await,
                Err(_) => error_response(&MediaError::NotFound(raw.to_string())),
            }
        }
        Route::List => list(&state).await,
        Route::Health => health(&state).await,
        Route::Metrics => metrics(&state),
        Route::NotFound => json_response(StatusCode::NOT_FOUND, &json!({ "error": "Route not found" })),
    }?;

    state.metrics.record_request(
        route.label(),
        response.status().as_u16(),
        started.elapsed().as_secs_f64(),
    );
    Ok(response)
}

async fn upload<B>(state: &AppState, req: Request<B>) -> Result<HttpResponse, http::Error>
where
    B: hyper::body::Body<Data = Bytes> + Send + 'static,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    let file = match read_upload(state, req).await {
        Ok(file) => file,
        Err(e) => {
            if e.is_validation() {
                state.metrics.record_upload("rejected");
            }
            return error_response(&e);
        }
    };

    match state.service.save(file).await {
        Ok(_) => Response::builder()
            .status(StatusCode::NO_CONTENT)
            .body(Full::new(Bytes::new())),
        Err(e) => error_response(&e),
    }
}

/// Pull the `video` field out of a multipart body
///
/// The declared MIME type is checked before the body is read, and reading
/// stops once the size limit is exceeded.
async fn read_upload<B>(state: &AppState, req: Request<B>) -> Result<UploadedFile, MediaError>
where
    B: hyper::body::Body<Data = Bytes> + Send + 'static,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    let boundary = req
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .and_then(|content_type| multer::parse_boundary(content_type).ok())
        .ok_or(MediaError::MissingFile)?;

    let policy = state.service.policy();
    let mut multipart = multer::Multipart::new(req.into_body().into_data_stream(), boundary);

    while let Some(mut field) = multipart.next_field().await.map_err(multipart_error)? {
        if field.name() != Some(UPLOAD_FIELD) {
            continue;
        }

        let original_name = field.file_name().unwrap_or("upload").to_string();
        let mime_type = field
            .content_type()
            .map(|mime| mime.essence_str().to_string())
            .unwrap_or_else(|| "application/octet-stream".to_string());
        policy.validate(&UploadedFile::new(&original_name, &mime_type, Bytes::new()))?;

        let mut body = BytesMut::new();
        while let Some(chunk) = field.chunk().await.map_err(multipart_error)? {
            body.extend_from_slice(&chunk);
            if body.len() as u64 > policy.max_size {
                return Err(MediaError::TooLarge {
                    size: body.len() as u64,
                    max: policy.max_size,
                });
            }
        }

        return Ok(UploadedFile::new(original_name, mime_type, body.freeze()));
    }

    Err(MediaError::MissingFile)
}

fn multipart_error(err: multer::Error) -> MediaError {
    debug!("Multipart parsing failed: {}", err);
    MediaError::MalformedUpload(err.to_string())
}

async fn video(state: &AppState, filename: &str, range: Option<&str>) -> Result<HttpResponse, http::Error> {
    let content = match state.service.retrieve_range(filename, range).await {
        Ok(content) => content,
        Err(MediaError::RangeNotSatisfiable { total, .. }) => {
            return Response::builder()
                .status(StatusCode::RANGE_NOT_SATISFIABLE)
                .header(CONTENT_TYPE, JSON_CONTENT_TYPE)
                .header(CONTENT_RANGE, format!("bytes */{}", total))
                .body(Full::new(Bytes::from(
                    json!({ "error": "Range not satisfiable" }).to_string(),
                )));
        }
        Err(e) => return error_response(&e),
    };

    let builder = Response::builder()
        .header(CONTENT_TYPE, VIDEO_CONTENT_TYPE)
        .header(ACCEPT_RANGES, HeaderValue::from_static("bytes"));

    let (builder, body) = match content {
        MediaContent::Full(body) => (builder.status(StatusCode::OK), body),
        MediaContent::Partial { range, total, body } => (
            builder
                .status(StatusCode::PARTIAL_CONTENT)
                .header(CONTENT_RANGE, range.content_range(total)),
            body,
        ),
    };

    state.metrics.record_bytes_served(body.len() as u64);
    builder
        .header(CONTENT_LENGTH, body.len())
        .body(Full::new(body))
}

async fn list(state: &AppState) -> Result<HttpResponse, http::Error> {
    match state.service.list().await {
        Ok(videos) => json_response(
            StatusCode::OK,
            &json!({ "count": videos.len(), "videos": videos }),
        ),
        Err(e) => error_response(&e),
    }
}

async fn health(state: &AppState) -> Result<HttpResponse, http::Error> {
    let cache = state.service.cache().health_check().await;
    json_response(
        StatusCode::OK,
        &json!({
            "status": "ok",
            "timestamp": Utc::now().to_rfc3339(),
            "cache": cache,
        }),
    )
}

fn metrics(state: &AppState) -> Result<HttpResponse, http::Error> {
    match state.metrics.render() {
        Ok(body) => Response::builder()
            .status(StatusCode::OK)
            .header(CONTENT_TYPE, state.metrics.content_type())
            .body(Full::new(Bytes::from(body))),
        Err(e) => error_response(&MediaError::Internal(e.to_string())),
    }
}

fn json_response(status: StatusCode, value: &serde_json::Value) -> Result<HttpResponse, http::Error> {
    Response::builder()
        .status(status)
        .header(CONTENT_TYPE, JSON_CONTENT_TYPE)
        .body(Full::new(Bytes::from(value.to_string())))
}

fn error_response(err: &MediaError) -> Result<HttpResponse, http::Error> {
    let status = StatusCode::from_u16(err.to_http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    if status.is_server_error() {
        error!("Request failed: {}", err);
    } else {
        warn!("Request rejected: {}", err);
    }
    json_response(status, &json!({ "error": err.public_message() }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{CacheSettings, TieredCache};
    use crate::service::UploadPolicy;
    use crate::store::{ByteStore, MemoryStore};

    async fn state() -> (Arc<AppState>, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let cache = Arc::new(TieredCache::memory_only(CacheSettings::default()));
        let service = MediaService::new(cache, store.clone(), UploadPolicy::default())
            .with_write_behind(false);
        let metrics = Arc::new(MediaMetrics::new().unwrap());
        (Arc::new(AppState::new(Arc::new(service), metrics)), store)
    }

    fn get(path: &str) -> Request<Full<Bytes>> {
        Request::get(path).body(Full::new(Bytes::new())).unwrap()
    }

    fn multipart_body(field: &str, filename: &str, mime: &str, data: &[u8]) -> (String, Full<Bytes>) {
        let boundary = "media-test-boundary";
        let mut body = Vec::new();
        body.extend_from_slice(format!("--{}\r\n", boundary).as_bytes());
        body.extend_from_slice(
            format!(
                "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\nContent-Type: {}\r\n\r\n",
                field, filename, mime
            )
            .as_bytes(),
        );
        body.extend_from_slice(data);
        body.extend_from_slice(format!("\r\n--{}--\r\n", boundary).as_bytes());
        (
            format!("multipart/form-data; boundary={}", boundary),
            Full::new(Bytes::from(body)),
        )
    }

    async fn body_string(response: HttpResponse) -> String {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[test]
    fn test_route_resolution() {
        assert_eq!(Route::resolve(&Method::POST, UPLOAD_PATH), Route::Upload);
        assert_eq!(Route::resolve(&Method::GET, UPLOAD_PATH), Route::NotFound);
        assert_eq!(Route::resolve(&Method::GET, "/api/video/static/video/a.mp4"), Route::Video);
        assert_eq!(Route::resolve(&Method::GET, "/api/unknown"), Route::NotFound);
    }

    #[tokio::test]
    async fn test_upload_then_range_request() {
        let (state, store) = state().await;
        let (content_type, body) = multipart_body("video", "clip.webm", "video/webm", b"0123456789");
        let req = Request::post(UPLOAD_PATH)
            .header(CONTENT_TYPE, content_type)
            .body(body)
            .unwrap();

        let response = handle_request(state.clone(), req).await.unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);

        let names = store.list().await.unwrap();
        assert_eq!(names.len(), 1);
        assert!(names[0].ends_with("-clip.webm"));

        let req = Request::get(format!("{}{}", VIDEO_PREFIX, names[0]))
            .header(RANGE, "bytes=2-5")
            .body(Full::new(Bytes::new()))
            .unwrap();
        let response = handle_request(state, req).await.unwrap();
        assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
        assert_eq!(response.headers()[CONTENT_RANGE], "bytes 2-5/10");
        assert_eq!(response.headers()[ACCEPT_RANGES], "bytes");
        assert_eq!(body_string(response).await, "2345");
    }

    #[tokio::test]
    async fn test_upload_rejects_wrong_type() {
        let (state, store) = state().await;
        let (content_type, body) = multipart_body("video", "pic.png", "image/png", &[0u8; 1024]);
        let req = Request::post(UPLOAD_PATH)
            .header(CONTENT_TYPE, content_type)
            .body(body)
            .unwrap();

        let response = handle_request(state, req).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(body_string(response).await.contains("Unsupported file type"));
        assert!(store.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_upload_rejects_oversized_body() {
        let (state, store) = state().await;
        let data = vec![1u8; 10 * 1024 * 1024 + 1];
        let (content_type, body) = multipart_body("video", "big.mp4", "video/mp4", &data);
        let req = Request::post(UPLOAD_PATH)
            .header(CONTENT_TYPE, content_type)
            .body(body)
            .unwrap();

        let response = handle_request(state, req).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(body_string(response).await.contains("File too large"));
        assert!(store.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_upload_without_video_field() {
        let (state, _) = state().await;
        let (content_type, body) = multipart_body("other", "clip.mp4", "video/mp4", b"abc");
        let req = Request::post(UPLOAD_PATH)
            .header(CONTENT_TYPE, content_type)
            .body(body)
            .unwrap();

        let response = handle_request(state, req).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_string(response).await, r#"{"error":"No file uploaded"}"#);
    }

    #[tokio::test]
    async fn test_truncated_multipart_is_malformed_upload() {
        let (state, store) = state().await;
        let body = "--media-test-boundary\r\n\
                    Content-Disposition: form-data; name=\"video\"; filename=\"clip.mp4\"\r\n\
                    Content-Type: video/mp4\r\n\r\n\
                    0123456789";
        let req = Request::post(UPLOAD_PATH)
            .header(CONTENT_TYPE, "multipart/form-data; boundary=media-test-boundary")
            .body(Full::new(Bytes::from_static(body.as_bytes())))
            .unwrap();

        let response = handle_request(state, req).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(body_string(response).await.contains("Malformed upload"));
        assert!(store.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_video_path_is_percent_decoded() {
        let (state, store) = state().await;
        store.write("1-vídeo.mp4", Bytes::from_static(b"accented")).await.unwrap();
        store.write("2-100%.mp4", Bytes::from_static(b"percent")).await.unwrap();

        let response = handle_request(state.clone(), get(&format!("{}1-v%C3%ADdeo.mp4", VIDEO_PREFIX)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_string(response).await, "accented");

        let response = handle_request(state.clone(), get(&format!("{}2-100%25.mp4", VIDEO_PREFIX)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_string(response).await, "percent");

        // Not UTF-8 once decoded
        let response = handle_request(state, get(&format!("{}%FF.mp4", VIDEO_PREFIX)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_range_past_end_is_416() {
        let (state, store) = state().await;
        store.write("a.mp4", Bytes::from_static(b"0123456789")).await.unwrap();

        let req = Request::get(format!("{}a.mp4", VIDEO_PREFIX))
            .header(RANGE, "bytes=10-")
            .body(Full::new(Bytes::new()))
            .unwrap();
        let response = handle_request(state, req).await.unwrap();
        assert_eq!(response.status(), StatusCode::RANGE_NOT_SATISFIABLE);
        assert_eq!(response.headers()[CONTENT_RANGE], "bytes */10");
    }

    #[tokio::test]
    async fn test_missing_video_is_404() {
        let (state, _) = state().await;
        let response = handle_request(state, get("/api/video/static/video/missing.mp4"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_unknown_route() {
        let (state, _) = state().await;
        let response = handle_request(state, get("/nope")).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(body_string(response).await, r#"{"error":"Route not found"}"#);
    }

    #[tokio::test]
    async fn test_health_and_metrics() {
        let (state, _) = state().await;
        let response = handle_request(state.clone(), get(HEALTH_PATH)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body: serde_json::Value = serde_json::from_str(&body_string(response).await).unwrap();
        assert_eq!(body["status"], "ok");
        assert_eq!(body["cache"]["connectionState"], "unconfigured");
        assert_eq!(body["cache"]["remoteAvailable"], false);

        let response = handle_request(state, get(METRICS_PATH)).await.unwrap();
        let text = body_string(response).await;
        assert!(text.contains("media_http_requests_total{route=\"health\",status=\"200\"} 1"));
    }
}
