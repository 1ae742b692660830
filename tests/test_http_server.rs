//! End-to-end HTTP tests against a server on an ephemeral port

use media_vault::cache::{CacheSettings, TieredCache};
use media_vault::{
    AppState, LocalFsStore, MediaMetrics, MediaServer, MediaService, UploadPolicy,
};
use reqwest::multipart::{Form, Part};
use reqwest::StatusCode;
use std::net::SocketAddr;
use std::sync::Arc;
use tempfile::TempDir;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

struct TestServer {
    base: String,
    client: reqwest::Client,
    stop: Option<oneshot::Sender<()>>,
    handle: JoinHandle<media_vault::Result<()>>,
    _dir: TempDir,
}

impl TestServer {
    async fn start() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(LocalFsStore::open(dir.path()).await.unwrap());
        let cache = Arc::new(TieredCache::memory_only(CacheSettings::default()));
        let metrics = Arc::new(MediaMetrics::new().unwrap());
        let service = MediaService::new(cache, store, UploadPolicy::default())
            .with_write_behind(false)
            .with_metrics(metrics.clone());
        let state = Arc::new(AppState::new(Arc::new(service), metrics));

        let addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
        let server = MediaServer::bind(addr, state).await.unwrap();
        let local = server.local_addr().unwrap();

        let (stop, stopped) = oneshot::channel::<()>();
        let handle = tokio::spawn(server.run_until(async {
            let _ = stopped.await;
        }));

        Self {
            base: format!("http://{}", local),
            client: reqwest::Client::new(),
            stop: Some(stop),
            handle,
            _dir: dir,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }

    async fn upload(&self, filename: &str, mime: &str, data: Vec<u8>) -> reqwest::Response {
        let part = Part::bytes(data).file_name(filename.to_string()).mime_str(mime).unwrap();
        let form = Form::new().part("video", part);
        self.client
            .post(self.url("/api/video/upload/video"))
            .multipart(form)
            .send()
            .await
            .unwrap()
    }

    async fn json(&self, path: &str) -> (StatusCode, serde_json::Value) {
        let response = self.client.get(self.url(path)).send().await.unwrap();
        let status = response.status();
        let body = response.text().await.unwrap();
        (status, serde_json::from_str(&body).unwrap())
    }

    async fn shutdown(mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        self.handle.await.unwrap().unwrap();
    }
}

fn payload(size: usize) -> Vec<u8> {
    (0..size).map(|i| (i % 256) as u8).collect()
}

#[tokio::test]
async fn test_upload_list_and_download() {
    let server = TestServer::start().await;
    let data = payload(4096);

    let response = server.upload("clip.mp4", "video/mp4", data.clone()).await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let (status, listing) = server.json("/api/video/list").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(listing["count"], 1);
    let filename = listing["videos"][0]["filename"].as_str().unwrap().to_string();
    assert!(filename.ends_with("-clip.mp4"));
    assert_eq!(listing["videos"][0]["size"], 4096);
    assert!(listing["videos"][0]["createdAt"].is_string());

    let response = server
        .client
        .get(server.url(&format!("/api/video/static/video/{}", filename)))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["content-type"], "video/mp4");
    assert_eq!(response.headers()["accept-ranges"], "bytes");
    assert_eq!(response.bytes().await.unwrap().to_vec(), data);

    server.shutdown().await;
}

#[tokio::test]
async fn test_range_requests() {
    let server = TestServer::start().await;
    let data = payload(1000);
    server.upload("clip.webm", "video/webm", data.clone()).await;
    let (_, listing) = server.json("/api/video/list").await;
    let path = format!(
        "/api/video/static/video/{}",
        listing["videos"][0]["filename"].as_str().unwrap()
    );

    let response = server
        .client
        .get(server.url(&path))
        .header("Range", "bytes=100-199")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
    assert_eq!(response.headers()["content-range"], "bytes 100-199/1000");
    assert_eq!(response.headers()["content-length"], "100");
    assert_eq!(response.bytes().await.unwrap().to_vec(), data[100..200].to_vec());

    let response = server
        .client
        .get(server.url(&path))
        .header("Range", "bytes=900-")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
    assert_eq!(response.headers()["content-range"], "bytes 900-999/1000");

    let response = server
        .client
        .get(server.url(&path))
        .header("Range", "bytes=5000-")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::RANGE_NOT_SATISFIABLE);
    assert_eq!(response.headers()["content-range"], "bytes */1000");

    server.shutdown().await;
}

#[tokio::test]
async fn test_upload_rejections() {
    let server = TestServer::start().await;

    let response = server.upload("pic.png", "image/png", payload(1024)).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body: serde_json::Value = serde_json::from_str(&response.text().await.unwrap()).unwrap();
    assert!(body["error"].as_str().unwrap().contains("Unsupported file type"));

    let response = server
        .client
        .post(server.url("/api/video/upload/video"))
        .body("not a form")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let (_, listing) = server.json("/api/video/list").await;
    assert_eq!(listing["count"], 0);

    server.shutdown().await;
}

#[tokio::test]
async fn test_missing_video_and_unknown_route() {
    let server = TestServer::start().await;

    let (status, body) = server.json("/api/video/static/video/nope.mp4").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["error"].is_string());

    let (status, body) = server.json("/api/does-not-exist").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "Route not found");

    server.shutdown().await;
}

#[tokio::test]
async fn test_health_and_metrics_endpoints() {
    let server = TestServer::start().await;

    let (status, health) = server.json("/api/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(health["status"], "ok");
    assert!(health["timestamp"].is_string());
    assert_eq!(health["cache"]["connectionState"], "unconfigured");
    assert_eq!(health["cache"]["memoryEntryCount"], 0);

    let response = server.client.get(server.url("/metrics")).send().await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let text = response.text().await.unwrap();
    assert!(text.contains("media_http_requests_total{route=\"health\",status=\"200\"} 1"));

    server.shutdown().await;
}
