//! HTTP control surface, driven in-process through the router.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use ecgconf::{ArtifactFormat, SamplerSettings};
use ecggarden::{
    factory_from_settings, renderer_for, router, AppState, CaptureConfig, FileSink, Supervisor,
};
use ecgstore::RecordStore;
use serde_json::Value;
use tempfile::TempDir;
use tower::ServiceExt;

struct TestApp {
    router: Router,
    supervisor: Arc<Supervisor>,
    _dir: TempDir,
}

fn test_app() -> Result<TestApp> {
    let dir = TempDir::new()?;
    let store = RecordStore::at_path(dir.path())?;
    let supervisor = Arc::new(
        Supervisor::new(
            factory_from_settings(&SamplerSettings::default(), 100),
            renderer_for(ArtifactFormat::Svg, 100, 3.3),
            Arc::new(FileSink::new(store.clone())),
        )
        .with_capture_config(CaptureConfig {
            flush_interval: Duration::from_millis(100),
            ..CaptureConfig::default()
        }),
    );
    let router = router(AppState {
        supervisor: Arc::clone(&supervisor),
        store,
    });
    Ok(TestApp {
        router,
        supervisor,
        _dir: dir,
    })
}

async fn send(app: &TestApp, method: &str, uri: &str) -> Result<(StatusCode, Vec<u8>)> {
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .body(Body::empty())?;
    let response = app.router.clone().oneshot(request).await?;
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX).await?;
    Ok((status, body.to_vec()))
}

async fn send_json(app: &TestApp, method: &str, uri: &str) -> Result<(StatusCode, Value)> {
    let (status, body) = send(app, method, uri).await?;
    Ok((status, serde_json::from_slice(&body)?))
}

#[tokio::test]
async fn test_health() -> Result<()> {
    let app = test_app()?;
    let (status, body) = send_json(&app, "GET", "/health").await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["service"], "ecggarden");
    Ok(())
}

#[tokio::test]
async fn test_start_stop_lifecycle() -> Result<()> {
    let app = test_app()?;

    let (status, body) = send_json(&app, "POST", "/capture/start/42").await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["session"], "42");
    assert_eq!(body["status"], "running");

    let (status, _) = send_json(&app, "POST", "/capture/start/42").await?;
    assert_eq!(status, StatusCode::CONFLICT);

    tokio::time::sleep(Duration::from_millis(100)).await;
    let (status, body) = send_json(&app, "GET", "/capture/status/42").await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["is_running"], true);
    assert_eq!(body["session_info"]["status"], "running");

    let (status, body) = send_json(&app, "POST", "/capture/stop/42").await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["tier"], "graceful");

    let (status, body) = send_json(&app, "GET", "/capture/status/42").await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["is_running"], false);
    assert_eq!(body["session_info"]["status"], "stopped");

    let (status, _) = send_json(&app, "POST", "/capture/stop/42").await?;
    assert_eq!(status, StatusCode::NOT_FOUND);
    Ok(())
}

#[tokio::test]
async fn test_invalid_key_rejected() -> Result<()> {
    let app = test_app()?;
    let (status, body) = send_json(&app, "POST", "/capture/start/..hidden").await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap_or_default().contains("must not start"));
    assert!(app.supervisor.keys().is_empty());
    Ok(())
}

#[tokio::test]
async fn test_status_of_unknown_session() -> Result<()> {
    let app = test_app()?;
    let (status, body) = send_json(&app, "GET", "/capture/status/7").await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["is_running"], false);
    assert!(body["session_info"].is_null());
    Ok(())
}

#[tokio::test]
async fn test_sessions_and_cleanup() -> Result<()> {
    let app = test_app()?;
    for key in ["1", "2", "3"] {
        let (status, _) = send_json(&app, "POST", &format!("/capture/start/{key}")).await?;
        assert_eq!(status, StatusCode::OK);
    }

    let (status, body) = send_json(&app, "GET", "/capture/sessions").await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["count"], 3);

    let (status, body) = send_json(&app, "POST", "/capture/cleanup").await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["sessions_cleaned"], 3);
    assert!(app.supervisor.keys().is_empty());
    Ok(())
}

#[tokio::test]
async fn test_flushed_images_are_served() -> Result<()> {
    let app = test_app()?;

    send_json(&app, "POST", "/capture/start/21").await?;
    tokio::time::sleep(Duration::from_millis(450)).await;
    send_json(&app, "POST", "/capture/stop/21").await?;

    let (status, body) = send_json(&app, "GET", "/images/21").await?;
    assert_eq!(status, StatusCode::OK);
    let images = body["images"].as_array().cloned().unwrap_or_default();
    assert!(!images.is_empty(), "expected at least one flushed image");
    assert_eq!(images[0]["mime_type"], "image/svg+xml");

    let id = images[0]["id"].as_str().unwrap_or_default().to_string();
    let request = Request::builder()
        .uri(format!("/image/{id}"))
        .body(Body::empty())?;
    let response = app.router.clone().oneshot(request).await?;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get(header::CONTENT_TYPE).unwrap(),
        "image/svg+xml"
    );
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await?;
    assert!(String::from_utf8_lossy(&bytes).contains("ECG - Session #21"));
    Ok(())
}

#[tokio::test]
async fn test_unknown_and_malformed_image_ids() -> Result<()> {
    let app = test_app()?;
    let (status, _) = send(&app, "GET", "/image/00000000000000000000000000000000").await?;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _) = send(&app, "GET", "/image/not-a-hash").await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    Ok(())
}
