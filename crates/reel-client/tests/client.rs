use reel_client::{ClientError, CoordinatorApi, CoordinatorClient, CoordinatorClientConfig};
use reel_models::api::{CreateMediaFileRequest, RecordRenderUsageRequest, UpdateClipStatusRequest};
use reel_models::{ClipId, ClipStatus, JobId, MediaKind, ProjectId};
use serde_json::json;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn client_for(server: &MockServer) -> CoordinatorClient {
    let mut config = CoordinatorClientConfig::new(server.uri(), "worker-secret");
    config.base_delay_ms = 1;
    config.max_delay_ms = 5;
    config.max_retries = 2;
    CoordinatorClient::new(config).unwrap()
}

fn clip_json(id: &str, status: &str) -> serde_json::Value {
    json!({
        "id": id,
        "project_id": "p1",
        "user_id": "u1",
        "source_url": "https://clips.example.com/abc",
        "status": status,
        "created_at": "2026-01-01T00:00:00Z",
        "updated_at": "2026-01-01T00:00:00Z"
    })
}

fn media_json(id: &str) -> serde_json::Value {
    json!({
        "id": id,
        "user_id": "u1",
        "kind": "clip",
        "file_path": "u1/clips/abc.mp4",
        "duration_secs": 12.5,
        "size_bytes": 1024,
        "thumbnail_path": "u1/thumbnails/abc.jpg",
        "created_at": "2026-01-01T00:00:00Z",
        "updated_at": "2026-01-01T00:00:00Z"
    })
}

#[tokio::test]
async fn sends_worker_token_and_scoped_path() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/internal/users/u1/clips/c1"))
        .and(header("authorization", "Bearer worker-secret"))
        .respond_with(ResponseTemplate::new(200).set_body_json(clip_json("c1", "pending")))
        .expect(1)
        .mount(&server)
        .await;

    let clip = client_for(&server)
        .get_clip("u1", &ClipId::from_string("c1"))
        .await
        .unwrap();
    assert_eq!(clip.status, ClipStatus::Pending);
}

#[tokio::test]
async fn retries_idempotent_calls_on_503() {
    let server = MockServer::start().await;
    Mock::given(method("PATCH"))
        .and(path("/internal/users/u1/clips/c1/status"))
        .respond_with(ResponseTemplate::new(503).set_body_json(json!({"detail": "busy"})))
        .up_to_n_times(2)
        .mount(&server)
        .await;
    Mock::given(method("PATCH"))
        .and(path("/internal/users/u1/clips/c1/status"))
        .and(body_partial_json(json!({"status": "downloading"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(clip_json("c1", "downloading")))
        .expect(1)
        .mount(&server)
        .await;

    let request = UpdateClipStatusRequest {
        status: ClipStatus::Downloading,
        media_id: None,
        error: None,
    };
    let clip = client_for(&server)
        .update_clip_status("u1", &ClipId::from_string("c1"), &request)
        .await
        .unwrap();
    assert_eq!(clip.status, ClipStatus::Downloading);
}

#[tokio::test]
async fn render_usage_is_never_retried() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/internal/users/u1/render-usage"))
        .respond_with(ResponseTemplate::new(503).set_body_json(json!({"detail": "busy"})))
        .expect(1)
        .mount(&server)
        .await;

    let request = RecordRenderUsageRequest {
        job_id: JobId::from_string("j1"),
        project_id: ProjectId::from_string("p1"),
        seconds: 42,
    };
    let err = client_for(&server)
        .record_render_usage("u1", &request)
        .await
        .unwrap_err();
    assert!(err.is_retryable());
    assert_eq!(err.status().map(|s| s.as_u16()), Some(503));
}

#[tokio::test]
async fn error_body_maps_to_api_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/internal/users/u1/clips/missing"))
        .respond_with(
            ResponseTemplate::new(404).set_body_json(json!({"detail": "Clip not found", "code": "not_found"})),
        )
        .expect(1)
        .mount(&server)
        .await;

    let err = client_for(&server)
        .get_clip("u1", &ClipId::from_string("missing"))
        .await
        .unwrap_err();
    assert!(err.is_not_found());
    match err {
        ClientError::Api { code, detail, .. } => {
            assert_eq!(code.as_deref(), Some("not_found"));
            assert_eq!(detail, "Clip not found");
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn reusable_media_may_be_absent() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/internal/media/reusable"))
        .and(body_partial_json(json!({
            "user_id": "u1",
            "normalized_url": "https://clips.example.com/abc"
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"media": null})))
        .expect(1)
        .mount(&server)
        .await;

    let media = client_for(&server)
        .find_reusable_media("u1", "https://Clips.example.com/abc/")
        .await
        .unwrap();
    assert!(media.is_none());
}

#[tokio::test]
async fn compilation_media_create_is_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/internal/media"))
        .respond_with(ResponseTemplate::new(500))
        .expect(1)
        .mount(&server)
        .await;

    let request = CreateMediaFileRequest {
        user_id: "u1".into(),
        kind: MediaKind::Compilation,
        file_path: "u1/compilations/p1.mp4".into(),
        duration_secs: 60.0,
        size_bytes: 4096,
        thumbnail_path: None,
        source_url: None,
    };
    let err = client_for(&server).create_media_file(&request).await.unwrap_err();
    assert_eq!(err.status().map(|s| s.as_u16()), Some(500));
}

#[tokio::test]
async fn downloaded_media_create_is_retried() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/internal/media"))
        .respond_with(ResponseTemplate::new(502))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/internal/media"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"media": media_json("m1"), "reused": false})),
        )
        .expect(1)
        .mount(&server)
        .await;

    let request = CreateMediaFileRequest {
        user_id: "u1".into(),
        kind: MediaKind::Clip,
        file_path: "u1/clips/abc.mp4".into(),
        duration_secs: 12.5,
        size_bytes: 1024,
        thumbnail_path: Some("u1/thumbnails/abc.jpg".into()),
        source_url: Some("https://clips.example.com/abc".into()),
    };
    let response = client_for(&server).create_media_file(&request).await.unwrap();
    assert_eq!(response.media.id.as_str(), "m1");
    assert!(!response.reused);
}
