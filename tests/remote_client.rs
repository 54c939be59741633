//! Remote upscaling client against an in-process HTTP service

mod common;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use common::{photo, service_body, Reply, StubService};
use damoon_upscale::{
    PixelLayout, RemoteConfig, RemoteUpscaleClient, RemoteUpscaler, RequestEnvelope, UpscaleError,
};
use std::time::{Duration, Instant};

const JPEG_MAGIC: &[u8] = &[0xFF, 0xD8, 0xFF];

#[tokio::test]
async fn test_multipart_upload_with_credential() {
    let service = StubService::start(Reply::Respond {
        status: 200,
        body: service_body("deblurred_img", 32, 24),
    })
    .await;
    let config = RemoteConfig::new(&service.url).with_credential("secret");
    let client = RemoteUpscaleClient::new(config).unwrap();

    let result = client.upscale(&photo(16, 12)).await.unwrap();
    assert_eq!(result.dimensions(), (32, 24));

    let requests = service.requests();
    assert_eq!(requests.len(), 1);
    let request = &requests[0];
    assert!(request.head.starts_with("POST /run_inference"));
    assert_eq!(request.header("x-api-key").as_deref(), Some("secret"));
    assert!(request
        .header("content-type")
        .is_some_and(|v| v.starts_with("multipart/form-data")));
    assert!(request.body_contains(b"name=\"file\""));
    assert!(request.body_contains(b"filename=\"photo.jpg\""));
    assert!(request.body_contains(JPEG_MAGIC));
}

#[tokio::test]
async fn test_legacy_json_envelope() {
    let service = StubService::start(Reply::Respond {
        status: 200,
        body: service_body("upscaledImage", 8, 8),
    })
    .await;
    let client = RemoteUpscaleClient::new(
        RemoteConfig::new(&service.url).with_envelope(RequestEnvelope::JsonBase64),
    )
    .unwrap();

    let input = photo(4, 4).into_layout(PixelLayout::Bgra8);
    let result = client.upscale(&input).await.unwrap();
    assert_eq!(result.dimensions(), (8, 8));
    assert_eq!(result.layout(), PixelLayout::Bgra8);

    let requests = service.requests();
    let request = &requests[0];
    assert!(request
        .header("content-type")
        .is_some_and(|v| v.starts_with("application/json")));
    assert!(request.header("x-api-key").is_none());

    let body: serde_json::Value = serde_json::from_slice(&request.body).unwrap();
    let jpeg = STANDARD
        .decode(body["user_photo"].as_str().unwrap())
        .unwrap();
    assert!(jpeg.starts_with(JPEG_MAGIC));
}

#[tokio::test]
async fn test_server_error_is_remote_unavailable() {
    let service = StubService::start(Reply::Respond {
        status: 500,
        body: r#"{"error": "model crashed"}"#.to_string(),
    })
    .await;
    let client = RemoteUpscaleClient::new(RemoteConfig::new(&service.url)).unwrap();

    let err = client.upscale(&photo(8, 8)).await.unwrap_err();
    assert!(matches!(err, UpscaleError::RemoteUnavailable(_)), "{err:?}");
    assert!(err.is_recoverable());
}

#[tokio::test]
async fn test_non_200_success_codes_are_rejected() {
    let service = StubService::start(Reply::Respond {
        status: 202,
        body: service_body("deblurred_img", 8, 8),
    })
    .await;
    let client = RemoteUpscaleClient::new(RemoteConfig::new(&service.url)).unwrap();
    assert!(matches!(
        client.upscale(&photo(8, 8)).await,
        Err(UpscaleError::RemoteUnavailable(_))
    ));
}

#[tokio::test]
async fn test_unparseable_body_is_remote_unavailable() {
    let service = StubService::start(Reply::Respond {
        status: 200,
        body: "<html>gateway</html>".to_string(),
    })
    .await;
    let client = RemoteUpscaleClient::new(RemoteConfig::new(&service.url)).unwrap();
    assert!(matches!(
        client.upscale(&photo(8, 8)).await,
        Err(UpscaleError::RemoteUnavailable(_))
    ));
}

#[tokio::test]
async fn test_timeout_is_remote_unavailable() {
    let service = StubService::start(Reply::Hang).await;
    let client = RemoteUpscaleClient::new(
        RemoteConfig::new(&service.url).with_timeout(Duration::from_millis(200)),
    )
    .unwrap();

    let start = Instant::now();
    let err = client.upscale(&photo(8, 8)).await.unwrap_err();
    assert!(matches!(err, UpscaleError::RemoteUnavailable(_)), "{err:?}");
    assert!(start.elapsed() < Duration::from_secs(10));
}

#[tokio::test]
async fn test_connection_refused_is_remote_unavailable() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let url = format!("http://{}/run_inference", listener.local_addr().unwrap());
    drop(listener);

    let client = RemoteUpscaleClient::new(RemoteConfig::new(url)).unwrap();
    assert!(matches!(
        client.upscale(&photo(8, 8)).await,
        Err(UpscaleError::RemoteUnavailable(_))
    ));
}
