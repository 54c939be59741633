//! Remote super-resolution service client
//!
//! The image is sent as a JPEG, either as a `multipart/form-data` part named
//! `file` or base64 in a JSON `user_photo` field. The service answers with
//! JSON carrying the result as base64 (`deblurred_img`, or `upscaledImage`).
//! Anything other than HTTP 200 with a decodable image is `RemoteUnavailable`.

use crate::{
    config::{RemoteConfig, RequestEnvelope},
    error::{Result, UpscaleError},
    types::RasterImage,
};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

/// Anything that can upscale an image remotely
#[async_trait]
pub trait RemoteUpscaler: Send + Sync {
    async fn upscale(&self, image: &RasterImage) -> Result<RasterImage>;
}

#[derive(Debug, Serialize)]
struct LegacyRequest<'a> {
    user_photo: &'a str,
}

#[derive(Debug, Deserialize)]
struct UpscaleResponse {
    #[serde(alias = "upscaledImage")]
    deblurred_img: String,
    #[serde(default)]
    message: Option<String>,
}

/// Decode a service response body into a raster
fn decode_response(body: &[u8]) -> Result<RasterImage> {
    let response: UpscaleResponse = serde_json::from_slice(body)
        .map_err(|e| UpscaleError::remote(format!("Unparseable response body: {}", e)))?;
    if let Some(message) = &response.message {
        debug!(message = %message, "remote service message");
    }

    // Some servers send a data URL
    let encoded = response
        .deblurred_img
        .split_once(";base64,")
        .map_or(response.deblurred_img.as_str(), |(_, data)| data);
    let bytes = STANDARD
        .decode(encoded.trim())
        .map_err(|e| UpscaleError::remote(format!("Response image is not base64: {}", e)))?;

    RasterImage::decode(&bytes)
        .map_err(|e| UpscaleError::remote(format!("Response image could not be decoded: {}", e)))
}

/// HTTP client for the remote upscaling endpoint
#[derive(Debug, Clone)]
pub struct RemoteUpscaleClient {
    client: Client,
    config: RemoteConfig,
}

impl RemoteUpscaleClient {
    /// Build a client; the timeout bounds the whole request
    ///
    /// # Errors
    /// - `InvalidConfig` for a bad endpoint, zero timeout or JPEG quality
    pub fn new(config: RemoteConfig) -> Result<Self> {
        config.validate()?;
        let client = Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| UpscaleError::internal(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self { client, config })
    }

    #[must_use]
    pub fn config(&self) -> &RemoteConfig {
        &self.config
    }

    fn request(&self, jpeg: Vec<u8>) -> Result<reqwest::RequestBuilder> {
        let mut request = self.client.post(&self.config.endpoint);
        if let Some(credential) = &self.config.credential {
            request = request.header(self.config.credential_header.as_str(), credential);
        }

        Ok(match self.config.envelope {
            RequestEnvelope::Multipart => {
                let part = reqwest::multipart::Part::bytes(jpeg)
                    .file_name("photo.jpg")
                    .mime_str("image/jpeg")
                    .map_err(|e| UpscaleError::internal(format!("Multipart error: {}", e)))?;
                request.multipart(reqwest::multipart::Form::new().part("file", part))
            },
            RequestEnvelope::JsonBase64 => {
                let encoded = STANDARD.encode(&jpeg);
                request.json(&LegacyRequest {
                    user_photo: &encoded,
                })
            },
        })
    }
}

#[async_trait]
impl RemoteUpscaler for RemoteUpscaleClient {
    #[instrument(
        skip_all,
        fields(endpoint = %self.config.endpoint, envelope = ?self.config.envelope)
    )]
    async fn upscale(&self, image: &RasterImage) -> Result<RasterImage> {
        if !image.has_pixels() {
            return Err(UpscaleError::decode("Image has no addressable pixels"));
        }
        // Sides over 65535 px cannot be JPEG-encoded; that falls back like any
        // other remote failure
        let jpeg = image
            .encode_jpeg(self.config.jpeg_quality)
            .map_err(|e| UpscaleError::remote(format!("Transport encoding failed: {}", e)))?;
        debug!(bytes = jpeg.len(), "encoded transport JPEG");

        let response = self
            .request(jpeg)
            .map_err(|e| UpscaleError::remote(format!("Request could not be built: {}", e)))?
            .send()
            .await
            .map_err(|e| UpscaleError::network_error("POST to upscaling service", &e))?;

        let status = response.status();
        if status != StatusCode::OK {
            let body = response.text().await.unwrap_or_default();
            return Err(UpscaleError::remote(format!(
                "Service returned {}: {}",
                status,
                body.chars().take(200).collect::<String>()
            )));
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| UpscaleError::network_error("reading service response", &e))?;
        let result = decode_response(&body)?
            .into_layout(image.layout())
            .with_metadata(image.orientation(), image.scale());

        info!(
            width = result.width(),
            height = result.height(),
            "remote upscale complete"
        );
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};

    fn encoded_png(width: u32, height: u32) -> String {
        let raster =
            RasterImage::from_rgba(RgbaImage::from_pixel(width, height, Rgba([9, 8, 7, 255])));
        STANDARD.encode(raster.encode_png().unwrap())
    }

    #[test]
    fn test_decode_canonical_field() {
        let body = format!(r#"{{"message": "ok", "deblurred_img": "{}"}}"#, encoded_png(6, 4));
        let raster = decode_response(body.as_bytes()).unwrap();
        assert_eq!(raster.dimensions(), (6, 4));
        assert_eq!(raster.pixel(0, 0), Some([9, 8, 7, 255]));
    }

    #[test]
    fn test_decode_alternate_field_and_data_url() {
        let body = format!(
            r#"{{"upscaledImage": "data:image/png;base64,{}"}}"#,
            encoded_png(3, 3)
        );
        assert_eq!(decode_response(body.as_bytes()).unwrap().dimensions(), (3, 3));
    }

    #[test]
    fn test_bad_bodies_are_remote_unavailable() {
        for body in [
            "not json",
            r#"{"error": "boom"}"#,
            r#"{"deblurred_img": "%%%"}"#,
            r#"{"deblurred_img": "aGVsbG8="}"#,
        ] {
            assert!(
                matches!(
                    decode_response(body.as_bytes()),
                    Err(UpscaleError::RemoteUnavailable(_))
                ),
                "{body}"
            );
        }
    }

    #[test]
    fn test_client_rejects_invalid_config() {
        assert!(RemoteUpscaleClient::new(RemoteConfig::new("nope")).is_err());
        let client = RemoteUpscaleClient::new(
            RemoteConfig::new("http://127.0.0.1:9/run_inference").with_credential("k"),
        )
        .unwrap();
        assert_eq!(client.config().credential_header, "X-API-Key");
    }

    #[tokio::test]
    async fn test_unencodable_image_is_remote_unavailable() {
        // JPEG sides are limited to 65535 pixels; nothing is sent
        let wide = RasterImage::from_rgba(RgbaImage::from_pixel(70_000, 2, Rgba([1, 2, 3, 255])));
        let config = RemoteConfig::new("http://127.0.0.1:9/run_inference");
        let client = RemoteUpscaleClient::new(config).unwrap();

        let err = client.upscale(&wide).await.unwrap_err();
        assert!(matches!(err, UpscaleError::RemoteUnavailable(_)), "{err:?}");
        assert!(err.is_recoverable());
    }
}
