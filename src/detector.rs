use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    config::DetectorConfig,
    error::Error,
    types::{AnnotatedImage, DetectionResult, StillImage},
};

pub const DETECT_PATH: &str = "/api/detect-face";
pub const HEALTH_PATH: &str = "/api/health";

const GENERIC_FAILURE: &str = "Face detection failed";

/// Remote face detection. One call is one outbound request, never retried.
pub trait Detector: Send + Sync {
    fn detect(&self, image: &StillImage) -> Result<DetectionResult, Error>;
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct DetectRequest {
    image_data: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct DetectResponse {
    success: bool,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    image_data: Option<String>,
    // Kept loose so a bad count surfaces as a malformed response, not a
    // failed envelope parse.
    #[serde(default)]
    face_count: Option<Value>,
}

pub struct HttpDetector {
    client: Client,
    base_url: String,
}

impl HttpDetector {
    pub fn new(config: &DetectorConfig) -> Result<Self, Error> {
        let client = Client::builder().timeout(config.timeout).build()?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    /// Checks that the service is reachable and reports itself healthy.
    pub fn health(&self) -> Result<(), Error> {
        let response = self.client.get(self.url(HEALTH_PATH)).send()?;
        let status = response.status();
        if !status.is_success() {
            return Err(Error::Service {
                status: Some(status.as_u16()),
                message: format!("health check returned {status}"),
            });
        }
        Ok(())
    }
}

impl Detector for HttpDetector {
    fn detect(&self, image: &StillImage) -> Result<DetectionResult, Error> {
        let url = self.url(DETECT_PATH);
        log::info!(
            "submitting {}x{} still ({} bytes) to {url}",
            image.width,
            image.height,
            image.bytes.len()
        );

        let request = DetectRequest {
            image_data: image.base64_payload(),
        };
        let response = self.client.post(&url).json(&request).send()?;
        let status = if response.status().is_success() {
            Ok(())
        } else {
            Err(response.status().as_u16())
        };
        let body = response.bytes()?;

        interpret_response(status, &body)
    }
}

/// Maps a raw service reply onto the detection outcome. `status` is `Err`
/// with the HTTP code for non-2xx replies.
pub fn interpret_response(status: Result<(), u16>, body: &[u8]) -> Result<DetectionResult, Error> {
    let parsed: Result<DetectResponse, _> = serde_json::from_slice(body);

    let envelope = match (status, parsed) {
        (Err(code), Ok(envelope)) => {
            return Err(Error::Service {
                status: Some(code),
                message: envelope
                    .message
                    .filter(|m| !m.is_empty())
                    .unwrap_or_else(|| GENERIC_FAILURE.to_string()),
            });
        }
        (Err(code), Err(_)) => {
            return Err(Error::Service {
                status: Some(code),
                message: GENERIC_FAILURE.to_string(),
            });
        }
        (Ok(()), Err(err)) => return Err(Error::MalformedResponse(err.to_string())),
        (Ok(()), Ok(envelope)) => envelope,
    };

    if !envelope.success {
        return Err(Error::Service {
            status: None,
            message: envelope
                .message
                .filter(|m| !m.is_empty())
                .unwrap_or_else(|| GENERIC_FAILURE.to_string()),
        });
    }

    let image = envelope
        .image_data
        .as_deref()
        .and_then(AnnotatedImage::parse)
        .ok_or_else(|| Error::MalformedResponse("missing or invalid imageData".into()))?;
    let face_count = envelope
        .face_count
        .as_ref()
        .and_then(Value::as_u64)
        .and_then(|count| u32::try_from(count).ok())
        .ok_or_else(|| Error::MalformedResponse("missing or invalid faceCount".into()))?;

    Ok(DetectionResult {
        image,
        face_count,
        message: envelope.message,
    })
}
