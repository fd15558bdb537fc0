use std::time::Duration;

pub const IDEAL_WIDTH: u32 = 1280;
pub const IDEAL_HEIGHT: u32 = 720;
// Matches the browser canvas default of 0.92 for `image/jpeg`.
pub const DEFAULT_JPEG_QUALITY: u8 = 92;
pub const DEFAULT_DETECTOR_URL: &str = "http://localhost:8080";
pub const DEFAULT_DETECT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Facing {
    User,
    #[allow(dead_code)]
    Environment,
}

impl Facing {
    pub fn label(&self) -> &'static str {
        match self {
            Facing::User => "user",
            Facing::Environment => "environment",
        }
    }
}

/// What we ask the host for when acquiring a camera. Video only.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CameraRequest {
    pub ideal_width: u32,
    pub ideal_height: u32,
    pub facing: Facing,
    pub device_index: u32,
}

impl Default for CameraRequest {
    fn default() -> Self {
        Self {
            ideal_width: IDEAL_WIDTH,
            ideal_height: IDEAL_HEIGHT,
            facing: Facing::User,
            device_index: 0,
        }
    }
}

#[derive(Clone, Debug)]
pub struct CaptureConfig {
    pub jpeg_quality: u8,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            jpeg_quality: DEFAULT_JPEG_QUALITY,
        }
    }
}

#[derive(Clone, Debug)]
pub struct DetectorConfig {
    pub base_url: String,
    pub timeout: Duration,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_DETECTOR_URL.to_string(),
            timeout: DEFAULT_DETECT_TIMEOUT,
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct AppConfig {
    pub camera: CameraRequest,
    pub capture: CaptureConfig,
    pub detector: DetectorConfig,
}
