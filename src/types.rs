use std::time::Instant;

use base64::{Engine, engine::general_purpose::STANDARD};

pub const JPEG_MEDIA_TYPE: &str = "image/jpeg";

#[derive(Clone, Debug)]
pub struct Frame {
    pub rgba: Vec<u8>,
    pub width: u32,
    pub height: u32,
    #[allow(dead_code)]
    pub timestamp: Instant,
}

impl Frame {
    /// A frame is usable once the device has produced real pixels for it.
    pub fn is_decoded(&self) -> bool {
        self.width > 0
            && self.height > 0
            && self.rgba.len() == self.width as usize * self.height as usize * 4
    }
}

/// Encoded snapshot of a single frame. Never mutated once built.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StillImage {
    pub width: u32,
    pub height: u32,
    pub media_type: &'static str,
    pub bytes: Vec<u8>,
}

impl StillImage {
    /// Prefix-free base-64 form, as sent to the detection service.
    pub fn base64_payload(&self) -> String {
        STANDARD.encode(&self.bytes)
    }

    #[allow(dead_code)]
    pub fn to_data_uri(&self) -> String {
        format!("data:{};base64,{}", self.media_type, self.base64_payload())
    }
}

/// Annotated image returned by the detection service, kept in its transit
/// encoding until someone needs the bytes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AnnotatedImage {
    pub media_type: String,
    pub base64: String,
}

impl AnnotatedImage {
    /// Accepts either a `data:<type>;base64,<payload>` URI or a bare payload.
    pub fn parse(raw: &str) -> Option<Self> {
        let (media_type, payload) = match raw.strip_prefix("data:") {
            Some(rest) => {
                let (meta, payload) = rest.split_once(',')?;
                let media_type = meta.strip_suffix(";base64")?;
                let media_type = if media_type.is_empty() {
                    JPEG_MEDIA_TYPE
                } else {
                    media_type
                };
                (media_type, payload)
            }
            None => (JPEG_MEDIA_TYPE, raw),
        };

        let payload = payload.trim();
        let well_formed = !payload.is_empty()
            && payload
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'+' | b'/' | b'='));
        if !well_formed {
            return None;
        }

        Some(Self {
            media_type: media_type.to_string(),
            base64: payload.to_string(),
        })
    }

    #[allow(dead_code)]
    pub fn decode(&self) -> Result<Vec<u8>, base64::DecodeError> {
        STANDARD.decode(&self.base64)
    }

    #[allow(dead_code)]
    pub fn to_data_uri(&self) -> String {
        format!("data:{};base64,{}", self.media_type, self.base64)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DetectionResult {
    pub image: AnnotatedImage,
    pub face_count: u32,
    pub message: Option<String>,
}

impl DetectionResult {
    pub fn label(&self) -> String {
        let noun = if self.face_count == 1 { "Face" } else { "Faces" };
        format!("{} {noun} Detected", self.face_count)
    }
}
