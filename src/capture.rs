use image::{DynamicImage, RgbaImage, codecs::jpeg::JpegEncoder};

use crate::{
    camera::CameraSession,
    config::CaptureConfig,
    error::Error,
    types::{Frame, JPEG_MEDIA_TYPE, StillImage},
};

/// Turns the live frame into an encoded still. Only ever reads the session.
#[derive(Clone, Debug, Default)]
pub struct Capturer {
    config: CaptureConfig,
}

impl Capturer {
    pub fn new(config: CaptureConfig) -> Self {
        Self { config }
    }

    pub fn capture(&self, session: Option<&mut CameraSession>) -> Result<StillImage, Error> {
        let frame = session
            .and_then(|session| session.current_frame())
            .filter(|frame| frame.is_decoded())
            .ok_or(Error::NoFrameAvailable)?;
        self.encode(frame)
    }

    fn encode(&self, frame: &Frame) -> Result<StillImage, Error> {
        let surface = RgbaImage::from_raw(frame.width, frame.height, frame.rgba.clone())
            .ok_or(Error::NoFrameAvailable)?;
        // JPEG has no alpha channel.
        let rgb = DynamicImage::ImageRgba8(surface).into_rgb8();

        let mut bytes = Vec::new();
        JpegEncoder::new_with_quality(&mut bytes, self.config.jpeg_quality.clamp(1, 100))
            .encode_image(&rgb)?;

        log::debug!(
            "captured {}x{} still ({} bytes)",
            frame.width,
            frame.height,
            bytes.len()
        );

        Ok(StillImage {
            width: frame.width,
            height: frame.height,
            media_type: JPEG_MEDIA_TYPE,
            bytes,
        })
    }
}
