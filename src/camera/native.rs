use std::{
    sync::atomic::Ordering,
    thread,
    time::{Duration, Instant},
};

use anyhow::{Result, anyhow};
use crossbeam_channel::Sender;
use nokhwa::{
    Buffer, Camera,
    pixel_format::RgbFormat,
    utils::{
        CameraFormat, CameraIndex, FrameFormat, RequestedFormat, RequestedFormatType, Resolution,
    },
};

use super::{
    CameraBackend, CameraStream,
    rgba_converter::{self, PixelLayout},
};
use crate::{config::CameraRequest, error::Error, types::Frame};

// Prefer pixel formats that are widely supported on macOS (the built-in cameras
// often reject YUYV even though Nokhwa reports it).
const PREFERRED_PIXEL_FORMATS: &[FrameFormat] = &[
    FrameFormat::MJPEG,
    FrameFormat::NV12,
    FrameFormat::YUYV,
    FrameFormat::RAWRGB,
    FrameFormat::RAWBGR,
    FrameFormat::GRAY,
];

const PREFERRED_FRAME_RATE: u32 = 30;
// Pause after a failed read so a broken device does not spin the thread.
const READ_RETRY_BACKOFF: Duration = Duration::from_millis(50);

fn requested_formats(request: &CameraRequest) -> Vec<RequestedFormat<'static>> {
    let ideal = Resolution::new(request.ideal_width, request.ideal_height);
    let mut formats: Vec<_> = PREFERRED_PIXEL_FORMATS
        .iter()
        .map(|&format| {
            RequestedFormat::with_formats(
                RequestedFormatType::Closest(CameraFormat::new(
                    ideal,
                    format,
                    PREFERRED_FRAME_RATE,
                )),
                PREFERRED_PIXEL_FORMATS,
            )
        })
        .collect();
    // Fall back to whatever the driver offers.
    formats.push(RequestedFormat::new::<RgbFormat>(
        RequestedFormatType::None,
    ));
    formats
}

/// Camera access through the platform's native capture API.
#[derive(Clone, Debug, Default)]
pub struct NativeBackend;

fn build_camera(request: &CameraRequest) -> Result<Camera> {
    let index = CameraIndex::Index(request.device_index);
    let mut last_err = None;

    for requested in requested_formats(request) {
        match Camera::new(index.clone(), requested) {
            Ok(mut camera) => match camera.open_stream() {
                Ok(()) => return Ok(camera),
                Err(err) => last_err = Some(err.into()),
            },
            Err(err) => last_err = Some(err.into()),
        }
    }

    Err(last_err.unwrap_or_else(|| anyhow!("no device accepted any requested format")))
}

fn pixel_layout(format: FrameFormat) -> PixelLayout {
    match format {
        FrameFormat::NV12 => PixelLayout::Nv12,
        FrameFormat::YUYV => PixelLayout::Yuyv,
        FrameFormat::MJPEG => PixelLayout::Mjpeg,
        FrameFormat::RAWRGB => PixelLayout::Rgb,
        FrameFormat::RAWBGR => PixelLayout::Bgr,
        FrameFormat::GRAY => PixelLayout::Gray,
    }
}

fn decode_buffer(buffer: &Buffer) -> Result<Frame> {
    let resolution = buffer.resolution();
    rgba_converter::decode_frame(
        pixel_layout(buffer.source_frame_format()),
        buffer.buffer(),
        resolution.width_x,
        resolution.height_y,
    )
}

impl CameraBackend for NativeBackend {
    fn open(
        &mut self,
        request: &CameraRequest,
        frame_tx: Sender<Frame>,
    ) -> Result<CameraStream, Error> {
        if request.facing != crate::config::Facing::User {
            log::debug!(
                "facing mode {} is not selectable natively, using device {}",
                request.facing.label(),
                request.device_index
            );
        }

        // Fail fast before spawning the capture thread.
        let probe = build_camera(request).map_err(|err| Error::DeviceAccess(format!("{err:#}")))?;
        let format = probe.camera_format();
        log::info!(
            "camera {} opened at {}x{} {:?}",
            request.device_index,
            format.resolution().width_x,
            format.resolution().height_y,
            format.format()
        );
        drop(probe);

        let request = request.clone();
        Ok(CameraStream::spawn(move |stop| {
            let mut camera = match build_camera(&request) {
                Ok(cam) => cam,
                Err(err) => {
                    log::error!("failed to open camera: {err:?}");
                    return;
                }
            };

            while !stop.load(Ordering::Relaxed) {
                let read_start = Instant::now();
                let buffer = match camera.frame() {
                    Ok(buffer) => buffer,
                    Err(err) => {
                        log::warn!(
                            "camera frame read failed (after {:?}): {err:?}",
                            read_start.elapsed()
                        );
                        thread::sleep(READ_RETRY_BACKOFF);
                        continue;
                    }
                };

                match decode_buffer(&buffer) {
                    // Drop the frame if the previous one has not been read yet.
                    Ok(frame) => {
                        let _ = frame_tx.try_send(frame);
                    }
                    Err(err) => log::warn!("failed to decode camera frame: {err:?}"),
                }
            }

            if let Err(err) = camera.stop_stream() {
                log::warn!("failed to stop camera stream: {err:?}");
            }
        }))
    }
}
