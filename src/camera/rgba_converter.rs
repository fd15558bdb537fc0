use std::time::Instant;

use anyhow::{Result, anyhow};
use rayon::prelude::*;
use yuv::{
    YuvBiPlanarImage, YuvConversionMode, YuvPackedImage, YuvRange, YuvStandardMatrix,
    yuv_nv12_to_rgba, yuyv422_to_rgba,
};
use zune_jpeg::{
    JpegDecoder,
    zune_core::{bytestream::ZCursor, colorspace::ColorSpace, options::DecoderOptions},
};

use crate::types::Frame;

/// Pixel layouts a device may hand us, independent of the capture backend.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PixelLayout {
    Nv12,
    Yuyv,
    Mjpeg,
    Rgb,
    Bgr,
    Gray,
}

pub fn decode_frame(layout: PixelLayout, data: &[u8], width: u32, height: u32) -> Result<Frame> {
    let (rgba, width, height) = match layout {
        PixelLayout::Nv12 => (nv12_to_rgba(data, width, height)?, width, height),
        PixelLayout::Yuyv => (yuyv_to_rgba(data, width, height)?, width, height),
        // The JPEG header is authoritative; some drivers report a stale resolution.
        PixelLayout::Mjpeg => mjpeg_to_rgba(data)?,
        PixelLayout::Rgb => (packed_to_rgba(data, width, height, 3, rgb_pixel)?, width, height),
        PixelLayout::Bgr => (packed_to_rgba(data, width, height, 3, bgr_pixel)?, width, height),
        PixelLayout::Gray => (packed_to_rgba(data, width, height, 1, gray_pixel)?, width, height),
    };

    Ok(Frame {
        rgba,
        width,
        height,
        timestamp: Instant::now(),
    })
}

fn ensure_len(label: &str, data: &[u8], expected: usize) -> Result<()> {
    if data.len() < expected {
        return Err(anyhow!(
            "{label} buffer too small: got {}, expected {expected}",
            data.len()
        ));
    }
    Ok(())
}

fn nv12_to_rgba(data: &[u8], width: u32, height: u32) -> Result<Vec<u8>> {
    let y_len = width as usize * height as usize;
    let uv_len = y_len / 2;
    ensure_len("NV12", data, y_len + uv_len)?;

    let image = YuvBiPlanarImage {
        y_plane: &data[..y_len],
        y_stride: width,
        uv_plane: &data[y_len..y_len + uv_len],
        uv_stride: width,
        width,
        height,
    };

    let mut rgba = vec![0u8; y_len * 4];
    yuv_nv12_to_rgba(
        &image,
        &mut rgba,
        width * 4,
        YuvRange::Full,
        YuvStandardMatrix::Bt709,
        YuvConversionMode::Balanced,
    )
    .map_err(|err| anyhow!("NV12 to RGBA failed: {err:?}"))?;

    Ok(rgba)
}

fn yuyv_to_rgba(data: &[u8], width: u32, height: u32) -> Result<Vec<u8>> {
    let pixels = width as usize * height as usize;
    ensure_len("YUYV", data, pixels * 2)?;

    let packed = YuvPackedImage {
        yuy: data,
        yuy_stride: width * 2,
        width,
        height,
    };

    let mut rgba = vec![0u8; pixels * 4];
    yuyv422_to_rgba(
        &packed,
        &mut rgba,
        width * 4,
        YuvRange::Full,
        YuvStandardMatrix::Bt709,
    )
    .map_err(|err| anyhow!("YUYV422 to RGBA failed: {err:?}"))?;

    Ok(rgba)
}

fn mjpeg_to_rgba(data: &[u8]) -> Result<(Vec<u8>, u32, u32)> {
    let options = DecoderOptions::default().jpeg_set_out_colorspace(ColorSpace::RGBA);
    let mut decoder = JpegDecoder::new_with_options(ZCursor::new(data), options);
    let rgba = decoder
        .decode()
        .map_err(|err| anyhow!("MJPEG decode failed: {err:?}"))?;

    let info = decoder
        .info()
        .ok_or_else(|| anyhow!("MJPEG decoder reported no image info"))?;
    let (width, height) = u32::try_from(info.width)
        .and_then(|w| u32::try_from(info.height).map(|h| (w, h)))
        .map_err(|_| anyhow!("MJPEG dimensions do not fit u32"))?;
    let expected = width as usize * height as usize * 4;
    ensure_len("MJPEG output", &rgba, expected)?;

    Ok((rgba, width, height))
}

fn rgb_pixel(src: &[u8], dst: &mut [u8]) {
    dst[..3].copy_from_slice(&src[..3]);
}

fn bgr_pixel(src: &[u8], dst: &mut [u8]) {
    dst[0] = src[2];
    dst[1] = src[1];
    dst[2] = src[0];
}

fn gray_pixel(src: &[u8], dst: &mut [u8]) {
    dst[..3].fill(src[0]);
}

fn packed_to_rgba(
    data: &[u8],
    width: u32,
    height: u32,
    channels: usize,
    write_pixel: fn(&[u8], &mut [u8]),
) -> Result<Vec<u8>> {
    let pixels = width as usize * height as usize;
    ensure_len("packed", data, pixels * channels)?;

    let mut rgba = vec![0u8; pixels * 4];
    rgba.par_chunks_mut(4)
        .zip(data[..pixels * channels].par_chunks_exact(channels))
        .for_each(|(dst, src)| {
            write_pixel(src, dst);
            dst[3] = 255;
        });

    Ok(rgba)
}
