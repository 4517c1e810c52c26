//! Frame decoding, JPEG encoding and motion-JPEG part framing.

use std::io::Cursor;
use std::time::Instant;

use bytes::{BufMut, Bytes, BytesMut};
use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, ImageFormat};
use thiserror::Error;

/// Multipart boundary used by the output stream.
pub const BOUNDARY: &str = "frame";

/// Content type of the `/stream/{id}` response.
pub const STREAM_CONTENT_TYPE: &str = "multipart/x-mixed-replace;boundary=frame";

/// Default JPEG quality for output frames.
pub const DEFAULT_JPEG_QUALITY: u8 = 85;

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("empty frame")]
    Empty,

    #[error("failed to decode frame: {0}")]
    Decode(#[source] image::ImageError),

    #[error("failed to encode frame: {0}")]
    Encode(#[source] image::ImageError),
}

/// A decoded input image as handed from the ingest side to the render loop.
#[derive(Debug, Clone)]
pub struct Frame {
    pub image: DynamicImage,
    /// Per-session sequence number, starting at 1.
    pub seq: u64,
    pub received_at: Instant,
}

impl Frame {
    pub fn new(image: DynamicImage, seq: u64) -> Self {
        Self {
            image,
            seq,
            received_at: Instant::now(),
        }
    }

    /// Decode an encoded image (JPEG, PNG, WebP) received from the client.
    pub fn decode(data: &[u8], seq: u64) -> Result<Self, FrameError> {
        Ok(Self::new(decode_image(data)?, seq))
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }
}

pub fn decode_image(data: &[u8]) -> Result<DynamicImage, FrameError> {
    if data.is_empty() {
        return Err(FrameError::Empty);
    }
    image::load_from_memory(data).map_err(FrameError::Decode)
}

/// Encode an image as baseline JPEG. Alpha is dropped.
pub fn encode_jpeg(image: &DynamicImage, quality: u8) -> Result<Bytes, FrameError> {
    let rgb = image.to_rgb8();
    let mut buf = Vec::with_capacity((rgb.width() * rgb.height()) as usize / 4);
    JpegEncoder::new_with_quality(&mut buf, quality.clamp(1, 100))
        .encode_image(&rgb)
        .map_err(FrameError::Encode)?;
    Ok(Bytes::from(buf))
}

/// Encode an image as PNG, lossless.
pub fn encode_png(image: &DynamicImage) -> Result<Bytes, FrameError> {
    let mut cursor = Cursor::new(Vec::new());
    image
        .write_to(&mut cursor, ImageFormat::Png)
        .map_err(FrameError::Encode)?;
    Ok(Bytes::from(cursor.into_inner()))
}

/// Wrap an encoded JPEG in one `multipart/x-mixed-replace` part.
pub fn multipart_part(jpeg: &[u8]) -> Bytes {
    let header = format!("--{BOUNDARY}\r\nContent-Type: image/jpeg\r\n\r\n");
    let mut part = BytesMut::with_capacity(header.len() + jpeg.len() + 2);
    part.put_slice(header.as_bytes());
    part.put_slice(jpeg);
    part.put_slice(b"\r\n");
    part.freeze()
}
