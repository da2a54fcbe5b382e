//! Hardware codec abstraction.
//!
//! The pipeline talks to a decoder, an encoder and the surface pair that
//! connects them through the traits in this module. A [`CodecBackend`]
//! enumerates what the platform offers and opens one [`CodecSession`] per
//! conversion. All calls on a session happen on the conversion worker.
//!
//! Buffer ownership follows the usual hardware codec protocol: an index
//! returned by a `dequeue_*` call belongs to the caller until it is queued
//! or released again.

pub mod loopback;

pub use loopback::LoopbackBackend;

use crate::quirks::{BufferLayout, ColorFormat};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use vidconvert_common::Rotation;
use vidconvert_media::{BufferInfo, TrackFormat};

/// Errors reported by a codec backend.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("No codec available for {0}")]
    NotFound(String),

    #[error("Codec rejected configuration: {0}")]
    Configure(String),

    #[error("Buffer index {0} is not owned by the caller")]
    InvalidIndex(usize),

    #[error("Unexpected codec status {0}")]
    Status(i32),

    #[error("Codec used after release")]
    Released,

    #[error("Frame transfer failed: {0}")]
    Render(String),
}

pub type CodecResult<T> = std::result::Result<T, CodecError>;

/// Result of polling a codec for output.
#[derive(Debug, Clone, PartialEq)]
pub enum OutputStatus {
    /// Nothing ready within the timeout.
    TryAgainLater,
    /// The codec replaced its output buffer set.
    BuffersChanged,
    /// The output format is now known.
    FormatChanged(TrackFormat),
    /// An output buffer is ready at `index`.
    Buffer { index: usize, info: BufferInfo },
}

/// One codec advertised by the platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodecInfo {
    pub name: String,
    pub is_encoder: bool,
    pub mime_types: Vec<String>,
    /// Raw color format constants accepted on buffer input.
    pub color_formats: Vec<i32>,
}

impl CodecInfo {
    pub fn encoder(name: impl Into<String>, mime: &str, color_formats: Vec<i32>) -> Self {
        Self {
            name: name.into(),
            is_encoder: true,
            mime_types: vec![mime.to_string()],
            color_formats,
        }
    }

    pub fn decoder(name: impl Into<String>, mime: &str) -> Self {
        Self {
            name: name.into(),
            is_encoder: false,
            mime_types: vec![mime.to_string()],
            color_formats: Vec::new(),
        }
    }

    pub fn supports(&self, mime: &str) -> bool {
        self.mime_types.iter().any(|m| m.eq_ignore_ascii_case(mime))
    }
}

/// How frames reach the encoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EncoderInput {
    /// The encoder owns an input surface fed by the renderer.
    Surface,
    /// Frames are read back into encoder input buffers.
    Buffers,
}

/// Encoder output configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct EncoderConfig {
    pub mime: String,
    pub width: u32,
    pub height: u32,
    pub bitrate: u32,
    pub frame_rate: u32,
    pub i_frame_interval: u32,
    pub color_format: ColorFormat,
    /// Row stride for buffer input.
    pub stride: Option<u32>,
    pub slice_height: Option<u32>,
}

/// Decoder side of a session. Decoded frames go to the session's surface.
pub trait VideoDecoder: Send {
    fn configure(&mut self, format: &TrackFormat) -> CodecResult<()>;

    fn start(&mut self) -> CodecResult<()>;

    fn dequeue_input_buffer(&mut self, timeout: Duration) -> CodecResult<Option<usize>>;

    fn input_buffer(&mut self, index: usize) -> CodecResult<&mut Vec<u8>>;

    fn queue_input_buffer(&mut self, index: usize, info: BufferInfo) -> CodecResult<()>;

    fn dequeue_output_buffer(&mut self, timeout: Duration) -> CodecResult<OutputStatus>;

    /// Return an output buffer, rendering it to the surface when `render` is set.
    fn release_output_buffer(&mut self, index: usize, render: bool) -> CodecResult<()>;

    fn stop(&mut self);

    fn release(&mut self);
}

/// Encoder side of a session.
pub trait VideoEncoder: Send {
    fn configure(&mut self, config: &EncoderConfig) -> CodecResult<()>;

    fn start(&mut self) -> CodecResult<()>;

    /// End the surface input stream.
    fn signal_end_of_input_stream(&mut self) -> CodecResult<()>;

    fn dequeue_input_buffer(&mut self, timeout: Duration) -> CodecResult<Option<usize>>;

    fn input_buffer(&mut self, index: usize) -> CodecResult<&mut Vec<u8>>;

    fn queue_input_buffer(&mut self, index: usize, info: BufferInfo) -> CodecResult<()>;

    fn dequeue_output_buffer(&mut self, timeout: Duration) -> CodecResult<OutputStatus>;

    fn output_buffer(&self, index: usize) -> CodecResult<&[u8]>;

    fn release_output_buffer(&mut self, index: usize) -> CodecResult<()>;

    fn stop(&mut self);

    fn release(&mut self);
}

/// The transform stage between decoder output and encoder input.
pub trait FrameRenderer: Send {
    /// Wait until the decoder has rendered a new image to the surface.
    fn await_new_image(&mut self, timeout: Duration) -> CodecResult<()>;

    /// Draw the latest image, rotated by `rotation`, onto the encoder surface.
    fn draw_image(&mut self, rotation: Rotation) -> CodecResult<()>;

    fn set_presentation_time(&mut self, time_ns: i64);

    /// Submit the drawn frame to the encoder input surface.
    fn swap_buffers(&mut self) -> CodecResult<()>;

    /// Read the drawn frame into `dst` using `layout`, for encoders without
    /// surface input. Returns the number of bytes of `dst` that hold the
    /// picture.
    fn read_pixels(
        &mut self,
        dst: &mut Vec<u8>,
        layout: &BufferLayout,
        color_format: ColorFormat,
        swap_uv: bool,
    ) -> CodecResult<usize>;

    fn release(&mut self);
}

/// Codec instances for one conversion.
pub struct CodecSession {
    pub decoder: Box<dyn VideoDecoder>,
    pub encoder: Box<dyn VideoEncoder>,
    pub renderer: Box<dyn FrameRenderer>,
}

impl CodecSession {
    /// Stop and release everything. Safe to call after a failure.
    pub fn release(&mut self) {
        self.renderer.release();
        self.decoder.stop();
        self.decoder.release();
        self.encoder.stop();
        self.encoder.release();
    }
}

/// Platform codec access.
pub trait CodecBackend: Send + Sync {
    /// Every codec the platform advertises, in platform order.
    fn codec_infos(&self) -> Vec<CodecInfo>;

    /// Create a decoder for `decoder_mime`, the encoder named `encoder_name`,
    /// and the surfaces connecting them.
    fn open_session(
        &self,
        decoder_mime: &str,
        encoder_name: &str,
        input: EncoderInput,
    ) -> CodecResult<CodecSession>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codec_info_supports_ignores_case() {
        let info = CodecInfo::encoder("OMX.qcom.video.encoder.avc", "video/AVC", vec![21]);
        assert!(info.supports("video/avc"));
        assert!(!info.supports("video/hevc"));
        assert!(info.is_encoder);
    }

    #[test]
    fn test_decoder_info() {
        let info = CodecInfo::decoder("OMX.google.h264.decoder", "video/avc");
        assert!(!info.is_encoder);
        assert!(info.color_formats.is_empty());
    }
}
