//! Conversion failure kinds.

use crate::codec::CodecError;
use thiserror::Error;

/// Why a conversion did not complete.
#[derive(Debug, Error)]
pub enum ConversionError {
    /// Source missing or unreadable, or the previous run did not end cleanly.
    #[error("Input unreadable: {0}")]
    InputUnreadable(String),

    #[error("No supported color format on encoder {encoder}")]
    UnsupportedColorFormat { encoder: String },

    /// A codec returned a status or buffer outside its protocol.
    #[error("Codec protocol violation: {0}")]
    CodecProtocolViolation(String),

    #[error("Conversion canceled")]
    Canceled,

    /// One frame could not be transferred to the encoder. Never fatal.
    #[error("Frame transfer failed: {0}")]
    RenderTransferFailure(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Container error: {0}")]
    Container(#[from] vidconvert_media::Error),
}

impl ConversionError {
    pub fn is_canceled(&self) -> bool {
        matches!(self, ConversionError::Canceled)
    }

    /// Short machine-readable tag, used in events.
    pub fn kind(&self) -> &'static str {
        match self {
            ConversionError::InputUnreadable(_) => "input_unreadable",
            ConversionError::UnsupportedColorFormat { .. } => "unsupported_color_format",
            ConversionError::CodecProtocolViolation(_) => "codec_protocol_violation",
            ConversionError::Canceled => "canceled",
            ConversionError::RenderTransferFailure(_) => "render_transfer_failure",
            ConversionError::InvalidRequest(_) => "invalid_request",
            ConversionError::Container(_) => "container",
        }
    }
}

impl From<CodecError> for ConversionError {
    fn from(err: CodecError) -> Self {
        match err {
            CodecError::Render(msg) => ConversionError::RenderTransferFailure(msg),
            other => ConversionError::CodecProtocolViolation(other.to_string()),
        }
    }
}
