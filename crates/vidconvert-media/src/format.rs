//! Track format descriptors.
//!
//! A [`TrackFormat`] is what the demuxer reports for a source track and what
//! the muxer needs to declare an output track. Video tracks carry their
//! parameter sets in [`CodecConfig::Avc`] once known; audio tracks carry the
//! esds payload untouched so stream-copied audio keeps its decoder config.

use vidconvert_common::{MediaKind, Rotation};

/// H.264 elementary stream.
pub const MIME_AVC: &str = "video/avc";
/// H.265 elementary stream.
pub const MIME_HEVC: &str = "video/hevc";
/// AAC in MPEG-4 audio framing.
pub const MIME_AAC: &str = "audio/mp4a-latm";

/// Codec-specific configuration attached to a track.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub enum CodecConfig {
    /// H.264 sequence and picture parameter sets, without start codes.
    Avc { sps: Vec<Vec<u8>>, pps: Vec<Vec<u8>> },
    /// esds full-box payload (version/flags followed by the ES descriptor).
    Esds(Vec<u8>),
    /// Any other sample-entry child box, kept verbatim.
    Other { fourcc: [u8; 4], data: Vec<u8> },
}

/// Format of one elementary stream.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct TrackFormat {
    pub mime: String,
    pub width: u32,
    pub height: u32,
    pub rotation: Rotation,
    pub sample_rate: u32,
    pub channels: u16,
    pub duration_us: u64,
    /// Largest sample in the track, used to size read buffers.
    pub max_input_size: usize,
    pub config: Option<CodecConfig>,
}

impl TrackFormat {
    /// Video format with the given coded size.
    pub fn video(mime: impl Into<String>, width: u32, height: u32) -> Self {
        Self {
            mime: mime.into(),
            width,
            height,
            ..Default::default()
        }
    }

    /// Audio format with the given sample rate and channel count.
    pub fn audio(mime: impl Into<String>, sample_rate: u32, channels: u16) -> Self {
        Self {
            mime: mime.into(),
            sample_rate,
            channels,
            ..Default::default()
        }
    }

    pub fn with_config(mut self, config: CodecConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn with_rotation(mut self, rotation: Rotation) -> Self {
        self.rotation = rotation;
        self
    }

    /// Media kind derived from the mime prefix.
    pub fn kind(&self) -> Option<MediaKind> {
        if self.mime.starts_with("video/") {
            Some(MediaKind::Video)
        } else if self.mime.starts_with("audio/") {
            Some(MediaKind::Audio)
        } else {
            None
        }
    }

    pub fn is_video(&self) -> bool {
        self.kind() == Some(MediaKind::Video)
    }

    pub fn is_audio(&self) -> bool {
        self.kind() == Some(MediaKind::Audio)
    }

    /// Whether the format already holds parameter sets a decoder can start from.
    pub fn has_parameter_sets(&self) -> bool {
        match &self.config {
            Some(CodecConfig::Avc { sps, .. }) => !sps.is_empty(),
            Some(_) => true,
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_from_mime() {
        assert_eq!(TrackFormat::video(MIME_AVC, 640, 360).kind(), Some(MediaKind::Video));
        assert_eq!(TrackFormat::audio(MIME_AAC, 44100, 2).kind(), Some(MediaKind::Audio));
        assert_eq!(TrackFormat::video("text/plain", 0, 0).kind(), None);
    }

    #[test]
    fn test_has_parameter_sets() {
        let mut format = TrackFormat::video(MIME_AVC, 640, 360);
        assert!(!format.has_parameter_sets());

        format.config = Some(CodecConfig::Avc {
            sps: vec![],
            pps: vec![],
        });
        assert!(!format.has_parameter_sets());

        format.config = Some(CodecConfig::Avc {
            sps: vec![vec![0x67, 0x42]],
            pps: vec![],
        });
        assert!(format.has_parameter_sets());
    }
}
