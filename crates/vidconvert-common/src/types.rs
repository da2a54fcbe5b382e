//! Core type definitions shared by the container and pipeline crates.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of elementary stream carried by a track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Video,
    Audio,
}

impl MediaKind {
    /// Whether this is the audio kind.
    pub fn is_audio(self) -> bool {
        matches!(self, Self::Audio)
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Video => write!(f, "video"),
            Self::Audio => write!(f, "audio"),
        }
    }
}

/// Clockwise display rotation, restricted to the quarter turns a track
/// header matrix can express.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub enum Rotation {
    #[default]
    None,
    Deg90,
    Deg180,
    Deg270,
}

impl Rotation {
    /// Map a degree value to a rotation. Only multiples of 90 in `0..360`
    /// are accepted.
    pub fn from_degrees(degrees: u32) -> Option<Self> {
        match degrees {
            0 => Some(Self::None),
            90 => Some(Self::Deg90),
            180 => Some(Self::Deg180),
            270 => Some(Self::Deg270),
            _ => None,
        }
    }

    pub fn degrees(self) -> u32 {
        match self {
            Self::None => 0,
            Self::Deg90 => 90,
            Self::Deg180 => 180,
            Self::Deg270 => 270,
        }
    }

    /// True for 90 and 270, where the displayed frame has width and height
    /// exchanged.
    pub fn is_quarter_turn(self) -> bool {
        matches!(self, Self::Deg90 | Self::Deg270)
    }
}

impl TryFrom<u32> for Rotation {
    type Error = String;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        Self::from_degrees(value).ok_or_else(|| format!("unsupported rotation: {value}"))
    }
}

impl From<Rotation> for u32 {
    fn from(r: Rotation) -> Self {
        r.degrees()
    }
}

impl fmt::Display for Rotation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.degrees())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_media_kind_serialization() {
        assert_eq!(serde_json::to_string(&MediaKind::Video).unwrap(), "\"video\"");
        assert_eq!(serde_json::to_string(&MediaKind::Audio).unwrap(), "\"audio\"");
        assert!(MediaKind::Audio.is_audio());
        assert!(!MediaKind::Video.is_audio());
    }

    #[test]
    fn test_rotation_degrees() {
        for deg in [0, 90, 180, 270] {
            let r = Rotation::from_degrees(deg).unwrap();
            assert_eq!(r.degrees(), deg);
        }
        assert_eq!(Rotation::from_degrees(45), None);
        assert_eq!(Rotation::from_degrees(360), None);
    }

    #[test]
    fn test_rotation_quarter_turn() {
        assert!(Rotation::Deg90.is_quarter_turn());
        assert!(Rotation::Deg270.is_quarter_turn());
        assert!(!Rotation::Deg180.is_quarter_turn());
        assert!(!Rotation::None.is_quarter_turn());
    }

    #[test]
    fn test_rotation_serde_as_degrees() {
        assert_eq!(serde_json::to_string(&Rotation::Deg270).unwrap(), "270");
        let r: Rotation = serde_json::from_str("90").unwrap();
        assert_eq!(r, Rotation::Deg90);
        assert!(serde_json::from_str::<Rotation>("45").is_err());
    }
}
