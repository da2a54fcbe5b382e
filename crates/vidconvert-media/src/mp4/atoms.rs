//! MP4 atom definitions.

use super::SampleTable;
use vidconvert_common::Rotation;

/// Four-character atom type code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AtomType(pub [u8; 4]);

impl AtomType {
    pub const FTYP: Self = Self(*b"ftyp");
    pub const MOOV: Self = Self(*b"moov");
    pub const MDAT: Self = Self(*b"mdat");
    pub const MVHD: Self = Self(*b"mvhd");
    pub const TRAK: Self = Self(*b"trak");
    pub const TKHD: Self = Self(*b"tkhd");
    pub const MDIA: Self = Self(*b"mdia");
    pub const MDHD: Self = Self(*b"mdhd");
    pub const HDLR: Self = Self(*b"hdlr");
    pub const MINF: Self = Self(*b"minf");
    pub const STBL: Self = Self(*b"stbl");
    pub const STSD: Self = Self(*b"stsd");
    pub const STTS: Self = Self(*b"stts");
    pub const STSS: Self = Self(*b"stss");
    pub const STSC: Self = Self(*b"stsc");
    pub const STSZ: Self = Self(*b"stsz");
    pub const STCO: Self = Self(*b"stco");
    pub const CO64: Self = Self(*b"co64");
    pub const CTTS: Self = Self(*b"ctts");

    pub fn from_bytes(bytes: [u8; 4]) -> Self {
        Self(bytes)
    }

    /// Get the 4-char code as a string.
    pub fn as_str(&self) -> &str {
        std::str::from_utf8(&self.0).unwrap_or("????")
    }
}

impl std::fmt::Display for AtomType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Parsed atom header.
#[derive(Debug, Clone)]
pub struct Atom {
    pub atom_type: AtomType,
    /// Atom size including header.
    pub size: u64,
    /// File offset where atom data starts (after header).
    pub data_offset: u64,
    /// Size of the header (8 or 16 bytes).
    pub header_size: u8,
}

impl Atom {
    pub fn data_size(&self) -> u64 {
        self.size.saturating_sub(self.header_size as u64)
    }

    /// File offset of the first header byte.
    pub fn start(&self) -> u64 {
        self.data_offset - self.header_size as u64
    }

    pub fn data_end(&self) -> u64 {
        self.data_offset + self.data_size()
    }
}

/// Handler type for a track.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerType {
    Video,
    Audio,
    Unknown([u8; 4]),
}

impl HandlerType {
    pub fn from_bytes(bytes: [u8; 4]) -> Self {
        match &bytes {
            b"vide" => Self::Video,
            b"soun" => Self::Audio,
            _ => Self::Unknown(bytes),
        }
    }

    pub fn is_video(&self) -> bool {
        matches!(self, Self::Video)
    }

    pub fn is_audio(&self) -> bool {
        matches!(self, Self::Audio)
    }
}

/// Rotation encoded by a track header matrix.
///
/// Only the 2x2 part `[a b; c d]` is inspected; translation and the
/// perspective column are ignored. Anything other than a quarter turn
/// reads as no rotation.
pub fn rotation_from_matrix(a: i32, b: i32, c: i32, d: i32) -> Rotation {
    const ONE: i32 = 0x0001_0000;
    match (a, b, c, d) {
        (0, ONE, x, 0) if x == -ONE => Rotation::Deg90,
        (x, 0, 0, y) if x == -ONE && y == -ONE => Rotation::Deg180,
        (0, x, ONE, 0) if x == -ONE => Rotation::Deg270,
        _ => Rotation::None,
    }
}

/// Track header matrix for a rotation, in tkhd field order.
pub fn matrix_for_rotation(rotation: Rotation) -> [i32; 9] {
    const ONE: i32 = 0x0001_0000;
    const W: i32 = 0x4000_0000;
    match rotation {
        Rotation::None => [ONE, 0, 0, 0, ONE, 0, 0, 0, W],
        Rotation::Deg90 => [0, ONE, 0, -ONE, 0, 0, 0, 0, W],
        Rotation::Deg180 => [-ONE, 0, 0, 0, -ONE, 0, 0, 0, W],
        Rotation::Deg270 => [0, -ONE, 0, ONE, 0, 0, 0, 0, W],
    }
}

/// Track information extracted from a trak atom.
#[derive(Debug, Clone)]
pub struct TrackInfo {
    pub track_id: u32,
    pub handler_type: HandlerType,
    /// Track duration in media timescale.
    pub duration: u64,
    /// Media timescale (units per second for this track).
    pub timescale: u32,
    pub sample_table: SampleTable,
    /// Fourcc of the first sample entry (`avc1`, `mp4a`, ...).
    pub sample_entry: Option<[u8; 4]>,
    /// Codec configuration box (avcC, hvcC, esds) body.
    pub codec_data: Option<Vec<u8>>,
    /// Fourcc of the box `codec_data` came from.
    pub codec_box: Option<[u8; 4]>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub rotation: Rotation,
    pub sample_rate: Option<u32>,
    pub channels: Option<u16>,
}

impl TrackInfo {
    pub fn new(track_id: u32) -> Self {
        Self {
            track_id,
            handler_type: HandlerType::Unknown([0; 4]),
            duration: 0,
            timescale: 1,
            sample_table: SampleTable::default(),
            sample_entry: None,
            codec_data: None,
            codec_box: None,
            width: None,
            height: None,
            rotation: Rotation::None,
            sample_rate: None,
            channels: None,
        }
    }

    pub fn duration_secs(&self) -> f64 {
        if self.timescale == 0 {
            0.0
        } else {
            self.duration as f64 / self.timescale as f64
        }
    }

    /// Convert a media-timescale value to microseconds.
    pub fn to_us(&self, ticks: u64) -> i64 {
        if self.timescale == 0 {
            return 0;
        }
        (ticks as u128 * 1_000_000 / self.timescale as u128) as i64
    }

    /// Convert microseconds to media-timescale ticks, rounding down.
    pub fn from_us(&self, us: i64) -> u64 {
        if us <= 0 {
            return 0;
        }
        (us as u128 * self.timescale as u128 / 1_000_000) as u64
    }

    pub fn duration_us(&self) -> u64 {
        self.to_us(self.duration).max(0) as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_matrix_rotation_roundtrip() {
        for r in [Rotation::None, Rotation::Deg90, Rotation::Deg180, Rotation::Deg270] {
            let m = matrix_for_rotation(r);
            assert_eq!(rotation_from_matrix(m[0], m[1], m[3], m[4]), r);
        }
    }

    #[test]
    fn test_skewed_matrix_is_unrotated() {
        assert_eq!(rotation_from_matrix(0x8000, 0, 0, 0x8000), Rotation::None);
    }

    #[test]
    fn test_time_conversion() {
        let mut track = TrackInfo::new(1);
        track.timescale = 90_000;
        assert_eq!(track.to_us(90_000), 1_000_000);
        assert_eq!(track.from_us(2_000_000), 180_000);
        assert_eq!(track.from_us(-5), 0);

        track.timescale = 0;
        assert_eq!(track.to_us(1234), 0);
    }
}
