//! H.264 codec configuration helpers.
//!
//! Encoders emit their parameter sets as one Annex B buffer flagged as codec
//! config; MP4 stores them in an `avcC` record and stores samples with
//! length prefixes instead of start codes. These helpers convert between the
//! two representations.

use crate::{Error, Result};

/// Four-byte Annex B start code.
pub const START_CODE: [u8; 4] = [0, 0, 0, 1];

pub const NAL_TYPE_IDR: u8 = 5;
pub const NAL_TYPE_SPS: u8 = 7;
pub const NAL_TYPE_PPS: u8 = 8;

/// NAL unit type from the first header byte.
pub fn nal_unit_type(header: u8) -> u8 {
    header & 0x1f
}

/// The two halves of a combined codec-config buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParameterSets<'a> {
    /// Bytes before the boundary (normally the SPS with its start code).
    pub first: &'a [u8],
    /// Bytes from the boundary onward, start code included. `None` when no
    /// boundary was found and `first` holds the whole buffer.
    pub second: Option<&'a [u8]>,
}

/// Split a combined SPS+PPS buffer at its last 4-byte start code.
///
/// The scan walks backward from the end and only accepts a start code that
/// begins at index 1 or later, so a buffer whose only start code is its
/// leading one comes back whole.
pub fn split_parameter_sets(buf: &[u8]) -> ParameterSets<'_> {
    let mut a = buf.len();
    while a > 4 {
        a -= 1;
        if buf[a] == 1 && buf[a - 1] == 0 && buf[a - 2] == 0 && buf[a - 3] == 0 {
            return ParameterSets {
                first: &buf[..a - 3],
                second: Some(&buf[a - 3..]),
            };
        }
    }
    ParameterSets {
        first: buf,
        second: None,
    }
}

/// Drop a leading 3- or 4-byte start code, if present.
pub fn strip_start_code(nal: &[u8]) -> &[u8] {
    if nal.starts_with(&START_CODE) {
        &nal[4..]
    } else if nal.starts_with(&[0, 0, 1]) {
        &nal[3..]
    } else {
        nal
    }
}

/// Split an Annex B byte stream into NAL units (start codes removed).
pub fn split_annexb(data: &[u8]) -> Vec<&[u8]> {
    let mut starts = Vec::new();
    let mut i = 0;
    while i + 3 <= data.len() {
        if data[i] == 0 && data[i + 1] == 0 && data[i + 2] == 1 {
            starts.push((i, i + 3));
            i += 3;
        } else {
            i += 1;
        }
    }

    let mut units = Vec::with_capacity(starts.len());
    for (n, &(_, payload_start)) in starts.iter().enumerate() {
        let mut end = starts.get(n + 1).map(|&(sc, _)| sc).unwrap_or(data.len());
        // A 4-byte start code leaves its leading zero on the previous unit.
        while end > payload_start && data[end - 1] == 0 && n + 1 < starts.len() {
            end -= 1;
        }
        if end > payload_start {
            units.push(&data[payload_start..end]);
        }
    }
    units
}

/// Convert an Annex B access unit to 4-byte length-prefixed form.
pub fn annexb_to_length_prefixed(data: &[u8]) -> Vec<u8> {
    let units = split_annexb(data);
    let mut out = Vec::with_capacity(data.len() + units.len());
    for unit in units {
        out.extend_from_slice(&(unit.len() as u32).to_be_bytes());
        out.extend_from_slice(unit);
    }
    out
}

/// Iterate NAL units of a length-prefixed access unit.
pub fn length_prefixed_units(data: &[u8], length_size: usize) -> Result<Vec<&[u8]>> {
    if !(1..=4).contains(&length_size) {
        return Err(Error::unsupported(format!("NAL length size {length_size}")));
    }
    let mut units = Vec::new();
    let mut pos = 0;
    while pos < data.len() {
        if pos + length_size > data.len() {
            return Err(Error::BufferUnderflow {
                need: length_size,
                have: data.len() - pos,
            });
        }
        let len = data[pos..pos + length_size]
            .iter()
            .fold(0usize, |acc, &b| (acc << 8) | b as usize);
        pos += length_size;
        if pos + len > data.len() {
            return Err(Error::BufferUnderflow {
                need: len,
                have: data.len() - pos,
            });
        }
        units.push(&data[pos..pos + len]);
        pos += len;
    }
    Ok(units)
}

/// Convert a length-prefixed access unit to Annex B.
pub fn length_prefixed_to_annexb(data: &[u8], length_size: usize) -> Result<Vec<u8>> {
    let units = length_prefixed_units(data, length_size)?;
    let mut out = Vec::with_capacity(data.len() + units.len() * 4);
    for unit in units {
        out.extend_from_slice(&START_CODE);
        out.extend_from_slice(unit);
    }
    Ok(out)
}

/// Parsed `avcC` (AVCDecoderConfigurationRecord).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AvcConfigRecord {
    pub profile: u8,
    pub compatibility: u8,
    pub level: u8,
    pub nal_length_size: usize,
    pub sps: Vec<Vec<u8>>,
    pub pps: Vec<Vec<u8>>,
}

impl AvcConfigRecord {
    /// Build a record from raw parameter sets. Profile and level are read
    /// from the first SPS; baseline 3.0 is assumed when it is too short.
    pub fn from_parameter_sets(sps: Vec<Vec<u8>>, pps: Vec<Vec<u8>>) -> Self {
        let (profile, compatibility, level) = match sps.first() {
            Some(s) if s.len() >= 4 => (s[1], s[2], s[3]),
            _ => (66, 0xc0, 30),
        };
        Self {
            profile,
            compatibility,
            level,
            nal_length_size: 4,
            sps,
            pps,
        }
    }

    /// Parse the body of an `avcC` box.
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < 7 {
            return Err(Error::BufferUnderflow {
                need: 7,
                have: data.len(),
            });
        }
        if data[0] != 1 {
            return Err(Error::invalid_mp4(format!(
                "avcC configuration version {}",
                data[0]
            )));
        }

        let nal_length_size = (data[4] & 0x03) as usize + 1;
        let mut pos = 5;
        let sps_count = (data[pos] & 0x1f) as usize;
        pos += 1;
        let sps = read_parameter_sets(data, &mut pos, sps_count)?;

        let pps_count = *data.get(pos).ok_or(Error::BufferUnderflow {
            need: pos + 1,
            have: data.len(),
        })? as usize;
        pos += 1;
        let pps = read_parameter_sets(data, &mut pos, pps_count)?;

        Ok(Self {
            profile: data[1],
            compatibility: data[2],
            level: data[3],
            nal_length_size,
            sps,
            pps,
        })
    }

    /// Serialize to an `avcC` box body.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = vec![
            1,
            self.profile,
            self.compatibility,
            self.level,
            0xfc | (self.nal_length_size.clamp(1, 4) as u8 - 1),
            0xe0 | (self.sps.len().min(31) as u8),
        ];
        for sps in self.sps.iter().take(31) {
            out.extend_from_slice(&(sps.len() as u16).to_be_bytes());
            out.extend_from_slice(sps);
        }
        out.push(self.pps.len().min(255) as u8);
        for pps in self.pps.iter().take(255) {
            out.extend_from_slice(&(pps.len() as u16).to_be_bytes());
            out.extend_from_slice(pps);
        }
        out
    }

    /// Parameter sets as one Annex B buffer, SPS first.
    pub fn to_annexb(&self) -> Vec<u8> {
        let mut out = Vec::new();
        for unit in self.sps.iter().chain(self.pps.iter()) {
            out.extend_from_slice(&START_CODE);
            out.extend_from_slice(unit);
        }
        out
    }
}

fn read_parameter_sets(data: &[u8], pos: &mut usize, count: usize) -> Result<Vec<Vec<u8>>> {
    let mut sets = Vec::with_capacity(count);
    for _ in 0..count {
        if *pos + 2 > data.len() {
            return Err(Error::BufferUnderflow {
                need: *pos + 2,
                have: data.len(),
            });
        }
        let len = u16::from_be_bytes([data[*pos], data[*pos + 1]]) as usize;
        *pos += 2;
        if *pos + len > data.len() {
            return Err(Error::BufferUnderflow {
                need: *pos + len,
                have: data.len(),
            });
        }
        sets.push(data[*pos..*pos + len].to_vec());
        *pos += len;
    }
    Ok(sets)
}
