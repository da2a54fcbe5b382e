//! MP4 container parsing.
//!
//! Parses `moov` into per-track sample tables so the demuxer can serve
//! samples by file offset without scanning `mdat`.

mod atoms;
mod reader;
mod sample_table;

pub use atoms::{
    matrix_for_rotation, rotation_from_matrix, Atom, AtomType, HandlerType, TrackInfo,
};
pub use reader::Mp4Reader;
pub use sample_table::{SampleEntry, SampleTable, SampleTableBuilder};

use crate::Result;
use std::fs::File;
use std::io::{BufReader, Read, Seek};
use std::path::Path;

/// Parsed MP4 file with extracted sample tables.
#[derive(Debug)]
pub struct Mp4File {
    /// Duration in movie timescale units.
    pub duration: u64,
    /// Movie timescale (time units per second).
    pub timescale: u32,
    pub video_track: Option<TrackInfo>,
    pub audio_track: Option<TrackInfo>,
    /// Whether moov comes before mdat.
    pub has_faststart: bool,
}

impl Mp4File {
    /// Parse an MP4 file from the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path)?;
        let mut reader = BufReader::new(file);
        Self::parse(&mut reader)
    }

    /// Parse an MP4 file from a reader.
    pub fn parse<R: Read + Seek>(reader: &mut R) -> Result<Self> {
        Mp4Reader::new(reader).parse()
    }

    pub fn duration_secs(&self) -> f64 {
        if self.timescale == 0 {
            0.0
        } else {
            self.duration as f64 / self.timescale as f64
        }
    }

    pub fn duration_us(&self) -> u64 {
        if self.timescale == 0 {
            0
        } else {
            (self.duration as u128 * 1_000_000 / self.timescale as u128) as u64
        }
    }

    pub fn video_samples(&self) -> Option<&SampleTable> {
        self.video_track.as_ref().map(|t| &t.sample_table)
    }

    pub fn audio_samples(&self) -> Option<&SampleTable> {
        self.audio_track.as_ref().map(|t| &t.sample_table)
    }

    /// Parsed tracks ordered by track id.
    pub fn tracks(&self) -> Vec<&TrackInfo> {
        let mut tracks: Vec<&TrackInfo> = self
            .video_track
            .iter()
            .chain(self.audio_track.iter())
            .collect();
        tracks.sort_by_key(|t| t.track_id);
        tracks
    }
}
