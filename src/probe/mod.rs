//! Source inspection.
//!
//! Derives the request fields a conversion needs from the source MP4:
//! geometry, rotation, a coarse bitrate and the resulting output size.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;
use vidconvert_common::Rotation;
use vidconvert_media::mp4::TrackInfo;
use vidconvert_media::Mp4File;

/// Longest output side.
pub const MAX_RESULT_SIDE: u32 = 640;
/// Upper bound for the estimated bitrate.
pub const MAX_BITRATE: u32 = 900_000;
/// Estimated bitrates are rounded down to a multiple of this.
pub const BITRATE_STEP: u64 = 100_000;

/// What a conversion needs to know about its source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceInfo {
    pub path: PathBuf,
    pub size_bytes: u64,
    pub duration_us: u64,
    pub rotation: Rotation,
    pub original_width: u32,
    pub original_height: u32,
    /// Output size; zero when the source cannot be converted.
    pub result_width: u32,
    pub result_height: u32,
    /// Estimated target bitrate, 0 when unknown.
    pub bitrate: u32,
    /// Video payload bytes, re-estimated after downscaling.
    pub video_bytes: u64,
    pub audio_bytes: u64,
    pub has_audio: bool,
    pub is_avc: bool,
}

impl SourceInfo {
    /// Whether the source yielded a usable output size.
    pub fn is_convertible(&self) -> bool {
        self.result_width != 0 && self.result_height != 0
    }

    /// Rough output size: video estimate plus the copied audio.
    pub fn estimated_size(&self) -> u64 {
        self.video_bytes + self.audio_bytes
    }

    pub fn duration_ms(&self) -> u64 {
        self.duration_us / 1000
    }

    fn unusable(path: &Path, size_bytes: u64) -> Self {
        Self {
            path: path.to_path_buf(),
            size_bytes,
            duration_us: 0,
            rotation: Rotation::None,
            original_width: 0,
            original_height: 0,
            result_width: 0,
            result_height: 0,
            bitrate: 0,
            video_bytes: 0,
            audio_bytes: 0,
            has_audio: false,
            is_avc: false,
        }
    }
}

fn estimate_bitrate(track: &TrackInfo) -> u32 {
    let secs = track.duration_secs();
    if secs <= 0.0 {
        return 0;
    }
    let bits_per_sec = (track.sample_table.total_size() as f64 * 8.0 / secs) as u64;
    let stepped = bits_per_sec / BITRATE_STEP * BITRATE_STEP;
    stepped.min(MAX_BITRATE as u64) as u32
}

/// Inspect `path`. Files without both an AAC audio track and a sized
/// video track come back with a zero result size.
pub fn probe_file(path: &Path) -> Result<SourceInfo> {
    let size_bytes = std::fs::metadata(path)
        .with_context(|| format!("Failed to stat source: {:?}", path))?
        .len();
    let mp4 = Mp4File::open(path).with_context(|| format!("Failed to parse MP4: {:?}", path))?;

    let has_aac = mp4
        .audio_track
        .as_ref()
        .is_some_and(|t| t.sample_entry.as_ref() == Some(b"mp4a"));
    let video = mp4
        .video_track
        .as_ref()
        .filter(|t| t.width.unwrap_or(0) != 0 && t.height.unwrap_or(0) != 0);

    let (Some(video), true) = (video, has_aac) else {
        debug!(path = ?path, has_aac, "Source has no convertible track pair");
        let mut info = SourceInfo::unusable(path, size_bytes);
        info.has_audio = has_aac;
        return Ok(info);
    };

    let audio_bytes = mp4
        .audio_track
        .as_ref()
        .map(|t| t.sample_table.total_size())
        .unwrap_or(0);
    let duration_secs = video.duration_secs();
    let original_width = video.width.unwrap_or(0);
    let original_height = video.height.unwrap_or(0);

    let mut bitrate = estimate_bitrate(video);
    let mut video_bytes = video.sample_table.total_size();
    let mut result_width = original_width;
    let mut result_height = original_height;

    if result_width > MAX_RESULT_SIDE || result_height > MAX_RESULT_SIDE {
        let scale = MAX_RESULT_SIDE as f32 / result_width.max(result_height) as f32;
        result_width = (result_width as f32 * scale) as u32;
        result_height = (result_height as f32 * scale) as u32;
        if bitrate != 0 {
            bitrate = (bitrate as f32 * scale.max(0.5)) as u32;
            video_bytes = (bitrate as f64 / 8.0 * duration_secs) as u64;
        }
    }

    let info = SourceInfo {
        path: path.to_path_buf(),
        size_bytes,
        duration_us: video.duration_us(),
        rotation: video.rotation,
        original_width,
        original_height,
        result_width,
        result_height,
        bitrate,
        video_bytes,
        audio_bytes,
        has_audio: true,
        is_avc: video.sample_entry.as_ref() == Some(b"avc1"),
    };
    debug!(
        path = ?path,
        width = info.result_width,
        height = info.result_height,
        bitrate = info.bitrate,
        rotation = %info.rotation,
        "Probed source"
    );
    Ok(info)
}
