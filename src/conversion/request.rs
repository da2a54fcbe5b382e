use crate::planner::TrimWindow;
use crate::probe::SourceInfo;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use vidconvert_common::{RequestId, Rotation};

/// One queued conversion. Immutable once enqueued.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversionRequest {
    pub id: RequestId,
    /// Caller-supplied tag, opaque to the queue.
    #[serde(default)]
    pub correlation_id: Option<String>,
    pub source: PathBuf,
    pub destination: PathBuf,
    /// Trim start; values of zero or less mean "from the beginning".
    #[serde(default)]
    pub start_us: i64,
    /// Trim end; values of zero or less mean "to the end".
    #[serde(default)]
    pub end_us: i64,
    pub result_width: u32,
    pub result_height: u32,
    #[serde(default)]
    pub rotation: Rotation,
    pub original_width: u32,
    pub original_height: u32,
    /// Target bitrate; 0 selects the configured default.
    #[serde(default)]
    pub bitrate: u32,
}

impl ConversionRequest {
    pub fn new(source: impl Into<PathBuf>, destination: impl Into<PathBuf>) -> Self {
        Self {
            id: RequestId::new(),
            correlation_id: None,
            source: source.into(),
            destination: destination.into(),
            start_us: -1,
            end_us: -1,
            result_width: 0,
            result_height: 0,
            rotation: Rotation::None,
            original_width: 0,
            original_height: 0,
            bitrate: 0,
        }
    }

    /// Request built from a probed source, converting to `destination`.
    pub fn from_probe(info: &SourceInfo, destination: impl Into<PathBuf>) -> Self {
        Self::new(info.path.clone(), destination)
            .with_source_geometry(info.original_width, info.original_height, info.rotation)
            .with_output_size(info.result_width, info.result_height)
            .with_bitrate(info.bitrate)
    }

    pub fn with_trim_us(mut self, start_us: i64, end_us: i64) -> Self {
        self.start_us = start_us;
        self.end_us = end_us;
        self
    }

    pub fn with_output_size(mut self, width: u32, height: u32) -> Self {
        self.result_width = width;
        self.result_height = height;
        self
    }

    pub fn with_source_geometry(mut self, width: u32, height: u32, rotation: Rotation) -> Self {
        self.original_width = width;
        self.original_height = height;
        self.rotation = rotation;
        self
    }

    pub fn with_bitrate(mut self, bitrate: u32) -> Self {
        self.bitrate = bitrate;
        self
    }

    pub fn with_correlation_id(mut self, id: impl Into<String>) -> Self {
        self.correlation_id = Some(id.into());
        self
    }

    pub fn trim(&self) -> TrimWindow {
        TrimWindow::new(self.start_us, self.end_us)
    }

    pub fn destination(&self) -> &Path {
        &self.destination
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_unbounded() {
        let req = ConversionRequest::new("a.mp4", "b.mp4");
        assert_eq!(req.trim(), TrimWindow::unbounded());
        assert_eq!(req.bitrate, 0);
        assert!(req.correlation_id.is_none());
    }

    #[test]
    fn test_from_probe_copies_geometry() {
        let info = SourceInfo {
            path: PathBuf::from("clip.mp4"),
            size_bytes: 1000,
            duration_us: 10_000_000,
            rotation: Rotation::Deg90,
            original_width: 1280,
            original_height: 720,
            result_width: 640,
            result_height: 360,
            bitrate: 450_000,
            video_bytes: 900,
            audio_bytes: 100,
            has_audio: true,
            is_avc: true,
        };
        let req = ConversionRequest::from_probe(&info, "out.mp4").with_trim_us(1_000_000, 0);
        assert_eq!(req.source, PathBuf::from("clip.mp4"));
        assert_eq!((req.result_width, req.result_height), (640, 360));
        assert_eq!((req.original_width, req.original_height), (1280, 720));
        assert_eq!(req.rotation, Rotation::Deg90);
        assert_eq!(req.bitrate, 450_000);
        assert_eq!(req.trim().start_us, Some(1_000_000));
        assert_eq!(req.trim().end_us, None);
    }

    #[test]
    fn test_serde_roundtrip() {
        let req = ConversionRequest::new("a.mp4", "b.mp4")
            .with_output_size(320, 240)
            .with_correlation_id("upload-7");
        let json = serde_json::to_string(&req).unwrap();
        let back: ConversionRequest = serde_json::from_str(&json).unwrap();
        assert_eq!(back, req);
        assert!(json.contains("\"correlation_id\":\"upload-7\""));
    }
}
