//! Probe integration tests against generated MP4 sources.

mod common;

use common::*;
use tempfile::tempdir;
use vidconvert::conversion::ConversionRequest;
use vidconvert::planner::TrimPlanner;
use vidconvert::probe::{probe_file, MAX_RESULT_SIDE};
use vidconvert_common::Rotation;

#[test]
fn test_probe_small_source() {
    let dir = tempdir().unwrap();
    let source = default_source(dir.path());

    let info = probe_file(&source).unwrap();
    assert!(info.is_convertible());
    assert!(info.has_audio);
    assert!(info.is_avc);
    assert_eq!((info.original_width, info.original_height), (320, 240));
    assert_eq!((info.result_width, info.result_height), (320, 240));
    assert_eq!(info.rotation, Rotation::None);
    assert!((9_900..=10_000).contains(&info.duration_ms()));
    // Tiny synthetic samples estimate below one bitrate step.
    assert_eq!(info.bitrate, 0);
    assert_eq!(info.size_bytes, std::fs::metadata(&source).unwrap().len());
    assert!(info.audio_bytes > 0);
}

#[test]
fn test_probe_downscales_large_source() {
    let dir = tempdir().unwrap();
    let source = dir.path().join("hd.mp4");
    write_source(
        &source,
        &SourceShape {
            width: 1280,
            height: 720,
            duration_us: 1_000_000,
            ..SourceShape::default()
        },
    );

    let info = probe_file(&source).unwrap();
    assert_eq!((info.result_width, info.result_height), (MAX_RESULT_SIDE, 360));
}

#[test]
fn test_probe_keeps_rotation() {
    let dir = tempdir().unwrap();
    let source = dir.path().join("portrait.mp4");
    write_source(
        &source,
        &SourceShape {
            rotation: Rotation::Deg270,
            duration_us: 1_000_000,
            ..SourceShape::default()
        },
    );

    let info = probe_file(&source).unwrap();
    assert_eq!(info.rotation, Rotation::Deg270);
    assert_eq!((info.original_width, info.original_height), (320, 240));
}

#[test]
fn test_probe_without_audio_is_not_convertible() {
    let dir = tempdir().unwrap();
    let source = dir.path().join("silent.mp4");
    write_source(
        &source,
        &SourceShape {
            with_audio: false,
            duration_us: 1_000_000,
            ..SourceShape::default()
        },
    );

    let info = probe_file(&source).unwrap();
    assert!(!info.is_convertible());
    assert!(!info.has_audio);
    assert_eq!(info.estimated_size(), 0);
}

#[test]
fn test_probed_request_plans_cleanly() {
    let dir = tempdir().unwrap();
    let source = default_source(dir.path());
    let info = probe_file(&source).unwrap();

    let request = ConversionRequest::from_probe(&info, dir.path().join("out.mp4"));
    let plan = TrimPlanner::new(21).plan(&request).unwrap();
    assert_eq!((plan.width, plan.height), (320, 240));
}
