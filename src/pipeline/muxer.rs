//! Track registration and sample writing on top of a [`ContainerWriter`].

use super::ConversionError;
use tracing::{debug, error, warn};
use vidconvert_common::MediaKind;
use vidconvert_media::{BufferInfo, ContainerWriter, TrackFormat};

/// A registered output track.
#[derive(Debug, Clone)]
pub struct TrackHandle {
    pub index: usize,
    pub kind: MediaKind,
    pub format: TrackFormat,
    pub samples: u64,
    pub last_pts_us: Option<i64>,
}

impl TrackHandle {
    pub fn has_parameter_sets(&self) -> bool {
        self.format.has_parameter_sets()
    }
}

/// Adapter the pipeline writes through.
///
/// Holds at most one track per media kind. Registering a kind again before
/// its first sample replaces the provisional format in place, so the
/// container index never changes once samples exist.
pub struct TrackMuxerAdapter {
    writer: Box<dyn ContainerWriter>,
    video: Option<TrackHandle>,
    audio: Option<TrackHandle>,
    output_len: Option<u64>,
}

impl TrackMuxerAdapter {
    pub fn new(writer: Box<dyn ContainerWriter>) -> Self {
        Self {
            writer,
            video: None,
            audio: None,
            output_len: None,
        }
    }

    fn slot(&mut self, kind: MediaKind) -> &mut Option<TrackHandle> {
        match kind {
            MediaKind::Video => &mut self.video,
            MediaKind::Audio => &mut self.audio,
        }
    }

    pub fn handle(&self, kind: MediaKind) -> Option<&TrackHandle> {
        match kind {
            MediaKind::Video => self.video.as_ref(),
            MediaKind::Audio => self.audio.as_ref(),
        }
    }

    /// Register `format` for `kind`, or replace the provisional registration.
    ///
    /// A format without parameter sets never overwrites one that has them.
    /// Once samples were written the registration is left untouched.
    pub fn add_track(&mut self, format: &TrackFormat, kind: MediaKind) -> Result<usize, ConversionError> {
        if let Some(handle) = self.handle(kind) {
            let index = handle.index;
            if handle.samples > 0 {
                warn!(%kind, index, "Track format changed after samples were written, keeping original");
                return Ok(index);
            }
            let mut merged = format.clone();
            if !merged.has_parameter_sets() && handle.has_parameter_sets() {
                merged.config = handle.format.config.clone();
            }
            self.writer.update_track_format(index, &merged)?;
            debug!(%kind, index, parameter_sets = merged.has_parameter_sets(), "Replaced provisional track");
            if let Some(handle) = self.slot(kind).as_mut() {
                handle.format = merged;
            }
            return Ok(index);
        }

        let index = self.writer.add_track(format)?;
        debug!(%kind, index, mime = %format.mime, "Registered track");
        *self.slot(kind) = Some(TrackHandle {
            index,
            kind,
            format: format.clone(),
            samples: 0,
            last_pts_us: None,
        });
        Ok(index)
    }

    /// Append one sample to the `kind` track. Returns whether buffered data
    /// was flushed to the file.
    ///
    /// Timestamps that go backwards are clamped to the previous one.
    pub fn write_sample_data(
        &mut self,
        kind: MediaKind,
        data: &[u8],
        info: &BufferInfo,
    ) -> Result<bool, ConversionError> {
        let Some(handle) = self.slot(kind).as_mut() else {
            return Err(ConversionError::CodecProtocolViolation(format!(
                "{kind} sample before its track format was known"
            )));
        };

        let mut info = *info;
        if let Some(last) = handle.last_pts_us {
            if info.presentation_time_us < last {
                warn!(
                    %kind,
                    pts_us = info.presentation_time_us,
                    last_pts_us = last,
                    "Non-monotonic timestamp, clamping"
                );
                info.presentation_time_us = last;
            }
        }
        let index = handle.index;
        handle.last_pts_us = Some(info.presentation_time_us);
        handle.samples += 1;

        Ok(self.writer.write_sample_data(index, data, &info)?)
    }

    pub fn samples_written(&self, kind: MediaKind) -> u64 {
        self.handle(kind).map_or(0, |h| h.samples)
    }

    /// Finalize the container. Never fails; errors are logged and yield `None`.
    pub fn finish_movie(&mut self) -> Option<u64> {
        if self.output_len.is_some() {
            return self.output_len;
        }
        match self.writer.finish_movie() {
            Ok(len) => {
                self.output_len = Some(len);
                Some(len)
            }
            Err(e) => {
                error!(error = %e, "Failed to finish container");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use std::io::Cursor;
    use vidconvert_media::{BufferFlags, CodecConfig, Mp4Writer, MIME_AAC, MIME_AVC};

    fn adapter() -> TrackMuxerAdapter {
        let writer = Mp4Writer::with_flush_threshold(Cursor::new(Vec::new()), 1).unwrap();
        TrackMuxerAdapter::new(Box::new(writer))
    }

    fn avc_config() -> CodecConfig {
        CodecConfig::Avc {
            sps: vec![vec![0x67, 0x42, 0xc0, 0x1e]],
            pps: vec![vec![0x68, 0xce]],
        }
    }

    fn sample(pts: i64) -> BufferInfo {
        BufferInfo::new(0, 5, pts, BufferFlags::SYNC)
    }

    #[test]
    fn test_second_registration_replaces_provisional() {
        let mut muxer = adapter();
        let provisional = TrackFormat::video(MIME_AVC, 320, 240);
        let first = muxer.add_track(&provisional, MediaKind::Video).unwrap();
        let finalized = provisional.clone().with_config(avc_config());
        let second = muxer.add_track(&finalized, MediaKind::Video).unwrap();

        assert_eq!(first, second);
        assert!(muxer.handle(MediaKind::Video).unwrap().has_parameter_sets());
    }

    #[test]
    fn test_format_without_config_keeps_parameter_sets() {
        let mut muxer = adapter();
        let finalized = TrackFormat::video(MIME_AVC, 320, 240).with_config(avc_config());
        muxer.add_track(&finalized, MediaKind::Video).unwrap();
        muxer
            .add_track(&TrackFormat::video(MIME_AVC, 320, 240), MediaKind::Video)
            .unwrap();
        assert_eq!(
            muxer.handle(MediaKind::Video).unwrap().format.config,
            Some(avc_config())
        );
    }

    #[test]
    fn test_index_is_stable_after_samples() {
        let mut muxer = adapter();
        let audio = TrackFormat::audio(MIME_AAC, 44_100, 2);
        let index = muxer.add_track(&audio, MediaKind::Audio).unwrap();
        muxer
            .write_sample_data(MediaKind::Audio, &[1, 2, 3, 4, 5], &sample(0))
            .unwrap();
        let again = muxer
            .add_track(&TrackFormat::audio(MIME_AAC, 48_000, 2), MediaKind::Audio)
            .unwrap();
        assert_eq!(index, again);
        assert_eq!(muxer.handle(MediaKind::Audio).unwrap().format.sample_rate, 44_100);
    }

    #[test]
    fn test_write_without_track_is_violation() {
        let mut muxer = adapter();
        assert_matches!(
            muxer.write_sample_data(MediaKind::Video, &[0; 5], &sample(0)),
            Err(ConversionError::CodecProtocolViolation(_))
        );
    }

    #[test]
    fn test_timestamps_are_clamped() {
        let mut muxer = adapter();
        muxer
            .add_track(&TrackFormat::audio(MIME_AAC, 44_100, 2), MediaKind::Audio)
            .unwrap();
        muxer.write_sample_data(MediaKind::Audio, &[0; 5], &sample(50_000)).unwrap();
        muxer.write_sample_data(MediaKind::Audio, &[0; 5], &sample(20_000)).unwrap();
        let handle = muxer.handle(MediaKind::Audio).unwrap();
        assert_eq!(handle.last_pts_us, Some(50_000));
        assert_eq!(handle.samples, 2);
    }

    #[test]
    fn test_finish_is_idempotent_and_infallible() {
        let mut muxer = adapter();
        let len = muxer.finish_movie();
        assert!(len.is_some());
        assert_eq!(muxer.finish_movie(), len);
        assert_eq!(muxer.samples_written(MediaKind::Video), 0);
    }
}
