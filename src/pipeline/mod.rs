//! The conversion pipeline.
//!
//! One [`TranscodePipeline::run`] call converts one request on the calling
//! thread:
//!
//! 1. open the source and plan the output geometry
//! 2. resolve the encoder quirks for this platform
//! 3. transcode (or copy) the video track
//! 4. copy the audio track verbatim, aligned to the first kept video frame
//! 5. finalize the container, whatever happened before
//!
//! Progress is reported through the `on_flush` callback every time muxed
//! data reaches the output file.

mod audio;
mod cancel;
mod error;
mod muxer;
mod video;

pub use audio::{AudioCopier, CopyStats, LeadIn};
pub use cancel::CancellationToken;
pub use error::ConversionError;
pub use muxer::{TrackHandle, TrackMuxerAdapter};
pub use video::VideoStats;

use crate::codec::CodecBackend;
use crate::config::Config;
use crate::conversion::ConversionRequest;
use crate::planner::{OutputPlan, TrimPlanner};
use crate::quirks::{DeviceQuirkResolver, PlatformInfo};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use vidconvert_common::{MediaKind, RequestId};
use vidconvert_media::mux::DEFAULT_FLUSH_THRESHOLD;
use vidconvert_media::{Demuxer, Mp4Demuxer, Mp4Writer};
use video::VideoStage;

/// Sub-state while codecs are running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunPhase {
    DecoderFeeding,
    DecoderDraining,
    EncoderDraining,
}

/// Where a pipeline run currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    Idle,
    ExtractingOpened,
    Running(RunPhase),
    VideoDone,
    AudioPassthrough,
    Muxed,
    Completed,
    Failed,
    Canceled,
}

impl PipelineState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            PipelineState::Completed | PipelineState::Failed | PipelineState::Canceled
        )
    }
}

/// Records state transitions for one run.
#[derive(Debug)]
pub struct StateTracker {
    id: RequestId,
    state: PipelineState,
}

impl StateTracker {
    pub fn new(id: RequestId) -> Self {
        Self {
            id,
            state: PipelineState::Idle,
        }
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    /// Move to `next`. Re-entering the current state is a no-op, and a
    /// terminal state is never left.
    pub fn enter(&mut self, next: PipelineState) {
        if next == self.state || self.state.is_terminal() {
            return;
        }
        debug!(id = %self.id, from = ?self.state, to = ?next, "Pipeline state");
        self.state = next;
    }
}

/// How the video track reaches the output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VideoMode {
    /// Decode, render and re-encode.
    #[default]
    Transcode,
    /// Copy compressed samples without touching codecs.
    Copy,
}

/// Tunables of a pipeline run.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineOptions {
    /// Output video MIME type.
    pub mime: String,
    /// Bitrate used when a request carries none.
    pub default_bitrate: u32,
    pub frame_rate: u32,
    pub i_frame_interval: u32,
    pub video_mode: VideoMode,
    /// Timeout of every codec dequeue call.
    pub poll_timeout: Duration,
    /// How long the renderer waits for a decoded image.
    pub render_timeout: Duration,
    /// Buffered bytes after which the writer flushes to disk.
    pub flush_threshold: usize,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            mime: vidconvert_media::MIME_AVC.to_string(),
            default_bitrate: 921_600,
            frame_rate: 25,
            i_frame_interval: 10,
            video_mode: VideoMode::Transcode,
            poll_timeout: Duration::from_micros(2500),
            render_timeout: Duration::from_millis(2500),
            flush_threshold: DEFAULT_FLUSH_THRESHOLD,
        }
    }
}

impl PipelineOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            mime: config.encoder.mime.clone(),
            default_bitrate: config.encoder.default_bitrate,
            frame_rate: config.encoder.frame_rate,
            i_frame_interval: config.encoder.i_frame_interval,
            video_mode: config.pipeline.video_mode,
            poll_timeout: Duration::from_micros(config.pipeline.poll_timeout_us),
            render_timeout: Duration::from_millis(config.pipeline.render_timeout_ms),
            flush_threshold: config.pipeline.flush_threshold,
        }
    }
}

/// Summary of a finished run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineReport {
    pub output_len: u64,
    pub video_samples: u64,
    pub audio_samples: u64,
    /// Time of the first kept video frame, used as the audio start.
    pub effective_start_us: Option<i64>,
    pub frames_dropped: u64,
    pub state: PipelineState,
}

/// Converts requests with one codec backend on one platform.
pub struct TranscodePipeline {
    backend: Arc<dyn CodecBackend>,
    platform: PlatformInfo,
    options: PipelineOptions,
}

impl TranscodePipeline {
    pub fn new(backend: Arc<dyn CodecBackend>, platform: PlatformInfo, options: PipelineOptions) -> Self {
        Self {
            backend,
            platform,
            options,
        }
    }

    pub fn platform(&self) -> &PlatformInfo {
        &self.platform
    }

    pub fn options(&self) -> &PipelineOptions {
        &self.options
    }

    /// Convert `request`. `on_flush` runs on this thread whenever muxed
    /// data was written to the destination.
    pub fn run(
        &self,
        request: &ConversionRequest,
        cancel: &CancellationToken,
        on_flush: &mut dyn FnMut(),
    ) -> Result<PipelineReport, ConversionError> {
        let mut tracker = StateTracker::new(request.id);

        File::open(&request.source).map_err(|e| {
            ConversionError::InputUnreadable(format!("{}: {e}", request.source.display()))
        })?;
        let plan = TrimPlanner::new(self.platform.api_level).plan(request)?;
        let mut demuxer = Mp4Demuxer::open(&request.source).map_err(|e| {
            ConversionError::InputUnreadable(format!("{}: {e}", request.source.display()))
        })?;
        tracker.enter(PipelineState::ExtractingOpened);

        let out = File::create(&request.destination).map_err(vidconvert_media::Error::from)?;
        let writer = Mp4Writer::with_flush_threshold(out, self.options.flush_threshold)?;
        let mut muxer = TrackMuxerAdapter::new(Box::new(writer));

        let result = self.convert(request, &plan, &mut demuxer, &mut muxer, cancel, &mut tracker, on_flush);

        // The container is closed on every path so partial output stays playable.
        let output_len = muxer.finish_movie().unwrap_or_else(|| {
            std::fs::metadata(&request.destination)
                .map(|m| m.len())
                .unwrap_or(0)
        });

        match result {
            Ok((video, audio)) => {
                tracker.enter(PipelineState::Muxed);
                tracker.enter(PipelineState::Completed);
                let report = PipelineReport {
                    output_len,
                    video_samples: muxer.samples_written(MediaKind::Video),
                    audio_samples: audio.samples,
                    effective_start_us: video.effective_start_us,
                    frames_dropped: video.frames_dropped,
                    state: tracker.state(),
                };
                info!(
                    id = %request.id,
                    output = ?request.destination,
                    bytes = report.output_len,
                    video_samples = report.video_samples,
                    audio_samples = report.audio_samples,
                    "Conversion finished"
                );
                Ok(report)
            }
            Err(e) => {
                tracker.enter(if e.is_canceled() {
                    PipelineState::Canceled
                } else {
                    PipelineState::Failed
                });
                Err(e)
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn convert(
        &self,
        request: &ConversionRequest,
        plan: &OutputPlan,
        demuxer: &mut Mp4Demuxer,
        muxer: &mut TrackMuxerAdapter,
        cancel: &CancellationToken,
        tracker: &mut StateTracker,
        on_flush: &mut dyn FnMut(),
    ) -> Result<(VideoStats, CopyStats), ConversionError> {
        let video = match self.options.video_mode {
            VideoMode::Transcode => self.transcode_video(request, plan, demuxer, muxer, cancel, tracker, on_flush)?,
            VideoMode::Copy => {
                let copied = AudioCopier::new(cancel).copy_track(
                    demuxer,
                    muxer,
                    MediaKind::Video,
                    plan.trim,
                    LeadIn::KeepFromSync,
                    on_flush,
                )?;
                VideoStats {
                    effective_start_us: copied.first_pts_us,
                    samples_fed: copied.samples,
                    ..VideoStats::default()
                }
            }
        };
        tracker.enter(PipelineState::VideoDone);

        cancel.check()?;
        tracker.enter(PipelineState::AudioPassthrough);
        let audio_window = plan.trim.starting_at(video.effective_start_us.or(plan.trim.start_us));
        let lead_in = match self.options.video_mode {
            VideoMode::Transcode => LeadIn::Drop,
            VideoMode::Copy => LeadIn::KeepFromSync,
        };
        let audio = AudioCopier::new(cancel).copy_track(
            demuxer,
            muxer,
            MediaKind::Audio,
            audio_window,
            lead_in,
            on_flush,
        )?;
        Ok((video, audio))
    }

    #[allow(clippy::too_many_arguments)]
    fn transcode_video(
        &self,
        request: &ConversionRequest,
        plan: &OutputPlan,
        demuxer: &mut Mp4Demuxer,
        muxer: &mut TrackMuxerAdapter,
        cancel: &CancellationToken,
        tracker: &mut StateTracker,
        on_flush: &mut dyn FnMut(),
    ) -> Result<VideoStats, ConversionError> {
        let Some(track) = demuxer.find_track("video/") else {
            warn!(id = %request.id, source = ?request.source, "Source has no video track");
            return Ok(VideoStats::default());
        };

        let codecs = self.backend.codec_infos();
        let profile = DeviceQuirkResolver::new(&self.platform).resolve(&codecs, &self.options.mime)?;
        debug!(
            id = %request.id,
            encoder = %profile.encoder_name,
            family = ?profile.family,
            color_format = %profile.color_format,
            padding = ?profile.padding,
            swap_uv = profile.swap_uv,
            "Resolved encoder quirks"
        );

        let stage = VideoStage {
            demuxer,
            muxer,
            plan,
            profile: &profile,
            options: &self.options,
            platform: &self.platform,
            cancel,
            tracker,
        };
        stage.transcode(self.backend.as_ref(), track, request.bitrate, on_flush)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tracker_ignores_repeats_and_terminal_exit() {
        let mut tracker = StateTracker::new(RequestId::new());
        tracker.enter(PipelineState::ExtractingOpened);
        tracker.enter(PipelineState::Running(RunPhase::DecoderFeeding));
        tracker.enter(PipelineState::Running(RunPhase::DecoderFeeding));
        assert_eq!(tracker.state(), PipelineState::Running(RunPhase::DecoderFeeding));

        tracker.enter(PipelineState::Canceled);
        tracker.enter(PipelineState::Completed);
        assert_eq!(tracker.state(), PipelineState::Canceled);
    }

    #[test]
    fn test_default_options() {
        let options = PipelineOptions::default();
        assert_eq!(options.mime, "video/avc");
        assert_eq!(options.video_mode, VideoMode::Transcode);
        assert_eq!(options.poll_timeout, Duration::from_micros(2500));
    }

    #[test]
    fn test_missing_source_is_input_unreadable() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = TranscodePipeline::new(
            Arc::new(crate::codec::LoopbackBackend::new()),
            PlatformInfo::default(),
            PipelineOptions::default(),
        );
        let request = ConversionRequest::new(dir.path().join("missing.mp4"), dir.path().join("out.mp4"))
            .with_output_size(320, 240);
        let err = pipeline
            .run(&request, &CancellationToken::new(), &mut || {})
            .unwrap_err();
        assert!(matches!(err, ConversionError::InputUnreadable(_)));
        assert!(!dir.path().join("out.mp4").exists());
    }
}
