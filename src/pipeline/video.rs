//! Decode, render and re-encode the video track.

use super::{
    CancellationToken, ConversionError, PipelineOptions, PipelineState, RunPhase, StateTracker,
    TrackMuxerAdapter,
};
use crate::codec::{CodecBackend, CodecError, CodecSession, EncoderConfig, EncoderInput, OutputStatus};
use crate::planner::OutputPlan;
use crate::quirks::{BufferLayout, PlatformInfo, QuirkProfile, SURFACE_INPUT_API};
use tracing::{debug, trace, warn};
use vidconvert_common::MediaKind;
use vidconvert_media::codec_config::{split_parameter_sets, strip_start_code};
use vidconvert_media::{BufferFlags, BufferInfo, CodecConfig, Demuxer, TrackFormat};

/// Extra row stride the buffer-input encoders are configured with.
const STRIDE_PADDING: u32 = 32;

/// Counters from one video pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VideoStats {
    /// Timestamp of the first frame kept at or after the trim start.
    pub effective_start_us: Option<i64>,
    pub samples_fed: u64,
    pub frames_rendered: u64,
    pub frames_dropped: u64,
}

/// Borrowed context for one video pass.
pub(super) struct VideoStage<'a> {
    pub demuxer: &'a mut dyn Demuxer,
    pub muxer: &'a mut TrackMuxerAdapter,
    pub plan: &'a OutputPlan,
    pub profile: &'a QuirkProfile,
    pub options: &'a PipelineOptions,
    pub platform: &'a PlatformInfo,
    pub cancel: &'a CancellationToken,
    pub tracker: &'a mut StateTracker,
}

impl VideoStage<'_> {
    /// Transcode track `track`. The session is released and the track
    /// unselected whatever the outcome.
    pub fn transcode(
        self,
        backend: &dyn CodecBackend,
        track: usize,
        bitrate: u32,
        on_flush: &mut dyn FnMut(),
    ) -> Result<VideoStats, ConversionError> {
        let source = self.demuxer.track_format(track)?;
        self.demuxer.select_track(track)?;
        self.demuxer.seek_to_previous_sync(self.plan.trim.seek_target());

        let session = match backend.open_session(&source.mime, &self.profile.encoder_name, self.profile.input) {
            Ok(session) => session,
            Err(e) => {
                self.demuxer.unselect_track(track)?;
                return Err(e.into());
            }
        };

        let mut transcoder = Transcoder {
            session,
            layout: self.profile.layout(self.plan.width, self.plan.height),
            stage: self,
            track,
            input_done: false,
            decoder_done: false,
            output_done: false,
            pending_encoder_eos: false,
            stats: VideoStats::default(),
        };

        let result = transcoder
            .start(&source, bitrate)
            .and_then(|()| transcoder.drive(on_flush));

        transcoder.session.release();
        transcoder.stage.demuxer.unselect_track(track)?;
        result.map(|()| transcoder.stats)
    }
}

/// What one encoder poll produced.
enum EncoderPoll {
    Idle,
    Progress,
}

struct Transcoder<'a> {
    session: CodecSession,
    stage: VideoStage<'a>,
    layout: BufferLayout,
    track: usize,
    input_done: bool,
    decoder_done: bool,
    output_done: bool,
    /// Buffer-input encoders get their end of stream as a buffer, which may
    /// have to wait for a free input slot.
    pending_encoder_eos: bool,
    stats: VideoStats,
}

impl Transcoder<'_> {
    fn start(&mut self, source: &TrackFormat, bitrate: u32) -> Result<(), ConversionError> {
        let plan = self.stage.plan;
        let profile = self.stage.profile;
        let buffers = profile.input == EncoderInput::Buffers;
        let config = EncoderConfig {
            mime: self.stage.options.mime.clone(),
            width: plan.width,
            height: plan.height,
            bitrate: if bitrate > 0 { bitrate } else { self.stage.options.default_bitrate },
            frame_rate: self.stage.options.frame_rate,
            i_frame_interval: self.stage.options.i_frame_interval,
            color_format: profile.color_format,
            stride: buffers.then_some(plan.width + STRIDE_PADDING),
            slice_height: buffers.then_some(plan.height),
        };
        debug!(
            encoder = %profile.encoder_name,
            width = config.width,
            height = config.height,
            bitrate = config.bitrate,
            color_format = %config.color_format,
            input = ?profile.input,
            "Configuring encoder"
        );

        self.session.encoder.configure(&config)?;
        self.session.encoder.start()?;
        self.session.decoder.configure(source)?;
        self.session.decoder.start()?;
        Ok(())
    }

    fn phase(&mut self, phase: RunPhase) {
        self.stage.tracker.enter(PipelineState::Running(phase));
    }

    fn drive(&mut self, on_flush: &mut dyn FnMut()) -> Result<(), ConversionError> {
        while !self.output_done {
            self.stage.cancel.check()?;

            if !self.input_done {
                self.phase(RunPhase::DecoderFeeding);
                self.feed_decoder()?;
            }
            if self.pending_encoder_eos {
                self.queue_encoder_eos()?;
            }

            let mut decoder_output_available = !self.decoder_done;
            let mut encoder_output_available = true;
            while (decoder_output_available || encoder_output_available) && !self.output_done {
                self.stage.cancel.check()?;

                self.phase(RunPhase::EncoderDraining);
                match self.drain_encoder(on_flush)? {
                    EncoderPoll::Progress => continue,
                    EncoderPoll::Idle => encoder_output_available = false,
                }

                if self.decoder_done {
                    decoder_output_available = false;
                    continue;
                }
                self.phase(RunPhase::DecoderDraining);
                decoder_output_available = self.drain_decoder()?;
            }
        }
        Ok(())
    }

    /// Move one source sample into the decoder, or signal its end of stream.
    fn feed_decoder(&mut self) -> Result<(), ConversionError> {
        let timeout = self.stage.options.poll_timeout;
        let end_of_input = match self.stage.demuxer.sample_track_index() {
            Some(index) if index == self.track => {
                let Some(slot) = self.session.decoder.dequeue_input_buffer(timeout)? else {
                    return Ok(());
                };
                let buf = self.session.decoder.input_buffer(slot)?;
                match self.stage.demuxer.read_sample_data(buf)? {
                    Some(size) => {
                        let pts = self.stage.demuxer.sample_time().unwrap_or(0);
                        let flags = self.stage.demuxer.sample_flags();
                        self.session
                            .decoder
                            .queue_input_buffer(slot, BufferInfo::new(0, size, pts, flags))?;
                        self.stats.samples_fed += 1;
                        self.stage.demuxer.advance();
                        return Ok(());
                    }
                    None => {
                        self.session
                            .decoder
                            .queue_input_buffer(slot, BufferInfo::end_of_stream(0))?;
                        self.input_done = true;
                        return Ok(());
                    }
                }
            }
            Some(other) => {
                trace!(track = other, "Skipping sample from unselected track");
                self.stage.demuxer.advance();
                false
            }
            None => true,
        };

        if end_of_input {
            if let Some(slot) = self.session.decoder.dequeue_input_buffer(timeout)? {
                self.session
                    .decoder
                    .queue_input_buffer(slot, BufferInfo::end_of_stream(0))?;
                self.input_done = true;
                debug!(samples = self.stats.samples_fed, "Decoder input complete");
            }
        }
        Ok(())
    }

    fn drain_encoder(&mut self, on_flush: &mut dyn FnMut()) -> Result<EncoderPoll, ConversionError> {
        let status = self
            .session
            .encoder
            .dequeue_output_buffer(self.stage.options.poll_timeout)?;
        match status {
            OutputStatus::TryAgainLater => return Ok(EncoderPoll::Idle),
            OutputStatus::BuffersChanged => {}
            OutputStatus::FormatChanged(format) => {
                if self.stage.muxer.samples_written(MediaKind::Video) == 0 {
                    let format = format.with_rotation(self.stage.plan.rotation);
                    self.stage.muxer.add_track(&format, MediaKind::Video)?;
                } else {
                    warn!("Encoder format changed mid-stream, ignoring");
                }
            }
            OutputStatus::Buffer { index, info } => {
                self.handle_encoded(index, &info, on_flush)?;
                self.session.encoder.release_output_buffer(index)?;
                if info.is_end_of_stream() {
                    debug!("Encoder reached end of stream");
                    self.output_done = true;
                }
            }
        }
        Ok(EncoderPoll::Progress)
    }

    fn handle_encoded(
        &mut self,
        index: usize,
        info: &BufferInfo,
        on_flush: &mut dyn FnMut(),
    ) -> Result<(), ConversionError> {
        if info.size <= 1 {
            return Ok(());
        }
        let data = self.session.encoder.output_buffer(index)?;

        if !info.is_codec_config() {
            if self.stage.muxer.write_sample_data(MediaKind::Video, data, info)? {
                on_flush();
            }
            return Ok(());
        }

        let has_sets = self
            .stage
            .muxer
            .handle(MediaKind::Video)
            .is_some_and(|h| h.has_parameter_sets());
        if has_sets {
            return Ok(());
        }

        let payload = info.payload(data).ok_or_else(|| {
            ConversionError::CodecProtocolViolation(format!(
                "codec config buffer {}+{} outside output buffer of {} bytes",
                info.offset,
                info.size,
                data.len()
            ))
        })?;
        let sets = split_parameter_sets(payload);
        let sps = strip_start_code(sets.first).to_vec();
        let pps = match sets.second {
            Some(second) => vec![strip_start_code(second).to_vec()],
            None => {
                warn!(size = payload.len(), "Codec config has no parameter set boundary");
                Vec::new()
            }
        };
        let plan = self.stage.plan;
        let format = TrackFormat::video(self.stage.options.mime.clone(), plan.width, plan.height)
            .with_rotation(plan.rotation)
            .with_config(CodecConfig::Avc {
                sps: vec![sps],
                pps,
            });
        self.stage.muxer.add_track(&format, MediaKind::Video)?;
        Ok(())
    }

    /// Poll the decoder once. Returns whether more output may be pending.
    fn drain_decoder(&mut self) -> Result<bool, ConversionError> {
        let status = self
            .session
            .decoder
            .dequeue_output_buffer(self.stage.options.poll_timeout)?;
        let (index, mut info) = match status {
            OutputStatus::TryAgainLater => return Ok(false),
            OutputStatus::BuffersChanged => return Ok(true),
            OutputStatus::FormatChanged(format) => {
                debug!(width = format.width, height = format.height, "Decoder output format");
                return Ok(true);
            }
            OutputStatus::Buffer { index, info } => (index, info),
        };

        let pts = info.presentation_time_us;
        let mut render = if self.stage.platform.api_level >= SURFACE_INPUT_API {
            info.size != 0
        } else {
            info.size != 0 || pts != 0
        };

        let trim = self.stage.plan.trim;
        if trim.is_past_end(pts) {
            debug!(pts_us = pts, "Reached trim end");
            self.input_done = true;
            self.decoder_done = true;
            render = false;
            info.flags |= BufferFlags::END_OF_STREAM;
        }
        if trim.start_us.is_some() && self.stats.effective_start_us.is_none() {
            if trim.is_before_start(pts) {
                render = false;
            } else {
                debug!(pts_us = pts, "First frame inside trim window");
                self.stats.effective_start_us = Some(pts);
            }
        }

        self.session.decoder.release_output_buffer(index, render)?;
        if render {
            match self.render_frame(pts) {
                Ok(()) => self.stats.frames_rendered += 1,
                Err(ConversionError::RenderTransferFailure(msg)) => {
                    warn!(pts_us = pts, error = %msg, "Dropping frame");
                    self.stats.frames_dropped += 1;
                }
                Err(e) => return Err(e),
            }
        } else if info.size != 0 {
            self.stats.frames_dropped += 1;
        }

        if info.is_end_of_stream() {
            self.decoder_done = true;
            debug!(
                rendered = self.stats.frames_rendered,
                dropped = self.stats.frames_dropped,
                "Decoder reached end of stream"
            );
            if self.stage.profile.uses_surface() {
                self.session.encoder.signal_end_of_input_stream()?;
            } else {
                self.pending_encoder_eos = true;
                self.queue_encoder_eos()?;
            }
            return Ok(false);
        }
        Ok(true)
    }

    fn render_frame(&mut self, pts_us: i64) -> Result<(), ConversionError> {
        let timeout = self.stage.options.render_timeout;
        let rotation = self.stage.plan.render_rotation;
        self.session.renderer.await_new_image(timeout)?;
        self.session.renderer.draw_image(rotation)?;

        if self.stage.profile.uses_surface() {
            self.session.renderer.set_presentation_time(pts_us * 1000);
            self.session.renderer.swap_buffers()?;
            return Ok(());
        }

        let Some(slot) = self
            .session
            .encoder
            .dequeue_input_buffer(self.stage.options.poll_timeout)?
        else {
            return Err(ConversionError::RenderTransferFailure(
                "encoder input buffer not available".into(),
            ));
        };
        let profile = self.stage.profile;
        let dst = self.session.encoder.input_buffer(slot)?;
        match self
            .session
            .renderer
            .read_pixels(dst, &self.layout, profile.color_format, profile.swap_uv)
        {
            Ok(size) => {
                let info = BufferInfo::new(0, size, pts_us, BufferFlags::empty());
                self.session.encoder.queue_input_buffer(slot, info)?;
                Ok(())
            }
            Err(CodecError::Render(msg)) => {
                // Hand the slot back empty.
                self.session
                    .encoder
                    .queue_input_buffer(slot, BufferInfo::new(0, 0, pts_us, BufferFlags::empty()))?;
                Err(ConversionError::RenderTransferFailure(msg))
            }
            Err(e) => Err(e.into()),
        }
    }

    fn queue_encoder_eos(&mut self) -> Result<(), ConversionError> {
        let timeout = self.stage.options.poll_timeout;
        match self.session.encoder.dequeue_input_buffer(timeout)? {
            Some(slot) => {
                self.session
                    .encoder
                    .queue_input_buffer(slot, BufferInfo::end_of_stream(0))?;
                self.pending_encoder_eos = false;
            }
            None => trace!("No encoder input buffer for end of stream yet"),
        }
        Ok(())
    }
}
