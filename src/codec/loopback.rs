//! Software codec backend that forwards access units unchanged.
//!
//! The decoder hands each compressed sample to the surface as its "image",
//! the renderer moves it to the encoder, and the encoder re-emits it in
//! Annex B form. Before the first frame the encoder emits a codec-config
//! buffer built from the source parameter sets, the same way hardware
//! encoders report SPS/PPS. Geometry and rotation are accepted but not
//! applied to the payload.

use super::{
    CodecBackend, CodecError, CodecInfo, CodecResult, CodecSession, EncoderConfig, EncoderInput,
    FrameRenderer, OutputStatus, VideoDecoder, VideoEncoder,
};
use crate::quirks::{BufferLayout, ColorFormat};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tracing::trace;
use vidconvert_common::Rotation;
use vidconvert_media::codec_config::{
    length_prefixed_to_annexb, nal_unit_type, split_annexb, strip_start_code, AvcConfigRecord,
    NAL_TYPE_IDR,
};
use vidconvert_media::{BufferFlags, BufferInfo, CodecConfig, TrackFormat, MIME_AVC, MIME_HEVC};

/// Input buffers per codec.
const INPUT_SLOTS: usize = 4;
/// Length prefix size of samples read from MP4 sources.
const NAL_LENGTH_SIZE: usize = 4;

struct Frame {
    data: Vec<u8>,
    pts_us: i64,
}

/// State shared by the decoder, renderer and encoder of one session.
#[derive(Default)]
struct SurfaceLink {
    /// Image rendered by the decoder and not yet picked up.
    rendered: Option<Frame>,
    encoder_input: VecDeque<Frame>,
    input_ended: bool,
    /// Source parameter sets in Annex B form.
    codec_config: Option<Vec<u8>>,
}

type Link = Arc<Mutex<SurfaceLink>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lifecycle {
    Created,
    Configured,
    Started,
    Stopped,
    Released,
}

impl Lifecycle {
    fn ensure_started(self) -> CodecResult<()> {
        match self {
            Lifecycle::Started => Ok(()),
            Lifecycle::Released => Err(CodecError::Released),
            other => Err(CodecError::Configure(format!("codec is {other:?}, not started"))),
        }
    }
}

/// Fixed pool of input buffers with ownership tracking.
struct InputSlots {
    buffers: Vec<Vec<u8>>,
    owned: Vec<bool>,
}

impl InputSlots {
    fn new(count: usize) -> Self {
        Self {
            buffers: vec![Vec::new(); count],
            owned: vec![false; count],
        }
    }

    fn dequeue(&mut self) -> Option<usize> {
        let index = self.owned.iter().position(|owned| !owned)?;
        self.owned[index] = true;
        self.buffers[index].clear();
        Some(index)
    }

    fn get_mut(&mut self, index: usize) -> CodecResult<&mut Vec<u8>> {
        match self.owned.get(index) {
            Some(true) => Ok(&mut self.buffers[index]),
            _ => Err(CodecError::InvalidIndex(index)),
        }
    }

    /// Give the slot back and return its payload.
    fn queue(&mut self, index: usize, info: &BufferInfo) -> CodecResult<Vec<u8>> {
        let buf = self.get_mut(index)?;
        let payload = info.payload(buf).ok_or(CodecError::InvalidIndex(index))?.to_vec();
        self.owned[index] = false;
        Ok(payload)
    }
}

/// Output buffers handed to the caller and not yet released.
#[derive(Default)]
struct OutputSlots {
    slots: Vec<Option<Vec<u8>>>,
}

impl OutputSlots {
    fn put(&mut self, data: Vec<u8>) -> usize {
        match self.slots.iter().position(Option::is_none) {
            Some(index) => {
                self.slots[index] = Some(data);
                index
            }
            None => {
                self.slots.push(Some(data));
                self.slots.len() - 1
            }
        }
    }

    fn get(&self, index: usize) -> CodecResult<&[u8]> {
        self.slots
            .get(index)
            .and_then(|s| s.as_deref())
            .ok_or(CodecError::InvalidIndex(index))
    }

    fn take(&mut self, index: usize) -> CodecResult<Vec<u8>> {
        self.slots
            .get_mut(index)
            .and_then(Option::take)
            .ok_or(CodecError::InvalidIndex(index))
    }
}

/// A [`CodecBackend`] that needs no hardware.
pub struct LoopbackBackend {
    codecs: Vec<CodecInfo>,
}

impl LoopbackBackend {
    pub const ENCODER_NAME: &'static str = "OMX.vidconvert.loopback.avc.encoder";

    pub fn new() -> Self {
        Self::with_codecs(vec![
            CodecInfo::decoder("OMX.vidconvert.loopback.avc.decoder", MIME_AVC),
            CodecInfo::decoder("OMX.vidconvert.loopback.hevc.decoder", MIME_HEVC),
            CodecInfo::encoder(
                Self::ENCODER_NAME,
                MIME_AVC,
                vec![
                    ColorFormat::Yuv420SemiPlanar.raw(),
                    ColorFormat::Yuv420Planar.raw(),
                ],
            ),
        ])
    }

    /// Advertise a custom codec list, e.g. to emulate a vendor encoder.
    pub fn with_codecs(codecs: Vec<CodecInfo>) -> Self {
        Self { codecs }
    }
}

impl Default for LoopbackBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl CodecBackend for LoopbackBackend {
    fn codec_infos(&self) -> Vec<CodecInfo> {
        self.codecs.clone()
    }

    fn open_session(
        &self,
        decoder_mime: &str,
        encoder_name: &str,
        input: EncoderInput,
    ) -> CodecResult<CodecSession> {
        if !self.codecs.iter().any(|c| !c.is_encoder && c.supports(decoder_mime)) {
            return Err(CodecError::NotFound(decoder_mime.to_string()));
        }
        if !self.codecs.iter().any(|c| c.is_encoder && c.name == encoder_name) {
            return Err(CodecError::NotFound(encoder_name.to_string()));
        }

        let link: Link = Arc::new(Mutex::new(SurfaceLink::default()));
        Ok(CodecSession {
            decoder: Box::new(LoopbackDecoder::new(Arc::clone(&link))),
            encoder: Box::new(LoopbackEncoder::new(Arc::clone(&link), input)),
            renderer: Box::new(LoopbackRenderer::new(link)),
        })
    }
}

struct LoopbackDecoder {
    link: Link,
    state: Lifecycle,
    format: TrackFormat,
    format_reported: bool,
    inputs: InputSlots,
    pending: VecDeque<(Vec<u8>, BufferInfo)>,
    outputs: OutputSlots,
}

impl LoopbackDecoder {
    fn new(link: Link) -> Self {
        Self {
            link,
            state: Lifecycle::Created,
            format: TrackFormat::default(),
            format_reported: false,
            inputs: InputSlots::new(INPUT_SLOTS),
            pending: VecDeque::new(),
            outputs: OutputSlots::default(),
        }
    }
}

impl VideoDecoder for LoopbackDecoder {
    fn configure(&mut self, format: &TrackFormat) -> CodecResult<()> {
        if self.state != Lifecycle::Created {
            return Err(CodecError::Configure(format!("decoder is {:?}", self.state)));
        }
        if let Some(CodecConfig::Avc { sps, pps }) = &format.config {
            let record = AvcConfigRecord::from_parameter_sets(sps.clone(), pps.clone());
            self.link.lock().codec_config = Some(record.to_annexb());
        }
        self.format = format.clone();
        self.state = Lifecycle::Configured;
        Ok(())
    }

    fn start(&mut self) -> CodecResult<()> {
        if self.state != Lifecycle::Configured {
            return Err(CodecError::Configure("decoder started before configure".into()));
        }
        self.state = Lifecycle::Started;
        Ok(())
    }

    fn dequeue_input_buffer(&mut self, _timeout: Duration) -> CodecResult<Option<usize>> {
        self.state.ensure_started()?;
        Ok(self.inputs.dequeue())
    }

    fn input_buffer(&mut self, index: usize) -> CodecResult<&mut Vec<u8>> {
        self.state.ensure_started()?;
        self.inputs.get_mut(index)
    }

    fn queue_input_buffer(&mut self, index: usize, info: BufferInfo) -> CodecResult<()> {
        self.state.ensure_started()?;
        let data = self.inputs.queue(index, &info)?;
        let out = BufferInfo::new(0, data.len(), info.presentation_time_us, info.flags);
        self.pending.push_back((data, out));
        Ok(())
    }

    fn dequeue_output_buffer(&mut self, _timeout: Duration) -> CodecResult<OutputStatus> {
        self.state.ensure_started()?;
        if self.pending.is_empty() {
            return Ok(OutputStatus::TryAgainLater);
        }
        if !self.format_reported {
            self.format_reported = true;
            let format = TrackFormat::video(
                self.format.mime.clone(),
                self.format.width,
                self.format.height,
            );
            return Ok(OutputStatus::FormatChanged(format));
        }
        let Some((data, info)) = self.pending.pop_front() else {
            return Ok(OutputStatus::TryAgainLater);
        };
        let index = self.outputs.put(data);
        Ok(OutputStatus::Buffer { index, info })
    }

    fn release_output_buffer(&mut self, index: usize, render: bool) -> CodecResult<()> {
        self.state.ensure_started()?;
        let data = self.outputs.take(index)?;
        if render && !data.is_empty() {
            // The frame's time is set by the renderer; this one is informational.
            self.link.lock().rendered = Some(Frame { data, pts_us: 0 });
        }
        Ok(())
    }

    fn stop(&mut self) {
        if self.state == Lifecycle::Started {
            self.state = Lifecycle::Stopped;
        }
    }

    fn release(&mut self) {
        self.state = Lifecycle::Released;
        self.pending.clear();
    }
}

struct LoopbackEncoder {
    link: Link,
    state: Lifecycle,
    input: EncoderInput,
    config: Option<EncoderConfig>,
    inputs: InputSlots,
    outputs: OutputSlots,
    config_sent: bool,
    format_sent: bool,
    eos_sent: bool,
}

impl LoopbackEncoder {
    fn new(link: Link, input: EncoderInput) -> Self {
        Self {
            link,
            state: Lifecycle::Created,
            input,
            config: None,
            inputs: InputSlots::new(INPUT_SLOTS),
            outputs: OutputSlots::default(),
            config_sent: false,
            format_sent: false,
            eos_sent: false,
        }
    }

    fn output_format(&self) -> TrackFormat {
        match &self.config {
            Some(c) => TrackFormat::video(c.mime.clone(), c.width, c.height),
            None => TrackFormat::video(MIME_AVC, 0, 0),
        }
    }

    fn encode(&mut self, frame: Frame) -> OutputStatus {
        let data = length_prefixed_to_annexb(&frame.data, NAL_LENGTH_SIZE).unwrap_or(frame.data);
        let sync = split_annexb(&data).iter().any(|nal| {
            strip_start_code(nal)
                .first()
                .is_some_and(|&h| nal_unit_type(h) == NAL_TYPE_IDR)
        });
        let flags = if sync { BufferFlags::SYNC } else { BufferFlags::empty() };
        let info = BufferInfo::new(0, data.len(), frame.pts_us, flags);
        let index = self.outputs.put(data);
        OutputStatus::Buffer { index, info }
    }
}

impl VideoEncoder for LoopbackEncoder {
    fn configure(&mut self, config: &EncoderConfig) -> CodecResult<()> {
        if config.width == 0 || config.height == 0 {
            return Err(CodecError::Configure(format!(
                "invalid size {}x{}",
                config.width, config.height
            )));
        }
        if (self.input == EncoderInput::Surface) != (config.color_format == ColorFormat::Surface) {
            return Err(CodecError::Configure(format!(
                "color format {} does not match {:?} input",
                config.color_format, self.input
            )));
        }
        self.config = Some(config.clone());
        self.state = Lifecycle::Configured;
        Ok(())
    }

    fn start(&mut self) -> CodecResult<()> {
        if self.state != Lifecycle::Configured {
            return Err(CodecError::Configure("encoder started before configure".into()));
        }
        self.state = Lifecycle::Started;
        Ok(())
    }

    fn signal_end_of_input_stream(&mut self) -> CodecResult<()> {
        self.state.ensure_started()?;
        if self.input != EncoderInput::Surface {
            return Err(CodecError::Configure("encoder has no input surface".into()));
        }
        self.link.lock().input_ended = true;
        Ok(())
    }

    fn dequeue_input_buffer(&mut self, _timeout: Duration) -> CodecResult<Option<usize>> {
        self.state.ensure_started()?;
        if self.input == EncoderInput::Surface {
            return Err(CodecError::Configure("surface input encoder has no input buffers".into()));
        }
        Ok(self.inputs.dequeue())
    }

    fn input_buffer(&mut self, index: usize) -> CodecResult<&mut Vec<u8>> {
        self.state.ensure_started()?;
        self.inputs.get_mut(index)
    }

    fn queue_input_buffer(&mut self, index: usize, info: BufferInfo) -> CodecResult<()> {
        self.state.ensure_started()?;
        let data = self.inputs.queue(index, &info)?;
        let mut link = self.link.lock();
        if !data.is_empty() {
            link.encoder_input.push_back(Frame {
                data,
                pts_us: info.presentation_time_us,
            });
        }
        if info.is_end_of_stream() {
            link.input_ended = true;
        }
        Ok(())
    }

    fn dequeue_output_buffer(&mut self, _timeout: Duration) -> CodecResult<OutputStatus> {
        self.state.ensure_started()?;

        if !self.config_sent {
            self.config_sent = true;
            let csd = self.link.lock().codec_config.clone();
            if let Some(csd) = csd {
                let info = BufferInfo::new(0, csd.len(), 0, BufferFlags::CODEC_CONFIG);
                let index = self.outputs.put(csd);
                return Ok(OutputStatus::Buffer { index, info });
            }
        }
        if !self.format_sent {
            self.format_sent = true;
            return Ok(OutputStatus::FormatChanged(self.output_format()));
        }

        let (frame, ended) = {
            let mut link = self.link.lock();
            (link.encoder_input.pop_front(), link.input_ended)
        };
        if let Some(frame) = frame {
            trace!(pts_us = frame.pts_us, "Loopback encoded frame");
            return Ok(self.encode(frame));
        }
        if ended && !self.eos_sent {
            self.eos_sent = true;
            let index = self.outputs.put(Vec::new());
            let info = BufferInfo::end_of_stream(0);
            return Ok(OutputStatus::Buffer { index, info });
        }
        Ok(OutputStatus::TryAgainLater)
    }

    fn output_buffer(&self, index: usize) -> CodecResult<&[u8]> {
        self.outputs.get(index)
    }

    fn release_output_buffer(&mut self, index: usize) -> CodecResult<()> {
        self.outputs.take(index).map(drop)
    }

    fn stop(&mut self) {
        if self.state == Lifecycle::Started {
            self.state = Lifecycle::Stopped;
        }
    }

    fn release(&mut self) {
        self.state = Lifecycle::Released;
    }
}

struct LoopbackRenderer {
    link: Link,
    current: Option<Frame>,
    drawn: bool,
    released: bool,
}

impl LoopbackRenderer {
    fn new(link: Link) -> Self {
        Self {
            link,
            current: None,
            drawn: false,
            released: false,
        }
    }

    fn take_drawn(&mut self) -> CodecResult<Frame> {
        if self.released {
            return Err(CodecError::Released);
        }
        if !self.drawn {
            return Err(CodecError::Render("no frame drawn".into()));
        }
        self.drawn = false;
        self.current
            .take()
            .ok_or_else(|| CodecError::Render("no frame drawn".into()))
    }
}

impl FrameRenderer for LoopbackRenderer {
    fn await_new_image(&mut self, timeout: Duration) -> CodecResult<()> {
        if self.released {
            return Err(CodecError::Released);
        }
        match self.link.lock().rendered.take() {
            Some(frame) => {
                self.current = Some(frame);
                self.drawn = false;
                Ok(())
            }
            None => Err(CodecError::Render(format!("no new image within {timeout:?}"))),
        }
    }

    fn draw_image(&mut self, _rotation: Rotation) -> CodecResult<()> {
        if self.current.is_none() {
            return Err(CodecError::Render("nothing to draw".into()));
        }
        self.drawn = true;
        Ok(())
    }

    fn set_presentation_time(&mut self, time_ns: i64) {
        if let Some(frame) = self.current.as_mut() {
            frame.pts_us = time_ns / 1000;
        }
    }

    fn swap_buffers(&mut self) -> CodecResult<()> {
        let frame = self.take_drawn()?;
        self.link.lock().encoder_input.push_back(frame);
        Ok(())
    }

    fn read_pixels(
        &mut self,
        dst: &mut Vec<u8>,
        _layout: &BufferLayout,
        _color_format: ColorFormat,
        _swap_uv: bool,
    ) -> CodecResult<usize> {
        let frame = self.take_drawn()?;
        dst.clear();
        dst.extend_from_slice(&frame.data);
        Ok(frame.data.len())
    }

    fn release(&mut self) {
        self.released = true;
        self.current = None;
    }
}
