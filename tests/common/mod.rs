//! Shared test harness for integration tests.
//!
//! Provides a synthetic MP4 source, a codec backend wrapper that counts
//! sessions and injects encoder faults, and a listener that records the
//! callbacks it receives.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use vidconvert::codec::{
    CodecBackend, CodecError, CodecInfo, CodecResult, CodecSession, EncoderConfig, EncoderInput,
    FrameRenderer, LoopbackBackend, OutputStatus, VideoEncoder,
};
use vidconvert::conversion::{ConversionExecutor, ConversionQueue, ConversionRequest};
use vidconvert::pipeline::{ConversionError, PipelineOptions, TranscodePipeline};
use vidconvert::quirks::{BufferLayout, ColorFormat, PlatformInfo};
use vidconvert::state::{ConversionListener, CrashGuardStore, MemoryCrashGuard};
use vidconvert_common::Rotation;
use vidconvert_media::mux::ContainerWriter;
use vidconvert_media::{
    BufferFlags, BufferInfo, CodecConfig, Demuxer, Mp4Demuxer, Mp4Writer, TrackFormat, MIME_AAC,
    MIME_AVC,
};

pub const FRAME_US: i64 = 40_000;
pub const FRAMES_PER_KEY: i64 = 25;
pub const AAC_SAMPLE_RATE: i64 = 44_100;
pub const AAC_FRAME_SAMPLES: i64 = 1024;

pub const SPS: &[u8] = &[0x67, 0x42, 0xc0, 0x1e, 0xda, 0x02, 0x80, 0xbf];
pub const PPS: &[u8] = &[0x68, 0xce, 0x3c, 0x80];
const ESDS: &[u8] = &[
    0x00, 0x00, 0x00, 0x00, 0x03, 0x19, 0x00, 0x01, 0x00, 0x04, 0x11, 0x40, 0x15, 0x00, 0x00,
    0x00, 0x00, 0x01, 0xf4, 0x00, 0x00, 0x01, 0xf4, 0x00, 0x05, 0x02, 0x12, 0x10, 0x06, 0x01,
    0x02,
];

/// Shape of a generated source file.
#[derive(Debug, Clone)]
pub struct SourceShape {
    pub width: u32,
    pub height: u32,
    pub rotation: Rotation,
    pub duration_us: i64,
    pub with_audio: bool,
    /// Store the PPS in the source avcC. Without it the loopback encoder
    /// emits a codec-config buffer holding a single start code.
    pub with_pps: bool,
}

impl Default for SourceShape {
    fn default() -> Self {
        Self {
            width: 320,
            height: 240,
            rotation: Rotation::None,
            duration_us: 10_000_000,
            with_audio: true,
            with_pps: true,
        }
    }
}

/// One video sample: 4-byte length prefix, NAL header, then a readable tag.
pub fn video_sample(pts_us: i64, key: bool) -> Vec<u8> {
    let mut nal = vec![if key { 0x65 } else { 0x41 }];
    nal.extend_from_slice(format!("pts={pts_us};").as_bytes());
    let mut out = (nal.len() as u32).to_be_bytes().to_vec();
    out.extend_from_slice(&nal);
    out
}

pub fn audio_pts(index: i64) -> i64 {
    index * AAC_FRAME_SAMPLES * 1_000_000 / AAC_SAMPLE_RATE
}

/// Write a synthetic AVC (+ AAC) MP4 to `path`.
pub fn write_source(path: &Path, shape: &SourceShape) {
    let mut writer = Mp4Writer::create(path).unwrap();

    let video = TrackFormat::video(MIME_AVC, shape.width, shape.height)
        .with_rotation(shape.rotation)
        .with_config(CodecConfig::Avc {
            sps: vec![SPS.to_vec()],
            pps: if shape.with_pps { vec![PPS.to_vec()] } else { Vec::new() },
        });
    let video_track = writer.add_track(&video).unwrap();
    let audio_track = shape.with_audio.then(|| {
        let audio =
            TrackFormat::audio(MIME_AAC, AAC_SAMPLE_RATE as u32, 2).with_config(CodecConfig::Esds(ESDS.to_vec()));
        writer.add_track(&audio).unwrap()
    });

    let frames = shape.duration_us / FRAME_US;
    for i in 0..frames {
        let pts = i * FRAME_US;
        let key = i % FRAMES_PER_KEY == 0;
        let data = video_sample(pts, key);
        let flags = if key { BufferFlags::SYNC } else { BufferFlags::empty() };
        writer
            .write_sample_data(video_track, &data, &BufferInfo::new(0, data.len(), pts, flags))
            .unwrap();
    }

    if let Some(track) = audio_track {
        let mut i = 0;
        while audio_pts(i) < shape.duration_us {
            let pts = audio_pts(i);
            let data = format!("aac={pts};").into_bytes();
            writer
                .write_sample_data(track, &data, &BufferInfo::new(0, data.len(), pts, BufferFlags::SYNC))
                .unwrap();
            i += 1;
        }
    }

    writer.finish_movie().unwrap();
}

/// Source file with the default shape inside `dir`.
pub fn default_source(dir: &Path) -> PathBuf {
    let path = dir.join("source.mp4");
    write_source(&path, &SourceShape::default());
    path
}

/// A sample read back from an output file.
#[derive(Debug, Clone)]
pub struct ReadSample {
    pub pts_us: i64,
    pub data: Vec<u8>,
    pub sync: bool,
}

impl ReadSample {
    /// The timestamp embedded in the payload by [`write_source`].
    pub fn tagged_pts(&self) -> i64 {
        let text = String::from_utf8_lossy(&self.data);
        let start = text.find('=').expect("tagged sample") + 1;
        let end = text[start..].find(';').expect("tagged sample") + start;
        text[start..end].parse().expect("numeric tag")
    }

    /// NAL header byte of a video sample.
    pub fn nal_header(&self) -> u8 {
        self.data[4]
    }
}

/// All samples of the first track whose MIME starts with `prefix`.
pub fn read_track(path: &Path, prefix: &str) -> Vec<ReadSample> {
    let mut demuxer = Mp4Demuxer::open(path).unwrap();
    let Some(track) = demuxer.find_track(prefix) else {
        return Vec::new();
    };
    demuxer.select_track(track).unwrap();

    let mut out = Vec::new();
    let mut buf = Vec::new();
    while let Some(size) = demuxer.read_sample_data(&mut buf).unwrap() {
        out.push(ReadSample {
            pts_us: demuxer.sample_time().unwrap_or(0),
            data: buf[..size].to_vec(),
            sync: demuxer.sample_flags().contains(BufferFlags::SYNC),
        });
        if !demuxer.advance() {
            break;
        }
    }
    out
}

pub fn track_format(path: &Path, prefix: &str) -> Option<TrackFormat> {
    let demuxer = Mp4Demuxer::open(path).unwrap();
    let track = demuxer.find_track(prefix)?;
    Some(demuxer.track_format(track).unwrap())
}

/// Options that flush after every sample so progress is observable.
pub fn eager_options() -> PipelineOptions {
    PipelineOptions {
        flush_threshold: 1,
        ..PipelineOptions::default()
    }
}

pub fn pipeline(backend: Arc<dyn CodecBackend>, platform: PlatformInfo, options: PipelineOptions) -> TranscodePipeline {
    TranscodePipeline::new(backend, platform, options)
}

pub fn queue_with(
    backend: Arc<dyn CodecBackend>,
    guard: Arc<dyn CrashGuardStore>,
    options: PipelineOptions,
) -> ConversionQueue {
    let pipeline = TranscodePipeline::new(backend, PlatformInfo::default(), options);
    ConversionQueue::new(ConversionExecutor::new(pipeline, guard))
}

pub fn default_queue() -> ConversionQueue {
    queue_with(
        Arc::new(LoopbackBackend::new()),
        Arc::new(MemoryCrashGuard::default()),
        eager_options(),
    )
}

pub fn request(source: &Path, output: &Path) -> ConversionRequest {
    ConversionRequest::new(source, output)
        .with_source_geometry(320, 240, Rotation::None)
        .with_output_size(320, 240)
}

/// What [`RecordingListener`] saw, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Seen {
    Started(String),
    Completed(String, u64),
    Failed(String, &'static str),
}

/// Records every callback; can cancel the queue when a request starts.
#[derive(Default)]
pub struct RecordingListener {
    pub seen: Mutex<Vec<Seen>>,
    cancel_on_start: Mutex<Option<(ConversionQueue, String)>>,
}

impl RecordingListener {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Cancel the active conversion once the request tagged `tag` starts.
    pub fn cancel_when_started(&self, queue: &ConversionQueue, tag: &str) {
        *self.cancel_on_start.lock() = Some((queue.clone(), tag.to_string()));
    }

    pub fn events(&self) -> Vec<Seen> {
        self.seen.lock().clone()
    }
}

fn tag(request: &ConversionRequest) -> String {
    request.correlation_id.clone().unwrap_or_default()
}

impl ConversionListener for RecordingListener {
    fn on_started(&self, request: &ConversionRequest, _output: &Path) {
        self.seen.lock().push(Seen::Started(tag(request)));
        if let Some((queue, wanted)) = self.cancel_on_start.lock().as_ref() {
            if *wanted == tag(request) {
                queue.cancel_active();
            }
        }
    }

    fn on_completed(&self, request: &ConversionRequest, _output: &Path, output_len: u64) {
        self.seen.lock().push(Seen::Completed(tag(request), output_len));
    }

    fn on_failed(&self, request: &ConversionRequest, _output: &Path, error: &ConversionError) {
        self.seen.lock().push(Seen::Failed(tag(request), error.kind()));
    }
}

/// Loopback codecs behind a session counter, with an optional encoder
/// fault after a number of output polls and an optional lost image.
pub struct ScriptedBackend {
    inner: LoopbackBackend,
    pub sessions: AtomicUsize,
    fail_encoder_after: Option<usize>,
    fail_render_at: Option<usize>,
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self {
            inner: LoopbackBackend::new(),
            sessions: AtomicUsize::new(0),
            fail_encoder_after: None,
            fail_render_at: None,
        }
    }

    pub fn with_codecs(codecs: Vec<CodecInfo>) -> Self {
        Self {
            inner: LoopbackBackend::with_codecs(codecs),
            ..Self::new()
        }
    }

    /// Make the encoder report a bogus status on poll number `polls + 1`.
    pub fn failing_encoder_after(mut self, polls: usize) -> Self {
        self.fail_encoder_after = Some(polls);
        self
    }

    /// Make wait number `wait` (1-based) on the renderer report a lost image.
    pub fn failing_render_at(mut self, wait: usize) -> Self {
        self.fail_render_at = Some(wait);
        self
    }

    pub fn session_count(&self) -> usize {
        self.sessions.load(Ordering::SeqCst)
    }
}

impl CodecBackend for ScriptedBackend {
    fn codec_infos(&self) -> Vec<CodecInfo> {
        self.inner.codec_infos()
    }

    fn open_session(&self, decoder_mime: &str, encoder_name: &str, input: EncoderInput) -> CodecResult<CodecSession> {
        self.sessions.fetch_add(1, Ordering::SeqCst);
        let mut session = self.inner.open_session(decoder_mime, encoder_name, input)?;
        if let Some(after) = self.fail_encoder_after {
            session.encoder = Box::new(FaultyEncoder {
                inner: session.encoder,
                polls: 0,
                fail_after: after,
            });
        }
        if let Some(fail_at) = self.fail_render_at {
            session.renderer = Box::new(FlakyRenderer {
                inner: session.renderer,
                waits: 0,
                fail_at,
            });
        }
        Ok(session)
    }
}

/// Loses one decoded image: the wait consumes it, then reports failure.
struct FlakyRenderer {
    inner: Box<dyn FrameRenderer>,
    waits: usize,
    fail_at: usize,
}

impl FrameRenderer for FlakyRenderer {
    fn await_new_image(&mut self, timeout: Duration) -> CodecResult<()> {
        self.waits += 1;
        let result = self.inner.await_new_image(timeout);
        if self.waits == self.fail_at {
            return Err(CodecError::Render("image lost in transfer".into()));
        }
        result
    }

    fn draw_image(&mut self, rotation: Rotation) -> CodecResult<()> {
        self.inner.draw_image(rotation)
    }

    fn set_presentation_time(&mut self, time_ns: i64) {
        self.inner.set_presentation_time(time_ns)
    }

    fn swap_buffers(&mut self) -> CodecResult<()> {
        self.inner.swap_buffers()
    }

    fn read_pixels(
        &mut self,
        dst: &mut Vec<u8>,
        layout: &BufferLayout,
        color_format: ColorFormat,
        swap_uv: bool,
    ) -> CodecResult<usize> {
        self.inner.read_pixels(dst, layout, color_format, swap_uv)
    }

    fn release(&mut self) {
        self.inner.release()
    }
}

struct FaultyEncoder {
    inner: Box<dyn VideoEncoder>,
    polls: usize,
    fail_after: usize,
}

impl VideoEncoder for FaultyEncoder {
    fn configure(&mut self, config: &EncoderConfig) -> CodecResult<()> {
        self.inner.configure(config)
    }

    fn start(&mut self) -> CodecResult<()> {
        self.inner.start()
    }

    fn signal_end_of_input_stream(&mut self) -> CodecResult<()> {
        self.inner.signal_end_of_input_stream()
    }

    fn dequeue_input_buffer(&mut self, timeout: Duration) -> CodecResult<Option<usize>> {
        self.inner.dequeue_input_buffer(timeout)
    }

    fn input_buffer(&mut self, index: usize) -> CodecResult<&mut Vec<u8>> {
        self.inner.input_buffer(index)
    }

    fn queue_input_buffer(&mut self, index: usize, info: BufferInfo) -> CodecResult<()> {
        self.inner.queue_input_buffer(index, info)
    }

    fn dequeue_output_buffer(&mut self, timeout: Duration) -> CodecResult<OutputStatus> {
        self.polls += 1;
        if self.polls > self.fail_after {
            return Err(CodecError::Status(-1000));
        }
        self.inner.dequeue_output_buffer(timeout)
    }

    fn output_buffer(&self, index: usize) -> CodecResult<&[u8]> {
        self.inner.output_buffer(index)
    }

    fn release_output_buffer(&mut self, index: usize) -> CodecResult<()> {
        self.inner.release_output_buffer(index)
    }

    fn stop(&mut self) {
        self.inner.stop()
    }

    fn release(&mut self) {
        self.inner.release()
    }
}
