//! `moov` serialization for progressive MP4 output.

use crate::codec_config::AvcConfigRecord;
use crate::format::{CodecConfig, TrackFormat, MIME_HEVC};
use crate::mp4::matrix_for_rotation;
use bytes::{BufMut, BytesMut};

/// Movie timescale (milliseconds).
const MOVIE_TIMESCALE: u32 = 1000;
/// Media timescale for video tracks.
pub const VIDEO_TIMESCALE: u32 = 90_000;

/// One sample as laid down in `mdat`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WrittenSample {
    pub offset: u64,
    pub size: u32,
    pub pts_us: i64,
    pub sync: bool,
}

/// A track's declared format plus everything written for it.
#[derive(Debug, Clone)]
pub struct WrittenTrack {
    pub format: TrackFormat,
    pub samples: Vec<WrittenSample>,
}

impl WrittenTrack {
    pub fn new(format: TrackFormat) -> Self {
        Self {
            format,
            samples: Vec::new(),
        }
    }

    fn timescale(&self) -> u32 {
        if self.format.is_audio() {
            if self.format.sample_rate > 0 {
                self.format.sample_rate
            } else {
                44_100
            }
        } else {
            VIDEO_TIMESCALE
        }
    }

    fn to_ticks(&self, us: i64) -> u64 {
        (us.max(0) as u128 * self.timescale() as u128 / 1_000_000) as u64
    }

    /// Per-sample durations in media ticks. Times are taken relative to the
    /// track's first sample; the last sample repeats the previous delta.
    fn durations(&self) -> Vec<u32> {
        let fallback = if self.format.is_audio() {
            1024
        } else {
            self.timescale() / 25
        };
        let first = self.samples.first().map_or(0, |s| s.pts_us);
        let ticks: Vec<u64> = self
            .samples
            .iter()
            .map(|s| self.to_ticks(s.pts_us - first))
            .collect();

        let mut out: Vec<u32> = ticks
            .windows(2)
            .map(|w| w[1].saturating_sub(w[0]).min(u32::MAX as u64) as u32)
            .collect();
        if !self.samples.is_empty() {
            out.push(out.last().copied().unwrap_or(fallback));
        }
        out
    }
}

/// Serializes `moov` for a set of written tracks.
pub struct MoovBuilder<'a> {
    tracks: &'a [WrittenTrack],
}

fn open_box(buf: &mut BytesMut, kind: &[u8; 4]) -> usize {
    let start = buf.len();
    buf.put_u32(0);
    buf.put_slice(kind);
    start
}

fn close_box(buf: &mut BytesMut, start: usize) {
    let size = (buf.len() - start) as u32;
    buf[start..start + 4].copy_from_slice(&size.to_be_bytes());
}

fn full_box(buf: &mut BytesMut, kind: &[u8; 4], version: u8, flags: u32) -> usize {
    let start = open_box(buf, kind);
    buf.put_u32(((version as u32) << 24) | (flags & 0x00ff_ffff));
    start
}

impl<'a> MoovBuilder<'a> {
    pub fn new(tracks: &'a [WrittenTrack]) -> Self {
        Self { tracks }
    }

    pub fn build(&self) -> BytesMut {
        let mut buf = BytesMut::with_capacity(1024 + self.sample_count() * 16);
        let moov = open_box(&mut buf, b"moov");

        let durations: Vec<Vec<u32>> = self.tracks.iter().map(WrittenTrack::durations).collect();
        let movie_duration = self
            .tracks
            .iter()
            .zip(&durations)
            .map(|(t, d)| Self::movie_ticks(t, d))
            .max()
            .unwrap_or(0);

        self.write_mvhd(&mut buf, movie_duration);
        for (i, (track, durations)) in self.tracks.iter().zip(&durations).enumerate() {
            self.write_trak(&mut buf, i as u32 + 1, track, durations);
        }

        close_box(&mut buf, moov);
        buf
    }

    fn sample_count(&self) -> usize {
        self.tracks.iter().map(|t| t.samples.len()).sum()
    }

    fn media_ticks(durations: &[u32]) -> u64 {
        durations.iter().map(|&d| d as u64).sum()
    }

    fn movie_ticks(track: &WrittenTrack, durations: &[u32]) -> u64 {
        Self::media_ticks(durations) * MOVIE_TIMESCALE as u64 / track.timescale() as u64
    }

    fn write_mvhd(&self, buf: &mut BytesMut, duration: u64) {
        let mvhd = full_box(buf, b"mvhd", 1, 0);
        buf.put_u64(0); // creation time
        buf.put_u64(0); // modification time
        buf.put_u32(MOVIE_TIMESCALE);
        buf.put_u64(duration);
        buf.put_u32(0x0001_0000); // rate 1.0
        buf.put_u16(0x0100); // volume 1.0
        buf.put_slice(&[0; 10]);
        for v in matrix_for_rotation(Default::default()) {
            buf.put_i32(v);
        }
        buf.put_slice(&[0; 24]); // pre_defined
        buf.put_u32(self.tracks.len() as u32 + 1); // next track ID
        close_box(buf, mvhd);
    }

    fn write_trak(&self, buf: &mut BytesMut, track_id: u32, track: &WrittenTrack, durations: &[u32]) {
        let trak = open_box(buf, b"trak");
        let is_video = !track.format.is_audio();

        let tkhd = full_box(buf, b"tkhd", 1, 0x7);
        buf.put_u64(0);
        buf.put_u64(0);
        buf.put_u32(track_id);
        buf.put_u32(0);
        buf.put_u64(Self::movie_ticks(track, durations));
        buf.put_u64(0);
        buf.put_u16(0); // layer
        buf.put_u16(if is_video { 0 } else { 1 }); // alternate group
        buf.put_u16(if is_video { 0 } else { 0x0100 });
        buf.put_u16(0);
        let rotation = if is_video {
            track.format.rotation
        } else {
            Default::default()
        };
        for v in matrix_for_rotation(rotation) {
            buf.put_i32(v);
        }
        if is_video {
            buf.put_u32(track.format.width << 16);
            buf.put_u32(track.format.height << 16);
        } else {
            buf.put_u64(0);
        }
        close_box(buf, tkhd);

        let mdia = open_box(buf, b"mdia");
        let mdhd = full_box(buf, b"mdhd", 1, 0);
        buf.put_u64(0);
        buf.put_u64(0);
        buf.put_u32(track.timescale());
        buf.put_u64(Self::media_ticks(durations));
        buf.put_u16(0x55c4); // und
        buf.put_u16(0);
        close_box(buf, mdhd);

        let (handler, name): (&[u8; 4], &[u8]) = if is_video {
            (b"vide", b"VideoHandle")
        } else {
            (b"soun", b"SoundHandle")
        };
        let hdlr = full_box(buf, b"hdlr", 0, 0);
        buf.put_u32(0);
        buf.put_slice(handler);
        buf.put_slice(&[0; 12]);
        buf.put_slice(name);
        buf.put_u8(0);
        close_box(buf, hdlr);

        let minf = open_box(buf, b"minf");
        if is_video {
            let vmhd = full_box(buf, b"vmhd", 0, 1);
            buf.put_slice(&[0; 8]);
            close_box(buf, vmhd);
        } else {
            let smhd = full_box(buf, b"smhd", 0, 0);
            buf.put_u32(0);
            close_box(buf, smhd);
        }

        let dinf = open_box(buf, b"dinf");
        let dref = full_box(buf, b"dref", 0, 0);
        buf.put_u32(1);
        let url = full_box(buf, b"url ", 0, 1);
        close_box(buf, url);
        close_box(buf, dref);
        close_box(buf, dinf);

        self.write_stbl(buf, track, durations);
        close_box(buf, minf);
        close_box(buf, mdia);
        close_box(buf, trak);
    }

    fn write_stbl(&self, buf: &mut BytesMut, track: &WrittenTrack, durations: &[u32]) {
        let stbl = open_box(buf, b"stbl");

        let stsd = full_box(buf, b"stsd", 0, 0);
        buf.put_u32(1);
        if track.format.is_audio() {
            Self::write_audio_entry(buf, &track.format);
        } else {
            Self::write_visual_entry(buf, &track.format);
        }
        close_box(buf, stsd);

        // stts, run-length encoded
        let mut runs: Vec<(u32, u32)> = Vec::new();
        for &d in durations {
            match runs.last_mut() {
                Some((count, delta)) if *delta == d => *count += 1,
                _ => runs.push((1, d)),
            }
        }
        let stts = full_box(buf, b"stts", 0, 0);
        buf.put_u32(runs.len() as u32);
        for (count, delta) in runs {
            buf.put_u32(count);
            buf.put_u32(delta);
        }
        close_box(buf, stts);

        if !track.format.is_audio() && track.samples.iter().any(|s| !s.sync) {
            let sync: Vec<u32> = track
                .samples
                .iter()
                .enumerate()
                .filter(|(_, s)| s.sync)
                .map(|(i, _)| i as u32 + 1)
                .collect();
            let stss = full_box(buf, b"stss", 0, 0);
            buf.put_u32(sync.len() as u32);
            for n in sync {
                buf.put_u32(n);
            }
            close_box(buf, stss);
        }

        // One sample per chunk.
        let stsc = full_box(buf, b"stsc", 0, 0);
        if track.samples.is_empty() {
            buf.put_u32(0);
        } else {
            buf.put_u32(1);
            buf.put_u32(1);
            buf.put_u32(1);
            buf.put_u32(1);
        }
        close_box(buf, stsc);

        let stsz = full_box(buf, b"stsz", 0, 0);
        buf.put_u32(0);
        buf.put_u32(track.samples.len() as u32);
        for s in &track.samples {
            buf.put_u32(s.size);
        }
        close_box(buf, stsz);

        let wide = track.samples.iter().any(|s| s.offset > u32::MAX as u64);
        let co = full_box(buf, if wide { b"co64" } else { b"stco" }, 0, 0);
        buf.put_u32(track.samples.len() as u32);
        for s in &track.samples {
            if wide {
                buf.put_u64(s.offset);
            } else {
                buf.put_u32(s.offset as u32);
            }
        }
        close_box(buf, co);

        close_box(buf, stbl);
    }

    fn write_visual_entry(buf: &mut BytesMut, format: &TrackFormat) {
        let kind = if format.mime == MIME_HEVC { b"hvc1" } else { b"avc1" };
        let entry = open_box(buf, kind);
        buf.put_slice(&[0; 6]);
        buf.put_u16(1); // data reference index
        buf.put_slice(&[0; 16]);
        buf.put_u16(format.width as u16);
        buf.put_u16(format.height as u16);
        buf.put_u32(0x0048_0000);
        buf.put_u32(0x0048_0000);
        buf.put_u32(0);
        buf.put_u16(1); // frame count
        buf.put_slice(&[0; 32]); // compressor name
        buf.put_u16(0x0018);
        buf.put_i16(-1);

        match &format.config {
            Some(CodecConfig::Avc { sps, pps }) => {
                let record = AvcConfigRecord::from_parameter_sets(sps.clone(), pps.clone());
                let avcc = open_box(buf, b"avcC");
                buf.put_slice(&record.to_bytes());
                close_box(buf, avcc);
            }
            Some(CodecConfig::Other { fourcc, data }) => {
                let child = open_box(buf, fourcc);
                buf.put_slice(data);
                close_box(buf, child);
            }
            Some(CodecConfig::Esds(_)) | None => {}
        }
        close_box(buf, entry);
    }

    fn write_audio_entry(buf: &mut BytesMut, format: &TrackFormat) {
        let entry = open_box(buf, b"mp4a");
        buf.put_slice(&[0; 6]);
        buf.put_u16(1);
        buf.put_u64(0);
        buf.put_u16(format.channels.max(1));
        buf.put_u16(16); // sample size
        buf.put_u32(0);
        buf.put_u32((format.sample_rate.min(0xffff)) << 16);

        match &format.config {
            Some(CodecConfig::Esds(data)) => {
                let esds = open_box(buf, b"esds");
                buf.put_slice(data);
                close_box(buf, esds);
            }
            Some(CodecConfig::Other { fourcc, data }) => {
                let child = open_box(buf, fourcc);
                buf.put_slice(data);
                close_box(buf, child);
            }
            Some(CodecConfig::Avc { .. }) | None => {}
        }
        close_box(buf, entry);
    }
}
