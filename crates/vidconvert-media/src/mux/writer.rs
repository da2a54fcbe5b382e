//! Progressive MP4 writer.

use super::moov::{MoovBuilder, WrittenSample, WrittenTrack};
use super::ContainerWriter;
use crate::codec_config::{annexb_to_length_prefixed, START_CODE};
use crate::format::{MIME_AVC, MIME_HEVC};
use crate::{BufferInfo, Error, Result, TrackFormat};
use bytes::{BufMut, BytesMut};
use std::fs::File;
use std::io::{Seek, SeekFrom, Write};
use std::path::Path;
use tracing::debug;

/// Buffered sample bytes are pushed to the file once they reach this size.
pub const DEFAULT_FLUSH_THRESHOLD: usize = 32 * 1024;

/// Size of the 64-bit `mdat` header written up front.
const MDAT_HEADER_LEN: u64 = 16;

/// Writes samples into a single `mdat` and appends `moov` on finish.
pub struct Mp4Writer<W: Write + Seek = File> {
    out: W,
    tracks: Vec<WrittenTrack>,
    pending: BytesMut,
    flush_threshold: usize,
    mdat_start: u64,
    /// File position of the first byte in `pending`.
    flushed_end: u64,
    finished: Option<u64>,
}

impl Mp4Writer<File> {
    /// Create (or truncate) `path` and write the file header.
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::new(File::create(path)?)
    }
}

impl<W: Write + Seek> Mp4Writer<W> {
    pub fn new(out: W) -> Result<Self> {
        Self::with_flush_threshold(out, DEFAULT_FLUSH_THRESHOLD)
    }

    pub fn with_flush_threshold(mut out: W, flush_threshold: usize) -> Result<Self> {
        let mut header = BytesMut::with_capacity(48);
        header.put_u32(32);
        header.put_slice(b"ftyp");
        header.put_slice(b"isom");
        header.put_u32(0x200);
        for brand in [b"isom", b"iso2", b"avc1", b"mp41"] {
            header.put_slice(brand);
        }
        let mdat_start = header.len() as u64;
        header.put_u32(1); // 64-bit size follows
        header.put_slice(b"mdat");
        header.put_u64(MDAT_HEADER_LEN);
        out.write_all(&header)?;

        Ok(Self {
            out,
            tracks: Vec::new(),
            pending: BytesMut::with_capacity(flush_threshold.max(1024)),
            flush_threshold,
            mdat_start,
            flushed_end: mdat_start + MDAT_HEADER_LEN,
            finished: None,
        })
    }

    /// Tracks declared so far, with the samples written to each.
    pub fn tracks(&self) -> &[WrittenTrack] {
        &self.tracks
    }

    fn ensure_open(&self) -> Result<()> {
        if self.finished.is_some() {
            return Err(Error::writer_state("container already finished"));
        }
        Ok(())
    }

    fn track_mut(&mut self, index: usize) -> Result<&mut WrittenTrack> {
        let count = self.tracks.len();
        self.tracks
            .get_mut(index)
            .ok_or(Error::InvalidTrack { index, count })
    }

    fn flush_pending(&mut self) -> Result<()> {
        if self.pending.is_empty() {
            return Ok(());
        }
        self.out.write_all(&self.pending)?;
        self.flushed_end += self.pending.len() as u64;
        self.pending.clear();
        Ok(())
    }
}

impl<W: Write + Seek + Send> ContainerWriter for Mp4Writer<W> {
    fn add_track(&mut self, format: &TrackFormat) -> Result<usize> {
        self.ensure_open()?;
        if format.kind().is_none() {
            return Err(Error::unsupported(format!("track mime {}", format.mime)));
        }
        self.tracks.push(WrittenTrack::new(format.clone()));
        let index = self.tracks.len() - 1;
        debug!(index, mime = %format.mime, "Added output track");
        Ok(index)
    }

    fn update_track_format(&mut self, index: usize, format: &TrackFormat) -> Result<()> {
        self.ensure_open()?;
        let track = self.track_mut(index)?;
        if !track.samples.is_empty() {
            return Err(Error::writer_state(format!(
                "track {index} format changed after samples were written"
            )));
        }
        track.format = format.clone();
        Ok(())
    }

    fn write_sample_data(&mut self, index: usize, data: &[u8], info: &BufferInfo) -> Result<bool> {
        self.ensure_open()?;
        let payload = info.payload(data).ok_or(Error::BufferUnderflow {
            need: info.offset.saturating_add(info.size),
            have: data.len(),
        })?;

        let is_nal_video = {
            let track = self.track_mut(index)?;
            track.format.mime == MIME_AVC || track.format.mime == MIME_HEVC
        };
        if payload.is_empty() || info.is_codec_config() {
            return Ok(false);
        }

        // Only the 4-byte form is recognized: a length prefix of 256..511
        // looks like a 3-byte start code, while a 4-byte length of 1 is
        // never a real NAL unit.
        let converted;
        let bytes = if is_nal_video && payload.starts_with(&START_CODE) {
            converted = annexb_to_length_prefixed(payload);
            &converted[..]
        } else {
            payload
        };

        let offset = self.flushed_end + self.pending.len() as u64;
        self.pending.put_slice(bytes);
        let sample = WrittenSample {
            offset,
            size: bytes.len() as u32,
            pts_us: info.presentation_time_us,
            sync: info.is_sync(),
        };
        self.track_mut(index)?.samples.push(sample);

        if self.pending.len() >= self.flush_threshold {
            self.flush_pending()?;
            return Ok(true);
        }
        Ok(false)
    }

    fn finish_movie(&mut self) -> Result<u64> {
        if let Some(len) = self.finished {
            return Ok(len);
        }
        self.flush_pending()?;

        let mdat_size = self.flushed_end - self.mdat_start;
        self.out.seek(SeekFrom::Start(self.mdat_start + 8))?;
        self.out.write_all(&mdat_size.to_be_bytes())?;
        self.out.seek(SeekFrom::Start(self.flushed_end))?;

        let moov = MoovBuilder::new(&self.tracks).build();
        self.out.write_all(&moov)?;
        self.out.flush()?;

        let len = self.flushed_end + moov.len() as u64;
        debug!(
            tracks = self.tracks.len(),
            mdat_bytes = mdat_size,
            total_bytes = len,
            "Finished MP4"
        );
        self.finished = Some(len);
        Ok(len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::{CodecConfig, MIME_AAC};
    use crate::mp4::Mp4File;
    use crate::BufferFlags;
    use assert_matches::assert_matches;
    use std::io::Cursor;

    fn avc_format() -> TrackFormat {
        TrackFormat::video(MIME_AVC, 320, 240).with_config(CodecConfig::Avc {
            sps: vec![vec![0x67, 0x42, 0xc0, 0x1e]],
            pps: vec![vec![0x68, 0xce]],
        })
    }

    #[test]
    fn test_empty_container_reads_back() {
        let mut writer = Mp4Writer::new(Cursor::new(Vec::new())).unwrap();
        writer.add_track(&avc_format()).unwrap();
        let len = writer.finish_movie().unwrap();

        let bytes = writer.out.into_inner();
        assert_eq!(bytes.len() as u64, len);
        let parsed = Mp4File::parse(&mut Cursor::new(bytes)).unwrap();
        let video = parsed.video_track.unwrap();
        assert!(video.sample_table.is_empty());
        assert_eq!(video.width, Some(320));
    }

    #[test]
    fn test_no_tracks_still_valid() {
        let mut writer = Mp4Writer::new(Cursor::new(Vec::new())).unwrap();
        writer.finish_movie().unwrap();
        let parsed = Mp4File::parse(&mut Cursor::new(writer.out.into_inner())).unwrap();
        assert!(parsed.video_track.is_none());
        assert!(parsed.audio_track.is_none());
    }

    #[test]
    fn test_finish_is_idempotent() {
        let mut writer = Mp4Writer::new(Cursor::new(Vec::new())).unwrap();
        let first = writer.finish_movie().unwrap();
        let second = writer.finish_movie().unwrap();
        assert_eq!(first, second);
        assert_matches!(
            writer.add_track(&avc_format()),
            Err(Error::WriterState(_))
        );
    }

    #[test]
    fn test_flush_reported_at_threshold() {
        let mut writer = Mp4Writer::with_flush_threshold(Cursor::new(Vec::new()), 100).unwrap();
        let track = writer.add_track(&TrackFormat::audio(MIME_AAC, 44_100, 2)).unwrap();
        let data = [0xaa; 60];
        let info = BufferInfo::new(0, 60, 0, BufferFlags::SYNC);
        assert!(!writer.write_sample_data(track, &data, &info).unwrap());
        assert!(writer.write_sample_data(track, &data, &info).unwrap());
        assert!(!writer.write_sample_data(track, &data, &info).unwrap());
    }

    #[test]
    fn test_annexb_samples_stored_length_prefixed() {
        let mut writer = Mp4Writer::new(Cursor::new(Vec::new())).unwrap();
        let track = writer.add_track(&avc_format()).unwrap();
        let data = [0, 0, 0, 1, 0x65, 0x11, 0x22];
        let info = BufferInfo::new(0, data.len(), 0, BufferFlags::SYNC);
        writer.write_sample_data(track, &data, &info).unwrap();
        writer.finish_movie().unwrap();

        let bytes = writer.out.into_inner();
        let parsed = Mp4File::parse(&mut Cursor::new(bytes.clone())).unwrap();
        let sample = parsed.video_samples().unwrap().samples[0];
        let stored = &bytes[sample.offset as usize..(sample.offset + sample.size as u64) as usize];
        assert_eq!(stored, &[0, 0, 0, 3, 0x65, 0x11, 0x22]);
    }

    #[test]
    fn test_format_update_rejected_after_samples() {
        let mut writer = Mp4Writer::new(Cursor::new(Vec::new())).unwrap();
        let track = writer.add_track(&avc_format()).unwrap();
        writer.update_track_format(track, &avc_format()).unwrap();
        let info = BufferInfo::new(0, 2, 0, BufferFlags::SYNC);
        writer.write_sample_data(track, &[0x65, 0x00], &info).unwrap();
        assert_matches!(
            writer.update_track_format(track, &avc_format()),
            Err(Error::WriterState(_))
        );
    }

    #[test]
    fn test_file_round_trip_through_demuxer() {
        use crate::{Demuxer, Mp4Demuxer};
        use vidconvert_common::Rotation;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clip.mp4");

        let mut writer = Mp4Writer::create(&path).unwrap();
        let track = writer
            .add_track(&avc_format().with_rotation(Rotation::Deg90))
            .unwrap();
        let key = [0, 0, 0, 2, 0x65, 0x01];
        let delta = [0, 0, 0, 2, 0x41, 0x02];
        writer
            .write_sample_data(track, &key, &BufferInfo::new(0, 6, 0, BufferFlags::SYNC))
            .unwrap();
        writer
            .write_sample_data(track, &delta, &BufferInfo::new(0, 6, 40_000, BufferFlags::empty()))
            .unwrap();
        let len = writer.finish_movie().unwrap();
        assert_eq!(std::fs::metadata(&path).unwrap().len(), len);

        let mut demuxer = Mp4Demuxer::open(&path).unwrap();
        let index = demuxer.find_track("video/").unwrap();
        let format = demuxer.track_format(index).unwrap();
        assert_eq!(format.rotation, Rotation::Deg90);
        assert_eq!(format.config, avc_format().config);

        demuxer.select_track(index).unwrap();
        let mut buf = Vec::new();
        assert_eq!(demuxer.read_sample_data(&mut buf).unwrap(), Some(6));
        assert_eq!(&buf[..6], &key);
        assert!(demuxer.sample_flags().contains(BufferFlags::SYNC));
        assert!(demuxer.advance());
        assert_eq!(demuxer.sample_time(), Some(40_000));
        assert!(!demuxer.sample_flags().contains(BufferFlags::SYNC));
    }

    #[test]
    fn test_unknown_track_rejected() {
        let mut writer = Mp4Writer::new(Cursor::new(Vec::new())).unwrap();
        let info = BufferInfo::new(0, 1, 0, BufferFlags::empty());
        assert_matches!(
            writer.write_sample_data(3, &[1], &info),
            Err(Error::InvalidTrack { index: 3, count: 0 })
        );
    }
}
