//! Sample-at-a-time extraction from a source container.

use crate::codec_config::AvcConfigRecord;
use crate::format::{CodecConfig, TrackFormat, MIME_AAC, MIME_AVC, MIME_HEVC};
use crate::mp4::{Mp4File, TrackInfo};
use crate::{BufferFlags, Error, Result};
use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::Path;
use tracing::{debug, warn};

/// Source of demultiplexed samples.
///
/// Mirrors a platform media extractor: tracks are selected up front, the
/// cursor walks the selected tracks in timestamp order, and each step
/// exposes the current sample's track, time, flags and bytes.
pub trait Demuxer: Send {
    fn track_count(&self) -> usize;

    fn track_format(&self, index: usize) -> Result<TrackFormat>;

    fn select_track(&mut self, index: usize) -> Result<()>;

    fn unselect_track(&mut self, index: usize) -> Result<()>;

    /// Move every selected track to its sync sample at or before `time_us`.
    fn seek_to_previous_sync(&mut self, time_us: i64);

    /// Track of the current sample, `None` once all selected tracks are drained.
    fn sample_track_index(&self) -> Option<usize>;

    /// Presentation time of the current sample in microseconds.
    fn sample_time(&self) -> Option<i64>;

    fn sample_flags(&self) -> BufferFlags;

    /// Replace the contents of `buf` with the current sample. Returns the
    /// sample size, or `None` at end of stream.
    fn read_sample_data(&mut self, buf: &mut Vec<u8>) -> Result<Option<usize>>;

    /// Step past the current sample. Returns false at end of stream.
    fn advance(&mut self) -> bool;

    /// First track whose format matches `kind_prefix` (`"video/"`, `"audio/"`).
    fn find_track(&self, kind_prefix: &str) -> Option<usize> {
        (0..self.track_count()).find(|&i| {
            self.track_format(i)
                .map(|f| f.mime.starts_with(kind_prefix))
                .unwrap_or(false)
        })
    }
}

struct TrackCursor {
    info: TrackInfo,
    selected: bool,
    next: u32,
}

impl TrackCursor {
    fn current(&self) -> Option<&crate::mp4::SampleEntry> {
        if self.selected {
            self.info.sample_table.get(self.next)
        } else {
            None
        }
    }
}

/// [`Demuxer`] over an MP4 file.
pub struct Mp4Demuxer<R = BufReader<File>> {
    reader: R,
    tracks: Vec<TrackCursor>,
}

impl Mp4Demuxer {
    /// Open and parse an MP4 file.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path.as_ref())?;
        Self::new(BufReader::new(file))
    }
}

impl<R: Read + Seek + Send> Mp4Demuxer<R> {
    pub fn new(mut reader: R) -> Result<Self> {
        let mp4 = Mp4File::parse(&mut reader)?;
        let mut infos: Vec<TrackInfo> = mp4.video_track.into_iter().chain(mp4.audio_track).collect();
        infos.sort_by_key(|t| t.track_id);
        debug!(tracks = infos.len(), "Opened MP4 source");

        Ok(Self {
            reader,
            tracks: infos
                .into_iter()
                .map(|info| TrackCursor {
                    info,
                    selected: false,
                    next: 0,
                })
                .collect(),
        })
    }

    fn cursor(&self, index: usize) -> Result<&TrackCursor> {
        self.tracks.get(index).ok_or(Error::InvalidTrack {
            index,
            count: self.tracks.len(),
        })
    }

    fn cursor_mut(&mut self, index: usize) -> Result<&mut TrackCursor> {
        let count = self.tracks.len();
        self.tracks
            .get_mut(index)
            .ok_or(Error::InvalidTrack { index, count })
    }

    /// Selected track whose pending sample decodes earliest.
    fn current(&self) -> Option<(usize, &TrackCursor)> {
        self.tracks
            .iter()
            .enumerate()
            .filter_map(|(i, t)| t.current().map(|s| (i, t, t.info.to_us(s.dts))))
            .min_by_key(|&(i, _, dts_us)| (dts_us, i))
            .map(|(i, t, _)| (i, t))
    }
}

fn format_for(info: &TrackInfo) -> TrackFormat {
    let entry = info.sample_entry.unwrap_or(*b"????");
    let mime = match &entry {
        b"avc1" | b"avc3" => MIME_AVC.to_string(),
        b"hvc1" | b"hev1" => MIME_HEVC.to_string(),
        b"mp4a" => MIME_AAC.to_string(),
        other => {
            let kind = if info.handler_type.is_audio() { "audio" } else { "video" };
            format!("{kind}/x-{}", String::from_utf8_lossy(other))
        }
    };

    let config = match (info.codec_box.as_ref(), info.codec_data.as_ref()) {
        (Some(b"avcC"), Some(data)) => match AvcConfigRecord::parse(data) {
            Ok(record) => Some(CodecConfig::Avc {
                sps: record.sps,
                pps: record.pps,
            }),
            Err(e) => {
                warn!(error = %e, "Unreadable avcC, keeping raw box");
                Some(CodecConfig::Other {
                    fourcc: *b"avcC",
                    data: data.clone(),
                })
            }
        },
        (Some(b"esds"), Some(data)) => Some(CodecConfig::Esds(data.clone())),
        (Some(kind), Some(data)) => Some(CodecConfig::Other {
            fourcc: *kind,
            data: data.clone(),
        }),
        _ => None,
    };

    TrackFormat {
        mime,
        width: info.width.unwrap_or(0),
        height: info.height.unwrap_or(0),
        rotation: info.rotation,
        sample_rate: info.sample_rate.unwrap_or(0),
        channels: info.channels.unwrap_or(0),
        duration_us: info.duration_us(),
        max_input_size: info.sample_table.max_sample_size() as usize,
        config,
    }
}

impl<R: Read + Seek + Send> Demuxer for Mp4Demuxer<R> {
    fn track_count(&self) -> usize {
        self.tracks.len()
    }

    fn track_format(&self, index: usize) -> Result<TrackFormat> {
        Ok(format_for(&self.cursor(index)?.info))
    }

    fn select_track(&mut self, index: usize) -> Result<()> {
        let cursor = self.cursor_mut(index)?;
        cursor.selected = true;
        Ok(())
    }

    fn unselect_track(&mut self, index: usize) -> Result<()> {
        self.cursor_mut(index)?.selected = false;
        Ok(())
    }

    fn seek_to_previous_sync(&mut self, time_us: i64) {
        for cursor in self.tracks.iter_mut().filter(|t| t.selected) {
            let ticks = cursor.info.from_us(time_us);
            cursor.next = cursor
                .info
                .sample_table
                .sync_at_or_before_pts(ticks)
                .unwrap_or(0);
        }
    }

    fn sample_track_index(&self) -> Option<usize> {
        self.current().map(|(i, _)| i)
    }

    fn sample_time(&self) -> Option<i64> {
        self.current()
            .and_then(|(_, t)| t.current().map(|s| t.info.to_us(s.pts())))
    }

    fn sample_flags(&self) -> BufferFlags {
        match self.current().and_then(|(_, t)| t.current()) {
            Some(s) if s.is_keyframe => BufferFlags::SYNC,
            _ => BufferFlags::empty(),
        }
    }

    fn read_sample_data(&mut self, buf: &mut Vec<u8>) -> Result<Option<usize>> {
        let Some((offset, size)) = self
            .current()
            .and_then(|(_, t)| t.current())
            .map(|s| (s.offset, s.size as usize))
        else {
            return Ok(None);
        };

        buf.clear();
        buf.resize(size, 0);
        self.reader.seek(SeekFrom::Start(offset))?;
        self.reader.read_exact(buf)?;
        Ok(Some(size))
    }

    fn advance(&mut self) -> bool {
        let Some((index, _)) = self.current() else {
            return false;
        };
        self.tracks[index].next += 1;
        self.current().is_some()
    }
}
