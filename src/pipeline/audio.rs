//! Verbatim track copy (no decode, no encode).

use super::{CancellationToken, ConversionError, TrackMuxerAdapter};
use crate::planner::TrimWindow;
use tracing::{debug, trace};
use vidconvert_common::MediaKind;
use vidconvert_media::{BufferInfo, Demuxer};

/// What to do with samples between the seek point and the trim start.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeadIn {
    /// Drop them; the first written sample is at or after the start bound.
    Drop,
    /// Keep them so the copy starts on a sync sample.
    KeepFromSync,
}

/// Outcome of one copied track.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CopyStats {
    pub samples: u64,
    pub first_pts_us: Option<i64>,
    pub last_pts_us: Option<i64>,
}

/// Copies one source track into the output within a trim window.
pub struct AudioCopier<'a> {
    cancel: &'a CancellationToken,
}

impl<'a> AudioCopier<'a> {
    pub fn new(cancel: &'a CancellationToken) -> Self {
        Self { cancel }
    }

    /// Copy the first `kind` track of `demuxer`. A missing track copies
    /// nothing and is not an error.
    pub fn copy_track(
        &self,
        demuxer: &mut dyn Demuxer,
        muxer: &mut TrackMuxerAdapter,
        kind: MediaKind,
        window: TrimWindow,
        lead_in: LeadIn,
        on_flush: &mut dyn FnMut(),
    ) -> Result<CopyStats, ConversionError> {
        let prefix = match kind {
            MediaKind::Video => "video/",
            MediaKind::Audio => "audio/",
        };
        let Some(track) = demuxer.find_track(prefix) else {
            debug!(%kind, "No source track to copy");
            return Ok(CopyStats::default());
        };

        demuxer.select_track(track)?;
        let result = self.copy_selected(demuxer, muxer, track, kind, window, lead_in, on_flush);
        demuxer.unselect_track(track)?;
        let stats = result?;

        debug!(
            %kind,
            samples = stats.samples,
            first_pts_us = ?stats.first_pts_us,
            last_pts_us = ?stats.last_pts_us,
            "Copied track"
        );
        Ok(stats)
    }

    #[allow(clippy::too_many_arguments)]
    fn copy_selected(
        &self,
        demuxer: &mut dyn Demuxer,
        muxer: &mut TrackMuxerAdapter,
        track: usize,
        kind: MediaKind,
        window: TrimWindow,
        lead_in: LeadIn,
        on_flush: &mut dyn FnMut(),
    ) -> Result<CopyStats, ConversionError> {
        let format = demuxer.track_format(track)?;
        muxer.add_track(&format, kind)?;
        demuxer.seek_to_previous_sync(window.seek_target());

        let mut buf = Vec::with_capacity(format.max_input_size);
        let mut stats = CopyStats::default();

        self.cancel.check()?;
        loop {
            self.cancel.check()?;

            match demuxer.sample_track_index() {
                Some(index) if index == track => {}
                Some(_) => {
                    demuxer.advance();
                    continue;
                }
                None => break,
            }

            let Some(size) = demuxer.read_sample_data(&mut buf)? else {
                break;
            };
            let pts = demuxer.sample_time().unwrap_or(0);
            if window.is_past_end(pts) {
                break;
            }
            if lead_in == LeadIn::Drop && window.is_before_start(pts) {
                trace!(%kind, pts_us = pts, "Dropping sample before trim start");
                demuxer.advance();
                continue;
            }

            let info = BufferInfo::new(0, size, pts, demuxer.sample_flags());
            if muxer.write_sample_data(kind, &buf, &info)? {
                on_flush();
            }
            stats.samples += 1;
            stats.first_pts_us.get_or_insert(pts);
            stats.last_pts_us = Some(pts);

            if !demuxer.advance() {
                break;
            }
        }
        Ok(stats)
    }
}
