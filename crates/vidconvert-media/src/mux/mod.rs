//! Output container writing.
//!
//! [`ContainerWriter`] is the contract the pipeline writes through;
//! [`Mp4Writer`] implements it as a progressive (non-fragmented) MP4 with
//! `mdat` first and `moov` appended by [`ContainerWriter::finish_movie`].

mod moov;
mod writer;

pub use moov::{MoovBuilder, WrittenSample, WrittenTrack};
pub use writer::{Mp4Writer, DEFAULT_FLUSH_THRESHOLD};

use crate::{BufferInfo, Result, TrackFormat};

/// Sink for muxed samples.
pub trait ContainerWriter: Send {
    /// Declare a track. Returns the index used by later writes.
    fn add_track(&mut self, format: &TrackFormat) -> Result<usize>;

    /// Replace the declared format of a track, e.g. once parameter sets
    /// become known. Only valid before the first sample of that track.
    fn update_track_format(&mut self, index: usize, format: &TrackFormat) -> Result<()>;

    /// Append one sample. Returns true when this call pushed buffered data
    /// to the underlying file.
    fn write_sample_data(&mut self, index: usize, data: &[u8], info: &BufferInfo) -> Result<bool>;

    /// Write the index and close the container. Returns the final byte
    /// length. Calling it again returns the same length without writing.
    fn finish_movie(&mut self) -> Result<u64>;
}
