//! Vidconvert-Media: MP4 container access for the conversion pipeline.
//!
//! # Modules
//!
//! - `mp4` - MP4 container parsing (moov, sample tables, avcC/esds, tkhd matrix)
//! - `demux` - sample-at-a-time extractor over a parsed MP4 (`Demuxer`)
//! - `mux` - track registration and sample writing into a new MP4 (`ContainerWriter`)
//! - `codec_config` - H.264 parameter-set handling (start-code split, avcC records)
//! - `buffer` - per-sample descriptors exchanged between codecs, demuxer and muxer
//! - `format` - track format descriptors
//!
//! The pipeline never touches atoms directly. It reads through [`Demuxer`] and
//! writes through [`ContainerWriter`], so tests can substitute either side.

pub mod buffer;
pub mod codec_config;
pub mod demux;
pub mod error;
pub mod format;
pub mod mp4;
pub mod mux;

pub use buffer::{BufferFlags, BufferInfo};
pub use demux::{Demuxer, Mp4Demuxer};
pub use error::{Error, Result};
pub use format::{CodecConfig, TrackFormat, MIME_AAC, MIME_AVC, MIME_HEVC};
pub use mp4::Mp4File;
pub use mux::{ContainerWriter, Mp4Writer};
