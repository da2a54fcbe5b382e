//! Per-sample descriptors.

use bitflags::bitflags;

bitflags! {
    /// Sample flags carried alongside a buffer.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct BufferFlags: u32 {
        /// Sample is a sync point (decodable without prior samples).
        const SYNC = 0x0001;
        /// Buffer carries codec configuration rather than media.
        const CODEC_CONFIG = 0x0002;
        /// No further buffers follow on this stream.
        const END_OF_STREAM = 0x0004;
    }
}

/// Location and timing of one sample inside a byte buffer.
///
/// `offset`/`size` index into the buffer the descriptor travels with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BufferInfo {
    pub offset: usize,
    pub size: usize,
    pub presentation_time_us: i64,
    pub flags: BufferFlags,
}

impl BufferInfo {
    pub fn new(offset: usize, size: usize, presentation_time_us: i64, flags: BufferFlags) -> Self {
        Self {
            offset,
            size,
            presentation_time_us,
            flags,
        }
    }

    /// Zero-length end-of-stream marker.
    pub fn end_of_stream(presentation_time_us: i64) -> Self {
        Self::new(0, 0, presentation_time_us, BufferFlags::END_OF_STREAM)
    }

    pub fn is_end_of_stream(&self) -> bool {
        self.flags.contains(BufferFlags::END_OF_STREAM)
    }

    pub fn is_codec_config(&self) -> bool {
        self.flags.contains(BufferFlags::CODEC_CONFIG)
    }

    pub fn is_sync(&self) -> bool {
        self.flags.contains(BufferFlags::SYNC)
    }

    /// Slice the described payload out of `buf`, or `None` if the
    /// descriptor points outside it.
    pub fn payload<'a>(&self, buf: &'a [u8]) -> Option<&'a [u8]> {
        let end = self.offset.checked_add(self.size)?;
        buf.get(self.offset..end)
    }
}
