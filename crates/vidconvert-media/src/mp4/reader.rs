//! MP4 file reader with atom parsing.

use super::atoms::rotation_from_matrix;
use super::{Atom, AtomType, HandlerType, Mp4File, SampleTableBuilder, TrackInfo};
use crate::Result;
use std::io::{Read, Seek, SeekFrom};
use tracing::debug;

/// Maximum allowed atom data size (64 MB) to prevent OOM on malformed files.
const MAX_ATOM_DATA_SIZE: u64 = 64 * 1024 * 1024;

/// Offset of child boxes inside a VisualSampleEntry, relative to stsd data.
const VISUAL_ENTRY_CHILDREN: usize = 8 + 8 + 78;
/// Offset of child boxes inside an AudioSampleEntry, relative to stsd data.
const AUDIO_ENTRY_CHILDREN: usize = 8 + 8 + 28;

fn be_u16(data: &[u8], at: usize) -> Option<u16> {
    data.get(at..at + 2).map(|b| u16::from_be_bytes([b[0], b[1]]))
}

fn be_u32(data: &[u8], at: usize) -> Option<u32> {
    data.get(at..at + 4)
        .map(|b| u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
}

fn be_i32(data: &[u8], at: usize) -> Option<i32> {
    be_u32(data, at).map(|v| v as i32)
}

fn be_u64(data: &[u8], at: usize) -> Option<u64> {
    data.get(at..at + 8).map(|b| {
        let mut raw = [0u8; 8];
        raw.copy_from_slice(b);
        u64::from_be_bytes(raw)
    })
}

fn fourcc(data: &[u8], at: usize) -> Option<[u8; 4]> {
    data.get(at..at + 4).map(|b| [b[0], b[1], b[2], b[3]])
}

/// Entry count of a full box table, clamped to what the data can hold.
fn entry_count(data: &[u8], entry_size: usize) -> usize {
    let declared = be_u32(data, 4).unwrap_or(0) as usize;
    declared.min(data.len().saturating_sub(8) / entry_size)
}

/// MP4 file reader.
pub struct Mp4Reader<R> {
    reader: R,
    file_size: u64,
}

impl<R: Read + Seek> Mp4Reader<R> {
    pub fn new(mut reader: R) -> Self {
        let file_size = reader.seek(SeekFrom::End(0)).unwrap_or(0);
        let _ = reader.seek(SeekFrom::Start(0));
        Self { reader, file_size }
    }

    /// Parse the top-level structure and every track in `moov`.
    pub fn parse(&mut self) -> Result<Mp4File> {
        let mut mp4 = Mp4File {
            duration: 0,
            timescale: 1000,
            video_track: None,
            audio_track: None,
            has_faststart: false,
        };

        let atoms = self.read_atoms(0, self.file_size)?;
        let moov = atoms
            .iter()
            .find(|a| a.atom_type == AtomType::MOOV)
            .ok_or(crate::Error::MissingAtom("moov"))?;
        let mdat_start = atoms
            .iter()
            .find(|a| a.atom_type == AtomType::MDAT)
            .map(Atom::start);

        self.parse_moov(moov, &mut mp4)?;
        mp4.has_faststart = mdat_start.map_or(true, |m| moov.start() < m);

        Ok(mp4)
    }

    /// Read sibling atom headers in `[start, end)`.
    fn read_atoms(&mut self, start: u64, end: u64) -> Result<Vec<Atom>> {
        let mut atoms = Vec::new();
        let mut pos = start;

        while pos + 8 <= end {
            self.reader.seek(SeekFrom::Start(pos))?;

            let mut header = [0u8; 8];
            if self.reader.read_exact(&mut header).is_err() {
                break;
            }

            let size = u32::from_be_bytes([header[0], header[1], header[2], header[3]]) as u64;
            let atom_type = AtomType::from_bytes([header[4], header[5], header[6], header[7]]);

            let (actual_size, header_size) = match size {
                1 => {
                    let mut ext = [0u8; 8];
                    self.reader.read_exact(&mut ext)?;
                    (u64::from_be_bytes(ext), 16u8)
                }
                0 => (end - pos, 8u8),
                n => (n, 8u8),
            };

            if actual_size < header_size as u64 {
                break;
            }

            atoms.push(Atom {
                atom_type,
                size: actual_size,
                data_offset: pos + header_size as u64,
                header_size,
            });

            pos = pos.saturating_add(actual_size);
        }

        Ok(atoms)
    }

    fn read_atom_data(&mut self, atom: &Atom) -> Result<Vec<u8>> {
        let size = atom.data_size();
        if size > MAX_ATOM_DATA_SIZE {
            return Err(crate::Error::InvalidMp4(format!(
                "Atom {} data size {} exceeds maximum {}",
                atom.atom_type, size, MAX_ATOM_DATA_SIZE
            )));
        }
        self.reader.seek(SeekFrom::Start(atom.data_offset))?;
        let mut data = vec![0u8; size as usize];
        self.reader.read_exact(&mut data)?;
        Ok(data)
    }

    fn children(&mut self, parent: &Atom) -> Result<Vec<Atom>> {
        self.read_atoms(parent.data_offset, parent.data_end())
    }

    fn parse_moov(&mut self, moov: &Atom, mp4: &mut Mp4File) -> Result<()> {
        for child in &self.children(moov)? {
            match child.atom_type {
                AtomType::MVHD => self.parse_mvhd(child, mp4)?,
                AtomType::TRAK => match self.parse_trak(child) {
                    Ok(track) => match track.handler_type {
                        HandlerType::Video if mp4.video_track.is_none() => {
                            mp4.video_track = Some(track)
                        }
                        HandlerType::Audio if mp4.audio_track.is_none() => {
                            mp4.audio_track = Some(track)
                        }
                        other => debug!(track_id = track.track_id, ?other, "Skipping track"),
                    },
                    Err(e) => debug!(error = %e, "Skipping unreadable track"),
                },
                _ => {}
            }
        }
        Ok(())
    }

    fn parse_mvhd(&mut self, atom: &Atom, mp4: &mut Mp4File) -> Result<()> {
        let data = self.read_atom_data(atom)?;
        let (timescale, duration) = match data.first() {
            Some(0) => (be_u32(&data, 12), be_u32(&data, 16).map(u64::from)),
            Some(_) => (be_u32(&data, 20), be_u64(&data, 24)),
            None => (None, None),
        };
        if let (Some(ts), Some(d)) = (timescale, duration) {
            mp4.timescale = ts;
            mp4.duration = d;
        }
        Ok(())
    }

    fn parse_trak(&mut self, trak: &Atom) -> Result<TrackInfo> {
        let mut track = TrackInfo::new(0);
        for child in &self.children(trak)? {
            match child.atom_type {
                AtomType::TKHD => self.parse_tkhd(child, &mut track)?,
                AtomType::MDIA => self.parse_mdia(child, &mut track)?,
                _ => {}
            }
        }
        Ok(track)
    }

    /// Track id, display size and rotation matrix.
    fn parse_tkhd(&mut self, atom: &Atom, track: &mut TrackInfo) -> Result<()> {
        let data = self.read_atom_data(atom)?;
        // (track_id, matrix, width) offsets for version 0 and 1
        let (id_at, matrix_at, size_at) = match data.first() {
            Some(0) => (12, 40, 76),
            Some(_) => (20, 52, 88),
            None => return Ok(()),
        };

        if let Some(id) = be_u32(&data, id_at) {
            track.track_id = id;
        }
        if let (Some(a), Some(b), Some(c), Some(d)) = (
            be_i32(&data, matrix_at),
            be_i32(&data, matrix_at + 4),
            be_i32(&data, matrix_at + 12),
            be_i32(&data, matrix_at + 16),
        ) {
            track.rotation = rotation_from_matrix(a, b, c, d);
        }
        if let (Some(w), Some(h)) = (be_u32(&data, size_at), be_u32(&data, size_at + 4)) {
            track.width = Some(w >> 16);
            track.height = Some(h >> 16);
        }
        Ok(())
    }

    fn parse_mdia(&mut self, mdia: &Atom, track: &mut TrackInfo) -> Result<()> {
        let children = self.children(mdia)?;
        // hdlr decides how stsd is read, so take it first regardless of order.
        for child in children.iter().filter(|c| c.atom_type == AtomType::HDLR) {
            let data = self.read_atom_data(child)?;
            if let Some(handler) = fourcc(&data, 8) {
                track.handler_type = HandlerType::from_bytes(handler);
            }
        }
        for child in &children {
            match child.atom_type {
                AtomType::MDHD => self.parse_mdhd(child, track)?,
                AtomType::MINF => {
                    for stbl in self.children(child)? {
                        if stbl.atom_type == AtomType::STBL {
                            self.parse_stbl(&stbl, track)?;
                        }
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }

    fn parse_mdhd(&mut self, atom: &Atom, track: &mut TrackInfo) -> Result<()> {
        let data = self.read_atom_data(atom)?;
        let (timescale, duration) = match data.first() {
            Some(0) => (be_u32(&data, 12), be_u32(&data, 16).map(u64::from)),
            Some(_) => (be_u32(&data, 20), be_u64(&data, 24)),
            None => (None, None),
        };
        if let Some(ts) = timescale {
            track.timescale = ts;
        }
        if let Some(d) = duration {
            track.duration = d;
        }
        Ok(())
    }

    fn parse_stbl(&mut self, stbl: &Atom, track: &mut TrackInfo) -> Result<()> {
        let mut builder = SampleTableBuilder::new();

        for child in &self.children(stbl)? {
            let data = match child.atom_type {
                AtomType::STTS
                | AtomType::STSS
                | AtomType::STSC
                | AtomType::STSZ
                | AtomType::STCO
                | AtomType::CO64
                | AtomType::CTTS
                | AtomType::STSD => self.read_atom_data(child)?,
                _ => continue,
            };

            match child.atom_type {
                AtomType::STTS => {
                    let entries = (0..entry_count(&data, 8))
                        .filter_map(|i| {
                            let at = 8 + i * 8;
                            Some((be_u32(&data, at)?, be_u32(&data, at + 4)?))
                        })
                        .collect();
                    builder.set_stts(entries);
                }
                AtomType::STSS => {
                    let entries = (0..entry_count(&data, 4))
                        .filter_map(|i| be_u32(&data, 8 + i * 4))
                        .collect();
                    builder.set_sync_samples(entries);
                }
                AtomType::STSC => {
                    let entries = (0..entry_count(&data, 12))
                        .filter_map(|i| {
                            let at = 8 + i * 12;
                            Some((
                                be_u32(&data, at)?,
                                be_u32(&data, at + 4)?,
                                be_u32(&data, at + 8)?,
                            ))
                        })
                        .collect();
                    builder.set_stsc(entries);
                }
                AtomType::STSZ => {
                    let uniform = be_u32(&data, 4).unwrap_or(0);
                    let declared = be_u32(&data, 8).unwrap_or(0) as usize;
                    let sizes = if uniform == 0 {
                        let count = declared.min(data.len().saturating_sub(12) / 4);
                        (0..count).filter_map(|i| be_u32(&data, 12 + i * 4)).collect()
                    } else {
                        Vec::new()
                    };
                    builder.set_stsz(uniform, sizes);
                }
                AtomType::STCO => {
                    let offsets = (0..entry_count(&data, 4))
                        .filter_map(|i| be_u32(&data, 8 + i * 4).map(u64::from))
                        .collect();
                    builder.set_chunk_offsets(offsets);
                }
                AtomType::CO64 => {
                    let offsets = (0..entry_count(&data, 8))
                        .filter_map(|i| be_u64(&data, 8 + i * 8))
                        .collect();
                    builder.set_chunk_offsets(offsets);
                }
                AtomType::CTTS => {
                    // Version 0 offsets are unsigned on paper but written
                    // signed by most muxers; both read as i32.
                    let entries = (0..entry_count(&data, 8))
                        .filter_map(|i| {
                            let at = 8 + i * 8;
                            Some((be_u32(&data, at)?, be_i32(&data, at + 4)?))
                        })
                        .collect();
                    builder.set_ctts(entries);
                }
                AtomType::STSD => Self::parse_stsd(&data, track),
                _ => {}
            }
        }

        track.sample_table = builder.build();
        Ok(())
    }

    /// First sample entry: fourcc, audio fields, and the codec config box.
    fn parse_stsd(data: &[u8], track: &mut TrackInfo) {
        if be_u32(data, 4).unwrap_or(0) == 0 {
            return;
        }
        track.sample_entry = fourcc(data, 12);

        let children_at = if track.handler_type.is_audio() {
            // AudioSampleEntry: channelCount at +16, sampleRate 16.16 at +24
            track.channels = be_u16(data, 16 + 16);
            track.sample_rate = be_u32(data, 16 + 24).map(|r| r >> 16);
            AUDIO_ENTRY_CHILDREN
        } else if track.handler_type.is_video() {
            VISUAL_ENTRY_CHILDREN
        } else {
            return;
        };

        let entry_end = be_u32(data, 8)
            .map(|s| 8 + s as usize)
            .unwrap_or(data.len())
            .min(data.len());

        let mut pos = children_at;
        while pos + 8 <= entry_end {
            let Some(size) = be_u32(data, pos).map(|s| s as usize) else {
                break;
            };
            let Some(kind) = fourcc(data, pos + 4) else {
                break;
            };
            if size < 8 || pos + size > entry_end {
                break;
            }
            if matches!(&kind, b"avcC" | b"hvcC" | b"esds") {
                track.codec_data = Some(data[pos + 8..pos + size].to_vec());
                track.codec_box = Some(kind);
                break;
            }
            pos += size;
        }
    }
}
