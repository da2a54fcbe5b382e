//! MP4 sample table resolution.
//!
//! - stts: sample durations (decoding time)
//! - stss: sync sample table (keyframes)
//! - stsc: sample-to-chunk mapping
//! - stsz: sample sizes
//! - stco/co64: chunk offsets
//! - ctts: composition time offsets

use std::collections::HashSet;

/// A resolved sample entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SampleEntry {
    /// Sample index (0-based).
    pub index: u32,
    /// File offset where sample data starts.
    pub offset: u64,
    pub size: u32,
    /// Decode timestamp in media timescale.
    pub dts: u64,
    /// Composition time offset.
    pub cts_offset: i32,
    pub is_keyframe: bool,
}

impl SampleEntry {
    /// Presentation timestamp in media timescale, clamped at zero.
    pub fn pts(&self) -> u64 {
        (self.dts as i64 + self.cts_offset as i64).max(0) as u64
    }
}

/// Sample table containing resolved sample information.
#[derive(Debug, Clone, Default)]
pub struct SampleTable {
    pub sample_count: u32,
    pub samples: Vec<SampleEntry>,
}

impl SampleTable {
    pub fn builder() -> SampleTableBuilder {
        SampleTableBuilder::new()
    }

    pub fn get(&self, index: u32) -> Option<&SampleEntry> {
        self.samples.get(index as usize)
    }

    pub fn iter(&self) -> impl Iterator<Item = &SampleEntry> {
        self.samples.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Sum of all sample sizes in bytes.
    pub fn total_size(&self) -> u64 {
        self.samples.iter().map(|s| s.size as u64).sum()
    }

    pub fn max_sample_size(&self) -> u32 {
        self.samples.iter().map(|s| s.size).max().unwrap_or(0)
    }

    /// Find the keyframe at or before the given sample index.
    pub fn find_keyframe_at_or_before(&self, index: u32) -> Option<u32> {
        let last = index.min(self.sample_count.checked_sub(1)?);
        (0..=last)
            .rev()
            .find(|&i| self.samples.get(i as usize).is_some_and(|s| s.is_keyframe))
    }

    /// Index of the last sample whose presentation time is at or before
    /// `pts`, or the first sample when `pts` precedes them all.
    pub fn sample_at_or_before_pts(&self, pts: u64) -> Option<u32> {
        if self.samples.is_empty() {
            return None;
        }
        let found = self
            .samples
            .iter()
            .rev()
            .find(|s| s.pts() <= pts)
            .map(|s| s.index);
        Some(found.unwrap_or(0))
    }

    /// Sync sample at or before `pts`, falling back to the first sync sample.
    pub fn sync_at_or_before_pts(&self, pts: u64) -> Option<u32> {
        let idx = self.sample_at_or_before_pts(pts)?;
        self.find_keyframe_at_or_before(idx)
            .or_else(|| self.samples.iter().find(|s| s.is_keyframe).map(|s| s.index))
    }
}

/// Builder for constructing a sample table from raw atom data.
#[derive(Default)]
pub struct SampleTableBuilder {
    stts_entries: Vec<(u32, u32)>,      // (count, delta)
    sync_samples: Option<Vec<u32>>,     // 1-based; None when stss is absent
    stsc_entries: Vec<(u32, u32, u32)>, // (first_chunk, samples_per_chunk, description)
    uniform_size: u32,
    sample_sizes: Vec<u32>,
    chunk_offsets: Vec<u64>,
    ctts_entries: Vec<(u32, i32)>, // (count, offset)
}

impl SampleTableBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_stts(&mut self, entries: Vec<(u32, u32)>) {
        self.stts_entries = entries;
    }

    pub fn set_sync_samples(&mut self, samples: Vec<u32>) {
        self.sync_samples = Some(samples);
    }

    pub fn set_stsc(&mut self, entries: Vec<(u32, u32, u32)>) {
        self.stsc_entries = entries;
    }

    pub fn set_stsz(&mut self, uniform_size: u32, sizes: Vec<u32>) {
        self.uniform_size = uniform_size;
        self.sample_sizes = sizes;
    }

    pub fn set_chunk_offsets(&mut self, offsets: Vec<u64>) {
        self.chunk_offsets = offsets;
    }

    pub fn set_ctts(&mut self, entries: Vec<(u32, i32)>) {
        self.ctts_entries = entries;
    }

    /// Resolve every sample's offset, size, timing and sync flag.
    pub fn build(self) -> SampleTable {
        let sample_count = if self.uniform_size > 0 {
            self.total_stts_samples() as u32
        } else {
            self.sample_sizes.len() as u32
        };

        if sample_count == 0 {
            return SampleTable::default();
        }

        let chunks = self.resolve_sample_chunks(sample_count);
        let dts = self.resolve_dts(sample_count);
        let cts = self.resolve_cts_offsets(sample_count);
        let sync: Option<HashSet<u32>> = self
            .sync_samples
            .as_ref()
            .map(|s| s.iter().copied().collect());

        let mut chunk_fill = vec![0u64; self.chunk_offsets.len()];
        let mut samples = Vec::with_capacity(sample_count as usize);

        for i in 0..sample_count {
            let size = self.size_of(i as usize);
            let chunk = chunks[i as usize] as usize;
            let base = self.chunk_offsets.get(chunk).copied().unwrap_or(0);
            let within = chunk_fill.get(chunk).copied().unwrap_or(0);
            if let Some(fill) = chunk_fill.get_mut(chunk) {
                *fill += size as u64;
            }

            samples.push(SampleEntry {
                index: i,
                offset: base + within,
                size,
                dts: dts[i as usize],
                cts_offset: cts[i as usize],
                // stss absent means every sample is a sync sample
                is_keyframe: sync.as_ref().map_or(true, |s| s.contains(&(i + 1))),
            });
        }

        SampleTable {
            sample_count,
            samples,
        }
    }

    fn size_of(&self, i: usize) -> u32 {
        if self.uniform_size > 0 {
            self.uniform_size
        } else {
            self.sample_sizes.get(i).copied().unwrap_or(0)
        }
    }

    fn total_stts_samples(&self) -> usize {
        self.stts_entries.iter().map(|(count, _)| *count as usize).sum()
    }

    fn resolve_sample_chunks(&self, sample_count: u32) -> Vec<u32> {
        let mut result = Vec::with_capacity(sample_count as usize);
        let num_chunks = self.chunk_offsets.len() as u32;

        'entries: for (i, &(first_chunk, per_chunk, _)) in self.stsc_entries.iter().enumerate() {
            let next_first = self
                .stsc_entries
                .get(i + 1)
                .map_or(num_chunks + 1, |e| e.0);
            for chunk in first_chunk.max(1)..next_first.min(num_chunks + 1) {
                for _ in 0..per_chunk {
                    if result.len() as u32 >= sample_count {
                        break 'entries;
                    }
                    result.push(chunk - 1);
                }
            }
        }

        let pad = result.last().copied().unwrap_or(0);
        result.resize(sample_count as usize, pad);
        result
    }

    fn resolve_dts(&self, sample_count: u32) -> Vec<u64> {
        let mut values = Vec::with_capacity(sample_count as usize);
        let mut current = 0u64;
        let mut last_delta = 1u32;

        for &(count, delta) in &self.stts_entries {
            for _ in 0..count {
                if values.len() as u32 >= sample_count {
                    return values;
                }
                values.push(current);
                current += delta as u64;
            }
            last_delta = delta;
        }

        while (values.len() as u32) < sample_count {
            values.push(current);
            current += last_delta as u64;
        }
        values
    }

    fn resolve_cts_offsets(&self, sample_count: u32) -> Vec<i32> {
        let mut offsets: Vec<i32> = self
            .ctts_entries
            .iter()
            .flat_map(|&(count, offset)| std::iter::repeat(offset).take(count as usize))
            .take(sample_count as usize)
            .collect();
        offsets.resize(sample_count as usize, 0);
        offsets
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ten_sample_table() -> SampleTable {
        let mut builder = SampleTableBuilder::new();
        builder.set_stts(vec![(10, 1000)]);
        builder.set_sync_samples(vec![1, 5, 9]);
        builder.set_stsc(vec![(1, 10, 1)]);
        builder.set_stsz(100, vec![]);
        builder.set_chunk_offsets(vec![0]);
        builder.build()
    }

    #[test]
    fn test_sample_entry_pts() {
        let sample = SampleEntry {
            index: 0,
            offset: 100,
            size: 1000,
            dts: 1000,
            cts_offset: 500,
            is_keyframe: true,
        };
        assert_eq!(sample.pts(), 1500);

        let negative = SampleEntry {
            dts: 100,
            cts_offset: -200,
            ..sample
        };
        assert_eq!(negative.pts(), 0);
    }

    #[test]
    fn test_builder_resolves_offsets_in_chunk() {
        let mut builder = SampleTableBuilder::new();
        builder.set_stts(vec![(3, 1000)]);
        builder.set_sync_samples(vec![1]);
        builder.set_stsc(vec![(1, 3, 1)]);
        builder.set_stsz(0, vec![100, 200, 150]);
        builder.set_chunk_offsets(vec![1000]);

        let table = builder.build();

        assert_eq!(table.sample_count, 3);
        assert_eq!(table.samples[0].offset, 1000);
        assert_eq!(table.samples[1].offset, 1100);
        assert_eq!(table.samples[2].offset, 1300);
        assert_eq!(table.samples[1].dts, 1000);
        assert!(table.samples[0].is_keyframe);
        assert!(!table.samples[1].is_keyframe);
        assert_eq!(table.total_size(), 450);
        assert_eq!(table.max_sample_size(), 200);
    }

    #[test]
    fn test_one_sample_per_chunk() {
        let mut builder = SampleTableBuilder::new();
        builder.set_stts(vec![(3, 10)]);
        builder.set_stsc(vec![(1, 1, 1)]);
        builder.set_stsz(0, vec![5, 6, 7]);
        builder.set_chunk_offsets(vec![40, 90, 30]);

        let table = builder.build();
        let offsets: Vec<u64> = table.iter().map(|s| s.offset).collect();
        assert_eq!(offsets, vec![40, 90, 30]);
        // No stss: everything is sync.
        assert!(table.iter().all(|s| s.is_keyframe));
    }

    #[test]
    fn test_empty_stss_means_no_sync_samples() {
        let mut builder = SampleTableBuilder::new();
        builder.set_stts(vec![(2, 10)]);
        builder.set_sync_samples(vec![]);
        builder.set_stsc(vec![(1, 2, 1)]);
        builder.set_stsz(4, vec![]);
        builder.set_chunk_offsets(vec![0]);

        let table = builder.build();
        assert!(table.iter().all(|s| !s.is_keyframe));
        assert_eq!(table.sync_at_or_before_pts(15), None);
    }

    #[test]
    fn test_keyframe_search() {
        let table = ten_sample_table();
        assert_eq!(table.find_keyframe_at_or_before(0), Some(0));
        assert_eq!(table.find_keyframe_at_or_before(3), Some(0));
        assert_eq!(table.find_keyframe_at_or_before(4), Some(4));
        assert_eq!(table.find_keyframe_at_or_before(7), Some(4));
        assert_eq!(table.find_keyframe_at_or_before(9), Some(8));
        assert_eq!(table.find_keyframe_at_or_before(50), Some(8));
    }

    #[test]
    fn test_sync_search_by_time() {
        let table = ten_sample_table();
        assert_eq!(table.sync_at_or_before_pts(0), Some(0));
        assert_eq!(table.sync_at_or_before_pts(4500), Some(4));
        assert_eq!(table.sync_at_or_before_pts(7999), Some(4));
        assert_eq!(table.sync_at_or_before_pts(8000), Some(8));
        assert_eq!(table.sync_at_or_before_pts(u64::MAX), Some(8));
    }

    #[test]
    fn test_empty_table() {
        let table = SampleTableBuilder::new().build();
        assert!(table.is_empty());
        assert_eq!(table.find_keyframe_at_or_before(0), None);
        assert_eq!(table.sample_at_or_before_pts(0), None);
    }
}
