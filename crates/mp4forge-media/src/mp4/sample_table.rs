//! MP4 sample tables.
//!
//! Sample tables describe how samples are laid out in a progressive file:
//! - stts: sample durations (decoding time)
//! - ctts: composition time offsets
//! - stss: sync samples (absent means every sample is sync)
//! - stsc: sample-to-chunk runs
//! - stsz: sample sizes
//! - stco/co64: chunk offsets
//!
//! [`SampleTableBuilder`] flattens the tables into [`Sample`]s and refuses
//! tables that disagree on the sample count. [`encode_sample_table`] goes the
//! other way and produces minimal tables for a list of samples.

use crate::boxes::{
    BoxFields, BoxType, ChunkOffsets, CompositionOffsetEntry, Mp4Box, SampleSizes,
    SampleToChunkEntry, TimeToSampleEntry,
};
use crate::{Error, Result};

/// Upper bound on samples declared by a uniform-size `stsz`, whose count is
/// not backed by per-sample entries.
const MAX_UNIFORM_SAMPLES: u64 = 1 << 24;

/// A resolved sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct Sample {
    pub track_id: u32,
    /// 1-based sample number within the track.
    pub number: u32,
    /// File offset where sample data starts.
    pub data_offset: u64,
    /// Sample size in bytes.
    pub size: u32,
    /// Duration in media timescale.
    pub duration: u32,
    /// Decode timestamp in media timescale.
    pub dts: u64,
    /// Composition time offset.
    pub cts_offset: i32,
    pub is_sync: bool,
    /// 1-based index into the track's sample descriptions.
    pub description_index: u32,
}

impl Sample {
    /// Composition (presentation) timestamp, clamped at zero.
    pub fn cts(&self) -> u64 {
        (self.dts as i64 + self.cts_offset as i64).max(0) as u64
    }
}

/// Samples of one track in decode order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SampleTable {
    samples: Vec<Sample>,
}

impl SampleTable {
    pub fn new(samples: Vec<Sample>) -> Self {
        Self { samples }
    }

    /// Create a new sample table builder.
    pub fn builder(track_id: u32, origin: u64) -> SampleTableBuilder {
        SampleTableBuilder::new(track_id, origin)
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Get sample by 1-based number.
    pub fn get(&self, number: u32) -> Option<&Sample> {
        number
            .checked_sub(1)
            .and_then(|i| self.samples.get(i as usize))
    }

    pub fn as_slice(&self) -> &[Sample] {
        &self.samples
    }

    /// Iterate over all samples.
    pub fn iter(&self) -> std::slice::Iter<'_, Sample> {
        self.samples.iter()
    }

    pub fn last(&self) -> Option<&Sample> {
        self.samples.last()
    }

    pub(crate) fn extend(&mut self, samples: impl IntoIterator<Item = Sample>) {
        self.samples.extend(samples);
    }

    /// Numbers of the sync samples.
    pub fn sync_numbers(&self) -> Vec<u32> {
        self.samples
            .iter()
            .filter(|s| s.is_sync)
            .map(|s| s.number)
            .collect()
    }

    /// Decode time right after the last sample.
    pub fn end_time(&self) -> u64 {
        self.samples
            .last()
            .map(|s| s.dts + s.duration as u64)
            .unwrap_or(0)
    }

    /// Index of the last sample whose decode time is at or before `dts`.
    pub fn index_at_or_before(&self, dts: u64) -> Option<usize> {
        let idx = self.samples.partition_point(|s| s.dts <= dts);
        idx.checked_sub(1)
    }

    /// Index of the sync sample at or before the given index.
    pub fn find_sync_at_or_before(&self, index: usize) -> Option<usize> {
        let last = index.min(self.samples.len().checked_sub(1)?);
        (0..=last).rev().find(|&i| self.samples[i].is_sync)
    }
}

/// Collects the raw tables of one track and resolves them into samples.
#[derive(Debug, Clone, Default)]
pub struct SampleTableBuilder {
    track_id: u32,
    /// File offset of the `stbl` box, for error reports.
    origin: u64,
    stts: Vec<TimeToSampleEntry>,
    ctts: Option<Vec<CompositionOffsetEntry>>,
    stss: Option<Vec<u32>>,
    stsc: Vec<SampleToChunkEntry>,
    stsz: SampleSizes,
    chunk_offsets: Vec<u64>,
}

impl SampleTableBuilder {
    pub fn new(track_id: u32, origin: u64) -> Self {
        Self {
            track_id,
            origin,
            ..Self::default()
        }
    }

    /// Collect the decoded tables found in an `stbl` box.
    pub fn from_stbl(track_id: u32, stbl: &Mp4Box) -> Result<Self> {
        let mut builder = Self::new(track_id, stbl.offset);
        let mut have_sizes = false;
        let mut have_offsets = false;
        for child in stbl.children() {
            match (child.box_type, child.fields()) {
                (BoxType::STTS, Some(BoxFields::TimeToSample(e))) => builder.set_stts(e.clone()),
                (BoxType::CTTS, Some(BoxFields::CompositionOffsets(e))) => {
                    builder.set_ctts(e.clone())
                }
                (BoxType::STSS, Some(BoxFields::SyncSamples(e))) => {
                    builder.set_sync_samples(e.clone())
                }
                (BoxType::STSC, Some(BoxFields::SampleToChunk(e))) => builder.set_stsc(e.clone()),
                (BoxType::STSZ, Some(BoxFields::SampleSizes(s))) => {
                    builder.set_stsz(s.clone());
                    have_sizes = true;
                }
                (BoxType::STCO | BoxType::CO64, Some(BoxFields::ChunkOffsets(c))) => {
                    builder.set_chunk_offsets(c.offsets.clone());
                    have_offsets = true;
                }
                (BoxType::STTS | BoxType::CTTS | BoxType::STSS | BoxType::STSC, None)
                | (BoxType::STSZ | BoxType::STCO | BoxType::CO64, None) => {
                    return Err(Error::structural(
                        child.box_type,
                        child.offset,
                        "sample table box could not be decoded",
                    ));
                }
                _ => {}
            }
        }
        if !have_sizes {
            return Err(Error::MissingBox("stsz"));
        }
        if !have_offsets && builder.stsz.sample_count > 0 {
            return Err(Error::MissingBox("stco"));
        }
        Ok(builder)
    }

    /// Set stts (decoding time to sample) entries.
    pub fn set_stts(&mut self, entries: Vec<TimeToSampleEntry>) {
        self.stts = entries;
    }

    /// Set ctts (composition time to sample) entries.
    pub fn set_ctts(&mut self, entries: Vec<CompositionOffsetEntry>) {
        self.ctts = Some(entries);
    }

    /// Set stss (sync sample) entries.
    pub fn set_sync_samples(&mut self, numbers: Vec<u32>) {
        self.stss = Some(numbers);
    }

    /// Set stsc (sample to chunk) entries.
    pub fn set_stsc(&mut self, entries: Vec<SampleToChunkEntry>) {
        self.stsc = entries;
    }

    /// Set stsz (sample size) data.
    pub fn set_stsz(&mut self, sizes: SampleSizes) {
        self.stsz = sizes;
    }

    /// Set chunk offsets (from stco or co64).
    pub fn set_chunk_offsets(&mut self, offsets: Vec<u64>) {
        self.chunk_offsets = offsets;
    }

    fn mismatch(&self, box_type: BoxType, reason: String) -> Error {
        Error::structural(box_type, self.origin, reason)
    }

    /// Resolve the tables into samples.
    pub fn build(self) -> Result<SampleTable> {
        let count = self.stsz.sample_count as u64;
        if self.stsz.sample_size == 0 && self.stsz.entries.len() as u64 != count {
            return Err(self.mismatch(
                BoxType::STSZ,
                format!(
                    "stsz lists {} sizes but declares {count} samples",
                    self.stsz.entries.len()
                ),
            ));
        }
        if self.stsz.sample_size > 0 && count > MAX_UNIFORM_SAMPLES {
            return Err(self.mismatch(
                BoxType::STSZ,
                format!("{count} samples of uniform size exceed the limit of {MAX_UNIFORM_SAMPLES}"),
            ));
        }

        let stts_total: u64 = self.stts.iter().map(|e| e.sample_count as u64).sum();
        if stts_total != count {
            return Err(self.mismatch(
                BoxType::STTS,
                format!("stts covers {stts_total} samples, stsz declares {count}"),
            ));
        }
        if let Some(ctts) = &self.ctts {
            let ctts_total: u64 = ctts.iter().map(|e| e.sample_count as u64).sum();
            if ctts_total != count {
                return Err(self.mismatch(
                    BoxType::CTTS,
                    format!("ctts covers {ctts_total} samples, stsz declares {count}"),
                ));
            }
        }
        if let Some(stss) = &self.stss {
            if let Some(bad) = stss.iter().find(|n| **n == 0 || **n as u64 > count) {
                return Err(self.mismatch(
                    BoxType::STSS,
                    format!("sync sample {bad} outside 1..={count}"),
                ));
            }
        }

        let chunk_of = self.resolve_chunks()?;
        let chunk_total: u64 = chunk_of.iter().map(|(n, _)| *n as u64).sum();
        if chunk_total != count {
            return Err(self.mismatch(
                BoxType::STSC,
                format!("chunks hold {chunk_total} samples, stsz declares {count}"),
            ));
        }

        let mut samples = Vec::with_capacity(count.min(MAX_UNIFORM_SAMPLES) as usize);
        let mut durations = self
            .stts
            .iter()
            .flat_map(|e| std::iter::repeat(e.sample_delta).take(e.sample_count as usize));
        let mut cts_offsets = self.ctts.iter().flatten().flat_map(|e| {
            std::iter::repeat(e.sample_offset).take(e.sample_count as usize)
        });
        let mut sync = self.stss.as_ref().map(|numbers| {
            let mut numbers = numbers.clone();
            numbers.sort_unstable();
            numbers.into_iter().peekable()
        });

        let mut dts = 0u64;
        let mut number = 0u32;
        for (chunk_idx, (per_chunk, description_index)) in chunk_of.iter().enumerate() {
            let mut offset = self.chunk_offsets[chunk_idx];
            for _ in 0..*per_chunk {
                number += 1;
                let size = if self.stsz.sample_size > 0 {
                    self.stsz.sample_size
                } else {
                    self.stsz.entries[number as usize - 1]
                };
                let duration = durations.next().unwrap_or(0);
                let is_sync = match sync.as_mut() {
                    None => true,
                    Some(numbers) => {
                        while numbers.next_if(|n| *n < number).is_some() {}
                        numbers.next_if_eq(&number).is_some()
                    }
                };
                samples.push(Sample {
                    track_id: self.track_id,
                    number,
                    data_offset: offset,
                    size,
                    duration,
                    dts,
                    cts_offset: cts_offsets.next().unwrap_or(0),
                    is_sync,
                    description_index: *description_index,
                });
                offset = offset.checked_add(size as u64).ok_or_else(|| {
                    self.mismatch(
                        BoxType::STCO,
                        format!("sample {number} ends past the largest file offset"),
                    )
                })?;
                dts += duration as u64;
            }
        }

        Ok(SampleTable::new(samples))
    }

    /// Samples per chunk and description index, one entry per chunk.
    fn resolve_chunks(&self) -> Result<Vec<(u32, u32)>> {
        let num_chunks = self.chunk_offsets.len() as u32;
        let mut out = Vec::with_capacity(num_chunks as usize);
        for (i, entry) in self.stsc.iter().enumerate() {
            let next_first = match self.stsc.get(i + 1) {
                Some(next) => next.first_chunk,
                None => num_chunks + 1,
            };
            if entry.first_chunk == 0 || next_first <= entry.first_chunk {
                return Err(self.mismatch(
                    BoxType::STSC,
                    format!(
                        "stsc entry {} starts at chunk {} after chunk {}",
                        i + 1,
                        entry.first_chunk,
                        next_first
                    ),
                ));
            }
            if entry.first_chunk as usize != out.len() + 1 {
                return Err(self.mismatch(
                    BoxType::STSC,
                    format!(
                        "stsc entry {} starts at chunk {}, expected {}",
                        i + 1,
                        entry.first_chunk,
                        out.len() + 1
                    ),
                ));
            }
            let last = next_first.min(num_chunks + 1);
            for _ in entry.first_chunk..last {
                out.push((entry.samples_per_chunk, entry.sample_description_index));
            }
        }
        if out.len() != num_chunks as usize {
            return Err(self.mismatch(
                BoxType::STSC,
                format!("stsc maps {} chunks, chunk offset table has {num_chunks}", out.len()),
            ));
        }
        Ok(out)
    }
}

/// Produce minimal sample table boxes (everything in `stbl` except `stsd`)
/// for samples given in decode order.
///
/// Chunks are runs of physically adjacent samples that share a description
/// index. `ctts` is emitted only for non-zero offsets (version 1 when one is
/// negative), `stss` only when some sample is not sync, `stsz` in its uniform
/// form when all sizes match and `co64` when an offset needs 64 bits.
pub fn encode_sample_table(samples: &[Sample]) -> Vec<Mp4Box> {
    let mut stts: Vec<TimeToSampleEntry> = Vec::new();
    for s in samples {
        match stts.last_mut() {
            Some(last) if last.sample_delta == s.duration => last.sample_count += 1,
            _ => stts.push(TimeToSampleEntry {
                sample_count: 1,
                sample_delta: s.duration,
            }),
        }
    }

    let mut ctts: Vec<CompositionOffsetEntry> = Vec::new();
    if samples.iter().any(|s| s.cts_offset != 0) {
        for s in samples {
            match ctts.last_mut() {
                Some(last) if last.sample_offset == s.cts_offset => last.sample_count += 1,
                _ => ctts.push(CompositionOffsetEntry {
                    sample_count: 1,
                    sample_offset: s.cts_offset,
                }),
            }
        }
    }

    // (first sample index, sample count, description index) per chunk.
    let mut chunks: Vec<(usize, u32, u32)> = Vec::new();
    for (i, s) in samples.iter().enumerate() {
        let continues = i > 0 && {
            let prev = &samples[i - 1];
            prev.data_offset + prev.size as u64 == s.data_offset
                && prev.description_index == s.description_index
        };
        match chunks.last_mut() {
            Some(chunk) if continues => chunk.1 += 1,
            _ => chunks.push((i, 1, s.description_index)),
        }
    }

    let mut stsc: Vec<SampleToChunkEntry> = Vec::new();
    for (n, (_, per_chunk, description_index)) in chunks.iter().enumerate() {
        let same = stsc.last().is_some_and(|last| {
            last.samples_per_chunk == *per_chunk
                && last.sample_description_index == *description_index
        });
        if !same {
            stsc.push(SampleToChunkEntry {
                first_chunk: n as u32 + 1,
                samples_per_chunk: *per_chunk,
                sample_description_index: *description_index,
            });
        }
    }

    let uniform = samples
        .first()
        .filter(|first| samples.iter().all(|s| s.size == first.size))
        .map(|first| first.size)
        .filter(|size| *size > 0);
    let stsz = SampleSizes {
        sample_size: uniform.unwrap_or(0),
        sample_count: samples.len() as u32,
        entries: match uniform {
            Some(_) => Vec::new(),
            None => samples.iter().map(|s| s.size).collect(),
        },
    };

    let offsets: Vec<u64> = chunks
        .iter()
        .map(|(first, _, _)| samples[*first].data_offset)
        .collect();
    let large = offsets.iter().any(|o| *o > u32::MAX as u64);

    let mut boxes = vec![Mp4Box::full_fields(
        BoxType::STTS,
        0,
        0,
        BoxFields::TimeToSample(stts),
    )];
    if !ctts.is_empty() {
        let version = u8::from(ctts.iter().any(|e| e.sample_offset < 0));
        boxes.push(Mp4Box::full_fields(
            BoxType::CTTS,
            version,
            0,
            BoxFields::CompositionOffsets(ctts),
        ));
    }
    if samples.iter().any(|s| !s.is_sync) {
        let numbers = samples
            .iter()
            .filter(|s| s.is_sync)
            .map(|s| s.number)
            .collect();
        boxes.push(Mp4Box::full_fields(
            BoxType::STSS,
            0,
            0,
            BoxFields::SyncSamples(numbers),
        ));
    }
    boxes.push(Mp4Box::full_fields(
        BoxType::STSC,
        0,
        0,
        BoxFields::SampleToChunk(stsc),
    ));
    boxes.push(Mp4Box::full_fields(
        BoxType::STSZ,
        0,
        0,
        BoxFields::SampleSizes(stsz),
    ));
    boxes.push(Mp4Box::full_fields(
        if large { BoxType::CO64 } else { BoxType::STCO },
        0,
        0,
        BoxFields::ChunkOffsets(ChunkOffsets { large, offsets }),
    ));
    boxes
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stts(count: u32, delta: u32) -> TimeToSampleEntry {
        TimeToSampleEntry {
            sample_count: count,
            sample_delta: delta,
        }
    }

    fn stsc(first_chunk: u32, per_chunk: u32) -> SampleToChunkEntry {
        SampleToChunkEntry {
            first_chunk,
            samples_per_chunk: per_chunk,
            sample_description_index: 1,
        }
    }

    fn sizes(entries: Vec<u32>) -> SampleSizes {
        SampleSizes {
            sample_size: 0,
            sample_count: entries.len() as u32,
            entries,
        }
    }

    fn flatten(boxes: Vec<Mp4Box>) -> Result<SampleTable> {
        let stbl = Mp4Box::container(BoxType::STBL, boxes);
        SampleTableBuilder::from_stbl(1, &stbl)?.build()
    }

    #[test]
    fn test_sample_cts() {
        let mut sample = Sample {
            track_id: 1,
            number: 1,
            data_offset: 100,
            size: 1000,
            duration: 1000,
            dts: 1000,
            cts_offset: 500,
            is_sync: true,
            description_index: 1,
        };
        assert_eq!(sample.cts(), 1500);

        sample.dts = 100;
        sample.cts_offset = -200;
        assert_eq!(sample.cts(), 0); // Clamped to 0
    }

    #[test]
    fn test_three_sample_track() {
        let mut builder = SampleTableBuilder::new(1, 0);
        builder.set_stts(vec![stts(3, 1000)]);
        builder.set_stsc(vec![stsc(1, 3)]);
        builder.set_stsz(sizes(vec![100, 150, 120]));
        builder.set_chunk_offsets(vec![48]);

        let table = builder.build().unwrap();
        let got: Vec<_> = table
            .iter()
            .map(|s| (s.number, s.data_offset, s.size, s.dts, s.duration, s.is_sync))
            .collect();
        assert_eq!(
            got,
            vec![
                (1, 48, 100, 0, 1000, true),
                (2, 148, 150, 1000, 1000, true),
                (3, 298, 120, 2000, 1000, true),
            ]
        );
    }

    #[test]
    fn test_sync_table_and_multiple_chunks() {
        let mut builder = SampleTableBuilder::new(1, 0);
        builder.set_stts(vec![stts(10, 512)]);
        builder.set_sync_samples(vec![1, 5, 9]);
        builder.set_stsc(vec![stsc(1, 4), stsc(3, 2)]);
        builder.set_stsz(SampleSizes {
            sample_size: 100,
            sample_count: 10,
            entries: vec![],
        });
        builder.set_chunk_offsets(vec![0, 1000, 5000]);

        let table = builder.build().unwrap();
        assert_eq!(table.len(), 10);
        assert_eq!(table.get(5).unwrap().data_offset, 1000);
        assert_eq!(table.get(9).unwrap().data_offset, 5000);
        assert_eq!(table.get(10).unwrap().data_offset, 5100);
        assert_eq!(table.sync_numbers(), vec![1, 5, 9]);

        assert_eq!(table.find_sync_at_or_before(3), Some(0));
        assert_eq!(table.find_sync_at_or_before(4), Some(4));
        assert_eq!(table.find_sync_at_or_before(9), Some(8));
        assert_eq!(table.index_at_or_before(1100), Some(2));
        assert_eq!(table.end_time(), 5120);
    }

    #[test]
    fn test_empty_stss_means_no_sync_samples() {
        let mut builder = SampleTableBuilder::new(1, 0);
        builder.set_stts(vec![stts(2, 1)]);
        builder.set_sync_samples(vec![]);
        builder.set_stsc(vec![stsc(1, 2)]);
        builder.set_stsz(sizes(vec![1, 1]));
        builder.set_chunk_offsets(vec![0]);
        let table = builder.build().unwrap();
        assert!(table.iter().all(|s| !s.is_sync));
    }

    #[test]
    fn test_count_mismatch_is_structural() {
        let mut builder = SampleTableBuilder::new(1, 640);
        builder.set_stts(vec![stts(2, 1000)]);
        builder.set_stsc(vec![stsc(1, 3)]);
        builder.set_stsz(sizes(vec![100, 150, 120]));
        builder.set_chunk_offsets(vec![48]);

        let err = builder.build().unwrap_err();
        match err {
            Error::Structural {
                box_type, offset, ..
            } => {
                assert_eq!(box_type, BoxType::STTS);
                assert_eq!(offset, 640);
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_uniform_count_over_limit_is_structural() {
        let mut builder = SampleTableBuilder::new(1, 0);
        builder.set_stts(vec![stts(u32::MAX, 1)]);
        builder.set_stsc(vec![stsc(1, u32::MAX)]);
        builder.set_stsz(SampleSizes {
            sample_size: 4,
            sample_count: u32::MAX,
            entries: vec![],
        });
        builder.set_chunk_offsets(vec![0]);
        let err = builder.build().unwrap_err();
        assert!(matches!(err, Error::Structural { box_type: BoxType::STSZ, .. }));
    }

    #[test]
    fn test_offset_past_u64_is_structural() {
        let mut builder = SampleTableBuilder::new(1, 0);
        builder.set_stts(vec![stts(2, 1)]);
        builder.set_stsc(vec![stsc(1, 2)]);
        builder.set_stsz(sizes(vec![8, 8]));
        builder.set_chunk_offsets(vec![u64::MAX - 4]);
        let err = builder.build().unwrap_err();
        assert!(matches!(err, Error::Structural { box_type: BoxType::STCO, .. }));
    }

    #[test]
    fn test_stsc_overcommitted_chunks() {
        let mut builder = SampleTableBuilder::new(1, 0);
        builder.set_stts(vec![stts(3, 1)]);
        builder.set_stsc(vec![stsc(1, 2)]);
        builder.set_stsz(sizes(vec![1, 1, 1]));
        builder.set_chunk_offsets(vec![0, 10]);
        let err = builder.build().unwrap_err();
        assert!(matches!(err, Error::Structural { box_type: BoxType::STSC, .. }));
    }

    fn synthetic(n: u32) -> Vec<Sample> {
        let mut offset = 48u64;
        let mut dts = 0u64;
        (1..=n)
            .map(|number| {
                let size = 100 + (number % 7) * 13;
                let duration = if number % 50 == 0 { 1001 } else { 1000 };
                // Every 100th sample starts a new chunk somewhere else.
                if number % 100 == 0 {
                    offset += 4096;
                }
                let sample = Sample {
                    track_id: 1,
                    number,
                    data_offset: offset,
                    size,
                    duration,
                    dts,
                    cts_offset: if number % 3 == 0 { -500 } else { 1000 },
                    is_sync: number % 30 == 1,
                    description_index: 1,
                };
                offset += size as u64;
                dts += duration as u64;
                sample
            })
            .collect()
    }

    #[test]
    fn test_encode_then_flatten_is_identity() {
        for n in [0u32, 1, 1000] {
            let samples = synthetic(n);
            let table = flatten(encode_sample_table(&samples)).unwrap();
            assert_eq!(table.as_slice(), samples.as_slice(), "n = {n}");
        }
    }

    #[test]
    fn test_encode_is_minimal() {
        let samples: Vec<Sample> = (1..=4)
            .map(|number| Sample {
                track_id: 1,
                number,
                data_offset: 100 * number as u64,
                size: 100,
                duration: 1000,
                dts: 1000 * (number as u64 - 1),
                cts_offset: 0,
                is_sync: true,
                description_index: 1,
            })
            .collect();
        let boxes = encode_sample_table(&samples);
        let types: Vec<_> = boxes.iter().map(|b| b.box_type).collect();
        assert_eq!(
            types,
            vec![BoxType::STTS, BoxType::STSC, BoxType::STSZ, BoxType::STCO]
        );
        assert_eq!(
            boxes[0].fields(),
            Some(&BoxFields::TimeToSample(vec![stts(4, 1000)]))
        );
        assert_eq!(
            boxes[1].fields(),
            Some(&BoxFields::SampleToChunk(vec![stsc(1, 4)]))
        );
        let Some(BoxFields::SampleSizes(stsz)) = boxes[2].fields() else {
            panic!("expected stsz");
        };
        assert_eq!((stsz.sample_size, stsz.entries.len()), (100, 0));
    }

    #[test]
    fn test_encode_large_offsets_and_negative_cts() {
        let samples = vec![Sample {
            track_id: 1,
            number: 1,
            data_offset: 5 << 32,
            size: 10,
            duration: 1,
            dts: 0,
            cts_offset: -1,
            is_sync: true,
            description_index: 1,
        }];
        let boxes = encode_sample_table(&samples);
        let ctts = boxes.iter().find(|b| b.box_type == BoxType::CTTS).unwrap();
        assert_eq!(ctts.version(), 1);
        assert!(boxes.iter().any(|b| b.box_type == BoxType::CO64));
    }
}
