//! Typed payloads of the leaf boxes the library interprets.
//!
//! Each decoder reads the payload that follows the (optional) full-box header;
//! the matching encoder writes exactly the same bytes back. Fields whose
//! presence depends on flags (`tfhd`, `trun`) are plain values and the node's
//! flags decide whether they are on the wire.

use super::{BoxType, FullBoxHeader};
use crate::cursor::ByteCursor;
use crate::{Error, Result};
use bytes::Bytes;

/// `tfhd` flag bits.
pub mod tfhd_flags {
    pub const BASE_DATA_OFFSET: u32 = 0x00_0001;
    pub const SAMPLE_DESCRIPTION_INDEX: u32 = 0x00_0002;
    pub const DEFAULT_SAMPLE_DURATION: u32 = 0x00_0008;
    pub const DEFAULT_SAMPLE_SIZE: u32 = 0x00_0010;
    pub const DEFAULT_SAMPLE_FLAGS: u32 = 0x00_0020;
    pub const DURATION_IS_EMPTY: u32 = 0x01_0000;
    pub const DEFAULT_BASE_IS_MOOF: u32 = 0x02_0000;
}

/// `trun` flag bits.
pub mod trun_flags {
    pub const DATA_OFFSET: u32 = 0x00_0001;
    pub const FIRST_SAMPLE_FLAGS: u32 = 0x00_0004;
    pub const SAMPLE_DURATION: u32 = 0x00_0100;
    pub const SAMPLE_SIZE: u32 = 0x00_0200;
    pub const SAMPLE_FLAGS: u32 = 0x00_0400;
    pub const SAMPLE_COMPOSITION_TIME_OFFSET: u32 = 0x00_0800;
}

/// Fragment sample flag words.
pub mod sample_flags {
    /// depends_on = 2 (does not depend on others), sync.
    pub const SYNC: u32 = 0x0200_0000;
    /// depends_on = 1, is_non_sync_sample = 1.
    pub const NON_SYNC: u32 = 0x0101_0000;

    const NON_SYNC_BIT: u32 = 0x0001_0000;

    pub fn is_sync(flags: u32) -> bool {
        flags & NON_SYNC_BIT == 0
    }
}

/// Identity transformation matrix used by `mvhd` and `tkhd`.
pub const UNITY_MATRIX: [i32; 9] = [0x0001_0000, 0, 0, 0, 0x0001_0000, 0, 0, 0, 0x4000_0000];

fn check_version(box_type: BoxType, header: FullBoxHeader, max: u8) -> Result<()> {
    if header.version > max {
        return Err(Error::UnsupportedVersion {
            box_type,
            version: header.version,
        });
    }
    Ok(())
}

/// Pre-allocation bound for an entry count read from the wire.
fn capacity(cur: &ByteCursor, count: u32, entry_size: usize) -> usize {
    (count as usize).min(cur.remaining() / entry_size)
}

fn read_versioned(cur: &mut ByteCursor, version: u8) -> Result<u64> {
    if version == 1 {
        cur.read_u64()
    } else {
        Ok(cur.read_u32()? as u64)
    }
}

fn write_versioned(cur: &mut ByteCursor, box_type: BoxType, version: u8, value: u64) -> Result<()> {
    if version == 1 {
        cur.write_u64(value);
        return Ok(());
    }
    let narrow = u32::try_from(value).map_err(|_| {
        Error::structural(box_type, 0, format!("value {value} needs a version 1 box"))
    })?;
    cur.write_u32(narrow);
    Ok(())
}

fn read_matrix(cur: &mut ByteCursor) -> Result<[i32; 9]> {
    let mut matrix = [0i32; 9];
    for slot in &mut matrix {
        *slot = cur.read_i32()?;
    }
    Ok(matrix)
}

fn write_matrix(cur: &mut ByteCursor, matrix: &[i32; 9]) {
    for value in matrix {
        cur.write_i32(*value);
    }
}

fn entry_count(cur: &mut ByteCursor) -> Result<u32> {
    cur.read_u32()
}

fn write_count(cur: &mut ByteCursor, box_type: BoxType, len: usize) -> Result<()> {
    let count = u32::try_from(len)
        .map_err(|_| Error::structural(box_type, 0, "entry count exceeds 32 bits"))?;
    cur.write_u32(count);
    Ok(())
}

/// `ftyp` / `styp`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileType {
    pub major_brand: BoxType,
    pub minor_version: u32,
    pub compatible_brands: Vec<BoxType>,
}

impl FileType {
    fn decode(cur: &mut ByteCursor) -> Result<Self> {
        let major_brand = BoxType(cur.read_array()?);
        let minor_version = cur.read_u32()?;
        let mut compatible_brands = Vec::with_capacity(cur.remaining() / 4);
        while cur.remaining() >= 4 {
            compatible_brands.push(BoxType(cur.read_array()?));
        }
        Ok(Self {
            major_brand,
            minor_version,
            compatible_brands,
        })
    }

    fn encode(&self, cur: &mut ByteCursor) {
        cur.write_bytes(&self.major_brand.0);
        cur.write_u32(self.minor_version);
        for brand in &self.compatible_brands {
            cur.write_bytes(&brand.0);
        }
    }
}

/// `mvhd`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MovieHeader {
    pub creation_time: u64,
    pub modification_time: u64,
    pub timescale: u32,
    pub duration: u64,
    /// 16.16 fixed point.
    pub rate: i32,
    /// 8.8 fixed point.
    pub volume: i16,
    pub matrix: [i32; 9],
    pub pre_defined: [u32; 6],
    pub next_track_id: u32,
}

impl Default for MovieHeader {
    fn default() -> Self {
        Self {
            creation_time: 0,
            modification_time: 0,
            timescale: 1000,
            duration: 0,
            rate: 0x0001_0000,
            volume: 0x0100,
            matrix: UNITY_MATRIX,
            pre_defined: [0; 6],
            next_track_id: 1,
        }
    }
}

impl MovieHeader {
    fn decode(cur: &mut ByteCursor, header: FullBoxHeader) -> Result<Self> {
        check_version(BoxType::MVHD, header, 1)?;
        let creation_time = read_versioned(cur, header.version)?;
        let modification_time = read_versioned(cur, header.version)?;
        let timescale = cur.read_u32()?;
        let duration = read_versioned(cur, header.version)?;
        let rate = cur.read_i32()?;
        let volume = cur.read_i16()?;
        cur.skip(10)?;
        let matrix = read_matrix(cur)?;
        let mut pre_defined = [0u32; 6];
        for slot in &mut pre_defined {
            *slot = cur.read_u32()?;
        }
        let next_track_id = cur.read_u32()?;
        Ok(Self {
            creation_time,
            modification_time,
            timescale,
            duration,
            rate,
            volume,
            matrix,
            pre_defined,
            next_track_id,
        })
    }

    fn encode(&self, cur: &mut ByteCursor, version: u8) -> Result<()> {
        write_versioned(cur, BoxType::MVHD, version, self.creation_time)?;
        write_versioned(cur, BoxType::MVHD, version, self.modification_time)?;
        cur.write_u32(self.timescale);
        write_versioned(cur, BoxType::MVHD, version, self.duration)?;
        cur.write_i32(self.rate);
        cur.write_i16(self.volume);
        cur.write_bytes(&[0; 10]);
        write_matrix(cur, &self.matrix);
        for value in &self.pre_defined {
            cur.write_u32(*value);
        }
        cur.write_u32(self.next_track_id);
        Ok(())
    }
}

/// `tkhd`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackHeader {
    pub creation_time: u64,
    pub modification_time: u64,
    pub track_id: u32,
    pub duration: u64,
    pub layer: i16,
    pub alternate_group: i16,
    pub volume: i16,
    pub matrix: [i32; 9],
    /// 16.16 fixed point.
    pub width: u32,
    /// 16.16 fixed point.
    pub height: u32,
}

impl TrackHeader {
    /// Track is enabled.
    pub const ENABLED: u32 = 0x1;
    pub const IN_MOVIE: u32 = 0x2;
    pub const IN_PREVIEW: u32 = 0x4;

    pub fn new(track_id: u32) -> Self {
        Self {
            creation_time: 0,
            modification_time: 0,
            track_id,
            duration: 0,
            layer: 0,
            alternate_group: 0,
            volume: 0,
            matrix: UNITY_MATRIX,
            width: 0,
            height: 0,
        }
    }

    /// Integer part of the presentation width.
    pub fn width_px(&self) -> u32 {
        self.width >> 16
    }

    /// Integer part of the presentation height.
    pub fn height_px(&self) -> u32 {
        self.height >> 16
    }

    fn decode(cur: &mut ByteCursor, header: FullBoxHeader) -> Result<Self> {
        check_version(BoxType::TKHD, header, 1)?;
        let creation_time = read_versioned(cur, header.version)?;
        let modification_time = read_versioned(cur, header.version)?;
        let track_id = cur.read_u32()?;
        cur.skip(4)?;
        let duration = read_versioned(cur, header.version)?;
        cur.skip(8)?;
        let layer = cur.read_i16()?;
        let alternate_group = cur.read_i16()?;
        let volume = cur.read_i16()?;
        cur.skip(2)?;
        let matrix = read_matrix(cur)?;
        let width = cur.read_u32()?;
        let height = cur.read_u32()?;
        Ok(Self {
            creation_time,
            modification_time,
            track_id,
            duration,
            layer,
            alternate_group,
            volume,
            matrix,
            width,
            height,
        })
    }

    fn encode(&self, cur: &mut ByteCursor, version: u8) -> Result<()> {
        write_versioned(cur, BoxType::TKHD, version, self.creation_time)?;
        write_versioned(cur, BoxType::TKHD, version, self.modification_time)?;
        cur.write_u32(self.track_id);
        cur.write_u32(0);
        write_versioned(cur, BoxType::TKHD, version, self.duration)?;
        cur.write_bytes(&[0; 8]);
        cur.write_i16(self.layer);
        cur.write_i16(self.alternate_group);
        cur.write_i16(self.volume);
        cur.write_u16(0);
        write_matrix(cur, &self.matrix);
        cur.write_u32(self.width);
        cur.write_u32(self.height);
        Ok(())
    }
}

/// `mdhd`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaHeader {
    pub creation_time: u64,
    pub modification_time: u64,
    pub timescale: u32,
    pub duration: u64,
    /// Packed ISO-639-2/T code.
    pub language: u16,
    pub pre_defined: u16,
}

impl MediaHeader {
    pub fn new(timescale: u32, language: &str) -> Self {
        Self {
            creation_time: 0,
            modification_time: 0,
            timescale,
            duration: 0,
            language: pack_language(language),
            pre_defined: 0,
        }
    }

    /// Three-letter language code, empty when unset.
    pub fn language_code(&self) -> String {
        if self.language == 0 || self.language == 0x7fff {
            return String::new();
        }
        [10u16, 5, 0]
            .iter()
            .map(|shift| (((self.language >> shift) & 0x1f) as u8 + 0x60) as char)
            .collect()
    }

    fn decode(cur: &mut ByteCursor, header: FullBoxHeader) -> Result<Self> {
        check_version(BoxType::MDHD, header, 1)?;
        Ok(Self {
            creation_time: read_versioned(cur, header.version)?,
            modification_time: read_versioned(cur, header.version)?,
            timescale: cur.read_u32()?,
            duration: read_versioned(cur, header.version)?,
            language: cur.read_u16()?,
            pre_defined: cur.read_u16()?,
        })
    }

    fn encode(&self, cur: &mut ByteCursor, version: u8) -> Result<()> {
        write_versioned(cur, BoxType::MDHD, version, self.creation_time)?;
        write_versioned(cur, BoxType::MDHD, version, self.modification_time)?;
        cur.write_u32(self.timescale);
        write_versioned(cur, BoxType::MDHD, version, self.duration)?;
        cur.write_u16(self.language);
        cur.write_u16(self.pre_defined);
        Ok(())
    }
}

/// Pack a three-letter language code into the `mdhd` 15-bit form.
/// Anything that is not three lowercase letters packs as "und".
pub fn pack_language(code: &str) -> u16 {
    let bytes = code.as_bytes();
    let bytes = if bytes.len() == 3 && bytes.iter().all(u8::is_ascii_lowercase) {
        bytes
    } else {
        b"und"
    };
    bytes
        .iter()
        .fold(0u16, |acc, b| (acc << 5) | (*b - 0x60) as u16)
}

/// `hdlr`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandlerBox {
    pub pre_defined: u32,
    pub handler_type: BoxType,
    pub reserved: [u32; 3],
    /// Raw name bytes (C string in ISO files, Pascal string in some QuickTime files).
    pub name: Bytes,
}

impl HandlerBox {
    pub fn new(handler_type: BoxType, name: &str) -> Self {
        let mut raw = Vec::with_capacity(name.len() + 1);
        raw.extend_from_slice(name.as_bytes());
        raw.push(0);
        Self {
            pre_defined: 0,
            handler_type,
            reserved: [0; 3],
            name: Bytes::from(raw),
        }
    }

    /// Name as text, without terminator.
    pub fn name(&self) -> String {
        let raw = self.name.split(|&b| b == 0).next().unwrap_or(&[]);
        String::from_utf8_lossy(raw).into_owned()
    }

    fn decode(cur: &mut ByteCursor, header: FullBoxHeader) -> Result<Self> {
        check_version(BoxType::HDLR, header, 0)?;
        let pre_defined = cur.read_u32()?;
        let handler_type = BoxType(cur.read_array()?);
        let mut reserved = [0u32; 3];
        for slot in &mut reserved {
            *slot = cur.read_u32()?;
        }
        Ok(Self {
            pre_defined,
            handler_type,
            reserved,
            name: cur.read_to_end(),
        })
    }

    fn encode(&self, cur: &mut ByteCursor) {
        cur.write_u32(self.pre_defined);
        cur.write_bytes(&self.handler_type.0);
        for value in &self.reserved {
            cur.write_u32(*value);
        }
        cur.write_bytes(&self.name);
    }
}

/// One `stts` run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeToSampleEntry {
    pub sample_count: u32,
    pub sample_delta: u32,
}

/// One `ctts` run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompositionOffsetEntry {
    pub sample_count: u32,
    /// Unsigned on the wire in version 0 boxes; carried bit-for-bit.
    pub sample_offset: i32,
}

/// One `stsc` run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SampleToChunkEntry {
    pub first_chunk: u32,
    pub samples_per_chunk: u32,
    pub sample_description_index: u32,
}

/// `stsz`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SampleSizes {
    /// Size shared by all samples, 0 when `entries` lists them.
    pub sample_size: u32,
    pub sample_count: u32,
    pub entries: Vec<u32>,
}

impl SampleSizes {
    fn decode(cur: &mut ByteCursor, header: FullBoxHeader) -> Result<Self> {
        check_version(BoxType::STSZ, header, 0)?;
        let sample_size = cur.read_u32()?;
        let sample_count = cur.read_u32()?;
        let mut entries = Vec::new();
        if sample_size == 0 {
            entries.reserve(capacity(cur, sample_count, 4));
            for _ in 0..sample_count {
                entries.push(cur.read_u32()?);
            }
        }
        Ok(Self {
            sample_size,
            sample_count,
            entries,
        })
    }

    fn encode(&self, cur: &mut ByteCursor) {
        cur.write_u32(self.sample_size);
        cur.write_u32(self.sample_count);
        if self.sample_size == 0 {
            for size in &self.entries {
                cur.write_u32(*size);
            }
        }
    }
}

/// `stco` (32-bit) or `co64` (64-bit) chunk offsets.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ChunkOffsets {
    /// Written as `co64`.
    pub large: bool,
    pub offsets: Vec<u64>,
}

impl ChunkOffsets {
    fn decode(cur: &mut ByteCursor, header: FullBoxHeader, large: bool) -> Result<Self> {
        let box_type = if large { BoxType::CO64 } else { BoxType::STCO };
        check_version(box_type, header, 0)?;
        let count = entry_count(cur)?;
        let width = if large { 8 } else { 4 };
        let mut offsets = Vec::with_capacity(capacity(cur, count, width));
        for _ in 0..count {
            offsets.push(if large {
                cur.read_u64()?
            } else {
                cur.read_u32()? as u64
            });
        }
        Ok(Self { large, offsets })
    }

    fn encode(&self, cur: &mut ByteCursor) -> Result<()> {
        let box_type = if self.large { BoxType::CO64 } else { BoxType::STCO };
        write_count(cur, box_type, self.offsets.len())?;
        for offset in &self.offsets {
            if self.large {
                cur.write_u64(*offset);
            } else {
                let narrow = u32::try_from(*offset).map_err(|_| {
                    Error::structural(box_type, 0, format!("chunk offset {offset} exceeds 32 bits"))
                })?;
                cur.write_u32(narrow);
            }
        }
        Ok(())
    }
}

/// One `elst` entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EditListEntry {
    pub segment_duration: u64,
    /// -1 marks an empty edit.
    pub media_time: i64,
    pub media_rate_integer: i16,
    pub media_rate_fraction: i16,
}

/// `trex`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TrackExtends {
    pub track_id: u32,
    pub default_sample_description_index: u32,
    pub default_sample_duration: u32,
    pub default_sample_size: u32,
    pub default_sample_flags: u32,
}

impl TrackExtends {
    pub fn new(track_id: u32) -> Self {
        Self {
            track_id,
            default_sample_description_index: 1,
            ..Self::default()
        }
    }

    fn decode(cur: &mut ByteCursor, header: FullBoxHeader) -> Result<Self> {
        check_version(BoxType::TREX, header, 0)?;
        Ok(Self {
            track_id: cur.read_u32()?,
            default_sample_description_index: cur.read_u32()?,
            default_sample_duration: cur.read_u32()?,
            default_sample_size: cur.read_u32()?,
            default_sample_flags: cur.read_u32()?,
        })
    }

    fn encode(&self, cur: &mut ByteCursor) {
        cur.write_u32(self.track_id);
        cur.write_u32(self.default_sample_description_index);
        cur.write_u32(self.default_sample_duration);
        cur.write_u32(self.default_sample_size);
        cur.write_u32(self.default_sample_flags);
    }
}

/// `tfhd`. Optional fields are on the wire only when the node's flags say so.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TrackFragmentHeader {
    pub track_id: u32,
    pub base_data_offset: u64,
    pub sample_description_index: u32,
    pub default_sample_duration: u32,
    pub default_sample_size: u32,
    pub default_sample_flags: u32,
}

impl TrackFragmentHeader {
    fn decode(cur: &mut ByteCursor, header: FullBoxHeader) -> Result<Self> {
        use tfhd_flags::*;
        check_version(BoxType::TFHD, header, 0)?;
        let flags = header.flags;
        let mut out = Self {
            track_id: cur.read_u32()?,
            ..Self::default()
        };
        if flags & BASE_DATA_OFFSET != 0 {
            out.base_data_offset = cur.read_u64()?;
        }
        if flags & SAMPLE_DESCRIPTION_INDEX != 0 {
            out.sample_description_index = cur.read_u32()?;
        }
        if flags & DEFAULT_SAMPLE_DURATION != 0 {
            out.default_sample_duration = cur.read_u32()?;
        }
        if flags & DEFAULT_SAMPLE_SIZE != 0 {
            out.default_sample_size = cur.read_u32()?;
        }
        if flags & DEFAULT_SAMPLE_FLAGS != 0 {
            out.default_sample_flags = cur.read_u32()?;
        }
        Ok(out)
    }

    fn encode(&self, cur: &mut ByteCursor, flags: u32) {
        use tfhd_flags::*;
        cur.write_u32(self.track_id);
        if flags & BASE_DATA_OFFSET != 0 {
            cur.write_u64(self.base_data_offset);
        }
        if flags & SAMPLE_DESCRIPTION_INDEX != 0 {
            cur.write_u32(self.sample_description_index);
        }
        if flags & DEFAULT_SAMPLE_DURATION != 0 {
            cur.write_u32(self.default_sample_duration);
        }
        if flags & DEFAULT_SAMPLE_SIZE != 0 {
            cur.write_u32(self.default_sample_size);
        }
        if flags & DEFAULT_SAMPLE_FLAGS != 0 {
            cur.write_u32(self.default_sample_flags);
        }
    }

    fn encoded_len(flags: u32) -> u64 {
        use tfhd_flags::*;
        let mut len = 4;
        if flags & BASE_DATA_OFFSET != 0 {
            len += 8;
        }
        for bit in [
            SAMPLE_DESCRIPTION_INDEX,
            DEFAULT_SAMPLE_DURATION,
            DEFAULT_SAMPLE_SIZE,
            DEFAULT_SAMPLE_FLAGS,
        ] {
            if flags & bit != 0 {
                len += 4;
            }
        }
        len
    }
}

/// Largest `trun` sample count accepted when no per-sample field is present.
const MAX_IMPLICIT_RUN: u32 = 1 << 20;

/// One `trun` sample record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TrackRunSample {
    pub duration: u32,
    pub size: u32,
    pub flags: u32,
    /// Unsigned on the wire in version 0 boxes; carried bit-for-bit.
    pub composition_time_offset: i32,
}

/// `trun`. Optional fields are on the wire only when the node's flags say so.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TrackRun {
    pub data_offset: i32,
    pub first_sample_flags: u32,
    pub samples: Vec<TrackRunSample>,
}

impl TrackRun {
    fn per_sample_len(flags: u32) -> usize {
        use trun_flags::*;
        [
            SAMPLE_DURATION,
            SAMPLE_SIZE,
            SAMPLE_FLAGS,
            SAMPLE_COMPOSITION_TIME_OFFSET,
        ]
        .iter()
        .filter(|bit| flags & **bit != 0)
        .count()
            * 4
    }

    fn decode(cur: &mut ByteCursor, header: FullBoxHeader) -> Result<Self> {
        use trun_flags::*;
        check_version(BoxType::TRUN, header, 1)?;
        let flags = header.flags;
        let count = cur.read_u32()?;
        let mut out = Self::default();
        if flags & DATA_OFFSET != 0 {
            out.data_offset = cur.read_i32()?;
        }
        if flags & FIRST_SAMPLE_FLAGS != 0 {
            out.first_sample_flags = cur.read_u32()?;
        }
        let per_sample = Self::per_sample_len(flags);
        if per_sample == 0 && count > MAX_IMPLICIT_RUN {
            return Err(Error::structural(
                BoxType::TRUN,
                0,
                format!("{count} samples without per-sample fields"),
            ));
        }
        out.samples
            .reserve(capacity(cur, count, per_sample.max(1)).min(count as usize));
        for _ in 0..count {
            let mut sample = TrackRunSample::default();
            if flags & SAMPLE_DURATION != 0 {
                sample.duration = cur.read_u32()?;
            }
            if flags & SAMPLE_SIZE != 0 {
                sample.size = cur.read_u32()?;
            }
            if flags & SAMPLE_FLAGS != 0 {
                sample.flags = cur.read_u32()?;
            }
            if flags & SAMPLE_COMPOSITION_TIME_OFFSET != 0 {
                sample.composition_time_offset = cur.read_i32()?;
            }
            out.samples.push(sample);
        }
        Ok(out)
    }

    fn encode(&self, cur: &mut ByteCursor, flags: u32) -> Result<()> {
        use trun_flags::*;
        write_count(cur, BoxType::TRUN, self.samples.len())?;
        if flags & DATA_OFFSET != 0 {
            cur.write_i32(self.data_offset);
        }
        if flags & FIRST_SAMPLE_FLAGS != 0 {
            cur.write_u32(self.first_sample_flags);
        }
        for sample in &self.samples {
            if flags & SAMPLE_DURATION != 0 {
                cur.write_u32(sample.duration);
            }
            if flags & SAMPLE_SIZE != 0 {
                cur.write_u32(sample.size);
            }
            if flags & SAMPLE_FLAGS != 0 {
                cur.write_u32(sample.flags);
            }
            if flags & SAMPLE_COMPOSITION_TIME_OFFSET != 0 {
                cur.write_i32(sample.composition_time_offset);
            }
        }
        Ok(())
    }

    fn encoded_len(&self, flags: u32) -> u64 {
        use trun_flags::*;
        let mut len = 4u64;
        if flags & DATA_OFFSET != 0 {
            len += 4;
        }
        if flags & FIRST_SAMPLE_FLAGS != 0 {
            len += 4;
        }
        len + (Self::per_sample_len(flags) * self.samples.len()) as u64
    }
}

/// Decoded payload of a leaf box.
#[derive(Debug, Clone, PartialEq)]
pub enum BoxFields {
    FileType(FileType),
    MovieHeader(MovieHeader),
    TrackHeader(TrackHeader),
    MediaHeader(MediaHeader),
    Handler(HandlerBox),
    TimeToSample(Vec<TimeToSampleEntry>),
    CompositionOffsets(Vec<CompositionOffsetEntry>),
    SampleToChunk(Vec<SampleToChunkEntry>),
    SampleSizes(SampleSizes),
    ChunkOffsets(ChunkOffsets),
    SyncSamples(Vec<u32>),
    EditList(Vec<EditListEntry>),
    MovieExtendsHeader { fragment_duration: u64 },
    TrackExtends(TrackExtends),
    MovieFragmentHeader { sequence_number: u32 },
    TrackFragmentHeader(TrackFragmentHeader),
    DecodeTime { base_media_decode_time: u64 },
    TrackRun(TrackRun),
}

/// Decoder entry stored in the registry.
pub type FieldDecoder = fn(&mut ByteCursor, FullBoxHeader) -> Result<BoxFields>;

pub(crate) fn decode_ftyp(cur: &mut ByteCursor, _: FullBoxHeader) -> Result<BoxFields> {
    FileType::decode(cur).map(BoxFields::FileType)
}

pub(crate) fn decode_mvhd(cur: &mut ByteCursor, h: FullBoxHeader) -> Result<BoxFields> {
    MovieHeader::decode(cur, h).map(BoxFields::MovieHeader)
}

pub(crate) fn decode_tkhd(cur: &mut ByteCursor, h: FullBoxHeader) -> Result<BoxFields> {
    TrackHeader::decode(cur, h).map(BoxFields::TrackHeader)
}

pub(crate) fn decode_mdhd(cur: &mut ByteCursor, h: FullBoxHeader) -> Result<BoxFields> {
    MediaHeader::decode(cur, h).map(BoxFields::MediaHeader)
}

pub(crate) fn decode_hdlr(cur: &mut ByteCursor, h: FullBoxHeader) -> Result<BoxFields> {
    HandlerBox::decode(cur, h).map(BoxFields::Handler)
}

pub(crate) fn decode_stts(cur: &mut ByteCursor, h: FullBoxHeader) -> Result<BoxFields> {
    check_version(BoxType::STTS, h, 0)?;
    let count = entry_count(cur)?;
    let mut entries = Vec::with_capacity(capacity(cur, count, 8));
    for _ in 0..count {
        entries.push(TimeToSampleEntry {
            sample_count: cur.read_u32()?,
            sample_delta: cur.read_u32()?,
        });
    }
    Ok(BoxFields::TimeToSample(entries))
}

pub(crate) fn decode_ctts(cur: &mut ByteCursor, h: FullBoxHeader) -> Result<BoxFields> {
    check_version(BoxType::CTTS, h, 1)?;
    let count = entry_count(cur)?;
    let mut entries = Vec::with_capacity(capacity(cur, count, 8));
    for _ in 0..count {
        entries.push(CompositionOffsetEntry {
            sample_count: cur.read_u32()?,
            sample_offset: cur.read_i32()?,
        });
    }
    Ok(BoxFields::CompositionOffsets(entries))
}

pub(crate) fn decode_stsc(cur: &mut ByteCursor, h: FullBoxHeader) -> Result<BoxFields> {
    check_version(BoxType::STSC, h, 0)?;
    let count = entry_count(cur)?;
    let mut entries = Vec::with_capacity(capacity(cur, count, 12));
    for _ in 0..count {
        entries.push(SampleToChunkEntry {
            first_chunk: cur.read_u32()?,
            samples_per_chunk: cur.read_u32()?,
            sample_description_index: cur.read_u32()?,
        });
    }
    Ok(BoxFields::SampleToChunk(entries))
}

pub(crate) fn decode_stsz(cur: &mut ByteCursor, h: FullBoxHeader) -> Result<BoxFields> {
    SampleSizes::decode(cur, h).map(BoxFields::SampleSizes)
}

pub(crate) fn decode_stco(cur: &mut ByteCursor, h: FullBoxHeader) -> Result<BoxFields> {
    ChunkOffsets::decode(cur, h, false).map(BoxFields::ChunkOffsets)
}

pub(crate) fn decode_co64(cur: &mut ByteCursor, h: FullBoxHeader) -> Result<BoxFields> {
    ChunkOffsets::decode(cur, h, true).map(BoxFields::ChunkOffsets)
}

pub(crate) fn decode_stss(cur: &mut ByteCursor, h: FullBoxHeader) -> Result<BoxFields> {
    check_version(BoxType::STSS, h, 0)?;
    let count = entry_count(cur)?;
    let mut entries = Vec::with_capacity(capacity(cur, count, 4));
    for _ in 0..count {
        entries.push(cur.read_u32()?);
    }
    Ok(BoxFields::SyncSamples(entries))
}

pub(crate) fn decode_elst(cur: &mut ByteCursor, h: FullBoxHeader) -> Result<BoxFields> {
    check_version(BoxType::ELST, h, 1)?;
    let count = entry_count(cur)?;
    let width = if h.version == 1 { 20 } else { 12 };
    let mut entries = Vec::with_capacity(capacity(cur, count, width));
    for _ in 0..count {
        let (segment_duration, media_time) = if h.version == 1 {
            (cur.read_u64()?, cur.read_i64()?)
        } else {
            (cur.read_u32()? as u64, cur.read_i32()? as i64)
        };
        entries.push(EditListEntry {
            segment_duration,
            media_time,
            media_rate_integer: cur.read_i16()?,
            media_rate_fraction: cur.read_i16()?,
        });
    }
    Ok(BoxFields::EditList(entries))
}

pub(crate) fn decode_mehd(cur: &mut ByteCursor, h: FullBoxHeader) -> Result<BoxFields> {
    check_version(BoxType::MEHD, h, 1)?;
    Ok(BoxFields::MovieExtendsHeader {
        fragment_duration: read_versioned(cur, h.version)?,
    })
}

pub(crate) fn decode_trex(cur: &mut ByteCursor, h: FullBoxHeader) -> Result<BoxFields> {
    TrackExtends::decode(cur, h).map(BoxFields::TrackExtends)
}

pub(crate) fn decode_mfhd(cur: &mut ByteCursor, h: FullBoxHeader) -> Result<BoxFields> {
    check_version(BoxType::MFHD, h, 0)?;
    Ok(BoxFields::MovieFragmentHeader {
        sequence_number: cur.read_u32()?,
    })
}

pub(crate) fn decode_tfhd(cur: &mut ByteCursor, h: FullBoxHeader) -> Result<BoxFields> {
    TrackFragmentHeader::decode(cur, h).map(BoxFields::TrackFragmentHeader)
}

pub(crate) fn decode_tfdt(cur: &mut ByteCursor, h: FullBoxHeader) -> Result<BoxFields> {
    check_version(BoxType::TFDT, h, 1)?;
    Ok(BoxFields::DecodeTime {
        base_media_decode_time: read_versioned(cur, h.version)?,
    })
}

pub(crate) fn decode_trun(cur: &mut ByteCursor, h: FullBoxHeader) -> Result<BoxFields> {
    TrackRun::decode(cur, h).map(BoxFields::TrackRun)
}

impl BoxFields {
    /// Write the payload that follows the full-box header.
    pub fn encode(&self, cur: &mut ByteCursor, version: u8, flags: u32) -> Result<()> {
        match self {
            Self::FileType(ftyp) => ftyp.encode(cur),
            Self::MovieHeader(mvhd) => mvhd.encode(cur, version)?,
            Self::TrackHeader(tkhd) => tkhd.encode(cur, version)?,
            Self::MediaHeader(mdhd) => mdhd.encode(cur, version)?,
            Self::Handler(hdlr) => hdlr.encode(cur),
            Self::TimeToSample(entries) => {
                write_count(cur, BoxType::STTS, entries.len())?;
                for e in entries {
                    cur.write_u32(e.sample_count);
                    cur.write_u32(e.sample_delta);
                }
            }
            Self::CompositionOffsets(entries) => {
                write_count(cur, BoxType::CTTS, entries.len())?;
                for e in entries {
                    cur.write_u32(e.sample_count);
                    cur.write_i32(e.sample_offset);
                }
            }
            Self::SampleToChunk(entries) => {
                write_count(cur, BoxType::STSC, entries.len())?;
                for e in entries {
                    cur.write_u32(e.first_chunk);
                    cur.write_u32(e.samples_per_chunk);
                    cur.write_u32(e.sample_description_index);
                }
            }
            Self::SampleSizes(stsz) => stsz.encode(cur),
            Self::ChunkOffsets(offsets) => offsets.encode(cur)?,
            Self::SyncSamples(entries) => {
                write_count(cur, BoxType::STSS, entries.len())?;
                for number in entries {
                    cur.write_u32(*number);
                }
            }
            Self::EditList(entries) => {
                write_count(cur, BoxType::ELST, entries.len())?;
                for e in entries {
                    if version == 1 {
                        cur.write_u64(e.segment_duration);
                        cur.write_i64(e.media_time);
                    } else {
                        let duration = u32::try_from(e.segment_duration).map_err(|_| {
                            Error::structural(BoxType::ELST, 0, "segment duration needs version 1")
                        })?;
                        let media_time = i32::try_from(e.media_time).map_err(|_| {
                            Error::structural(BoxType::ELST, 0, "media time needs version 1")
                        })?;
                        cur.write_u32(duration);
                        cur.write_i32(media_time);
                    }
                    cur.write_i16(e.media_rate_integer);
                    cur.write_i16(e.media_rate_fraction);
                }
            }
            Self::MovieExtendsHeader { fragment_duration } => {
                write_versioned(cur, BoxType::MEHD, version, *fragment_duration)?
            }
            Self::TrackExtends(trex) => trex.encode(cur),
            Self::MovieFragmentHeader { sequence_number } => cur.write_u32(*sequence_number),
            Self::TrackFragmentHeader(tfhd) => tfhd.encode(cur, flags),
            Self::DecodeTime {
                base_media_decode_time,
            } => write_versioned(cur, BoxType::TFDT, version, *base_media_decode_time)?,
            Self::TrackRun(trun) => trun.encode(cur, flags)?,
        }
        Ok(())
    }

    /// Payload length `encode` will produce, without encoding.
    pub fn encoded_len(&self, version: u8, flags: u32) -> u64 {
        let wide = version == 1;
        match self {
            Self::FileType(ftyp) => 8 + 4 * ftyp.compatible_brands.len() as u64,
            Self::MovieHeader(_) => (if wide { 28 } else { 16 }) + 80,
            Self::TrackHeader(_) => (if wide { 32 } else { 20 }) + 60,
            Self::MediaHeader(_) => (if wide { 28 } else { 16 }) + 4,
            Self::Handler(hdlr) => 20 + hdlr.name.len() as u64,
            Self::TimeToSample(entries) => 4 + 8 * entries.len() as u64,
            Self::CompositionOffsets(entries) => 4 + 8 * entries.len() as u64,
            Self::SampleToChunk(entries) => 4 + 12 * entries.len() as u64,
            Self::SampleSizes(stsz) => {
                let listed = if stsz.sample_size == 0 {
                    stsz.entries.len()
                } else {
                    0
                };
                8 + 4 * listed as u64
            }
            Self::ChunkOffsets(offsets) => {
                let width = if offsets.large { 8 } else { 4 };
                4 + width * offsets.offsets.len() as u64
            }
            Self::SyncSamples(entries) => 4 + 4 * entries.len() as u64,
            Self::EditList(entries) => 4 + (if wide { 20 } else { 12 }) * entries.len() as u64,
            Self::MovieExtendsHeader { .. } | Self::DecodeTime { .. } => {
                if wide {
                    8
                } else {
                    4
                }
            }
            Self::TrackExtends(_) => 20,
            Self::MovieFragmentHeader { .. } => 4,
            Self::TrackFragmentHeader(_) => TrackFragmentHeader::encoded_len(flags),
            Self::TrackRun(trun) => trun.encoded_len(flags),
        }
    }

    /// One-line description for tree dumps.
    pub fn summary(&self) -> String {
        match self {
            Self::FileType(ftyp) => {
                let brands: Vec<String> =
                    ftyp.compatible_brands.iter().map(|b| b.to_string()).collect();
                format!(
                    "major={} minor={} compatible=[{}]",
                    ftyp.major_brand,
                    ftyp.minor_version,
                    brands.join(",")
                )
            }
            Self::MovieHeader(mvhd) => format!(
                "timescale={} duration={} next_track_id={}",
                mvhd.timescale, mvhd.duration, mvhd.next_track_id
            ),
            Self::TrackHeader(tkhd) => format!(
                "track_id={} duration={} {}x{}",
                tkhd.track_id,
                tkhd.duration,
                tkhd.width_px(),
                tkhd.height_px()
            ),
            Self::MediaHeader(mdhd) => format!(
                "timescale={} duration={} language={}",
                mdhd.timescale,
                mdhd.duration,
                mdhd.language_code()
            ),
            Self::Handler(hdlr) => format!("handler={} name={:?}", hdlr.handler_type, hdlr.name()),
            Self::TimeToSample(e) => format!("entries={}", e.len()),
            Self::CompositionOffsets(e) => format!("entries={}", e.len()),
            Self::SampleToChunk(e) => format!("entries={}", e.len()),
            Self::SampleSizes(stsz) => format!(
                "sample_size={} sample_count={}",
                stsz.sample_size, stsz.sample_count
            ),
            Self::ChunkOffsets(c) => format!("chunks={}", c.offsets.len()),
            Self::SyncSamples(e) => format!("entries={}", e.len()),
            Self::EditList(e) => format!("entries={}", e.len()),
            Self::MovieExtendsHeader { fragment_duration } => {
                format!("fragment_duration={fragment_duration}")
            }
            Self::TrackExtends(trex) => format!("track_id={}", trex.track_id),
            Self::MovieFragmentHeader { sequence_number } => {
                format!("sequence_number={sequence_number}")
            }
            Self::TrackFragmentHeader(tfhd) => format!("track_id={}", tfhd.track_id),
            Self::DecodeTime {
                base_media_decode_time,
            } => format!("base_media_decode_time={base_media_decode_time}"),
            Self::TrackRun(trun) => format!(
                "sample_count={} data_offset={}",
                trun.samples.len(),
                trun.data_offset
            ),
        }
    }
}
