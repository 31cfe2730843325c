//! MP4 files.
//!
//! [`Mp4File`] ties the pieces together: it owns the appended input, drives
//! the [`BoxParser`] over it, keeps the top-level boxes and maintains one
//! [`Track`] per `trak` whose samples grow as fragments are parsed or
//! appended.

mod authoring;
mod fragment;
mod sample_table;
mod track;

pub use authoring::{MovieOptions, SampleOptions};
pub use sample_table::{encode_sample_table, Sample, SampleTable, SampleTableBuilder};
pub use track::{EntryParams, FragmentCursor, HandlerType, SampleDescription, Track};

use crate::boxes::{
    BoxBody, BoxFields, BoxRegistry, BoxType, HeaderLayout, MediaData, Mp4Box, TrackExtends,
};
use crate::fmp4::{FragmentSample, MoofBuilder};
use crate::parser::{BoxParser, ParseEvent, ParseWarning};
use crate::stream::StreamBuffer;
use crate::writer::{serialize_boxes, write_boxes_to, write_initialization_segment};
use crate::{Error, Result};
use authoring::Authoring;
use bytes::Bytes;
use std::collections::{BTreeMap, HashMap};
use std::fs::File;
use std::io::{Read, Write};
use std::ops::Range;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, warn};

/// Default read size of [`Mp4File::open`].
pub const DEFAULT_READ_CHUNK: usize = 64 * 1024;

/// Outcome of [`Mp4File::resume`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Progress {
    /// Nothing new could be parsed from the buffered input.
    NeedMoreData,
    /// New top-level boxes were parsed, or the input was fully parsed.
    Ready(TreeDelta),
}

/// Top-level boxes added by one [`Mp4File::resume`] call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeDelta {
    /// Indices into [`Mp4File::boxes`].
    pub boxes: Range<usize>,
    /// The input was declared finished and has been parsed to its end.
    pub finished: bool,
}

/// Options of [`Mp4File::open_with`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadOptions {
    pub strict: bool,
    pub chunk_size: usize,
}

impl Default for ReadOptions {
    fn default() -> Self {
        Self {
            strict: false,
            chunk_size: DEFAULT_READ_CHUNK,
        }
    }
}

/// Summary of a track.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize))]
pub struct TrackInfo {
    pub track_id: u32,
    pub handler: String,
    pub codec: Option<String>,
    pub language: String,
    pub timescale: u32,
    /// Duration in the media timescale.
    pub duration: u64,
    pub duration_secs: f64,
    pub sample_count: usize,
    pub sync_sample_count: usize,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub channel_count: Option<u16>,
    pub sample_rate: Option<u32>,
    pub max_sync_interval_secs: Option<f64>,
}

/// Summary of a movie.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize))]
pub struct MovieInfo {
    pub major_brand: Option<String>,
    pub compatible_brands: Vec<String>,
    /// Movie timescale (time units per second).
    pub timescale: u32,
    /// Duration in timescale units.
    pub duration: u64,
    pub duration_secs: f64,
    /// `moov` has `mvex` or fragments were seen.
    pub is_fragmented: bool,
    /// `moov` comes before the first `mdat`.
    pub is_progressive: bool,
    pub fragment_count: usize,
    pub tracks: Vec<TrackInfo>,
}

/// Cloneable iterator over the samples of one track.
#[derive(Debug, Clone)]
pub struct Samples<'a> {
    inner: std::slice::Iter<'a, Sample>,
}

impl Iterator for Samples<'_> {
    type Item = Sample;

    fn next(&mut self) -> Option<Sample> {
        self.inner.next().copied()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl ExactSizeIterator for Samples<'_> {}

/// An MP4 file being parsed, extended or authored.
#[derive(Debug)]
pub struct Mp4File {
    stream: StreamBuffer,
    parser: BoxParser,
    boxes: Vec<Mp4Box>,
    ftyp: Option<usize>,
    moov: Option<usize>,
    moofs: Vec<usize>,
    mdats: Vec<usize>,
    tracks: BTreeMap<u32, Track>,
    trex: HashMap<u32, TrackExtends>,
    warnings: Vec<ParseWarning>,
    next_sequence_number: u32,
    finished: bool,
    authoring: Option<Authoring>,
}

impl Default for Mp4File {
    fn default() -> Self {
        Self::open_for_streaming()
    }
}

impl Mp4File {
    /// An empty file waiting for input, using the default box registry.
    pub fn open_for_streaming() -> Self {
        Self::with_parser(BoxParser::default())
    }

    /// An empty file waiting for input, using a custom registry.
    pub fn with_registry(registry: Arc<BoxRegistry>) -> Self {
        Self::with_parser(BoxParser::new(registry))
    }

    fn with_parser(parser: BoxParser) -> Self {
        Self {
            stream: StreamBuffer::new(),
            parser,
            boxes: Vec::new(),
            ftyp: None,
            moov: None,
            moofs: Vec::new(),
            mdats: Vec::new(),
            tracks: BTreeMap::new(),
            trex: HashMap::new(),
            warnings: Vec::new(),
            next_sequence_number: 1,
            finished: false,
            authoring: None,
        }
    }

    /// Return the first structural problem as an error instead of recovering.
    pub fn strict(mut self, strict: bool) -> Self {
        self.parser = std::mem::take(&mut self.parser).strict(strict);
        self
    }

    /// Parse a complete file held in memory.
    pub fn parse_bytes(data: impl Into<Bytes>) -> Result<Self> {
        let mut file = Self::open_for_streaming();
        file.append(data);
        file.finish();
        file.parse_to_end()?;
        Ok(file)
    }

    /// Parse an MP4 file from the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::open_with(path, ReadOptions::default())
    }

    /// Parse a file, reading it in chunks through the streaming path.
    pub fn open_with<P: AsRef<Path>>(path: P, options: ReadOptions) -> Result<Self> {
        let mut reader = File::open(path)?;
        let mut file = Self::open_for_streaming().strict(options.strict);
        let mut buf = vec![0u8; options.chunk_size.max(1)];
        loop {
            let n = reader.read(&mut buf)?;
            if n == 0 {
                break;
            }
            file.append(Bytes::copy_from_slice(&buf[..n]));
            file.resume()?;
        }
        file.finish();
        file.parse_to_end()?;
        Ok(file)
    }

    fn parse_to_end(&mut self) -> Result<()> {
        loop {
            match self.resume()? {
                Progress::Ready(delta) if delta.finished => return Ok(()),
                Progress::Ready(_) => {}
                Progress::NeedMoreData => {
                    return Err(Error::TruncatedInput {
                        offset: self.parser.position(),
                        needed: 1,
                    })
                }
            }
        }
    }

    /// Append the next input chunk.
    pub fn append(&mut self, data: impl Into<Bytes>) {
        self.stream.append(data);
    }

    /// Append an input chunk at an explicit file position.
    pub fn append_at(&mut self, position: u64, data: impl Into<Bytes>) -> Result<()> {
        self.stream.append_at(position, data)
    }

    /// Declare that no more input follows.
    pub fn finish(&mut self) {
        self.parser.finish(self.stream.end_position());
    }

    /// Parse as much of the buffered input as possible.
    pub fn resume(&mut self) -> Result<Progress> {
        let first = self.boxes.len();
        if !self.finished {
            let outcome = self.parse_available();
            self.collect_parser_warnings();
            outcome?;
        }
        let last = self.boxes.len();
        if first == last && !self.finished {
            return Ok(Progress::NeedMoreData);
        }
        Ok(Progress::Ready(TreeDelta {
            boxes: first..last,
            finished: self.finished,
        }))
    }

    fn parse_available(&mut self) -> Result<()> {
        loop {
            match self.parser.advance(&self.stream)? {
                ParseEvent::Box(node) => {
                    debug!(box_type = %node.box_type, offset = node.offset, size = node.encoded_size(), "parsed top-level box");
                    self.ingest(node)?;
                }
                ParseEvent::NeedMoreData => return Ok(()),
                ParseEvent::End => {
                    self.finished = true;
                    return self.check_recognized();
                }
            }
        }
    }

    fn collect_parser_warnings(&mut self) {
        self.warnings.extend(self.parser.take_warnings());
    }

    /// Fail when nothing known was found at the top level.
    fn check_recognized(&self) -> Result<()> {
        let registry = self.parser.registry();
        if self
            .boxes
            .iter()
            .any(|b| registry.resolve(b.box_type, b.uuid.as_ref()).is_some())
        {
            return Ok(());
        }
        match self.boxes.first() {
            Some(first) => Err(Error::structural(
                first.box_type,
                first.offset,
                "no recognizable top-level box",
            )),
            None => Err(Error::TruncatedInput {
                offset: 0,
                needed: 8,
            }),
        }
    }

    fn anomaly(&mut self, box_type: BoxType, offset: u64, message: impl Into<String>) {
        let warning = ParseWarning::new(box_type, offset, message);
        warn!(%warning, "recovered");
        self.warnings.push(warning);
    }

    fn ingest(&mut self, node: Mp4Box) -> Result<()> {
        let index = self.boxes.len();
        match node.box_type {
            BoxType::FTYP if self.ftyp.is_some() => {
                self.anomaly(node.box_type, node.offset, "duplicate ftyp ignored")
            }
            BoxType::FTYP => self.ftyp = Some(index),
            BoxType::MOOV if self.moov.is_some() => {
                self.anomaly(node.box_type, node.offset, "duplicate moov ignored")
            }
            BoxType::MOOV => {
                self.moov = Some(index);
                self.load_movie(&node)?;
            }
            BoxType::MOOF => {
                self.moofs.push(index);
                self.load_fragment(&node)?;
            }
            BoxType::MDAT => self.mdats.push(index),
            _ => {}
        }
        self.boxes.push(node);
        Ok(())
    }

    fn load_movie(&mut self, moov: &Mp4Box) -> Result<()> {
        let strict = self.parser.is_strict();
        if let Some(mvex) = moov.child(BoxType::MVEX) {
            for trex in mvex.children_of(BoxType::TREX) {
                if let Some(BoxFields::TrackExtends(defaults)) = trex.fields() {
                    self.trex.insert(defaults.track_id, *defaults);
                }
            }
        }

        for trak in moov.children_of(BoxType::TRAK) {
            let mut track = match Track::describe(trak) {
                Ok(track) => track,
                Err(e) if strict => return Err(e),
                Err(e) => {
                    self.anomaly(BoxType::TRAK, trak.offset, format!("track skipped: {e}"));
                    continue;
                }
            };
            if let Err(e) = track.load_samples(trak) {
                if strict {
                    return Err(e);
                }
                self.anomaly(
                    BoxType::TRAK,
                    trak.offset,
                    format!("track {} has no samples: {e}", track.track_id),
                );
                track.table_error = Some(e.to_string());
            }
            if self.tracks.contains_key(&track.track_id) {
                self.anomaly(
                    BoxType::TRAK,
                    trak.offset,
                    format!("duplicate track ID {} ignored", track.track_id),
                );
                continue;
            }
            debug!(track_id = track.track_id, samples = track.samples.len(), "loaded track");
            self.tracks.insert(track.track_id, track);
        }
        Ok(())
    }

    fn load_fragment(&mut self, moof: &Mp4Box) -> Result<()> {
        let strict = self.parser.is_strict();
        if self.moov.is_none() {
            self.anomaly(moof.box_type, moof.offset, "fragment before moov ignored");
            return Ok(());
        }
        if let Some(BoxFields::MovieFragmentHeader { sequence_number }) =
            moof.child(BoxType::MFHD).and_then(Mp4Box::fields)
        {
            self.next_sequence_number = self.next_sequence_number.max(sequence_number.saturating_add(1));
        }

        let mut default_base = moof.offset;
        for traf in moof.children_of(BoxType::TRAF) {
            let resolved = fragment::traf_track_id(traf).and_then(|track_id| {
                let track = self.tracks.get(&track_id).ok_or(Error::TrackNotFound(track_id))?;
                let out = fragment::resolve_traf(
                    traf,
                    moof.offset,
                    default_base,
                    self.trex.get(&track_id),
                    track.cursor,
                )?;
                Ok((track_id, out))
            });
            match resolved {
                Ok((track_id, out)) => {
                    default_base = out.data_end;
                    if let Some(track) = self.tracks.get_mut(&track_id) {
                        track.samples.extend(out.samples);
                        track.cursor = out.cursor;
                    }
                }
                Err(e) if strict => return Err(e),
                Err(e) => self.anomaly(traf.box_type, traf.offset, format!("track fragment skipped: {e}")),
            }
        }
        Ok(())
    }

    /// Top-level boxes in file order.
    pub fn boxes(&self) -> &[Mp4Box] {
        &self.boxes
    }

    pub fn ftyp(&self) -> Option<&Mp4Box> {
        self.ftyp.map(|i| &self.boxes[i])
    }

    pub fn moov(&self) -> Option<&Mp4Box> {
        self.moov.map(|i| &self.boxes[i])
    }

    /// `moof` boxes in file order.
    pub fn moofs(&self) -> impl Iterator<Item = &Mp4Box> {
        self.moofs.iter().map(|i| &self.boxes[*i])
    }

    /// `mdat` boxes in file order.
    pub fn mdats(&self) -> impl Iterator<Item = &Mp4Box> {
        self.mdats.iter().map(|i| &self.boxes[*i])
    }

    /// Recovered anomalies, in the order they were found.
    pub fn warnings(&self) -> &[ParseWarning] {
        &self.warnings
    }

    /// Whether the input has been parsed to its declared end.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Buffered input.
    pub fn stream(&self) -> &StreamBuffer {
        &self.stream
    }

    /// Tracks in ID order.
    pub fn tracks(&self) -> impl Iterator<Item = &Track> {
        self.tracks.values()
    }

    pub fn track(&self, track_id: u32) -> Option<&Track> {
        self.tracks.get(&track_id)
    }

    /// Fragment defaults of a track.
    pub fn trex(&self, track_id: u32) -> Option<TrackExtends> {
        self.trex.get(&track_id).copied()
    }

    /// First box of the given type, depth-first.
    pub fn get_box(&self, box_type: BoxType) -> Option<&Mp4Box> {
        self.get_boxes(box_type).into_iter().next()
    }

    /// All boxes of the given type, depth-first.
    pub fn get_boxes(&self, box_type: BoxType) -> Vec<&Mp4Box> {
        let mut out = Vec::new();
        for node in &self.boxes {
            node.find_all(box_type, &mut out);
        }
        out
    }

    /// Samples of a track in decode order.
    pub fn samples_for_track(&self, track_id: u32) -> Result<Samples<'_>> {
        let track = self.track(track_id).ok_or(Error::TrackNotFound(track_id))?;
        Ok(Samples {
            inner: track.samples.iter(),
        })
    }

    /// Bytes of a sample, from the buffered input or from media held in memory.
    pub fn read_sample_data(&self, sample: &Sample) -> Result<Bytes> {
        let len = sample.size as u64;
        if let Some(authoring) = &self.authoring {
            if let Some(data) = authoring.read(sample.data_offset, len) {
                return Ok(data);
            }
        }
        if let Some(data) = self.stream.read(sample.data_offset, len) {
            return Ok(data);
        }
        for mdat in self.mdats() {
            if let BoxBody::MediaData(MediaData::Inline(data)) = &mdat.body {
                let start = mdat.payload_offset();
                if sample.data_offset >= start && sample.data_offset + len <= start + data.len() as u64 {
                    let from = (sample.data_offset - start) as usize;
                    return Ok(data.slice(from..from + sample.size as usize));
                }
            }
        }
        Err(Error::DataUnavailable {
            offset: sample.data_offset,
            len,
        })
    }

    /// Sample at or before `time` (media timescale), optionally snapped back
    /// to the closest sync sample.
    pub fn seek(&self, track_id: u32, time: u64, use_sync: bool) -> Result<Option<Sample>> {
        let track = self.track(track_id).ok_or(Error::TrackNotFound(track_id))?;
        let Some(mut index) = track.samples.index_at_or_before(time) else {
            return Ok(None);
        };
        if use_sync {
            match track.samples.find_sync_at_or_before(index) {
                Some(sync) => index = sync,
                None => return Ok(None),
            }
        }
        Ok(track.samples.as_slice().get(index).copied())
    }

    /// Release input the parser no longer needs. Sample data in released
    /// ranges becomes unavailable.
    pub fn release_consumed(&mut self) {
        self.stream
            .release_consumed_through(self.parser.release_floor());
    }

    /// Next `mfhd` sequence number.
    pub fn next_sequence_number(&self) -> u32 {
        self.next_sequence_number
    }

    /// Build a `moof` + `mdat` pair for one sample and advance the track's
    /// fragment cursor and the sequence number. The pair is not added to the
    /// file; see [`Mp4File::append_sample`].
    pub fn create_single_sample_moof(
        &mut self,
        track_id: u32,
        data: Bytes,
        options: &SampleOptions,
    ) -> Result<(Mp4Box, Mp4Box)> {
        let size = u32::try_from(data.len())
            .map_err(|_| Error::unsupported("sample larger than 4 GiB"))?;
        let cursor = self
            .tracks
            .get(&track_id)
            .ok_or(Error::TrackNotFound(track_id))?
            .cursor;
        let default_index = self
            .trex
            .get(&track_id)
            .map(|t| t.default_sample_description_index)
            .unwrap_or(1);

        let mut builder = MoofBuilder::new(self.next_sequence_number, track_id)
            .base_media_decode_time(cursor.next_decode_time);
        if options.description_index != default_index {
            builder = builder.sample_description_index(options.description_index);
        }
        let sample = FragmentSample {
            size,
            duration: options.duration,
            cts_offset: options.cts_offset,
            is_sync: options.is_sync,
        };
        let pair = builder.build_with_mdat(&[sample], data)?;

        self.next_sequence_number += 1;
        if let Some(track) = self.tracks.get_mut(&track_id) {
            track.cursor = FragmentCursor {
                next_number: cursor.next_number + 1,
                next_decode_time: cursor.next_decode_time + options.duration as u64,
            };
        }
        Ok(pair)
    }

    /// Append one sample as a new fragment at the end of the file and return
    /// the fragment's bytes. Earlier boxes are left as they are.
    pub fn append_sample(&mut self, track_id: u32, data: Bytes, options: SampleOptions) -> Result<Bytes> {
        if self.authoring.as_ref().is_some_and(|a| !a.fragmented) {
            return Err(Error::unsupported(
                "fragments cannot be appended to a progressive movie being authored",
            ));
        }
        if self.authoring.is_none() && !self.finished {
            return Err(Error::unsupported("input has not been parsed to its end"));
        }
        let cursor = self
            .track(track_id)
            .ok_or(Error::TrackNotFound(track_id))?
            .cursor;

        let (mut moof, mut mdat) = self.create_single_sample_moof(track_id, data, &options)?;

        // An "extends to end" box stops being last once the fragment follows it.
        if let Some(last) = self.boxes.last_mut() {
            if last.layout == HeaderLayout::ToEnd {
                last.layout = HeaderLayout::Compact;
            }
        }
        moof.offset = self.output_len();
        mdat.offset = moof.offset + moof.encoded_size();

        let sample = Sample {
            track_id,
            number: cursor.next_number,
            data_offset: mdat.payload_offset(),
            size: mdat_payload_len(&mdat),
            duration: options.duration,
            dts: cursor.next_decode_time,
            cts_offset: options.cts_offset,
            is_sync: options.is_sync,
            description_index: options.description_index,
        };
        let bytes = serialize_boxes(&[moof.clone(), mdat.clone()], &self.stream)?;
        debug!(
            track_id,
            number = sample.number,
            offset = moof.offset,
            size = bytes.len(),
            "appended fragment"
        );

        if let Some(track) = self.tracks.get_mut(&track_id) {
            track.samples.extend([sample]);
        }
        self.moofs.push(self.boxes.len());
        self.boxes.push(moof);
        self.mdats.push(self.boxes.len());
        self.boxes.push(mdat);
        Ok(bytes)
    }

    /// Size of the file as it would be serialized.
    fn output_len(&self) -> u64 {
        self.boxes.iter().map(Mp4Box::encoded_size).sum()
    }

    /// The whole file.
    pub fn serialize(&self) -> Result<Bytes> {
        if let Some(authoring) = self.authoring.as_ref().filter(|a| !a.fragmented) {
            return authoring.serialize_progressive(self);
        }
        serialize_boxes(&self.boxes, &self.stream)
    }

    /// Write the whole file to `out`.
    pub fn write_to<W: Write>(&self, out: &mut W) -> Result<()> {
        if self.authoring.as_ref().is_some_and(|a| !a.fragmented) {
            out.write_all(&self.serialize()?)?;
            return Ok(());
        }
        write_boxes_to(&self.boxes, &self.stream, out)
    }

    /// `ftyp` + `moov` for fragmented output.
    pub fn initialization_segment(&self) -> Result<Bytes> {
        let ftyp = self.ftyp().ok_or(Error::MissingBox("ftyp"))?;
        let moov = self.moov().ok_or(Error::MissingBox("moov"))?;
        write_initialization_segment(ftyp, moov)
    }

    /// Indented dump of the whole box tree.
    pub fn dump(&self) -> String {
        self.boxes.iter().map(Mp4Box::dump).collect()
    }

    /// Movie summary.
    pub fn info(&self) -> MovieInfo {
        let file_type = match self.ftyp().and_then(Mp4Box::fields) {
            Some(BoxFields::FileType(ft)) => Some(ft),
            _ => None,
        };
        let header = match self
            .moov()
            .and_then(|moov| moov.child(BoxType::MVHD))
            .and_then(Mp4Box::fields)
        {
            Some(BoxFields::MovieHeader(h)) => Some(h),
            _ => None,
        };
        let timescale = header.map(|h| h.timescale).unwrap_or(0);
        let tracks: Vec<TrackInfo> = self.tracks().map(track_info).collect();
        let duration = header.map(|h| h.duration).unwrap_or(0).max(
            self.tracks()
                .filter(|t| t.timescale > 0)
                .map(|t| (t.duration_secs() * timescale as f64).round() as u64)
                .max()
                .unwrap_or(0),
        );
        let first_mdat = self.mdats.first().copied();

        MovieInfo {
            major_brand: file_type.map(|ft| ft.major_brand.to_string()),
            compatible_brands: file_type
                .map(|ft| ft.compatible_brands.iter().map(BoxType::to_string).collect())
                .unwrap_or_default(),
            timescale,
            duration,
            duration_secs: if timescale == 0 {
                0.0
            } else {
                duration as f64 / timescale as f64
            },
            is_fragmented: !self.moofs.is_empty()
                || self.moov().is_some_and(|m| m.child(BoxType::MVEX).is_some()),
            is_progressive: match (self.moov, first_mdat) {
                (Some(moov), Some(mdat)) => moov < mdat,
                (Some(_), None) => true,
                _ => false,
            },
            fragment_count: self.moofs.len(),
            tracks,
        }
    }
}

fn mdat_payload_len(mdat: &Mp4Box) -> u32 {
    match &mdat.body {
        BoxBody::MediaData(data) => data.len() as u32,
        _ => 0,
    }
}

fn track_info(track: &Track) -> TrackInfo {
    let params = track.descriptions.first().map(|d| d.params);
    let (channel_count, sample_rate) = match params {
        Some(EntryParams::Audio {
            channel_count,
            sample_rate,
            ..
        }) => (Some(channel_count), Some(sample_rate)),
        _ => (None, None),
    };
    let visual = track.handler.is_video() || matches!(params, Some(EntryParams::Visual { .. }));
    TrackInfo {
        track_id: track.track_id,
        handler: track.handler.name().to_string(),
        codec: track.codec(),
        language: track.language.clone(),
        timescale: track.timescale,
        duration: track.media_duration.max(track.samples.end_time()),
        duration_secs: track.duration_secs(),
        sample_count: track.samples.len(),
        sync_sample_count: track.samples.iter().filter(|s| s.is_sync).count(),
        width: visual.then_some(track.width),
        height: visual.then_some(track.height),
        channel_count,
        sample_rate,
        max_sync_interval_secs: track.max_sync_interval_secs(),
    }
}
