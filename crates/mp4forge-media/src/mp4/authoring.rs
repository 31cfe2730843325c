//! Building movies from scratch.
//!
//! A movie starts as `ftyp` + `moov` with an `mvhd`; tracks are added as
//! `trak` boxes with empty tables. Progressive movies collect sample data in
//! memory and get their tables from [`encode_sample_table`] when serialized.
//! Fragmented movies get `mvex` and grow through [`Mp4File::append_sample`].

use super::sample_table::{encode_sample_table, Sample};
use super::track::Track;
use super::Mp4File;
use crate::boxes::{BoxFields, BoxType, Mp4Box};
use crate::fmp4::{build_file_type, build_mvex, build_mvhd, build_trak, TrackOptions};
use crate::writer::{serialize_boxes, NoMedia};
use crate::{Error, Result};
use bytes::{Bytes, BytesMut};
use tracing::debug;

/// Options of [`Mp4File::new_movie`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MovieOptions {
    /// Movie timescale.
    pub timescale: u32,
    pub major_brand: BoxType,
    pub minor_version: u32,
    pub compatible_brands: Vec<BoxType>,
    /// Write `mvex` and take samples as fragments.
    pub fragmented: bool,
}

impl Default for MovieOptions {
    fn default() -> Self {
        Self {
            timescale: 1000,
            major_brand: BoxType(*b"isom"),
            minor_version: 0x200,
            compatible_brands: [b"isom", b"iso2", b"mp41"]
                .iter()
                .map(|b| BoxType(**b))
                .collect(),
            fragmented: false,
        }
    }
}

impl MovieOptions {
    /// Fragmented movie with `iso5`/`iso6` brands.
    pub fn fragmented() -> Self {
        Self {
            major_brand: BoxType(*b"iso5"),
            minor_version: 0,
            compatible_brands: [b"iso5", b"iso6", b"mp41"]
                .iter()
                .map(|b| BoxType(**b))
                .collect(),
            fragmented: true,
            ..Self::default()
        }
    }
}

/// Per-sample options of [`Mp4File::add_sample`] and [`Mp4File::append_sample`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SampleOptions {
    /// Duration in the media timescale.
    pub duration: u32,
    pub cts_offset: i32,
    pub is_sync: bool,
    pub description_index: u32,
}

impl Default for SampleOptions {
    fn default() -> Self {
        Self {
            duration: 0,
            cts_offset: 0,
            is_sync: true,
            description_index: 1,
        }
    }
}

impl SampleOptions {
    /// A sync sample of the given duration.
    pub fn new(duration: u32) -> Self {
        Self {
            duration,
            ..Self::default()
        }
    }

    pub fn sync(mut self, is_sync: bool) -> Self {
        self.is_sync = is_sync;
        self
    }

    pub fn cts_offset(mut self, offset: i32) -> Self {
        self.cts_offset = offset;
        self
    }

    pub fn description_index(mut self, index: u32) -> Self {
        self.description_index = index;
        self
    }
}

/// State of a movie being authored.
#[derive(Debug, Default)]
pub(super) struct Authoring {
    pub(super) fragmented: bool,
    /// Sample data of a progressive movie, in the order samples were added.
    /// Sample offsets point into this buffer until the movie is serialized.
    media: BytesMut,
}

/// Passes allowed for chunk offsets to settle (a switch to `co64` grows `moov`).
const LAYOUT_PASSES: usize = 4;

impl Authoring {
    pub(super) fn read(&self, offset: u64, len: u64) -> Option<Bytes> {
        if self.fragmented {
            return None;
        }
        let start = usize::try_from(offset).ok()?;
        let end = start.checked_add(usize::try_from(len).ok()?)?;
        self.media.get(start..end).map(Bytes::copy_from_slice)
    }

    /// `ftyp`, `moov` with final tables, then one `mdat` holding all samples.
    pub(super) fn serialize_progressive(&self, file: &Mp4File) -> Result<Bytes> {
        let ftyp = file.ftyp().ok_or(Error::MissingBox("ftyp"))?;
        let moov = file.moov().ok_or(Error::MissingBox("moov"))?;
        let mdat = Mp4Box::mdat(Bytes::copy_from_slice(&self.media));

        let mut base = 0;
        for _ in 0..LAYOUT_PASSES {
            let laid_out = with_tables(moov, file, base)?;
            let data_start = ftyp.encoded_size() + laid_out.encoded_size() + mdat.header_len();
            if data_start == base {
                debug!(size = data_start + mdat.payload_len(), "serialized progressive movie");
                return serialize_boxes(&[ftyp.clone(), laid_out, mdat], &NoMedia);
            }
            base = data_start;
        }
        Err(Error::structural(
            BoxType::MOOV,
            0,
            "chunk offsets did not settle",
        ))
    }
}

/// Copy of `moov` whose tracks carry tables for their samples, with sample
/// data starting at file position `base`.
fn with_tables(moov: &Mp4Box, file: &Mp4File, base: u64) -> Result<Mp4Box> {
    let mut moov = moov.clone();
    let movie_timescale = match moov.child(BoxType::MVHD).and_then(Mp4Box::fields) {
        Some(BoxFields::MovieHeader(h)) => h.timescale,
        _ => return Err(Error::MissingBox("mvhd")),
    };
    let mut movie_duration = 0;

    let children = moov.children_mut().ok_or(Error::MissingBox("moov"))?;
    for trak in children.iter_mut().filter(|c| c.box_type == BoxType::TRAK) {
        let track_id = match trak.child(BoxType::TKHD).and_then(Mp4Box::fields) {
            Some(BoxFields::TrackHeader(h)) => h.track_id,
            _ => return Err(Error::MissingBox("tkhd")),
        };
        let track = file.track(track_id).ok_or(Error::TrackNotFound(track_id))?;
        let shifted: Vec<Sample> = track
            .samples
            .iter()
            .map(|s| Sample {
                data_offset: s.data_offset + base,
                ..*s
            })
            .collect();

        let media_duration = track.samples.end_time();
        let track_duration = scale(media_duration, track.timescale, movie_timescale);
        movie_duration = movie_duration.max(track_duration);
        set_durations(trak, track_duration, media_duration);

        let stbl = trak
            .child_mut(BoxType::MDIA)
            .and_then(|mdia| mdia.child_mut(BoxType::MINF))
            .and_then(|minf| minf.child_mut(BoxType::STBL))
            .and_then(Mp4Box::children_mut)
            .ok_or(Error::MissingBox("stbl"))?;
        stbl.retain(|c| c.box_type == BoxType::STSD);
        stbl.extend(encode_sample_table(&shifted));
    }

    if let Some(mvhd) = moov.child_mut(BoxType::MVHD) {
        set_duration_field(mvhd, movie_duration);
    }
    Ok(moov)
}

fn scale(value: u64, from: u32, to: u32) -> u64 {
    if from == 0 {
        return 0;
    }
    (value as u128 * to as u128 / from as u128) as u64
}

fn set_durations(trak: &mut Mp4Box, track_duration: u64, media_duration: u64) {
    if let Some(tkhd) = trak.child_mut(BoxType::TKHD) {
        set_duration_field(tkhd, track_duration);
    }
    if let Some(mdhd) = trak
        .child_mut(BoxType::MDIA)
        .and_then(|mdia| mdia.child_mut(BoxType::MDHD))
    {
        set_duration_field(mdhd, media_duration);
    }
}

/// Set the duration of an `mvhd`/`tkhd`/`mdhd`, moving to version 1 when needed.
fn set_duration_field(node: &mut Mp4Box, duration: u64) {
    let wide = duration > u32::MAX as u64;
    match node.fields_mut() {
        Some(BoxFields::MovieHeader(h)) => h.duration = duration,
        Some(BoxFields::TrackHeader(h)) => h.duration = duration,
        Some(BoxFields::MediaHeader(h)) => h.duration = duration,
        _ => return,
    }
    if wide {
        if let Some(full) = node.full.as_mut() {
            full.version = 1;
        }
    }
}

impl Mp4File {
    /// Start a new movie with no tracks.
    pub fn new_movie(options: MovieOptions) -> Self {
        let ftyp = build_file_type(
            BoxType::FTYP,
            options.major_brand,
            options.minor_version,
            &options.compatible_brands,
        );
        let mut moov_children = vec![build_mvhd(options.timescale, 0, 1)];
        if options.fragmented {
            moov_children.push(build_mvex(std::iter::empty()));
        }
        let moov = Mp4Box::container(BoxType::MOOV, moov_children);

        let mut file = Self::open_for_streaming();
        file.boxes = vec![ftyp, moov];
        file.ftyp = Some(0);
        file.moov = Some(1);
        file.finished = true;
        file.authoring = Some(Authoring {
            fragmented: options.fragmented,
            media: BytesMut::new(),
        });
        file
    }

    /// Add a track to a movie being authored and return its ID.
    pub fn add_track(&mut self, options: TrackOptions) -> Result<u32> {
        let fragmented = match &self.authoring {
            Some(authoring) => authoring.fragmented,
            None => return Err(Error::unsupported("tracks can only be added to new movies")),
        };
        let moov_index = self.moov.ok_or(Error::MissingBox("moov"))?;
        let moov = &mut self.boxes[moov_index];

        let next_track_id = match moov.child(BoxType::MVHD).and_then(Mp4Box::fields) {
            Some(BoxFields::MovieHeader(h)) => h.next_track_id,
            _ => return Err(Error::MissingBox("mvhd")),
        };
        let track_id = options.track_id.unwrap_or(next_track_id);
        // u32::MAX would leave no next_track_id to record in mvhd.
        if track_id == 0 || track_id == u32::MAX || self.tracks.contains_key(&track_id) {
            return Err(Error::unsupported(format!("track ID {track_id} is not available")));
        }

        let trak = build_trak(track_id, &options);
        let track = Track::from_trak(&trak)?;

        let children = moov.children_mut().ok_or(Error::MissingBox("moov"))?;
        let at = children
            .iter()
            .position(|c| c.box_type == BoxType::MVEX)
            .unwrap_or(children.len());
        children.insert(at, trak);
        if let Some(Some(BoxFields::MovieHeader(h))) =
            moov.child_mut(BoxType::MVHD).map(Mp4Box::fields_mut)
        {
            h.next_track_id = h.next_track_id.max(track_id + 1);
        }
        if fragmented {
            if let Some(mvex) = moov.child_mut(BoxType::MVEX).and_then(Mp4Box::children_mut) {
                let trex = build_mvex([track_id]);
                mvex.extend(trex.children().iter().cloned());
                if let Some(BoxFields::TrackExtends(defaults)) =
                    trex.children().first().and_then(Mp4Box::fields)
                {
                    self.trex.insert(track_id, *defaults);
                }
            }
        }

        debug!(track_id, handler = track.handler.name(), "added track");
        self.tracks.insert(track_id, track);
        Ok(track_id)
    }

    /// Add a sample to a progressive movie being authored. The returned
    /// sample's offset is relative to the media data until the movie is
    /// serialized.
    pub fn add_sample(&mut self, track_id: u32, data: Bytes, options: SampleOptions) -> Result<Sample> {
        let authoring = match self.authoring.as_mut() {
            Some(authoring) if !authoring.fragmented => authoring,
            Some(_) => {
                return Err(Error::unsupported(
                    "fragmented movies take samples through append_sample",
                ))
            }
            None => return Err(Error::unsupported("samples can only be added to new movies")),
        };
        let track = self
            .tracks
            .get_mut(&track_id)
            .ok_or(Error::TrackNotFound(track_id))?;
        let size = u32::try_from(data.len())
            .map_err(|_| Error::unsupported("sample larger than 4 GiB"))?;

        let sample = Sample {
            track_id,
            number: track.cursor.next_number,
            data_offset: authoring.media.len() as u64,
            size,
            duration: options.duration,
            dts: track.cursor.next_decode_time,
            cts_offset: options.cts_offset,
            is_sync: options.is_sync,
            description_index: options.description_index,
        };
        authoring.media.extend_from_slice(&data);
        track.samples.extend([sample]);
        track.sync_cursor();
        Ok(sample)
    }
}
