//! Movie structure builders.
//!
//! This module builds box trees for new movies:
//! - `ftyp` and `moov` with one `trak` per [`TrackOptions`]
//! - `mvex`/`trex` for fragmented output
//! - Fragment `moof` boxes (see [`MoofBuilder`])

mod moof;

pub use moof::{FragmentSample, MoofBuilder};

use crate::boxes::{
    default_registry, BoxFields, BoxType, FileType, FullBoxHeader, HandlerBox, MediaHeader,
    MovieHeader, Mp4Box, SampleSizes, TrackExtends, TrackHeader,
};
use crate::mp4::HandlerType;
use crate::writer::write_initialization_segment;
use crate::Result;
use bytes::{BufMut, Bytes, BytesMut};

/// Description of a track to create.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackOptions {
    /// Assigned automatically when `None`.
    pub track_id: Option<u32>,
    pub handler: HandlerType,
    /// Media timescale.
    pub timescale: u32,
    pub language: String,
    pub name: String,
    /// Sample entry four-cc.
    pub format: BoxType,
    pub width: u16,
    pub height: u16,
    pub channel_count: u16,
    pub sample_size: u16,
    pub sample_rate: u32,
    /// Decoder configuration box placed in the sample entry.
    pub codec_config: Option<(BoxType, Bytes)>,
}

impl TrackOptions {
    /// An `avc1` video track at 90 kHz.
    pub fn video(width: u16, height: u16) -> Self {
        Self {
            track_id: None,
            handler: HandlerType::Video,
            timescale: 90000,
            language: "und".to_string(),
            name: "VideoHandler".to_string(),
            format: BoxType::AVC1,
            width,
            height,
            channel_count: 0,
            sample_size: 0,
            sample_rate: 0,
            codec_config: None,
        }
    }

    /// An `mp4a` audio track timed in samples.
    pub fn audio(sample_rate: u32, channel_count: u16) -> Self {
        Self {
            track_id: None,
            handler: HandlerType::Audio,
            timescale: sample_rate,
            language: "und".to_string(),
            name: "SoundHandler".to_string(),
            format: BoxType::MP4A,
            width: 0,
            height: 0,
            channel_count,
            sample_size: 16,
            sample_rate,
            codec_config: None,
        }
    }

    pub fn with_track_id(mut self, track_id: u32) -> Self {
        self.track_id = Some(track_id);
        self
    }

    pub fn with_timescale(mut self, timescale: u32) -> Self {
        self.timescale = timescale;
        self
    }

    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = language.into();
        self
    }

    /// Set the decoder configuration (`avcC`, `esds`, ... payload).
    pub fn with_codec_config(mut self, box_type: BoxType, data: impl Into<Bytes>) -> Self {
        self.codec_config = Some((box_type, data.into()));
        self
    }
}

/// `ftyp` (or `styp`) with the given brands.
pub fn build_file_type(box_type: BoxType, major_brand: BoxType, minor_version: u32, brands: &[BoxType]) -> Mp4Box {
    Mp4Box::plain_fields(
        box_type,
        BoxFields::FileType(FileType {
            major_brand,
            minor_version,
            compatible_brands: brands.to_vec(),
        }),
    )
}

/// `mvhd` with the given timescale and next free track ID.
pub fn build_mvhd(timescale: u32, duration: u64, next_track_id: u32) -> Mp4Box {
    let header = MovieHeader {
        timescale,
        duration,
        next_track_id,
        ..MovieHeader::default()
    };
    Mp4Box::full_fields(
        BoxType::MVHD,
        u8::from(duration > u32::MAX as u64),
        0,
        BoxFields::MovieHeader(header),
    )
}

/// `trak` with empty sample tables.
pub fn build_trak(track_id: u32, options: &TrackOptions) -> Mp4Box {
    let mut tkhd = TrackHeader::new(track_id);
    if options.handler.is_video() {
        tkhd.width = (options.width as u32) << 16;
        tkhd.height = (options.height as u32) << 16;
    }
    if options.handler.is_audio() {
        tkhd.volume = 0x0100;
    }
    let tkhd = Mp4Box::full_fields(
        BoxType::TKHD,
        0,
        TrackHeader::ENABLED | TrackHeader::IN_MOVIE | TrackHeader::IN_PREVIEW,
        BoxFields::TrackHeader(tkhd),
    );

    let mdhd = Mp4Box::full_fields(
        BoxType::MDHD,
        0,
        0,
        BoxFields::MediaHeader(MediaHeader::new(options.timescale, &options.language)),
    );
    let hdlr = Mp4Box::full_fields(
        BoxType::HDLR,
        0,
        0,
        BoxFields::Handler(HandlerBox::new(BoxType(options.handler.code()), &options.name)),
    );

    let media_header = match options.handler {
        HandlerType::Video => Mp4Box::opaque_full(BoxType::VMHD, 0, 1, vec![0u8; 8]),
        HandlerType::Audio => Mp4Box::opaque_full(BoxType::SMHD, 0, 0, vec![0u8; 4]),
        _ => Mp4Box::opaque_full(BoxType::NMHD, 0, 0, Vec::new()),
    };
    let dinf = Mp4Box::container(
        BoxType::DINF,
        vec![Mp4Box::full_container(
            BoxType::DREF,
            Some(FullBoxHeader::new(0, 0)),
            1u32.to_be_bytes().to_vec(),
            // Flag 1: media data is in the same file.
            vec![Mp4Box::opaque_full(BoxType::URL, 0, 1, Vec::new())],
        )],
    );

    let stsd = Mp4Box::full_container(
        BoxType::STSD,
        Some(FullBoxHeader::new(0, 0)),
        1u32.to_be_bytes().to_vec(),
        vec![build_sample_entry(options)],
    );
    let mut stbl_children = vec![stsd];
    stbl_children.extend(empty_sample_tables());
    let stbl = Mp4Box::container(BoxType::STBL, stbl_children);
    let minf = Mp4Box::container(BoxType::MINF, vec![media_header, dinf, stbl]);
    let mdia = Mp4Box::container(BoxType::MDIA, vec![mdhd, hdlr, minf]);
    Mp4Box::container(BoxType::TRAK, vec![tkhd, mdia])
}

/// `stts`, `stsc`, `stsz` and `stco` without entries.
pub fn empty_sample_tables() -> Vec<Mp4Box> {
    vec![
        Mp4Box::full_fields(BoxType::STTS, 0, 0, BoxFields::TimeToSample(Vec::new())),
        Mp4Box::full_fields(BoxType::STSC, 0, 0, BoxFields::SampleToChunk(Vec::new())),
        Mp4Box::full_fields(
            BoxType::STSZ,
            0,
            0,
            BoxFields::SampleSizes(SampleSizes::default()),
        ),
        Mp4Box::full_fields(
            BoxType::STCO,
            0,
            0,
            BoxFields::ChunkOffsets(Default::default()),
        ),
    ]
}

/// Sample entry for the track's coding format.
pub fn build_sample_entry(options: &TrackOptions) -> Mp4Box {
    let mut prefix = BytesMut::with_capacity(78);
    prefix.put_slice(&[0; 6]); // reserved
    prefix.put_u16(1); // data reference index
    match options.handler {
        HandlerType::Video => {
            prefix.put_u16(0); // pre_defined
            prefix.put_u16(0); // reserved
            prefix.put_slice(&[0; 12]); // pre_defined
            prefix.put_u16(options.width);
            prefix.put_u16(options.height);
            prefix.put_u32(0x0048_0000); // horiz resolution 72 dpi
            prefix.put_u32(0x0048_0000); // vert resolution 72 dpi
            prefix.put_u32(0); // reserved
            prefix.put_u16(1); // frame count
            prefix.put_slice(&[0; 32]); // compressor name
            prefix.put_u16(0x0018); // depth
            prefix.put_i16(-1); // pre_defined
        }
        HandlerType::Audio => {
            prefix.put_u32(0); // reserved
            prefix.put_u32(0); // reserved
            prefix.put_u16(options.channel_count);
            prefix.put_u16(options.sample_size);
            prefix.put_u16(0); // pre_defined
            prefix.put_u16(0); // reserved
            prefix.put_u32(options.sample_rate << 16);
        }
        _ => {}
    }

    let children = options
        .codec_config
        .iter()
        .map(|(box_type, data)| config_box(*box_type, data.clone()))
        .collect();
    Mp4Box::full_container(options.format, None, prefix.freeze(), children)
}

fn config_box(box_type: BoxType, data: Bytes) -> Mp4Box {
    let full = default_registry()
        .lookup(box_type)
        .is_some_and(|spec| spec.category.is_full());
    if full {
        Mp4Box::opaque_full(box_type, 0, 0, data)
    } else {
        Mp4Box::opaque(box_type, data)
    }
}

/// `mvex` with a default `trex` per track.
pub fn build_mvex(track_ids: impl IntoIterator<Item = u32>) -> Mp4Box {
    Mp4Box::container(
        BoxType::MVEX,
        track_ids
            .into_iter()
            .map(|id| {
                Mp4Box::full_fields(
                    BoxType::TREX,
                    0,
                    0,
                    BoxFields::TrackExtends(TrackExtends::new(id)),
                )
            })
            .collect(),
    )
}

/// Initialization segment: `ftyp` + `moov` (with `mvex`).
#[derive(Debug, Clone)]
pub struct InitSegment {
    pub ftyp: Mp4Box,
    pub moov: Mp4Box,
    /// Serialized init segment data.
    pub data: Bytes,
}

impl InitSegment {
    /// Create a new init segment builder.
    pub fn builder() -> InitSegmentBuilder {
        InitSegmentBuilder::new()
    }
}

/// Builder for creating init segments.
#[derive(Debug, Clone)]
pub struct InitSegmentBuilder {
    timescale: u32,
    major_brand: BoxType,
    brands: Vec<BoxType>,
    tracks: Vec<TrackOptions>,
}

impl InitSegmentBuilder {
    /// Create a new builder.
    pub fn new() -> Self {
        Self {
            timescale: 1000,
            major_brand: BoxType(*b"iso5"),
            brands: [b"iso5", b"iso6", b"mp41"]
                .iter()
                .map(|b| BoxType(**b))
                .collect(),
            tracks: Vec::new(),
        }
    }

    /// Set movie timescale.
    pub fn timescale(mut self, ts: u32) -> Self {
        self.timescale = ts;
        self
    }

    pub fn brands(mut self, major: BoxType, compatible: Vec<BoxType>) -> Self {
        self.major_brand = major;
        self.brands = compatible;
        self
    }

    /// Add a track. Tracks without an ID are numbered from 1.
    pub fn track(mut self, options: TrackOptions) -> Self {
        self.tracks.push(options);
        self
    }

    /// Build the init segment.
    pub fn build(self) -> Result<InitSegment> {
        let ftyp = build_file_type(BoxType::FTYP, self.major_brand, 0, &self.brands);

        let mut ids = Vec::with_capacity(self.tracks.len());
        let mut next = 1;
        for options in &self.tracks {
            let id = options.track_id.unwrap_or(next);
            next = next.max(id + 1);
            ids.push(id);
        }

        let mut children = vec![build_mvhd(self.timescale, 0, next)];
        children.extend(
            self.tracks
                .iter()
                .zip(&ids)
                .map(|(options, id)| build_trak(*id, options)),
        );
        children.push(build_mvex(ids.iter().copied()));
        let moov = Mp4Box::container(BoxType::MOOV, children);

        let data = write_initialization_segment(&ftyp, &moov)?;
        Ok(InitSegment { ftyp, moov, data })
    }
}

impl Default for InitSegmentBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mp4::Mp4File;

    #[test]
    fn test_init_segment_parses_back() {
        let init = InitSegment::builder()
            .track(TrackOptions::video(1920, 1080).with_codec_config(BoxType::AVCC, vec![1, 0x64, 0, 0x28]))
            .track(TrackOptions::audio(48000, 2))
            .build()
            .unwrap();

        let file = Mp4File::parse_bytes(init.data.clone()).unwrap();
        assert!(file.warnings().is_empty(), "{:?}", file.warnings());
        assert_eq!(file.tracks().count(), 2);

        let video = file.track(1).unwrap();
        assert!(video.handler.is_video());
        assert_eq!((video.width, video.height), (1920, 1080));
        assert_eq!(video.timescale, 90000);
        assert_eq!(video.codec().as_deref(), Some("avc1.640028"));
        assert!(video.samples.is_empty());

        let audio = file.track(2).unwrap();
        assert!(audio.handler.is_audio());
        assert_eq!(audio.timescale, 48000);
        assert_eq!(file.trex(2).map(|t| t.default_sample_description_index), Some(1));

        // Parsing keeps every byte.
        assert_eq!(file.serialize().unwrap(), init.data);
    }

    #[test]
    fn test_explicit_track_ids() {
        let init = InitSegment::builder()
            .track(TrackOptions::audio(44100, 1).with_track_id(5))
            .track(TrackOptions::video(640, 360))
            .build()
            .unwrap();
        let ids: Vec<u32> = init
            .moov
            .children_of(BoxType::TRAK)
            .filter_map(|trak| match trak.child(BoxType::TKHD)?.fields()? {
                BoxFields::TrackHeader(h) => Some(h.track_id),
                _ => None,
            })
            .collect();
        assert_eq!(ids, vec![5, 6]);
        match init.moov.child(BoxType::MVHD).and_then(Mp4Box::fields) {
            Some(BoxFields::MovieHeader(h)) => assert_eq!(h.next_track_id, 7),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_esds_is_written_as_full_box() {
        let entry = build_sample_entry(&TrackOptions::audio(48000, 2).with_codec_config(BoxType::ESDS, vec![3, 0]));
        let esds = entry.child(BoxType::ESDS).unwrap();
        assert!(esds.full.is_some());
        assert_eq!(entry.prefix().len(), 28);
    }
}
