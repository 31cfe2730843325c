//! Track model built from a `trak` box.

use super::sample_table::{SampleTable, SampleTableBuilder};
use crate::boxes::{BoxBody, BoxFields, BoxType, HandlerBox, MediaHeader, Mp4Box, TrackHeader};
use crate::{Error, Result};
use bytes::Bytes;

/// Track handler type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub enum HandlerType {
    Video,
    Audio,
    Hint,
    Metadata,
    Subtitle,
    Text,
    System,
    Unknown([u8; 4]),
}

impl HandlerType {
    pub fn from_bytes(bytes: &[u8; 4]) -> Self {
        match bytes {
            b"vide" => Self::Video,
            b"soun" => Self::Audio,
            b"hint" => Self::Hint,
            b"meta" => Self::Metadata,
            b"subt" | b"sbtl" | b"clcp" => Self::Subtitle,
            b"text" => Self::Text,
            b"odsm" | b"sdsm" => Self::System,
            _ => Self::Unknown(*bytes),
        }
    }

    /// Four-cc written into `hdlr`.
    pub fn code(&self) -> [u8; 4] {
        match self {
            Self::Video => *b"vide",
            Self::Audio => *b"soun",
            Self::Hint => *b"hint",
            Self::Metadata => *b"meta",
            Self::Subtitle => *b"subt",
            Self::Text => *b"text",
            Self::System => *b"odsm",
            Self::Unknown(code) => *code,
        }
    }

    pub fn is_video(&self) -> bool {
        matches!(self, Self::Video)
    }

    pub fn is_audio(&self) -> bool {
        matches!(self, Self::Audio)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Video => "video",
            Self::Audio => "audio",
            Self::Hint => "hint",
            Self::Metadata => "metadata",
            Self::Subtitle => "subtitle",
            Self::Text => "text",
            Self::System => "system",
            Self::Unknown(_) => "unknown",
        }
    }
}

/// Codec-specific parameters of a sample entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub enum EntryParams {
    Visual { width: u16, height: u16 },
    Audio {
        channel_count: u16,
        sample_size: u16,
        sample_rate: u32,
    },
    Other,
}

/// One `stsd` entry.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleDescription {
    /// Coding format four-cc (`avc1`, `mp4a`, ...).
    pub format: BoxType,
    pub data_reference_index: u16,
    pub params: EntryParams,
    /// Payload of the decoder configuration child (`avcC`, `hvcC`, `esds`, ...).
    pub codec_config: Option<(BoxType, Bytes)>,
}

const CONFIG_BOXES: [&[u8; 4]; 9] = [
    b"avcC", b"hvcC", b"av1C", b"vpcC", b"esds", b"dOps", b"dfLa", b"dac3", b"dec3",
];

impl SampleDescription {
    fn from_entry(entry: &Mp4Box) -> Self {
        let prefix = entry.prefix();
        let u16_at = |at: usize| {
            prefix
                .get(at..at + 2)
                .map(|b| u16::from_be_bytes([b[0], b[1]]))
        };
        let u32_at = |at: usize| {
            prefix
                .get(at..at + 4)
                .map(|b| u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
        };

        // Visual entries carry 78 prefix bytes, audio entries at least 28.
        let params = match prefix.len() {
            78 => EntryParams::Visual {
                width: u16_at(24).unwrap_or(0),
                height: u16_at(26).unwrap_or(0),
            },
            len if len >= 28 && len != 38 => EntryParams::Audio {
                channel_count: u16_at(16).unwrap_or(0),
                sample_size: u16_at(18).unwrap_or(0),
                sample_rate: u32_at(24).unwrap_or(0) >> 16,
            },
            _ => EntryParams::Other,
        };

        let codec_config = entry
            .children()
            .iter()
            .find(|c| CONFIG_BOXES.iter().any(|code| c.box_type.0 == **code))
            .and_then(|c| match &c.body {
                BoxBody::Opaque(data) => Some((c.box_type, data.clone())),
                _ => None,
            });

        Self {
            format: entry.box_type,
            data_reference_index: u16_at(6).unwrap_or(1),
            params,
            codec_config,
        }
    }

    /// RFC 6381 style codec string. Only `avc1`/`avc3` get profile details.
    pub fn codec_string(&self) -> String {
        match &self.codec_config {
            Some((config, data)) if config.0 == *b"avcC" && data.len() >= 4 => format!(
                "{}.{:02x}{:02x}{:02x}",
                self.format, data[1], data[2], data[3]
            ),
            _ => self.format.to_string(),
        }
    }
}

/// Next sample number and decode time for fragments of a track.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FragmentCursor {
    pub next_number: u32,
    pub next_decode_time: u64,
}

impl Default for FragmentCursor {
    fn default() -> Self {
        Self {
            next_number: 1,
            next_decode_time: 0,
        }
    }
}

/// A track with its flattened samples.
#[derive(Debug, Clone)]
pub struct Track {
    pub track_id: u32,
    pub handler: HandlerType,
    pub handler_name: String,
    pub enabled: bool,
    /// Duration in the movie timescale, from `tkhd`.
    pub duration: u64,
    /// Media timescale, from `mdhd`.
    pub timescale: u32,
    /// Duration in the media timescale, from `mdhd`.
    pub media_duration: u64,
    pub language: String,
    /// Presentation size in pixels.
    pub width: u32,
    pub height: u32,
    pub descriptions: Vec<SampleDescription>,
    pub samples: SampleTable,
    pub cursor: FragmentCursor,
    /// Why the sample tables could not be flattened, if they could not.
    pub table_error: Option<String>,
}

impl Track {
    /// An empty track, as created by authoring.
    pub fn new(track_id: u32, handler: HandlerType, timescale: u32) -> Self {
        Self {
            track_id,
            handler,
            handler_name: String::new(),
            enabled: true,
            duration: 0,
            timescale,
            media_duration: 0,
            language: "und".to_string(),
            width: 0,
            height: 0,
            descriptions: Vec::new(),
            samples: SampleTable::default(),
            cursor: FragmentCursor::default(),
            table_error: None,
        }
    }

    /// Build a track from a parsed `trak`, flattening its sample tables.
    pub fn from_trak(trak: &Mp4Box) -> Result<Self> {
        let mut track = Self::describe(trak)?;
        track.load_samples(trak)?;
        Ok(track)
    }

    /// Header, handler and sample descriptions of a `trak`, without samples.
    pub fn describe(trak: &Mp4Box) -> Result<Self> {
        let tkhd = trak
            .child(BoxType::TKHD)
            .ok_or(Error::MissingBox("tkhd"))?;
        let header: &TrackHeader = match tkhd.fields() {
            Some(BoxFields::TrackHeader(h)) => h,
            _ => {
                return Err(Error::structural(
                    BoxType::TKHD,
                    tkhd.offset,
                    "track header could not be decoded",
                ))
            }
        };

        let mdia = trak
            .child(BoxType::MDIA)
            .ok_or(Error::MissingBox("mdia"))?;
        let mdhd: Option<&MediaHeader> = match mdia.child(BoxType::MDHD).and_then(Mp4Box::fields) {
            Some(BoxFields::MediaHeader(h)) => Some(h),
            _ => None,
        };
        let hdlr: Option<&HandlerBox> = match mdia.child(BoxType::HDLR).and_then(Mp4Box::fields) {
            Some(BoxFields::Handler(h)) => Some(h),
            _ => None,
        };

        let mut track = Self::new(
            header.track_id,
            hdlr.map(|h| HandlerType::from_bytes(&h.handler_type.0))
                .unwrap_or(HandlerType::Unknown([0; 4])),
            mdhd.map(|m| m.timescale).unwrap_or(0),
        );
        track.enabled = tkhd.flags() & TrackHeader::ENABLED != 0;
        track.duration = header.duration;
        track.width = header.width_px();
        track.height = header.height_px();
        if let Some(mdhd) = mdhd {
            track.media_duration = mdhd.duration;
            track.language = mdhd.language_code();
        }
        if let Some(hdlr) = hdlr {
            track.handler_name = hdlr.name();
        }

        if let Some(stsd) = mdia.descend(&[BoxType::MINF, BoxType::STBL, BoxType::STSD]) {
            track.descriptions = stsd
                .children()
                .iter()
                .map(SampleDescription::from_entry)
                .collect();
        }
        Ok(track)
    }

    /// Flatten the sample tables of `trak` into this track's samples.
    pub fn load_samples(&mut self, trak: &Mp4Box) -> Result<()> {
        let stbl = trak
            .descend(&[BoxType::MDIA, BoxType::MINF, BoxType::STBL])
            .ok_or(Error::MissingBox("stbl"))?;
        self.samples = SampleTableBuilder::from_stbl(self.track_id, stbl)?.build()?;
        self.sync_cursor();
        Ok(())
    }

    /// Align the fragment cursor with the end of the sample list.
    pub(crate) fn sync_cursor(&mut self) {
        self.cursor = FragmentCursor {
            next_number: self.samples.len() as u32 + 1,
            next_decode_time: self.samples.end_time(),
        };
    }

    /// Media duration in seconds, falling back to the sample list for
    /// fragmented tracks.
    pub fn duration_secs(&self) -> f64 {
        if self.timescale == 0 {
            return 0.0;
        }
        let duration = self.media_duration.max(self.samples.end_time());
        duration as f64 / self.timescale as f64
    }

    /// Codec string of the first sample description.
    pub fn codec(&self) -> Option<String> {
        self.descriptions.first().map(SampleDescription::codec_string)
    }

    /// Largest gap between consecutive sync samples, in seconds.
    ///
    /// Returns `None` with fewer than 2 sync samples.
    pub fn max_sync_interval_secs(&self) -> Option<f64> {
        if self.timescale == 0 {
            return None;
        }
        let sync_dts: Vec<u64> = self
            .samples
            .iter()
            .filter(|s| s.is_sync)
            .map(|s| s.dts)
            .collect();
        let max_interval = sync_dts
            .windows(2)
            .map(|w| w[1].saturating_sub(w[0]))
            .max()?;
        Some(max_interval as f64 / self.timescale as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::boxes::{
        BoxFields, ChunkOffsets, FullBoxHeader, HandlerBox, SampleSizes, SampleToChunkEntry,
        TimeToSampleEntry,
    };

    fn avc1_entry(width: u16, height: u16) -> Mp4Box {
        let mut prefix = vec![0u8; 78];
        prefix[7] = 1;
        prefix[24..26].copy_from_slice(&width.to_be_bytes());
        prefix[26..28].copy_from_slice(&height.to_be_bytes());
        Mp4Box::full_container(
            BoxType::AVC1,
            None,
            prefix,
            vec![Mp4Box::opaque(BoxType::AVCC, vec![1, 0x64, 0x00, 0x1f, 0xff])],
        )
    }

    fn trak(samples: u32) -> Mp4Box {
        let mut tkhd = TrackHeader::new(7);
        tkhd.width = 1280 << 16;
        tkhd.height = 720 << 16;
        let stsd = Mp4Box::full_container(
            BoxType::STSD,
            Some(FullBoxHeader::new(0, 0)),
            vec![0, 0, 0, 1],
            vec![avc1_entry(1280, 720)],
        );
        let stbl = Mp4Box::container(
            BoxType::STBL,
            vec![
                stsd,
                Mp4Box::full_fields(
                    BoxType::STTS,
                    0,
                    0,
                    BoxFields::TimeToSample(vec![TimeToSampleEntry {
                        sample_count: samples,
                        sample_delta: 512,
                    }]),
                ),
                Mp4Box::full_fields(
                    BoxType::STSC,
                    0,
                    0,
                    BoxFields::SampleToChunk(vec![SampleToChunkEntry {
                        first_chunk: 1,
                        samples_per_chunk: samples,
                        sample_description_index: 1,
                    }]),
                ),
                Mp4Box::full_fields(
                    BoxType::STSZ,
                    0,
                    0,
                    BoxFields::SampleSizes(SampleSizes {
                        sample_size: 10,
                        sample_count: samples,
                        entries: Vec::new(),
                    }),
                ),
                Mp4Box::full_fields(
                    BoxType::STCO,
                    0,
                    0,
                    BoxFields::ChunkOffsets(ChunkOffsets {
                        large: false,
                        offsets: vec![1000],
                    }),
                ),
            ],
        );
        Mp4Box::container(
            BoxType::TRAK,
            vec![
                Mp4Box::full_fields(
                    BoxType::TKHD,
                    0,
                    TrackHeader::ENABLED | TrackHeader::IN_MOVIE,
                    BoxFields::TrackHeader(tkhd),
                ),
                Mp4Box::container(
                    BoxType::MDIA,
                    vec![
                        Mp4Box::full_fields(
                            BoxType::MDHD,
                            0,
                            0,
                            BoxFields::MediaHeader(MediaHeader::new(12800, "eng")),
                        ),
                        Mp4Box::full_fields(
                            BoxType::HDLR,
                            0,
                            0,
                            BoxFields::Handler(HandlerBox::new(BoxType(*b"vide"), "VideoHandler")),
                        ),
                        Mp4Box::container(BoxType::MINF, vec![stbl]),
                    ],
                ),
            ],
        )
    }

    #[test]
    fn test_handler_type() {
        assert_eq!(HandlerType::from_bytes(b"vide"), HandlerType::Video);
        assert_eq!(HandlerType::from_bytes(b"soun"), HandlerType::Audio);
        assert_eq!(HandlerType::from_bytes(b"sbtl"), HandlerType::Subtitle);
        assert_eq!(HandlerType::from_bytes(b"meta"), HandlerType::Metadata);
        assert!(matches!(HandlerType::from_bytes(b"xxxx"), HandlerType::Unknown(_)));
        assert_eq!(&HandlerType::Audio.code(), b"soun");
    }

    #[test]
    fn test_from_trak() {
        let track = Track::from_trak(&trak(3)).unwrap();
        assert_eq!(track.track_id, 7);
        assert!(track.handler.is_video());
        assert!(track.enabled);
        assert_eq!(track.timescale, 12800);
        assert_eq!(track.language, "eng");
        assert_eq!(track.handler_name, "VideoHandler");
        assert_eq!((track.width, track.height), (1280, 720));
        assert_eq!(track.samples.len(), 3);
        assert_eq!(track.samples.get(3).unwrap().data_offset, 1020);
        assert_eq!(
            track.cursor,
            FragmentCursor {
                next_number: 4,
                next_decode_time: 1536
            }
        );

        let desc = &track.descriptions[0];
        assert_eq!(desc.format, BoxType::AVC1);
        assert_eq!(desc.data_reference_index, 1);
        assert_eq!(
            desc.params,
            EntryParams::Visual {
                width: 1280,
                height: 720
            }
        );
        assert_eq!(track.codec().as_deref(), Some("avc1.64001f"));
    }

    #[test]
    fn test_audio_entry_params() {
        let mut prefix = vec![0u8; 28];
        prefix[7] = 1;
        prefix[16..18].copy_from_slice(&2u16.to_be_bytes());
        prefix[18..20].copy_from_slice(&16u16.to_be_bytes());
        prefix[24..28].copy_from_slice(&(48000u32 << 16).to_be_bytes());
        let entry = Mp4Box::full_container(BoxType::MP4A, None, prefix, Vec::new());
        let desc = SampleDescription::from_entry(&entry);
        assert_eq!(
            desc.params,
            EntryParams::Audio {
                channel_count: 2,
                sample_size: 16,
                sample_rate: 48000
            }
        );
        assert_eq!(desc.codec_string(), "mp4a");
    }

    #[test]
    fn test_max_sync_interval() {
        use crate::mp4::Sample;

        // Sync samples at 0s, 2s, 5s.
        let mut track = Track::new(1, HandlerType::Video, 1000);
        track.samples = SampleTable::new(
            (0..6u32)
                .map(|i| Sample {
                    track_id: 1,
                    number: i + 1,
                    data_offset: i as u64 * 100,
                    size: 100,
                    duration: 1000,
                    dts: i as u64 * 1000,
                    cts_offset: 0,
                    is_sync: matches!(i, 0 | 2 | 5),
                    description_index: 1,
                })
                .collect(),
        );
        let interval = track.max_sync_interval_secs().unwrap();
        assert!((interval - 3.0).abs() < 0.001);

        track.samples = SampleTable::default();
        assert!(track.max_sync_interval_secs().is_none());
    }

    #[test]
    fn test_missing_tkhd() {
        let trak = Mp4Box::container(BoxType::TRAK, Vec::new());
        assert!(matches!(Track::from_trak(&trak), Err(Error::MissingBox("tkhd"))));
    }
}
