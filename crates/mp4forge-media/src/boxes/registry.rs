//! Box type catalog.
//!
//! The registry maps a four-cc (or a `uuid` extended type) to what the parser
//! needs to know about the box: whether it carries a full-box header, whether
//! its payload is a list of child boxes, which children are expected and how
//! its fields are decoded. Codes that are not registered parse as opaque boxes.

use super::fields::{self, FieldDecoder};
use super::BoxType;
use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

/// Media family of a sample entry, which fixes the length of its prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    /// 78-byte prefix (dimensions, resolution, compressor name, depth).
    Visual,
    /// 28-byte prefix, extended by the sound description version.
    Audio,
    /// 3GPP timed text, 38-byte prefix.
    Text,
}

impl MediaKind {
    /// Prefix length of a sample entry whose first bytes are `head`.
    ///
    /// Audio entries carry a version at offset 8; version 1 adds 16 bytes and
    /// version 2 adds 36. Returns `None` when `head` is too short to tell.
    pub fn prefix_len(self, head: &[u8]) -> Option<usize> {
        match self {
            Self::Visual => Some(78),
            Self::Text => Some(38),
            Self::Audio => {
                let version = u16::from_be_bytes([*head.get(8)?, *head.get(9)?]);
                Some(match version {
                    1 => 28 + 16,
                    2 => 28 + 36,
                    _ => 28,
                })
            }
        }
    }
}

/// How a box lays out its payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoxCategory {
    /// Raw payload.
    Plain,
    /// Version and flags, then raw or field payload.
    Full,
    /// Child boxes only.
    Container,
    /// Version and flags, then an optional 32-bit entry count, then children.
    FullContainer { counted: bool },
    /// Fixed sample-entry fields, then child boxes.
    SampleEntry(MediaKind),
    /// `mdat`: payload stays in the input.
    MediaData,
}

impl BoxCategory {
    pub fn is_full(self) -> bool {
        matches!(self, Self::Full | Self::FullContainer { .. })
    }

    pub fn has_children(self) -> bool {
        matches!(
            self,
            Self::Container | Self::FullContainer { .. } | Self::SampleEntry(_)
        )
    }
}

/// Registry entry.
#[derive(Debug, Clone, Copy)]
pub struct BoxSpec {
    pub name: &'static str,
    pub category: BoxCategory,
    /// Child types a well-formed file places here. Others still parse.
    pub children: &'static [BoxType],
    pub decoder: Option<FieldDecoder>,
}

impl BoxSpec {
    pub const fn new(name: &'static str, category: BoxCategory) -> Self {
        Self {
            name,
            category,
            children: &[],
            decoder: None,
        }
    }

    pub const fn with_children(mut self, children: &'static [BoxType]) -> Self {
        self.children = children;
        self
    }

    pub const fn with_decoder(mut self, decoder: FieldDecoder) -> Self {
        self.decoder = Some(decoder);
        self
    }

    /// Whether `child` belongs to the expected child set. Entries without a
    /// list accept anything.
    pub fn expects(&self, child: BoxType) -> bool {
        self.children.is_empty() || self.children.contains(&child)
    }
}

const fn t(code: &[u8; 4]) -> BoxType {
    BoxType(*code)
}

const MOOV_CHILDREN: &[BoxType] = &[
    BoxType::MVHD,
    BoxType::TRAK,
    BoxType::MVEX,
    BoxType::UDTA,
    BoxType::META,
    t(b"iods"),
    t(b"pssh"),
    BoxType::FREE,
    BoxType::SKIP,
    BoxType::UUID,
];
const TRAK_CHILDREN: &[BoxType] = &[
    BoxType::TKHD,
    BoxType::EDTS,
    BoxType::MDIA,
    BoxType::UDTA,
    BoxType::META,
    t(b"tref"),
    t(b"tapt"),
    BoxType::FREE,
    BoxType::UUID,
];
const MDIA_CHILDREN: &[BoxType] = &[BoxType::MDHD, BoxType::HDLR, BoxType::MINF, t(b"elng")];
const MINF_CHILDREN: &[BoxType] = &[
    BoxType::VMHD,
    BoxType::SMHD,
    BoxType::NMHD,
    t(b"hmhd"),
    t(b"sthd"),
    t(b"gmhd"),
    BoxType::HDLR,
    BoxType::DINF,
    BoxType::STBL,
];
const STBL_CHILDREN: &[BoxType] = &[
    BoxType::STSD,
    BoxType::STTS,
    BoxType::CTTS,
    t(b"cslg"),
    BoxType::STSC,
    BoxType::STSZ,
    t(b"stz2"),
    BoxType::STCO,
    BoxType::CO64,
    BoxType::STSS,
    t(b"stsh"),
    t(b"sdtp"),
    t(b"sbgp"),
    t(b"sgpd"),
    t(b"subs"),
    t(b"saiz"),
    t(b"saio"),
    t(b"padb"),
    t(b"stdp"),
];
const MVEX_CHILDREN: &[BoxType] = &[BoxType::MEHD, BoxType::TREX, t(b"leva"), t(b"trep")];
const MOOF_CHILDREN: &[BoxType] = &[BoxType::MFHD, BoxType::TRAF, t(b"pssh"), BoxType::UUID];
const TRAF_CHILDREN: &[BoxType] = &[
    BoxType::TFHD,
    BoxType::TFDT,
    BoxType::TRUN,
    t(b"sdtp"),
    t(b"sbgp"),
    t(b"sgpd"),
    t(b"subs"),
    t(b"saiz"),
    t(b"saio"),
    t(b"senc"),
    BoxType::UUID,
];
const EDTS_CHILDREN: &[BoxType] = &[BoxType::ELST];
const DINF_CHILDREN: &[BoxType] = &[BoxType::DREF];
const DREF_CHILDREN: &[BoxType] = &[BoxType::URL, t(b"urn ")];
const MFRA_CHILDREN: &[BoxType] = &[t(b"tfra"), t(b"mfro")];
const SINF_CHILDREN: &[BoxType] = &[t(b"frma"), t(b"schm"), t(b"schi")];

const VISUAL_ENTRIES: &[&[u8; 4]] = &[
    b"avc1", b"avc2", b"avc3", b"avc4", b"hvc1", b"hev1", b"dvh1", b"dvhe", b"dva1", b"dvav",
    b"vp08", b"vp09", b"av01", b"mp4v", b"encv", b"jpeg", b"s263", b"resv",
];
const AUDIO_ENTRIES: &[&[u8; 4]] = &[
    b"mp4a", b"enca", b"ac-3", b"ec-3", b"ac-4", b"Opus", b"fLaC", b"alac", b"samr", b"sawb",
    b"mha1", b"mhm1", b"sowt", b"twos", b"lpcm", b"ipcm", b"fpcm", b".mp3",
];

const PLAIN_LEAVES: &[(&[u8; 4], &str)] = &[
    (b"free", "FreeSpaceBox"),
    (b"skip", "FreeSpaceBox"),
    (b"wide", "WideBox"),
    (b"avcC", "AVCConfigurationBox"),
    (b"hvcC", "HEVCConfigurationBox"),
    (b"av1C", "AV1CodecConfigurationBox"),
    (b"dvcC", "DOVIConfigurationBox"),
    (b"dvvC", "DOVIConfigurationBox"),
    (b"btrt", "BitRateBox"),
    (b"pasp", "PixelAspectRatioBox"),
    (b"colr", "ColourInformationBox"),
    (b"clap", "CleanApertureBox"),
    (b"dac3", "AC3SpecificBox"),
    (b"dec3", "EC3SpecificBox"),
    (b"dOps", "OpusSpecificBox"),
    (b"frma", "OriginalFormatBox"),
    (b"ftab", "FontTableBox"),
];

const FULL_LEAVES: &[(&[u8; 4], &str)] = &[
    (b"vmhd", "VideoMediaHeaderBox"),
    (b"smhd", "SoundMediaHeaderBox"),
    (b"hmhd", "HintMediaHeaderBox"),
    (b"nmhd", "NullMediaHeaderBox"),
    (b"sthd", "SubtitleMediaHeaderBox"),
    (b"url ", "DataEntryUrlBox"),
    (b"urn ", "DataEntryUrnBox"),
    (b"stz2", "CompactSampleSizeBox"),
    (b"cslg", "CompositionToDecodeBox"),
    (b"sdtp", "SampleDependencyTypeBox"),
    (b"sbgp", "SampleToGroupBox"),
    (b"sgpd", "SampleGroupDescriptionBox"),
    (b"subs", "SubSampleInformationBox"),
    (b"saiz", "SampleAuxiliaryInformationSizesBox"),
    (b"saio", "SampleAuxiliaryInformationOffsetsBox"),
    (b"padb", "PaddingBitsBox"),
    (b"stdp", "DegradationPriorityBox"),
    (b"stsh", "ShadowSyncSampleBox"),
    (b"elng", "ExtendedLanguageBox"),
    (b"iods", "ObjectDescriptorBox"),
    (b"esds", "ESDBox"),
    (b"dfLa", "FLACSpecificBox"),
    (b"vpcC", "VPCodecConfigurationBox"),
    (b"pssh", "ProtectionSystemSpecificHeaderBox"),
    (b"tenc", "TrackEncryptionBox"),
    (b"senc", "SampleEncryptionBox"),
    (b"schm", "SchemeTypeBox"),
    (b"sidx", "SegmentIndexBox"),
    (b"ssix", "SubsegmentIndexBox"),
    (b"prft", "ProducerReferenceTimeBox"),
    (b"emsg", "EventMessageBox"),
    (b"tfra", "TrackFragmentRandomAccessBox"),
    (b"mfro", "MovieFragmentRandomAccessOffsetBox"),
    (b"leva", "LevelAssignmentBox"),
    (b"trep", "TrackExtensionPropertiesBox"),
    (b"pdin", "ProgressiveDownloadInfoBox"),
    (b"iloc", "ItemLocationBox"),
    (b"iinf", "ItemInfoBox"),
    (b"pitm", "PrimaryItemBox"),
    (b"iref", "ItemReferenceBox"),
    (b"kind", "KindBox"),
];

const PLAIN_CONTAINERS: &[(&[u8; 4], &str)] = &[
    (b"udta", "UserDataBox"),
    (b"tref", "TrackReferenceBox"),
    (b"tapt", "TrackApertureModeDimensionsAtom"),
    (b"gmhd", "GenericMediaHeaderAtom"),
    (b"schi", "SchemeInformationBox"),
    (b"rinf", "RestrictedSchemeInfoBox"),
    (b"ipro", "ItemProtectionBox"),
];

/// PIFF and Smooth Streaming extended types.
pub const UUID_PIFF_SAMPLE_ENCRYPTION: [u8; 16] = [
    0xa2, 0x39, 0x4f, 0x52, 0x5a, 0x9b, 0x4f, 0x14, 0xa2, 0x44, 0x6c, 0x42, 0x7c, 0x64, 0x8d, 0xf4,
];
pub const UUID_PIFF_TRACK_ENCRYPTION: [u8; 16] = [
    0x89, 0x74, 0xdb, 0xce, 0x7b, 0xe7, 0x4c, 0x51, 0x84, 0xf9, 0x71, 0x48, 0xf9, 0x88, 0x25, 0x54,
];
pub const UUID_PIFF_PSSH: [u8; 16] = [
    0xd0, 0x8a, 0x4f, 0x18, 0x10, 0xf3, 0x4a, 0x82, 0xb6, 0xc8, 0x32, 0xd8, 0xab, 0xa1, 0x83, 0xd3,
];
pub const UUID_TFXD: [u8; 16] = [
    0x6d, 0x1d, 0x9b, 0x05, 0x42, 0xd5, 0x44, 0xe6, 0x80, 0xe2, 0x14, 0x1d, 0xaf, 0xf7, 0x57, 0xb2,
];
pub const UUID_TFRF: [u8; 16] = [
    0xd4, 0x80, 0x7e, 0xf2, 0xca, 0x39, 0x46, 0x95, 0x8e, 0x54, 0x26, 0xcb, 0x9e, 0x46, 0xa7, 0x9f,
];

/// Box catalog keyed by four-cc, with a secondary catalog for `uuid` boxes.
#[derive(Debug, Clone, Default)]
pub struct BoxRegistry {
    by_type: HashMap<BoxType, BoxSpec>,
    by_uuid: HashMap<[u8; 16], BoxSpec>,
}

impl BoxRegistry {
    /// A registry that knows nothing: every box parses as opaque.
    pub fn empty() -> Self {
        Self::default()
    }

    /// The catalog of ISO BMFF boxes this library understands.
    pub fn standard() -> Self {
        use BoxCategory::*;
        let mut reg = Self::empty();

        reg.register(
            BoxType::FTYP,
            BoxSpec::new("FileTypeBox", Plain).with_decoder(fields::decode_ftyp),
        );
        reg.register(
            BoxType::STYP,
            BoxSpec::new("SegmentTypeBox", Plain).with_decoder(fields::decode_ftyp),
        );
        reg.register(BoxType::MDAT, BoxSpec::new("MediaDataBox", MediaData));

        for (code, name, children) in [
            (BoxType::MOOV, "MovieBox", MOOV_CHILDREN),
            (BoxType::TRAK, "TrackBox", TRAK_CHILDREN),
            (BoxType::EDTS, "EditBox", EDTS_CHILDREN),
            (BoxType::MDIA, "MediaBox", MDIA_CHILDREN),
            (BoxType::MINF, "MediaInformationBox", MINF_CHILDREN),
            (BoxType::DINF, "DataInformationBox", DINF_CHILDREN),
            (BoxType::STBL, "SampleTableBox", STBL_CHILDREN),
            (BoxType::MVEX, "MovieExtendsBox", MVEX_CHILDREN),
            (BoxType::MOOF, "MovieFragmentBox", MOOF_CHILDREN),
            (BoxType::TRAF, "TrackFragmentBox", TRAF_CHILDREN),
            (BoxType::MFRA, "MovieFragmentRandomAccessBox", MFRA_CHILDREN),
            (t(b"sinf"), "ProtectionSchemeInfoBox", SINF_CHILDREN),
        ] {
            reg.register(code, BoxSpec::new(name, Container).with_children(children));
        }
        for &(code, name) in PLAIN_CONTAINERS {
            reg.register(t(code), BoxSpec::new(name, Container));
        }

        reg.register(
            BoxType::STSD,
            BoxSpec::new("SampleDescriptionBox", FullContainer { counted: true }),
        );
        reg.register(
            BoxType::DREF,
            BoxSpec::new("DataReferenceBox", FullContainer { counted: true })
                .with_children(DREF_CHILDREN),
        );
        reg.register(
            BoxType::META,
            BoxSpec::new("MetaBox", FullContainer { counted: false }),
        );

        let decoded: [(BoxType, &'static str, FieldDecoder); 18] = [
            (BoxType::MVHD, "MovieHeaderBox", fields::decode_mvhd),
            (BoxType::TKHD, "TrackHeaderBox", fields::decode_tkhd),
            (BoxType::MDHD, "MediaHeaderBox", fields::decode_mdhd),
            (BoxType::HDLR, "HandlerBox", fields::decode_hdlr),
            (BoxType::STTS, "TimeToSampleBox", fields::decode_stts),
            (BoxType::CTTS, "CompositionOffsetBox", fields::decode_ctts),
            (BoxType::STSC, "SampleToChunkBox", fields::decode_stsc),
            (BoxType::STSZ, "SampleSizeBox", fields::decode_stsz),
            (BoxType::STCO, "ChunkOffsetBox", fields::decode_stco),
            (BoxType::CO64, "ChunkLargeOffsetBox", fields::decode_co64),
            (BoxType::STSS, "SyncSampleBox", fields::decode_stss),
            (BoxType::ELST, "EditListBox", fields::decode_elst),
            (BoxType::MEHD, "MovieExtendsHeaderBox", fields::decode_mehd),
            (BoxType::TREX, "TrackExtendsBox", fields::decode_trex),
            (BoxType::MFHD, "MovieFragmentHeaderBox", fields::decode_mfhd),
            (BoxType::TFHD, "TrackFragmentHeaderBox", fields::decode_tfhd),
            (BoxType::TFDT, "TrackFragmentBaseMediaDecodeTimeBox", fields::decode_tfdt),
            (BoxType::TRUN, "TrackRunBox", fields::decode_trun),
        ];
        for (code, name, decoder) in decoded {
            reg.register(code, BoxSpec::new(name, Full).with_decoder(decoder));
        }

        for &(code, name) in PLAIN_LEAVES {
            reg.register(t(code), BoxSpec::new(name, Plain));
        }
        for &(code, name) in FULL_LEAVES {
            reg.register(t(code), BoxSpec::new(name, Full));
        }

        for &code in VISUAL_ENTRIES {
            reg.register(
                t(code),
                BoxSpec::new("VisualSampleEntry", SampleEntry(MediaKind::Visual)),
            );
        }
        for &code in AUDIO_ENTRIES {
            reg.register(
                t(code),
                BoxSpec::new("AudioSampleEntry", SampleEntry(MediaKind::Audio)),
            );
        }
        reg.register(
            t(b"tx3g"),
            BoxSpec::new("TextSampleEntry", SampleEntry(MediaKind::Text)),
        );

        for (uuid, name) in [
            (UUID_PIFF_SAMPLE_ENCRYPTION, "PiffSampleEncryptionBox"),
            (UUID_PIFF_TRACK_ENCRYPTION, "PiffTrackEncryptionBox"),
            (UUID_PIFF_PSSH, "PiffProtectionSystemSpecificHeaderBox"),
            (UUID_TFXD, "TfxdBox"),
            (UUID_TFRF, "TfrfBox"),
        ] {
            reg.register_uuid(uuid, BoxSpec::new(name, Full));
        }

        reg
    }

    /// Add or replace an entry. Registries are shared read-only once wrapped
    /// in an `Arc`, so this is only usable while building one.
    pub fn register(&mut self, box_type: BoxType, spec: BoxSpec) {
        self.by_type.insert(box_type, spec);
    }

    pub fn register_uuid(&mut self, uuid: [u8; 16], spec: BoxSpec) {
        self.by_uuid.insert(uuid, spec);
    }

    pub fn lookup(&self, box_type: BoxType) -> Option<&BoxSpec> {
        self.by_type.get(&box_type)
    }

    pub fn lookup_uuid(&self, uuid: &[u8; 16]) -> Option<&BoxSpec> {
        self.by_uuid.get(uuid)
    }

    /// Entry for a parsed header: `uuid` boxes resolve through their
    /// extended type, everything else through the four-cc.
    pub fn resolve(&self, box_type: BoxType, uuid: Option<&[u8; 16]>) -> Option<&BoxSpec> {
        match uuid {
            Some(uuid) => self.lookup_uuid(uuid),
            None => self.lookup(box_type),
        }
    }

    pub fn len(&self) -> usize {
        self.by_type.len() + self.by_uuid.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Process-wide standard registry, built on first use.
pub fn default_registry() -> Arc<BoxRegistry> {
    static REGISTRY: OnceLock<Arc<BoxRegistry>> = OnceLock::new();
    REGISTRY
        .get_or_init(|| Arc::new(BoxRegistry::standard()))
        .clone()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standard_categories() {
        let reg = BoxRegistry::standard();
        assert_eq!(reg.lookup(BoxType::MOOV).unwrap().category, BoxCategory::Container);
        assert_eq!(
            reg.lookup(BoxType::STSD).unwrap().category,
            BoxCategory::FullContainer { counted: true }
        );
        assert_eq!(
            reg.lookup(BoxType::AVC1).unwrap().category,
            BoxCategory::SampleEntry(MediaKind::Visual)
        );
        assert!(reg.lookup(BoxType::TRUN).unwrap().decoder.is_some());
        assert!(reg.lookup(BoxType(*b"zzzz")).is_none());
    }

    #[test]
    fn test_uuid_lookup() {
        let reg = BoxRegistry::standard();
        let spec = reg.resolve(BoxType::UUID, Some(&UUID_TFXD)).unwrap();
        assert_eq!(spec.name, "TfxdBox");
        assert!(spec.category.is_full());
        assert!(reg.resolve(BoxType::UUID, Some(&[0; 16])).is_none());
    }

    #[test]
    fn test_expected_children() {
        let reg = BoxRegistry::standard();
        let trak = reg.lookup(BoxType::TRAK).unwrap();
        assert!(trak.expects(BoxType::MDIA));
        assert!(!trak.expects(BoxType::MOOF));
        // No list means anything goes.
        assert!(reg.lookup(BoxType::UDTA).unwrap().expects(BoxType(*b"abcd")));
    }

    #[test]
    fn test_audio_prefix_by_version() {
        let mut head = [0u8; 10];
        assert_eq!(MediaKind::Audio.prefix_len(&head), Some(28));
        head[9] = 1;
        assert_eq!(MediaKind::Audio.prefix_len(&head), Some(44));
        head[9] = 2;
        assert_eq!(MediaKind::Audio.prefix_len(&head), Some(64));
        assert_eq!(MediaKind::Audio.prefix_len(&head[..4]), None);
        assert_eq!(MediaKind::Visual.prefix_len(&[]), Some(78));
    }

    #[test]
    fn test_default_registry_is_shared() {
        let a = default_registry();
        let b = default_registry();
        assert!(Arc::ptr_eq(&a, &b));
        assert!(!a.is_empty());
    }
}
