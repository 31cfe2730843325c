//! Generic box model.
//!
//! Every box is an [`Mp4Box`] node: a type code, a header layout, an optional
//! full-box header and a tagged [`BoxBody`]. Which body a box gets is decided
//! by the [`BoxRegistry`] at parse time; builders pick it directly.

mod fields;
mod registry;

pub use fields::{
    pack_language, sample_flags, tfhd_flags, trun_flags, BoxFields, ChunkOffsets,
    CompositionOffsetEntry, EditListEntry, FieldDecoder, FileType, HandlerBox, MediaHeader,
    MovieHeader, SampleSizes, SampleToChunkEntry, TimeToSampleEntry, TrackExtends,
    TrackFragmentHeader, TrackHeader, TrackRun, TrackRunSample, UNITY_MATRIX,
};
pub use registry::{
    default_registry, BoxCategory, BoxRegistry, BoxSpec, MediaKind, UUID_PIFF_PSSH,
    UUID_PIFF_SAMPLE_ENCRYPTION, UUID_PIFF_TRACK_ENCRYPTION, UUID_TFRF, UUID_TFXD,
};

use bytes::Bytes;
use std::fmt::Write as _;

/// Four-character box type code.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct BoxType(pub [u8; 4]);

impl BoxType {
    pub const FTYP: Self = Self(*b"ftyp");
    pub const STYP: Self = Self(*b"styp");
    pub const MOOV: Self = Self(*b"moov");
    pub const MDAT: Self = Self(*b"mdat");
    pub const MOOF: Self = Self(*b"moof");
    pub const MFRA: Self = Self(*b"mfra");
    pub const MVHD: Self = Self(*b"mvhd");
    pub const TRAK: Self = Self(*b"trak");
    pub const TKHD: Self = Self(*b"tkhd");
    pub const EDTS: Self = Self(*b"edts");
    pub const ELST: Self = Self(*b"elst");
    pub const MDIA: Self = Self(*b"mdia");
    pub const MDHD: Self = Self(*b"mdhd");
    pub const HDLR: Self = Self(*b"hdlr");
    pub const MINF: Self = Self(*b"minf");
    pub const VMHD: Self = Self(*b"vmhd");
    pub const SMHD: Self = Self(*b"smhd");
    pub const NMHD: Self = Self(*b"nmhd");
    pub const DINF: Self = Self(*b"dinf");
    pub const DREF: Self = Self(*b"dref");
    pub const URL: Self = Self(*b"url ");
    pub const STBL: Self = Self(*b"stbl");
    pub const STSD: Self = Self(*b"stsd");
    pub const STTS: Self = Self(*b"stts");
    pub const CTTS: Self = Self(*b"ctts");
    pub const STSS: Self = Self(*b"stss");
    pub const STSC: Self = Self(*b"stsc");
    pub const STSZ: Self = Self(*b"stsz");
    pub const STCO: Self = Self(*b"stco");
    pub const CO64: Self = Self(*b"co64");
    pub const MVEX: Self = Self(*b"mvex");
    pub const MEHD: Self = Self(*b"mehd");
    pub const TREX: Self = Self(*b"trex");
    pub const MFHD: Self = Self(*b"mfhd");
    pub const TRAF: Self = Self(*b"traf");
    pub const TFHD: Self = Self(*b"tfhd");
    pub const TFDT: Self = Self(*b"tfdt");
    pub const TRUN: Self = Self(*b"trun");
    pub const FREE: Self = Self(*b"free");
    pub const SKIP: Self = Self(*b"skip");
    pub const UDTA: Self = Self(*b"udta");
    pub const META: Self = Self(*b"meta");
    pub const UUID: Self = Self(*b"uuid");
    pub const AVC1: Self = Self(*b"avc1");
    pub const AVCC: Self = Self(*b"avcC");
    pub const MP4A: Self = Self(*b"mp4a");
    pub const ESDS: Self = Self(*b"esds");

    /// Create from bytes.
    pub fn from_bytes(bytes: [u8; 4]) -> Self {
        Self(bytes)
    }

    /// Get the 4-char code as a string.
    pub fn as_str(&self) -> &str {
        std::str::from_utf8(&self.0).unwrap_or("????")
    }
}

impl std::fmt::Display for BoxType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for &b in &self.0 {
            let c = if b.is_ascii_graphic() || b == b' ' {
                b as char
            } else {
                '.'
            };
            f.write_char(c)?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for BoxType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "BoxType({self})")
    }
}

impl From<&[u8; 4]> for BoxType {
    fn from(value: &[u8; 4]) -> Self {
        Self(*value)
    }
}

/// How a box encodes its size field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HeaderLayout {
    /// 32-bit size.
    #[default]
    Compact,
    /// Size field is 1, followed by a 64-bit size.
    Large,
    /// Size field is 0: the box extends to the end of its container or file.
    ToEnd,
}

/// Version and flags of a full box.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FullBoxHeader {
    pub version: u8,
    /// Only the low 24 bits are used.
    pub flags: u32,
}

impl FullBoxHeader {
    pub fn new(version: u8, flags: u32) -> Self {
        Self {
            version,
            flags: flags & 0x00ff_ffff,
        }
    }
}

/// Location of `mdat` payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaData {
    /// Payload held in memory (built boxes).
    Inline(Bytes),
    /// Payload left in the input, `len` bytes at file position `offset`.
    Range { offset: u64, len: u64 },
}

impl MediaData {
    pub fn len(&self) -> u64 {
        match self {
            Self::Inline(data) => data.len() as u64,
            Self::Range { len, .. } => *len,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Payload of a box.
#[derive(Debug, Clone, PartialEq)]
pub enum BoxBody {
    /// Raw payload of an unknown, undecoded or damaged box.
    Opaque(Bytes),
    /// Decoded fields of a known leaf box.
    Fields(BoxFields),
    /// Child boxes, preceded by fixed bytes of the box kind (sample entry
    /// fields, `stsd`/`dref` entry counts). `prefix` is empty for plain
    /// containers.
    Container {
        prefix: Bytes,
        children: Vec<Mp4Box>,
    },
    /// `mdat` payload.
    MediaData(MediaData),
}

/// A box node.
#[derive(Debug, Clone, PartialEq)]
pub struct Mp4Box {
    pub box_type: BoxType,
    /// Extended type of `uuid` boxes.
    pub uuid: Option<[u8; 16]>,
    pub layout: HeaderLayout,
    /// File position of the header. Zero for boxes that were built, not parsed.
    pub offset: u64,
    pub full: Option<FullBoxHeader>,
    pub body: BoxBody,
    /// Payload remainder too short to hold another box.
    pub trailing: Bytes,
}

impl Mp4Box {
    fn with_body(box_type: BoxType, full: Option<FullBoxHeader>, body: BoxBody) -> Self {
        Self {
            box_type,
            uuid: None,
            layout: HeaderLayout::Compact,
            offset: 0,
            full,
            body,
            trailing: Bytes::new(),
        }
    }

    /// A plain box with raw payload.
    pub fn opaque(box_type: BoxType, payload: impl Into<Bytes>) -> Self {
        Self::with_body(box_type, None, BoxBody::Opaque(payload.into()))
    }

    /// A full box with raw payload.
    pub fn opaque_full(box_type: BoxType, version: u8, flags: u32, payload: impl Into<Bytes>) -> Self {
        Self::with_body(
            box_type,
            Some(FullBoxHeader::new(version, flags)),
            BoxBody::Opaque(payload.into()),
        )
    }

    /// A plain box with decoded fields (`ftyp`, `styp`).
    pub fn plain_fields(box_type: BoxType, fields: BoxFields) -> Self {
        Self::with_body(box_type, None, BoxBody::Fields(fields))
    }

    /// A full box with decoded fields.
    pub fn full_fields(box_type: BoxType, version: u8, flags: u32, fields: BoxFields) -> Self {
        Self::with_body(
            box_type,
            Some(FullBoxHeader::new(version, flags)),
            BoxBody::Fields(fields),
        )
    }

    /// A plain container.
    pub fn container(box_type: BoxType, children: Vec<Mp4Box>) -> Self {
        Self::with_body(
            box_type,
            None,
            BoxBody::Container {
                prefix: Bytes::new(),
                children,
            },
        )
    }

    /// A container with full-box header and fixed prefix bytes.
    pub fn full_container(
        box_type: BoxType,
        full: Option<FullBoxHeader>,
        prefix: impl Into<Bytes>,
        children: Vec<Mp4Box>,
    ) -> Self {
        Self::with_body(
            box_type,
            full,
            BoxBody::Container {
                prefix: prefix.into(),
                children,
            },
        )
    }

    /// An `mdat` holding its payload in memory.
    pub fn mdat(data: impl Into<Bytes>) -> Self {
        Self::with_body(
            BoxType::MDAT,
            None,
            BoxBody::MediaData(MediaData::Inline(data.into())),
        )
    }

    pub fn version(&self) -> u8 {
        self.full.map(|f| f.version).unwrap_or(0)
    }

    pub fn flags(&self) -> u32 {
        self.full.map(|f| f.flags).unwrap_or(0)
    }

    /// Header length as this box will be written.
    pub fn header_len(&self) -> u64 {
        let uuid = if self.uuid.is_some() { 16 } else { 0 };
        match self.layout {
            HeaderLayout::Large => 16 + uuid,
            HeaderLayout::ToEnd => 8 + uuid,
            HeaderLayout::Compact => {
                if 8 + uuid + self.payload_len() > u32::MAX as u64 {
                    16 + uuid
                } else {
                    8 + uuid
                }
            }
        }
    }

    /// Payload length: full-box header, body and trailing bytes.
    pub fn payload_len(&self) -> u64 {
        let full = if self.full.is_some() { 4 } else { 0 };
        let body = match &self.body {
            BoxBody::Opaque(data) => data.len() as u64,
            BoxBody::Fields(fields) => fields.encoded_len(self.version(), self.flags()),
            BoxBody::Container { prefix, children } => {
                prefix.len() as u64 + children.iter().map(Mp4Box::encoded_size).sum::<u64>()
            }
            BoxBody::MediaData(data) => data.len(),
        };
        full + body + self.trailing.len() as u64
    }

    /// Total serialized size, computed bottom-up without emitting bytes.
    pub fn encoded_size(&self) -> u64 {
        self.header_len() + self.payload_len()
    }

    /// File position of the first payload byte (parsed boxes).
    pub fn payload_offset(&self) -> u64 {
        self.offset + self.header_len()
    }

    pub fn fields(&self) -> Option<&BoxFields> {
        match &self.body {
            BoxBody::Fields(fields) => Some(fields),
            _ => None,
        }
    }

    pub fn fields_mut(&mut self) -> Option<&mut BoxFields> {
        match &mut self.body {
            BoxBody::Fields(fields) => Some(fields),
            _ => None,
        }
    }

    pub fn children(&self) -> &[Mp4Box] {
        match &self.body {
            BoxBody::Container { children, .. } => children,
            _ => &[],
        }
    }

    pub fn children_mut(&mut self) -> Option<&mut Vec<Mp4Box>> {
        match &mut self.body {
            BoxBody::Container { children, .. } => Some(children),
            _ => None,
        }
    }

    pub fn prefix(&self) -> &[u8] {
        match &self.body {
            BoxBody::Container { prefix, .. } => prefix,
            _ => &[],
        }
    }

    /// First direct child of the given type.
    pub fn child(&self, box_type: BoxType) -> Option<&Mp4Box> {
        self.children().iter().find(|c| c.box_type == box_type)
    }

    pub fn child_mut(&mut self, box_type: BoxType) -> Option<&mut Mp4Box> {
        self.children_mut()?
            .iter_mut()
            .find(|c| c.box_type == box_type)
    }

    /// Direct children of the given type.
    pub fn children_of(&self, box_type: BoxType) -> impl Iterator<Item = &Mp4Box> {
        self.children().iter().filter(move |c| c.box_type == box_type)
    }

    /// Follow a path of child types, e.g. `[MDIA, MINF, STBL]`.
    pub fn descend(&self, path: &[BoxType]) -> Option<&Mp4Box> {
        path.iter().try_fold(self, |node, t| node.child(*t))
    }

    /// Depth-first search of this subtree (including `self`).
    pub fn find_all<'a>(&'a self, box_type: BoxType, out: &mut Vec<&'a Mp4Box>) {
        if self.box_type == box_type {
            out.push(self);
        }
        for child in self.children() {
            child.find_all(box_type, out);
        }
    }

    /// Whether this subtree still holds an "extends to end" box that is not
    /// the last one of its list.
    pub(crate) fn misplaced_to_end(&self) -> Option<&Mp4Box> {
        let children = self.children();
        for (i, child) in children.iter().enumerate() {
            if child.layout == HeaderLayout::ToEnd && i + 1 != children.len() {
                return Some(child);
            }
            if let Some(found) = child.misplaced_to_end() {
                return Some(found);
            }
        }
        None
    }

    /// Indented, human-readable dump of the subtree.
    pub fn dump(&self) -> String {
        let mut out = String::new();
        self.dump_into(0, &mut out);
        out
    }

    fn dump_into(&self, depth: usize, out: &mut String) {
        let _ = write!(
            out,
            "{:indent$}[{}] size={} offset={}",
            "",
            self.box_type,
            self.encoded_size(),
            self.offset,
            indent = depth * 2
        );
        if let Some(full) = self.full {
            let _ = write!(out, " v{} flags={:#08x}", full.version, full.flags);
        }
        if let Some(uuid) = self.uuid {
            let hex: String = uuid.iter().map(|b| format!("{b:02x}")).collect();
            let _ = write!(out, " uuid={hex}");
        }
        match &self.body {
            BoxBody::Opaque(data) if !data.is_empty() => {
                let _ = write!(out, " ({} opaque bytes)", data.len());
            }
            BoxBody::Fields(fields) => {
                let _ = write!(out, " {}", fields.summary());
            }
            BoxBody::MediaData(MediaData::Range { offset, len }) => {
                let _ = write!(out, " (media {len} bytes @ {offset})");
            }
            _ => {}
        }
        out.push('\n');
        for child in self.children() {
            child.dump_into(depth + 1, out);
        }
    }
}
