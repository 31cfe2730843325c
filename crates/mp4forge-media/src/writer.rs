//! Box tree serialization.
//!
//! Boxes are emitted depth-first: the header goes out with a placeholder
//! size, the body follows, and the size is patched in once the box is
//! complete. [`Mp4Box::encoded_size`] computes the same numbers without
//! emitting anything; builders use it to place `trun` data offsets before
//! the bytes exist.

use crate::boxes::{BoxBody, BoxType, HeaderLayout, MediaData, Mp4Box};
use crate::cursor::ByteCursor;
use crate::stream::StreamBuffer;
use crate::{Error, Result};
use bytes::Bytes;
use std::io::Write;
use tracing::trace;

/// Resolves `mdat` payloads that were left in the input.
pub trait MediaSource {
    /// Bytes `offset..offset + len` of the input.
    fn media_bytes(&self, offset: u64, len: u64) -> Result<Bytes>;
}

impl MediaSource for StreamBuffer {
    fn media_bytes(&self, offset: u64, len: u64) -> Result<Bytes> {
        self.read(offset, len)
            .ok_or(Error::DataUnavailable { offset, len })
    }
}

/// Source for trees that only hold inline media.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoMedia;

impl MediaSource for NoMedia {
    fn media_bytes(&self, offset: u64, len: u64) -> Result<Bytes> {
        Err(Error::DataUnavailable { offset, len })
    }
}

/// Largest `mdat` slice copied at once by [`write_boxes_to`].
const COPY_CHUNK: u64 = 1 << 20;

/// Serializes boxes into a growing buffer.
pub struct BoxWriter<'a> {
    cur: ByteCursor,
    source: &'a dyn MediaSource,
}

impl<'a> BoxWriter<'a> {
    pub fn new(source: &'a dyn MediaSource) -> Self {
        Self {
            cur: ByteCursor::with_capacity(4096),
            source,
        }
    }

    /// Bytes written so far.
    pub fn len(&self) -> usize {
        self.cur.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cur.is_empty()
    }

    /// Write a list of sibling boxes.
    pub fn write_all(&mut self, boxes: &[Mp4Box]) -> Result<()> {
        check_to_end_last(boxes)?;
        for node in boxes {
            self.write_box(node)?;
        }
        Ok(())
    }

    /// Write one box and its subtree.
    pub fn write_box(&mut self, node: &Mp4Box) -> Result<()> {
        let start = self.cur.position();
        let large = self.write_header(node);

        match &node.body {
            BoxBody::Opaque(data) => self.cur.write_bytes(data),
            BoxBody::Fields(fields) => fields.encode(&mut self.cur, node.version(), node.flags())?,
            BoxBody::Container { prefix, children } => {
                self.cur.write_bytes(prefix);
                self.write_all(children)?;
            }
            BoxBody::MediaData(MediaData::Inline(data)) => self.cur.write_bytes(data),
            BoxBody::MediaData(MediaData::Range { offset, len }) => {
                let data = self.source.media_bytes(*offset, *len)?;
                self.cur.write_bytes(&data);
            }
        }
        self.cur.write_bytes(&node.trailing);

        let size = (self.cur.position() - start) as u64;
        debug_assert_eq!(size, node.encoded_size(), "size mismatch for {}", node.box_type);
        match node.layout {
            HeaderLayout::ToEnd => {}
            _ if large => self.cur.adjust_u64_at(start + 8, size)?,
            _ => {
                let size = u32::try_from(size).map_err(|_| {
                    Error::structural(node.box_type, node.offset, "box too large for 32-bit size")
                })?;
                self.cur.adjust_u32_at(start, size)?;
            }
        }
        trace!(box_type = %node.box_type, size, "wrote box");
        Ok(())
    }

    /// Header with a placeholder size. Returns whether the 64-bit form was used.
    fn write_header(&mut self, node: &Mp4Box) -> bool {
        let uuid_len = if node.uuid.is_some() { 16 } else { 0 };
        let large = node.layout != HeaderLayout::ToEnd && node.header_len() - uuid_len == 16;
        self.cur.write_u32(u32::from(large));
        self.cur.write_bytes(&node.box_type.0);
        if large {
            self.cur.write_u64(0);
        }
        if let Some(uuid) = &node.uuid {
            self.cur.write_bytes(uuid);
        }
        if let Some(full) = node.full {
            self.cur.write_u8(full.version);
            self.cur.write_u24(full.flags);
        }
        large
    }

    pub fn finish(self) -> Bytes {
        self.cur.into_bytes()
    }
}

/// A box that extends to the end must be the last of its list.
fn check_to_end_last(boxes: &[Mp4Box]) -> Result<()> {
    if let Some(pos) = boxes
        .iter()
        .position(|b| b.layout == HeaderLayout::ToEnd)
        .filter(|pos| pos + 1 != boxes.len())
    {
        let node = &boxes[pos];
        return Err(Error::structural(
            node.box_type,
            node.offset,
            "box extending to the end is not the last box of its list",
        ));
    }
    Ok(())
}

/// Serialize sibling boxes into one buffer.
pub fn serialize_boxes(boxes: &[Mp4Box], source: &dyn MediaSource) -> Result<Bytes> {
    let mut writer = BoxWriter::new(source);
    writer.write_all(boxes)?;
    Ok(writer.finish())
}

/// Stream sibling boxes into `out`. `mdat` payloads left in the input are
/// copied in slices instead of being assembled in memory.
pub fn write_boxes_to<W: Write + ?Sized>(
    boxes: &[Mp4Box],
    source: &dyn MediaSource,
    out: &mut W,
) -> Result<()> {
    check_to_end_last(boxes)?;
    for node in boxes {
        match &node.body {
            BoxBody::MediaData(MediaData::Range { offset, len }) if node.trailing.is_empty() => {
                let mut header = BoxWriter::new(source);
                let large = header.write_header(node);
                let size = node.encoded_size();
                let mut head = header.cur;
                match node.layout {
                    HeaderLayout::ToEnd => {}
                    _ if large => head.adjust_u64_at(8, size)?,
                    _ => head.adjust_u32_at(0, size as u32)?,
                }
                out.write_all(head.as_slice())?;

                let mut copied = 0;
                while copied < *len {
                    let n = COPY_CHUNK.min(len - copied);
                    out.write_all(&source.media_bytes(offset + copied, n)?)?;
                    copied += n;
                }
            }
            _ => out.write_all(&serialize_boxes(std::slice::from_ref(node), source)?)?,
        }
    }
    Ok(())
}

/// Emit `ftyp` followed by `moov`, for fragmented output. Fails when `moov`
/// has no `mvex`.
pub fn write_initialization_segment(ftyp: &Mp4Box, moov: &Mp4Box) -> Result<Bytes> {
    if moov.child(BoxType::MVEX).is_none() {
        return Err(Error::MissingBox("mvex"));
    }
    let mut writer = BoxWriter::new(&NoMedia);
    writer.write_box(ftyp)?;
    writer.write_box(moov)?;
    Ok(writer.finish())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::boxes::{BoxFields, FileType, TrackExtends};
    use crate::parser::tests::{boxed, full_boxed, parse_all};

    fn ftyp() -> Mp4Box {
        Mp4Box::plain_fields(
            BoxType::FTYP,
            BoxFields::FileType(FileType {
                major_brand: BoxType(*b"iso5"),
                minor_version: 0,
                compatible_brands: vec![BoxType(*b"iso6"), BoxType(*b"mp41")],
            }),
        )
    }

    #[test]
    fn test_sizes_are_patched() {
        let moov = Mp4Box::container(
            BoxType::MOOV,
            vec![Mp4Box::container(
                BoxType::MVEX,
                vec![Mp4Box::full_fields(
                    BoxType::TREX,
                    0,
                    0,
                    BoxFields::TrackExtends(TrackExtends::new(1)),
                )],
            )],
        );
        let bytes = serialize_boxes(&[ftyp(), moov.clone()], &NoMedia).unwrap();
        assert_eq!(&bytes[0..4], &24u32.to_be_bytes());
        assert_eq!(&bytes[4..8], b"ftyp");
        assert_eq!(&bytes[24..28], &(moov.encoded_size() as u32).to_be_bytes());
        assert_eq!(bytes.len() as u64, 24 + moov.encoded_size());
        assert_eq!(moov.encoded_size(), 8 + 8 + 32);
    }

    #[test]
    fn test_reparse_round_trip() {
        let mut data = boxed(b"ftyp", b"isom\0\0\x02\0isomiso2");
        data.extend(boxed(b"free", b"padding"));
        data.extend(boxed(
            b"moov",
            &[
                boxed(b"zzzz", &[1, 2, 3]),
                full_boxed(b"mehd", 0, 0, &[0, 0, 0, 9]),
            ]
            .concat(),
        ));
        data.extend(boxed(b"mdat", &[0xaa; 32]));

        let (boxes, _) = parse_all(&data, 7, false).unwrap();
        let mut stream = StreamBuffer::new();
        stream.append(data.clone());
        let out = serialize_boxes(&boxes, &stream).unwrap();
        assert_eq!(out.as_ref(), data.as_slice());

        let mut streamed = Vec::new();
        write_boxes_to(&boxes, &stream, &mut streamed).unwrap();
        assert_eq!(streamed, data);
    }

    #[test]
    fn test_large_header_preserved() {
        let mut node = Mp4Box::opaque(BoxType::FREE, vec![0u8; 4]);
        node.layout = HeaderLayout::Large;
        let bytes = serialize_boxes(&[node], &NoMedia).unwrap();
        assert_eq!(&bytes[0..4], &1u32.to_be_bytes());
        assert_eq!(&bytes[8..16], &20u64.to_be_bytes());
        assert_eq!(bytes.len(), 20);
    }

    #[test]
    fn test_to_end_must_be_last() {
        let mut mdat = Mp4Box::mdat(vec![0u8; 4]);
        mdat.layout = HeaderLayout::ToEnd;
        let free = Mp4Box::opaque(BoxType::FREE, Vec::new());

        let err = serialize_boxes(&[mdat.clone(), free.clone()], &NoMedia).unwrap_err();
        assert!(matches!(err, Error::Structural { box_type, .. } if box_type == BoxType::MDAT));

        let bytes = serialize_boxes(&[free, mdat], &NoMedia).unwrap();
        assert_eq!(&bytes[8..12], &0u32.to_be_bytes());
        assert_eq!(&bytes[12..16], b"mdat");
    }

    #[test]
    fn test_missing_media_range() {
        let mut mdat = Mp4Box::mdat(Bytes::new());
        mdat.body = BoxBody::MediaData(MediaData::Range {
            offset: 100,
            len: 10,
        });
        let err = serialize_boxes(&[mdat], &StreamBuffer::new()).unwrap_err();
        assert!(matches!(err, Error::DataUnavailable { offset: 100, len: 10 }));
    }

    #[test]
    fn test_init_segment_requires_mvex() {
        let moov = Mp4Box::container(BoxType::MOOV, Vec::new());
        assert!(matches!(
            write_initialization_segment(&ftyp(), &moov),
            Err(Error::MissingBox("mvex"))
        ));
    }

    #[test]
    fn test_uuid_and_full_header() {
        let mut node = Mp4Box::opaque_full(BoxType::UUID, 1, 0x000102, vec![9u8; 8]);
        node.uuid = Some([7; 16]);
        let bytes = serialize_boxes(&[node], &NoMedia).unwrap();
        assert_eq!(bytes.len(), 8 + 16 + 4 + 8);
        assert_eq!(&bytes[8..24], &[7u8; 16]);
        assert_eq!(&bytes[24..28], &[1, 0, 1, 2]);
    }
}
