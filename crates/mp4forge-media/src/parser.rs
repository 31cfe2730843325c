//! Resumable box parser.
//!
//! [`BoxParser`] walks the input one box at a time. Every step reads what it
//! needs from the [`StreamBuffer`] first and mutates its state only once all
//! of it is there, so a step that runs out of data can simply be repeated
//! after more input arrives: the box header is re-read from the same position
//! and the result is the same whichever way the input was split.
//!
//! Leaf boxes are decoded once their whole payload is buffered. Containers are
//! opened as soon as their header (and fixed prefix) is buffered and are
//! closed when their declared payload is used up. `mdat` payloads are never
//! read: the node records the byte range and the parser jumps past it.

use crate::boxes::{
    BoxBody, BoxCategory, BoxRegistry, BoxSpec, BoxType, FullBoxHeader, HeaderLayout, MediaData,
    Mp4Box,
};
use crate::cursor::ByteCursor;
use crate::stream::StreamBuffer;
use crate::{Error, Result};
use bytes::Bytes;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// Length of a compact box header.
const HEADER_LEN: u64 = 8;

/// A recovered anomaly: the box was kept (usually as raw bytes) and parsing
/// went on.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize))]
pub struct ParseWarning {
    pub box_type: BoxType,
    pub offset: u64,
    pub message: String,
}

impl ParseWarning {
    pub fn new(box_type: BoxType, offset: u64, message: impl Into<String>) -> Self {
        Self {
            box_type,
            offset,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ParseWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "'{}' at offset {}: {}", self.box_type, self.offset, self.message)
    }
}

/// Result of one [`BoxParser::advance`] call.
#[derive(Debug)]
pub enum ParseEvent {
    /// The buffered input is used up; append more and call again.
    NeedMoreData,
    /// A top-level box is complete.
    Box(Mp4Box),
    /// The input was declared finished and has been fully parsed.
    End,
}

#[derive(Debug, Clone, Copy)]
struct Header {
    box_type: BoxType,
    uuid: Option<[u8; 16]>,
    layout: HeaderLayout,
    start: u64,
    len: u64,
    /// `None` for boxes that extend to the end of their container.
    size: Option<u64>,
}

impl Header {
    fn payload_start(&self) -> u64 {
        self.start + self.len
    }

    fn node(&self, full: Option<FullBoxHeader>, body: BoxBody) -> Mp4Box {
        Mp4Box {
            box_type: self.box_type,
            uuid: self.uuid,
            layout: self.layout,
            offset: self.start,
            full,
            body,
            trailing: Bytes::new(),
        }
    }
}

enum HeaderRead {
    Ready(Header),
    Starved { want_end: u64 },
    Malformed(Error),
}

enum Step {
    Continue,
    Emit(Mp4Box),
    Starved { offset: u64, want_end: u64 },
    End,
}

/// A container whose children are being parsed.
#[derive(Debug)]
struct Frame {
    node: Mp4Box,
    /// End of the payload; `None` while it extends to an unknown end of input.
    end: Option<u64>,
    spec: BoxSpec,
    /// Entries still expected by `stsd`/`dref`.
    remaining_entries: Option<u32>,
}

/// Resumable, one-box-at-a-time parser.
#[derive(Debug)]
pub struct BoxParser {
    registry: Arc<BoxRegistry>,
    strict: bool,
    position: u64,
    stack: Vec<Frame>,
    /// Boxes to re-read as raw bytes after a structural failure inside them.
    opaque_at: HashSet<u64>,
    end_of_input: Option<u64>,
    warnings: Vec<ParseWarning>,
}

impl Default for BoxParser {
    fn default() -> Self {
        Self::new(crate::boxes::default_registry())
    }
}

impl BoxParser {
    pub fn new(registry: Arc<BoxRegistry>) -> Self {
        Self {
            registry,
            strict: false,
            position: 0,
            stack: Vec::new(),
            opaque_at: HashSet::new(),
            end_of_input: None,
            warnings: Vec::new(),
        }
    }

    /// In strict mode the first structural problem is returned as an error
    /// instead of being recovered from.
    pub fn strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    pub fn is_strict(&self) -> bool {
        self.strict
    }

    pub fn registry(&self) -> &Arc<BoxRegistry> {
        &self.registry
    }

    /// File position of the next header to read.
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Number of containers currently open.
    pub fn depth(&self) -> usize {
        self.stack.len()
    }

    /// Declare that no input exists past `end_of_input`.
    pub fn finish(&mut self, end_of_input: u64) {
        self.end_of_input = Some(end_of_input);
    }

    pub fn is_finished(&self) -> bool {
        self.end_of_input.is_some()
    }

    /// Lowest file position the parser may still read.
    pub fn release_floor(&self) -> u64 {
        self.stack
            .first()
            .map(|frame| frame.node.offset)
            .unwrap_or(self.position)
            .min(self.position)
    }

    /// Warnings recorded since the last call.
    pub fn take_warnings(&mut self) -> Vec<ParseWarning> {
        std::mem::take(&mut self.warnings)
    }

    /// Parse until a top-level box completes, the input runs out or the
    /// finished input ends.
    pub fn advance(&mut self, stream: &StreamBuffer) -> Result<ParseEvent> {
        loop {
            match self.step(stream)? {
                Step::Continue => {}
                Step::Emit(node) => return Ok(ParseEvent::Box(node)),
                Step::End => return Ok(ParseEvent::End),
                Step::Starved { offset, want_end } => {
                    if self.end_of_input.is_none() {
                        return Ok(ParseEvent::NeedMoreData);
                    }
                    let have = stream.find_contiguous_run(offset).end.max(offset);
                    return Err(Error::TruncatedInput {
                        offset,
                        needed: want_end.saturating_sub(have).max(1),
                    });
                }
            }
        }
    }

    /// End of the innermost open container, or of the input at top level.
    fn enclosing_end(&self) -> Option<u64> {
        match self.stack.last() {
            Some(frame) => frame.end.or(self.end_of_input),
            None => self.end_of_input,
        }
    }

    fn step(&mut self, stream: &StreamBuffer) -> Result<Step> {
        let enclosing_end = self.enclosing_end();
        if !self.stack.is_empty() {
            if let Some(end) = enclosing_end {
                let left = end.saturating_sub(self.position);
                if left == 0 {
                    return Ok(self.close_frame());
                }
                if left < HEADER_LEN {
                    let Some(rest) = stream.read(self.position, left) else {
                        return Ok(Step::Starved {
                            offset: self.position,
                            want_end: end,
                        });
                    };
                    if let Some(frame) = self.stack.last_mut() {
                        frame.node.trailing = rest;
                    }
                    self.position = end;
                    return Ok(self.close_frame());
                }
            }
        } else if let Some(end) = self.end_of_input {
            if self.position > end {
                return Err(Error::TruncatedInput {
                    offset: end,
                    needed: self.position - end,
                });
            }
            if self.position == end {
                return Ok(Step::End);
            }
            if end - self.position < HEADER_LEN {
                return Err(Error::TruncatedInput {
                    offset: self.position,
                    needed: HEADER_LEN - (end - self.position),
                });
            }
        }

        let header = match self.read_header(stream) {
            HeaderRead::Ready(header) => header,
            HeaderRead::Starved { want_end } => {
                return Ok(Step::Starved {
                    offset: self.position,
                    want_end,
                })
            }
            HeaderRead::Malformed(err) => {
                self.recover(err)?;
                return Ok(Step::Continue);
            }
        };

        if let Some(frame) = self.stack.last() {
            let parent_end = frame.end.or(self.end_of_input);
            if let (Some(size), Some(parent_end)) = (header.size, parent_end) {
                if header.start + size > parent_end {
                    let err = Error::structural(
                        frame.node.box_type,
                        frame.node.offset,
                        format!(
                            "child '{}' at offset {} overruns its container",
                            header.box_type, header.start
                        ),
                    );
                    self.recover(err)?;
                    return Ok(Step::Continue);
                }
            }
            if header.size.is_none() && frame.remaining_entries.is_some_and(|n| n > 1) {
                let err = Error::structural(
                    frame.node.box_type,
                    frame.node.offset,
                    format!(
                        "entry '{}' at offset {} extends to the end but is not the last entry",
                        header.box_type, header.start
                    ),
                );
                self.recover(err)?;
                return Ok(Step::Continue);
            }
        }

        let end = header.size.map(|size| header.start + size).or(enclosing_end);
        let spec = if self.opaque_at.contains(&header.start) {
            None
        } else {
            self.registry
                .resolve(header.box_type, header.uuid.as_ref())
                .copied()
        };

        match spec {
            Some(spec) if spec.category == BoxCategory::MediaData => {
                let Some(end) = end else {
                    return Ok(Step::Starved {
                        offset: header.start,
                        want_end: header.payload_start(),
                    });
                };
                let range = MediaData::Range {
                    offset: header.payload_start(),
                    len: end - header.payload_start(),
                };
                self.position = end;
                Ok(self.attach(header.node(None, BoxBody::MediaData(range))))
            }
            Some(spec) if spec.category.has_children() => {
                self.open_container(stream, header, end, spec)
            }
            _ => self.leaf(stream, header, end, spec, None),
        }
    }

    fn read_header(&self, stream: &StreamBuffer) -> HeaderRead {
        let start = self.position;
        let limit = self.enclosing_end();
        let crosses = |need: u64| limit.is_some_and(|end| start + need > end);

        let Some(raw) = stream.read(start, HEADER_LEN) else {
            return HeaderRead::Starved {
                want_end: start + HEADER_LEN,
            };
        };
        let size32 = u32::from_be_bytes([raw[0], raw[1], raw[2], raw[3]]);
        let box_type = BoxType([raw[4], raw[5], raw[6], raw[7]]);
        let mut header = Header {
            box_type,
            uuid: None,
            layout: HeaderLayout::Compact,
            start,
            len: HEADER_LEN,
            size: Some(size32 as u64),
        };

        if size32 == 1 {
            if crosses(16) {
                return HeaderRead::Malformed(Error::structural(
                    box_type,
                    start,
                    "64-bit size crosses the end of its container",
                ));
            }
            let Some(large) = stream.read(start + 8, 8) else {
                return HeaderRead::Starved {
                    want_end: start + 16,
                };
            };
            let mut raw = [0u8; 8];
            raw.copy_from_slice(&large);
            header.layout = HeaderLayout::Large;
            header.len = 16;
            header.size = Some(u64::from_be_bytes(raw));
        } else if size32 == 0 {
            header.layout = HeaderLayout::ToEnd;
            header.size = None;
        }

        if box_type == BoxType::UUID {
            if crosses(header.len + 16) {
                return HeaderRead::Malformed(Error::structural(
                    box_type,
                    start,
                    "extended type crosses the end of its container",
                ));
            }
            let Some(ext) = stream.read(start + header.len, 16) else {
                return HeaderRead::Starved {
                    want_end: start + header.len + 16,
                };
            };
            let mut uuid = [0u8; 16];
            uuid.copy_from_slice(&ext);
            header.uuid = Some(uuid);
            header.len += 16;
        }

        if let Some(size) = header.size {
            if size < header.len {
                return HeaderRead::Malformed(Error::structural(
                    box_type,
                    start,
                    format!("box size {size} is smaller than its {}-byte header", header.len),
                ));
            }
            if start.checked_add(size).is_none() {
                return HeaderRead::Malformed(Error::structural(
                    box_type,
                    start,
                    format!("box size {size} overflows the file position"),
                ));
            }
        }
        HeaderRead::Ready(header)
    }

    /// Handle a structural failure inside the innermost open container: the
    /// container is dropped and re-read as raw bytes.
    fn recover(&mut self, err: Error) -> Result<()> {
        if self.strict {
            return Err(err);
        }
        let Some(frame) = self.stack.pop() else {
            return Err(err);
        };
        let offset = frame.node.offset;
        warn!(box_type = %frame.node.box_type, offset, error = %err, "keeping damaged box as raw bytes");
        self.warnings.push(ParseWarning::new(
            frame.node.box_type,
            offset,
            err.to_string(),
        ));
        self.opaque_at.insert(offset);
        self.position = offset;
        Ok(())
    }

    /// Record a problem confined to one box that was kept as raw bytes.
    fn soft_error(&mut self, box_type: BoxType, offset: u64, err: Error) -> Result<()> {
        let err = match err {
            Error::BufferUnderflow { .. } => {
                Error::structural(box_type, offset, format!("payload too short: {err}"))
            }
            Error::Structural { reason, .. } => Error::structural(box_type, offset, reason),
            other => other,
        };
        if self.strict {
            return Err(err);
        }
        warn!(%box_type, offset, error = %err, "keeping box as raw bytes");
        self.warnings
            .push(ParseWarning::new(box_type, offset, err.to_string()));
        Ok(())
    }

    fn leaf(
        &mut self,
        stream: &StreamBuffer,
        header: Header,
        end: Option<u64>,
        spec: Option<BoxSpec>,
        problem: Option<Error>,
    ) -> Result<Step> {
        let Some(end) = end else {
            return Ok(Step::Starved {
                offset: header.start,
                want_end: header.payload_start(),
            });
        };
        let Some(payload) = stream.read(header.payload_start(), end - header.payload_start())
        else {
            return Ok(Step::Starved {
                offset: header.start,
                want_end: end,
            });
        };
        if let Some(err) = problem {
            self.soft_error(header.box_type, header.start, err)?;
        }
        let node = self.build_leaf(header, spec, payload)?;
        self.position = end;
        Ok(self.attach(node))
    }

    fn build_leaf(
        &mut self,
        header: Header,
        spec: Option<BoxSpec>,
        payload: Bytes,
    ) -> Result<Mp4Box> {
        let mut node = header.node(None, BoxBody::Opaque(payload.clone()));
        let Some(spec) = spec else {
            return Ok(node);
        };
        if spec.category != BoxCategory::Full && spec.decoder.is_none() {
            return Ok(node);
        }

        let mut body = payload;
        let full = if spec.category == BoxCategory::Full {
            if body.len() < 4 {
                let err = Error::structural(
                    header.box_type,
                    header.start,
                    "payload too short for version and flags",
                );
                self.soft_error(header.box_type, header.start, err)?;
                return Ok(node);
            }
            let full =
                FullBoxHeader::new(body[0], u32::from_be_bytes([0, body[1], body[2], body[3]]));
            body = body.slice(4..);
            node.full = Some(full);
            node.body = BoxBody::Opaque(body.clone());
            full
        } else {
            FullBoxHeader::default()
        };

        let Some(decoder) = spec.decoder else {
            return Ok(node);
        };
        let mut cur = ByteCursor::from_slice(&body);
        match decoder(&mut cur, full) {
            Ok(fields) => {
                let consumed = cur.position();
                let mut check = ByteCursor::with_capacity(consumed);
                let exact = fields.encode(&mut check, full.version, full.flags).is_ok()
                    && check.as_slice() == &body[..consumed];
                if exact {
                    node.body = BoxBody::Fields(fields);
                    node.trailing = body.slice(consumed..);
                } else {
                    trace!(box_type = %header.box_type, offset = header.start, "fields do not re-encode identically, keeping raw payload");
                }
            }
            Err(err) => self.soft_error(header.box_type, header.start, err)?,
        }
        Ok(node)
    }

    fn open_container(
        &mut self,
        stream: &StreamBuffer,
        header: Header,
        end: Option<u64>,
        spec: BoxSpec,
    ) -> Result<Step> {
        let payload_start = header.payload_start();
        let payload_len = end.map(|end| end - payload_start);
        let too_short = |need: u64| payload_len.is_some_and(|len| len < need);
        let starved = |want: u64| Step::Starved {
            offset: header.start,
            want_end: payload_start + want,
        };

        let (full, prefix, counted) = match spec.category {
            BoxCategory::Container => (None, Bytes::new(), false),
            BoxCategory::FullContainer { counted } => {
                // QuickTime writes `meta` without version and flags.
                if header.box_type == BoxType::META && !too_short(8) {
                    let Some(peek) = stream.read(payload_start, 8) else {
                        return Ok(starved(8));
                    };
                    if &peek[4..8] == b"hdlr" {
                        return self.push_frame(header, spec, None, Bytes::new(), None);
                    }
                }
                let need = if counted { 8 } else { 4 };
                if too_short(need) {
                    let err = Error::structural(
                        header.box_type,
                        header.start,
                        "payload too short for its fixed fields",
                    );
                    return self.leaf(stream, header, end, None, Some(err));
                }
                let Some(head) = stream.read(payload_start, need) else {
                    return Ok(starved(need));
                };
                let full =
                    FullBoxHeader::new(head[0], u32::from_be_bytes([0, head[1], head[2], head[3]]));
                (Some(full), head.slice(4..), counted)
            }
            BoxCategory::SampleEntry(kind) => {
                let probe = payload_len.map_or(10, |len| len.min(10));
                let Some(head) = stream.read(payload_start, probe) else {
                    return Ok(starved(probe));
                };
                let prefix_len = kind.prefix_len(&head).map(|n| n as u64);
                match prefix_len {
                    Some(need) if !too_short(need) => {
                        let Some(prefix) = stream.read(payload_start, need) else {
                            return Ok(starved(need));
                        };
                        (None, prefix, false)
                    }
                    _ => {
                        let err = Error::structural(
                            header.box_type,
                            header.start,
                            "sample entry shorter than its fixed fields",
                        );
                        return self.leaf(stream, header, end, None, Some(err));
                    }
                }
            }
            BoxCategory::Plain | BoxCategory::Full | BoxCategory::MediaData => {
                return self.leaf(stream, header, end, Some(spec), None);
            }
        };

        let entries = counted.then(|| {
            let mut raw = [0u8; 4];
            raw.copy_from_slice(&prefix[..4]);
            u32::from_be_bytes(raw)
        });
        self.push_frame(header, spec, full, prefix, entries)
    }

    fn push_frame(
        &mut self,
        header: Header,
        spec: BoxSpec,
        full: Option<FullBoxHeader>,
        prefix: Bytes,
        remaining_entries: Option<u32>,
    ) -> Result<Step> {
        let head_len = if full.is_some() { 4 } else { 0 } + prefix.len() as u64;
        let node = header.node(
            full,
            BoxBody::Container {
                prefix,
                children: Vec::new(),
            },
        );
        self.position = header.payload_start() + head_len;
        // A box that extends to the end inherits the end of its container.
        let end = match header.size {
            Some(size) => Some(header.start + size),
            None => self.stack.last().and_then(|frame| frame.end),
        };
        self.stack.push(Frame {
            node,
            end,
            spec,
            remaining_entries,
        });
        Ok(Step::Continue)
    }

    fn close_frame(&mut self) -> Step {
        match self.stack.pop() {
            Some(frame) => self.attach(frame.node),
            None => Step::Continue,
        }
    }

    fn attach(&mut self, node: Mp4Box) -> Step {
        let Some(parent) = self.stack.last_mut() else {
            debug!(
                box_type = %node.box_type,
                offset = node.offset,
                size = node.encoded_size(),
                "parsed top-level box"
            );
            return Step::Emit(node);
        };
        if !parent.spec.expects(node.box_type) {
            trace!(parent = %parent.node.box_type, child = %node.box_type, "unexpected child box");
        }
        trace!(box_type = %node.box_type, offset = node.offset, "parsed box");
        if let Some(remaining) = parent.remaining_entries.as_mut() {
            *remaining = remaining.saturating_sub(1);
        }
        if let BoxBody::Container { children, .. } = &mut parent.node.body {
            children.push(node);
        }
        Step::Continue
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::boxes::BoxFields;

    pub(crate) fn boxed(box_type: &[u8; 4], payload: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(payload.len() + 8);
        out.extend_from_slice(&(payload.len() as u32 + 8).to_be_bytes());
        out.extend_from_slice(box_type);
        out.extend_from_slice(payload);
        out
    }

    pub(crate) fn full_boxed(box_type: &[u8; 4], version: u8, flags: u32, payload: &[u8]) -> Vec<u8> {
        let mut body = vec![version];
        body.extend_from_slice(&flags.to_be_bytes()[1..]);
        body.extend_from_slice(payload);
        boxed(box_type, &body)
    }

    pub(crate) fn parse_all(data: &[u8], split: usize, strict: bool) -> Result<(Vec<Mp4Box>, Vec<ParseWarning>)> {
        let mut stream = StreamBuffer::new();
        let mut parser = BoxParser::default().strict(strict);
        let mut boxes = Vec::new();
        for chunk in data.chunks(split.max(1)) {
            stream.append(chunk.to_vec());
            loop {
                match parser.advance(&stream)? {
                    ParseEvent::Box(node) => boxes.push(node),
                    ParseEvent::NeedMoreData => break,
                    ParseEvent::End => unreachable!("not finished yet"),
                }
            }
        }
        parser.finish(stream.end_position());
        loop {
            match parser.advance(&stream)? {
                ParseEvent::Box(node) => boxes.push(node),
                ParseEvent::End => break,
                ParseEvent::NeedMoreData => unreachable!("finished input"),
            }
        }
        Ok((boxes, parser.take_warnings()))
    }

    fn sample_file() -> Vec<u8> {
        let mut ftyp = b"isom".to_vec();
        ftyp.extend_from_slice(&512u32.to_be_bytes());
        ftyp.extend_from_slice(b"isomiso2");
        let mut mdhd = vec![0u8; 20];
        mdhd[10] = 0x03;
        mdhd[11] = 0xe8;
        let mdia = boxed(b"mdia", &full_boxed(b"mdhd", 0, 0, &mdhd));
        let trak = boxed(b"trak", &mdia);
        let moov = boxed(b"moov", &[boxed(b"udta", &[]), trak].concat());
        [
            boxed(b"ftyp", &ftyp),
            moov,
            boxed(b"mdat", &[1, 2, 3, 4, 5]),
        ]
        .concat()
    }

    #[test]
    fn test_parse_tree() {
        let (boxes, warnings) = parse_all(&sample_file(), usize::MAX, false).unwrap();
        assert!(warnings.is_empty());
        let types: Vec<_> = boxes.iter().map(|b| b.box_type).collect();
        assert_eq!(types, vec![BoxType::FTYP, BoxType::MOOV, BoxType::MDAT]);

        let mdhd = boxes[1]
            .descend(&[BoxType::TRAK, BoxType::MDIA, BoxType::MDHD])
            .unwrap();
        let Some(BoxFields::MediaHeader(mdhd)) = mdhd.fields() else {
            panic!("mdhd not decoded");
        };
        assert_eq!(mdhd.timescale, 1000);

        let mdat = &boxes[2];
        assert_eq!(
            mdat.body,
            BoxBody::MediaData(MediaData::Range {
                offset: mdat.offset + 8,
                len: 5
            })
        );
    }

    #[test]
    fn test_split_invariance() {
        let data = sample_file();
        let (whole, _) = parse_all(&data, usize::MAX, false).unwrap();
        for split in [1, 3, 7, 16] {
            let (parts, _) = parse_all(&data, split, false).unwrap();
            assert_eq!(parts, whole, "split {split}");
        }
    }

    #[test]
    fn test_large_size_header() {
        let mut data = 1u32.to_be_bytes().to_vec();
        data.extend_from_slice(b"free");
        data.extend_from_slice(&20u64.to_be_bytes());
        data.extend_from_slice(&[9, 9, 9, 9]);
        let (boxes, _) = parse_all(&data, 5, false).unwrap();
        assert_eq!(boxes[0].layout, HeaderLayout::Large);
        assert_eq!(boxes[0].body, BoxBody::Opaque(Bytes::from_static(&[9, 9, 9, 9])));
        assert_eq!(boxes[0].encoded_size(), 20);
    }

    #[test]
    fn test_size_zero_top_level_waits_for_finish() {
        let mut data = boxed(b"free", &[]);
        data.extend_from_slice(&0u32.to_be_bytes());
        data.extend_from_slice(b"mdat");
        data.extend_from_slice(&[7; 32]);

        let mut stream = StreamBuffer::new();
        stream.append(data.clone());
        let mut parser = BoxParser::default();
        assert!(matches!(parser.advance(&stream).unwrap(), ParseEvent::Box(_)));
        assert!(matches!(
            parser.advance(&stream).unwrap(),
            ParseEvent::NeedMoreData
        ));
        parser.finish(stream.end_position());
        let ParseEvent::Box(mdat) = parser.advance(&stream).unwrap() else {
            panic!("expected mdat");
        };
        assert_eq!(mdat.layout, HeaderLayout::ToEnd);
        assert_eq!(
            mdat.body,
            BoxBody::MediaData(MediaData::Range { offset: 16, len: 32 })
        );
        assert!(matches!(parser.advance(&stream).unwrap(), ParseEvent::End));
    }

    #[test]
    fn test_child_overrun_keeps_parent_opaque() {
        // 'free' claims 64 bytes inside a 24-byte udta.
        let mut bad_child = 64u32.to_be_bytes().to_vec();
        bad_child.extend_from_slice(b"free");
        bad_child.extend_from_slice(&[0; 8]);
        let udta = boxed(b"udta", &bad_child);
        let data = [udta.clone(), boxed(b"free", &[1])].concat();

        let (boxes, warnings) = parse_all(&data, 4, false).unwrap();
        assert_eq!(boxes.len(), 2);
        assert_eq!(boxes[0].box_type, BoxType::UDTA);
        assert_eq!(
            boxes[0].body,
            BoxBody::Opaque(Bytes::copy_from_slice(&udta[8..]))
        );
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].box_type, BoxType::UDTA);

        let err = parse_all(&data, 4, true).unwrap_err();
        assert!(matches!(err, Error::Structural { box_type: BoxType::UDTA, .. }));
    }

    #[test]
    fn test_size_zero_entry_must_be_last_in_stsd() {
        let mut entries = 2u32.to_be_bytes().to_vec();
        entries.extend_from_slice(&0u32.to_be_bytes());
        entries.extend_from_slice(b"zzzz");
        let stsd = full_boxed(b"stsd", 0, 0, &entries);
        let stbl = boxed(b"stbl", &stsd);

        let err = parse_all(&stbl, usize::MAX, true).unwrap_err();
        assert!(matches!(err, Error::Structural { box_type: BoxType::STSD, .. }));

        let (boxes, warnings) = parse_all(&stbl, usize::MAX, false).unwrap();
        let stsd = boxes[0].child(BoxType::STSD).unwrap();
        assert!(matches!(stsd.body, BoxBody::Opaque(_)));
        assert_eq!(warnings.len(), 1);
    }

    #[test]
    fn test_size_zero_last_entry_is_accepted() {
        let mut entries = 1u32.to_be_bytes().to_vec();
        entries.extend_from_slice(&0u32.to_be_bytes());
        entries.extend_from_slice(b"zzzz");
        entries.extend_from_slice(&[1, 2, 3]);
        let stsd = full_boxed(b"stsd", 0, 0, &entries);

        let (boxes, warnings) = parse_all(&stsd, 2, true).unwrap();
        assert!(warnings.is_empty());
        let entry = &boxes[0].children()[0];
        assert_eq!(entry.layout, HeaderLayout::ToEnd);
        assert_eq!(entry.body, BoxBody::Opaque(Bytes::from_static(&[1, 2, 3])));
    }

    #[test]
    fn test_trailing_bytes_kept() {
        let udta = boxed(b"udta", &[boxed(b"free", &[]), vec![0, 0, 0]].concat());
        let (boxes, _) = parse_all(&udta, 1, false).unwrap();
        assert_eq!(boxes[0].children().len(), 1);
        assert_eq!(boxes[0].trailing.as_ref(), &[0, 0, 0]);
        assert_eq!(boxes[0].encoded_size(), udta.len() as u64);
    }

    #[test]
    fn test_unsupported_version_is_warning() {
        let mvhd = full_boxed(b"mvhd", 3, 0, &[0; 100]);
        let (boxes, warnings) = parse_all(&mvhd, usize::MAX, false).unwrap();
        assert_eq!(boxes[0].full.unwrap().version, 3);
        assert!(matches!(boxes[0].body, BoxBody::Opaque(_)));
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].message.contains("Unsupported version 3"));
    }

    #[test]
    fn test_truncated_after_finish() {
        let data = boxed(b"free", &[0; 16]);
        let err = parse_all(&data[..12], usize::MAX, false).unwrap_err();
        assert!(matches!(err, Error::TruncatedInput { offset: 0, needed: 12 }));
    }

    #[test]
    fn test_malformed_top_level_header_is_fatal() {
        let mut data = 4u32.to_be_bytes().to_vec();
        data.extend_from_slice(b"free");
        let err = parse_all(&data, usize::MAX, false).unwrap_err();
        assert!(matches!(err, Error::Structural { .. }));
    }

    #[test]
    fn test_large_size_past_u64_is_structural() {
        let mut data = boxed(b"free", &[]);
        data.extend_from_slice(&1u32.to_be_bytes());
        data.extend_from_slice(b"free");
        data.extend_from_slice(&u64::MAX.to_be_bytes());
        let err = parse_all(&data, usize::MAX, false).unwrap_err();
        assert!(matches!(err, Error::Structural { offset: 8, .. }));

        let mut nested = 1u32.to_be_bytes().to_vec();
        nested.extend_from_slice(b"free");
        nested.extend_from_slice(&u64::MAX.to_be_bytes());
        let moov = [boxed(b"free", &[]), boxed(b"moov", &nested)].concat();
        let (boxes, warnings) = parse_all(&moov, 5, false).unwrap();
        assert!(matches!(boxes[1].body, BoxBody::Opaque(_)));
        assert_eq!(warnings.len(), 1);
    }

    #[test]
    fn test_uuid_box() {
        let mut payload = crate::boxes::UUID_TFXD.to_vec();
        payload.extend_from_slice(&[1, 0, 0, 0]);
        payload.extend_from_slice(&[0; 16]);
        let data = boxed(b"uuid", &payload);
        let (boxes, _) = parse_all(&data, 3, false).unwrap();
        assert_eq!(boxes[0].uuid, Some(crate::boxes::UUID_TFXD));
        assert_eq!(boxes[0].full.unwrap().version, 1);
        assert_eq!(boxes[0].encoded_size(), data.len() as u64);
    }
}
