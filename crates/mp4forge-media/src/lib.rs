//! mp4forge-media: ISO BMFF (MP4) box reading, writing and fragmenting
//!
//! This crate parses MP4 files incrementally, keeps their box tree in memory
//! and writes it back byte for byte. Files can be extended with new movie
//! fragments or authored from scratch.
//!
//! # Modules
//!
//! - `cursor` - Big-endian byte cursor with back-patching
//! - `stream` - Chunked input buffer addressed by file position
//! - `boxes` - Generic box model, decoded fields and the box registry
//! - `parser` - Resumable box parser
//! - `writer` - Box serialization
//! - `mp4` - File model: tracks, samples, fragments, authoring
//! - `fmp4` - Builders for init segments and `moof` boxes
//!
//! # Streaming
//!
//! Input arrives in chunks of any size:
//!
//! 1. [`Mp4File::append`] buffers a chunk
//! 2. [`Mp4File::resume`] parses every complete top-level box and returns
//!    [`Progress::NeedMoreData`] when nothing new could be parsed
//! 3. [`Mp4File::finish`] declares the end of input so that a box extending
//!    to the end of the file can be completed
//!
//! `mdat` payloads are never copied into the tree; samples are read from the
//! buffered input by file position.

pub mod boxes;
pub mod cursor;
pub mod error;
pub mod fmp4;
pub mod mp4;
pub mod parser;
pub mod stream;
pub mod writer;

pub use boxes::{BoxBody, BoxFields, BoxRegistry, BoxType, MediaData, Mp4Box};
pub use cursor::ByteCursor;
pub use error::{Error, Result};
pub use fmp4::{InitSegment, TrackOptions};
pub use mp4::{
    HandlerType, MovieInfo, MovieOptions, Mp4File, Progress, ReadOptions, Sample, SampleOptions,
    Track, TreeDelta,
};
pub use parser::{BoxParser, ParseEvent, ParseWarning};
pub use stream::StreamBuffer;
pub use writer::MediaSource;
