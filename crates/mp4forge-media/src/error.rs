//! Error types for mp4forge-media.

use crate::boxes::BoxType;
use std::io;
use thiserror::Error;

/// Result type for mp4forge-media operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for mp4forge-media operations.
///
/// Running out of buffered input while parsing is not an error: the parser
/// reports it through [`crate::Progress::NeedMoreData`].
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Input ended in the middle of a box after the caller declared it finished.
    #[error("Truncated input at offset {offset}: {needed} more bytes expected")]
    TruncatedInput { offset: u64, needed: u64 },

    /// Size, offset or table inconsistency inside a box.
    #[error("Structural error in '{box_type}' at offset {offset}: {reason}")]
    Structural {
        box_type: BoxType,
        offset: u64,
        reason: String,
    },

    /// A full box version this crate does not decode.
    #[error("Unsupported version {version} for '{box_type}'")]
    UnsupportedVersion { box_type: BoxType, version: u8 },

    /// Cursor read or patch outside the buffer.
    #[error("Buffer underflow at position {position}: need {need} bytes, have {have}")]
    BufferUnderflow {
        position: usize,
        need: usize,
        have: usize,
    },

    /// Sample or media bytes are not (or no longer) buffered.
    #[error("Data unavailable: {len} bytes at offset {offset}")]
    DataUnavailable { offset: u64, len: u64 },

    /// A chunk was appended before the current end of input.
    #[error("Out-of-order append: chunk starts at {got}, input already ends at {expected}")]
    OutOfOrderAppend { expected: u64, got: u64 },

    /// No track with this ID.
    #[error("Track not found: {0}")]
    TrackNotFound(u32),

    /// Missing required box.
    #[error("Missing required box: {0}")]
    MissingBox(&'static str),

    /// Unsupported feature or operation.
    #[error("Unsupported: {0}")]
    Unsupported(String),
}

impl Error {
    /// Create a structural error.
    pub fn structural(box_type: BoxType, offset: u64, reason: impl Into<String>) -> Self {
        Self::Structural {
            box_type,
            offset,
            reason: reason.into(),
        }
    }

    /// Create an unsupported error.
    pub fn unsupported(msg: impl Into<String>) -> Self {
        Self::Unsupported(msg.into())
    }

    /// Whether the parser may skip the damaged box and continue with its siblings.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Structural { .. } | Self::UnsupportedVersion { .. } | Self::BufferUnderflow { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::structural(BoxType::STSZ, 1024, "sample count mismatch");
        assert_eq!(
            err.to_string(),
            "Structural error in 'stsz' at offset 1024: sample count mismatch"
        );

        let err = Error::UnsupportedVersion {
            box_type: BoxType::MVHD,
            version: 2,
        };
        assert_eq!(err.to_string(), "Unsupported version 2 for 'mvhd'");
    }

    #[test]
    fn test_recoverable_kinds() {
        assert!(Error::structural(BoxType::MOOV, 0, "bad").is_recoverable());
        assert!(!Error::TruncatedInput { offset: 0, needed: 8 }.is_recoverable());
        assert!(!Error::TrackNotFound(3).is_recoverable());
    }
}
