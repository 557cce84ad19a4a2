//! Protocol error types

use std::fmt;

/// Errors that can occur while decoding a frame from the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// Command or header bytes are not valid UTF-8
    InvalidUtf8,
    /// Header line has no `:` separator
    MalformedHeader,
    /// `content-length` header is not a non-negative integer
    InvalidContentLength,
    /// The byte after a `content-length` body was not the NUL terminator
    MissingNullTerminator,
    /// Buffered data exceeds the maximum frame size without completing a frame
    FrameTooLarge,
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidUtf8 => write!(f, "invalid UTF-8 in command or header"),
            Self::MalformedHeader => write!(f, "header line missing ':' separator"),
            Self::InvalidContentLength => write!(f, "invalid content-length header"),
            Self::MissingNullTerminator => write!(f, "frame body not NUL-terminated"),
            Self::FrameTooLarge => write!(f, "frame exceeds maximum size"),
        }
    }
}

impl std::error::Error for DecodeError {}
