use thiserror::Error;

use crate::tag::Tag;

/// Errors raised while reading a Part 10 stream.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("io error at offset {offset}: {source}")]
    Io {
        offset: u64,
        #[source]
        source: std::io::Error,
    },

    #[error("unexpected end of input at offset {offset}")]
    UnexpectedEof { offset: u64 },

    #[error("missing DICM magic after preamble")]
    MissingMagic,

    #[error("file meta group does not start with (0002,0000) group length")]
    MissingMetaGroupLength,

    #[error("missing required attribute {0}")]
    MissingAttribute(&'static str),

    #[error("unsupported transfer syntax {0}")]
    UnsupportedTransferSyntax(String),

    #[error("invalid element {tag} at offset {offset}: {reason}")]
    InvalidElement {
        tag: Tag,
        offset: u64,
        reason: String,
    },

    #[error("frame sink refused frame {index}")]
    Sink { index: usize },
}

/// Errors raised while turning a frame into an encoded image.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("unsupported frame layout: {0}")]
    Unsupported(String),

    #[error("frame data too short: expected {expected} bytes, got {actual}")]
    ShortFrame { expected: usize, actual: usize },

    #[error("compressed frame could not be decoded: {0}")]
    Decode(#[source] image::ImageError),

    #[error("png encoding failed: {0}")]
    Png(#[source] image::ImageError),

    #[error("jpeg encoding failed: {0}")]
    Jpeg(#[from] jpeg_encoder::EncodingError),

    #[error("image {width}x{height} exceeds jpeg dimension limits")]
    TooLarge { width: u32, height: u32 },
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TagError {
    #[error("unknown tag name {0:?}")]
    UnknownName(String),
}
