//! Streaming reader for DICOM Part 10 files.
//!
//! The parser walks the data set element by element and hands every decoded
//! pixel frame to a [`parser::FrameSink`] as soon as its bytes are read, so a
//! caller can start working on the first frame while the rest of the file is
//! still being parsed.

pub mod codec;
pub mod element;
pub mod error;
pub mod frame;
pub mod parser;
mod reader;
#[cfg(any(test, feature = "test-util"))]
pub mod synth;
pub mod tag;

pub use codec::{EncodedImage, OutputFormat};
pub use element::{Dataset, Element, Value};
pub use error::{CodecError, ParseError, TagError};
pub use frame::{EncapsulatedFrame, Frame, ImageGeometry, NativeFrame};
pub use parser::{FrameSink, SinkClosed, parse_until_eof};
pub use tag::{Tag, Vr};
