use std::io::Read;

use bytes::Bytes;
use thiserror::Error;

use crate::{
    element::{Dataset, Element, PixelDataSummary, UNDEFINED_LENGTH, Value},
    error::ParseError,
    frame::{EncapsulatedFrame, Frame, ImageGeometry, NativeFrame, declared_frames},
    reader::ByteReader,
    tag::{self, Tag, Vr},
};

const PREAMBLE_LEN: u64 = 128;
const MAGIC: &[u8; 4] = b"DICM";

const IMPLICIT_VR_LE: &str = "1.2.840.10008.1.2";
const EXPLICIT_VR_LE: &str = "1.2.840.10008.1.2.1";
const EXPLICIT_VR_BE: &str = "1.2.840.10008.1.2.2";
const DEFLATED_EXPLICIT_VR_LE: &str = "1.2.840.10008.1.2.1.99";

/// Returned by a sink that no longer accepts frames.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("frame sink closed")]
pub struct SinkClosed;

/// Receives frames in parse order while the file is being read.
pub trait FrameSink {
    fn send(&mut self, frame: Frame) -> Result<(), SinkClosed>;
}

impl<F> FrameSink for F
where
    F: FnMut(Frame) -> Result<(), SinkClosed>,
{
    fn send(&mut self, frame: Frame) -> Result<(), SinkClosed> {
        self(frame)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransferSyntax {
    pub uid: String,
    pub explicit_vr: bool,
    pub encapsulated: bool,
}

impl TransferSyntax {
    pub fn from_uid(uid: &str) -> Result<Self, ParseError> {
        let uid = uid.trim_end_matches(|c| c == '\0' || c == ' ');
        let (explicit_vr, encapsulated) = match uid {
            IMPLICIT_VR_LE => (false, false),
            EXPLICIT_VR_LE => (true, false),
            EXPLICIT_VR_BE | DEFLATED_EXPLICIT_VR_LE => {
                return Err(ParseError::UnsupportedTransferSyntax(uid.to_string()));
            }
            // JPEG, JPEG-LS, JPEG 2000, RLE, MPEG...
            _ if uid.starts_with("1.2.840.10008.1.2.") => (true, true),
            _ => return Err(ParseError::UnsupportedTransferSyntax(uid.to_string())),
        };
        Ok(Self {
            uid: uid.to_string(),
            explicit_vr,
            encapsulated,
        })
    }
}

#[derive(Clone, Copy, Debug)]
struct Header {
    tag: Tag,
    vr: Vr,
    length: u32,
}

/// Parses a Part 10 stream to the end, sending pixel frames to `sink` as
/// they are read. Without a sink the pixel data is skipped and summarized.
pub fn parse_until_eof<R: Read>(
    source: R,
    sink: Option<&mut dyn FrameSink>,
) -> Result<Dataset, ParseError> {
    let mut parser = Parser {
        reader: ByteReader::new(source),
        sink,
        frames: 0,
    };
    parser.run()
}

struct Parser<'s, R> {
    reader: ByteReader<R>,
    sink: Option<&'s mut dyn FrameSink>,
    frames: usize,
}

impl<R: Read> Parser<'_, R> {
    fn run(&mut self) -> Result<Dataset, ParseError> {
        self.reader.skip(PREAMBLE_LEN)?;
        let mut magic = [0u8; 4];
        self.reader.read_exact(&mut magic)?;
        if &magic != MAGIC {
            return Err(ParseError::MissingMagic);
        }

        let mut dataset = Dataset::new();
        let syntax = self.read_meta(&mut dataset)?;
        log::debug!(
            "transfer syntax {} (explicit: {}, encapsulated: {})",
            syntax.uid,
            syntax.explicit_vr,
            syntax.encapsulated
        );

        while let Some(header) = self.read_header(syntax.explicit_vr)? {
            if header.tag.is_delimiter_group() {
                return Err(self.invalid(header.tag, "delimiter outside of a sequence"));
            }
            let element = self.read_element(header, syntax.explicit_vr, Some(&dataset))?;
            dataset.push(element);
        }

        log::debug!(
            "parsed {} top-level elements, {} frames",
            dataset.len(),
            self.frames
        );
        Ok(dataset)
    }

    fn read_meta(&mut self, dataset: &mut Dataset) -> Result<TransferSyntax, ParseError> {
        let header = self
            .read_header(true)?
            .ok_or(ParseError::UnexpectedEof {
                offset: self.reader.position(),
            })?;
        if header.tag != tag::FILE_META_GROUP_LENGTH || header.length != 4 {
            return Err(ParseError::MissingMetaGroupLength);
        }
        let group_len = self.reader.read_u32()?;
        dataset.push(Element {
            tag: header.tag,
            vr: Vr::UL,
            length: 4,
            value: Value::Unsigned(vec![group_len as u64]),
        });

        let end = self.reader.position() + group_len as u64;
        while self.reader.position() < end {
            let header = self.read_header(true)?.ok_or(ParseError::UnexpectedEof {
                offset: self.reader.position(),
            })?;
            if header.tag.group != 0x0002 {
                return Err(self.invalid(header.tag, "element outside file meta group"));
            }
            let element = self.read_element(header, true, None)?;
            dataset.push(element);
        }

        let uid = dataset
            .string(tag::TRANSFER_SYNTAX_UID)
            .ok_or(ParseError::MissingAttribute("TransferSyntaxUID"))?;
        TransferSyntax::from_uid(uid)
    }

    /// `None` on a clean end of input at an element boundary.
    fn read_header(&mut self, explicit: bool) -> Result<Option<Header>, ParseError> {
        let mut raw = [0u8; 4];
        if !self.reader.read_exact_or_eof(&mut raw)? {
            return Ok(None);
        }
        let tag = Tag::new(
            u16::from_le_bytes([raw[0], raw[1]]),
            u16::from_le_bytes([raw[2], raw[3]]),
        );

        if tag.is_delimiter_group() {
            let length = self.reader.read_u32()?;
            return Ok(Some(Header {
                tag,
                vr: Vr::UN,
                length,
            }));
        }

        if !explicit {
            let length = self.reader.read_u32()?;
            return Ok(Some(Header {
                tag,
                vr: tag::implicit_vr(tag),
                length,
            }));
        }

        let mut vr_bytes = [0u8; 2];
        self.reader.read_exact(&mut vr_bytes)?;
        let vr = Vr::from_bytes(vr_bytes).ok_or_else(|| {
            self.invalid(
                tag,
                &format!("unknown VR {:?}", String::from_utf8_lossy(&vr_bytes)),
            )
        })?;
        let length = if vr.has_long_length() {
            self.reader.read_u16()?;
            self.reader.read_u32()?
        } else {
            self.reader.read_u16()? as u32
        };
        Ok(Some(Header { tag, vr, length }))
    }

    fn read_element(
        &mut self,
        header: Header,
        explicit: bool,
        top: Option<&Dataset>,
    ) -> Result<Element, ParseError> {
        let Header { vr, length, .. } = header;

        let value = match top {
            Some(top) if header.tag == tag::PIXEL_DATA => self.read_pixel_data(header, top)?,
            _ if vr == Vr::SQ || (vr == Vr::UN && length == UNDEFINED_LENGTH) => {
                // undefined length UN is an implicit VR sequence
                let explicit = explicit && vr == Vr::SQ;
                Value::Sequence(self.read_sequence(length, explicit)?)
            }
            _ if length == UNDEFINED_LENGTH => {
                let fragments = self.read_fragments(header.tag)?;
                Value::Bytes(fragments.concat())
            }
            _ => {
                let raw = self.reader.read_vec(length as usize)?;
                decode_value(vr, &raw)
            }
        };

        Ok(Element {
            tag: header.tag,
            vr,
            length,
            value,
        })
    }

    fn read_sequence(&mut self, length: u32, explicit: bool) -> Result<Vec<Dataset>, ParseError> {
        let mut items = Vec::new();
        let end = (length != UNDEFINED_LENGTH).then(|| self.reader.position() + length as u64);
        loop {
            if end.is_some_and(|end| self.reader.position() >= end) {
                break;
            }
            let header = self.read_item_header()?;
            match header.tag {
                tag::ITEM => items.push(self.read_item(header.length, explicit)?),
                tag::SEQUENCE_DELIMITATION if end.is_none() => break,
                other => return Err(self.invalid(other, "expected sequence item")),
            }
        }
        Ok(items)
    }

    fn read_item(&mut self, length: u32, explicit: bool) -> Result<Dataset, ParseError> {
        let mut item = Dataset::new();
        let end = (length != UNDEFINED_LENGTH).then(|| self.reader.position() + length as u64);
        loop {
            if end.is_some_and(|end| self.reader.position() >= end) {
                break;
            }
            let header = self.read_header(explicit)?.ok_or(ParseError::UnexpectedEof {
                offset: self.reader.position(),
            })?;
            if header.tag == tag::ITEM_DELIMITATION {
                break;
            }
            let element = self.read_element(header, explicit, None)?;
            item.push(element);
        }
        Ok(item)
    }

    fn read_item_header(&mut self) -> Result<Header, ParseError> {
        let group = self.reader.read_u16()?;
        let element = self.reader.read_u16()?;
        let length = self.reader.read_u32()?;
        Ok(Header {
            tag: Tag::new(group, element),
            vr: Vr::UN,
            length,
        })
    }

    /// Items of an encapsulated value, basic offset table included.
    fn read_fragments(&mut self, owner: Tag) -> Result<Vec<Vec<u8>>, ParseError> {
        let mut fragments = Vec::new();
        loop {
            let header = self.read_item_header()?;
            match header.tag {
                tag::ITEM if header.length != UNDEFINED_LENGTH => {
                    fragments.push(self.reader.read_vec(header.length as usize)?);
                }
                tag::SEQUENCE_DELIMITATION => break,
                _ => return Err(self.invalid(owner, "malformed encapsulated fragment")),
            }
        }
        Ok(fragments)
    }

    fn read_pixel_data(&mut self, header: Header, top: &Dataset) -> Result<Value, ParseError> {
        let expected = declared_frames(top);
        if header.length == UNDEFINED_LENGTH {
            self.read_encapsulated_pixels(expected)
        } else {
            self.read_native_pixels(header, top, expected)
        }
    }

    fn read_native_pixels(
        &mut self,
        header: Header,
        top: &Dataset,
        expected: usize,
    ) -> Result<Value, ParseError> {
        let geometry = ImageGeometry::from_dataset(top)?;
        let frame_len = geometry.frame_len();
        if frame_len == 0 {
            return Err(self.invalid(header.tag, "empty image geometry"));
        }

        let length = header.length as u64;
        let frames = expected.min((length / frame_len as u64) as usize);
        if frames < expected {
            log::warn!(
                "pixel data holds {} of {} declared frames",
                frames,
                expected
            );
        }

        for index in 0..frames {
            if self.sink.is_some() {
                let data = self.reader.read_vec(frame_len)?;
                self.emit(Frame::Native(NativeFrame {
                    index,
                    geometry: geometry.clone(),
                    data: Bytes::from(data),
                }))?;
            } else {
                self.reader.skip(frame_len as u64)?;
            }
        }
        // trailing padding byte
        self.reader.skip(length - (frames * frame_len) as u64)?;

        Ok(Value::PixelData(PixelDataSummary {
            frames,
            encapsulated: false,
        }))
    }

    fn read_encapsulated_pixels(&mut self, expected: usize) -> Result<Value, ParseError> {
        let offset_table = self.read_item_header()?;
        if offset_table.tag != tag::ITEM || offset_table.length == UNDEFINED_LENGTH {
            return Err(self.invalid(tag::PIXEL_DATA, "missing basic offset table"));
        }
        self.reader.skip(offset_table.length as u64)?;

        // A single-frame image may be split over several fragments.
        let mut pending: Vec<u8> = Vec::new();
        let mut fragments = 0usize;
        let mut frames = 0usize;
        loop {
            let header = self.read_item_header()?;
            match header.tag {
                tag::ITEM if header.length != UNDEFINED_LENGTH => {
                    fragments += 1;
                    if self.sink.is_none() {
                        self.reader.skip(header.length as u64)?;
                    } else if expected <= 1 {
                        let data = self.reader.read_vec(header.length as usize)?;
                        pending.extend_from_slice(&data);
                    } else {
                        let data = self.reader.read_vec(header.length as usize)?;
                        self.emit(Frame::Encapsulated(EncapsulatedFrame {
                            index: frames,
                            data: Bytes::from(data),
                        }))?;
                        frames += 1;
                    }
                }
                tag::SEQUENCE_DELIMITATION => break,
                _ => return Err(self.invalid(tag::PIXEL_DATA, "malformed encapsulated fragment")),
            }
        }

        if expected <= 1 && fragments > 0 {
            if self.sink.is_some() {
                self.emit(Frame::Encapsulated(EncapsulatedFrame {
                    index: 0,
                    data: Bytes::from(pending),
                }))?;
            }
            frames = 1;
        } else if self.sink.is_none() {
            frames = fragments;
        }

        Ok(Value::PixelData(PixelDataSummary {
            frames,
            encapsulated: true,
        }))
    }

    fn emit(&mut self, frame: Frame) -> Result<(), ParseError> {
        let index = frame.index();
        if let Some(sink) = self.sink.as_mut() {
            log::trace!("emit {}", frame);
            sink.send(frame).map_err(|_| ParseError::Sink { index })?;
            self.frames += 1;
        }
        Ok(())
    }

    fn invalid(&self, tag: Tag, reason: &str) -> ParseError {
        ParseError::InvalidElement {
            tag,
            offset: self.reader.position(),
            reason: reason.to_string(),
        }
    }
}

fn decode_value(vr: Vr, raw: &[u8]) -> Value {
    match vr {
        _ if vr.is_string() => {
            let text = String::from_utf8_lossy(raw);
            let text = text.trim_end_matches(|c| c == '\0' || c == ' ');
            if vr.is_single_text() {
                Value::Strings(vec![text.to_string()])
            } else {
                Value::Strings(text.split('\\').map(|s| s.trim().to_string()).collect())
            }
        }
        Vr::US => Value::Unsigned(
            raw.chunks_exact(2)
                .map(|c| u16::from_le_bytes([c[0], c[1]]) as u64)
                .collect(),
        ),
        Vr::UL => Value::Unsigned(
            raw.chunks_exact(4)
                .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]) as u64)
                .collect(),
        ),
        Vr::UV => Value::Unsigned(
            raw.chunks_exact(8)
                .map(|c| u64::from_le_bytes(c.try_into().unwrap_or([0; 8])))
                .collect(),
        ),
        Vr::SS => Value::Signed(
            raw.chunks_exact(2)
                .map(|c| i16::from_le_bytes([c[0], c[1]]) as i64)
                .collect(),
        ),
        Vr::SL => Value::Signed(
            raw.chunks_exact(4)
                .map(|c| i32::from_le_bytes([c[0], c[1], c[2], c[3]]) as i64)
                .collect(),
        ),
        Vr::SV => Value::Signed(
            raw.chunks_exact(8)
                .map(|c| i64::from_le_bytes(c.try_into().unwrap_or([0; 8])))
                .collect(),
        ),
        Vr::FL => Value::Floats(
            raw.chunks_exact(4)
                .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]) as f64)
                .collect(),
        ),
        Vr::FD => Value::Floats(
            raw.chunks_exact(8)
                .map(|c| f64::from_le_bytes(c.try_into().unwrap_or([0; 8])))
                .collect(),
        ),
        Vr::AT => Value::Tags(
            raw.chunks_exact(4)
                .map(|c| {
                    Tag::new(
                        u16::from_le_bytes([c[0], c[1]]),
                        u16::from_le_bytes([c[2], c[3]]),
                    )
                })
                .collect(),
        ),
        _ => Value::Bytes(raw.to_vec()),
    }
}

#[cfg(test)]
#[path = "parser_test.rs"]
mod parser_test;
