//! Writer for small synthetic Part 10 files.

use crate::{
    element::UNDEFINED_LENGTH,
    tag::{self, Tag, Vr},
};

pub const EXPLICIT_VR_LE: &str = "1.2.840.10008.1.2.1";
pub const IMPLICIT_VR_LE: &str = "1.2.840.10008.1.2";
pub const JPEG_BASELINE: &str = "1.2.840.10008.1.2.4.50";

const SECONDARY_CAPTURE: &str = "1.2.840.10008.5.1.4.1.1.7";

pub struct DicomBuilder {
    syntax: &'static str,
    explicit: bool,
    elements: Vec<(Tag, Vec<u8>)>,
}

impl DicomBuilder {
    pub fn explicit_le() -> Self {
        Self::with_syntax(EXPLICIT_VR_LE)
    }

    pub fn implicit_le() -> Self {
        Self::with_syntax(IMPLICIT_VR_LE)
    }

    pub fn with_syntax(syntax: &'static str) -> Self {
        Self {
            syntax,
            explicit: syntax != IMPLICIT_VR_LE,
            elements: Vec::new(),
        }
    }

    pub fn string(mut self, tag: Tag, vr: Vr, value: &str) -> Self {
        let encoded = encode(tag, vr, &pad_string(vr, value), self.explicit);
        self.elements.push((tag, encoded));
        self
    }

    pub fn u16(mut self, tag: Tag, value: u16) -> Self {
        let encoded = encode(tag, Vr::US, &value.to_le_bytes(), self.explicit);
        self.elements.push((tag, encoded));
        self
    }

    /// Sequence of items with undefined lengths; each item is a list of
    /// `(tag, vr, text)` string elements.
    pub fn sequence(mut self, tag: Tag, items: &[Vec<(Tag, Vr, &str)>]) -> Self {
        let mut body = Vec::new();
        for item in items {
            body.extend_from_slice(&item_header(tag::ITEM, UNDEFINED_LENGTH));
            for (t, vr, v) in item {
                body.extend(encode(*t, *vr, &pad_string(*vr, v), self.explicit));
            }
            body.extend_from_slice(&item_header(tag::ITEM_DELIMITATION, 0));
        }
        body.extend_from_slice(&item_header(tag::SEQUENCE_DELIMITATION, 0));

        let mut encoded = element_header(tag, Vr::SQ, UNDEFINED_LENGTH, self.explicit);
        encoded.extend(body);
        self.elements.push((tag, encoded));
        self
    }

    fn image_module(self, rows: u16, columns: u16, frames: usize) -> Self {
        self.u16(tag::SAMPLES_PER_PIXEL, 1)
            .string(tag::PHOTOMETRIC_INTERPRETATION, Vr::CS, "MONOCHROME2")
            .string(tag::NUMBER_OF_FRAMES, Vr::IS, &frames.to_string())
            .u16(tag::ROWS, rows)
            .u16(tag::COLUMNS, columns)
            .u16(tag::BITS_ALLOCATED, 8)
            .u16(tag::BITS_STORED, 8)
            .u16(Tag::new(0x0028, 0x0102), 7)
            .u16(tag::PIXEL_REPRESENTATION, 0)
    }

    /// 8-bit MONOCHROME2 native pixel data, one `rows * columns` buffer per frame.
    pub fn grayscale_frames(self, rows: u16, columns: u16, frames: &[Vec<u8>]) -> Self {
        let data: Vec<u8> = frames.concat();
        self.image_module(rows, columns, frames.len())
            .native_pixel_data(data)
    }

    /// Raw native pixel data element; the caller sets the image module.
    pub fn native_pixel_data(mut self, mut data: Vec<u8>) -> Self {
        if data.len() % 2 == 1 {
            data.push(0);
        }
        let encoded = encode(tag::PIXEL_DATA, Vr::OW, &data, self.explicit);
        self.elements.push((tag::PIXEL_DATA, encoded));
        self
    }

    /// Encapsulated pixel data, one fragment per frame.
    pub fn encapsulated_frames(self, rows: u16, columns: u16, frames: &[Vec<u8>]) -> Self {
        let mut builder = self.image_module(rows, columns, frames.len());
        let mut encoded = element_header(tag::PIXEL_DATA, Vr::OB, UNDEFINED_LENGTH, true);
        encoded.extend_from_slice(&item_header(tag::ITEM, 0));
        for frame in frames {
            let mut fragment = frame.clone();
            if fragment.len() % 2 == 1 {
                fragment.push(0);
            }
            encoded.extend_from_slice(&item_header(tag::ITEM, fragment.len() as u32));
            encoded.extend(fragment);
        }
        encoded.extend_from_slice(&item_header(tag::SEQUENCE_DELIMITATION, 0));
        builder.elements.push((tag::PIXEL_DATA, encoded));
        builder
    }

    pub fn build(mut self) -> Vec<u8> {
        let mut meta = Vec::new();
        meta.extend(encode(
            Tag::new(0x0002, 0x0001),
            Vr::OB,
            &[0x00, 0x01],
            true,
        ));
        meta.extend(encode(
            Tag::new(0x0002, 0x0002),
            Vr::UI,
            &pad_string(Vr::UI, SECONDARY_CAPTURE),
            true,
        ));
        meta.extend(encode(
            Tag::new(0x0002, 0x0003),
            Vr::UI,
            &pad_string(Vr::UI, "1.2.826.0.1.3680043.10.1"),
            true,
        ));
        meta.extend(encode(
            tag::TRANSFER_SYNTAX_UID,
            Vr::UI,
            &pad_string(Vr::UI, self.syntax),
            true,
        ));

        let mut out = vec![0u8; 128];
        out.extend_from_slice(b"DICM");
        out.extend(encode(
            tag::FILE_META_GROUP_LENGTH,
            Vr::UL,
            &(meta.len() as u32).to_le_bytes(),
            true,
        ));
        out.extend(meta);

        self.elements.sort_by_key(|(tag, _)| *tag);
        for (_, encoded) in self.elements {
            out.extend(encoded);
        }
        out
    }
}

fn pad_string(vr: Vr, value: &str) -> Vec<u8> {
    let mut bytes = value.as_bytes().to_vec();
    if bytes.len() % 2 == 1 {
        bytes.push(if vr == Vr::UI { 0 } else { b' ' });
    }
    bytes
}

fn item_header(tag: Tag, length: u32) -> [u8; 8] {
    let mut out = [0u8; 8];
    out[0..2].copy_from_slice(&tag.group.to_le_bytes());
    out[2..4].copy_from_slice(&tag.element.to_le_bytes());
    out[4..8].copy_from_slice(&length.to_le_bytes());
    out
}

fn element_header(tag: Tag, vr: Vr, length: u32, explicit: bool) -> Vec<u8> {
    let mut out = Vec::with_capacity(12);
    out.extend_from_slice(&tag.group.to_le_bytes());
    out.extend_from_slice(&tag.element.to_le_bytes());
    if !explicit {
        out.extend_from_slice(&length.to_le_bytes());
    } else if vr.has_long_length() {
        out.extend_from_slice(vr.as_str().as_bytes());
        out.extend_from_slice(&[0, 0]);
        out.extend_from_slice(&length.to_le_bytes());
    } else {
        out.extend_from_slice(vr.as_str().as_bytes());
        out.extend_from_slice(&(length as u16).to_le_bytes());
    }
    out
}

fn encode(tag: Tag, vr: Vr, value: &[u8], explicit: bool) -> Vec<u8> {
    let mut out = element_header(tag, vr, value.len() as u32, explicit);
    out.extend_from_slice(value);
    out
}
