use std::fmt::{Display, Formatter};

use bytes::Bytes;

use crate::{element::Dataset, error::ParseError, tag};

/// Image pixel module attributes needed to interpret native pixel data.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ImageGeometry {
    pub rows: u16,
    pub columns: u16,
    pub samples_per_pixel: u16,
    pub bits_allocated: u16,
    pub bits_stored: u16,
    // 0 = unsigned, 1 = two's complement
    pub pixel_representation: u16,
    // 0 = interleaved, 1 = planar
    pub planar_configuration: u16,
    // "MONOCHROME2", "RGB", ...
    pub photometric: String,
}

impl ImageGeometry {
    pub fn from_dataset(ds: &Dataset) -> Result<Self, ParseError> {
        let required = |t: tag::Tag, name: &'static str| {
            ds.int(t)
                .and_then(|v| u16::try_from(v).ok())
                .ok_or(ParseError::MissingAttribute(name))
        };
        let bits_allocated = required(tag::BITS_ALLOCATED, "BitsAllocated")?;
        Ok(Self {
            rows: required(tag::ROWS, "Rows")?,
            columns: required(tag::COLUMNS, "Columns")?,
            samples_per_pixel: ds
                .int(tag::SAMPLES_PER_PIXEL)
                .and_then(|v| u16::try_from(v).ok())
                .unwrap_or(1),
            bits_allocated,
            bits_stored: ds
                .int(tag::BITS_STORED)
                .and_then(|v| u16::try_from(v).ok())
                .unwrap_or(bits_allocated),
            pixel_representation: ds
                .int(tag::PIXEL_REPRESENTATION)
                .and_then(|v| u16::try_from(v).ok())
                .unwrap_or(0),
            planar_configuration: ds
                .int(tag::PLANAR_CONFIGURATION)
                .and_then(|v| u16::try_from(v).ok())
                .unwrap_or(0),
            photometric: ds
                .string(tag::PHOTOMETRIC_INTERPRETATION)
                .unwrap_or("MONOCHROME2")
                .to_string(),
        })
    }

    pub fn pixel_count(&self) -> usize {
        self.rows as usize * self.columns as usize
    }

    /// Bytes per native frame, rounded up to whole bytes.
    pub fn frame_len(&self) -> usize {
        let bits = self.pixel_count()
            * self.samples_per_pixel as usize
            * self.bits_allocated as usize;
        bits.div_ceil(8)
    }
}

/// Number of frames declared by `NumberOfFrames`, 1 when absent.
pub fn declared_frames(ds: &Dataset) -> usize {
    ds.int(tag::NUMBER_OF_FRAMES)
        .and_then(|n| usize::try_from(n).ok())
        .filter(|n| *n > 0)
        .unwrap_or(1)
}

#[derive(Clone, Debug)]
pub struct NativeFrame {
    pub index: usize,
    pub geometry: ImageGeometry,
    pub data: Bytes,
}

/// Compressed bitstream of one frame (JPEG, RLE, ...).
#[derive(Clone, Debug)]
pub struct EncapsulatedFrame {
    pub index: usize,
    pub data: Bytes,
}

/// One decodable unit pulled out of the pixel data element.
#[derive(Clone, Debug)]
pub enum Frame {
    Native(NativeFrame),
    Encapsulated(EncapsulatedFrame),
}

impl Frame {
    pub fn index(&self) -> usize {
        match self {
            Frame::Native(f) => f.index,
            Frame::Encapsulated(f) => f.index,
        }
    }

    #[cfg(test)]
    pub(crate) fn data(&self) -> &Bytes {
        match self {
            Frame::Native(f) => &f.data,
            Frame::Encapsulated(f) => &f.data,
        }
    }
}

impl Display for Frame {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), std::fmt::Error> {
        match self {
            Frame::Native(n) => write!(
                f,
                "NativeFrame {{ index: {}, {}x{}, data: {} }}",
                n.index,
                n.geometry.columns,
                n.geometry.rows,
                n.data.len()
            ),
            Frame::Encapsulated(e) => write!(
                f,
                "EncapsulatedFrame {{ index: {}, data: {} }}",
                e.index,
                e.data.len()
            ),
        }
    }
}
