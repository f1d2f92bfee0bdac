use std::{fmt::Display, io::Cursor, str::FromStr};

use bytes::Bytes;
use image::{DynamicImage, GrayImage, ImageBuffer, ImageFormat, Luma, RgbImage};

use crate::{
    error::CodecError,
    frame::{Frame, ImageGeometry, NativeFrame},
};

pub const DEFAULT_JPEG_QUALITY: u8 = 90;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum OutputFormat {
    #[default]
    Png,
    Jpeg {
        quality: u8,
    },
}

impl OutputFormat {
    pub fn content_type(&self) -> &'static str {
        match self {
            OutputFormat::Png => "image/png",
            OutputFormat::Jpeg { .. } => "image/jpeg",
        }
    }
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "png" => Ok(OutputFormat::Png),
            "jpeg" | "jpg" => Ok(OutputFormat::Jpeg {
                quality: DEFAULT_JPEG_QUALITY,
            }),
            other => Err(format!("unsupported image format {:?}", other)),
        }
    }
}

impl Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutputFormat::Png => f.write_str("png"),
            OutputFormat::Jpeg { quality } => write!(f, "jpeg(q={})", quality),
        }
    }
}

/// Encoded image ready to be written to a response.
#[derive(Clone, Debug)]
pub struct EncodedImage {
    pub bytes: Bytes,
    pub content_type: &'static str,
}

impl EncodedImage {
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Turns a decoded frame into a displayable image.
pub fn materialize(frame: &Frame) -> Result<DynamicImage, CodecError> {
    match frame {
        Frame::Native(native) => materialize_native(native),
        Frame::Encapsulated(encapsulated) => {
            image::load_from_memory(&encapsulated.data).map_err(CodecError::Decode)
        }
    }
}

fn materialize_native(frame: &NativeFrame) -> Result<DynamicImage, CodecError> {
    let g = &frame.geometry;
    let (width, height) = (g.columns as u32, g.rows as u32);
    let pixels = g.pixel_count();
    let data = frame.data.as_ref();
    let inverted = g.photometric == "MONOCHROME1";

    match (g.samples_per_pixel, g.bits_allocated) {
        (1, 8) => {
            let mut buf = take(data, pixels)?.to_vec();
            if inverted {
                buf.iter_mut().for_each(|p| *p = u8::MAX - *p);
            }
            let img = GrayImage::from_raw(width, height, buf)
                .ok_or_else(|| CodecError::Unsupported("grayscale buffer size".to_string()))?;
            Ok(DynamicImage::ImageLuma8(img))
        }
        (1, 16) => {
            let raw = take(data, pixels * 2)?;
            let mut buf = rescale_16(raw, g);
            if inverted {
                buf.iter_mut().for_each(|p| *p = u16::MAX - *p);
            }
            let img: ImageBuffer<Luma<u16>, Vec<u16>> = ImageBuffer::from_raw(width, height, buf)
                .ok_or_else(|| CodecError::Unsupported("grayscale buffer size".to_string()))?;
            Ok(DynamicImage::ImageLuma16(img))
        }
        (3, 8) => {
            let raw = take(data, pixels * 3)?;
            let mut rgb = if g.planar_configuration == 1 {
                let (r, rest) = raw.split_at(pixels);
                let (gr, b) = rest.split_at(pixels);
                let mut out = Vec::with_capacity(pixels * 3);
                for i in 0..pixels {
                    out.extend_from_slice(&[r[i], gr[i], b[i]]);
                }
                out
            } else {
                raw.to_vec()
            };
            match g.photometric.as_str() {
                "RGB" => {}
                "YBR_FULL" => ybr_full_to_rgb(&mut rgb),
                other => {
                    return Err(CodecError::Unsupported(format!(
                        "photometric interpretation {}",
                        other
                    )));
                }
            }
            let img = RgbImage::from_raw(width, height, rgb)
                .ok_or_else(|| CodecError::Unsupported("rgb buffer size".to_string()))?;
            Ok(DynamicImage::ImageRgb8(img))
        }
        (samples, bits) => Err(CodecError::Unsupported(format!(
            "{} samples at {} bits allocated",
            samples, bits
        ))),
    }
}

fn take(data: &[u8], expected: usize) -> Result<&[u8], CodecError> {
    data.get(..expected).ok_or(CodecError::ShortFrame {
        expected,
        actual: data.len(),
    })
}

/// Masks to BitsStored, sign-extends signed data and stretches the
/// observed range to the full 16-bit range.
fn rescale_16(raw: &[u8], g: &ImageGeometry) -> Vec<u16> {
    let stored = g.bits_stored.clamp(1, 16) as u32;
    let signed = g.pixel_representation == 1;
    let values: Vec<i32> = raw
        .chunks_exact(2)
        .map(|c| {
            let v = u16::from_le_bytes([c[0], c[1]]) as u32;
            let v = if stored < 16 { v & ((1 << stored) - 1) } else { v };
            if signed {
                let shift = 32 - stored;
                ((v << shift) as i32) >> shift
            } else {
                v as i32
            }
        })
        .collect();

    let min = values.iter().copied().min().unwrap_or(0);
    let max = values.iter().copied().max().unwrap_or(0);
    let span = (max - min) as i64;
    values
        .iter()
        .map(|v| {
            if span == 0 {
                0
            } else {
                ((*v - min) as i64 * u16::MAX as i64 / span) as u16
            }
        })
        .collect()
}

fn ybr_full_to_rgb(buf: &mut [u8]) {
    for px in buf.chunks_exact_mut(3) {
        let y = px[0] as f32;
        let cb = px[1] as f32 - 128.0;
        let cr = px[2] as f32 - 128.0;

        // BT.601
        px[0] = (y + 1.402 * cr).clamp(0.0, 255.0) as u8;
        px[1] = (y - 0.344136 * cb - 0.714136 * cr).clamp(0.0, 255.0) as u8;
        px[2] = (y + 1.772 * cb).clamp(0.0, 255.0) as u8;
    }
}

/// Serializes an image for transport.
pub fn encode(image: &DynamicImage, format: OutputFormat) -> Result<EncodedImage, CodecError> {
    let bytes = match format {
        OutputFormat::Png => {
            let mut buf = Vec::new();
            image
                .write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
                .map_err(CodecError::Png)?;
            buf
        }
        OutputFormat::Jpeg { quality } => encode_jpeg(image, quality)?,
    };
    Ok(EncodedImage {
        bytes: Bytes::from(bytes),
        content_type: format.content_type(),
    })
}

fn encode_jpeg(image: &DynamicImage, quality: u8) -> Result<Vec<u8>, CodecError> {
    let (width, height) = (image.width(), image.height());
    let too_large = || CodecError::TooLarge { width, height };
    let w = u16::try_from(width).map_err(|_| too_large())?;
    let h = u16::try_from(height).map_err(|_| too_large())?;

    let mut buf = Vec::new();
    let encoder = jpeg_encoder::Encoder::new(&mut buf, quality);
    match image {
        DynamicImage::ImageLuma8(gray) => {
            encoder.encode(gray.as_raw(), w, h, jpeg_encoder::ColorType::Luma)?
        }
        DynamicImage::ImageLuma16(_) => {
            let gray = image.to_luma8();
            encoder.encode(gray.as_raw(), w, h, jpeg_encoder::ColorType::Luma)?
        }
        _ => {
            let rgb = image.to_rgb8();
            encoder.encode(rgb.as_raw(), w, h, jpeg_encoder::ColorType::Rgb)?
        }
    }
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::EncapsulatedFrame;

    fn geometry(samples: u16, bits: u16, photometric: &str) -> ImageGeometry {
        ImageGeometry {
            rows: 2,
            columns: 2,
            samples_per_pixel: samples,
            bits_allocated: bits,
            bits_stored: bits,
            pixel_representation: 0,
            planar_configuration: 0,
            photometric: photometric.to_string(),
        }
    }

    fn native(geometry: ImageGeometry, data: Vec<u8>) -> Frame {
        Frame::Native(NativeFrame {
            index: 0,
            geometry,
            data: Bytes::from(data),
        })
    }

    #[test]
    fn test_gray8() {
        let frame = native(geometry(1, 8, "MONOCHROME2"), vec![0, 64, 128, 255]);
        let img = materialize(&frame).unwrap();
        let gray = img.as_luma8().unwrap();
        assert_eq!(gray.as_raw(), &vec![0, 64, 128, 255]);
    }

    #[test]
    fn test_monochrome1_inverted() {
        let frame = native(geometry(1, 8, "MONOCHROME1"), vec![0, 64, 128, 255]);
        let img = materialize(&frame).unwrap();
        assert_eq!(img.as_luma8().unwrap().as_raw(), &vec![255, 191, 127, 0]);
    }

    #[test]
    fn test_gray16_rescaled() {
        let mut g = geometry(1, 16, "MONOCHROME2");
        g.bits_stored = 12;
        let raw: Vec<u8> = [0u16, 1024, 2048, 4095]
            .iter()
            .flat_map(|v| v.to_le_bytes())
            .collect();
        let img = materialize(&native(g, raw)).unwrap();
        let px = img.as_luma16().unwrap().as_raw().clone();
        assert_eq!(px[0], 0);
        assert_eq!(px[3], u16::MAX);
        assert!(px[1] < px[2]);
    }

    #[test]
    fn test_signed16() {
        let mut g = geometry(1, 16, "MONOCHROME2");
        g.pixel_representation = 1;
        let raw: Vec<u8> = [-100i16, 0, 100, -1]
            .iter()
            .flat_map(|v| v.to_le_bytes())
            .collect();
        let img = materialize(&native(g, raw)).unwrap();
        let px = img.as_luma16().unwrap().as_raw().clone();
        assert_eq!(px[0], 0);
        assert_eq!(px[2], u16::MAX);
        assert!(px[3] < px[1]);
    }

    #[test]
    fn test_rgb_planar() {
        let mut g = geometry(3, 8, "RGB");
        g.planar_configuration = 1;
        let data = vec![1, 2, 3, 4, 10, 20, 30, 40, 100, 110, 120, 130];
        let img = materialize(&native(g, data)).unwrap();
        let rgb = img.as_rgb8().unwrap();
        assert_eq!(rgb.get_pixel(0, 0).0, [1, 10, 100]);
        assert_eq!(rgb.get_pixel(1, 1).0, [4, 40, 130]);
    }

    #[test]
    fn test_short_frame() {
        let frame = native(geometry(1, 8, "MONOCHROME2"), vec![1, 2]);
        assert!(matches!(
            materialize(&frame),
            Err(CodecError::ShortFrame {
                expected: 4,
                actual: 2
            })
        ));
    }

    #[test]
    fn test_unsupported_layout() {
        let frame = native(geometry(1, 32, "MONOCHROME2"), vec![0; 16]);
        assert!(matches!(materialize(&frame), Err(CodecError::Unsupported(_))));
    }

    #[test]
    fn test_encapsulated_garbage() {
        let frame = Frame::Encapsulated(EncapsulatedFrame {
            index: 0,
            data: Bytes::from_static(&[1, 2, 3, 4]),
        });
        assert!(matches!(materialize(&frame), Err(CodecError::Decode(_))));
    }

    #[test]
    fn test_encode_png() {
        let frame = native(geometry(1, 8, "MONOCHROME2"), vec![0, 64, 128, 255]);
        let img = materialize(&frame).unwrap();
        let encoded = encode(&img, OutputFormat::Png).unwrap();
        assert_eq!(encoded.content_type, "image/png");
        assert_eq!(&encoded.bytes[..8], b"\x89PNG\r\n\x1a\n");
    }

    #[test]
    fn test_jpeg_roundtrip_through_encapsulated() {
        let frame = native(geometry(1, 8, "MONOCHROME2"), vec![0, 64, 128, 255]);
        let img = materialize(&frame).unwrap();
        let jpeg = encode(&img, OutputFormat::Jpeg { quality: 90 }).unwrap();
        assert_eq!(jpeg.content_type, "image/jpeg");
        assert_eq!(&jpeg.bytes[..2], &[0xFF, 0xD8]);

        let decoded = materialize(&Frame::Encapsulated(EncapsulatedFrame {
            index: 0,
            data: jpeg.bytes,
        }))
        .unwrap();
        assert_eq!((decoded.width(), decoded.height()), (2, 2));
    }

    #[test]
    fn test_output_format_parse() {
        assert_eq!("PNG".parse::<OutputFormat>(), Ok(OutputFormat::Png));
        assert_eq!(
            "jpg".parse::<OutputFormat>(),
            Ok(OutputFormat::Jpeg {
                quality: DEFAULT_JPEG_QUALITY
            })
        );
        assert!("gif".parse::<OutputFormat>().is_err());
    }
}
