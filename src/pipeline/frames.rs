//! Image decoding: raster sources → owned [`DynamicImage`] frames.
//!
//! Every frame is returned as its own pixel buffer, copied out of the
//! decoder before the decoder advances. Later stages may hold frames for as
//! long as they like without aliasing the decoder's state.

use super::input::SourceFormat;
use crate::error::IntakeError;
use image::{DynamicImage, GrayImage, ImageFormat, RgbImage, RgbaImage};
use std::io::Cursor;
use tiff::decoder::{Decoder, DecodingResult};
use tiff::ColorType;
use tracing::debug;

/// Decode every frame of a raster source.
///
/// TIFF may yield several frames; JPEG and PNG yield exactly one.
pub fn decode_frames(bytes: &[u8], format: SourceFormat, index: usize) -> Result<Vec<DynamicImage>, IntakeError> {
    match format {
        SourceFormat::Tiff => decode_tiff(bytes, index),
        SourceFormat::Jpeg => decode_single(bytes, ImageFormat::Jpeg, index).map(|f| vec![f]),
        SourceFormat::Png => decode_single(bytes, ImageFormat::Png, index).map(|f| vec![f]),
        SourceFormat::Pdf | SourceFormat::Text => Err(IntakeError::Internal(format!(
            "{format} is not a raster format"
        ))),
    }
}

fn decode_err(index: usize, detail: impl ToString) -> IntakeError {
    IntakeError::ImageDecode {
        index,
        detail: detail.to_string(),
    }
}

fn decode_single(bytes: &[u8], format: ImageFormat, index: usize) -> Result<DynamicImage, IntakeError> {
    let img = image::load_from_memory_with_format(bytes, format).map_err(|e| decode_err(index, e))?;
    Ok(flatten_color(img))
}

/// Keep grey images grey; everything else becomes 8-bit RGB.
fn flatten_color(img: DynamicImage) -> DynamicImage {
    match img {
        DynamicImage::ImageLuma8(_) => img,
        DynamicImage::ImageLuma16(_) | DynamicImage::ImageLumaA8(_) | DynamicImage::ImageLumaA16(_) => {
            DynamicImage::ImageLuma8(img.to_luma8())
        }
        DynamicImage::ImageRgb8(_) => img,
        other => DynamicImage::ImageRgb8(other.to_rgb8()),
    }
}

fn decode_tiff(bytes: &[u8], index: usize) -> Result<Vec<DynamicImage>, IntakeError> {
    let mut decoder = Decoder::new(Cursor::new(bytes)).map_err(|e| decode_err(index, e))?;
    let mut frames = Vec::new();

    loop {
        let (width, height) = decoder.dimensions().map_err(|e| decode_err(index, e))?;
        let color = decoder.colortype().map_err(|e| decode_err(index, e))?;
        let data = decoder.read_image().map_err(|e| decode_err(index, e))?;
        let frame = owned_frame(width, height, color, data)
            .map_err(|detail| decode_err(index, format!("frame {}: {detail}", frames.len() + 1)))?;
        debug!(
            "Source #{} frame {}: {}x{} {:?}",
            index,
            frames.len() + 1,
            width,
            height,
            color
        );
        frames.push(frame);

        if !decoder.more_images() {
            break;
        }
        decoder.next_image().map_err(|e| decode_err(index, e))?;
    }

    Ok(frames)
}

/// Build an owned image from one decoded TIFF frame.
fn owned_frame(width: u32, height: u32, color: ColorType, data: DecodingResult) -> Result<DynamicImage, String> {
    let mismatch = || format!("buffer size does not match {width}x{height} {color:?}");
    match (color, data) {
        (ColorType::Gray(1), DecodingResult::U8(packed)) => {
            Ok(DynamicImage::ImageLuma8(unpack_bilevel(width, height, &packed).ok_or_else(mismatch)?))
        }
        (ColorType::Gray(8), DecodingResult::U8(buf)) => Ok(DynamicImage::ImageLuma8(
            GrayImage::from_raw(width, height, buf).ok_or_else(mismatch)?,
        )),
        (ColorType::Gray(16), DecodingResult::U16(buf)) => Ok(DynamicImage::ImageLuma8(
            GrayImage::from_raw(width, height, narrow(&buf)).ok_or_else(mismatch)?,
        )),
        (ColorType::GrayA(8), DecodingResult::U8(buf)) => {
            let luma = buf.chunks_exact(2).map(|px| px[0]).collect();
            Ok(DynamicImage::ImageLuma8(
                GrayImage::from_raw(width, height, luma).ok_or_else(mismatch)?,
            ))
        }
        (ColorType::RGB(8), DecodingResult::U8(buf)) => Ok(DynamicImage::ImageRgb8(
            RgbImage::from_raw(width, height, buf).ok_or_else(mismatch)?,
        )),
        (ColorType::RGB(16), DecodingResult::U16(buf)) => Ok(DynamicImage::ImageRgb8(
            RgbImage::from_raw(width, height, narrow(&buf)).ok_or_else(mismatch)?,
        )),
        (ColorType::RGBA(8), DecodingResult::U8(buf)) => {
            let rgba = RgbaImage::from_raw(width, height, buf).ok_or_else(mismatch)?;
            Ok(DynamicImage::ImageRgb8(DynamicImage::ImageRgba8(rgba).to_rgb8()))
        }
        (ColorType::RGBA(16), DecodingResult::U16(buf)) => {
            let rgba = RgbaImage::from_raw(width, height, narrow(&buf)).ok_or_else(mismatch)?;
            Ok(DynamicImage::ImageRgb8(DynamicImage::ImageRgba8(rgba).to_rgb8()))
        }
        (ColorType::CMYK(8), DecodingResult::U8(buf)) => {
            let rgb = buf
                .chunks_exact(4)
                .flat_map(|px| {
                    let k = 255 - u16::from(px[3]);
                    [px[0], px[1], px[2]].map(|c| ((255 - u16::from(c)) * k / 255) as u8)
                })
                .collect();
            Ok(DynamicImage::ImageRgb8(
                RgbImage::from_raw(width, height, rgb).ok_or_else(mismatch)?,
            ))
        }
        (other, _) => Err(format!("unsupported TIFF colour type {other:?}")),
    }
}

fn narrow(buf: &[u16]) -> Vec<u8> {
    buf.iter().map(|v| (v >> 8) as u8).collect()
}

/// Expand 1-bit rows (padded to whole bytes) to 8-bit grey.
fn unpack_bilevel(width: u32, height: u32, packed: &[u8]) -> Option<GrayImage> {
    let row_bytes = (width as usize).div_ceil(8);
    if packed.len() < row_bytes * height as usize {
        return None;
    }
    let mut out = Vec::with_capacity(width as usize * height as usize);
    for row in packed.chunks_exact(row_bytes).take(height as usize) {
        for x in 0..width as usize {
            let bit = (row[x / 8] >> (7 - (x % 8))) & 1;
            out.push(if bit == 1 { 255 } else { 0 });
        }
    }
    GrayImage::from_raw(width, height, out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Luma, Rgb};
    use tiff::encoder::{colortype, TiffEncoder};

    /// A TIFF with one solid frame per shade.
    fn multi_frame_tiff(shades: &[u8]) -> Vec<u8> {
        let mut buf = Cursor::new(Vec::new());
        {
            let mut enc = TiffEncoder::new(&mut buf).unwrap();
            for &shade in shades {
                let data = vec![shade; 16 * 12];
                enc.write_image::<colortype::Gray8>(16, 12, &data).unwrap();
            }
        }
        buf.into_inner()
    }

    #[test]
    fn every_frame_keeps_its_own_pixels() {
        let bytes = multi_frame_tiff(&[10, 120, 240]);
        let frames = decode_frames(&bytes, SourceFormat::Tiff, 0).unwrap();
        assert_eq!(frames.len(), 3);
        let shades: Vec<u8> = frames
            .iter()
            .map(|f| f.to_luma8().get_pixel(3, 3).0[0])
            .collect();
        assert_eq!(shades, vec![10, 120, 240]);
    }

    #[test]
    fn png_is_single_frame_rgb() {
        let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(4, 4, Rgb([1, 2, 3])));
        let mut png = Vec::new();
        img.write_to(&mut Cursor::new(&mut png), ImageFormat::Png).unwrap();
        let frames = decode_frames(&png, SourceFormat::Png, 2).unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].to_rgb8().get_pixel(0, 0), &Rgb([1, 2, 3]));
    }

    #[test]
    fn garbage_is_decode_error() {
        let err = decode_frames(b"II*\0garbage", SourceFormat::Tiff, 4).unwrap_err();
        assert!(matches!(err, IntakeError::ImageDecode { index: 4, .. }));
    }

    #[test]
    fn bilevel_rows_unpack() {
        // 10 px wide → 2 bytes per row.
        let packed = [0b1010_0000, 0b1100_0000];
        let img = unpack_bilevel(10, 1, &packed).unwrap();
        assert_eq!(img.get_pixel(0, 0), &Luma([255]));
        assert_eq!(img.get_pixel(1, 0), &Luma([0]));
        assert_eq!(img.get_pixel(8, 0), &Luma([255]));
        assert_eq!(img.get_pixel(9, 0), &Luma([255]));
    }
}
