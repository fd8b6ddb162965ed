//! Conversion between archive bitmaps and [`image`] buffers.
//!
//! A bitmap payload is an encrypted [`ImageHeader`], an optional palette of `B, G, R, pad`
//! entries and a pixel plane. Planes are stored bottom-up with rows `stride` bytes apart, except
//! for 7 bit grayscale which is top-down without padding.

use std::io::Cursor;

use binrw::{BinRead, BinWrite};
use image::{DynamicImage, GrayImage, Luma, Rgb, RgbImage, Rgba, RgbaImage};
use tracing::instrument;

use crate::{
    compression::{self, Frame},
    crypt::Schedule,
    entry::Entry,
    error::{CodecError, FormatError, Result},
    types::{ImageHeader, IMAGE_HEADER_SIZE},
};

/// Bits per pixel of grayscale planes
pub const BPP_GRAY: u8 = 7;
/// Bits per pixel of BGR planes
pub const BPP_BGR: u8 = 24;
/// Bits per pixel of BGRA planes
pub const BPP_BGRA: u8 = 32;

const PALETTE_ENTRY_SIZE: usize = 4;

/// Bytes taken by the palette following a header
pub fn palette_size(header: &ImageHeader) -> usize {
    if header.colors == 0 || header.bpp() == BPP_GRAY {
        return 0;
    }
    usize::from(header.colors.max(3)) * PALETTE_ENTRY_SIZE
}

/// Decrypt and parse the header at the start of a bitmap payload
pub fn read_header(data: &[u8], schedule: &Schedule) -> Result<ImageHeader> {
    let mut raw: [u8; IMAGE_HEADER_SIZE] = data
        .get(..IMAGE_HEADER_SIZE)
        .and_then(|bytes| bytes.try_into().ok())
        .ok_or(FormatError::OutOfBounds {
            offset: 0,
            length: IMAGE_HEADER_SIZE as u64,
        })?;
    schedule.decrypt(&mut raw);
    Ok(ImageHeader::read(&mut Cursor::new(raw))?)
}

/// Decode the bitmap payload of `entry`
///
/// `data` starts with the encrypted header. Pixels the plane has no bytes for are left zero.
#[instrument(skip(data, schedule), fields(entry = entry.name()), err)]
pub fn decode_image(data: &[u8], schedule: &Schedule, entry: &Entry) -> Result<DynamicImage> {
    let header = read_header(data, schedule)?;
    let palette_bytes = palette_size(&header);

    let after_header = &data[IMAGE_HEADER_SIZE..];
    let palette: Vec<[u8; 3]> = after_header[..palette_bytes.min(after_header.len())]
        .chunks_exact(PALETTE_ENTRY_SIZE)
        .map(|entry| [entry[2], entry[1], entry[0]])
        .collect();
    let rest = after_header.get(palette_bytes..).unwrap_or_default();

    let width = u32::from(header.width);
    let height = u32::from(header.height);
    let stride = header.stride as usize;

    let plane = if entry.is_packed() {
        let packed = (entry.packed_size() as usize)
            .checked_sub(palette_bytes)
            .ok_or(CodecError::PaletteOverflow {
                palette: palette_bytes as u32,
                packed: entry.packed_size(),
            })?;
        compression::decompress_with(&rest[..packed.min(rest.len())], entry.frame())?
    } else {
        let length = stride.checked_mul(height as usize).unwrap_or(usize::MAX);
        rest[..length.min(rest.len())].to_vec()
    };

    let bpp = header.bpp();
    let image = match bpp {
        BPP_GRAY => DynamicImage::ImageLuma8(GrayImage::from_fn(width, height, |x, y| {
            let at = y as usize * width as usize + x as usize;
            Luma([plane.get(at).copied().unwrap_or(0)])
        })),
        BPP_BGRA => DynamicImage::ImageRgba8(RgbaImage::from_fn(width, height, |x, y| {
            match pixel_at(&plane, height, stride, x, y, 4) {
                Some(p) => Rgba([p[2], p[1], p[0], p[3]]),
                None => Rgba([0, 0, 0, 0]),
            }
        })),
        BPP_BGR => DynamicImage::ImageRgb8(RgbImage::from_fn(width, height, |x, y| {
            match pixel_at(&plane, height, stride, x, y, 3) {
                Some(p) => Rgb([p[2], p[1], p[0]]),
                None => Rgb([0, 0, 0]),
            }
        })),
        _ if header.colors > 0 => DynamicImage::ImageRgb8(RgbImage::from_fn(width, height, |x, y| {
            pixel_at(&plane, height, stride, x, y, 1)
                .and_then(|index| palette.get(usize::from(index[0])))
                .map_or(Rgb([0, 0, 0]), |color| Rgb(*color))
        })),
        _ => {
            return Err(CodecError::UnsupportedFormat {
                bpp,
                colors: header.colors,
            }
            .into())
        }
    };

    Ok(image)
}

fn row_start(height: u32, y: u32, stride: usize) -> usize {
    (height - 1 - y) as usize * stride
}

/// Bytes of pixel `(x, y)` in a bottom-up plane, if the plane holds them
fn pixel_at(
    plane: &[u8],
    height: u32,
    stride: usize,
    x: u32,
    y: u32,
    size: usize,
) -> Option<&[u8]> {
    let start = ((height - 1 - y) as usize)
        .checked_mul(stride)?
        .checked_add(x as usize * size)?;
    plane.get(start..start.checked_add(size)?)
}

fn plane_size(stride: u32, width: u32, height: u32) -> Result<u32> {
    stride
        .checked_mul(height)
        .ok_or_else(|| CodecError::TooLarge { width, height }.into())
}

/// A bitmap ready to be stored in an archive
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedImage {
    /// Plain header
    pub header: ImageHeader,
    /// Pixel plane, LZSS compressed when `packed` is set
    pub plane: Vec<u8>,
    /// Whether the plane is compressed
    pub packed: bool,
}

impl EncodedImage {
    /// Size of the expanded pixel plane
    pub fn plane_size(&self) -> Result<u32> {
        plane_size(
            self.header.stride,
            u32::from(self.header.width),
            u32::from(self.header.height),
        )
    }

    /// Header encrypted with `schedule` followed by the plane
    pub fn to_payload(&self, schedule: &Schedule) -> Result<Vec<u8>> {
        let mut payload = Vec::with_capacity(IMAGE_HEADER_SIZE + self.plane.len());
        self.header.write(&mut Cursor::new(&mut payload))?;
        schedule.encrypt(&mut payload[..IMAGE_HEADER_SIZE]);
        payload.extend_from_slice(&self.plane);
        Ok(payload)
    }
}

/// Encode an image as a non indexed archive bitmap
///
/// The plane is compressed with `frame`. Should compression not change its size it is stored
/// as is, since readers tell the two apart by comparing sizes.
#[instrument(skip(image), err)]
pub fn encode_image(image: &DynamicImage, frame: Frame) -> Result<EncodedImage> {
    let (width, height) = (image.width(), image.height());
    if width > u32::from(u16::MAX) || height > u32::from(u16::MAX) {
        return Err(CodecError::TooLarge { width, height }.into());
    }

    let stride = match image {
        DynamicImage::ImageLuma8(_) => width,
        DynamicImage::ImageRgb8(_) => (width * 3 + 3) / 4 * 4,
        DynamicImage::ImageRgba8(_) => width * 4,
        other => return Err(CodecError::UnsupportedLayout(other.color()).into()),
    };
    let length = plane_size(stride, width, height)? as usize;

    let (bpp, raw) = match image {
        DynamicImage::ImageLuma8(buffer) => (BPP_GRAY, buffer.as_raw().clone()),
        DynamicImage::ImageRgb8(buffer) => {
            let mut plane = vec![0u8; length];
            for (x, y, pixel) in buffer.enumerate_pixels() {
                let at = row_start(height, y, stride as usize) + x as usize * 3;
                let [r, g, b] = pixel.0;
                plane[at..at + 3].copy_from_slice(&[b, g, r]);
            }
            (BPP_BGR, plane)
        }
        DynamicImage::ImageRgba8(buffer) => {
            let mut plane = vec![0u8; length];
            for (x, y, pixel) in buffer.enumerate_pixels() {
                let at = row_start(height, y, stride as usize) + x as usize * 4;
                let [r, g, b, a] = pixel.0;
                plane[at..at + 4].copy_from_slice(&[b, g, r, a]);
            }
            (BPP_BGRA, plane)
        }
        other => return Err(CodecError::UnsupportedLayout(other.color()).into()),
    };

    let header = ImageHeader {
        format: u16::from(bpp),
        width: width as u16,
        height: height as u16,
        colors: 0,
        stride,
        offset_x: 0,
        offset_y: 0,
    };

    let compressed = compression::compress_with(&raw, frame);
    let (plane, packed) = if compressed.len() == raw.len() {
        (raw, false)
    } else {
        (compressed, true)
    };

    Ok(EncodedImage {
        header,
        plane,
        packed,
    })
}
