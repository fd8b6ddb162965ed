//! Base types for structure of EME file.

use binrw::{BinRead, BinWrite};

/// Magic every archive starts with
pub const EME_MAGIC: &[u8; 8] = b"RREDATA ";

/// Size of a serialized [`EmeRecord`]
pub const RECORD_SIZE: usize = 96;

/// Size of a serialized [`ImageHeader`]
pub const IMAGE_HEADER_SIZE: usize = 32;

/// Size of the trailing entry count
pub const COUNT_SIZE: usize = 4;

/// Bytes that are present in every archive: magic, key and entry count
pub const MIN_ARCHIVE_SIZE: u64 =
    (EME_MAGIC.len() + crate::crypt::SCHEDULE_SIZE + COUNT_SIZE) as u64;

/// EME index record
///
/// Every entry of the archive has one of these in the index at the end of the file. Records are
/// stored encrypted with the archive's [`crate::crypt::Schedule`], all fields are little endian.
#[derive(BinRead, BinWrite, Debug, Copy, Clone, PartialEq, Eq)]
#[brw(little)]
pub struct EmeRecord {
    /// Zero padded entry name
    pub name: [u8; 64],

    /// Ring buffer size for LZSS entries, zero for raw scripts
    pub frame: u16,

    /// Stored initial ring buffer position, see [`crate::entry::transform_init_pos`]
    pub init_pos: u16,

    /// Opaque value kept for round trips
    pub magic: u32,

    /// Kind of payload, see [`crate::entry::Subtype`]
    #[brw(pad_after = 2)]
    pub subtype: u16,

    /// Size of the payload in the archive
    pub packed_size: u32,

    /// Size of the payload once expanded
    pub unpacked_size: u32,

    /// Offset of the payload from the start of the file
    #[brw(pad_after = 8)]
    pub offset: u32,
}

impl Default for EmeRecord {
    fn default() -> Self {
        Self {
            name: [0u8; 64],
            frame: Default::default(),
            init_pos: Default::default(),
            magic: Default::default(),
            subtype: Default::default(),
            packed_size: Default::default(),
            unpacked_size: Default::default(),
            offset: Default::default(),
        }
    }
}

/// Header in front of every bitmap payload
///
/// Stored encrypted in the archive. The low byte of `format` is the bits per pixel.
#[derive(BinRead, BinWrite, Debug, Default, Copy, Clone, PartialEq, Eq)]
#[brw(little)]
pub struct ImageHeader {
    /// Pixel format, bits per pixel in the low byte
    pub format: u16,

    /// Width in pixels
    pub width: u16,

    /// Height in pixels
    pub height: u16,

    /// Number of palette entries following the header
    pub colors: u16,

    /// Bytes per row of the pixel plane
    pub stride: u32,

    /// Horizontal drawing offset
    pub offset_x: i32,

    /// Vertical drawing offset
    #[brw(pad_after = 12)]
    pub offset_y: i32,
}

impl ImageHeader {
    /// Bits per pixel
    pub fn bpp(&self) -> u8 {
        (self.format & 0xFF) as u8
    }
}
