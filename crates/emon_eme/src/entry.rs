//! Entries of an EME archive

use std::{
    fmt,
    path::{Path, PathBuf},
};

use bon::Builder;

use crate::{
    compression::Frame,
    error::{FormatError, Result},
    types::EmeRecord,
};

/// Ring buffer size used for every packed entry
pub const DEFAULT_FRAME_SIZE: u16 = 0x1000;

/// Initial ring buffer position used for every packed entry, stored as `0x12`
pub const DEFAULT_INIT_POS: u16 = 0x0FEE;

/// Longest name the index can hold
pub const NAME_SIZE: usize = 64;

/// Kind of payload an entry carries
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Hash)]
pub enum Subtype {
    /// Copied as is, LZSS compressed when the sizes differ
    #[default]
    Audio = 0,
    /// Encrypted 12 byte header followed by one or two LZSS streams
    Script = 3,
    /// Encrypted image header, optional palette and a pixel plane
    Bitmap = 4,
    /// Raw bytes with an encrypted 4 byte prefix
    Blob = 5,
}

impl Subtype {
    /// Map the raw index value to a subtype
    pub fn from_raw(value: u16) -> Option<Self> {
        match value {
            0 => Some(Subtype::Audio),
            3 => Some(Subtype::Script),
            4 => Some(Subtype::Bitmap),
            5 => Some(Subtype::Blob),
            _ => None,
        }
    }

    /// Raw index value
    pub fn raw(self) -> u16 {
        self as u16
    }
}

impl fmt::Display for Subtype {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Subtype::Audio => "audio",
            Subtype::Script => "script",
            Subtype::Bitmap => "bitmap",
            Subtype::Blob => "blob",
        };
        f.pad(name)
    }
}

/// Convert between the stored and the logical initial ring buffer position
///
/// The conversion is its own inverse for positions inside the frame. A zero frame leaves the
/// value untouched.
///
/// ```
/// use emon_eme::entry::transform_init_pos;
///
/// assert_eq!(transform_init_pos(0x1000, 0x12), 0xFEE);
/// assert_eq!(transform_init_pos(0x1000, 0xFEE), 0x12);
/// assert_eq!(transform_init_pos(0, 0x12), 0x12);
/// ```
pub fn transform_init_pos(frame_size: u16, init_pos: u16) -> u16 {
    if frame_size == 0 {
        return init_pos;
    }
    (i32::from(frame_size) - i32::from(init_pos)).rem_euclid(i32::from(frame_size)) as u16
}

/// Replace characters that are not allowed in file names
pub fn sanitize_name(name: &str) -> String {
    name.chars()
        .map(|c| match c {
            '"' | '<' | '>' | '|' | ':' | '*' | '?' | '\\' | '/' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect()
}

/// Decode a zero padded name field
///
/// The name ends at the first zero byte, or spans the whole field when there is none.
pub fn decode_name(raw: &[u8]) -> String {
    let end = raw.iter().position(|b| *b == 0).unwrap_or(raw.len());
    String::from_utf8_lossy(&raw[..end]).into_owned()
}

/// A single asset stored in an archive
///
/// Entries are immutable, they are parsed from an index record in one go or assembled with
/// [`Entry::builder`] once a payload has been written.
#[derive(Debug, Clone, PartialEq, Eq, Builder)]
pub struct Entry {
    /// Name as stored in the index
    #[builder(into)]
    name: String,
    /// Kind of payload
    #[builder(default)]
    subtype: Subtype,
    /// Opaque flag word
    #[builder(default)]
    magic: u32,
    /// Ring buffer size, zero for raw scripts
    #[builder(default = DEFAULT_FRAME_SIZE)]
    frame_size: u16,
    /// Logical initial ring buffer position
    #[builder(default = DEFAULT_INIT_POS)]
    init_pos: u16,
    /// Offset of the payload from the start of the archive
    offset: u32,
    /// Size of the payload in the archive
    packed_size: u32,
    /// Size of the payload once expanded
    unpacked_size: u32,
}

impl Entry {
    /// Parse and validate an index record
    ///
    /// `index` is only used to name entries that have no name, `archive_len` bounds the
    /// payload.
    pub fn from_record(record: &EmeRecord, index: usize, archive_len: u64) -> Result<Self> {
        let name = decode_name(&record.name);
        if !is_valid_name(&sanitize_name(&name)) {
            return Err(FormatError::InvalidName(index).into());
        }

        let Some(subtype) = Subtype::from_raw(record.subtype) else {
            return Err(FormatError::UnsupportedSubtype {
                name,
                subtype: record.subtype,
            }
            .into());
        };

        if u64::from(record.offset) >= archive_len {
            return Err(FormatError::InvalidOffset {
                name,
                offset: record.offset,
            }
            .into());
        }

        if u64::from(record.packed_size) > archive_len - u64::from(record.offset) {
            return Err(FormatError::InvalidSize {
                name,
                size: record.packed_size,
            }
            .into());
        }

        Ok(Entry {
            name,
            subtype,
            magic: record.magic,
            frame_size: record.frame,
            init_pos: transform_init_pos(record.frame, record.init_pos),
            offset: record.offset,
            packed_size: record.packed_size,
            unpacked_size: record.unpacked_size,
        })
    }

    /// Serialize into an index record, names longer than 64 bytes are cut off
    pub fn to_record(&self) -> EmeRecord {
        let mut name = [0u8; NAME_SIZE];
        let bytes = self.name.as_bytes();
        let len = bytes.len().min(NAME_SIZE);
        name[..len].copy_from_slice(&bytes[..len]);

        EmeRecord {
            name,
            frame: self.frame_size,
            init_pos: transform_init_pos(self.frame_size, self.init_pos),
            magic: self.magic,
            subtype: self.subtype.raw(),
            packed_size: self.packed_size,
            unpacked_size: self.unpacked_size,
            offset: self.offset,
        }
    }

    /// Get the name of the entry
    ///
    /// # Warnings
    ///
    /// The name may contain path separators or other characters that are unsafe to use when
    /// extracting. Use [`Entry::file_name`] or [`Entry::output_path`] instead.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Name with characters invalid in file names replaced by `_`
    pub fn file_name(&self) -> String {
        sanitize_name(&self.name)
    }

    /// Where the entry is written when extracting into `dir`
    pub fn output_path(&self, dir: &Path) -> PathBuf {
        dir.join(self.file_name())
    }

    /// Kind of payload
    pub fn subtype(&self) -> Subtype {
        self.subtype
    }

    /// Opaque flag word
    pub fn magic(&self) -> u32 {
        self.magic
    }

    /// Ring buffer size
    pub fn frame_size(&self) -> u16 {
        self.frame_size
    }

    /// Logical initial ring buffer position
    pub fn init_pos(&self) -> u16 {
        self.init_pos
    }

    /// LZSS parameters for the payload
    pub fn frame(&self) -> Frame {
        Frame::from_record(self.frame_size, self.init_pos)
    }

    /// Offset of the payload from the start of the archive
    pub fn offset(&self) -> u32 {
        self.offset
    }

    /// Size of the payload in the archive
    pub fn packed_size(&self) -> u32 {
        self.packed_size
    }

    /// Size of the payload once expanded
    pub fn unpacked_size(&self) -> u32 {
        self.unpacked_size
    }

    /// Whether the payload is LZSS compressed
    pub fn is_packed(&self) -> bool {
        self.packed_size != self.unpacked_size
    }
}

fn is_valid_name(name: &str) -> bool {
    !matches!(name, "" | "." | "..")
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::error::Error;

    fn record(name: &[u8]) -> EmeRecord {
        let mut record = EmeRecord {
            frame: 0x1000,
            init_pos: 0x12,
            magic: 1,
            subtype: 3,
            packed_size: 10,
            unpacked_size: 20,
            offset: 8,
            ..Default::default()
        };
        record.name[..name.len()].copy_from_slice(name);
        record
    }

    #[test]
    fn init_pos_is_self_inverse() {
        for frame in [1u16, 0x10, 0x1000, 0xFFFF] {
            for value in [0u16, 1, 0x12, frame / 2, frame - 1]
                .into_iter()
                .filter(|value| *value < frame)
            {
                assert_eq!(
                    transform_init_pos(frame, transform_init_pos(frame, value)),
                    value
                );
            }
        }
        assert_eq!(transform_init_pos(0x1000, 0), 0);
    }

    #[test]
    fn name_stops_at_zero() {
        assert_eq!(decode_name(b"abc\0def"), "abc");
        assert_eq!(decode_name(&[b'x'; NAME_SIZE]), "x".repeat(NAME_SIZE));
    }

    #[test]
    fn sanitize() {
        assert_eq!(sanitize_name("a/b\\c:d*e?f\"g<h>i|j"), "a_b_c_d_e_f_g_h_i_j");
        assert_eq!(sanitize_name("tab\there"), "tab_here");
        assert_eq!(sanitize_name("plain.txt"), "plain.txt");
    }

    #[test]
    fn parse_record() -> crate::error::Result<()> {
        let entry = Entry::from_record(&record(b"script.txt"), 0, 100)?;

        assert_eq!(entry.name(), "script.txt");
        assert_eq!(entry.subtype(), Subtype::Script);
        assert_eq!(entry.init_pos(), 0xFEE);
        assert!(entry.is_packed());
        assert_eq!(entry.to_record(), record(b"script.txt"));

        Ok(())
    }

    #[test]
    fn parse_full_length_name() -> crate::error::Result<()> {
        let entry = Entry::from_record(&record(&[b'n'; NAME_SIZE]), 0, 100)?;
        assert_eq!(entry.name().len(), NAME_SIZE);

        Ok(())
    }

    #[test]
    fn reject_invalid_records() {
        assert!(matches!(
            Entry::from_record(&record(b""), 4, 100),
            Err(Error::Format(FormatError::InvalidName(4)))
        ));
        assert!(matches!(
            Entry::from_record(&record(b".."), 0, 100),
            Err(Error::Format(FormatError::InvalidName(0)))
        ));

        let mut unknown = record(b"a");
        unknown.subtype = 2;
        assert!(matches!(
            Entry::from_record(&unknown, 0, 100),
            Err(Error::Format(FormatError::UnsupportedSubtype { subtype: 2, .. }))
        ));

        let mut past_end = record(b"a");
        past_end.offset = 100;
        assert!(matches!(
            Entry::from_record(&past_end, 0, 100),
            Err(Error::Format(FormatError::InvalidOffset { offset: 100, .. }))
        ));

        let mut too_big = record(b"a");
        too_big.packed_size = 93;
        assert!(matches!(
            Entry::from_record(&too_big, 0, 100),
            Err(Error::Format(FormatError::InvalidSize { size: 93, .. }))
        ));
    }

    #[test]
    fn builder_defaults() {
        let entry = Entry::builder()
            .name("music.ogg")
            .magic(0x2040_0000)
            .offset(8)
            .packed_size(4)
            .unpacked_size(4)
            .build();

        assert_eq!(entry.subtype(), Subtype::Audio);
        assert_eq!(entry.frame_size(), DEFAULT_FRAME_SIZE);
        assert_eq!(entry.to_record().init_pos, 0x12);
        assert!(!entry.is_packed());
    }
}
