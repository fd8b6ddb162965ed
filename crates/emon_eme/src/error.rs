//! Error types that can be emitted from this library

use std::fmt;

use miette::Diagnostic;
use thiserror::Error;

/// Error type for library
#[derive(Error, Diagnostic, Debug)]
pub enum Error {
    /// Transparent warpper for [`std::io::Error`]
    #[error(transparent)]
    IOError(#[from] std::io::Error),

    /// Transparent warpper for [`binrw::Error`]
    #[error(transparent)]
    BinRWError(#[from] binrw::Error),

    /// Transparent warpper for [`image::ImageError`]
    #[error(transparent)]
    ImageError(#[from] image::ImageError),

    /// Transparent warpper for [`serde_json::Error`]
    #[error(transparent)]
    JsonError(#[from] serde_json::Error),

    /// Transparent warpper for [`hex::FromHexError`]
    #[error(transparent)]
    HexError(#[from] hex::FromHexError),

    /// Transparent warpper for [`walkdir::Error`]
    #[error(transparent)]
    WalkDirError(#[from] walkdir::Error),

    /// file is an invalid eme archive
    #[error("file is an invalid eme archive")]
    Format(#[from] FormatError),

    /// unable to find requested file
    #[error("unable to find requested file")]
    FileNotFound(#[from] FileNotFoundError),

    /// unable to convert bitmap
    #[error("unable to convert bitmap")]
    Codec(#[from] CodecError),

    /// unable to decompress data
    #[error("unable to decompress data")]
    Compression(#[from] CompressionError),

    /// failed to {operation} {name}
    #[error("failed to {operation} {name}")]
    Entry {
        /// What was being done with the entry
        operation: Operation,
        /// Name of the entry, as stored in the archive or on disk
        name: String,
        /// Underlying failure
        #[source]
        source: Box<Error>,
    },

    /// {0}
    #[error("{0}")]
    CustomError(String),
}

impl Error {
    /// Wrap an error with the entry it occurred on
    pub fn for_entry(self, operation: Operation, name: impl ToString) -> Self {
        Error::Entry {
            operation,
            name: name.to_string(),
            source: Box::new(self),
        }
    }
}

/// Archive level operation an entry failure happened in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    /// Unpacking an entry out of an archive
    Extract,
    /// Packing a file into an archive
    Pack,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::Extract => f.write_str("extract"),
            Operation::Pack => f.write_str("pack"),
        }
    }
}

/// Error type to provide further information when a file has not been found
#[derive(Error, Diagnostic, Debug)]
#[error("unable to find requested file")]
pub enum FileNotFoundError {
    /// at index {0}
    #[error("at index {0}")]
    Index(usize),

    /// by name {0}
    #[error("by name {0}")]
    Name(String),
}

/// Structural problems with an archive or one of its entries
#[derive(Error, Diagnostic, Debug)]
pub enum FormatError {
    /// file is {0} bytes, smaller than the 52 byte minimum
    #[error("file is {0} bytes, smaller than the 52 byte minimum")]
    TooSmall(u64),

    /// expected magic "RREDATA ", found {0:?}
    #[error("expected magic \"RREDATA \", found {0:?}")]
    InvalidMagic(String),

    /// negative entry count {0}
    #[error("negative entry count {0}")]
    NegativeCount(i32),

    /// index of {count} entries does not fit in a {length} byte file
    #[error("index of {count} entries does not fit in a {length} byte file")]
    IndexTooLarge {
        /// Entry count from the trailer
        count: i32,
        /// Size of the archive
        length: u64,
    },

    /// entry {0} has no usable name
    #[error("entry {0} has no usable name")]
    InvalidName(usize),

    /// entry {name} starts at {offset}, past the end of the archive
    #[error("entry {name} starts at {offset}, past the end of the archive")]
    InvalidOffset {
        /// Entry name
        name: String,
        /// Offset from the index
        offset: u32,
    },

    /// entry {name} is {size} bytes, more than remains in the archive
    #[error("entry {name} is {size} bytes, more than remains in the archive")]
    InvalidSize {
        /// Entry name
        name: String,
        /// Packed size from the index
        size: u32,
    },

    /// entry {name} has unsupported subtype {subtype}
    #[error("entry {name} has unsupported subtype {subtype}")]
    UnsupportedSubtype {
        /// Entry name
        name: String,
        /// Raw subtype value
        subtype: u16,
    },

    /// {length} bytes at {offset} lie outside the archive
    #[error("{length} bytes at {offset} lie outside the archive")]
    OutOfBounds {
        /// Start of the requested region
        offset: u64,
        /// Length of the requested region
        length: u64,
    },

    /// blob of {0} bytes is too small to carry an encrypted prefix
    #[error("blob of {0} bytes is too small to carry an encrypted prefix")]
    BlobTooSmall(u32),

    /// raw script of {0} bytes is too small to carry its 12 byte header
    #[error("raw script of {0} bytes is too small to carry its 12 byte header")]
    ScriptTooSmall(usize),

    /// key must be 40 bytes, found {0}
    #[error("key must be 40 bytes, found {0}")]
    InvalidKeyLength(usize),

    /// archive grew past the 4 GiB addressable by the index
    #[error("archive grew past the 4 GiB addressable by the index")]
    TooLarge,
}

/// Problems converting between the archive bitmap layout and pixel buffers
#[derive(Error, Diagnostic, Debug)]
pub enum CodecError {
    /// unsupported format: {bpp} bpp with {colors} palette colors
    #[error("unsupported format: {bpp} bpp with {colors} palette colors")]
    UnsupportedFormat {
        /// Bits per pixel from the header
        bpp: u8,
        /// Palette size from the header
        colors: u16,
    },

    /// unsupported format: cannot encode {0:?} pixels
    #[error("unsupported format: cannot encode {0:?} pixels")]
    UnsupportedLayout(image::ColorType),

    /// palette of {palette} bytes exceeds the {packed} byte payload
    #[error("palette of {palette} bytes exceeds the {packed} byte payload")]
    PaletteOverflow {
        /// Bytes taken by the palette
        palette: u32,
        /// Packed size of the entry
        packed: u32,
    },

    /// image of {width}x{height} is too large for an archive bitmap
    #[error("image of {width}x{height} is too large for an archive bitmap")]
    TooLarge {
        /// Width in pixels
        width: u32,
        /// Height in pixels
        height: u32,
    },
}

/// Malformed LZSS streams
#[derive(Error, Diagnostic, Debug)]
pub enum CompressionError {
    /// back-reference at byte {0} is cut off by the end of the stream
    #[error("back-reference at byte {0} is cut off by the end of the stream")]
    TruncatedReference(usize),
}

/// Generic result type with crate's Error as its error variant
pub type Result<T> = core::result::Result<T, Error>;
