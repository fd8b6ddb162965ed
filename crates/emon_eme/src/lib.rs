//! This library handles reading from and creating **EME** files used by games built on the *Emon* engine.
//!
//! # EME Archive Format Documentation
//!
//! An EME file bundles the scripts, music and pictures of a game into a single file. The index
//! and the headers of most entries are scrambled with a keyed cipher, see [`crypt`], and most
//! payloads are compressed with LZSS, see [`compression`].
//!
//! ## File Structure
//!
//! The magic is followed by the entry payloads. The key, the index and the entry count are
//! stored at the end of the file, so readers start from the last four bytes.
//!
//! | Offset (bytes)     | Field       | Description                                          |
//! |--------------------|-------------|------------------------------------------------------|
//! | 0x0000             | Magic       | 8 bytes: `"RREDATA "`                                |
//! | 0x0008             | Payloads    | Entry data, addressed by the index                   |
//! | end - 44 - 96 * N  | Key         | 40 bytes: the cipher schedule                        |
//! | end - 4 - 96 * N   | Index       | N records of 96 bytes, each encrypted on its own     |
//! | end - 4            | Count       | 4 bytes: signed number of records N                  |
//!
//! ### Index Record
//!
//! | Offset (bytes) | Field           | Description                                                |
//! |----------------|-----------------|------------------------------------------------------------|
//! | 0x0000         | Name            | 64 bytes: zero padded name                                 |
//! | 0x0040         | Frame Size      | 2 bytes: LZSS ring buffer size, zero for raw scripts       |
//! | 0x0042         | Init Position   | 2 bytes: stored as `(frame size - position) % frame size`  |
//! | 0x0044         | Magic           | 4 bytes: opaque flags                                      |
//! | 0x0048         | Subtype         | 2 bytes followed by 2 bytes of padding                     |
//! | 0x004C         | Packed Size     | 4 bytes: size of the payload in the archive                |
//! | 0x0050         | Unpacked Size   | 4 bytes: size of the payload once expanded                 |
//! | 0x0054         | Offset          | 4 bytes: start of the payload from the start of the file   |
//! | 0x0058         | Padding         | 8 bytes                                                    |
//!
//! ### Subtypes
//!
//! - `0` **Audio**: the payload as is, LZSS compressed when packed and unpacked sizes differ.
//! - `3` **Script**: an encrypted 12 byte header and LZSS data. A header whose second word is
//!   non-zero and smaller than the unpacked size splits the script in two streams, the one
//!   right after the header being the tail of the script. Each stream is cut to its share of
//!   the unpacked size, and the head stream never reads past the start of the key. Scripts
//!   with a zero frame size are stored raw behind their header.
//! - `4` **Bitmap**: an encrypted 32 byte [`types::ImageHeader`], an optional palette and a
//!   pixel plane, see [`bitmap`].
//! - `5` **Blob**: the payload as is, except for its encrypted first 4 bytes.
//!
//! ## Additional Information
//!
//! - **File Extension**: `.eme`
//! - **Endianness**: Little-endian for all multi-byte integers
//! - **Sidecar**: extraction writes a `_metadata.json` holding the key and the index values,
//!   see [`metadata`]
//!

pub mod bitmap;
pub mod compression;
pub mod crypt;
pub mod entry;
pub mod error;
pub mod metadata;
pub mod read;
pub mod types;
pub mod write;

pub use crypt::Schedule;
pub use entry::{Entry, Subtype};
pub use read::{unpack, EmeArchive};
pub use write::{pack_directory, EmeWriter, PackOptions};
