//! Types for reading EME archives
//!

use std::{
    fmt::{self, Debug},
    fs::{self, File},
    io::{BufReader, Cursor, Read, Seek, SeekFrom},
    path::Path,
};

use binrw::BinRead;
use byteorder::{LittleEndian, ReadBytesExt};
use image::{DynamicImage, ImageFormat};
use indexmap::IndexMap;
use tracing::{info, instrument};

use crate::{
    bitmap::{self, palette_size},
    compression,
    crypt::{Schedule, SCHEDULE_SIZE},
    entry::{Entry, Subtype},
    error::{Error, FileNotFoundError, FormatError, Operation, Result},
    metadata::ArchiveMetadata,
    types::{EmeRecord, COUNT_SIZE, EME_MAGIC, IMAGE_HEADER_SIZE, MIN_ARCHIVE_SIZE, RECORD_SIZE},
};

/// Size of the encrypted header in front of script payloads
pub const SCRIPT_HEADER_SIZE: usize = 12;

/// Size of the encrypted prefix of blob payloads
pub const BLOB_PREFIX_SIZE: usize = 4;

/// EME archive reader
///
/// The whole index is read, decrypted and validated up front, so a reader that was created
/// successfully only holds entries whose payload lies inside the archive.
///
/// ```no_run
/// use std::io::prelude::*;
///
/// fn list_eme_contents(reader: impl Read + Seek) -> emon_eme::error::Result<()> {
///     let mut eme = emon_eme::EmeArchive::new(reader)?;
///
///     for i in 0..eme.len() {
///         let data = eme.read_entry(i)?;
///         println!("{}: {} bytes", eme.by_index(i)?.name(), data.len());
///     }
///
///     Ok(())
/// }
/// ```
pub struct EmeArchive<R> {
    reader: R,
    length: u64,
    schedule: Schedule,
    entries: Vec<Entry>,
    names: IndexMap<String, usize>,
}

impl<R> Debug for EmeArchive<R> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("EmeArchive")
            .field("length", &self.length)
            .field("schedule", &self.schedule)
            .field("entries", &self.entries)
            .finish()
    }
}

impl<R> EmeArchive<R> {
    /// Number of entries contained in this EME.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether this EME archive contains no entries
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All entries, in index order
    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    /// The key records and headers are encrypted with
    pub fn schedule(&self) -> &Schedule {
        &self.schedule
    }

    /// Size of the archive in bytes
    pub fn archive_len(&self) -> u64 {
        self.length
    }

    /// Get the index of an entry by name, if it's present.
    ///
    /// Should several entries share a name, the first one is returned.
    #[inline(always)]
    pub fn index_for_name(&self, name: &str) -> Option<usize> {
        self.names.get(name).copied()
    }

    /// Get a contained entry by index
    pub fn by_index(&self, index: usize) -> Result<&Entry> {
        self.entries
            .get(index)
            .ok_or(Error::FileNotFound(FileNotFoundError::Index(index)))
    }

    /// Search for an entry by name
    pub fn by_name(&self, name: &str) -> Result<&Entry> {
        let Some(index) = self.index_for_name(name) else {
            return Err(Error::FileNotFound(FileNotFoundError::Name(
                name.to_owned(),
            )));
        };
        self.by_index(index)
    }

    /// Sidecar describing this archive
    pub fn metadata(&self) -> ArchiveMetadata {
        ArchiveMetadata::new(&self.schedule, &self.entries)
    }

    /// Unwrap and return the inner reader object
    ///
    /// The position of the reader is undefined.
    pub fn into_inner(self) -> R {
        self.reader
    }
}

impl<R: Read + Seek> EmeArchive<R> {
    /// Read an EME archive, decrypting and validating its index.
    #[instrument(skip(reader), err)]
    pub fn new(mut reader: R) -> Result<EmeArchive<R>> {
        let length = reader.seek(SeekFrom::End(0))?;
        if length < MIN_ARCHIVE_SIZE {
            return Err(FormatError::TooSmall(length).into());
        }

        let mut magic = [0u8; EME_MAGIC.len()];
        reader.seek(SeekFrom::Start(0))?;
        reader.read_exact(&mut magic)?;
        if &magic != EME_MAGIC {
            return Err(FormatError::InvalidMagic(String::from_utf8_lossy(&magic).into()).into());
        }

        reader.seek(SeekFrom::End(-(COUNT_SIZE as i64)))?;
        let count = reader.read_i32::<LittleEndian>()?;
        if count < 0 {
            return Err(FormatError::NegativeCount(count).into());
        }

        let index_size = count as u64 * RECORD_SIZE as u64;
        if index_size > length - MIN_ARCHIVE_SIZE {
            return Err(FormatError::IndexTooLarge { count, length }.into());
        }

        let index_offset = length - COUNT_SIZE as u64 - index_size;
        let mut key = [0u8; SCHEDULE_SIZE];
        reader.seek(SeekFrom::Start(index_offset - SCHEDULE_SIZE as u64))?;
        reader.read_exact(&mut key)?;
        let schedule = Schedule::from_bytes(key);

        let mut index = vec![0u8; index_size as usize];
        reader.read_exact(&mut index)?;

        let entries = index
            .chunks_exact_mut(RECORD_SIZE)
            .enumerate()
            .map(|(i, raw)| {
                schedule.decrypt(raw);
                let record = EmeRecord::read(&mut Cursor::new(&*raw))?;
                Entry::from_record(&record, i, length)
            })
            .collect::<Result<Vec<_>>>()?;

        let mut names = IndexMap::with_capacity(entries.len());
        for (i, entry) in entries.iter().enumerate() {
            names.entry(entry.name().to_owned()).or_insert(i);
        }

        Ok(EmeArchive {
            reader,
            length,
            schedule,
            entries,
            names,
        })
    }

    fn read_region(&mut self, offset: u64, length: u64) -> Result<Vec<u8>> {
        if offset
            .checked_add(length)
            .map_or(true, |end| end > self.length)
        {
            return Err(FormatError::OutOfBounds { offset, length }.into());
        }

        let mut buffer = vec![0u8; length as usize];
        self.reader.seek(SeekFrom::Start(offset))?;
        self.reader.read_exact(&mut buffer)?;
        Ok(buffer)
    }

    /// Contents of the entry at `index` as they are written when extracting
    ///
    /// Bitmaps are returned as PNG data.
    pub fn read_entry(&mut self, index: usize) -> Result<Vec<u8>> {
        let entry = self.by_index(index)?.clone();
        match entry.subtype() {
            Subtype::Script => self.read_script(&entry),
            Subtype::Bitmap => {
                let mut png = Cursor::new(Vec::new());
                self.read_image(index)?.write_to(&mut png, ImageFormat::Png)?;
                Ok(png.into_inner())
            }
            Subtype::Blob => self.read_blob(&entry),
            Subtype::Audio => self.read_audio(&entry),
        }
    }

    /// Decode the bitmap at `index`
    pub fn read_image(&mut self, index: usize) -> Result<DynamicImage> {
        let entry = self.by_index(index)?.clone();
        let offset = u64::from(entry.offset());

        let header = self.read_region(offset, IMAGE_HEADER_SIZE as u64)?;
        let header = bitmap::read_header(&header, &self.schedule)?;

        let length = u64::from(entry.packed_size())
            + IMAGE_HEADER_SIZE as u64
            + palette_size(&header) as u64;
        let data = self.read_region(offset, length)?;

        bitmap::decode_image(&data, &self.schedule, &entry)
    }

    fn read_script(&mut self, entry: &Entry) -> Result<Vec<u8>> {
        let offset = u64::from(entry.offset());
        let body = offset + SCRIPT_HEADER_SIZE as u64;
        let mut header = self.read_region(offset, SCRIPT_HEADER_SIZE as u64)?;
        self.schedule.decrypt(&mut header);

        if entry.frame_size() == 0 {
            let mut data = header;
            data.extend(self.read_region(body, u64::from(entry.packed_size()))?);
            return Ok(data);
        }

        let mut fields = Cursor::new(&header);
        let part2_packed = fields.read_u32::<LittleEndian>()?;
        let part2_unpacked = fields.read_u32::<LittleEndian>()?;

        if part2_unpacked == 0 || part2_unpacked >= entry.unpacked_size() {
            let packed = self.read_region(body, u64::from(entry.packed_size()))?;
            return compression::decompress_with(&packed, entry.frame());
        }

        if part2_packed > entry.packed_size() {
            return Err(FormatError::InvalidSize {
                name: entry.name().to_owned(),
                size: part2_packed,
            }
            .into());
        }

        let part2 = self.read_region(body, u64::from(part2_packed))?;
        let mut part2 = compression::decompress_with(&part2, entry.frame())?;
        part2.truncate(part2_unpacked as usize);

        // the first part runs up to the key at most
        let part1_start = body + u64::from(part2_packed);
        let payload_end = self.length - self.index_len();
        let part1_len =
            u64::from(entry.packed_size()).min(payload_end.saturating_sub(part1_start));
        let part1 = self.read_region(part1_start, part1_len)?;
        let mut data = compression::decompress_with(&part1, entry.frame())?;
        data.truncate((entry.unpacked_size() - part2_unpacked) as usize);

        data.extend(part2);
        Ok(data)
    }

    fn read_blob(&mut self, entry: &Entry) -> Result<Vec<u8>> {
        if (entry.packed_size() as usize) < BLOB_PREFIX_SIZE {
            return Err(FormatError::BlobTooSmall(entry.packed_size()).into());
        }

        let mut data =
            self.read_region(u64::from(entry.offset()), u64::from(entry.packed_size()))?;
        self.schedule.decrypt(&mut data[..BLOB_PREFIX_SIZE]);
        Ok(data)
    }

    fn read_audio(&mut self, entry: &Entry) -> Result<Vec<u8>> {
        let data = self.read_region(u64::from(entry.offset()), u64::from(entry.packed_size()))?;
        if entry.is_packed() {
            return compression::decompress_with(&data, entry.frame());
        }
        Ok(data)
    }

    fn index_len(&self) -> u64 {
        (SCHEDULE_SIZE + self.entries.len() * RECORD_SIZE + COUNT_SIZE) as u64
    }

    /// Write every entry and the sidecar into `directory`
    ///
    /// The directory is created when missing. Entries written before a failing one are kept.
    #[instrument(skip(self), err)]
    pub fn extract_all(&mut self, directory: &Path) -> Result<()> {
        fs::create_dir_all(directory)?;
        self.metadata().save(directory)?;

        for i in 0..self.len() {
            let entry = self.entries[i].clone();
            let path = entry.output_path(directory);

            let data = self
                .read_entry(i)
                .map_err(|e| e.for_entry(Operation::Extract, entry.name()))?;
            fs::write(&path, data)
                .map_err(|e| Error::from(e).for_entry(Operation::Extract, entry.name()))?;

            info!("writing {}", path.display());
        }

        Ok(())
    }
}

/// Extract the archive at `archive` into `directory`
///
/// Nothing is written unless the whole index is valid.
pub fn unpack(archive: &Path, directory: &Path) -> Result<()> {
    let file = File::open(archive)?;
    let mut eme = EmeArchive::new(BufReader::new(file))?;
    eme.extract_all(directory)
}
