//! Types for writing EME archives
//!

use binrw::BinWrite;
use bon::Builder;
use byteorder::{LittleEndian, WriteBytesExt};
use image::DynamicImage;
use std::fmt::Debug;
use std::fs::{self, File};
use std::io::{self, BufWriter, Cursor, ErrorKind, Write};
use std::path::Path;
use tracing::{debug, info, instrument};
use walkdir::WalkDir;

use crate::bitmap::encode_image;
use crate::compression::{self, Frame};
use crate::crypt::Schedule;
use crate::entry::{Entry, Subtype, DEFAULT_FRAME_SIZE, DEFAULT_INIT_POS};
use crate::error::{Error, FormatError, Operation, Result};
use crate::metadata::{ArchiveMetadata, EntryMetadata, METADATA_FILE};
use crate::read::{BLOB_PREFIX_SIZE, SCRIPT_HEADER_SIZE};
use crate::types::{EME_MAGIC, RECORD_SIZE};

/// Options for how the EME file should be written
#[derive(Debug, Clone, Copy, Default, Builder)]
pub struct EmeWriterOptions {
    /// The key used for the index and entry headers, all zero by default
    #[builder(default)]
    pub schedule: Schedule,
}

/// Flag word written for each subtype unless the sidecar says otherwise
pub fn default_magic(subtype: Subtype) -> u32 {
    match subtype {
        Subtype::Audio => 0x2040_0000,
        Subtype::Script => 1,
        Subtype::Bitmap => 0x10,
        Subtype::Blob => 0,
    }
}

/// Subtype a file is packed as, judging by its extension
pub fn subtype_for_extension(path: &Path) -> Option<Subtype> {
    let extension = path.extension()?.to_str()?.to_ascii_lowercase();
    match extension.as_str() {
        "txt" => Some(Subtype::Script),
        "ogg" => Some(Subtype::Audio),
        "bmp" | "png" => Some(Subtype::Bitmap),
        _ => None,
    }
}

/// Index values known before the payload is encoded
#[derive(Debug)]
struct PendingEntry {
    name: String,
    subtype: Subtype,
    magic: u32,
    frame_size: u16,
    init_pos: u16,
    offset: u32,
}

impl PendingEntry {
    fn frame(&self) -> Frame {
        Frame::from_record(self.frame_size, self.init_pos)
    }

    fn finish(self, packed_size: u32, unpacked_size: u32) -> Entry {
        Entry::builder()
            .name(self.name)
            .subtype(self.subtype)
            .magic(self.magic)
            .frame_size(self.frame_size)
            .init_pos(self.init_pos)
            .offset(self.offset)
            .packed_size(packed_size)
            .unpacked_size(unpacked_size)
            .build()
    }
}

fn to_u32(value: usize) -> Result<u32> {
    u32::try_from(value).map_err(|_| FormatError::TooLarge.into())
}

/// EME archive generator
///
/// Payloads are written as entries are added, the key and index follow on
/// [`EmeWriter::finish`].
///
/// ```
/// # fn doit() -> emon_eme::error::Result<()>
/// # {
/// use emon_eme::EmeWriter;
/// use emon_eme::write::EmeWriterOptions;
///
/// let mut eme = EmeWriter::new(Vec::new(), EmeWriterOptions::default())?;
///
/// eme.add_script("hello_world.txt", b"Hello, World!", None)?;
///
/// // Apply the changes you've made.
/// let archive = eme.finish()?;
/// assert_eq!(&archive[..8], b"RREDATA ");
///
/// # Ok(())
/// # }
/// # doit().unwrap();
/// ```
pub struct EmeWriter<W: Write> {
    inner: W,
    position: u64,
    schedule: Schedule,
    entries: Vec<Entry>,
}

impl<W: Write> Debug for EmeWriter<W> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmeWriter")
            .field("position", &self.position)
            .field("schedule", &self.schedule)
            .field("entries", &self.entries)
            .finish()
    }
}

impl<W: Write> EmeWriter<W> {
    /// Initializes the archive, writing its magic.
    pub fn new(mut inner: W, options: EmeWriterOptions) -> Result<EmeWriter<W>> {
        inner.write_all(EME_MAGIC)?;
        Ok(EmeWriter {
            inner,
            position: EME_MAGIC.len() as u64,
            schedule: options.schedule,
            entries: Vec::new(),
        })
    }

    /// Entries written so far
    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    fn start_entry(
        &self,
        name: &str,
        subtype: Subtype,
        metadata: Option<&EntryMetadata>,
    ) -> Result<PendingEntry> {
        let offset = u32::try_from(self.position).map_err(|_| FormatError::TooLarge)?;
        let (magic, frame_size, init_pos) = match metadata {
            Some(metadata) => (
                metadata.magic,
                metadata.lzss_frame_size,
                metadata.lzss_init_pos,
            ),
            None => (default_magic(subtype), DEFAULT_FRAME_SIZE, DEFAULT_INIT_POS),
        };

        Ok(PendingEntry {
            name: name.to_owned(),
            subtype,
            magic,
            frame_size,
            init_pos,
            offset,
        })
    }

    fn push(
        &mut self,
        pending: PendingEntry,
        sizes: (usize, usize),
        payload: &[&[u8]],
    ) -> Result<()> {
        let length: usize = payload.iter().map(|part| part.len()).sum();
        if self.position + length as u64 > u64::from(u32::MAX) {
            return Err(FormatError::TooLarge.into());
        }
        let entry = pending.finish(to_u32(sizes.0)?, to_u32(sizes.1)?);

        for part in payload {
            self.inner.write_all(part)?;
        }
        self.position += length as u64;
        self.entries.push(entry);

        Ok(())
    }

    /// Add a script
    ///
    /// Scripts with a ring buffer are compressed behind an empty encrypted header. Raw scripts
    /// (frame size zero) store their first 12 bytes as the encrypted header.
    #[instrument(skip(self, data, metadata), err)]
    pub fn add_script(
        &mut self,
        name: &str,
        data: &[u8],
        metadata: Option<&EntryMetadata>,
    ) -> Result<()> {
        let entry = self.start_entry(name, Subtype::Script, metadata)?;

        if entry.frame_size == 0 {
            if data.len() < SCRIPT_HEADER_SIZE {
                return Err(FormatError::ScriptTooSmall(data.len()).into());
            }
            let (header, body) = data.split_at(SCRIPT_HEADER_SIZE);
            let mut header = header.to_vec();
            self.schedule.encrypt(&mut header);
            return self.push(entry, (body.len(), data.len()), &[&header, body]);
        }

        let mut header = [0u8; SCRIPT_HEADER_SIZE];
        self.schedule.encrypt(&mut header);
        let packed = compression::compress_with(data, entry.frame());
        self.push(entry, (packed.len(), data.len()), &[&header, &packed])
    }

    /// Add an audio stream, stored as is
    #[instrument(skip(self, data, metadata), err)]
    pub fn add_audio(
        &mut self,
        name: &str,
        data: &[u8],
        metadata: Option<&EntryMetadata>,
    ) -> Result<()> {
        let entry = self.start_entry(name, Subtype::Audio, metadata)?;
        self.push(entry, (data.len(), data.len()), &[data])
    }

    /// Add a bitmap
    #[instrument(skip(self, image, metadata), err)]
    pub fn add_image(
        &mut self,
        name: &str,
        image: &DynamicImage,
        metadata: Option<&EntryMetadata>,
    ) -> Result<()> {
        let entry = self.start_entry(name, Subtype::Bitmap, metadata)?;
        let encoded = encode_image(image, entry.frame())?;
        let payload = encoded.to_payload(&self.schedule)?;
        self.push(
            entry,
            (encoded.plane.len(), encoded.plane_size()? as usize),
            &[&payload],
        )
    }

    /// Add a blob, only its first 4 bytes are encrypted
    #[instrument(skip(self, data, metadata), err)]
    pub fn add_blob(
        &mut self,
        name: &str,
        data: &[u8],
        metadata: Option<&EntryMetadata>,
    ) -> Result<()> {
        if data.len() < BLOB_PREFIX_SIZE {
            return Err(FormatError::BlobTooSmall(to_u32(data.len())?).into());
        }

        let entry = self.start_entry(name, Subtype::Blob, metadata)?;
        let (prefix, rest) = data.split_at(BLOB_PREFIX_SIZE);
        let mut prefix = prefix.to_vec();
        self.schedule.encrypt(&mut prefix);
        self.push(entry, (data.len(), data.len()), &[&prefix, rest])
    }

    /// Add the contents of a file as the given subtype
    ///
    /// Bitmaps are decoded from any format the `image` crate detects in `data`.
    pub fn add_file(
        &mut self,
        name: &str,
        data: &[u8],
        subtype: Subtype,
        metadata: Option<&EntryMetadata>,
    ) -> Result<()> {
        match subtype {
            Subtype::Script => self.add_script(name, data, metadata),
            Subtype::Audio => self.add_audio(name, data, metadata),
            Subtype::Bitmap => self.add_image(name, &image::load_from_memory(data)?, metadata),
            Subtype::Blob => self.add_blob(name, data, metadata),
        }
    }

    /// Write the key and the encrypted index
    ///
    /// This will return the writer, but one should normally not append any data to the end of the file.
    #[instrument(skip(self), err)]
    pub fn finish(mut self) -> Result<W> {
        let count = i32::try_from(self.entries.len()).map_err(|_| FormatError::TooLarge)?;

        self.inner.write_all(self.schedule.as_bytes())?;

        let mut record = Vec::with_capacity(RECORD_SIZE);
        for entry in &self.entries {
            record.clear();
            entry.to_record().write(&mut Cursor::new(&mut record))?;
            self.schedule.encrypt(&mut record);
            self.inner.write_all(&record)?;
        }

        self.inner.write_i32::<LittleEndian>(count)?;
        self.inner.flush()?;

        Ok(self.inner)
    }
}

/// Options for packing a directory
#[derive(Debug, Clone, Copy, Default, Builder)]
pub struct PackOptions {
    /// Encrypt with the sidecar key, or a freshly generated one when there is none
    #[builder(default)]
    pub encrypt: bool,
}

/// Pack the files directly inside `directory` into a new archive at `archive`
///
/// Files are added in name order. The sidecar, when present, provides the subtype and index
/// values of the files it names. Files with an unknown extension that the sidecar does not name
/// are skipped.
///
/// When encrypting without a usable sidecar key a new key is generated and saved, together
/// with the packed entries, as the sidecar of `directory`.
#[instrument(skip(options), fields(encrypt = options.encrypt), err)]
pub fn pack_directory(directory: &Path, archive: &Path, options: PackOptions) -> Result<()> {
    if !directory.is_dir() {
        return Err(io::Error::new(
            ErrorKind::NotFound,
            format!("{} is not a directory", directory.display()),
        )
        .into());
    }

    let metadata = ArchiveMetadata::load(directory);
    let sidecar_key = metadata
        .as_ref()
        .and_then(ArchiveMetadata::schedule)
        .filter(|schedule| !schedule.is_zero());

    let (schedule, generated) = match (options.encrypt, sidecar_key) {
        (false, _) => (Schedule::zeroed(), false),
        (true, Some(schedule)) => (schedule, false),
        (true, None) => (Schedule::generate(&mut rand::thread_rng()), true),
    };

    let mut eme = EmeWriter::new(
        BufWriter::new(File::create(archive)?),
        EmeWriterOptions::builder().schedule(schedule).build(),
    )?;

    for file in WalkDir::new(directory)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name()
    {
        let file = file?;
        if !file.file_type().is_file() {
            continue;
        }

        let name = file.file_name().to_string_lossy().into_owned();
        if name == METADATA_FILE {
            continue;
        }

        let by_extension = subtype_for_extension(file.path());
        let entry_metadata = metadata
            .as_ref()
            .and_then(|metadata| metadata.find(&name))
            .filter(|entry| by_extension.is_some() || entry.name == name);

        let subtype = match (entry_metadata, by_extension) {
            (Some(entry), _) => {
                Subtype::from_raw(entry.subtype).ok_or(FormatError::UnsupportedSubtype {
                    name: name.clone(),
                    subtype: entry.subtype,
                })?
            }
            (None, Some(subtype)) => subtype,
            (None, None) => {
                debug!("skipping {}", file.path().display());
                continue;
            }
        };

        info!("packing {}", file.path().display());
        let data = fs::read(file.path())
            .map_err(|e| Error::from(e).for_entry(Operation::Pack, &name))?;
        eme.add_file(&name, &data, subtype, entry_metadata)
            .map_err(|e| e.for_entry(Operation::Pack, &name))?;
    }

    let entries = eme.entries().to_vec();
    eme.finish()?;

    if generated {
        info!(
            "saving generated key to {}",
            ArchiveMetadata::path(directory).display()
        );
        ArchiveMetadata::new(&schedule, &entries).save(directory)?;
    }

    Ok(())
}

#[cfg(test)]
mod test {
    use pretty_assertions::{assert_eq, assert_str_eq};
    use tracing_test::traced_test;

    use crate::entry::Subtype;
    use crate::error::{Error, FormatError, Result};
    use crate::metadata::EntryMetadata;
    use crate::write::{EmeWriter, EmeWriterOptions};

    #[traced_test]
    #[test]
    fn eme_empty_write() -> Result<()> {
        let mut expected = b"RREDATA ".to_vec();
        expected.extend_from_slice(&[0u8; 40]);
        expected.extend_from_slice(&[0x00, 0x00, 0x00, 0x00]);

        let writer = EmeWriter::new(Vec::new(), EmeWriterOptions::default())?;
        let result = writer.finish()?;
        assert_eq!(result.len(), 52);
        assert_str_eq!(format!("{:02X?}", result), format!("{:02X?}", expected));

        Ok(())
    }

    #[traced_test]
    #[test]
    fn eme_audio_write() -> Result<()> {
        #[rustfmt::skip]
        let expected = [
            // Magic
            0x52, 0x52, 0x45, 0x44, 0x41, 0x54, 0x41, 0x20,
            // Data
            0x4F, 0x67, 0x67, 0x53,
            // Key
            0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
            0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
            0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
            0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
            0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
            // Record
            0x61, 0x2E, 0x6F, 0x67, 0x67, 0x00, 0x00, 0x00,
            0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
            0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
            0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
            0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
            0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
            0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
            0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
            0x00, 0x10, 0x12, 0x00,
            0x00, 0x00, 0x40, 0x20,
            0x00, 0x00, 0x00, 0x00,
            0x04, 0x00, 0x00, 0x00,
            0x04, 0x00, 0x00, 0x00,
            0x08, 0x00, 0x00, 0x00,
            0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
            // Count
            0x01, 0x00, 0x00, 0x00,
        ];

        let mut writer = EmeWriter::new(Vec::new(), EmeWriterOptions::default())?;
        writer.add_audio("a.ogg", b"OggS", None)?;
        let result = writer.finish()?;

        assert_eq!(result.len(), expected.len());
        assert_str_eq!(format!("{:02X?}", result), format!("{:02X?}", expected));

        Ok(())
    }

    #[traced_test]
    #[test]
    fn eme_script_write() -> Result<()> {
        let mut writer = EmeWriter::new(Vec::new(), EmeWriterOptions::default())?;
        writer.add_script("a.txt", b"abcabcabcabc", None)?;

        let entry = writer.entries()[0].clone();
        assert_eq!(entry.subtype(), Subtype::Script);
        assert_eq!(entry.magic(), 1);
        assert_eq!(entry.offset(), 8);
        assert_eq!(entry.unpacked_size(), 12);

        let result = writer.finish()?;
        // zero header, then three literals and a reference
        assert_eq!(&result[8..20], &[0u8; 12]);
        assert_eq!(&result[20..26], &[0x07, b'a', b'b', b'c', 0xEE, 0xF6]);
        assert_eq!(entry.packed_size(), 6);

        Ok(())
    }

    #[test]
    fn metadata_overrides_defaults() -> Result<()> {
        let metadata = EntryMetadata {
            name: "voice.ogg".into(),
            magic: 0xDEAD_BEEF,
            lzss_frame_size: 0x800,
            lzss_init_pos: 0x7EE,
            ..Default::default()
        };

        let mut writer = EmeWriter::new(Vec::new(), EmeWriterOptions::default())?;
        writer.add_file("voice.ogg", b"OggS", Subtype::Audio, Some(&metadata))?;

        let entry = &writer.entries()[0];
        assert_eq!(entry.magic(), 0xDEAD_BEEF);
        assert_eq!(entry.frame_size(), 0x800);
        assert_eq!(entry.init_pos(), 0x7EE);
        assert_eq!(entry.to_record().init_pos, 0x12);

        Ok(())
    }

    #[test]
    fn raw_script_needs_header() -> Result<()> {
        let metadata = EntryMetadata {
            name: "raw.txt".into(),
            subtype: 3,
            ..Default::default()
        };

        let mut writer = EmeWriter::new(Vec::new(), EmeWriterOptions::default())?;
        assert!(matches!(
            writer.add_script("raw.txt", b"short", Some(&metadata)),
            Err(Error::Format(FormatError::ScriptTooSmall(5)))
        ));

        writer.add_script("raw.txt", b"twelve bytes and more", Some(&metadata))?;
        assert_eq!(writer.entries()[0].packed_size(), 9);

        Ok(())
    }

    #[test]
    fn blob_needs_prefix() -> Result<()> {
        let mut writer = EmeWriter::new(Vec::new(), EmeWriterOptions::default())?;
        assert!(matches!(
            writer.add_blob("tiny.dat", b"abc", None),
            Err(Error::Format(FormatError::BlobTooSmall(3)))
        ));
        assert!(writer.entries().is_empty());

        Ok(())
    }
}
