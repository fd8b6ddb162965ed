//! The `_metadata.json` sidecar written next to extracted entries
//!
//! It keeps what extraction alone would lose: the archive key and per entry values such as the
//! subtype and flag word. Packing a directory that carries a sidecar reuses them.

use std::{
    fs,
    io::ErrorKind,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use crate::{crypt::Schedule, entry::Entry, error::Result};

/// File name of the sidecar
pub const METADATA_FILE: &str = "_metadata.json";

/// Contents of the sidecar
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct ArchiveMetadata {
    /// Archive key, hex encoded
    pub key: String,
    /// One item per entry, in index order
    pub entries: Vec<EntryMetadata>,
}

/// Index values of a single entry
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct EntryMetadata {
    pub name: String,
    #[serde(rename = "SubType")]
    pub subtype: u16,
    pub magic: u32,
    pub lzss_frame_size: u16,
    /// Logical initial ring buffer position
    pub lzss_init_pos: u16,
    pub unpacked_size: u32,
    pub offset: u32,
    pub packed_size: u32,
    pub is_packed: bool,
}

impl From<&Entry> for EntryMetadata {
    fn from(entry: &Entry) -> Self {
        Self {
            name: entry.name().to_owned(),
            subtype: entry.subtype().raw(),
            magic: entry.magic(),
            lzss_frame_size: entry.frame_size(),
            lzss_init_pos: entry.init_pos(),
            unpacked_size: entry.unpacked_size(),
            offset: entry.offset(),
            packed_size: entry.packed_size(),
            is_packed: entry.is_packed(),
        }
    }
}

fn stem(name: &str) -> &str {
    Path::new(name)
        .file_stem()
        .and_then(|stem| stem.to_str())
        .unwrap_or(name)
}

impl ArchiveMetadata {
    /// Describe an archive
    pub fn new<'a>(schedule: &Schedule, entries: impl IntoIterator<Item = &'a Entry>) -> Self {
        Self {
            key: schedule.to_hex(),
            entries: entries.into_iter().map(EntryMetadata::from).collect(),
        }
    }

    /// Path of the sidecar inside `dir`
    pub fn path(dir: &Path) -> PathBuf {
        dir.join(METADATA_FILE)
    }

    /// Load the sidecar of `dir`
    ///
    /// A missing or unreadable sidecar is not an error, the directory is simply treated as having
    /// none.
    #[instrument]
    pub fn load(dir: &Path) -> Option<Self> {
        let path = Self::path(dir);
        let contents = match fs::read_to_string(&path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("no metadata in {}", dir.display());
                return None;
            }
            Err(e) => {
                warn!("unable to read {}: {e}", path.display());
                return None;
            }
        };

        match serde_json::from_str(&contents) {
            Ok(metadata) => Some(metadata),
            Err(e) => {
                warn!("ignoring malformed {}: {e}", path.display());
                None
            }
        }
    }

    /// Write the sidecar into `dir`
    #[instrument(skip(self), err)]
    pub fn save(&self, dir: &Path) -> Result<()> {
        fs::write(Self::path(dir), serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    /// The archive key, if the sidecar holds a valid one
    pub fn schedule(&self) -> Option<Schedule> {
        match Schedule::from_hex(&self.key) {
            Ok(schedule) => Some(schedule),
            Err(e) => {
                warn!("ignoring sidecar key: {e}");
                None
            }
        }
    }

    /// Find the values for a file, by exact name first and then by stem
    pub fn find(&self, file_name: &str) -> Option<&EntryMetadata> {
        self.entries
            .iter()
            .find(|entry| entry.name == file_name)
            .or_else(|| {
                let wanted = stem(file_name);
                self.entries.iter().find(|entry| stem(&entry.name) == wanted)
            })
    }
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;
    use tracing_test::traced_test;

    use super::*;

    const SIDECAR: &str = r#"{
        "Key": "0100000000000000FFFFFFFF00000000000000000000000000000000000000000000000000000000",
        "Entries": [
            {
                "Name": "title.txt",
                "SubType": 3,
                "Magic": 1,
                "LzssFrameSize": 4096,
                "LzssInitPos": 4078,
                "UnpackedSize": 100,
                "Offset": 8,
                "PackedSize": 60,
                "IsPacked": true,
                "Comment": "unknown fields are ignored"
            },
            { "Name": "theme.ogg", "SubType": 0, "Magic": 541065216 }
        ]
    }"#;

    #[test]
    fn parse_sidecar() -> Result<()> {
        let metadata: ArchiveMetadata = serde_json::from_str(SIDECAR)?;

        assert_eq!(metadata.entries.len(), 2);
        assert_eq!(metadata.entries[0].lzss_init_pos, 0xFEE);
        assert_eq!(metadata.entries[1].magic, 0x2040_0000);
        assert_eq!(metadata.entries[1].lzss_frame_size, 0);

        let schedule = metadata.schedule().expect("key should parse");
        assert_eq!(schedule.stage(0), (1, 0xFFFF_FFFF));

        Ok(())
    }

    #[test]
    fn field_names() -> Result<()> {
        let json = serde_json::to_value(EntryMetadata::default())?;
        let mut keys: Vec<_> = json
            .as_object()
            .expect("entry should serialize to an object")
            .keys()
            .cloned()
            .collect();
        keys.sort();

        assert_eq!(
            keys,
            vec![
                "IsPacked",
                "LzssFrameSize",
                "LzssInitPos",
                "Magic",
                "Name",
                "Offset",
                "PackedSize",
                "SubType",
                "UnpackedSize"
            ]
        );

        Ok(())
    }

    #[test]
    fn find_by_name_or_stem() -> Result<()> {
        let metadata: ArchiveMetadata = serde_json::from_str(SIDECAR)?;

        assert_eq!(
            metadata.find("title.txt").map(|e| e.subtype),
            Some(3)
        );
        assert_eq!(
            metadata.find("theme.wav").map(|e| e.name.as_str()),
            Some("theme.ogg")
        );
        assert!(metadata.find("missing.txt").is_none());

        Ok(())
    }

    #[test]
    #[traced_test]
    fn load_missing_and_malformed() -> Result<()> {
        let dir = tempfile::tempdir()?;
        assert!(ArchiveMetadata::load(dir.path()).is_none());

        fs::write(ArchiveMetadata::path(dir.path()), "{ not json")?;
        assert!(ArchiveMetadata::load(dir.path()).is_none());
        assert!(logs_contain("ignoring malformed"));

        Ok(())
    }

    #[test]
    fn save_and_load() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let entry = Entry::builder()
            .name("a.txt")
            .offset(8)
            .packed_size(3)
            .unpacked_size(5)
            .build();
        let metadata = ArchiveMetadata::new(&Schedule::zeroed(), [&entry]);

        metadata.save(dir.path())?;
        assert_eq!(ArchiveMetadata::load(dir.path()), Some(metadata));

        Ok(())
    }
}
