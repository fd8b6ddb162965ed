use binrw::BinWrite;
use emon_eme::{
    compression,
    entry::{Entry, Subtype},
    error::{Error, FormatError},
    unpack, EmeArchive,
};
use pretty_assertions::assert_eq;
use std::fs;
use std::io::Cursor;
use tracing_test::traced_test;

/// Build an unencrypted archive around `payload`, holding a single entry
fn single_entry_archive(payload: &[u8], entry: &Entry) -> Result<Vec<u8>, Error> {
    let mut archive = b"RREDATA ".to_vec();
    archive.extend_from_slice(payload);
    archive.extend_from_slice(&[0u8; 40]);

    let mut record = Cursor::new(Vec::new());
    entry.to_record().write(&mut record)?;
    archive.extend_from_slice(record.get_ref());

    archive.extend_from_slice(&1i32.to_le_bytes());
    Ok(archive)
}

#[traced_test]
#[test]
fn split_script() -> Result<(), Error> {
    let head = b"#scene split\nThe first part of the script, the first part.\n";
    let tail = b"And the tail, which is stored first. And the tail.\n#end\n";

    let part1 = compression::compress(head);
    let part2 = compression::compress(tail);

    let mut payload = Vec::new();
    payload.extend_from_slice(&(part2.len() as u32).to_le_bytes());
    payload.extend_from_slice(&(tail.len() as u32).to_le_bytes());
    payload.extend_from_slice(&[0u8; 4]);
    payload.extend_from_slice(&part2);
    payload.extend_from_slice(&part1);

    let entry = Entry::builder()
        .name("split.txt")
        .subtype(Subtype::Script)
        .magic(1)
        .offset(8)
        .packed_size((part1.len() + part2.len()) as u32)
        .unpacked_size((head.len() + tail.len()) as u32)
        .build();

    let mut eme = EmeArchive::new(Cursor::new(single_entry_archive(&payload, &entry)?))?;
    assert_eq!(eme.by_name("split.txt")?, &entry);

    let mut expected = head.to_vec();
    expected.extend_from_slice(tail);
    assert_eq!(eme.read_entry(0)?, expected);

    Ok(())
}

#[traced_test]
#[test]
fn split_script_larger_than_entry() -> Result<(), Error> {
    let mut payload = Vec::new();
    payload.extend_from_slice(&100u32.to_le_bytes());
    payload.extend_from_slice(&5u32.to_le_bytes());
    payload.extend_from_slice(&[0u8; 4]);
    payload.extend_from_slice(b"\xFFabcdefgh");

    let entry = Entry::builder()
        .name("broken.txt")
        .subtype(Subtype::Script)
        .offset(8)
        .packed_size(9)
        .unpacked_size(20)
        .build();

    let mut eme = EmeArchive::new(Cursor::new(single_entry_archive(&payload, &entry)?))?;
    assert!(matches!(
        eme.read_entry(0),
        Err(Error::Format(FormatError::InvalidSize { size: 100, .. }))
    ));

    Ok(())
}

#[traced_test]
#[test]
fn raw_script() -> Result<(), Error> {
    let script = b"@@ raw header and body";

    let entry = Entry::builder()
        .name("raw.txt")
        .subtype(Subtype::Script)
        .frame_size(0)
        .init_pos(0)
        .offset(8)
        .packed_size(script.len() as u32 - 12)
        .unpacked_size(script.len() as u32)
        .build();

    let mut eme = EmeArchive::new(Cursor::new(single_entry_archive(script, &entry)?))?;
    assert_eq!(eme.read_entry(0)?, script);

    Ok(())
}

#[traced_test]
#[test]
fn compressed_audio() -> Result<(), Error> {
    let data = b"OggS voice line, voice line, voice line, voice line.".repeat(8);
    let packed = compression::compress(&data);

    let entry = Entry::builder()
        .name("voice.ogg")
        .magic(0x2040_0000)
        .offset(8)
        .packed_size(packed.len() as u32)
        .unpacked_size(data.len() as u32)
        .build();
    assert!(entry.is_packed());

    let mut eme = EmeArchive::new(Cursor::new(single_entry_archive(&packed, &entry)?))?;
    assert_eq!(eme.by_index(0)?.subtype(), Subtype::Audio);
    assert_eq!(eme.read_entry(0)?, data);

    Ok(())
}

#[traced_test]
#[test]
fn unpack_invalid_index() -> Result<(), Error> {
    let entry = Entry::builder()
        .name("music.ogg")
        .offset(8)
        .packed_size(4)
        .unpacked_size(4)
        .build();
    let mut archive = single_entry_archive(b"OggS", &entry)?;

    // subtype field of the only record
    let subtype_at = archive.len() - 4 - 96 + 72;
    archive[subtype_at] = 2;

    let dir = tempfile::tempdir()?;
    let path = dir.path().join("broken.eme");
    fs::write(&path, &archive)?;

    let target = dir.path().join("broken");
    assert!(matches!(
        unpack(&path, &target),
        Err(Error::Format(FormatError::UnsupportedSubtype { subtype: 2, .. }))
    ));
    assert!(!target.exists());

    Ok(())
}

#[traced_test]
#[test]
fn bitmap_failure_names_entry() -> Result<(), Error> {
    // 16 bits per pixel without a palette
    let mut header = vec![0u8; 32];
    header[0] = 16;
    header[2] = 1;
    header[4] = 1;
    header[8] = 4;

    let entry = Entry::builder()
        .name("odd.bmp")
        .subtype(Subtype::Bitmap)
        .offset(8)
        .packed_size(4)
        .unpacked_size(4)
        .build();
    let mut payload = header;
    payload.extend_from_slice(&[0u8; 4]);

    let dir = tempfile::tempdir()?;
    let path = dir.path().join("odd.eme");
    fs::write(&path, single_entry_archive(&payload, &entry)?)?;

    let result = unpack(&path, &dir.path().join("odd"));
    assert!(matches!(
        result,
        Err(Error::Entry { ref name, .. }) if name == "odd.bmp"
    ));

    Ok(())
}
