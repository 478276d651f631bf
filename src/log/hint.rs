//! Hint sidecar files.
//!
//! A hint file repeats the index-relevant part of every record in its
//! paired data file, in append order:
//!
//! ```text
//! +------------+---------------+-----------------+-------------+-----+
//! | keySize:u8 | recordSize:u32| recordOffset:u64| tombstone:u8| key |
//! +------------+---------------+-----------------+-------------+-----+
//! |   1 byte   |    4 bytes    |     8 bytes     |   1 byte    | var |
//! +------------+---------------+-----------------+-------------+-----+
//! ```
//!
//! Hints are write-once: produced when a data file is sealed, consumed on
//! recovery. They are written to a `.tmp` sibling and renamed into place so
//! a crash mid-write leaves no partial hint behind; recovery falls back to
//! scanning the data file when the hint is missing. A truncated trailing
//! entry is discarded, not treated as corruption.

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

use crate::error::Result;
use crate::log::read_fully;

use std::ffi::OsString;
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

/// Fixed prefix size of a hint entry, before the key bytes.
pub const ENTRY_HEADER_SIZE: usize = 14;

/// One hint entry, mirroring a record in the paired data file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HintEntry {
    pub key: Vec<u8>,
    pub record_offset: u64,
    pub record_size: u32,
    pub tombstone: bool,
}

/// Writes a complete hint file, fsyncs it, and renames it into place.
pub fn write(path: &Path, entries: &[HintEntry]) -> Result<()> {
    let tmp = tmp_path(path);
    let file = File::create(&tmp)?;
    let mut writer = BufWriter::new(file);

    for entry in entries {
        writer.write_u8(entry.key.len() as u8)?;
        writer.write_u32::<BigEndian>(entry.record_size)?;
        writer.write_u64::<BigEndian>(entry.record_offset)?;
        writer.write_u8(entry.tombstone as u8)?;
        writer.write_all(&entry.key)?;
    }

    writer.flush()?;
    writer.get_ref().sync_all()?;
    drop(writer);

    std::fs::rename(&tmp, path)?;
    Ok(())
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(".tmp");
    PathBuf::from(name)
}

/// Sequential reader over a hint file's entries.
pub struct HintIterator {
    reader: BufReader<File>,
}

impl HintIterator {
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        Ok(Self {
            reader: BufReader::new(file),
        })
    }

    /// Reads the next entry, or None at EOF or on a truncated tail.
    fn read_entry(&mut self) -> Result<Option<HintEntry>> {
        let mut header = [0u8; ENTRY_HEADER_SIZE];
        let filled = read_fully(&mut self.reader, &mut header)?;
        if filled < ENTRY_HEADER_SIZE {
            // clean EOF, or a torn tail from an interrupted write
            return Ok(None);
        }

        let mut rdr = &header[..];
        let key_size = rdr.read_u8()? as usize;
        let record_size = rdr.read_u32::<BigEndian>()?;
        let record_offset = rdr.read_u64::<BigEndian>()?;
        let tombstone = rdr.read_u8()? != 0;

        let mut key = vec![0u8; key_size];
        let filled = read_fully(&mut self.reader, &mut key)?;
        if filled < key_size {
            return Ok(None);
        }

        Ok(Some(HintEntry {
            key,
            record_offset,
            record_size,
            tombstone,
        }))
    }
}

impl Iterator for HintIterator {
    type Item = Result<HintEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        self.read_entry().transpose()
    }
}
