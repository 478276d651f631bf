//! Append-only log segments and their sidecar index files.
//!
//! All persistent state lives in a flat directory of numbered segments:
//!
//! ```text
//! +-----------+     +-----------+
//! | 1.data    |     | 1.hint    |
//! +-----------+     +-----------+
//! | 2.data    |     | 2.hint    |
//! +-----------+     +-----------+
//! | 3.data    |  <- active, no hint until sealed
//! +-----------+
//! ```
//!
//! A `.data` file is a contiguous sequence of records (see [`record`] for
//! the on-disk record layout). Exactly one file is active at a time and
//! receives appends; all others are sealed and only serve positional reads
//! until a merge deletes them whole.
//!
//! A `.hint` file is written when its data file is sealed. It repeats the
//! file's (key, offset, size, tombstone) tuples in append order so that
//! recovery can rebuild the in-memory index without touching the values.
//! A data file without a hint sibling (the active file after a crash) is
//! scanned record by record instead.
//!
//! All multi-byte integers in both formats are big-endian.

pub mod data;
pub mod hint;
pub mod record;

pub use data::{ActiveFile, DataFile};
pub use hint::{HintEntry, HintIterator};
pub use record::Record;

use std::io::Read;
use std::path::{Path, PathBuf};

/// Path of a data file inside the database directory.
pub fn data_path(dir: &Path, file_id: u32) -> PathBuf {
    dir.join(format!("{file_id:08}.data"))
}

/// Path of the hint sidecar paired with a data file.
pub fn hint_path(dir: &Path, file_id: u32) -> PathBuf {
    dir.join(format!("{file_id:08}.hint"))
}

/// Reads until `buf` is full or EOF; returns the number of bytes read.
/// Used by the sequential scanners to tell a clean EOF from a torn tail.
pub(crate) fn read_fully<R: Read>(reader: &mut R, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}
