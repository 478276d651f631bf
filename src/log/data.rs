//! Data files: append-only log segments.
//!
//! A data file is in one of two states. The single active file receives
//! appends through [`ActiveFile`]; every other file is sealed and immutable
//! until it is deleted whole by a merge. Both states serve positional reads
//! through the shared [`DataFile`] handle, so the engine's file view can
//! resolve a locator without caring which state the file is in.

use byteorder::{BigEndian, ByteOrder};

use crate::error::Result;
use crate::log::record::{self, Record, HEADER_SIZE};
use crate::log::{data_path, hint, hint_path, read_fully, HintEntry};
use crate::Error;

use std::fs::{File, OpenOptions};
use std::io::{self, BufReader, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Read-side handle to a data file, shared between the engine's file view,
/// concurrent readers, and the merge job. Holding the `Arc` keeps the
/// descriptor open, so an in-flight read completes even after the file has
/// been logically retired.
#[derive(Debug)]
pub struct DataFile {
    id: u32,
    path: PathBuf,
    file: File,
    size: AtomicU64,
}

impl DataFile {
    /// Opens an existing sealed file for positional reads. The file id is
    /// derived from the file name.
    pub fn open_sealed(path: &Path) -> Result<Self> {
        let id = file_id_of(path).ok_or_else(|| {
            Error::Inconsistent(format!("invalid data file name: {}", path.display()))
        })?;
        let file = File::open(path)?;
        let size = file.metadata()?.len();

        Ok(Self {
            id,
            path: path.to_path_buf(),
            file,
            size: AtomicU64::new(size),
        })
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current physical size. For the active file this advances with every
    /// append; for sealed files it is fixed.
    pub fn size(&self) -> u64 {
        self.size.load(Ordering::Acquire)
    }

    pub(crate) fn bump_size(&self, bytes: u64) {
        self.size.fetch_add(bytes, Ordering::Release);
    }

    /// Positional read of exactly `len` bytes at `offset`.
    pub fn read_at(&self, offset: u64, len: usize) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; len];
        read_exact_at(&self.file, &mut buf, offset).map_err(|e| match e.kind() {
            io::ErrorKind::UnexpectedEof => Error::Corrupt(format!(
                "short read of {len} bytes at offset {offset} in {}",
                self.path.display()
            )),
            _ => Error::IO(e.to_string()),
        })?;
        Ok(buf)
    }

    /// Sequential scan over whole records, yielding `(offset, record)`.
    ///
    /// The scan ends at clean EOF or at a torn tail (an incomplete trailing
    /// record); a CRC or structural failure on a complete record is yielded
    /// as `Corrupt` and ends the scan.
    pub fn records(&self) -> Result<RecordIterator> {
        let file = File::open(&self.path)?;
        let size = file.metadata()?.len();
        Ok(RecordIterator {
            reader: BufReader::new(file),
            file_size: size,
            offset: 0,
            done: false,
        })
    }

    /// Unlinks the data file and its hint sibling if present.
    pub fn delete(&self) -> Result<()> {
        std::fs::remove_file(&self.path)?;
        let hint = self.path.with_extension("hint");
        if hint.exists() {
            std::fs::remove_file(&hint)?;
        }
        Ok(())
    }
}

/// The one data file currently receiving appends. Owns the write handle
/// and the pending hint entries that become the `.hint` sidecar at seal.
pub struct ActiveFile {
    shared: Arc<DataFile>,
    appender: File,
    write_offset: u64,
    pending: Vec<HintEntry>,
    poisoned: bool,
}

impl ActiveFile {
    /// Creates `<id>.data` and opens it for appending.
    pub fn create(dir: &Path, file_id: u32) -> Result<Self> {
        let path = data_path(dir, file_id);
        let appender = OpenOptions::new()
            .create_new(true)
            .write(true)
            .open(&path)?;
        let reader = File::open(&path)?;

        Ok(Self {
            shared: Arc::new(DataFile {
                id: file_id,
                path,
                file: reader,
                size: AtomicU64::new(0),
            }),
            appender,
            write_offset: 0,
            pending: Vec::new(),
            poisoned: false,
        })
    }

    pub fn id(&self) -> u32 {
        self.shared.id
    }

    pub fn write_offset(&self) -> u64 {
        self.write_offset
    }

    /// Read-side handle for the engine's file view.
    pub fn shared(&self) -> &Arc<DataFile> {
        &self.shared
    }

    /// Appends encoded record bytes, returning the pre-append offset.
    ///
    /// On a failed write the file is truncated back to the last known-good
    /// offset; if that also fails the file is poisoned and every further
    /// append is refused.
    pub fn append(&mut self, bytes: &[u8], key: &[u8], tombstone: bool) -> Result<u64> {
        if self.poisoned {
            return Err(Error::IO(format!(
                "active file {} is poisoned after a failed write",
                self.shared.path.display()
            )));
        }

        let offset = self.write_offset;
        if let Err(e) = self.appender.write_all(bytes) {
            // rewind past the partial write; the file is unusable if we can't
            let rewound = self
                .appender
                .set_len(offset)
                .and_then(|_| self.appender.seek(SeekFrom::Start(offset)));
            if rewound.is_err() {
                self.poisoned = true;
            }
            return Err(Error::IO(e.to_string()));
        }

        self.write_offset += bytes.len() as u64;
        self.shared.bump_size(bytes.len() as u64);
        self.pending.push(HintEntry {
            key: key.to_vec(),
            record_offset: offset,
            record_size: bytes.len() as u32,
            tombstone,
        });

        Ok(offset)
    }

    /// Forgets the hint entry of the most recent append. Used by the merge
    /// job when a locator swap loses to a concurrent write: the copied
    /// bytes stay in the file but must not resurface through hint replay.
    pub fn drop_last_pending(&mut self) {
        self.pending.pop();
    }

    /// Seals the file: truncates any bytes past the last good offset,
    /// fsyncs, and emits the paired hint file. Returns the read-side handle.
    pub fn seal(mut self) -> Result<Arc<DataFile>> {
        self.appender.set_len(self.write_offset)?;
        self.appender.flush()?;
        self.appender.sync_all()?;

        let hint = hint_path(
            self.shared.path.parent().unwrap_or_else(|| Path::new("")),
            self.shared.id,
        );
        hint::write(&hint, &self.pending)?;

        self.shared.size.store(self.write_offset, Ordering::Release);
        Ok(self.shared)
    }
}

/// Numeric file id encoded in a data file's name.
pub(crate) fn file_id_of(path: &Path) -> Option<u32> {
    path.file_stem()?.to_str()?.parse().ok()
}

/// Sequential reader over a data file's records.
pub struct RecordIterator {
    reader: BufReader<File>,
    file_size: u64,
    offset: u64,
    done: bool,
}

impl Iterator for RecordIterator {
    type Item = Result<(u64, Record)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        let mut header = [0u8; HEADER_SIZE];
        let filled = match read_fully(&mut self.reader, &mut header) {
            Ok(n) => n,
            Err(e) => {
                self.done = true;
                return Some(Err(e.into()));
            }
        };
        if filled < HEADER_SIZE {
            // clean EOF, or a torn header from an interrupted append
            self.done = true;
            return None;
        }

        let key_size = header[4] as usize;
        let value_size = BigEndian::read_u32(&header[5..9]) as usize;
        let total = HEADER_SIZE + key_size + value_size;
        if self.offset + total as u64 > self.file_size {
            // claimed body extends past EOF: torn tail
            self.done = true;
            return None;
        }

        let mut buf = vec![0u8; total];
        buf[..HEADER_SIZE].copy_from_slice(&header);
        let filled = match read_fully(&mut self.reader, &mut buf[HEADER_SIZE..]) {
            Ok(n) => n,
            Err(e) => {
                self.done = true;
                return Some(Err(e.into()));
            }
        };
        if filled < total - HEADER_SIZE {
            self.done = true;
            return None;
        }

        match record::decode(&buf) {
            Ok(rec) => {
                let offset = self.offset;
                self.offset += total as u64;
                Some(Ok((offset, rec)))
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

#[cfg(unix)]
fn read_exact_at(file: &File, buf: &mut [u8], offset: u64) -> io::Result<()> {
    use std::os::unix::fs::FileExt;
    file.read_exact_at(buf, offset)
}

#[cfg(windows)]
fn read_exact_at(file: &File, mut buf: &mut [u8], mut offset: u64) -> io::Result<()> {
    use std::os::windows::fs::FileExt;
    while !buf.is_empty() {
        match file.seek_read(buf, offset) {
            Ok(0) => {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "failed to fill whole buffer",
                ))
            }
            Ok(n) => {
                let tmp = buf;
                buf = &mut tmp[n..];
                offset += n as u64;
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(())
}
