use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

#[cfg(unix)]
use std::os::unix::io::AsRawFd;

/// Exclusive advisory lock over the database directory. Held for the
/// lifetime of an open engine so two processes cannot mutate the same
/// directory; released when the handle is dropped.
pub struct FileLock {
    _file: File,
    path: PathBuf,
}

impl FileLock {
    /// Creates the lock file if needed and acquires the exclusive lock.
    /// The file contains the owning process ID for debugging.
    pub fn acquire<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();

        let mut file = open_exclusive(&path)?;

        // Record the owner pid only once the lock is held
        file.set_len(0)?;
        writeln!(file, "{}", std::process::id())?;
        file.flush()?;

        Ok(Self { _file: file, path })
    }

    /// Path of the lock file
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(unix)]
fn open_exclusive(path: &Path) -> io::Result<File> {
    let file = OpenOptions::new().create(true).write(true).open(path)?;

    let rc = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
    if rc != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(file)
}

#[cfg(windows)]
fn open_exclusive(path: &Path) -> io::Result<File> {
    use std::os::windows::fs::OpenOptionsExt;

    // share_mode(0) denies all sharing, so a second open fails immediately
    OpenOptions::new()
        .create(true)
        .write(true)
        .share_mode(0)
        .open(path)
}

#[cfg(not(any(unix, windows)))]
fn open_exclusive(path: &Path) -> io::Result<File> {
    OpenOptions::new().create(true).write(true).open(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tmpfs::TempDir;
    use std::fs;

    #[test]
    fn test_lock_records_pid() {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let lock_path = dir.path().join("db.lock");

        let lock = FileLock::acquire(&lock_path).expect("Failed to acquire lock");
        assert_eq!(lock.path(), lock_path.as_path());

        let content = fs::read_to_string(&lock_path).expect("Failed to read lock file");
        assert!(content.contains(&std::process::id().to_string()));
    }

    #[cfg(unix)]
    #[test]
    fn test_double_lock_fails() {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let lock_path = dir.path().join("db.lock");

        let _first = FileLock::acquire(&lock_path).expect("Failed to acquire first lock");
        assert!(FileLock::acquire(&lock_path).is_err());
    }

    #[test]
    fn test_lock_released_on_drop() {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let lock_path = dir.path().join("db.lock");

        {
            let _lock = FileLock::acquire(&lock_path).expect("Failed to acquire lock");
        }

        let _again =
            FileLock::acquire(&lock_path).expect("Should be able to acquire lock after drop");
    }
}
