//! Advisory lock files for cross-process coordination
//!
//! Two processes racing to establish a channel for the same endpoint
//! serialise on an exclusive `flock` of a per-endpoint lock file. The
//! holder writes its PID into the file so a stuck lock can be diagnosed.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use fs2::FileExt;

/// Exclusive advisory lock held until dropped
#[derive(Debug)]
pub struct LockGuard {
    file: File,
    path: PathBuf,
}

impl LockGuard {
    /// Try to take the lock without blocking
    ///
    /// Returns `Ok(None)` if another holder has it. Creates parent
    /// directories and the lock file as needed.
    pub fn try_acquire(path: &Path) -> io::Result<Option<Self>> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;

        match file.try_lock_exclusive() {
            Ok(()) => {
                let mut guard = Self {
                    file,
                    path: path.to_path_buf(),
                };
                if let Err(e) = guard.record_holder(std::process::id()) {
                    tracing::debug!("Failed to record lock holder in {:?}: {}", path, e);
                }
                Ok(Some(guard))
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(None),
            Err(e) if e.raw_os_error() == fs2::lock_contended_error().raw_os_error() => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Path of the lock file
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn record_holder(&mut self, pid: u32) -> io::Result<()> {
        self.file.set_len(0)?;
        self.file.seek(SeekFrom::Start(0))?;
        writeln!(self.file, "{}", pid)?;
        self.file.flush()
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(&self.file) {
            tracing::warn!("Failed to release lock {:?}: {}", self.path, e);
        }
    }
}

/// Read the PID recorded by the last lock holder
///
/// Returns `Ok(None)` if the file doesn't exist or holds no PID.
pub fn read_lock_holder(path: &Path) -> io::Result<Option<u32>> {
    match File::open(path) {
        Ok(mut file) => {
            let mut contents = String::new();
            file.read_to_string(&mut contents)?;
            Ok(contents.trim().parse::<u32>().ok())
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e),
    }
}

/// Replace `path` with `contents` so readers see either the old or the new file
///
/// Writes a sibling temp file and renames it over the target.
pub fn write_atomic(path: &Path, contents: &[u8]) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let mut tmp = path.as_os_str().to_owned();
    tmp.push(format!(".tmp.{}", std::process::id()));
    let tmp = PathBuf::from(tmp);

    {
        let mut file = File::create(&tmp)?;
        file.write_all(contents)?;
        file.sync_data()?;
    }

    fs::rename(&tmp, path).map_err(|e| {
        let _ = fs::remove_file(&tmp);
        e
    })
}

/// Remove a file, treating a missing file as success
pub fn remove_if_exists(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_lock_is_exclusive() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("ep.lock");

        let first = LockGuard::try_acquire(&path).unwrap();
        assert!(first.is_some());
        assert!(LockGuard::try_acquire(&path).unwrap().is_none());

        drop(first);
        assert!(LockGuard::try_acquire(&path).unwrap().is_some());
    }

    #[test]
    fn test_lock_records_holder_pid() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("ep.lock");

        let _guard = LockGuard::try_acquire(&path).unwrap().unwrap();
        assert_eq!(read_lock_holder(&path).unwrap(), Some(std::process::id()));
    }

    #[test]
    fn test_read_holder_missing_file() {
        let dir = TempDir::new().unwrap();
        assert!(read_lock_holder(&dir.path().join("none.lock")).unwrap().is_none());
    }

    #[test]
    fn test_write_atomic_replaces_contents() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("marker.json");

        write_atomic(&path, b"first").unwrap();
        write_atomic(&path, b"second").unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"second");

        let leftovers: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().contains(".tmp."))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn test_remove_if_exists() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("gone");
        remove_if_exists(&path).unwrap();

        fs::write(&path, "x").unwrap();
        remove_if_exists(&path).unwrap();
        assert!(!path.exists());
    }
}
