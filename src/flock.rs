use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use fs2::FileExt;

/// Advisory exclusive lock on a model directory.
///
/// A second store opening the same directory fails instead of silently
/// corrupting shared files. The lock is released when the value is dropped;
/// the lock file itself is left in place to avoid unlink races.
pub struct DirLock {
    file: File,
    path: PathBuf,
}

impl DirLock {
    /// Acquires the lock, creating the lock file if needed. The owning
    /// process id is written into the file for debugging.
    pub fn acquire<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut file = OpenOptions::new().create(true).write(true).open(&path)?;
        file.try_lock_exclusive()?;

        file.set_len(0)?;
        writeln!(file, "{}", std::process::id())?;
        file.flush()?;

        Ok(Self { file, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for DirLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}
