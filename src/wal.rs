use std::fs::{File, OpenOptions};
use std::io::{self, BufRead, BufReader, BufWriter, Seek, SeekFrom, Write};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// A single logged mutation.
///
/// Demotions are not logged: they are recoverable from the snapshot and the
/// overflow file alone. Entries serialize as one self-describing JSON object
/// per line, keyed by the `op` tag; the `value` field is absent for deletes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum WalEntry<ID, T> {
    Put { id: ID, value: T },
    Delete { id: ID },
}

/// The write-ahead log. Owned exclusively by the store for its whole life;
/// appends are durable before they are acknowledged.
pub struct Wal {
    writer: BufWriter<File>,
    path: PathBuf,
}

impl Wal {
    /// Opens the log for appending, creating it if absent.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            writer: BufWriter::new(file),
            path,
        })
    }

    /// Appends a group of entries as one durable unit: every entry is
    /// written, then the file is flushed and synced to stable storage.
    pub fn append<ID, T>(&mut self, entries: &[WalEntry<ID, T>]) -> Result<()>
    where
        ID: Serialize,
        T: Serialize,
    {
        for entry in entries {
            let line = serde_json::to_vec(entry)?;
            self.writer.write_all(&line)?;
            self.writer.write_all(b"\n")?;
        }
        self.writer.flush()?;
        self.writer.get_ref().sync_all()?;
        Ok(())
    }

    /// Truncates the log to zero length after a successful snapshot.
    pub fn truncate(&mut self) -> Result<()> {
        self.writer.flush()?;
        let file = self.writer.get_mut();
        file.set_len(0)?;
        file.seek(SeekFrom::Start(0))?;
        file.sync_all()?;
        Ok(())
    }

    /// Flushes and syncs any buffered entries.
    pub fn sync(&mut self) -> Result<()> {
        self.writer.flush()?;
        self.writer.get_ref().sync_all()?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Iterates the entries logged at `path` from the start of the file. A
/// missing file yields nothing; a line that fails to decode yields an error.
pub fn replay<ID, T>(path: &Path) -> Result<ReplayIterator<ID, T>> {
    let reader = match File::open(path) {
        Ok(file) => Some(BufReader::new(file)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => None,
        Err(e) => return Err(e.into()),
    };
    Ok(ReplayIterator {
        reader,
        line: String::new(),
        _marker: PhantomData,
    })
}

pub struct ReplayIterator<ID, T> {
    reader: Option<BufReader<File>>,
    line: String,
    _marker: PhantomData<(ID, T)>,
}

impl<ID, T> Iterator for ReplayIterator<ID, T>
where
    ID: DeserializeOwned,
    T: DeserializeOwned,
{
    type Item = Result<WalEntry<ID, T>>;

    fn next(&mut self) -> Option<Self::Item> {
        let reader = self.reader.as_mut()?;
        loop {
            self.line.clear();
            match reader.read_line(&mut self.line) {
                Ok(0) => return None,
                Ok(_) => {
                    let line = self.line.trim();
                    if line.is_empty() {
                        continue;
                    }
                    return Some(serde_json::from_str(line).map_err(Error::from));
                }
                Err(e) => return Some(Err(e.into())),
            }
        }
    }
}
