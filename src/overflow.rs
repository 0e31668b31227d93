use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{Error, Result};

/// User-space buffer coalescing small appends into larger writes.
pub const APPEND_BUF_SIZE: usize = 32 * 1024;

/// The append-only durable home of demoted record bodies, one JSON body per
/// line. Bodies are never rewritten in place: a record that is repeatedly
/// demoted appends a fresh copy each time, and readers follow byte offsets,
/// so stale copies are simply never visited.
pub struct OverflowFile {
    path: PathBuf,
}

impl OverflowFile {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends one encoded body per line and returns the starting byte
    /// offset of each. The file is opened per burst with create-if-absent
    /// semantics. Encoded bodies larger than the buffer are written directly
    /// after a flush.
    pub fn append<T: Serialize>(&self, bodies: &[T]) -> Result<Vec<u64>> {
        let mut file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        let mut offset = file.seek(SeekFrom::End(0))?;
        let mut buf: Vec<u8> = Vec::with_capacity(APPEND_BUF_SIZE);
        let mut offsets = Vec::with_capacity(bodies.len());

        for body in bodies {
            let mut line = serde_json::to_vec(body)?;
            line.push(b'\n');
            offsets.push(offset);
            offset += line.len() as u64;

            if line.len() > APPEND_BUF_SIZE {
                if !buf.is_empty() {
                    file.write_all(&buf)?;
                    buf.clear();
                }
                file.write_all(&line)?;
                continue;
            }
            if buf.len() + line.len() > APPEND_BUF_SIZE {
                file.write_all(&buf)?;
                buf.clear();
            }
            buf.extend_from_slice(&line);
        }
        if !buf.is_empty() {
            file.write_all(&buf)?;
        }
        Ok(offsets)
    }

    /// Opens the file for offset-addressed reads.
    pub fn reader(&self) -> Result<OverflowReader> {
        Ok(OverflowReader {
            reader: BufReader::new(File::open(&self.path)?),
            line: Vec::new(),
        })
    }
}

/// Reads bodies back by byte offset.
///
/// Callers resolving many offsets sort them first so the file is covered in
/// one forward pass; forward seeks stay inside the read buffer when they
/// can.
pub struct OverflowReader {
    reader: BufReader<File>,
    line: Vec<u8>,
}

impl OverflowReader {
    pub fn fetch<T: DeserializeOwned>(&mut self, offset: u64) -> Result<T> {
        let pos = self.reader.stream_position()?;
        if offset >= pos {
            self.reader.seek_relative((offset - pos) as i64)?;
        } else {
            self.reader.seek(SeekFrom::Start(offset))?;
        }

        self.line.clear();
        let n = self.reader.read_until(b'\n', &mut self.line)?;
        if n == 0 {
            return Err(Error::InvalidData(format!(
                "missing overflow record at offset {offset}"
            )));
        }
        Ok(serde_json::from_slice(&self.line)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Item {
        id: u64,
        payload: String,
    }

    fn item(id: u64, payload: &str) -> Item {
        Item {
            id,
            payload: payload.to_string(),
        }
    }

    fn overflow_in(dir: &tempfile::TempDir) -> OverflowFile {
        OverflowFile::new(dir.path().join("data.ndjson"))
    }

    #[test]
    fn append_returns_line_offsets() {
        let dir = tempfile::tempdir().expect("tempdir");
        let overflow = overflow_in(&dir);

        let bodies = vec![item(1, "a"), item(2, "bb"), item(3, "ccc")];
        let offsets = overflow.append(&bodies).expect("append");
        assert_eq!(offsets.len(), 3);
        assert_eq!(offsets[0], 0);

        // Each offset points at the start of its own line.
        let mut reader = overflow.reader().expect("reader");
        for (offset, body) in offsets.iter().zip(&bodies) {
            let fetched: Item = reader.fetch(*offset).expect("fetch");
            assert_eq!(&fetched, body);
        }
    }

    #[test]
    fn offsets_continue_across_bursts() {
        let dir = tempfile::tempdir().expect("tempdir");
        let overflow = overflow_in(&dir);

        let first = overflow.append(&[item(1, "a")]).expect("first burst");
        let second = overflow.append(&[item(2, "b")]).expect("second burst");

        let len = std::fs::metadata(overflow.path()).expect("stat").len();
        assert!(second[0] > first[0]);
        assert!(second[0] < len);

        let mut reader = overflow.reader().expect("reader");
        let fetched: Item = reader.fetch(second[0]).expect("fetch");
        assert_eq!(fetched, item(2, "b"));
    }

    #[test]
    fn oversized_body_bypasses_the_buffer() {
        let dir = tempfile::tempdir().expect("tempdir");
        let overflow = overflow_in(&dir);

        let big = item(1, &"x".repeat(APPEND_BUF_SIZE * 2));
        let small = item(2, "small");
        let offsets = overflow.append(&[small.clone(), big.clone(), item(3, "tail")]).expect("append");

        let mut reader = overflow.reader().expect("reader");
        let fetched: Item = reader.fetch(offsets[1]).expect("fetch big");
        assert_eq!(fetched, big);
        let fetched: Item = reader.fetch(offsets[2]).expect("fetch tail");
        assert_eq!(fetched.id, 3);
        // Backward fetch reopens the right position.
        let fetched: Item = reader.fetch(offsets[0]).expect("fetch small");
        assert_eq!(fetched, small);
    }

    #[test]
    fn fetch_past_end_is_invalid_data() {
        let dir = tempfile::tempdir().expect("tempdir");
        let overflow = overflow_in(&dir);
        overflow.append(&[item(1, "a")]).expect("append");

        let mut reader = overflow.reader().expect("reader");
        assert!(matches!(
            reader.fetch::<Item>(10_000),
            Err(Error::InvalidData(_))
        ));
    }
}
