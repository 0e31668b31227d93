use std::any::type_name;
use std::path::{Path, PathBuf};

const SNAPSHOT_FILE: &str = "snapshot.ndjson";
const SNAPSHOT_TMP_FILE: &str = "snapshot.tmp";
const WAL_FILE: &str = "wal.log";
const OVERFLOW_FILE: &str = "data.ndjson";
const LOCK_FILE: &str = "store.lock";

/// File layout for one model: a subdirectory of the configured base
/// directory, named after the sanitized record type.
#[derive(Debug, Clone)]
pub struct ModelPaths {
    root: PathBuf,
}

impl ModelPaths {
    pub fn new<T>(dir: &Path) -> Self {
        Self {
            root: dir.join(model_name::<T>()),
        }
    }

    /// The model subdirectory holding all of the store's files.
    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn snapshot(&self) -> PathBuf {
        self.root.join(SNAPSHOT_FILE)
    }

    pub fn snapshot_tmp(&self) -> PathBuf {
        self.root.join(SNAPSHOT_TMP_FILE)
    }

    pub fn wal(&self) -> PathBuf {
        self.root.join(WAL_FILE)
    }

    pub fn overflow(&self) -> PathBuf {
        self.root.join(OVERFLOW_FILE)
    }

    pub fn lock(&self) -> PathBuf {
        self.root.join(LOCK_FILE)
    }
}

/// Directory name for a record type, derived from its Rust type name.
pub fn model_name<T>() -> String {
    sanitize(type_name::<T>())
}

/// Lowercases a type name and strips the characters that have no place in a
/// file name. Path separators (`::`, `.`, `/`) collapse into single
/// underscores so distinct types stay distinct.
fn sanitize(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for c in name.chars().flat_map(char::to_lowercase) {
        match c {
            ':' | '.' | '/' => {
                if !out.ends_with('_') {
                    out.push('_');
                }
            }
            '*' | '[' | ']' | '<' | '>' | '&' | ' ' => {}
            c => out.push(c),
        }
    }
    out
}
