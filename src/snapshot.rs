use std::fs::{self, File};
use std::hash::Hash;
use std::io::{self, BufRead, BufReader, BufWriter, Write};

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::config::IdFn;
use crate::error::Result;
use crate::overflow::{OverflowFile, OverflowReader};
use crate::paths::ModelPaths;
use crate::table::RecordTable;

/// Writes the complete live state to `snapshot.tmp`, syncs it, and
/// atomically renames it over the current snapshot.
///
/// Compacts the table first when deletions have accumulated. Demoted bodies
/// are read back from the overflow file so the snapshot alone can restore
/// the store.
pub fn write<ID, T>(
    paths: &ModelPaths,
    table: &mut RecordTable<ID, T>,
    overflow: &OverflowFile,
) -> Result<()>
where
    ID: Eq + Hash + Clone,
    T: Serialize + DeserializeOwned,
{
    if table.is_dirty() {
        table.compact();
    }

    let tmp = paths.snapshot_tmp();
    let mut writer = BufWriter::new(File::create(&tmp)?);
    let mut reader: Option<OverflowReader> = None;
    let mut written = 0usize;

    for rec in table.iter() {
        if rec.is_deleted() {
            continue;
        }
        let mut line = if let Some(body) = rec.body() {
            serde_json::to_vec(body)?
        } else if let Some(offset) = rec.overflow_at() {
            if reader.is_none() {
                reader = Some(overflow.reader()?);
            }
            let body: T = reader.as_mut().unwrap().fetch(offset)?;
            serde_json::to_vec(&body)?
        } else {
            continue;
        };
        line.push(b'\n');
        writer.write_all(&line)?;
        written += 1;
    }

    writer.flush()?;
    writer.get_ref().sync_all()?;
    fs::rename(&tmp, paths.snapshot())?;
    tracing::debug!(records = written, "wrote snapshot");
    Ok(())
}

/// Loads the last snapshot into a fresh table. An absent file loads
/// nothing; a line that fails to decode aborts the load.
///
/// The index is rebuilt by running the id function over each loaded body.
/// Records whose id function fails stay in the sequence unmapped and are
/// silently skipped; the next compaction drops them.
pub fn load<ID, T>(paths: &ModelPaths, id_fn: &IdFn<ID, T>) -> Result<RecordTable<ID, T>>
where
    ID: Eq + Hash + Clone,
    T: DeserializeOwned,
{
    let mut table = RecordTable::new();
    let file = match File::open(paths.snapshot()) {
        Ok(file) => file,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(table),
        Err(e) => return Err(e.into()),
    };

    let mut reader = BufReader::new(file);
    let mut line = String::new();
    let mut skipped = 0usize;
    loop {
        line.clear();
        if reader.read_line(&mut line)? == 0 {
            break;
        }
        if line.trim().is_empty() {
            continue;
        }
        let body: T = serde_json::from_str(line.trim_end())?;
        match id_fn(&body) {
            Ok(id) => {
                let slot = table.push_loaded(body);
                table.map_id(id, slot);
            }
            Err(_) => {
                table.push_loaded(body);
                skipped += 1;
            }
        }
    }
    if skipped > 0 {
        tracing::debug!(skipped, "snapshot records with failing id function were not indexed");
    }
    Ok(table)
}
