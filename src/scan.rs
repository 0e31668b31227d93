//! Scan fusion across memory and the overflow file.
//!
//! A scan must return results in table insertion order, but demoted bodies
//! live on disk at arbitrary byte offsets: the order records were demoted in
//! has nothing to do with the order they were inserted in.
//!
//! The walk therefore runs in two steps. First the table is covered in
//! insertion order, filtering resident bodies directly and leaving a pending
//! slot per demoted record. Then the pending offsets are sorted and resolved
//! against a single buffered reader, so the overflow file is covered in one
//! forward pass no matter how records interleave:
//!
//! ```text
//! table:    [r1, d@80, r3, d@10, r5]
//! pending:  (slot 1, 80), (slot 3, 10)
//! reads:    10 -> slot 3, 80 -> slot 1     (file order)
//! result:   [r1, b@80, r3, b@10, r5]      (insertion order)
//! ```
//!
//! Decoding happens in chunks so a scan over a large overflow file never
//! materializes more than a chunk of unfiltered bodies at a time.

use std::hash::Hash;

use serde::de::DeserializeOwned;

use crate::error::Result;
use crate::overflow::OverflowFile;
use crate::table::RecordTable;

/// How many overflow bodies are decoded per chunk while resolving a scan.
const SCAN_CHUNK: usize = 1000;

enum Entry<T> {
    Hit(T),
    Pending,
    Skip,
}

/// Walks the table in insertion order and returns every live body matching
/// the predicate, as copies.
///
/// Demoted bodies are resolved from the overflow file by offset: the needed
/// offsets are sorted so the file is covered in one forward pass, decoded in
/// chunks, and the matches are slotted back into their table positions. The
/// result keeps strict insertion order no matter where each body lives, and
/// the predicate runs exactly once per live record.
pub fn scan<ID, T, P>(
    table: &RecordTable<ID, T>,
    overflow: &OverflowFile,
    predicate: P,
) -> Result<Vec<T>>
where
    ID: Eq + Hash + Clone,
    T: Clone + DeserializeOwned,
    P: Fn(&T) -> bool,
{
    let mut entries: Vec<Entry<T>> = Vec::new();
    let mut demoted: Vec<(usize, u64)> = Vec::new();

    for rec in table.iter() {
        if rec.is_deleted() {
            continue;
        }
        if let Some(body) = rec.body() {
            if predicate(body) {
                entries.push(Entry::Hit(body.clone()));
            }
        } else if let Some(offset) = rec.overflow_at() {
            demoted.push((entries.len(), offset));
            entries.push(Entry::Pending);
        }
    }

    if !demoted.is_empty() {
        demoted.sort_by_key(|&(_, offset)| offset);
        let mut reader = overflow.reader()?;
        let mut batch: Vec<(usize, T)> = Vec::new();
        for chunk in demoted.chunks(SCAN_CHUNK) {
            batch.clear();
            for &(pos, offset) in chunk {
                batch.push((pos, reader.fetch(offset)?));
            }
            for (pos, body) in batch.drain(..) {
                entries[pos] = if predicate(&body) {
                    Entry::Hit(body)
                } else {
                    Entry::Skip
                };
            }
        }
    }

    Ok(entries
        .into_iter()
        .filter_map(|entry| match entry {
            Entry::Hit(body) => Some(body),
            Entry::Pending | Entry::Skip => None,
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Item {
        id: u64,
        tag: String,
    }

    fn item(id: u64, tag: &str) -> Item {
        Item {
            id,
            tag: tag.to_string(),
        }
    }

    fn overflow_in(dir: &tempfile::TempDir) -> OverflowFile {
        OverflowFile::new(dir.path().join("data.ndjson"))
    }

    fn demote_id(table: &mut RecordTable<u64, Item>, overflow: &OverflowFile, id: u64) {
        let slot = table.slot_of(&id).expect("slot");
        let body = table.record(slot).body().expect("resident body").clone();
        let offsets = overflow.append(&[body]).expect("append");
        table.demote(slot, offsets[0]);
    }

    #[test]
    fn all_resident_scan_in_insertion_order() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut table = RecordTable::new();
        table.add_or_update(3, item(3, "c"));
        table.add_or_update(1, item(1, "a"));

        let out = scan(&table, &overflow_in(&dir), |_| true).expect("scan");
        assert_eq!(out, vec![item(3, "c"), item(1, "a")]);
    }

    #[test]
    fn fusion_preserves_global_insertion_order() {
        let dir = tempfile::tempdir().expect("tempdir");
        let overflow = overflow_in(&dir);
        let mut table = RecordTable::new();
        for id in 1..=6u64 {
            table.add_or_update(id, item(id, "v"));
        }
        // Demote out of insertion order on purpose.
        demote_id(&mut table, &overflow, 4);
        demote_id(&mut table, &overflow, 2);
        demote_id(&mut table, &overflow, 6);

        let out = scan(&table, &overflow, |_| true).expect("scan");
        let ids: Vec<u64> = out.iter().map(|i| i.id).collect();
        assert_eq!(ids, vec![1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn predicate_filters_demoted_bodies() {
        let dir = tempfile::tempdir().expect("tempdir");
        let overflow = overflow_in(&dir);
        let mut table = RecordTable::new();
        table.add_or_update(1, item(1, "keep"));
        table.add_or_update(2, item(2, "drop"));
        table.add_or_update(3, item(3, "keep"));
        demote_id(&mut table, &overflow, 2);
        demote_id(&mut table, &overflow, 3);

        let out = scan(&table, &overflow, |i| i.tag == "keep").expect("scan");
        let ids: Vec<u64> = out.iter().map(|i| i.id).collect();
        assert_eq!(ids, vec![1, 3]);
    }

    #[test]
    fn tombstoned_records_never_appear() {
        let dir = tempfile::tempdir().expect("tempdir");
        let overflow = overflow_in(&dir);
        let mut table = RecordTable::new();
        table.add_or_update(1, item(1, "a"));
        table.add_or_update(2, item(2, "b"));
        demote_id(&mut table, &overflow, 1);
        table.tombstone(&1);

        let out = scan(&table, &overflow, |_| true).expect("scan");
        assert_eq!(out, vec![item(2, "b")]);
    }

    #[test]
    fn stale_overflow_copies_are_ignored() {
        let dir = tempfile::tempdir().expect("tempdir");
        let overflow = overflow_in(&dir);
        let mut table = RecordTable::new();
        table.add_or_update(1, item(1, "old"));
        demote_id(&mut table, &overflow, 1);
        // The update revives the record; the overflow copy becomes garbage.
        table.add_or_update(1, item(1, "new"));

        let out = scan(&table, &overflow, |_| true).expect("scan");
        assert_eq!(out, vec![item(1, "new")]);
    }

    #[test]
    fn repeated_demotion_reads_the_latest_copy() {
        let dir = tempfile::tempdir().expect("tempdir");
        let overflow = overflow_in(&dir);
        let mut table = RecordTable::new();
        table.add_or_update(1, item(1, "v1"));
        demote_id(&mut table, &overflow, 1);
        table.add_or_update(1, item(1, "v2"));
        demote_id(&mut table, &overflow, 1);

        let out = scan(&table, &overflow, |_| true).expect("scan");
        assert_eq!(out, vec![item(1, "v2")]);
    }
}
