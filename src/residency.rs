use std::hash::Hash;

use serde::Serialize;

use crate::config::ResidencyFn;
use crate::error::Result;
use crate::overflow::OverflowFile;
use crate::table::RecordTable;

/// Runs one demotion pass over the table.
///
/// Skipped entirely when no keep predicate is configured or no cap is set.
/// With a finite cap the pass only runs while `online_count` exceeds it and
/// stops as soon as the prospective count is back within the cap; with a cap
/// of -1 it considers every candidate. Candidates are visited in map order,
/// which is arbitrary: overflow-internal order is not observable because
/// scans follow per-record offsets and order results by table position.
///
/// Bodies are appended to the overflow file first and records are only
/// marked demoted once the whole append has succeeded, so a failed append
/// leaves memory consistent with what reached disk.
pub fn run_pass<ID, T>(
    table: &mut RecordTable<ID, T>,
    keep: Option<&ResidencyFn<T>>,
    max_in_memory: Option<i64>,
    overflow: &OverflowFile,
) -> Result<()>
where
    ID: Eq + Hash + Clone,
    T: Serialize + Clone,
{
    let Some(keep) = keep else { return Ok(()) };
    let cap = match max_in_memory {
        None => return Ok(()),
        Some(n) if n >= 0 => {
            if table.online_count() <= n as usize {
                return Ok(());
            }
            Some(n as usize)
        }
        Some(_) => None,
    };

    let mut slots = Vec::new();
    let mut bodies = Vec::new();
    let mut online = table.online_count();

    for id in table.mapped_ids() {
        let Some(slot) = table.slot_of(&id) else { continue };
        let rec = table.record(slot);
        if rec.is_deleted() {
            continue;
        }
        let Some(body) = rec.body() else { continue };
        if keep(body) {
            continue;
        }

        slots.push(slot);
        bodies.push(body.clone());
        online -= 1;
        if let Some(cap) = cap {
            if online <= cap {
                break;
            }
        }
    }

    if bodies.is_empty() {
        return Ok(());
    }

    let offsets = overflow.append(&bodies)?;
    for (slot, offset) in slots.into_iter().zip(offsets) {
        table.demote(slot, offset);
    }
    tracing::debug!(
        demoted = bodies.len(),
        online = table.online_count(),
        "demoted cold record bodies"
    );
    Ok(())
}
