use std::fs;
use std::hash::Hash;
use std::sync::{Arc, Mutex, Weak};
use std::thread;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::config::{IdFn, Options, ResidencyFn, Validator};
use crate::error::{Error, Result};
use crate::flock::DirLock;
use crate::overflow::{OverflowFile, OverflowReader};
use crate::paths::ModelPaths;
use crate::residency;
use crate::scan;
use crate::snapshot;
use crate::table::RecordTable;
use crate::wal::{self, Wal, WalEntry};

/// A durable collection of `T` records keyed by a user-derived identifier.
///
/// One mutex guards the whole store: every operation holds it for its full
/// duration, so operations linearize in lock order and any of them may block
/// on disk I/O. Writes go through the validator chain, then the write-ahead
/// log (synced before the operation is acknowledged), then the in-memory
/// table, then a residency sweep that may evict cold bodies to the overflow
/// file. A background thread snapshots the live state periodically and
/// truncates the log; it exits on its own when the store is dropped.
pub struct Store<ID, T> {
    inner: Arc<Mutex<Inner<ID, T>>>,
}

struct Inner<ID, T> {
    table: RecordTable<ID, T>,
    /// `None` once the store has been closed.
    wal: Option<Wal>,
    overflow: OverflowFile,
    paths: ModelPaths,
    id_fn: IdFn<ID, T>,
    validators: Vec<Validator<T>>,
    residency: Option<ResidencyFn<T>>,
    max_in_memory: Option<i64>,
    _lock: DirLock,
}

impl<ID, T> Store<ID, T>
where
    ID: Eq + Hash + Clone + Serialize + DeserializeOwned + Send + 'static,
    T: Clone + Serialize + DeserializeOwned + Send + 'static,
{
    /// Opens (or creates) the store for `T` under the configured directory,
    /// recovering any state a previous run left behind.
    pub fn open(mut options: Options<ID, T>) -> Result<Self> {
        options.normalize();
        let Options {
            dir,
            snapshot_interval,
            max_in_memory,
            id_fn,
            validators,
            residency,
        } = options;
        let id_fn =
            id_fn.ok_or_else(|| Error::Misconfigured("an id function is required".into()))?;

        let paths = ModelPaths::new::<T>(&dir);
        fs::create_dir_all(paths.root())?;
        let lock = DirLock::acquire(paths.lock())?;

        let mut table = snapshot::load(&paths, &id_fn)?;

        // Replay mutations logged since the last snapshot. Validators never
        // run here: recovered values are restored exactly as written.
        let mut replayed = 0usize;
        for entry in wal::replay::<ID, T>(&paths.wal())? {
            match entry? {
                WalEntry::Put { id, value } => table.add_or_update(id, value),
                WalEntry::Delete { id } => {
                    table.tombstone(&id);
                }
            }
            replayed += 1;
        }
        if replayed > 0 {
            tracing::debug!(entries = replayed, "replayed write-ahead log");
        }

        let mut wal = Wal::open(paths.wal())?;
        wal.truncate()?;

        let overflow = OverflowFile::new(paths.overflow());
        residency::run_pass(&mut table, residency.as_ref(), max_in_memory, &overflow)?;

        let inner = Arc::new(Mutex::new(Inner {
            table,
            wal: Some(wal),
            overflow,
            paths,
            id_fn,
            validators,
            residency,
            max_in_memory,
            _lock: lock,
        }));
        spawn_snapshot_task(Arc::downgrade(&inner), snapshot_interval)?;
        Ok(Self { inner })
    }

    /// Inserts the record, or updates it in place if its id is already
    /// known. Returns the id.
    pub fn put(&self, body: T) -> Result<ID> {
        let mut guard = self.inner.lock()?;
        let inner = &mut *guard;
        inner.ensure_open()?;

        let id = (inner.id_fn)(&body)?;
        let current = inner.table.get(&id).and_then(|rec| rec.body());
        let body = run_validators(&inner.validators, current, body)?;

        let entry = [WalEntry::Put { id: &id, value: &body }];
        inner.wal_mut()?.append(&entry)?;

        inner.table.add_or_update(id.clone(), body);
        inner.run_residency()?;
        Ok(id)
    }

    /// Inserts or updates a batch of records as one group.
    ///
    /// Every body is identified and validated before anything reaches the
    /// log; any failure aborts the whole batch with state untouched. The
    /// log entries are appended and synced together.
    pub fn put_all(&self, bodies: Vec<T>) -> Result<Vec<ID>> {
        let mut guard = self.inner.lock()?;
        let inner = &mut *guard;
        inner.ensure_open()?;

        let mut pending = Vec::with_capacity(bodies.len());
        let mut ids = Vec::with_capacity(bodies.len());
        for body in bodies {
            let id = (inner.id_fn)(&body)?;
            let current = inner.table.get(&id).and_then(|rec| rec.body());
            let body = run_validators(&inner.validators, current, body)?;
            ids.push(id.clone());
            pending.push((id, body));
        }
        if pending.is_empty() {
            return Ok(ids);
        }

        let entries: Vec<WalEntry<&ID, &T>> = pending
            .iter()
            .map(|(id, body)| WalEntry::Put { id, value: body })
            .collect();
        inner.wal_mut()?.append(&entries)?;
        drop(entries);

        for (id, body) in pending {
            inner.table.add_or_update(id, body);
        }
        inner.run_residency()?;
        Ok(ids)
    }

    /// Returns a copy of every live record matching the predicate, in
    /// insertion order, fusing resident bodies with bodies read back from
    /// the overflow file.
    pub fn get<P>(&self, predicate: P) -> Result<Vec<T>>
    where
        P: Fn(&T) -> bool,
    {
        let guard = self.inner.lock()?;
        scan::scan(&guard.table, &guard.overflow, predicate)
    }

    /// Tombstones every live record matching the predicate and returns the
    /// removed bodies. Demoted records are read back from the overflow file
    /// so they are examined too.
    pub fn delete<P>(&self, predicate: P) -> Result<Vec<T>>
    where
        P: Fn(&T) -> bool,
    {
        let mut guard = self.inner.lock()?;
        let inner = &mut *guard;
        inner.ensure_open()?;

        let mut deleted = Vec::new();
        let mut reader: Option<OverflowReader> = None;

        for id in inner.table.mapped_ids() {
            let Some(rec) = inner.table.get(&id) else { continue };
            if rec.is_deleted() {
                continue;
            }
            let fetched: Option<T> = match (rec.body(), rec.overflow_at()) {
                (Some(body), _) => {
                    if !predicate(body) {
                        continue;
                    }
                    None
                }
                (None, Some(offset)) => {
                    if reader.is_none() {
                        reader = Some(inner.overflow.reader()?);
                    }
                    let body: T = reader.as_mut().unwrap().fetch(offset)?;
                    if !predicate(&body) {
                        continue;
                    }
                    Some(body)
                }
                (None, None) => continue,
            };

            let entry = [WalEntry::<&ID, &T>::Delete { id: &id }];
            inner.wal_mut()?.append(&entry)?;
            if let Some(body) = inner.table.tombstone(&id).or(fetched) {
                deleted.push(body);
            }
        }
        Ok(deleted)
    }

    /// Writes a snapshot of the live state and truncates the write-ahead
    /// log. The background task does the same on its interval; this entry
    /// point surfaces errors to the caller.
    pub fn snapshot(&self) -> Result<()> {
        let mut guard = self.inner.lock()?;
        guard.ensure_open()?;
        guard.write_snapshot()
    }

    /// Flushes and closes the write-ahead log. Reads keep working; later
    /// mutations fail. Closing twice is a no-op.
    pub fn close(&self) -> Result<()> {
        let mut guard = self.inner.lock()?;
        if let Some(mut wal) = guard.wal.take() {
            wal.sync()?;
        }
        Ok(())
    }
}

impl<ID, T> Inner<ID, T>
where
    ID: Eq + Hash + Clone + Serialize + DeserializeOwned + Send + 'static,
    T: Clone + Serialize + DeserializeOwned + Send + 'static,
{
    fn ensure_open(&self) -> Result<()> {
        if self.wal.is_some() {
            Ok(())
        } else {
            Err(Error::Closed)
        }
    }

    fn wal_mut(&mut self) -> Result<&mut Wal> {
        self.wal.as_mut().ok_or(Error::Closed)
    }

    fn run_residency(&mut self) -> Result<()> {
        residency::run_pass(
            &mut self.table,
            self.residency.as_ref(),
            self.max_in_memory,
            &self.overflow,
        )
    }

    fn write_snapshot(&mut self) -> Result<()> {
        snapshot::write(&self.paths, &mut self.table, &self.overflow)?;
        self.wal_mut()?.truncate()
    }
}

fn run_validators<T>(validators: &[Validator<T>], current: Option<&T>, proposed: T) -> Result<T> {
    let mut value = proposed;
    for validator in validators {
        if let Some(replacement) = validator(current, &value)? {
            value = replacement;
        }
    }
    Ok(value)
}

/// Ticks every `interval`, snapshotting under the store mutex. Failures are
/// logged and swallowed; the next tick retries. The thread holds only a weak
/// reference and exits once the store is dropped.
fn spawn_snapshot_task<ID, T>(inner: Weak<Mutex<Inner<ID, T>>>, interval: Duration) -> Result<()>
where
    ID: Eq + Hash + Clone + Serialize + DeserializeOwned + Send + 'static,
    T: Clone + Serialize + DeserializeOwned + Send + 'static,
{
    thread::Builder::new()
        .name("siltdb-snapshot".into())
        .spawn(move || loop {
            thread::sleep(interval);
            let Some(inner) = inner.upgrade() else { break };
            let Ok(mut inner) = inner.lock() else { break };
            if inner.wal.is_none() {
                continue;
            }
            if let Err(error) = inner.write_snapshot() {
                tracing::warn!(%error, "periodic snapshot failed");
            }
        })?;
    Ok(())
}
