use std::path::PathBuf;
use std::time::Duration;

use crate::error::Result;

/// Default period between background snapshots.
pub const DEFAULT_SNAPSHOT_INTERVAL: Duration = Duration::from_secs(30);

/// Computes the logical identity of a record. Two values producing the same
/// id are the same record; the second write is an update. The function must
/// be pure and deterministic for the whole life of the store.
pub type IdFn<ID, T> = Box<dyn Fn(&T) -> Result<ID> + Send + 'static>;

/// Pre-write check run before a record is inserted or updated.
///
/// Receives the currently stored value (`None` on insert) and the proposed
/// one. Returning `Ok(Some(v))` replaces the proposed value for the next
/// validator and, ultimately, storage; `Ok(None)` passes it through
/// unchanged; any error aborts the write before it reaches the log.
/// Validators never run during recovery: replayed values are restored
/// exactly as written.
pub type Validator<T> = Box<dyn Fn(Option<&T>, &T) -> Result<Option<T>> + Send + 'static>;

/// Decides whether a record body should stay in memory. Must be pure and
/// cheap; it may run zero or many times per record.
pub type ResidencyFn<T> = Box<dyn Fn(&T) -> bool + Send + 'static>;

/// Configuration for opening a [`Store`](crate::Store).
///
/// An id function is required; everything else has defaults.
pub struct Options<ID, T> {
    /// Base directory for data. Each record type gets its own subdirectory.
    pub dir: PathBuf,

    /// Period between background snapshots (default: 30s). Zero means the
    /// default.
    pub snapshot_interval: Duration,

    /// Residency cap. `None` disables the residency pass entirely, `-1` runs
    /// it after every mutation, and `n >= 0` runs it only while more than
    /// `n` record bodies are resident in memory.
    pub max_in_memory: Option<i64>,

    pub(crate) id_fn: Option<IdFn<ID, T>>,
    pub(crate) validators: Vec<Validator<T>>,
    pub(crate) residency: Option<ResidencyFn<T>>,
}

impl<ID, T> Default for Options<ID, T> {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("."),
            snapshot_interval: DEFAULT_SNAPSHOT_INTERVAL,
            max_in_memory: None,
            id_fn: None,
            validators: Vec::new(),
            residency: None,
        }
    }
}

impl<ID, T> Options<ID, T> {
    /// Create options with the given base directory.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            ..Default::default()
        }
    }

    /// Set the period between background snapshots.
    pub fn snapshot_interval(mut self, interval: Duration) -> Self {
        self.snapshot_interval = interval;
        self
    }

    /// Set the residency cap. See [`Options::max_in_memory`].
    pub fn max_in_memory(mut self, max: i64) -> Self {
        self.max_in_memory = Some(max);
        self
    }

    /// Set the identifier function. Required.
    pub fn id_fn(mut self, f: impl Fn(&T) -> Result<ID> + Send + 'static) -> Self {
        self.id_fn = Some(Box::new(f));
        self
    }

    /// Append a validator to the pre-write chain.
    pub fn validator(
        mut self,
        f: impl Fn(Option<&T>, &T) -> Result<Option<T>> + Send + 'static,
    ) -> Self {
        self.validators.push(Box::new(f));
        self
    }

    /// Set the keep-in-memory test used by the residency pass.
    pub fn residency(mut self, keep: impl Fn(&T) -> bool + Send + 'static) -> Self {
        self.residency = Some(Box::new(keep));
        self
    }

    /// Replaces zero-valued settings with their defaults.
    pub(crate) fn normalize(&mut self) {
        if self.snapshot_interval.is_zero() {
            self.snapshot_interval = DEFAULT_SNAPSHOT_INTERVAL;
        }
    }
}
