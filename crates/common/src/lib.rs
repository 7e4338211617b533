//! Shared identifiers, the closed error set and the engine configuration.

#[cfg(test)]
mod tests;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Index of a field within an entity descriptor (and of its column within
/// the owning table).
pub type FieldId = u16;

/// Stable handle of a row slot: page index and slot index packed into a
/// non-negative 32-bit integer. Packing depends on the table's page size,
/// so the split lives in the table's layout, not here.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RowId(pub u32);

impl RowId {
    pub fn raw(self) -> u32 {
        self.0
    }
}

/// Canonical error type shared across engine subsystems. The set is closed;
/// `TransientConflict` is internal to the executor and never surfaces to
/// callers.
#[derive(Error, Debug)]
pub enum EngineError {
    /// Unparseable method name or query string, unknown property, missing
    /// parameter. Raised at setup.
    #[error("bad input: {0}")]
    BadInput(String),
    /// Operator incompatible with the field type, or an argument of the
    /// wrong kind. Raised at setup.
    #[error("type mismatch: {0}")]
    TypeMismatch(String),
    /// Page budget exhausted at allocation time.
    #[error("table full: {0}")]
    TableFull(String),
    /// Insert of an entity whose id already exists in the id index.
    #[error("duplicate id: {0}")]
    DuplicateId(String),
    /// `delete(entity)` with an unresolved id, or a foreign key pointing at
    /// a deleted row.
    #[error("missing entity: {0}")]
    MissingEntity(String),
    /// Seqlock retry budget exhausted; the executor retries or drops the row.
    #[error("transient conflict after {0} retries")]
    TransientConflict(u32),
}

/// Result alias carrying an [`EngineError`].
pub type EngineResult<T> = Result<T, EngineError>;

/// Engine configuration, built once and shared by every table.
///
/// # Example
/// ```
/// use common::Config;
///
/// let config = Config::builder()
///     .page_size(256)
///     .max_pages(16)
///     .initial_pages(1)
///     .build();
/// assert_eq!(config.page_size, 256);
/// ```
#[derive(Clone, Debug, Serialize, Deserialize, bon::Builder)]
pub struct Config {
    /// Rows per page.
    #[builder(default = 1024)]
    pub page_size: usize,
    /// Upper bound on pages per table before `TableFull`.
    #[builder(default = 1024)]
    pub max_pages: usize,
    /// Pages preallocated at table creation.
    #[builder(default = 1024)]
    pub initial_pages: usize,
    /// Whether large ORDER BY sorts may fan out across threads.
    #[builder(default = true)]
    pub enable_parallel_sorting: bool,
    /// Row count above which a parallel sort is used.
    #[builder(default = 1000)]
    pub parallel_sort_threshold: usize,
    /// Gates automatic index creation for prefix-index declarations.
    #[builder(default = true)]
    pub enable_prefix_index: bool,
    /// Gates automatic index creation for suffix-index declarations.
    #[builder(default = true)]
    pub enable_suffix_index: bool,
    /// Seqlock snapshot attempts before a read reports a transient conflict.
    #[builder(default = 64)]
    pub read_retry_limit: u32,
    /// Rows between cooperative-interrupt checks during long scans.
    #[builder(default = 1024)]
    pub scan_check_interval: usize,
}

impl Default for Config {
    fn default() -> Self {
        Config::builder().build()
    }
}
