//! Interned side storage for string-class columns.
//!
//! Column cells hold `u32` handles; equal strings intern to the same handle,
//! so string equality scans reduce to integer compares against the probe's
//! handle. The pool only ever grows; a deleted row's string stays interned,
//! which keeps handles stable without reference counting.

use ahash::RandomState;
use hashbrown::HashMap;
use parking_lot::{RwLock, RwLockReadGuard};
use std::sync::Arc;

/// Sentinel for an unset string cell.
pub const NO_STRING: u32 = u32::MAX;

#[derive(Default)]
struct PoolInner {
    strings: Vec<Arc<str>>,
    lookup: HashMap<Arc<str>, u32, RandomState>,
}

/// Append-only string interner shared by all string columns of one table.
#[derive(Default)]
pub struct StringPool {
    inner: RwLock<PoolInner>,
}

impl StringPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Intern `s`, returning its stable handle.
    pub fn intern(&self, s: &str) -> u32 {
        if let Some(handle) = self.inner.read().lookup.get(s) {
            return *handle;
        }
        let mut inner = self.inner.write();
        if let Some(handle) = inner.lookup.get(s) {
            return *handle;
        }
        let handle = inner.strings.len() as u32;
        assert!(handle != NO_STRING, "string pool exhausted");
        let arc: Arc<str> = Arc::from(s);
        inner.strings.push(arc.clone());
        inner.lookup.insert(arc, handle);
        handle
    }

    /// Handle of an already-interned string. A probe that was never stored
    /// cannot match any cell, which equality scans exploit.
    pub fn find(&self, s: &str) -> Option<u32> {
        self.inner.read().lookup.get(s).copied()
    }

    /// Resolve a handle.
    pub fn get(&self, handle: u32) -> Arc<str> {
        self.inner.read().strings[handle as usize].clone()
    }

    /// Read guard for scan loops: one lock acquisition per page scan
    /// instead of one per row.
    pub fn snapshot(&self) -> PoolSnapshot<'_> {
        PoolSnapshot {
            guard: self.inner.read(),
        }
    }

    pub fn len(&self) -> usize {
        self.inner.read().strings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

pub struct PoolSnapshot<'a> {
    guard: RwLockReadGuard<'a, PoolInner>,
}

impl PoolSnapshot<'_> {
    pub fn resolve(&self, handle: u32) -> &str {
        &self.guard.strings[handle as usize]
    }
}
