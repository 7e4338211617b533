//! Fixed-capacity block of row slots.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use typecode::Storage;

use crate::bitmap::Bitmap;
use crate::column::PageColumn;

/// One page: a dense array per column plus the per-row control words
/// (liveness bits, seqlock versions, free-list links, reuse generations).
pub struct Page {
    columns: Box<[PageColumn]>,
    live: Box<[AtomicU64]>,
    versions: Box<[AtomicU32]>,
    next_free: Box<[AtomicU64]>,
    generations: Box<[AtomicU32]>,
    capacity: usize,
}

impl Page {
    pub fn new(storages: &[Storage], capacity: usize) -> Self {
        Page {
            columns: storages
                .iter()
                .map(|s| PageColumn::new(*s, capacity))
                .collect(),
            live: (0..capacity.div_ceil(64)).map(|_| AtomicU64::new(0)).collect(),
            versions: (0..capacity).map(|_| AtomicU32::new(0)).collect(),
            next_free: (0..capacity).map(|_| AtomicU64::new(0)).collect(),
            generations: (0..capacity).map(|_| AtomicU32::new(0)).collect(),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn column(&self, idx: usize) -> &PageColumn {
        &self.columns[idx]
    }

    pub fn version(&self, slot: usize) -> &AtomicU32 {
        &self.versions[slot]
    }

    pub fn next_free(&self, slot: usize) -> &AtomicU64 {
        &self.next_free[slot]
    }

    pub fn generation(&self, slot: usize) -> &AtomicU32 {
        &self.generations[slot]
    }

    pub fn is_live(&self, slot: usize) -> bool {
        self.live[slot / 64].load(Ordering::Acquire) & (1 << (slot % 64)) != 0
    }

    /// Set the liveness bit. Release-ordered so a scanner that observes the
    /// bit also observes the column writes that preceded it.
    pub fn set_live(&self, slot: usize) {
        self.live[slot / 64].fetch_or(1 << (slot % 64), Ordering::Release);
    }

    pub fn clear_live(&self, slot: usize) {
        self.live[slot / 64].fetch_and(!(1 << (slot % 64)), Ordering::Release);
    }

    /// Snapshot of the row-liveness words.
    pub fn live_bitmap(&self) -> Bitmap {
        let words = self
            .live
            .iter()
            .map(|w| w.load(Ordering::Acquire))
            .collect();
        Bitmap::from_words(self.capacity, words)
    }

    pub fn live_count(&self) -> usize {
        self.live
            .iter()
            .map(|w| w.load(Ordering::Acquire).count_ones() as usize)
            .sum()
    }
}
