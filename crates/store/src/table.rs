//! Paged, thread-safe columnar row store.
//!
//! Concurrency discipline (one row):
//!
//! ```text
//! FREE → ALLOCATED → LIVE ⇄ WRITING → DELETING → FREE
//! ```
//!
//! Writers own all transitions. A writer enters the write phase by CASing
//! the row's version word from even `v` to `v + 1`, mutates cells, and
//! leaves with a release store of `v + 2`. Readers snapshot: load an even
//! version, read cells, re-check the version; any change retries. The free
//! list is a Treiber stack whose head word pairs the slot with the slot's
//! reuse generation, which defeats ABA across delete/reallocate cycles.

use std::sync::atomic::{fence, AtomicBool, AtomicI64, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::sync::OnceLock;

use common::{Config, EngineError, EngineResult, FieldId, RowId};
use indexes::TableIndexes;
use schema::EntityDescriptor;
use tracing::trace;
use typecode::{Operator, Storage, TypeCode, Value};

use crate::bitmap::Bitmap;
use crate::column::TextMode;
use crate::page::Page;
use crate::pool::StringPool;
use crate::selection::Selection;

/// One table per entity type: a fixed directory of lazily created pages,
/// the free list, the id counter and the table's indexes.
pub struct Table {
    desc: Arc<EntityDescriptor>,
    config: Arc<Config>,
    /// Storage class per column, in column order.
    storages: Box<[Storage]>,
    /// Type code per column, in column order.
    codes: Box<[TypeCode]>,
    /// Field id → column index; transient fields have no column.
    col_of: Box<[Option<u16>]>,
    /// Column index → field id.
    field_of: Box<[FieldId]>,
    pages: Box<[OnceLock<Page>]>,
    /// Next never-used global slot.
    high_water: AtomicU32,
    /// Treiber stack head: (generation tag << 32) | (raw row id + 1); 0 = empty.
    free_head: AtomicU64,
    row_count: AtomicU64,
    id_counter: AtomicI64,
    /// Cooperative cancellation flag checked at scan row boundaries.
    interrupt: AtomicBool,
    pool: StringPool,
    indexes: TableIndexes,
}

impl Table {
    pub fn new(desc: Arc<EntityDescriptor>, config: Arc<Config>) -> EngineResult<Self> {
        let capacity = config.page_size.checked_mul(config.max_pages).ok_or_else(|| {
            EngineError::BadInput("page geometry overflows".into())
        })?;
        if capacity > u32::MAX as usize {
            return Err(EngineError::BadInput(format!(
                "page geometry {}x{} exceeds the 32-bit handle space",
                config.page_size, config.max_pages
            )));
        }
        let mut storages = Vec::new();
        let mut codes = Vec::new();
        let mut col_of = vec![None; desc.fields.len()];
        let mut field_of = Vec::new();
        for f in &desc.fields {
            if f.transient {
                continue;
            }
            col_of[f.id as usize] = Some(storages.len() as u16);
            storages.push(f.type_code.storage());
            codes.push(f.type_code);
            field_of.push(f.id);
        }
        let indexes = TableIndexes::build(&desc, &config)?;
        let pages: Box<[OnceLock<Page>]> =
            (0..config.max_pages).map(|_| OnceLock::new()).collect();
        let table = Table {
            storages: storages.into_boxed_slice(),
            codes: codes.into_boxed_slice(),
            col_of: col_of.into_boxed_slice(),
            field_of: field_of.into_boxed_slice(),
            pages,
            high_water: AtomicU32::new(0),
            free_head: AtomicU64::new(0),
            row_count: AtomicU64::new(0),
            id_counter: AtomicI64::new(0),
            interrupt: AtomicBool::new(false),
            pool: StringPool::new(),
            indexes,
            desc,
            config,
        };
        for p in 0..table.config.initial_pages.min(table.config.max_pages) {
            table.ensure_page(p);
        }
        Ok(table)
    }

    pub fn descriptor(&self) -> &Arc<EntityDescriptor> {
        &self.desc
    }

    pub fn config(&self) -> &Arc<Config> {
        &self.config
    }

    pub fn pool(&self) -> &StringPool {
        &self.pool
    }

    pub fn indexes(&self) -> &TableIndexes {
        &self.indexes
    }

    pub fn row_count(&self) -> u64 {
        self.row_count.load(Ordering::Acquire)
    }

    /// Next value of the per-table identity counter. Values are never
    /// reused, even after deletes.
    pub fn next_id(&self) -> i64 {
        self.id_counter.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Keep the counter ahead of explicitly provided ids so generated ids
    /// stay unique alongside them.
    pub fn observe_id(&self, id: i64) {
        self.id_counter.fetch_max(id, Ordering::Relaxed);
    }

    pub fn request_interrupt(&self) {
        self.interrupt.store(true, Ordering::Release);
    }

    pub fn clear_interrupt(&self) {
        self.interrupt.store(false, Ordering::Release);
    }

    // ---- geometry ---------------------------------------------------------

    fn split(&self, row: RowId) -> (usize, usize) {
        let raw = row.raw() as usize;
        (raw / self.config.page_size, raw % self.config.page_size)
    }

    fn page(&self, idx: usize) -> Option<&Page> {
        self.pages.get(idx).and_then(OnceLock::get)
    }

    fn ensure_page(&self, idx: usize) -> &Page {
        self.pages[idx].get_or_init(|| {
            trace!(page = idx, entity = %self.desc.name, "appending page");
            Page::new(&self.storages, self.config.page_size)
        })
    }

    fn used_pages(&self) -> usize {
        let hw = self.high_water.load(Ordering::Acquire) as usize;
        hw.div_ceil(self.config.page_size).min(self.config.max_pages)
    }

    fn column_idx(&self, field: FieldId) -> usize {
        self.col_of[field as usize].expect("field has no column") as usize
    }

    // ---- free list --------------------------------------------------------

    fn free_push(&self, row: RowId) {
        let (p, slot) = self.split(row);
        let page = self.page(p).expect("freed row on allocated page");
        let tag = page.generation(slot).load(Ordering::Relaxed) as u64;
        let packed = (tag << 32) | (u64::from(row.raw()) + 1);
        loop {
            let head = self.free_head.load(Ordering::Acquire);
            page.next_free(slot).store(head, Ordering::Relaxed);
            if self
                .free_head
                .compare_exchange_weak(head, packed, Ordering::Release, Ordering::Relaxed)
                .is_ok()
            {
                return;
            }
        }
    }

    fn free_pop(&self) -> Option<RowId> {
        loop {
            let head = self.free_head.load(Ordering::Acquire);
            if head == 0 {
                return None;
            }
            let raw = (head & 0xFFFF_FFFF) as u32 - 1;
            let (p, slot) = self.split(RowId(raw));
            let page = self.page(p)?;
            let next = page.next_free(slot).load(Ordering::Relaxed);
            if self
                .free_head
                .compare_exchange_weak(head, next, Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
            {
                return Some(RowId(raw));
            }
        }
    }

    /// Pop a recycled slot or extend the high-water mark, appending pages
    /// on demand up to the configured maximum.
    pub fn allocate_slot(&self) -> EngineResult<RowId> {
        if let Some(row) = self.free_pop() {
            return Ok(row);
        }
        let capacity = (self.config.page_size * self.config.max_pages) as u32;
        loop {
            let hw = self.high_water.load(Ordering::Relaxed);
            if hw >= capacity {
                return Err(EngineError::TableFull(format!(
                    "{}: {} pages of {} rows",
                    self.desc.name, self.config.max_pages, self.config.page_size
                )));
            }
            if self
                .high_water
                .compare_exchange_weak(hw, hw + 1, Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
            {
                let (p, _) = self.split(RowId(hw));
                self.ensure_page(p);
                return Ok(RowId(hw));
            }
        }
    }

    // ---- seqlock ----------------------------------------------------------

    fn lock_row(&self, page: &Page, slot: usize) -> u32 {
        loop {
            let v = page.version(slot).load(Ordering::Relaxed);
            if v % 2 == 0
                && page
                    .version(slot)
                    .compare_exchange_weak(v, v + 1, Ordering::Acquire, Ordering::Relaxed)
                    .is_ok()
            {
                return v;
            }
            std::hint::spin_loop();
        }
    }

    fn unlock_row(&self, page: &Page, slot: usize, locked_from: u32) {
        page.version(slot)
            .store(locked_from + 2, Ordering::Release);
    }

    /// Plain load of every cell of one slot; consistency is the caller's
    /// concern (verified snapshot or held write lock).
    fn load_row(&self, page: &Page, slot: usize) -> Vec<Value> {
        let mut out = vec![Value::Null; self.desc.fields.len()];
        for (col, field) in self.field_of.iter().enumerate() {
            out[*field as usize] = page.column(col).load(slot, self.codes[col], &self.pool);
        }
        out
    }

    /// Snapshot-read a row. `Ok(None)` for a stably absent row,
    /// `TransientConflict` when the retry budget runs out against an active
    /// writer. Callers re-read or drop the row; it is never surfaced.
    pub fn read(&self, row: RowId) -> EngineResult<Option<Vec<Value>>> {
        let (p, slot) = self.split(row);
        let Some(page) = self.page(p) else {
            return Ok(None);
        };
        let mut retries = 0u32;
        loop {
            let v1 = page.version(slot).load(Ordering::Acquire);
            if v1 % 2 == 0 {
                let result = if page.is_live(slot) {
                    Some(self.load_row(page, slot))
                } else {
                    None
                };
                fence(Ordering::Acquire);
                let v2 = page.version(slot).load(Ordering::Relaxed);
                if v1 == v2 {
                    return Ok(result);
                }
            }
            retries += 1;
            if retries >= self.config.read_retry_limit {
                return Err(EngineError::TransientConflict(retries));
            }
            if retries % 16 == 0 {
                std::thread::yield_now();
            } else {
                std::hint::spin_loop();
            }
        }
    }

    /// Snapshot-read a single field, for sort keys and id recovery.
    pub fn read_field(&self, row: RowId, field: FieldId) -> EngineResult<Option<Value>> {
        let (p, slot) = self.split(row);
        let Some(page) = self.page(p) else {
            return Ok(None);
        };
        let col = self.column_idx(field);
        let mut retries = 0u32;
        loop {
            let v1 = page.version(slot).load(Ordering::Acquire);
            if v1 % 2 == 0 {
                let result = if page.is_live(slot) {
                    Some(page.column(col).load(slot, self.codes[col], &self.pool))
                } else {
                    None
                };
                fence(Ordering::Acquire);
                let v2 = page.version(slot).load(Ordering::Relaxed);
                if v1 == v2 {
                    return Ok(result);
                }
            }
            retries += 1;
            if retries >= self.config.read_retry_limit {
                return Err(EngineError::TransientConflict(retries));
            }
            if retries % 16 == 0 {
                std::thread::yield_now();
            } else {
                std::hint::spin_loop();
            }
        }
    }

    pub fn is_live(&self, row: RowId) -> bool {
        let (p, slot) = self.split(row);
        self.page(p).is_some_and(|page| page.is_live(slot))
    }

    // ---- mutation ---------------------------------------------------------

    /// Insert a full row. `values` is indexed by field id and must include
    /// a non-null id; uniqueness is enforced against the id index before
    /// the row becomes visible.
    pub fn insert(&self, values: &[Value]) -> EngineResult<RowId> {
        debug_assert_eq!(values.len(), self.desc.fields.len());
        let id_value = &values[self.desc.id_field as usize];
        // Reserve the id first so two writers cannot both publish it.
        let probe = RowId(u32::MAX);
        self.indexes.id().insert_unique(id_value, probe)?;

        let row = match self.allocate_slot() {
            Ok(row) => row,
            Err(e) => {
                self.indexes.id().remove(id_value);
                return Err(e);
            }
        };
        let (p, slot) = self.split(row);
        let page = self.page(p).expect("allocated page");

        let v = self.lock_row(page, slot);
        for (col, field) in self.field_of.iter().enumerate() {
            page.column(col)
                .store(slot, &values[*field as usize], &self.pool);
        }
        page.set_live(slot);
        self.unlock_row(page, slot, v);

        self.row_count.fetch_add(1, Ordering::AcqRel);
        // Point the reservation at the real handle, then index the columns.
        self.indexes
            .id()
            .replace(id_value, row)
            .expect("re-pointing reserved id");
        self.indexes.add_row(values, row);
        Ok(row)
    }

    /// Rewrite a live row in place, re-indexing whatever changed.
    pub fn update(&self, row: RowId, values: &[Value]) -> EngineResult<()> {
        debug_assert_eq!(values.len(), self.desc.fields.len());
        let (p, slot) = self.split(row);
        let page = self
            .page(p)
            .ok_or_else(|| EngineError::MissingEntity(format!("row {}", row.raw())))?;

        let v = self.lock_row(page, slot);
        if !page.is_live(slot) {
            self.unlock_row(page, slot, v);
            return Err(EngineError::MissingEntity(format!("row {}", row.raw())));
        }
        let old = self.load_row(page, slot);

        let old_id = &old[self.desc.id_field as usize];
        let new_id = &values[self.desc.id_field as usize];
        if old_id != new_id {
            if let Err(e) = self.indexes.id().insert_unique(new_id, row) {
                self.unlock_row(page, slot, v);
                return Err(e);
            }
            self.indexes.id().remove(old_id);
        }

        for (col, field) in self.field_of.iter().enumerate() {
            page.column(col)
                .store(slot, &values[*field as usize], &self.pool);
        }
        self.unlock_row(page, slot, v);

        self.indexes.reindex(&old, values, row);
        Ok(())
    }

    /// Delete a row: index entries go first, then the presence bit clears
    /// and reference cells are nulled inside the write phase, then the slot
    /// returns to the free list. Returns false if the row was already gone.
    pub fn delete(&self, row: RowId) -> EngineResult<bool> {
        let (p, slot) = self.split(row);
        let Some(page) = self.page(p) else {
            return Ok(false);
        };

        let v = self.lock_row(page, slot);
        if !page.is_live(slot) {
            self.unlock_row(page, slot, v);
            return Ok(false);
        }
        let values = self.load_row(page, slot);
        self.indexes.id().remove(&values[self.desc.id_field as usize]);
        self.indexes.remove_row(&values, row);

        page.clear_live(slot);
        for col in 0..self.storages.len() {
            page.column(col).clear(slot);
        }
        page.generation(slot).fetch_add(1, Ordering::Relaxed);
        self.unlock_row(page, slot, v);

        self.row_count.fetch_sub(1, Ordering::AcqRel);
        self.free_push(row);
        Ok(true)
    }

    // ---- scans ------------------------------------------------------------

    fn check_interrupt(&self, scanned: &mut usize, just_scanned: usize) -> EngineResult<()> {
        *scanned += just_scanned;
        if *scanned >= self.config.scan_check_interval {
            *scanned = 0;
            if self.interrupt.load(Ordering::Acquire) {
                return Err(EngineError::BadInput("query interrupted".into()));
            }
        }
        Ok(())
    }

    fn collect_pages(
        &self,
        mut per_page: impl FnMut(&Page, &Bitmap) -> Bitmap,
    ) -> EngineResult<Selection> {
        let mut rows = Vec::new();
        let mut scanned = 0usize;
        for p in 0..self.used_pages() {
            // Pages may finish initializing out of order under contention.
            let Some(page) = self.page(p) else { continue };
            let live = page.live_bitmap();
            let hits = per_page(page, &live);
            let base = p * self.config.page_size;
            for slot in hits.ones() {
                rows.push(RowId((base + slot) as u32));
            }
            self.check_interrupt(&mut scanned, self.config.page_size)?;
        }
        Ok(Selection::from_sorted(rows))
    }

    /// All live rows, in handle order.
    pub fn live_rows(&self) -> EngineResult<Selection> {
        self.collect_pages(|_, live| live.clone())
    }

    /// Comparison scan (Eq, Ne, Lt, Le, Gt, Ge) over one column.
    pub fn scan_cmp(
        &self,
        field: FieldId,
        op: Operator,
        probe: &Value,
        ignore_case: bool,
    ) -> EngineResult<Selection> {
        let col = self.column_idx(field);
        self.collect_pages(|page, live| {
            page.column(col)
                .scan_cmp(op, probe, live, &self.pool, ignore_case)
        })
    }

    pub fn scan_between(
        &self,
        field: FieldId,
        lo: &Value,
        hi: &Value,
        inclusive: (bool, bool),
    ) -> EngineResult<Selection> {
        let col = self.column_idx(field);
        self.collect_pages(|page, live| page.column(col).scan_between(lo, hi, inclusive, live))
    }

    pub fn scan_in(
        &self,
        field: FieldId,
        probes: &[Value],
        negate: bool,
        ignore_case: bool,
    ) -> EngineResult<Selection> {
        let col = self.column_idx(field);
        self.collect_pages(|page, live| {
            page.column(col)
                .scan_in(probes, negate, live, &self.pool, ignore_case)
        })
    }

    pub fn scan_text(
        &self,
        field: FieldId,
        mode: TextMode,
        pattern: &str,
        negate: bool,
        ignore_case: bool,
    ) -> EngineResult<Selection> {
        let col = self.column_idx(field);
        self.collect_pages(|page, live| {
            page.column(col)
                .scan_text(mode, pattern, negate, ignore_case, live, &self.pool)
        })
    }

    pub fn scan_bool_is(&self, field: FieldId, want: bool) -> EngineResult<Selection> {
        let col = self.column_idx(field);
        self.collect_pages(|page, live| page.column(col).scan_bool_is(want, live))
    }

    /// IS NULL / IS NOT NULL straight off the value-present bitmap.
    pub fn scan_null(&self, field: FieldId, negate: bool) -> EngineResult<Selection> {
        let col = self.column_idx(field);
        self.collect_pages(|page, live| {
            let present = page.column(col).present_bitmap(page.capacity());
            let mut out = live.clone();
            if negate {
                out.and_with(&present);
            } else {
                out.and_not_with(&present);
            }
            out
        })
    }
}
