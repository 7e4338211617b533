//! Row-handle sets produced by predicate evaluation.

use common::RowId;

/// Sorted, deduplicated set of row handles. Page scans produce handles in
/// ascending order already; index lookups get sorted on construction.
/// AND combines by merge-intersection, OR by merge-union, both O(n).
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Selection {
    rows: Vec<RowId>,
}

impl Selection {
    pub fn empty() -> Self {
        Selection::default()
    }

    /// From handles already in ascending order (scan output).
    pub fn from_sorted(rows: Vec<RowId>) -> Self {
        debug_assert!(rows.windows(2).all(|w| w[0] < w[1]));
        Selection { rows }
    }

    /// From handles in arbitrary order (index output).
    pub fn from_unsorted(mut rows: Vec<RowId>) -> Self {
        rows.sort_unstable();
        rows.dedup();
        Selection { rows }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn contains(&self, row: RowId) -> bool {
        self.rows.binary_search(&row).is_ok()
    }

    pub fn iter(&self) -> impl Iterator<Item = RowId> + '_ {
        self.rows.iter().copied()
    }

    pub fn into_vec(self) -> Vec<RowId> {
        self.rows
    }

    pub fn intersect(&self, other: &Selection) -> Selection {
        let mut out = Vec::with_capacity(self.len().min(other.len()));
        let (mut i, mut j) = (0, 0);
        while i < self.rows.len() && j < other.rows.len() {
            match self.rows[i].cmp(&other.rows[j]) {
                std::cmp::Ordering::Less => i += 1,
                std::cmp::Ordering::Greater => j += 1,
                std::cmp::Ordering::Equal => {
                    out.push(self.rows[i]);
                    i += 1;
                    j += 1;
                }
            }
        }
        Selection { rows: out }
    }

    pub fn union(&self, other: &Selection) -> Selection {
        let mut out = Vec::with_capacity(self.len() + other.len());
        let (mut i, mut j) = (0, 0);
        while i < self.rows.len() && j < other.rows.len() {
            match self.rows[i].cmp(&other.rows[j]) {
                std::cmp::Ordering::Less => {
                    out.push(self.rows[i]);
                    i += 1;
                }
                std::cmp::Ordering::Greater => {
                    out.push(other.rows[j]);
                    j += 1;
                }
                std::cmp::Ordering::Equal => {
                    out.push(self.rows[i]);
                    i += 1;
                    j += 1;
                }
            }
        }
        out.extend_from_slice(&self.rows[i..]);
        out.extend_from_slice(&other.rows[j..]);
        Selection { rows: out }
    }
}

impl FromIterator<RowId> for Selection {
    fn from_iter<T: IntoIterator<Item = RowId>>(iter: T) -> Self {
        Selection::from_unsorted(iter.into_iter().collect())
    }
}
