//! Ordering machinery: stable comparator over pre-extracted key tuples, a
//! chunked parallel merge sort for large results, and a bounded top-k heap
//! for LIMIT + ORDER BY.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use typecode::Value;

/// One candidate row carrying its pre-extracted sort keys and snapshot
/// values. Keys are pulled once, before sorting, so comparators never
/// touch the table.
pub struct Keyed {
    pub keys: Vec<Value>,
    /// Arrival order, which keeps the sort stable across the heap path.
    pub seq: usize,
    pub values: Vec<Value>,
}

/// Compare key tuples under the per-key directions.
pub fn compare_keys(a: &Keyed, b: &Keyed, descending: &[bool]) -> Ordering {
    for (i, desc) in descending.iter().enumerate() {
        let ord = a.keys[i].total_cmp(&b.keys[i]);
        let ord = if *desc { ord.reverse() } else { ord };
        if ord != Ordering::Equal {
            return ord;
        }
    }
    a.seq.cmp(&b.seq)
}

/// Stable sort, fanning out to a chunked merge sort above the threshold.
pub fn sort(rows: &mut Vec<Keyed>, descending: &[bool], parallel: bool, threshold: usize) {
    if parallel && rows.len() > threshold {
        let taken = std::mem::take(rows);
        *rows = parallel_merge_sort(taken, descending);
    } else {
        rows.sort_by(|a, b| compare_keys(a, b, descending));
    }
}

fn parallel_merge_sort(rows: Vec<Keyed>, descending: &[bool]) -> Vec<Keyed> {
    let workers = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
        .min(8)
        .max(2);
    let chunk_len = rows.len().div_ceil(workers);
    let mut chunks: Vec<Vec<Keyed>> = Vec::with_capacity(workers);
    let mut rows = rows;
    while !rows.is_empty() {
        let tail = rows.split_off(rows.len().saturating_sub(chunk_len));
        chunks.push(tail);
    }

    std::thread::scope(|scope| {
        let handles: Vec<_> = chunks
            .into_iter()
            .map(|mut chunk| {
                scope.spawn(move || {
                    chunk.sort_by(|a, b| compare_keys(a, b, descending));
                    chunk
                })
            })
            .collect();
        let mut sorted: Vec<Vec<Keyed>> = handles.into_iter().map(|h| h.join().expect("sort worker")).collect();
        while sorted.len() > 1 {
            let right = sorted.pop().expect("two chunks");
            let left = sorted.pop().expect("two chunks");
            sorted.push(merge(left, right, descending));
        }
        sorted.pop().unwrap_or_default()
    })
}

// Stable two-way merge: ties prefer the lower sequence number, which
// compare_keys already encodes.
fn merge(left: Vec<Keyed>, right: Vec<Keyed>, descending: &[bool]) -> Vec<Keyed> {
    let mut out = Vec::with_capacity(left.len() + right.len());
    let mut left = left.into_iter().peekable();
    let mut right = right.into_iter().peekable();
    loop {
        match (left.peek(), right.peek()) {
            (Some(a), Some(b)) => {
                if compare_keys(a, b, descending) != Ordering::Greater {
                    out.push(left.next().expect("peeked"));
                } else {
                    out.push(right.next().expect("peeked"));
                }
            }
            (Some(_), None) => out.push(left.next().expect("peeked")),
            (None, Some(_)) => out.push(right.next().expect("peeked")),
            (None, None) => break,
        }
    }
    out
}

/// Bounded heap keeping the best `k` rows under the comparator, so LIMIT
/// with ORDER BY never sorts the full result.
pub struct TopK<'a> {
    k: usize,
    descending: &'a [bool],
    // Max-heap by comparator: the root is the worst kept row.
    heap: BinaryHeap<HeapEntry<'a>>,
}

struct HeapEntry<'a> {
    keyed: Keyed,
    descending: &'a [bool],
}

impl PartialEq for HeapEntry<'_> {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for HeapEntry<'_> {}

impl PartialOrd for HeapEntry<'_> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapEntry<'_> {
    fn cmp(&self, other: &Self) -> Ordering {
        compare_keys(&self.keyed, &other.keyed, self.descending)
    }
}

impl<'a> TopK<'a> {
    pub fn new(k: usize, descending: &'a [bool]) -> Self {
        TopK {
            k,
            descending,
            heap: BinaryHeap::with_capacity(k + 1),
        }
    }

    pub fn push(&mut self, keyed: Keyed) {
        if self.k == 0 {
            return;
        }
        self.heap.push(HeapEntry {
            keyed,
            descending: self.descending,
        });
        if self.heap.len() > self.k {
            self.heap.pop();
        }
    }

    /// The kept rows in comparator order.
    pub fn into_sorted(self) -> Vec<Keyed> {
        let out: Vec<Keyed> = self
            .heap
            .into_sorted_vec()
            .into_iter()
            .map(|e| e.keyed)
            .collect();
        debug_assert!(out.len() <= self.k);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keyed(seq: usize, key: i64) -> Keyed {
        Keyed {
            keys: vec![Value::I64(key)],
            seq,
            values: Vec::new(),
        }
    }

    #[test]
    fn sort_is_stable() {
        let mut rows = vec![keyed(0, 2), keyed(1, 1), keyed(2, 2), keyed(3, 1)];
        sort(&mut rows, &[false], false, usize::MAX);
        let order: Vec<usize> = rows.iter().map(|r| r.seq).collect();
        assert_eq!(order, vec![1, 3, 0, 2]);
    }

    #[test]
    fn descending_reverses_keys_not_stability() {
        let mut rows = vec![keyed(0, 1), keyed(1, 3), keyed(2, 3)];
        sort(&mut rows, &[true], false, usize::MAX);
        let order: Vec<usize> = rows.iter().map(|r| r.seq).collect();
        assert_eq!(order, vec![1, 2, 0]);
    }

    #[test]
    fn parallel_sort_matches_serial() {
        let serial: Vec<i64> = {
            let mut rows: Vec<Keyed> = (0..5000).map(|i| keyed(i, (i as i64 * 37) % 101)).collect();
            sort(&mut rows, &[false], false, usize::MAX);
            rows.iter().map(|r| r.keys[0].as_i64().unwrap()).collect()
        };
        let parallel: Vec<i64> = {
            let mut rows: Vec<Keyed> = (0..5000).map(|i| keyed(i, (i as i64 * 37) % 101)).collect();
            sort(&mut rows, &[false], true, 1000);
            rows.iter().map(|r| r.keys[0].as_i64().unwrap()).collect()
        };
        assert_eq!(serial, parallel);
    }

    #[test]
    fn top_k_keeps_the_best_rows_in_order() {
        let descending = [true];
        let mut topk = TopK::new(3, &descending);
        for (i, price) in [100i64, 300, 200, 500, 400].iter().enumerate() {
            topk.push(keyed(i, *price));
        }
        let kept: Vec<i64> = topk
            .into_sorted()
            .iter()
            .map(|r| r.keys[0].as_i64().unwrap())
            .collect();
        assert_eq!(kept, vec![500, 400, 300]);
    }

    #[test]
    fn top_k_zero_keeps_nothing() {
        let descending = [false];
        let mut topk = TopK::new(0, &descending);
        topk.push(keyed(0, 1));
        assert!(topk.into_sorted().is_empty());
    }
}
