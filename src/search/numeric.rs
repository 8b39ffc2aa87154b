use std::cmp::{Ordering, Reverse};

use dary_heap::OctonaryHeap;
use ndarray::{Array2, Axis};

/// Replaces scores by their log-softmax. The row maximum is subtracted before
/// exponentiating, so large logits cannot overflow. Rows without a finite maximum are left
/// untouched.
pub fn log_softmax(row: &mut [f32]) {
    let max = row.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    if !max.is_finite() {
        return;
    }
    let log_sum = row.iter().map(|&x| (x - max).exp()).sum::<f32>().ln();
    for x in row.iter_mut() {
        *x = (*x - max) - log_sum;
    }
}

/// Applies [`log_softmax`] to every row.
pub fn log_softmax_rows(scores: &mut Array2<f32>) {
    for mut row in scores.axis_iter_mut(Axis(0)) {
        match row.as_slice_mut() {
            Some(slice) => log_softmax(slice),
            None => {
                let mut owned = row.to_vec();
                log_softmax(&mut owned);
                for (x, y) in row.iter_mut().zip(owned) {
                    *x = y;
                }
            }
        }
    }
}

#[derive(Clone, Copy, Debug)]
struct Scored {
    score: f32,
    index: usize,
}

/// Higher scores rank first, then lower indices.
impl Ord for Scored {
    fn cmp(&self, other: &Self) -> Ordering {
        self.score
            .total_cmp(&other.score)
            .then_with(|| other.index.cmp(&self.index))
    }
}

impl PartialOrd for Scored {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Scored {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Scored {}

/// Gets the `k` best `(index, score)` pairs, best first, ties broken by lower index.
///
/// Keeps a bounded min-heap of the best entries seen so far instead of sorting everything.
/// NaN scores are skipped.
pub fn top_k(scores: &[f32], k: usize) -> Vec<(usize, f32)> {
    if k == 0 {
        return Vec::new();
    }
    let mut heap: OctonaryHeap<Reverse<Scored>> = OctonaryHeap::with_capacity(k.min(scores.len()));
    for (index, &score) in scores.iter().enumerate() {
        if score.is_nan() {
            continue;
        }
        let entry = Scored { score, index };
        if heap.len() < k {
            heap.push(Reverse(entry));
        } else if let Some(mut worst) = heap.peek_mut() {
            if entry > worst.0 {
                *worst = Reverse(entry);
            }
        }
    }
    heap.into_sorted_vec()
        .into_iter()
        .map(|Reverse(entry)| (entry.index, entry.score))
        .collect()
}
