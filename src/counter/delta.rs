use crate::counter::{rank_successors, Countable, NGramTrie};

/// Read view of shared base counts with a signed per-runner delta applied on top.
///
/// The base is never mutated; forgetting a file records negative counts in the delta and
/// learning it again cancels them out.
pub struct Overlay<'a, B: Countable + ?Sized> {
    base: &'a B,
    delta: &'a NGramTrie,
}

impl<'a, B: Countable + ?Sized> Overlay<'a, B> {
    pub fn new(base: &'a B, delta: &'a NGramTrie) -> Self {
        Self { base, delta }
    }
}

fn apply(base: u64, delta: i64) -> u64 {
    (base as i64).saturating_add(delta).max(0) as u64
}

impl<'a, B: Countable + ?Sized> Countable for Overlay<'a, B> {
    fn counts(&self, gram: &[u32]) -> [u64; 2] {
        let [count, context_count] = self.base.counts(gram);
        let [d_count, d_context_count] = self.delta.raw_counts(gram);
        [apply(count, d_count), apply(context_count, d_context_count)]
    }

    fn successors(&self, context: &[u32], limit: usize) -> Vec<(u32, u64)> {
        let changed = self.delta.raw_successors(context);
        if changed.is_empty() {
            return self.base.successors(context, limit);
        }

        // At most `changed.len()` base entries can drop out of the top, so the base top
        // `limit + changed.len()` holds every unchanged successor that can still rank.
        let mut successors = self.base.successors(context, limit + changed.len());
        for (token, delta) in changed {
            match successors.iter_mut().find(|(t, _)| *t == token) {
                Some(entry) => entry.1 = apply(entry.1, delta),
                None => {
                    let mut gram = context.to_vec();
                    gram.push(token);
                    successors.push((token, apply(self.base.counts(&gram)[0], delta)));
                }
            }
        }
        successors.retain(|&(_, count)| count > 0);
        rank_successors(&mut successors, limit);
        successors
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overlay_hides_forgotten_file() {
        let mut base = NGramTrie::new(3);
        base.learn(&[1, 2, 3]);
        base.learn(&[1, 2, 4]);

        let mut delta = NGramTrie::new(3);
        delta.forget(&[1, 2, 4]);
        let overlay = Overlay::new(&base, &delta);

        let mut expected = NGramTrie::new(3);
        expected.learn(&[1, 2, 3]);
        let grams: [&[u32]; 6] = [&[1], &[1, 2], &[1, 2, 3], &[1, 2, 4], &[2, 4], &[]];
        for gram in grams {
            assert_eq!(overlay.counts(gram), expected.counts(gram), "{:?}", gram);
        }
        assert_eq!(overlay.successors(&[1, 2], 10), vec![(3, 1)]);
        assert_eq!(overlay.total(), 3);
    }

    #[test]
    fn test_overlay_adds_new_successors() {
        let mut base = NGramTrie::new(2);
        base.learn(&[1, 2, 1, 2, 1, 3]);

        let mut delta = NGramTrie::new(2);
        delta.learn(&[1, 5, 1, 5, 1, 5]);
        let overlay = Overlay::new(&base, &delta);
        assert_eq!(overlay.successors(&[1], 2), vec![(5, 3), (2, 2)]);
        assert_eq!(overlay.counts(&[1, 5]), [3, 6]);
    }
}
