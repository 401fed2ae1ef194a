//! One-to-one correspondence bookkeeping with best-wins conflict resolution.

/// Injective map from source indices to target indices.
///
/// A target already claimed can only be reclaimed by a strictly lower
/// distance; the previous source then reverts to unmatched.
#[derive(Debug, Clone)]
pub struct Assignment {
    src_to_dst: Vec<Option<usize>>,
    dst_to_src: Vec<Option<(usize, u32)>>,
}

impl Assignment {
    pub fn new(n_src: usize, n_dst: usize) -> Self {
        Self {
            src_to_dst: vec![None; n_src],
            dst_to_src: vec![None; n_dst],
        }
    }

    /// Try to assign `dst` to `src`. Returns true if the claim was accepted.
    pub fn claim(&mut self, src: usize, dst: usize, distance: u32) -> bool {
        if let Some((holder, held)) = self.dst_to_src[dst] {
            if held <= distance {
                return false;
            }
            self.src_to_dst[holder] = None;
        }
        if let Some(old_dst) = self.src_to_dst[src].take() {
            self.dst_to_src[old_dst] = None;
        }
        self.src_to_dst[src] = Some(dst);
        self.dst_to_src[dst] = Some((src, distance));
        true
    }

    /// Drop the match of `src`, if any.
    pub fn release(&mut self, src: usize) {
        if let Some(dst) = self.src_to_dst[src].take() {
            self.dst_to_src[dst] = None;
        }
    }

    pub fn target_of(&self, src: usize) -> Option<usize> {
        self.src_to_dst[src]
    }

    /// Distance with which `dst` is currently held.
    pub fn held_distance(&self, dst: usize) -> Option<u32> {
        self.dst_to_src[dst].map(|(_, d)| d)
    }

    pub fn num_matches(&self) -> usize {
        self.src_to_dst.iter().filter(|m| m.is_some()).count()
    }

    /// Current (src, dst) pairs in source order.
    pub fn pairs(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        self.src_to_dst
            .iter()
            .enumerate()
            .filter_map(|(src, dst)| dst.map(|d| (src, d)))
    }

    pub fn into_matches(self) -> Vec<Option<usize>> {
        self.src_to_dst
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use std::collections::HashSet;

    #[test]
    fn test_reclaim_needs_strictly_lower_distance() {
        let mut a = Assignment::new(3, 2);
        assert!(a.claim(0, 1, 40));
        assert!(!a.claim(1, 1, 40));
        assert!(a.claim(2, 1, 10));
        assert_eq!(a.target_of(0), None);
        assert_eq!(a.target_of(2), Some(1));
        assert_eq!(a.held_distance(1), Some(10));
        assert_eq!(a.num_matches(), 1);
    }

    #[test]
    fn test_moving_source_frees_old_target() {
        let mut a = Assignment::new(1, 3);
        a.claim(0, 0, 20);
        a.claim(0, 2, 30);
        assert_eq!(a.held_distance(0), None);
        assert!(a.claim(0, 0, 25));
        a.release(0);
        assert_eq!(a.num_matches(), 0);
    }

    #[test]
    fn test_random_claims_stay_injective() {
        let mut rng = StdRng::seed_from_u64(42);
        let mut a = Assignment::new(200, 50);
        for _ in 0..2000 {
            a.claim(rng.gen_range(0..200), rng.gen_range(0..50), rng.gen_range(0..256));
        }

        let mut seen = HashSet::new();
        for (src, dst) in a.pairs() {
            assert!(seen.insert(dst), "target {} claimed twice", dst);
            assert_eq!(a.target_of(src), Some(dst));
        }
        assert_eq!(seen.len(), a.num_matches());
    }
}
