// crates/mtd-design/src/split.rs

//! Split-point search and the left/right partition machinery.
//!
//! A split point `(i, j)` is a base pair dividing a complex's index range
//! into a left child `[0..i] ∪ [j..N)` and a right child `[i..j]`, both
//! inclusive of the split nucleotides. Eligibility demands flanking helix
//! padding on both sides and a minimum child size; probability-guided
//! decomposition additionally demands the padding pairs be plausible.

use crate::sequences::StrandView;
use mtd_core::sparse::SparseMatrix;
use mtd_core::structure::{PairList, Structure};
use serde::{Deserialize, Serialize};

/// A base pair used to partition a complex.
pub type SplitPoint = (usize, usize);

/// Do two split points lead to disjoint (mutually exclusive) ensembles?
/// Sharing an endpoint counts. Symmetric in its arguments.
#[must_use]
pub fn crosses(a: SplitPoint, b: SplitPoint) -> bool {
    let (i, j) = if a.0 <= a.1 { a } else { (a.1, a.0) };
    let (d, e) = if b.0 <= b.1 { b } else { (b.1, b.0) };
    if i == d && j == e {
        return false;
    }
    d == j || e == i || (i <= d && d < j && j <= e) || (d <= i && i < e && e <= j)
}

/// A candidate split annotated with its captured probability and child cost.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
pub struct ProbabilitySplit {
    /// 5' index of the pair.
    pub i: usize,
    /// 3' index of the pair.
    pub j: usize,
    /// Minimum pair probability across the helix padding window.
    pub prob: f64,
    /// `n_left³ + n_right³` evaluation cost proxy.
    pub cost: f64,
}

/// Are both children implied by `sp` at least `min_size` nucleotides?
#[must_use]
pub fn is_large_enough(sp: SplitPoint, n: usize, min_size: usize) -> bool {
    let (i, j) = sp;
    let left = (i + 1) + (n - j);
    let right = j - i + 1;
    left >= min_size && right >= min_size
}

/// Is position `i` at least `min_helix` nucleotides from both ends of its
/// strand? `bounds` is the nicks array with a leading 0.
#[must_use]
pub fn is_padded(i: usize, bounds: &[usize], min_helix: usize) -> bool {
    let i = i as i64;
    let h = min_helix as i64;
    bounds.windows(2).any(|w| i - h >= w[0] as i64 && i + h < w[1] as i64)
}

/// All positions far enough from their strand ends.
fn padded_positions(bounds: &[usize], min_helix: usize) -> Vec<usize> {
    let n = bounds.last().copied().unwrap_or(0);
    (0..n).filter(|&i| is_padded(i, bounds, min_helix)).collect()
}

/// Does `sp` meet the helix-padding and child-size requirements relative
/// to the target structure `s`?
#[must_use]
pub fn is_valid(sp: SplitPoint, s: &Structure, min_size: usize, min_helix: usize) -> bool {
    let (i, j) = sp;
    let n = s.len();
    let bounds = s.bounds();
    if !(is_padded(i, &bounds, min_helix)
        && is_padded(j, &bounds, min_helix)
        && is_large_enough(sp, n, min_size))
    {
        return false;
    }
    let h = min_helix as i64;
    (-h..=h).all(|r| {
        let a = (i as i64 - r) as usize;
        let b = (j as i64 + r) as usize;
        s.pair(a) == Some(b)
    })
}

/// Base pairs of the target structure that are valid split points.
#[must_use]
pub fn valid_split_points(s: &Structure, min_size: usize, min_helix: usize) -> Vec<SplitPoint> {
    let mut splits = Vec::new();
    s.for_each_pair(|i, j| {
        if is_valid((i, j), s, min_size, min_helix) {
            splits.push((i, j));
        }
    });
    splits
}

/// `n_left³ + n_right³` for a split of an `n`-nucleotide complex.
#[must_use]
pub fn children_cost(sp: SplitPoint, n: usize) -> f64 {
    let (i, j) = sp;
    let left = ((i + 1) + (n - j)) as f64;
    let right = (j - i + 1) as f64;
    left.powi(3) + right.powi(3)
}

/// Split points sorted cheapest children first.
#[must_use]
pub fn ascending_cost_splits(mut splits: Vec<SplitPoint>, n: usize) -> Vec<SplitPoint> {
    splits.sort_by(|&a, &b| {
        children_cost(a, n)
            .partial_cmp(&children_cost(b, n))
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.cmp(&b))
    });
    splits
}

/// Minimum plausible pair probability for a probability-guided split.
const MIN_SPLIT_PROB: f64 = 0.001;

/// Candidate splits for probability-guided decomposition: structure-derived
/// splits first (only when the node carries a target), free splits second.
/// Both lists come back sorted by descending captured probability.
#[must_use]
pub fn possible_splits(
    probs: &SparseMatrix,
    min_size: usize,
    min_helix: usize,
    s: &Structure,
) -> (Vec<ProbabilitySplit>, Vec<ProbabilitySplit>) {
    let n = probs.n();
    let h = min_helix as i64;
    let min_prob = |i: usize, j: usize| {
        (-h..=h)
            .map(|r| probs.get((i as i64 - r) as usize, (j as i64 + r) as usize))
            .fold(f64::INFINITY, f64::min)
    };

    let mut structure_splits = Vec::new();
    if s.has_pairs() {
        for sp in valid_split_points(s, min_size, min_helix) {
            structure_splits.push(ProbabilitySplit {
                i: sp.0,
                j: sp.1,
                prob: min_prob(sp.0, sp.1),
                cost: children_cost(sp, n),
            });
        }
    }

    let bounds = s.bounds();
    let valid_nucs = padded_positions(&bounds, min_helix);
    let mut probability_splits = Vec::new();
    for &i in &valid_nucs {
        for &j in &valid_nucs {
            let in_structure = s.has_pairs() && s.pair(i) == Some(j);
            if !in_structure && i < j && is_large_enough((i, j), n, min_size) {
                let p = min_prob(i, j);
                if p >= MIN_SPLIT_PROB {
                    probability_splits.push(ProbabilitySplit {
                        i,
                        j,
                        prob: p,
                        cost: children_cost((i, j), n),
                    });
                }
            }
        }
    }

    let by_prob = |a: &ProbabilitySplit, b: &ProbabilitySplit| {
        b.prob
            .partial_cmp(&a.prob)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then((a.i, a.j).cmp(&(b.i, b.j)))
    };
    structure_splits.sort_by(by_prob);
    probability_splits.sort_by(by_prob);
    (structure_splits, probability_splits)
}

/// Branch-and-bound over sets of mutually exclusive splits.
struct SetSearch<'a> {
    probability: &'a [ProbabilitySplit],
    f_split: f64,
    best_cost: f64,
    best: Vec<ProbabilitySplit>,
}

impl SetSearch<'_> {
    fn consider(&mut self, current: &[ProbabilitySplit], prob: f64, cost: f64) {
        if prob >= self.f_split && cost < self.best_cost {
            self.best_cost = cost;
            self.best = current.to_vec();
        }
    }

    fn extend(&mut self, current: &mut Vec<ProbabilitySplit>, from: usize, prob: f64, cost: f64) {
        if prob >= self.f_split {
            // A superset only costs more; stop here.
            self.consider(current, prob, cost);
            return;
        }
        for k in from..self.probability.len() {
            let cand = self.probability[k];
            if cost + cand.cost >= self.best_cost {
                continue;
            }
            if current.iter().all(|c| crosses((c.i, c.j), (cand.i, cand.j))) {
                current.push(cand);
                self.extend(current, k + 1, prob + cand.prob, cost + cand.cost);
                current.pop();
            }
        }
    }
}

/// The cheapest set of mutually exclusive split points capturing at least
/// `f_split` of the ensemble at a cost below the parent's `n³`. When the
/// node carries a target structure, exactly one split comes from the
/// structure list (and leads the set). Empty ⇔ the node cannot decompose.
#[must_use]
pub fn minimal_splits(
    probs: &SparseMatrix,
    f_split: f64,
    min_size: usize,
    min_helix: usize,
    s: &Structure,
) -> Vec<SplitPoint> {
    let (structure_splits, probability_splits) = possible_splits(probs, min_size, min_helix, s);
    let parent_cost = (probs.n() as f64).powi(3);

    let mut search = SetSearch {
        probability: &probability_splits,
        f_split,
        best_cost: parent_cost,
        best: Vec::new(),
    };

    if s.has_pairs() {
        // The first split must come from the target structure.
        for ss in &structure_splits {
            let mut current = vec![*ss];
            search.extend(&mut current, 0, ss.prob, ss.cost);
        }
    } else {
        let mut current = Vec::new();
        search.extend(&mut current, 0, 0.0, 0.0);
    }

    search.best.iter().map(|b| (b.i, b.j)).collect()
}

/// Map a parent index into the left child's index space.
#[inline]
#[must_use]
pub fn to_left(x: usize, sp: SplitPoint) -> usize {
    if x <= sp.0 {
        x
    } else {
        x - sp.1 + 1 + sp.0
    }
}

/// Map a parent index into the right child's index space.
#[inline]
#[must_use]
pub fn to_right(x: usize, sp: SplitPoint) -> usize {
    x - sp.0
}

fn on_left(x: usize, sp: SplitPoint) -> bool {
    x <= sp.0 || x >= sp.1
}

fn on_right(x: usize, sp: SplitPoint) -> bool {
    x >= sp.0 && x <= sp.1
}

/// Partition a structure at `sp` into the two child structures; pairs
/// crossing the split are dropped. Also works for degenerate structures
/// (nicks only).
#[must_use]
pub fn split_structure(sp: SplitPoint, s: &Structure) -> (Structure, Structure) {
    let (i, j) = sp;
    let n = s.len();
    let left_len = i + 1 + n - j;
    let right_len = j - i + 1;

    let mut left = Structure { pairs: PairList::default(), nicks: Vec::new() };
    let mut right = Structure { pairs: PairList::default(), nicks: Vec::new() };

    if s.has_pairs() {
        left.pairs = PairList::unpaired(left_len);
        right.pairs = PairList::unpaired(right_len);
        s.for_each_pair(|d, e| {
            if crosses((d, e), sp) {
                return; // incompatible with the split
            }
            if on_left(d, sp) && on_left(e, sp) {
                left.pairs.toggle_pair(to_left(d, sp), to_left(e, sp));
            }
            if on_right(d, sp) && on_right(e, sp) {
                right.pairs.toggle_pair(to_right(d, sp), to_right(e, sp));
            }
        });
    }

    for &nk in &s.nicks {
        if on_left(nk, sp) {
            left.nicks.push(to_left(nk, sp));
        }
        if on_right(nk, sp) {
            right.nicks.push(to_right(nk, sp));
        }
    }
    if !left.nicks.contains(&(i + 1)) {
        left.nicks.push(i + 1);
    }
    left.nicks.sort_unstable();
    if !right.nicks.contains(&right_len) {
        right.nicks.push(right_len);
    }
    right.nicks.sort_unstable();

    (left, right)
}

/// Partition the strand views at `sp`; both children include the split
/// nucleotides.
#[must_use]
pub fn split_sequence(sp: SplitPoint, seq: &[StrandView]) -> (Vec<StrandView>, Vec<StrandView>) {
    let (i, j) = sp;
    let mut left = Vec::new();
    let mut right = Vec::new();
    let mut begin;
    let mut end = 0usize; // exclusive running total
    for strand in seq {
        begin = end;
        end += strand.len();
        let last = end - 1;
        let si = |x: usize| x - begin; // strand-local index
        let on_strand = |x: usize| x >= begin && x <= last;

        if begin > j || last < i {
            left.push(strand.clone());
        } else if begin > i && last < j {
            right.push(strand.clone());
        } else if on_strand(i) && on_strand(j) {
            left.push(strand.slice(si(begin), si(i)));
            right.push(strand.slice(si(i), si(j)));
            left.push(strand.slice(si(j), si(last)));
        } else if on_strand(i) {
            left.push(strand.slice(si(begin), si(i)));
            right.push(strand.slice(si(i), si(last)));
        } else if on_strand(j) {
            right.push(strand.slice(si(begin), si(j)));
            left.push(strand.slice(si(j), si(last)));
        }
    }
    (left, right)
}

/// Partition the enforced pairs at `sp` into child index spaces, adding
/// the split point itself to both children.
#[must_use]
pub fn split_pairs(sp: SplitPoint, pairs: &[SplitPoint]) -> (Vec<SplitPoint>, Vec<SplitPoint>) {
    let (i, j) = sp;
    let mut left = Vec::new();
    let mut right = Vec::new();
    for &(d, e) in pairs {
        debug_assert!(!crosses((d, e), sp));
        if on_left(d, sp) && on_left(e, sp) {
            left.push((to_left(d, sp), to_left(e, sp)));
        } else {
            right.push((to_right(d, sp), to_right(e, sp)));
        }
    }
    left.push((to_left(i, sp), to_left(j, sp)));
    right.push((to_right(i, sp), to_right(j, sp)));
    (left, right)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sequences::DomainView;

    #[test]
    fn crossing_relation() {
        assert!(crosses((2, 10), (5, 12)));
        assert!(crosses((2, 10), (10, 14))); // shared endpoint counts
        assert!(!crosses((2, 10), (4, 8))); // nested
        assert!(!crosses((2, 10), (2, 10))); // identical
        assert!(!crosses((2, 10), (12, 14))); // disjoint
    }

    #[test]
    fn hairpin_split_validity() {
        // 24-nt hairpin with an 8-pair stem.
        let s = Structure::parse("((((((((........))))))))").unwrap();
        // Pair (3, 20) has three stacked pairs on each side.
        assert!(is_valid((3, 20), &s, 4, 2));
        // Pair (0, 23) has no outer padding.
        assert!(!is_valid((0, 23), &s, 4, 2));
        // Oversized child requirement rejects everything.
        assert!(valid_split_points(&s, 23, 2).is_empty());
    }

    #[test]
    fn huge_helix_requirement_keeps_single_leaf() {
        let s = Structure::parse("((((....))))").unwrap();
        assert!(valid_split_points(&s, 1, 10).is_empty());
    }

    #[test]
    fn structure_split_partitions_pairs_and_nicks() {
        let s = Structure::parse("((((((((........))))))))").unwrap();
        let (l, r) = split_structure((3, 20), &s);
        // Left keeps the outer stem; right keeps the inner stem + loop.
        assert_eq!(l.len(), 8);
        assert_eq!(r.len(), 18);
        assert_eq!(l.pair(0), Some(7));
        assert_eq!(l.pair(3), Some(4)); // split pair, adjacent across the cut
        assert_eq!(r.pair(0), Some(17)); // split pair at child ends
        assert_eq!(r.pair(4), Some(13));
        // Left child has a nick at the cut.
        assert!(l.nicks.contains(&4));
    }

    #[test]
    fn sequence_split_covers_all_indices() {
        let strand = StrandView::new(vec![DomainView::new(0, 24)]);
        let (l, r) = split_sequence((3, 20), &[strand]);
        let li: Vec<usize> = l.iter().flat_map(StrandView::to_indices).collect();
        let ri: Vec<usize> = r.iter().flat_map(StrandView::to_indices).collect();
        assert_eq!(li, vec![0, 1, 2, 3, 20, 21, 22, 23]);
        assert_eq!(ri, (3..=20).collect::<Vec<_>>());
    }

    #[test]
    fn enforced_pairs_follow_their_side() {
        let parent = vec![(1, 22)];
        let (l, r) = split_pairs((3, 20), &parent);
        assert_eq!(l, vec![(1, 6), (3, 4)]);
        assert_eq!(r, vec![(0, 17)]);
    }

    proptest::proptest! {
        #[test]
        fn crossing_is_symmetric(
            a in (0usize..30, 0usize..30),
            b in (0usize..30, 0usize..30),
        ) {
            proptest::prop_assert_eq!(crosses(a, b), crosses(b, a));
        }

        #[test]
        fn child_index_maps_partition_the_parent(i in 2usize..12, extra in 2usize..12) {
            let j = i + extra + 1;
            let n = j + 4;
            let sp = (i, j);
            // Every parent index lands in exactly the child(s) owning it,
            // and the split nucleotides land in both.
            for x in 0..n {
                let left = x <= i || x >= j;
                let right = x >= i && x <= j;
                proptest::prop_assert!(left || right);
                if left {
                    proptest::prop_assert!(to_left(x, sp) < (i + 1) + (n - j));
                }
                if right {
                    proptest::prop_assert!(to_right(x, sp) < j - i + 1);
                }
            }
        }
    }

    #[test]
    fn cheapest_split_is_most_balanced() {
        let s = Structure::parse("((((((((........))))))))").unwrap();
        let splits = valid_split_points(&s, 4, 2);
        assert!(!splits.is_empty());
        let ordered = ascending_cost_splits(splits, s.len());
        let costs: Vec<f64> =
            ordered.iter().map(|&sp| children_cost(sp, s.len())).collect();
        assert!(costs.windows(2).all(|w| w[0] <= w[1]));
    }
}
