// crates/mtd-core/src/structure.rs

//! Secondary structures: pair lists with embedded strand breaks.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Unpaired marker inside a [`PairList`].
pub const UNPAIRED: i64 = -1;

/// For a flattened complex of length `N`, `p[i] = j` iff `i` pairs `j`
/// (symmetric) and `p[i] = -1` iff `i` is unpaired. Pairings are
/// non-crossing at the level of a single connected node.
#[derive(Clone, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct PairList(pub Vec<i64>);

impl PairList {
    /// An all-unpaired list of the given length.
    #[must_use]
    pub fn unpaired(n: usize) -> Self {
        Self(vec![UNPAIRED; n])
    }

    /// Number of positions.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// True iff the list is empty.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Partner of `i`, if any.
    #[inline]
    #[must_use]
    pub fn pair(&self, i: usize) -> Option<usize> {
        let j = self.0[i];
        (j >= 0).then_some(j as usize)
    }

    /// Set (or clear, by re-setting) the pair `i`–`j`.
    pub fn toggle_pair(&mut self, i: usize, j: usize) {
        if self.0[i] == j as i64 {
            self.0[i] = UNPAIRED;
            self.0[j] = UNPAIRED;
        } else {
            self.0[i] = j as i64;
            self.0[j] = i as i64;
        }
    }

    /// Visit each pair once with `i < j`.
    pub fn for_each_pair(&self, mut f: impl FnMut(usize, usize)) {
        for (i, &j) in self.0.iter().enumerate() {
            if j >= 0 && i < j as usize {
                f(i, j as usize);
            }
        }
    }

    /// All pairs `(i, j)` with `i < j`.
    #[must_use]
    pub fn pairs(&self) -> Vec<(usize, usize)> {
        let mut out = Vec::new();
        self.for_each_pair(|i, j| out.push((i, j)));
        out
    }

    /// Symmetry check: `p[p[i]] == i` for every paired position.
    #[must_use]
    pub fn is_symmetric(&self) -> bool {
        self.0.iter().enumerate().all(|(i, &j)| {
            j < 0 || (j as usize) < self.0.len() && self.0[j as usize] == i as i64
        })
    }
}

/// Strand-end offsets for a flattened complex; strictly increasing, last
/// entry equals the total length.
pub type Nicks = Vec<usize>;

/// A secondary structure: a [`PairList`] plus the nick offsets partitioning
/// it into strands. A structure with an empty pair list but valid nicks is
/// "degenerate": it carries strand geometry only (used for off-targets
/// without a target structure).
#[derive(Clone, Default, PartialEq, Eq, Hash)]
pub struct Structure {
    /// Pairing state of the flattened complex (may be empty for degenerate
    /// structures).
    pub pairs: PairList,
    /// Strand-end offsets; the last entry is the flattened length.
    pub nicks: Nicks,
}

impl Structure {
    /// A degenerate (pair-free) structure over strands of the given lengths.
    #[must_use]
    pub fn unstructured(strand_lengths: &[usize]) -> Self {
        let mut nicks = Vec::with_capacity(strand_lengths.len());
        let mut total = 0;
        for &l in strand_lengths {
            total += l;
            nicks.push(total);
        }
        Self { pairs: PairList::default(), nicks }
    }

    /// Parse dot-paren notation with `+` strand separators, e.g.
    /// `"((((....))))"` or `"((((+))))"`.
    pub fn parse(s: &str) -> anyhow::Result<Self> {
        let mut nicks = Vec::new();
        let mut stack = Vec::new();
        let mut values = Vec::new();
        for c in s.chars() {
            match c {
                '(' => {
                    stack.push(values.len());
                    values.push(UNPAIRED);
                }
                ')' => {
                    let i = stack
                        .pop()
                        .ok_or_else(|| anyhow::anyhow!("unbalanced ')' in structure {s:?}"))?;
                    let j = values.len();
                    values.push(i as i64);
                    values[i] = j as i64;
                }
                '.' => values.push(UNPAIRED),
                '+' => nicks.push(values.len()),
                c if c.is_whitespace() => {}
                other => anyhow::bail!("unexpected character {other:?} in structure {s:?}"),
            }
        }
        if !stack.is_empty() {
            anyhow::bail!("unbalanced '(' in structure {s:?}");
        }
        nicks.push(values.len());
        Ok(Self { pairs: PairList(values), nicks })
    }

    /// Target structure of a perfect duplex: `l` bases paired to their
    /// mirror across a single nick.
    #[must_use]
    pub fn duplex(l: usize) -> Self {
        let n = 2 * l;
        let mut pairs = PairList::unpaired(n);
        for i in 0..l {
            pairs.toggle_pair(i, n - 1 - i);
        }
        Self { pairs, nicks: vec![l, n] }
    }

    /// Flattened length.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.nicks.last().copied().unwrap_or(0)
    }

    /// True iff the structure covers no nucleotides.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// True iff this carries an actual pair list (not just nicks).
    #[inline]
    #[must_use]
    pub fn has_pairs(&self) -> bool {
        !self.pairs.is_empty()
    }

    /// Number of strands.
    #[inline]
    #[must_use]
    pub fn n_strands(&self) -> usize {
        self.nicks.len()
    }

    /// Length of strand `i`.
    #[must_use]
    pub fn strand_length(&self, i: usize) -> usize {
        if i == 0 {
            self.nicks[0]
        } else {
            self.nicks[i] - self.nicks[i - 1]
        }
    }

    /// Strand bounds with a leading 0: `[0, nick_0, ..., N]`.
    #[must_use]
    pub fn bounds(&self) -> Vec<usize> {
        let mut b = Vec::with_capacity(self.nicks.len() + 1);
        b.push(0);
        b.extend_from_slice(&self.nicks);
        b
    }

    /// Partner of `i`, if paired in the target.
    #[inline]
    #[must_use]
    pub fn pair(&self, i: usize) -> Option<usize> {
        if self.has_pairs() {
            self.pairs.pair(i)
        } else {
            None
        }
    }

    /// Visit each target pair once with `i < j`.
    pub fn for_each_pair(&self, f: impl FnMut(usize, usize)) {
        self.pairs.for_each_pair(f);
    }

    /// Rotate the strand order by `k` strands, remapping pair indices.
    #[must_use]
    pub fn rotate(&self, k: usize) -> Self {
        let m = self.n_strands();
        if m == 0 {
            return self.clone();
        }
        let k = k % m;
        if k == 0 {
            return self.clone();
        }
        let n = self.len();
        let offset = self.nicks[k - 1];
        let remap = |i: usize| (i + n - offset) % n;

        let mut lengths: Vec<usize> = (0..m).map(|i| self.strand_length(i)).collect();
        lengths.rotate_left(k);
        let mut rotated = Self::unstructured(&lengths);
        if self.has_pairs() {
            rotated.pairs = PairList::unpaired(n);
            self.for_each_pair(|i, j| rotated.pairs.toggle_pair(remap(i), remap(j)));
        }
        rotated
    }

    /// Order of the rotational symmetry group of this structure (rotations
    /// by whole strands that map the pair list onto itself).
    #[must_use]
    pub fn symmetry(&self) -> usize {
        let m = self.n_strands();
        (1..=m).filter(|&k| m % k == 0 && self.rotate(k) == *self).count()
    }

    /// Dot-paren rendering with `+` at nicks.
    #[must_use]
    pub fn dp(&self) -> String {
        let n = self.len();
        let mut out = String::with_capacity(n + self.n_strands());
        for i in 0..n {
            match self.pair(i) {
                Some(j) if i < j => out.push('('),
                Some(_) => out.push(')'),
                None => out.push('.'),
            }
            if self.nicks.contains(&(i + 1)) && i + 1 < n {
                out.push('+');
            }
        }
        out
    }
}

impl fmt::Display for Structure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.dp())
    }
}

impl fmt::Debug for Structure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Structure(\"{}\")", self.dp())
    }
}

impl Serialize for Structure {
    fn serialize<S: serde::Serializer>(&self, ser: S) -> Result<S::Ok, S::Error> {
        // Human-readable dot-paren plus the nicks keeps degenerate
        // structures (no pairs) serializable too.
        #[derive(Serialize)]
        struct Repr<'a> {
            dp: String,
            nicks: &'a [usize],
            has_pairs: bool,
        }
        Repr { dp: self.dp(), nicks: &self.nicks, has_pairs: self.has_pairs() }.serialize(ser)
    }
}

impl<'de> Deserialize<'de> for Structure {
    fn deserialize<D: serde::Deserializer<'de>>(de: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        struct Repr {
            dp: String,
            nicks: Vec<usize>,
            has_pairs: bool,
        }
        let r = Repr::deserialize(de)?;
        let mut s = Structure::parse(&r.dp).map_err(serde::de::Error::custom)?;
        s.nicks = r.nicks;
        if !r.has_pairs {
            s.pairs = PairList::default();
        }
        Ok(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_and_print_round_trip() {
        for s in ["((((....))))", "((((+))))", "..((..))..", "(((...)))+...."] {
            let st = Structure::parse(s).unwrap();
            assert_eq!(st.dp(), s);
            assert!(st.pairs.is_symmetric());
        }
    }

    #[test]
    fn hairpin_pairs() {
        let st = Structure::parse("((((....))))").unwrap();
        assert_eq!(st.pair(0), Some(11));
        assert_eq!(st.pair(3), Some(8));
        assert_eq!(st.pair(4), None);
        assert_eq!(st.n_strands(), 1);
    }

    #[test]
    fn rotation_preserves_pairs() {
        let st = Structure::parse("((((+))))").unwrap();
        let rot = st.rotate(1);
        assert_eq!(rot.dp(), "((((+))))");
        assert_eq!(st.symmetry(), 2);

        let asym = Structure::parse("(((...)))+....").unwrap();
        assert_eq!(asym.symmetry(), 1);
    }

    #[test]
    fn duplex_structure() {
        let d = Structure::duplex(4);
        assert_eq!(d.dp(), "((((+))))");
    }

    #[test]
    fn degenerate_structure_keeps_nicks() {
        let st = Structure::unstructured(&[5, 3]);
        assert!(!st.has_pairs());
        assert_eq!(st.len(), 8);
        assert_eq!(st.nicks, vec![5, 8]);
    }
}
