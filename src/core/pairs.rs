//! Relations between source and destination address sets
//!
//! An [`IpPair`] is a rectangle: every source in `src` paired with every
//! destination in `dst`. [`IpPairs`] is a disjoint union of rectangles kept in
//! a canonical form:
//!
//! - source sets of different rectangles never overlap
//! - destination sets of different rectangles are never equal
//! - no rectangle is empty
//! - rectangles are sorted by source set
//!
//! Every source address therefore maps to at most one destination set, and the
//! canonical form is a function of the covered point set alone. Two `IpPairs`
//! covering the same `(src, dst)` points compare equal no matter how they
//! were built.
//!
//! Set operations never enumerate addresses. The source axis is cut at every
//! range boundary of both operands, each elementary source interval is looked
//! up in both operands (at most one rectangle each), the operation is applied
//! to the two destination sets, and intervals that end up with the same
//! destination set are merged back into one rectangle.

use crate::core::range_set::{Address, IpRange, IpSet};
use std::collections::BTreeMap;
use std::fmt;

/// A rectangle of `(source, destination)` pairs
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct IpPair {
    pub src: IpSet,
    pub dst: IpSet,
}

impl IpPair {
    pub fn new(src: IpSet, dst: IpSet) -> Self {
        Self { src, dst }
    }

    pub fn is_empty(&self) -> bool {
        self.src.is_empty() || self.dst.is_empty()
    }
}

impl fmt::Display for IpPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}", self.src, self.dst)
    }
}

/// A canonical disjoint union of [`IpPair`] rectangles
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct IpPairs {
    pairs: Vec<IpPair>,
}

/// Source ranges of every rectangle, sorted, with the owning rectangle index
struct SourceIndex {
    ranges: Vec<(IpRange, usize)>,
}

impl SourceIndex {
    fn new(pairs: &[IpPair]) -> Self {
        let mut ranges: Vec<(IpRange, usize)> = pairs
            .iter()
            .enumerate()
            .flat_map(|(i, p)| p.src.iter().map(move |r| (*r, i)))
            .collect();
        ranges.sort_unstable();
        Self { ranges }
    }

    fn lookup(&self, addr: Address) -> Option<usize> {
        let idx = self.ranges.partition_point(|(r, _)| r.start() <= addr);
        if idx == 0 {
            return None;
        }
        let (range, owner) = self.ranges[idx - 1];
        range.contains(addr).then_some(owner)
    }
}

impl IpPairs {
    pub fn new() -> Self {
        Self::default()
    }

    /// The single rectangle `src × dst` (empty if either side is empty).
    pub fn from_pair(src: IpSet, dst: IpSet) -> Self {
        if src.is_empty() || dst.is_empty() {
            return Self::new();
        }
        Self {
            pairs: vec![IpPair { src, dst }],
        }
    }

    /// Every `(src, dst)` pair on the address axis
    pub fn all() -> Self {
        Self::from_pair(IpSet::all(), IpSet::all())
    }

    /// Union of arbitrary, possibly overlapping rectangles.
    pub fn from_pairs(pairs: impl IntoIterator<Item = IpPair>) -> Self {
        pairs.into_iter().fold(Self::new(), |acc, p| {
            acc.union(&Self::from_pair(p.src, p.dst))
        })
    }

    pub fn pairs(&self) -> &[IpPair] {
        &self.pairs
    }

    pub fn iter(&self) -> std::slice::Iter<'_, IpPair> {
        self.pairs.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    pub fn contains(&self, src: Address, dst: Address) -> bool {
        self.pairs
            .iter()
            .find(|p| p.src.contains(src))
            .is_some_and(|p| p.dst.contains(dst))
    }

    pub fn union(&self, other: &IpPairs) -> IpPairs {
        if self.is_empty() {
            return other.clone();
        }
        if other.is_empty() {
            return self.clone();
        }
        self.combine(other, IpSet::union)
    }

    pub fn intersection(&self, other: &IpPairs) -> IpPairs {
        if self.is_empty() || other.is_empty() {
            return IpPairs::new();
        }
        self.combine(other, IpSet::intersection)
    }

    pub fn difference(&self, other: &IpPairs) -> IpPairs {
        if self.is_empty() || other.is_empty() {
            return self.clone();
        }
        self.combine(other, IpSet::difference)
    }

    pub fn is_subset(&self, other: &IpPairs) -> bool {
        self.difference(other).is_empty()
    }

    pub fn overlaps(&self, other: &IpPairs) -> bool {
        !self.intersection(other).is_empty()
    }

    /// Restricts the relation to `src × dst`.
    pub fn restrict(&self, src: &IpSet, dst: &IpSet) -> IpPairs {
        self.intersection(&IpPairs::from_pair(src.clone(), dst.clone()))
    }

    /// All sources that appear in at least one pair
    pub fn project_src(&self) -> IpSet {
        self.pairs
            .iter()
            .flat_map(|p| p.src.iter().copied())
            .collect()
    }

    /// All destinations that appear in at least one pair
    pub fn project_dst(&self) -> IpSet {
        self.pairs
            .iter()
            .fold(IpSet::new(), |acc, p| acc.union(&p.dst))
    }

    /// Splits the relation into elementary cells: the grid induced by every
    /// source and destination boundary, keeping only covered cells.
    pub fn to_cells(&self) -> Vec<(IpRange, IpRange)> {
        let mut dst_cuts: Vec<Address> = self
            .pairs
            .iter()
            .flat_map(|p| p.dst.iter())
            .flat_map(|r| [Some(r.start()), r.end().checked_add(1)])
            .flatten()
            .collect();
        dst_cuts.sort_unstable();
        dst_cuts.dedup();

        let mut cells = Vec::new();
        for pair in &self.pairs {
            for dst in &pair.dst {
                let first = dst_cuts.partition_point(|c| *c < dst.start());
                let mut start = dst.start();
                for cut in &dst_cuts[first + 1..] {
                    if *cut > dst.end() {
                        break;
                    }
                    for src in &pair.src {
                        cells.push((*src, IpRange::from_sorted(start, cut - 1)));
                    }
                    start = *cut;
                }
                for src in &pair.src {
                    cells.push((*src, IpRange::from_sorted(start, dst.end())));
                }
            }
        }
        cells
    }

    /// Rebuilds a canonical relation from cells.
    pub fn from_cells(cells: impl IntoIterator<Item = (IpRange, IpRange)>) -> Self {
        Self::from_pairs(
            cells
                .into_iter()
                .map(|(s, d)| IpPair::new(IpSet::from_range(s), IpSet::from_range(d))),
        )
    }

    fn combine(&self, other: &IpPairs, op: impl Fn(&IpSet, &IpSet) -> IpSet) -> IpPairs {
        let mut cuts: Vec<Address> = self
            .pairs
            .iter()
            .chain(other.pairs.iter())
            .flat_map(|p| p.src.iter())
            .flat_map(|r| [Some(r.start()), r.end().checked_add(1)])
            .flatten()
            .collect();
        cuts.sort_unstable();
        cuts.dedup();

        let left = SourceIndex::new(&self.pairs);
        let right = SourceIndex::new(&other.pairs);
        let empty = IpSet::new();

        let mut groups: BTreeMap<IpSet, Vec<IpRange>> = BTreeMap::new();
        for (i, start) in cuts.iter().copied().enumerate() {
            let a = left.lookup(start).map(|idx| &self.pairs[idx].dst);
            let b = right.lookup(start).map(|idx| &other.pairs[idx].dst);
            if a.is_none() && b.is_none() {
                continue;
            }
            let dst = op(a.unwrap_or(&empty), b.unwrap_or(&empty));
            if dst.is_empty() {
                continue;
            }
            let end = cuts.get(i + 1).map_or(Address::MAX, |next| next - 1);
            groups.entry(dst).or_default().push(IpRange::from_sorted(start, end));
        }

        let mut pairs: Vec<IpPair> = groups
            .into_iter()
            .map(|(dst, srcs)| IpPair {
                src: IpSet::from_ranges(srcs),
                dst,
            })
            .collect();
        pairs.sort_unstable();
        IpPairs { pairs }
    }
}

impl<'a> IntoIterator for &'a IpPairs {
    type Item = &'a IpPair;
    type IntoIter = std::slice::Iter<'a, IpPair>;

    fn into_iter(self) -> Self::IntoIter {
        self.pairs.iter()
    }
}

impl fmt::Display for IpPairs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.pairs.is_empty() {
            return write!(f, "<empty>");
        }
        for (i, pair) in self.pairs.iter().enumerate() {
            if i > 0 {
                write!(f, "; ")?;
            }
            write!(f, "{pair}")?;
        }
        Ok(())
    }
}
