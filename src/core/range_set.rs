//! Canonical sets of IP addresses
//!
//! Every address lives on one `u128` axis. IPv4 addresses are placed in the
//! IPv4-mapped block `::ffff:0:0/96`, so `10.0.0.0/8` and `2001:db8::/32` can
//! be stored, compared and combined in the same [`IpSet`].
//!
//! An [`IpSet`] is a sorted list of closed [`IpRange`]s with the invariant
//! `ranges[i].end + 1 < ranges[i + 1].start`: ranges never overlap and never
//! touch. All binary operations are single linear merges over the two sorted
//! lists and always produce that canonical form, so two sets are equal exactly
//! when they contain the same addresses.
//!
//! # Example
//!
//! ```
//! use fwunit::core::range_set::IpSet;
//!
//! let internal: IpSet = "192.168.1.0/24, 192.168.13.0/24".parse().unwrap();
//! let masters: IpSet = "192.168.13.45, 192.168.13.50".parse().unwrap();
//!
//! assert!(masters.is_subset(&internal));
//! assert_eq!(internal.difference(&masters).ranges().len(), 4);
//! ```

use crate::core::error::ConfigError;
use ipnetwork::IpNetwork;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::str::FromStr;

/// Position of an address on the shared IPv4/IPv6 axis
pub type Address = u128;

/// First address of `::ffff:0:0/96`, where IPv4 addresses are mapped
const V4_MAPPED_START: Address = 0xffff_0000_0000;
const V4_MAPPED_END: Address = 0xffff_ffff_ffff;

/// Converts an IP address to its position on the address axis.
pub fn to_address(ip: IpAddr) -> Address {
    match ip {
        IpAddr::V4(v4) => V4_MAPPED_START | Address::from(u32::from(v4)),
        IpAddr::V6(v6) => u128::from(v6),
    }
}

/// Converts an axis position back to an IP address.
///
/// Positions in the IPv4-mapped block come back as IPv4.
pub fn from_address(addr: Address) -> IpAddr {
    if (V4_MAPPED_START..=V4_MAPPED_END).contains(&addr) {
        IpAddr::V4(Ipv4Addr::from((addr - V4_MAPPED_START) as u32))
    } else {
        IpAddr::V6(Ipv6Addr::from(addr))
    }
}

/// A closed interval of addresses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct IpRange {
    start: Address,
    end: Address,
}

impl IpRange {
    /// The whole address axis
    pub const FULL: IpRange = IpRange {
        start: 0,
        end: Address::MAX,
    };

    /// Creates a range from its bounds.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidRange` if `start > end`. Bounds are never
    /// swapped silently.
    pub fn new(start: Address, end: Address) -> Result<Self, ConfigError> {
        if start > end {
            return Err(ConfigError::InvalidRange {
                start: from_address(start).to_string(),
                end: from_address(end).to_string(),
            });
        }
        Ok(Self { start, end })
    }

    /// Creates a range from bounds the caller has already ordered.
    pub(crate) fn from_sorted(start: Address, end: Address) -> Self {
        debug_assert!(start <= end, "inverted range bounds");
        Self { start, end }
    }

    /// Creates a range between two IP addresses (inclusive).
    pub fn from_ips(start: IpAddr, end: IpAddr) -> Result<Self, ConfigError> {
        Self::new(to_address(start), to_address(end))
    }

    pub fn single(ip: IpAddr) -> Self {
        let addr = to_address(ip);
        Self {
            start: addr,
            end: addr,
        }
    }

    /// Creates the range covered by a CIDR block. Host bits are ignored.
    pub fn from_network(net: IpNetwork) -> Self {
        let prefix = match net {
            IpNetwork::V4(v4) => u32::from(v4.prefix()) + 96,
            IpNetwork::V6(v6) => u32::from(v6.prefix()),
        };
        let mask = if prefix == 0 {
            0
        } else {
            Address::MAX << (128 - prefix)
        };
        let start = to_address(net.ip()) & mask;
        Self {
            start,
            end: start | !mask,
        }
    }

    pub const fn start(&self) -> Address {
        self.start
    }

    pub const fn end(&self) -> Address {
        self.end
    }

    pub const fn contains(&self, addr: Address) -> bool {
        self.start <= addr && addr <= self.end
    }

    /// Number of addresses, saturating at `u128::MAX` for the full axis
    pub const fn len(&self) -> u128 {
        (self.end - self.start).saturating_add(1)
    }

    /// Splits the range into the minimal list of CIDR blocks, as
    /// `(first address, prefix length on the 128-bit axis)`.
    pub fn cidr_blocks(&self) -> Vec<(Address, u32)> {
        let mut blocks = Vec::new();
        let mut start = self.start;
        loop {
            let align = if start == 0 { 128 } else { start.trailing_zeros() };
            let fit = match (self.end - start).checked_add(1) {
                Some(size) => 127 - size.leading_zeros(),
                None => 128,
            };
            let bits = align.min(fit);
            blocks.push((start, 128 - bits));

            if bits == 128 {
                break;
            }
            let last = start + ((1u128 << bits) - 1);
            if last >= self.end {
                break;
            }
            start = last + 1;
        }
        blocks
    }

    /// Returns the prefix length if this range is exactly one CIDR block.
    fn as_cidr(&self) -> Option<u32> {
        match self.cidr_blocks().as_slice() {
            [(_, prefix)] => Some(*prefix),
            _ => None,
        }
    }
}

impl fmt::Display for IpRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.start == self.end {
            return write!(f, "{}", from_address(self.start));
        }
        match (self.as_cidr(), from_address(self.start)) {
            (Some(prefix), IpAddr::V4(v4)) if prefix >= 96 => write!(f, "{v4}/{}", prefix - 96),
            (Some(prefix), IpAddr::V6(v6)) => write!(f, "{v6}/{prefix}"),
            _ => write!(
                f,
                "{}-{}",
                from_address(self.start),
                from_address(self.end)
            ),
        }
    }
}

impl FromStr for IpRange {
    type Err = ConfigError;

    /// Parses `a.b.c.d`, `a.b.c.d/n`, IPv6 equivalents, or `first-last`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if let Some((first, last)) = s.split_once('-') {
            let first = parse_ip(first)?;
            let last = parse_ip(last)?;
            return Self::from_ips(first, last);
        }
        let net: IpNetwork = s
            .parse()
            .map_err(|_| ConfigError::InvalidAddress(s.to_string()))?;
        Ok(Self::from_network(net))
    }
}

fn parse_ip(s: &str) -> Result<IpAddr, ConfigError> {
    s.trim()
        .parse()
        .map_err(|_| ConfigError::InvalidAddress(s.trim().to_string()))
}

/// A canonical set of addresses
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "Vec<String>", try_from = "Vec<String>")]
pub struct IpSet {
    ranges: Vec<IpRange>,
}

/// Appends `range` to a list sorted by start, merging with the last element
/// when they overlap or touch.
fn push_merged(out: &mut Vec<IpRange>, range: IpRange) {
    if let Some(last) = out.last_mut() {
        let touches = match last.end.checked_add(1) {
            Some(next) => range.start <= next,
            None => true,
        };
        if touches {
            last.end = last.end.max(range.end);
            return;
        }
    }
    out.push(range);
}

impl IpSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// The set of every address
    pub fn all() -> Self {
        Self {
            ranges: vec![IpRange::FULL],
        }
    }

    /// Builds a canonical set from ranges in any order.
    pub fn from_ranges(ranges: impl IntoIterator<Item = IpRange>) -> Self {
        let mut sorted: Vec<IpRange> = ranges.into_iter().collect();
        sorted.sort_unstable();
        let mut out = Vec::with_capacity(sorted.len());
        for range in sorted {
            push_merged(&mut out, range);
        }
        Self { ranges: out }
    }

    pub fn from_range(range: IpRange) -> Self {
        Self {
            ranges: vec![range],
        }
    }

    pub fn from_cidr(net: IpNetwork) -> Self {
        Self::from_range(IpRange::from_network(net))
    }

    /// # Errors
    ///
    /// Returns `ConfigError::InvalidRange` if `start > end`.
    pub fn from_bounds(start: IpAddr, end: IpAddr) -> Result<Self, ConfigError> {
        IpRange::from_ips(start, end).map(Self::from_range)
    }

    pub fn ranges(&self) -> &[IpRange] {
        &self.ranges
    }

    pub fn iter(&self) -> std::slice::Iter<'_, IpRange> {
        self.ranges.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    /// Returns `true` if the set covers the whole address axis.
    pub fn is_full(&self) -> bool {
        self.ranges.as_slice() == [IpRange::FULL]
    }

    /// Number of addresses, saturating at `u128::MAX`
    pub fn len(&self) -> u128 {
        self.ranges
            .iter()
            .fold(0u128, |acc, r| acc.saturating_add(r.len()))
    }

    pub fn contains(&self, addr: Address) -> bool {
        let idx = self.ranges.partition_point(|r| r.start <= addr);
        idx > 0 && self.ranges[idx - 1].end >= addr
    }

    pub fn contains_ip(&self, ip: IpAddr) -> bool {
        self.contains(to_address(ip))
    }

    pub fn union(&self, other: &IpSet) -> IpSet {
        let mut out = Vec::with_capacity(self.ranges.len() + other.ranges.len());
        let (mut a, mut b) = (self.ranges.iter().peekable(), other.ranges.iter().peekable());
        loop {
            let next = match (a.peek(), b.peek()) {
                (Some(x), Some(y)) if x.start <= y.start => a.next(),
                (Some(_), Some(_)) => b.next(),
                (Some(_), None) => a.next(),
                (None, Some(_)) => b.next(),
                (None, None) => break,
            };
            if let Some(range) = next {
                push_merged(&mut out, *range);
            }
        }
        IpSet { ranges: out }
    }

    pub fn intersection(&self, other: &IpSet) -> IpSet {
        let mut out = Vec::new();
        let (mut i, mut j) = (0, 0);
        while i < self.ranges.len() && j < other.ranges.len() {
            let (a, b) = (self.ranges[i], other.ranges[j]);
            let start = a.start.max(b.start);
            let end = a.end.min(b.end);
            if start <= end {
                out.push(IpRange { start, end });
            }
            if a.end < b.end {
                i += 1;
            } else {
                j += 1;
            }
        }
        IpSet { ranges: out }
    }

    pub fn difference(&self, other: &IpSet) -> IpSet {
        let mut out = Vec::new();
        let mut j = 0;
        for range in &self.ranges {
            while j < other.ranges.len() && other.ranges[j].end < range.start {
                j += 1;
            }
            let mut start = range.start;
            let mut remaining = true;
            let mut k = j;
            while k < other.ranges.len() && other.ranges[k].start <= range.end {
                let cut = other.ranges[k];
                if cut.start > start {
                    out.push(IpRange {
                        start,
                        end: cut.start - 1,
                    });
                }
                match cut.end.checked_add(1) {
                    Some(next) if next <= range.end => start = next,
                    _ => {
                        remaining = false;
                        break;
                    }
                }
                k += 1;
            }
            if remaining {
                out.push(IpRange {
                    start,
                    end: range.end,
                });
            }
        }
        IpSet { ranges: out }
    }

    pub fn complement(&self) -> IpSet {
        IpSet::all().difference(self)
    }

    pub fn is_subset(&self, other: &IpSet) -> bool {
        self.difference(other).is_empty()
    }

    pub fn overlaps(&self, other: &IpSet) -> bool {
        let (mut i, mut j) = (0, 0);
        while i < self.ranges.len() && j < other.ranges.len() {
            let (a, b) = (self.ranges[i], other.ranges[j]);
            if a.start <= b.end && b.start <= a.end {
                return true;
            }
            if a.end < b.end {
                i += 1;
            } else {
                j += 1;
            }
        }
        false
    }
}

impl From<IpRange> for IpSet {
    fn from(range: IpRange) -> Self {
        Self::from_range(range)
    }
}

impl From<IpNetwork> for IpSet {
    fn from(net: IpNetwork) -> Self {
        Self::from_cidr(net)
    }
}

impl From<IpAddr> for IpSet {
    fn from(ip: IpAddr) -> Self {
        Self::from_range(IpRange::single(ip))
    }
}

impl FromIterator<IpRange> for IpSet {
    fn from_iter<T: IntoIterator<Item = IpRange>>(iter: T) -> Self {
        Self::from_ranges(iter)
    }
}

impl<'a> IntoIterator for &'a IpSet {
    type Item = &'a IpRange;
    type IntoIter = std::slice::Iter<'a, IpRange>;

    fn into_iter(self) -> Self::IntoIter {
        self.ranges.iter()
    }
}

impl fmt::Display for IpSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.ranges.is_empty() {
            return write!(f, "<empty>");
        }
        for (i, range) in self.ranges.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{range}")?;
        }
        Ok(())
    }
}

impl FromStr for IpSet {
    type Err = ConfigError;

    /// Parses a comma and/or whitespace separated list of addresses, CIDR
    /// blocks and `first-last` spans. An empty string is the empty set.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.split(|c: char| c == ',' || c.is_whitespace())
            .filter(|tok| !tok.is_empty())
            .map(str::parse::<IpRange>)
            .collect::<Result<Vec<_>, _>>()
            .map(Self::from_ranges)
    }
}

impl From<IpSet> for Vec<String> {
    fn from(set: IpSet) -> Self {
        set.ranges.iter().map(ToString::to_string).collect()
    }
}

impl TryFrom<Vec<String>> for IpSet {
    type Error = ConfigError;

    fn try_from(items: Vec<String>) -> Result<Self, Self::Error> {
        items
            .iter()
            .map(|s| s.parse::<IpRange>())
            .collect::<Result<Vec<_>, _>>()
            .map(Self::from_ranges)
    }
}
