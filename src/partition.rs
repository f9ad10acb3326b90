//! Fragment partitioning across ranks.
//!
//! Every rank computes its own share of the fragments from `(F, P, R)` alone, so no assignment is
//! ever exchanged. A datacube lists its fragments as a compact id-set string such as `1:4;7;9:10`
//! (`:` joins the bounds of an inclusive range, `;` separates entries).

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Share of the ordered fragment-id sequence owned by a rank.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct FragmentAssignment {
    pub rank: usize,
    /// Offset of the first owned fragment in the ordered sequence
    pub offset: usize,
    /// Number of owned fragments
    pub count: usize,
}

impl FragmentAssignment {
    pub fn range(&self) -> std::ops::Range<usize> {
        self.offset..self.offset + self.count
    }
}

/// Assign a contiguous run of `total` fragments to `rank` out of `ranks`.
///
/// The first `total % ranks` ranks get one extra fragment.
///
/// # Arguments
///
/// * `total`: Number of fragments
/// * `ranks`: Number of ranks, at least one
/// * `rank`: Rank to compute the assignment for
pub fn partition(total: usize, ranks: usize, rank: usize) -> FragmentAssignment {
    debug_assert!(ranks > 0 && rank < ranks);
    let base = total / ranks;
    let rem = total % ranks;
    let count = if rank < rem { base + 1 } else { base };
    let offset = rank * base + rank.min(rem);
    FragmentAssignment {
        rank,
        offset,
        count,
    }
}

/// Fragment-id set parse error
#[derive(Debug, Error, Eq, PartialEq)]
pub enum FragmentIdSetError {
    #[error("invalid fragment id {0:?}")]
    InvalidId(String),

    #[error("invalid fragment id range {0:?}")]
    InvalidRange(String),
}

/// Ordered set of fragment ids, stored as inclusive ranges.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct FragmentIdSet {
    ranges: Vec<(i64, i64)>,
    len: usize,
}

/// Number of ids in the inclusive range `start..=end`, if it fits in a `usize`.
fn range_len(start: i64, end: i64) -> Option<usize> {
    let diff = end.checked_sub(start)?;
    usize::try_from(diff).ok()?.checked_add(1)
}

impl FragmentIdSet {
    /// Return an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of fragment ids.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    /// Fragment ids in order.
    pub fn ids(&self) -> impl Iterator<Item = i64> + '_ {
        self.ranges.iter().flat_map(|&(start, end)| start..=end)
    }

    /// Fragment ids owned by an assignment.
    pub fn assigned(&self, assignment: &FragmentAssignment) -> Vec<i64> {
        self.ids()
            .skip(assignment.offset)
            .take(assignment.count)
            .collect()
    }
}

impl std::str::FromStr for FragmentIdSet {
    type Err = FragmentIdSetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parse_id = |id: &str| {
            id.trim()
                .parse::<i64>()
                .map_err(|_| FragmentIdSetError::InvalidId(id.to_string()))
        };
        let mut ranges = vec![];
        let mut len: usize = 0;
        for entry in s.split(';').filter(|entry| !entry.trim().is_empty()) {
            let (start, end) = match entry.split_once(':') {
                Some((start, end)) => (parse_id(start)?, parse_id(end)?),
                None => {
                    let id = parse_id(entry)?;
                    (id, id)
                }
            };
            len = range_len(start, end)
                .and_then(|count| len.checked_add(count))
                .ok_or_else(|| FragmentIdSetError::InvalidRange(entry.to_string()))?;
            ranges.push((start, end));
        }
        Ok(Self { ranges, len })
    }
}

impl std::fmt::Display for FragmentIdSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (i, (start, end)) in self.ranges.iter().enumerate() {
            if i > 0 {
                write!(f, ";")?;
            }
            if start == end {
                write!(f, "{start}")?;
            } else {
                write!(f, "{start}:{end}")?;
            }
        }
        Ok(())
    }
}

impl FromIterator<i64> for FragmentIdSet {
    /// Build a set from ids, merging consecutive ids into ranges.
    fn from_iter<I: IntoIterator<Item = i64>>(iter: I) -> Self {
        let mut ranges: Vec<(i64, i64)> = vec![];
        let mut len = 0;
        for id in iter {
            match ranges.last_mut() {
                Some((_, end)) if end.checked_add(1) == Some(id) => *end = id,
                _ => ranges.push((id, id)),
            }
            len += 1;
        }
        Self { ranges, len }
    }
}
