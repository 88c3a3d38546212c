//! Deterministic partitioning of the body index space.
//!
//! Splits `[0, body_count)` into contiguous half-open ranges, one per node,
//! in the order the nodes are given (registration order).

use serde::{Deserialize, Serialize};
use stargazer_env::NodeId;
use std::ops::Range;
use tracing::debug;

use crate::error::{Result, StargazerError};

/// A half-open index interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IndexRange {
    pub start: usize,
    pub end: usize,
}

impl IndexRange {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    pub fn len(&self) -> usize {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.end <= self.start
    }

    /// True if the range is well-formed and lies within `[0, count)`.
    pub fn fits(&self, count: usize) -> bool {
        self.start <= self.end && self.end <= count
    }

    pub fn as_range(&self) -> Range<usize> {
        self.start..self.end
    }
}

impl From<Range<usize>> for IndexRange {
    fn from(r: Range<usize>) -> Self {
        Self::new(r.start, r.end)
    }
}

impl std::fmt::Display for IndexRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}, {})", self.start, self.end)
    }
}

/// One step's assignment of ranges to nodes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Partition {
    assignments: Vec<(NodeId, IndexRange)>,
}

impl Partition {
    /// All assignments in node order, empty ranges included.
    pub fn assignments(&self) -> &[(NodeId, IndexRange)] {
        &self.assignments
    }

    /// Assignments that actually own indices; only these nodes are called.
    pub fn active(&self) -> impl Iterator<Item = &(NodeId, IndexRange)> {
        self.assignments.iter().filter(|(_, r)| !r.is_empty())
    }

    /// Range owned by `node`, if it is part of this partition.
    pub fn range_of(&self, node: &NodeId) -> Option<IndexRange> {
        self.assignments
            .iter()
            .find(|(id, _)| id == node)
            .map(|(_, r)| *r)
    }

    pub fn len(&self) -> usize {
        self.assignments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.assignments.is_empty()
    }
}

/// Splits `[0, body_count)` across `nodes`.
///
/// Each node gets `body_count / N` indices and the first `body_count % N`
/// nodes one more. With fewer bodies than nodes the trailing nodes get empty
/// ranges. No nodes means no valid assignment.
pub fn assign(nodes: &[NodeId], body_count: usize) -> Result<Partition> {
    let n = nodes.len();
    if n == 0 {
        return Err(StargazerError::unavailable("no healthy compute nodes"));
    }

    let base = body_count / n;
    let extra = body_count % n;

    let mut start = 0;
    let assignments = nodes
        .iter()
        .enumerate()
        .map(|(i, id)| {
            let size = base + usize::from(i < extra);
            let range = IndexRange::new(start, start + size);
            start += size;
            (*id, range)
        })
        .collect();

    debug!("Partitioned {} bodies across {} nodes", body_count, n);

    Ok(Partition { assignments })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn ids(n: usize) -> Vec<NodeId> {
        (0..n as u64).map(NodeId::from_seed).collect()
    }

    fn ranges(p: &Partition) -> Vec<(usize, usize)> {
        p.assignments().iter().map(|(_, r)| (r.start, r.end)).collect()
    }

    #[test]
    fn test_three_nodes_nine_bodies() {
        let nodes = ids(3);
        let p = assign(&nodes, 9).unwrap();
        assert_eq!(ranges(&p), vec![(0, 3), (3, 6), (6, 9)]);

        // Node 2 leaves; remaining order is preserved
        let remaining = vec![nodes[0], nodes[2]];
        let p = assign(&remaining, 9).unwrap();
        assert_eq!(ranges(&p), vec![(0, 5), (5, 9)]);
        assert_eq!(p.range_of(&nodes[2]), Some(IndexRange::new(5, 9)));
    }

    #[test]
    fn test_remainder_goes_to_first_nodes() {
        let p = assign(&ids(3), 10).unwrap();
        assert_eq!(ranges(&p), vec![(0, 4), (4, 7), (7, 10)]);
    }

    #[test]
    fn test_fewer_bodies_than_nodes() {
        let p = assign(&ids(4), 2).unwrap();
        assert_eq!(ranges(&p), vec![(0, 1), (1, 2), (2, 2), (2, 2)]);
        assert_eq!(p.active().count(), 2);
    }

    #[test]
    fn test_no_nodes_is_unavailable() {
        let err = assign(&[], 5).unwrap_err();
        assert_eq!(err.status_code(), 503);
    }

    #[test]
    fn test_index_range_fits() {
        assert!(IndexRange::new(0, 3).fits(3));
        assert!(!IndexRange::new(2, 4).fits(3));
        assert!(!IndexRange::new(3, 2).fits(5));
        assert_eq!(IndexRange::new(2, 5).to_string(), "[2, 5)");
    }

    proptest! {
        #[test]
        fn prop_partition_is_disjoint_covering_and_balanced(
            node_count in 1usize..32,
            body_count in 0usize..500,
        ) {
            let p = assign(&ids(node_count), body_count).unwrap();
            prop_assert_eq!(p.len(), node_count);

            // Contiguous from zero means disjoint and covering
            let mut cursor = 0;
            for (_, r) in p.assignments() {
                prop_assert_eq!(r.start, cursor);
                prop_assert!(r.start <= r.end);
                cursor = r.end;
            }
            prop_assert_eq!(cursor, body_count);

            let sizes: Vec<usize> = p.assignments().iter().map(|(_, r)| r.len()).collect();
            let max = sizes.iter().copied().max().unwrap_or(0);
            let min = sizes.iter().copied().min().unwrap_or(0);
            prop_assert!(max - min <= 1);
        }
    }
}
