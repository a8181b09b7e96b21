pub mod brute_force;
pub mod kd_tree;
pub mod uniform_grid;

use crate::floating_type_mod::FT;
use crate::settings::SettingEnum;
use crate::V3;
use enum_dispatch::enum_dispatch;

pub use brute_force::BruteForceFinder;
pub use kd_tree::{KdNode, KdPayload, KdTree};
pub use uniform_grid::UniformGridFinder;

/// One found neighbour: particle index and squared distance.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NeighbourRecord {
    pub index: usize,
    pub dist_sq: FT,
}

/// Spatial index over particle positions. Queries clear and fill the output
/// list owned by the caller, so it can be reused across iterations.
#[enum_dispatch]
pub trait NeighbourFinder {
    /// All particles `j != i` within `radius` of particle `i`.
    fn find_all(&self, i: usize, radius: FT, out: &mut Vec<NeighbourRecord>);

    /// All particles within `radius` of an arbitrary point.
    fn find_at(&self, point: V3, radius: FT, out: &mut Vec<NeighbourRecord>);

    /// Neighbours whose smoothing-length rank is strictly below that of
    /// particle `i`; each symmetric pair is thus visited exactly once.
    fn find_lower_rank(&self, i: usize, radius: FT, out: &mut Vec<NeighbourRecord>);
}

#[enum_dispatch(NeighbourFinder)]
pub enum Finder {
    KdTree,
    BruteForceFinder,
    UniformGridFinder,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinderKind {
    KdTree,
    BruteForce,
    UniformGrid,
}

impl SettingEnum for FinderKind {
    fn to_index(self) -> i64 {
        match self {
            FinderKind::KdTree => 0,
            FinderKind::BruteForce => 1,
            FinderKind::UniformGrid => 2,
        }
    }

    fn from_index(index: i64) -> Option<Self> {
        match index {
            0 => Some(FinderKind::KdTree),
            1 => Some(FinderKind::BruteForce),
            2 => Some(FinderKind::UniformGrid),
            _ => None,
        }
    }
}

/// Ranks particles by smoothing length, ties broken by index; used by the
/// lower-rank queries to split symmetric pair work.
pub fn ranks_from_h(h: impl Iterator<Item = FT>) -> Vec<usize> {
    let h: Vec<FT> = h.collect();
    let mut order: Vec<usize> = (0..h.len()).collect();
    order.sort_unstable_by(|&a, &b| {
        h[a].partial_cmp(&h[b])
            .expect("non-finite smoothing length")
            .then(a.cmp(&b))
    });
    let mut rank = vec![0; h.len()];
    for (r, &i) in order.iter().enumerate() {
        rank[i] = r;
    }
    rank
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ranks_break_ties_by_index() {
        let rank = ranks_from_h([2., 1., 2., 0.5].into_iter());
        assert_eq!(rank, vec![2, 1, 3, 0]);
    }
}
