use super::{ranks_from_h, NeighbourFinder, NeighbourRecord};
use crate::floating_type_mod::FT;
use crate::{spatial, V3, V4, H};

/// O(N^2) reference finder; oracle for the tree and the fastest choice for
/// very small particle counts.
pub struct BruteForceFinder {
    points: Vec<V4>,
    rank: Vec<usize>,
}

impl BruteForceFinder {
    pub fn build(positions: &[V4]) -> Self {
        BruteForceFinder {
            points: positions.to_vec(),
            rank: ranks_from_h(positions.iter().map(|r| r[H])),
        }
    }

    fn scan(
        &self,
        center: V3,
        radius: FT,
        omit: Option<usize>,
        max_rank: usize,
        out: &mut Vec<NeighbourRecord>,
    ) {
        out.clear();
        let radius_sq = radius * radius;
        for (j, p) in self.points.iter().enumerate() {
            if Some(j) == omit || self.rank[j] >= max_rank {
                continue;
            }
            let dist_sq = (spatial(*p) - center).norm_squared();
            if dist_sq < radius_sq {
                out.push(NeighbourRecord { index: j, dist_sq });
            }
        }
    }
}

impl NeighbourFinder for BruteForceFinder {
    fn find_all(&self, i: usize, radius: FT, out: &mut Vec<NeighbourRecord>) {
        self.scan(spatial(self.points[i]), radius, Some(i), usize::MAX, out);
    }

    fn find_at(&self, point: V3, radius: FT, out: &mut Vec<NeighbourRecord>) {
        self.scan(point, radius, None, usize::MAX, out);
    }

    fn find_lower_rank(&self, i: usize, radius: FT, out: &mut Vec<NeighbourRecord>) {
        self.scan(spatial(self.points[i]), radius, Some(i), self.rank[i], out);
    }
}
