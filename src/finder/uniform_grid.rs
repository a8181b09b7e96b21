use super::{ranks_from_h, NeighbourFinder, NeighbourRecord};
use crate::floating_type_mod::FT;
use crate::{spatial, V3, V4, H};

/// Uniform cell grid with cell edge equal to the query radius; only valid
/// for runs where all particles share one smoothing length. Queries with a
/// radius above the cell size would miss neighbours and are rejected.
pub struct UniformGridFinder {
    points: Vec<V4>,
    rank: Vec<usize>,
    cell_size: FT,
    grid_min: [i32; 3],
    dims: [usize; 3],
    cells: Vec<Vec<u32>>,
}

impl UniformGridFinder {
    pub fn build(positions: &[V4], cell_size: FT) -> Self {
        assert!(cell_size > 0.);
        let rank = ranks_from_h(positions.iter().map(|r| r[H]));
        if positions.is_empty() {
            return UniformGridFinder {
                points: Vec::new(),
                rank,
                cell_size,
                grid_min: [0; 3],
                dims: [0; 3],
                cells: Vec::new(),
            };
        }
        let mut lower = spatial(positions[0]);
        let mut upper = lower;
        for p in positions {
            for d in 0..3 {
                lower[d] = FT::min(lower[d], p[d]);
                upper[d] = FT::max(upper[d], p[d]);
            }
        }
        let grid_min = [
            (lower.x / cell_size).floor() as i32 - 1,
            (lower.y / cell_size).floor() as i32 - 1,
            (lower.z / cell_size).floor() as i32 - 1,
        ];
        let grid_max = [
            (upper.x / cell_size).floor() as i32 + 2,
            (upper.y / cell_size).floor() as i32 + 2,
            (upper.z / cell_size).floor() as i32 + 2,
        ];
        let dims = [
            (grid_max[0] - grid_min[0]) as usize,
            (grid_max[1] - grid_min[1]) as usize,
            (grid_max[2] - grid_min[2]) as usize,
        ];
        let mut finder = UniformGridFinder {
            points: positions.to_vec(),
            rank,
            cell_size,
            grid_min,
            dims,
            cells: vec![Vec::new(); dims[0] * dims[1] * dims[2]],
        };
        for (i, p) in positions.iter().enumerate() {
            let cell = finder.cell_of(spatial(*p));
            let idx = finder.cell_index(cell).expect("point outside the grid");
            finder.cells[idx].push(i as u32);
        }
        finder
    }

    fn cell_of(&self, p: V3) -> [i32; 3] {
        [
            (p.x / self.cell_size).floor() as i32,
            (p.y / self.cell_size).floor() as i32,
            (p.z / self.cell_size).floor() as i32,
        ]
    }

    fn cell_index(&self, cell: [i32; 3]) -> Option<usize> {
        let mut idx = 0;
        let mut stride = 1;
        for d in 0..3 {
            let c = cell[d] - self.grid_min[d];
            if c < 0 || c as usize >= self.dims[d] {
                return None;
            }
            idx += stride * c as usize;
            stride *= self.dims[d];
        }
        Some(idx)
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
        if self.points.is_empty() {
            return;
        }
        assert!(
            radius <= self.cell_size,
            "query radius {} exceeds the grid cell size {}",
            radius,
            self.cell_size
        );
        let radius_sq = radius * radius;
        let home = self.cell_of(center);
        for dz in -1..=1 {
            for dy in -1..=1 {
                for dx in -1..=1 {
                    let cell = [home[0] + dx, home[1] + dy, home[2] + dz];
                    let Some(cell_idx) = self.cell_index(cell) else {
                        continue;
                    };
                    for &j in &self.cells[cell_idx] {
                        let j = j as usize;
                        if Some(j) == omit || self.rank[j] >= max_rank {
                            continue;
                        }
                        let dist_sq = (spatial(self.points[j]) - center).norm_squared();
                        if dist_sq < radius_sq {
                            out.push(NeighbourRecord { index: j, dist_sq });
                        }
                    }
                }
            }
        }
    }
}

impl NeighbourFinder for UniformGridFinder {
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vec4;
    use rand::{Rng, SeedableRng};
    use rand_chacha::ChaCha8Rng;

    #[test]
    fn grid_agrees_with_brute_force() {
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        let points: Vec<V4> = (0..200)
            .map(|_| {
                vec4(
                    rng.gen_range(-2.0..2.0),
                    rng.gen_range(-2.0..2.0),
                    rng.gen_range(-2.0..2.0),
                    0.1,
                )
            })
            .collect();
        let radius = 0.35;
        let grid = UniformGridFinder::build(&points, radius);
        let brute = super::super::BruteForceFinder::build(&points);
        let mut a = Vec::new();
        let mut b = Vec::new();
        for i in 0..points.len() {
            grid.find_all(i, radius, &mut a);
            brute.find_all(i, radius, &mut b);
            let mut ia: Vec<usize> = a.iter().map(|n| n.index).collect();
            let mut ib: Vec<usize> = b.iter().map(|n| n.index).collect();
            ia.sort_unstable();
            ib.sort_unstable();
            assert_eq!(ia, ib);
        }
    }
}
