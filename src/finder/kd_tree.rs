use super::{ranks_from_h, NeighbourFinder, NeighbourRecord};
use crate::floating_type_mod::FT;
use crate::gravity::moments::MultipoleMoments;
use crate::math::Aabb;
use crate::{spatial, V3, V4, H};
use std::ops::Range;

pub const DEFAULT_LEAF_SIZE: usize = 25;

/// Payload distinguishing inner nodes from leaves; bounding box, center of
/// mass and moments are shared by both.
#[derive(Debug, Clone)]
pub enum KdPayload {
    Inner {
        left: usize,
        right: usize,
        axis: usize,
        split: FT,
    },
    Leaf {
        /// Range into the permuted particle array.
        range: Range<usize>,
    },
}

#[derive(Debug, Clone)]
pub struct KdNode {
    pub aabb: Aabb,
    /// Center of mass; filled by the gravity moment build, zero otherwise.
    pub com: V3,
    /// Traceless multipole moments in the body frame centered at `com`.
    pub moments: MultipoleMoments,
    pub payload: KdPayload,
}

impl KdNode {
    pub fn is_leaf(&self) -> bool {
        matches!(self.payload, KdPayload::Leaf { .. })
    }
}

/// k-d tree over a permuted copy of particle positions, stored as a flat
/// node array with child indices; the root is node 0 and children always
/// have larger indices than their parent. The same tree serves SPH
/// neighbour queries and Barnes–Hut gravity.
pub struct KdTree {
    nodes: Vec<KdNode>,
    /// Particle positions in tree order.
    points: Vec<V4>,
    /// Original particle index of each permuted slot.
    index: Vec<usize>,
    /// Permuted slot of each original particle index.
    slot: Vec<usize>,
    rank: Vec<usize>,
    leaf_size: usize,
}

impl KdTree {
    /// Builds the tree by recursive median splits along the longest box
    /// axis, stopping at `leaf_size` particles per node.
    pub fn build(positions: &[V4], leaf_size: usize) -> Self {
        assert!(leaf_size > 0);
        let n = positions.len();
        let mut entries: Vec<(V4, usize)> =
            positions.iter().copied().zip(0..n).collect();
        let mut nodes = Vec::new();
        if n > 0 {
            build_node(&mut nodes, &mut entries, 0, n, leaf_size);
        }
        let mut slot = vec![0; n];
        for (s, &(_, orig)) in entries.iter().enumerate() {
            slot[orig] = s;
        }
        let rank = ranks_from_h(positions.iter().map(|r| r[H]));
        KdTree {
            nodes,
            points: entries.iter().map(|&(p, _)| p).collect(),
            index: entries.iter().map(|&(_, i)| i).collect(),
            slot,
            rank,
            leaf_size,
        }
    }

    pub fn particle_count(&self) -> usize {
        self.points.len()
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn leaf_size(&self) -> usize {
        self.leaf_size
    }

    pub fn node(&self, idx: usize) -> &KdNode {
        &self.nodes[idx]
    }

    pub fn node_mut(&mut self, idx: usize) -> &mut KdNode {
        &mut self.nodes[idx]
    }

    /// Position of a permuted slot.
    pub fn point(&self, slot: usize) -> V4 {
        self.points[slot]
    }

    /// Original particle index of a permuted slot.
    pub fn original_index(&self, slot: usize) -> usize {
        self.index[slot]
    }

    pub fn position_of(&self, i: usize) -> V4 {
        self.points[self.slot[i]]
    }

    pub fn rank_of(&self, i: usize) -> usize {
        self.rank[i]
    }

    fn query(
        &self,
        center: V3,
        radius: FT,
        omit: Option<usize>,
        max_rank: usize,
        out: &mut Vec<NeighbourRecord>,
    ) {
        out.clear();
        if self.nodes.is_empty() {
            return;
        }
        let radius_sq = radius * radius;
        let mut stack = vec![0usize];
        while let Some(node_idx) = stack.pop() {
            let node = &self.nodes[node_idx];
            if !node.aabb.overlaps_sphere(center, radius) {
                continue;
            }
            match &node.payload {
                KdPayload::Inner { left, right, .. } => {
                    stack.push(*left);
                    stack.push(*right);
                }
                KdPayload::Leaf { range } => {
                    for s in range.clone() {
                        let j = self.index[s];
                        if Some(j) == omit || self.rank[j] >= max_rank {
                            continue;
                        }
                        let dist_sq = (spatial(self.points[s]) - center).norm_squared();
                        if dist_sq < radius_sq {
                            out.push(NeighbourRecord { index: j, dist_sq });
                        }
                    }
                }
            }
        }
    }
}

impl NeighbourFinder for KdTree {
    fn find_all(&self, i: usize, radius: FT, out: &mut Vec<NeighbourRecord>) {
        let center = spatial(self.position_of(i));
        self.query(center, radius, Some(i), usize::MAX, out);
    }

    fn find_at(&self, point: V3, radius: FT, out: &mut Vec<NeighbourRecord>) {
        self.query(point, radius, None, usize::MAX, out);
    }

    fn find_lower_rank(&self, i: usize, radius: FT, out: &mut Vec<NeighbourRecord>) {
        let center = spatial(self.position_of(i));
        self.query(center, radius, Some(i), self.rank[i], out);
    }
}

/// Recursive median-split build; returns the index of the created node.
fn build_node(
    nodes: &mut Vec<KdNode>,
    entries: &mut [(V4, usize)],
    from: usize,
    to: usize,
    leaf_size: usize,
) -> usize {
    let mut aabb = Aabb::empty();
    for (p, _) in &entries[from..to] {
        aabb.extend(spatial(*p));
    }

    let node_idx = nodes.len();
    nodes.push(KdNode {
        aabb,
        com: V3::zeros(),
        moments: MultipoleMoments::null(),
        payload: KdPayload::Leaf { range: from..to },
    });

    if to - from <= leaf_size {
        return node_idx;
    }

    let axis = aabb.longest_axis();
    let mid = (to - from) / 2;
    entries[from..to].select_nth_unstable_by(mid, |a, b| {
        a.0[axis]
            .partial_cmp(&b.0[axis])
            .expect("non-finite particle position")
    });
    let split = entries[from + mid].0[axis];

    let left = build_node(nodes, entries, from, from + mid, leaf_size);
    let right = build_node(nodes, entries, from + mid, to, leaf_size);
    nodes[node_idx].payload = KdPayload::Inner {
        left,
        right,
        axis,
        split,
    };
    node_idx
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vec4;
    use rand::{Rng, SeedableRng};
    use rand_chacha::ChaCha8Rng;

    fn random_cloud(n: usize, seed: u64) -> Vec<V4> {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        (0..n)
            .map(|_| {
                vec4(
                    rng.gen_range(-1.0..1.0),
                    rng.gen_range(-1.0..1.0),
                    rng.gen_range(-1.0..1.0),
                    rng.gen_range(0.05..0.2),
                )
            })
            .collect()
    }

    #[test]
    fn empty_tree_yields_empty_queries() {
        let tree = KdTree::build(&[], DEFAULT_LEAF_SIZE);
        let mut out = Vec::new();
        tree.find_at(V3::zeros(), 1., &mut out);
        assert!(out.is_empty());
    }

    #[test]
    fn children_follow_parents() {
        let points = random_cloud(500, 1);
        let tree = KdTree::build(&points, 10);
        for (idx, node) in tree.nodes.iter().enumerate() {
            if let KdPayload::Inner { left, right, .. } = node.payload {
                assert!(left > idx && right > idx);
            }
        }
    }

    #[test]
    fn find_all_agrees_with_direct_scan() {
        let points = random_cloud(300, 2);
        let tree = KdTree::build(&points, 8);
        let radius = 0.4;
        let mut out = Vec::new();
        for i in 0..points.len() {
            tree.find_all(i, radius, &mut out);
            let mut found: Vec<usize> = out.iter().map(|n| n.index).collect();
            found.sort_unstable();
            let mut expected: Vec<usize> = (0..points.len())
                .filter(|&j| {
                    j != i
                        && (spatial(points[j]) - spatial(points[i])).norm_squared()
                            < radius * radius
                })
                .collect();
            expected.sort_unstable();
            assert_eq!(found, expected, "neighbours of {}", i);
        }
    }

    #[test]
    fn find_all_agrees_with_rstar() {
        use rstar::RTree;
        let points = random_cloud(400, 3);
        let tree = KdTree::build(&points, DEFAULT_LEAF_SIZE);
        let rtree = RTree::bulk_load(
            points
                .iter()
                .enumerate()
                .map(|(i, p)| rstar::primitives::GeomWithData::<[FT; 3], usize>::new(
                    [p.x, p.y, p.z],
                    i,
                ))
                .collect(),
        );
        let radius = 0.3;
        let mut out = Vec::new();
        for i in 0..points.len() {
            tree.find_all(i, radius, &mut out);
            let mut found: Vec<usize> = out.iter().map(|n| n.index).collect();
            found.push(i);
            found.sort_unstable();
            let center = [points[i].x, points[i].y, points[i].z];
            let mut expected: Vec<usize> = rtree
                .locate_within_distance(center, radius * radius)
                .map(|g| g.data)
                .collect();
            expected.sort_unstable();
            assert_eq!(found, expected);
        }
    }

    #[test]
    fn lower_rank_query_is_exact() {
        let points = random_cloud(1000, 4);
        let tree = KdTree::build(&points, DEFAULT_LEAF_SIZE);
        let radius = 0.25;
        let mut out = Vec::new();
        for i in 0..points.len() {
            tree.find_lower_rank(i, radius, &mut out);
            let mut found: Vec<usize> = out.iter().map(|n| n.index).collect();
            // no duplicates, no self
            let len = found.len();
            found.sort_unstable();
            found.dedup();
            assert_eq!(found.len(), len);
            assert!(!found.contains(&i));
            let expected: Vec<usize> = (0..points.len())
                .filter(|&j| {
                    tree.rank_of(j) < tree.rank_of(i)
                        && (spatial(points[j]) - spatial(points[i])).norm_squared()
                            < radius * radius
                })
                .collect();
            assert_eq!(found, expected);
        }
    }

    #[test]
    fn query_at_particle_position_is_nan_free() {
        let points = vec![vec4(0., 0., 0., 1.), vec4(0., 0., 0., 1.)];
        let tree = KdTree::build(&points, DEFAULT_LEAF_SIZE);
        let mut out = Vec::new();
        tree.find_all(0, 1., &mut out);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].dist_sq, 0.);
    }
}
