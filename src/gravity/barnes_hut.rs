use super::moments::MultipoleMoments;
use crate::finder::kd_tree::{KdPayload, KdTree};
use crate::floating_type_mod::{EPS, FT};
use crate::{spatial, V3};

/// Barnes–Hut gravity evaluated on the same k-d tree that serves the SPH
/// neighbour queries. Nodes below the opening angle contribute through
/// their multipole expansion; large nodes recurse, and leaves fall back to
/// exact pairwise sums.
pub struct BarnesHut {
    pub constant: FT,
    pub theta_sq: FT,
    pub order: usize,
}

impl BarnesHut {
    pub fn new(constant: FT, theta: FT, order: usize) -> Self {
        assert!(theta >= 0.);
        assert!(order <= 3, "moments are built up to the octupole");
        BarnesHut {
            constant,
            theta_sq: theta * theta,
            order,
        }
    }

    /// Fills center of mass and moments of every node, bottom-up. Leaves
    /// aggregate their particles; inner nodes combine children through the
    /// parallel-axis theorem. Empty nodes carry zero mass and moments so
    /// parents combine correctly.
    pub fn build_moments(&self, tree: &mut KdTree, masses: &[FT]) {
        // children always have larger indices, so reverse order is bottom-up
        for idx in (0..tree.node_count()).rev() {
            match tree.node(idx).payload.clone() {
                KdPayload::Leaf { range } => {
                    let mut m_total = 0.;
                    let mut com = V3::zeros();
                    for s in range.clone() {
                        let m = masses[tree.original_index(s)];
                        m_total += m;
                        com += m * spatial(tree.point(s));
                    }
                    if m_total == 0. {
                        let node = tree.node_mut(idx);
                        node.com = V3::zeros();
                        node.moments = MultipoleMoments::null();
                        continue;
                    }
                    com /= m_total;
                    let moments = MultipoleMoments::compute(
                        range
                            .clone()
                            .map(|s| (spatial(tree.point(s)), masses[tree.original_index(s)])),
                        com,
                    );
                    let node = tree.node_mut(idx);
                    node.com = com;
                    node.moments = moments;
                }
                KdPayload::Inner { left, right, .. } => {
                    let (lm, lcom) = (tree.node(left).moments, tree.node(left).com);
                    let (rm, rcom) = (tree.node(right).moments, tree.node(right).com);
                    let m_total = lm.m0 + rm.m0;
                    if m_total == 0. {
                        let node = tree.node_mut(idx);
                        node.com = V3::zeros();
                        node.moments = MultipoleMoments::null();
                        continue;
                    }
                    let com = (lm.m0 * lcom + rm.m0 * rcom) / m_total;
                    let moments = lm.translated(lcom - com) + rm.translated(rcom - com);
                    let node = tree.node_mut(idx);
                    node.com = com;
                    node.moments = moments;
                }
            }
        }
    }

    /// Acceleration at `pos`, skipping the particle `omit` in the exact
    /// leaf sums. Moments must have been built.
    pub fn eval(&self, tree: &KdTree, masses: &[FT], pos: V3, omit: Option<usize>) -> V3 {
        if tree.particle_count() == 0 {
            return V3::zeros();
        }
        let mut f = V3::zeros();
        let mut stack = vec![0usize];
        while let Some(idx) = stack.pop() {
            let node = tree.node(idx);
            if node.moments.m0 == 0. {
                continue;
            }
            let box_size_sq = node.aabb.size().norm_squared();
            let box_dist_sq = (node.aabb.center() - pos).norm_squared();
            debug_assert!(box_dist_sq.is_finite());
            if box_size_sq / (box_dist_sq + EPS) < self.theta_sq {
                f += node.moments.evaluate(pos - node.com, self.order);
                continue;
            }
            match &node.payload {
                KdPayload::Inner { left, right, .. } => {
                    stack.push(*left);
                    stack.push(*right);
                }
                KdPayload::Leaf { range } => {
                    for s in range.clone() {
                        let j = tree.original_index(s);
                        if Some(j) == omit {
                            continue;
                        }
                        let dr = spatial(tree.point(s)) - pos;
                        let dist_sq = dr.norm_squared();
                        if dist_sq == 0. {
                            // evaluation point coincides with a particle
                            continue;
                        }
                        f += masses[j] * dr / (dist_sq * dist_sq.sqrt());
                    }
                }
            }
        }
        self.constant * f
    }

}

/// Exact pairwise gravity; the oracle the tree code is tested against and
/// the theta = 0 limit.
pub struct BruteForceGravity {
    pub constant: FT,
}

impl BruteForceGravity {
    pub fn new(constant: FT) -> Self {
        BruteForceGravity { constant }
    }

    pub fn eval(&self, positions: &[V3], masses: &[FT], pos: V3, omit: Option<usize>) -> V3 {
        let mut f = V3::zeros();
        for (j, (r, m)) in positions.iter().zip(masses).enumerate() {
            if Some(j) == omit {
                continue;
            }
            let dr = r - pos;
            let dist_sq = dr.norm_squared();
            if dist_sq == 0. {
                continue;
            }
            f += *m * dr / (dist_sq * dist_sq.sqrt());
        }
        self.constant * f
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::finder::kd_tree::DEFAULT_LEAF_SIZE;
    use crate::{vec4, V4};
    use rand::{Rng, SeedableRng};
    use rand_chacha::ChaCha8Rng;

    fn random_cloud(n: usize, seed: u64) -> (Vec<V4>, Vec<FT>) {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let positions = (0..n)
            .map(|_| {
                vec4(
                    rng.gen_range(-1.0..1.0),
                    rng.gen_range(-1.0..1.0),
                    rng.gen_range(-1.0..1.0),
                    0.1,
                )
            })
            .collect();
        let masses = (0..n).map(|_| rng.gen_range(0.5..2.0)).collect();
        (positions, masses)
    }

    #[test]
    fn zero_theta_matches_brute_force() {
        let (positions, masses) = random_cloud(500, 21);
        let mut tree = KdTree::build(&positions, DEFAULT_LEAF_SIZE);
        let gravity = BarnesHut::new(1., 0., 3);
        gravity.build_moments(&mut tree, &masses);
        let brute = BruteForceGravity::new(1.);
        let spatial_positions: Vec<V3> = positions.iter().map(|r| spatial(*r)).collect();
        for i in 0..positions.len() {
            let approx = gravity.eval(&tree, &masses, spatial_positions[i], Some(i));
            let exact = brute.eval(&spatial_positions, &masses, spatial_positions[i], Some(i));
            let err = (approx - exact).norm() / exact.norm().max(1e-30);
            assert!(err < 1e-10, "particle {}: relative error {}", i, err);
        }
    }

    #[test]
    fn opened_tree_is_close_to_brute_force() {
        let (positions, masses) = random_cloud(500, 22);
        let mut tree = KdTree::build(&positions, DEFAULT_LEAF_SIZE);
        let gravity = BarnesHut::new(1., 0.8, 3);
        gravity.build_moments(&mut tree, &masses);
        let brute = BruteForceGravity::new(1.);
        let spatial_positions: Vec<V3> = positions.iter().map(|r| spatial(*r)).collect();
        for i in 0..positions.len() {
            let approx = gravity.eval(&tree, &masses, spatial_positions[i], Some(i));
            let exact = brute.eval(&spatial_positions, &masses, spatial_positions[i], Some(i));
            let err = (approx - exact).norm() / exact.norm().max(1e-30);
            assert!(err <= 1e-2, "particle {}: relative error {}", i, err);
        }
    }

    #[test]
    fn root_mass_equals_total_mass() {
        let (positions, masses) = random_cloud(100, 23);
        let mut tree = KdTree::build(&positions, 10);
        let gravity = BarnesHut::new(1., 0.5, 3);
        gravity.build_moments(&mut tree, &masses);
        let total: FT = masses.iter().sum();
        crate::assert_ft_approx_eq(tree.node(0).moments.m0, total, 1e-12, || "root mass".into());
        // root octupole stays traceless after the parallel-axis combination
        let tr = tree.node(0).moments.m3.trace_vector();
        assert!(tr.norm() < 1e-8 * total, "octupole trace {}", tr.norm());
    }

    #[test]
    fn empty_input_gives_zero_gravity() {
        let tree = KdTree::build(&[], DEFAULT_LEAF_SIZE);
        let gravity = BarnesHut::new(1., 0.5, 3);
        let f = gravity.eval(&tree, &[], V3::zeros(), None);
        assert_eq!(f, V3::zeros());
    }
}
