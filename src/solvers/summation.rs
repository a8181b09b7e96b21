use super::{pair_kernel, within_symmetrized_support, Solver, SweepCore};
use crate::finder::kd_tree::KdTree;
use crate::finder::NeighbourFinder;
use crate::floating_type_mod::FT;
use crate::settings::BodySettingsId;
use crate::sph::SweepInput;
use crate::statistics::{Statistics, StatsId};
use crate::storage::{Material, OrderEnum, QuantityId, Storage};
use crate::{spatial, V4, H};
use log::warn;

/// SPH solver computing the density by direct kernel summation instead of
/// evolving the continuity equation. Density and smoothing length are
/// solved self-consistently by fixed-point iteration; exhausting the
/// iteration budget is recovered by keeping the last iterate and surfaced
/// in the statistics.
pub struct SummationSolver {
    core: SweepCore,
    tolerance: FT,
    max_iterations: usize,
}

impl SummationSolver {
    pub(crate) fn new(core: SweepCore, tolerance: FT, max_iterations: usize) -> Self {
        assert!(tolerance > 0. && max_iterations > 0);
        SummationSolver {
            core,
            tolerance,
            max_iterations,
        }
    }

    /// One density evaluation at the current positions and smoothing
    /// lengths; returns the per-particle summed densities.
    fn summed_density(&self, r: &[V4], m: &[FT], tree: &KdTree) -> Vec<FT> {
        let kernel_radius = self.core.kernel.radius();
        let h_max = r.iter().map(|x| x[H]).fold(0., FT::max);
        let mut rho = vec![0.; r.len()];
        self.core.scheduler.parallel_for_each(&mut rho, |i, out| {
            let mut neighs = Vec::new();
            tree.find_all(i, kernel_radius * 0.5 * (r[i][H] + h_max), &mut neighs);
            // self-contribution
            let mut sum = m[i] * self.core.kernel.value(0., r[i][H]);
            for record in &neighs {
                let j = record.index;
                if !within_symmetrized_support(r, i, j, kernel_radius, record.dist_sq) {
                    continue;
                }
                let hbar = 0.5 * (r[i][H] + r[j][H]);
                sum += m[j] * self.core.kernel.value(record.dist_sq.sqrt(), hbar);
            }
            *out = sum;
        });
        rho
    }

    fn solve_density(&self, storage: &mut Storage, stats: &mut Statistics) {
        let etas: Vec<(std::ops::Range<usize>, FT)> = storage
            .materials()
            .iter()
            .map(|entry| {
                (
                    entry.range.clone(),
                    entry.material.params().get(BodySettingsId::SmoothingLengthEta),
                )
            })
            .collect();

        let m = storage.take_values::<FT>(QuantityId::Mass);
        let mut r = storage.take_values::<V4>(QuantityId::Position);
        let mut rho = storage.take_values::<FT>(QuantityId::Density);

        let mut iterations = self.max_iterations;
        for iter in 0..self.max_iterations {
            let tree = KdTree::build(&r, self.core.leaf_size);
            let summed = self.summed_density(&r, &m, &tree);
            let mut max_diff: FT = 0.;
            for i in 0..r.len() {
                max_diff = FT::max(max_diff, (summed[i] - rho[i]).abs() / summed[i].max(1e-30));
            }
            rho = summed;
            for (range, eta) in &etas {
                for i in range.clone() {
                    let h = eta * (m[i] / rho[i]).cbrt();
                    r[i][H] = FT::max(h, self.core.h_min);
                }
            }
            if max_diff < self.tolerance {
                iterations = iter + 1;
                break;
            }
            if iter + 1 == self.max_iterations {
                warn!(
                    "density summation did not converge in {} iterations (residual {})",
                    self.max_iterations, max_diff
                );
            }
        }
        stats.set_int(StatsId::SolverIterations, iterations as i64);

        storage.put_values(QuantityId::Density, rho);
        storage.put_values(QuantityId::Position, r);
        storage.put_values(QuantityId::Mass, m);
    }
}

impl Solver for SummationSolver {
    fn create(&mut self, storage: &mut Storage, material: &Material) {
        // density is a state variable here, not an evolved quantity
        storage.insert_uniform::<FT>(
            QuantityId::Density,
            OrderEnum::Zero,
            material.params().get(BodySettingsId::Density),
        );
        self.core.create(storage, material);
    }

    fn integrate(&mut self, storage: &mut Storage, stats: &mut Statistics) {
        storage.init();
        self.solve_density(storage, stats);
        self.core.update_materials(storage);

        let core = &self.core;
        let finder = core.build_finder(storage);
        let n = storage.particle_count();
        let kernel_radius = core.kernel.radius();

        let slots = {
            let input = SweepInput::gather(storage);
            core.scheduler.accumulate(
                n,
                || core.make_slot(n),
                |i, slot| {
                    finder.find_lower_rank(i, kernel_radius * input.r[i][H], &mut slot.neighs);
                    let mut count = 0u32;
                    for k in 0..slot.neighs.len() {
                        let record = slot.neighs[k];
                        let j = record.index;
                        if !within_symmetrized_support(input.r, i, j, kernel_radius, record.dist_sq)
                        {
                            continue;
                        }
                        let (grad, w) = pair_kernel(&core.kernel, input.r, i, j);
                        debug_assert!(grad.dot(&spatial(input.r[i] - input.r[j])) <= 0.);
                        core.equations.eval_all(&input, i, j, grad, w, true, &mut slot.acc);
                        count += 1;
                        slot.acc.get_mut::<u32>(QuantityId::NeighbourCount)[j] += 1;
                    }
                    slot.acc.get_mut::<u32>(QuantityId::NeighbourCount)[i] += count;
                },
            )
        };

        core.reduce_and_store(slots, storage, stats);
        core.add_gravity(storage, finder);
        core.equations.finalize_all(storage, stats);
    }
}
