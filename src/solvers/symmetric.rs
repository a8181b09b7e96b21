use super::{pair_kernel, within_symmetrized_support, Solver, SweepCore};
use crate::finder::NeighbourFinder;
use crate::sph::SweepInput;
use crate::statistics::Statistics;
use crate::storage::{Material, QuantityId, Storage};
use crate::{V4, H};

/// SPH solver evaluating every interacting pair exactly once. Particle `i`
/// queries only neighbours of lower smoothing-length rank; since the
/// symmetrized length `(h_i + h_j) / 2` never exceeds `h_i`, no pair is
/// missed. Each term writes both the i and j contributions into the
/// thread-private accumulator slot, and the slots are reduced
/// deterministically.
pub struct SymmetricSolver {
    core: SweepCore,
}

impl SymmetricSolver {
    pub(crate) fn new(core: SweepCore) -> Self {
        SymmetricSolver { core }
    }
}

impl Solver for SymmetricSolver {
    fn create(&mut self, storage: &mut Storage, material: &Material) {
        self.core.create(storage, material);
    }

    fn integrate(&mut self, storage: &mut Storage, stats: &mut Statistics) {
        let core = &self.core;
        storage.init();
        core.update_materials(storage);

        let finder = core.build_finder(storage);
        let n = storage.particle_count();
        let kernel_radius = core.kernel.radius();

        let slots = {
            let input = SweepInput::gather(storage);
            core.scheduler.accumulate(
                n,
                || core.make_slot(n),
                |i, slot| {
                    let radius = kernel_radius * input.r[i][H];
                    finder.find_lower_rank(i, radius, &mut slot.neighs);
                    let mut count = 0u32;
                    for record in &slot.neighs {
                        let j = record.index;
                        if !within_symmetrized_support(input.r, i, j, kernel_radius, record.dist_sq)
                        {
                            continue;
                        }
                        let (grad, w) = pair_kernel(&core.kernel, input.r, i, j);
                        debug_assert!(grad.dot(&crate::spatial(input.r[i] - input.r[j])) <= 0.);
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

        debug_assert!(storage
            .get_d2t::<V4>(QuantityId::Position)
            .iter()
            .all(|dv| dv.iter().all(|x| x.is_finite())));
    }
}
