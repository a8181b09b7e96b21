use super::{pair_kernel, within_symmetrized_support, Solver, SweepCore};
use crate::finder::NeighbourFinder;
use crate::floating_type_mod::FT;
use crate::math::SymTensor;
use crate::sph::SweepInput;
use crate::statistics::Statistics;
use crate::storage::{Material, OrderEnum, QuantityId, Storage};
use crate::{spatial, V4, H};

/// Gather-form SPH solver: every particle collects contributions from all
/// its neighbours and writes only its own row, so the sweep is race-free
/// without locks at the cost of evaluating each pair twice. Used when the
/// strain-rate correction tensors are enabled, which an exactly symmetric
/// pair sweep cannot accommodate.
pub struct AsymmetricSolver {
    core: SweepCore,
    use_correction: bool,
}

impl AsymmetricSolver {
    pub(crate) fn new(core: SweepCore, use_correction: bool) -> Self {
        AsymmetricSolver {
            core,
            use_correction,
        }
    }

    /// First sweep: accumulate and invert the kernel-gradient moment so the
    /// second sweep can correct the strain rate.
    fn compute_corrections(
        &self,
        storage: &mut Storage,
        query_radius_of: impl Fn(FT) -> FT + Send + Sync,
    ) {
        let core = &self.core;
        let finder = core.build_finder(storage);
        let kernel_radius = core.kernel.radius();
        let mut corrections = storage.take_values::<SymTensor>(QuantityId::StrainRateCorrection);
        {
            let input = SweepInput::gather(storage);
            core.scheduler
                .parallel_for_each(&mut corrections, |i, correction| {
                    let mut neighs = Vec::new();
                    finder.find_all(i, query_radius_of(input.r[i][H]), &mut neighs);
                    let mut moment = SymTensor::null();
                    for record in &neighs {
                        let j = record.index;
                        if !within_symmetrized_support(input.r, i, j, kernel_radius, record.dist_sq)
                        {
                            continue;
                        }
                        let (grad, _) = pair_kernel(&core.kernel, input.r, i, j);
                        let dr = spatial(input.r[j] - input.r[i]);
                        moment += SymTensor::outer_sym(dr, grad) * (input.m[j] / input.rho[j]);
                    }
                    // ill-conditioned moments (isolated particles) fall back
                    // to the uncorrected gradient
                    *correction = moment.inverse().unwrap_or_else(SymTensor::identity);
                });
        }
        storage.put_values(QuantityId::StrainRateCorrection, corrections);
    }
}

impl Solver for AsymmetricSolver {
    fn create(&mut self, storage: &mut Storage, material: &Material) {
        self.core.create(storage, material);
        if self.use_correction {
            storage.insert_uniform::<SymTensor>(
                QuantityId::StrainRateCorrection,
                OrderEnum::Zero,
                SymTensor::identity(),
            );
        }
    }

    fn integrate(&mut self, storage: &mut Storage, stats: &mut Statistics) {
        storage.init();
        self.core.update_materials(storage);

        // the gather query must cover pairs where the neighbour has the
        // larger smoothing length
        let h_max = storage
            .get::<V4>(QuantityId::Position)
            .iter()
            .map(|r| r[H])
            .fold(0., FT::max);
        let kernel_radius = self.core.kernel.radius();
        let query_radius_of = move |h_i: FT| kernel_radius * 0.5 * (h_i + h_max);

        if self.use_correction {
            self.compute_corrections(storage, query_radius_of);
        }

        let core = &self.core;
        let finder = core.build_finder(storage);
        let n = storage.particle_count();

        let slots = {
            let input = SweepInput::gather(storage);
            core.scheduler.accumulate(
                n,
                || core.make_slot(n),
                |i, slot| {
                    finder.find_all(i, query_radius_of(input.r[i][H]), &mut slot.neighs);
                    let mut count = 0u32;
                    for k in 0..slot.neighs.len() {
                        let record = slot.neighs[k];
                        let j = record.index;
                        if !within_symmetrized_support(input.r, i, j, kernel_radius, record.dist_sq)
                        {
                            continue;
                        }
                        let (grad, w) = pair_kernel(&core.kernel, input.r, i, j);
                        core.equations.eval_all(&input, i, j, grad, w, false, &mut slot.acc);
                        count += 1;
                    }
                    slot.acc.get_mut::<u32>(QuantityId::NeighbourCount)[i] = count;
                },
            )
        };

        core.reduce_and_store(slots, storage, stats);
        core.add_gravity(storage, finder);
        core.equations.finalize_all(storage, stats);
    }
}
