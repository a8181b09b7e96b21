pub mod asymmetric;
pub mod summation;
pub mod symmetric;

use crate::finder::kd_tree::KdTree;
use crate::finder::{BruteForceFinder, Finder, FinderKind, UniformGridFinder};
use crate::floating_type_mod::FT;
use crate::gravity::BarnesHut;
use crate::kernels::{KernelKind, LutKernel, SymmetrizedKernel};
use crate::math::TracelessTensor;
use crate::run::RunError;
use crate::scheduler::Scheduler;
use crate::settings::{RunSettings, RunSettingsId, SettingEnum};
use crate::sph::{Accumulated, BufferRole, EquationHolder};
use crate::statistics::{Statistics, StatsId};
use crate::storage::{Material, OrderEnum, QuantityId, Storage};
use crate::{spatial, V3, V4, H};

pub use asymmetric::AsymmetricSolver;
pub use summation::SummationSolver;
pub use symmetric::SymmetricSolver;

/// A solver turns the current state into derivatives (`integrate`) and
/// optionally resolves discrete events (`collide`), called by the
/// timestepping in that order. `create` must run once per body before the
/// first step so that all required columns exist.
pub trait Solver: Send {
    fn create(&mut self, storage: &mut Storage, material: &Material);

    fn integrate(&mut self, storage: &mut Storage, stats: &mut Statistics);

    fn collide(&mut self, _storage: &mut Storage, _stats: &mut Statistics, _dt: FT) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SolverKind {
    Symmetric,
    Asymmetric,
    Summation,
}

impl SettingEnum for SolverKind {
    fn to_index(self) -> i64 {
        match self {
            SolverKind::Symmetric => 0,
            SolverKind::Asymmetric => 1,
            SolverKind::Summation => 2,
        }
    }

    fn from_index(index: i64) -> Option<Self> {
        match index {
            0 => Some(SolverKind::Symmetric),
            1 => Some(SolverKind::Asymmetric),
            2 => Some(SolverKind::Summation),
            _ => None,
        }
    }
}

/// State shared by the SPH solvers: scheduler handle, kernel, gravity,
/// equation set and the accumulator prototype cloned into the worker slots.
pub(crate) struct SweepCore {
    pub scheduler: Scheduler,
    pub kernel: LutKernel,
    pub equations: EquationHolder,
    pub gravity: Option<BarnesHut>,
    pub finder_kind: FinderKind,
    pub leaf_size: usize,
    pub h_min: FT,
    prototype: Accumulated,
}

/// Per-slot state of a sweep: the accumulator clone plus the reusable
/// neighbour list.
pub(crate) struct SweepSlot {
    pub acc: Accumulated,
    pub neighs: Vec<crate::finder::NeighbourRecord>,
}

impl SweepCore {
    pub fn from_settings(settings: &RunSettings, equations: EquationHolder) -> Result<Self, RunError> {
        let kind: KernelKind = settings.get_enum(RunSettingsId::SphKernel)?;
        let lut_size: i64 = settings.get(RunSettingsId::SphKernelLutSize);
        let gravity = if settings.get::<bool>(RunSettingsId::GravityEnabled) {
            Some(BarnesHut::new(
                settings.get(RunSettingsId::GravityConstant),
                settings.get(RunSettingsId::GravityOpeningAngle),
                settings.get::<i64>(RunSettingsId::GravityMultipoleOrder) as usize,
            ))
        } else {
            None
        };
        Ok(SweepCore {
            scheduler: Scheduler::new(settings.get::<i64>(RunSettingsId::SchedulerGranularity) as usize),
            kernel: LutKernel::new(kind, lut_size as usize),
            equations,
            gravity,
            finder_kind: settings.get_enum(RunSettingsId::SphFinder)?,
            leaf_size: settings.get::<i64>(RunSettingsId::FinderLeafSize) as usize,
            h_min: settings.get(RunSettingsId::SphSmoothingLengthMin),
            prototype: Accumulated::new(),
        })
    }

    pub fn create(&mut self, storage: &mut Storage, material: &Material) {
        self.equations.create_all(storage, material);
        storage.insert_uniform::<u32>(QuantityId::NeighbourCount, OrderEnum::Zero, 0);
        let mut prototype = Accumulated::new();
        self.equations.register_all(&mut prototype);
        prototype.insert::<u32>(QuantityId::NeighbourCount, OrderEnum::Zero, BufferRole::Unique);
        self.prototype = prototype;
    }

    /// Clamps smoothing lengths and lets the material strategies refresh
    /// pressure, sound speed and the yielded stress.
    pub fn update_materials(&self, storage: &mut Storage) {
        let h_min = self.h_min;
        for r in storage.get_mut::<V4>(QuantityId::Position) {
            r[H] = FT::max(r[H], h_min);
        }

        let has_energy = storage.has(QuantityId::Energy);
        if has_energy {
            let mut p = storage.take_values::<FT>(QuantityId::Pressure);
            let mut cs = storage.take_values::<FT>(QuantityId::SoundSpeed);
            {
                let rho = storage.get::<FT>(QuantityId::Density);
                let u = storage.get::<FT>(QuantityId::Energy);
                for entry in storage.materials() {
                    let Some(eos) = entry.material.eos() else {
                        continue;
                    };
                    for i in entry.range.clone() {
                        p[i] = eos.pressure(rho[i], u[i]);
                        cs[i] = eos.sound_speed(rho[i], p[i]);
                        debug_assert!(cs[i].is_finite(), "invalid sound speed of particle {}", i);
                    }
                }
            }
            storage.put_values(QuantityId::Pressure, p);
            storage.put_values(QuantityId::SoundSpeed, cs);
        }

        if storage.has(QuantityId::DeviatoricStress) {
            let mut stress = storage.take_values::<TracelessTensor>(QuantityId::DeviatoricStress);
            {
                let damage = storage.get::<FT>(QuantityId::Damage);
                for entry in storage.materials() {
                    let Some(rheology) = entry.material.rheology() else {
                        continue;
                    };
                    for i in entry.range.clone() {
                        stress[i] = rheology.limit_stress(stress[i], damage[i]);
                    }
                }
            }
            storage.put_values(QuantityId::DeviatoricStress, stress);
        }
    }

    /// Spatial index of the current positions. With the default k-d tree
    /// the same structure later carries the gravity moments.
    pub fn build_finder(&self, storage: &Storage) -> Finder {
        let r = storage.get::<V4>(QuantityId::Position);
        match self.finder_kind {
            FinderKind::KdTree => Finder::from(KdTree::build(r, self.leaf_size)),
            FinderKind::BruteForce => Finder::from(BruteForceFinder::build(r)),
            FinderKind::UniformGrid => {
                let h_max = r.iter().map(|x| x[H]).fold(self.h_min, FT::max);
                Finder::from(UniformGridFinder::build(r, self.kernel.radius() * h_max))
            }
        }
    }

    /// Self-gravity, added into the acceleration buffer after the SPH
    /// store. The sweep's k-d tree is reused when there is one; other
    /// finders cannot carry moments, so a tree is built on demand.
    pub fn add_gravity(&self, storage: &mut Storage, finder: Finder) {
        let Some(gravity) = &self.gravity else {
            return;
        };
        let mut tree = match finder {
            Finder::KdTree(tree) => tree,
            _ => KdTree::build(storage.get::<V4>(QuantityId::Position), self.leaf_size),
        };
        let m = storage.take_values::<FT>(QuantityId::Mass);
        gravity.build_moments(&mut tree, &m);
        {
            let tree = &tree;
            let dv = storage.get_d2t_mut::<V4>(QuantityId::Position);
            self.scheduler.parallel_for_each(dv, |i, out| {
                let f = gravity.eval(tree, &m, spatial(tree.position_of(i)), Some(i));
                *out += crate::widen(f);
            });
        }
        storage.put_values(QuantityId::Mass, m);
    }

    /// Fresh zeroed accumulator slot for a sweep over `n` particles.
    pub fn make_slot(&self, n: usize) -> SweepSlot {
        let mut acc = self.prototype.clone();
        acc.initialize(n);
        SweepSlot {
            acc,
            neighs: Vec::new(),
        }
    }

    /// Reduces the slots in ascending slot order and stores the result;
    /// this ordering is what makes repeated runs bitwise identical.
    pub fn reduce_and_store(&self, slots: Vec<SweepSlot>, storage: &mut Storage, stats: &mut Statistics) {
        let mut merged: Option<Accumulated> = None;
        for slot in slots {
            match &mut merged {
                None => merged = Some(slot.acc),
                Some(acc) => acc.merge_in(&slot.acc),
            }
        }
        if let Some(acc) = merged {
            acc.store(storage);
        }
        for &count in storage.get::<u32>(QuantityId::NeighbourCount) {
            stats.accumulate(StatsId::NeighbourCount, count as FT);
        }
    }
}

pub fn create_solver(settings: &RunSettings) -> Result<Box<dyn Solver>, RunError> {
    let mut equations = EquationHolder::new();
    equations
        .push(Box::new(crate::sph::equations::PressureForce))
        .push(Box::new(crate::sph::equations::StandardAV::new(
            settings.get(RunSettingsId::SphAvAlpha),
            settings.get(RunSettingsId::SphAvBeta),
        )));
    let kind: SolverKind = settings.get_enum(RunSettingsId::SolverKind)?;
    if kind != SolverKind::Summation {
        equations.push(Box::new(crate::sph::equations::ContinuityEquation));
    }
    equations
        .push(Box::new(crate::sph::equations::SolidStressForce))
        .push(Box::new(crate::sph::equations::VelocityDivergence))
        .push(Box::new(crate::sph::equations::VelocityRotation));
    if settings.get::<bool>(RunSettingsId::SphUseXsph) {
        equations.push(Box::new(crate::sph::equations::XsphCorrection {
            epsilon: settings.get(RunSettingsId::SphXsphEpsilon),
        }));
    }
    let friction: FT = settings.get(RunSettingsId::SphFrictionCoefficient);
    if friction > 0. {
        equations.push(Box::new(crate::sph::equations::InternalFriction {
            coefficient: friction,
        }));
    }
    let frame_omega: V3 = settings.get(RunSettingsId::FrameAngularVelocity);
    if frame_omega != V3::zeros() {
        // co-rotating frame of a spinning target; with zero spin the run
        // is exactly inertial
        equations.push(Box::new(crate::sph::equations::NonInertialForce { frame_omega }));
    }

    Ok(match kind {
        SolverKind::Symmetric => Box::new(SymmetricSolver::new(SweepCore::from_settings(
            settings, equations,
        )?)),
        SolverKind::Asymmetric => Box::new(AsymmetricSolver::new(
            SweepCore::from_settings(settings, equations)?,
            settings.get(RunSettingsId::SphUseCorrectionTensor),
        )),
        SolverKind::Summation => Box::new(SummationSolver::new(
            SweepCore::from_settings(settings, equations)?,
            settings.get(RunSettingsId::SphSummationTolerance),
            settings.get::<i64>(RunSettingsId::SphSummationMaxIterations) as usize,
        )),
    })
}

/// Shared pair-cutoff test: particles interact when their distance is below
/// the kernel support of the averaged smoothing length.
pub(crate) fn within_symmetrized_support(r: &[V4], i: usize, j: usize, kernel_radius: FT, dist_sq: FT) -> bool {
    let hbar = 0.5 * (r[i][H] + r[j][H]);
    dist_sq < (kernel_radius * hbar) * (kernel_radius * hbar)
}

/// Symmetrized kernel gradient and value of one pair.
pub(crate) fn pair_kernel(kernel: &LutKernel, r: &[V4], i: usize, j: usize) -> (V3, FT) {
    let sym = SymmetrizedKernel::new(kernel);
    (sym.grad(r[i], r[j]), sym.value(r[i], r[j]))
}
