pub mod criteria;
pub mod integrators;

pub use criteria::{
    AccelerationCriterion, CourantCriterion, CriterionId, DerivativeCriterion, MultiCriterion,
};
pub use integrators::{Integrator, IntegratorKind, IntegratorStep};

use crate::floating_type_mod::FT;
use crate::run::RunError;
use crate::settings::{RunSettings, RunSettingsId};
use crate::solvers::Solver;
use crate::statistics::{Statistics, StatsId};
use crate::storage::{OrderEnum, Storage};

/// Advances the state `y += dt * dy` using the derivatives stored in
/// `derivs`. For second-order quantities the value advances with the first
/// derivative and the first derivative with the second.
pub(crate) fn state_axpy(target: &mut Storage, derivs: &Storage, dt: FT) {
    for (id, q) in target.quantities_mut() {
        let source = derivs.quantity(id);
        match q.order() {
            OrderEnum::Zero => {}
            OrderEnum::First => {
                q.buffer_mut(0).unwrap().axpy(source.buffer(1).unwrap(), dt);
            }
            OrderEnum::Second => {
                q.buffer_mut(0).unwrap().axpy(source.buffer(1).unwrap(), dt);
                q.buffer_mut(1).unwrap().axpy(source.buffer(2).unwrap(), dt);
            }
        }
    }
}

/// Copies the integrated state (values, and first derivatives of
/// second-order quantities) from `source`.
pub(crate) fn state_copy(target: &mut Storage, source: &Storage) {
    for (id, q) in target.quantities_mut() {
        let src = source.quantity(id);
        match q.order() {
            OrderEnum::Zero => {}
            OrderEnum::First => {
                *q.buffer_mut(0).unwrap() = src.buffer(0).unwrap().clone();
            }
            OrderEnum::Second => {
                *q.buffer_mut(0).unwrap() = src.buffer(0).unwrap().clone();
                *q.buffer_mut(1).unwrap() = src.buffer(1).unwrap().clone();
            }
        }
    }
}

/// In-place `state = a * state + b * other_state` over the integrated
/// levels.
pub(crate) fn state_blend(target: &mut Storage, other: &Storage, a: FT, b: FT) {
    for (id, q) in target.quantities_mut() {
        let src = other.quantity(id);
        match q.order() {
            OrderEnum::Zero => {}
            OrderEnum::First => {
                q.buffer_mut(0).unwrap().blend(src.buffer(0).unwrap(), a, b);
            }
            OrderEnum::Second => {
                q.buffer_mut(0).unwrap().blend(src.buffer(0).unwrap(), a, b);
                q.buffer_mut(1).unwrap().blend(src.buffer(1).unwrap(), a, b);
            }
        }
    }
}

/// Largest relative difference of the integrated state of two storages;
/// the error estimate of the extrapolating integrator.
pub(crate) fn state_max_rel_diff(a: &Storage, b: &Storage) -> FT {
    use crate::storage::Buffer;
    fn buffer_diff(a: &Buffer, b: &Buffer) -> FT {
        let mut max = 0.;
        match (a, b) {
            (Buffer::Scalar(a), Buffer::Scalar(b)) => {
                for (x, y) in a.iter().zip(b) {
                    max = FT::max(max, (x - y).abs() / x.abs().max(1.));
                }
            }
            (Buffer::Vector(a), Buffer::Vector(b)) => {
                for (x, y) in a.iter().zip(b) {
                    max = FT::max(max, (x - y).norm() / x.norm().max(1.));
                }
            }
            _ => {}
        }
        max
    }
    let mut max: FT = 0.;
    for (id, q) in a.quantities() {
        let other = b.quantity(id);
        for level in 0..q.order().levels().saturating_sub(1) {
            max = FT::max(
                max,
                buffer_diff(q.buffer(level).unwrap(), other.buffer(level).unwrap()),
            );
        }
    }
    max
}

/// Clamps every bounded scalar quantity into its allowed interval and
/// zeroes the derivative component pushing further out.
pub(crate) fn clamp_bounded(storage: &mut Storage) {
    use crate::storage::ValueKind;
    for (_, q) in storage.quantities_mut() {
        if q.bounds().is_unbounded() || q.kind() != ValueKind::Scalar {
            continue;
        }
        let bounds = q.bounds();
        if q.order() == OrderEnum::Zero {
            for y in q.values_mut::<FT>() {
                *y = bounds.clamp(*y);
            }
            continue;
        }
        let (lower, upper) = (bounds.lower(), bounds.upper());
        let n = q.len();
        for i in 0..n {
            let y = q.values::<FT>()[i];
            if y < lower {
                q.values_mut::<FT>()[i] = lower;
                if q.dt::<FT>()[i] < 0. {
                    q.dt_mut::<FT>()[i] = 0.;
                }
            } else if y > upper {
                q.values_mut::<FT>()[i] = upper;
                if q.dt::<FT>()[i] > 0. {
                    q.dt_mut::<FT>()[i] = 0.;
                }
            }
        }
    }
}

/// Owns the integrator and the time-step criteria; one call advances the
/// run by the current step, resolves collisions, and prepares the next
/// step size.
pub struct TimeStepping {
    integrator: Integrator,
    criteria: MultiCriterion,
    dt: FT,
}

impl TimeStepping {
    pub fn from_settings(settings: &RunSettings) -> Result<Self, RunError> {
        Ok(TimeStepping {
            integrator: Integrator::from_settings(settings)?,
            criteria: MultiCriterion::from_settings(settings),
            dt: settings.get(RunSettingsId::TimesteppingInitialDt),
        })
    }

    pub fn current_dt(&self) -> FT {
        self.dt
    }

    pub fn step(&mut self, solver: &mut dyn Solver, storage: &mut Storage, stats: &mut Statistics) {
        stats.set_float(StatsId::Timestep, self.dt);
        self.integrator.step(solver, storage, stats, self.dt);
        solver.collide(storage, stats, self.dt);
        self.dt = self.criteria.compute(storage, stats);
    }
}
