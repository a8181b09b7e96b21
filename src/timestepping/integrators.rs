use super::{clamp_bounded, state_axpy, state_blend, state_copy, state_max_rel_diff};
use crate::floating_type_mod::FT;
use crate::run::RunError;
use crate::settings::{RunSettings, RunSettingsId, SettingEnum};
use crate::solvers::Solver;
use crate::statistics::{Statistics, StatsId};
use crate::storage::{CloneFlags, OrderEnum, Storage};
use enum_dispatch::enum_dispatch;
use std::sync::{Arc, RwLock};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntegratorKind {
    EulerExplicit,
    LeapFrog,
    PredictorCorrector,
    RungeKutta4,
    BulirschStoer,
}

impl SettingEnum for IntegratorKind {
    fn to_index(self) -> i64 {
        use IntegratorKind::*;
        match self {
            EulerExplicit => 0,
            LeapFrog => 1,
            PredictorCorrector => 2,
            RungeKutta4 => 3,
            BulirschStoer => 4,
        }
    }

    fn from_index(index: i64) -> Option<Self> {
        use IntegratorKind::*;
        match index {
            0 => Some(EulerExplicit),
            1 => Some(LeapFrog),
            2 => Some(PredictorCorrector),
            3 => Some(RungeKutta4),
            4 => Some(BulirschStoer),
            _ => None,
        }
    }
}

/// One explicit time integrator. After advancing, every bounded quantity is
/// clamped into its interval with the offending derivative zeroed.
#[enum_dispatch]
pub trait IntegratorStep {
    fn step(
        &mut self,
        solver: &mut dyn Solver,
        storage: &mut Storage,
        stats: &mut Statistics,
        dt: FT,
    );
}

#[enum_dispatch(IntegratorStep)]
pub enum Integrator {
    EulerExplicit,
    LeapFrog,
    PredictorCorrector,
    RungeKutta4,
    BulirschStoer,
}

impl Integrator {
    pub fn from_settings(settings: &RunSettings) -> Result<Self, RunError> {
        let kind: IntegratorKind = settings.get_enum(RunSettingsId::TimesteppingIntegrator)?;
        Ok(match kind {
            IntegratorKind::EulerExplicit => Integrator::from(EulerExplicit),
            IntegratorKind::LeapFrog => Integrator::from(LeapFrog),
            IntegratorKind::PredictorCorrector => {
                Integrator::from(PredictorCorrector { shadow: None })
            }
            IntegratorKind::RungeKutta4 => Integrator::from(RungeKutta4),
            IntegratorKind::BulirschStoer => Integrator::from(BulirschStoer {
                tolerance: 1e-6,
                max_attempts: 8,
            }),
        })
    }
}

/// Symplectic Euler: the first derivative is kicked before the value
/// drifts, one derivative evaluation per step.
pub struct EulerExplicit;

impl IntegratorStep for EulerExplicit {
    fn step(
        &mut self,
        solver: &mut dyn Solver,
        storage: &mut Storage,
        _stats: &mut Statistics,
        dt: FT,
    ) {
        solver.integrate(storage, _stats);
        for (_, q) in storage.quantities_mut() {
            match q.order() {
                OrderEnum::Zero => {}
                OrderEnum::First => {
                    let (value, dt_buf, ..) = split_levels(q);
                    value.axpy(dt_buf, dt);
                }
                OrderEnum::Second => {
                    let (value, dt_buf, d2t_buf) = split_levels(q);
                    dt_buf.axpy(d2t_buf.unwrap(), dt);
                    value.axpy(dt_buf, dt);
                }
            }
        }
        clamp_bounded(storage);
    }
}

fn split_levels(
    q: &mut crate::storage::Quantity,
) -> (
    &mut crate::storage::Buffer,
    &mut crate::storage::Buffer,
    Option<&mut crate::storage::Buffer>,
) {
    let (value, dt, d2t) = q.levels_mut();
    (value, dt.expect("quantity has no derivative"), d2t)
}

/// Kick–drift–kick leap-frog; second-order accurate for conservative
/// forces.
pub struct LeapFrog;

impl IntegratorStep for LeapFrog {
    fn step(
        &mut self,
        solver: &mut dyn Solver,
        storage: &mut Storage,
        stats: &mut Statistics,
        dt: FT,
    ) {
        // kick with the acceleration of the previous step, then drift
        for (_, q) in storage.quantities_mut() {
            if q.order() == OrderEnum::Second {
                let (value, dt_buf, d2t_buf) = split_levels(q);
                dt_buf.axpy(d2t_buf.unwrap(), 0.5 * dt);
                value.axpy(dt_buf, dt);
            }
        }
        solver.integrate(storage, stats);
        // close the kick and advance first-order quantities with the fresh
        // derivatives
        for (_, q) in storage.quantities_mut() {
            match q.order() {
                OrderEnum::Zero => {}
                OrderEnum::First => {
                    let (value, dt_buf, ..) = split_levels(q);
                    value.axpy(dt_buf, dt);
                }
                OrderEnum::Second => {
                    let (_, dt_buf, d2t_buf) = split_levels(q);
                    dt_buf.axpy(d2t_buf.unwrap(), 0.5 * dt);
                }
            }
        }
        clamp_bounded(storage);
    }
}

/// Predictor–corrector keeping the previous derivatives in a shadow
/// storage registered on the dependent chain, so merges and removals in the
/// main storage propagate to it.
pub struct PredictorCorrector {
    pub(crate) shadow: Option<Arc<RwLock<Storage>>>,
}

impl IntegratorStep for PredictorCorrector {
    fn step(
        &mut self,
        solver: &mut dyn Solver,
        storage: &mut Storage,
        stats: &mut Statistics,
        dt: FT,
    ) {
        // predict with the current derivatives
        for (_, q) in storage.quantities_mut() {
            match q.order() {
                OrderEnum::Zero => {}
                OrderEnum::First => {
                    let (value, dt_buf, ..) = split_levels(q);
                    value.axpy(dt_buf, dt);
                }
                OrderEnum::Second => {
                    let (value, dt_buf, d2t_buf) = split_levels(q);
                    value.axpy(dt_buf, dt);
                    value.axpy(d2t_buf.as_deref().unwrap(), 0.5 * dt * dt);
                    dt_buf.axpy(d2t_buf.unwrap(), dt);
                }
            }
        }

        // keep the predictor derivatives; the shadow only needs the highest
        // level
        let old = storage.clone_selected(CloneFlags::HIGHEST_DERIVATIVES);
        match &self.shadow {
            Some(shadow) => *shadow.write().unwrap() = old,
            None => {
                let shadow = Arc::new(RwLock::new(old));
                storage.add_dependent(Arc::downgrade(&shadow));
                self.shadow = Some(shadow);
            }
        }

        solver.integrate(storage, stats);

        // correct with the derivative difference
        let shadow = self.shadow.as_ref().unwrap().read().unwrap();
        for (id, q) in storage.quantities_mut() {
            let old_q = shadow.quantity(id);
            match q.order() {
                OrderEnum::Zero => {}
                OrderEnum::First => {
                    let (value, dt_buf, ..) = split_levels(q);
                    value.axpy(dt_buf, 0.5 * dt);
                    value.axpy(old_q.buffer(1).unwrap(), -0.5 * dt);
                }
                OrderEnum::Second => {
                    let (value, dt_buf, d2t_buf) = split_levels(q);
                    let d2t_buf = d2t_buf.unwrap();
                    let old_d2t = old_q.buffer(2).unwrap();
                    value.axpy(d2t_buf, dt * dt / 6.);
                    value.axpy(old_d2t, -dt * dt / 6.);
                    dt_buf.axpy(d2t_buf, 0.5 * dt);
                    dt_buf.axpy(old_d2t, -0.5 * dt);
                }
            }
        }
        drop(shadow);
        clamp_bounded(storage);
    }
}

/// Classical four-stage Runge–Kutta over all time-dependent quantities.
pub struct RungeKutta4;

impl IntegratorStep for RungeKutta4 {
    fn step(
        &mut self,
        solver: &mut dyn Solver,
        storage: &mut Storage,
        stats: &mut Statistics,
        dt: FT,
    ) {
        let base = storage.clone_selected(CloneFlags::ALL);
        let derivative_levels = CloneFlags::FIRST_DERIVATIVES | CloneFlags::SECOND_DERIVATIVES;

        solver.integrate(storage, stats);
        let k1 = storage.clone_selected(derivative_levels);

        state_copy(storage, &base);
        state_axpy(storage, &k1, 0.5 * dt);
        solver.integrate(storage, stats);
        let k2 = storage.clone_selected(derivative_levels);

        state_copy(storage, &base);
        state_axpy(storage, &k2, 0.5 * dt);
        solver.integrate(storage, stats);
        let k3 = storage.clone_selected(derivative_levels);

        state_copy(storage, &base);
        state_axpy(storage, &k3, dt);
        solver.integrate(storage, stats);
        let k4 = storage.clone_selected(derivative_levels);

        state_copy(storage, &base);
        state_axpy(storage, &k1, dt / 6.);
        state_axpy(storage, &k2, dt / 3.);
        state_axpy(storage, &k3, dt / 3.);
        state_axpy(storage, &k4, dt / 6.);
        clamp_bounded(storage);
    }
}

/// Modified-midpoint integration with Richardson extrapolation over the
/// substep counts {2, 4}. The only integrator that may reject: a failed
/// error check halves the internal step and retries, invisibly to the
/// time-step criteria.
pub struct BulirschStoer {
    pub tolerance: FT,
    pub max_attempts: usize,
}

impl BulirschStoer {
    /// Modified midpoint across `h` using `n` substeps; leaves the storage
    /// holding the final state.
    fn midpoint(
        solver: &mut dyn Solver,
        storage: &mut Storage,
        stats: &mut Statistics,
        base: &Storage,
        h: FT,
        n: usize,
    ) {
        let hsub = h / n as FT;

        // z0 and z1
        state_copy(storage, base);
        solver.integrate(storage, stats);
        let mut prev = storage.clone_selected(CloneFlags::ALL); // z0 + derivatives
        state_axpy(storage, &prev, hsub); // z1

        for _ in 1..n {
            solver.integrate(storage, stats);
            let cur = storage.clone_selected(CloneFlags::ALL);
            // z_{m+1} = z_{m-1} + 2 h f(z_m)
            state_copy(storage, &prev);
            state_axpy(storage, &cur, 2. * hsub);
            prev = cur;
        }

        // final: 0.5 (z_n + z_{n-1} + hsub f(z_n))
        solver.integrate(storage, stats);
        let z_n = storage.clone_selected(CloneFlags::ALL);
        state_axpy(storage, &z_n, hsub);
        state_blend(storage, &prev, 0.5, 0.5);
    }
}

impl IntegratorStep for BulirschStoer {
    fn step(
        &mut self,
        solver: &mut dyn Solver,
        storage: &mut Storage,
        stats: &mut Statistics,
        dt: FT,
    ) {
        let mut remaining = dt;
        let mut h = dt;
        let mut attempts = 0;
        while remaining > 0. {
            let base = storage.clone_selected(CloneFlags::ALL);

            Self::midpoint(solver, storage, stats, &base, h, 2);
            let coarse = storage.clone_selected(CloneFlags::ALL);
            Self::midpoint(solver, storage, stats, &base, h, 4);

            let error = state_max_rel_diff(storage, &coarse);
            if error > self.tolerance && attempts < self.max_attempts {
                // reject: halve the internal step and restore the state
                state_copy(storage, &base);
                h *= 0.5;
                attempts += 1;
                stats.increment(StatsId::IntegratorRejections, 1);
                continue;
            }

            // accept the Richardson extrapolant of the two midpoint results
            state_blend(storage, &coarse, 4. / 3., -1. / 3.);
            remaining -= h;
            h = FT::min(h, remaining);
        }
        clamp_bounded(storage);
    }
}
