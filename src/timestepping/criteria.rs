use crate::floating_type_mod::{EPS, FT};
use crate::math::Interval;
use crate::settings::{RunSettings, RunSettingsId};
use crate::statistics::{Statistics, StatsId};
use crate::storage::{Buffer, OrderEnum, QuantityId, Storage};
use crate::{spatial, V4, H};

/// Which rule produced the current time step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CriterionId {
    /// No criterion ran; the initial step is kept.
    InitialValue,
    /// Capped by the configured maximum or the ratio band.
    MaximalValue,
    Derivative,
    Courant,
    Acceleration,
}

impl CriterionId {
    pub fn name(self) -> &'static str {
        match self {
            CriterionId::InitialValue => "initial value",
            CriterionId::MaximalValue => "maximal value",
            CriterionId::Derivative => "derivative-to-value ratio",
            CriterionId::Courant => "CFL condition",
            CriterionId::Acceleration => "acceleration",
        }
    }
}

/// `dt_i = C h_i / cs_i`, reduced across particles by a generalized mean
/// with configurable exponent; minus infinity degenerates to the minimum.
pub struct CourantCriterion {
    pub factor: FT,
    pub mean_power: FT,
}

impl CourantCriterion {
    pub fn compute(&self, storage: &Storage) -> Option<FT> {
        if !storage.has(QuantityId::SoundSpeed) {
            return None;
        }
        let r = storage.get::<V4>(QuantityId::Position);
        let cs = storage.get::<FT>(QuantityId::SoundSpeed);
        if r.is_empty() {
            return None;
        }
        let dts = r
            .iter()
            .zip(cs)
            .map(|(r, cs)| self.factor * r[H] / cs.max(EPS));
        if self.mean_power == FT::NEG_INFINITY {
            return dts.clone().min_by(|a, b| a.partial_cmp(b).unwrap());
        }
        let p = self.mean_power;
        let sum: FT = dts.clone().map(|dt| dt.powf(p)).sum();
        Some((sum / r.len() as FT).powf(1. / p))
    }
}

/// `dt_i = k |y_i| / (|dy_i| + eps)` over every first-order quantity, with
/// the value magnitude floored by the quantity's minimal scale. Remembers
/// which quantity and particle dominated.
pub struct DerivativeCriterion {
    pub factor: FT,
}

fn buffer_norm(buffer: &Buffer, i: usize) -> Option<FT> {
    match buffer {
        Buffer::Scalar(v) => Some(v[i].abs()),
        Buffer::Vector(v) => Some(spatial(v[i]).norm()),
        Buffer::SymTensor(v) => {
            let t = v[i];
            let mut acc = 0.;
            for a in 0..3 {
                for b in 0..3 {
                    acc += t.get(a, b) * t.get(a, b);
                }
            }
            Some(acc.sqrt())
        }
        Buffer::TracelessTensor(v) => {
            let t = v[i];
            let mut acc = 0.;
            for a in 0..3 {
                for b in 0..3 {
                    acc += t.get(a, b) * t.get(a, b);
                }
            }
            Some(acc.sqrt())
        }
        Buffer::Tensor(_) | Buffer::Index(_) => None,
    }
}

impl DerivativeCriterion {
    pub fn compute(&self, storage: &Storage, stats: &mut Statistics) -> Option<FT> {
        let mut best: Option<(FT, QuantityId, usize)> = None;
        for (id, q) in storage.quantities() {
            if q.order() != OrderEnum::First {
                continue;
            }
            let values = q.buffer(0).unwrap();
            let derivatives = q.buffer(1).unwrap();
            let scale = q.dt_scale();
            for i in 0..q.len() {
                let Some(value) = buffer_norm(values, i) else {
                    break;
                };
                let derivative = buffer_norm(derivatives, i).unwrap();
                let dt = self.factor * value.max(scale) / (derivative + EPS);
                if best.map(|(b, ..)| dt < b).unwrap_or(true) {
                    best = Some((dt, id, i));
                }
            }
        }
        let (dt, id, particle) = best?;
        stats.set_text(StatsId::LimitingQuantity, id.metadata().name);
        stats.set_int(StatsId::LimitingParticle, particle as i64);
        Some(dt)
    }
}

/// `dt_i = sqrt(h_i / |a_i|)`.
pub struct AccelerationCriterion;

impl AccelerationCriterion {
    pub fn compute(&self, storage: &Storage) -> Option<FT> {
        if storage.quantity(QuantityId::Position).order() != OrderEnum::Second {
            return None;
        }
        let r = storage.get::<V4>(QuantityId::Position);
        let a = storage.get_d2t::<V4>(QuantityId::Position);
        r.iter()
            .zip(a)
            .map(|(r, a)| {
                let a_norm = spatial(*a).norm();
                if a_norm == 0. {
                    FT::INFINITY
                } else {
                    (r[H] / a_norm).sqrt()
                }
            })
            .min_by(|a, b| a.partial_cmp(b).unwrap())
    }
}

pub const CRITERION_COURANT: i64 = 1 << 0;
pub const CRITERION_DERIVATIVE: i64 = 1 << 1;
pub const CRITERION_ACCELERATION: i64 = 1 << 2;

/// Minimum over the enabled criteria, with the step-to-step ratio limited
/// to a configured band to avoid oscillation.
pub struct MultiCriterion {
    courant: Option<CourantCriterion>,
    derivative: Option<DerivativeCriterion>,
    acceleration: Option<AccelerationCriterion>,
    max_dt: FT,
    ratio_band: Interval,
    last_dt: FT,
}

impl MultiCriterion {
    pub fn from_settings(settings: &RunSettings) -> Self {
        let flags: i64 = settings.get(RunSettingsId::TimesteppingCriteria);
        MultiCriterion {
            courant: (flags & CRITERION_COURANT != 0).then(|| CourantCriterion {
                factor: settings.get(RunSettingsId::TimesteppingCourant),
                mean_power: settings.get(RunSettingsId::TimesteppingCourantMeanPower),
            }),
            derivative: (flags & CRITERION_DERIVATIVE != 0).then(|| DerivativeCriterion {
                factor: settings.get(RunSettingsId::TimesteppingDerivativeFactor),
            }),
            acceleration: (flags & CRITERION_ACCELERATION != 0).then_some(AccelerationCriterion),
            max_dt: settings.get(RunSettingsId::TimesteppingMaxDt),
            ratio_band: settings.get(RunSettingsId::TimesteppingDtRatioBand),
            last_dt: settings.get(RunSettingsId::TimesteppingInitialDt),
        }
    }

    pub fn compute(&mut self, storage: &Storage, stats: &mut Statistics) -> FT {
        let mut result: Option<(FT, CriterionId)> = None;
        let mut consider = |candidate: Option<FT>, id: CriterionId| {
            if let Some(dt) = candidate {
                if result.map(|(best, _)| dt < best).unwrap_or(true) {
                    result = Some((dt, id));
                }
            }
        };
        if let Some(courant) = &self.courant {
            consider(courant.compute(storage), CriterionId::Courant);
        }
        if let Some(derivative) = &self.derivative {
            consider(derivative.compute(storage, stats), CriterionId::Derivative);
        }
        if let Some(acceleration) = &self.acceleration {
            consider(acceleration.compute(storage), CriterionId::Acceleration);
        }

        let (mut dt, mut id) = result.unwrap_or((self.last_dt, CriterionId::InitialValue));

        // limit the step-to-step change
        let lowest = self.last_dt * self.ratio_band.lower();
        let highest = self.last_dt * self.ratio_band.upper();
        if dt < lowest {
            dt = lowest;
        } else if dt > highest {
            dt = highest;
            id = CriterionId::MaximalValue;
        }
        if dt > self.max_dt {
            dt = self.max_dt;
            id = CriterionId::MaximalValue;
        }
        self.last_dt = dt;
        stats.set_text(StatsId::TimestepCriterion, id.name());
        dt
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{Material, Quantity};
    use crate::vec4;

    fn storage_with_cs(h: &[FT], cs: &[FT]) -> Storage {
        let mut storage = Storage::with_material(Material::null());
        let r: Vec<V4> = h.iter().map(|&h| vec4(0., 0., 0., h)).collect();
        storage.insert(QuantityId::Position, OrderEnum::Second, r);
        storage.insert(QuantityId::SoundSpeed, OrderEnum::Zero, cs.to_vec());
        storage
    }

    #[test]
    fn courant_min_reduction() {
        let storage = storage_with_cs(&[1., 2., 0.5], &[1., 1., 1.]);
        let criterion = CourantCriterion {
            factor: 0.5,
            mean_power: FT::NEG_INFINITY,
        };
        crate::assert_ft_approx_eq(
            criterion.compute(&storage).unwrap(),
            0.25,
            1e-12,
            || "min".into(),
        );
    }

    #[test]
    fn derivative_criterion_finds_limiting_particle() {
        let mut storage = storage_with_cs(&[1.], &[1.]);
        storage.insert(QuantityId::Density, OrderEnum::First, vec![100.]);
        storage.get_dt_mut::<FT>(QuantityId::Density)[0] = 50.;
        let criterion = DerivativeCriterion { factor: 0.2 };
        let mut stats = Statistics::new();
        let dt = criterion.compute(&storage, &mut stats).unwrap();
        crate::assert_ft_approx_eq(dt, 0.2 * 100. / 50., 1e-9, || "dt".into());
        assert_eq!(stats.get_int(StatsId::LimitingParticle), 0);
    }

    #[test]
    fn ratio_band_limits_growth() {
        let mut settings = RunSettings::default();
        settings.set(RunSettingsId::TimesteppingCriteria, 0i64);
        settings.set(RunSettingsId::TimesteppingInitialDt, 1e-3);
        let mut multi = MultiCriterion::from_settings(&settings);
        let storage = storage_with_cs(&[1.], &[1.]);
        let mut stats = Statistics::new();
        // with no criteria enabled the initial step persists
        let dt = multi.compute(&storage, &mut stats);
        crate::assert_ft_approx_eq(dt, 1e-3, 1e-12, || "dt".into());

        // a courant-dominated step cannot grow faster than the band allows
        let mut settings = RunSettings::default();
        settings
            .set(RunSettingsId::TimesteppingCriteria, CRITERION_COURANT)
            .set(RunSettingsId::TimesteppingInitialDt, 1e-4)
            .set(RunSettingsId::TimesteppingCourant, 1.0)
            .set(RunSettingsId::TimesteppingMaxDt, 10.);
        let mut multi = MultiCriterion::from_settings(&settings);
        let dt = multi.compute(&storage, &mut stats);
        crate::assert_ft_approx_eq(dt, 5e-4, 1e-12, || "banded".into());
    }

    #[test]
    fn unused_quantity_type_is_ignored() {
        let mut storage = storage_with_cs(&[1.], &[1.]);
        storage
            .quantity_mut(QuantityId::Position)
            .set_bounds(Interval::unbounded());
        let _ = Quantity::uniform::<u32>(OrderEnum::Zero, 1, 1);
        let criterion = DerivativeCriterion { factor: 0.2 };
        let mut stats = Statistics::new();
        assert!(criterion.compute(&storage, &mut stats).is_none());
    }
}
