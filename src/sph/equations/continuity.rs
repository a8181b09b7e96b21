use super::{EquationTerm, SweepInput};
use crate::floating_type_mod::FT;
use crate::math::Interval;
use crate::settings::BodySettingsId;
use crate::sph::{Accumulated, BufferRole};
use crate::storage::{Material, OrderEnum, QuantityId, Storage};
use crate::{spatial, V3};

/// Continuity equation, `drho_i = sum_j m_j (v_i - v_j) . grad W_ij`.
pub struct ContinuityEquation;

impl EquationTerm for ContinuityEquation {
    fn create(&self, storage: &mut Storage, material: &Material) {
        storage.insert_uniform::<FT>(
            QuantityId::Density,
            OrderEnum::First,
            material.params().get(BodySettingsId::Density),
        );
        let density = storage.quantity_mut(QuantityId::Density);
        density.set_bounds(material.params().get::<Interval>(BodySettingsId::DensityRange));
        density.set_dt_scale(material.params().get(BodySettingsId::DensityMinScale));
    }

    fn register(&self, acc: &mut Accumulated) {
        acc.insert::<FT>(QuantityId::Density, OrderEnum::First, BufferRole::Unique);
    }

    fn eval_pair(
        &self,
        input: &SweepInput,
        i: usize,
        j: usize,
        grad: V3,
        _w: FT,
        symmetric: bool,
        acc: &mut Accumulated,
    ) {
        let delta = spatial(input.v[i] - input.v[j]).dot(&grad);
        debug_assert!(delta.is_finite());
        let drho = acc.get_mut::<FT>(QuantityId::Density);
        drho[i] += input.m[j] * delta;
        if symmetric {
            drho[j] += input.m[i] * delta;
        }
    }
}
