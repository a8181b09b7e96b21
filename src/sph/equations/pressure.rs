use super::{EquationTerm, SweepInput};
use crate::floating_type_mod::FT;
use crate::math::Interval;
use crate::settings::BodySettingsId;
use crate::sph::{Accumulated, BufferRole};
use crate::storage::{Material, OrderEnum, QuantityId, Storage};
use crate::{spatial, widen, V3, V4};

/// Symmetric pressure gradient and the matching internal-energy equation:
///
/// dv_i = -sum_j m_j (p_i / rho_i^2 + p_j / rho_j^2) grad W_ij
/// du_i =  p_i / rho_i^2 sum_j m_j (v_i - v_j) . grad W_ij
pub struct PressureForce;

impl EquationTerm for PressureForce {
    fn create(&self, storage: &mut Storage, material: &Material) {
        storage.insert_uniform::<FT>(
            QuantityId::Energy,
            OrderEnum::First,
            material.params().get(BodySettingsId::Energy),
        );
        {
            let energy = storage.quantity_mut(QuantityId::Energy);
            energy.set_bounds(material.params().get::<Interval>(BodySettingsId::EnergyRange));
            energy.set_dt_scale(material.params().get(BodySettingsId::EnergyMinScale));
        }
        storage.insert_uniform::<FT>(QuantityId::Pressure, OrderEnum::Zero, 0.);
        storage.insert_uniform::<FT>(QuantityId::SoundSpeed, OrderEnum::Zero, 0.);
    }

    fn register(&self, acc: &mut Accumulated) {
        acc.insert::<V4>(QuantityId::Position, OrderEnum::Second, BufferRole::Shared);
        acc.insert::<FT>(QuantityId::Energy, OrderEnum::First, BufferRole::Shared);
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
        let p_rho_i = input.p[i] / (input.rho[i] * input.rho[i]);
        let p_rho_j = input.p[j] / (input.rho[j] * input.rho[j]);
        let f = (p_rho_i + p_rho_j) * grad;
        debug_assert!(crate::all_finite(f));
        let delta = spatial(input.v[i] - input.v[j]).dot(&grad);

        let dv = acc.get_mut::<V4>(QuantityId::Position);
        dv[i] -= widen(input.m[j] * f);
        if symmetric {
            dv[j] += widen(input.m[i] * f);
        }

        let du = acc.get_mut::<FT>(QuantityId::Energy);
        du[i] += p_rho_i * input.m[j] * delta;
        if symmetric {
            du[j] += p_rho_j * input.m[i] * delta;
        }
    }
}
