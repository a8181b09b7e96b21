use super::{EquationTerm, SweepInput};
use crate::floating_type_mod::FT;
use crate::math::{Interval, SymTensor, TracelessTensor};
use crate::settings::BodySettingsId;
use crate::sph::{Accumulated, BufferRole};
use crate::statistics::Statistics;
use crate::storage::{Material, OrderEnum, QuantityId, Storage};
use crate::{widen, V3, V4};

/// Deviatoric stress force for solid materials, with Hooke's law driving
/// the stress evolution from the accumulated strain rate:
///
/// dv_i = sum_j m_j (S_i / rho_i^2 + S_j / rho_j^2) . grad W_ij
/// dS_i = 2 mu (e_i - tr(e_i) / 3 I),  e_i the symmetrized velocity
/// gradient.
///
/// The damage-scaled yield limit is applied by the solver's material update
/// before the sweep.
pub struct SolidStressForce;

impl EquationTerm for SolidStressForce {
    fn create(&self, storage: &mut Storage, material: &Material) {
        // fluids carry no strength; the term stays inert without the
        // stress column
        if material.rheology().is_none() {
            return;
        }
        storage.insert_uniform::<TracelessTensor>(
            QuantityId::DeviatoricStress,
            OrderEnum::First,
            TracelessTensor::null(),
        );
        storage
            .quantity_mut(QuantityId::DeviatoricStress)
            .set_dt_scale(material.params().get(BodySettingsId::StressMinScale));
        storage.insert_uniform::<SymTensor>(
            QuantityId::VelocityGradient,
            OrderEnum::Zero,
            SymTensor::null(),
        );
        storage.insert_uniform::<FT>(
            QuantityId::Damage,
            OrderEnum::First,
            material.params().get(BodySettingsId::Damage),
        );
        let damage = storage.quantity_mut(QuantityId::Damage);
        damage.set_bounds(material.params().get::<Interval>(BodySettingsId::DamageRange));
        damage.set_dt_scale(1.);
    }

    fn register(&self, acc: &mut Accumulated) {
        acc.insert::<V4>(QuantityId::Position, OrderEnum::Second, BufferRole::Shared);
        acc.insert::<SymTensor>(QuantityId::VelocityGradient, OrderEnum::Zero, BufferRole::Unique);
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
        let Some(stress) = input.stress else {
            return;
        };
        let grad = super::corrected_grad(input, i, grad);
        let f = stress[i].apply(grad) / (input.rho[i] * input.rho[i])
            + stress[j].apply(grad) / (input.rho[j] * input.rho[j]);

        let dv = acc.get_mut::<V4>(QuantityId::Position);
        dv[i] += widen(input.m[j] * f);
        if symmetric {
            dv[j] -= widen(input.m[i] * f);
        }

        let dvel = crate::spatial(input.v[j] - input.v[i]);
        let strain = SymTensor::outer_sym(dvel, grad);
        let gradv = acc.get_mut::<SymTensor>(QuantityId::VelocityGradient);
        gradv[i] += strain * (input.m[j] / input.rho[j]);
        if symmetric {
            gradv[j] += strain * (input.m[i] / input.rho[i]);
        }
    }

    fn finalize(&self, storage: &mut Storage, _stats: &mut Statistics) {
        if !storage.has(QuantityId::DeviatoricStress) {
            return;
        }
        // shear modulus per material range; ranges without a rheology keep
        // zero stress derivative
        let moduli: Vec<(std::ops::Range<usize>, Option<FT>)> = storage
            .materials()
            .iter()
            .map(|entry| {
                (
                    entry.range.clone(),
                    entry.material.rheology().map(|r| r.shear_modulus()),
                )
            })
            .collect();

        let gradv = storage.take_values::<SymTensor>(QuantityId::VelocityGradient);
        {
            let stress = storage.get::<TracelessTensor>(QuantityId::DeviatoricStress).to_vec();
            let rho = storage.get::<FT>(QuantityId::Density).to_vec();
            let ds = storage.get_dt_mut::<TracelessTensor>(QuantityId::DeviatoricStress);
            for (range, mu) in &moduli {
                let Some(mu) = mu else { continue };
                for i in range.clone() {
                    ds[i] += TracelessTensor::from_sym(gradv[i]) * (2. * mu);
                    debug_assert!(ds[i].is_finite());
                }
            }
            // stress power heats the material
            let du = storage.get_dt_mut::<FT>(QuantityId::Energy);
            for (range, mu) in &moduli {
                if mu.is_none() {
                    continue;
                }
                for i in range.clone() {
                    let mut power = 0.;
                    for a in 0..3 {
                        for b in 0..3 {
                            power += stress[i].get(a, b) * gradv[i].get(a, b);
                        }
                    }
                    du[i] += power / rho[i];
                }
            }
        }
        storage.put_values(QuantityId::VelocityGradient, gradv);
    }
}
