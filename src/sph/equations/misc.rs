use super::{EquationTerm, SweepInput};
use crate::floating_type_mod::FT;
use crate::sph::{Accumulated, BufferRole};
use crate::statistics::Statistics;
use crate::storage::{Material, OrderEnum, QuantityId, Storage};
use crate::{spatial, widen, V3, V4};

/// XSPH velocity smoothing. The correction is accumulated during the sweep
/// and folded into the velocities afterwards.
pub struct XsphCorrection {
    pub epsilon: FT,
}

impl EquationTerm for XsphCorrection {
    fn create(&self, storage: &mut Storage, _material: &Material) {
        storage.insert_uniform::<V4>(QuantityId::XsphVelocities, OrderEnum::Zero, V4::zeros());
    }

    fn register(&self, acc: &mut Accumulated) {
        acc.insert::<V4>(QuantityId::XsphVelocities, OrderEnum::Zero, BufferRole::Unique);
    }

    fn eval_pair(
        &self,
        input: &SweepInput,
        i: usize,
        j: usize,
        _grad: V3,
        w: FT,
        symmetric: bool,
        acc: &mut Accumulated,
    ) {
        let rhobar = 0.5 * (input.rho[i] + input.rho[j]);
        let dvel = spatial(input.v[j] - input.v[i]);
        let out = acc.get_mut::<V4>(QuantityId::XsphVelocities);
        out[i] += widen(self.epsilon * input.m[j] / rhobar * w * dvel);
        if symmetric {
            out[j] -= widen(self.epsilon * input.m[i] / rhobar * w * dvel);
        }
    }

    fn finalize(&self, storage: &mut Storage, _stats: &mut Statistics) {
        let correction = storage.take_values::<V4>(QuantityId::XsphVelocities);
        {
            let v = storage.get_dt_mut::<V4>(QuantityId::Position);
            for (vi, ci) in v.iter_mut().zip(&correction) {
                *vi += ci;
            }
        }
        storage.put_values(QuantityId::XsphVelocities, correction);
    }
}

/// Kernel-weighted drag on the relative velocity of neighbouring particles;
/// a crude internal friction for damaged material. Dissipated energy heats
/// both particles.
pub struct InternalFriction {
    pub coefficient: FT,
}

impl EquationTerm for InternalFriction {
    fn create(&self, _storage: &mut Storage, _material: &Material) {}

    fn register(&self, acc: &mut Accumulated) {
        acc.insert::<V4>(QuantityId::Position, OrderEnum::Second, BufferRole::Shared);
        acc.insert::<FT>(QuantityId::Energy, OrderEnum::First, BufferRole::Shared);
    }

    fn eval_pair(
        &self,
        input: &SweepInput,
        i: usize,
        j: usize,
        _grad: V3,
        w: FT,
        symmetric: bool,
        acc: &mut Accumulated,
    ) {
        let rhobar = 0.5 * (input.rho[i] + input.rho[j]);
        let dvel = spatial(input.v[i] - input.v[j]);
        let drag = self.coefficient * w / rhobar;

        let dv = acc.get_mut::<V4>(QuantityId::Position);
        dv[i] -= widen(input.m[j] * drag * dvel);
        if symmetric {
            dv[j] += widen(input.m[i] * drag * dvel);
        }

        let heating = 0.5 * drag * dvel.norm_squared();
        let du = acc.get_mut::<FT>(QuantityId::Energy);
        du[i] += input.m[j] * heating;
        if symmetric {
            du[j] += input.m[i] * heating;
        }
    }
}

/// Velocity divergence, `div v_i = sum_j m_j / rho_j (v_j - v_i) . grad`.
pub struct VelocityDivergence;

impl EquationTerm for VelocityDivergence {
    fn create(&self, storage: &mut Storage, _material: &Material) {
        storage.insert_uniform::<FT>(QuantityId::VelocityDivergence, OrderEnum::Zero, 0.);
    }

    fn register(&self, acc: &mut Accumulated) {
        acc.insert::<FT>(QuantityId::VelocityDivergence, OrderEnum::Zero, BufferRole::Unique);
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
        let delta = spatial(input.v[j] - input.v[i]).dot(&grad);
        let divv = acc.get_mut::<FT>(QuantityId::VelocityDivergence);
        divv[i] += input.m[j] / input.rho[j] * delta;
        if symmetric {
            divv[j] += input.m[i] / input.rho[i] * delta;
        }
    }
}

/// Inertial accelerations of a frame co-rotating with the target body,
/// used while stabilizing a spinning target before the impact:
///
/// dv_i += -2 w x v_i - w x (w x r_i)
pub struct NonInertialForce {
    pub frame_omega: crate::V3,
}

impl EquationTerm for NonInertialForce {
    fn create(&self, _storage: &mut Storage, _material: &Material) {}

    fn register(&self, _acc: &mut Accumulated) {}

    fn eval_pair(
        &self,
        _input: &SweepInput,
        _i: usize,
        _j: usize,
        _grad: V3,
        _w: FT,
        _symmetric: bool,
        _acc: &mut Accumulated,
    ) {
    }

    fn finalize(&self, storage: &mut Storage, _stats: &mut Statistics) {
        let omega = self.frame_omega;
        let (r, v, dv) = storage
            .quantity_mut(QuantityId::Position)
            .all_mut::<V4>();
        for ((r, v), dv) in r.iter().zip(v.iter()).zip(dv.iter_mut()) {
            let coriolis = -2. * omega.cross(&spatial(*v));
            let centrifugal = -omega.cross(&omega.cross(&spatial(*r)));
            *dv += widen(coriolis + centrifugal);
        }
    }
}

/// Velocity curl, used to transfer bulk rotation to fragment spins.
pub struct VelocityRotation;

impl EquationTerm for VelocityRotation {
    fn create(&self, storage: &mut Storage, _material: &Material) {
        storage.insert_uniform::<V4>(QuantityId::VelocityRotation, OrderEnum::Zero, V4::zeros());
    }

    fn register(&self, acc: &mut Accumulated) {
        acc.insert::<V4>(QuantityId::VelocityRotation, OrderEnum::Zero, BufferRole::Unique);
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
        let rot = spatial(input.v[j] - input.v[i]).cross(&grad);
        let out = acc.get_mut::<V4>(QuantityId::VelocityRotation);
        out[i] += widen(input.m[j] / input.rho[j] * rot);
        if symmetric {
            out[j] += widen(input.m[i] / input.rho[i] * rot);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::statistics::Statistics;
    use crate::storage::{Material, OrderEnum, Storage};
    use crate::{assert_v3_approx_eq, vec3, vec4};

    #[test]
    fn rotating_frame_accelerations() {
        let mut storage = Storage::with_material(Material::null());
        storage.insert(
            QuantityId::Position,
            OrderEnum::Second,
            vec![vec4(1., 0., 0., 0.1)],
        );
        storage.get_dt_mut::<V4>(QuantityId::Position)[0] = vec4(0., 1., 0., 0.);

        let term = NonInertialForce {
            frame_omega: vec3(0., 0., 2.),
        };
        let mut stats = Statistics::new();
        term.finalize(&mut storage, &mut stats);

        // coriolis -2 w x v = (4, 0, 0) plus centrifugal -w x (w x r) = (4, 0, 0)
        let dv = storage.get_d2t::<V4>(QuantityId::Position)[0];
        assert_v3_approx_eq(spatial(dv), vec3(8., 0., 0.), 1e-12, || "frame force".into());
    }
}
