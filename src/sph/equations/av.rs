use super::{EquationTerm, SweepInput};
use crate::floating_type_mod::FT;
use crate::sph::{Accumulated, BufferRole};
use crate::storage::{Material, OrderEnum, QuantityId, Storage};
use crate::{spatial, widen, V3, V4, H};

/// Monaghan artificial viscosity with the usual alpha/beta form. Active
/// only for approaching pairs; the dissipated energy heats both particles.
pub struct StandardAV {
    pub alpha: FT,
    pub beta: FT,
}

const MU_EPS: FT = 0.01;

impl StandardAV {
    pub fn new(alpha: FT, beta: FT) -> Self {
        StandardAV { alpha, beta }
    }

    fn pi_ij(&self, input: &SweepInput, i: usize, j: usize) -> FT {
        let dr = spatial(input.r[i] - input.r[j]);
        let dv = spatial(input.v[i] - input.v[j]);
        let vdotr = dv.dot(&dr);
        if vdotr >= 0. {
            return 0.;
        }
        let hbar = 0.5 * (input.r[i][H] + input.r[j][H]);
        let cbar = 0.5 * (input.cs[i] + input.cs[j]);
        let rhobar = 0.5 * (input.rho[i] + input.rho[j]);
        let mu = hbar * vdotr / (dr.norm_squared() + MU_EPS * hbar * hbar);
        (-self.alpha * cbar * mu + self.beta * mu * mu) / rhobar
    }
}

impl EquationTerm for StandardAV {
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
        grad: V3,
        _w: FT,
        symmetric: bool,
        acc: &mut Accumulated,
    ) {
        let av = self.pi_ij(input, i, j);
        if av == 0. {
            return;
        }
        debug_assert!(av.is_finite());
        let delta = spatial(input.v[i] - input.v[j]).dot(&grad);
        let f = av * grad;

        let dv = acc.get_mut::<V4>(QuantityId::Position);
        dv[i] -= widen(input.m[j] * f);
        if symmetric {
            dv[j] += widen(input.m[i] * f);
        }

        let du = acc.get_mut::<FT>(QuantityId::Energy);
        du[i] += 0.5 * input.m[j] * av * delta;
        if symmetric {
            du[j] += 0.5 * input.m[i] * av * delta;
        }
    }
}
