pub mod distribution;

pub use distribution::{generate_positions, DistributionKind};

use crate::boundary::Domain;
use crate::floating_type_mod::FT;
use crate::math::Interval;
use crate::run::RunError;
use crate::settings::{BodySettings, BodySettingsId};
use crate::storage::{Material, OrderEnum, QuantityId, Storage};
use crate::{vec4, V3, V4};

/// Builds bodies into a storage: each call distributes particles inside a
/// domain, assigns material parameters and initial kinematics, appends a
/// material range and bumps the per-particle body flag.
pub struct InitialConditions {
    body_index: u32,
}

impl Default for InitialConditions {
    fn default() -> Self {
        InitialConditions::new()
    }
}

impl InitialConditions {
    pub fn new() -> Self {
        InitialConditions { body_index: 0 }
    }

    /// Appends one body; returns the number of particles created.
    pub fn add_body(
        &mut self,
        storage: &mut Storage,
        domain: &Domain,
        params: BodySettings,
    ) -> Result<usize, RunError> {
        let target_count = params.get::<i64>(BodySettingsId::ParticleCount);
        if target_count <= 0 {
            return Err(RunError::Config("body particle count must be positive".into()));
        }
        let kind: DistributionKind = params.get_enum(BodySettingsId::Distribution)?;
        let positions = generate_positions(kind, target_count as usize, domain);
        let n = positions.len();
        if n == 0 {
            return Err(RunError::Config("particle distribution is empty".into()));
        }

        let rho0: FT = params.get(BodySettingsId::Density);
        let eta: FT = params.get(BodySettingsId::SmoothingLengthEta);
        let center: V3 = params.get(BodySettingsId::BodyCenter);
        let velocity: V3 = params.get(BodySettingsId::BodyVelocity);
        let spin: V3 = params.get(BodySettingsId::BodySpin);

        // equal masses; the smoothing length follows the mean particle
        // volume
        let mass = domain.volume() * rho0 / n as FT;
        let h = eta * (mass / rho0).cbrt();

        let material = Material::new(params.clone())?;
        let mut body = Storage::with_material(material);

        let r: Vec<V4> = positions
            .iter()
            .map(|p| {
                let shifted = p + center;
                vec4(shifted.x, shifted.y, shifted.z, h)
            })
            .collect();
        body.insert(QuantityId::Position, OrderEnum::Second, r);
        {
            let v = body.get_dt_mut::<V4>(QuantityId::Position);
            for (v, p) in v.iter_mut().zip(&positions) {
                // rigid rotation about the body center plus bulk velocity
                let rotational = spin.cross(p);
                *v = crate::widen(velocity + rotational);
            }
        }
        body.insert_uniform::<FT>(QuantityId::Mass, OrderEnum::Zero, mass);
        body.insert_uniform::<FT>(QuantityId::Density, OrderEnum::First, rho0);
        {
            let density = body.quantity_mut(QuantityId::Density);
            density.set_bounds(params.get::<Interval>(BodySettingsId::DensityRange));
            density.set_dt_scale(params.get(BodySettingsId::DensityMinScale));
        }
        body.insert_uniform::<FT>(
            QuantityId::Energy,
            OrderEnum::First,
            params.get(BodySettingsId::Energy),
        );
        body.quantity_mut(QuantityId::Energy)
            .set_bounds(params.get::<Interval>(BodySettingsId::EnergyRange));
        body.insert_uniform::<u32>(QuantityId::Flag, OrderEnum::Zero, self.body_index);

        storage.merge(body);
        self.body_index += 1;
        Ok(n)
    }

    /// Single hard sphere, used to assemble N-body setups.
    pub fn add_sphere(
        &mut self,
        storage: &mut Storage,
        pos: V3,
        radius: FT,
        mass: FT,
        velocity: V3,
    ) {
        let mut body = Storage::with_material(Material::null());
        body.insert(
            QuantityId::Position,
            OrderEnum::Second,
            vec![vec4(pos.x, pos.y, pos.z, radius)],
        );
        body.get_dt_mut::<V4>(QuantityId::Position)[0] = crate::widen(velocity);
        body.insert(QuantityId::Mass, OrderEnum::Zero, vec![mass]);
        body.insert(QuantityId::Flag, OrderEnum::Zero, vec![self.body_index]);
        storage.merge(body);
        self.body_index += 1;
    }
}
