use crate::floating_type_mod::FT;
use crate::math::TracelessTensor;
use crate::settings::{BodySettings, BodySettingsId, SettingEnum};

/// Strength model limiting the deviatoric stress of solid materials.
/// Closure numerics are intentionally simple; the interface is what the
/// solvers depend on.
pub trait Rheology: Send + Sync {
    /// Shear modulus entering the Hooke stress evolution.
    fn shear_modulus(&self) -> FT;

    /// Reduces the trial stress according to the yield criterion.
    fn limit_stress(&self, stress: TracelessTensor, damage: FT) -> TracelessTensor;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RheologyKind {
    None,
    VonMises,
}

impl SettingEnum for RheologyKind {
    fn to_index(self) -> i64 {
        match self {
            RheologyKind::None => 0,
            RheologyKind::VonMises => 1,
        }
    }

    fn from_index(index: i64) -> Option<Self> {
        match index {
            0 => Some(RheologyKind::None),
            1 => Some(RheologyKind::VonMises),
            _ => None,
        }
    }
}

/// Von Mises yielding: stress is scaled down once the second invariant
/// exceeds the elasticity limit; fully damaged material carries no stress.
pub struct VonMisesRheology {
    shear_modulus: FT,
    elasticity_limit: FT,
}

impl VonMisesRheology {
    pub fn new(shear_modulus: FT, elasticity_limit: FT) -> Self {
        assert!(shear_modulus > 0. && elasticity_limit > 0.);
        VonMisesRheology {
            shear_modulus,
            elasticity_limit,
        }
    }
}

impl Rheology for VonMisesRheology {
    fn shear_modulus(&self) -> FT {
        self.shear_modulus
    }

    fn limit_stress(&self, stress: TracelessTensor, damage: FT) -> TracelessTensor {
        let s = stress.to_sym();
        // second invariant J2 = 1/2 S:S
        let mut j2 = 0.;
        for i in 0..3 {
            for j in 0..3 {
                j2 += 0.5 * s.get(i, j) * s.get(i, j);
            }
        }
        let yield_stress = self.elasticity_limit * (1. - damage).clamp(0., 1.);
        if yield_stress <= 0. {
            return TracelessTensor::null();
        }
        let reduce = FT::min(1., yield_stress * yield_stress / (3. * j2).max(1e-30));
        stress * reduce.sqrt()
    }
}

pub fn rheology_from_settings(
    body: &BodySettings,
) -> Result<Option<Box<dyn Rheology>>, crate::run::RunError> {
    let kind: RheologyKind = body.get_enum(BodySettingsId::RheologyKind)?;
    Ok(match kind {
        RheologyKind::None => None,
        RheologyKind::VonMises => Some(Box::new(VonMisesRheology::new(
            body.get(BodySettingsId::ShearModulus),
            body.get(BodySettingsId::ElasticityLimit),
        ))),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stress_below_limit_is_unchanged() {
        let rheology = VonMisesRheology::new(1e10, 1e9);
        let s = TracelessTensor::new(1e6, -5e5, 1e5, 0., 0.);
        assert_eq!(rheology.limit_stress(s, 0.), s);
    }

    #[test]
    fn damaged_material_carries_no_stress() {
        let rheology = VonMisesRheology::new(1e10, 1e9);
        let s = TracelessTensor::new(1e8, -5e7, 1e7, 0., 0.);
        assert_eq!(rheology.limit_stress(s, 1.), TracelessTensor::null());
    }

    #[test]
    fn stress_above_limit_is_reduced() {
        let rheology = VonMisesRheology::new(1e10, 1e6);
        let s = TracelessTensor::new(1e9, -5e8, 0., 0., 0.);
        let limited = rheology.limit_stress(s, 0.);
        let norm = |t: &TracelessTensor| {
            let m = t.to_sym();
            let mut acc = 0.;
            for i in 0..3 {
                for j in 0..3 {
                    acc += m.get(i, j) * m.get(i, j);
                }
            }
            acc.sqrt()
        };
        assert!(norm(&limited) < norm(&s));
    }
}
