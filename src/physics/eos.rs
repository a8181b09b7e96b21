use crate::floating_type_mod::FT;
use crate::settings::{BodySettings, BodySettingsId, SettingEnum};

/// Equation of state evaluated per particle by the material before each
/// derivative sweep. Implementations are plug-in strategies selected by
/// configuration; only the interface is fixed.
pub trait EquationOfState: Send + Sync {
    /// Pressure from density and specific internal energy.
    fn pressure(&self, rho: FT, u: FT) -> FT;

    /// Sound speed from density and pressure.
    fn sound_speed(&self, rho: FT, p: FT) -> FT;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EosKind {
    IdealGas,
    Tait,
}

impl SettingEnum for EosKind {
    fn to_index(self) -> i64 {
        match self {
            EosKind::IdealGas => 0,
            EosKind::Tait => 1,
        }
    }

    fn from_index(index: i64) -> Option<Self> {
        match index {
            0 => Some(EosKind::IdealGas),
            1 => Some(EosKind::Tait),
            _ => None,
        }
    }
}

pub struct IdealGasEos {
    gamma: FT,
}

impl IdealGasEos {
    pub fn new(gamma: FT) -> Self {
        assert!(gamma > 1.);
        IdealGasEos { gamma }
    }
}

impl EquationOfState for IdealGasEos {
    fn pressure(&self, rho: FT, u: FT) -> FT {
        (self.gamma - 1.) * rho * u
    }

    fn sound_speed(&self, rho: FT, p: FT) -> FT {
        (self.gamma * p / rho).max(0.).sqrt()
    }
}

/// Stiffened Tait/Murnaghan equation: `p = K/n ((rho/rho0)^n - 1)`.
/// Weakly compressible stand-in for solid and liquid bodies.
pub struct TaitEos {
    rho0: FT,
    bulk: FT,
    exponent: FT,
}

impl TaitEos {
    pub fn new(rho0: FT, bulk: FT, exponent: FT) -> Self {
        assert!(rho0 > 0. && bulk > 0. && exponent >= 1.);
        TaitEos {
            rho0,
            bulk,
            exponent,
        }
    }
}

impl EquationOfState for TaitEos {
    fn pressure(&self, rho: FT, _u: FT) -> FT {
        self.bulk / self.exponent * ((rho / self.rho0).powf(self.exponent) - 1.)
    }

    fn sound_speed(&self, rho: FT, p: FT) -> FT {
        // dp/drho of the Tait form
        ((self.bulk + self.exponent * p.max(0.)) / rho).sqrt()
    }
}

pub fn eos_from_settings(body: &BodySettings) -> Result<Box<dyn EquationOfState>, crate::run::RunError> {
    let kind: EosKind = body.get_enum(BodySettingsId::EosKind)?;
    Ok(match kind {
        EosKind::IdealGas => Box::new(IdealGasEos::new(body.get(BodySettingsId::AdiabaticIndex))),
        EosKind::Tait => Box::new(TaitEos::new(
            body.get(BodySettingsId::Density),
            body.get(BodySettingsId::BulkModulus),
            body.get(BodySettingsId::TaitExponent),
        )),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assert_ft_approx_eq;

    #[test]
    fn tait_is_zero_at_rest_density() {
        let eos = TaitEos::new(1000., 2.2e9, 7.);
        assert_ft_approx_eq(eos.pressure(1000., 0.), 0., 1e-12, || "rest pressure".into());
        assert!(eos.pressure(1010., 0.) > 0.);
        assert!(eos.pressure(990., 0.) < 0.);
    }

    #[test]
    fn ideal_gas_sound_speed() {
        let eos = IdealGasEos::new(1.4);
        let p = eos.pressure(1.2, 2.0e5);
        let cs = eos.sound_speed(1.2, p);
        assert_ft_approx_eq(cs * cs, 1.4 * p / 1.2, 1e-10, || "cs^2".into());
    }
}
