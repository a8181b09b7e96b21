use crate::floating_type_mod::FT;
use crate::physics::eos::eos_from_settings;
use crate::physics::rheology::rheology_from_settings;
use crate::physics::{EquationOfState, Rheology};
use crate::run::RunError;
use crate::settings::{BodySettings, BodySettingsId};
use std::ops::Range;
use std::sync::Arc;

/// Parameter bag plus optional equation-of-state and rheology strategies.
/// Bound to a contiguous index range of particles by [`MaterialEntry`].
pub struct Material {
    params: BodySettings,
    eos: Option<Arc<dyn EquationOfState>>,
    rheology: Option<Arc<dyn Rheology>>,
}

impl Material {
    pub fn new(params: BodySettings) -> Result<Self, RunError> {
        let eos = Some(Arc::from(eos_from_settings(&params)?));
        let rheology = rheology_from_settings(&params)?.map(Arc::from);
        Ok(Material {
            params,
            eos,
            rheology,
        })
    }

    /// Material with no strategies attached, used by N-body runs and tests.
    pub fn null() -> Self {
        Material {
            params: BodySettings::shared_defaults().clone(),
            eos: None,
            rheology: None,
        }
    }

    pub fn params(&self) -> &BodySettings {
        &self.params
    }

    pub fn eos(&self) -> Option<&dyn EquationOfState> {
        self.eos.as_deref()
    }

    pub fn rheology(&self) -> Option<&dyn Rheology> {
        self.rheology.as_deref()
    }

    pub fn rest_density(&self) -> FT {
        self.params.get(BodySettingsId::Density)
    }
}

impl Clone for Material {
    fn clone(&self) -> Self {
        Material {
            params: self.params.clone(),
            eos: self.eos.clone(),
            rheology: self.rheology.clone(),
        }
    }
}

impl std::fmt::Debug for Material {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Material")
            .field("eos", &self.eos.is_some())
            .field("rheology", &self.rheology.is_some())
            .finish()
    }
}

/// A material bound to the particle range [from, to).
#[derive(Debug, Clone)]
pub struct MaterialEntry {
    pub material: Material,
    pub range: Range<usize>,
}
