use crate::floating_type_mod::FT;
use crate::math::{Interval, SymTensor, TracelessTensor};
use crate::run::RunError;
use crate::{vec3, V3};
use log::warn;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// A single typed configuration value. Enum-valued parameters are stored as
/// `Int` through [`SettingEnum`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SettingValue {
    Bool(bool),
    Int(i64),
    Float(FT),
    Interval(Interval),
    Vector(V3),
    String(String),
    SymTensor(SymTensor),
    TracelessTensor(TracelessTensor),
}

impl SettingValue {
    fn type_name(&self) -> &'static str {
        match self {
            SettingValue::Bool(_) => "bool",
            SettingValue::Int(_) => "int",
            SettingValue::Float(_) => "float",
            SettingValue::Interval(_) => "interval",
            SettingValue::Vector(_) => "vector",
            SettingValue::String(_) => "string",
            SettingValue::SymTensor(_) => "symmetric tensor",
            SettingValue::TracelessTensor(_) => "traceless tensor",
        }
    }
}

/// Conversion between Rust types and [`SettingValue`]; mismatched reads are
/// programmer errors and panic.
pub trait FromSettingValue: Sized {
    fn wrap(self) -> SettingValue;
    fn unwrap(value: &SettingValue) -> Option<Self>;
}

macro_rules! impl_setting_value {
    ($ty:ty, $variant:ident) => {
        impl FromSettingValue for $ty {
            fn wrap(self) -> SettingValue {
                SettingValue::$variant(self)
            }
            fn unwrap(value: &SettingValue) -> Option<Self> {
                match value {
                    SettingValue::$variant(x) => Some(x.clone()),
                    _ => None,
                }
            }
        }
    };
}

impl_setting_value!(bool, Bool);
impl_setting_value!(i64, Int);
impl_setting_value!(FT, Float);
impl_setting_value!(Interval, Interval);
impl_setting_value!(V3, Vector);
impl_setting_value!(String, String);
impl_setting_value!(SymTensor, SymTensor);
impl_setting_value!(TracelessTensor, TracelessTensor);

/// Enum-valued parameters round-trip through `Int`.
pub trait SettingEnum: Sized + Copy {
    fn to_index(self) -> i64;
    fn from_index(index: i64) -> Option<Self>;
}

/// Key enumeration of a settings namespace; provides string keys and the
/// compiled-in defaults.
pub trait SettingsId: Copy + Ord + 'static {
    fn key(self) -> &'static str;
    fn all() -> &'static [Self];
    fn defaults() -> Vec<(Self, SettingValue)>;

    fn from_key(key: &str) -> Option<Self> {
        Self::all().iter().copied().find(|id| id.key() == key)
    }
}

/// Generic key–value store over an enumerated parameter namespace. Values
/// are typed; reading with a wrong type is a programmer error. Unknown keys
/// in loaded files are ignored with a warning; missing keys keep their
/// compiled-in defaults. Saved settings round-trip losslessly.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings<Id: SettingsId> {
    entries: BTreeMap<Id, SettingValue>,
}

impl<Id: SettingsId> Default for Settings<Id> {
    fn default() -> Self {
        Settings {
            entries: Id::defaults().into_iter().collect(),
        }
    }
}

impl<Id: SettingsId> Settings<Id> {
    pub fn empty() -> Self {
        Settings {
            entries: BTreeMap::new(),
        }
    }

    pub fn set<T: FromSettingValue>(&mut self, id: Id, value: T) -> &mut Self {
        self.entries.insert(id, value.wrap());
        self
    }

    pub fn set_enum<T: SettingEnum>(&mut self, id: Id, value: T) -> &mut Self {
        self.set(id, value.to_index())
    }

    pub fn get<T: FromSettingValue>(&self, id: Id) -> T {
        let value = self
            .entries
            .get(&id)
            .unwrap_or_else(|| panic!("setting '{}' not present", id.key()));
        T::unwrap(value).unwrap_or_else(|| {
            panic!(
                "setting '{}' has type {}, requested another",
                id.key(),
                value.type_name()
            )
        })
    }

    pub fn get_enum<T: SettingEnum>(&self, id: Id) -> Result<T, RunError> {
        let index: i64 = self.get(id);
        T::from_index(index).ok_or_else(|| {
            RunError::Config(format!("setting '{}' has invalid value {}", id.key(), index))
        })
    }

    pub fn has(&self, id: Id) -> bool {
        self.entries.contains_key(&id)
    }

    pub fn size(&self) -> usize {
        self.entries.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (Id, &SettingValue)> {
        self.entries.iter().map(|(id, value)| (*id, value))
    }

    fn to_key_map(&self) -> BTreeMap<String, SettingValue> {
        self.entries
            .iter()
            .map(|(id, value)| (id.key().to_string(), value.clone()))
            .collect()
    }

    fn apply_key_map(&mut self, map: BTreeMap<String, SettingValue>) -> Result<(), RunError> {
        for (key, value) in map {
            let Some(id) = Id::from_key(&key) else {
                warn!("ignoring unknown setting '{}'", key);
                continue;
            };
            if let Some(existing) = self.entries.get(&id) {
                if std::mem::discriminant(existing) != std::mem::discriminant(&value) {
                    return Err(RunError::Config(format!(
                        "setting '{}' expects type {}, got {}",
                        key,
                        existing.type_name(),
                        value.type_name()
                    )));
                }
            }
            self.entries.insert(id, value);
        }
        Ok(())
    }

    pub fn to_yaml(&self) -> String {
        serde_yaml::to_string(&self.to_key_map()).expect("settings are always serializable")
    }

    pub fn from_yaml(text: &str) -> Result<Self, RunError> {
        let mut settings = Self::default();
        let map: BTreeMap<String, SettingValue> = serde_yaml::from_str(text)
            .map_err(|e| RunError::Config(format!("cannot parse settings: {}", e)))?;
        settings.apply_key_map(map)?;
        Ok(settings)
    }

    pub fn save(&self, path: &Path) -> Result<(), RunError> {
        std::fs::write(path, self.to_yaml()).map_err(|source| RunError::io(path, source))
    }

    pub fn load(path: &Path) -> Result<Self, RunError> {
        let text = std::fs::read_to_string(path).map_err(|source| RunError::io(path, source))?;
        Self::from_yaml(&text)
    }
}

/// Parameters of the run: time stepping, solvers, gravity, collisions,
/// output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum RunSettingsId {
    RunName,
    RunEndTime,
    RunMaxSteps,
    RunWallclockLimit,
    RunOutputInterval,
    RunOutputPath,
    TimesteppingIntegrator,
    TimesteppingInitialDt,
    TimesteppingMaxDt,
    TimesteppingCriteria,
    TimesteppingCourant,
    TimesteppingCourantMeanPower,
    TimesteppingDerivativeFactor,
    TimesteppingDtRatioBand,
    SolverKind,
    SphKernel,
    SphFinder,
    SphKernelLutSize,
    SphSmoothingLengthMin,
    SphAvAlpha,
    SphAvBeta,
    SphXsphEpsilon,
    SphUseCorrectionTensor,
    SphUseXsph,
    SphFrictionCoefficient,
    SphSummationTolerance,
    SphSummationMaxIterations,
    FrameAngularVelocity,
    FinderLeafSize,
    GravityEnabled,
    GravityConstant,
    GravityOpeningAngle,
    GravityMultipoleOrder,
    NBodyInertiaTensor,
    NBodyMaxRotationAngle,
    CollisionHandler,
    CollisionOverlap,
    CollisionRestitutionNormal,
    CollisionRestitutionTangent,
    CollisionAllowedOverlap,
    CollisionBounceMergeLimit,
    CollisionRotationMergeLimit,
    SchedulerGranularity,
    BoundaryKind,
    DomainKind,
    DomainCenter,
    DomainRadius,
    DomainSize,
    FrozenDistance,
}

impl SettingsId for RunSettingsId {
    fn key(self) -> &'static str {
        use RunSettingsId::*;
        match self {
            RunName => "run.name",
            RunEndTime => "run.end_time",
            RunMaxSteps => "run.max_steps",
            RunWallclockLimit => "run.wallclock_limit",
            RunOutputInterval => "run.output.interval",
            RunOutputPath => "run.output.path",
            TimesteppingIntegrator => "timestepping.integrator",
            TimesteppingInitialDt => "timestepping.initial_dt",
            TimesteppingMaxDt => "timestepping.max_dt",
            TimesteppingCriteria => "timestepping.criteria",
            TimesteppingCourant => "timestepping.courant",
            TimesteppingCourantMeanPower => "timestepping.courant_mean_power",
            TimesteppingDerivativeFactor => "timestepping.derivative_factor",
            TimesteppingDtRatioBand => "timestepping.dt_ratio_band",
            SolverKind => "solver.kind",
            SphKernel => "sph.kernel",
            SphFinder => "sph.finder",
            SphKernelLutSize => "sph.kernel_lut_size",
            SphSmoothingLengthMin => "sph.smoothing_length_min",
            SphAvAlpha => "sph.av.alpha",
            SphAvBeta => "sph.av.beta",
            SphXsphEpsilon => "sph.xsph.epsilon",
            SphUseCorrectionTensor => "sph.use_correction_tensor",
            SphUseXsph => "sph.use_xsph",
            SphFrictionCoefficient => "sph.friction",
            SphSummationTolerance => "sph.summation.tolerance",
            SphSummationMaxIterations => "sph.summation.max_iterations",
            FrameAngularVelocity => "frame.angular_velocity",
            FinderLeafSize => "finder.leaf_size",
            GravityEnabled => "gravity.enabled",
            GravityConstant => "gravity.constant",
            GravityOpeningAngle => "gravity.opening_angle",
            GravityMultipoleOrder => "gravity.multipole_order",
            NBodyInertiaTensor => "nbody.inertia_tensor",
            NBodyMaxRotationAngle => "nbody.max_rotation_angle",
            CollisionHandler => "collision.handler",
            CollisionOverlap => "collision.overlap",
            CollisionRestitutionNormal => "collision.restitution_normal",
            CollisionRestitutionTangent => "collision.restitution_tangent",
            CollisionAllowedOverlap => "collision.allowed_overlap",
            CollisionBounceMergeLimit => "collision.bounce_merge_limit",
            CollisionRotationMergeLimit => "collision.rotation_merge_limit",
            SchedulerGranularity => "scheduler.granularity",
            BoundaryKind => "boundary.kind",
            DomainKind => "domain.kind",
            DomainCenter => "domain.center",
            DomainRadius => "domain.radius",
            DomainSize => "domain.size",
            FrozenDistance => "boundary.frozen_distance",
        }
    }

    fn all() -> &'static [RunSettingsId] {
        use RunSettingsId::*;
        &[
            RunName,
            RunEndTime,
            RunMaxSteps,
            RunWallclockLimit,
            RunOutputInterval,
            RunOutputPath,
            TimesteppingIntegrator,
            TimesteppingInitialDt,
            TimesteppingMaxDt,
            TimesteppingCriteria,
            TimesteppingCourant,
            TimesteppingCourantMeanPower,
            TimesteppingDerivativeFactor,
            TimesteppingDtRatioBand,
            SolverKind,
            SphKernel,
            SphFinder,
            SphKernelLutSize,
            SphSmoothingLengthMin,
            SphAvAlpha,
            SphAvBeta,
            SphXsphEpsilon,
            SphUseCorrectionTensor,
            SphUseXsph,
            SphFrictionCoefficient,
            SphSummationTolerance,
            SphSummationMaxIterations,
            FrameAngularVelocity,
            FinderLeafSize,
            GravityEnabled,
            GravityConstant,
            GravityOpeningAngle,
            GravityMultipoleOrder,
            NBodyInertiaTensor,
            NBodyMaxRotationAngle,
            CollisionHandler,
            CollisionOverlap,
            CollisionRestitutionNormal,
            CollisionRestitutionTangent,
            CollisionAllowedOverlap,
            CollisionBounceMergeLimit,
            CollisionRotationMergeLimit,
            SchedulerGranularity,
            BoundaryKind,
            DomainKind,
            DomainCenter,
            DomainRadius,
            DomainSize,
            FrozenDistance,
        ]
    }

    fn defaults() -> Vec<(RunSettingsId, SettingValue)> {
        use RunSettingsId::*;
        use SettingValue::*;
        vec![
            (RunName, String("unnamed run".into())),
            (RunEndTime, Float(10.)),
            (RunMaxSteps, Int(i64::MAX)),
            (RunWallclockLimit, Float(FT::INFINITY)),
            (RunOutputInterval, Float(0.1)),
            (RunOutputPath, String("out".into())),
            (TimesteppingIntegrator, Int(1)), // leap-frog
            (TimesteppingInitialDt, Float(0.03)),
            (TimesteppingMaxDt, Float(0.1)),
            (TimesteppingCriteria, Int(0b111)),
            (TimesteppingCourant, Float(0.25)),
            (TimesteppingCourantMeanPower, Float(FT::NEG_INFINITY)),
            (TimesteppingDerivativeFactor, Float(0.2)),
            (TimesteppingDtRatioBand, Interval(crate::math::Interval::new(0.2, 5.))),
            (SolverKind, Int(0)), // symmetric
            (SphKernel, Int(0)),  // cubic spline
            (SphFinder, Int(0)),  // k-d tree
            (SphKernelLutSize, Int(4096)),
            (SphSmoothingLengthMin, Float(1e-5)),
            (SphAvAlpha, Float(1.5)),
            (SphAvBeta, Float(3.)),
            (SphXsphEpsilon, Float(1.)),
            (SphUseCorrectionTensor, Bool(false)),
            (SphUseXsph, Bool(false)),
            (SphFrictionCoefficient, Float(0.)),
            (SphSummationTolerance, Float(1e-3)),
            (SphSummationMaxIterations, Int(100)),
            (FrameAngularVelocity, Vector(V3::zeros())),
            (FinderLeafSize, Int(25)),
            (GravityEnabled, Bool(false)),
            (GravityConstant, Float(crate::physics::constants::GRAVITY)),
            (GravityOpeningAngle, Float(0.8)),
            (GravityMultipoleOrder, Int(3)),
            (NBodyInertiaTensor, Bool(false)),
            (NBodyMaxRotationAngle, Float(0.01)),
            (CollisionHandler, Int(0)), // elastic bounce
            (CollisionOverlap, Int(1)), // repel
            (CollisionRestitutionNormal, Float(0.5)),
            (CollisionRestitutionTangent, Float(1.)),
            (CollisionAllowedOverlap, Float(0.01)),
            (CollisionBounceMergeLimit, Float(1.)),
            (CollisionRotationMergeLimit, Float(1.)),
            (SchedulerGranularity, Int(1000)),
            (BoundaryKind, Int(0)), // none
            (DomainKind, Int(0)),   // spherical
            (DomainCenter, Vector(V3::zeros())),
            (DomainRadius, Float(1.)),
            (DomainSize, Vector(vec3(1., 1., 1.))),
            (FrozenDistance, Float(2.5)),
        ]
    }
}

/// Parameters of a single body: material, initial state and particle
/// distribution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum BodySettingsId {
    ParticleCount,
    Density,
    DensityRange,
    DensityMinScale,
    Energy,
    EnergyRange,
    EnergyMinScale,
    Damage,
    DamageRange,
    StressMinScale,
    EosKind,
    AdiabaticIndex,
    BulkModulus,
    TaitExponent,
    RheologyKind,
    ShearModulus,
    ElasticityLimit,
    Distribution,
    SmoothingLengthEta,
    BodyCenter,
    BodyVelocity,
    BodySpin,
    BodyRadius,
}

impl SettingsId for BodySettingsId {
    fn key(self) -> &'static str {
        use BodySettingsId::*;
        match self {
            ParticleCount => "body.particle_count",
            Density => "body.density",
            DensityRange => "body.density_range",
            DensityMinScale => "body.density_min_scale",
            Energy => "body.energy",
            EnergyRange => "body.energy_range",
            EnergyMinScale => "body.energy_min_scale",
            Damage => "body.damage",
            DamageRange => "body.damage_range",
            StressMinScale => "body.stress_min_scale",
            EosKind => "eos.kind",
            AdiabaticIndex => "eos.adiabatic_index",
            BulkModulus => "eos.bulk_modulus",
            TaitExponent => "eos.tait_exponent",
            RheologyKind => "rheology.kind",
            ShearModulus => "rheology.shear_modulus",
            ElasticityLimit => "rheology.elasticity_limit",
            Distribution => "body.distribution",
            SmoothingLengthEta => "body.smoothing_length_eta",
            BodyCenter => "body.center",
            BodyVelocity => "body.velocity",
            BodySpin => "body.spin",
            BodyRadius => "body.radius",
        }
    }

    fn all() -> &'static [BodySettingsId] {
        use BodySettingsId::*;
        &[
            ParticleCount,
            Density,
            DensityRange,
            DensityMinScale,
            Energy,
            EnergyRange,
            EnergyMinScale,
            Damage,
            DamageRange,
            StressMinScale,
            EosKind,
            AdiabaticIndex,
            BulkModulus,
            TaitExponent,
            RheologyKind,
            ShearModulus,
            ElasticityLimit,
            Distribution,
            SmoothingLengthEta,
            BodyCenter,
            BodyVelocity,
            BodySpin,
            BodyRadius,
        ]
    }

    fn defaults() -> Vec<(BodySettingsId, SettingValue)> {
        use BodySettingsId::*;
        use SettingValue::*;
        vec![
            (ParticleCount, Int(10000)),
            (Density, Float(2700.)),
            (DensityRange, Interval(crate::math::Interval::new(50., FT::INFINITY))),
            (DensityMinScale, Float(50.)),
            (Energy, Float(0.)),
            (EnergyRange, Interval(crate::math::Interval::positive())),
            (EnergyMinScale, Float(1.)),
            (Damage, Float(0.)),
            (DamageRange, Interval(crate::math::Interval::new(0., 1.))),
            (StressMinScale, Float(1e5)),
            (EosKind, Int(1)), // Tait / Murnaghan
            (AdiabaticIndex, Float(1.4)),
            (BulkModulus, Float(2.67e10)),
            (TaitExponent, Float(7.)),
            (RheologyKind, Int(0)), // none
            (ShearModulus, Float(2.27e10)),
            (ElasticityLimit, Float(3.5e9)),
            (Distribution, Int(1)), // hexagonal packing
            (SmoothingLengthEta, Float(1.3)),
            (BodyCenter, Vector(V3::zeros())),
            (BodyVelocity, Vector(V3::zeros())),
            (BodySpin, Vector(V3::zeros())),
            (BodyRadius, Float(1.)),
        ]
    }
}

pub type RunSettings = Settings<RunSettingsId>;
pub type BodySettings = Settings<BodySettingsId>;

static RUN_DEFAULTS: Lazy<RunSettings> = Lazy::new(RunSettings::default);
static BODY_DEFAULTS: Lazy<BodySettings> = Lazy::new(BodySettings::default);

impl RunSettings {
    /// Shared instance holding the compiled-in defaults.
    pub fn shared_defaults() -> &'static RunSettings {
        &RUN_DEFAULTS
    }
}

impl BodySettings {
    pub fn shared_defaults() -> &'static BodySettings {
        &BODY_DEFAULTS
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_cover_every_key() {
        let run = RunSettings::default();
        for id in RunSettingsId::all() {
            assert!(run.has(*id), "missing default for {}", id.key());
        }
        let body = BodySettings::default();
        for id in BodySettingsId::all() {
            assert!(body.has(*id), "missing default for {}", id.key());
        }
    }

    #[test]
    fn yaml_round_trip_is_lossless() {
        let mut run = RunSettings::default();
        run.set(RunSettingsId::RunName, String::from("impact test"))
            .set(RunSettingsId::GravityOpeningAngle, 0.5)
            .set(RunSettingsId::TimesteppingDtRatioBand, Interval::new(0.1, 2.))
            .set(RunSettingsId::DomainCenter, vec3(1., -2., 3.));
        let text = run.to_yaml();
        let loaded = RunSettings::from_yaml(&text).unwrap();
        assert_eq!(run, loaded);
    }

    #[test]
    fn unknown_keys_are_ignored() {
        let text = "nonexistent.key: !Float 1.0\nrun.end_time: !Float 5.0\n";
        let run = RunSettings::from_yaml(text).unwrap();
        let end: FT = run.get(RunSettingsId::RunEndTime);
        assert_eq!(end, 5.0);
    }

    #[test]
    fn wrong_value_type_is_a_config_error() {
        let text = "run.end_time: !Bool true\n";
        assert!(RunSettings::from_yaml(text).is_err());
    }
}
