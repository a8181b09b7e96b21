pub mod av;
pub mod continuity;
pub mod misc;
pub mod pressure;
pub mod stress;

use super::Accumulated;
use crate::floating_type_mod::FT;
use crate::math::{SymTensor, TracelessTensor};
use crate::statistics::Statistics;
use crate::storage::{Material, QuantityId, Storage};
use crate::{V3, V4};

pub use av::StandardAV;
pub use continuity::ContinuityEquation;
pub use misc::{
    InternalFriction, NonInertialForce, VelocityDivergence, VelocityRotation, XsphCorrection,
};
pub use pressure::PressureForce;
pub use stress::SolidStressForce;

/// Read-only particle views shared by all equation terms during a sweep.
pub struct SweepInput<'a> {
    pub r: &'a [V4],
    pub v: &'a [V4],
    pub m: &'a [FT],
    pub rho: &'a [FT],
    pub p: &'a [FT],
    pub cs: &'a [FT],
    pub stress: Option<&'a [TracelessTensor]>,
    /// Strain-rate gradient correction, applied to kernel gradients when
    /// present.
    pub correction: Option<&'a [SymTensor]>,
}

impl<'a> SweepInput<'a> {
    pub fn gather(storage: &'a Storage) -> SweepInput<'a> {
        SweepInput {
            r: storage.get::<V4>(QuantityId::Position),
            v: storage.get_dt::<V4>(QuantityId::Position),
            m: storage.get::<FT>(QuantityId::Mass),
            rho: storage.get::<FT>(QuantityId::Density),
            p: storage.get::<FT>(QuantityId::Pressure),
            cs: storage.get::<FT>(QuantityId::SoundSpeed),
            stress: storage
                .has(QuantityId::DeviatoricStress)
                .then(|| storage.get::<TracelessTensor>(QuantityId::DeviatoricStress)),
            correction: storage
                .has(QuantityId::StrainRateCorrection)
                .then(|| storage.get::<SymTensor>(QuantityId::StrainRateCorrection)),
        }
    }
}

/// One term of the evolution equations. Terms declare the accumulator
/// buffers they write, evaluate pair contributions during the sweep, and
/// optionally post-process per particle once the accumulators have been
/// stored.
pub trait EquationTerm: Send + Sync {
    /// Inserts the quantities the term evolves; called once per body before
    /// the first step.
    fn create(&self, storage: &mut Storage, material: &Material);

    /// Declares accumulator buffers.
    fn register(&self, acc: &mut Accumulated);

    /// Contribution of the pair (i, j). `grad` is the symmetrized kernel
    /// gradient, `w` the symmetrized kernel value. With `symmetric` set the
    /// term writes both sides; otherwise only particle `i`.
    fn eval_pair(
        &self,
        input: &SweepInput,
        i: usize,
        j: usize,
        grad: V3,
        w: FT,
        symmetric: bool,
        acc: &mut Accumulated,
    );

    /// Per-particle post-processing after the deterministic reduction and
    /// store; runs in term order.
    fn finalize(&self, _storage: &mut Storage, _stats: &mut Statistics) {}
}

/// Ordered set of equation terms composed into one solver.
#[derive(Default)]
pub struct EquationHolder {
    terms: Vec<Box<dyn EquationTerm>>,
}

impl EquationHolder {
    pub fn new() -> Self {
        EquationHolder { terms: Vec::new() }
    }

    pub fn push(&mut self, term: Box<dyn EquationTerm>) -> &mut Self {
        self.terms.push(term);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }

    pub fn create_all(&self, storage: &mut Storage, material: &Material) {
        for term in &self.terms {
            term.create(storage, material);
        }
    }

    pub fn register_all(&self, acc: &mut Accumulated) {
        for term in &self.terms {
            term.register(acc);
        }
    }

    #[allow(clippy::too_many_arguments)]
    pub fn eval_all(
        &self,
        input: &SweepInput,
        i: usize,
        j: usize,
        grad: V3,
        w: FT,
        symmetric: bool,
        acc: &mut Accumulated,
    ) {
        for term in &self.terms {
            term.eval_pair(input, i, j, grad, w, symmetric, acc);
        }
    }

    pub fn finalize_all(&self, storage: &mut Storage, stats: &mut Statistics) {
        for term in &self.terms {
            term.finalize(storage, stats);
        }
    }
}

/// Corrected gradient `C_i grad` when correction tensors are enabled.
pub fn corrected_grad(input: &SweepInput, i: usize, grad: V3) -> V3 {
    match input.correction {
        Some(c) => c[i].apply(grad),
        None => grad,
    }
}
