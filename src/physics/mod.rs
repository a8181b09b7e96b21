pub mod constants;
pub mod eos;
pub mod rheology;

pub use eos::{EosKind, EquationOfState, IdealGasEos, TaitEos};
pub use rheology::{Rheology, RheologyKind, VonMisesRheology};
