pub mod accumulated;
pub mod equations;

pub use accumulated::{Accumulated, BufferRole};
pub use equations::{EquationHolder, EquationTerm, SweepInput};
