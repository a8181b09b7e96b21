use crate::floating_type_mod::FT;

/// Gravitational constant [m^3 kg^-1 s^-2].
pub const GRAVITY: FT = 6.674e-11;
