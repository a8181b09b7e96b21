/*!
Particle-based simulator for collisions of self-gravitating bodies.

The crate models an impact in three phases: stabilization of a rotating
target, SPH fragmentation during and shortly after the impact, and long-range
N-body reaccumulation of the fragments under mutual gravity. State dumps are
written for post-processing (fragment identification, size-frequency
distributions).
*/

pub mod boundary;
pub mod finder;
pub mod gravity;
pub mod initial;
pub mod io;
pub mod kernels;
pub mod math;
pub mod nbody;
pub mod physics;
pub mod run;
pub mod scheduler;
pub mod settings;
pub mod solvers;
pub mod sph;
pub mod statistics;
pub mod storage;
pub mod timestepping;

#[cfg(not(feature = "single-precision"))]
pub mod floating_type_mod {
    pub type FT = f64;
    pub use std::f64::consts::{FRAC_1_PI, PI, TAU};
    pub const EPS: FT = 1e-20;
}

#[cfg(feature = "single-precision")]
pub mod floating_type_mod {
    pub type FT = f32;
    pub use std::f32::consts::{FRAC_1_PI, PI, TAU};
    pub const EPS: FT = 1e-12;
}

use floating_type_mod::FT;
use nalgebra::{SMatrix, SVector};

pub type V<T, const D: usize> = SVector<T, D>;

pub type V3 = V<FT, 3>;
/// Particle vectors carry a fourth lane holding the smoothing length
/// (SPH runs) or the particle radius (N-body runs).
pub type V4 = V<FT, 4>;
pub type M3 = SMatrix<FT, 3, 3>;

/// Index of the smoothing-length/radius lane of [`V4`].
pub const H: usize = 3;

pub fn vec3(x: FT, y: FT, z: FT) -> V3 {
    [x, y, z].into()
}

pub fn vec4(x: FT, y: FT, z: FT, h: FT) -> V4 {
    [x, y, z, h].into()
}

/// Widens a spatial vector into a particle vector with zero in the H lane.
pub fn widen(v: V3) -> V4 {
    vec4(v.x, v.y, v.z, 0.)
}

pub fn spatial(v: V4) -> V3 {
    vec3(v.x, v.y, v.z)
}

pub fn all_finite(v: V3) -> bool {
    v.iter().all(|x| x.is_finite())
}

#[track_caller]
pub fn assert_ft_approx_eq(a: FT, b: FT, eps: FT, ctx: impl Fn() -> String) {
    let scale = FT::max(1., FT::max(a.abs(), b.abs()));
    assert!(
        (a - b).abs() <= eps * scale,
        "{} != {} (eps {}): {}",
        a,
        b,
        eps,
        ctx()
    );
}

#[track_caller]
pub fn assert_v3_approx_eq(a: V3, b: V3, eps: FT, ctx: impl Fn() -> String) {
    for d in 0..3 {
        assert_ft_approx_eq(a[d], b[d], eps, &ctx);
    }
}
