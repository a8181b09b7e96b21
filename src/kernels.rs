use crate::floating_type_mod::{FRAC_1_PI, FT, PI};
use crate::settings::SettingEnum;
use crate::{V3, V4, H};

/// The closed set of smoothing kernels. All kernels are evaluated through a
/// lookup table, so the choice only matters at construction time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KernelKind {
    CubicSpline,
    QuarticSpline,
    Gaussian,
    WendlandC2,
    WendlandC4,
    WendlandC6,
    CoreTriangle,
}

impl SettingEnum for KernelKind {
    fn to_index(self) -> i64 {
        use KernelKind::*;
        match self {
            CubicSpline => 0,
            QuarticSpline => 1,
            Gaussian => 2,
            WendlandC2 => 3,
            WendlandC4 => 4,
            WendlandC6 => 5,
            CoreTriangle => 6,
        }
    }

    fn from_index(index: i64) -> Option<Self> {
        use KernelKind::*;
        match index {
            0 => Some(CubicSpline),
            1 => Some(QuarticSpline),
            2 => Some(Gaussian),
            3 => Some(WendlandC2),
            4 => Some(WendlandC4),
            5 => Some(WendlandC6),
            6 => Some(CoreTriangle),
            _ => None,
        }
    }
}

impl KernelKind {
    /// Support radius in units of the smoothing length.
    pub fn radius(self) -> FT {
        use KernelKind::*;
        match self {
            CubicSpline => 2.,
            QuarticSpline => 2.5,
            Gaussian => 3.,
            WendlandC2 | WendlandC4 | WendlandC6 => 2.,
            CoreTriangle => 1.,
        }
    }

    /// Normalized kernel value at `q = r/h`, in units of `h^-3`.
    fn value(self, q: FT) -> FT {
        use KernelKind::*;
        if q >= self.radius() {
            return 0.;
        }
        match self {
            CubicSpline => {
                let sigma = FRAC_1_PI;
                if q < 1. {
                    sigma * (1. - 1.5 * q * q + 0.75 * q * q * q)
                } else {
                    let v = 2. - q;
                    sigma * 0.25 * v * v * v
                }
            }
            QuarticSpline => {
                let sigma = 1. / (20. * PI);
                let term = |a: FT| {
                    if q < a {
                        let v = a - q;
                        v * v * v * v
                    } else {
                        0.
                    }
                };
                sigma * (term(2.5) - 5. * term(1.5) + 10. * term(0.5))
            }
            Gaussian => {
                let sigma = 1. / (PI * PI * PI).sqrt();
                sigma * (-q * q).exp()
            }
            WendlandC2 => {
                let sigma = 21. / (16. * PI);
                let u = 1. - 0.5 * q;
                sigma * u.powi(4) * (2. * q + 1.)
            }
            WendlandC4 => {
                let sigma = 495. / (256. * PI);
                let u = 1. - 0.5 * q;
                sigma * u.powi(6) * (35. / 12. * q * q + 3. * q + 1.)
            }
            WendlandC6 => {
                let sigma = 1365. / (64. * PI);
                let u = 1. - 0.5 * q;
                sigma * u.powi(8) * (4. * q * q * q + 6.25 * q * q + 4. * q + 1.)
            }
            CoreTriangle => {
                // cubic falloff with a linear (non-flat) core below alpha
                const ALPHA: FT = 1. / 3.;
                let sigma = 3645. / (242. * PI);
                let outer = (1. - q).powi(3);
                if q < ALPHA {
                    sigma * (outer - (ALPHA - q).powi(3) / ALPHA)
                } else {
                    sigma * outer
                }
            }
        }
    }

    /// Normalized derivative `dW/dq` at `q = r/h`, in units of `h^-3`.
    fn grad(self, q: FT) -> FT {
        use KernelKind::*;
        if q >= self.radius() {
            return 0.;
        }
        match self {
            CubicSpline => {
                let sigma = FRAC_1_PI;
                if q < 1. {
                    sigma * (-3. * q + 2.25 * q * q)
                } else {
                    let v = 2. - q;
                    sigma * (-0.75 * v * v)
                }
            }
            QuarticSpline => {
                let sigma = 1. / (20. * PI);
                let term = |a: FT| {
                    if q < a {
                        let v = a - q;
                        v * v * v
                    } else {
                        0.
                    }
                };
                sigma * -4. * (term(2.5) - 5. * term(1.5) + 10. * term(0.5))
            }
            Gaussian => {
                let sigma = 1. / (PI * PI * PI).sqrt();
                sigma * -2. * q * (-q * q).exp()
            }
            WendlandC2 => {
                let sigma = 21. / (16. * PI);
                let u = 1. - 0.5 * q;
                sigma * -5. * q * u.powi(3)
            }
            WendlandC4 => {
                let sigma = 495. / (256. * PI);
                let u = 1. - 0.5 * q;
                sigma * (-7. / 3.) * q * (5. * q + 2.) * u.powi(5)
            }
            WendlandC6 => {
                let sigma = 1365. / (64. * PI);
                let u = 1. - 0.5 * q;
                sigma * (-11. / 4.) * q * (8. * q * q + 7. * q + 2.) * u.powi(7)
            }
            CoreTriangle => {
                const ALPHA: FT = 1. / 3.;
                let sigma = 3645. / (242. * PI);
                let outer = -3. * (1. - q) * (1. - q);
                if q < ALPHA {
                    sigma * (outer + 3. * (ALPHA - q) * (ALPHA - q) / ALPHA)
                } else {
                    sigma * outer
                }
            }
        }
    }
}

/// Kernel precomputed into uniform lookup tables over `[0, R]`. Lookups
/// interpolate linearly; values and gradients beyond the support are exactly
/// zero. Construction is deterministic, so runs with the same resolution are
/// bitwise reproducible.
pub struct LutKernel {
    kind: KernelKind,
    radius: FT,
    values: Vec<FT>,
    grads: Vec<FT>,
    inv_dq: FT,
}

pub const MIN_LUT_SIZE: usize = 1000;

impl LutKernel {
    pub fn new(kind: KernelKind, resolution: usize) -> Self {
        assert!(resolution >= MIN_LUT_SIZE);
        let radius = kind.radius();
        let dq = radius / (resolution - 1) as FT;
        let mut values = Vec::with_capacity(resolution);
        let mut grads = Vec::with_capacity(resolution);
        for i in 0..resolution {
            let q = i as FT * dq;
            values.push(kind.value(q));
            grads.push(kind.grad(q));
        }
        // the last entry sits exactly at the support radius
        *values.last_mut().unwrap() = 0.;
        *grads.last_mut().unwrap() = 0.;
        LutKernel {
            kind,
            radius,
            values,
            grads,
            inv_dq: 1. / dq,
        }
    }

    pub fn kind(&self) -> KernelKind {
        self.kind
    }

    /// Support radius in units of h.
    pub fn radius(&self) -> FT {
        self.radius
    }

    fn lookup(table: &[FT], q: FT, inv_dq: FT) -> FT {
        let pos = q * inv_dq;
        let idx = pos as usize;
        if idx + 1 >= table.len() {
            return 0.;
        }
        let frac = pos - idx as FT;
        table[idx] * (1. - frac) + table[idx + 1] * frac
    }

    /// Dimensionless kernel value at `q = r/h`.
    pub fn value_q(&self, q: FT) -> FT {
        debug_assert!(q >= 0.);
        Self::lookup(&self.values, q, self.inv_dq)
    }

    /// Dimensionless `dW/dq` at `q = r/h`.
    pub fn grad_q(&self, q: FT) -> FT {
        debug_assert!(q >= 0.);
        Self::lookup(&self.grads, q, self.inv_dq)
    }

    /// `W(|r|, h)`
    pub fn value(&self, r: FT, h: FT) -> FT {
        debug_assert!(h > 0.);
        self.value_q(r / h) / (h * h * h)
    }

    /// Spatial gradient `dW/dx` at separation `diff = x_i - x_j`.
    pub fn grad(&self, diff: V3, h: FT) -> V3 {
        let r = diff.norm();
        let q = r / h;
        if q <= 1e-5 {
            return V3::zeros();
        }
        self.grad_q(q) / (h * h * h * h) * (diff / r)
    }
}

/// Symmetrized kernel evaluation over a particle pair: both value and
/// gradient use the averaged smoothing length `(h_i + h_j) / 2` taken from
/// the H lanes.
pub struct SymmetrizedKernel<'a> {
    kernel: &'a LutKernel,
}

impl<'a> SymmetrizedKernel<'a> {
    pub fn new(kernel: &'a LutKernel) -> Self {
        SymmetrizedKernel { kernel }
    }

    pub fn radius(&self) -> FT {
        self.kernel.radius()
    }

    pub fn hbar(ri: V4, rj: V4) -> FT {
        0.5 * (ri[H] + rj[H])
    }

    pub fn value(&self, ri: V4, rj: V4) -> FT {
        let diff = crate::spatial(ri - rj);
        self.kernel.value(diff.norm(), Self::hbar(ri, rj))
    }

    pub fn grad(&self, ri: V4, rj: V4) -> V3 {
        let diff = crate::spatial(ri - rj);
        self.kernel.grad(diff, Self::hbar(ri, rj))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{assert_ft_approx_eq, vec4};

    const ALL_KINDS: [KernelKind; 7] = [
        KernelKind::CubicSpline,
        KernelKind::QuarticSpline,
        KernelKind::Gaussian,
        KernelKind::WendlandC2,
        KernelKind::WendlandC4,
        KernelKind::WendlandC6,
        KernelKind::CoreTriangle,
    ];

    #[test]
    fn kernels_integrate_to_unity() {
        // radial integral 4 pi int q^2 W(q) dq over the support
        for kind in ALL_KINDS {
            let lut = LutKernel::new(kind, 4096);
            let steps = 20000;
            let dq = lut.radius() / steps as FT;
            let mut integral = 0.;
            for i in 0..steps {
                let q = (i as FT + 0.5) * dq;
                integral += 4. * PI * q * q * lut.value_q(q) * dq;
            }
            // the truncated Gaussian is short of unity by the cut tail
            let eps = if kind == KernelKind::Gaussian { 2e-3 } else { 1e-3 };
            assert_ft_approx_eq(integral, 1., eps, || format!("{:?} unity", kind));
        }
    }

    #[test]
    fn gradient_matches_finite_differences() {
        for kind in ALL_KINDS {
            let lut = LutKernel::new(kind, 8192);
            let dq = 1e-4;
            for i in 1..40 {
                let q = i as FT * lut.radius() / 41.;
                let approx = (lut.value_q(q + dq) - lut.value_q(q - dq)) / (2. * dq);
                let analytic = lut.grad_q(q);
                let scale = FT::max(1e-3, analytic.abs());
                assert!(
                    (approx - analytic).abs() <= 0.02 * scale,
                    "{:?} at q={}: {} != {}",
                    kind,
                    q,
                    approx,
                    analytic
                );
            }
        }
    }

    #[test]
    fn zero_beyond_support() {
        for kind in ALL_KINDS {
            let lut = LutKernel::new(kind, 2048);
            assert_eq!(lut.value_q(lut.radius()), 0.);
            assert_eq!(lut.value_q(lut.radius() + 0.7), 0.);
            assert_eq!(lut.grad_q(lut.radius() * 2.), 0.);
        }
    }

    #[test]
    fn gradient_points_against_separation() {
        let lut = LutKernel::new(KernelKind::CubicSpline, 2048);
        let diff = crate::vec3(0.3, -0.2, 0.5);
        let grad = lut.grad(diff, 1.);
        // kernels decrease outward
        assert!(grad.dot(&diff) < 0.);
    }

    #[test]
    fn symmetrized_uses_averaged_h() {
        let lut = LutKernel::new(KernelKind::CubicSpline, 2048);
        let sym = SymmetrizedKernel::new(&lut);
        let ri = vec4(0., 0., 0., 1.0);
        let rj = vec4(0.5, 0., 0., 0.5);
        let expected = lut.value(0.5, 0.75);
        assert_ft_approx_eq(sym.value(ri, rj), expected, 1e-12, || "averaged h".into());
    }

    #[test]
    fn lut_is_reproducible() {
        let a = LutKernel::new(KernelKind::WendlandC4, 4096);
        let b = LutKernel::new(KernelKind::WendlandC4, 4096);
        assert_eq!(a.values, b.values);
        assert_eq!(a.grads, b.grads);
    }
}
