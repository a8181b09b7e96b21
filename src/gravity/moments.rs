use crate::floating_type_mod::FT;
use crate::math::{Sym3Tensor, SymTensor, TracelessTensor};
use crate::V3;

/// Traceless multipole moments of a mass distribution, orders 0 through 3,
/// taken about a given expansion center:
///
/// - `m0`   total mass,
/// - `m1`   dipole (identically zero about the center of mass, carried for
///          the parallel-axis bookkeeping),
/// - `m2`   quadrupole `sum m (3 x x - |x|^2 I)`,
/// - `m3`   octupole `sum m (15 x x x - 3 |x|^2 (x I)_sym)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MultipoleMoments {
    pub m0: FT,
    pub m1: V3,
    pub m2: TracelessTensor,
    pub m3: Sym3Tensor,
}

impl MultipoleMoments {
    pub fn null() -> Self {
        MultipoleMoments {
            m0: 0.,
            m1: V3::zeros(),
            m2: TracelessTensor::null(),
            m3: Sym3Tensor::null(),
        }
    }

    /// Moments of point masses about `center`.
    pub fn compute(particles: impl Iterator<Item = (V3, FT)>, center: V3) -> MultipoleMoments {
        let mut m0 = 0.;
        let mut m1 = V3::zeros();
        let mut q2 = SymTensor::null();
        let mut q3 = Sym3Tensor::null();
        for (pos, m) in particles {
            let x = pos - center;
            let r_sq = x.norm_squared();
            m0 += m;
            m1 += m * x;
            q2 += (SymTensor::outer(x) * 3. - SymTensor::isotropic(r_sq)) * m;
            q3 += (Sym3Tensor::outer3(x) * 15. - Sym3Tensor::sym_delta(x) * (3. * r_sq)) * m;
        }
        MultipoleMoments {
            m0,
            m1,
            m2: TracelessTensor::from_sym(q2),
            m3: q3,
        }
    }

    /// Parallel-axis translation: moments about a center shifted so that the
    /// old center sits at offset `d` from the new one. Assumes the dipole
    /// about the old center vanishes, which holds for moments taken about a
    /// center of mass.
    pub fn translated(&self, d: V3) -> MultipoleMoments {
        let m = self.m0;
        let d_sq = d.norm_squared();

        let m1 = self.m1 + m * d;

        let m2_sym = self.m2.to_sym() + (SymTensor::outer(d) * 3. - SymTensor::isotropic(d_sq)) * m;
        let m2 = TracelessTensor::from_sym(m2_sym);

        // octupole shift needs the quadrupole of the translated distribution
        let q2 = self.m2.to_sym();
        let q2_d = self.m2.apply(d);
        let m3 = self.m3
            + Sym3Tensor::sym_outer(d, &q2) * 5.
            + Sym3Tensor::sym_delta(q2_d) * -2.
            + (Sym3Tensor::outer3(d) * 15. - Sym3Tensor::sym_delta(d) * (3. * d_sq)) * m;

        MultipoleMoments { m0: m, m1, m2, m3 }
    }

    /// Gravitational acceleration (without the G factor) at displacement
    /// `d = field point - expansion center`, truncated at `order`.
    pub fn evaluate(&self, d: V3, order: usize) -> V3 {
        let r_sq = d.norm_squared();
        if r_sq == 0. || self.m0 == 0. {
            return V3::zeros();
        }
        let r = r_sq.sqrt();
        let n = d / r;

        let mut g = -self.m0 / r_sq * n;
        if order >= 1 {
            let m1_n = self.m1.dot(&n);
            g += (self.m1 - 3. * m1_n * n) / (r_sq * r);
        }
        if order >= 2 {
            let q_n = self.m2.apply(n);
            let q_nn = q_n.dot(&n);
            g += (2. * q_n - 5. * q_nn * n) / (2. * r_sq * r_sq);
        }
        if order >= 3 {
            let o_nn = self.m3.contract_two(n);
            let o_nnn = o_nn.dot(&n);
            g += (3. * o_nn - 7. * o_nnn * n) / (6. * r_sq * r_sq * r);
        }
        g
    }
}

impl std::ops::Add for MultipoleMoments {
    type Output = MultipoleMoments;
    fn add(self, rhs: MultipoleMoments) -> MultipoleMoments {
        MultipoleMoments {
            m0: self.m0 + rhs.m0,
            m1: self.m1 + rhs.m1,
            m2: self.m2 + rhs.m2,
            m3: self.m3 + rhs.m3,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{assert_v3_approx_eq, vec3};
    use rand::{Rng, SeedableRng};
    use rand_chacha::ChaCha8Rng;

    fn random_masses(n: usize, seed: u64) -> Vec<(V3, FT)> {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        (0..n)
            .map(|_| {
                (
                    vec3(
                        rng.gen_range(-0.5..0.5),
                        rng.gen_range(-0.5..0.5),
                        rng.gen_range(-0.5..0.5),
                    ),
                    rng.gen_range(0.5..2.0),
                )
            })
            .collect()
    }

    fn center_of_mass(particles: &[(V3, FT)]) -> V3 {
        let m: FT = particles.iter().map(|(_, m)| m).sum();
        particles.iter().map(|(p, mi)| *mi * p).sum::<V3>() / m
    }

    fn direct_acceleration(particles: &[(V3, FT)], at: V3) -> V3 {
        let mut g = V3::zeros();
        for (p, m) in particles {
            let dr = p - at;
            g += *m * dr / dr.norm().powi(3);
        }
        g
    }

    #[test]
    fn octupole_is_traceless() {
        let particles = random_masses(20, 11);
        let com = center_of_mass(&particles);
        let moments = MultipoleMoments::compute(particles.into_iter(), com);
        let tr = moments.m3.trace_vector();
        assert_v3_approx_eq(tr, V3::zeros(), 1e-10, || "octupole trace".into());
    }

    #[test]
    fn expansion_converges_to_direct_sum() {
        let particles = random_masses(30, 5);
        let com = center_of_mass(&particles);
        let moments = MultipoleMoments::compute(particles.iter().copied(), com);

        // far away the monopole is enough; closer in, higher orders tighten
        // the error
        let at = vec3(8., -3., 5.);
        let exact = direct_acceleration(&particles, at);
        let mut prev_err = FT::INFINITY;
        for order in [0usize, 2, 3] {
            let approx = moments.evaluate(at - com, order);
            let err = (approx - exact).norm() / exact.norm();
            assert!(
                err < prev_err * 1.01,
                "order {} error {} not below {}",
                order,
                err,
                prev_err
            );
            prev_err = err;
        }
        assert!(prev_err < 1e-5, "octupole error too large: {}", prev_err);
    }

    #[test]
    fn parallel_axis_matches_recomputation() {
        let particles = random_masses(25, 9);
        let com = center_of_mass(&particles);
        let about_com = MultipoleMoments::compute(particles.iter().copied(), com);

        let new_center = vec3(0.3, -0.8, 0.2);
        let translated = about_com.translated(com - new_center);
        let recomputed = MultipoleMoments::compute(particles.iter().copied(), new_center);

        crate::assert_ft_approx_eq(translated.m0, recomputed.m0, 1e-12, || "mass".into());
        assert_v3_approx_eq(translated.m1, recomputed.m1, 1e-10, || "dipole".into());
        for i in 0..3 {
            for j in 0..3 {
                crate::assert_ft_approx_eq(
                    translated.m2.get(i, j),
                    recomputed.m2.get(i, j),
                    1e-10,
                    || format!("quadrupole {}{}", i, j),
                );
                for k in 0..3 {
                    crate::assert_ft_approx_eq(
                        translated.m3.get(i, j, k),
                        recomputed.m3.get(i, j, k),
                        1e-9,
                        || format!("octupole {}{}{}", i, j, k),
                    );
                }
            }
        }
    }
}
