use crate::floating_type_mod::FT;
use crate::{vec3, M3, V3};
use serde::{Deserialize, Serialize};
use std::ops::{Add, AddAssign, Mul, Neg, Sub, SubAssign};

/// Symmetric second-rank tensor, stored as diagonal (xx, yy, zz) and
/// off-diagonal (xy, xz, yz) components.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SymTensor {
    pub diag: V3,
    pub off: V3,
}

impl SymTensor {
    pub fn new(diag: V3, off: V3) -> Self {
        SymTensor { diag, off }
    }

    pub fn null() -> Self {
        SymTensor {
            diag: V3::zeros(),
            off: V3::zeros(),
        }
    }

    pub fn identity() -> Self {
        SymTensor {
            diag: V3::repeat(1.),
            off: V3::zeros(),
        }
    }

    pub fn isotropic(x: FT) -> Self {
        SymTensor {
            diag: V3::repeat(x),
            off: V3::zeros(),
        }
    }

    /// Symmetric outer product `v v^T`.
    pub fn outer(v: V3) -> Self {
        SymTensor {
            diag: vec3(v.x * v.x, v.y * v.y, v.z * v.z),
            off: vec3(v.x * v.y, v.x * v.z, v.y * v.z),
        }
    }

    /// Symmetrized outer product `(a b^T + b a^T) / 2`.
    pub fn outer_sym(a: V3, b: V3) -> Self {
        SymTensor {
            diag: vec3(a.x * b.x, a.y * b.y, a.z * b.z),
            off: vec3(
                0.5 * (a.x * b.y + a.y * b.x),
                0.5 * (a.x * b.z + a.z * b.x),
                0.5 * (a.y * b.z + a.z * b.y),
            ),
        }
    }

    pub fn get(&self, i: usize, j: usize) -> FT {
        match (i, j) {
            (0, 0) => self.diag.x,
            (1, 1) => self.diag.y,
            (2, 2) => self.diag.z,
            (0, 1) | (1, 0) => self.off.x,
            (0, 2) | (2, 0) => self.off.y,
            (1, 2) | (2, 1) => self.off.z,
            _ => unreachable!(),
        }
    }

    pub fn trace(&self) -> FT {
        self.diag.sum()
    }

    pub fn apply(&self, v: V3) -> V3 {
        vec3(
            self.diag.x * v.x + self.off.x * v.y + self.off.y * v.z,
            self.off.x * v.x + self.diag.y * v.y + self.off.z * v.z,
            self.off.y * v.x + self.off.z * v.y + self.diag.z * v.z,
        )
    }

    /// `n . (T n)`
    pub fn contract(&self, n: V3) -> FT {
        n.dot(&self.apply(n))
    }

    pub fn to_matrix(&self) -> M3 {
        M3::new(
            self.diag.x,
            self.off.x,
            self.off.y,
            self.off.x,
            self.diag.y,
            self.off.z,
            self.off.y,
            self.off.z,
            self.diag.z,
        )
    }

    pub fn from_matrix(m: &M3) -> Self {
        SymTensor {
            diag: vec3(m[(0, 0)], m[(1, 1)], m[(2, 2)]),
            off: vec3(
                0.5 * (m[(0, 1)] + m[(1, 0)]),
                0.5 * (m[(0, 2)] + m[(2, 0)]),
                0.5 * (m[(1, 2)] + m[(2, 1)]),
            ),
        }
    }

    /// Eigenvalues in ascending order.
    pub fn eigenvalues(&self) -> V3 {
        let mut ev: Vec<FT> = self
            .to_matrix()
            .symmetric_eigen()
            .eigenvalues
            .iter()
            .cloned()
            .collect();
        ev.sort_by(|a, b| a.partial_cmp(b).unwrap());
        vec3(ev[0], ev[1], ev[2])
    }

    /// Inverse, assuming the tensor is regular.
    pub fn inverse(&self) -> Option<SymTensor> {
        self.to_matrix()
            .try_inverse()
            .map(|m| SymTensor::from_matrix(&m))
    }

    pub fn is_finite(&self) -> bool {
        self.diag.iter().chain(self.off.iter()).all(|x| x.is_finite())
    }
}

impl Add for SymTensor {
    type Output = SymTensor;
    fn add(self, rhs: SymTensor) -> SymTensor {
        SymTensor::new(self.diag + rhs.diag, self.off + rhs.off)
    }
}

impl Sub for SymTensor {
    type Output = SymTensor;
    fn sub(self, rhs: SymTensor) -> SymTensor {
        SymTensor::new(self.diag - rhs.diag, self.off - rhs.off)
    }
}

impl AddAssign for SymTensor {
    fn add_assign(&mut self, rhs: SymTensor) {
        self.diag += rhs.diag;
        self.off += rhs.off;
    }
}

impl SubAssign for SymTensor {
    fn sub_assign(&mut self, rhs: SymTensor) {
        self.diag -= rhs.diag;
        self.off -= rhs.off;
    }
}

impl Mul<FT> for SymTensor {
    type Output = SymTensor;
    fn mul(self, rhs: FT) -> SymTensor {
        SymTensor::new(self.diag * rhs, self.off * rhs)
    }
}

impl Neg for SymTensor {
    type Output = SymTensor;
    fn neg(self) -> SymTensor {
        SymTensor::new(-self.diag, -self.off)
    }
}

/// Symmetric traceless second-rank tensor; zz is implied by -(xx + yy).
/// Used for deviatoric stress and quadrupole moments.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TracelessTensor {
    xx: FT,
    yy: FT,
    xy: FT,
    xz: FT,
    yz: FT,
}

impl TracelessTensor {
    pub fn new(xx: FT, yy: FT, xy: FT, xz: FT, yz: FT) -> Self {
        TracelessTensor { xx, yy, xy, xz, yz }
    }

    pub fn null() -> Self {
        TracelessTensor::new(0., 0., 0., 0., 0.)
    }

    /// Removes the trace of a symmetric tensor: `T - tr(T)/3 * I`.
    pub fn from_sym(t: SymTensor) -> Self {
        let third = t.trace() / 3.;
        TracelessTensor {
            xx: t.diag.x - third,
            yy: t.diag.y - third,
            xy: t.off.x,
            xz: t.off.y,
            yz: t.off.z,
        }
    }

    pub fn to_sym(&self) -> SymTensor {
        SymTensor::new(
            vec3(self.xx, self.yy, -self.xx - self.yy),
            vec3(self.xy, self.xz, self.yz),
        )
    }

    pub fn get(&self, i: usize, j: usize) -> FT {
        match (i, j) {
            (0, 0) => self.xx,
            (1, 1) => self.yy,
            (2, 2) => -self.xx - self.yy,
            (0, 1) | (1, 0) => self.xy,
            (0, 2) | (2, 0) => self.xz,
            (1, 2) | (2, 1) => self.yz,
            _ => unreachable!(),
        }
    }

    pub fn apply(&self, v: V3) -> V3 {
        let zz = -self.xx - self.yy;
        vec3(
            self.xx * v.x + self.xy * v.y + self.xz * v.z,
            self.xy * v.x + self.yy * v.y + self.yz * v.z,
            self.xz * v.x + self.yz * v.y + zz * v.z,
        )
    }

    /// `n . (T n)`
    pub fn contract(&self, n: V3) -> FT {
        n.dot(&self.apply(n))
    }

    pub fn is_finite(&self) -> bool {
        [self.xx, self.yy, self.xy, self.xz, self.yz]
            .iter()
            .all(|x| x.is_finite())
    }
}

impl Add for TracelessTensor {
    type Output = TracelessTensor;
    fn add(self, rhs: TracelessTensor) -> TracelessTensor {
        TracelessTensor::new(
            self.xx + rhs.xx,
            self.yy + rhs.yy,
            self.xy + rhs.xy,
            self.xz + rhs.xz,
            self.yz + rhs.yz,
        )
    }
}

impl Sub for TracelessTensor {
    type Output = TracelessTensor;
    fn sub(self, rhs: TracelessTensor) -> TracelessTensor {
        TracelessTensor::new(
            self.xx - rhs.xx,
            self.yy - rhs.yy,
            self.xy - rhs.xy,
            self.xz - rhs.xz,
            self.yz - rhs.yz,
        )
    }
}

impl AddAssign for TracelessTensor {
    fn add_assign(&mut self, rhs: TracelessTensor) {
        *self = *self + rhs;
    }
}

impl Mul<FT> for TracelessTensor {
    type Output = TracelessTensor;
    fn mul(self, rhs: FT) -> TracelessTensor {
        TracelessTensor::new(
            self.xx * rhs,
            self.yy * rhs,
            self.xy * rhs,
            self.xz * rhs,
            self.yz * rhs,
        )
    }
}

/// Fully symmetric third-rank tensor with 10 independent components,
/// ordered xxx, xxy, xxz, xyy, xyz, xzz, yyy, yyz, yzz, zzz.
/// Octupole moments are stored in this representation (traceless by
/// construction, which debug builds assert).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sym3Tensor {
    pub c: [FT; 10],
}

/// Component index for sorted (i <= j <= k) triples.
fn idx3(i: usize, j: usize, k: usize) -> usize {
    let mut t = [i, j, k];
    t.sort_unstable();
    match t {
        [0, 0, 0] => 0,
        [0, 0, 1] => 1,
        [0, 0, 2] => 2,
        [0, 1, 1] => 3,
        [0, 1, 2] => 4,
        [0, 2, 2] => 5,
        [1, 1, 1] => 6,
        [1, 1, 2] => 7,
        [1, 2, 2] => 8,
        [2, 2, 2] => 9,
        _ => unreachable!(),
    }
}

impl Sym3Tensor {
    pub fn null() -> Self {
        Sym3Tensor { c: [0.; 10] }
    }

    pub fn get(&self, i: usize, j: usize, k: usize) -> FT {
        self.c[idx3(i, j, k)]
    }

    pub fn set(&mut self, i: usize, j: usize, k: usize, value: FT) {
        self.c[idx3(i, j, k)] = value;
    }

    /// `d_i d_j d_k`
    pub fn outer3(d: V3) -> Self {
        let mut t = Sym3Tensor::null();
        for i in 0..3 {
            for j in i..3 {
                for k in j..3 {
                    t.set(i, j, k, d[i] * d[j] * d[k]);
                }
            }
        }
        t
    }

    /// Symmetrization of `a_i B_jk`: `a_i B_jk + a_j B_ik + a_k B_ij`.
    pub fn sym_outer(a: V3, b: &SymTensor) -> Self {
        let mut t = Sym3Tensor::null();
        for i in 0..3 {
            for j in i..3 {
                for k in j..3 {
                    t.set(i, j, k, a[i] * b.get(j, k) + a[j] * b.get(i, k) + a[k] * b.get(i, j));
                }
            }
        }
        t
    }

    /// Symmetrization of `v_i delta_jk`: `v_i d_jk + v_j d_ik + v_k d_ij`.
    pub fn sym_delta(v: V3) -> Self {
        let mut t = Sym3Tensor::null();
        for i in 0..3 {
            for j in i..3 {
                for k in j..3 {
                    let mut value = 0.;
                    if j == k {
                        value += v[i];
                    }
                    if i == k {
                        value += v[j];
                    }
                    if i == j {
                        value += v[k];
                    }
                    t.set(i, j, k, value);
                }
            }
        }
        t
    }

    /// Double contraction `(T : nn)_l = T_ljk n_j n_k`.
    pub fn contract_two(&self, n: V3) -> V3 {
        let mut out = V3::zeros();
        for l in 0..3 {
            let mut acc = 0.;
            for j in 0..3 {
                for k in 0..3 {
                    acc += self.get(l, j, k) * n[j] * n[k];
                }
            }
            out[l] = acc;
        }
        out
    }

    /// Full contraction `T_ijk n_i n_j n_k`.
    pub fn contract_three(&self, n: V3) -> FT {
        self.contract_two(n).dot(&n)
    }

    /// Trace over the last two indices, `t_i = T_ikk`; zero for traceless
    /// tensors.
    pub fn trace_vector(&self) -> V3 {
        let mut out = V3::zeros();
        for i in 0..3 {
            out[i] = self.get(i, 0, 0) + self.get(i, 1, 1) + self.get(i, 2, 2);
        }
        out
    }

    pub fn is_finite(&self) -> bool {
        self.c.iter().all(|x| x.is_finite())
    }
}

impl Add for Sym3Tensor {
    type Output = Sym3Tensor;
    fn add(self, rhs: Sym3Tensor) -> Sym3Tensor {
        let mut out = self;
        for i in 0..10 {
            out.c[i] += rhs.c[i];
        }
        out
    }
}

impl AddAssign for Sym3Tensor {
    fn add_assign(&mut self, rhs: Sym3Tensor) {
        for i in 0..10 {
            self.c[i] += rhs.c[i];
        }
    }
}

impl Sub for Sym3Tensor {
    type Output = Sym3Tensor;
    fn sub(self, rhs: Sym3Tensor) -> Sym3Tensor {
        let mut out = self;
        for i in 0..10 {
            out.c[i] -= rhs.c[i];
        }
        out
    }
}

impl Mul<FT> for Sym3Tensor {
    type Output = Sym3Tensor;
    fn mul(self, rhs: FT) -> Sym3Tensor {
        let mut out = self;
        for i in 0..10 {
            out.c[i] *= rhs;
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assert_ft_approx_eq;

    #[test]
    fn sym_tensor_apply_matches_matrix() {
        let t = SymTensor::new(vec3(1., 2., 3.), vec3(-1., 0.5, 2.));
        let v = vec3(0.3, -1.2, 2.5);
        let via_matrix = t.to_matrix() * v;
        let direct = t.apply(v);
        for d in 0..3 {
            assert_ft_approx_eq(direct[d], via_matrix[d], 1e-12, || format!("component {}", d));
        }
    }

    #[test]
    fn traceless_has_zero_trace() {
        let t = SymTensor::new(vec3(1., 2., 3.), vec3(-1., 0.5, 2.));
        let tl = TracelessTensor::from_sym(t);
        assert_ft_approx_eq(tl.to_sym().trace(), 0., 1e-12, || "trace".into());
        // detracing only shifts the diagonal
        assert_eq!(tl.get(0, 1), t.get(0, 1));
        assert_eq!(tl.get(1, 2), t.get(1, 2));
    }

    #[test]
    fn sym3_outer_contractions() {
        let d = vec3(1., -2., 0.5);
        let t = Sym3Tensor::outer3(d);
        let n = vec3(0.2, 0.4, -1.);
        let dn = d.dot(&n);
        assert_ft_approx_eq(t.contract_three(n), dn * dn * dn, 1e-12, || "d^3 contraction".into());
        let two = t.contract_two(n);
        for l in 0..3 {
            assert_ft_approx_eq(two[l], d[l] * dn * dn, 1e-12, || format!("component {}", l));
        }
    }

    #[test]
    fn sym_delta_is_traceless_complement() {
        // contracting v_i d_jk + sym over the last two indices gives 5 v
        let v = vec3(3., -1., 2.);
        let t = Sym3Tensor::sym_delta(v);
        let tr = t.trace_vector();
        for d in 0..3 {
            assert_ft_approx_eq(tr[d], 5. * v[d], 1e-12, || format!("component {}", d));
        }
    }

    #[test]
    fn eigenvalues_of_diagonal() {
        let t = SymTensor::new(vec3(3., 1., 2.), V3::zeros());
        let ev = t.eigenvalues();
        assert_ft_approx_eq(ev[0], 1., 1e-12, || "smallest".into());
        assert_ft_approx_eq(ev[2], 3., 1e-12, || "largest".into());
    }
}
