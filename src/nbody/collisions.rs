use crate::floating_type_mod::FT;
use crate::math::SymTensor;
use crate::settings::SettingEnum;
use crate::V3;

/// State of one hard sphere entering a collision.
#[derive(Debug, Clone, Copy)]
pub struct BodyState {
    pub pos: V3,
    pub v: V3,
    pub m: FT,
    pub radius: FT,
    pub omega: V3,
    /// Inertia tensor in the world frame.
    pub inertia: SymTensor,
}

/// Result of a collision handler: either new post-collision velocities, or
/// a request to merge the pair.
#[derive(Debug, Clone, Copy)]
pub enum CollisionOutcome {
    Bounce { v_a: V3, v_b: V3 },
    Merge,
}

/// Pure collision response: the handler sees both states and the contact
/// normal (unit vector from b to a) and never touches the storage.
pub trait CollisionHandler: Send + Sync {
    fn collide(&self, a: &BodyState, b: &BodyState, normal: V3) -> CollisionOutcome;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollisionHandlerKind {
    ElasticBounce,
    PerfectMerging,
    MergeOrBounce,
}

impl SettingEnum for CollisionHandlerKind {
    fn to_index(self) -> i64 {
        match self {
            CollisionHandlerKind::ElasticBounce => 0,
            CollisionHandlerKind::PerfectMerging => 1,
            CollisionHandlerKind::MergeOrBounce => 2,
        }
    }

    fn from_index(index: i64) -> Option<Self> {
        match index {
            0 => Some(CollisionHandlerKind::ElasticBounce),
            1 => Some(CollisionHandlerKind::PerfectMerging),
            2 => Some(CollisionHandlerKind::MergeOrBounce),
            _ => None,
        }
    }
}

/// What to do with pairs still interpenetrating at the end of a step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverlapPolicy {
    /// Overlaps are invariant violations.
    None,
    /// Separate along the line of centers, preserving the center of mass.
    Repel,
    ForceMerge,
    RepelOrMerge,
}

impl SettingEnum for OverlapPolicy {
    fn to_index(self) -> i64 {
        match self {
            OverlapPolicy::None => 0,
            OverlapPolicy::Repel => 1,
            OverlapPolicy::ForceMerge => 2,
            OverlapPolicy::RepelOrMerge => 3,
        }
    }

    fn from_index(index: i64) -> Option<Self> {
        match index {
            0 => Some(OverlapPolicy::None),
            1 => Some(OverlapPolicy::Repel),
            2 => Some(OverlapPolicy::ForceMerge),
            3 => Some(OverlapPolicy::RepelOrMerge),
            _ => None,
        }
    }
}

/// Bounce with separate normal and tangential restitution. Restitution 1
/// conserves kinetic energy; momentum is conserved unconditionally.
#[derive(Debug, Clone, Copy)]
pub struct ElasticBounceHandler {
    pub restitution_n: FT,
    pub restitution_t: FT,
}

impl CollisionHandler for ElasticBounceHandler {
    fn collide(&self, a: &BodyState, b: &BodyState, normal: V3) -> CollisionOutcome {
        let m_total = a.m + b.m;
        let v_com = (a.m * a.v + b.m * b.v) / m_total;
        let u = a.v - b.v;
        let u_n = u.dot(&normal) * normal;
        let u_t = u - u_n;
        let u_new = -self.restitution_n * u_n + self.restitution_t * u_t;
        CollisionOutcome::Bounce {
            v_a: v_com + b.m / m_total * u_new,
            v_b: v_com - a.m / m_total * u_new,
        }
    }
}

/// Every collision ends in a merge.
pub struct PerfectMergingHandler;

impl CollisionHandler for PerfectMergingHandler {
    fn collide(&self, _a: &BodyState, _b: &BodyState, _normal: V3) -> CollisionOutcome {
        CollisionOutcome::Merge
    }
}

/// Merges gravitationally bound, slowly spinning pairs; everything else
/// bounces.
pub struct MergeOrBounceHandler {
    pub bounce: ElasticBounceHandler,
    /// Merge only when `limit * v_rel < v_esc`; zero disables the check, a
    /// large value rejects every merge.
    pub bounce_merge_limit: FT,
    /// Merge only when `limit * omega_merged < omega_crit`; zero disables
    /// the check.
    pub rotation_merge_limit: FT,
    pub gravity_constant: FT,
}

impl MergeOrBounceHandler {
    pub fn merge_allowed(&self, a: &BodyState, b: &BodyState) -> bool {
        let m_total = a.m + b.m;
        let dist = (a.radius + b.radius).max(1e-30);
        let v_esc_sq = 2. * self.gravity_constant * m_total / dist;
        let v_rel_sq = (a.v - b.v).norm_squared();
        if self.bounce_merge_limit > 0.
            && v_rel_sq * self.bounce_merge_limit * self.bounce_merge_limit > v_esc_sq
        {
            return false;
        }
        if self.rotation_merge_limit > 0. {
            let merged = merge_bodies(a, b);
            let omega_sq = merged
                .inertia
                .inverse()
                .map(|inv| inv.apply(merged.l).norm_squared())
                .unwrap_or(0.);
            let radius = (a.radius.powi(3) + b.radius.powi(3)).cbrt();
            let omega_crit_sq = self.gravity_constant * m_total / radius.powi(3);
            if omega_sq * self.rotation_merge_limit * self.rotation_merge_limit > omega_crit_sq {
                return false;
            }
        }
        true
    }
}

impl CollisionHandler for MergeOrBounceHandler {
    fn collide(&self, a: &BodyState, b: &BodyState, normal: V3) -> CollisionOutcome {
        if self.merge_allowed(a, b) {
            CollisionOutcome::Merge
        } else {
            self.bounce.collide(a, b, normal)
        }
    }
}

/// Merged body conserving total mass, momentum and angular momentum about
/// the combined center of mass.
#[derive(Debug, Clone, Copy)]
pub struct Merged {
    pub m: FT,
    pub pos: V3,
    pub v: V3,
    pub radius: FT,
    /// Total angular momentum about `pos`: spins plus orbital terms.
    pub l: V3,
    /// Combined inertia about `pos`, world frame.
    pub inertia: SymTensor,
}

pub fn merge_bodies(a: &BodyState, b: &BodyState) -> Merged {
    let m = a.m + b.m;
    let pos = (a.m * a.pos + b.m * b.pos) / m;
    let v = (a.m * a.v + b.m * b.v) / m;

    let mut l = a.inertia.apply(a.omega) + b.inertia.apply(b.omega);
    let mut inertia = a.inertia + b.inertia;
    for body in [a, b] {
        let d = body.pos - pos;
        l += body.m * d.cross(&(body.v - v));
        inertia += (SymTensor::isotropic(d.norm_squared()) - SymTensor::outer(d)) * body.m;
    }

    Merged {
        m,
        pos,
        v,
        radius: (a.radius.powi(3) + b.radius.powi(3)).cbrt(),
        l,
        inertia,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{assert_ft_approx_eq, assert_v3_approx_eq, vec3};

    fn sphere(pos: V3, v: V3, m: FT, radius: FT) -> BodyState {
        BodyState {
            pos,
            v,
            m,
            radius,
            omega: V3::zeros(),
            inertia: SymTensor::isotropic(0.4 * m * radius * radius),
        }
    }

    #[test]
    fn head_on_elastic_bounce_swaps_equal_masses() {
        let handler = ElasticBounceHandler {
            restitution_n: 1.,
            restitution_t: 1.,
        };
        let a = sphere(vec3(1., 0., 0.), vec3(-5., 0., 0.), 2., 1.);
        let b = sphere(vec3(-1., 0., 0.), vec3(5., 0., 0.), 2., 1.);
        match handler.collide(&a, &b, vec3(1., 0., 0.)) {
            CollisionOutcome::Bounce { v_a, v_b } => {
                assert_v3_approx_eq(v_a, b.v, 1e-12, || "v_a".into());
                assert_v3_approx_eq(v_b, a.v, 1e-12, || "v_b".into());
            }
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    #[test]
    fn elastic_bounce_conserves_momentum_and_energy() {
        let handler = ElasticBounceHandler {
            restitution_n: 1.,
            restitution_t: 1.,
        };
        let a = sphere(vec3(1., 0.3, 0.), vec3(-4., 1., 0.5), 2., 1.);
        let b = sphere(vec3(-1., 0., 0.), vec3(3., -2., 0.), 0.7, 0.5);
        let normal = (a.pos - b.pos).normalize();
        match handler.collide(&a, &b, normal) {
            CollisionOutcome::Bounce { v_a, v_b } => {
                let p0 = a.m * a.v + b.m * b.v;
                let p1 = a.m * v_a + b.m * v_b;
                assert_v3_approx_eq(p0, p1, 1e-12, || "momentum".into());
                let e0 = 0.5 * a.m * a.v.norm_squared() + 0.5 * b.m * b.v.norm_squared();
                let e1 = 0.5 * a.m * v_a.norm_squared() + 0.5 * b.m * v_b.norm_squared();
                assert_ft_approx_eq(e0, e1, 1e-12, || "kinetic energy".into());
            }
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    #[test]
    fn off_center_merge_spins_up() {
        let offset_y = 1.5 - 1e-5;
        let a = sphere(vec3(2., offset_y, 0.), vec3(-5., 0., 0.), 2., 1.);
        let b = sphere(vec3(-2., 0., 0.), vec3(5., 0., 0.), 2., 0.5);
        let merged = merge_bodies(&a, &b);
        assert_ft_approx_eq(merged.m, 4., 1e-12, || "mass".into());
        assert_v3_approx_eq(merged.v, V3::zeros(), 1e-12, || "momentum".into());
        // relative motion offset in y turns into spin about z
        assert!(merged.l.z.abs() > 0.1);
        assert_eq!(merged.l.x, 0.);
    }

    #[test]
    fn merge_conserves_angular_momentum_of_spinning_pair() {
        let mut a = sphere(vec3(0., 1., 0.), vec3(1., 0., 0.), 1., 0.5);
        a.omega = vec3(0., 0., 3.);
        let b = sphere(vec3(0., -1., 0.), vec3(-1., 0., 0.), 1., 0.5);
        let merged = merge_bodies(&a, &b);
        // about the com: spin of a plus the orbital contribution of both,
        // which here points along -z
        let expected_z = a.inertia.get(2, 2) * 3. - 2.;
        assert_ft_approx_eq(merged.l.z, expected_z, 1e-12, || "L_z".into());
    }
}
