use crate::floating_type_mod::FT;
use crate::math::Aabb;
use crate::run::RunError;
use crate::settings::{RunSettings, RunSettingsId, SettingEnum};
use crate::storage::{Material, QuantityId, Storage};
use crate::{spatial, vec4, V3, V4, H};

/// Computational domain of a simulated body or of the whole run.
#[derive(Debug, Clone, Copy)]
pub enum Domain {
    Sphere { center: V3, radius: FT },
    Block { center: V3, size: V3 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DomainKind {
    Sphere,
    Block,
}

impl SettingEnum for DomainKind {
    fn to_index(self) -> i64 {
        match self {
            DomainKind::Sphere => 0,
            DomainKind::Block => 1,
        }
    }

    fn from_index(index: i64) -> Option<Self> {
        match index {
            0 => Some(DomainKind::Sphere),
            1 => Some(DomainKind::Block),
            _ => None,
        }
    }
}

impl Domain {
    pub fn from_settings(settings: &RunSettings) -> Result<Self, RunError> {
        let kind: DomainKind = settings.get_enum(RunSettingsId::DomainKind)?;
        let center: V3 = settings.get(RunSettingsId::DomainCenter);
        Ok(match kind {
            DomainKind::Sphere => Domain::Sphere {
                center,
                radius: settings.get(RunSettingsId::DomainRadius),
            },
            DomainKind::Block => Domain::Block {
                center,
                size: settings.get(RunSettingsId::DomainSize),
            },
        })
    }

    pub fn contains(&self, p: V3) -> bool {
        self.signed_distance(p) <= 0.
    }

    /// Negative inside, positive outside.
    pub fn signed_distance(&self, p: V3) -> FT {
        match self {
            Domain::Sphere { center, radius } => (p - center).norm() - radius,
            Domain::Block { center, size } => {
                let half = 0.5 * size;
                let d = p - center;
                (0..3)
                    .map(|axis| d[axis].abs() - half[axis])
                    .fold(FT::NEG_INFINITY, FT::max)
            }
        }
    }

    pub fn volume(&self) -> FT {
        match self {
            Domain::Sphere { radius, .. } => {
                4. / 3. * crate::floating_type_mod::PI * radius.powi(3)
            }
            Domain::Block { size, .. } => size.x * size.y * size.z,
        }
    }

    pub fn bounding_box(&self) -> Aabb {
        match self {
            Domain::Sphere { center, radius } => Aabb::new(
                center - V3::repeat(*radius),
                center + V3::repeat(*radius),
            ),
            Domain::Block { center, size } => {
                Aabb::new(center - 0.5 * size, center + 0.5 * size)
            }
        }
    }

    /// Nearest point of the domain surface.
    pub fn project(&self, p: V3) -> V3 {
        match self {
            Domain::Sphere { center, radius } => {
                let d = p - center;
                let dist = d.norm();
                if dist == 0. {
                    center + crate::vec3(*radius, 0., 0.)
                } else {
                    center + d * (radius / dist)
                }
            }
            Domain::Block { center, size } => {
                let half = 0.5 * size;
                let mut q = p;
                for axis in 0..3 {
                    q[axis] = q[axis].clamp(center[axis] - half[axis], center[axis] + half[axis]);
                }
                q
            }
        }
    }

    /// Mirror image across the nearest boundary point; the ghost of a
    /// particle near the surface.
    pub fn mirror(&self, p: V3) -> V3 {
        2. * self.project(p) - p
    }

    /// Outward surface normal at the point nearest to `p`.
    pub fn normal(&self, p: V3) -> V3 {
        match self {
            Domain::Sphere { center, .. } => {
                let d = p - center;
                let dist = d.norm();
                if dist == 0. {
                    crate::vec3(1., 0., 0.)
                } else {
                    d / dist
                }
            }
            Domain::Block { center, size } => {
                let half = 0.5 * size;
                let d = p - center;
                let mut axis = 0;
                let mut best = FT::NEG_INFINITY;
                for a in 0..3 {
                    let depth = d[a].abs() - half[a];
                    if depth > best {
                        best = depth;
                        axis = a;
                    }
                }
                let mut n = V3::zeros();
                n[axis] = d[axis].signum();
                n
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoundaryKind {
    None,
    GhostParticles,
    FrozenParticles,
    Periodic,
    Projection,
}

impl SettingEnum for BoundaryKind {
    fn to_index(self) -> i64 {
        use BoundaryKind::*;
        match self {
            None => 0,
            GhostParticles => 1,
            FrozenParticles => 2,
            Periodic => 3,
            Projection => 4,
        }
    }

    fn from_index(index: i64) -> Option<Self> {
        use BoundaryKind::*;
        match index {
            0 => Some(None),
            1 => Some(GhostParticles),
            2 => Some(FrozenParticles),
            3 => Some(Periodic),
            4 => Some(Projection),
            _ => Option::None,
        }
    }
}

/// Boundary conditions bracket each step: `initialize` may add helper
/// particles before the derivative evaluation, `finalize` restores the
/// storage afterwards.
pub trait BoundaryCondition: Send {
    fn initialize(&mut self, _storage: &mut Storage) {}
    fn finalize(&mut self, _storage: &mut Storage) {}
}

pub fn boundary_from_settings(
    settings: &RunSettings,
) -> Result<Option<Box<dyn BoundaryCondition>>, RunError> {
    let kind: BoundaryKind = settings.get_enum(RunSettingsId::BoundaryKind)?;
    if kind == BoundaryKind::None {
        return Ok(None);
    }
    let domain = Domain::from_settings(settings)?;
    Ok(Some(match kind {
        BoundaryKind::None => unreachable!(),
        BoundaryKind::GhostParticles => Box::new(GhostParticles {
            domain,
            ghost_count: 0,
        }),
        BoundaryKind::FrozenParticles => Box::new(FrozenParticles {
            domain,
            threshold: settings.get(RunSettingsId::FrozenDistance),
        }),
        BoundaryKind::Periodic => Box::new(PeriodicBoundary {
            aabb: domain.bounding_box(),
        }),
        BoundaryKind::Projection => Box::new(DomainProjection { domain }),
    }))
}

/// Mirrors particles near the domain surface as ghosts appended to the
/// storage for the duration of one step; the velocity component normal to
/// the surface is reflected.
pub struct GhostParticles {
    domain: Domain,
    ghost_count: usize,
}

impl BoundaryCondition for GhostParticles {
    fn initialize(&mut self, storage: &mut Storage) {
        let (sources, mirrored): (Vec<usize>, Vec<V4>) = {
            let r = storage.get::<V4>(QuantityId::Position);
            r.iter()
                .enumerate()
                .filter(|(_, r)| {
                    // within one kernel support of the surface, inside
                    let dist = self.domain.signed_distance(spatial(**r));
                    dist <= 0. && -dist < 2. * r[H]
                })
                .map(|(i, r)| {
                    let mirror = self.domain.mirror(spatial(*r));
                    (i, vec4(mirror.x, mirror.y, mirror.z, r[H]))
                })
                .unzip()
        };
        self.ghost_count = sources.len();
        if sources.is_empty() {
            return;
        }

        // ghosts copy every quantity of their source particle
        let mut ghosts = Storage::with_material(Material::null());
        for (id, q) in storage.quantities() {
            let mut ghost_q = q.clone_selected(crate::storage::CloneFlags::ALL);
            ghost_q.for_each_buffer(|buffer| *buffer = buffer.gather(&sources));
            ghosts.insert_quantity(id, ghost_q);
        }
        {
            let ghost_r = ghosts.get_mut::<V4>(QuantityId::Position);
            ghost_r.copy_from_slice(&mirrored);
            let normals: Vec<V3> = mirrored
                .iter()
                .map(|r| self.domain.normal(spatial(*r)))
                .collect();
            let ghost_v = ghosts.get_dt_mut::<V4>(QuantityId::Position);
            for (v, n) in ghost_v.iter_mut().zip(&normals) {
                let sv = spatial(*v);
                let reflected = sv - 2. * sv.dot(n) * n;
                *v = vec4(reflected.x, reflected.y, reflected.z, (*v)[H]);
            }
        }
        storage.merge(ghosts);
    }

    fn finalize(&mut self, storage: &mut Storage) {
        if self.ghost_count == 0 {
            return;
        }
        let n = storage.particle_count();
        let ghosts: Vec<usize> = (n - self.ghost_count..n).collect();
        storage.remove(&ghosts);
        self.ghost_count = 0;
    }
}

/// Zeroes velocities and accelerations of particles in a shell outside the
/// domain, emulating solid far-field material.
pub struct FrozenParticles {
    pub domain: Domain,
    /// Shell thickness in units of the smoothing length.
    pub threshold: FT,
}

impl BoundaryCondition for FrozenParticles {
    fn finalize(&mut self, storage: &mut Storage) {
        let frozen: Vec<usize> = storage
            .get::<V4>(QuantityId::Position)
            .iter()
            .enumerate()
            .filter(|(_, r)| {
                let dist = self.domain.signed_distance(spatial(**r));
                dist > 0. && dist < self.threshold * r[H]
            })
            .map(|(i, _)| i)
            .collect();
        let v = storage.get_dt_mut::<V4>(QuantityId::Position);
        for &i in &frozen {
            v[i] = V4::zeros();
        }
        let dv = storage.get_d2t_mut::<V4>(QuantityId::Position);
        for &i in &frozen {
            dv[i] = V4::zeros();
        }
    }
}

/// Wraps positions across the faces of a rectangular domain.
pub struct PeriodicBoundary {
    pub aabb: Aabb,
}

impl BoundaryCondition for PeriodicBoundary {
    fn finalize(&mut self, storage: &mut Storage) {
        let size = self.aabb.size();
        for r in storage.get_mut::<V4>(QuantityId::Position) {
            for axis in 0..3 {
                if r[axis] < self.aabb.lower[axis] {
                    r[axis] += size[axis];
                } else if r[axis] > self.aabb.upper[axis] {
                    r[axis] -= size[axis];
                }
            }
        }
    }
}

/// Projects escaped particles back onto the domain surface and removes the
/// outward velocity component.
pub struct DomainProjection {
    pub domain: Domain,
}

impl BoundaryCondition for DomainProjection {
    fn finalize(&mut self, storage: &mut Storage) {
        let outside: Vec<usize> = storage
            .get::<V4>(QuantityId::Position)
            .iter()
            .enumerate()
            .filter(|(_, r)| !self.domain.contains(spatial(**r)))
            .map(|(i, _)| i)
            .collect();
        if outside.is_empty() {
            return;
        }
        let mut r = storage.take_values::<V4>(QuantityId::Position);
        {
            let v = storage.get_dt_mut::<V4>(QuantityId::Position);
            for &i in &outside {
                let projected = self.domain.project(spatial(r[i]));
                let normal = self.domain.normal(spatial(r[i]));
                r[i] = vec4(projected.x, projected.y, projected.z, r[i][H]);
                let sv = spatial(v[i]);
                let outward = sv.dot(&normal).max(0.);
                let clipped = sv - outward * normal;
                v[i] = vec4(clipped.x, clipped.y, clipped.z, v[i][H]);
            }
        }
        storage.put_values(QuantityId::Position, r);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{Material, OrderEnum};
    use crate::{assert_v3_approx_eq, vec3};

    #[test]
    fn sphere_projection_and_mirror() {
        let domain = Domain::Sphere {
            center: V3::zeros(),
            radius: 2.,
        };
        assert!(domain.contains(vec3(1., 0., 0.)));
        assert!(!domain.contains(vec3(3., 0., 0.)));
        assert_v3_approx_eq(
            domain.project(vec3(4., 0., 0.)),
            vec3(2., 0., 0.),
            1e-12,
            || "projection".into(),
        );
        // a particle 0.5 inside mirrors to 0.5 outside
        assert_v3_approx_eq(
            domain.mirror(vec3(1.5, 0., 0.)),
            vec3(2.5, 0., 0.),
            1e-12,
            || "mirror".into(),
        );
    }

    #[test]
    fn ghosts_are_added_and_removed() {
        let mut storage = Storage::with_material(Material::null());
        storage.insert(
            QuantityId::Position,
            OrderEnum::Second,
            vec![vec4(1.8, 0., 0., 0.2), vec4(0., 0., 0., 0.2)],
        );
        storage.insert_uniform::<FT>(QuantityId::Mass, OrderEnum::Zero, 1.);
        let mut boundary = GhostParticles {
            domain: Domain::Sphere {
                center: V3::zeros(),
                radius: 2.,
            },
            ghost_count: 0,
        };
        boundary.initialize(&mut storage);
        // only the particle near the surface is mirrored
        assert_eq!(storage.particle_count(), 3);
        let ghost = storage.get::<V4>(QuantityId::Position)[2];
        assert_v3_approx_eq(spatial(ghost), vec3(2.2, 0., 0.), 1e-12, || "ghost".into());
        boundary.finalize(&mut storage);
        assert_eq!(storage.particle_count(), 2);
    }

    #[test]
    fn projection_pulls_back_and_clips_velocity() {
        let mut storage = Storage::with_material(Material::null());
        storage.insert(
            QuantityId::Position,
            OrderEnum::Second,
            vec![vec4(3., 0., 0., 0.1)],
        );
        storage.get_dt_mut::<V4>(QuantityId::Position)[0] = vec4(1., 1., 0., 0.);
        let mut boundary = DomainProjection {
            domain: Domain::Sphere {
                center: V3::zeros(),
                radius: 2.,
            },
        };
        boundary.finalize(&mut storage);
        let r = storage.get::<V4>(QuantityId::Position)[0];
        assert_v3_approx_eq(spatial(r), vec3(2., 0., 0.), 1e-12, || "projected".into());
        let v = storage.get_dt::<V4>(QuantityId::Position)[0];
        // outward (x) component removed, tangential kept
        assert_v3_approx_eq(spatial(v), vec3(0., 1., 0.), 1e-12, || "velocity".into());
    }
}
