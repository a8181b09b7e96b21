use super::collisions::{
    merge_bodies, BodyState, CollisionHandler, CollisionHandlerKind, CollisionOutcome,
    ElasticBounceHandler, MergeOrBounceHandler, OverlapPolicy, PerfectMergingHandler,
};
use crate::finder::kd_tree::KdTree;
use crate::finder::NeighbourFinder;
use crate::floating_type_mod::FT;
use crate::gravity::BarnesHut;
use crate::math::SymTensor;
use crate::run::RunError;
use crate::scheduler::Scheduler;
use crate::settings::{RunSettings, RunSettingsId};
use crate::solvers::Solver;
use crate::statistics::{Statistics, StatsId};
use crate::storage::{Material, OrderEnum, QuantityId, Storage};
use crate::{spatial, vec4, widen, M3, V3, V4, H};
use nalgebra::Rotation3;

/// Solver for the reaccumulation phase: point gravity between hard
/// spheres, event-ordered collision resolution with pluggable handlers,
/// overlap policies, and rigid-body rotation of spinning particles.
///
/// Particles carry position (second order) with the radius in the H lane,
/// mass, and optionally inertia tensor (body frame), local frame and
/// angular momentum.
pub struct HardSphereSolver {
    scheduler: Scheduler,
    gravity: Option<BarnesHut>,
    handler: Box<dyn CollisionHandler>,
    overlap: OverlapPolicy,
    bounce: ElasticBounceHandler,
    merge_criteria: MergeOrBounceHandler,
    allowed_overlap: FT,
    use_inertia: bool,
    max_rotation_angle: FT,
    leaf_size: usize,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum EventKind {
    Collision,
    Overlap,
}

#[derive(Debug, Clone, Copy)]
struct Event {
    t: FT,
    i: usize,
    j: usize,
    kind: EventKind,
}

/// Mutable particle buffers taken out of the storage for the duration of
/// the collision pass.
struct Bodies {
    r: Vec<V4>,
    v: Vec<V4>,
    m: Vec<FT>,
    spin: Option<SpinBuffers>,
}

struct SpinBuffers {
    omega: Vec<V4>,
    inertia: Vec<SymTensor>,
    frame: Vec<M3>,
    l: Vec<V4>,
}

impl Bodies {
    fn state(&self, k: usize, rewind: FT) -> BodyState {
        let radius = self.r[k][H];
        let v = spatial(self.v[k]);
        let (omega, inertia) = match &self.spin {
            Some(spin) => (
                spatial(spin.omega[k]),
                world_inertia(&spin.frame[k], &spin.inertia[k]),
            ),
            None => (
                V3::zeros(),
                SymTensor::isotropic(0.4 * self.m[k] * radius * radius),
            ),
        };
        BodyState {
            pos: spatial(self.r[k]) - v * rewind,
            v,
            m: self.m[k],
            radius,
            omega,
            inertia,
        }
    }
}

fn world_inertia(frame: &M3, body: &SymTensor) -> SymTensor {
    SymTensor::from_matrix(&(frame * body.to_matrix() * frame.transpose()))
}

impl HardSphereSolver {
    pub fn from_settings(settings: &RunSettings) -> Result<Self, RunError> {
        let bounce = ElasticBounceHandler {
            restitution_n: settings.get(RunSettingsId::CollisionRestitutionNormal),
            restitution_t: settings.get(RunSettingsId::CollisionRestitutionTangent),
        };
        let merge_criteria = MergeOrBounceHandler {
            bounce,
            bounce_merge_limit: settings.get(RunSettingsId::CollisionBounceMergeLimit),
            rotation_merge_limit: settings.get(RunSettingsId::CollisionRotationMergeLimit),
            gravity_constant: settings.get(RunSettingsId::GravityConstant),
        };
        let handler: Box<dyn CollisionHandler> =
            match settings.get_enum(RunSettingsId::CollisionHandler)? {
                CollisionHandlerKind::ElasticBounce => Box::new(bounce),
                CollisionHandlerKind::PerfectMerging => Box::new(PerfectMergingHandler),
                CollisionHandlerKind::MergeOrBounce => Box::new(MergeOrBounceHandler {
                    bounce,
                    bounce_merge_limit: merge_criteria.bounce_merge_limit,
                    rotation_merge_limit: merge_criteria.rotation_merge_limit,
                    gravity_constant: merge_criteria.gravity_constant,
                }),
            };
        let gravity = settings
            .get::<bool>(RunSettingsId::GravityEnabled)
            .then(|| {
                BarnesHut::new(
                    settings.get(RunSettingsId::GravityConstant),
                    settings.get(RunSettingsId::GravityOpeningAngle),
                    settings.get::<i64>(RunSettingsId::GravityMultipoleOrder) as usize,
                )
            });
        Ok(HardSphereSolver {
            scheduler: Scheduler::new(settings.get::<i64>(RunSettingsId::SchedulerGranularity) as usize),
            gravity,
            handler,
            overlap: settings.get_enum(RunSettingsId::CollisionOverlap)?,
            bounce,
            merge_criteria,
            allowed_overlap: settings.get(RunSettingsId::CollisionAllowedOverlap),
            use_inertia: settings.get(RunSettingsId::NBodyInertiaTensor),
            max_rotation_angle: settings.get(RunSettingsId::NBodyMaxRotationAngle),
            leaf_size: settings.get::<i64>(RunSettingsId::FinderLeafSize) as usize,
        })
    }

    /// Torque-free rigid rotation: the local frame precesses under the
    /// stored angular momentum, with the angular velocity recomputed from
    /// the rotated inertia tensor. Anisotropic bodies substep so that no
    /// substep rotates by more than the configured angle.
    fn advance_rotation(&self, storage: &mut Storage, dt: FT) {
        if !storage.has(QuantityId::LocalFrame) {
            return;
        }
        let inertia = storage.take_values::<SymTensor>(QuantityId::MomentOfInertia);
        let l = storage.take_values::<V4>(QuantityId::AngularMomentum);
        let mut frame = storage.take_values::<M3>(QuantityId::LocalFrame);
        let mut omega = storage.take_values::<V4>(QuantityId::AngularVelocity);
        let max_angle = self.max_rotation_angle;

        self.scheduler
            .parallel_for_each2(&mut frame, &mut omega, |k, e, w| {
                let l_k = spatial(l[k]);
                let i_body = inertia[k];
                if l_k == V3::zeros() {
                    *w = V4::zeros();
                    return;
                }
                let omega_of = |e: &M3| -> V3 {
                    world_inertia(e, &i_body)
                        .inverse()
                        .expect("singular inertia tensor")
                        .apply(l_k)
                };
                let isotropic = i_body.off == V3::zeros()
                    && i_body.diag.x == i_body.diag.y
                    && i_body.diag.y == i_body.diag.z;
                let mut w_k = omega_of(e);
                if isotropic {
                    *e = Rotation3::from_scaled_axis(w_k * dt).into_inner() * *e;
                } else {
                    let substeps =
                        usize::max(1, (w_k.norm() * dt / max_angle).ceil() as usize);
                    let h = dt / substeps as FT;
                    for _ in 0..substeps {
                        // midpoint: rotate half a step to sample omega there
                        let e_half = Rotation3::from_scaled_axis(w_k * (0.5 * h)).into_inner() * *e;
                        let w_mid = omega_of(&e_half);
                        *e = Rotation3::from_scaled_axis(w_mid * h).into_inner() * *e;
                        w_k = omega_of(e);
                    }
                }
                *w = widen(w_k);
            });

        storage.put_values(QuantityId::AngularVelocity, omega);
        storage.put_values(QuantityId::LocalFrame, frame);
        storage.put_values(QuantityId::AngularMomentum, l);
        storage.put_values(QuantityId::MomentOfInertia, inertia);
    }

    /// Pair scan at the end-of-step positions; emits collision events with
    /// their exact linear-motion contact times and overlap events for pairs
    /// that end the step interpenetrating.
    fn detect_events(&self, bodies: &Bodies, dt: FT) -> Vec<Event> {
        let n = bodies.r.len();
        let tree = KdTree::build(&bodies.r, self.leaf_size);
        let rad_max = bodies.r.iter().map(|x| x[H]).fold(0., FT::max);
        let v_max = bodies.v.iter().map(|x| spatial(*x).norm()).fold(0., FT::max);

        let slots = self.scheduler.accumulate(
            n,
            || (Vec::<Event>::new(), Vec::new()),
            |i, (events, neighs)| {
                let search = bodies.r[i][H] + rad_max + (spatial(bodies.v[i]).norm() + v_max) * dt;
                tree.find_all(i, search, neighs);
                for record in neighs.iter() {
                    let j = record.index;
                    if j <= i {
                        continue;
                    }
                    let radius_sum = bodies.r[i][H] + bodies.r[j][H];
                    if radius_sum <= 0. {
                        // point particles never interact
                        continue;
                    }
                    let dv = spatial(bodies.v[i] - bodies.v[j]);
                    let dx_end = spatial(bodies.r[i] - bodies.r[j]);
                    let dx0 = dx_end - dv * dt;
                    let a = dv.norm_squared();
                    let b = 2. * dx0.dot(&dv);
                    let c = dx0.norm_squared() - radius_sum * radius_sum;
                    let overlapping_at_end = dx_end.norm_squared() < radius_sum * radius_sum;
                    if a > 0. {
                        let disc = b * b - 4. * a * c;
                        if disc >= 0. {
                            let t = (-b - disc.sqrt()) / (2. * a);
                            if (0. ..=dt).contains(&t) {
                                events.push(Event {
                                    t,
                                    i,
                                    j,
                                    kind: EventKind::Collision,
                                });
                            }
                        }
                    }
                    if overlapping_at_end {
                        events.push(Event {
                            t: dt,
                            i,
                            j,
                            kind: EventKind::Overlap,
                        });
                    }
                }
            },
        );

        let mut events: Vec<Event> = slots.into_iter().flat_map(|(events, _)| events).collect();
        events.sort_by(|a, b| {
            a.t.partial_cmp(&b.t)
                .expect("non-finite collision time")
                .then(a.i.cmp(&b.i))
                .then(a.j.cmp(&b.j))
        });
        events
    }

    /// Writes the merged body over particle `i`; `j` is compacted away at
    /// the end of the step.
    fn apply_merge(&self, bodies: &mut Bodies, i: usize, j: usize, remaining: FT) {
        let a = bodies.state(i, remaining);
        let b = bodies.state(j, remaining);
        let merged = merge_bodies(&a, &b);

        let pos_end = merged.pos + merged.v * remaining;
        bodies.r[i] = vec4(pos_end.x, pos_end.y, pos_end.z, merged.radius);
        bodies.v[i] = widen(merged.v);
        bodies.m[i] = merged.m;

        if let Some(spin) = &mut bodies.spin {
            // principal frame of the combined inertia; the body-frame
            // tensor is diagonal with ascending moments
            let eigen = merged.inertia.to_matrix().symmetric_eigen();
            let mut order = [0usize, 1, 2];
            order.sort_by(|&p, &q| {
                eigen.eigenvalues[p]
                    .partial_cmp(&eigen.eigenvalues[q])
                    .unwrap()
            });
            let mut frame = M3::zeros();
            let mut diag = V3::zeros();
            for (col, &src) in order.iter().enumerate() {
                frame.set_column(col, &eigen.eigenvectors.column(src));
                diag[col] = eigen.eigenvalues[src];
            }
            if frame.determinant() < 0. {
                let flipped = -frame.column(2).clone_owned();
                frame.set_column(2, &flipped);
            }
            spin.frame[i] = frame;
            spin.inertia[i] = SymTensor::new(diag, V3::zeros());
            spin.l[i] = widen(merged.l);
            spin.omega[i] = widen(
                merged
                    .inertia
                    .inverse()
                    .map(|inv| inv.apply(merged.l))
                    .unwrap_or_else(V3::zeros),
            );
        }
    }

    /// Moves an overlapping pair apart along the line of centers,
    /// preserving the center of mass, and applies bounce velocities.
    fn apply_repel(&self, bodies: &mut Bodies, i: usize, j: usize) {
        let a = bodies.state(i, 0.);
        let b = bodies.state(j, 0.);
        let dx = a.pos - b.pos;
        let dist = dx.norm();
        assert!(dist > 0., "cannot repel two coincident particles");
        let normal = dx / dist;
        let depth = a.radius + b.radius - dist;
        let m_total = a.m + b.m;

        let pos_a = a.pos + normal * (depth * b.m / m_total);
        let pos_b = b.pos - normal * (depth * a.m / m_total);
        bodies.r[i] = vec4(pos_a.x, pos_a.y, pos_a.z, a.radius);
        bodies.r[j] = vec4(pos_b.x, pos_b.y, pos_b.z, b.radius);

        if let CollisionOutcome::Bounce { v_a, v_b } = self.bounce.collide(&a, &b, normal) {
            bodies.v[i] = widen(v_a);
            bodies.v[j] = widen(v_b);
        }
    }

    fn take_bodies(&self, storage: &mut Storage) -> Bodies {
        let spin = (self.use_inertia && storage.has(QuantityId::LocalFrame)).then(|| SpinBuffers {
            omega: storage.take_values::<V4>(QuantityId::AngularVelocity),
            inertia: storage.take_values::<SymTensor>(QuantityId::MomentOfInertia),
            frame: storage.take_values::<M3>(QuantityId::LocalFrame),
            l: storage.take_values::<V4>(QuantityId::AngularMomentum),
        });
        Bodies {
            r: storage.take_values::<V4>(QuantityId::Position),
            v: storage.take_dt::<V4>(QuantityId::Position),
            m: storage.take_values::<FT>(QuantityId::Mass),
            spin,
        }
    }

    fn put_bodies(&self, storage: &mut Storage, bodies: Bodies) {
        storage.put_values(QuantityId::Position, bodies.r);
        storage.put_dt(QuantityId::Position, bodies.v);
        storage.put_values(QuantityId::Mass, bodies.m);
        if let Some(spin) = bodies.spin {
            storage.put_values(QuantityId::AngularVelocity, spin.omega);
            storage.put_values(QuantityId::MomentOfInertia, spin.inertia);
            storage.put_values(QuantityId::LocalFrame, spin.frame);
            storage.put_values(QuantityId::AngularMomentum, spin.l);
        }
    }
}

impl Solver for HardSphereSolver {
    fn create(&mut self, storage: &mut Storage, _material: &Material) {
        assert!(
            storage.has(QuantityId::Position) && storage.has(QuantityId::Mass),
            "the N-body solver needs positions and masses"
        );
        if self.use_inertia {
            let inertia: Vec<SymTensor> = storage
                .get::<V4>(QuantityId::Position)
                .iter()
                .zip(storage.get::<FT>(QuantityId::Mass))
                .map(|(r, m)| SymTensor::isotropic(0.4 * m * r[H] * r[H]))
                .collect();
            storage.insert(QuantityId::MomentOfInertia, OrderEnum::Zero, inertia);
            storage.insert_uniform::<M3>(QuantityId::LocalFrame, OrderEnum::Zero, M3::identity());
            storage.insert_uniform::<V4>(QuantityId::AngularVelocity, OrderEnum::Zero, V4::zeros());
            storage.insert_uniform::<V4>(QuantityId::AngularMomentum, OrderEnum::Zero, V4::zeros());
        }
    }

    fn integrate(&mut self, storage: &mut Storage, _stats: &mut Statistics) {
        storage.init();
        let Some(gravity) = &self.gravity else {
            return;
        };
        let m = storage.take_values::<FT>(QuantityId::Mass);
        let mut tree = KdTree::build(storage.get::<V4>(QuantityId::Position), self.leaf_size);
        gravity.build_moments(&mut tree, &m);
        {
            let dv = storage.get_d2t_mut::<V4>(QuantityId::Position);
            self.scheduler.parallel_for_each(dv, |i, out| {
                *out += widen(gravity.eval(&tree, &m, spatial(tree.position_of(i)), Some(i)));
            });
        }
        storage.put_values(QuantityId::Mass, m);
    }

    fn collide(&mut self, storage: &mut Storage, stats: &mut Statistics, dt: FT) {
        self.advance_rotation(storage, dt);

        let n = storage.particle_count();
        if n < 2 {
            stats.set_int(StatsId::ParticleCount, n as i64);
            return;
        }

        let mut bodies = self.take_bodies(storage);

        #[cfg(debug_assertions)]
        let (mass0, momentum0) = {
            let mass: FT = bodies.m.iter().sum();
            let momentum: V3 = bodies
                .m
                .iter()
                .zip(&bodies.v)
                .map(|(m, v)| *m * spatial(*v))
                .sum();
            (mass, momentum)
        };

        let events = self.detect_events(&bodies, dt);

        let mut removed = vec![false; n];
        let mut dirty = vec![false; n];
        let mut removed_indices = Vec::new();

        for event in events.iter().filter(|e| e.kind == EventKind::Collision) {
            let (i, j) = (event.i, event.j);
            if removed[i] || removed[j] || dirty[i] || dirty[j] {
                // the precomputed contact time is stale; unresolved
                // contacts re-appear as overlaps or in the next step
                continue;
            }
            let remaining = dt - event.t;
            let a = bodies.state(i, remaining);
            let b = bodies.state(j, remaining);
            let dx = a.pos - b.pos;
            if dx == V3::zeros() {
                continue;
            }
            let normal = dx.normalize();
            match self.handler.collide(&a, &b, normal) {
                CollisionOutcome::Bounce { v_a, v_b } => {
                    let pos_a = a.pos + v_a * remaining;
                    let pos_b = b.pos + v_b * remaining;
                    bodies.r[i] = vec4(pos_a.x, pos_a.y, pos_a.z, a.radius);
                    bodies.r[j] = vec4(pos_b.x, pos_b.y, pos_b.z, b.radius);
                    bodies.v[i] = widen(v_a);
                    bodies.v[j] = widen(v_b);
                    stats.increment(StatsId::BounceCount, 1);
                }
                CollisionOutcome::Merge => {
                    self.apply_merge(&mut bodies, i, j, remaining);
                    removed[j] = true;
                    removed_indices.push(j);
                    stats.increment(StatsId::MergerCount, 1);
                }
            }
            dirty[i] = true;
            dirty[j] = true;
            stats.increment(StatsId::CollisionCount, 1);
        }

        for event in events.iter().filter(|e| e.kind == EventKind::Overlap) {
            let (i, j) = (event.i, event.j);
            if removed[i] || removed[j] {
                continue;
            }
            // states may have changed; re-measure the overlap
            let a = bodies.state(i, 0.);
            let b = bodies.state(j, 0.);
            let depth = a.radius + b.radius - (a.pos - b.pos).norm();
            if depth <= self.allowed_overlap * FT::min(a.radius, b.radius) {
                continue;
            }
            stats.increment(StatsId::OverlapCount, 1);
            match self.overlap {
                OverlapPolicy::None => {
                    panic!(
                        "particles {} and {} overlap by {} with overlap handling disabled",
                        i, j, depth
                    );
                }
                OverlapPolicy::Repel => self.apply_repel(&mut bodies, i, j),
                OverlapPolicy::ForceMerge => {
                    self.apply_merge(&mut bodies, i, j, 0.);
                    removed[j] = true;
                    removed_indices.push(j);
                    stats.increment(StatsId::MergerCount, 1);
                }
                OverlapPolicy::RepelOrMerge => {
                    if self.merge_criteria.merge_allowed(&a, &b) {
                        self.apply_merge(&mut bodies, i, j, 0.);
                        removed[j] = true;
                        removed_indices.push(j);
                        stats.increment(StatsId::MergerCount, 1);
                    } else {
                        self.apply_repel(&mut bodies, i, j);
                    }
                }
            }
        }

        #[cfg(debug_assertions)]
        {
            let mass: FT = bodies
                .m
                .iter()
                .enumerate()
                .filter(|(k, _)| !removed[*k])
                .map(|(_, m)| *m)
                .sum();
            let momentum: V3 = bodies
                .m
                .iter()
                .zip(&bodies.v)
                .enumerate()
                .filter(|(k, _)| !removed[*k])
                .map(|(_, (m, v))| *m * spatial(*v))
                .sum();
            let scale = momentum0.norm().max(mass0);
            debug_assert!((mass - mass0).abs() <= 1e-6 * mass0, "mass not conserved");
            debug_assert!(
                (momentum - momentum0).norm() <= 1e-6 * scale,
                "momentum not conserved: {} vs {}",
                momentum,
                momentum0
            );
        }

        self.put_bodies(storage, bodies);

        if !removed_indices.is_empty() {
            removed_indices.sort_unstable();
            storage.remove(&removed_indices);
            storage.propagate(|s| s.remove(&removed_indices));
        }
        stats.set_int(StatsId::ParticleCount, storage.particle_count() as i64);
    }
}
