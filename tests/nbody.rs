//! End-to-end scenarios of the hard-sphere solver: rigid rotation,
//! two-body bounces and merges, and cloud collapse.

use rubble::floating_type_mod::FT;
use rubble::math::SymTensor;
use rubble::nbody::{CollisionHandlerKind, HardSphereSolver, OverlapPolicy};
use rubble::settings::{RunSettings, RunSettingsId};
use rubble::solvers::Solver;
use rubble::statistics::Statistics;
use rubble::storage::{Material, OrderEnum, QuantityId, Storage};
use rubble::timestepping::{IntegratorKind, TimeStepping};
use rubble::{assert_ft_approx_eq, assert_v3_approx_eq, spatial, vec3, vec4, M3, V3, V4, H};

fn fixed_dt_settings(dt: FT) -> RunSettings {
    let mut settings = RunSettings::default();
    settings
        .set(RunSettingsId::TimesteppingInitialDt, dt)
        .set(RunSettingsId::TimesteppingMaxDt, dt)
        .set(RunSettingsId::TimesteppingCriteria, 0i64)
        .set(RunSettingsId::NBodyInertiaTensor, true)
        .set(RunSettingsId::NBodyMaxRotationAngle, 1e-4)
        .set(RunSettingsId::GravityEnabled, false);
    settings
}

fn step_many(
    settings: &RunSettings,
    solver: &mut HardSphereSolver,
    storage: &mut Storage,
    steps: usize,
    mut check: impl FnMut(usize, &Storage),
) {
    let mut timestepping = TimeStepping::from_settings(settings).unwrap();
    let mut stats = Statistics::new();
    for i in 1..=steps {
        timestepping.step(solver, storage, &mut stats);
        check(i, storage);
    }
}

fn two_particles() -> Storage {
    let mut storage = Storage::with_material(Material::null());
    storage.insert(
        QuantityId::Position,
        OrderEnum::Second,
        vec![vec4(2., 0., 0., 1.), vec4(-2., 0., 0., 0.5)],
    );
    {
        let v = storage.get_dt_mut::<V4>(QuantityId::Position);
        v[0] = vec4(-5., 0., 0., 0.);
        v[1] = vec4(5., 0., 0., 0.);
    }
    storage.insert_uniform::<FT>(QuantityId::Mass, OrderEnum::Zero, 2.);
    storage
}

fn world_angular_momentum(storage: &Storage, i: usize) -> V3 {
    let e = storage.get::<M3>(QuantityId::LocalFrame)[i];
    let i_body = storage.get::<SymTensor>(QuantityId::MomentOfInertia)[i];
    let w = spatial(storage.get::<V4>(QuantityId::AngularVelocity)[i]);
    let i_world = SymTensor::from_matrix(&(e * i_body.to_matrix() * e.transpose()));
    i_world.apply(w)
}

#[test]
fn local_frame_rotates_with_angular_velocity() {
    let settings = fixed_dt_settings(1e-4);
    let mut solver = HardSphereSolver::from_settings(&settings).unwrap();
    let mut storage = Storage::with_material(Material::null());
    storage.insert(
        QuantityId::Position,
        OrderEnum::Second,
        vec![vec4(0., 0., 0., 1.)],
    );
    storage.insert_uniform::<FT>(QuantityId::Mass, OrderEnum::Zero, 1.);
    solver.create(&mut storage, &Material::null());

    // one rotation per second about z
    let omega = vec3(0., 0., 2. * std::f64::consts::PI);
    let inertia = storage.get::<SymTensor>(QuantityId::MomentOfInertia)[0];
    storage.get_mut::<V4>(QuantityId::AngularVelocity)[0] = rubble::widen(omega);
    storage.get_mut::<V4>(QuantityId::AngularMomentum)[0] = rubble::widen(inertia.apply(omega));

    let mut stats = Statistics::new();
    let expect_rotation = |storage: &Storage, angle: FT| {
        let e = storage.get::<M3>(QuantityId::LocalFrame)[0];
        let expected = nalgebra::Rotation3::from_axis_angle(&V3::z_axis(), angle).into_inner();
        for row in 0..3 {
            for col in 0..3 {
                assert_ft_approx_eq(e[(row, col)], expected[(row, col)], 1e-6, || {
                    format!("frame entry {} {}", row, col)
                });
            }
        }
    };

    for quarter in 1..=4 {
        solver.collide(&mut storage, &mut stats, 0.25);
        expect_rotation(&storage, std::f64::consts::PI / 2. * quarter as FT);
    }
}

#[test]
fn flywheel_conserves_momentum_and_spin_magnitude() {
    for integrator in [IntegratorKind::EulerExplicit, IntegratorKind::LeapFrog] {
        let dt = 1e-5;
        let eps = 4e-5;
        let mut settings = fixed_dt_settings(dt);
        settings.set_enum(RunSettingsId::TimesteppingIntegrator, integrator);
        let mut solver = HardSphereSolver::from_settings(&settings).unwrap();
        let mut storage = Storage::with_material(Material::null());
        storage.insert(
            QuantityId::Position,
            OrderEnum::Second,
            vec![vec4(0., 0., 0., 1.)],
        );
        storage.insert_uniform::<FT>(QuantityId::Mass, OrderEnum::Zero, 2.);
        solver.create(&mut storage, &Material::null());

        let w0 = vec3(2.5, -4., 9.);
        let i0 = SymTensor::new(vec3(3., 3., 1.2), V3::zeros());
        storage.get_mut::<SymTensor>(QuantityId::MomentOfInertia)[0] = i0;
        storage.get_mut::<V4>(QuantityId::AngularVelocity)[0] = rubble::widen(w0);
        let l0 = i0.apply(w0);
        storage.get_mut::<V4>(QuantityId::AngularMomentum)[0] = rubble::widen(l0);

        step_many(&settings, &mut solver, &mut storage, 10_000, |_, storage| {
            // recomputing L from the rotated frame must give the stored
            // momentum back
            let l = world_angular_momentum(storage, 0);
            assert_v3_approx_eq(l, l0, eps, || "angular momentum".into());

            let w = spatial(storage.get::<V4>(QuantityId::AngularVelocity)[0]);
            assert_ft_approx_eq(w.norm(), w0.norm(), eps, || "spin magnitude".into());
            assert_ft_approx_eq(w.dot(&l), w0.dot(&l0), eps, || "w . L".into());
            assert_eq!(storage.get::<SymTensor>(QuantityId::MomentOfInertia)[0], i0);
        });

        // omega precesses, so it must have moved
        let w = spatial(storage.get::<V4>(QuantityId::AngularVelocity)[0]);
        assert!((w - w0).norm() > 1e-3, "omega did not precess");
    }
}

#[test]
fn two_body_elastic_bounce_swaps_velocities() {
    for integrator in [IntegratorKind::EulerExplicit, IntegratorKind::LeapFrog] {
        let dt = 1e-4;
        let mut settings = fixed_dt_settings(dt);
        settings
            .set_enum(RunSettingsId::TimesteppingIntegrator, integrator)
            .set_enum(RunSettingsId::CollisionHandler, CollisionHandlerKind::ElasticBounce)
            .set_enum(RunSettingsId::CollisionOverlap, OverlapPolicy::None)
            .set(RunSettingsId::CollisionRestitutionNormal, 1.)
            .set(RunSettingsId::CollisionRestitutionTangent, 1.);
        let mut solver = HardSphereSolver::from_settings(&settings).unwrap();
        let mut storage = two_particles();
        solver.create(&mut storage, &Material::null());

        let r0 = storage.get::<V4>(QuantityId::Position).to_vec();
        let v0 = storage.get_dt::<V4>(QuantityId::Position).to_vec();
        let dist = (spatial(r0[0]) - spatial(r0[1])).norm() - r0[0][H] - r0[1][H];
        let t_coll = dist / (spatial(v0[0]) - spatial(v0[1])).norm();

        step_many(&settings, &mut solver, &mut storage, 10_000, |step, storage| {
            let t = step as FT * dt;
            assert_eq!(storage.particle_count(), 2);
            let r = storage.get::<V4>(QuantityId::Position);
            let v = storage.get_dt::<V4>(QuantityId::Position);
            assert_eq!(r[0][H], 1.);
            assert_eq!(r[1][H], 0.5);
            let w = storage.get::<V4>(QuantityId::AngularVelocity);
            assert_eq!(spatial(w[0]), V3::zeros());
            assert_eq!(spatial(w[1]), V3::zeros());
            if t < t_coll - dt {
                for k in 0..2 {
                    assert_v3_approx_eq(
                        spatial(r[k]),
                        spatial(r0[k]) + spatial(v0[k]) * t,
                        1e-9,
                        || format!("position of {} at t={}", k, t),
                    );
                    assert_v3_approx_eq(spatial(v[k]), spatial(v0[k]), 1e-6, || {
                        format!("velocity of {} before bounce", k)
                    });
                }
            } else if t > t_coll + dt {
                assert_v3_approx_eq(spatial(v[0]), spatial(v0[1]), 1e-6, || "v0 after".into());
                assert_v3_approx_eq(spatial(v[1]), spatial(v0[0]), 1e-6, || "v1 after".into());
            }
        });
    }
}

#[test]
fn two_body_off_center_merge() {
    let dt = 1e-4;
    let mut settings = fixed_dt_settings(dt);
    settings
        .set_enum(RunSettingsId::CollisionHandler, CollisionHandlerKind::PerfectMerging)
        .set_enum(RunSettingsId::CollisionOverlap, OverlapPolicy::ForceMerge)
        .set(RunSettingsId::CollisionBounceMergeLimit, 0.)
        .set(RunSettingsId::CollisionRotationMergeLimit, 0.);
    let mut solver = HardSphereSolver::from_settings(&settings).unwrap();
    let mut storage = two_particles();
    // graze: offset in y by just under the sum of radii
    storage.get_mut::<V4>(QuantityId::Position)[0].y = 1.5 - 1e-5;
    solver.create(&mut storage, &Material::null());

    let (mass0, l0) = {
        let r = storage.get::<V4>(QuantityId::Position);
        let v = storage.get_dt::<V4>(QuantityId::Position);
        let m = storage.get::<FT>(QuantityId::Mass);
        let mass: FT = m.iter().sum();
        let com: V3 = r
            .iter()
            .zip(m)
            .map(|(r, m)| *m * spatial(*r))
            .sum::<V3>()
            / mass;
        let l: V3 = r
            .iter()
            .zip(v)
            .zip(m)
            .map(|((r, v), m)| *m * (spatial(*r) - com).cross(&spatial(*v)))
            .sum();
        (mass, l)
    };

    step_many(&settings, &mut solver, &mut storage, 5_000, |_, _| {});

    assert_eq!(storage.particle_count(), 1);
    let m = storage.get::<FT>(QuantityId::Mass)[0];
    assert_ft_approx_eq(m, mass0, 1e-12, || "total mass".into());

    let w = spatial(storage.get::<V4>(QuantityId::AngularVelocity)[0]);
    assert!(w.norm() > 0.5, "graze should spin the merged body up: {}", w);

    let l = world_angular_momentum(&storage, 0);
    assert_ft_approx_eq(l.norm(), l0.norm(), 1e-6, || "angular momentum".into());

    // the principal frame separates the long axis: smallest moment first,
    // the other two nearly equal
    let inertia = storage.get::<SymTensor>(QuantityId::MomentOfInertia)[0];
    assert_eq!(inertia.off, V3::zeros());
    assert!(3. * inertia.diag.x < inertia.diag.y, "{:?}", inertia);
    assert_ft_approx_eq(inertia.diag.y, inertia.diag.z, 1e-3, || "symmetric moments".into());
}

#[test]
fn two_body_graze_miss_keeps_both() {
    let dt = 1e-4;
    let mut settings = fixed_dt_settings(dt);
    settings
        .set_enum(RunSettingsId::CollisionHandler, CollisionHandlerKind::PerfectMerging)
        .set_enum(RunSettingsId::CollisionOverlap, OverlapPolicy::Repel);
    let mut solver = HardSphereSolver::from_settings(&settings).unwrap();
    let mut storage = two_particles();
    storage.get_mut::<V4>(QuantityId::Position)[0].y = 1.5 + 1e-5;
    solver.create(&mut storage, &Material::null());

    step_many(&settings, &mut solver, &mut storage, 10_000, |_, storage| {
        assert_eq!(storage.particle_count(), 2);
    });
}

#[test]
fn merge_rejection_keeps_quantities_untouched() {
    let dt = 1e-4;
    let mut settings = fixed_dt_settings(dt);
    settings
        .set_enum(RunSettingsId::CollisionHandler, CollisionHandlerKind::MergeOrBounce)
        .set_enum(RunSettingsId::CollisionOverlap, OverlapPolicy::Repel)
        .set(RunSettingsId::CollisionRestitutionNormal, 1.)
        .set(RunSettingsId::CollisionRestitutionTangent, 1.)
        // escape-velocity threshold so strict that every merge is rejected
        .set(RunSettingsId::CollisionBounceMergeLimit, 1e6);
    let mut solver = HardSphereSolver::from_settings(&settings).unwrap();
    let mut storage = two_particles();
    solver.create(&mut storage, &Material::null());

    let m0 = storage.get::<FT>(QuantityId::Mass).to_vec();
    let i0 = storage.get::<SymTensor>(QuantityId::MomentOfInertia).to_vec();

    step_many(&settings, &mut solver, &mut storage, 10_000, |_, _| {});

    assert_eq!(storage.particle_count(), 2);
    assert_eq!(storage.get::<FT>(QuantityId::Mass), &m0[..]);
    assert_eq!(storage.get::<SymTensor>(QuantityId::MomentOfInertia), &i0[..]);
}

fn particle_cloud(count: usize) -> Storage {
    use rand::{Rng, SeedableRng};
    let mut rng = rand_chacha::ChaCha8Rng::seed_from_u64(42);
    let mut storage = Storage::with_material(Material::null());
    let mut r = Vec::with_capacity(count);
    let mut v = Vec::with_capacity(count);
    for _ in 0..count {
        let pos = vec3(
            rng.gen_range(-1.0..1.0),
            rng.gen_range(-1.0..1.0),
            rng.gen_range(-1.0..1.0),
        );
        r.push(vec4(pos.x, pos.y, pos.z, 0.01));
        // radially inward: every trajectory passes through the origin
        v.push(rubble::widen(-4. * pos));
    }
    storage.insert(QuantityId::Position, OrderEnum::Second, r);
    *storage.get_dt_mut::<V4>(QuantityId::Position) = v;
    storage.insert_uniform::<FT>(QuantityId::Mass, OrderEnum::Zero, 1.);
    storage
}

#[test]
fn cloud_collapse_merges_into_single_body() {
    let dt = 1e-4;
    let mut settings = fixed_dt_settings(dt);
    settings
        .set_enum(RunSettingsId::CollisionHandler, CollisionHandlerKind::PerfectMerging)
        .set_enum(RunSettingsId::CollisionOverlap, OverlapPolicy::ForceMerge)
        .set(RunSettingsId::CollisionBounceMergeLimit, 0.)
        .set(RunSettingsId::CollisionRotationMergeLimit, 0.);
    let mut solver = HardSphereSolver::from_settings(&settings).unwrap();
    let mut storage = particle_cloud(100);
    solver.create(&mut storage, &Material::null());

    step_many(&settings, &mut solver, &mut storage, 10_000, |_, _| {});
    assert_eq!(storage.particle_count(), 1);
}

#[test]
fn cloud_merge_or_bounce_with_repel_reduces_count() {
    let dt = 1e-4;
    let mut settings = fixed_dt_settings(dt);
    settings
        .set_enum(RunSettingsId::CollisionHandler, CollisionHandlerKind::MergeOrBounce)
        .set_enum(RunSettingsId::CollisionOverlap, OverlapPolicy::Repel)
        .set(RunSettingsId::CollisionBounceMergeLimit, 0.)
        .set(RunSettingsId::CollisionRotationMergeLimit, 0.);
    let mut solver = HardSphereSolver::from_settings(&settings).unwrap();
    let mut storage = particle_cloud(100);
    solver.create(&mut storage, &Material::null());

    step_many(&settings, &mut solver, &mut storage, 10_000, |_, _| {});
    // repelled overlaps scatter particles, so the cloud need not collapse
    // fully, but most of it accretes
    assert!(storage.particle_count() < 100);
}

#[test]
fn overlap_repel_separates_and_preserves_center_of_mass() {
    let mut settings = fixed_dt_settings(1e-4);
    settings
        .set_enum(RunSettingsId::CollisionHandler, CollisionHandlerKind::ElasticBounce)
        .set_enum(RunSettingsId::CollisionOverlap, OverlapPolicy::Repel)
        .set(RunSettingsId::CollisionRestitutionNormal, 0.)
        .set(RunSettingsId::CollisionRestitutionTangent, 0.);
    let mut solver = HardSphereSolver::from_settings(&settings).unwrap();
    let mut storage = Storage::with_material(Material::null());
    storage.insert(
        QuantityId::Position,
        OrderEnum::Second,
        vec![vec4(0., 0., 0., 1.), vec4(1., 0., 0., 0.25)],
    );
    storage.insert(QuantityId::Mass, OrderEnum::Zero, vec![1., 0.1]);
    solver.create(&mut storage, &Material::null());

    let com_before = {
        let r = storage.get::<V4>(QuantityId::Position);
        let m = storage.get::<FT>(QuantityId::Mass);
        r.iter().zip(m).map(|(r, m)| *m * spatial(*r)).sum::<V3>() / 1.1
    };

    let mut stats = Statistics::new();
    solver.collide(&mut storage, &mut stats, 1e-4);

    let r = storage.get::<V4>(QuantityId::Position);
    let dist = (spatial(r[0]) - spatial(r[1])).norm();
    assert_ft_approx_eq(dist, r[0][H] + r[1][H], 1e-9, || "touching".into());
    let m = storage.get::<FT>(QuantityId::Mass);
    let com_after = r.iter().zip(m).map(|(r, m)| *m * spatial(*r)).sum::<V3>() / 1.1;
    assert_v3_approx_eq(com_before, com_after, 1e-12, || "center of mass".into());
}
