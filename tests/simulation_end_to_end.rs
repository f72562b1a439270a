// End-to-end behaviour of SwarmSimulation on the headless backend

use std::cell::RefCell;
use std::rc::Rc;

use nannou::glam::{Mat4, Vec3};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use swarm_gpu::backend::{BufferDesc, DispatchParams, KernelBindings, KernelId};
use swarm_gpu::device::IndirectArgs;
use swarm_gpu::food::VisualHandle;
use swarm_gpu::swarm::SwarmData;
use swarm_gpu::{
    AttractorVisuals, BoidData, BufferId, ComputeBackend, DeviceError, HeadlessBackend, MaterialHandle, MeshHandle,
    MeshSource, NoVisuals, SimulationConfig, SwarmDescriptor, SwarmError, SwarmParameters, SwarmSimulation,
    SwarmType,
};

const CUBE: MeshHandle = MeshHandle { id: 7, index_count: 36 };

fn drawable(swarm_type: SwarmType, count: u32) -> SwarmDescriptor {
    SwarmDescriptor::new(swarm_type, count).with_visuals(CUBE, MaterialHandle(1))
}

fn config(swarms: Vec<SwarmDescriptor>) -> SimulationConfig {
    SimulationConfig {
        swarms,
        seed: Some(3),
        ..SimulationConfig::default()
    }
}

fn assert_consistent<B: ComputeBackend, V: AttractorVisuals>(sim: &SwarmSimulation<B, V>) {
    let registry = sim.registry();
    let counts = registry.counts();
    assert_eq!(counts.iter().sum::<u32>() as usize, sim.population().len());
    assert_eq!(sim.population().boids().len(), sim.population().instances().len());
    for (i, offset) in registry.offsets().iter().enumerate() {
        assert_eq!(*offset, counts[..i].iter().sum::<u32>());
    }
    // Every swarm occupies exactly [offset, offset + count)
    for swarm in registry.iter() {
        let start = registry.offset(swarm.swarm_id).unwrap() as usize;
        let range = &sim.population().boids()[start..start + swarm.boid_count as usize];
        assert!(range.iter().all(|b| b.belongs_to(swarm.swarm_id)));
    }
}

fn assert_device_matches<V: AttractorVisuals>(sim: &SwarmSimulation<HeadlessBackend, V>) {
    let device = sim.device();
    let boids = device.boid_buffer().unwrap();
    assert_eq!(boids.element_count, sim.population().len());
    assert_eq!(device.instance_buffer().unwrap().element_count, sim.population().len());
    assert_eq!(device.swarm_buffer().unwrap().element_count, sim.registry().len());
    assert_eq!(device.triangle_buffer().unwrap().element_count, sim.obstacles().triangles().len());
    let uploaded: Vec<BoidData> = sim.backend().read(boids.id).unwrap();
    assert_eq!(uploaded.as_slice(), sim.population().boids());
}

#[test]
fn single_prey_swarm_scenario() {
    let mut sim = SwarmSimulation::new(config(vec![drawable(SwarmType::Prey, 3)]), HeadlessBackend::default(), NoVisuals)
        .unwrap();
    sim.stop_food_spawning();

    sim.add_boid(0).unwrap();
    sim.add_boid(0).unwrap();
    assert_eq!(sim.registry().count(0).unwrap(), 5);
    assert_eq!(sim.registry().offsets(), &[0]);

    sim.add_food_attractor(Vec3::new(1.0, 2.0, 3.0), 0.0).unwrap();
    sim.tick(0.0, 0.016).unwrap();
    assert_eq!(sim.food_buffer_count(), 1);
    assert_device_matches(&sim);

    let lifetime = sim.config().food_lifetime;
    let report = sim.tick(lifetime + 1.0, 0.016).unwrap();
    assert!(report.food_expired);
    assert!(sim.food().is_empty());
    assert_eq!(sim.food_buffer_count(), 0);

    for _ in 0..3 {
        sim.remove_boid(0).unwrap();
    }
    assert_eq!(sim.registry().count(0).unwrap(), 2);

    sim.remove_boid(0).unwrap();
    sim.remove_boid(0).unwrap();
    assert_eq!(sim.registry().count(0).unwrap(), 0);
    let before = sim.population().clone();
    assert!(matches!(sim.remove_boid(0), Err(SwarmError::EmptySwarm(0))));
    assert_eq!(sim.population(), &before);
    assert_consistent(&sim);
}

#[test]
fn random_mutations_keep_every_invariant() {
    let swarms = vec![
        drawable(SwarmType::Prey, 4),
        SwarmDescriptor::new(SwarmType::Predator, 0),
        drawable(SwarmType::Omnivore, 2),
    ];
    let mut sim = SwarmSimulation::new(config(swarms), HeadlessBackend::default(), NoVisuals).unwrap();
    let mut rng = StdRng::seed_from_u64(11);

    for step in 0..200 {
        let swarm_id = rng.gen_range(0..3);
        if rng.gen_bool(0.55) {
            sim.add_boid(swarm_id).unwrap();
        } else {
            match sim.remove_boid(swarm_id) {
                Ok(_) => {}
                Err(SwarmError::EmptySwarm(id)) => assert_eq!(id, swarm_id),
                Err(other) => panic!("unexpected error {other}"),
            }
        }
        assert_consistent(&sim);
        if step % 20 == 0 {
            sim.tick(step as f32 * 0.1, 0.1).unwrap();
            assert_device_matches(&sim);
        }
    }
}

#[test]
fn draw_arguments_follow_counts_and_offsets() {
    let swarms = vec![
        drawable(SwarmType::Prey, 3),
        SwarmDescriptor::new(SwarmType::Predator, 5),
        drawable(SwarmType::Omnivore, 2),
    ];
    let mut sim = SwarmSimulation::new(config(swarms), HeadlessBackend::default(), NoVisuals).unwrap();
    sim.add_boid(0).unwrap();
    let report = sim.tick(0.0, 0.016).unwrap();

    // The predator swarm has no mesh, so it is not drawn
    let drawn: Vec<u32> = report.draws.iter().map(|d| d.swarm_id).collect();
    assert_eq!(drawn, vec![0, 2]);

    let omnivores = &report.draws[1];
    assert_eq!(omnivores.start_instance, 9);
    let args: Vec<IndirectArgs> = sim.backend().read(omnivores.args_buffer).unwrap();
    assert_eq!(
        args,
        vec![IndirectArgs {
            index_count: 36,
            instance_count: 4,
            first_index: 0,
            base_vertex: 0,
            first_instance: 9,
        }]
    );
    assert_eq!(omnivores.mesh_transform, Mat4::IDENTITY);
}

#[test]
fn emptied_swarm_loses_its_draw_call() {
    let mut sim = SwarmSimulation::new(config(vec![drawable(SwarmType::Prey, 1)]), HeadlessBackend::default(), NoVisuals)
        .unwrap();
    sim.remove_boid(0).unwrap();
    let report = sim.tick(0.0, 0.016).unwrap();
    assert!(report.draws.is_empty());
    assert!(!report.dispatched);
    assert!(sim.device().draw_args(0).is_none());
}

#[test]
fn parameter_changes_reach_the_swarm_buffer_on_the_next_tick() {
    let mut sim = SwarmSimulation::new(config(vec![drawable(SwarmType::Prey, 2)]), HeadlessBackend::default(), NoVisuals)
        .unwrap();
    let params = SwarmParameters {
        alignment_weight: 3.0,
        speed: 12.0,
        ..SwarmParameters::default()
    };
    sim.adjust_swarm_parameters(0, params).unwrap();
    sim.tick(0.0, 0.016).unwrap();

    let id = sim.device().swarm_buffer().unwrap().id;
    let records: Vec<SwarmData> = sim.backend().read(id).unwrap();
    assert_eq!(records[0].alignment_weight, 3.0);
    assert_eq!(records[0].speed, 12.0);
    assert!(matches!(
        sim.adjust_swarm_parameters(5, params),
        Err(SwarmError::NotFound(5))
    ));
}

#[test]
fn missing_program_degrades_without_touching_the_device() {
    let mut sim =
        SwarmSimulation::new(config(vec![drawable(SwarmType::Prey, 3)]), HeadlessBackend::without_program(), NoVisuals)
            .unwrap();
    assert!(sim.is_degraded());
    assert_eq!(sim.population().len(), 3);

    let report = sim.tick(0.0, 0.016).unwrap();
    assert!(!report.dispatched);
    assert!(report.draws.is_empty());
    assert_eq!(sim.backend().stats().allocations, 0);
    assert_eq!(sim.debug_info().skipped_ticks, 1);

    sim.backend_mut().install_program(&["main"]);
    sim.reinitialize().unwrap();
    assert!(!sim.is_degraded());
    assert!(sim.tick(1.0, 0.016).unwrap().dispatched);
    assert_device_matches(&sim);
}

#[test]
fn missing_entry_point_is_reported() {
    let sim = SwarmSimulation::new(
        config(vec![drawable(SwarmType::Prey, 1)]),
        HeadlessBackend::new(&["step"]),
        NoVisuals,
    )
    .unwrap();
    assert!(matches!(
        sim.state(),
        swarm_gpu::simulation::DeviceState::Degraded(DeviceError::MissingEntryPoint(name)) if name == "main"
    ));
}

#[test]
fn allocation_failure_skips_the_tick_then_recovers() {
    let mut sim = SwarmSimulation::new(config(vec![drawable(SwarmType::Prey, 3)]), HeadlessBackend::default(), NoVisuals)
        .unwrap();
    sim.tick(0.0, 0.016).unwrap();
    let dispatches = sim.backend().stats().dispatches;

    sim.add_boid(0).unwrap();
    sim.backend_mut().fail_next_allocations(1);
    let err = sim.tick(0.1, 0.016).unwrap_err();
    assert!(matches!(err, SwarmError::DeviceResourceFailure(DeviceError::AllocationFailed { .. })));
    assert!(!err.is_recoverable());
    assert_eq!(sim.backend().live_buffers(), 0, "degraded state holds no buffers");

    // Reported once, then skipped quietly
    let quiet = sim.tick(0.2, 0.016).unwrap();
    assert!(!quiet.dispatched);
    assert_eq!(sim.backend().stats().dispatches, dispatches);

    // CPU mutations still work while degraded
    sim.add_boid(0).unwrap();
    sim.reinitialize().unwrap();
    assert!(sim.tick(0.3, 0.016).unwrap().dispatched);
    assert_device_matches(&sim);
    assert_eq!(sim.device().boid_buffer().unwrap().element_count, 5);
}

#[test]
fn food_beyond_capacity_stays_tracked_but_hidden() {
    let mut cfg = config(vec![drawable(SwarmType::Prey, 1)]);
    cfg.food_capacity = 2;
    let mut sim = SwarmSimulation::new(cfg, HeadlessBackend::default(), NoVisuals).unwrap();
    sim.stop_food_spawning();
    for i in 0..3 {
        sim.add_food_attractor(Vec3::splat(i as f32), 0.0).unwrap();
    }
    sim.tick(0.0, 0.016).unwrap();

    assert_eq!(sim.food().len(), 3);
    assert_eq!(sim.food_buffer_count(), 2);
    assert_eq!(sim.debug_info().hidden_attractors, 1);
    assert_eq!(sim.device().attractor_buffer().unwrap().element_count, 2);
    assert_eq!(sim.backend().last_dispatch().unwrap().params.food_attractor_count, 2);
}

#[test]
fn periodic_food_spawns_on_the_interval() {
    let mut sim = SwarmSimulation::new(config(vec![drawable(SwarmType::Prey, 1)]), HeadlessBackend::default(), NoVisuals)
        .unwrap();
    assert!(sim.tick(0.0, 0.016).unwrap().food_spawned);
    assert!(!sim.tick(2.0, 0.016).unwrap().food_spawned);
    assert!(sim.tick(5.0, 0.016).unwrap().food_spawned);
    assert_eq!(sim.food().len(), 2);
    // The first one expires at 10
    assert!(sim.tick(10.0, 0.016).unwrap().food_expired);
}

#[test]
fn food_added_between_ticks_expires_from_the_call_time() {
    let mut sim = SwarmSimulation::new(config(vec![drawable(SwarmType::Prey, 1)]), HeadlessBackend::default(), NoVisuals)
        .unwrap();
    sim.stop_food_spawning();
    sim.tick(1.0, 0.016).unwrap();

    let lifetime = sim.config().food_lifetime;
    let food = sim.add_food_attractor(Vec3::ZERO, 3.5).unwrap();
    assert_eq!(food.expiration_time, 3.5 + lifetime);

    // Still alive one tick past the old stamp of 1.0 + lifetime
    assert!(!sim.tick(1.0 + lifetime + 0.5, 0.016).unwrap().food_expired);
    assert!(sim.tick(3.5 + lifetime, 0.016).unwrap().food_expired);
}

#[test]
fn obstacle_rebuild_resizes_the_triangle_buffer() {
    let mut sim = SwarmSimulation::new(config(vec![drawable(SwarmType::Prey, 2)]), HeadlessBackend::default(), NoVisuals)
        .unwrap();
    assert_eq!(sim.device().triangle_buffer().unwrap().element_count, 0);

    let quad = MeshSource::new(
        vec![Vec3::ZERO, Vec3::X, Vec3::Y, Vec3::ONE],
        vec![0, 1, 2, 1, 3, 2],
        Mat4::from_translation(Vec3::new(0.0, 0.0, 5.0)),
    );
    assert_eq!(sim.rebuild_obstacles(&[quad]).unwrap(), 2);
    sim.tick(0.0, 0.016).unwrap();
    assert_device_matches(&sim);
    assert_eq!(sim.backend().last_dispatch().unwrap().params.triangle_count, 2);
}

// Backend shared with the test so it can be inspected after the simulation is dropped
#[derive(Clone, Default)]
struct SharedBackend(Rc<RefCell<HeadlessBackend>>);

impl ComputeBackend for SharedBackend {
    fn allocate(&mut self, desc: &BufferDesc) -> Result<BufferId, DeviceError> {
        self.0.borrow_mut().allocate(desc)
    }

    fn upload(&mut self, buffer: BufferId, bytes: &[u8]) -> Result<(), DeviceError> {
        self.0.borrow_mut().upload(buffer, bytes)
    }

    fn release(&mut self, buffer: BufferId) {
        self.0.borrow_mut().release(buffer)
    }

    fn load_kernel(&mut self, entry_point: &str) -> Result<KernelId, DeviceError> {
        self.0.borrow_mut().load_kernel(entry_point)
    }

    fn dispatch(
        &mut self,
        kernel: KernelId,
        bindings: &KernelBindings,
        params: &DispatchParams,
        workgroups: u32,
    ) -> Result<(), DeviceError> {
        self.0.borrow_mut().dispatch(kernel, bindings, params, workgroups)
    }
}

#[derive(Clone, Default)]
struct SharedMarkers(Rc<RefCell<Vec<VisualHandle>>>);

impl AttractorVisuals for SharedMarkers {
    fn spawn(&mut self, _position: Vec3) -> Option<VisualHandle> {
        let mut live = self.0.borrow_mut();
        let handle = live.len() as VisualHandle + 100;
        live.push(handle);
        Some(handle)
    }

    fn destroy(&mut self, handle: VisualHandle) {
        self.0.borrow_mut().retain(|h| *h != handle);
    }
}

#[test]
fn teardown_releases_everything_exactly_once() {
    let backend = SharedBackend::default();
    let markers = SharedMarkers::default();
    {
        let mut sim = SwarmSimulation::new(
            config(vec![drawable(SwarmType::Prey, 4), drawable(SwarmType::Predator, 1)]),
            backend.clone(),
            markers.clone(),
        )
        .unwrap();
        sim.add_food_attractor(Vec3::ONE, 0.0).unwrap();
        sim.tick(0.0, 0.016).unwrap();
        assert!(backend.0.borrow().live_buffers() > 0);
        assert_eq!(markers.0.borrow().len(), 2);

        sim.shutdown();
        let stats = backend.0.borrow().stats();
        assert_eq!(stats.releases, stats.allocations);
        sim.shutdown();
        assert!(sim.tick(1.0, 0.016).unwrap().draws.is_empty());
    }
    // Dropping after an explicit shutdown releases nothing twice
    let stats = backend.0.borrow().stats();
    assert_eq!(stats.releases, stats.allocations);
    assert_eq!(backend.0.borrow().live_buffers(), 0);
    assert!(markers.0.borrow().is_empty());
}

#[test]
fn mutations_are_refused_after_shutdown() {
    let backend = SharedBackend::default();
    let markers = SharedMarkers::default();
    let mut sim = SwarmSimulation::new(config(vec![drawable(SwarmType::Prey, 3)]), backend.clone(), markers.clone())
        .unwrap();
    sim.stop_food_spawning();
    sim.tick(0.0, 0.016).unwrap();
    sim.shutdown();
    let before = sim.population().clone();

    assert!(matches!(sim.add_boid(0), Err(SwarmError::ShutDown)));
    assert!(matches!(sim.remove_boid(0), Err(SwarmError::ShutDown)));
    assert!(matches!(
        sim.adjust_swarm_parameters(0, SwarmParameters::default()),
        Err(SwarmError::ShutDown)
    ));
    assert!(matches!(sim.set_mesh_transform(0, Vec3::ZERO, Vec3::ONE), Err(SwarmError::ShutDown)));
    assert!(matches!(sim.add_food_attractor(Vec3::ONE, 0.5), Err(SwarmError::ShutDown)));
    assert!(matches!(sim.rebuild_obstacles(&[]), Err(SwarmError::ShutDown)));
    assert!(matches!(sim.refresh_positions(before.boids()), Err(SwarmError::ShutDown)));
    assert!(matches!(sim.reinitialize(), Err(SwarmError::ShutDown)));

    assert_eq!(sim.population(), &before);
    assert_eq!(sim.registry().count(0).unwrap(), 3);
    assert!(sim.food().is_empty());
    assert!(markers.0.borrow().is_empty());
    drop(sim);
    let stats = backend.0.borrow().stats();
    assert_eq!(stats.releases, stats.allocations);
}

#[test]
fn drop_alone_tears_down() {
    let backend = SharedBackend::default();
    {
        let mut sim = SwarmSimulation::new(config(vec![drawable(SwarmType::Prey, 2)]), backend.clone(), NoVisuals).unwrap();
        sim.tick(0.0, 0.016).unwrap();
    }
    assert_eq!(backend.0.borrow().live_buffers(), 0);
}

#[test]
fn neighbor_queries_cover_the_population() {
    let mut sim = SwarmSimulation::new(config(vec![drawable(SwarmType::Prey, 40)]), HeadlessBackend::default(), NoVisuals)
        .unwrap();
    let everything = swarm_gpu::Aabb::from_center_size(Vec3::ZERO, Vec3::splat(100.0));
    let mut ids = sim.neighbors_in(&everything);
    ids.sort_unstable();
    assert_eq!(ids, (0..40).collect::<Vec<u32>>());
}

#[test]
fn refreshed_positions_drive_neighbor_queries() {
    let mut cfg = config(vec![drawable(SwarmType::Prey, 3)]);
    // One boid per leaf, so a leaf hit means that boid
    cfg.octree_max_boids_per_node = 1;
    let mut sim = SwarmSimulation::new(cfg, HeadlessBackend::default(), NoVisuals).unwrap();
    // Spawns stay within bounds.x / 2 of the origin, far from this corner
    let corner = Vec3::splat(45.0);
    let near_corner = swarm_gpu::Aabb::from_center_size(corner, Vec3::splat(2.0));
    let everything = swarm_gpu::Aabb::from_center_size(Vec3::ZERO, Vec3::splat(100.0));
    assert_eq!(sim.neighbors_in(&everything).len(), 3);

    // What the kernel would have written back after moving boid 1
    let mut readback = sim.population().boids().to_vec();
    readback[1].position = corner.into();
    let uploads = sim.backend().stats().uploads;
    assert_eq!(sim.refresh_positions(&readback).unwrap(), 3);

    assert_eq!(sim.neighbors_in(&near_corner), vec![1]);
    assert_eq!(sim.population().boids()[1].position(), corner);
    sim.sync_device().unwrap();
    assert_eq!(sim.backend().stats().uploads, uploads);
}

#[test]
fn readback_for_another_swarm_is_ignored() {
    let mut sim = SwarmSimulation::new(
        config(vec![drawable(SwarmType::Prey, 1), drawable(SwarmType::Predator, 1)]),
        HeadlessBackend::default(),
        NoVisuals,
    )
    .unwrap();
    let before = sim.population().clone();
    let mut readback = before.boids().to_vec();
    readback.swap(0, 1);
    readback.truncate(1);
    assert_eq!(sim.refresh_positions(&readback).unwrap(), 0);
    assert_eq!(sim.population(), &before);
}
