/*
 * Swarm Simulation Module
 *
 * This module defines SwarmSimulation, the explicitly constructed context
 * that owns one running simulation. Every operation goes through it; there
 * is no ambient global state.
 *
 * Per tick:
 * 1. Poll the food spawner, then expire due attractors
 * 2. Rebuild device buffers whose CPU mirror changed
 * 3. Dispatch the compute kernel over every boid
 * 4. Emit one indirect draw call per drawable swarm
 *
 * Mutations only touch CPU state and mark buffers dirty. Device rebuilds
 * happen at the next tick (or an explicit `sync_device`), strictly before
 * the dispatch that reads them.
 *
 * A device failure puts the context in a degraded state: every buffer is
 * released, the failing tick reports the error, and later ticks skip the
 * device work silently until `reinitialize` succeeds.
 *
 * After `shutdown` every mutation returns `SwarmError::ShutDown`.
 */

use nannou::glam::{Mat4, Vec3};
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::{debug, error, info, warn};

use crate::backend::{BufferId, ComputeBackend, DispatchParams, KernelId};
use crate::boid::{BoidData, InstanceData};
use crate::bounds::Aabb;
use crate::debug::DebugInfo;
use crate::device::DeviceResourceManager;
use crate::error::{DeviceError, SwarmError, SwarmResult};
use crate::food::{AttractorVisuals, FoodAttractor, FoodAttractorPool, NoVisuals};
use crate::obstacles::{MeshSource, ObstacleGeometryCache};
use crate::octree::SpatialIndex;
use crate::params::{SimulationConfig, SwarmParameters};
use crate::population::{PopulationStore, SpawnSampler};
use crate::swarm::{MaterialHandle, MeshHandle, SwarmRegistry};

#[derive(Clone, Debug, PartialEq)]
pub enum DeviceState {
    Ready(KernelId),
    // Holds the failure that caused it
    Degraded(DeviceError),
    ShutDown,
}

// Which device mirrors are stale
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
struct DirtyFlags {
    population: bool,
    swarms: bool,
    triangles: bool,
    attractors: bool,
    draw_args: bool,
}

impl DirtyFlags {
    fn all() -> Self {
        Self {
            population: true,
            swarms: true,
            triangles: true,
            attractors: true,
            draw_args: true,
        }
    }
}

// One indirect instanced draw for the host renderer
#[derive(Clone, Debug, PartialEq)]
pub struct DrawCall {
    pub swarm_id: u32,
    pub mesh: MeshHandle,
    pub material: MaterialHandle,
    pub args_buffer: BufferId,
    pub instance_buffer: BufferId,
    pub start_instance: u32,
    pub mesh_transform: Mat4,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct TickReport {
    pub food_spawned: bool,
    pub food_expired: bool,
    pub dispatched: bool,
    pub workgroups: u32,
    pub draws: Vec<DrawCall>,
}

pub struct SwarmSimulation<B: ComputeBackend, V: AttractorVisuals = NoVisuals> {
    config: SimulationConfig,
    backend: B,
    visuals: V,
    registry: SwarmRegistry,
    population: PopulationStore,
    obstacles: ObstacleGeometryCache,
    food: FoodAttractorPool,
    device: DeviceResourceManager,
    spatial: SpatialIndex,
    spatial_stale: bool,
    sampler: SpawnSampler,
    rng: StdRng,
    dirty: DirtyFlags,
    state: DeviceState,
    spawner_started: bool,
    now: f32,
    debug_info: DebugInfo,
}

impl<B: ComputeBackend, V: AttractorVisuals> SwarmSimulation<B, V> {
    pub fn new(config: SimulationConfig, backend: B, visuals: V) -> SwarmResult<Self> {
        Self::with_obstacles(config, &[], backend, visuals)
    }

    // Build the context with obstacle geometry in place before boids spawn
    pub fn with_obstacles(
        config: SimulationConfig,
        obstacle_meshes: &[MeshSource],
        mut backend: B,
        visuals: V,
    ) -> SwarmResult<Self> {
        config.validate()?;

        let origin = config.origin();
        let volume = Aabb::from_center_size(origin, config.bounds_size());
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        let mut obstacles = ObstacleGeometryCache::new();
        obstacles.rebuild(obstacle_meshes);

        let state = match backend.load_kernel(&config.entry_point) {
            Ok(kernel) => DeviceState::Ready(kernel),
            Err(err) => {
                error!(error = %err, "compute kernel unavailable; simulation starts degraded");
                DeviceState::Degraded(err)
            }
        };

        let registry = SwarmRegistry::new(&config.swarms);
        let mut sim = Self {
            backend,
            visuals,
            population: PopulationStore::with_capacity(registry.total_boids() as usize),
            registry,
            obstacles,
            food: FoodAttractorPool::new(config.food_capacity, config.food_lifetime, config.food_spawn_interval, volume),
            device: DeviceResourceManager::new(config.food_capacity, config.dual_pass_instancing),
            spatial: SpatialIndex::new(volume, config.octree_max_boids_per_node, config.octree_max_depth),
            spatial_stale: true,
            sampler: SpawnSampler::new(origin, config.bounds_size[0] / 2.0, config.spawn_attempts),
            rng,
            dirty: DirtyFlags::all(),
            state,
            spawner_started: false,
            now: 0.0,
            debug_info: DebugInfo::default(),
            config,
        };
        sim.populate();
        sim.debug_info.degraded = sim.is_degraded();

        info!(
            swarms = sim.registry.len(),
            boids = sim.population.len(),
            triangles = sim.obstacles.triangles().len(),
            "swarm simulation initialized"
        );

        // A failure here is logged and leaves the context degraded
        if sim.sync_device().is_err() {
            debug!("initial device upload failed");
        }
        Ok(sim)
    }

    // Spawn every configured boid, swarm by swarm, so ranges start contiguous
    fn populate(&mut self) {
        for swarm in self.registry.iter() {
            let color = swarm.color;
            for _ in 0..swarm.boid_count {
                let position = self.sampler.sample(&mut self.rng, &self.obstacles);
                self.population.append(
                    BoidData::spawn(position, swarm.swarm_type, swarm.swarm_id),
                    InstanceData::new(color),
                );
            }
        }
    }

    // ---- mutation API ----

    fn ensure_running(&self) -> SwarmResult<()> {
        match self.state {
            DeviceState::ShutDown => Err(SwarmError::ShutDown),
            _ => Ok(()),
        }
    }

    // Spawn one boid at the tail of the swarm's range; returns its slot
    pub fn add_boid(&mut self, swarm_id: u32) -> SwarmResult<usize> {
        self.ensure_running()?;
        let swarm = self.registry.get(swarm_id)?;
        let (swarm_type, color) = (swarm.swarm_type, swarm.color);
        let slot = (self.registry.offset(swarm_id)? + swarm.boid_count) as usize;
        if self.population.len() >= u32::MAX as usize {
            return Err(SwarmError::CapacityExceeded {
                requested: self.population.len() + 1,
                capacity: u32::MAX as usize,
            });
        }

        let position = self.sampler.sample(&mut self.rng, &self.obstacles);
        let slot = self
            .population
            .insert(slot, BoidData::spawn(position, swarm_type, swarm_id), InstanceData::new(color));
        self.registry.increment(swarm_id)?;

        self.mark_population_changed();
        Ok(slot)
    }

    // Remove the highest-offset boid of the swarm; returns the freed slot
    pub fn remove_boid(&mut self, swarm_id: u32) -> SwarmResult<usize> {
        self.ensure_running()?;
        if self.registry.count(swarm_id)? == 0 {
            return Err(SwarmError::EmptySwarm(swarm_id));
        }
        let slot = self.population.remove_last(swarm_id)?;
        self.registry.decrement(swarm_id)?;

        self.mark_population_changed();
        Ok(slot)
    }

    pub fn adjust_swarm_parameters(&mut self, swarm_id: u32, parameters: SwarmParameters) -> SwarmResult<()> {
        self.ensure_running()?;
        self.registry.adjust_parameters(swarm_id, parameters)?;
        self.dirty.swarms = true;
        Ok(())
    }

    pub fn set_mesh_transform(&mut self, swarm_id: u32, rotation: Vec3, scale: Vec3) -> SwarmResult<()> {
        self.ensure_running()?;
        self.registry.set_mesh_transform(swarm_id, rotation, scale)
    }

    // Always creates a new attractor, expiring `food_lifetime` after `now`
    pub fn add_food_attractor(&mut self, position: Vec3, now: f32) -> SwarmResult<&FoodAttractor> {
        self.ensure_running()?;
        self.dirty.attractors = true;
        Ok(self.food.add(position, now, &mut self.visuals))
    }

    // Permanently stop periodic food spawning; manual adds still work
    pub fn stop_food_spawning(&mut self) {
        self.food.cancel_spawning();
        self.spawner_started = true;
    }

    // Re-extract obstacle geometry; the triangle buffer is rebuilt on the next sync
    pub fn rebuild_obstacles(&mut self, meshes: &[MeshSource]) -> SwarmResult<usize> {
        self.ensure_running()?;
        let count = self.obstacles.rebuild(meshes).len();
        self.dirty.triangles = true;
        Ok(count)
    }

    // Feed boid motion read back from the device into the CPU mirror, so
    // `neighbors_in` and later rebuilds see where the kernel moved them.
    // The device already holds this state, so no upload is scheduled.
    pub fn refresh_positions(&mut self, readback: &[BoidData]) -> SwarmResult<usize> {
        self.ensure_running()?;
        if readback.len() != self.population.len() {
            warn!(
                given = readback.len(),
                expected = self.population.len(),
                "device readback does not cover the population"
            );
        }
        let updated = self.population.refresh_motion(readback);
        if updated > 0 {
            self.spatial_stale = true;
        }
        Ok(updated)
    }

    // Boid slots whose octree leaf intersects `range`.
    // Positions are the CPU mirror: spawn positions unless the host
    // called `refresh_positions` with device state since.
    pub fn neighbors_in(&mut self, range: &Aabb) -> Vec<u32> {
        if self.spatial_stale {
            let indexed = self.spatial.rebuild(self.population.positions());
            if indexed < self.population.len() {
                warn!(
                    indexed,
                    total = self.population.len(),
                    "boids outside the simulation volume were left out of the spatial index"
                );
            }
            self.spatial_stale = false;
        }
        self.spatial.query_range(range)
    }

    fn mark_population_changed(&mut self) {
        self.dirty.population = true;
        self.dirty.draw_args = true;
        self.spatial_stale = true;
    }

    // ---- device lifecycle ----

    // Rebuild every stale device buffer now
    pub fn sync_device(&mut self) -> SwarmResult<()> {
        match &self.state {
            DeviceState::Ready(_) => {}
            DeviceState::Degraded(err) => return Err(SwarmError::DeviceResourceFailure(err.clone())),
            DeviceState::ShutDown => return Ok(()),
        }
        self.sync_buffers().map_err(|err| self.enter_degraded(err))
    }

    fn sync_buffers(&mut self) -> Result<(), DeviceError> {
        if self.dirty.triangles {
            self.device.rebuild_triangles(&mut self.backend, self.obstacles.triangles())?;
            self.dirty.triangles = false;
        }
        if self.dirty.swarms {
            self.device.rebuild_swarms(&mut self.backend, &self.registry)?;
            self.dirty.swarms = false;
        }
        if self.dirty.population {
            self.device.rebuild_population(&mut self.backend, &self.population)?;
            self.dirty.population = false;
        }
        if self.dirty.draw_args {
            self.device.rebuild_draw_args(&mut self.backend, &self.registry)?;
            self.dirty.draw_args = false;
        }
        if self.dirty.attractors {
            let view = self.food.to_device_array(self.device.attractor_capacity());
            self.device.upload_attractors(&mut self.backend, &view)?;
            self.debug_info.hidden_attractors = view.truncated;
            self.dirty.attractors = false;
        }
        Ok(())
    }

    fn enter_degraded(&mut self, err: DeviceError) -> SwarmError {
        error!(error = %err, "device resource failure; releasing buffers until reinitialized");
        self.device.release_all(&mut self.backend);
        self.state = DeviceState::Degraded(err.clone());
        self.debug_info.degraded = true;
        SwarmError::DeviceResourceFailure(err)
    }

    // Retry kernel lookup and rebuild every buffer from CPU state
    pub fn reinitialize(&mut self) -> SwarmResult<()> {
        self.ensure_running()?;
        self.device.release_all(&mut self.backend);
        let kernel = match self.backend.load_kernel(&self.config.entry_point) {
            Ok(kernel) => kernel,
            Err(err) => return Err(self.enter_degraded(err)),
        };
        self.state = DeviceState::Ready(kernel);
        self.dirty = DirtyFlags::all();
        self.sync_device()?;

        self.debug_info.degraded = false;
        info!("device resources reinitialized");
        Ok(())
    }

    // ---- tick ----

    pub fn tick(&mut self, now: f32, delta_time: f32) -> SwarmResult<TickReport> {
        let mut report = TickReport::default();
        if self.state == DeviceState::ShutDown {
            return Ok(report);
        }
        self.now = now;
        self.debug_info.record_frame(delta_time);

        if !self.spawner_started {
            self.food.start_spawning(now);
            self.spawner_started = true;
        }
        report.food_spawned = self.food.spawn_periodic(now, &mut self.rng, &mut self.visuals);
        report.food_expired = self.food.expire_due(now, &mut self.visuals);
        if report.food_spawned || report.food_expired {
            self.dirty.attractors = true;
        }

        let kernel = match self.state {
            DeviceState::Ready(kernel) => kernel,
            _ => {
                self.debug_info.skipped_ticks += 1;
                return Ok(report);
            }
        };

        if let Err(err) = self.sync_buffers() {
            self.debug_info.skipped_ticks += 1;
            return Err(self.enter_degraded(err));
        }

        let boid_count = self.population.len() as u32;
        if boid_count > 0 {
            let bindings = match self.device.bindings() {
                Some(bindings) => bindings,
                None => {
                    self.debug_info.skipped_ticks += 1;
                    return Err(self.enter_degraded(DeviceError::Lost("kernel bindings incomplete".to_string())));
                }
            };
            let params = self.dispatch_params(delta_time);
            let group_size = self.config.workgroup_size;
            let workgroups = (boid_count + group_size - 1) / group_size;
            if let Err(err) = self.backend.dispatch(kernel, &bindings, &params, workgroups) {
                self.debug_info.skipped_ticks += 1;
                return Err(self.enter_degraded(err));
            }
            report.dispatched = true;
            report.workgroups = workgroups;
            self.debug_info.dispatches += 1;
        }

        report.draws = self.draw_calls();
        self.refresh_debug_counts();
        Ok(report)
    }

    fn dispatch_params(&self, delta_time: f32) -> DispatchParams {
        DispatchParams {
            manager_position: self.config.origin,
            delta_time,
            bounds_size: self.config.bounds_size,
            boid_count: self.population.len() as u32,
            swarm_count: self.registry.len() as u32,
            triangle_count: self.obstacles.triangles().len() as u32,
            food_attractor_count: self.device.live_attractors(),
            _padding: 0,
        }
    }

    fn draw_calls(&self) -> Vec<DrawCall> {
        let instance_buffer = match self.device.instance_buffer() {
            Some(buffer) => buffer.id,
            None => return Vec::new(),
        };
        self.registry
            .iter()
            .zip(self.registry.offsets())
            .filter_map(|(swarm, &offset)| {
                if !swarm.is_drawable() {
                    return None;
                }
                let args = self.device.draw_args(swarm.swarm_id)?;
                Some(DrawCall {
                    swarm_id: swarm.swarm_id,
                    mesh: swarm.mesh?,
                    material: swarm.material?,
                    args_buffer: args.id,
                    instance_buffer,
                    start_instance: offset,
                    mesh_transform: swarm.mesh_transform(),
                })
            })
            .collect()
    }

    fn refresh_debug_counts(&mut self) {
        let info = &mut self.debug_info;
        info.boid_count = self.device.boid_buffer().map_or(0, |b| b.element_count);
        info.swarm_count = self.device.swarm_buffer().map_or(0, |b| b.element_count);
        info.triangle_count = self.device.triangle_buffer().map_or(0, |b| b.element_count);
        info.live_attractors = self.device.live_attractors();
    }

    // ---- teardown ----

    // Cancel spawning, destroy attractor visuals and release every device buffer.
    // Repeated calls do nothing.
    pub fn shutdown(&mut self) {
        if self.state == DeviceState::ShutDown {
            return;
        }
        self.food.cancel_spawning();
        self.food.clear(&mut self.visuals);
        self.device.release_all(&mut self.backend);
        self.state = DeviceState::ShutDown;
        info!("swarm simulation shut down");
    }

    // ---- accessors ----

    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    pub fn registry(&self) -> &SwarmRegistry {
        &self.registry
    }

    pub fn population(&self) -> &PopulationStore {
        &self.population
    }

    pub fn obstacles(&self) -> &ObstacleGeometryCache {
        &self.obstacles
    }

    pub fn food(&self) -> &FoodAttractorPool {
        &self.food
    }

    pub fn device(&self) -> &DeviceResourceManager {
        &self.device
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    pub fn visuals(&self) -> &V {
        &self.visuals
    }

    pub fn debug_info(&self) -> &DebugInfo {
        &self.debug_info
    }

    pub fn state(&self) -> &DeviceState {
        &self.state
    }

    pub fn is_degraded(&self) -> bool {
        matches!(self.state, DeviceState::Degraded(_))
    }

    // Live attractor count in the device buffer
    pub fn food_buffer_count(&self) -> u32 {
        self.device.live_attractors()
    }

    pub fn now(&self) -> f32 {
        self.now
    }
}

impl<B: ComputeBackend, V: AttractorVisuals> Drop for SwarmSimulation<B, V> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::HeadlessBackend;
    use crate::boid::SwarmType;
    use crate::params::SwarmDescriptor;

    fn config(counts: &[u32]) -> SimulationConfig {
        SimulationConfig {
            swarms: counts.iter().map(|&c| SwarmDescriptor::new(SwarmType::Prey, c)).collect(),
            seed: Some(9),
            ..SimulationConfig::default()
        }
    }

    fn simulation(counts: &[u32]) -> SwarmSimulation<HeadlessBackend> {
        SwarmSimulation::new(config(counts), HeadlessBackend::default(), NoVisuals).unwrap()
    }

    #[test]
    fn add_boid_keeps_swarm_ranges_contiguous() {
        let mut sim = simulation(&[2, 2]);
        assert_eq!(sim.add_boid(0).unwrap(), 2);
        let ids: Vec<i32> = sim.population().boids().iter().map(|b| b.swarm_id).collect();
        assert_eq!(ids, vec![0, 0, 0, 1, 1]);
        assert_eq!(sim.registry().offsets(), &[0, 3]);
    }

    #[test]
    fn unknown_swarm_changes_nothing() {
        let mut sim = simulation(&[1]);
        assert!(matches!(sim.add_boid(4), Err(SwarmError::NotFound(4))));
        assert!(matches!(sim.remove_boid(4), Err(SwarmError::NotFound(4))));
        assert_eq!(sim.population().len(), 1);
    }

    #[test]
    fn mutations_wait_for_the_next_sync() {
        let mut sim = simulation(&[3]);
        sim.add_boid(0).unwrap();
        assert_eq!(sim.device().boid_buffer().unwrap().element_count, 3);
        sim.sync_device().unwrap();
        assert_eq!(sim.device().boid_buffer().unwrap().element_count, 4);
    }

    #[test]
    fn workgroups_round_up() {
        let mut sim = simulation(&[257]);
        let report = sim.tick(0.0, 0.016).unwrap();
        assert!(report.dispatched);
        assert_eq!(report.workgroups, 2);
    }

    #[test]
    fn empty_population_skips_dispatch() {
        let mut sim = simulation(&[0]);
        let report = sim.tick(0.0, 0.016).unwrap();
        assert!(!report.dispatched);
        assert_eq!(sim.backend().stats().dispatches, 0);
    }

    #[test]
    fn spatial_index_follows_population_changes() {
        let mut sim = simulation(&[5]);
        let everything = Aabb::from_center_size(Vec3::ZERO, Vec3::splat(200.0));
        assert_eq!(sim.neighbors_in(&everything).len(), 5);
        sim.remove_boid(0).unwrap();
        assert_eq!(sim.neighbors_in(&everything).len(), 4);
    }

    #[test]
    fn dispatch_params_describe_the_world() {
        let mut sim = simulation(&[3, 1]);
        sim.tick(0.0, 0.5).unwrap();
        let params = sim.backend().last_dispatch().unwrap().params;
        assert_eq!(params.boid_count, 4);
        assert_eq!(params.swarm_count, 2);
        assert_eq!(params.delta_time, 0.5);
        assert_eq!(params.bounds_size, [100.0; 3]);
        // The spawner fires on the first tick
        assert_eq!(params.food_attractor_count, 1);
    }
}
