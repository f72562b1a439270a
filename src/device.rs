/*
 * Device Resource Module
 *
 * This module owns every device buffer the kernel and renderer read:
 * - boid state and instance state (mirroring PopulationStore)
 * - swarm config records (mirroring SwarmRegistry)
 * - obstacle triangles (mirroring ObstacleGeometryCache)
 * - a fixed-capacity food attractor array (mirroring FoodAttractorPool)
 * - one indirect draw-arguments buffer per swarm
 *
 * Structural changes release the old buffer and allocate a new one sized
 * to the new element count, then upload everything. Buffers are never
 * patched in place. Releasing is idempotent: a slot is emptied the moment
 * its buffer is handed back to the backend.
 */

use bytemuck::{Pod, Zeroable};
use tracing::{debug, info};

use crate::backend::{BufferDesc, BufferId, ComputeBackend, KernelBindings};
use crate::error::DeviceError;
use crate::food::{DeviceAttractors, FoodAttractorData};
use crate::obstacles::Triangle;
use crate::population::PopulationStore;
use crate::swarm::{Swarm, SwarmData, SwarmRegistry};

// Arguments for one indexed indirect draw (20 bytes)
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct IndirectArgs {
    pub index_count: u32,
    pub instance_count: u32,
    pub first_index: u32,
    pub base_vertex: u32,
    pub first_instance: u32,
}

impl IndirectArgs {
    // Arguments for a swarm whose instances start at `offset`; None when there is nothing to draw
    pub fn for_swarm(swarm: &Swarm, offset: u32, dual_pass: bool) -> Option<Self> {
        let mesh = swarm.mesh?;
        if swarm.boid_count == 0 {
            return None;
        }
        let passes = if dual_pass { 2 } else { 1 };
        Some(Self {
            index_count: mesh.index_count,
            instance_count: swarm.boid_count * passes,
            first_index: 0,
            base_vertex: 0,
            first_instance: offset,
        })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DeviceBuffer {
    pub id: BufferId,
    pub element_count: usize,
}

#[derive(Debug, Default)]
pub struct DeviceResourceManager {
    boids: Option<DeviceBuffer>,
    instances: Option<DeviceBuffer>,
    swarms: Option<DeviceBuffer>,
    triangles: Option<DeviceBuffer>,
    attractors: Option<DeviceBuffer>,
    draw_args: Vec<Option<DeviceBuffer>>,
    attractor_capacity: usize,
    live_attractors: u32,
    dual_pass: bool,
}

// Release whatever sits in `slot`, then allocate and fill a buffer for `data`
fn replace<B, T>(slot: &mut Option<DeviceBuffer>, backend: &mut B, desc: BufferDesc, data: &[T]) -> Result<(), DeviceError>
where
    B: ComputeBackend + ?Sized,
    T: Pod,
{
    if let Some(old) = slot.take() {
        backend.release(old.id);
    }
    let id = backend.allocate(&desc)?;
    // Track before uploading so a failed upload still gets released
    *slot = Some(DeviceBuffer {
        id,
        element_count: desc.element_count,
    });
    backend.upload(id, bytemuck::cast_slice(data))
}

fn release_slot<B: ComputeBackend + ?Sized>(slot: &mut Option<DeviceBuffer>, backend: &mut B) {
    if let Some(buffer) = slot.take() {
        backend.release(buffer.id);
    }
}

impl DeviceResourceManager {
    pub fn new(attractor_capacity: usize, dual_pass: bool) -> Self {
        Self {
            attractor_capacity,
            dual_pass,
            ..Self::default()
        }
    }

    // Boid and instance buffers, sized to the population
    pub fn rebuild_population<B: ComputeBackend + ?Sized>(
        &mut self,
        backend: &mut B,
        population: &PopulationStore,
    ) -> Result<(), DeviceError> {
        let n = population.len();
        replace(&mut self.boids, backend, BufferDesc::storage::<crate::boid::BoidData>("boidBuffer", n), population.boids())?;
        replace(
            &mut self.instances,
            backend,
            BufferDesc::storage::<crate::boid::InstanceData>("instanceTransforms", n),
            population.instances(),
        )?;
        debug!(boids = n, "population buffers rebuilt");
        Ok(())
    }

    pub fn rebuild_swarms<B: ComputeBackend + ?Sized>(
        &mut self,
        backend: &mut B,
        registry: &SwarmRegistry,
    ) -> Result<(), DeviceError> {
        let records = registry.gpu_records();
        replace(&mut self.swarms, backend, BufferDesc::storage::<SwarmData>("swarmBuffer", records.len()), &records)?;
        debug!(swarms = records.len(), "swarm buffer rebuilt");
        Ok(())
    }

    pub fn rebuild_triangles<B: ComputeBackend + ?Sized>(
        &mut self,
        backend: &mut B,
        triangles: &[Triangle],
    ) -> Result<(), DeviceError> {
        replace(
            &mut self.triangles,
            backend,
            BufferDesc::storage::<Triangle>("triangleBuffer", triangles.len()),
            triangles,
        )?;
        info!(triangles = triangles.len(), "triangle buffer rebuilt");
        Ok(())
    }

    // One args buffer per swarm; swarms without a mesh or boids get none
    pub fn rebuild_draw_args<B: ComputeBackend + ?Sized>(
        &mut self,
        backend: &mut B,
        registry: &SwarmRegistry,
    ) -> Result<(), DeviceError> {
        for slot in self.draw_args.iter_mut() {
            release_slot(slot, backend);
        }
        self.draw_args.clear();

        for (swarm, &offset) in registry.iter().zip(registry.offsets()) {
            let mut slot = None;
            if let Some(args) = IndirectArgs::for_swarm(swarm, offset, self.dual_pass) {
                let label = format!("argsBuffer[{}]", swarm.swarm_id);
                let result = replace(&mut slot, backend, BufferDesc::indirect::<IndirectArgs>(label), &[args]);
                // Keep the slot tracked even on failure so it is released with the rest
                self.draw_args.push(slot);
                result?;
            } else {
                self.draw_args.push(slot);
            }
        }
        Ok(())
    }

    // The attractor buffer keeps a fixed size; only its contents change
    pub fn upload_attractors<B: ComputeBackend + ?Sized>(
        &mut self,
        backend: &mut B,
        attractors: &DeviceAttractors,
    ) -> Result<(), DeviceError> {
        if attractors.slots.len() != self.attractor_capacity {
            return Err(DeviceError::UploadSizeMismatch {
                expected: self.attractor_capacity as u64,
                given: attractors.slots.len() as u64,
            });
        }
        match self.attractors {
            Some(buffer) => backend.upload(buffer.id, bytemuck::cast_slice(&attractors.slots))?,
            None => replace(
                &mut self.attractors,
                backend,
                BufferDesc::storage::<FoodAttractorData>("foodAttractorBuffer", self.attractor_capacity),
                &attractors.slots,
            )?,
        }
        self.live_attractors = attractors.live_count;
        Ok(())
    }

    // Hand every buffer back to the backend. Safe to call any number of times.
    pub fn release_all<B: ComputeBackend + ?Sized>(&mut self, backend: &mut B) {
        release_slot(&mut self.boids, backend);
        release_slot(&mut self.instances, backend);
        release_slot(&mut self.swarms, backend);
        release_slot(&mut self.triangles, backend);
        release_slot(&mut self.attractors, backend);
        for slot in self.draw_args.iter_mut() {
            release_slot(slot, backend);
        }
        self.draw_args.clear();
        self.live_attractors = 0;
    }

    // Everything the kernel binds, once all of it exists
    pub fn bindings(&self) -> Option<KernelBindings> {
        Some(KernelBindings {
            boids: self.boids?.id,
            swarms: self.swarms?.id,
            instances: self.instances?.id,
            triangles: self.triangles?.id,
            attractors: self.attractors?.id,
        })
    }

    pub fn boid_buffer(&self) -> Option<DeviceBuffer> {
        self.boids
    }

    pub fn instance_buffer(&self) -> Option<DeviceBuffer> {
        self.instances
    }

    pub fn swarm_buffer(&self) -> Option<DeviceBuffer> {
        self.swarms
    }

    pub fn triangle_buffer(&self) -> Option<DeviceBuffer> {
        self.triangles
    }

    pub fn attractor_buffer(&self) -> Option<DeviceBuffer> {
        self.attractors
    }

    pub fn draw_args(&self, swarm_id: u32) -> Option<DeviceBuffer> {
        self.draw_args.get(swarm_id as usize).copied().flatten()
    }

    pub fn live_attractors(&self) -> u32 {
        self.live_attractors
    }

    pub fn attractor_capacity(&self) -> usize {
        self.attractor_capacity
    }

    pub fn dual_pass(&self) -> bool {
        self.dual_pass
    }

    // Number of buffers currently held
    pub fn held_buffers(&self) -> usize {
        [self.boids, self.instances, self.swarms, self.triangles, self.attractors]
            .iter()
            .filter(|b| b.is_some())
            .count()
            + self.draw_args.iter().filter(|b| b.is_some()).count()
    }
}
