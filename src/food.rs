/*
 * Food Attractor Module
 *
 * This module manages transient food attractors: points that pull boids
 * toward them until their absolute expiration time passes.
 *
 * Features:
 * - Periodic spawning at random positions inside the spawn bounds
 * - Expiry that destroys each attractor together with its companion visual
 * - A fixed-capacity device view; extra attractors stay tracked but are
 *   hidden from the kernel until slots free up
 */

use bytemuck::{Pod, Zeroable};
use nannou::glam::Vec3;
use rand::Rng;
use tracing::{debug, warn};

use crate::bounds::Aabb;
use crate::schedule::RepeatingTask;

pub type VisualHandle = u64;

// Host-side visuals for attractors (a marker mesh, a particle effect, ...)
pub trait AttractorVisuals {
    // Create a visual at `position`; None when the host draws nothing
    fn spawn(&mut self, position: Vec3) -> Option<VisualHandle>;
    fn destroy(&mut self, handle: VisualHandle);
}

// Visuals for headless runs
#[derive(Clone, Copy, Debug, Default)]
pub struct NoVisuals;

impl AttractorVisuals for NoVisuals {
    fn spawn(&mut self, _position: Vec3) -> Option<VisualHandle> {
        None
    }

    fn destroy(&mut self, _handle: VisualHandle) {}
}

// Attractor record as laid out for the compute kernel (16 bytes)
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct FoodAttractorData {
    pub position: [f32; 3],
    pub expiration_time: f32,
}

#[derive(Clone, Debug, PartialEq)]
pub struct FoodAttractor {
    pub position: Vec3,
    pub expiration_time: f32,
    visual: Option<VisualHandle>,
}

impl FoodAttractor {
    pub fn visual(&self) -> Option<VisualHandle> {
        self.visual
    }

    pub fn is_expired(&self, now: f32) -> bool {
        now >= self.expiration_time
    }

    fn gpu_record(&self) -> FoodAttractorData {
        FoodAttractorData {
            position: self.position.into(),
            expiration_time: self.expiration_time,
        }
    }
}

// Fixed-size device view of the pool
#[derive(Clone, Debug, PartialEq)]
pub struct DeviceAttractors {
    // Always exactly `capacity` long; unused slots are zeroed
    pub slots: Vec<FoodAttractorData>,
    pub live_count: u32,
    // Tracked attractors that did not fit
    pub truncated: usize,
}

pub struct FoodAttractorPool {
    attractors: Vec<FoodAttractor>,
    capacity: usize,
    lifetime: f32,
    spawn_bounds: Aabb,
    spawner: RepeatingTask,
}

impl FoodAttractorPool {
    pub fn new(capacity: usize, lifetime: f32, spawn_interval: f32, spawn_bounds: Aabb) -> Self {
        Self {
            attractors: Vec::new(),
            capacity,
            lifetime,
            spawn_bounds,
            spawner: RepeatingTask::new(spawn_interval),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn lifetime(&self) -> f32 {
        self.lifetime
    }

    pub fn len(&self) -> usize {
        self.attractors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.attractors.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &FoodAttractor> {
        self.attractors.iter()
    }

    // Begin periodic spawning; the first attractor appears at `now`
    pub fn start_spawning(&mut self, now: f32) {
        self.spawner.start(now);
    }

    pub fn cancel_spawning(&mut self) {
        self.spawner.cancel();
    }

    pub fn is_spawning(&self) -> bool {
        self.spawner.is_running()
    }

    // Always creates a new attractor expiring at `now + lifetime`
    pub fn add<V: AttractorVisuals + ?Sized>(&mut self, position: Vec3, now: f32, visuals: &mut V) -> &FoodAttractor {
        let visual = visuals.spawn(position);
        self.attractors.push(FoodAttractor {
            position,
            expiration_time: now + self.lifetime,
            visual,
        });
        if self.attractors.len() > self.capacity {
            warn!(
                tracked = self.attractors.len(),
                capacity = self.capacity,
                "food attractors exceed device capacity; extras are hidden"
            );
        }
        debug!(x = position.x, y = position.y, z = position.z, "food attractor added");
        &self.attractors[self.attractors.len() - 1]
    }

    // Poll the periodic spawner; returns true when an attractor was created
    pub fn spawn_periodic<R, V>(&mut self, now: f32, rng: &mut R, visuals: &mut V) -> bool
    where
        R: Rng + ?Sized,
        V: AttractorVisuals + ?Sized,
    {
        if !self.spawner.poll(now) {
            return false;
        }
        let b = self.spawn_bounds;
        let position = Vec3::new(
            sample_axis(rng, b.min.x, b.max.x),
            sample_axis(rng, b.min.y, b.max.y),
            sample_axis(rng, b.min.z, b.max.z),
        );
        self.add(position, now, visuals);
        true
    }

    // Remove every attractor with `now >= expiration_time`, destroying its visual.
    // Returns whether anything was removed.
    pub fn expire_due<V: AttractorVisuals + ?Sized>(&mut self, now: f32, visuals: &mut V) -> bool {
        let before = self.attractors.len();
        self.attractors.retain(|a| {
            if a.is_expired(now) {
                if let Some(handle) = a.visual {
                    visuals.destroy(handle);
                }
                false
            } else {
                true
            }
        });
        let removed = before - self.attractors.len();
        if removed > 0 {
            debug!(removed, remaining = self.attractors.len(), "food attractors expired");
        }
        removed > 0
    }

    // Live set capped at `capacity`, zero-filled to exactly `capacity` slots
    pub fn to_device_array(&self, capacity: usize) -> DeviceAttractors {
        let mut slots = vec![FoodAttractorData::zeroed(); capacity];
        let live = self.attractors.len().min(capacity);
        for (slot, attractor) in slots.iter_mut().zip(&self.attractors) {
            *slot = attractor.gpu_record();
        }
        DeviceAttractors {
            slots,
            live_count: live as u32,
            truncated: self.attractors.len() - live,
        }
    }

    // Destroy every attractor and its visual
    pub fn clear<V: AttractorVisuals + ?Sized>(&mut self, visuals: &mut V) {
        for attractor in self.attractors.drain(..) {
            if let Some(handle) = attractor.visual {
                visuals.destroy(handle);
            }
        }
    }
}

fn sample_axis<R: Rng + ?Sized>(rng: &mut R, min: f32, max: f32) -> f32 {
    if max > min {
        rng.gen_range(min..max)
    } else {
        min
    }
}
