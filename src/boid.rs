/*
 * Boid Module
 *
 * This module defines the per-boid records shared with the compute and
 * render backends. Field order and byte layout are a fixed contract:
 * - BoidData: position, velocity, swarm type tag, swarm ID (32 bytes)
 * - InstanceData: column-major transform matrix, then color (80 bytes)
 *
 * The swarm type is plain data. It picks a color and is read by the
 * compute kernel; nothing on the CPU side dispatches on it.
 */

use bytemuck::{Pod, Zeroable};
use nannou::glam::{Mat4, Vec3, Vec4};
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SwarmType {
    Prey = 0,
    Predator = 1,
    Omnivore = 2,
}

impl Default for SwarmType {
    fn default() -> Self {
        SwarmType::Prey
    }
}

impl SwarmType {
    // Tag written into device records
    pub fn tag(self) -> i32 {
        self as i32
    }

    // RGBA color used for every boid of this type
    pub fn color(self) -> Vec4 {
        match self {
            SwarmType::Prey => Vec4::new(0.0, 1.0, 0.0, 1.0),
            SwarmType::Predator => Vec4::new(1.0, 0.0, 0.0, 1.0),
            // Yellow, matching the engine's stock 0.92 green channel
            SwarmType::Omnivore => Vec4::new(1.0, 0.92, 0.016, 1.0),
        }
    }
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct BoidData {
    pub position: [f32; 3],
    pub velocity: [f32; 3],
    pub swarm_type: i32,
    pub swarm_id: i32,
}

impl BoidData {
    // A fresh boid heads back toward the simulation origin
    pub fn spawn(position: Vec3, swarm_type: SwarmType, swarm_id: u32) -> Self {
        Self {
            position: position.into(),
            velocity: (-position * 0.1).into(),
            swarm_type: swarm_type.tag(),
            swarm_id: swarm_id as i32,
        }
    }

    pub fn position(&self) -> Vec3 {
        Vec3::from(self.position)
    }

    pub fn velocity(&self) -> Vec3 {
        Vec3::from(self.velocity)
    }

    pub fn belongs_to(&self, swarm_id: u32) -> bool {
        self.swarm_id == swarm_id as i32
    }
}

#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct InstanceData {
    pub transform: [[f32; 4]; 4],
    pub color: [f32; 4],
}

impl InstanceData {
    // Identity transform; the kernel overwrites it on the first dispatch
    pub fn new(color: Vec4) -> Self {
        Self {
            transform: Mat4::IDENTITY.to_cols_array_2d(),
            color: color.into(),
        }
    }
}

impl Default for InstanceData {
    fn default() -> Self {
        Self::new(Vec4::ONE)
    }
}
