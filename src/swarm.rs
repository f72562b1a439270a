/*
 * Swarm Registry Module
 *
 * This module owns swarm configuration and per-swarm boid counts.
 * Swarm IDs are assigned once, as the 0-based position in the configured
 * list, and never change. Cumulative offsets (a prefix sum over counts in
 * ID order) are recomputed after every count change, so
 * `offset[i] == sum(count[j] for j < i)` holds after every public call.
 */

use bytemuck::{Pod, Zeroable};
use nannou::glam::{Mat4, Quat, Vec3, Vec4};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::boid::SwarmType;
use crate::error::{SwarmError, SwarmResult};
use crate::params::{SwarmDescriptor, SwarmParameters};

// Opaque reference to a mesh owned by the external renderer
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MeshHandle {
    pub id: u64,
    // Index count of submesh 0, needed for indirect draw arguments
    pub index_count: u32,
}

// Opaque reference to a material owned by the external renderer
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MaterialHandle(pub u64);

// Swarm record as laid out for the compute kernel (56 bytes)
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct SwarmData {
    pub swarm_id: i32,
    pub swarm_type: i32,
    pub separation_weight: f32,
    pub alignment_weight: f32,
    pub cohesion_weight: f32,
    pub obstacle_avoidance_weight: f32,
    pub boundary_strength: f32,
    pub boundary_avoid_distance: f32,
    pub color: [f32; 4],
    pub speed: f32,
    pub obstacle_avoid_distance: f32,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Swarm {
    pub swarm_id: u32,
    pub swarm_type: SwarmType,
    pub boid_count: u32,
    pub mesh: Option<MeshHandle>,
    pub material: Option<MaterialHandle>,
    pub parameters: SwarmParameters,
    pub color: Vec4,
    // Euler angles in degrees
    pub rotation: Vec3,
    pub scale: Vec3,
}

impl Swarm {
    // Rotation and scale applied to every instance of this swarm's mesh.
    // Euler order matches the editor: Z first, then X, then Y.
    pub fn mesh_transform(&self) -> Mat4 {
        let r = self.rotation;
        let rotation = Quat::from_rotation_y(r.y.to_radians())
            * Quat::from_rotation_x(r.x.to_radians())
            * Quat::from_rotation_z(r.z.to_radians());
        Mat4::from_scale_rotation_translation(self.scale, rotation, Vec3::ZERO)
    }

    pub fn gpu_record(&self) -> SwarmData {
        let p = &self.parameters;
        SwarmData {
            swarm_id: self.swarm_id as i32,
            swarm_type: self.swarm_type.tag(),
            separation_weight: p.separation_weight,
            alignment_weight: p.alignment_weight,
            cohesion_weight: p.cohesion_weight,
            obstacle_avoidance_weight: p.obstacle_avoidance_weight,
            boundary_strength: p.boundary_strength,
            boundary_avoid_distance: p.boundary_avoid_distance,
            color: self.color.into(),
            speed: p.speed,
            obstacle_avoid_distance: p.obstacle_avoid_distance,
        }
    }

    // Whether the renderer has everything it needs to draw this swarm
    pub fn is_drawable(&self) -> bool {
        self.mesh.is_some() && self.material.is_some() && self.boid_count > 0
    }
}

#[derive(Clone, Debug, Default)]
pub struct SwarmRegistry {
    swarms: Vec<Swarm>,
    offsets: Vec<u32>,
}

impl SwarmRegistry {
    pub fn new(descriptors: &[SwarmDescriptor]) -> Self {
        let swarms = descriptors
            .iter()
            .enumerate()
            .map(|(i, d)| Swarm {
                swarm_id: i as u32,
                swarm_type: d.swarm_type,
                boid_count: d.boid_count,
                mesh: d.mesh,
                material: d.material,
                parameters: d.parameters,
                color: d.swarm_type.color(),
                rotation: Vec3::from(d.rotation),
                scale: Vec3::from(d.scale),
            })
            .collect();

        let mut registry = Self {
            swarms,
            offsets: Vec::new(),
        };
        registry.recompute_offsets();
        registry
    }

    pub fn len(&self) -> usize {
        self.swarms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.swarms.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Swarm> {
        self.swarms.iter()
    }

    pub fn get(&self, swarm_id: u32) -> SwarmResult<&Swarm> {
        self.swarms.get(swarm_id as usize).ok_or(SwarmError::NotFound(swarm_id))
    }

    fn get_mut(&mut self, swarm_id: u32) -> SwarmResult<&mut Swarm> {
        self.swarms.get_mut(swarm_id as usize).ok_or(SwarmError::NotFound(swarm_id))
    }

    pub fn count(&self, swarm_id: u32) -> SwarmResult<u32> {
        self.get(swarm_id).map(|s| s.boid_count)
    }

    pub fn offset(&self, swarm_id: u32) -> SwarmResult<u32> {
        self.get(swarm_id)?;
        Ok(self.offsets[swarm_id as usize])
    }

    pub fn offsets(&self) -> &[u32] {
        &self.offsets
    }

    pub fn counts(&self) -> Vec<u32> {
        self.swarms.iter().map(|s| s.boid_count).collect()
    }

    pub fn total_boids(&self) -> u32 {
        self.swarms.iter().map(|s| s.boid_count).sum()
    }

    // Add one to a swarm's count; returns the new count
    pub fn increment(&mut self, swarm_id: u32) -> SwarmResult<u32> {
        let swarm = self.get_mut(swarm_id)?;
        swarm.boid_count += 1;
        let count = swarm.boid_count;
        self.recompute_offsets();
        debug!(swarm_id, count, "swarm count incremented");
        Ok(count)
    }

    // Take one from a swarm's count; returns the new count
    pub fn decrement(&mut self, swarm_id: u32) -> SwarmResult<u32> {
        let swarm = self.get_mut(swarm_id)?;
        if swarm.boid_count == 0 {
            return Err(SwarmError::EmptySwarm(swarm_id));
        }
        swarm.boid_count -= 1;
        let count = swarm.boid_count;
        self.recompute_offsets();
        debug!(swarm_id, count, "swarm count decremented");
        Ok(count)
    }

    // Replace weight and speed configuration as given; slider bounds are the caller's concern
    pub fn adjust_parameters(&mut self, swarm_id: u32, parameters: SwarmParameters) -> SwarmResult<()> {
        self.get_mut(swarm_id)?.parameters = parameters;
        Ok(())
    }

    pub fn set_mesh_transform(&mut self, swarm_id: u32, rotation: Vec3, scale: Vec3) -> SwarmResult<()> {
        let swarm = self.get_mut(swarm_id)?;
        swarm.rotation = rotation;
        swarm.scale = scale;
        Ok(())
    }

    // Swarm records in ID order for the config buffer
    pub fn gpu_records(&self) -> Vec<SwarmData> {
        self.swarms.iter().map(Swarm::gpu_record).collect()
    }

    fn recompute_offsets(&mut self) {
        let mut cumulative = 0;
        self.offsets.clear();
        for swarm in &self.swarms {
            self.offsets.push(cumulative);
            cumulative += swarm.boid_count;
        }
    }
}
