/*
 * Simulation Parameters Module
 *
 * This module defines the configuration for the swarm core:
 * - SwarmParameters: per-swarm behavior weights and speed, editable at runtime
 * - SwarmDescriptor: one configured swarm (type, count, visuals, parameters)
 * - SimulationConfig: bounds, food attractor timing, octree and device settings
 *
 * Configuration can be loaded from JSON; every field has a default so a
 * partial file is valid.
 */

use std::path::Path;

use nannou::glam::Vec3;
use serde::{Deserialize, Serialize};

use crate::boid::SwarmType;
use crate::error::{SwarmError, SwarmResult};
use crate::swarm::{MaterialHandle, MeshHandle};

// Behavior weights and speed for one swarm
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SwarmParameters {
    pub separation_weight: f32,
    pub alignment_weight: f32,
    pub cohesion_weight: f32,
    pub obstacle_avoidance_weight: f32,
    pub boundary_strength: f32,
    pub boundary_avoid_distance: f32,
    pub obstacle_avoid_distance: f32,
    pub speed: f32,
}

impl Default for SwarmParameters {
    fn default() -> Self {
        Self {
            separation_weight: 1.5,
            alignment_weight: 1.0,
            cohesion_weight: 1.0,
            obstacle_avoidance_weight: 2.0,
            boundary_strength: 0.5,
            boundary_avoid_distance: 10.0,
            obstacle_avoid_distance: 15.0,
            speed: 5.0,
        }
    }
}

impl SwarmParameters {
    // Get parameter ranges for editor sliders
    pub fn get_weight_range() -> std::ops::RangeInclusive<f32> {
        0.0..=10.0
    }

    pub fn get_distance_range() -> std::ops::RangeInclusive<f32> {
        0.0..=100.0
    }

    pub fn get_speed_range() -> std::ops::RangeInclusive<f32> {
        0.0..=50.0
    }

    // Copy with every field pulled into its slider range; NaN falls back to the default
    pub fn clamped(&self) -> Self {
        let defaults = Self::default();
        let fit = |value: f32, fallback: f32, range: std::ops::RangeInclusive<f32>| {
            if value.is_nan() {
                fallback
            } else {
                value.clamp(*range.start(), *range.end())
            }
        };

        Self {
            separation_weight: fit(self.separation_weight, defaults.separation_weight, Self::get_weight_range()),
            alignment_weight: fit(self.alignment_weight, defaults.alignment_weight, Self::get_weight_range()),
            cohesion_weight: fit(self.cohesion_weight, defaults.cohesion_weight, Self::get_weight_range()),
            obstacle_avoidance_weight: fit(
                self.obstacle_avoidance_weight,
                defaults.obstacle_avoidance_weight,
                Self::get_weight_range(),
            ),
            boundary_strength: fit(self.boundary_strength, defaults.boundary_strength, Self::get_weight_range()),
            boundary_avoid_distance: fit(
                self.boundary_avoid_distance,
                defaults.boundary_avoid_distance,
                Self::get_distance_range(),
            ),
            obstacle_avoid_distance: fit(
                self.obstacle_avoid_distance,
                defaults.obstacle_avoid_distance,
                Self::get_distance_range(),
            ),
            speed: fit(self.speed, defaults.speed, Self::get_speed_range()),
        }
    }
}

// One configured swarm as it appears in the config file
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SwarmDescriptor {
    pub swarm_type: SwarmType,
    pub boid_count: u32,
    pub mesh: Option<MeshHandle>,
    pub material: Option<MaterialHandle>,
    pub parameters: SwarmParameters,
    // Euler angles in degrees
    pub rotation: [f32; 3],
    pub scale: [f32; 3],
}

impl Default for SwarmDescriptor {
    fn default() -> Self {
        Self {
            swarm_type: SwarmType::Prey,
            boid_count: 0,
            mesh: None,
            material: None,
            parameters: SwarmParameters::default(),
            rotation: [0.0; 3],
            scale: [1.0; 3],
        }
    }
}

impl SwarmDescriptor {
    pub fn new(swarm_type: SwarmType, boid_count: u32) -> Self {
        Self {
            swarm_type,
            boid_count,
            ..Self::default()
        }
    }

    pub fn with_visuals(mut self, mesh: MeshHandle, material: MaterialHandle) -> Self {
        self.mesh = Some(mesh);
        self.material = Some(material);
        self
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    pub swarms: Vec<SwarmDescriptor>,
    // Centre of the simulation volume
    pub origin: [f32; 3],
    pub bounds_size: [f32; 3],
    // Seconds between periodic food spawns
    pub food_spawn_interval: f32,
    // Seconds a food attractor stays alive
    pub food_lifetime: f32,
    // Device slots for food attractors
    pub food_capacity: usize,
    pub spawn_attempts: u32,
    pub octree_max_boids_per_node: usize,
    pub octree_max_depth: u32,
    // Double instance counts for single-pass stereo rendering
    pub dual_pass_instancing: bool,
    pub entry_point: String,
    pub workgroup_size: u32,
    pub seed: Option<u64>,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            swarms: Vec::new(),
            origin: [0.0; 3],
            bounds_size: [100.0, 100.0, 100.0],
            food_spawn_interval: 5.0,
            food_lifetime: 10.0,
            food_capacity: 100,
            spawn_attempts: 100,
            octree_max_boids_per_node: 10,
            octree_max_depth: 8,
            dual_pass_instancing: true,
            entry_point: "main".to_string(),
            workgroup_size: 256,
            seed: None,
        }
    }
}

impl SimulationConfig {
    pub fn from_json_str(content: &str) -> SwarmResult<Self> {
        let config: SimulationConfig =
            serde_json::from_str(content).map_err(|e| SwarmError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file<P: AsRef<Path>>(path: P) -> SwarmResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json_str(&content)
    }

    pub fn to_json_string(&self) -> SwarmResult<String> {
        serde_json::to_string_pretty(self).map_err(|e| SwarmError::Config(e.to_string()))
    }

    pub fn validate(&self) -> SwarmResult<()> {
        if self.bounds_size.iter().any(|s| !s.is_finite() || *s <= 0.0) {
            return Err(SwarmError::Config(format!("bounds_size must be positive, got {:?}", self.bounds_size)));
        }
        if self.food_spawn_interval.is_nan() || self.food_spawn_interval <= 0.0 {
            return Err(SwarmError::Config("food_spawn_interval must be positive".to_string()));
        }
        if self.food_lifetime < 0.0 || self.food_lifetime.is_nan() {
            return Err(SwarmError::Config("food_lifetime must not be negative".to_string()));
        }
        if self.workgroup_size == 0 {
            return Err(SwarmError::Config("workgroup_size must be non-zero".to_string()));
        }
        if self.entry_point.is_empty() {
            return Err(SwarmError::Config("entry_point must be named".to_string()));
        }
        Ok(())
    }

    pub fn origin(&self) -> Vec3 {
        Vec3::from(self.origin)
    }

    pub fn bounds_size(&self) -> Vec3 {
        Vec3::from(self.bounds_size)
    }
}
