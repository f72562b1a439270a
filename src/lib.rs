/*
 * GPU Swarm Simulation - Module Definitions
 *
 * This file defines the module structure for the multi-swarm boid core.
 * CPU-side bookkeeping (registry, population, food, obstacles, octree)
 * is mirrored into device buffers that a compute kernel and an
 * indirect-instanced renderer consume each tick.
 */

// Re-export key components for easier access
pub use backend::{BufferId, ComputeBackend, HeadlessBackend};
pub use boid::{BoidData, InstanceData, SwarmType};
pub use bounds::Aabb;
pub use debug::DebugInfo;
pub use error::{DeviceError, SwarmError, SwarmResult};
pub use food::{AttractorVisuals, FoodAttractorPool, NoVisuals};
pub use gpu::WgpuBackend;
pub use obstacles::{MeshSource, ObstacleGeometryCache};
pub use octree::SpatialIndex;
pub use params::{SimulationConfig, SwarmDescriptor, SwarmParameters};
pub use population::PopulationStore;
pub use simulation::{DrawCall, SwarmSimulation, TickReport};
pub use swarm::{MaterialHandle, MeshHandle, SwarmRegistry};

// Define modules
pub mod backend;
pub mod boid;
pub mod bounds;
pub mod debug;
pub mod device;
pub mod error;
pub mod food;
pub mod gpu;
pub mod obstacles;
pub mod octree;
pub mod params;
pub mod population;
pub mod schedule;
pub mod simulation;
pub mod swarm;

// Constants
pub const DEFAULT_ENTRY_POINT: &str = "main";
pub const DEFAULT_WORKGROUP_SIZE: u32 = 256;
