/*
 * Obstacle Geometry Module
 *
 * Flattens obstacle meshes into world-space triangles for the avoidance
 * kernel, and keeps one world-space bounding volume per mesh for spawn
 * rejection. Triangles are an immutable snapshot: when the environment
 * changes, the host must call `rebuild` again.
 */

use bytemuck::{Pod, Zeroable};
use nannou::glam::{Mat4, Vec3};
use tracing::{info, warn};

use crate::bounds::Aabb;

// One obstacle mesh supplied by the environment
#[derive(Clone, Debug)]
pub struct MeshSource {
    pub vertices: Vec<Vec3>,
    // Consecutive triples index into `vertices`
    pub indices: Vec<u32>,
    pub local_to_world: Mat4,
}

impl MeshSource {
    pub fn new(vertices: Vec<Vec3>, indices: Vec<u32>, local_to_world: Mat4) -> Self {
        Self {
            vertices,
            indices,
            local_to_world,
        }
    }
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct Triangle {
    pub vertex_a: [f32; 3],
    pub vertex_b: [f32; 3],
    pub vertex_c: [f32; 3],
}

impl Triangle {
    pub fn new(a: Vec3, b: Vec3, c: Vec3) -> Self {
        Self {
            vertex_a: a.into(),
            vertex_b: b.into(),
            vertex_c: c.into(),
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct ObstacleGeometryCache {
    triangles: Vec<Triangle>,
    volumes: Vec<Aabb>,
}

impl ObstacleGeometryCache {
    pub fn new() -> Self {
        Self::default()
    }

    // Replace the cached geometry with the triangles of `meshes`, in order.
    // Overlapping meshes keep their duplicate triangles.
    pub fn rebuild(&mut self, meshes: &[MeshSource]) -> &[Triangle] {
        self.triangles.clear();
        self.volumes.clear();

        for (mesh_index, mesh) in meshes.iter().enumerate() {
            let world: Vec<Vec3> = mesh
                .vertices
                .iter()
                .map(|v| mesh.local_to_world.transform_point3(*v))
                .collect();

            let mut skipped = 0;
            for tri in mesh.indices.chunks_exact(3) {
                let corner = |i: u32| world.get(i as usize).copied();
                match (corner(tri[0]), corner(tri[1]), corner(tri[2])) {
                    (Some(a), Some(b), Some(c)) => self.triangles.push(Triangle::new(a, b, c)),
                    _ => skipped += 1,
                }
            }
            if skipped > 0 {
                warn!(mesh_index, skipped, "skipped triangles with out-of-range indices");
            }

            if let Some(volume) = Aabb::enclosing(world) {
                self.volumes.push(volume);
            }
        }

        info!(meshes = meshes.len(), triangles = self.triangles.len(), "obstacle geometry rebuilt");
        &self.triangles
    }

    pub fn triangles(&self) -> &[Triangle] {
        &self.triangles
    }

    // World-space bounds of each obstacle mesh
    pub fn volumes(&self) -> &[Aabb] {
        &self.volumes
    }

    pub fn is_inside_obstacle(&self, point: Vec3) -> bool {
        self.volumes.iter().any(|v| v.contains(point))
    }
}
