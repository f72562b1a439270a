/*
 * Population Module
 *
 * This module keeps the flat, co-indexed boid and instance arrays the
 * device buffers mirror. Slot `i` of `instances` always renders slot `i`
 * of `boids`, so both arrays change together on every call.
 *
 * The renderer addresses a swarm's instances as the contiguous range
 * `[offset, offset + count)`. Removal therefore always trims the
 * last-occurring member of the swarm, and insertion can target the tail
 * of a swarm's range so the ranges stay contiguous.
 */

use nannou::glam::Vec3;
use rand::Rng;
use rand_distr::{Distribution, UnitBall};

use crate::boid::{BoidData, InstanceData};
use crate::error::{SwarmError, SwarmResult};
use crate::obstacles::ObstacleGeometryCache;

#[derive(Clone, Debug, Default, PartialEq)]
pub struct PopulationStore {
    boids: Vec<BoidData>,
    instances: Vec<InstanceData>,
}

impl PopulationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            boids: Vec::with_capacity(capacity),
            instances: Vec::with_capacity(capacity),
        }
    }

    pub fn len(&self) -> usize {
        self.boids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.boids.is_empty()
    }

    pub fn boids(&self) -> &[BoidData] {
        &self.boids
    }

    pub fn instances(&self) -> &[InstanceData] {
        &self.instances
    }

    // Add at the end; returns the new slot index
    pub fn append(&mut self, boid: BoidData, instance: InstanceData) -> usize {
        self.boids.push(boid);
        self.instances.push(instance);
        self.boids.len() - 1
    }

    // Insert at `index`, shifting later slots up by one. Indices past the end append.
    pub fn insert(&mut self, index: usize, boid: BoidData, instance: InstanceData) -> usize {
        let index = index.min(self.boids.len());
        self.boids.insert(index, boid);
        self.instances.insert(index, instance);
        index
    }

    // Remove the last-occurring boid of `swarm_id`; returns the removed slot
    pub fn remove_last(&mut self, swarm_id: u32) -> SwarmResult<usize> {
        let index = self
            .boids
            .iter()
            .rposition(|b| b.belongs_to(swarm_id))
            .ok_or(SwarmError::EmptySwarm(swarm_id))?;
        self.boids.remove(index);
        self.instances.remove(index);
        Ok(index)
    }

    pub fn count_in(&self, swarm_id: u32) -> usize {
        self.boids.iter().filter(|b| b.belongs_to(swarm_id)).count()
    }

    pub fn clear(&mut self) {
        self.boids.clear();
        self.instances.clear();
    }

    // Copy motion state read back from the device into matching slots.
    // Slots whose swarm differs, or that are missing from `readback`, are left alone.
    pub fn refresh_motion(&mut self, readback: &[BoidData]) -> usize {
        let mut updated = 0;
        for (boid, fresh) in self.boids.iter_mut().zip(readback) {
            if boid.swarm_id == fresh.swarm_id {
                boid.position = fresh.position;
                boid.velocity = fresh.velocity;
                updated += 1;
            }
        }
        updated
    }

    // (slot, position) pairs for the spatial index
    pub fn positions(&self) -> impl Iterator<Item = (u32, Vec3)> + '_ {
        self.boids.iter().enumerate().map(|(i, b)| (i as u32, b.position()))
    }
}

// Best-effort spawn positions inside a sphere, avoiding obstacle volumes
#[derive(Clone, Copy, Debug)]
pub struct SpawnSampler {
    pub origin: Vec3,
    pub radius: f32,
    pub max_attempts: u32,
}

impl SpawnSampler {
    pub fn new(origin: Vec3, radius: f32, max_attempts: u32) -> Self {
        Self {
            origin,
            radius,
            max_attempts: max_attempts.max(1),
        }
    }

    // Sample until a point lies outside every obstacle volume.
    // After `max_attempts` the last candidate is returned even if it is blocked.
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R, obstacles: &ObstacleGeometryCache) -> Vec3 {
        let mut candidate = self.origin;
        for _ in 0..self.max_attempts {
            let [x, y, z]: [f32; 3] = UnitBall.sample(rng);
            candidate = Vec3::new(x, y, z) * self.radius + self.origin;
            if !obstacles.is_inside_obstacle(candidate) {
                break;
            }
        }
        candidate
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::boid::SwarmType;
    use crate::obstacles::MeshSource;
    use nannou::glam::{Mat4, Vec4};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn boid(swarm_id: u32, x: f32) -> BoidData {
        BoidData::spawn(Vec3::new(x, 0.0, 0.0), SwarmType::Prey, swarm_id)
    }

    fn store(swarms: &[u32]) -> PopulationStore {
        let mut store = PopulationStore::new();
        for (i, &s) in swarms.iter().enumerate() {
            store.append(boid(s, i as f32), InstanceData::new(Vec4::ONE));
        }
        store
    }

    #[test]
    fn append_returns_prior_length() {
        let mut s = store(&[0, 0]);
        assert_eq!(s.append(boid(1, 9.0), InstanceData::default()), 2);
        assert_eq!(s.boids().len(), s.instances().len());
    }

    #[test]
    fn refresh_motion_updates_matching_slots_only() {
        let mut s = store(&[0, 1, 1]);
        let mut readback = vec![boid(0, 5.0), boid(0, 6.0)];
        readback[0].velocity = [1.0, 2.0, 3.0];
        assert_eq!(s.refresh_motion(&readback), 1);
        assert_eq!(s.boids()[0].position(), Vec3::new(5.0, 0.0, 0.0));
        assert_eq!(s.boids()[0].velocity(), Vec3::new(1.0, 2.0, 3.0));
        assert_eq!(s.boids()[1].position(), Vec3::new(1.0, 0.0, 0.0));
        assert_eq!(s.boids()[2].position(), Vec3::new(2.0, 0.0, 0.0));
    }

    #[test]
    fn remove_last_takes_the_highest_member_of_the_swarm() {
        let mut s = store(&[0, 0, 1, 1, 0]);
        assert_eq!(s.remove_last(1).unwrap(), 3);
        assert_eq!(s.remove_last(0).unwrap(), 3);
        assert_eq!(s.count_in(0), 2);
        assert_eq!(s.boids().len(), s.instances().len());
    }

    #[test]
    fn remove_last_on_empty_swarm_leaves_arrays_untouched() {
        let mut s = store(&[0, 0]);
        let before = s.clone();
        assert!(matches!(s.remove_last(1), Err(SwarmError::EmptySwarm(1))));
        assert_eq!(s, before);
    }

    #[test]
    fn insert_keeps_arrays_aligned() {
        let mut s = store(&[0, 1]);
        let color = Vec4::new(0.5, 0.5, 0.5, 1.0);
        assert_eq!(s.insert(1, boid(0, 7.0), InstanceData::new(color)), 1);
        assert_eq!(s.boids()[1].position[0], 7.0);
        assert_eq!(s.instances()[1].color, [0.5, 0.5, 0.5, 1.0]);
        assert_eq!(s.insert(99, boid(1, 8.0), InstanceData::default()), 3);
    }

    #[test]
    fn sampler_stays_inside_its_sphere() {
        let sampler = SpawnSampler::new(Vec3::new(5.0, 0.0, 0.0), 2.0, 10);
        let mut rng = StdRng::seed_from_u64(1);
        let cache = ObstacleGeometryCache::new();
        for _ in 0..200 {
            let p = sampler.sample(&mut rng, &cache);
            assert!(p.distance(Vec3::new(5.0, 0.0, 0.0)) <= 2.0 + 1e-4);
        }
    }

    #[test]
    fn sampler_avoids_obstacles_when_it_can() {
        // Block the x >= 0 half of the sphere
        let mut cache = ObstacleGeometryCache::new();
        cache.rebuild(&[MeshSource::new(
            vec![Vec3::new(0.0, -20.0, -20.0), Vec3::new(20.0, 20.0, 20.0), Vec3::new(20.0, -20.0, 20.0)],
            vec![0, 1, 2],
            Mat4::IDENTITY,
        )]);
        let sampler = SpawnSampler::new(Vec3::ZERO, 10.0, 100);
        let mut rng = StdRng::seed_from_u64(2);
        for _ in 0..100 {
            assert!(sampler.sample(&mut rng, &cache).x < 0.0);
        }
    }

    #[test]
    fn sampler_gives_up_after_max_attempts() {
        let mut cache = ObstacleGeometryCache::new();
        cache.rebuild(&[MeshSource::new(
            vec![Vec3::splat(-50.0), Vec3::splat(50.0), Vec3::new(50.0, -50.0, 0.0)],
            vec![0, 1, 2],
            Mat4::IDENTITY,
        )]);
        let sampler = SpawnSampler::new(Vec3::ZERO, 1.0, 5);
        let p = sampler.sample(&mut StdRng::seed_from_u64(3), &cache);
        assert!(cache.is_inside_obstacle(p));
    }
}
