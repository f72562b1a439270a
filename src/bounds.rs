/*
 * Bounds Module
 *
 * Axis-aligned bounding volumes shared by the octree, the obstacle cache
 * (per-mesh volumes for spawn rejection) and the food spawner.
 * All containment and intersection tests are inclusive on every face.
 */

use nannou::glam::Vec3;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Aabb {
    pub min: Vec3,
    pub max: Vec3,
}

impl Aabb {
    pub fn new(min: Vec3, max: Vec3) -> Self {
        Self {
            min: min.min(max),
            max: min.max(max),
        }
    }

    pub fn from_center_size(center: Vec3, size: Vec3) -> Self {
        let half = size.abs() * 0.5;
        Self {
            min: center - half,
            max: center + half,
        }
    }

    // Smallest volume enclosing every point, None for an empty iterator
    pub fn enclosing<I: IntoIterator<Item = Vec3>>(points: I) -> Option<Self> {
        let mut iter = points.into_iter();
        let first = iter.next()?;
        let (min, max) = iter.fold((first, first), |(min, max), p| (min.min(p), max.max(p)));
        Some(Self { min, max })
    }

    pub fn center(&self) -> Vec3 {
        (self.min + self.max) * 0.5
    }

    pub fn size(&self) -> Vec3 {
        self.max - self.min
    }

    #[inline]
    pub fn contains(&self, point: Vec3) -> bool {
        point.x >= self.min.x
            && point.x <= self.max.x
            && point.y >= self.min.y
            && point.y <= self.max.y
            && point.z >= self.min.z
            && point.z <= self.max.z
    }

    #[inline]
    pub fn intersects(&self, other: &Aabb) -> bool {
        self.min.x <= other.max.x
            && self.max.x >= other.min.x
            && self.min.y <= other.max.y
            && self.max.y >= other.min.y
            && self.min.z <= other.max.z
            && self.max.z >= other.min.z
    }

    // Octant index of a point relative to the centre: bit 0 = +x, bit 1 = +y, bit 2 = +z.
    // Points on a split plane belong to the upper octant.
    #[inline]
    pub fn octant_of(&self, point: Vec3) -> usize {
        let c = self.center();
        let mut index = 0;
        if point.x >= c.x {
            index |= 1;
        }
        if point.y >= c.y {
            index |= 2;
        }
        if point.z >= c.z {
            index |= 4;
        }
        index
    }

    // One of the eight equal sub-volumes, numbered like `octant_of`
    pub fn octant(&self, index: usize) -> Aabb {
        let c = self.center();
        let pick = |bit: usize, lo: f32, mid: f32, hi: f32| {
            if index & bit != 0 {
                (mid, hi)
            } else {
                (lo, mid)
            }
        };
        let (x0, x1) = pick(1, self.min.x, c.x, self.max.x);
        let (y0, y1) = pick(2, self.min.y, c.y, self.max.y);
        let (z0, z1) = pick(4, self.min.z, c.z, self.max.z);
        Aabb {
            min: Vec3::new(x0, y0, z0),
            max: Vec3::new(x1, y1, z1),
        }
    }
}
