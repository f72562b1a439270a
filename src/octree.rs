/*
 * Octree Module
 *
 * This module defines the SpatialIndex used for neighbor lookups over boid
 * positions. It subdivides the simulation volume on demand into eight
 * equal octants, allowing range queries that only visit nodes overlapping
 * the query volume instead of scanning every boid.
 *
 * Nodes live in a flat arena and refer to their children by index:
 * - A leaf holds the boid ids (and their positions) recorded under it
 * - A branch holds exactly eight child indices
 *
 * When a leaf grows past `max_boids_per_node` and is shallower than
 * `max_depth`, its members are redistributed into the new children using
 * their recorded positions. Leaves at `max_depth` grow without bound.
 */

use nannou::glam::Vec3;

use crate::bounds::Aabb;

#[derive(Clone, Copy, Debug)]
struct Entry {
    id: u32,
    position: Vec3,
}

#[derive(Debug)]
enum NodeKind {
    Leaf(Vec<Entry>),
    Branch([u32; 8]),
}

#[derive(Debug)]
struct Node {
    bounds: Aabb,
    depth: u32,
    kind: NodeKind,
}

impl Node {
    fn leaf(bounds: Aabb, depth: u32) -> Self {
        Self {
            bounds,
            depth,
            kind: NodeKind::Leaf(Vec::new()),
        }
    }
}

pub struct SpatialIndex {
    root_bounds: Aabb,
    max_boids_per_node: usize,
    max_depth: u32,
    nodes: Vec<Node>,
    len: usize,
}

impl SpatialIndex {
    pub fn new(root_bounds: Aabb, max_boids_per_node: usize, max_depth: u32) -> Self {
        Self {
            root_bounds,
            // A leaf must be allowed at least one member before it splits
            max_boids_per_node: max_boids_per_node.max(1),
            max_depth,
            nodes: vec![Node::leaf(root_bounds, 0)],
            len: 0,
        }
    }

    pub fn root_bounds(&self) -> Aabb {
        self.root_bounds
    }

    // Number of ids currently stored
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    // Insert a boid reference. Positions outside the root volume are dropped;
    // the return value tells whether the id was stored.
    pub fn insert(&mut self, id: u32, position: Vec3) -> bool {
        if !self.root_bounds.contains(position) {
            return false;
        }
        self.insert_from(0, Entry { id, position });
        self.len += 1;
        true
    }

    // Descend from `start` to the leaf covering the entry, then split if needed
    fn insert_from(&mut self, start: usize, entry: Entry) {
        let mut index = start;
        loop {
            let node = &mut self.nodes[index];
            match &mut node.kind {
                NodeKind::Branch(children) => {
                    let octant = node.bounds.octant_of(entry.position);
                    index = children[octant] as usize;
                }
                NodeKind::Leaf(entries) => {
                    entries.push(entry);
                    let overfull = entries.len() > self.max_boids_per_node;
                    if overfull && node.depth < self.max_depth {
                        self.subdivide(index);
                    }
                    return;
                }
            }
        }
    }

    // Turn a leaf into a branch and push its members down into the new octants
    fn subdivide(&mut self, index: usize) {
        let bounds = self.nodes[index].bounds;
        let depth = self.nodes[index].depth;

        let first_child = self.nodes.len() as u32;
        let mut children = [0u32; 8];
        for (octant, child) in children.iter_mut().enumerate() {
            *child = first_child + octant as u32;
            self.nodes.push(Node::leaf(bounds.octant(octant), depth + 1));
        }

        let entries = match std::mem::replace(&mut self.nodes[index].kind, NodeKind::Branch(children)) {
            NodeKind::Leaf(entries) => entries,
            // Only leaves are ever subdivided
            NodeKind::Branch(_) => return,
        };

        for entry in entries {
            let child = children[bounds.octant_of(entry.position)] as usize;
            self.insert_from(child, entry);
        }
    }

    // All ids stored under leaves whose volume intersects `range`.
    // Members of an intersecting leaf are returned without per-point tests.
    pub fn query_range(&self, range: &Aabb) -> Vec<u32> {
        let mut result = Vec::new();
        let mut stack = vec![0usize];

        while let Some(index) = stack.pop() {
            let node = &self.nodes[index];
            if !node.bounds.intersects(range) {
                continue;
            }
            match &node.kind {
                NodeKind::Leaf(entries) => result.extend(entries.iter().map(|e| e.id)),
                NodeKind::Branch(children) => stack.extend(children.iter().map(|&c| c as usize)),
            }
        }

        result
    }

    // Reset to a single empty leaf at the original root bounds
    pub fn clear(&mut self) {
        self.nodes.clear();
        self.nodes.push(Node::leaf(self.root_bounds, 0));
        self.len = 0;
    }

    // Clear, then insert every (id, position) pair
    pub fn rebuild<I>(&mut self, positions: I) -> usize
    where
        I: IntoIterator<Item = (u32, Vec3)>,
    {
        self.clear();
        let mut stored = 0;
        for (id, position) in positions {
            if self.insert(id, position) {
                stored += 1;
            }
        }
        stored
    }

    // Deepest level reached by any node
    pub fn depth(&self) -> u32 {
        self.nodes.iter().map(|n| n.depth).max().unwrap_or(0)
    }
}
