//! Spatial indexing for agent neighborhood queries.
//!
//! The index is rebuilt from scratch every simulation tick and is read-only
//! until the next rebuild, which is what makes it safe to query from many
//! worker threads at once. Entries are identified by an opaque `u64` handed
//! in by the caller (the simulation uses its agent serial).

use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

/// Errors emitted by spatial index implementations.
#[derive(Debug, Error)]
pub enum IndexError {
    /// Indicates configuration values that cannot be used (e.g., zero-sized bounds).
    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),
}

/// Common behaviour exposed by proximity indices.
pub trait ProximityIndex {
    /// Rebuild internal structures from `(id, x, y)` triples, discarding prior state.
    fn rebuild(&mut self, points: &[(u64, f32, f32)]) -> Result<(), IndexError>;

    /// Visit every entry whose position lies within `radius` of `(cx, cy)`,
    /// passing the entry id and its squared distance to the center.
    fn for_each_in_circle(
        &self,
        cx: f32,
        cy: f32,
        radius: f32,
        visitor: &mut dyn FnMut(u64, OrderedFloat<f32>),
    );

    /// Position recorded for `id` at the last rebuild, if present.
    fn position_of(&self, id: u64) -> Option<(f32, f32)>;

    /// Collect all entries within `radius` of `(cx, cy)`, sorted by squared
    /// distance and then id so results are independent of traversal order.
    fn query_circle(&self, cx: f32, cy: f32, radius: f32) -> Vec<(u64, OrderedFloat<f32>)> {
        let mut hits = Vec::new();
        self.for_each_in_circle(cx, cy, radius, &mut |id, dist_sq| {
            hits.push((id, dist_sq));
        });
        hits.sort_by_key(|&(id, dist_sq)| (dist_sq, id));
        hits
    }

    /// Collect all entries within `radius` of the entry `id`, excluding `id`
    /// itself. Returns an empty vector when `id` is unknown.
    fn query_near(&self, id: u64, radius: f32) -> Vec<(u64, OrderedFloat<f32>)> {
        let Some((x, y)) = self.position_of(id) else {
            return Vec::new();
        };
        let mut hits = self.query_circle(x, y, radius);
        hits.retain(|&(other, _)| other != id);
        hits
    }
}

/// Occupancy and depth limits for the quadrant tree.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct TreeParams {
    /// Maximum entries a leaf holds before it subdivides.
    pub leaf_capacity: usize,
    /// Maximum subdivision depth; leaves at this depth grow without splitting,
    /// which bounds degenerate trees when agents cluster on one point.
    pub max_depth: u8,
}

impl Default for TreeParams {
    fn default() -> Self {
        Self {
            leaf_capacity: 8,
            max_depth: 8,
        }
    }
}

/// Axis-aligned rectangle used for tree regions and intersection tests.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Aabb {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl Aabb {
    /// Construct a rectangle anchored at `(x, y)`.
    #[must_use]
    pub const fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    #[must_use]
    pub fn center(&self) -> (f32, f32) {
        (self.x + self.width * 0.5, self.y + self.height * 0.5)
    }

    /// True when the circle at `(cx, cy)` overlaps this rectangle, using the
    /// closest-point-on-rect distance test.
    #[must_use]
    pub fn intersects_circle(&self, cx: f32, cy: f32, radius: f32) -> bool {
        let closest_x = cx.clamp(self.x, self.x + self.width);
        let closest_y = cy.clamp(self.y, self.y + self.height);
        let dx = cx - closest_x;
        let dy = cy - closest_y;
        dx * dx + dy * dy <= radius * radius
    }

    /// Quadrant index for a point: `<= midpoint` routes to the lower-index
    /// (west/north) child, which keeps boundary assignment deterministic.
    #[must_use]
    fn quadrant(&self, x: f32, y: f32) -> usize {
        let (mid_x, mid_y) = self.center();
        let east = usize::from(x > mid_x);
        let south = usize::from(y > mid_y);
        south * 2 + east
    }

    /// The four child rectangles in nw/ne/sw/se order.
    #[must_use]
    fn split(&self) -> [Aabb; 4] {
        let w = self.width * 0.5;
        let h = self.height * 0.5;
        [
            Aabb::new(self.x, self.y, w, h),
            Aabb::new(self.x + w, self.y, w, h),
            Aabb::new(self.x, self.y + h, w, h),
            Aabb::new(self.x + w, self.y + h, w, h),
        ]
    }
}

#[derive(Debug, Clone, Copy)]
struct Entry {
    id: u64,
    x: f32,
    y: f32,
}

#[derive(Debug)]
struct Node {
    bounds: Aabb,
    depth: u8,
    /// Index of the first of four contiguous children, `None` for leaves.
    children: Option<usize>,
    entries: Vec<Entry>,
}

impl Node {
    fn leaf(bounds: Aabb, depth: u8) -> Self {
        Self {
            bounds,
            depth,
            children: None,
            entries: Vec::new(),
        }
    }
}

/// Quadrant tree over a fixed world rectangle.
///
/// Nodes live in a flat arena (`Vec<Node>`) with child links by index, so a
/// rebuild is a handful of allocations rather than a pointer-chasing teardown.
#[derive(Debug)]
pub struct QuadTree {
    bounds: Aabb,
    params: TreeParams,
    nodes: Vec<Node>,
    positions: HashMap<u64, (f32, f32)>,
}

impl QuadTree {
    /// Create a tree covering `[0, width] x [0, height]`.
    pub fn new(width: f32, height: f32, params: TreeParams) -> Result<Self, IndexError> {
        if !(width > 0.0 && width.is_finite() && height > 0.0 && height.is_finite()) {
            return Err(IndexError::InvalidConfig(
                "tree bounds must be positive and finite",
            ));
        }
        if params.leaf_capacity == 0 {
            return Err(IndexError::InvalidConfig("leaf_capacity must be non-zero"));
        }
        if params.max_depth == 0 {
            return Err(IndexError::InvalidConfig("max_depth must be non-zero"));
        }
        let bounds = Aabb::new(0.0, 0.0, width, height);
        Ok(Self {
            bounds,
            params,
            nodes: vec![Node::leaf(bounds, 0)],
            positions: HashMap::new(),
        })
    }

    /// Number of entries indexed by the last rebuild.
    #[must_use]
    pub fn len(&self) -> usize {
        self.positions.len()
    }

    /// True when the last rebuild saw no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    /// World rectangle this tree partitions.
    #[must_use]
    pub const fn bounds(&self) -> Aabb {
        self.bounds
    }

    /// `(total nodes, leaf nodes, deepest level)` of the current tree shape.
    #[must_use]
    pub fn shape(&self) -> (usize, usize, u8) {
        let leaves = self
            .nodes
            .iter()
            .filter(|node| node.children.is_none())
            .count();
        let depth = self.nodes.iter().map(|node| node.depth).max().unwrap_or(0);
        (self.nodes.len(), leaves, depth)
    }

    fn insert(&mut self, entry: Entry) {
        // Route by a position clamped into the root bounds so an entry on the
        // world border is never dropped; the exact coordinates are kept for
        // distance checks.
        let route_x = entry.x.clamp(self.bounds.x, self.bounds.x + self.bounds.width);
        let route_y = entry
            .y
            .clamp(self.bounds.y, self.bounds.y + self.bounds.height);

        let mut node_idx = 0;
        loop {
            if let Some(first_child) = self.nodes[node_idx].children {
                let quadrant = self.nodes[node_idx].bounds.quadrant(route_x, route_y);
                node_idx = first_child + quadrant;
                continue;
            }

            let node = &mut self.nodes[node_idx];
            if node.entries.len() < self.params.leaf_capacity || node.depth >= self.params.max_depth
            {
                node.entries.push(entry);
                return;
            }

            self.subdivide(node_idx);
        }
    }

    fn subdivide(&mut self, node_idx: usize) {
        let first_child = self.nodes.len();
        let bounds = self.nodes[node_idx].bounds;
        let child_depth = self.nodes[node_idx].depth + 1;
        for child_bounds in bounds.split() {
            self.nodes.push(Node::leaf(child_bounds, child_depth));
        }

        let entries = std::mem::take(&mut self.nodes[node_idx].entries);
        self.nodes[node_idx].children = Some(first_child);
        for entry in entries {
            let route_x = entry.x.clamp(bounds.x, bounds.x + bounds.width);
            let route_y = entry.y.clamp(bounds.y, bounds.y + bounds.height);
            let quadrant = bounds.quadrant(route_x, route_y);
            self.nodes[first_child + quadrant].entries.push(entry);
        }
    }
}

impl ProximityIndex for QuadTree {
    fn rebuild(&mut self, points: &[(u64, f32, f32)]) -> Result<(), IndexError> {
        self.nodes.clear();
        self.nodes.push(Node::leaf(self.bounds, 0));
        self.positions.clear();
        self.positions.reserve(points.len());

        for &(id, x, y) in points {
            self.positions.insert(id, (x, y));
            self.insert(Entry { id, x, y });
        }
        Ok(())
    }

    fn for_each_in_circle(
        &self,
        cx: f32,
        cy: f32,
        radius: f32,
        visitor: &mut dyn FnMut(u64, OrderedFloat<f32>),
    ) {
        if radius < 0.0 {
            return;
        }
        let radius_sq = radius * radius;
        let mut stack = vec![0usize];
        while let Some(node_idx) = stack.pop() {
            let node = &self.nodes[node_idx];
            if !node.bounds.intersects_circle(cx, cy, radius) {
                continue;
            }
            for entry in &node.entries {
                let dx = entry.x - cx;
                let dy = entry.y - cy;
                let dist_sq = dx * dx + dy * dy;
                if dist_sq <= radius_sq {
                    visitor(entry.id, OrderedFloat(dist_sq));
                }
            }
            if let Some(first_child) = node.children {
                stack.extend(first_child..first_child + 4);
            }
        }
    }

    fn position_of(&self, id: u64) -> Option<(f32, f32)> {
        self.positions.get(&id).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::SmallRng, Rng, SeedableRng};

    fn ids(hits: &[(u64, OrderedFloat<f32>)]) -> Vec<u64> {
        let mut ids: Vec<u64> = hits.iter().map(|&(id, _)| id).collect();
        ids.sort_unstable();
        ids
    }

    fn brute_force(points: &[(u64, f32, f32)], cx: f32, cy: f32, radius: f32) -> Vec<u64> {
        let mut hits: Vec<u64> = points
            .iter()
            .filter(|&&(_, x, y)| {
                let dx = x - cx;
                let dy = y - cy;
                dx * dx + dy * dy <= radius * radius
            })
            .map(|&(id, _, _)| id)
            .collect();
        hits.sort_unstable();
        hits
    }

    #[test]
    fn rejects_invalid_construction() {
        assert!(QuadTree::new(0.0, 100.0, TreeParams::default()).is_err());
        assert!(QuadTree::new(100.0, -1.0, TreeParams::default()).is_err());
        let bad_capacity = TreeParams {
            leaf_capacity: 0,
            ..TreeParams::default()
        };
        assert!(QuadTree::new(100.0, 100.0, bad_capacity).is_err());
    }

    #[test]
    fn empty_rebuild_yields_empty_queries() {
        let mut tree = QuadTree::new(100.0, 100.0, TreeParams::default()).expect("tree");
        tree.rebuild(&[]).expect("rebuild");
        assert!(tree.is_empty());
        assert!(tree.query_circle(50.0, 50.0, 1_000.0).is_empty());
        assert!(tree.query_near(7, 50.0).is_empty());
    }

    #[test]
    fn matches_brute_force_oracle() {
        let mut rng = SmallRng::seed_from_u64(0x5EED);
        let points: Vec<(u64, f32, f32)> = (0..500)
            .map(|id| {
                (
                    id,
                    rng.random_range(0.0..1_000.0),
                    rng.random_range(0.0..1_000.0),
                )
            })
            .collect();

        let mut tree = QuadTree::new(1_000.0, 1_000.0, TreeParams::default()).expect("tree");
        tree.rebuild(&points).expect("rebuild");

        for _ in 0..50 {
            let cx = rng.random_range(0.0..1_000.0);
            let cy = rng.random_range(0.0..1_000.0);
            let radius = rng.random_range(1.0..200.0);
            let expected = brute_force(&points, cx, cy, radius);
            let actual = ids(&tree.query_circle(cx, cy, radius));
            assert_eq!(actual, expected, "query at ({cx}, {cy}) radius {radius}");
        }
    }

    #[test]
    fn midpoint_entries_are_neither_lost_nor_duplicated() {
        // Enough colocated midpoint entries to force several subdivisions.
        let points: Vec<(u64, f32, f32)> = (0..32).map(|id| (id, 50.0, 50.0)).collect();
        let params = TreeParams {
            leaf_capacity: 4,
            max_depth: 8,
        };
        let mut tree = QuadTree::new(100.0, 100.0, params).expect("tree");
        tree.rebuild(&points).expect("rebuild");

        let hits = tree.query_circle(50.0, 50.0, 0.5);
        assert_eq!(hits.len(), 32);
        assert_eq!(ids(&hits), (0..32).collect::<Vec<u64>>());
    }

    #[test]
    fn clustered_points_respect_depth_bound() {
        let points: Vec<(u64, f32, f32)> = (0..200).map(|id| (id, 10.0, 10.0)).collect();
        let params = TreeParams {
            leaf_capacity: 2,
            max_depth: 4,
        };
        let mut tree = QuadTree::new(640.0, 640.0, params).expect("tree");
        tree.rebuild(&points).expect("rebuild");

        let (_, _, depth) = tree.shape();
        assert!(depth <= 4, "depth {depth} exceeds bound");
        assert_eq!(tree.query_circle(10.0, 10.0, 1.0).len(), 200);
    }

    #[test]
    fn query_near_excludes_self_and_sorts_by_distance() {
        let points = vec![
            (1_u64, 10.0_f32, 10.0_f32),
            (2, 13.0, 10.0),
            (3, 11.0, 10.0),
            (4, 90.0, 90.0),
        ];
        let mut tree = QuadTree::new(100.0, 100.0, TreeParams::default()).expect("tree");
        tree.rebuild(&points).expect("rebuild");

        let near = tree.query_near(1, 5.0);
        let order: Vec<u64> = near.iter().map(|&(id, _)| id).collect();
        assert_eq!(order, vec![3, 2]);
        assert!(tree.query_near(99, 5.0).is_empty());
    }

    #[test]
    fn boundary_entries_survive_rebuild() {
        let points = vec![
            (1_u64, 0.0_f32, 0.0_f32),
            (2, 100.0, 100.0),
            (3, 100.0, 0.0),
            (4, 0.0, 100.0),
        ];
        let mut tree = QuadTree::new(100.0, 100.0, TreeParams::default()).expect("tree");
        tree.rebuild(&points).expect("rebuild");
        assert_eq!(ids(&tree.query_circle(50.0, 50.0, 80.0)), vec![1, 2, 3, 4]);
    }
}
