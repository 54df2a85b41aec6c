//! Triangle and edge connectivity used for silhouette detection
//!
//! Edges are matched between triangles by vertex position rather than index,
//! so meshes that duplicate vertices per face (for normals or texture seams)
//! still produce a closed edge list. An edge used by only one triangle is
//! degenerate and always counts as a silhouette candidate.

use std::collections::HashMap;

use crate::foundation::math::{Vec3, Vec4};

/// A triangle with its plane equation
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EdgeTriangle {
    /// Vertex indices, anticlockwise seen from the front
    pub vertices: [u32; 3],
    /// Plane coefficients `(normal, distance)` in object space
    pub plane: Vec4,
}

impl EdgeTriangle {
    /// True if a homogeneous light position lies in front of the triangle
    ///
    /// Works for point lights (`w = 1`) and directions towards a directional
    /// light (`w = 0`) alike.
    pub fn faces_light(&self, light: &Vec4) -> bool {
        self.plane.dot(light) > 0.0
    }
}

/// An edge shared by up to two triangles
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Edge {
    /// Triangle the edge was first seen in; `vertices` follow its winding
    pub triangle: usize,
    /// Triangle on the other side, if any
    pub other: Option<usize>,
    /// Vertex indices in the winding of `triangle`
    pub vertices: [u32; 2],
}

impl Edge {
    /// True if only one triangle uses this edge
    pub const fn is_degenerate(&self) -> bool {
        self.other.is_none()
    }
}

/// Triangles and welded edges of a mesh
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EdgeData {
    triangles: Vec<EdgeTriangle>,
    edges: Vec<Edge>,
    vertex_count: usize,
}

impl EdgeData {
    /// Build from positions and an indexed triangle list
    ///
    /// Trailing indices that do not form a whole triangle are ignored.
    pub fn build(positions: &[Vec3], indices: &[u32]) -> Self {
        let shared = weld_positions(positions);
        let mut triangles = Vec::with_capacity(indices.len() / 3);
        let mut edges: Vec<Edge> = Vec::new();
        // Unmatched edges keyed by shared start and end vertex
        let mut open: HashMap<(u32, u32), Vec<usize>> = HashMap::new();

        for tri in indices.chunks_exact(3) {
            let vertices = [tri[0], tri[1], tri[2]];
            let Some(corners) = vertices
                .iter()
                .map(|&v| positions.get(v as usize).copied())
                .collect::<Option<Vec<Vec3>>>()
            else {
                log::warn!("Skipping triangle {:?} with an out of range vertex", vertices);
                continue;
            };
            let triangle = triangles.len();
            triangles.push(EdgeTriangle {
                vertices,
                plane: triangle_plane(&corners[0], &corners[1], &corners[2]),
            });

            for i in 0..3 {
                let (v0, v1) = (vertices[i], vertices[(i + 1) % 3]);
                let (s0, s1) = (shared[v0 as usize], shared[v1 as usize]);
                let matched = open.get_mut(&(s1, s0)).and_then(Vec::pop);
                if let Some(edge) = matched {
                    edges[edge].other = Some(triangle);
                } else {
                    open.entry((s0, s1)).or_default().push(edges.len());
                    edges.push(Edge { triangle, other: None, vertices: [v0, v1] });
                }
            }
        }

        let degenerate = edges.iter().filter(|e| e.is_degenerate()).count();
        log::trace!(
            "Built edge list: {} triangles, {} edges ({} degenerate)",
            triangles.len(),
            edges.len(),
            degenerate
        );
        Self { triangles, edges, vertex_count: positions.len() }
    }

    /// Triangles in index order
    pub fn triangles(&self) -> &[EdgeTriangle] {
        &self.triangles
    }

    /// Edges
    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    /// Number of vertices the edge list was built from
    pub const fn vertex_count(&self) -> usize {
        self.vertex_count
    }

    /// True if every edge has a triangle on both sides
    pub fn is_closed(&self) -> bool {
        self.edges.iter().all(|e| !e.is_degenerate())
    }

    /// Classify every triangle against a homogeneous object space light position
    pub fn update_light_facing(&self, light: &Vec4, facing: &mut Vec<bool>) {
        facing.clear();
        facing.extend(self.triangles.iter().map(|t| t.faces_light(light)));
    }
}

/// Map every vertex to the first vertex sharing its exact position
fn weld_positions(positions: &[Vec3]) -> Vec<u32> {
    let mut first: HashMap<[u32; 3], u32> = HashMap::with_capacity(positions.len());
    positions
        .iter()
        .enumerate()
        .map(|(index, p)| {
            let key = [p.x.to_bits(), p.y.to_bits(), p.z.to_bits()];
            let index = u32::try_from(index).unwrap_or(u32::MAX);
            *first.entry(key).or_insert(index)
        })
        .collect()
}

fn triangle_plane(a: &Vec3, b: &Vec3, c: &Vec3) -> Vec4 {
    let normal = (b - a).cross(&(c - a)).try_normalize(f32::EPSILON).unwrap_or_else(Vec3::zeros);
    Vec4::new(normal.x, normal.y, normal.z, -normal.dot(a))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::mesh::box_geometry;

    #[test]
    fn test_cube_edges_are_welded_across_faces() {
        let (positions, indices) = box_geometry(Vec3::repeat(1.0));
        assert_eq!(positions.len(), 24);
        let edges = EdgeData::build(&positions, &indices);
        assert_eq!(edges.triangles().len(), 12);
        // Twelve cube edges plus one diagonal per face
        assert_eq!(edges.edges().len(), 18);
        assert!(edges.is_closed());
    }

    #[test]
    fn test_open_quad_has_degenerate_border() {
        let positions = vec![
            Vec3::new(-1.0, 0.0, -1.0),
            Vec3::new(-1.0, 0.0, 1.0),
            Vec3::new(1.0, 0.0, 1.0),
            Vec3::new(1.0, 0.0, -1.0),
        ];
        let edges = EdgeData::build(&positions, &[0, 1, 2, 0, 2, 3]);
        assert_eq!(edges.edges().len(), 5);
        assert_eq!(edges.edges().iter().filter(|e| e.is_degenerate()).count(), 4);
        assert!(!edges.is_closed());
    }

    #[test]
    fn test_light_facing_classification() {
        let (positions, indices) = box_geometry(Vec3::repeat(1.0));
        let edges = EdgeData::build(&positions, &indices);
        let mut facing = Vec::new();

        // Light straight above: only the two top triangles face it
        edges.update_light_facing(&Vec4::new(0.0, 1.0, 0.0, 0.0), &mut facing);
        assert_eq!(facing.iter().filter(|f| **f).count(), 2);

        // Point light off a corner sees three faces
        edges.update_light_facing(&Vec4::new(5.0, 5.0, 5.0, 1.0), &mut facing);
        assert_eq!(facing.iter().filter(|f| **f).count(), 6);
    }

    #[test]
    fn test_out_of_range_triangle_skipped() {
        let positions = vec![Vec3::zeros(), Vec3::x(), Vec3::y()];
        let edges = EdgeData::build(&positions, &[0, 1, 2, 0, 1, 9]);
        assert_eq!(edges.triangles().len(), 1);
        assert_eq!(edges.vertex_count(), 3);
    }
}
