//! Shadow volume geometry
//!
//! Volumes are built in the caster's object space. The vertex buffer holds
//! the original positions followed by one extruded copy of each; with
//! hardware extrusion the copy is the same position with `w = 0` and the
//! extrusion program moves it away from the light.

use std::ops::Range;

use bitflags::bitflags;

use crate::foundation::math::{Mat4, Vec3, Vec4};
use crate::render::camera::Camera;
use crate::render::light::LightList;
use crate::render::material::MaterialHandle;
use crate::render::render_system::RenderSystem;
use crate::render::renderable::{BufferId, RenderOperation, Renderable};
use crate::render::RenderResult;
use crate::scene::bounds::AABB;
use crate::scene::edge_list::EdgeData;

bitflags! {
    /// What a generated shadow volume includes and how it is extruded
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ShadowRenderableFlags: u8 {
        /// Close the volume at the caster with its light facing triangles
        const INCLUDE_LIGHT_CAP = 1 << 0;
        /// Close the far end of the volume
        const INCLUDE_DARK_CAP = 1 << 1;
        /// Extruded vertices sit at infinity
        const EXTRUDE_TO_INFINITY = 1 << 2;
        /// Extrusion is done on the CPU
        const EXTRUDE_IN_SOFTWARE = 1 << 3;
    }
}

/// Fixed capacity index storage shared by every caster of a light
///
/// Each caster rewrites it from the start; triangles beyond the capacity are
/// dropped with a warning.
#[derive(Debug)]
pub struct ShadowIndexBuffer {
    buffer: BufferId,
    capacity: usize,
    indices: Vec<u32>,
    overflowed: bool,
}

impl ShadowIndexBuffer {
    /// Create a buffer holding at most `capacity` indices
    pub fn new(buffer: BufferId, capacity: usize) -> Self {
        Self { buffer, capacity, indices: Vec::with_capacity(capacity), overflowed: false }
    }

    /// Device buffer id
    pub const fn buffer(&self) -> BufferId {
        self.buffer
    }

    /// Maximum number of indices
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Change the capacity; current contents are discarded
    pub fn set_capacity(&mut self, capacity: usize) {
        self.capacity = capacity;
        self.reset();
    }

    /// Indices written since the last reset
    pub fn indices(&self) -> &[u32] {
        &self.indices
    }

    /// Number of indices written
    pub fn len(&self) -> usize {
        self.indices.len()
    }

    /// True if nothing has been written
    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    /// True if a triangle was dropped since the last reset
    pub const fn overflowed(&self) -> bool {
        self.overflowed
    }

    /// Discard the contents
    pub fn reset(&mut self) {
        self.indices.clear();
        self.overflowed = false;
    }

    fn push_triangle(&mut self, triangle: [u32; 3]) {
        if self.indices.len() + 3 > self.capacity {
            self.overflowed = true;
            return;
        }
        self.indices.extend_from_slice(&triangle);
    }

    /// Write the contents to the device
    pub fn upload(&self, device: &mut dyn RenderSystem) -> RenderResult<()> {
        device.update_buffer(self.buffer, bytemuck::cast_slice(&self.indices))
    }
}

/// Index ranges written for one volume
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShadowVolumeIndices {
    /// Sides plus any caps drawn with them
    pub volume: Range<usize>,
    /// Light cap drawn on its own, when separate
    pub light_cap: Option<Range<usize>>,
}

/// Write the index list of a shadow volume
///
/// `facing` holds the light facing flag of every triangle of `edges`. The
/// extruded copy of vertex `i` is `i + edges.vertex_count()`. With hardware
/// extrusion the light cap is written after the volume so it can be drawn
/// separately.
pub fn generate_shadow_volume(
    edges: &EdgeData,
    facing: &[bool],
    directional: bool,
    flags: ShadowRenderableFlags,
    out: &mut ShadowIndexBuffer,
) -> ShadowVolumeIndices {
    let n = u32::try_from(edges.vertex_count()).unwrap_or(u32::MAX);
    let faces = |t: usize| facing.get(t).copied().unwrap_or(false);
    // Directional volumes extruded to infinity converge on a single point
    let single_triangle_sides = directional && flags.contains(ShadowRenderableFlags::EXTRUDE_TO_INFINITY);
    let separate_light_cap = !flags.contains(ShadowRenderableFlags::EXTRUDE_IN_SOFTWARE);

    out.reset();
    for edge in edges.edges() {
        let first = faces(edge.triangle);
        let silhouette = match edge.other {
            None => true,
            Some(other) => first != faces(other),
        };
        if !silhouette {
            continue;
        }
        let [v0, v1] = edge.vertices;
        if first {
            out.push_triangle([v1, v0, v0 + n]);
            if !single_triangle_sides {
                out.push_triangle([v0 + n, v1 + n, v1]);
            }
        } else {
            out.push_triangle([v0, v1, v1 + n]);
            if !single_triangle_sides {
                out.push_triangle([v1 + n, v0 + n, v0]);
            }
        }
    }

    if flags.contains(ShadowRenderableFlags::INCLUDE_DARK_CAP) {
        for (index, triangle) in edges.triangles().iter().enumerate() {
            if faces(index) {
                let [a, b, c] = triangle.vertices;
                out.push_triangle([b + n, a + n, c + n]);
            }
        }
    }

    let light_cap_start = out.len();
    if flags.contains(ShadowRenderableFlags::INCLUDE_LIGHT_CAP) {
        for (index, triangle) in edges.triangles().iter().enumerate() {
            if faces(index) {
                out.push_triangle(triangle.vertices);
            }
        }
    }

    if out.overflowed() {
        log::warn!(
            "Shadow index buffer capacity of {} exceeded; volume truncated",
            out.capacity()
        );
    }

    let end = out.len();
    if flags.contains(ShadowRenderableFlags::INCLUDE_LIGHT_CAP) && separate_light_cap {
        ShadowVolumeIndices { volume: 0..light_cap_start, light_cap: Some(light_cap_start..end) }
    } else {
        ShadowVolumeIndices { volume: 0..end, light_cap: None }
    }
}

/// Fill the extruded vertex buffer contents
///
/// Software extrusion pushes every vertex `distance` away from the light;
/// otherwise the copy keeps its position with `w = 0` for the GPU to extrude.
pub fn build_volume_vertices(
    positions: &[Vec3],
    light: &Vec4,
    distance: f32,
    software: bool,
    out: &mut Vec<[f32; 4]>,
) {
    out.clear();
    out.extend(positions.iter().map(|p| [p.x, p.y, p.z, 1.0]));
    if software {
        out.extend(positions.iter().map(|p| {
            let e = p + extrusion_direction(p, light) * distance;
            [e.x, e.y, e.z, 1.0]
        }));
    } else {
        out.extend(positions.iter().map(|p| [p.x, p.y, p.z, 0.0]));
    }
}

fn extrusion_direction(point: &Vec3, light: &Vec4) -> Vec3 {
    let away = if light.w == 0.0 { -light.xyz() } else { point - light.xyz() };
    away.try_normalize(f32::EPSILON).unwrap_or_else(Vec3::zeros)
}

/// Box around the far end of a caster's extruded bounds
pub fn extrude_bounds(bounds: &AABB, light: &Vec4, distance: f32) -> AABB {
    if bounds.is_null() {
        return *bounds;
    }
    let corners = bounds.corners().map(|c| c + extrusion_direction(&c, light) * distance);
    AABB::from_points(corners.iter())
}

/// A generated shadow volume ready to draw
#[derive(Debug, Clone)]
pub struct ShadowRenderable {
    /// Volume geometry
    pub operation: RenderOperation,
    /// Separately drawn light cap geometry
    pub light_cap: Option<RenderOperation>,
    /// Caster world transform
    pub world: Mat4,
}

impl ShadowRenderable {
    /// Light cap as a renderable of its own
    pub fn light_cap_renderable(&self) -> Option<Self> {
        self.light_cap.map(|operation| Self { operation, light_cap: None, world: self.world })
    }
}

impl Renderable for ShadowRenderable {
    fn material(&self) -> Option<MaterialHandle> {
        None
    }

    fn render_operation(&self) -> RenderOperation {
        self.operation
    }

    fn world_transforms(&self, out: &mut Vec<Mat4>) {
        out.push(self.world);
    }

    fn squared_view_depth(&self, camera: &Camera) -> f32 {
        let origin = Vec3::new(self.world[(0, 3)], self.world[(1, 3)], self.world[(2, 3)]);
        (origin - camera.position()).norm_squared()
    }

    fn lights(&self) -> LightList {
        Vec::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::mesh::box_geometry;
    use approx::assert_relative_eq;

    fn cube_edges() -> (Vec<Vec3>, EdgeData) {
        let (positions, indices) = box_geometry(Vec3::repeat(1.0));
        let edges = EdgeData::build(&positions, &indices);
        (positions, edges)
    }

    fn overhead_facing(edges: &EdgeData) -> Vec<bool> {
        let mut facing = Vec::new();
        edges.update_light_facing(&Vec4::new(0.0, 1.0, 0.0, 0.0), &mut facing);
        facing
    }

    #[test]
    fn test_silhouette_sides_and_dark_cap() {
        let (_, edges) = cube_edges();
        let facing = overhead_facing(&edges);
        let mut buffer = ShadowIndexBuffer::new(BufferId(1), 1024);
        let flags = ShadowRenderableFlags::EXTRUDE_IN_SOFTWARE | ShadowRenderableFlags::INCLUDE_DARK_CAP;
        let ranges = generate_shadow_volume(&edges, &facing, true, flags, &mut buffer);
        // Four silhouette edges as quads plus the two extruded top triangles
        assert_eq!(ranges.volume, 0..30);
        assert!(ranges.light_cap.is_none());
        assert!(buffer.indices()[..24].iter().any(|&i| i >= 24));
    }

    #[test]
    fn test_infinite_directional_sides_are_single_triangles() {
        let (_, edges) = cube_edges();
        let facing = overhead_facing(&edges);
        let mut buffer = ShadowIndexBuffer::new(BufferId(1), 1024);
        let ranges = generate_shadow_volume(
            &edges,
            &facing,
            true,
            ShadowRenderableFlags::EXTRUDE_TO_INFINITY,
            &mut buffer,
        );
        assert_eq!(ranges.volume.len(), 12);
    }

    #[test]
    fn test_hardware_light_cap_is_separate() {
        let (_, edges) = cube_edges();
        let facing = overhead_facing(&edges);
        let mut buffer = ShadowIndexBuffer::new(BufferId(1), 1024);
        let ranges = generate_shadow_volume(
            &edges,
            &facing,
            false,
            ShadowRenderableFlags::INCLUDE_LIGHT_CAP | ShadowRenderableFlags::INCLUDE_DARK_CAP,
            &mut buffer,
        );
        assert_eq!(ranges.volume, 0..30);
        assert_eq!(ranges.light_cap, Some(30..36));
        assert_eq!(&buffer.indices()[30..33], &edges.triangles()[4].vertices);
    }

    #[test]
    fn test_software_light_cap_joins_volume() {
        let (_, edges) = cube_edges();
        let facing = overhead_facing(&edges);
        let mut buffer = ShadowIndexBuffer::new(BufferId(1), 1024);
        let flags = ShadowRenderableFlags::EXTRUDE_IN_SOFTWARE | ShadowRenderableFlags::INCLUDE_LIGHT_CAP;
        let ranges = generate_shadow_volume(&edges, &facing, false, flags, &mut buffer);
        assert_eq!(ranges.volume, 0..30);
        assert!(ranges.light_cap.is_none());
    }

    #[test]
    fn test_overflow_truncates_to_whole_triangles() {
        let (_, edges) = cube_edges();
        let facing = overhead_facing(&edges);
        let mut buffer = ShadowIndexBuffer::new(BufferId(1), 10);
        let ranges = generate_shadow_volume(
            &edges,
            &facing,
            false,
            ShadowRenderableFlags::EXTRUDE_IN_SOFTWARE,
            &mut buffer,
        );
        assert!(buffer.overflowed());
        assert_eq!(ranges.volume, 0..9);
    }

    #[test]
    fn test_software_extrusion_moves_away_from_light() {
        let positions = vec![Vec3::new(0.0, 1.0, 0.0)];
        let mut vertices = Vec::new();
        build_volume_vertices(&positions, &Vec4::new(0.0, 5.0, 0.0, 1.0), 10.0, true, &mut vertices);
        assert_eq!(vertices.len(), 2);
        assert_relative_eq!(vertices[1][1], -9.0);
        build_volume_vertices(&positions, &Vec4::new(0.0, 1.0, 0.0, 0.0), 10.0, false, &mut vertices);
        assert_eq!(vertices[1], [0.0, 1.0, 0.0, 0.0]);
    }

    #[test]
    fn test_extrude_bounds_for_directional_light() {
        let bounds = AABB::from_center_extents(Vec3::zeros(), Vec3::repeat(1.0));
        let far = extrude_bounds(&bounds, &Vec4::new(0.0, 1.0, 0.0, 0.0), 100.0);
        assert_relative_eq!(far.center(), Vec3::new(0.0, -100.0, 0.0));
        assert_relative_eq!(far.extents(), Vec3::repeat(1.0));
    }
}
