//! Shared mesh geometry
//!
//! A mesh is a single position buffer plus one index list per sub-mesh. The
//! edge list used for shadow volumes covers every sub-mesh, so an entity
//! casts one volume no matter how many materials it is split into.

use std::cell::Cell;

use crate::foundation::math::Vec3;
use crate::render::material::MaterialHandle;
use crate::render::render_system::{DeviceId, RenderSystem};
use crate::render::renderable::{BufferId, BufferIdAllocator, RenderOperation};
use crate::render::RenderResult;

use super::bounds::AABB;
use super::edge_list::EdgeData;

/// One material's share of a mesh
#[derive(Debug, Clone)]
pub struct SubMesh {
    /// Triangle list indices into the mesh positions
    pub indices: Vec<u32>,
    /// Material; `None` uses the default material
    pub material: Option<MaterialHandle>,
    /// Device buffer holding `indices`
    pub index_buffer: BufferId,
}

/// Indexed triangle geometry with its edge list
#[derive(Debug)]
pub struct Mesh {
    name: String,
    positions: Vec<Vec3>,
    sub_meshes: Vec<SubMesh>,
    vertex_buffer: BufferId,
    bounds: AABB,
    edge_data: EdgeData,
    uploaded_to: Cell<Option<DeviceId>>,
}

impl Mesh {
    /// Create a mesh from positions and `(indices, material)` pairs
    pub fn new(
        name: impl Into<String>,
        positions: Vec<Vec3>,
        sub_meshes: Vec<(Vec<u32>, Option<MaterialHandle>)>,
        buffers: &mut BufferIdAllocator,
    ) -> Self {
        let all_indices: Vec<u32> = sub_meshes.iter().flat_map(|(indices, _)| indices.iter().copied()).collect();
        let edge_data = EdgeData::build(&positions, &all_indices);
        let bounds = AABB::from_points(positions.iter());
        let vertex_buffer = buffers.allocate();
        let sub_meshes = sub_meshes
            .into_iter()
            .map(|(indices, material)| SubMesh { indices, material, index_buffer: buffers.allocate() })
            .collect();
        let name = name.into();
        log::debug!("Created mesh '{}' with {} vertices", name, positions.len());
        Self {
            name,
            positions,
            sub_meshes,
            vertex_buffer,
            bounds,
            edge_data,
            uploaded_to: Cell::new(None),
        }
    }

    /// Axis aligned box centred on the origin
    pub fn cuboid(
        name: impl Into<String>,
        half_extents: Vec3,
        material: Option<MaterialHandle>,
        buffers: &mut BufferIdAllocator,
    ) -> Self {
        let (positions, indices) = box_geometry(half_extents);
        Self::new(name, positions, vec![(indices, material)], buffers)
    }

    /// Cube with the given edge length
    pub fn cube(
        name: impl Into<String>,
        size: f32,
        material: Option<MaterialHandle>,
        buffers: &mut BufferIdAllocator,
    ) -> Self {
        Self::cuboid(name, Vec3::repeat(size * 0.5), material, buffers)
    }

    /// Single sided ground plane in XZ facing +Y
    pub fn plane(
        name: impl Into<String>,
        width: f32,
        depth: f32,
        material: Option<MaterialHandle>,
        buffers: &mut BufferIdAllocator,
    ) -> Self {
        let (hw, hd) = (width * 0.5, depth * 0.5);
        let positions = vec![
            Vec3::new(-hw, 0.0, -hd),
            Vec3::new(-hw, 0.0, hd),
            Vec3::new(hw, 0.0, hd),
            Vec3::new(hw, 0.0, -hd),
        ];
        Self::new(name, positions, vec![(vec![0, 1, 2, 0, 2, 3], material)], buffers)
    }

    /// Mesh name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Vertex positions in object space
    pub fn positions(&self) -> &[Vec3] {
        &self.positions
    }

    /// Sub-meshes
    pub fn sub_meshes(&self) -> &[SubMesh] {
        &self.sub_meshes
    }

    /// Object space bounds
    pub const fn bounds(&self) -> &AABB {
        &self.bounds
    }

    /// Edge list over every sub-mesh
    pub const fn edge_data(&self) -> &EdgeData {
        &self.edge_data
    }

    /// Device buffer holding the positions
    pub const fn vertex_buffer(&self) -> BufferId {
        self.vertex_buffer
    }

    /// Geometry of one sub-mesh
    pub fn render_operation(&self, sub_mesh: usize) -> Option<RenderOperation> {
        self.sub_meshes.get(sub_mesh).map(|sub| {
            RenderOperation::indexed_triangles(
                self.vertex_buffer,
                self.positions.len(),
                sub.index_buffer,
                0,
                sub.indices.len(),
            )
        })
    }

    /// Write positions and indices to the device unless it already holds them
    pub fn upload(&self, device: &mut dyn RenderSystem) -> RenderResult<()> {
        let id = device.device_id();
        if self.uploaded_to.get() == Some(id) {
            return Ok(());
        }
        let vertices: Vec<[f32; 3]> = self.positions.iter().map(|p| [p.x, p.y, p.z]).collect();
        device.update_buffer(self.vertex_buffer, bytemuck::cast_slice(&vertices))?;
        for sub in &self.sub_meshes {
            device.update_buffer(sub.index_buffer, bytemuck::cast_slice(&sub.indices))?;
        }
        self.uploaded_to.set(Some(id));
        log::trace!("Uploaded mesh '{}'", self.name);
        Ok(())
    }
}

/// Positions and indices of a box with four vertices per face
///
/// Faces are wound anticlockwise seen from outside.
pub fn box_geometry(half_extents: Vec3) -> (Vec<Vec3>, Vec<u32>) {
    // (normal, u, v) with u x v = normal
    let faces = [
        (Vec3::x(), Vec3::y(), Vec3::z()),
        (-Vec3::x(), Vec3::z(), Vec3::y()),
        (Vec3::y(), Vec3::z(), Vec3::x()),
        (-Vec3::y(), Vec3::x(), Vec3::z()),
        (Vec3::z(), Vec3::x(), Vec3::y()),
        (-Vec3::z(), Vec3::y(), Vec3::x()),
    ];
    let mut positions = Vec::with_capacity(24);
    let mut indices = Vec::with_capacity(36);
    for (normal, u, v) in faces {
        let base = u32::try_from(positions.len()).unwrap_or(u32::MAX);
        for (su, sv) in [(-1.0, -1.0), (1.0, -1.0), (1.0, 1.0), (-1.0, 1.0)] {
            positions.push((normal + u * su + v * sv).component_mul(&half_extents));
        }
        indices.extend_from_slice(&[base, base + 1, base + 2, base, base + 2, base + 3]);
    }
    (positions, indices)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::recording::RecordingRenderSystem;
    use crate::render::render_system::RenderSystemCapabilities;
    use crate::render::DeviceCommand;
    use approx::assert_relative_eq;

    #[test]
    fn test_box_faces_wind_outwards() {
        let (positions, indices) = box_geometry(Vec3::repeat(1.0));
        for tri in indices.chunks_exact(3) {
            let [a, b, c] = [tri[0], tri[1], tri[2]].map(|i| positions[i as usize]);
            let normal = (b - a).cross(&(c - a));
            let centre = (a + b + c) / 3.0;
            assert!(normal.dot(&centre) > 0.0);
        }
    }

    #[test]
    fn test_cube_bounds_and_operation() {
        let mut buffers = BufferIdAllocator::new();
        let mesh = Mesh::cube("crate", 2.0, None, &mut buffers);
        assert_relative_eq!(mesh.bounds().max, Vec3::repeat(1.0));
        assert_relative_eq!(mesh.bounds().min, Vec3::repeat(-1.0));
        let op = mesh.render_operation(0).unwrap();
        assert_eq!(op.index_count, 36);
        assert_eq!(op.vertex_count, 24);
        assert!(mesh.render_operation(1).is_none());
        assert_eq!(mesh.name(), "crate");
    }

    #[test]
    fn test_upload_happens_once() {
        let mut buffers = BufferIdAllocator::new();
        let mesh = Mesh::plane("ground", 10.0, 10.0, None, &mut buffers);
        let mut device = RecordingRenderSystem::new(RenderSystemCapabilities::full());
        mesh.upload(&mut device).unwrap();
        mesh.upload(&mut device).unwrap();
        let uploads = device.count(|c| matches!(c, DeviceCommand::UpdateBuffer { .. }));
        assert_eq!(uploads, 2);
        assert!(!mesh.edge_data().is_closed());
    }

    #[test]
    fn test_upload_repeats_for_another_device() {
        let mut buffers = BufferIdAllocator::new();
        let mesh = Mesh::plane("ground", 10.0, 10.0, None, &mut buffers);
        let mut first = RecordingRenderSystem::new(RenderSystemCapabilities::full());
        let mut second = RecordingRenderSystem::new(RenderSystemCapabilities::full());
        mesh.upload(&mut first).unwrap();
        mesh.upload(&mut second).unwrap();
        mesh.upload(&mut second).unwrap();
        for device in [&first, &second] {
            assert_eq!(device.count(|c| matches!(c, DeviceCommand::UpdateBuffer { .. })), 2);
        }
    }
}
