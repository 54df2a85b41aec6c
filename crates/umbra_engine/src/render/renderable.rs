//! Renderable geometry as seen by the render queue
//!
//! A renderable is the smallest unit the queue sorts: one material, one
//! geometry operation, one or more world transforms. The queue stores
//! renderables behind `Rc` and compares them by address.

use std::rc::Rc;

use crate::foundation::math::Mat4;

use super::camera::Camera;
use super::light::LightList;
use super::material::MaterialHandle;

/// Identifier of a geometry buffer owned by the render system
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BufferId(pub u64);

/// Hands out unique buffer ids
#[derive(Debug, Default)]
pub struct BufferIdAllocator {
    next: u64,
}

impl BufferIdAllocator {
    /// Create an allocator starting at id 1
    pub fn new() -> Self {
        Self { next: 1 }
    }

    /// Allocate the next id
    pub fn allocate(&mut self) -> BufferId {
        let id = BufferId(self.next.max(1));
        self.next = id.0 + 1;
        id
    }
}

/// Primitive topology
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationType {
    /// Points
    PointList,
    /// Independent lines
    LineList,
    /// Connected lines
    LineStrip,
    /// Independent triangles
    TriangleList,
    /// Connected triangles
    TriangleStrip,
    /// Triangles sharing the first vertex
    TriangleFan,
}

/// Geometry to draw
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderOperation {
    /// Topology
    pub operation_type: OperationType,
    /// Vertex buffer
    pub vertex_buffer: BufferId,
    /// First vertex used
    pub vertex_start: usize,
    /// Number of vertices
    pub vertex_count: usize,
    /// Index buffer, if indexed
    pub index_buffer: Option<BufferId>,
    /// First index used
    pub index_start: usize,
    /// Number of indices
    pub index_count: usize,
}

impl RenderOperation {
    /// Indexed triangle list
    pub const fn indexed_triangles(
        vertex_buffer: BufferId,
        vertex_count: usize,
        index_buffer: BufferId,
        index_start: usize,
        index_count: usize,
    ) -> Self {
        Self {
            operation_type: OperationType::TriangleList,
            vertex_buffer,
            vertex_start: 0,
            vertex_count,
            index_buffer: Some(index_buffer),
            index_start,
            index_count,
        }
    }

    /// True if drawing would produce nothing
    pub fn is_empty(&self) -> bool {
        self.vertex_count == 0 || (self.index_buffer.is_some() && self.index_count == 0)
    }

    /// Number of primitives drawn
    pub const fn primitive_count(&self) -> usize {
        let count = if self.index_buffer.is_some() { self.index_count } else { self.vertex_count };
        match self.operation_type {
            OperationType::PointList => count,
            OperationType::LineList => count / 2,
            OperationType::LineStrip => count.saturating_sub(1),
            OperationType::TriangleList => count / 3,
            OperationType::TriangleStrip | OperationType::TriangleFan => count.saturating_sub(2),
        }
    }
}

/// Something the render queue can draw
pub trait Renderable {
    /// Material to draw with; `None` uses the default material
    fn material(&self) -> Option<MaterialHandle>;

    /// Geometry to draw
    fn render_operation(&self) -> RenderOperation;

    /// Append world transforms; more than one means blended geometry
    fn world_transforms(&self, out: &mut Vec<Mat4>);

    /// Squared distance from the camera, used for back to front sorting
    fn squared_view_depth(&self, camera: &Camera) -> f32;

    /// Lights affecting this renderable, nearest first
    fn lights(&self) -> LightList;

    /// Draw with an identity view matrix
    fn use_identity_view(&self) -> bool {
        false
    }

    /// Draw with an identity projection matrix
    fn use_identity_projection(&self) -> bool {
        false
    }

    /// Renormalise normals after transform, for scaled geometry
    fn normalise_normals(&self) -> bool {
        false
    }
}

/// Shared renderable reference held by the queue
pub type RenderableRef = Rc<dyn Renderable>;

/// Address of a renderable, used for identity and as the final sort tie-break
pub fn renderable_address(renderable: &RenderableRef) -> usize {
    Rc::as_ptr(renderable).cast::<()>() as usize
}
