//! Entities: placed instances of a mesh
//!
//! An entity draws one [`MeshSection`] per sub-mesh and casts one shadow
//! volume built from the mesh's shared edge list.

use std::cell::{Cell, RefCell};
use std::ops::Range;
use std::rc::Rc;

use crate::foundation::math::{Mat4, Mat4Ext, Transform, Vec3, Vec4};
use crate::render::camera::Camera;
use crate::render::light::{Light, LightHandle, LightList};
use crate::render::material::MaterialHandle;
use crate::render::queue::{RenderQueueGroupId, DEFAULT_PRIORITY};
use crate::render::render_system::{DeviceId, RenderSystem};
use crate::render::renderable::{BufferId, BufferIdAllocator, RenderOperation, Renderable, RenderableRef};
use crate::render::RenderResult;

use super::bounds::AABB;
use super::mesh::Mesh;
use super::shadow::caster::ShadowCaster;
use super::shadow::volume::{
    build_volume_vertices, generate_shadow_volume, ShadowIndexBuffer, ShadowRenderable, ShadowRenderableFlags,
};

/// One sub-mesh of an entity as the render queue sees it
#[derive(Debug)]
pub struct MeshSection {
    mesh: Rc<Mesh>,
    sub_mesh: usize,
    material: Cell<Option<MaterialHandle>>,
    world: Cell<Mat4>,
    centre: Cell<Vec3>,
    normalise_normals: Cell<bool>,
    lights: RefCell<LightList>,
}

impl MeshSection {
    /// Index of the sub-mesh drawn
    pub const fn sub_mesh(&self) -> usize {
        self.sub_mesh
    }

    /// Vertex buffer of the mesh
    pub fn vertex_buffer(&self) -> BufferId {
        self.mesh.vertex_buffer()
    }
}

impl Renderable for MeshSection {
    fn material(&self) -> Option<MaterialHandle> {
        self.material.get()
    }

    fn render_operation(&self) -> RenderOperation {
        self.mesh.render_operation(self.sub_mesh).unwrap_or_else(|| {
            RenderOperation::indexed_triangles(self.mesh.vertex_buffer(), 0, self.mesh.vertex_buffer(), 0, 0)
        })
    }

    fn world_transforms(&self, out: &mut Vec<Mat4>) {
        out.push(self.world.get());
    }

    fn squared_view_depth(&self, camera: &Camera) -> f32 {
        (self.centre.get() - camera.position()).norm_squared()
    }

    fn lights(&self) -> LightList {
        self.lights.borrow().clone()
    }

    fn normalise_normals(&self) -> bool {
        self.normalise_normals.get()
    }
}

/// What the shadow vertex buffer currently holds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ShadowVertices {
    /// Positions followed by `w = 0` copies, valid for every light
    Hardware,
    /// Positions extruded for one light
    Software,
}

#[derive(Debug, Default)]
struct ShadowScratch {
    facing: Vec<bool>,
    vertices: Vec<[f32; 4]>,
}

/// A mesh placed in the scene
#[derive(Debug)]
pub struct Entity {
    name: String,
    mesh: Rc<Mesh>,
    transform: Transform,
    world: Mat4,
    world_bounds: AABB,
    visible: bool,
    cast_shadows: bool,
    queue_group: RenderQueueGroupId,
    priority: u16,
    sections: Vec<Rc<MeshSection>>,
    shadow_vertex_buffer: BufferId,
    shadow_vertices: Cell<Option<(ShadowVertices, DeviceId)>>,
    scratch: RefCell<ShadowScratch>,
}

impl Entity {
    /// Place a mesh at the origin
    pub fn new(name: impl Into<String>, mesh: Rc<Mesh>, buffers: &mut BufferIdAllocator) -> Self {
        let sections = (0..mesh.sub_meshes().len())
            .map(|sub_mesh| {
                Rc::new(MeshSection {
                    mesh: Rc::clone(&mesh),
                    sub_mesh,
                    material: Cell::new(mesh.sub_meshes()[sub_mesh].material),
                    world: Cell::new(Mat4::identity()),
                    centre: Cell::new(mesh.bounds().center()),
                    normalise_normals: Cell::new(false),
                    lights: RefCell::new(Vec::new()),
                })
            })
            .collect();
        let world_bounds = *mesh.bounds();
        Self {
            name: name.into(),
            mesh,
            transform: Transform::identity(),
            world: Mat4::identity(),
            world_bounds,
            visible: true,
            cast_shadows: true,
            queue_group: RenderQueueGroupId::MAIN,
            priority: DEFAULT_PRIORITY,
            sections,
            shadow_vertex_buffer: buffers.allocate(),
            shadow_vertices: Cell::new(None),
            scratch: RefCell::new(ShadowScratch::default()),
        }
    }

    /// Entity name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Mesh drawn
    pub fn mesh(&self) -> &Rc<Mesh> {
        &self.mesh
    }

    /// Current transform
    pub const fn transform(&self) -> &Transform {
        &self.transform
    }

    /// Move, rotate or scale the entity
    pub fn set_transform(&mut self, transform: Transform) {
        self.world = transform.to_matrix();
        self.world_bounds = self.mesh.bounds().transformed(&self.world);
        let scaled = (transform.scale - Vec3::repeat(1.0)).abs().max() > f32::EPSILON;
        let centre = self.world_bounds.center();
        for section in &self.sections {
            section.world.set(self.world);
            section.centre.set(centre);
            section.normalise_normals.set(scaled);
        }
        self.transform = transform;
    }

    /// Object to world matrix
    pub const fn world_matrix(&self) -> &Mat4 {
        &self.world
    }

    /// Use one material for every sub-mesh
    pub fn set_material(&mut self, material: Option<MaterialHandle>) {
        for section in &self.sections {
            section.material.set(material);
        }
    }

    /// Use a material for one sub-mesh
    pub fn set_sub_material(&mut self, sub_mesh: usize, material: Option<MaterialHandle>) {
        if let Some(section) = self.sections.get(sub_mesh) {
            section.material.set(material);
        }
    }

    /// Whether the entity is drawn
    pub const fn is_visible(&self) -> bool {
        self.visible
    }

    /// Show or hide the entity
    pub fn set_visible(&mut self, visible: bool) {
        self.visible = visible;
    }

    /// Whether the entity is set to cast shadows
    pub const fn cast_shadows(&self) -> bool {
        self.cast_shadows
    }

    /// Enable or disable shadow casting
    pub fn set_cast_shadows(&mut self, cast: bool) {
        self.cast_shadows = cast;
    }

    /// Queue group the sections are added to
    pub const fn render_queue_group(&self) -> RenderQueueGroupId {
        self.queue_group
    }

    /// Move the entity to another queue group
    pub fn set_render_queue_group(&mut self, group: RenderQueueGroupId) {
        self.queue_group = group;
    }

    /// Priority inside the queue group
    pub const fn priority(&self) -> u16 {
        self.priority
    }

    /// Change the priority inside the queue group
    pub fn set_priority(&mut self, priority: u16) {
        self.priority = priority;
    }

    /// Sections in sub-mesh order
    pub fn sections(&self) -> &[Rc<MeshSection>] {
        &self.sections
    }

    /// Sections as queue entries
    pub fn renderables(&self) -> impl Iterator<Item = RenderableRef> + '_ {
        self.sections.iter().map(|section| Rc::clone(section) as RenderableRef)
    }

    /// Store the lights affecting the entity, nearest first
    pub fn set_lights(&self, lights: &[LightHandle]) {
        for section in &self.sections {
            let mut list = section.lights.borrow_mut();
            list.clear();
            list.extend_from_slice(lights);
        }
    }

    /// Vertex buffer holding the shadow volume vertices
    pub const fn shadow_vertex_buffer(&self) -> BufferId {
        self.shadow_vertex_buffer
    }

    /// Write the mesh to the device unless it already holds it
    pub fn upload(&self, device: &mut dyn RenderSystem) -> RenderResult<()> {
        self.mesh.upload(device)
    }
}

impl ShadowCaster for Entity {
    fn casts_shadows(&self) -> bool {
        self.visible && self.cast_shadows
    }

    fn world_bounding_box(&self) -> AABB {
        self.world_bounds
    }

    fn shadow_volume_renderables(
        &self,
        light: &Light,
        index_buffer: &mut ShadowIndexBuffer,
        flags: ShadowRenderableFlags,
        extrusion_distance: f32,
        device: &mut dyn RenderSystem,
    ) -> RenderResult<Vec<ShadowRenderable>> {
        let inverse = self.world.try_inverse().unwrap_or_else(Mat4::identity);
        let object_light: Vec4 = inverse.transform_vec4(&light.as_vec4());
        let scale = self.transform.max_scale();
        let object_distance = if scale > 0.0 { extrusion_distance / scale } else { extrusion_distance };
        let software = flags.contains(ShadowRenderableFlags::EXTRUDE_IN_SOFTWARE);

        let edges = self.mesh.edge_data();
        let mut scratch = self.scratch.borrow_mut();
        let ShadowScratch { facing, vertices } = &mut *scratch;
        edges.update_light_facing(&object_light, facing);

        let wanted = if software { ShadowVertices::Software } else { ShadowVertices::Hardware };
        let current = (wanted, device.device_id());
        if software || self.shadow_vertices.get() != Some(current) {
            build_volume_vertices(self.mesh.positions(), &object_light, object_distance, software, vertices);
            device.update_buffer(self.shadow_vertex_buffer, bytemuck::cast_slice(vertices.as_slice()))?;
            self.shadow_vertices.set(Some(current));
        }

        let ranges = generate_shadow_volume(edges, facing, light.is_directional(), flags, index_buffer);
        if ranges.volume.is_empty() && ranges.light_cap.is_none() {
            return Ok(Vec::new());
        }
        index_buffer.upload(device)?;

        let vertex_count = self.mesh.positions().len() * 2;
        let indices = index_buffer.buffer();
        let vertex_buffer = self.shadow_vertex_buffer;
        let operation = |range: Range<usize>| {
            RenderOperation::indexed_triangles(vertex_buffer, vertex_count, indices, range.start, range.len())
        };
        Ok(vec![ShadowRenderable {
            operation: operation(ranges.volume),
            light_cap: ranges.light_cap.map(operation),
            world: self.world,
        }])
    }
}
