//! # Scene Manager
//!
//! Owns the scene (entities, lights, materials) and drives one frame:
//!
//! 1. Run controllers with the frame delta
//! 2. Pick the shadow technique the device can actually run
//! 3. Refresh object bounds and upload geometry
//! 4. Find the lights affecting the camera
//! 5. Render every shadow texture when texture shadows are active
//! 6. Populate, sort and render the main render queue

use std::rc::Rc;

use slotmap::SlotMap;

use crate::config::ConfigError;
use crate::core::config::{SceneManagerConfig, ShadowSettings, ShadowTechnique};
use crate::foundation::time::{TimeSource, Timer};
use crate::render::camera::Camera;
use crate::render::colour::Colour;
use crate::render::gpu_program::ShadowVolumeExtrudeProgram;
use crate::render::light::{Light, LightHandle};
use crate::render::material::MaterialManager;
use crate::render::pass::FogSettings;
use crate::render::queue::RenderQueue;
use crate::render::render_system::{Capabilities, FrameBufferType, RenderSystem, ViewportRect};
use crate::render::renderable::BufferIdAllocator;
use crate::render::RenderResult;

use super::controller::{Controller, ControllerManager};
use super::entity::Entity;
use super::frame::{FrameContext, FrameRenderer, FrameStats, IlluminationRenderStage};
use super::mesh::Mesh;
use super::pass_state::PassStateCache;
use super::scene_graph::{ObjectHandle, SceneGraph, SimpleListGraph};
use super::shadow::caster::ShadowCaster;
use super::shadow::passes::{FullScreenQuad, ShadowPasses};
use super::shadow::stencil::StencilVolumeMode;
use super::shadow::texture::{receiver_fade, ShadowTexturePool};
use super::shadow::volume::ShadowIndexBuffer;

/// One render of the queue from one camera
struct FramePass<'a> {
    camera: &'a Camera,
    viewport: ViewportRect,
    stage: IlluminationRenderStage,
    technique: ShadowTechnique,
    lights_affecting_frustum: &'a [LightHandle],
    volume_mode: StencilVolumeMode,
    extrusion_syntax: Option<&'static str>,
}

/// Scene owner and per-frame render orchestrator
pub struct SceneManager {
    config: SceneManagerConfig,
    materials: MaterialManager,
    queue: RenderQueue,
    lights: SlotMap<LightHandle, Light>,
    entities: SlotMap<ObjectHandle, Entity>,
    graph: Box<dyn SceneGraph>,
    buffers: BufferIdAllocator,
    shadow_passes: ShadowPasses,
    quad: FullScreenQuad,
    shadow_textures: ShadowTexturePool,
    index_buffer: ShadowIndexBuffer,
    pass_state: PassStateCache,
    controllers: ControllerManager<SceneManager>,
    timer: Timer,
    last_stats: FrameStats,
    downgrade_reported: bool,
}

impl std::fmt::Debug for SceneManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SceneManager")
            .field("technique", &self.config.shadows.technique)
            .field("entities", &self.entities.len())
            .field("lights", &self.lights.len())
            .field("controllers", &self.controllers)
            .finish_non_exhaustive()
    }
}

impl SceneManager {
    /// Create a scene manager from a validated configuration
    pub fn new(config: SceneManagerConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let mut materials = MaterialManager::new();
        let shadow_passes = ShadowPasses::create(materials.passes_mut(), config.shadows.colour);
        let mut buffers = BufferIdAllocator::new();
        let quad = FullScreenQuad::new(&mut buffers);
        let index_buffer = ShadowIndexBuffer::new(buffers.allocate(), config.shadows.index_buffer_size);
        log::info!("Scene manager created with {:?} shadows", config.shadows.technique);

        Ok(Self {
            config,
            materials,
            queue: RenderQueue::new(),
            lights: SlotMap::with_key(),
            entities: SlotMap::with_key(),
            graph: Box::new(SimpleListGraph::new()),
            buffers,
            shadow_passes,
            quad,
            shadow_textures: ShadowTexturePool::new(),
            index_buffer,
            pass_state: PassStateCache::new(),
            controllers: ControllerManager::new(),
            timer: Timer::new(),
            last_stats: FrameStats::default(),
            downgrade_reported: false,
        })
    }

    /// Replace the spatial index; existing entities are re-added
    pub fn set_scene_graph(&mut self, mut graph: Box<dyn SceneGraph>) {
        graph.clear();
        for (handle, entity) in &self.entities {
            graph.add(handle, entity.world_bounding_box());
        }
        self.graph = graph;
    }

    /// Current configuration
    pub const fn config(&self) -> &SceneManagerConfig {
        &self.config
    }

    /// Shadow options
    pub const fn shadow_settings(&self) -> &ShadowSettings {
        &self.config.shadows
    }

    /// Select the shadow technique
    pub fn set_shadow_technique(&mut self, technique: ShadowTechnique) {
        if self.config.shadows.technique != technique {
            log::info!("Shadow technique changed to {:?}", technique);
            self.config.shadows.technique = technique;
            self.downgrade_reported = false;
        }
    }

    /// Colour shadowed areas are multiplied by in modulative techniques
    pub fn set_shadow_colour(&mut self, colour: Colour) {
        self.config.shadows.colour = colour;
    }

    /// Size and number of shadow textures; the pool is rebuilt on the next frame
    pub fn set_shadow_texture_settings(&mut self, size: u32, count: usize) {
        self.config.shadows.texture_size = size.max(1);
        self.config.shadows.texture_count = count.max(1);
    }

    /// Distance beyond which casters are ignored; zero disables the limit
    pub fn set_shadow_far_distance(&mut self, distance: f32) {
        self.config.shadows.far_distance = distance.max(0.0);
    }

    /// How far directional light volumes are extruded
    pub fn set_shadow_dir_light_extrusion_distance(&mut self, distance: f32) {
        self.config.shadows.dir_light_extrusion_distance = distance;
    }

    /// Number of indices the shared shadow index buffer can hold
    pub fn set_shadow_index_buffer_size(&mut self, size: usize) {
        self.config.shadows.index_buffer_size = size;
    }

    /// Draw shadow volumes visibly
    pub fn set_show_debug_shadows(&mut self, show: bool) {
        self.config.shadows.debug_shadows = show;
    }

    /// Scene ambient light
    pub fn set_ambient_light(&mut self, colour: Colour) {
        self.config.ambient_light = colour;
    }

    /// Scene fog
    pub fn set_fog(&mut self, fog: FogSettings) {
        self.config.fog = fog;
    }

    /// Materials and passes
    pub const fn materials(&self) -> &MaterialManager {
        &self.materials
    }

    /// Materials and passes, mutably
    pub fn materials_mut(&mut self) -> &mut MaterialManager {
        &mut self.materials
    }

    /// The render queue as populated by the last frame
    pub const fn render_queue(&self) -> &RenderQueue {
        &self.queue
    }

    /// The render queue, for configuring groups before rendering
    pub fn render_queue_mut(&mut self) -> &mut RenderQueue {
        &mut self.queue
    }

    /// Built-in shadow passes
    pub const fn shadow_passes(&self) -> ShadowPasses {
        self.shadow_passes
    }

    /// Shadow texture pool
    pub const fn shadow_textures(&self) -> &ShadowTexturePool {
        &self.shadow_textures
    }

    /// Buffer ids for meshes created outside the scene manager
    pub fn buffers_mut(&mut self) -> &mut BufferIdAllocator {
        &mut self.buffers
    }

    /// Counters of the last rendered frame
    pub const fn last_frame_stats(&self) -> &FrameStats {
        &self.last_stats
    }

    /// Add a light
    pub fn create_light(&mut self, light: Light) -> LightHandle {
        log::debug!("Created {:?} light", light.light_type);
        self.lights.insert(light)
    }

    /// Look up a light
    pub fn light(&self, handle: LightHandle) -> Option<&Light> {
        self.lights.get(handle)
    }

    /// Look up a light mutably
    pub fn light_mut(&mut self, handle: LightHandle) -> Option<&mut Light> {
        self.lights.get_mut(handle)
    }

    /// Remove a light
    pub fn destroy_light(&mut self, handle: LightHandle) -> Option<Light> {
        self.lights.remove(handle)
    }

    /// Every light with its handle
    pub fn lights(&self) -> impl Iterator<Item = (LightHandle, &Light)> {
        self.lights.iter()
    }

    /// Create a mesh using this manager's buffer ids
    pub fn create_mesh(&mut self, build: impl FnOnce(&mut BufferIdAllocator) -> Mesh) -> Rc<Mesh> {
        Rc::new(build(&mut self.buffers))
    }

    /// Add an entity showing a mesh
    pub fn create_entity(&mut self, name: impl Into<String>, mesh: Rc<Mesh>) -> ObjectHandle {
        let entity = Entity::new(name, mesh, &mut self.buffers);
        let bounds = entity.world_bounding_box();
        let handle = self.entities.insert(entity);
        self.graph.add(handle, bounds);
        handle
    }

    /// Look up an entity
    pub fn entity(&self, handle: ObjectHandle) -> Option<&Entity> {
        self.entities.get(handle)
    }

    /// Look up an entity mutably
    ///
    /// Bounds changed through the returned entity reach the scene graph at
    /// the start of the next frame.
    pub fn entity_mut(&mut self, handle: ObjectHandle) -> Option<&mut Entity> {
        self.entities.get_mut(handle)
    }

    /// Remove an entity
    pub fn destroy_entity(&mut self, handle: ObjectHandle) -> Option<Entity> {
        self.graph.remove(handle);
        self.entities.remove(handle)
    }

    /// Number of entities
    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }

    /// Register a controller run at the start of every frame
    pub fn add_controller(&mut self, controller: impl Controller<Self> + 'static) {
        self.controllers.add(controller);
    }

    /// Controller manager, for time scaling
    pub fn controllers_mut(&mut self) -> &mut ControllerManager<Self> {
        &mut self.controllers
    }

    /// Where controller deltas come from; a fixed step makes frames repeatable
    pub fn set_time_source(&mut self, source: TimeSource) {
        self.timer.set_source(source);
    }

    /// Frame clock
    pub const fn timer(&self) -> &Timer {
        &self.timer
    }

    /// Run every controller with a frame delta
    ///
    /// Controllers may add further controllers; those first run next frame.
    pub fn update_controllers(&mut self, delta_time: f32) {
        let mut controllers = std::mem::take(&mut self.controllers);
        controllers.update(delta_time, self);
        let mut added = std::mem::replace(&mut self.controllers, controllers);
        self.controllers.append(&mut added);
    }

    /// Release shadow textures held on a device
    pub fn destroy_shadow_textures(&mut self, device: &mut dyn RenderSystem) {
        self.shadow_textures.destroy(device);
    }

    /// Technique the device can run, falling back to no shadows
    pub fn effective_shadow_technique(&mut self, device: &dyn RenderSystem) -> ShadowTechnique {
        let requested = self.config.shadows.technique;
        let capabilities = device.capabilities();
        let missing = if requested.is_stencil_based() && !capabilities.supports(Capabilities::HW_STENCIL) {
            Some("a hardware stencil buffer")
        } else if requested.is_texture_based() && !capabilities.supports(Capabilities::RENDER_TO_TEXTURE) {
            Some("render to texture")
        } else {
            None
        };
        match missing {
            Some(feature) => {
                if !self.downgrade_reported {
                    log::warn!("{:?} shadows need {}; rendering without shadows", requested, feature);
                    self.downgrade_reported = true;
                }
                ShadowTechnique::None
            }
            None => requested,
        }
    }

    /// Visible lights that reach the camera's view, nearest first
    pub fn lights_affecting_camera(&self, camera: &Camera) -> Vec<LightHandle> {
        let mut found: Vec<(LightHandle, f32)> = self
            .lights
            .iter()
            .filter(|(_, light)| light.affects_camera(camera))
            .map(|(handle, light)| {
                let distance = if light.is_directional() {
                    0.0
                } else {
                    (light.position - camera.position()).norm_squared()
                };
                (handle, distance)
            })
            .collect();
        found.sort_by(|a, b| a.1.total_cmp(&b.1));
        found.into_iter().map(|(handle, _)| handle).collect()
    }

    /// Render one frame from a camera into the main target
    pub fn render_scene(
        &mut self,
        camera: &Camera,
        viewport: ViewportRect,
        device: &mut dyn RenderSystem,
    ) -> RenderResult<FrameStats> {
        self.timer.update();
        self.update_controllers(self.timer.delta_time());

        let technique = self.effective_shadow_technique(device);
        let settings = self.config.shadows.clone();
        let volume_mode = StencilVolumeMode::for_device(device.capabilities(), settings.use_infinite_far_plane);
        let extrusion_syntax = if technique.is_stencil_based() && !volume_mode.extrude_in_software {
            Some(ShadowVolumeExtrudeProgram::syntax(device.capabilities())?)
        } else {
            None
        };
        if self.index_buffer.capacity() != settings.index_buffer_size {
            self.index_buffer.set_capacity(settings.index_buffer_size);
        }

        self.pass_state.invalidate();
        for (handle, entity) in &self.entities {
            self.graph.update(handle, entity.world_bounding_box());
            entity.upload(device)?;
        }
        self.quad.upload(device)?;

        let lights_affecting = self.lights_affecting_camera(camera);
        log::trace!("{} lights affect the camera", lights_affecting.len());

        self.shadow_passes.set_shadow_colour(self.materials.passes_mut(), settings.colour);
        if technique.is_texture_based() {
            self.shadow_passes
                .set_receiver_fade(self.materials.passes_mut(), receiver_fade(camera, &settings));
        }

        device.begin_frame();
        let mut stats = FrameStats::default();

        if technique.is_texture_based() {
            self.shadow_textures.ensure(settings.texture_size, settings.texture_count, device)?;
            let casting: Vec<(LightHandle, &Light)> = lights_affecting
                .iter()
                .filter_map(|&handle| self.lights.get(handle).map(|light| (handle, light)))
                .collect();
            let updates = self.shadow_textures.prepare(camera, &casting, &settings);
            for update in updates {
                let Some(texture) = self.shadow_textures.texture(update.slot) else {
                    continue;
                };
                let target = texture.target;
                let shadow_camera = texture.camera.clone();
                #[allow(clippy::cast_possible_wrap)]
                let size = settings.texture_size as i32;
                let texture_viewport = ViewportRect::sized(size, size);

                device.set_render_target(Some(target));
                device.set_viewport(texture_viewport);
                device.clear_frame_buffer(FrameBufferType::COLOUR | FrameBufferType::DEPTH, Colour::WHITE, 1.0, 0);
                let texture_stats = self.render_frame(
                    &FramePass {
                        camera: &shadow_camera,
                        viewport: texture_viewport,
                        stage: IlluminationRenderStage::RenderToTexture,
                        technique,
                        lights_affecting_frustum: &[],
                        volume_mode,
                        extrusion_syntax,
                    },
                    device,
                )?;
                stats.merge(&texture_stats);
                stats.shadow_textures_updated += 1;
            }
            log::debug!("Updated {} shadow textures", stats.shadow_textures_updated);
        }

        device.set_render_target(None);
        device.set_viewport(viewport);
        device.clear_frame_buffer(FrameBufferType::all(), Colour::BLACK, 1.0, 0);
        let main_stats = self.render_frame(
            &FramePass {
                camera,
                viewport,
                stage: IlluminationRenderStage::None,
                technique,
                lights_affecting_frustum: &lights_affecting,
                volume_mode,
                extrusion_syntax,
            },
            device,
        )?;
        stats.merge(&main_stats);
        device.end_frame();

        log::trace!("Frame: {} draw calls, {} faces", stats.draw_calls, stats.faces);
        self.last_stats = stats.clone();
        Ok(stats)
    }

    /// Populate the queue for a camera and render it
    fn render_frame(&mut self, frame: &FramePass<'_>, device: &mut dyn RenderSystem) -> RenderResult<FrameStats> {
        let camera = frame.camera;
        let technique = frame.technique;
        self.queue.clear(&mut self.materials);
        self.queue.set_split_passes_by_lighting_type(technique == ShadowTechnique::StencilAdditive);
        self.queue.set_split_no_shadow_passes(technique != ShadowTechnique::None);

        let casters_only = frame.stage == IlluminationRenderStage::RenderToTexture;
        let visible = self.graph.query_visible(&camera.frustum());
        let mut queued = 0;
        for handle in visible {
            let Some(entity) = self.entities.get(handle) else {
                continue;
            };
            if !entity.is_visible() || (casters_only && !entity.casts_shadows()) {
                continue;
            }
            if !casters_only {
                entity.set_lights(&lights_reaching(entity, &self.lights, frame.lights_affecting_frustum));
            }
            for renderable in entity.renderables() {
                self.queue
                    .add_renderable(&renderable, entity.render_queue_group(), entity.priority(), &self.materials)?;
                queued += 1;
            }
        }
        self.queue.sort(camera);
        log::trace!("Queued {} renderables for camera '{}'", queued, camera.name());

        let ctx = FrameContext {
            camera,
            viewport: frame.viewport,
            settings: &self.config.shadows,
            technique,
            ambient_light: self.config.ambient_light,
            fog: &self.config.fog,
            lights: &self.lights,
            lights_affecting_frustum: frame.lights_affecting_frustum,
            graph: self.graph.as_ref(),
            entities: &self.entities,
            materials: &self.materials,
            shadow_passes: self.shadow_passes,
            quad: &self.quad,
            shadow_textures: self.shadow_textures.textures(),
            volume_mode: frame.volume_mode,
            extrusion_syntax: frame.extrusion_syntax,
        };
        let mut renderer = FrameRenderer::new(ctx, device, &mut self.pass_state, &mut self.index_buffer, frame.stage);
        renderer.render_queue(&self.queue)?;
        Ok(renderer.finish())
    }
}

/// Lights from `candidates` whose range reaches an entity, nearest first
fn lights_reaching(
    entity: &Entity,
    lights: &SlotMap<LightHandle, Light>,
    candidates: &[LightHandle],
) -> Vec<LightHandle> {
    let bounds = entity.world_bounding_box();
    let centre = bounds.center();
    let radius = bounds.extents().norm();
    let mut reaching: Vec<(LightHandle, f32)> = candidates
        .iter()
        .filter_map(|&handle| lights.get(handle).map(|light| (handle, light)))
        .filter_map(|(handle, light)| {
            if light.is_directional() {
                return Some((handle, 0.0));
            }
            let distance = (light.position - centre).norm();
            (distance - radius <= light.range).then_some((handle, distance))
        })
        .collect();
    reaching.sort_by(|a, b| a.1.total_cmp(&b.1));
    reaching.into_iter().map(|(handle, _)| handle).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::foundation::math::{Transform, Vec3};
    use crate::render::recording::RecordingRenderSystem;
    use crate::render::render_system::RenderSystemCapabilities;

    fn camera() -> Camera {
        Camera::perspective(Vec3::new(0.0, 2.0, 10.0), 60.0, 1.0, 0.5, 100.0)
    }

    #[test]
    fn test_stencil_shadows_downgrade_without_stencil_buffer() {
        let config = SceneManagerConfig {
            shadows: ShadowSettings::new(ShadowTechnique::StencilModulative),
            ..SceneManagerConfig::default()
        };
        let mut scene = SceneManager::new(config).unwrap();
        let mut capabilities = RenderSystemCapabilities::full();
        capabilities.flags.remove(Capabilities::HW_STENCIL);
        let device = RecordingRenderSystem::new(capabilities);
        assert_eq!(scene.effective_shadow_technique(&device), ShadowTechnique::None);
        assert_eq!(scene.shadow_settings().technique, ShadowTechnique::StencilModulative);
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let config = SceneManagerConfig {
            shadows: ShadowSettings::default().with_textures(0, 1),
            ..SceneManagerConfig::default()
        };
        assert!(SceneManager::new(config).is_err());
    }

    #[test]
    fn test_lights_sorted_nearest_first() {
        let mut scene = SceneManager::new(SceneManagerConfig::default()).unwrap();
        let far = scene.create_light(Light::point(Vec3::new(0.0, 2.0, -20.0), Colour::WHITE, 100.0));
        let near = scene.create_light(Light::point(Vec3::new(0.0, 2.0, 5.0), Colour::WHITE, 100.0));
        let sun = scene.create_light(Light::directional(Vec3::new(0.0, -1.0, 0.0), Colour::WHITE));
        assert_eq!(scene.lights_affecting_camera(&camera()), vec![sun, near, far]);
    }

    #[test]
    fn test_entity_light_list_respects_range() {
        let mut scene = SceneManager::new(SceneManagerConfig::default()).unwrap();
        let mesh = scene.create_mesh(|buffers| Mesh::cube("box", 1.0, None, buffers));
        let handle = scene.create_entity("box", mesh);
        let reaching = scene.create_light(Light::point(Vec3::new(3.0, 0.0, 0.0), Colour::WHITE, 5.0));
        let short = scene.create_light(Light::point(Vec3::new(0.0, 0.0, -30.0), Colour::WHITE, 5.0));
        let entity = scene.entity(handle).unwrap();
        assert_eq!(lights_reaching(entity, &scene.lights, &[short, reaching]), vec![reaching]);
    }

    #[test]
    fn test_controllers_run_each_frame_and_may_add_more() {
        let mut scene = SceneManager::new(SceneManagerConfig::default()).unwrap();
        let mesh = scene.create_mesh(|buffers| Mesh::cube("box", 1.0, None, buffers));
        let handle = scene.create_entity("box", mesh);
        scene.add_controller(move |_dt: f32, scene: &mut SceneManager| {
            if let Some(entity) = scene.entity_mut(handle) {
                let moved = entity.transform().position + Vec3::new(1.0, 0.0, 0.0);
                entity.set_transform(Transform::from_position(moved));
            }
        });
        scene.update_controllers(0.016);
        scene.update_controllers(0.016);
        let position = scene.entity(handle).unwrap().transform().position;
        assert!((position.x - 2.0).abs() < 1e-6);

        scene.add_controller(|_dt: f32, scene: &mut SceneManager| {
            scene.add_controller(|_dt: f32, _scene: &mut SceneManager| {});
        });
        scene.update_controllers(0.016);
        assert_eq!(scene.controllers_mut().len(), 3);
    }

    #[test]
    fn test_fixed_time_source_drives_controllers_from_render() {
        let mut scene = SceneManager::new(SceneManagerConfig::default()).unwrap();
        scene.set_time_source(TimeSource::Fixed(0.02));
        let elapsed = Rc::new(std::cell::Cell::new(0.0_f32));
        let seen = Rc::clone(&elapsed);
        scene.add_controller(move |dt: f32, _scene: &mut SceneManager| seen.set(seen.get() + dt));

        let mut device = RecordingRenderSystem::new(RenderSystemCapabilities::full());
        for _ in 0..5 {
            scene.render_scene(&camera(), ViewportRect::sized(64, 64), &mut device).unwrap();
        }
        assert!((elapsed.get() - 0.1).abs() < 1e-5);
        assert_eq!(scene.timer().frame_count(), 5);
    }

    #[test]
    fn test_entity_bounds_refresh_before_render() {
        let mut scene = SceneManager::new(SceneManagerConfig::default()).unwrap();
        let mesh = scene.create_mesh(|buffers| Mesh::cube("box", 1.0, None, buffers));
        let handle = scene.create_entity("box", mesh);
        if let Some(entity) = scene.entity_mut(handle) {
            entity.set_transform(Transform::from_position(Vec3::new(0.0, 0.0, 500.0)));
        }
        let mut device = RecordingRenderSystem::new(RenderSystemCapabilities::full());
        let stats = scene.render_scene(&camera(), ViewportRect::sized(640, 480), &mut device).unwrap();
        assert_eq!(stats.draw_calls, 0);
    }
}
