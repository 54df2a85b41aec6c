//! Issuing a populated render queue to the device
//!
//! A [`FrameRenderer`] walks the queue groups in order and picks the loop for
//! each group from the active shadow technique:
//!
//! - **No shadows**: each priority group draws its solids, then its
//!   transparents.
//! - **Additive stencil**: ambient passes once; per light the stencil is
//!   filled with shadow volumes and the per-light passes are drawn where it
//!   stayed zero; decal and no-shadow passes follow, transparents last.
//! - **Modulative stencil**: solids with full lighting; per light the
//!   volumes are counted and a full screen quad darkens non-zero stencil.
//! - **Modulative texture**: solids with full lighting; per shadow texture
//!   the receiver pass projects the texture over every solid.
//!
//! Rendering into a shadow texture uses the same renderer in the
//! [`IlluminationRenderStage::RenderToTexture`] stage, where every solid is
//! drawn with the flat caster pass.

use std::collections::HashMap;

use slotmap::SlotMap;

use crate::core::config::{ShadowSettings, ShadowTechnique};
use crate::foundation::math::{Mat4, Vec2, Vec3, Vec4};
use crate::render::camera::Camera;
use crate::render::colour::Colour;
use crate::render::gpu_program::{AutoParamDataSource, GpuProgramType, GpuProgramUsage, ShadowVolumeExtrudeProgram};
use crate::render::light::{Light, LightHandle, LightType};
use crate::render::material::MaterialManager;
use crate::render::pass::{CompareFunction, CullingMode, FogSettings, PassHandle, ResolvedPass, SceneBlend};
use crate::render::queue::{RenderQueue, RenderQueueGroup, RenderQueueGroupId, RenderablePass, SolidPassMap};
use crate::render::render_system::{
    Capabilities, FrameBufferType, RenderSystem, ScissorRect, StencilParams, ViewportRect,
};
use crate::render::renderable::{RenderOperation, Renderable};
use crate::render::{RenderError, RenderResult};

use super::bounds::{Sphere, AABB};
use super::entity::Entity;
use super::pass_state::{PassEnvironment, PassStateCache, ShadowTextureBinding};
use super::scene_graph::{ObjectHandle, SceneGraph};
use super::shadow::caster::{extrusion_distance, find_shadow_casters, CasterSearch, ShadowCaster};
use super::shadow::passes::{FullScreenQuad, ShadowPasses};
use super::shadow::stencil::{requires_z_fail, StencilVolumeMode};
use super::shadow::texture::ShadowTexture;
use super::shadow::volume::{ShadowIndexBuffer, ShadowRenderable};

/// Which derived pass replaces the queued one when drawing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IlluminationRenderStage {
    /// Draw queued passes as they are
    #[default]
    None,
    /// Drawing casters into a shadow texture with the caster pass
    RenderToTexture,
    /// Projecting a shadow texture with the receiver pass
    RenderModulativePass,
}

/// Counters collected while rendering
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FrameStats {
    /// Draw calls issued, shadow volumes included
    pub draw_calls: usize,
    /// Primitives drawn
    pub faces: usize,
    /// Casters found over every shadow casting light
    pub shadow_casters: usize,
    /// Shadow volume renderables drawn into the stencil
    pub shadow_volumes: usize,
    /// Shadow textures rendered
    pub shadow_textures_updated: usize,
    /// Lights whose volumes used depth-fail counting
    pub z_fail_lights: usize,
    /// Draw calls per pass
    pub pass_draws: HashMap<PassHandle, usize>,
}

impl FrameStats {
    /// Draw calls issued with a pass
    pub fn draws_with(&self, pass: PassHandle) -> usize {
        self.pass_draws.get(&pass).copied().unwrap_or(0)
    }

    /// Add another set of counters to this one
    pub fn merge(&mut self, other: &Self) {
        self.draw_calls += other.draw_calls;
        self.faces += other.faces;
        self.shadow_casters += other.shadow_casters;
        self.shadow_volumes += other.shadow_volumes;
        self.shadow_textures_updated += other.shadow_textures_updated;
        self.z_fail_lights += other.z_fail_lights;
        for (&pass, &count) in &other.pass_draws {
            *self.pass_draws.entry(pass).or_insert(0) += count;
        }
    }

    fn record_draw(&mut self, pass: Option<PassHandle>, operation: &RenderOperation) {
        self.draw_calls += 1;
        self.faces += operation.primitive_count();
        if let Some(pass) = pass {
            *self.pass_draws.entry(pass).or_insert(0) += 1;
        }
    }
}

/// Read-only inputs of one queue render
#[derive(Clone, Copy)]
pub struct FrameContext<'a> {
    /// Camera the queue is rendered from
    pub camera: &'a Camera,
    /// Viewport of the current target
    pub viewport: ViewportRect,
    /// Shadow settings
    pub settings: &'a ShadowSettings,
    /// Technique in effect after capability checks
    pub technique: ShadowTechnique,
    /// Scene ambient colour
    pub ambient_light: Colour,
    /// Scene fog
    pub fog: &'a FogSettings,
    /// Every light
    pub lights: &'a SlotMap<LightHandle, Light>,
    /// Lights reaching the main camera's view, nearest first
    pub lights_affecting_frustum: &'a [LightHandle],
    /// Spatial index of the entities
    pub graph: &'a dyn SceneGraph,
    /// Entities by handle
    pub entities: &'a SlotMap<ObjectHandle, Entity>,
    /// Materials and their passes
    pub materials: &'a MaterialManager,
    /// Built-in shadow passes
    pub shadow_passes: ShadowPasses,
    /// Quad used by modulative stencil shadows
    pub quad: &'a FullScreenQuad,
    /// Shadow texture slots with their lights for this frame
    pub shadow_textures: &'a [ShadowTexture],
    /// How volumes are drawn on this device
    pub volume_mode: StencilVolumeMode,
    /// Syntax of the extrusion programs; `None` when extruding on the CPU
    pub extrusion_syntax: Option<&'static str>,
}

/// Renders a queue for one camera
pub struct FrameRenderer<'a> {
    ctx: FrameContext<'a>,
    device: &'a mut dyn RenderSystem,
    state: &'a mut PassStateCache,
    index_buffer: &'a mut ShadowIndexBuffer,
    stage: IlluminationRenderStage,
    shadow_texture: Option<(ShadowTextureBinding, LightType)>,
    casters: HashMap<LightHandle, Vec<ObjectHandle>>,
    view: Mat4,
    projection: Mat4,
    view_is_identity: Option<bool>,
    projection_is_identity: Option<bool>,
    world: Vec<Mat4>,
    stats: FrameStats,
}

impl<'a> FrameRenderer<'a> {
    /// Create a renderer; `stage` applies to the whole render
    pub fn new(
        ctx: FrameContext<'a>,
        device: &'a mut dyn RenderSystem,
        state: &'a mut PassStateCache,
        index_buffer: &'a mut ShadowIndexBuffer,
        stage: IlluminationRenderStage,
    ) -> Self {
        Self {
            ctx,
            device,
            state,
            index_buffer,
            stage,
            shadow_texture: None,
            casters: HashMap::new(),
            view: Mat4::identity(),
            projection: Mat4::identity(),
            view_is_identity: None,
            projection_is_identity: None,
            world: Vec::new(),
            stats: FrameStats::default(),
        }
    }

    /// Stage currently in force
    pub const fn stage(&self) -> IlluminationRenderStage {
        self.stage
    }

    /// Counters collected so far
    pub fn finish(self) -> FrameStats {
        self.stats
    }

    /// Draw every queue group in id order
    pub fn render_queue(&mut self, queue: &RenderQueue) -> RenderResult<()> {
        let ambient = if self.stage == IlluminationRenderStage::RenderToTexture {
            self.ctx.settings.colour
        } else {
            self.ctx.ambient_light
        };
        self.device.set_ambient_light(ambient);

        for (&id, group) in queue.iter() {
            let shadows = self.ctx.technique != ShadowTechnique::None && group.shadows_enabled();
            log::trace!("Rendering queue group {} (shadows: {})", id.0, shadows);
            if self.stage == IlluminationRenderStage::RenderToTexture {
                if shadows {
                    self.render_texture_caster_group(group)?;
                }
                continue;
            }
            match self.ctx.technique {
                ShadowTechnique::StencilAdditive if shadows => self.render_additive_stencil_group(group, queue)?,
                ShadowTechnique::StencilModulative if shadows => {
                    self.render_modulative_stencil_group(group, queue)?;
                }
                ShadowTechnique::TextureModulative if shadows => self.render_modulative_texture_group(group)?,
                _ => self.render_basic_group(group)?,
            }
        }
        Ok(())
    }

    fn render_basic_group(&mut self, group: &RenderQueueGroup) -> RenderResult<()> {
        for (_, priority_group) in group.iter() {
            self.render_solid_map(priority_group.solid_passes(), None)?;
            self.render_transparents(priority_group.transparent_passes())?;
        }
        Ok(())
    }

    fn render_additive_stencil_group(&mut self, group: &RenderQueueGroup, queue: &RenderQueue) -> RenderResult<()> {
        for (_, priority_group) in group.iter() {
            self.render_solid_map(priority_group.solid_passes(), None)?;
        }

        for &handle in self.ctx.lights_affecting_frustum {
            let Some(light) = self.ctx.lights.get(handle) else {
                continue;
            };
            let scissored = self.set_light_scissor(light);
            if light.cast_shadows {
                self.device.clear_frame_buffer(FrameBufferType::STENCIL, Colour::BLACK, 1.0, 0);
                let casters = self.shadow_casters(handle, light, queue);
                self.render_shadow_volumes_to_stencil(light, &casters)?;
                self.device.set_stencil_check_enabled(true);
                self.device.set_stencil_buffer_params(&StencilParams::test(CompareFunction::Equal, 0));
            }

            let only_this_light = [handle];
            for (_, priority_group) in group.iter() {
                self.render_solid_map(priority_group.solid_passes_diffuse_specular(), Some(&only_this_light))?;
            }

            if light.cast_shadows {
                self.reset_stencil();
            }
            if scissored {
                self.clear_light_scissor();
            }
        }

        for (_, priority_group) in group.iter() {
            self.render_solid_map(priority_group.solid_passes_decal(), None)?;
        }
        for (_, priority_group) in group.iter() {
            self.render_solid_map(priority_group.solid_passes_no_shadow(), None)?;
        }
        for (_, priority_group) in group.iter() {
            self.render_transparents(priority_group.transparent_passes())?;
        }
        Ok(())
    }

    fn render_modulative_stencil_group(&mut self, group: &RenderQueueGroup, queue: &RenderQueue) -> RenderResult<()> {
        for (_, priority_group) in group.iter() {
            self.render_solid_map(priority_group.solid_passes(), None)?;
            self.render_solid_map(priority_group.solid_passes_no_shadow(), None)?;
        }

        let modulative = self.ctx.shadow_passes.modulative;
        for &handle in self.ctx.lights_affecting_frustum {
            let Some(light) = self.ctx.lights.get(handle) else {
                continue;
            };
            if !light.cast_shadows {
                continue;
            }
            self.device.clear_frame_buffer(FrameBufferType::STENCIL, Colour::BLACK, 1.0, 0);
            let casters = self.shadow_casters(handle, light, queue);
            self.render_shadow_volumes_to_stencil(light, &casters)?;

            self.device.set_stencil_check_enabled(true);
            self.device.set_stencil_buffer_params(&StencilParams::test(CompareFunction::NotEqual, 0));
            if let Some((pass, resolved)) = self.resolve_pass(modulative)? {
                let quad: &'a FullScreenQuad = self.ctx.quad;
                self.render_single_object(quad, pass, &resolved, Some(&[]))?;
            }
            self.reset_stencil();
        }

        for (_, priority_group) in group.iter() {
            self.render_transparents(priority_group.transparent_passes())?;
        }
        Ok(())
    }

    fn render_modulative_texture_group(&mut self, group: &RenderQueueGroup) -> RenderResult<()> {
        for (_, priority_group) in group.iter() {
            self.render_solid_map(priority_group.solid_passes(), None)?;
            self.render_solid_map(priority_group.solid_passes_no_shadow(), None)?;
        }

        let textures: &'a [ShadowTexture] = self.ctx.shadow_textures;
        for texture in textures {
            let Some(light) = texture.light.and_then(|handle| self.ctx.lights.get(handle)) else {
                continue;
            };
            let binding = ShadowTextureBinding { target: texture.target, projector: texture.projector() };
            self.with_shadow_texture(binding, light.light_type, |renderer| {
                for (_, priority_group) in group.iter() {
                    renderer.render_solid_map(priority_group.solid_passes(), Some(&[]))?;
                }
                Ok(())
            })?;
        }

        for (_, priority_group) in group.iter() {
            self.render_transparents(priority_group.transparent_passes())?;
        }
        Ok(())
    }

    fn render_texture_caster_group(&mut self, group: &RenderQueueGroup) -> RenderResult<()> {
        for (_, priority_group) in group.iter() {
            self.render_solid_map(priority_group.solid_passes(), Some(&[]))?;
            self.render_solid_map(priority_group.solid_passes_no_shadow(), Some(&[]))?;
        }
        Ok(())
    }

    /// Run `f` with a stage in force, restoring the previous stage afterwards
    pub fn with_stage<T>(
        &mut self,
        stage: IlluminationRenderStage,
        f: impl FnOnce(&mut Self) -> RenderResult<T>,
    ) -> RenderResult<T> {
        let previous = std::mem::replace(&mut self.stage, stage);
        let result = f(self);
        self.stage = previous;
        result
    }

    fn with_shadow_texture<T>(
        &mut self,
        binding: ShadowTextureBinding,
        light_type: LightType,
        f: impl FnOnce(&mut Self) -> RenderResult<T>,
    ) -> RenderResult<T> {
        let previous = self.shadow_texture.replace((binding, light_type));
        let result = self.with_stage(IlluminationRenderStage::RenderModulativePass, f);
        self.shadow_texture = previous;
        result
    }

    /// Pass actually drawn for a queued pass in the current stage
    ///
    /// `None` means the pass is skipped in this stage.
    fn resolve_pass(&self, handle: PassHandle) -> RenderResult<Option<(PassHandle, ResolvedPass<'a>)>> {
        let materials: &'a MaterialManager = self.ctx.materials;
        let passes = materials.passes();
        let pass = passes.get(handle).ok_or(RenderError::PassNotFound)?;
        let resolved = match self.stage {
            IlluminationRenderStage::None => Some((handle, ResolvedPass::new(pass))),
            IlluminationRenderStage::RenderToTexture => {
                if pass.index() > 0 || pass.is_transparent() {
                    return Ok(None);
                }
                let caster = self.ctx.shadow_passes.caster;
                let caster_pass = passes.get(caster).ok_or(RenderError::PassNotFound)?;
                let program = pass.shadow_caster_vertex_program.as_ref().or(pass.vertex_program.as_ref());
                Some((caster, ResolvedPass::new(caster_pass).with_vertex_program(program)))
            }
            IlluminationRenderStage::RenderModulativePass => {
                if pass.index() > 0 {
                    return Ok(None);
                }
                let receiver = match self.shadow_texture {
                    Some((_, LightType::Spot)) => self.ctx.shadow_passes.spot_receiver,
                    _ => self.ctx.shadow_passes.receiver,
                };
                let receiver_pass = passes.get(receiver).ok_or(RenderError::PassNotFound)?;
                let program = pass.shadow_receiver_vertex_program.as_ref();
                Some((receiver, ResolvedPass::new(receiver_pass).with_vertex_program(program)))
            }
        };
        Ok(resolved)
    }

    fn set_pass(&mut self, handle: PassHandle, resolved: &ResolvedPass<'_>) {
        let env = PassEnvironment {
            scene_fog: self.ctx.fog,
            shadow_texture: self.shadow_texture.map(|(binding, _)| binding),
        };
        self.state.apply(self.device, handle, resolved, &env);
    }

    fn render_solid_map(&mut self, map: &SolidPassMap, manual_lights: Option<&[LightHandle]>) -> RenderResult<()> {
        for (key, renderables) in map {
            if renderables.is_empty() {
                continue;
            }
            let Some((pass, resolved)) = self.resolve_pass(key.pass)? else {
                continue;
            };
            for renderable in renderables {
                self.render_single_object(renderable.as_ref(), pass, &resolved, manual_lights)?;
            }
        }
        Ok(())
    }

    fn render_transparents(&mut self, entries: &[RenderablePass]) -> RenderResult<()> {
        for entry in entries {
            let Some((pass, resolved)) = self.resolve_pass(entry.pass)? else {
                continue;
            };
            self.render_single_object(entry.renderable.as_ref(), pass, &resolved, None)?;
        }
        Ok(())
    }

    fn use_view(&mut self, identity: bool) {
        if self.view_is_identity == Some(identity) {
            return;
        }
        self.view = if identity { Mat4::identity() } else { self.ctx.camera.view_matrix() };
        self.device.set_view_matrix(&self.view);
        self.view_is_identity = Some(identity);
    }

    fn use_projection(&mut self, identity: bool) {
        if self.projection_is_identity == Some(identity) {
            return;
        }
        self.projection = if identity { Mat4::identity() } else { self.ctx.camera.projection_matrix() };
        self.device.set_projection_matrix(&self.projection);
        self.projection_is_identity = Some(identity);
    }

    /// Draw one renderable with a pass, once or once per light
    ///
    /// `manual_lights` replaces the renderable's own light list and turns
    /// off per-light iteration.
    fn render_single_object(
        &mut self,
        renderable: &dyn Renderable,
        pass_handle: PassHandle,
        resolved: &ResolvedPass<'_>,
        manual_lights: Option<&[LightHandle]>,
    ) -> RenderResult<()> {
        let operation = renderable.render_operation();
        if operation.is_empty() {
            log::trace!("Skipping renderable with no geometry");
            return Ok(());
        }

        self.set_pass(pass_handle, resolved);

        self.world.clear();
        renderable.world_transforms(&mut self.world);
        self.device.set_world_matrices(&self.world);
        self.use_view(renderable.use_identity_view());
        self.use_projection(renderable.use_identity_projection());
        self.device.set_normalise_normals(renderable.normalise_normals());

        let pass = resolved.pass;
        if !pass.lighting_enabled {
            self.draw(pass_handle, resolved, &[], 0.0, &operation)?;
            return Ok(());
        }

        let all_lights: &'a SlotMap<LightHandle, Light> = self.ctx.lights;
        let list = manual_lights.map_or_else(|| renderable.lights(), <[LightHandle]>::to_vec);
        let lights: Vec<&Light> = list.iter().filter_map(|&handle| all_lights.get(handle)).collect();

        if pass.iterate_per_light && manual_lights.is_none() {
            let matching = lights
                .iter()
                .copied()
                .filter(|light| pass.only_light_type.map_or(true, |only| light.light_type == only));
            for light in matching {
                self.device.use_lights(&[light], 1);
                self.draw(pass_handle, resolved, &[light], 0.0, &operation)?;
            }
        } else {
            let limit = pass.max_simultaneous_lights.min(lights.len());
            self.device.use_lights(&lights[..limit], limit);
            self.draw(pass_handle, resolved, &lights[..limit], 0.0, &operation)?;
        }
        Ok(())
    }

    fn bind_program_parameters(
        &mut self,
        programs: [Option<&GpuProgramUsage>; 2],
        lights: &[&Light],
        shadow_extrusion_distance: f32,
    ) {
        if programs.iter().all(Option::is_none) {
            return;
        }
        let source = AutoParamDataSource {
            world: self.world.first().copied().unwrap_or_else(Mat4::identity),
            view: self.view,
            projection: self.projection,
            ambient: self.ctx.ambient_light,
            lights,
            shadow_extrusion_distance,
            texture_view_proj: self.shadow_texture.map_or_else(Mat4::identity, |(binding, _)| binding.projector),
        };
        for usage in programs.into_iter().flatten() {
            self.device.bind_gpu_program_parameters(usage.program_type(), &usage.parameters.resolve(&source));
        }
    }

    fn draw(
        &mut self,
        pass: PassHandle,
        resolved: &ResolvedPass<'_>,
        lights: &[&Light],
        shadow_extrusion_distance: f32,
        operation: &RenderOperation,
    ) -> RenderResult<()> {
        self.bind_program_parameters(
            [resolved.vertex_program, resolved.fragment_program],
            lights,
            shadow_extrusion_distance,
        );
        self.device.render(operation)?;
        self.stats.record_draw(Some(pass), operation);
        Ok(())
    }

    /// Casters of a light, searched once per render
    fn shadow_casters(&mut self, handle: LightHandle, light: &Light, queue: &RenderQueue) -> Vec<ObjectHandle> {
        if let Some(found) = self.casters.get(&handle) {
            return found.clone();
        }
        let search = CasterSearch {
            camera: self.ctx.camera,
            light,
            dir_light_extrusion_distance: self.ctx.settings.dir_light_extrusion_distance,
            far_distance_squared: self.ctx.settings.far_distance_squared(),
        };
        let entities = self.ctx.entities;
        let found = find_shadow_casters(self.ctx.graph, &search, |object| {
            entities
                .get(object)
                .filter(|entity| queue_group_has_shadows(queue, entity.render_queue_group()))
        });
        log::debug!("{} shadow casters for {:?} light", found.len(), light.light_type);
        self.stats.shadow_casters += found.len();
        self.casters.insert(handle, found.clone());
        found
    }

    fn volume_program(&self, light: &Light, debug: bool) -> Option<GpuProgramUsage> {
        let syntax = self.ctx.extrusion_syntax?;
        let program = ShadowVolumeExtrudeProgram::select(light.light_type, self.ctx.volume_mode.finite_extrusion, debug);
        Some(program.usage(syntax))
    }

    fn begin_volume_state(&mut self, program: Option<&GpuProgramUsage>) {
        self.device.set_colour_buffer_write_enabled(false, false, false, false);
        self.device.disable_texture_units_from(0);
        self.device.set_lighting_enabled(false);
        self.device.set_scene_blending(SceneBlend::REPLACE);
        self.device.set_depth_write_enabled(false);
        self.device.set_depth_check_enabled(true);
        self.device.set_depth_function(CompareFunction::Less);
        self.device.set_stencil_check_enabled(true);
        match program {
            Some(usage) => self.device.bind_gpu_program(&usage.program),
            None => self.device.unbind_gpu_program(GpuProgramType::Vertex),
        }
        self.device.unbind_gpu_program(GpuProgramType::Fragment);
        self.use_view(false);
        self.use_projection(false);
    }

    /// Count the shadow volumes of every caster into the stencil buffer
    ///
    /// Depth-fail counting is chosen for the whole light when any caster
    /// touches the volume between the light and the near plane. Device state
    /// is changed directly, so the pass cache is invalidated afterwards.
    fn render_shadow_volumes_to_stencil(&mut self, light: &Light, casters: &[ObjectHandle]) -> RenderResult<()> {
        let camera = self.ctx.camera;
        let entities: &'a SlotMap<ObjectHandle, Entity> = self.ctx.entities;
        let casters: Vec<&'a Entity> = casters.iter().filter_map(|&handle| entities.get(handle)).collect();
        let bounds: Vec<AABB> = casters.iter().map(|caster| caster.world_bounding_box()).collect();
        let z_fail = requires_z_fail(&light.near_clip_volume(camera), &bounds);
        if z_fail {
            self.stats.z_fail_lights += 1;
        }
        log::trace!("Stencil volumes for {:?} light: {} casters, z-fail {}", light.light_type, casters.len(), z_fail);

        let mode = self.ctx.volume_mode;
        let debug = self.ctx.settings.debug_shadows;
        let program = self.volume_program(light, false);
        let debug_program = if debug { self.volume_program(light, true) } else { None };
        self.begin_volume_state(program.as_ref());

        for caster in casters {
            let distance = extrusion_distance(caster, light, self.ctx.settings.dir_light_extrusion_distance);
            let flags = mode.caster_flags(
                light,
                z_fail,
                camera.is_visible_aabb(&caster.light_cap_bounds()),
                camera.is_visible_aabb(&caster.dark_cap_bounds(light, distance)),
            );
            let volumes = caster.shadow_volume_renderables(light, self.index_buffer, flags, distance, self.device)?;
            for volume in &volumes {
                self.stats.shadow_volumes += 1;
                self.render_volume_objects(volume, program.as_ref(), light, distance, false, z_fail)?;
                if !mode.two_sided {
                    self.render_volume_objects(volume, program.as_ref(), light, distance, true, z_fail)?;
                }
                if debug {
                    self.render_debug_volume(volume, debug_program.as_ref(), light, distance, z_fail)?;
                    self.begin_volume_state(program.as_ref());
                }
            }
        }

        self.device.set_colour_buffer_write_enabled(true, true, true, true);
        self.device.set_depth_write_enabled(true);
        self.device.set_depth_function(CompareFunction::LessEqual);
        self.device.set_stencil_check_enabled(false);
        self.device.unbind_gpu_program(GpuProgramType::Vertex);
        self.state.invalidate();
        Ok(())
    }

    fn render_volume_objects(
        &mut self,
        volume: &ShadowRenderable,
        program: Option<&GpuProgramUsage>,
        light: &Light,
        distance: f32,
        second_pass: bool,
        z_fail: bool,
    ) -> RenderResult<()> {
        let (culling, params) = self.ctx.volume_mode.volume_state(second_pass, z_fail);
        self.device.set_culling_mode(culling);
        self.device.set_stencil_buffer_params(&params);
        self.render_volume_operation(volume, program, light, distance, &volume.operation, None)?;

        let Some(cap) = volume.light_cap.as_ref() else {
            return Ok(());
        };
        if self.ctx.volume_mode.two_sided {
            self.device.set_culling_mode(CullingMode::Anticlockwise);
            self.render_volume_operation(volume, program, light, distance, cap, None)?;
            self.device.set_culling_mode(CullingMode::Clockwise);
            self.device.set_depth_function(CompareFunction::AlwaysFail);
            self.render_volume_operation(volume, program, light, distance, cap, None)?;
            self.device.set_depth_function(CompareFunction::Less);
            self.device.set_culling_mode(CullingMode::None);
        } else if culling == CullingMode::Anticlockwise {
            self.render_volume_operation(volume, program, light, distance, cap, None)?;
        } else {
            self.device.set_depth_function(CompareFunction::AlwaysFail);
            self.render_volume_operation(volume, program, light, distance, cap, None)?;
            self.device.set_depth_function(CompareFunction::Less);
        }
        Ok(())
    }

    fn render_volume_operation(
        &mut self,
        volume: &ShadowRenderable,
        program: Option<&GpuProgramUsage>,
        light: &Light,
        distance: f32,
        operation: &RenderOperation,
        pass: Option<PassHandle>,
    ) -> RenderResult<()> {
        if operation.is_empty() {
            return Ok(());
        }
        self.world.clear();
        volume.world_transforms(&mut self.world);
        self.device.set_world_matrices(&self.world);
        self.bind_program_parameters([program, None], &[light], distance);
        self.device.render(operation)?;
        self.stats.record_draw(pass, operation);
        Ok(())
    }

    /// Draw a volume visibly, without touching the stencil
    fn render_debug_volume(
        &mut self,
        volume: &ShadowRenderable,
        program: Option<&GpuProgramUsage>,
        light: &Light,
        distance: f32,
        z_fail: bool,
    ) -> RenderResult<()> {
        self.device.set_stencil_buffer_params(&StencilParams::default());
        let handle = self.ctx.shadow_passes.debug(z_fail);
        let materials: &'a MaterialManager = self.ctx.materials;
        let pass = materials.passes().get(handle).ok_or(RenderError::PassNotFound)?;
        let resolved = ResolvedPass::new(pass).with_vertex_program(program);
        self.set_pass(handle, &resolved);
        self.render_volume_operation(volume, program, light, distance, &volume.operation, Some(handle))?;
        if let Some(cap) = volume.light_cap.as_ref() {
            self.render_volume_operation(volume, program, light, distance, cap, Some(handle))?;
        }
        self.state.invalidate();
        Ok(())
    }

    fn reset_stencil(&mut self) {
        self.device.set_stencil_check_enabled(false);
        self.device.set_stencil_buffer_params(&StencilParams::default());
        self.device.clear_frame_buffer(FrameBufferType::STENCIL, Colour::BLACK, 1.0, 0);
    }

    fn set_light_scissor(&mut self, light: &Light) -> bool {
        if !self.device.capabilities().supports(Capabilities::SCISSOR_TEST) {
            return false;
        }
        let Some(sphere) = light.bounding_sphere() else {
            return false;
        };
        let Some(rect) = light_scissor_rect(self.ctx.camera, &sphere, self.ctx.viewport) else {
            return false;
        };
        self.device.set_scissor_test(true, rect);
        true
    }

    fn clear_light_scissor(&mut self) {
        let viewport = self.ctx.viewport;
        self.device.set_scissor_test(
            false,
            ScissorRect {
                left: viewport.left,
                top: viewport.top,
                right: viewport.left + viewport.width,
                bottom: viewport.top + viewport.height,
            },
        );
    }
}

/// True if objects in a queue group take part in shadow rendering
pub fn queue_group_has_shadows(queue: &RenderQueue, id: RenderQueueGroupId) -> bool {
    queue
        .queue_group(id)
        .map_or_else(|| id.shadows_enabled_by_default(), RenderQueueGroup::shadows_enabled)
}

/// Screen rectangle covering a light's sphere of influence
///
/// Returns `None` when any corner of the sphere's box is behind the camera,
/// in which case the projection is unreliable and no scissor is used.
pub fn light_scissor_rect(camera: &Camera, sphere: &Sphere, viewport: ViewportRect) -> Option<ScissorRect> {
    let bounds = AABB::from_center_extents(sphere.center, Vec3::repeat(sphere.radius));
    let view_projection = camera.view_projection_matrix();
    let mut min = Vec2::repeat(1.0);
    let mut max = Vec2::repeat(-1.0);
    for corner in bounds.corners() {
        let clip = view_projection * Vec4::new(corner.x, corner.y, corner.z, 1.0);
        if clip.w <= 0.0 {
            return None;
        }
        let ndc = Vec2::new(clip.x / clip.w, clip.y / clip.w);
        min = min.inf(&ndc);
        max = max.sup(&ndc);
    }
    let min = min.map(|v| v.clamp(-1.0, 1.0));
    let max = max.map(|v| v.clamp(-1.0, 1.0));
    if min.x >= max.x || min.y >= max.y {
        return None;
    }

    #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation)]
    let to_pixels = |ndc: f32, origin: i32, size: i32| origin + ((ndc + 1.0) * 0.5 * size as f32).round() as i32;
    Some(ScissorRect {
        left: to_pixels(min.x, viewport.left, viewport.width),
        right: to_pixels(max.x, viewport.left, viewport.width),
        top: to_pixels(-max.y, viewport.top, viewport.height),
        bottom: to_pixels(-min.y, viewport.top, viewport.height),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn camera() -> Camera {
        Camera::perspective(Vec3::new(0.0, 0.0, 10.0), 90.0, 1.0, 1.0, 100.0)
    }

    #[test]
    fn test_scissor_covers_centred_light() {
        let sphere = Sphere::new(Vec3::zeros(), 1.0);
        let rect = light_scissor_rect(&camera(), &sphere, ViewportRect::sized(800, 800)).unwrap();
        assert!(rect.left < 400 && rect.right > 400);
        assert!(rect.top < 400 && rect.bottom > 400);
        assert!(rect.left > 0 && rect.right < 800);
        assert_eq!(rect.right - 400, 400 - rect.left);
    }

    #[test]
    fn test_scissor_clamps_to_viewport() {
        let sphere = Sphere::new(Vec3::new(8.0, 0.0, 0.0), 3.0);
        let rect = light_scissor_rect(&camera(), &sphere, ViewportRect::sized(800, 600)).unwrap();
        assert_eq!(rect.right, 800);
        assert!(rect.left > 400);
    }

    #[test]
    fn test_scissor_skipped_when_sphere_reaches_behind_camera() {
        let sphere = Sphere::new(Vec3::new(0.0, 0.0, 9.0), 5.0);
        assert!(light_scissor_rect(&camera(), &sphere, ViewportRect::sized(800, 600)).is_none());
    }

    #[test]
    fn test_stats_merge_adds_pass_counts() {
        let mut store = crate::render::pass::PassStore::new();
        let pass = store.insert(crate::render::pass::Pass::new());
        let op = RenderOperation::indexed_triangles(
            crate::render::renderable::BufferId(1),
            3,
            crate::render::renderable::BufferId(2),
            0,
            3,
        );
        let mut first = FrameStats::default();
        first.record_draw(Some(pass), &op);
        let mut second = FrameStats::default();
        second.record_draw(Some(pass), &op);
        second.record_draw(None, &op);
        first.merge(&second);
        assert_eq!(first.draw_calls, 3);
        assert_eq!(first.faces, 3);
        assert_eq!(first.draws_with(pass), 2);
    }
}
