//! Render system that records every call
//!
//! Used headless by the tests and the demo. Besides the command log it keeps
//! the little state needed to answer questions about a frame: which render
//! target is bound, the stencil configuration in effect, and whether stencil
//! writes have left the main target's stencil buffer dirty.

use std::collections::BTreeSet;

use crate::foundation::math::Mat4;

use super::colour::Colour;
use super::gpu_program::{GpuProgramRef, GpuProgramType, ResolvedConstant};
use super::light::Light;
use super::pass::{
    CompareFunction, CullingMode, FogSettings, LayerBlendOperation, SceneBlend, ShadeMode,
};
use super::render_system::{
    BoundTexture, BoundTextureUnit, DeviceId, FrameBufferType, RenderSystem, RenderSystemCapabilities,
    RenderTargetId, ScissorRect, StencilParams, SurfaceParams, ViewportRect,
};
use super::renderable::{BufferId, RenderOperation};
use super::{RenderError, RenderResult};

/// Owned copy of what a texture unit samples
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordedTexture {
    /// Named texture resource
    Named(String),
    /// Render texture
    Target(RenderTargetId),
    /// Nothing
    None,
}

/// Device state captured with each draw
#[derive(Debug, Clone, PartialEq)]
pub struct DrawRecord {
    /// Geometry
    pub operation: RenderOperation,
    /// Bound render target, `None` for the main target
    pub target: Option<RenderTargetId>,
    /// Stencil test enabled
    pub stencil_check: bool,
    /// Stencil configuration
    pub stencil: StencilParams,
    /// Bound vertex program name
    pub vertex_program: Option<String>,
    /// Number of lights bound
    pub light_count: usize,
    /// Frame buffer blending
    pub scene_blend: SceneBlend,
    /// Lighting switch
    pub lighting_enabled: bool,
    /// Face culling
    pub culling: CullingMode,
    /// Depth comparison
    pub depth_function: CompareFunction,
    /// Colour writes, any channel
    pub colour_write: bool,
    /// Number of enabled texture units
    pub texture_units: usize,
}

/// One recorded device call
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceCommand {
    /// Render texture created
    CreateRenderTexture {
        /// Name given by the caller
        name: String,
        /// Edge length in pixels
        size: u32,
        /// Resulting target
        target: RenderTargetId,
    },
    /// Render texture destroyed
    DestroyRenderTexture(RenderTargetId),
    /// Output target switched
    SetRenderTarget(Option<RenderTargetId>),
    /// Viewport set
    SetViewport(ViewportRect),
    /// Frame begun
    BeginFrame,
    /// Frame ended
    EndFrame,
    /// Frame buffer cleared
    Clear {
        /// Planes cleared
        buffers: FrameBufferType,
        /// Colour value
        colour: Colour,
        /// Stencil value
        stencil: u32,
    },
    /// World matrices set
    SetWorldMatrices(Vec<Mat4>),
    /// View matrix set
    SetViewMatrix(Mat4),
    /// Projection matrix set
    SetProjectionMatrix(Mat4),
    /// Ambient light set
    SetAmbientLight(Colour),
    /// Lights bound
    UseLights(usize),
    /// Lighting switched
    SetLightingEnabled(bool),
    /// Material colours set
    SetSurfaceParams(SurfaceParams),
    /// Shading set
    SetShadingType(ShadeMode),
    /// Fog set
    SetFog(FogSettings),
    /// Normal renormalisation switched
    SetNormaliseNormals(bool),
    /// Blending set
    SetSceneBlending(SceneBlend),
    /// Texture unit configured
    SetTextureUnit {
        /// Unit index
        unit: usize,
        /// Texture sampled
        texture: RecordedTexture,
        /// Layer blend
        colour_operation: LayerBlendOperation,
        /// Projective mapping in use
        projective: bool,
    },
    /// Texture units disabled
    DisableTextureUnitsFrom(usize),
    /// Depth test switched
    SetDepthCheck(bool),
    /// Depth write switched
    SetDepthWrite(bool),
    /// Depth function set
    SetDepthFunction(CompareFunction),
    /// Depth bias set
    SetDepthBias(f32),
    /// Alpha rejection set
    SetAlphaReject(CompareFunction, u8),
    /// Colour writes set
    SetColourWrite([bool; 4]),
    /// Culling set
    SetCullingMode(CullingMode),
    /// Stencil test switched
    SetStencilCheck(bool),
    /// Stencil configuration set
    SetStencilParams(StencilParams),
    /// Scissor test set
    SetScissorTest(bool, ScissorRect),
    /// Program bound
    BindProgram(GpuProgramRef),
    /// Program stage returned to fixed function
    UnbindProgram(GpuProgramType),
    /// Program constants uploaded
    BindProgramParameters(GpuProgramType, Vec<ResolvedConstant>),
    /// Buffer contents replaced
    UpdateBuffer {
        /// Buffer written
        buffer: BufferId,
        /// Bytes written
        len: usize,
    },
    /// Draw issued
    Render(DrawRecord),
}

#[derive(Debug, Clone)]
struct TrackedState {
    target: Option<RenderTargetId>,
    stencil_check: bool,
    stencil: StencilParams,
    vertex_program: Option<String>,
    light_count: usize,
    scene_blend: SceneBlend,
    lighting_enabled: bool,
    culling: CullingMode,
    depth_function: CompareFunction,
    colour_write: bool,
    texture_units: usize,
}

impl Default for TrackedState {
    fn default() -> Self {
        Self {
            target: None,
            stencil_check: false,
            stencil: StencilParams::default(),
            vertex_program: None,
            light_count: 0,
            scene_blend: SceneBlend::REPLACE,
            lighting_enabled: true,
            culling: CullingMode::Clockwise,
            depth_function: CompareFunction::LessEqual,
            colour_write: true,
            texture_units: 0,
        }
    }
}

/// A [`RenderSystem`] that records calls instead of drawing
pub struct RecordingRenderSystem {
    id: DeviceId,
    capabilities: RenderSystemCapabilities,
    commands: Vec<DeviceCommand>,
    state: TrackedState,
    next_target: u32,
    live_targets: BTreeSet<RenderTargetId>,
    stencil_dirty: bool,
}

impl RecordingRenderSystem {
    /// Create a recorder reporting the given capabilities
    pub fn new(capabilities: RenderSystemCapabilities) -> Self {
        Self {
            id: DeviceId::unique(),
            capabilities,
            commands: Vec::new(),
            state: TrackedState::default(),
            next_target: 1,
            live_targets: BTreeSet::new(),
            stencil_dirty: false,
        }
    }

    /// Replace the capability report
    pub fn set_capabilities(&mut self, capabilities: RenderSystemCapabilities) {
        self.capabilities = capabilities;
    }

    /// Every command recorded so far
    pub fn commands(&self) -> &[DeviceCommand] {
        &self.commands
    }

    /// Forget recorded commands; tracked state is kept
    pub fn clear_commands(&mut self) {
        self.commands.clear();
    }

    /// Recorded draws in order
    pub fn draws(&self) -> impl Iterator<Item = &DrawRecord> {
        self.commands.iter().filter_map(|command| match command {
            DeviceCommand::Render(record) => Some(record),
            _ => None,
        })
    }

    /// Number of draws using a vertex buffer
    pub fn draws_of(&self, buffer: BufferId) -> usize {
        self.draws().filter(|d| d.operation.vertex_buffer == buffer).count()
    }

    /// Draws issued into a render texture
    pub fn draws_into(&self, target: RenderTargetId) -> usize {
        self.draws().filter(|d| d.target == Some(target)).count()
    }

    /// Render textures that received at least one draw
    pub fn targets_rendered(&self) -> BTreeSet<RenderTargetId> {
        self.draws().filter_map(|d| d.target).collect()
    }

    /// Render textures currently alive
    pub const fn live_targets(&self) -> &BTreeSet<RenderTargetId> {
        &self.live_targets
    }

    /// True if no stencil write happened on the main target since its last stencil clear
    pub const fn stencil_is_clear(&self) -> bool {
        !self.stencil_dirty
    }

    /// Number of commands matching a predicate
    pub fn count(&self, predicate: impl Fn(&DeviceCommand) -> bool) -> usize {
        self.commands.iter().filter(|c| predicate(c)).count()
    }
}

impl RenderSystem for RecordingRenderSystem {
    fn capabilities(&self) -> &RenderSystemCapabilities {
        &self.capabilities
    }

    fn device_id(&self) -> DeviceId {
        self.id
    }

    fn create_render_texture(&mut self, name: &str, size: u32) -> RenderResult<RenderTargetId> {
        if size == 0 {
            return Err(RenderError::ResourceCreationFailed(format!(
                "render texture '{name}' has zero size"
            )));
        }
        let target = RenderTargetId(self.next_target);
        self.next_target += 1;
        self.live_targets.insert(target);
        self.commands.push(DeviceCommand::CreateRenderTexture { name: name.to_string(), size, target });
        Ok(target)
    }

    fn destroy_render_texture(&mut self, target: RenderTargetId) {
        self.live_targets.remove(&target);
        self.commands.push(DeviceCommand::DestroyRenderTexture(target));
    }

    fn set_render_target(&mut self, target: Option<RenderTargetId>) {
        self.state.target = target;
        self.commands.push(DeviceCommand::SetRenderTarget(target));
    }

    fn set_viewport(&mut self, rect: ViewportRect) {
        self.commands.push(DeviceCommand::SetViewport(rect));
    }

    fn begin_frame(&mut self) {
        self.commands.push(DeviceCommand::BeginFrame);
    }

    fn end_frame(&mut self) {
        self.commands.push(DeviceCommand::EndFrame);
    }

    fn clear_frame_buffer(&mut self, buffers: FrameBufferType, colour: Colour, _depth: f32, stencil: u32) {
        if self.state.target.is_none() && buffers.contains(FrameBufferType::STENCIL) {
            self.stencil_dirty = stencil != 0;
        }
        self.commands.push(DeviceCommand::Clear { buffers, colour, stencil });
    }

    fn set_world_matrices(&mut self, matrices: &[Mat4]) {
        self.commands.push(DeviceCommand::SetWorldMatrices(matrices.to_vec()));
    }

    fn set_view_matrix(&mut self, matrix: &Mat4) {
        self.commands.push(DeviceCommand::SetViewMatrix(*matrix));
    }

    fn set_projection_matrix(&mut self, matrix: &Mat4) {
        self.commands.push(DeviceCommand::SetProjectionMatrix(*matrix));
    }

    fn set_ambient_light(&mut self, colour: Colour) {
        self.commands.push(DeviceCommand::SetAmbientLight(colour));
    }

    fn use_lights(&mut self, lights: &[&Light], limit: usize) {
        let count = lights.len().min(limit);
        self.state.light_count = count;
        self.commands.push(DeviceCommand::UseLights(count));
    }

    fn set_lighting_enabled(&mut self, enabled: bool) {
        self.state.lighting_enabled = enabled;
        self.commands.push(DeviceCommand::SetLightingEnabled(enabled));
    }

    fn set_surface_params(&mut self, params: &SurfaceParams) {
        self.commands.push(DeviceCommand::SetSurfaceParams(*params));
    }

    fn set_shading_type(&mut self, mode: ShadeMode) {
        self.commands.push(DeviceCommand::SetShadingType(mode));
    }

    fn set_fog(&mut self, fog: &FogSettings) {
        self.commands.push(DeviceCommand::SetFog(*fog));
    }

    fn set_normalise_normals(&mut self, enabled: bool) {
        self.commands.push(DeviceCommand::SetNormaliseNormals(enabled));
    }

    fn set_scene_blending(&mut self, blend: SceneBlend) {
        self.state.scene_blend = blend;
        self.commands.push(DeviceCommand::SetSceneBlending(blend));
    }

    fn set_texture_unit(&mut self, unit: usize, state: &BoundTextureUnit<'_>) {
        let texture = match state.texture {
            BoundTexture::Named(name) => RecordedTexture::Named(name.to_string()),
            BoundTexture::Target(target) => RecordedTexture::Target(target),
            BoundTexture::None => RecordedTexture::None,
        };
        self.state.texture_units = self.state.texture_units.max(unit + 1);
        self.commands.push(DeviceCommand::SetTextureUnit {
            unit,
            texture,
            colour_operation: state.colour_operation,
            projective: state.projector.is_some(),
        });
    }

    fn disable_texture_units_from(&mut self, unit: usize) {
        self.state.texture_units = self.state.texture_units.min(unit);
        self.commands.push(DeviceCommand::DisableTextureUnitsFrom(unit));
    }

    fn set_depth_check_enabled(&mut self, enabled: bool) {
        self.commands.push(DeviceCommand::SetDepthCheck(enabled));
    }

    fn set_depth_write_enabled(&mut self, enabled: bool) {
        self.commands.push(DeviceCommand::SetDepthWrite(enabled));
    }

    fn set_depth_function(&mut self, function: CompareFunction) {
        self.state.depth_function = function;
        self.commands.push(DeviceCommand::SetDepthFunction(function));
    }

    fn set_depth_bias(&mut self, bias: f32) {
        self.commands.push(DeviceCommand::SetDepthBias(bias));
    }

    fn set_alpha_reject(&mut self, function: CompareFunction, value: u8) {
        self.commands.push(DeviceCommand::SetAlphaReject(function, value));
    }

    fn set_colour_buffer_write_enabled(&mut self, red: bool, green: bool, blue: bool, alpha: bool) {
        self.state.colour_write = red || green || blue || alpha;
        self.commands.push(DeviceCommand::SetColourWrite([red, green, blue, alpha]));
    }

    fn set_culling_mode(&mut self, mode: CullingMode) {
        self.state.culling = mode;
        self.commands.push(DeviceCommand::SetCullingMode(mode));
    }

    fn set_stencil_check_enabled(&mut self, enabled: bool) {
        self.state.stencil_check = enabled;
        self.commands.push(DeviceCommand::SetStencilCheck(enabled));
    }

    fn set_stencil_buffer_params(&mut self, params: &StencilParams) {
        self.state.stencil = *params;
        self.commands.push(DeviceCommand::SetStencilParams(*params));
    }

    fn set_scissor_test(&mut self, enabled: bool, rect: ScissorRect) {
        self.commands.push(DeviceCommand::SetScissorTest(enabled, rect));
    }

    fn bind_gpu_program(&mut self, program: &GpuProgramRef) {
        if program.program_type == GpuProgramType::Vertex {
            self.state.vertex_program = Some(program.name.clone());
        }
        self.commands.push(DeviceCommand::BindProgram(program.clone()));
    }

    fn unbind_gpu_program(&mut self, program_type: GpuProgramType) {
        if program_type == GpuProgramType::Vertex {
            self.state.vertex_program = None;
        }
        self.commands.push(DeviceCommand::UnbindProgram(program_type));
    }

    fn bind_gpu_program_parameters(&mut self, program_type: GpuProgramType, constants: &[ResolvedConstant]) {
        self.commands
            .push(DeviceCommand::BindProgramParameters(program_type, constants.to_vec()));
    }

    fn update_buffer(&mut self, buffer: BufferId, data: &[u8]) -> RenderResult<()> {
        self.commands.push(DeviceCommand::UpdateBuffer { buffer, len: data.len() });
        Ok(())
    }

    fn render(&mut self, operation: &RenderOperation) -> RenderResult<()> {
        if operation.is_empty() {
            return Err(RenderError::RenderingFailed("draw with no geometry".to_string()));
        }
        if self.state.target.is_none() && self.state.stencil_check && self.state.stencil.writes() {
            self.stencil_dirty = true;
        }
        let state = &self.state;
        self.commands.push(DeviceCommand::Render(DrawRecord {
            operation: *operation,
            target: state.target,
            stencil_check: state.stencil_check,
            stencil: state.stencil,
            vertex_program: state.vertex_program.clone(),
            light_count: state.light_count,
            scene_blend: state.scene_blend,
            lighting_enabled: state.lighting_enabled,
            culling: state.culling,
            depth_function: state.depth_function,
            colour_write: state.colour_write,
            texture_units: state.texture_units,
        }));
        Ok(())
    }
}
