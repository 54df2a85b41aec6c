//! Built-in passes and geometry used by the shadow techniques

use std::cell::Cell;

use crate::foundation::math::Mat4;
use crate::render::camera::Camera;
use crate::render::colour::Colour;
use crate::render::light::LightList;
use crate::render::material::MaterialHandle;
use crate::render::pass::{
    CompareFunction, CullingMode, FogSettings, LayerBlendOperation, Pass, PassHandle, PassStore,
    SceneBlend, TextureAddressing, TextureSource, TextureUnitState,
};
use crate::render::render_system::{DeviceId, RenderSystem};
use crate::render::renderable::{BufferId, BufferIdAllocator, RenderOperation, Renderable};
use crate::render::RenderResult;

/// Texture faded radially over spot light receivers
pub const SPOT_SHADOW_FADE_TEXTURE: &str = "spot_shadow_fade.png";

/// Colour of debug volumes drawn with depth-fail counting
pub const DEBUG_Z_FAIL_COLOUR: Colour = Colour::rgb(0.7, 0.0, 0.2);

/// Colour of debug volumes drawn with depth-pass counting
pub const DEBUG_Z_PASS_COLOUR: Colour = Colour::rgb(0.0, 0.7, 0.2);

/// Passes owned by the scene manager for shadow rendering
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShadowPasses {
    /// Visible shadow volumes drawn with depth-pass counting
    pub debug_z_pass: PassHandle,
    /// Visible shadow volumes drawn with depth-fail counting
    pub debug_z_fail: PassHandle,
    /// Full screen darkening for modulative stencil shadows
    pub modulative: PassHandle,
    /// Flat colour used for casters rendered into shadow textures
    pub caster: PassHandle,
    /// Projects a shadow texture onto receivers
    pub receiver: PassHandle,
    /// Receiver variant with a radial fade for spot lights
    pub spot_receiver: PassHandle,
}

impl ShadowPasses {
    /// Insert the shadow passes into a store
    pub fn create(passes: &mut PassStore, shadow_colour: Colour) -> Self {
        let debug = |colour| {
            let mut pass = unlit();
            pass.scene_blend = SceneBlend::ADD;
            pass.depth_write = false;
            pass.culling = CullingMode::None;
            pass.add_texture_unit(manual_colour_unit(colour, LayerBlendOperation::Replace));
            pass
        };

        let modulative = {
            let mut pass = unlit();
            pass.scene_blend = SceneBlend::MODULATE;
            pass.depth_check = false;
            pass.depth_write = false;
            pass.culling = CullingMode::None;
            pass.add_texture_unit(manual_colour_unit(shadow_colour, LayerBlendOperation::Modulate));
            pass
        };

        let caster = {
            let mut pass = Pass::new();
            pass.ambient = Colour::WHITE;
            pass.diffuse = Colour::BLACK;
            pass.specular = Colour::BLACK;
            pass.emissive = Colour::BLACK;
            pass
        };

        let receiver = {
            let mut pass = unlit();
            pass.scene_blend = SceneBlend::MODULATE;
            pass.depth_write = false;
            pass.add_texture_unit(TextureUnitState::shadow_projector());
            pass
        };

        let mut spot_receiver = receiver.clone();
        spot_receiver.add_texture_unit(
            TextureUnitState::named(SPOT_SHADOW_FADE_TEXTURE)
                .with_colour_operation(LayerBlendOperation::Add)
                .with_addressing(TextureAddressing::Clamp)
                .with_projective(true),
        );

        Self {
            debug_z_pass: passes.insert(debug(DEBUG_Z_PASS_COLOUR)),
            debug_z_fail: passes.insert(debug(DEBUG_Z_FAIL_COLOUR)),
            modulative: passes.insert(modulative),
            caster: passes.insert(caster),
            receiver: passes.insert(receiver),
            spot_receiver: passes.insert(spot_receiver),
        }
    }

    /// Every pass handle
    pub const fn all(&self) -> [PassHandle; 6] {
        [self.debug_z_pass, self.debug_z_fail, self.modulative, self.caster, self.receiver, self.spot_receiver]
    }

    /// Debug volume pass for a counting method
    pub const fn debug(&self, z_fail: bool) -> PassHandle {
        if z_fail {
            self.debug_z_fail
        } else {
            self.debug_z_pass
        }
    }

    /// Change the colour multiplied into modulative stencil shadows
    pub fn set_shadow_colour(&self, passes: &mut PassStore, colour: Colour) {
        let current = passes
            .get(self.modulative)
            .and_then(|pass| pass.texture_units.first())
            .and_then(|unit| unit.manual_colour);
        if current == Some(colour) {
            return;
        }
        if let Some(unit) = passes.get_mut(self.modulative).and_then(|pass| pass.texture_units.first_mut()) {
            unit.manual_colour = Some(colour);
        }
    }

    /// Fade texture shadows out with distance through receiver fog
    pub fn set_receiver_fade(&self, passes: &mut PassStore, fog: FogSettings) {
        for handle in [self.receiver, self.spot_receiver] {
            if passes.get(handle).is_some_and(|pass| pass.fog_override == Some(fog)) {
                continue;
            }
            if let Some(pass) = passes.get_mut(handle) {
                pass.fog_override = Some(fog);
            }
        }
    }
}

fn unlit() -> Pass {
    let mut pass = Pass::new();
    pass.lighting_enabled = false;
    pass.depth_function = CompareFunction::LessEqual;
    pass
}

fn manual_colour_unit(colour: Colour, operation: LayerBlendOperation) -> TextureUnitState {
    TextureUnitState {
        source: TextureSource::Blank,
        manual_colour: Some(colour),
        ..TextureUnitState::named("")
    }
    .with_colour_operation(operation)
}

/// Quad covering the whole viewport, drawn with identity view and projection
#[derive(Debug)]
pub struct FullScreenQuad {
    vertex_buffer: BufferId,
    index_buffer: BufferId,
    uploaded_to: Cell<Option<DeviceId>>,
}

impl FullScreenQuad {
    const CORNERS: [[f32; 3]; 4] = [[-1.0, 1.0, -1.0], [-1.0, -1.0, -1.0], [1.0, -1.0, -1.0], [1.0, 1.0, -1.0]];
    const INDICES: [u32; 6] = [0, 1, 2, 0, 2, 3];

    /// Allocate buffers for the quad
    pub fn new(buffers: &mut BufferIdAllocator) -> Self {
        Self {
            vertex_buffer: buffers.allocate(),
            index_buffer: buffers.allocate(),
            uploaded_to: Cell::new(None),
        }
    }

    /// Vertex buffer of the quad
    pub const fn vertex_buffer(&self) -> BufferId {
        self.vertex_buffer
    }

    /// Write the quad to the device unless it already holds it
    pub fn upload(&self, device: &mut dyn RenderSystem) -> RenderResult<()> {
        let id = device.device_id();
        if self.uploaded_to.get() == Some(id) {
            return Ok(());
        }
        device.update_buffer(self.vertex_buffer, bytemuck::cast_slice(&Self::CORNERS))?;
        device.update_buffer(self.index_buffer, bytemuck::cast_slice(&Self::INDICES))?;
        self.uploaded_to.set(Some(id));
        Ok(())
    }
}

impl Renderable for FullScreenQuad {
    fn material(&self) -> Option<MaterialHandle> {
        None
    }

    fn render_operation(&self) -> RenderOperation {
        RenderOperation::indexed_triangles(
            self.vertex_buffer,
            Self::CORNERS.len(),
            self.index_buffer,
            0,
            Self::INDICES.len(),
        )
    }

    fn world_transforms(&self, out: &mut Vec<Mat4>) {
        out.push(Mat4::identity());
    }

    fn squared_view_depth(&self, _camera: &Camera) -> f32 {
        0.0
    }

    fn lights(&self) -> LightList {
        Vec::new()
    }

    fn use_identity_view(&self) -> bool {
        true
    }

    fn use_identity_projection(&self) -> bool {
        true
    }
}
