//! Translation of passes into device state
//!
//! [`PassStateCache`] remembers what it last bound so consecutive draws with
//! the same pass skip the fixed-function state entirely. Programs are tracked
//! separately: switching between programmable and fixed-function pipelines
//! must unbind the stage explicitly.

use crate::foundation::math::Mat4;
use crate::render::gpu_program::{GpuProgramRef, GpuProgramType, GpuProgramUsage};
use crate::render::pass::{FogSettings, PassHandle, ResolvedPass, TextureSource};
use crate::render::render_system::{BoundTexture, BoundTextureUnit, RenderSystem, RenderTargetId, SurfaceParams};

/// The shadow texture receivers currently sample
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ShadowTextureBinding {
    /// Render texture holding the shadow
    pub target: RenderTargetId,
    /// World to texture space projector
    pub projector: Mat4,
}

/// Frame state that passes are resolved against
#[derive(Debug, Clone, Copy)]
pub struct PassEnvironment<'a> {
    /// Fog used by passes without their own
    pub scene_fog: &'a FogSettings,
    /// Shadow texture for [`TextureSource::ShadowTexture`] units
    pub shadow_texture: Option<ShadowTextureBinding>,
}

#[derive(Debug, Clone, PartialEq)]
struct BoundPass {
    handle: PassHandle,
    shadow_texture: Option<ShadowTextureBinding>,
    scene_fog: FogSettings,
}

/// Last bound pass and programs
///
/// A program slot of `None` means the stage's binding is unknown;
/// `Some(None)` means it is known to be fixed function.
#[derive(Debug, Default)]
pub struct PassStateCache {
    pass: Option<BoundPass>,
    vertex_program: Option<Option<GpuProgramRef>>,
    fragment_program: Option<Option<GpuProgramRef>>,
}

impl PassStateCache {
    /// Create an empty cache
    pub fn new() -> Self {
        Self::default()
    }

    /// Forget the bound state; the next pass is applied in full
    ///
    /// Needed whenever device state is changed behind the cache's back, such
    /// as during shadow volume rendering.
    pub fn invalidate(&mut self) {
        self.pass = None;
        self.vertex_program = None;
        self.fragment_program = None;
    }

    /// Bind a pass, returning false if it was already bound
    pub fn apply(
        &mut self,
        device: &mut dyn RenderSystem,
        handle: PassHandle,
        resolved: &ResolvedPass<'_>,
        env: &PassEnvironment<'_>,
    ) -> bool {
        let programs_changed = self.bind_program(device, GpuProgramType::Vertex, resolved.vertex_program)
            | self.bind_program(device, GpuProgramType::Fragment, resolved.fragment_program);

        let key = BoundPass { handle, shadow_texture: env.shadow_texture, scene_fog: *env.scene_fog };
        if !programs_changed && self.pass.as_ref() == Some(&key) {
            return false;
        }

        let pass = resolved.pass;
        if pass.lighting_enabled {
            device.set_surface_params(&SurfaceParams {
                ambient: pass.ambient,
                diffuse: pass.diffuse,
                specular: pass.specular,
                emissive: pass.emissive,
                shininess: pass.shininess,
            });
        }
        device.set_lighting_enabled(pass.lighting_enabled);
        device.set_shading_type(pass.shading);

        if resolved.fragment_program.is_none() {
            device.set_fog(pass.fog_override.as_ref().unwrap_or(env.scene_fog));
        }

        device.set_scene_blending(pass.scene_blend);

        for (index, unit) in pass.texture_units.iter().enumerate() {
            let texture = match &unit.source {
                TextureSource::Named(name) => BoundTexture::Named(name),
                TextureSource::ShadowTexture => {
                    env.shadow_texture.map_or(BoundTexture::None, |binding| BoundTexture::Target(binding.target))
                }
                TextureSource::Blank => BoundTexture::None,
            };
            let projector = if unit.projective { env.shadow_texture.map(|binding| binding.projector) } else { None };
            device.set_texture_unit(
                index,
                &BoundTextureUnit {
                    texture,
                    colour_operation: unit.colour_operation,
                    manual_colour: unit.manual_colour,
                    addressing: unit.addressing,
                    projector,
                },
            );
        }
        device.disable_texture_units_from(pass.texture_units.len());

        device.set_depth_check_enabled(pass.depth_check);
        device.set_depth_write_enabled(pass.depth_write);
        device.set_depth_function(pass.depth_function);
        device.set_depth_bias(pass.depth_bias);
        device.set_alpha_reject(pass.alpha_reject.function, pass.alpha_reject.value);
        let write = pass.colour_write;
        device.set_colour_buffer_write_enabled(write, write, write, write);
        device.set_culling_mode(pass.culling);

        self.pass = Some(key);
        true
    }

    fn bind_program(
        &mut self,
        device: &mut dyn RenderSystem,
        program_type: GpuProgramType,
        usage: Option<&GpuProgramUsage>,
    ) -> bool {
        let slot = match program_type {
            GpuProgramType::Vertex => &mut self.vertex_program,
            GpuProgramType::Fragment => &mut self.fragment_program,
        };
        let wanted = usage.map(|usage| &usage.program);
        if slot.as_ref().is_some_and(|bound| bound.as_ref() == wanted) {
            return false;
        }
        match wanted {
            Some(program) => device.bind_gpu_program(program),
            None => device.unbind_gpu_program(program_type),
        }
        *slot = Some(wanted.cloned());
        true
    }
}
