//! Render system abstraction
//!
//! The scene manager drives a [`RenderSystem`] with state changes and draw
//! calls. Implementations wrap a real graphics API; the crate ships a
//! recording implementation used by tests and the demo.

use std::sync::atomic::{AtomicU64, Ordering};

use bitflags::bitflags;

use crate::foundation::math::Mat4;

use super::colour::Colour;
use super::gpu_program::{GpuProgramRef, GpuProgramType, ResolvedConstant};
use super::light::Light;
use super::pass::{
    CompareFunction, CullingMode, FogSettings, LayerBlendOperation, SceneBlend, ShadeMode,
    TextureAddressing,
};
use super::renderable::{BufferId, RenderOperation};
use super::RenderResult;

bitflags! {
    /// Optional device features
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Capabilities: u32 {
        /// A stencil buffer is available
        const HW_STENCIL = 1 << 0;
        /// Separate stencil operations for front and back faces
        const TWO_SIDED_STENCIL = 1 << 1;
        /// Wrapping stencil increment and decrement
        const STENCIL_WRAP = 1 << 2;
        /// Scissor rectangle
        const SCISSOR_TEST = 1 << 3;
        /// Programmable vertex stage
        const VERTEX_PROGRAM = 1 << 4;
        /// Programmable fragment stage
        const FRAGMENT_PROGRAM = 1 << 5;
        /// Projection with the far plane at infinity
        const INFINITE_FAR_PLANE = 1 << 6;
        /// Rendering into textures
        const RENDER_TO_TEXTURE = 1 << 7;
    }
}

bitflags! {
    /// Frame buffer planes to clear
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct FrameBufferType: u8 {
        /// Colour
        const COLOUR = 1 << 0;
        /// Depth
        const DEPTH = 1 << 1;
        /// Stencil
        const STENCIL = 1 << 2;
    }
}

/// Capability report of a device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderSystemCapabilities {
    /// Feature flags
    pub flags: Capabilities,
    /// Supported program syntaxes, in no particular order
    pub program_syntaxes: Vec<String>,
    /// Texture units available to fixed-function passes
    pub num_texture_units: usize,
    /// Stencil buffer depth in bits
    pub stencil_bits: u8,
}

impl RenderSystemCapabilities {
    /// A device supporting everything
    pub fn full() -> Self {
        Self {
            flags: Capabilities::all(),
            program_syntaxes: vec!["arbvp1".to_string(), "vs_1_1".to_string(), "arbfp1".to_string()],
            num_texture_units: 8,
            stencil_bits: 8,
        }
    }

    /// Fixed-function device with a stencil buffer
    pub fn fixed_function() -> Self {
        Self {
            flags: Capabilities::HW_STENCIL | Capabilities::RENDER_TO_TEXTURE,
            program_syntaxes: Vec::new(),
            num_texture_units: 2,
            stencil_bits: 8,
        }
    }

    /// True if every flag in `flags` is supported
    pub const fn supports(&self, flags: Capabilities) -> bool {
        self.flags.contains(flags)
    }

    /// True if a program syntax is supported
    pub fn supports_syntax(&self, syntax: &str) -> bool {
        self.program_syntaxes.iter().any(|s| s == syntax)
    }
}

/// Stencil buffer operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StencilOperation {
    /// Leave the value
    Keep,
    /// Set to zero
    Zero,
    /// Set to the reference value
    Replace,
    /// Increment, clamping at the maximum
    Increment,
    /// Decrement, clamping at zero
    Decrement,
    /// Increment, wrapping to zero
    IncrementWrap,
    /// Decrement, wrapping to the maximum
    DecrementWrap,
    /// Bitwise invert
    Invert,
}

/// Stencil test and update configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StencilParams {
    /// Test against the reference
    pub function: CompareFunction,
    /// Reference value
    pub reference: u32,
    /// Mask applied to both sides of the comparison
    pub mask: u32,
    /// Operation when the stencil test fails
    pub stencil_fail_op: StencilOperation,
    /// Operation when the stencil test passes and the depth test fails
    pub depth_fail_op: StencilOperation,
    /// Operation when both tests pass
    pub pass_op: StencilOperation,
    /// Apply the inverse operations to back faces
    pub two_sided: bool,
}

impl Default for StencilParams {
    fn default() -> Self {
        Self {
            function: CompareFunction::AlwaysPass,
            reference: 0,
            mask: 0xFFFF_FFFF,
            stencil_fail_op: StencilOperation::Keep,
            depth_fail_op: StencilOperation::Keep,
            pass_op: StencilOperation::Keep,
            two_sided: false,
        }
    }
}

impl StencilParams {
    /// Test-only configuration: compare against a reference, never write
    pub fn test(function: CompareFunction, reference: u32) -> Self {
        Self { function, reference, ..Self::default() }
    }

    /// True if drawing with these params can change stencil contents
    pub fn writes(&self) -> bool {
        self.stencil_fail_op != StencilOperation::Keep
            || self.depth_fail_op != StencilOperation::Keep
            || self.pass_op != StencilOperation::Keep
    }
}

/// Handle to a render target created by the render system
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RenderTargetId(pub u32);

/// Viewport rectangle in pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ViewportRect {
    /// Left edge
    pub left: i32,
    /// Top edge
    pub top: i32,
    /// Width
    pub width: i32,
    /// Height
    pub height: i32,
}

impl ViewportRect {
    /// Rectangle anchored at the origin
    pub const fn sized(width: i32, height: i32) -> Self {
        Self { left: 0, top: 0, width, height }
    }
}

/// Scissor rectangle in pixels, right and bottom exclusive
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScissorRect {
    /// Left edge
    pub left: i32,
    /// Top edge
    pub top: i32,
    /// Right edge
    pub right: i32,
    /// Bottom edge
    pub bottom: i32,
}

/// Material colours for fixed-function lighting
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SurfaceParams {
    /// Ambient reflectance
    pub ambient: Colour,
    /// Diffuse reflectance
    pub diffuse: Colour,
    /// Specular reflectance
    pub specular: Colour,
    /// Self illumination
    pub emissive: Colour,
    /// Specular exponent
    pub shininess: f32,
}

/// What a bound texture unit samples
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoundTexture<'a> {
    /// Named texture resource
    Named(&'a str),
    /// A render texture
    Target(RenderTargetId),
    /// Nothing; colour operations only
    None,
}

/// Texture unit state with every indirection resolved
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundTextureUnit<'a> {
    /// Texture to sample
    pub texture: BoundTexture<'a>,
    /// Layer blend
    pub colour_operation: LayerBlendOperation,
    /// Manual colour replacing the texture colour
    pub manual_colour: Option<Colour>,
    /// Addressing mode
    pub addressing: TextureAddressing,
    /// Projective mapping matrix from world to texture space
    pub projector: Option<Mat4>,
}

/// Identity of one device instance
///
/// Buffers written to one device are not present on another, so uploads
/// remember the id they were written to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceId(u64);

impl DeviceId {
    /// An id no other device in this process holds
    pub fn unique() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

/// Device interface driven by the scene manager
///
/// Calls are immediate-mode state changes. Only [`RenderSystem::render`],
/// [`RenderSystem::update_buffer`] and [`RenderSystem::create_render_texture`]
/// can fail.
pub trait RenderSystem {
    /// Capability report
    fn capabilities(&self) -> &RenderSystemCapabilities;
    /// Identity of this device
    fn device_id(&self) -> DeviceId;

    /// Create a square colour render texture
    fn create_render_texture(&mut self, name: &str, size: u32) -> RenderResult<RenderTargetId>;
    /// Destroy a render texture
    fn destroy_render_texture(&mut self, target: RenderTargetId);
    /// Direct output to a render texture, or to the main target with `None`
    fn set_render_target(&mut self, target: Option<RenderTargetId>);
    /// Set the viewport on the current target
    fn set_viewport(&mut self, rect: ViewportRect);

    /// Start a frame on the current target
    fn begin_frame(&mut self);
    /// Finish a frame on the current target
    fn end_frame(&mut self);
    /// Clear frame buffer planes
    fn clear_frame_buffer(&mut self, buffers: FrameBufferType, colour: Colour, depth: f32, stencil: u32);

    /// Set one or more world matrices; more than one means blended geometry
    fn set_world_matrices(&mut self, matrices: &[Mat4]);
    /// Set the view matrix
    fn set_view_matrix(&mut self, matrix: &Mat4);
    /// Set the projection matrix
    fn set_projection_matrix(&mut self, matrix: &Mat4);

    /// Scene ambient light
    fn set_ambient_light(&mut self, colour: Colour);
    /// Bind up to `limit` lights for fixed-function lighting
    fn use_lights(&mut self, lights: &[&Light], limit: usize);
    /// Fixed-function lighting switch
    fn set_lighting_enabled(&mut self, enabled: bool);
    /// Fixed-function material colours
    fn set_surface_params(&mut self, params: &SurfaceParams);
    /// Shading interpolation
    fn set_shading_type(&mut self, mode: ShadeMode);
    /// Fixed-function fog
    fn set_fog(&mut self, fog: &FogSettings);
    /// Renormalise normals after scaling
    fn set_normalise_normals(&mut self, enabled: bool);

    /// Frame buffer blending
    fn set_scene_blending(&mut self, blend: SceneBlend);
    /// Configure one texture unit
    fn set_texture_unit(&mut self, unit: usize, state: &BoundTextureUnit<'_>);
    /// Disable every texture unit from `unit` upwards
    fn disable_texture_units_from(&mut self, unit: usize);

    /// Depth test switch
    fn set_depth_check_enabled(&mut self, enabled: bool);
    /// Depth write switch
    fn set_depth_write_enabled(&mut self, enabled: bool);
    /// Depth comparison
    fn set_depth_function(&mut self, function: CompareFunction);
    /// Constant depth bias
    fn set_depth_bias(&mut self, bias: f32);
    /// Alpha rejection test
    fn set_alpha_reject(&mut self, function: CompareFunction, value: u8);
    /// Colour channel writes
    fn set_colour_buffer_write_enabled(&mut self, red: bool, green: bool, blue: bool, alpha: bool);
    /// Face culling
    fn set_culling_mode(&mut self, mode: CullingMode);

    /// Stencil test switch
    fn set_stencil_check_enabled(&mut self, enabled: bool);
    /// Stencil test and update configuration
    fn set_stencil_buffer_params(&mut self, params: &StencilParams);
    /// Scissor test
    fn set_scissor_test(&mut self, enabled: bool, rect: ScissorRect);

    /// Bind a program
    fn bind_gpu_program(&mut self, program: &GpuProgramRef);
    /// Return a stage to fixed function
    fn unbind_gpu_program(&mut self, program_type: GpuProgramType);
    /// Upload constants for the bound program of a stage
    fn bind_gpu_program_parameters(&mut self, program_type: GpuProgramType, constants: &[ResolvedConstant]);

    /// Replace the contents of a geometry buffer
    fn update_buffer(&mut self, buffer: BufferId, data: &[u8]) -> RenderResult<()>;
    /// Draw
    fn render(&mut self, operation: &RenderOperation) -> RenderResult<()>;
}
