//! Render passes and the pass arena
//!
//! A [`Pass`] is one complete set of fixed-function and program state used to
//! draw geometry. Passes live in a [`PassStore`] and are addressed by
//! [`PassHandle`]; the render queue keys its solid maps by handle plus the
//! pass's sort hash.
//!
//! Editing a pass through [`PassStore::get_mut`] or retiring it with
//! [`PassStore::retire`] does not touch the queue immediately. The handle is
//! recorded as pending, queue clearing drops map entries for pending handles,
//! and [`PassStore::process_pending_updates`] then recomputes dirty hashes and
//! frees retired passes.

use serde::{Deserialize, Serialize};
use slotmap::SlotMap;

use super::colour::Colour;
use super::gpu_program::GpuProgramUsage;
use super::light::LightType;

slotmap::new_key_type! {
    /// Stable handle to a pass stored in a [`PassStore`]
    pub struct PassHandle;
}

/// Blend factor for scene blending
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SceneBlendFactor {
    /// 1
    One,
    /// 0
    Zero,
    /// Destination colour
    DestColour,
    /// Source colour
    SourceColour,
    /// 1 - destination colour
    OneMinusDestColour,
    /// 1 - source colour
    OneMinusSourceColour,
    /// Destination alpha
    DestAlpha,
    /// Source alpha
    SourceAlpha,
    /// 1 - destination alpha
    OneMinusDestAlpha,
    /// 1 - source alpha
    OneMinusSourceAlpha,
}

/// Source and destination blend factors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SceneBlend {
    /// Factor applied to the incoming fragment
    pub source: SceneBlendFactor,
    /// Factor applied to the frame buffer contents
    pub dest: SceneBlendFactor,
}

impl SceneBlend {
    /// Overwrite the frame buffer
    pub const REPLACE: Self = Self::new(SceneBlendFactor::One, SceneBlendFactor::Zero);
    /// Add to the frame buffer
    pub const ADD: Self = Self::new(SceneBlendFactor::One, SceneBlendFactor::One);
    /// Multiply the frame buffer by the fragment colour
    pub const MODULATE: Self = Self::new(SceneBlendFactor::DestColour, SceneBlendFactor::Zero);
    /// Classic alpha blending
    pub const ALPHA: Self =
        Self::new(SceneBlendFactor::SourceAlpha, SceneBlendFactor::OneMinusSourceAlpha);

    /// Create a blend from explicit factors
    pub const fn new(source: SceneBlendFactor, dest: SceneBlendFactor) -> Self {
        Self { source, dest }
    }
}

impl Default for SceneBlend {
    fn default() -> Self {
        Self::REPLACE
    }
}

/// Comparison used by depth, stencil and alpha tests
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompareFunction {
    /// Never passes
    AlwaysFail,
    /// Always passes
    AlwaysPass,
    /// Passes when less than
    Less,
    /// Passes when less or equal
    LessEqual,
    /// Passes when equal
    Equal,
    /// Passes when not equal
    NotEqual,
    /// Passes when greater or equal
    GreaterEqual,
    /// Passes when greater
    Greater,
}

/// Hardware face culling
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CullingMode {
    /// Draw both faces
    None,
    /// Cull faces wound clockwise as seen by the camera
    Clockwise,
    /// Cull faces wound anticlockwise as seen by the camera
    Anticlockwise,
}

/// Shading interpolation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShadeMode {
    /// One colour per face
    Flat,
    /// Interpolated vertex colours
    Gouraud,
    /// Per-fragment normal interpolation
    Phong,
}

/// Fog falloff
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FogMode {
    /// No fog
    None,
    /// Exponential density
    Exp,
    /// Squared exponential density
    Exp2,
    /// Linear between start and end
    Linear,
}

/// Fog parameters, either scene-wide or as a pass override
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FogSettings {
    /// Falloff mode
    pub mode: FogMode,
    /// Fog colour
    pub colour: Colour,
    /// Density for the exponential modes
    pub density: f32,
    /// Linear start distance
    pub start: f32,
    /// Linear end distance
    pub end: f32,
}

impl FogSettings {
    /// Linear fog between two distances
    pub const fn linear(colour: Colour, start: f32, end: f32) -> Self {
        Self { mode: FogMode::Linear, colour, density: 0.0, start, end }
    }
}

impl Default for FogSettings {
    fn default() -> Self {
        Self { mode: FogMode::None, colour: Colour::WHITE, density: 0.001, start: 0.0, end: 1.0 }
    }
}

/// How a texture layer combines with the colour below it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LayerBlendOperation {
    /// Replace the incoming colour
    Replace,
    /// Add to the incoming colour
    Add,
    /// Multiply with the incoming colour
    Modulate,
    /// Blend by the texture alpha
    AlphaBlend,
    /// Keep the incoming colour; the texture only contributes alpha
    PassThrough,
}

/// Texture coordinate addressing outside `[0, 1]`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextureAddressing {
    /// Repeat
    Wrap,
    /// Repeat mirrored
    Mirror,
    /// Clamp to the edge texel
    Clamp,
}

/// What a texture unit samples from
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TextureSource {
    /// A texture resource by name
    Named(String),
    /// The shadow texture being applied during the receiver stage
    ShadowTexture,
    /// No texture, colour operations only
    Blank,
}

impl TextureSource {
    fn hash_name(&self) -> &str {
        match self {
            Self::Named(name) => name,
            Self::ShadowTexture => "<shadow texture>",
            Self::Blank => "",
        }
    }
}

/// One texture layer of a pass
#[derive(Debug, Clone, PartialEq)]
pub struct TextureUnitState {
    /// Texture to sample
    pub source: TextureSource,
    /// Combination with the layers below
    pub colour_operation: LayerBlendOperation,
    /// Manual colour used instead of the texture colour, when set
    pub manual_colour: Option<Colour>,
    /// Coordinate addressing
    pub addressing: TextureAddressing,
    /// Project the texture from the active shadow projector
    pub projective: bool,
    /// Texture coordinate set
    pub tex_coord_set: u32,
}

impl TextureUnitState {
    /// Modulating unit sampling a named texture
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            source: TextureSource::Named(name.into()),
            colour_operation: LayerBlendOperation::Modulate,
            manual_colour: None,
            addressing: TextureAddressing::Wrap,
            projective: false,
            tex_coord_set: 0,
        }
    }

    /// Clamped, projectively mapped unit sampling the current shadow texture
    pub fn shadow_projector() -> Self {
        Self {
            source: TextureSource::ShadowTexture,
            addressing: TextureAddressing::Clamp,
            projective: true,
            ..Self::named("")
        }
    }

    /// Set the layer blend operation
    #[must_use]
    pub fn with_colour_operation(mut self, op: LayerBlendOperation) -> Self {
        self.colour_operation = op;
        self
    }

    /// Set the addressing mode
    #[must_use]
    pub fn with_addressing(mut self, addressing: TextureAddressing) -> Self {
        self.addressing = addressing;
        self
    }

    /// Set projective mapping from the shadow projector
    #[must_use]
    pub fn with_projective(mut self, projective: bool) -> Self {
        self.projective = projective;
        self
    }
}

/// Alpha rejection test
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AlphaReject {
    /// Comparison against the fragment alpha
    pub function: CompareFunction,
    /// Reference value
    pub value: u8,
}

impl Default for AlphaReject {
    fn default() -> Self {
        Self { function: CompareFunction::AlwaysPass, value: 0 }
    }
}

/// A single render pass
#[derive(Debug, Clone)]
pub struct Pass {
    index: u16,
    hash: u32,

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

    /// Fixed-function lighting on or off
    pub lighting_enabled: bool,
    /// Upper bound on lights bound per draw
    pub max_simultaneous_lights: usize,
    /// Render once per light instead of once with all lights
    pub iterate_per_light: bool,
    /// Restrict per-light iteration to one light type
    pub only_light_type: Option<LightType>,
    /// Shading interpolation
    pub shading: ShadeMode,
    /// Fog used instead of the scene fog, when set
    pub fog_override: Option<FogSettings>,

    /// Frame buffer blending
    pub scene_blend: SceneBlend,
    /// Depth test enabled
    pub depth_check: bool,
    /// Depth writes enabled
    pub depth_write: bool,
    /// Depth comparison
    pub depth_function: CompareFunction,
    /// Constant depth bias
    pub depth_bias: f32,
    /// Alpha rejection
    pub alpha_reject: AlphaReject,
    /// Colour writes enabled
    pub colour_write: bool,
    /// Face culling
    pub culling: CullingMode,

    /// Texture layers
    pub texture_units: Vec<TextureUnitState>,

    /// Vertex program replacing fixed-function transform and lighting
    pub vertex_program: Option<GpuProgramUsage>,
    /// Fragment program replacing fixed-function texturing and fog
    pub fragment_program: Option<GpuProgramUsage>,
    /// Vertex program substituted when rendering into a shadow texture
    pub shadow_caster_vertex_program: Option<GpuProgramUsage>,
    /// Vertex program substituted when receiving texture shadows
    pub shadow_receiver_vertex_program: Option<GpuProgramUsage>,
}

impl Default for Pass {
    fn default() -> Self {
        Self {
            index: 0,
            hash: 0,
            ambient: Colour::WHITE,
            diffuse: Colour::WHITE,
            specular: Colour::BLACK,
            emissive: Colour::BLACK,
            shininess: 0.0,
            lighting_enabled: true,
            max_simultaneous_lights: 8,
            iterate_per_light: false,
            only_light_type: None,
            shading: ShadeMode::Gouraud,
            fog_override: None,
            scene_blend: SceneBlend::REPLACE,
            depth_check: true,
            depth_write: true,
            depth_function: CompareFunction::LessEqual,
            depth_bias: 0.0,
            alpha_reject: AlphaReject::default(),
            colour_write: true,
            culling: CullingMode::Clockwise,
            texture_units: Vec::new(),
            vertex_program: None,
            fragment_program: None,
            shadow_caster_vertex_program: None,
            shadow_receiver_vertex_program: None,
        }
    }
}

impl Pass {
    /// Create a default pass
    pub fn new() -> Self {
        Self::default()
    }

    /// Position of this pass inside its technique
    pub const fn index(&self) -> u16 {
        self.index
    }

    pub(crate) fn set_index(&mut self, index: u16) {
        self.index = index;
    }

    /// Sort hash as last computed by the owning store
    pub const fn hash(&self) -> u32 {
        self.hash
    }

    /// Compute the sort hash from the current state
    ///
    /// Top 4 bits hold the pass index, then 14 bits for the texture name of
    /// unit 0 and 14 bits for unit 1. Passes sharing textures sort together.
    pub fn compute_hash(&self) -> u32 {
        const MASK: u32 = (1 << 14) - 1;
        let unit_hash = |i: usize| {
            self.texture_units
                .get(i)
                .map_or(0, |unit| fnv1a(unit.source.hash_name()) & MASK)
        };
        (u32::from(self.index & 0xF) << 28) | (unit_hash(0) << 14) | unit_hash(1)
    }

    /// True if drawing this pass depends on what is already in the frame buffer
    pub fn is_transparent(&self) -> bool {
        use SceneBlendFactor::{DestAlpha, DestColour, OneMinusDestAlpha, OneMinusDestColour, Zero};
        !(self.scene_blend.dest == Zero
            && !matches!(
                self.scene_blend.source,
                DestColour | OneMinusDestColour | DestAlpha | OneMinusDestAlpha
            ))
    }

    /// True if only the ambient term can reach the frame buffer
    pub fn is_ambient_only(&self) -> bool {
        !self.lighting_enabled || !self.colour_write || (self.diffuse.is_black() && self.specular.is_black())
    }

    /// True if the pass binds a vertex program
    pub const fn has_vertex_program(&self) -> bool {
        self.vertex_program.is_some()
    }

    /// True if the pass binds a fragment program
    pub const fn has_fragment_program(&self) -> bool {
        self.fragment_program.is_some()
    }

    /// Add a texture layer
    pub fn add_texture_unit(&mut self, unit: TextureUnitState) -> &mut Self {
        self.texture_units.push(unit);
        self
    }
}

/// 32-bit FNV-1a
///
/// Pass hashes order the solid maps, so they must not vary between runs or
/// processes the way a randomly seeded hasher would.
fn fnv1a(text: &str) -> u32 {
    text.bytes().fold(0x811c_9dc5_u32, |hash, byte| {
        (hash ^ u32::from(byte)).wrapping_mul(0x0100_0193)
    })
}

/// A pass paired with the programs it should actually bind
///
/// Shadow stages substitute a caster or receiver vertex program without
/// copying the pass.
#[derive(Debug, Clone, Copy)]
pub struct ResolvedPass<'a> {
    /// Fixed-function and blend state
    pub pass: &'a Pass,
    /// Vertex program to bind, if any
    pub vertex_program: Option<&'a GpuProgramUsage>,
    /// Fragment program to bind, if any
    pub fragment_program: Option<&'a GpuProgramUsage>,
}

impl<'a> ResolvedPass<'a> {
    /// Use the pass as authored
    pub fn new(pass: &'a Pass) -> Self {
        Self {
            pass,
            vertex_program: pass.vertex_program.as_ref(),
            fragment_program: pass.fragment_program.as_ref(),
        }
    }

    /// Override the vertex program
    #[must_use]
    pub const fn with_vertex_program(mut self, program: Option<&'a GpuProgramUsage>) -> Self {
        self.vertex_program = program;
        self
    }
}

/// Arena owning every pass, with deferred hash updates and deletion
#[derive(Debug, Default)]
pub struct PassStore {
    passes: SlotMap<PassHandle, Pass>,
    dirty: Vec<PassHandle>,
    graveyard: Vec<PassHandle>,
}

impl PassStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a pass, computing its hash
    pub fn insert(&mut self, mut pass: Pass) -> PassHandle {
        pass.hash = pass.compute_hash();
        self.passes.insert(pass)
    }

    /// Look up a pass
    pub fn get(&self, handle: PassHandle) -> Option<&Pass> {
        self.passes.get(handle)
    }

    /// Mutable access; the pass is marked dirty and rehashed on the next sweep
    pub fn get_mut(&mut self, handle: PassHandle) -> Option<&mut Pass> {
        let pass = self.passes.get_mut(handle)?;
        if !self.dirty.contains(&handle) {
            self.dirty.push(handle);
        }
        Some(pass)
    }

    /// Schedule a pass for deletion on the next sweep
    pub fn retire(&mut self, handle: PassHandle) {
        if self.passes.contains_key(handle) && !self.graveyard.contains(&handle) {
            self.graveyard.push(handle);
        }
    }

    /// True if the pass is dirty or retired and waiting for a sweep
    pub fn is_pending(&self, handle: PassHandle) -> bool {
        self.dirty.contains(&handle) || self.graveyard.contains(&handle)
    }

    /// True if a sweep has work to do
    pub fn has_pending(&self) -> bool {
        !self.dirty.is_empty() || !self.graveyard.is_empty()
    }

    /// True if the pass is retired
    pub fn is_retired(&self, handle: PassHandle) -> bool {
        self.graveyard.contains(&handle)
    }

    /// Number of live passes, retired ones included until swept
    pub fn len(&self) -> usize {
        self.passes.len()
    }

    /// True if no passes are stored
    pub fn is_empty(&self) -> bool {
        self.passes.is_empty()
    }

    /// Recompute dirty hashes and free retired passes
    ///
    /// Must only run after the render queue has dropped its references to
    /// pending handles.
    pub fn process_pending_updates(&mut self) {
        if !self.dirty.is_empty() || !self.graveyard.is_empty() {
            log::trace!("Pass sweep: {} rehashed, {} freed", self.dirty.len(), self.graveyard.len());
        }
        for handle in self.dirty.drain(..) {
            if let Some(pass) = self.passes.get_mut(handle) {
                pass.hash = pass.compute_hash();
            }
        }
        for handle in self.graveyard.drain(..) {
            self.passes.remove(handle);
        }
    }
}
