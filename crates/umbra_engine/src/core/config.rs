//! # Scene Manager Configuration
//!
//! Shadow technique selection and tuning, scene ambient light and fog.
//!
//! ## Shadow Options
//!
//! - **Technique**: none, additive or modulative stencil volumes, or
//!   modulative shadow textures
//! - **Textures**: pool size and count for texture shadows
//! - **Distances**: far shadow distance and directional extrusion distance
//! - **Debugging**: visible shadow volumes

use serde::{Deserialize, Serialize};

use crate::config::{Config, ConfigError};
use crate::render::colour::Colour;
use crate::render::pass::FogSettings;

/// Shadow rendering technique
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ShadowTechnique {
    /// No shadows
    #[default]
    None,
    /// Stencil volumes; lighting is accumulated per light where unshadowed
    StencilAdditive,
    /// Stencil volumes; shadowed areas are darkened after normal lighting
    StencilModulative,
    /// Shadow textures projected onto receivers and multiplied in
    TextureModulative,
}

impl ShadowTechnique {
    /// True for both stencil techniques
    pub const fn is_stencil_based(self) -> bool {
        matches!(self, Self::StencilAdditive | Self::StencilModulative)
    }

    /// True for texture shadows
    pub const fn is_texture_based(self) -> bool {
        matches!(self, Self::TextureModulative)
    }

    /// True for techniques that darken a fully lit scene
    pub const fn is_modulative(self) -> bool {
        matches!(self, Self::StencilModulative | Self::TextureModulative)
    }
}

/// # Shadow Settings
///
/// Every tunable of the shadow pipeline. Distances are world units; a far
/// distance of zero means shadows are cast at any distance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShadowSettings {
    /// Active technique
    pub technique: ShadowTechnique,
    /// Edge length of each shadow texture in pixels
    pub texture_size: u32,
    /// Number of shadow textures, which caps the lights casting texture shadows
    pub texture_count: usize,
    /// Colour multiplied into shadowed areas by modulative techniques
    pub colour: Colour,
    /// Casters farther than this from the camera are ignored; zero disables
    pub far_distance: f32,
    /// How far directional light volumes and caster searches are extruded
    pub dir_light_extrusion_distance: f32,
    /// Capacity of the shared shadow volume index buffer, in indices
    pub index_buffer_size: usize,
    /// Fraction of the far distance the directional shadow camera is moved forward
    pub texture_offset: f32,
    /// Fraction of the far distance where texture shadows start fading out
    pub texture_fade_start: f32,
    /// Fraction of the far distance where texture shadows are gone
    pub texture_fade_end: f32,
    /// Extrude volumes to infinity when the device supports an infinite far plane
    pub use_infinite_far_plane: bool,
    /// Draw shadow volumes visibly
    pub debug_shadows: bool,
}

impl Default for ShadowSettings {
    fn default() -> Self {
        Self {
            technique: ShadowTechnique::None,
            texture_size: 512,
            texture_count: 1,
            colour: Colour::rgb(0.25, 0.25, 0.25),
            far_distance: 0.0,
            dir_light_extrusion_distance: 10_000.0,
            index_buffer_size: 51_200,
            texture_offset: 0.6,
            texture_fade_start: 0.7,
            texture_fade_end: 0.9,
            use_infinite_far_plane: true,
            debug_shadows: false,
        }
    }
}

impl ShadowSettings {
    /// Settings for a technique with every other value at its default
    pub fn new(technique: ShadowTechnique) -> Self {
        Self { technique, ..Self::default() }
    }

    /// Set the technique
    #[must_use]
    pub const fn with_technique(mut self, technique: ShadowTechnique) -> Self {
        self.technique = technique;
        self
    }

    /// Set shadow texture size and count
    #[must_use]
    pub const fn with_textures(mut self, size: u32, count: usize) -> Self {
        self.texture_size = size;
        self.texture_count = count;
        self
    }

    /// Set the modulative shadow colour
    #[must_use]
    pub const fn with_colour(mut self, colour: Colour) -> Self {
        self.colour = colour;
        self
    }

    /// Set the far shadow distance
    #[must_use]
    pub const fn with_far_distance(mut self, distance: f32) -> Self {
        self.far_distance = distance;
        self
    }

    /// Set the directional light extrusion distance
    #[must_use]
    pub const fn with_dir_light_extrusion_distance(mut self, distance: f32) -> Self {
        self.dir_light_extrusion_distance = distance;
        self
    }

    /// Turn visible shadow volumes on or off
    #[must_use]
    pub const fn with_debug_shadows(mut self, enabled: bool) -> Self {
        self.debug_shadows = enabled;
        self
    }

    /// Allow or forbid extrusion to infinity
    #[must_use]
    pub const fn with_infinite_far_plane(mut self, enabled: bool) -> Self {
        self.use_infinite_far_plane = enabled;
        self
    }

    /// Squared far distance, or `None` when unlimited
    pub fn far_distance_squared(&self) -> Option<f32> {
        (self.far_distance > 0.0).then(|| self.far_distance * self.far_distance)
    }

    /// Validate the settings
    pub fn validate(&self) -> Result<(), String> {
        if self.texture_size == 0 {
            return Err("Shadow texture size must be at least 1".to_string());
        }
        if self.texture_count == 0 {
            return Err("Shadow texture count must be at least 1".to_string());
        }
        if self.far_distance < 0.0 {
            return Err("Shadow far distance cannot be negative".to_string());
        }
        if self.dir_light_extrusion_distance <= 0.0 {
            return Err("Directional light extrusion distance must be positive".to_string());
        }
        if self.index_buffer_size < 3 {
            return Err("Shadow index buffer must hold at least one triangle".to_string());
        }
        if self.texture_fade_start > self.texture_fade_end {
            return Err(format!(
                "Shadow texture fade starts at {} but ends at {}",
                self.texture_fade_start, self.texture_fade_end
            ));
        }
        Ok(())
    }
}

/// # Scene Manager Configuration
///
/// Loaded with [`Config::load_from_file`]; call [`SceneManagerConfig::validate`]
/// before handing it to a scene manager.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SceneManagerConfig {
    /// Shadow options
    pub shadows: ShadowSettings,
    /// Scene ambient light
    pub ambient_light: Colour,
    /// Scene fog
    pub fog: FogSettings,
}

impl Default for SceneManagerConfig {
    fn default() -> Self {
        Self {
            shadows: ShadowSettings::default(),
            ambient_light: Colour::BLACK,
            fog: FogSettings::default(),
        }
    }
}

impl SceneManagerConfig {
    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.shadows.validate().map_err(ConfigError::Invalid)
    }
}

impl Config for SceneManagerConfig {}

impl Config for ShadowSettings {}
