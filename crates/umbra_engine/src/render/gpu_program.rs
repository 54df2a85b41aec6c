//! GPU program references, parameters and automatic constants
//!
//! Programs are referenced by name and syntax only; compiling them is the
//! render system's business. Parameters mix literal constants with automatic
//! ones that are resolved per draw from an [`AutoParamDataSource`].

use crate::foundation::math::{Mat4, Vec4};

use super::colour::Colour;
use super::{RenderError, RenderResult};
use super::light::{Light, LightType};
use super::render_system::{Capabilities, RenderSystemCapabilities};

/// Pipeline stage a program runs in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GpuProgramType {
    /// Vertex program
    Vertex,
    /// Fragment program
    Fragment,
}

/// Named program plus the syntax it is written in
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GpuProgramRef {
    /// Program name known to the render system
    pub name: String,
    /// Stage
    pub program_type: GpuProgramType,
    /// Assembly or shading language profile, e.g. `arbvp1`
    pub syntax: String,
}

/// Values filled in automatically for each draw
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AutoConstant {
    /// Object to world
    WorldMatrix,
    /// Camera view
    ViewMatrix,
    /// Projection
    ProjectionMatrix,
    /// Object to clip
    WorldViewProjMatrix,
    /// Scene ambient colour
    AmbientLightColour,
    /// Diffuse colour of the nth bound light
    LightDiffuseColour(usize),
    /// Position of the nth bound light in object space, homogeneous
    LightPositionObjectSpace(usize),
    /// Shadow volume extrusion distance in object space
    ShadowExtrusionDistance,
    /// World to shadow texture space of the active shadow projector
    TextureViewProjMatrix,
}

/// One parameter slot
#[derive(Debug, Clone, PartialEq)]
pub enum ProgramConstant {
    /// Literal vector
    Float4([f32; 4]),
    /// Literal matrix
    Matrix(Mat4),
    /// Filled in per draw
    Auto(AutoConstant),
}

/// Program parameters by register
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GpuProgramParameters {
    constants: Vec<(u32, ProgramConstant)>,
}

/// Constant resolved to raw floats, ready to upload
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedConstant {
    /// First register
    pub register: u32,
    /// Values, four per register
    pub values: Vec<f32>,
}

impl GpuProgramParameters {
    /// Create an empty parameter set
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind an automatic constant to a register
    #[must_use]
    pub fn with_auto(mut self, register: u32, constant: AutoConstant) -> Self {
        self.constants.push((register, ProgramConstant::Auto(constant)));
        self
    }

    /// Bind a literal vector to a register
    #[must_use]
    pub fn with_float4(mut self, register: u32, value: [f32; 4]) -> Self {
        self.constants.push((register, ProgramConstant::Float4(value)));
        self
    }

    /// True if any constant is automatic
    pub fn has_auto_constants(&self) -> bool {
        self.constants
            .iter()
            .any(|(_, constant)| matches!(constant, ProgramConstant::Auto(_)))
    }

    /// Resolve every constant against the current draw state
    pub fn resolve(&self, source: &AutoParamDataSource<'_>) -> Vec<ResolvedConstant> {
        self.constants
            .iter()
            .map(|(register, constant)| ResolvedConstant {
                register: *register,
                values: match constant {
                    ProgramConstant::Float4(v) => v.to_vec(),
                    ProgramConstant::Matrix(m) => matrix_values(m),
                    ProgramConstant::Auto(auto) => source.value(*auto),
                },
            })
            .collect()
    }
}

fn matrix_values(m: &Mat4) -> Vec<f32> {
    // Row-major, one row per register
    m.transpose().as_slice().to_vec()
}

/// A program and the parameters it is bound with
#[derive(Debug, Clone, PartialEq)]
pub struct GpuProgramUsage {
    /// Program reference
    pub program: GpuProgramRef,
    /// Parameters
    pub parameters: GpuProgramParameters,
}

impl GpuProgramUsage {
    /// Pair a program with its parameters
    pub const fn new(program: GpuProgramRef, parameters: GpuProgramParameters) -> Self {
        Self { program, parameters }
    }

    /// Stage of the program
    pub const fn program_type(&self) -> GpuProgramType {
        self.program.program_type
    }
}

/// Draw state that automatic constants are read from
#[derive(Debug, Clone)]
pub struct AutoParamDataSource<'a> {
    /// Current world matrix
    pub world: Mat4,
    /// Current view matrix
    pub view: Mat4,
    /// Current projection matrix
    pub projection: Mat4,
    /// Scene ambient colour
    pub ambient: Colour,
    /// Lights bound for this draw
    pub lights: &'a [&'a Light],
    /// Shadow extrusion distance in world units
    pub shadow_extrusion_distance: f32,
    /// Shadow projector matrix, when a shadow texture is active
    pub texture_view_proj: Mat4,
}

impl AutoParamDataSource<'_> {
    fn value(&self, constant: AutoConstant) -> Vec<f32> {
        match constant {
            AutoConstant::WorldMatrix => matrix_values(&self.world),
            AutoConstant::ViewMatrix => matrix_values(&self.view),
            AutoConstant::ProjectionMatrix => matrix_values(&self.projection),
            AutoConstant::WorldViewProjMatrix => {
                matrix_values(&(self.projection * self.view * self.world))
            }
            AutoConstant::AmbientLightColour => self.ambient.to_array().to_vec(),
            AutoConstant::LightDiffuseColour(index) => self
                .lights
                .get(index)
                .map_or(Colour::BLACK, |light| light.diffuse)
                .to_array()
                .to_vec(),
            AutoConstant::LightPositionObjectSpace(index) => {
                let position = self.lights.get(index).map_or(Vec4::zeros(), |light| {
                    let inverse = self.world.try_inverse().unwrap_or_else(Mat4::identity);
                    inverse * light.as_vec4()
                });
                position.as_slice().to_vec()
            }
            AutoConstant::ShadowExtrusionDistance => {
                let scale = max_axis_scale(&self.world);
                let distance = if scale > 0.0 {
                    self.shadow_extrusion_distance / scale
                } else {
                    self.shadow_extrusion_distance
                };
                vec![distance, distance, distance, distance]
            }
            AutoConstant::TextureViewProjMatrix => {
                matrix_values(&(self.texture_view_proj * self.world))
            }
        }
    }
}

/// Largest scale factor along the basis axes of an affine matrix
pub fn max_axis_scale(m: &Mat4) -> f32 {
    (0..3)
        .map(|c| {
            (m[(0, c)] * m[(0, c)] + m[(1, c)] * m[(1, c)] + m[(2, c)] * m[(2, c)]).sqrt()
        })
        .fold(0.0, f32::max)
}

/// Built-in vertex programs that extrude shadow volumes on the GPU
///
/// The finite variants extrude to a set distance; the others push the back
/// of the volume to infinity and need an infinite far plane.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShadowVolumeExtrudeProgram {
    /// Point or spot light, infinite
    PointLight,
    /// Point or spot light, infinite, debug colour output
    PointLightDebug,
    /// Directional light, infinite
    DirectionalLight,
    /// Directional light, infinite, debug colour output
    DirectionalLightDebug,
    /// Point or spot light, finite
    PointLightFinite,
    /// Point or spot light, finite, debug colour output
    PointLightFiniteDebug,
    /// Directional light, finite
    DirectionalLightFinite,
    /// Directional light, finite, debug colour output
    DirectionalLightFiniteDebug,
}

impl ShadowVolumeExtrudeProgram {
    /// Every variant, for registering with a render system
    pub const ALL: [Self; 8] = [
        Self::PointLight,
        Self::PointLightDebug,
        Self::DirectionalLight,
        Self::DirectionalLightDebug,
        Self::PointLightFinite,
        Self::PointLightFiniteDebug,
        Self::DirectionalLightFinite,
        Self::DirectionalLightFiniteDebug,
    ];

    /// Pick the variant for a light
    pub const fn select(light_type: LightType, finite: bool, debug: bool) -> Self {
        match (light_type, finite, debug) {
            (LightType::Directional, false, false) => Self::DirectionalLight,
            (LightType::Directional, false, true) => Self::DirectionalLightDebug,
            (LightType::Directional, true, false) => Self::DirectionalLightFinite,
            (LightType::Directional, true, true) => Self::DirectionalLightFiniteDebug,
            (_, false, false) => Self::PointLight,
            (_, false, true) => Self::PointLightDebug,
            (_, true, false) => Self::PointLightFinite,
            (_, true, true) => Self::PointLightFiniteDebug,
        }
    }

    /// Program name
    pub const fn name(self) -> &'static str {
        match self {
            Self::PointLight => "Umbra/ShadowExtrudePointLight",
            Self::PointLightDebug => "Umbra/ShadowExtrudePointLightDebug",
            Self::DirectionalLight => "Umbra/ShadowExtrudeDirLight",
            Self::DirectionalLightDebug => "Umbra/ShadowExtrudeDirLightDebug",
            Self::PointLightFinite => "Umbra/ShadowExtrudePointLightFinite",
            Self::PointLightFiniteDebug => "Umbra/ShadowExtrudePointLightFiniteDebug",
            Self::DirectionalLightFinite => "Umbra/ShadowExtrudeDirLightFinite",
            Self::DirectionalLightFiniteDebug => "Umbra/ShadowExtrudeDirLightFiniteDebug",
        }
    }

    /// True for the variants extruding to a set distance
    pub const fn is_finite(self) -> bool {
        matches!(
            self,
            Self::PointLightFinite
                | Self::PointLightFiniteDebug
                | Self::DirectionalLightFinite
                | Self::DirectionalLightFiniteDebug
        )
    }

    /// Syntax the extrusion programs are written in for this device
    ///
    /// `arbvp1` is preferred, `vs_1_1` is the fallback.
    pub fn syntax(capabilities: &RenderSystemCapabilities) -> RenderResult<&'static str> {
        if !capabilities.supports(Capabilities::VERTEX_PROGRAM) {
            return Err(RenderError::UnsupportedProgramSyntax(
                "device has no vertex program support".to_string(),
            ));
        }
        ["arbvp1", "vs_1_1"]
            .into_iter()
            .find(|syntax| capabilities.supports_syntax(syntax))
            .ok_or_else(|| {
                RenderError::UnsupportedProgramSyntax(format!(
                    "none of arbvp1 or vs_1_1 in {:?}",
                    capabilities.program_syntaxes
                ))
            })
    }

    /// Program and parameter bindings for this variant
    pub fn usage(self, syntax: &str) -> GpuProgramUsage {
        let mut parameters = GpuProgramParameters::new()
            .with_auto(0, AutoConstant::WorldViewProjMatrix)
            .with_auto(4, AutoConstant::LightPositionObjectSpace(0));
        if self.is_finite() {
            parameters = parameters.with_auto(5, AutoConstant::ShadowExtrusionDistance);
        }
        GpuProgramUsage::new(
            GpuProgramRef {
                name: self.name().to_string(),
                program_type: GpuProgramType::Vertex,
                syntax: syntax.to_string(),
            },
            parameters,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::foundation::math::Vec3;
    use approx::assert_relative_eq;

    fn source<'a>(lights: &'a [&'a Light]) -> AutoParamDataSource<'a> {
        AutoParamDataSource {
            world: Mat4::new_translation(&Vec3::new(0.0, 5.0, 0.0)),
            view: Mat4::identity(),
            projection: Mat4::identity(),
            ambient: Colour::rgb(0.1, 0.2, 0.3),
            lights,
            shadow_extrusion_distance: 100.0,
            texture_view_proj: Mat4::identity(),
        }
    }

    #[test]
    fn test_light_position_resolved_in_object_space() {
        let light = Light::point(Vec3::new(0.0, 10.0, 0.0), Colour::WHITE, 50.0);
        let lights = [&light];
        let params = GpuProgramParameters::new()
            .with_auto(4, AutoConstant::LightPositionObjectSpace(0))
            .with_auto(5, AutoConstant::AmbientLightColour);
        let resolved = params.resolve(&source(&lights));
        assert_eq!(resolved[0].register, 4);
        assert_relative_eq!(resolved[0].values[1], 5.0);
        assert_relative_eq!(resolved[0].values[3], 1.0);
        assert_relative_eq!(resolved[1].values[2], 0.3);
    }

    #[test]
    fn test_extrusion_distance_scaled_to_object_space() {
        let lights: [&Light; 0] = [];
        let mut src = source(&lights);
        src.world = Mat4::new_scaling(2.0);
        let params = GpuProgramParameters::new().with_auto(5, AutoConstant::ShadowExtrusionDistance);
        assert_relative_eq!(params.resolve(&src)[0].values[0], 50.0);
    }

    #[test]
    fn test_extrude_program_selection() {
        assert_eq!(
            ShadowVolumeExtrudeProgram::select(LightType::Spot, true, false),
            ShadowVolumeExtrudeProgram::PointLightFinite
        );
        assert_eq!(
            ShadowVolumeExtrudeProgram::select(LightType::Directional, false, true),
            ShadowVolumeExtrudeProgram::DirectionalLightDebug
        );
        let usage = ShadowVolumeExtrudeProgram::PointLightFinite.usage("arbvp1");
        assert_eq!(usage.program.syntax, "arbvp1");
        assert!(usage.parameters.has_auto_constants());
        assert!(!ShadowVolumeExtrudeProgram::PointLight.is_finite());
    }

    #[test]
    fn test_extrude_syntax_prefers_arbvp1() {
        let mut caps = RenderSystemCapabilities::full();
        assert_eq!(ShadowVolumeExtrudeProgram::syntax(&caps).unwrap(), "arbvp1");
        caps.program_syntaxes = vec!["vs_1_1".to_string()];
        assert_eq!(ShadowVolumeExtrudeProgram::syntax(&caps).unwrap(), "vs_1_1");
        caps.program_syntaxes = vec!["glsl".to_string()];
        assert!(matches!(
            ShadowVolumeExtrudeProgram::syntax(&caps),
            Err(RenderError::UnsupportedProgramSyntax(_))
        ));
    }
}
