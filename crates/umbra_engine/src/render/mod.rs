//! # Rendering Layer
//!
//! Device-independent rendering types consumed by the scene manager.
//!
//! ## Architecture
//!
//! - **Passes and materials**: [`pass`] holds the pass arena, [`material`]
//!   the techniques that reference it and their illumination split
//! - **Render queue**: [`queue`] groups renderables by queue group, priority
//!   and pass for minimal state changes
//! - **Device**: [`render_system`] is the trait the scene manager drives;
//!   [`recording`] implements it by recording every call
//! - **View**: [`camera`] and [`light`] describe what is seen and how it is lit

pub mod camera;
pub mod colour;
pub mod gpu_program;
pub mod light;
pub mod material;
pub mod pass;
pub mod queue;
pub mod recording;
pub mod render_system;
pub mod renderable;

pub use camera::{Camera, ProjectionType};
pub use colour::Colour;
pub use gpu_program::{GpuProgramParameters, GpuProgramRef, GpuProgramType, GpuProgramUsage};
pub use light::{Light, LightHandle, LightList, LightType};
pub use material::{IlluminationStage, Material, MaterialHandle, MaterialManager, Technique};
pub use pass::{Pass, PassHandle, PassStore, ResolvedPass, TextureUnitState};
pub use queue::{RenderPriorityGroup, RenderQueue, RenderQueueGroup, RenderQueueGroupId};
pub use recording::{DeviceCommand, RecordingRenderSystem};
pub use render_system::{Capabilities, DeviceId, RenderSystem, RenderSystemCapabilities};
pub use renderable::{BufferId, RenderOperation, Renderable, RenderableRef};

use thiserror::Error;

/// Rendering error types
///
/// Missing materials and passes are caller errors and abort the frame. An
/// unsupported extrusion program syntax means stencil shadows cannot run on
/// this device and is fatal for the technique.
#[derive(Error, Debug)]
pub enum RenderError {
    /// A material handle does not refer to a live material
    #[error("Material not found")]
    MaterialNotFound,

    /// A pass handle does not refer to a live pass
    #[error("Pass not found")]
    PassNotFound,

    /// A material has no technique to render with
    #[error("Material '{0}' has no usable technique")]
    NoTechnique(String),

    /// No program syntax usable for shadow volume extrusion
    ///
    /// Stencil shadows with hardware extrusion need `arbvp1` or `vs_1_1`.
    #[error("Unsupported program syntax: {0}")]
    UnsupportedProgramSyntax(String),

    /// The request is not valid in the current state
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    /// Resource creation or management failed
    ///
    /// Raised when a render texture or geometry buffer cannot be created or
    /// written.
    #[error("Resource creation failed: {0}")]
    ResourceCreationFailed(String),

    /// A rendering operation failed during execution
    #[error("Rendering failed: {0}")]
    RenderingFailed(String),

    /// Backend-specific error occurred
    ///
    /// Wraps errors from a concrete graphics API in a generic form.
    #[error("Backend error: {0}")]
    BackendError(String),
}

/// Result type for rendering operations
pub type RenderResult<T> = Result<T, RenderError>;
