//! # Umbra Engine
//!
//! Render queue and shadow rendering core of a 3D scene manager.
//!
//! ## Features
//!
//! - **Render Queue**: queue groups, priority groups and pass-keyed buckets
//!   for minimal state changes, with back-to-front transparents
//! - **Stencil Shadows**: additive and modulative shadow volumes with
//!   depth-pass / depth-fail selection per light, CPU or GPU extrusion
//! - **Texture Shadows**: modulative shadow textures from a fixed pool
//! - **Pass State Cache**: only changed device state is issued
//! - **Device Abstraction**: everything is drawn through [`render::RenderSystem`]
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use umbra_engine::prelude::*;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = SceneManagerConfig {
//!         shadows: ShadowSettings::new(ShadowTechnique::StencilModulative),
//!         ..SceneManagerConfig::default()
//!     };
//!     let mut scene = SceneManager::new(config)?;
//!     let mesh = scene.create_mesh(|buffers| Mesh::cube("crate", 1.0, None, buffers));
//!     scene.create_entity("crate", mesh);
//!     scene.create_light(Light::directional(Vec3::new(0.3, -1.0, 0.2), Colour::WHITE));
//!
//!     let mut device = RecordingRenderSystem::new(RenderSystemCapabilities::full());
//!     let camera = Camera::perspective(Vec3::new(0.0, 3.0, 8.0), 60.0, 4.0 / 3.0, 0.5, 100.0);
//!     let stats = scene.render_scene(&camera, ViewportRect::sized(800, 600), &mut device)?;
//!     println!("{} draw calls", stats.draw_calls);
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions, clippy::similar_names, clippy::too_many_arguments)]

pub mod config;
pub mod core;
pub mod foundation;
pub mod render;
pub mod scene;

/// Common imports for engine users
pub mod prelude {
    pub use crate::{
        config::{Config, ConfigError},
        core::config::{SceneManagerConfig, ShadowSettings, ShadowTechnique},
        foundation::{
            math::{Mat4, Transform, Vec3},
            time::{TimeSource, Timer},
        },
        render::{
            render_system::ViewportRect, Camera, Capabilities, Colour, Light, LightHandle, LightType,
            MaterialHandle, MaterialManager, Pass, RecordingRenderSystem, RenderError, RenderQueue,
            RenderQueueGroupId, RenderResult, RenderSystem, RenderSystemCapabilities,
        },
        scene::{Controller, Entity, FrameStats, Mesh, ObjectHandle, SceneManager},
    };
}
