//! # Shadows
//!
//! Geometry and state used by the stencil and texture shadow techniques.
//!
//! - [`caster`]: which objects cast shadows for a light
//! - [`volume`]: silhouette extrusion into shadow volumes
//! - [`stencil`]: stencil operations and capping decisions for volumes
//! - [`texture`]: the shadow texture pool and shadow camera placement
//! - [`passes`]: the built-in passes the techniques draw with

pub mod caster;
pub mod passes;
pub mod stencil;
pub mod texture;
pub mod volume;

pub use caster::{find_shadow_casters, CasterSearch, ShadowCaster};
pub use passes::{FullScreenQuad, ShadowPasses};
pub use stencil::{requires_z_fail, StencilVolumeMode};
pub use texture::{ShadowTexture, ShadowTexturePool, ShadowTextureUpdate};
pub use volume::{ShadowIndexBuffer, ShadowRenderable, ShadowRenderableFlags};
