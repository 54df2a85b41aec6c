//! Core engine settings
//!
//! Runtime options of the scene manager, loadable from TOML or RON files.

pub mod config;

pub use config::{SceneManagerConfig, ShadowSettings, ShadowTechnique};
