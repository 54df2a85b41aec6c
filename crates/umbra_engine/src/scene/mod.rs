//! # Scene
//!
//! Scene objects, the spatial index, shadow geometry and the frame
//! orchestrator.
//!
//! ## Frame flow
//!
//! [`SceneManager::render_scene`] refreshes bounds, renders shadow textures
//! when needed, fills the render queue with the visible entities and hands it
//! to a [`FrameRenderer`], which applies passes through a [`PassStateCache`]
//! and runs the loop of the active shadow technique for each queue group.

pub mod bounds;
pub mod controller;
pub mod edge_list;
pub mod entity;
pub mod frame;
pub mod mesh;
pub mod pass_state;
pub mod scene_graph;
pub mod scene_manager;
pub mod shadow;

#[cfg(test)]
mod scenario_tests;

pub use bounds::{Frustum, Plane, PlaneBoundedVolume, Sphere, AABB};
pub use controller::{Controller, ControllerManager};
pub use entity::{Entity, MeshSection};
pub use frame::{FrameContext, FrameRenderer, FrameStats, IlluminationRenderStage};
pub use mesh::Mesh;
pub use pass_state::{PassEnvironment, PassStateCache, ShadowTextureBinding};
pub use scene_graph::{ObjectHandle, SceneGraph, SimpleListGraph};
pub use scene_manager::SceneManager;
