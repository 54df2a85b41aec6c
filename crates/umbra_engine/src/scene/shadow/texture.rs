//! Shadow texture pool and shadow camera placement
//!
//! Each texture slot owns a render target and the camera that renders the
//! casters of one light into it. Slots are handed to shadow casting lights
//! in the order the lights were found to affect the view; lights beyond the
//! pool size get no texture shadows that frame.

use crate::core::config::ShadowSettings;
use crate::foundation::math::{clip_to_texture, Mat4, Vec3};
use crate::render::camera::{Camera, ProjectionType};
use crate::render::colour::Colour;
use crate::render::light::{Light, LightHandle, LightType};
use crate::render::pass::FogSettings;
use crate::render::render_system::{RenderSystem, RenderTargetId};
use crate::render::RenderResult;

/// Multiplier applied to a spot light's outer cone for its shadow camera
const SPOT_FOV_MARGIN: f32 = 1.2;

/// Field of view of point light shadow cameras, in degrees
const POINT_LIGHT_FOV_DEGREES: f32 = 120.0;

/// Shadow distance used with an unlimited far distance, in near plane units
const DEFAULT_DISTANCE_IN_NEAR_PLANES: f32 = 300.0;

/// One render target with its camera
#[derive(Debug, Clone)]
pub struct ShadowTexture {
    /// Render target the casters are drawn into
    pub target: RenderTargetId,
    /// Camera set up for the light using this slot
    pub camera: Camera,
    /// Light using the slot this frame
    pub light: Option<LightHandle>,
}

impl ShadowTexture {
    /// World to shadow texture coordinates
    pub fn projector(&self) -> Mat4 {
        clip_to_texture() * self.camera.view_projection_matrix()
    }
}

/// A slot to render this frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShadowTextureUpdate {
    /// Index into the pool
    pub slot: usize,
    /// Light whose casters are rendered
    pub light: LightHandle,
}

/// Fixed set of shadow textures, recreated when size or count change
#[derive(Debug, Default)]
pub struct ShadowTexturePool {
    textures: Vec<ShadowTexture>,
    size: u32,
}

impl ShadowTexturePool {
    /// Create an empty pool
    pub fn new() -> Self {
        Self::default()
    }

    /// Make sure the pool holds `count` textures of `size` pixels
    pub fn ensure(&mut self, size: u32, count: usize, device: &mut dyn RenderSystem) -> RenderResult<()> {
        if self.size == size && self.textures.len() == count {
            return Ok(());
        }
        self.destroy(device);
        log::info!("Creating {} shadow textures of {}x{}", count, size, size);
        for index in 0..count {
            let target = device.create_render_texture(&format!("Umbra/ShadowTexture{index}"), size)?;
            let camera = Camera::perspective(Vec3::zeros(), 90.0, 1.0, 1.0, 0.0)
                .with_name(format!("Umbra/ShadowTextureCamera{index}"));
            self.textures.push(ShadowTexture { target, camera, light: None });
        }
        self.size = size;
        Ok(())
    }

    /// Release every texture
    pub fn destroy(&mut self, device: &mut dyn RenderSystem) {
        if self.textures.is_empty() {
            return;
        }
        log::debug!("Destroying {} shadow textures", self.textures.len());
        for texture in self.textures.drain(..) {
            device.destroy_render_texture(texture.target);
        }
        self.size = 0;
    }

    /// Slots in order
    pub fn textures(&self) -> &[ShadowTexture] {
        &self.textures
    }

    /// Slot by index
    pub fn texture(&self, slot: usize) -> Option<&ShadowTexture> {
        self.textures.get(slot)
    }

    /// Number of slots
    pub fn len(&self) -> usize {
        self.textures.len()
    }

    /// True if the pool holds no textures
    pub fn is_empty(&self) -> bool {
        self.textures.is_empty()
    }

    /// Edge length of every texture
    pub const fn size(&self) -> u32 {
        self.size
    }

    /// Assign slots to shadow casting lights and place their cameras
    ///
    /// `lights` must be in the order the lights affect the frame. Slots left
    /// over keep their target but have no light.
    pub fn prepare(
        &mut self,
        camera: &Camera,
        lights: &[(LightHandle, &Light)],
        settings: &ShadowSettings,
    ) -> Vec<ShadowTextureUpdate> {
        let mut casting = lights.iter().filter(|(_, light)| light.cast_shadows && light.visible);
        let mut updates = Vec::new();
        for (slot, texture) in self.textures.iter_mut().enumerate() {
            match casting.next() {
                Some(&(handle, light)) => {
                    setup_shadow_camera(&mut texture.camera, light, camera, settings, self.size);
                    texture.light = Some(handle);
                    updates.push(ShadowTextureUpdate { slot, light: handle });
                }
                None => texture.light = None,
            }
        }
        if casting.next().is_some() {
            log::trace!("More shadow casting lights than the {} shadow textures", self.textures.len());
        }
        updates
    }
}

/// Distance over which texture shadows are drawn
pub fn shadow_distance(camera: &Camera, settings: &ShadowSettings) -> f32 {
    if settings.far_distance > 0.0 {
        settings.far_distance
    } else {
        camera.near_clip_distance() * DEFAULT_DISTANCE_IN_NEAR_PLANES
    }
}

/// Fog that fades receivers back to white towards the shadow distance
pub fn receiver_fade(camera: &Camera, settings: &ShadowSettings) -> FogSettings {
    let distance = shadow_distance(camera, settings);
    let end = distance + distance * settings.texture_offset;
    FogSettings::linear(
        Colour::WHITE,
        end * settings.texture_fade_start,
        end * settings.texture_fade_end,
    )
}

/// Place a shadow camera for a light
///
/// Directional lights get an orthographic camera centred ahead of the view
/// and pulled back along the light, snapped to whole texels so the shadow
/// does not crawl as the view moves. Spot lights look down their cone and
/// point lights look at the viewer.
pub fn setup_shadow_camera(
    shadow_camera: &mut Camera,
    light: &Light,
    camera: &Camera,
    settings: &ShadowSettings,
    texture_size: u32,
) {
    let distance = shadow_distance(camera, settings);
    shadow_camera.set_aspect_ratio(1.0);
    shadow_camera.set_far_clip_distance(0.0);

    match light.light_type {
        LightType::Directional => {
            shadow_camera.set_projection_type(ProjectionType::Orthographic);
            shadow_camera.set_fov_y(90.0_f32.to_radians());
            shadow_camera.set_near_clip_distance(distance);

            let target = camera.position() + camera.direction() * (distance * settings.texture_offset);
            let position = target - light.direction * settings.dir_light_extrusion_distance;
            #[allow(clippy::cast_precision_loss)]
            let texel = (distance * 2.0) / texture_size.max(1) as f32;
            let snapped = position.map(|v| (v / texel).floor() * texel);
            shadow_camera.set_position(snapped);
            shadow_camera.set_direction(light.direction);
        }
        LightType::Spot => {
            shadow_camera.set_projection_type(ProjectionType::Perspective);
            shadow_camera.set_fov_y(light.outer_cone_angle * SPOT_FOV_MARGIN);
            shadow_camera.set_near_clip_distance(camera.near_clip_distance());
            shadow_camera.set_position(light.position);
            shadow_camera.set_direction(light.direction);
        }
        LightType::Point => {
            shadow_camera.set_projection_type(ProjectionType::Perspective);
            shadow_camera.set_fov_y(POINT_LIGHT_FOV_DEGREES.to_radians());
            shadow_camera.set_near_clip_distance(camera.near_clip_distance());
            shadow_camera.set_position(light.position);
            shadow_camera.look_at(camera.position());
        }
    }
}
