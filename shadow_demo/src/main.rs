//! Shadow technique demo
//!
//! Builds a small scene and renders a few frames with every shadow technique
//! through the recording device, logging what each frame cost.
//!
//! Usage: `shadow_demo [config.toml|config.ron]`

use std::path::PathBuf;

use thiserror::Error;
use umbra_engine::foundation::logging;
use umbra_engine::foundation::math::Quat;
use umbra_engine::prelude::*;

const FRAMES_PER_TECHNIQUE: usize = 3;

#[derive(Debug, Error)]
enum DemoError {
    #[error("configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("rendering: {0}")]
    Render(#[from] RenderError),
}

fn build_scene(config: SceneManagerConfig) -> Result<(SceneManager, ObjectHandle), DemoError> {
    let mut scene = SceneManager::new(config)?;

    let stone = scene.materials_mut().create_material("Stone");
    let mut pass = Pass::new();
    pass.ambient = Colour::rgb(0.6, 0.6, 0.6);
    pass.diffuse = Colour::rgb(0.8, 0.75, 0.7);
    pass.add_texture_unit(umbra_engine::render::TextureUnitState::named("stone.png"));
    scene.materials_mut().create_pass(stone, 0, pass)?;

    let ground = scene.create_mesh(|buffers| Mesh::plane("ground", 40.0, 40.0, Some(stone), buffers));
    let ground = scene.create_entity("ground", ground);
    if let Some(entity) = scene.entity_mut(ground) {
        entity.set_cast_shadows(false);
    }

    let crate_mesh = scene.create_mesh(|buffers| Mesh::cube("crate", 1.0, None, buffers));
    let spinner = scene.create_entity("spinner", crate_mesh.clone());
    if let Some(entity) = scene.entity_mut(spinner) {
        entity.set_transform(Transform::from_position(Vec3::new(0.0, 1.0, 0.0)));
    }
    for (index, x) in [-3.0_f32, 3.0].into_iter().enumerate() {
        let handle = scene.create_entity(format!("pillar{index}"), crate_mesh.clone());
        if let Some(entity) = scene.entity_mut(handle) {
            entity.set_transform(
                Transform::from_position(Vec3::new(x, 1.5, -2.0)).with_scale(Vec3::new(0.5, 3.0, 0.5)),
            );
        }
    }

    scene.create_light(Light::directional(Vec3::new(0.4, -1.0, -0.3), Colour::rgb(0.9, 0.9, 0.8)));
    scene.create_light(Light::point(Vec3::new(2.0, 4.0, 3.0), Colour::rgb(0.6, 0.6, 1.0), 25.0));

    let mut angle = 0.0_f32;
    scene.add_controller(move |delta_time: f32, scene: &mut SceneManager| {
        angle += delta_time;
        if let Some(entity) = scene.entity_mut(spinner) {
            let transform = entity.transform().clone().with_rotation(Quat::from_axis_angle(&Vec3::y_axis(), angle));
            entity.set_transform(transform);
        }
    });

    Ok((scene, spinner))
}

fn run(config: SceneManagerConfig) -> Result<(), DemoError> {
    let (mut scene, spinner) = build_scene(config)?;
    log::info!("Scene ready: {} entities, spinner {:?}", scene.entity_count(), spinner);
    scene.set_time_source(TimeSource::Fixed(1.0 / 60.0));

    let mut camera = Camera::perspective(Vec3::new(0.0, 6.0, 12.0), 60.0, 4.0 / 3.0, 0.5, 200.0)
        .with_name("main");
    camera.look_at(Vec3::new(0.0, 1.0, 0.0));
    let viewport = ViewportRect::sized(800, 600);
    let mut device = RecordingRenderSystem::new(RenderSystemCapabilities::full());

    for technique in [
        ShadowTechnique::None,
        ShadowTechnique::StencilAdditive,
        ShadowTechnique::StencilModulative,
        ShadowTechnique::TextureModulative,
    ] {
        scene.set_shadow_technique(technique);
        for frame in 0..FRAMES_PER_TECHNIQUE {
            device.clear_commands();
            let stats = scene.render_scene(&camera, viewport, &mut device)?;
            log::info!(
                "{:?} frame {}: {} draws, {} faces, {} casters, {} volumes, {} z-fail lights, {} shadow textures",
                technique,
                frame,
                stats.draw_calls,
                stats.faces,
                stats.shadow_casters,
                stats.shadow_volumes,
                stats.z_fail_lights,
                stats.shadow_textures_updated,
            );
        }
    }

    scene.destroy_shadow_textures(&mut device);
    Ok(())
}

fn main() {
    logging::init_with_default("info");

    let config = match std::env::args().nth(1).map(PathBuf::from) {
        Some(path) => match SceneManagerConfig::load_from_file(&path) {
            Ok(config) => config,
            Err(e) => {
                log::error!("Failed to load {}: {}", path.display(), e);
                std::process::exit(1);
            }
        },
        None => SceneManagerConfig::default(),
    };

    if let Err(e) = run(config) {
        log::error!("Demo failed: {}", e);
        std::process::exit(1);
    }
}
