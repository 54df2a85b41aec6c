//! Whole-frame scenarios driven through the recording device

use std::collections::BTreeSet;
use std::rc::Rc;

use crate::core::config::{SceneManagerConfig, ShadowSettings, ShadowTechnique};
use crate::foundation::math::{Transform, Vec3};
use crate::render::camera::Camera;
use crate::render::colour::Colour;
use crate::render::light::Light;
use crate::render::pass::{CompareFunction, CullingMode, Pass, SceneBlend};
use crate::render::recording::{DeviceCommand, DrawRecord, RecordingRenderSystem};
use crate::render::render_system::{Capabilities, RenderSystemCapabilities, StencilOperation, ViewportRect};
use crate::render::renderable::{renderable_address, BufferId};

use super::mesh::Mesh;
use super::scene_graph::ObjectHandle;
use super::scene_manager::SceneManager;

fn scene(technique: ShadowTechnique) -> SceneManager {
    let config = SceneManagerConfig {
        shadows: ShadowSettings::new(technique),
        ambient_light: Colour::rgb(0.2, 0.2, 0.2),
        ..SceneManagerConfig::default()
    };
    SceneManager::new(config).unwrap()
}

fn cube_at(scene: &mut SceneManager, name: &str, position: Vec3) -> ObjectHandle {
    let mesh = scene.create_mesh(|buffers| Mesh::cube(name, 1.0, None, buffers));
    let handle = scene.create_entity(name, mesh);
    scene.entity_mut(handle).unwrap().set_transform(Transform::from_position(position));
    handle
}

fn looking_at_origin(position: Vec3) -> Camera {
    let mut camera = Camera::perspective(position, 60.0, 4.0 / 3.0, 0.5, 100.0);
    camera.look_at(Vec3::zeros());
    camera
}

fn device() -> RecordingRenderSystem {
    RecordingRenderSystem::new(RenderSystemCapabilities::full())
}

fn device_without(flag: Capabilities) -> RecordingRenderSystem {
    let mut capabilities = RenderSystemCapabilities::full();
    capabilities.flags.remove(flag);
    RecordingRenderSystem::new(capabilities)
}

fn volume_draws(device: &RecordingRenderSystem) -> Vec<&DrawRecord> {
    device.draws().filter(|d| d.stencil_check && !d.colour_write).collect()
}

/// One caster inside the near clip volume of a point light
fn near_plane_scene() -> (SceneManager, Camera) {
    let mut scene = scene(ShadowTechnique::StencilModulative);
    cube_at(&mut scene, "near", Vec3::new(0.0, 1.0, 2.2));
    cube_at(&mut scene, "far", Vec3::new(0.0, 0.5, -5.0));
    scene.create_light(Light::point(Vec3::new(0.0, 5.0, 0.0), Colour::WHITE, 100.0));
    let camera = Camera::perspective(Vec3::new(0.0, 1.0, 3.0), 60.0, 4.0 / 3.0, 0.5, 100.0);
    (scene, camera)
}

/// Single cube under a directional light, counted with depth-pass
fn z_pass_scene() -> (SceneManager, Camera) {
    let mut scene = scene(ShadowTechnique::StencilAdditive);
    cube_at(&mut scene, "cube", Vec3::zeros());
    scene.create_light(Light::directional(Vec3::new(0.2, -1.0, -0.3), Colour::WHITE));
    (scene, looking_at_origin(Vec3::new(0.0, 3.0, 8.0)))
}

const VIEWPORT: ViewportRect = ViewportRect::sized(640, 480);

#[test]
fn test_additive_cube_leaves_stencil_clear_and_draws_each_stage_once() {
    let mut scene = scene(ShadowTechnique::StencilAdditive);
    cube_at(&mut scene, "cube", Vec3::zeros());
    scene.create_light(Light::directional(Vec3::new(0.2, -1.0, -0.3), Colour::WHITE));
    let mut device = device();

    let stats = scene.render_scene(&looking_at_origin(Vec3::new(0.0, 3.0, 8.0)), VIEWPORT, &mut device).unwrap();

    assert!(device.stencil_is_clear());
    let (_, technique) = scene.materials().resolve(None).unwrap();
    let stages = technique.illumination_passes();
    assert_eq!(stages.len(), 2);
    assert_eq!(stats.draws_with(stages[0].pass), 1);
    assert_eq!(stats.draws_with(stages[1].pass), 1);
    assert_eq!(stats.shadow_casters, 1);
    assert!(stats.shadow_volumes > 0);

    let lit: Vec<_> = device
        .draws()
        .filter(|d| d.scene_blend == SceneBlend::ADD && d.lighting_enabled)
        .collect();
    assert_eq!(lit.len(), 1);
    assert!(lit[0].stencil_check);
    assert_eq!(lit[0].stencil.function, CompareFunction::Equal);
}

#[test]
fn test_texture_shadows_update_only_slots_with_lights() {
    let config = SceneManagerConfig {
        shadows: ShadowSettings::new(ShadowTechnique::TextureModulative).with_textures(256, 2),
        ..SceneManagerConfig::default()
    };
    let mut scene = SceneManager::new(config).unwrap();
    cube_at(&mut scene, "cube", Vec3::zeros());
    let light = scene.create_light(Light::directional(Vec3::new(0.0, -1.0, -0.2), Colour::WHITE));
    let camera = looking_at_origin(Vec3::new(0.0, 3.0, 8.0));
    let mut device = device();

    let stats = scene.render_scene(&camera, VIEWPORT, &mut device).unwrap();
    assert_eq!(stats.shadow_textures_updated, 1);
    let textures = scene.shadow_textures().textures();
    assert_eq!(textures.len(), 2);
    assert_eq!(textures[0].light, Some(light));
    assert_eq!(textures[1].light, None);
    assert_eq!(device.draws_into(textures[1].target), 0);
    assert_eq!(stats.draws_with(scene.shadow_passes().receiver), 1);

    scene.render_scene(&camera, VIEWPORT, &mut device).unwrap();
    assert_eq!(device.count(|c| matches!(c, DeviceCommand::CreateRenderTexture { .. })), 2);
}

#[test]
fn test_transparent_renderables_never_reach_solid_maps() {
    for technique in [
        ShadowTechnique::None,
        ShadowTechnique::StencilAdditive,
        ShadowTechnique::StencilModulative,
        ShadowTechnique::TextureModulative,
    ] {
        let mut scene = scene(technique);
        let glass = scene.materials_mut().create_material("Glass");
        let mut pass = Pass::new();
        pass.scene_blend = SceneBlend::ALPHA;
        scene.materials_mut().create_pass(glass, 0, pass).unwrap();
        let mesh = scene.create_mesh(|buffers| Mesh::cube("pane", 1.0, Some(glass), buffers));
        let handle = scene.create_entity("pane", mesh);
        scene.create_light(Light::point(Vec3::new(0.0, 4.0, 0.0), Colour::WHITE, 50.0));

        scene
            .render_scene(&looking_at_origin(Vec3::new(0.0, 2.0, 6.0)), VIEWPORT, &mut device())
            .unwrap();

        let section = Rc::as_ptr(&scene.entity(handle).unwrap().sections()[0]).cast::<()>() as usize;
        let mut transparent = 0;
        for (_, group) in scene.render_queue().iter() {
            for (_, priority_group) in group.iter() {
                for map in [
                    priority_group.solid_passes(),
                    priority_group.solid_passes_diffuse_specular(),
                    priority_group.solid_passes_decal(),
                    priority_group.solid_passes_no_shadow(),
                ] {
                    assert!(map.values().flatten().all(|r| renderable_address(r) != section));
                }
                transparent += priority_group
                    .transparent_passes()
                    .iter()
                    .filter(|entry| renderable_address(&entry.renderable) == section)
                    .count();
            }
        }
        assert_eq!(transparent, 1, "{technique:?}");
    }
}

#[test]
fn test_one_caster_at_near_plane_switches_whole_light_to_z_fail() {
    let (mut scene, camera) = near_plane_scene();
    let mut device = device();

    let stats = scene.render_scene(&camera, VIEWPORT, &mut device).unwrap();
    assert_eq!(stats.z_fail_lights, 1);
    assert_eq!(stats.shadow_casters, 2);

    let volume_draws = volume_draws(&device);
    assert!(!volume_draws.is_empty());
    for draw in volume_draws {
        assert_eq!(draw.stencil.pass_op, StencilOperation::Keep);
        assert_ne!(draw.stencil.depth_fail_op, StencilOperation::Keep);
    }
    assert!(device.stencil_is_clear());
}

#[test]
fn test_light_cap_depth_follows_culling_with_and_without_two_sided_stencil() {
    for mut device in [device(), device_without(Capabilities::TWO_SIDED_STENCIL)] {
        let (mut scene, camera) = near_plane_scene();
        let stats = scene.render_scene(&camera, VIEWPORT, &mut device).unwrap();
        assert_eq!(stats.z_fail_lights, 1);

        let draws = volume_draws(&device);
        let always_fail: Vec<_> = draws.iter().filter(|d| d.depth_function == CompareFunction::AlwaysFail).collect();
        assert!(!always_fail.is_empty());
        assert!(always_fail.iter().all(|d| d.culling == CullingMode::Clockwise));
        assert!(draws
            .iter()
            .filter(|d| d.culling == CullingMode::Anticlockwise)
            .all(|d| d.depth_function == CompareFunction::Less));
        assert!(device.stencil_is_clear());
    }
}

#[test]
fn test_two_pass_z_fail_counts_back_faces_up_and_front_faces_down() {
    let (mut scene, camera) = near_plane_scene();
    let mut device = device_without(Capabilities::TWO_SIDED_STENCIL);

    scene.render_scene(&camera, VIEWPORT, &mut device).unwrap();
    let draws = volume_draws(&device);
    assert!(draws.iter().any(|d| d.culling == CullingMode::Anticlockwise));
    assert!(draws.iter().any(|d| d.culling == CullingMode::Clockwise));
    for draw in draws {
        assert!(!draw.stencil.two_sided);
        assert_eq!(draw.stencil.pass_op, StencilOperation::Keep);
        match draw.culling {
            CullingMode::Anticlockwise => assert_eq!(draw.stencil.depth_fail_op, StencilOperation::IncrementWrap),
            CullingMode::Clockwise => assert_eq!(draw.stencil.depth_fail_op, StencilOperation::DecrementWrap),
            CullingMode::None => panic!("two-pass volumes must cull one face"),
        }
    }
    assert!(device.stencil_is_clear());
}

#[test]
fn test_two_pass_z_pass_draws_each_volume_once_per_face() {
    let (mut scene, camera) = z_pass_scene();
    let mut device = device_without(Capabilities::TWO_SIDED_STENCIL);

    let stats = scene.render_scene(&camera, VIEWPORT, &mut device).unwrap();
    assert_eq!(stats.z_fail_lights, 0);
    let draws = volume_draws(&device);
    let front: Vec<_> = draws.iter().filter(|d| d.culling == CullingMode::Clockwise).collect();
    let back: Vec<_> = draws.iter().filter(|d| d.culling == CullingMode::Anticlockwise).collect();
    assert!(!front.is_empty());
    assert_eq!(front.len(), back.len());
    assert_eq!(front.len() + back.len(), draws.len());
    assert!(front.iter().all(|d| d.stencil.pass_op == StencilOperation::IncrementWrap));
    assert!(back.iter().all(|d| d.stencil.pass_op == StencilOperation::DecrementWrap));
    assert!(draws.iter().all(|d| !d.stencil.two_sided && d.stencil.depth_fail_op == StencilOperation::Keep));
    assert!(device.stencil_is_clear());
}

#[test]
fn test_without_stencil_wrap_volumes_use_clamping_operations() {
    let (mut scene, camera) = z_pass_scene();
    let mut device = device_without(Capabilities::STENCIL_WRAP);

    let stats = scene.render_scene(&camera, VIEWPORT, &mut device).unwrap();
    assert!(stats.shadow_volumes > 0);
    let draws = volume_draws(&device);
    assert!(!draws.is_empty());
    for draw in &draws {
        assert!(!draw.stencil.two_sided);
        match draw.culling {
            CullingMode::Clockwise => assert_eq!(draw.stencil.pass_op, StencilOperation::Increment),
            CullingMode::Anticlockwise => assert_eq!(draw.stencil.pass_op, StencilOperation::Decrement),
            CullingMode::None => panic!("two-pass volumes must cull one face"),
        }
    }
    // Increments land before decrements so clamping at zero loses nothing
    let first_decrement = draws.iter().position(|d| d.stencil.pass_op == StencilOperation::Decrement).unwrap();
    assert_eq!(draws[first_decrement - 1].stencil.pass_op, StencilOperation::Increment);
    assert!(device.stencil_is_clear());
}

#[test]
fn test_without_vertex_programs_volumes_extrude_in_software() {
    for (mut scene, camera) in [z_pass_scene(), near_plane_scene()] {
        let mut device = device_without(Capabilities::VERTEX_PROGRAM);

        let stats = scene.render_scene(&camera, VIEWPORT, &mut device).unwrap();
        assert!(stats.shadow_volumes > 0);
        let draws = volume_draws(&device);
        assert!(!draws.is_empty());
        assert!(draws.iter().all(|d| d.vertex_program.is_none()));
        assert!(device.stencil_is_clear());
    }
}

#[test]
fn test_switching_devices_uploads_every_drawn_buffer_again() {
    let (mut scene, camera) = near_plane_scene();
    let mut first = device();
    let mut second = device_without(Capabilities::TWO_SIDED_STENCIL);

    scene.render_scene(&camera, VIEWPORT, &mut first).unwrap();
    scene.render_scene(&camera, VIEWPORT, &mut second).unwrap();

    let written: BTreeSet<BufferId> = second
        .commands()
        .iter()
        .filter_map(|c| match c {
            DeviceCommand::UpdateBuffer { buffer, .. } => Some(*buffer),
            _ => None,
        })
        .collect();
    let modulative = second.draws().filter(|d| d.scene_blend == SceneBlend::MODULATE).count();
    assert!(modulative > 0);
    for draw in second.draws() {
        assert!(written.contains(&draw.operation.vertex_buffer));
        if let Some(indices) = draw.operation.index_buffer {
            assert!(written.contains(&indices));
        }
    }
}

#[test]
fn test_directional_casters_include_objects_above_the_view() {
    let mut scene = scene(ShadowTechnique::StencilModulative);
    cube_at(&mut scene, "overhead", Vec3::new(0.0, 30.0, 0.0));
    cube_at(&mut scene, "aside", Vec3::new(500.0, 0.0, 0.0));
    scene.create_light(Light::directional(Vec3::new(0.0, -1.0, 0.0), Colour::WHITE));
    let mut device = device();

    let stats = scene.render_scene(&looking_at_origin(Vec3::new(0.0, 2.0, 10.0)), VIEWPORT, &mut device).unwrap();
    assert_eq!(stats.shadow_casters, 1);
    assert_eq!(stats.draws_with(scene.shadow_passes().modulative), 1);
}

#[test]
fn test_debug_volumes_drawn_once_per_volume() {
    let mut scene = scene(ShadowTechnique::StencilModulative);
    scene.set_show_debug_shadows(true);
    cube_at(&mut scene, "cube", Vec3::zeros());
    scene.create_light(Light::directional(Vec3::new(0.3, -1.0, 0.0), Colour::WHITE));
    let mut device = device();

    let stats = scene.render_scene(&looking_at_origin(Vec3::new(0.0, 3.0, 8.0)), VIEWPORT, &mut device).unwrap();
    assert_eq!(stats.z_fail_lights, 0);
    assert!(stats.shadow_volumes > 0);
    assert_eq!(stats.draws_with(scene.shadow_passes().debug_z_pass), stats.shadow_volumes);
    assert!(device.stencil_is_clear());
}

#[test]
fn test_stencil_shadows_without_stencil_buffer_render_unshadowed() {
    let mut scene = scene(ShadowTechnique::StencilAdditive);
    cube_at(&mut scene, "cube", Vec3::zeros());
    scene.create_light(Light::directional(Vec3::new(0.0, -1.0, 0.0), Colour::WHITE));
    let mut device = RecordingRenderSystem::new(RenderSystemCapabilities {
        flags: Capabilities::RENDER_TO_TEXTURE,
        ..RenderSystemCapabilities::fixed_function()
    });

    let stats = scene.render_scene(&looking_at_origin(Vec3::new(0.0, 3.0, 8.0)), VIEWPORT, &mut device).unwrap();
    assert_eq!(stats.shadow_volumes, 0);
    assert_eq!(stats.draw_calls, 1);
    assert!(device.draws().all(|d| !d.stencil_check));
}
