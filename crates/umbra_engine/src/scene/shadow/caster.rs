//! Shadow casters and the per-light search for them

use crate::render::camera::Camera;
use crate::render::light::Light;
use crate::render::render_system::RenderSystem;
use crate::render::RenderResult;
use crate::scene::bounds::{PlaneBoundedVolume, AABB};
use crate::scene::scene_graph::{ObjectHandle, SceneGraph};

use super::volume::{extrude_bounds, ShadowIndexBuffer, ShadowRenderable, ShadowRenderableFlags};

/// An object that can cast stencil and texture shadows
pub trait ShadowCaster {
    /// True if the object is visible and set to cast shadows
    fn casts_shadows(&self) -> bool;

    /// World space bounds
    fn world_bounding_box(&self) -> AABB;

    /// World space bounds of the light cap
    fn light_cap_bounds(&self) -> AABB {
        self.world_bounding_box()
    }

    /// World space bounds of the dark cap for a light
    fn dark_cap_bounds(&self, light: &Light, extrusion_distance: f32) -> AABB {
        extrude_bounds(&self.world_bounding_box(), &light.as_vec4(), extrusion_distance)
    }

    /// Extrusion distance for point and spot lights
    fn point_extrusion_distance(&self, light: &Light) -> f32 {
        light.range
    }

    /// Build the shadow volumes of this object for a light
    ///
    /// Volume indices are written to the shared `index_buffer`, which the
    /// next caster overwrites, so the returned renderables must be drawn
    /// before asking another caster.
    fn shadow_volume_renderables(
        &self,
        light: &Light,
        index_buffer: &mut ShadowIndexBuffer,
        flags: ShadowRenderableFlags,
        extrusion_distance: f32,
        device: &mut dyn RenderSystem,
    ) -> RenderResult<Vec<ShadowRenderable>>;
}

/// Distance used to extrude a light's volumes
pub fn extrusion_distance(caster: &dyn ShadowCaster, light: &Light, dir_light_extrusion_distance: f32) -> f32 {
    if light.is_directional() {
        dir_light_extrusion_distance
    } else {
        caster.point_extrusion_distance(light)
    }
}

/// Inputs of a caster search
#[derive(Debug, Clone, Copy)]
pub struct CasterSearch<'a> {
    /// Camera the shadows are seen from
    pub camera: &'a Camera,
    /// Light casting the shadows
    pub light: &'a Light,
    /// How far directional shadows reach back towards the light
    pub dir_light_extrusion_distance: f32,
    /// Squared distance beyond which casters are ignored
    pub far_distance_squared: Option<f32>,
}

/// Find the objects casting shadows into the camera's view for one light
///
/// `lookup` maps a graph handle to its caster; returning `None` excludes the
/// object, which is how objects in queue groups without shadows are left out.
///
/// Directional lights take every caster in the box around the frustum swept
/// back towards the light. Point and spot lights first need their sphere to
/// be visible; a caster then qualifies if the camera sees it or, when the
/// light itself is outside the frustum, if it lies between the light and
/// the frustum.
pub fn find_shadow_casters<'c, C, F>(
    graph: &dyn SceneGraph,
    search: &CasterSearch<'_>,
    lookup: F,
) -> Vec<ObjectHandle>
where
    C: ShadowCaster + ?Sized + 'c,
    F: Fn(ObjectHandle) -> Option<&'c C>,
{
    let camera = search.camera;
    let light = search.light;

    let candidates = match light.bounding_sphere() {
        None => {
            let corners = camera.world_space_corners();
            let mut region = AABB::from_points(corners.iter());
            let sweep = light.direction * -search.dir_light_extrusion_distance;
            for corner in &corners {
                region.merge_point(&(corner + sweep));
            }
            graph.query_aabb(&region)
        }
        Some(sphere) => {
            if !camera.is_visible_sphere(&sphere) {
                return Vec::new();
            }
            graph.query_sphere(&sphere)
        }
    };

    let clip_volumes: Option<Vec<PlaneBoundedVolume>> =
        (!light.is_directional() && !camera.is_visible_point(&light.position))
            .then(|| light.frustum_clip_volumes(camera));

    let casters: Vec<ObjectHandle> = candidates
        .into_iter()
        .filter(|&handle| {
            let Some(caster) = lookup(handle) else {
                return false;
            };
            if !caster.casts_shadows() {
                return false;
            }
            let bounds = caster.world_bounding_box();
            if bounds.is_null() {
                return false;
            }
            if let Some(far_squared) = search.far_distance_squared {
                let radius = bounds.extents().norm();
                let distance_squared = (bounds.center() - camera.position()).norm_squared();
                if distance_squared - radius * radius > far_squared {
                    return false;
                }
            }
            if light.is_directional() {
                return true;
            }
            camera.is_visible_aabb(&bounds)
                || clip_volumes
                    .as_ref()
                    .is_some_and(|volumes| volumes.iter().any(|v| v.intersects_aabb(&bounds)))
        })
        .collect();

    log::trace!("Found {} shadow casters for {:?} light", casters.len(), light.light_type);
    casters
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::foundation::math::Vec3;
    use crate::render::colour::Colour;
    use crate::scene::scene_graph::SimpleListGraph;
    use slotmap::SlotMap;

    struct BoxCaster {
        bounds: AABB,
        casts: bool,
    }

    impl ShadowCaster for BoxCaster {
        fn casts_shadows(&self) -> bool {
            self.casts
        }

        fn world_bounding_box(&self) -> AABB {
            self.bounds
        }

        fn shadow_volume_renderables(
            &self,
            _light: &Light,
            _index_buffer: &mut ShadowIndexBuffer,
            _flags: ShadowRenderableFlags,
            _extrusion_distance: f32,
            _device: &mut dyn RenderSystem,
        ) -> RenderResult<Vec<ShadowRenderable>> {
            Ok(Vec::new())
        }
    }

    struct Scene {
        graph: SimpleListGraph,
        casters: SlotMap<ObjectHandle, BoxCaster>,
    }

    impl Scene {
        fn new() -> Self {
            Self { graph: SimpleListGraph::new(), casters: SlotMap::with_key() }
        }

        fn add(&mut self, centre: Vec3, casts: bool) -> ObjectHandle {
            let bounds = AABB::from_center_extents(centre, Vec3::repeat(1.0));
            let handle = self.casters.insert(BoxCaster { bounds, casts });
            self.graph.add(handle, bounds);
            handle
        }

        fn find(&self, camera: &Camera, light: &Light, far: Option<f32>) -> Vec<ObjectHandle> {
            let search = CasterSearch {
                camera,
                light,
                dir_light_extrusion_distance: 50.0,
                far_distance_squared: far.map(|f| f * f),
            };
            find_shadow_casters(&self.graph, &search, |h| self.casters.get(h))
        }
    }

    fn camera() -> Camera {
        Camera::perspective(Vec3::new(0.0, 5.0, 20.0), 60.0, 1.0, 1.0, 100.0)
    }

    #[test]
    fn test_directional_casters_use_swept_frustum_box() {
        let mut scene = Scene::new();
        let in_view = scene.add(Vec3::new(0.0, 0.0, 0.0), true);
        let above_view = scene.add(Vec3::new(0.0, 100.0, 0.0), true);
        let too_high = scene.add(Vec3::new(0.0, 200.0, 0.0), true);
        let aside = scene.add(Vec3::new(500.0, 0.0, 0.0), true);

        let light = Light::directional(-Vec3::y(), Colour::WHITE);
        let found = scene.find(&camera(), &light, None);
        assert!(found.contains(&in_view));
        assert!(found.contains(&above_view));
        assert!(!found.contains(&too_high));
        assert!(!found.contains(&aside));
    }

    #[test]
    fn test_non_casting_objects_are_skipped() {
        let mut scene = Scene::new();
        let quiet = scene.add(Vec3::zeros(), false);
        let light = Light::directional(-Vec3::y(), Colour::WHITE);
        assert!(!scene.find(&camera(), &light, None).contains(&quiet));
    }

    #[test]
    fn test_point_light_in_view_takes_only_visible_casters() {
        let mut scene = Scene::new();
        let visible = scene.add(Vec3::new(0.0, 0.0, 0.0), true);
        let behind_camera = scene.add(Vec3::new(0.0, 5.0, 40.0), true);
        let light = Light::point(Vec3::new(0.0, 10.0, 0.0), Colour::WHITE, 100.0);
        let found = scene.find(&camera(), &light, None);
        assert_eq!(found, vec![visible]);
        assert!(!found.contains(&behind_camera));
    }

    #[test]
    fn test_point_light_behind_camera_uses_clip_volumes() {
        let mut scene = Scene::new();
        let between = scene.add(Vec3::new(0.0, 5.0, 40.0), true);
        let off_to_side = scene.add(Vec3::new(30.0, 5.0, 40.0), true);
        let light = Light::point(Vec3::new(0.0, 5.0, 60.0), Colour::WHITE, 100.0);
        let found = scene.find(&camera(), &light, None);
        assert!(found.contains(&between));
        assert!(!found.contains(&off_to_side));
    }

    #[test]
    fn test_invisible_light_sphere_finds_nothing() {
        let mut scene = Scene::new();
        scene.add(Vec3::new(0.0, 0.0, 0.0), true);
        let light = Light::point(Vec3::new(0.0, 0.0, 500.0), Colour::WHITE, 10.0);
        assert!(scene.find(&camera(), &light, None).is_empty());
    }

    #[test]
    fn test_far_distance_drops_distant_casters() {
        let mut scene = Scene::new();
        let near = scene.add(Vec3::new(0.0, 0.0, 10.0), true);
        let far = scene.add(Vec3::new(0.0, 0.0, -60.0), true);
        let light = Light::directional(-Vec3::y(), Colour::WHITE);
        let found = scene.find(&camera(), &light, Some(40.0));
        assert!(found.contains(&near));
        assert!(!found.contains(&far));
    }
}
