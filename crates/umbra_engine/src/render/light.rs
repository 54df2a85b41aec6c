//! Light sources and their shadow clip volumes

use crate::foundation::math::{Vec3, Vec4};
use crate::scene::bounds::{Plane, PlaneBoundedVolume, Sphere};

use super::camera::Camera;
use super::colour::Colour;

slotmap::new_key_type! {
    /// Handle to a light owned by the scene manager
    pub struct LightHandle;
}

/// Ordered list of lights affecting a renderable
pub type LightList = Vec<LightHandle>;

/// Light types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LightType {
    /// Directional light (like sunlight)
    Directional,
    /// Point light (like a lightbulb)
    Point,
    /// Spot light (like a flashlight)
    Spot,
}

/// Light source
#[derive(Debug, Clone)]
pub struct Light {
    /// Light type
    pub light_type: LightType,
    /// Light position (for point/spot lights)
    pub position: Vec3,
    /// Light direction (for directional/spot lights)
    pub direction: Vec3,
    /// Diffuse colour
    pub diffuse: Colour,
    /// Specular colour
    pub specular: Colour,
    /// Attenuation range (for point/spot lights)
    pub range: f32,
    /// Inner cone angle for spot lights (in radians)
    pub inner_cone_angle: f32,
    /// Outer cone angle for spot lights (in radians)
    pub outer_cone_angle: f32,
    /// Whether this light casts shadows
    pub cast_shadows: bool,
    /// Disabled lights are ignored entirely
    pub visible: bool,
}

impl Light {
    fn base(light_type: LightType, position: Vec3, direction: Vec3, diffuse: Colour) -> Self {
        Self {
            light_type,
            position,
            direction,
            diffuse,
            specular: Colour::BLACK,
            range: 100_000.0,
            inner_cone_angle: 30.0_f32.to_radians(),
            outer_cone_angle: 40.0_f32.to_radians(),
            cast_shadows: true,
            visible: true,
        }
    }

    /// Create a directional light
    pub fn directional(direction: Vec3, diffuse: Colour) -> Self {
        Self::base(LightType::Directional, Vec3::zeros(), direction.normalize(), diffuse)
    }

    /// Create a point light
    pub fn point(position: Vec3, diffuse: Colour, range: f32) -> Self {
        Self {
            range,
            ..Self::base(LightType::Point, position, -Vec3::z(), diffuse)
        }
    }

    /// Create a spot light
    pub fn spot(
        position: Vec3,
        direction: Vec3,
        diffuse: Colour,
        range: f32,
        inner_cone_angle: f32,
        outer_cone_angle: f32,
    ) -> Self {
        Self {
            range,
            inner_cone_angle,
            outer_cone_angle,
            ..Self::base(LightType::Spot, position, direction.normalize(), diffuse)
        }
    }

    /// Enable or disable shadow casting
    #[must_use]
    pub const fn with_cast_shadows(mut self, cast: bool) -> Self {
        self.cast_shadows = cast;
        self
    }

    /// True for directional lights
    pub fn is_directional(&self) -> bool {
        self.light_type == LightType::Directional
    }

    /// Position as a homogeneous vector
    ///
    /// Directional lights return the direction towards the light with w = 0.
    pub fn as_vec4(&self) -> Vec4 {
        if self.is_directional() {
            Vec4::new(-self.direction.x, -self.direction.y, -self.direction.z, 0.0)
        } else {
            Vec4::new(self.position.x, self.position.y, self.position.z, 1.0)
        }
    }

    /// Sphere of influence; `None` for directional lights
    pub fn bounding_sphere(&self) -> Option<Sphere> {
        (!self.is_directional()).then(|| Sphere::new(self.position, self.range))
    }

    /// True if the light can contribute to what the camera sees
    pub fn affects_camera(&self, camera: &Camera) -> bool {
        self.visible
            && self
                .bounding_sphere()
                .map_or(true, |sphere| camera.is_visible_sphere(&sphere))
    }

    /// Volumes between the light and each face of the camera frustum
    ///
    /// Each volume is bounded by the frustum face itself plus one plane per
    /// face edge, swept back towards the light. Faces the light sits behind
    /// produce no volume. Used to pick up casters outside the frustum whose
    /// shadows fall inside it.
    pub fn frustum_clip_volumes(&self, camera: &Camera) -> Vec<PlaneBoundedVolume> {
        let corners = camera.world_space_corners();
        let light = self.as_vec4();
        let interior = (corners.iter().sum::<Vec3>()) / 8.0;

        // Corner indices per face, following the order of `world_space_corners`
        const FACES: [[usize; 4]; 6] = [
            [0, 1, 2, 3], // near
            [4, 5, 6, 7], // far
            [1, 5, 6, 2], // left
            [0, 3, 7, 4], // right
            [0, 4, 5, 1], // top
            [3, 2, 6, 7], // bottom
        ];

        let mut volumes = Vec::new();
        for (face_index, face) in FACES.iter().enumerate() {
            if face_index == 1 && camera.far_clip_distance() == 0.0 {
                continue;
            }
            let [a, b, c, _] = face.map(|i| corners[i]);
            let mut face_plane = Plane::from_points(&a, &b, &c);
            // Face plane oriented to point out of the frustum
            if face_plane.distance_to_point(interior) > 0.0 {
                face_plane = face_plane.flipped();
            }
            let light_side = face_plane.normal.dot(&light.xyz()) + face_plane.distance * light.w;
            if light_side <= 0.0 {
                continue;
            }

            let face_centre = face.iter().map(|&i| corners[i]).sum::<Vec3>() / 4.0;
            let mut planes = Vec::with_capacity(5);
            for edge in 0..4 {
                let p0 = corners[face[edge]];
                let p1 = corners[face[(edge + 1) % 4]];
                let towards_light = if self.is_directional() {
                    light.xyz()
                } else {
                    self.position - p0
                };
                let normal = (p1 - p0).cross(&towards_light);
                if normal.norm_squared() <= f32::EPSILON {
                    continue;
                }
                let mut plane = Plane::from_normal_point(normal, &p0);
                if plane.distance_to_point(face_centre) < 0.0 {
                    plane = plane.flipped();
                }
                planes.push(plane);
            }
            // The volume ends at the face; positive side faces the light
            planes.push(face_plane);
            volumes.push(PlaneBoundedVolume::new(planes));
        }
        volumes
    }

    /// Volume between the light and the camera's near clip rectangle
    ///
    /// Any caster intersecting it can cut the near plane with its shadow
    /// volume, so depth-fail stencil counting is required for this light.
    /// A light lying in the near plane gives an unbounded volume.
    pub fn near_clip_volume(&self, camera: &Camera) -> PlaneBoundedVolume {
        let corners = camera.world_space_corners();
        let near_normal = camera.direction();
        let cam_pos = camera.position();
        let light = self.as_vec4();

        // Signed distance of the light from the near plane through the camera
        let d = near_normal.dot(&light.xyz()) - near_normal.dot(&cam_pos) * light.w;
        if d.abs() <= 1.0e-6 {
            return PlaneBoundedVolume::default();
        }

        let interior = if self.is_directional() {
            (corners[0] + corners[1] + corners[2] + corners[3]) / 4.0 + light.xyz() * 0.5
        } else {
            ((corners[0] + corners[1] + corners[2] + corners[3]) / 4.0 + self.position) * 0.5
        };

        let mut planes = Vec::with_capacity(6);
        for edge in 0..4 {
            let p0 = corners[edge];
            let p1 = corners[(edge + 1) % 4];
            let towards_light = if self.is_directional() {
                light.xyz()
            } else {
                self.position - p0
            };
            let normal = (p1 - p0).cross(&towards_light);
            if normal.norm_squared() <= f32::EPSILON {
                continue;
            }
            let mut plane = Plane::from_normal_point(normal, &p0);
            if plane.distance_to_point(interior) < 0.0 {
                plane = plane.flipped();
            }
            planes.push(plane);
        }

        // Plane through the camera, facing the light
        let camera_plane = Plane::from_normal_point(near_normal, &cam_pos);
        planes.push(if d < 0.0 { camera_plane.flipped() } else { camera_plane });

        if !self.is_directional() {
            // Closing plane at the light, facing back towards the camera
            let back = Plane::from_normal_point(near_normal, &self.position);
            planes.push(if d < 0.0 { back } else { back.flipped() });
        }
        PlaneBoundedVolume::new(planes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::bounds::AABB;

    fn camera() -> Camera {
        let mut camera = Camera::perspective(Vec3::new(0.0, 0.0, 10.0), 60.0, 1.0, 1.0, 100.0);
        camera.look_at(Vec3::zeros());
        camera
    }

    #[test]
    fn test_homogeneous_position() {
        let dir = Light::directional(Vec3::new(0.0, -1.0, 0.0), Colour::WHITE);
        assert_eq!(dir.as_vec4(), Vec4::new(0.0, 1.0, 0.0, 0.0));
        let point = Light::point(Vec3::new(1.0, 2.0, 3.0), Colour::WHITE, 50.0);
        assert_eq!(point.as_vec4(), Vec4::new(1.0, 2.0, 3.0, 1.0));
        assert!(dir.bounding_sphere().is_none());
        assert_eq!(point.bounding_sphere().unwrap().radius, 50.0);
    }

    #[test]
    fn test_point_light_out_of_range_does_not_affect_camera() {
        let cam = camera();
        let near = Light::point(Vec3::new(0.0, 5.0, 0.0), Colour::WHITE, 10.0);
        let behind = Light::point(Vec3::new(0.0, 0.0, 500.0), Colour::WHITE, 10.0);
        assert!(near.affects_camera(&cam));
        assert!(!behind.affects_camera(&cam));
        assert!(Light::directional(-Vec3::y(), Colour::WHITE).affects_camera(&cam));
    }

    #[test]
    fn test_near_clip_volume_contains_region_between_light_and_near_plane() {
        let cam = camera();
        let light = Light::point(Vec3::new(0.0, 0.0, 20.0), Colour::WHITE, 100.0);
        let volume = light.near_clip_volume(&cam);
        assert_eq!(volume.planes.len(), 6);
        let between = AABB::from_center_extents(Vec3::new(0.0, 0.0, 15.0), Vec3::repeat(0.1));
        let beside = AABB::from_center_extents(Vec3::new(30.0, 0.0, 15.0), Vec3::repeat(0.1));
        let in_front = AABB::from_center_extents(Vec3::new(0.0, 0.0, 0.0), Vec3::repeat(0.1));
        assert!(volume.intersects_aabb(&between));
        assert!(!volume.intersects_aabb(&beside));
        assert!(!volume.intersects_aabb(&in_front));
    }

    #[test]
    fn test_near_clip_volume_degenerate_when_light_in_camera_plane() {
        let cam = camera();
        let light = Light::point(Vec3::new(5.0, 0.0, 10.0), Colour::WHITE, 100.0);
        let volume = light.near_clip_volume(&cam);
        assert!(volume.planes.is_empty());
        assert!(volume.intersects_aabb(&AABB::new(Vec3::repeat(900.0), Vec3::repeat(901.0))));
    }

    #[test]
    fn test_clip_volumes_catch_casters_outside_the_frustum() {
        let cam = camera();
        // Light far above; caster above the frustum, between light and view
        let light = Light::point(Vec3::new(0.0, 60.0, 0.0), Colour::WHITE, 200.0);
        let volumes = light.frustum_clip_volumes(&cam);
        assert!(!volumes.is_empty());
        let caster = AABB::from_center_extents(Vec3::new(0.0, 30.0, 0.0), Vec3::repeat(1.0));
        assert!(!cam.is_visible_aabb(&caster));
        assert!(volumes.iter().any(|v| v.intersects_aabb(&caster)));
        let unrelated = AABB::from_center_extents(Vec3::new(0.0, -60.0, 0.0), Vec3::repeat(1.0));
        assert!(!volumes.iter().any(|v| v.intersects_aabb(&unrelated)));
    }
}
