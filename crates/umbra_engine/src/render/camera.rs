//! # 3D Camera
//!
//! Cameras drive both the main view and the shadow texture passes. A camera
//! looks down its local -Z axis with Y up, and produces clip space depth in
//! `[-w, w]`.
//!
//! A far clip distance of zero means an infinite far plane.

use crate::foundation::math::{Mat4, Mat4Ext, Point3, Vec3};
use crate::scene::bounds::{Frustum, Sphere, AABB};

/// Far distance substituted for an infinite far plane when a finite value is needed
const INFINITE_FAR_SUBSTITUTE: f32 = 100_000.0;

/// Projection model
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProjectionType {
    /// Perspective projection
    Perspective,
    /// Parallel projection; the window is sized from the FOV at the near plane
    Orthographic,
}

/// 3D Camera for perspective and orthographic projections
///
/// # Coordinate System
/// Right-handed, Y-up view space:
/// - X+ = Right
/// - Y+ = Up
/// - Z- = Forward
///
/// Matrices are computed on demand.
#[derive(Debug, Clone)]
pub struct Camera {
    name: String,
    position: Vec3,
    direction: Vec3,
    up: Vec3,
    projection: ProjectionType,
    fov: f32,
    aspect: f32,
    near: f32,
    far: f32,
}

impl Camera {
    /// Create a new perspective camera looking down -Z
    pub fn perspective(position: Vec3, fov_degrees: f32, aspect: f32, near: f32, far: f32) -> Self {
        Self {
            name: String::from("camera"),
            position,
            direction: -Vec3::z(),
            up: Vec3::y(),
            projection: ProjectionType::Perspective,
            fov: fov_degrees.to_radians(),
            aspect,
            near,
            far,
        }
    }

    /// Give the camera a name used in log output
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Camera name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Camera position in world space
    pub const fn position(&self) -> Vec3 {
        self.position
    }

    /// Update camera position
    pub fn set_position(&mut self, position: Vec3) {
        self.position = position;
        log::trace!("Camera '{}' position updated to: {:?}", self.name, position);
    }

    /// Normalised view direction
    pub const fn direction(&self) -> Vec3 {
        self.direction
    }

    /// Point the camera along a direction, keeping the current up vector
    pub fn set_direction(&mut self, direction: Vec3) {
        let length = direction.norm();
        if length <= f32::EPSILON {
            return;
        }
        self.direction = direction / length;
        log::trace!("Camera '{}' direction updated to: {:?}", self.name, self.direction);
    }

    /// Point the camera at a target
    pub fn look_at(&mut self, target: Vec3) {
        self.set_direction(target - self.position);
    }

    /// Set the reference up vector
    pub fn set_up(&mut self, up: Vec3) {
        self.up = up.normalize();
    }

    /// Up vector orthogonal to the view direction
    pub fn up(&self) -> Vec3 {
        self.right().cross(&self.direction)
    }

    /// Right vector
    pub fn right(&self) -> Vec3 {
        let right = self.direction.cross(&self.up);
        if right.norm_squared() > 1.0e-8 {
            right.normalize()
        } else {
            // Looking straight along the reference up; any perpendicular will do
            self.direction.cross(&Vec3::z()).try_normalize(1.0e-6).unwrap_or_else(Vec3::x)
        }
    }

    /// Projection model
    pub const fn projection_type(&self) -> ProjectionType {
        self.projection
    }

    /// Switch projection model
    pub fn set_projection_type(&mut self, projection: ProjectionType) {
        self.projection = projection;
    }

    /// Vertical field of view in radians
    pub const fn fov_y(&self) -> f32 {
        self.fov
    }

    /// Set vertical field of view in radians
    pub fn set_fov_y(&mut self, fov: f32) {
        self.fov = fov;
    }

    /// Width over height
    pub const fn aspect_ratio(&self) -> f32 {
        self.aspect
    }

    /// Update aspect ratio (typically called on window resize)
    pub fn set_aspect_ratio(&mut self, aspect: f32) {
        if (self.aspect - aspect).abs() > f32::EPSILON {
            log::debug!("Camera '{}' aspect ratio changed: {:.3} -> {:.3}", self.name, self.aspect, aspect);
            self.aspect = aspect;
        }
    }

    /// Distance to the near clip plane
    pub const fn near_clip_distance(&self) -> f32 {
        self.near
    }

    /// Set the near clip distance
    pub fn set_near_clip_distance(&mut self, near: f32) {
        self.near = near;
    }

    /// Distance to the far clip plane; zero for infinite
    pub const fn far_clip_distance(&self) -> f32 {
        self.far
    }

    /// Set the far clip distance; zero for infinite
    pub fn set_far_clip_distance(&mut self, far: f32) {
        self.far = far;
    }

    fn effective_far(&self) -> f32 {
        if self.far == 0.0 {
            INFINITE_FAR_SUBSTITUTE
        } else {
            self.far
        }
    }

    /// Half width and height of the view window at a distance
    fn half_extents_at(&self, distance: f32) -> (f32, f32) {
        let reference = match self.projection {
            ProjectionType::Perspective => distance,
            ProjectionType::Orthographic => self.near,
        };
        let half_height = (self.fov * 0.5).tan() * reference;
        (half_height * self.aspect, half_height)
    }

    /// World to view transform
    pub fn view_matrix(&self) -> Mat4 {
        let eye = Point3::from(self.position);
        let target = Point3::from(self.position + self.direction);
        Mat4::look_at_rh(&eye, &target, &self.up())
    }

    /// View to clip transform
    pub fn projection_matrix(&self) -> Mat4 {
        match self.projection {
            ProjectionType::Perspective if self.far == 0.0 => {
                Mat4::infinite_perspective(self.fov, self.aspect, self.near)
            }
            ProjectionType::Perspective => {
                Mat4::new_perspective(self.aspect, self.fov, self.near, self.far)
            }
            ProjectionType::Orthographic => {
                let (hw, hh) = self.half_extents_at(self.near);
                Mat4::new_orthographic(-hw, hw, -hh, hh, self.near, self.effective_far())
            }
        }
    }

    /// Combined view-projection matrix
    pub fn view_projection_matrix(&self) -> Mat4 {
        self.projection_matrix() * self.view_matrix()
    }

    /// Culling frustum in world space
    pub fn frustum(&self) -> Frustum {
        Frustum::from_matrix(&self.view_projection_matrix())
    }

    /// Frustum corners in world space
    ///
    /// Near plane first: top-right, top-left, bottom-left, bottom-right;
    /// then the far plane in the same order. An infinite far plane uses a
    /// large finite distance.
    pub fn world_space_corners(&self) -> [Vec3; 8] {
        let right = self.right();
        let up = self.up();
        let far = self.effective_far();
        let corner = |distance: f32, sx: f32, sy: f32| {
            let (hw, hh) = self.half_extents_at(distance);
            self.position + self.direction * distance + right * (hw * sx) + up * (hh * sy)
        };
        [
            corner(self.near, 1.0, 1.0),
            corner(self.near, -1.0, 1.0),
            corner(self.near, -1.0, -1.0),
            corner(self.near, 1.0, -1.0),
            corner(far, 1.0, 1.0),
            corner(far, -1.0, 1.0),
            corner(far, -1.0, -1.0),
            corner(far, 1.0, -1.0),
        ]
    }

    /// True if any part of the box may be visible
    pub fn is_visible_aabb(&self, aabb: &AABB) -> bool {
        self.frustum().intersects_aabb(aabb)
    }

    /// True if any part of the sphere may be visible
    pub fn is_visible_sphere(&self, sphere: &Sphere) -> bool {
        self.frustum().intersects_sphere(sphere)
    }

    /// True if the point lies inside the frustum
    pub fn is_visible_point(&self, point: &Vec3) -> bool {
        self.frustum().contains_point(point)
    }
}
