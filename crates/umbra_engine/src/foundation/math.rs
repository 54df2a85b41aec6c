//! Math utilities and types
//!
//! Provides the fundamental math types used by the scene and render layers.
//! Camera space follows the right-handed convention: the camera looks down
//! its local -Z axis and clip space depth runs from -w to w.

pub use nalgebra::{
    Vector2, Vector3, Vector4,
    Matrix3, Matrix4,
    Quaternion,
    Unit,
};

/// 2D vector type
pub type Vec2 = Vector2<f32>;

/// 3D vector type
pub type Vec3 = Vector3<f32>;

/// 4D vector type
pub type Vec4 = Vector4<f32>;

/// 3x3 matrix type
pub type Mat3 = Matrix3<f32>;

/// 4x4 matrix type
pub type Mat4 = Matrix4<f32>;

/// 3D point type
pub type Point3 = nalgebra::Point3<f32>;

/// Quaternion type for rotations
pub type Quat = nalgebra::UnitQuaternion<f32>;

/// Transform representing position, rotation, and scale
#[derive(Debug, Clone, PartialEq)]
pub struct Transform {
    /// Position in 3D space
    pub position: Vec3,

    /// Rotation quaternion
    pub rotation: Quat,

    /// Scale factors
    pub scale: Vec3,
}

impl Default for Transform {
    fn default() -> Self {
        Self {
            position: Vec3::zeros(),
            rotation: Quat::identity(),
            scale: Vec3::new(1.0, 1.0, 1.0),
        }
    }
}

impl Transform {
    /// Create a new identity transform
    pub fn identity() -> Self {
        Self::default()
    }

    /// Create a transform with only position
    pub fn from_position(position: Vec3) -> Self {
        Self {
            position,
            ..Default::default()
        }
    }

    /// Replace the scale, keeping position and rotation
    #[must_use]
    pub fn with_scale(mut self, scale: Vec3) -> Self {
        self.scale = scale;
        self
    }

    /// Replace the rotation, keeping position and scale
    #[must_use]
    pub fn with_rotation(mut self, rotation: Quat) -> Self {
        self.rotation = rotation;
        self
    }

    /// Convert to a transformation matrix
    pub fn to_matrix(&self) -> Mat4 {
        Mat4::new_translation(&self.position)
            * self.rotation.to_homogeneous()
            * Mat4::new_nonuniform_scaling(&self.scale)
    }

    /// Largest of the three scale factors
    pub fn max_scale(&self) -> f32 {
        self.scale.x.abs().max(self.scale.y.abs()).max(self.scale.z.abs())
    }
}

/// Maps clip space `[-1, 1]` to texture space `[0, 1]` with a flipped V axis.
pub fn clip_to_texture() -> Mat4 {
    Mat4::new(
        0.5, 0.0, 0.0, 0.5,
        0.0, -0.5, 0.0, 0.5,
        0.0, 0.0, 1.0, 0.0,
        0.0, 0.0, 0.0, 1.0,
    )
}

/// Extension trait for projection and homogeneous helpers on `Mat4`
pub trait Mat4Ext {
    /// Perspective projection whose far plane sits at infinity
    fn infinite_perspective(fovy: f32, aspect: f32, near: f32) -> Mat4;

    /// Transform a homogeneous vector
    fn transform_vec4(&self, v: &Vec4) -> Vec4;

    /// Translation part of an affine matrix
    fn translation_part(&self) -> Vec3;
}

impl Mat4Ext for Mat4 {
    fn infinite_perspective(fovy: f32, aspect: f32, near: f32) -> Mat4 {
        // Nudged slightly inside 1 so depth never hits exactly w at infinity.
        const EPSILON: f32 = 1.0e-6;
        let f = 1.0 / (fovy * 0.5).tan();
        Mat4::new(
            f / aspect, 0.0, 0.0, 0.0,
            0.0, f, 0.0, 0.0,
            0.0, 0.0, EPSILON - 1.0, (EPSILON - 2.0) * near,
            0.0, 0.0, -1.0, 0.0,
        )
    }

    fn transform_vec4(&self, v: &Vec4) -> Vec4 {
        self * v
    }

    fn translation_part(&self) -> Vec3 {
        Vec3::new(self[(0, 3)], self[(1, 3)], self[(2, 3)])
    }
}

/// Component-wise minimum
pub fn vec3_min(a: &Vec3, b: &Vec3) -> Vec3 {
    a.inf(b)
}

/// Component-wise maximum
pub fn vec3_max(a: &Vec3, b: &Vec3) -> Vec3 {
    a.sup(b)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_transform_to_matrix_translates_points() {
        let transform = Transform::from_position(Vec3::new(1.0, 2.0, 3.0))
            .with_scale(Vec3::new(2.0, 2.0, 2.0));
        let m = transform.to_matrix();
        let p = m.transform_point(&Point3::new(1.0, 0.0, 0.0));
        assert_relative_eq!(p.x, 3.0);
        assert_relative_eq!(p.y, 2.0);
        assert_relative_eq!(m.translation_part().z, 3.0);
        assert_relative_eq!(transform.max_scale(), 2.0);
    }

    #[test]
    fn test_infinite_perspective_maps_far_points_inside_clip() {
        let proj = Mat4::infinite_perspective(std::f32::consts::FRAC_PI_2, 1.0, 1.0);
        let far = proj.transform_vec4(&Vec4::new(0.0, 0.0, -1.0e6, 1.0));
        assert!(far.z / far.w <= 1.0);
        let near = proj.transform_vec4(&Vec4::new(0.0, 0.0, -1.0, 1.0));
        assert_relative_eq!(near.z / near.w, -1.0, epsilon = 1.0e-3);
    }

    #[test]
    fn test_clip_to_texture_maps_corners() {
        let m = clip_to_texture();
        let t = m.transform_vec4(&Vec4::new(-1.0, 1.0, 0.0, 1.0));
        assert_relative_eq!(t.x, 0.0);
        assert_relative_eq!(t.y, 0.0);
    }
}
