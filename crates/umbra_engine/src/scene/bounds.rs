//! Bounding volumes and plane tests
//!
//! Planes store `normal · p + distance`; points on the positive side are
//! inside for every volume in this module.

use crate::foundation::math::{vec3_max, vec3_min, Mat4, Point3, Vec3, Vec4};

/// Axis-Aligned Bounding Box for spatial queries
///
/// A box whose minimum exceeds its maximum is null and intersects nothing.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AABB {
    /// Minimum corner of the bounding box
    pub min: Vec3,
    /// Maximum corner of the bounding box
    pub max: Vec3,
}

impl Default for AABB {
    fn default() -> Self {
        Self::null()
    }
}

impl AABB {
    /// Create a new AABB from min and max points
    pub const fn new(min: Vec3, max: Vec3) -> Self {
        Self { min, max }
    }

    /// An empty box that absorbs the first merged point
    pub fn null() -> Self {
        Self {
            min: Vec3::repeat(f32::INFINITY),
            max: Vec3::repeat(f32::NEG_INFINITY),
        }
    }

    /// Create an AABB centered at a point with given extents
    pub fn from_center_extents(center: Vec3, extents: Vec3) -> Self {
        Self {
            min: center - extents,
            max: center + extents,
        }
    }

    /// Smallest box containing every point
    pub fn from_points<'a>(points: impl IntoIterator<Item = &'a Vec3>) -> Self {
        points.into_iter().fold(Self::null(), |mut bounds, p| {
            bounds.merge_point(p);
            bounds
        })
    }

    /// True if the box contains nothing
    pub fn is_null(&self) -> bool {
        self.min.x > self.max.x || self.min.y > self.max.y || self.min.z > self.max.z
    }

    /// Get the center of the AABB
    pub fn center(&self) -> Vec3 {
        (self.min + self.max) * 0.5
    }

    /// Get the extents (half-size) of the AABB
    pub fn extents(&self) -> Vec3 {
        (self.max - self.min) * 0.5
    }

    /// Grow to include a point
    pub fn merge_point(&mut self, point: &Vec3) {
        self.min = vec3_min(&self.min, point);
        self.max = vec3_max(&self.max, point);
    }

    /// Grow to include another box
    pub fn merge(&mut self, other: &Self) {
        if !other.is_null() {
            self.merge_point(&other.min);
            self.merge_point(&other.max);
        }
    }

    /// The eight corners
    ///
    /// Order: the four `min.z` corners anticlockwise from `min`, then the
    /// matching four `max.z` corners.
    pub fn corners(&self) -> [Vec3; 8] {
        let (lo, hi) = (self.min, self.max);
        [
            Vec3::new(lo.x, lo.y, lo.z),
            Vec3::new(hi.x, lo.y, lo.z),
            Vec3::new(hi.x, hi.y, lo.z),
            Vec3::new(lo.x, hi.y, lo.z),
            Vec3::new(lo.x, lo.y, hi.z),
            Vec3::new(hi.x, lo.y, hi.z),
            Vec3::new(hi.x, hi.y, hi.z),
            Vec3::new(lo.x, hi.y, hi.z),
        ]
    }

    /// Box enclosing this box after an affine transform
    #[must_use]
    pub fn transformed(&self, matrix: &Mat4) -> Self {
        if self.is_null() {
            return *self;
        }
        let corners = self
            .corners()
            .map(|c| matrix.transform_point(&Point3::from(c)).coords);
        Self::from_points(corners.iter())
    }

    /// Check if this AABB contains a point
    pub fn contains_point(&self, point: Vec3) -> bool {
        point.x >= self.min.x && point.x <= self.max.x &&
        point.y >= self.min.y && point.y <= self.max.y &&
        point.z >= self.min.z && point.z <= self.max.z
    }

    /// Check if this AABB intersects another AABB
    pub fn intersects(&self, other: &Self) -> bool {
        if self.is_null() || other.is_null() {
            return false;
        }
        self.min.x <= other.max.x && self.max.x >= other.min.x &&
        self.min.y <= other.max.y && self.max.y >= other.min.y &&
        self.min.z <= other.max.z && self.max.z >= other.min.z
    }

    /// Check if this AABB intersects a sphere
    pub fn intersects_sphere(&self, sphere: &Sphere) -> bool {
        if self.is_null() {
            return false;
        }
        let closest = vec3_max(&self.min, &vec3_min(&sphere.center, &self.max));
        (closest - sphere.center).norm_squared() <= sphere.radius * sphere.radius
    }
}

/// Bounding sphere
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sphere {
    /// Centre in world space
    pub center: Vec3,
    /// Radius
    pub radius: f32,
}

impl Sphere {
    /// Create a sphere
    pub const fn new(center: Vec3, radius: f32) -> Self {
        Self { center, radius }
    }
}

/// Plane defined by normal and distance from origin
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Plane {
    /// Normal vector (should be normalized)
    pub normal: Vec3,
    /// Distance from origin along the normal
    pub distance: f32,
}

/// Which side of a plane a volume lies on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaneSide {
    /// Entirely on the side the normal points to
    Positive,
    /// Entirely behind the plane
    Negative,
    /// Straddles the plane
    Both,
}

impl Plane {
    /// Create a new plane from normal and distance
    pub fn new(normal: Vec3, distance: f32) -> Self {
        Self { normal: normal.normalize(), distance }
    }

    /// Plane with the given normal passing through a point
    pub fn from_normal_point(normal: Vec3, point: &Vec3) -> Self {
        let normal = normal.normalize();
        Self { normal, distance: -normal.dot(point) }
    }

    /// Plane through three points, facing the side where they wind anticlockwise
    pub fn from_points(a: &Vec3, b: &Vec3, c: &Vec3) -> Self {
        Self::from_normal_point((b - a).cross(&(c - a)), a)
    }

    /// Normalized plane from homogeneous coefficients `(a, b, c, d)`
    ///
    /// A zero normal yields a plane every point lies in front of.
    pub fn from_coefficients(v: &Vec4) -> Self {
        let normal = v.xyz();
        let length = normal.norm();
        if length <= f32::EPSILON {
            return Self { normal: Vec3::zeros(), distance: 1.0 };
        }
        Self { normal: normal / length, distance: v.w / length }
    }

    /// Calculate signed distance from plane to point
    pub fn distance_to_point(&self, point: Vec3) -> f32 {
        self.normal.dot(&point) + self.distance
    }

    /// Flip the plane so the other side is positive
    #[must_use]
    pub fn flipped(&self) -> Self {
        Self { normal: -self.normal, distance: -self.distance }
    }

    /// Classify a box against the plane
    pub fn side_of_box(&self, aabb: &AABB) -> PlaneSide {
        let center_distance = self.distance_to_point(aabb.center());
        let extents = aabb.extents();
        let max_abs = extents.x * self.normal.x.abs()
            + extents.y * self.normal.y.abs()
            + extents.z * self.normal.z.abs();
        if center_distance < -max_abs {
            PlaneSide::Negative
        } else if center_distance > max_abs {
            PlaneSide::Positive
        } else {
            PlaneSide::Both
        }
    }
}

/// Convex volume bounded by planes whose positive sides face inward
///
/// A volume without planes is unbounded and intersects everything.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PlaneBoundedVolume {
    /// Bounding planes
    pub planes: Vec<Plane>,
}

impl PlaneBoundedVolume {
    /// Create from a plane list
    pub const fn new(planes: Vec<Plane>) -> Self {
        Self { planes }
    }

    /// Conservative box test: false only if some plane rejects the whole box
    pub fn intersects_aabb(&self, aabb: &AABB) -> bool {
        if aabb.is_null() {
            return false;
        }
        self.planes
            .iter()
            .all(|plane| plane.side_of_box(aabb) != PlaneSide::Negative)
    }

    /// Conservative sphere test
    pub fn intersects_sphere(&self, sphere: &Sphere) -> bool {
        self.planes
            .iter()
            .all(|plane| plane.distance_to_point(sphere.center) >= -sphere.radius)
    }
}

/// Index of each plane in a [`Frustum`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrustumPlane {
    /// Near clip plane
    Near = 0,
    /// Far clip plane
    Far = 1,
    /// Left side
    Left = 2,
    /// Right side
    Right = 3,
    /// Top side
    Top = 4,
    /// Bottom side
    Bottom = 5,
}

/// Frustum for visibility culling
#[derive(Debug, Clone, PartialEq)]
pub struct Frustum {
    /// Six planes indexed by [`FrustumPlane`], normals facing inward
    pub planes: [Plane; 6],
}

impl Frustum {
    /// Create a frustum from six planes
    pub const fn new(planes: [Plane; 6]) -> Self {
        Self { planes }
    }

    /// Extract frustum planes from a view-projection matrix
    ///
    /// Gribb-Hartmann extraction for clip space depth in `[-w, w]`. An
    /// infinite far plane comes out with a zero normal and accepts everything.
    pub fn from_matrix(vp: &Mat4) -> Self {
        let row = |i: usize| Vec4::new(vp[(i, 0)], vp[(i, 1)], vp[(i, 2)], vp[(i, 3)]);
        let (r0, r1, r2, r3) = (row(0), row(1), row(2), row(3));
        Self {
            planes: [
                Plane::from_coefficients(&(r3 + r2)),
                Plane::from_coefficients(&(r3 - r2)),
                Plane::from_coefficients(&(r3 + r0)),
                Plane::from_coefficients(&(r3 - r0)),
                Plane::from_coefficients(&(r3 - r1)),
                Plane::from_coefficients(&(r3 + r1)),
            ],
        }
    }

    /// Access one plane
    pub const fn plane(&self, which: FrustumPlane) -> &Plane {
        &self.planes[which as usize]
    }

    /// Check if an AABB is inside or intersects the frustum
    pub fn intersects_aabb(&self, aabb: &AABB) -> bool {
        !aabb.is_null()
            && self
                .planes
                .iter()
                .all(|plane| plane.side_of_box(aabb) != PlaneSide::Negative)
    }

    /// Check if a sphere is inside or intersects the frustum
    pub fn intersects_sphere(&self, sphere: &Sphere) -> bool {
        self.planes
            .iter()
            .all(|plane| plane.distance_to_point(sphere.center) >= -sphere.radius)
    }

    /// Check if a point is inside the frustum
    pub fn contains_point(&self, point: &Vec3) -> bool {
        self.planes.iter().all(|plane| plane.distance_to_point(*point) >= 0.0)
    }
}
