//! Scene graph trait and implementations
//!
//! Provides pluggable spatial data structures for scene management. The
//! scene manager asks the graph which objects a camera can see, which lie in
//! a light's sphere of influence and which fall inside the extruded frustum
//! box used to find directional shadow casters.

use crate::foundation::math::Vec3;

use super::bounds::{Frustum, Sphere, AABB};

slotmap::new_key_type! {
    /// Handle to a scene object owned by the scene manager
    pub struct ObjectHandle;
}

/// Trait for spatial data structures used in scene management
///
/// Allows pluggable scene graph implementations (list, octree, BSP, etc.).
/// Every query returns handles in insertion order.
pub trait SceneGraph: Send + Sync {
    /// Add an object with its world bounding box
    fn add(&mut self, object: ObjectHandle, bounds: AABB);

    /// Remove an object
    fn remove(&mut self, object: ObjectHandle);

    /// Update an object's bounding box (after transform change)
    fn update(&mut self, object: ObjectHandle, bounds: AABB);

    /// Objects whose bounds intersect a frustum
    fn query_visible(&self, frustum: &Frustum) -> Vec<ObjectHandle>;

    /// Objects whose bounds intersect a box
    fn query_aabb(&self, aabb: &AABB) -> Vec<ObjectHandle>;

    /// Objects within a radius of a point
    fn query_radius(&self, center: Vec3, radius: f32) -> Vec<ObjectHandle>;

    /// Objects within a sphere
    fn query_sphere(&self, sphere: &Sphere) -> Vec<ObjectHandle> {
        self.query_radius(sphere.center, sphere.radius)
    }

    /// Get the total number of objects in the scene graph
    fn object_count(&self) -> usize;

    /// Clear all objects from the scene graph
    fn clear(&mut self);
}

/// Simple list-based scene graph (no spatial optimization)
///
/// Performs a linear search for all queries. Sufficient for small scenes;
/// can be replaced with a spatial structure without changing the API.
#[derive(Debug, Default)]
pub struct SimpleListGraph {
    objects: Vec<(ObjectHandle, AABB)>,
}

impl SimpleListGraph {
    /// Create a new empty scene graph
    pub fn new() -> Self {
        Self::default()
    }

    fn filtered(&self, keep: impl Fn(&AABB) -> bool) -> Vec<ObjectHandle> {
        self.objects
            .iter()
            .filter(|(_, bounds)| !bounds.is_null() && keep(bounds))
            .map(|(object, _)| *object)
            .collect()
    }
}

impl SceneGraph for SimpleListGraph {
    fn add(&mut self, object: ObjectHandle, bounds: AABB) {
        self.objects.push((object, bounds));
    }

    fn remove(&mut self, object: ObjectHandle) {
        self.objects.retain(|(o, _)| *o != object);
    }

    fn update(&mut self, object: ObjectHandle, bounds: AABB) {
        if let Some(entry) = self.objects.iter_mut().find(|(o, _)| *o == object) {
            entry.1 = bounds;
        }
    }

    fn query_visible(&self, frustum: &Frustum) -> Vec<ObjectHandle> {
        self.filtered(|bounds| frustum.intersects_aabb(bounds))
    }

    fn query_aabb(&self, aabb: &AABB) -> Vec<ObjectHandle> {
        self.filtered(|bounds| aabb.intersects(bounds))
    }

    fn query_radius(&self, center: Vec3, radius: f32) -> Vec<ObjectHandle> {
        let sphere = Sphere::new(center, radius);
        self.filtered(|bounds| bounds.intersects_sphere(&sphere))
    }

    fn object_count(&self) -> usize {
        self.objects.len()
    }

    fn clear(&mut self) {
        self.objects.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use slotmap::SlotMap;

    fn handles(count: usize) -> Vec<ObjectHandle> {
        let mut map: SlotMap<ObjectHandle, ()> = SlotMap::with_key();
        (0..count).map(|_| map.insert(())).collect()
    }

    #[test]
    fn test_simple_list_graph_add_remove() {
        let ids = handles(2);
        let mut graph = SimpleListGraph::new();
        let bounds = AABB::new(Vec3::zeros(), Vec3::new(1.0, 1.0, 1.0));

        graph.add(ids[0], bounds);
        graph.add(ids[1], bounds);
        assert_eq!(graph.object_count(), 2);

        graph.remove(ids[0]);
        assert_eq!(graph.object_count(), 1);
        graph.clear();
        assert_eq!(graph.object_count(), 0);
    }

    #[test]
    fn test_box_and_radius_queries() {
        let ids = handles(2);
        let mut graph = SimpleListGraph::new();
        graph.add(ids[0], AABB::from_center_extents(Vec3::zeros(), Vec3::repeat(1.0)));
        graph.add(ids[1], AABB::from_center_extents(Vec3::new(10.0, 0.0, 0.0), Vec3::repeat(1.0)));

        let near_origin = AABB::new(Vec3::repeat(-0.5), Vec3::repeat(0.5));
        assert_eq!(graph.query_aabb(&near_origin), vec![ids[0]]);
        assert_eq!(graph.query_radius(Vec3::new(7.0, 0.0, 0.0), 2.5), vec![ids[1]]);
        assert_eq!(graph.query_radius(Vec3::new(5.0, 0.0, 0.0), 10.0), ids);
    }

    #[test]
    fn test_update_moves_object() {
        let ids = handles(1);
        let mut graph = SimpleListGraph::new();
        graph.add(ids[0], AABB::from_center_extents(Vec3::zeros(), Vec3::repeat(1.0)));
        graph.update(ids[0], AABB::from_center_extents(Vec3::new(50.0, 0.0, 0.0), Vec3::repeat(1.0)));
        assert!(graph.query_radius(Vec3::zeros(), 2.0).is_empty());
    }

    #[test]
    fn test_null_bounds_never_match() {
        let ids = handles(1);
        let mut graph = SimpleListGraph::new();
        graph.add(ids[0], AABB::null());
        assert!(graph.query_radius(Vec3::zeros(), 1.0e6).is_empty());
    }
}
