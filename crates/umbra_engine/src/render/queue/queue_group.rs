//! Queue groups: coarse render ordering with per-group shadow switch

use std::collections::btree_map;
use std::collections::BTreeMap;

use crate::render::camera::Camera;
use crate::render::material::{Material, Technique};
use crate::render::pass::PassStore;
use crate::render::renderable::RenderableRef;
use crate::render::RenderResult;

use super::priority_group::RenderPriorityGroup;

/// Identifier of a queue group; lower ids render first
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RenderQueueGroupId(pub u8);

impl RenderQueueGroupId {
    /// Backdrops drawn before anything else
    pub const BACKGROUND: Self = Self(0);
    /// Sky geometry drawn before the world
    pub const SKIES_EARLY: Self = Self(5);
    /// World geometry drawn before the main group
    pub const WORLD_GEOMETRY_1: Self = Self(25);
    /// Default group for scene objects
    pub const MAIN: Self = Self(50);
    /// World geometry drawn after the main group
    pub const WORLD_GEOMETRY_2: Self = Self(75);
    /// Transparent geometry that must follow all other world content
    pub const TRANSPARENT_LATE: Self = Self(80);
    /// Sky geometry drawn after the world
    pub const SKIES_LATE: Self = Self(95);
    /// Screen-space overlays
    pub const OVERLAY: Self = Self(100);

    /// Whether shadow processing runs for a freshly created group with this id
    pub const fn shadows_enabled_by_default(self) -> bool {
        !matches!(self.0, 0 | 5 | 95 | 100)
    }
}

impl Default for RenderQueueGroupId {
    fn default() -> Self {
        Self::MAIN
    }
}

/// Priority groups of one queue group, ordered by ascending priority
pub struct RenderQueueGroup {
    priority_groups: BTreeMap<u16, RenderPriorityGroup>,
    shadows_enabled: bool,
    split_passes_by_lighting_type: bool,
    split_no_shadow_passes: bool,
}

impl RenderQueueGroup {
    /// Create an empty group
    pub fn new(shadows_enabled: bool, split_passes_by_lighting_type: bool, split_no_shadow_passes: bool) -> Self {
        Self {
            priority_groups: BTreeMap::new(),
            shadows_enabled,
            split_passes_by_lighting_type,
            split_no_shadow_passes,
        }
    }

    /// Queue a renderable at a priority, creating the priority group on first use
    pub fn add_renderable(
        &mut self,
        renderable: &RenderableRef,
        priority: u16,
        material: &Material,
        technique: &Technique,
        passes: &PassStore,
    ) -> RenderResult<()> {
        let (split_lighting, split_no_shadow) = (self.split_passes_by_lighting_type, self.split_no_shadow_passes);
        self.priority_groups
            .entry(priority)
            .or_insert_with(|| RenderPriorityGroup::new(split_lighting, split_no_shadow))
            .add_renderable(renderable, material, technique, passes, self.shadows_enabled)
    }

    /// Sort every priority group's transparent list
    pub fn sort(&mut self, camera: &Camera) {
        for group in self.priority_groups.values_mut() {
            group.sort(camera);
        }
    }

    /// Clear every priority group; the groups themselves are kept
    pub fn clear(&mut self, passes: &PassStore) {
        for group in self.priority_groups.values_mut() {
            group.clear(passes);
        }
    }

    /// Priority groups in render order
    pub fn iter(&self) -> btree_map::Iter<'_, u16, RenderPriorityGroup> {
        self.priority_groups.iter()
    }

    /// Priority group at a priority, if one was created
    pub fn priority_group(&self, priority: u16) -> Option<&RenderPriorityGroup> {
        self.priority_groups.get(&priority)
    }

    /// Whether shadows are rendered for this group
    pub const fn shadows_enabled(&self) -> bool {
        self.shadows_enabled
    }

    /// Turn shadow processing for this group on or off
    pub fn set_shadows_enabled(&mut self, enabled: bool) {
        self.shadows_enabled = enabled;
    }

    /// Toggle lighting-split rendering for this group and its priority groups
    pub fn set_split_passes_by_lighting_type(&mut self, split: bool) {
        self.split_passes_by_lighting_type = split;
        for group in self.priority_groups.values_mut() {
            group.set_split_passes_by_lighting_type(split);
        }
    }

    /// Toggle the no-shadow map for this group and its priority groups
    pub fn set_split_no_shadow_passes(&mut self, split: bool) {
        self.split_no_shadow_passes = split;
        for group in self.priority_groups.values_mut() {
            group.set_split_no_shadow_passes(split);
        }
    }

    /// True if no priority group holds anything
    pub fn is_empty(&self) -> bool {
        self.priority_groups.values().all(RenderPriorityGroup::is_empty)
    }
}

impl<'a> IntoIterator for &'a RenderQueueGroup {
    type Item = (&'a u16, &'a RenderPriorityGroup);
    type IntoIter = btree_map::Iter<'a, u16, RenderPriorityGroup>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_background_and_overlay_skip_shadows() {
        assert!(!RenderQueueGroupId::BACKGROUND.shadows_enabled_by_default());
        assert!(!RenderQueueGroupId::SKIES_EARLY.shadows_enabled_by_default());
        assert!(!RenderQueueGroupId::SKIES_LATE.shadows_enabled_by_default());
        assert!(!RenderQueueGroupId::OVERLAY.shadows_enabled_by_default());
        assert!(RenderQueueGroupId::MAIN.shadows_enabled_by_default());
        assert!(RenderQueueGroupId::TRANSPARENT_LATE.shadows_enabled_by_default());
    }

    #[test]
    fn test_group_ids_order() {
        let mut ids = vec![
            RenderQueueGroupId::OVERLAY,
            RenderQueueGroupId::MAIN,
            RenderQueueGroupId::BACKGROUND,
            RenderQueueGroupId::TRANSPARENT_LATE,
        ];
        ids.sort();
        assert_eq!(ids[0], RenderQueueGroupId::BACKGROUND);
        assert_eq!(ids[3], RenderQueueGroupId::OVERLAY);
    }
}
