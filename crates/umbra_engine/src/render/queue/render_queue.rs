//! Top level render queue

use std::collections::btree_map;
use std::collections::BTreeMap;

use crate::render::camera::Camera;
use crate::render::material::MaterialManager;
use crate::render::renderable::RenderableRef;
use crate::render::RenderResult;

use super::queue_group::{RenderQueueGroup, RenderQueueGroupId};

/// Priority used when none is given
pub const DEFAULT_PRIORITY: u16 = 100;

/// Queue groups keyed by id, iterated in ascending id order
pub struct RenderQueue {
    groups: BTreeMap<RenderQueueGroupId, RenderQueueGroup>,
    default_group: RenderQueueGroupId,
    default_priority: u16,
    split_passes_by_lighting_type: bool,
    split_no_shadow_passes: bool,
}

impl Default for RenderQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl RenderQueue {
    /// Create a queue holding the main group
    pub fn new() -> Self {
        let mut queue = Self {
            groups: BTreeMap::new(),
            default_group: RenderQueueGroupId::MAIN,
            default_priority: DEFAULT_PRIORITY,
            split_passes_by_lighting_type: false,
            split_no_shadow_passes: false,
        };
        queue.queue_group_mut(RenderQueueGroupId::MAIN);
        queue
    }

    /// Queue a renderable into a group at a priority
    ///
    /// The renderable's material is resolved here; no material means the
    /// default material, an unknown handle is an error.
    pub fn add_renderable(
        &mut self,
        renderable: &RenderableRef,
        group: RenderQueueGroupId,
        priority: u16,
        materials: &MaterialManager,
    ) -> RenderResult<()> {
        let (material, technique) = materials.resolve(renderable.material())?;
        self.queue_group_mut(group)
            .add_renderable(renderable, priority, material, technique, materials.passes())
    }

    /// Queue a renderable into the default group at the default priority
    pub fn add_renderable_default(
        &mut self,
        renderable: &RenderableRef,
        materials: &MaterialManager,
    ) -> RenderResult<()> {
        self.add_renderable(renderable, self.default_group, self.default_priority, materials)
    }

    /// Group for an id, created with its default shadow setting if missing
    pub fn queue_group_mut(&mut self, id: RenderQueueGroupId) -> &mut RenderQueueGroup {
        let (split_lighting, split_no_shadow) = (self.split_passes_by_lighting_type, self.split_no_shadow_passes);
        self.groups.entry(id).or_insert_with(|| {
            RenderQueueGroup::new(id.shadows_enabled_by_default(), split_lighting, split_no_shadow)
        })
    }

    /// Group for an id, if it exists
    pub fn queue_group(&self, id: RenderQueueGroupId) -> Option<&RenderQueueGroup> {
        self.groups.get(&id)
    }

    /// Groups in render order
    pub fn iter(&self) -> btree_map::Iter<'_, RenderQueueGroupId, RenderQueueGroup> {
        self.groups.iter()
    }

    /// Sort every group's transparent lists for a camera
    pub fn sort(&mut self, camera: &Camera) {
        for group in self.groups.values_mut() {
            group.sort(camera);
        }
    }

    /// Empty the queue and run the pass sweep
    ///
    /// Map entries for dirty or retired passes are removed first, then the
    /// pass store recomputes hashes and frees retired passes.
    pub fn clear(&mut self, materials: &mut MaterialManager) {
        for group in self.groups.values_mut() {
            group.clear(materials.passes());
        }
        if materials.passes().has_pending() {
            log::trace!("Sweeping pending pass updates");
            materials.passes_mut().process_pending_updates();
        }
    }

    /// Group used by [`Self::add_renderable_default`]
    pub const fn default_queue_group(&self) -> RenderQueueGroupId {
        self.default_group
    }

    /// Change the default group
    pub fn set_default_queue_group(&mut self, id: RenderQueueGroupId) {
        self.default_group = id;
    }

    /// Priority used by [`Self::add_renderable_default`]
    pub const fn default_priority(&self) -> u16 {
        self.default_priority
    }

    /// Change the default priority
    pub fn set_default_priority(&mut self, priority: u16) {
        self.default_priority = priority;
    }

    /// Toggle lighting-split rendering on every group
    pub fn set_split_passes_by_lighting_type(&mut self, split: bool) {
        self.split_passes_by_lighting_type = split;
        for group in self.groups.values_mut() {
            group.set_split_passes_by_lighting_type(split);
        }
    }

    /// Toggle the no-shadow map on every group
    pub fn set_split_no_shadow_passes(&mut self, split: bool) {
        self.split_no_shadow_passes = split;
        for group in self.groups.values_mut() {
            group.set_split_no_shadow_passes(split);
        }
    }

    /// True if nothing is queued
    pub fn is_empty(&self) -> bool {
        self.groups.values().all(RenderQueueGroup::is_empty)
    }
}

impl<'a> IntoIterator for &'a RenderQueue {
    type Item = (&'a RenderQueueGroupId, &'a RenderQueueGroup);
    type IntoIter = btree_map::Iter<'a, RenderQueueGroupId, RenderQueueGroup>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}
