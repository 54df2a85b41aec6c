//! Renderables at one priority level, bucketed by pass
//!
//! Opaque renderables go into solid maps keyed by [`PassKey`] so that draws
//! sharing a pass are issued together and passes come out in hash order.
//! Transparent renderables go into one list that is sorted back to front.

use std::collections::BTreeMap;

use crate::render::camera::Camera;
use crate::render::material::{IlluminationStage, Material, Technique};
use crate::render::pass::{PassHandle, PassStore};
use crate::render::renderable::{renderable_address, RenderableRef};
use crate::render::{RenderError, RenderResult};

/// Ordering key of a solid map entry: pass hash first, then pass identity
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PassKey {
    /// Pass hash at the time the entry was created
    pub hash: u32,
    /// Pass identity
    pub pass: PassHandle,
}

/// Renderables drawn with one pass
pub type RenderableList = Vec<RenderableRef>;

/// Pass-keyed renderable buckets
pub type SolidPassMap = BTreeMap<PassKey, RenderableList>;

/// A transparent renderable paired with one of its passes
#[derive(Clone)]
pub struct RenderablePass {
    /// Renderable
    pub renderable: RenderableRef,
    /// Pass to draw it with
    pub pass: PassHandle,
    pass_hash: u32,
    depth: f32,
}

impl RenderablePass {
    /// Hash of the pass when the entry was queued
    pub const fn pass_hash(&self) -> u32 {
        self.pass_hash
    }

    /// Squared view depth computed by the last sort
    pub const fn depth(&self) -> f32 {
        self.depth
    }
}

impl std::fmt::Debug for RenderablePass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderablePass")
            .field("renderable", &renderable_address(&self.renderable))
            .field("pass", &self.pass)
            .field("depth", &self.depth)
            .finish()
    }
}

/// Renderables queued at one priority
#[derive(Default)]
pub struct RenderPriorityGroup {
    solid_passes: SolidPassMap,
    solid_passes_diffuse_specular: SolidPassMap,
    solid_passes_decal: SolidPassMap,
    solid_passes_no_shadow: SolidPassMap,
    transparent_passes: Vec<RenderablePass>,
    split_passes_by_lighting_type: bool,
    split_no_shadow_passes: bool,
}

impl RenderPriorityGroup {
    /// Create an empty group
    pub fn new(split_passes_by_lighting_type: bool, split_no_shadow_passes: bool) -> Self {
        Self {
            split_passes_by_lighting_type,
            split_no_shadow_passes,
            ..Self::default()
        }
    }

    /// Queue a renderable with the technique it resolved to
    ///
    /// Transparent techniques go to the transparent list. Otherwise, when the
    /// owning group has shadows enabled, materials that do not receive
    /// shadows go to the no-shadow map, and lighting-split rendering places
    /// each illumination pass in the map for its stage. Everything else goes
    /// to the main solid map once per pass.
    pub fn add_renderable(
        &mut self,
        renderable: &RenderableRef,
        material: &Material,
        technique: &Technique,
        passes: &PassStore,
        shadows_enabled: bool,
    ) -> RenderResult<()> {
        if technique.is_transparent(passes) {
            return self.add_transparent(renderable, technique, passes);
        }
        if shadows_enabled && self.split_no_shadow_passes && !material.receive_shadows() {
            return Self::add_solid(&mut self.solid_passes_no_shadow, renderable, technique.passes(), passes);
        }
        if shadows_enabled && self.split_passes_by_lighting_type {
            for ip in technique.illumination_passes() {
                let map = match ip.stage {
                    IlluminationStage::Ambient => &mut self.solid_passes,
                    IlluminationStage::PerLight => &mut self.solid_passes_diffuse_specular,
                    IlluminationStage::Decal => &mut self.solid_passes_decal,
                };
                Self::add_solid(map, renderable, &[ip.pass], passes)?;
            }
            return Ok(());
        }
        Self::add_solid(&mut self.solid_passes, renderable, technique.passes(), passes)
    }

    fn add_solid(
        map: &mut SolidPassMap,
        renderable: &RenderableRef,
        handles: &[PassHandle],
        passes: &PassStore,
    ) -> RenderResult<()> {
        for &pass in handles {
            let hash = passes.get(pass).ok_or(RenderError::PassNotFound)?.hash();
            map.entry(PassKey { hash, pass })
                .or_default()
                .push(RenderableRef::clone(renderable));
        }
        Ok(())
    }

    fn add_transparent(
        &mut self,
        renderable: &RenderableRef,
        technique: &Technique,
        passes: &PassStore,
    ) -> RenderResult<()> {
        for &pass in technique.passes() {
            let pass_hash = passes.get(pass).ok_or(RenderError::PassNotFound)?.hash();
            self.transparent_passes.push(RenderablePass {
                renderable: RenderableRef::clone(renderable),
                pass,
                pass_hash,
                depth: 0.0,
            });
        }
        Ok(())
    }

    /// Sort the transparent list back to front
    ///
    /// Farther entries come first. Entries of the same renderable keep
    /// ascending pass hash order; equal depths fall back to renderable
    /// address so the order is deterministic.
    pub fn sort(&mut self, camera: &Camera) {
        for entry in &mut self.transparent_passes {
            entry.depth = entry.renderable.squared_view_depth(camera);
        }
        self.transparent_passes.sort_by(|a, b| {
            b.depth
                .total_cmp(&a.depth)
                .then_with(|| renderable_address(&a.renderable).cmp(&renderable_address(&b.renderable)))
                .then_with(|| a.pass_hash.cmp(&b.pass_hash))
        });
    }

    /// Empty every list for the next frame
    ///
    /// Map keys survive so their ordering is reused, except keys whose pass is
    /// dirty or retired; those are dropped before the pass store sweeps.
    pub fn clear(&mut self, passes: &PassStore) {
        for map in [
            &mut self.solid_passes,
            &mut self.solid_passes_diffuse_specular,
            &mut self.solid_passes_decal,
            &mut self.solid_passes_no_shadow,
        ] {
            map.retain(|key, _| !passes.is_pending(key.pass));
            for list in map.values_mut() {
                list.clear();
            }
        }
        self.transparent_passes.clear();
    }

    /// Main solid map; holds ambient passes when splitting by lighting type
    pub const fn solid_passes(&self) -> &SolidPassMap {
        &self.solid_passes
    }

    /// Per-light diffuse and specular passes
    pub const fn solid_passes_diffuse_specular(&self) -> &SolidPassMap {
        &self.solid_passes_diffuse_specular
    }

    /// Decal passes
    pub const fn solid_passes_decal(&self) -> &SolidPassMap {
        &self.solid_passes_decal
    }

    /// Passes of materials that do not receive shadows
    pub const fn solid_passes_no_shadow(&self) -> &SolidPassMap {
        &self.solid_passes_no_shadow
    }

    /// Transparent entries in their current order
    pub fn transparent_passes(&self) -> &[RenderablePass] {
        &self.transparent_passes
    }

    /// Toggle lighting-split rendering for renderables added from now on
    pub fn set_split_passes_by_lighting_type(&mut self, split: bool) {
        self.split_passes_by_lighting_type = split;
    }

    /// Toggle the no-shadow map for renderables added from now on
    pub fn set_split_no_shadow_passes(&mut self, split: bool) {
        self.split_no_shadow_passes = split;
    }

    /// True if nothing is queued
    pub fn is_empty(&self) -> bool {
        self.transparent_passes.is_empty()
            && [
                &self.solid_passes,
                &self.solid_passes_diffuse_specular,
                &self.solid_passes_decal,
                &self.solid_passes_no_shadow,
            ]
            .iter()
            .all(|map| map.values().all(Vec::is_empty))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::foundation::math::{Mat4, Vec3};
    use crate::render::colour::Colour;
    use crate::render::light::LightList;
    use crate::render::material::{MaterialHandle, MaterialManager};
    use crate::render::pass::{Pass, SceneBlend, TextureUnitState};
    use crate::render::renderable::{BufferId, RenderOperation, Renderable};
    use std::rc::Rc;

    struct Quad {
        material: MaterialHandle,
        position: Vec3,
    }

    impl Renderable for Quad {
        fn material(&self) -> Option<MaterialHandle> {
            Some(self.material)
        }
        fn render_operation(&self) -> RenderOperation {
            RenderOperation::indexed_triangles(BufferId(1), 4, BufferId(2), 0, 6)
        }
        fn world_transforms(&self, out: &mut Vec<Mat4>) {
            out.push(Mat4::new_translation(&self.position));
        }
        fn squared_view_depth(&self, camera: &Camera) -> f32 {
            (self.position - camera.position()).norm_squared()
        }
        fn lights(&self) -> LightList {
            Vec::new()
        }
    }

    fn quad(material: MaterialHandle, z: f32) -> RenderableRef {
        Rc::new(Quad { material, position: Vec3::new(0.0, 0.0, z) })
    }

    fn add(group: &mut RenderPriorityGroup, manager: &MaterialManager, r: &RenderableRef, shadows: bool) {
        let (material, technique) = manager.resolve(r.material()).unwrap();
        group
            .add_renderable(r, material, technique, manager.passes(), shadows)
            .unwrap();
    }

    fn transparent_material(manager: &mut MaterialManager, name: &str, passes: usize) -> MaterialHandle {
        let material = manager.create_material(name);
        for i in 0..passes {
            let mut pass = Pass::new();
            pass.scene_blend = SceneBlend::ALPHA;
            pass.add_texture_unit(TextureUnitState::named(format!("layer{i}")));
            manager.create_pass(material, 0, pass).unwrap();
        }
        material
    }

    #[test]
    fn test_transparent_never_enters_solid_maps() {
        let mut manager = MaterialManager::new();
        let glass = transparent_material(&mut manager, "Glass", 1);
        let mut group = RenderPriorityGroup::new(true, true);
        add(&mut group, &manager, &quad(glass, -5.0), true);
        assert!(group.solid_passes().is_empty());
        assert!(group.solid_passes_diffuse_specular().is_empty());
        assert!(group.solid_passes_no_shadow().is_empty());
        assert_eq!(group.transparent_passes().len(), 1);
    }

    #[test]
    fn test_solid_map_iterates_in_hash_order() {
        let mut manager = MaterialManager::new();
        let mut materials = Vec::new();
        for name in ["a", "b", "c", "d"] {
            let material = manager.create_material(name);
            let mut pass = Pass::new();
            pass.add_texture_unit(TextureUnitState::named(format!("{name}.png")));
            manager.create_pass(material, 0, pass).unwrap();
            materials.push(material);
        }
        let mut group = RenderPriorityGroup::new(false, false);
        for material in materials {
            add(&mut group, &manager, &quad(material, 0.0), false);
        }
        let hashes: Vec<u32> = group.solid_passes().keys().map(|k| k.hash).collect();
        let mut sorted = hashes.clone();
        sorted.sort_unstable();
        assert_eq!(hashes, sorted);
        assert_eq!(hashes.len(), 4);
    }

    #[test]
    fn test_shared_pass_buckets_renderables_together() {
        let manager = MaterialManager::new();
        let default = manager.default_material();
        let mut group = RenderPriorityGroup::new(false, false);
        let added: Vec<RenderableRef> = [0.0, -9.0, 1.0, -3.0].into_iter().map(|z| quad(default, z)).collect();
        for r in &added {
            add(&mut group, &manager, r, false);
        }
        let expected: Vec<usize> = added.iter().map(renderable_address).collect();
        let listed = |group: &RenderPriorityGroup| -> Vec<usize> {
            group.solid_passes().values().next().unwrap().iter().map(renderable_address).collect()
        };
        assert_eq!(group.solid_passes().len(), 1);
        assert_eq!(listed(&group), expected);

        group.sort(&Camera::perspective(Vec3::zeros(), 60.0, 1.0, 0.1, 100.0));
        assert_eq!(listed(&group), expected);
    }

    #[test]
    fn test_transparent_sort_back_to_front_with_hash_tie_break() {
        let mut manager = MaterialManager::new();
        let glass = transparent_material(&mut manager, "Layered", 2);
        let mut group = RenderPriorityGroup::new(false, false);
        let near = quad(glass, -2.0);
        let far = quad(glass, -20.0);
        add(&mut group, &manager, &near, false);
        add(&mut group, &manager, &far, false);
        let camera = Camera::perspective(Vec3::zeros(), 60.0, 1.0, 0.1, 100.0);
        group.sort(&camera);

        let entries = group.transparent_passes();
        assert_eq!(entries.len(), 4);
        for pair in entries.windows(2) {
            assert!(pair[0].depth() >= pair[1].depth());
            if renderable_address(&pair[0].renderable) == renderable_address(&pair[1].renderable) {
                assert!(pair[0].pass_hash() <= pair[1].pass_hash());
            }
        }
        assert_eq!(renderable_address(&entries[0].renderable), renderable_address(&far));
    }

    #[test]
    fn test_transparent_sort_is_total_with_nan_depth() {
        let mut manager = MaterialManager::new();
        let glass = transparent_material(&mut manager, "Glass", 1);
        let camera = Camera::perspective(Vec3::zeros(), 60.0, 1.0, 0.1, 100.0);
        let quads = [quad(glass, -2.0), quad(glass, f32::NAN), quad(glass, -20.0), quad(glass, -7.0)];

        let sorted_addresses = |order: [usize; 4]| -> Vec<usize> {
            let mut group = RenderPriorityGroup::new(false, false);
            for i in order {
                add(&mut group, &manager, &quads[i], false);
            }
            group.sort(&camera);
            group.transparent_passes().iter().map(|e| renderable_address(&e.renderable)).collect()
        };
        let forward = sorted_addresses([0, 1, 2, 3]);
        assert_eq!(forward, sorted_addresses([3, 2, 1, 0]));
        assert_eq!(forward, sorted_addresses([2, 0, 3, 1]));

        let finite: Vec<usize> = [2, 3, 0].iter().map(|&i| renderable_address(&quads[i])).collect();
        let listed_finite: Vec<usize> = forward
            .into_iter()
            .filter(|&a| a != renderable_address(&quads[1]))
            .collect();
        assert_eq!(listed_finite, finite);
    }

    #[test]
    fn test_lighting_split_routes_stages_to_maps() {
        let mut manager = MaterialManager::new();
        let material = manager.create_material("Split");
        let mut pass = Pass::new();
        pass.add_texture_unit(TextureUnitState::named("detail.png"));
        manager.create_pass(material, 0, pass).unwrap();

        let mut group = RenderPriorityGroup::new(true, false);
        add(&mut group, &manager, &quad(material, 0.0), true);
        assert_eq!(group.solid_passes().len(), 1);
        assert_eq!(group.solid_passes_diffuse_specular().len(), 1);
        assert_eq!(group.solid_passes_decal().len(), 1);

        let mut unshadowed = RenderPriorityGroup::new(true, false);
        add(&mut unshadowed, &manager, &quad(material, 0.0), false);
        assert_eq!(unshadowed.solid_passes().len(), 1);
        assert!(unshadowed.solid_passes_diffuse_specular().is_empty());
    }

    #[test]
    fn test_non_receiver_goes_to_no_shadow_map() {
        let mut manager = MaterialManager::new();
        let material = manager.create_material("Emissive");
        manager.create_pass(material, 0, Pass::new()).unwrap();
        manager.set_receive_shadows(material, false).unwrap();
        let mut group = RenderPriorityGroup::new(true, true);
        add(&mut group, &manager, &quad(material, 0.0), true);
        assert_eq!(group.solid_passes_no_shadow().len(), 1);
        assert!(group.solid_passes().is_empty());
    }

    #[test]
    fn test_clear_keeps_keys_and_drops_pending_passes() {
        let mut manager = MaterialManager::new();
        let kept = manager.create_material("Kept");
        manager.create_pass(kept, 0, Pass::new()).unwrap();
        let edited = manager.create_material("Edited");
        let edited_pass = manager.create_pass(edited, 0, Pass::new()).unwrap();

        let mut group = RenderPriorityGroup::new(false, false);
        add(&mut group, &manager, &quad(kept, 0.0), false);
        add(&mut group, &manager, &quad(edited, 0.0), false);
        assert_eq!(group.solid_passes().len(), 2);

        manager
            .modify_pass(edited, edited_pass, |pass| pass.diffuse = Colour::rgb(0.5, 0.0, 0.0))
            .unwrap();
        group.clear(manager.passes());
        assert_eq!(group.solid_passes().len(), 1);
        assert!(group.solid_passes().keys().all(|k| k.pass != edited_pass));
        assert!(group.is_empty());

        manager.passes_mut().process_pending_updates();
        add(&mut group, &manager, &quad(edited, 0.0), false);
        assert_eq!(group.solid_passes().len(), 2);
    }
}
