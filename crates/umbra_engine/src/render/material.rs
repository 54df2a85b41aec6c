//! Materials, techniques and illumination pass compilation
//!
//! A material holds techniques; the first technique with passes is used. Each
//! technique keeps its authored passes plus a compiled list of illumination
//! passes that additive stencil shadows render in three stages: ambient, once
//! per light, then decal.

use std::collections::HashMap;

use slotmap::SlotMap;

use super::colour::Colour;
use super::pass::{CompareFunction, LayerBlendOperation, Pass, PassHandle, PassStore, SceneBlend};
use super::{RenderError, RenderResult};

slotmap::new_key_type! {
    /// Handle to a material owned by a [`MaterialManager`]
    pub struct MaterialHandle;
}

/// Name of the material used when a renderable has none
pub const DEFAULT_MATERIAL_NAME: &str = "BaseWhite";

/// Stage a pass belongs to when lighting is split up
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IlluminationStage {
    /// Ambient and emissive contribution
    Ambient,
    /// Diffuse and specular, rendered once per light
    PerLight,
    /// Unlit texturing modulated over the lit result
    Decal,
}

/// One entry of a compiled illumination pass list
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IlluminationPass {
    /// Pass to render
    pub pass: PassHandle,
    /// Authored pass it came from
    pub original: PassHandle,
    /// Stage
    pub stage: IlluminationStage,
    /// True if `pass` was created by compilation and is owned by the technique
    pub derived: bool,
}

/// An ordered list of passes
#[derive(Debug, Clone, Default)]
pub struct Technique {
    passes: Vec<PassHandle>,
    illumination_passes: Vec<IlluminationPass>,
}

impl Technique {
    /// Authored passes in order
    pub fn passes(&self) -> &[PassHandle] {
        &self.passes
    }

    /// Compiled illumination passes
    pub fn illumination_passes(&self) -> &[IlluminationPass] {
        &self.illumination_passes
    }

    /// A technique is transparent when its first pass is
    pub fn is_transparent(&self, store: &PassStore) -> bool {
        self.passes
            .first()
            .and_then(|&handle| store.get(handle))
            .is_some_and(Pass::is_transparent)
    }

    fn retire_derived(&mut self, store: &mut PassStore) {
        for ip in self.illumination_passes.drain(..) {
            if ip.derived {
                store.retire(ip.pass);
            }
        }
    }

    /// Rebuild the illumination pass list
    fn compile_illumination_passes(&mut self, store: &mut PassStore) -> RenderResult<()> {
        self.retire_derived(store);

        let mut compiled = Vec::new();
        let mut stage = IlluminationStage::Ambient;
        let mut have_ambient = false;
        let mut i = 0;
        while i < self.passes.len() {
            let handle = self.passes[i];
            let pass = store.get(handle).ok_or(RenderError::PassNotFound)?.clone();
            match stage {
                IlluminationStage::Ambient => {
                    if pass.is_ambient_only() {
                        compiled.push(IlluminationPass { pass: handle, original: handle, stage, derived: false });
                        have_ambient = true;
                        i += 1;
                    } else {
                        if !pass.ambient.is_black()
                            || !pass.emissive.is_black()
                            || pass.alpha_reject.function != CompareFunction::AlwaysPass
                        {
                            let mut derived = pass.clone();
                            strip_for_lighting_split(&mut derived);
                            derived.diffuse = Colour::BLACK;
                            derived.specular = Colour::BLACK;
                            compiled.push(IlluminationPass {
                                pass: store.insert(derived),
                                original: handle,
                                stage,
                                derived: true,
                            });
                            have_ambient = true;
                        }
                        if !have_ambient {
                            let mut derived = Pass::new();
                            derived.set_index(pass.index());
                            derived.ambient = Colour::BLACK;
                            derived.diffuse = Colour::BLACK;
                            compiled.push(IlluminationPass {
                                pass: store.insert(derived),
                                original: handle,
                                stage,
                                derived: true,
                            });
                            have_ambient = true;
                        }
                        // Same pass is looked at again for its per-light part
                        stage = IlluminationStage::PerLight;
                    }
                }
                IlluminationStage::PerLight => {
                    if pass.iterate_per_light {
                        compiled.push(IlluminationPass { pass: handle, original: handle, stage, derived: false });
                        i += 1;
                    } else {
                        if pass.lighting_enabled && (!pass.diffuse.is_black() || !pass.specular.is_black()) {
                            let mut derived = pass.clone();
                            strip_for_lighting_split(&mut derived);
                            derived.ambient = Colour::BLACK;
                            derived.emissive = Colour::BLACK;
                            derived.scene_blend = SceneBlend::ADD;
                            compiled.push(IlluminationPass {
                                pass: store.insert(derived),
                                original: handle,
                                stage,
                                derived: true,
                            });
                        }
                        stage = IlluminationStage::Decal;
                    }
                }
                IlluminationStage::Decal => {
                    if !pass.texture_units.is_empty() {
                        if pass.lighting_enabled {
                            let mut derived = pass.clone();
                            derived.ambient = Colour::BLACK;
                            derived.diffuse = Colour::BLACK;
                            derived.specular = Colour::BLACK;
                            derived.emissive = Colour::BLACK;
                            derived.lighting_enabled = false;
                            derived.scene_blend = SceneBlend::MODULATE;
                            compiled.push(IlluminationPass {
                                pass: store.insert(derived),
                                original: handle,
                                stage,
                                derived: true,
                            });
                        } else {
                            compiled.push(IlluminationPass { pass: handle, original: handle, stage, derived: false });
                        }
                    }
                    i += 1;
                }
            }
        }
        self.illumination_passes = compiled;
        Ok(())
    }
}

/// Texture and fragment program handling shared by the ambient and per-light copies
fn strip_for_lighting_split(pass: &mut Pass) {
    if pass.alpha_reject.function == CompareFunction::AlwaysPass {
        pass.texture_units.clear();
    } else {
        // Keep the texture alpha for rejection but not its colour
        for unit in &mut pass.texture_units {
            unit.colour_operation = LayerBlendOperation::PassThrough;
        }
    }
    pass.fragment_program = None;
}

/// A named set of techniques
#[derive(Debug, Clone)]
pub struct Material {
    name: String,
    receive_shadows: bool,
    techniques: Vec<Technique>,
}

impl Material {
    /// Material name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether objects using this material show shadows cast on them
    pub const fn receive_shadows(&self) -> bool {
        self.receive_shadows
    }

    /// All techniques
    pub fn techniques(&self) -> &[Technique] {
        &self.techniques
    }

    /// The technique used for rendering
    pub fn best_technique(&self) -> Option<&Technique> {
        self.techniques
            .iter()
            .find(|t| !t.passes.is_empty())
            .or_else(|| self.techniques.first())
    }
}

/// Owner of every material and the pass arena they share
#[derive(Debug)]
pub struct MaterialManager {
    passes: PassStore,
    materials: SlotMap<MaterialHandle, Material>,
    by_name: HashMap<String, MaterialHandle>,
    default_material: MaterialHandle,
}

impl Default for MaterialManager {
    fn default() -> Self {
        Self::new()
    }
}

impl MaterialManager {
    /// Create a manager holding only the default material
    pub fn new() -> Self {
        let mut manager = Self {
            passes: PassStore::new(),
            materials: SlotMap::with_key(),
            by_name: HashMap::new(),
            default_material: MaterialHandle::default(),
        };
        let default = manager.create_material(DEFAULT_MATERIAL_NAME);
        // A fresh material always has technique 0
        let _ = manager.create_pass(default, 0, Pass::new());
        manager.default_material = default;
        manager
    }

    /// Handle of the default material
    pub const fn default_material(&self) -> MaterialHandle {
        self.default_material
    }

    /// Create a material with one empty technique
    ///
    /// Reusing a name replaces the name lookup but keeps the old material alive.
    pub fn create_material(&mut self, name: impl Into<String>) -> MaterialHandle {
        let name = name.into();
        let handle = self.materials.insert(Material {
            name: name.clone(),
            receive_shadows: true,
            techniques: vec![Technique::default()],
        });
        log::debug!("Created material '{}'", name);
        self.by_name.insert(name, handle);
        handle
    }

    /// Look a material up by name
    pub fn material_by_name(&self, name: &str) -> Option<MaterialHandle> {
        self.by_name.get(name).copied()
    }

    /// Access a material
    pub fn material(&self, handle: MaterialHandle) -> RenderResult<&Material> {
        self.materials.get(handle).ok_or(RenderError::MaterialNotFound)
    }

    fn material_mut(&mut self, handle: MaterialHandle) -> RenderResult<&mut Material> {
        self.materials.get_mut(handle).ok_or(RenderError::MaterialNotFound)
    }

    /// Material and technique to render with; `None` picks the default material
    pub fn resolve(&self, handle: Option<MaterialHandle>) -> RenderResult<(&Material, &Technique)> {
        let material = self.material(handle.unwrap_or(self.default_material))?;
        let technique = material
            .best_technique()
            .ok_or_else(|| RenderError::NoTechnique(material.name.clone()))?;
        Ok((material, technique))
    }

    /// Append a technique, returning its index
    pub fn add_technique(&mut self, material: MaterialHandle) -> RenderResult<usize> {
        let material = self.material_mut(material)?;
        material.techniques.push(Technique::default());
        Ok(material.techniques.len() - 1)
    }

    /// Append a pass to a technique and recompile its illumination passes
    pub fn create_pass(
        &mut self,
        material: MaterialHandle,
        technique: usize,
        mut pass: Pass,
    ) -> RenderResult<PassHandle> {
        let Self { passes, materials, .. } = self;
        let material = materials.get_mut(material).ok_or(RenderError::MaterialNotFound)?;
        let technique = material
            .techniques
            .get_mut(technique)
            .ok_or_else(|| RenderError::NoTechnique(material.name.clone()))?;
        let index = u16::try_from(technique.passes.len()).unwrap_or(u16::MAX);
        pass.set_index(index);
        let handle = passes.insert(pass);
        technique.passes.push(handle);
        technique.compile_illumination_passes(passes)?;
        Ok(handle)
    }

    /// Remove a pass from a technique; it is freed on the next queue sweep
    pub fn remove_pass(&mut self, material: MaterialHandle, handle: PassHandle) -> RenderResult<()> {
        let Self { passes, materials, .. } = self;
        let material = materials.get_mut(material).ok_or(RenderError::MaterialNotFound)?;
        let technique = material
            .techniques
            .iter_mut()
            .find(|t| t.passes.contains(&handle))
            .ok_or(RenderError::PassNotFound)?;
        technique.passes.retain(|&p| p != handle);
        passes.retire(handle);
        for (index, &remaining) in technique.passes.iter().enumerate() {
            let index = u16::try_from(index).unwrap_or(u16::MAX);
            if passes.get(remaining).map(Pass::index) != Some(index) {
                if let Some(pass) = passes.get_mut(remaining) {
                    pass.set_index(index);
                }
            }
        }
        technique.compile_illumination_passes(passes)
    }

    /// Edit a pass and recompile the techniques of its material
    ///
    /// The pass is rehashed on the next queue sweep.
    pub fn modify_pass(
        &mut self,
        material: MaterialHandle,
        handle: PassHandle,
        edit: impl FnOnce(&mut Pass),
    ) -> RenderResult<()> {
        edit(self.passes.get_mut(handle).ok_or(RenderError::PassNotFound)?);
        self.compile(material)
    }

    /// Recompile the illumination passes of every technique of a material
    pub fn compile(&mut self, material: MaterialHandle) -> RenderResult<()> {
        let Self { passes, materials, .. } = self;
        let material = materials.get_mut(material).ok_or(RenderError::MaterialNotFound)?;
        for technique in &mut material.techniques {
            technique.compile_illumination_passes(passes)?;
        }
        Ok(())
    }

    /// Set whether objects using a material receive shadows
    pub fn set_receive_shadows(&mut self, material: MaterialHandle, receive: bool) -> RenderResult<()> {
        self.material_mut(material)?.receive_shadows = receive;
        Ok(())
    }

    /// Destroy a material; its passes are freed on the next queue sweep
    pub fn destroy_material(&mut self, handle: MaterialHandle) -> RenderResult<()> {
        if handle == self.default_material {
            return Err(RenderError::InvalidOperation("the default material cannot be destroyed".to_string()));
        }
        let mut material = self.materials.remove(handle).ok_or(RenderError::MaterialNotFound)?;
        for technique in &mut material.techniques {
            technique.retire_derived(&mut self.passes);
            for &pass in &technique.passes {
                self.passes.retire(pass);
            }
        }
        if self.by_name.get(&material.name) == Some(&handle) {
            self.by_name.remove(&material.name);
        }
        log::debug!("Destroyed material '{}'", material.name);
        Ok(())
    }

    /// Shared pass arena
    pub const fn passes(&self) -> &PassStore {
        &self.passes
    }

    /// Mutable pass arena, for the queue sweep
    pub fn passes_mut(&mut self) -> &mut PassStore {
        &mut self.passes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::pass::TextureUnitState;

    fn stages(manager: &MaterialManager, material: MaterialHandle) -> Vec<(IlluminationStage, bool)> {
        let (_, technique) = manager.resolve(Some(material)).unwrap();
        technique
            .illumination_passes()
            .iter()
            .map(|ip| (ip.stage, ip.derived))
            .collect()
    }

    #[test]
    fn test_default_material_resolves() {
        let manager = MaterialManager::new();
        let (material, technique) = manager.resolve(None).unwrap();
        assert_eq!(material.name(), DEFAULT_MATERIAL_NAME);
        assert_eq!(technique.passes().len(), 1);
        assert!(!technique.is_transparent(manager.passes()));
    }

    #[test]
    fn test_lit_textured_pass_splits_into_three_stages() {
        let mut manager = MaterialManager::new();
        let material = manager.create_material("Rock");
        let mut pass = Pass::new();
        pass.ambient = Colour::rgb(0.5, 0.5, 0.5);
        pass.add_texture_unit(TextureUnitState::named("rock.png"));
        manager.create_pass(material, 0, pass).unwrap();

        assert_eq!(
            stages(&manager, material),
            vec![
                (IlluminationStage::Ambient, true),
                (IlluminationStage::PerLight, true),
                (IlluminationStage::Decal, true),
            ]
        );

        let (_, technique) = manager.resolve(Some(material)).unwrap();
        let ips = technique.illumination_passes();
        let store = manager.passes();
        let ambient = store.get(ips[0].pass).unwrap();
        assert!(ambient.diffuse.is_black());
        assert!(ambient.texture_units.is_empty());
        let per_light = store.get(ips[1].pass).unwrap();
        assert_eq!(per_light.scene_blend, SceneBlend::ADD);
        assert!(per_light.ambient.is_black());
        let decal = store.get(ips[2].pass).unwrap();
        assert!(!decal.lighting_enabled);
        assert_eq!(decal.scene_blend, SceneBlend::MODULATE);
        assert_eq!(decal.texture_units.len(), 1);
    }

    #[test]
    fn test_untextured_pass_has_no_decal_stage() {
        let mut manager = MaterialManager::new();
        let material = manager.create_material("Plain");
        manager.create_pass(material, 0, Pass::new()).unwrap();
        assert_eq!(
            stages(&manager, material),
            vec![(IlluminationStage::Ambient, true), (IlluminationStage::PerLight, true)]
        );
    }

    #[test]
    fn test_unlit_pass_used_as_is_for_ambient() {
        let mut manager = MaterialManager::new();
        let material = manager.create_material("Unlit");
        let mut pass = Pass::new();
        pass.lighting_enabled = false;
        let handle = manager.create_pass(material, 0, pass).unwrap();
        let (_, technique) = manager.resolve(Some(material)).unwrap();
        assert_eq!(technique.illumination_passes().len(), 1);
        assert_eq!(technique.illumination_passes()[0].pass, handle);
        assert!(!technique.illumination_passes()[0].derived);
    }

    #[test]
    fn test_black_ambient_gets_synthesised_ambient_pass() {
        let mut manager = MaterialManager::new();
        let material = manager.create_material("NoAmbient");
        let mut pass = Pass::new();
        pass.ambient = Colour::BLACK;
        pass.iterate_per_light = true;
        let handle = manager.create_pass(material, 0, pass).unwrap();
        let (_, technique) = manager.resolve(Some(material)).unwrap();
        let ips = technique.illumination_passes();
        assert_eq!(ips.len(), 2);
        assert!(ips[0].derived);
        assert_eq!(ips[1].pass, handle);
        assert_eq!(ips[1].stage, IlluminationStage::PerLight);
    }

    #[test]
    fn test_recompile_retires_previous_derived_passes() {
        let mut manager = MaterialManager::new();
        let material = manager.create_material("Recompiled");
        let handle = manager.create_pass(material, 0, Pass::new()).unwrap();
        let first: Vec<_> = manager.resolve(Some(material)).unwrap().1.illumination_passes().to_vec();
        manager
            .modify_pass(material, handle, |pass| pass.diffuse = Colour::rgb(1.0, 0.0, 0.0))
            .unwrap();
        for ip in first.iter().filter(|ip| ip.derived) {
            assert!(manager.passes().is_retired(ip.pass));
        }
        assert!(manager.passes().is_pending(handle));
    }

    #[test]
    fn test_destroy_material_retires_passes() {
        let mut manager = MaterialManager::new();
        let material = manager.create_material("Doomed");
        let handle = manager.create_pass(material, 0, Pass::new()).unwrap();
        manager.destroy_material(material).unwrap();
        assert!(manager.passes().is_retired(handle));
        assert!(manager.material_by_name("Doomed").is_none());
        assert!(matches!(manager.material(material), Err(RenderError::MaterialNotFound)));
        assert!(manager.destroy_material(manager.default_material()).is_err());
    }
}
