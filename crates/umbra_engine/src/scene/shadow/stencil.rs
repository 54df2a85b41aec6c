//! Stencil volume configuration
//!
//! Z-pass counts volume faces in front of the visible surface, z-fail
//! counts the ones behind it. Either way a pixel ends with a non-zero
//! stencil value when it lies inside a volume.

use crate::render::light::Light;
use crate::render::pass::{CompareFunction, CullingMode};
use crate::render::render_system::{
    Capabilities, RenderSystemCapabilities, StencilOperation, StencilParams,
};
use crate::scene::bounds::{PlaneBoundedVolume, AABB};

use super::volume::ShadowRenderableFlags;

/// Device dependent choices for drawing volumes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StencilVolumeMode {
    /// One draw with separate front and back operations
    pub two_sided: bool,
    /// Wrapping increment and decrement are available
    pub wrap: bool,
    /// No vertex programs, volumes are extruded on the CPU
    pub extrude_in_software: bool,
    /// Volumes stop at the extrusion distance instead of infinity
    pub finite_extrusion: bool,
}

impl StencilVolumeMode {
    /// Pick the mode for a device
    pub fn for_device(capabilities: &RenderSystemCapabilities, use_infinite_far_plane: bool) -> Self {
        let wrap = capabilities.supports(Capabilities::STENCIL_WRAP);
        Self {
            two_sided: wrap && capabilities.supports(Capabilities::TWO_SIDED_STENCIL),
            wrap,
            extrude_in_software: !capabilities.supports(Capabilities::VERTEX_PROGRAM),
            finite_extrusion: !use_infinite_far_plane
                || !capabilities.supports(Capabilities::INFINITE_FAR_PLANE),
        }
    }

    /// Extrusion flags shared by every caster
    pub fn extrusion_flags(&self) -> ShadowRenderableFlags {
        if self.extrude_in_software {
            ShadowRenderableFlags::EXTRUDE_IN_SOFTWARE
        } else if self.finite_extrusion {
            ShadowRenderableFlags::empty()
        } else {
            ShadowRenderableFlags::EXTRUDE_TO_INFINITY
        }
    }

    /// Flags for one caster
    ///
    /// The light cap is only drawn under z-fail and only when the camera can
    /// see it. The dark cap is dropped for directional lights extruded to
    /// infinity, where the sides already meet at a single point, and when the
    /// camera cannot see it.
    pub fn caster_flags(
        &self,
        light: &Light,
        z_fail: bool,
        light_cap_visible: bool,
        dark_cap_visible: bool,
    ) -> ShadowRenderableFlags {
        let mut flags = self.extrusion_flags();
        if z_fail && light_cap_visible {
            flags |= ShadowRenderableFlags::INCLUDE_LIGHT_CAP;
        }
        let infinite_directional =
            flags.contains(ShadowRenderableFlags::EXTRUDE_TO_INFINITY) && light.is_directional();
        if !infinite_directional && dark_cap_visible {
            flags |= ShadowRenderableFlags::INCLUDE_DARK_CAP;
        }
        flags
    }

    fn increment(&self) -> StencilOperation {
        if self.wrap {
            StencilOperation::IncrementWrap
        } else {
            StencilOperation::Increment
        }
    }

    fn decrement(&self) -> StencilOperation {
        if self.wrap {
            StencilOperation::DecrementWrap
        } else {
            StencilOperation::Decrement
        }
    }

    /// Culling and stencil state for one volume draw
    ///
    /// Front faces increment on depth pass and decrement on depth fail, back
    /// faces do the opposite. Without two-sided stencil every volume is drawn
    /// twice, `second_pass` selecting the second draw, and increments always
    /// land before decrements. With two-sided stencil the front face
    /// operations are given and the device inverts them for back faces.
    pub fn volume_state(&self, second_pass: bool, z_fail: bool) -> (CullingMode, StencilParams) {
        let mut params = StencilParams {
            function: CompareFunction::AlwaysPass,
            two_sided: self.two_sided,
            ..StencilParams::default()
        };
        let back_faces = !self.two_sided && (second_pass != z_fail);
        let culling = if back_faces {
            if z_fail {
                params.depth_fail_op = self.increment();
            } else {
                params.pass_op = self.decrement();
            }
            CullingMode::Anticlockwise
        } else {
            if z_fail {
                params.depth_fail_op = self.decrement();
            } else {
                params.pass_op = self.increment();
            }
            if self.two_sided {
                CullingMode::None
            } else {
                CullingMode::Clockwise
            }
        };
        (culling, params)
    }
}

/// True if any caster touches the volume between the light and the near plane
///
/// The answer applies to every caster of the light; mixing z-pass and z-fail
/// volumes for one light gives wrong counts.
pub fn requires_z_fail<'a>(
    near_clip_volume: &PlaneBoundedVolume,
    caster_bounds: impl IntoIterator<Item = &'a AABB>,
) -> bool {
    caster_bounds.into_iter().any(|bounds| near_clip_volume.intersects_aabb(bounds))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::foundation::math::Vec3;
    use crate::render::colour::Colour;
    use crate::scene::bounds::Plane;

    fn mode(two_sided: bool) -> StencilVolumeMode {
        StencilVolumeMode {
            two_sided,
            wrap: true,
            extrude_in_software: false,
            finite_extrusion: false,
        }
    }

    #[test]
    fn test_two_sided_requires_wrap() {
        let mut caps = RenderSystemCapabilities::full();
        assert!(StencilVolumeMode::for_device(&caps, true).two_sided);
        caps.flags.remove(Capabilities::STENCIL_WRAP);
        let m = StencilVolumeMode::for_device(&caps, true);
        assert!(!m.two_sided);
        assert!(!m.wrap);
    }

    #[test]
    fn test_extrusion_mode_follows_device() {
        let full = StencilVolumeMode::for_device(&RenderSystemCapabilities::full(), true);
        assert_eq!(full.extrusion_flags(), ShadowRenderableFlags::EXTRUDE_TO_INFINITY);
        let finite = StencilVolumeMode::for_device(&RenderSystemCapabilities::full(), false);
        assert!(finite.extrusion_flags().is_empty());
        let fixed = StencilVolumeMode::for_device(&RenderSystemCapabilities::fixed_function(), true);
        assert_eq!(fixed.extrusion_flags(), ShadowRenderableFlags::EXTRUDE_IN_SOFTWARE);
    }

    #[test]
    fn test_z_pass_two_pass_operations() {
        let m = mode(false);
        let (cull, first) = m.volume_state(false, false);
        assert_eq!(cull, CullingMode::Clockwise);
        assert_eq!(first.pass_op, StencilOperation::IncrementWrap);
        assert_eq!(first.depth_fail_op, StencilOperation::Keep);
        let (cull, second) = m.volume_state(true, false);
        assert_eq!(cull, CullingMode::Anticlockwise);
        assert_eq!(second.pass_op, StencilOperation::DecrementWrap);
    }

    #[test]
    fn test_z_fail_two_pass_operations() {
        let m = mode(false);
        let (cull, first) = m.volume_state(false, true);
        assert_eq!(cull, CullingMode::Anticlockwise);
        assert_eq!(first.depth_fail_op, StencilOperation::IncrementWrap);
        assert_eq!(first.pass_op, StencilOperation::Keep);
        let (cull, second) = m.volume_state(true, true);
        assert_eq!(cull, CullingMode::Clockwise);
        assert_eq!(second.depth_fail_op, StencilOperation::DecrementWrap);
    }

    #[test]
    fn test_two_pass_faces_match_two_sided_front_operations() {
        let two_pass = mode(false);
        let two_sided = mode(true);
        for z_fail in [false, true] {
            let (_, front) = two_sided.volume_state(false, z_fail);
            let front_pass = [false, true]
                .into_iter()
                .map(|second| two_pass.volume_state(second, z_fail))
                .find(|(cull, _)| *cull == CullingMode::Clockwise)
                .unwrap();
            assert_eq!(front_pass.1.pass_op, front.pass_op);
            assert_eq!(front_pass.1.depth_fail_op, front.depth_fail_op);
        }
    }

    #[test]
    fn test_two_sided_single_pass() {
        let m = mode(true);
        let (cull, zpass) = m.volume_state(false, false);
        assert_eq!(cull, CullingMode::None);
        assert!(zpass.two_sided);
        assert_eq!(zpass.pass_op, StencilOperation::IncrementWrap);
        let (_, zfail) = m.volume_state(false, true);
        assert_eq!(zfail.depth_fail_op, StencilOperation::DecrementWrap);
    }

    #[test]
    fn test_clamping_ops_without_wrap() {
        let m = StencilVolumeMode { wrap: false, ..mode(false) };
        let (_, first) = m.volume_state(false, false);
        assert_eq!(first.pass_op, StencilOperation::Increment);
        let (_, second) = m.volume_state(true, false);
        assert_eq!(second.pass_op, StencilOperation::Decrement);
    }

    #[test]
    fn test_dark_cap_skipped_only_for_infinite_directional() {
        let directional = Light::directional(-Vec3::y(), Colour::WHITE);
        let point = Light::point(Vec3::y(), Colour::WHITE, 10.0);
        let infinite = mode(true);
        assert!(!infinite
            .caster_flags(&directional, false, true, true)
            .contains(ShadowRenderableFlags::INCLUDE_DARK_CAP));
        assert!(infinite
            .caster_flags(&point, false, true, true)
            .contains(ShadowRenderableFlags::INCLUDE_DARK_CAP));
        let finite = StencilVolumeMode { finite_extrusion: true, ..mode(true) };
        assert!(finite
            .caster_flags(&directional, false, true, true)
            .contains(ShadowRenderableFlags::INCLUDE_DARK_CAP));
        assert!(!finite
            .caster_flags(&directional, false, true, false)
            .contains(ShadowRenderableFlags::INCLUDE_DARK_CAP));
    }

    #[test]
    fn test_light_cap_only_under_z_fail_when_visible() {
        let point = Light::point(Vec3::y(), Colour::WHITE, 10.0);
        let m = mode(true);
        let cap = ShadowRenderableFlags::INCLUDE_LIGHT_CAP;
        assert!(!m.caster_flags(&point, false, true, true).contains(cap));
        assert!(!m.caster_flags(&point, true, false, true).contains(cap));
        assert!(m.caster_flags(&point, true, true, true).contains(cap));
    }

    #[test]
    fn test_z_fail_is_any_caster() {
        let volume = PlaneBoundedVolume::new(vec![Plane::new(Vec3::x(), 0.0)]);
        let inside = AABB::from_center_extents(Vec3::new(5.0, 0.0, 0.0), Vec3::repeat(1.0));
        let outside = AABB::from_center_extents(Vec3::new(-5.0, 0.0, 0.0), Vec3::repeat(1.0));
        assert!(!requires_z_fail(&volume, [&outside]));
        assert!(requires_z_fail(&volume, [&outside, &inside]));
    }
}
