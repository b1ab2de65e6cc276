use glam::{Mat4, Vec3};

#[derive(Clone, Copy, PartialEq, Debug)]
pub enum LightKind {
    Directional,
    Spot {
        /// Half-angle of the inner cone, radians.
        inner_cone: f32,
        /// Half-angle of the outer cone, radians.
        outer_cone: f32,
    },
    Point,
}

/// Shadow request for a light.
#[derive(Clone, Copy, PartialEq, Debug)]
pub struct ShadowSettings {
    /// Edge length of the light's square shadow tile in texels.
    pub resolution: u32,
    /// Half extent of the orthographic volume for directional lights.
    pub extent: f32,
}

impl Default for ShadowSettings {
    fn default() -> Self {
        Self {
            resolution: 1024,
            extent: 30.0,
        }
    }
}

#[derive(Clone, Copy, PartialEq, Debug)]
pub struct Light {
    pub kind: LightKind,
    pub color: Vec3,
    pub intensity: f32,
    pub position: Vec3,
    pub direction: Vec3,
    pub range: f32,
    pub visible: bool,
    pub shadow: Option<ShadowSettings>,
}

impl Light {
    #[must_use]
    pub fn directional(direction: Vec3, intensity: f32) -> Self {
        Self {
            kind: LightKind::Directional,
            color: Vec3::ONE,
            intensity,
            position: Vec3::ZERO,
            direction,
            range: f32::INFINITY,
            visible: true,
            shadow: None,
        }
    }

    #[must_use]
    pub fn spot(position: Vec3, direction: Vec3, outer_cone: f32, range: f32) -> Self {
        Self {
            kind: LightKind::Spot {
                inner_cone: outer_cone * 0.8,
                outer_cone,
            },
            color: Vec3::ONE,
            intensity: 1.0,
            position,
            direction,
            range,
            visible: true,
            shadow: None,
        }
    }

    #[must_use]
    pub fn point(position: Vec3, range: f32) -> Self {
        Self {
            kind: LightKind::Point,
            color: Vec3::ONE,
            intensity: 1.0,
            position,
            direction: -Vec3::Y,
            range,
            visible: true,
            shadow: None,
        }
    }

    #[must_use]
    pub fn with_shadow(mut self, shadow: ShadowSettings) -> Self {
        self.shadow = Some(shadow);
        self
    }

    /// Whether the light needs a shadow map tile this frame.
    #[must_use]
    pub fn casts_shadow(&self) -> bool {
        self.visible && self.shadow.is_some() && !matches!(self.kind, LightKind::Point)
    }

    /// View-projection used to render and sample the light's shadow map.
    #[must_use]
    pub fn shadow_view_projection(&self) -> Mat4 {
        let dir = if self.direction.length_squared() > 1e-6 {
            self.direction.normalize()
        } else {
            -Vec3::Z
        };
        let up = if dir.y.abs() > 0.99 { Vec3::X } else { Vec3::Y };

        match self.kind {
            LightKind::Directional => {
                let extent = self.shadow.map_or(30.0, |s| s.extent);
                let center = Vec3::ZERO;
                let eye = center - dir * extent * 2.0;
                let view = Mat4::look_at_rh(eye, center, up);
                let proj = Mat4::orthographic_rh(-extent, extent, -extent, extent, 0.1, extent * 5.0);
                proj * view
            }
            LightKind::Spot { outer_cone, .. } => {
                let view = Mat4::look_at_rh(self.position, self.position + dir, up);
                let fov = (outer_cone * 2.0).clamp(0.1, std::f32::consts::PI - 0.01);
                let proj = Mat4::perspective_rh(fov, 1.0, 0.1, self.range.max(1.0));
                proj * view
            }
            LightKind::Point => Mat4::IDENTITY,
        }
    }
}
