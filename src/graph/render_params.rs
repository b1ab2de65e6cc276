//! Render parameters shared by every task phase.
//!
//! Unlike [`FrameContext`](super::FrameContext), this state persists across
//! frames: frame number, frame clock, output target and the global display
//! modes.

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::device::TextureView;

/// How geometry is rasterized.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RenderMode {
    #[default]
    Solid,
    Wireframe,
    Points,
}

impl RenderMode {
    #[must_use]
    pub fn polygon_mode(self) -> wgpu::PolygonMode {
        match self {
            Self::Solid => wgpu::PolygonMode::Fill,
            Self::Wireframe => wgpu::PolygonMode::Line,
            Self::Points => wgpu::PolygonMode::Point,
        }
    }
}

/// G-buffer channel shown instead of the lit image.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DebugView {
    #[default]
    None,
    Normals,
    BaseColor,
    Material,
    Depth,
    MeshId,
    Ssao,
}

impl DebugView {
    /// Channel index consumed by the debug-view shader.
    #[must_use]
    pub fn channel(self) -> u32 {
        self as u32
    }
}

/// Frame delta and elapsed time.
#[derive(Clone, Copy, Debug)]
pub struct FrameClock {
    last_tick: Option<Instant>,
    /// Forces a constant delta, for deterministic playback and tests.
    pub fixed_step: Option<Duration>,
    delta: Duration,
    elapsed: Duration,
}

impl Default for FrameClock {
    fn default() -> Self {
        Self {
            last_tick: None,
            fixed_step: None,
            delta: Duration::ZERO,
            elapsed: Duration::ZERO,
        }
    }
}

impl FrameClock {
    /// Advances the clock by one frame.
    pub fn tick(&mut self) {
        let now = Instant::now();
        self.delta = match (self.fixed_step, self.last_tick) {
            (Some(step), _) => step,
            (None, Some(last)) => now.saturating_duration_since(last),
            (None, None) => Duration::ZERO,
        };
        self.last_tick = Some(now);
        self.elapsed += self.delta;
    }

    #[inline]
    #[must_use]
    pub fn delta_seconds(&self) -> f32 {
        self.delta.as_secs_f32()
    }

    #[inline]
    #[must_use]
    pub fn elapsed_seconds(&self) -> f32 {
        self.elapsed.as_secs_f32()
    }
}

/// Persistent render state passed by reference to every phase.
#[derive(Clone, Debug, Default)]
pub struct RenderParams {
    /// Advanced by the begin-frame task; 1 on the first rendered frame.
    pub frame_number: u64,
    pub clock: FrameClock,
    /// Final output image. Every offscreen target is sized from it.
    pub output: Option<TextureView>,
    pub render_mode: RenderMode,
    pub debug_view: DebugView,
}

impl RenderParams {
    /// Whether screen-space and temporal effects may run.
    #[must_use]
    pub fn effects_allowed(&self) -> bool {
        self.render_mode == RenderMode::Solid && self.debug_view == DebugView::None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_step_clock_is_deterministic() {
        let mut clock = FrameClock {
            fixed_step: Some(Duration::from_millis(20)),
            ..FrameClock::default()
        };
        clock.tick();
        clock.tick();
        clock.tick();
        assert!((clock.delta_seconds() - 0.02).abs() < 1e-6);
        assert!((clock.elapsed_seconds() - 0.06).abs() < 1e-6);
    }

    #[test]
    fn effects_need_solid_mode_without_debug_view() {
        let mut params = RenderParams::default();
        assert!(params.effects_allowed());
        params.render_mode = RenderMode::Wireframe;
        assert!(!params.effects_allowed());
        params.render_mode = RenderMode::Solid;
        params.debug_view = DebugView::Depth;
        assert!(!params.effects_allowed());
    }
}
