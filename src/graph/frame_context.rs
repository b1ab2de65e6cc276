//! Per-frame data exchange between tasks.
//!
//! [`FrameContext`] maps a closed set of [`FrameKey`]s to tagged
//! [`FrameValue`]s. It is cleared before Sync and after Execute, so an entry
//! only ever lives for one frame and holds references (handles), never
//! ownership of GPU resources.
//!
//! Reads go through typed accessors that return
//! [`FrameContextError::Missing`] or [`FrameContextError::TypeMismatch`]
//! instead of panicking; tasks turn those into an "unexpected state" log line
//! and skip their phase.

use bitflags::bitflags;
use glam::Vec2;
use log::warn;
use rustc_hash::FxHashMap;

use crate::device::{BufferHandle, TextureView};
use crate::errors::FrameContextError;
use crate::pass_state::PassStateId;
use crate::scene::{CameraAttributes, ShadowAssignment};

/// Every value tasks may publish in a frame.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum FrameKey {
    // ── G-buffer ───────────────────────────────────────────────────────────
    SceneColor,
    Normal,
    Material,
    BaseColor,
    Ibl,
    MeshId,
    MotionCurrent,
    MotionPrevious,
    DepthCurrent,
    DepthPrevious,
    SelectionDepth,
    ClosestSelected0,
    ClosestSelected1,
    JitteredColor,
    ShadowAtlas,
    // ── OIT ────────────────────────────────────────────────────────────────
    OitLayers,
    OitTail,
    OitVersion,
    // ── Derived images ─────────────────────────────────────────────────────
    /// Whichever closest-selected buffer the last jump-flood pass wrote.
    SelectionOutline,
    // ── Constants ──────────────────────────────────────────────────────────
    FrameConstants,
    Camera,
    ShadowAssignments,
    Jitter,
    TaaEnabled,
    Flags,
    // ── Pass states ────────────────────────────────────────────────────────
    OpaqueSelectedPass,
    MainPass,
    TransparentSelectedPass,
    OitPass,
    ShadowPass,
}

bitflags! {
    /// Frame-wide flags. Several tasks may raise flags in the same frame.
    #[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Default)]
    pub struct FrameFlags: u32 {
        /// A discrete visual change happened; temporal accumulation must not
        /// treat the scene as static this frame.
        const SUSPEND_SUPERSAMPLING    = 1 << 0;
        /// The camera view or projection differs from the previous frame.
        const CAMERA_TRANSFORM_CHANGED = 1 << 1;
    }
}

/// Tagged value stored in the frame context.
#[derive(Clone, PartialEq, Debug)]
pub enum FrameValue {
    View(TextureView),
    Buffer(BufferHandle),
    Pass(PassStateId),
    Bool(bool),
    Uint(u64),
    Vec2(Vec2),
    Flags(FrameFlags),
    Camera(Box<CameraAttributes>),
    ShadowAssignments(Vec<ShadowAssignment>),
}

impl FrameValue {
    fn kind(&self) -> &'static str {
        match self {
            Self::View(_) => "texture view",
            Self::Buffer(_) => "buffer",
            Self::Pass(_) => "pass state",
            Self::Bool(_) => "bool",
            Self::Uint(_) => "uint",
            Self::Vec2(_) => "vec2",
            Self::Flags(_) => "flags",
            Self::Camera(_) => "camera",
            Self::ShadowAssignments(_) => "shadow assignments",
        }
    }
}

/// Transient key/value store rebuilt every frame.
#[derive(Default, Debug)]
pub struct FrameContext {
    entries: FxHashMap<FrameKey, FrameValue>,
    written: Vec<FrameKey>,
}

macro_rules! typed_getter {
    ($(#[$meta:meta])* $name:ident, $variant:ident, $ty:ty, $expected:literal) => {
        $(#[$meta])*
        pub fn $name(&self, key: FrameKey) -> Result<$ty, FrameContextError> {
            match self.get(key)? {
                FrameValue::$variant(v) => Ok(*v),
                _ => Err(FrameContextError::TypeMismatch { key, expected: $expected }),
            }
        }
    };
}

impl FrameContext {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Publishes a value. Keys are write-once per frame; a second write is
    /// reported and replaces the first.
    pub fn insert(&mut self, key: FrameKey, value: FrameValue) {
        if let Some(previous) = self.entries.insert(key, value) {
            warn!(
                "FrameContext: {key:?} written twice this frame (previous {})",
                previous.kind()
            );
        } else {
            self.written.push(key);
        }
    }

    /// Raises frame flags, keeping the ones already set.
    pub fn set_flags(&mut self, flags: FrameFlags) {
        match self.entries.get_mut(&FrameKey::Flags) {
            Some(FrameValue::Flags(existing)) => *existing |= flags,
            _ => self.insert(FrameKey::Flags, FrameValue::Flags(flags)),
        }
    }

    /// Flags raised so far this frame (empty when none were).
    #[must_use]
    pub fn flags(&self) -> FrameFlags {
        match self.entries.get(&FrameKey::Flags) {
            Some(FrameValue::Flags(flags)) => *flags,
            _ => FrameFlags::empty(),
        }
    }

    pub fn get(&self, key: FrameKey) -> Result<&FrameValue, FrameContextError> {
        self.entries.get(&key).ok_or(FrameContextError::Missing(key))
    }

    #[must_use]
    pub fn contains(&self, key: FrameKey) -> bool {
        self.entries.contains_key(&key)
    }

    typed_getter!(view, View, TextureView, "texture view");
    typed_getter!(buffer, Buffer, BufferHandle, "buffer");
    typed_getter!(pass, Pass, PassStateId, "pass state");
    typed_getter!(bool, Bool, bool, "bool");
    typed_getter!(uint, Uint, u64, "uint");
    typed_getter!(vec2, Vec2, Vec2, "vec2");

    pub fn camera(&self) -> Result<&CameraAttributes, FrameContextError> {
        match self.get(FrameKey::Camera)? {
            FrameValue::Camera(camera) => Ok(camera),
            _ => Err(FrameContextError::TypeMismatch {
                key: FrameKey::Camera,
                expected: "camera",
            }),
        }
    }

    pub fn shadow_assignments(&self) -> Result<&[ShadowAssignment], FrameContextError> {
        match self.get(FrameKey::ShadowAssignments)? {
            FrameValue::ShadowAssignments(list) => Ok(list),
            _ => Err(FrameContextError::TypeMismatch {
                key: FrameKey::ShadowAssignments,
                expected: "shadow assignments",
            }),
        }
    }

    /// Keys published this frame, in publication order.
    #[must_use]
    pub fn written_keys(&self) -> &[FrameKey] {
        &self.written
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.written.clear();
    }
}
