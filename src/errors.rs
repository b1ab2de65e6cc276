//! Error Types
//!
//! This module defines the error types used throughout the frame graph.
//!
//! # Overview
//!
//! The top-level error type [`StrataError`] covers:
//! - Device failures (texture / buffer / pipeline / binding creation)
//! - Frame context lookups that found nothing or the wrong kind of value
//! - Task graph configuration mistakes (unknown ids, bad custom orders)
//! - Settings parsing
//!
//! Task phases never return these errors to the caller. A failed lookup or a
//! refused allocation is logged and the phase returns early; the error types
//! exist so that helpers can use `?` internally and so that messages are
//! uniform.

use thiserror::Error;

use crate::graph::{FrameKey, TaskId};

/// Errors reported by a [`GpuDevice`](crate::device::GpuDevice) implementation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeviceError {
    /// The device refused to create a texture.
    #[error("failed to create texture '{label}': {reason}")]
    TextureCreation {
        /// Debug label of the requested texture
        label: String,
        /// Backend-specific reason
        reason: String,
    },

    /// The device refused to create a buffer.
    #[error("failed to create buffer '{label}': {reason}")]
    BufferCreation {
        /// Debug label of the requested buffer
        label: String,
        /// Backend-specific reason
        reason: String,
    },

    /// Pipeline creation could not even be scheduled.
    #[error("failed to create pipeline '{label}': {reason}")]
    PipelineCreation {
        /// Debug label of the requested pipeline
        label: String,
        /// Backend-specific reason
        reason: String,
    },

    /// A binding could not be built from the given entries.
    #[error("failed to create binding '{label}': {reason}")]
    BindingCreation {
        /// Debug label of the requested binding
        label: String,
        /// Backend-specific reason
        reason: String,
    },

    /// The pipeline a binding depends on has not finished compiling.
    #[error("pipeline '{0}' is not ready")]
    PipelineNotReady(String),

    /// A handle did not resolve to a live resource.
    #[error("invalid {0} handle")]
    InvalidHandle(&'static str),
}

/// Errors returned when reading the per-frame [`FrameContext`](crate::graph::FrameContext).
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameContextError {
    /// Nothing was published under this key during the current frame.
    #[error("frame context entry {0:?} is missing")]
    Missing(FrameKey),

    /// A value was published, but of a different kind.
    #[error("frame context entry {key:?} is not a {expected}")]
    TypeMismatch {
        /// Key that was looked up
        key: FrameKey,
        /// Kind of value the reader asked for
        expected: &'static str,
    },
}

/// Errors raised by [`RenderPassState`](crate::pass_state::RenderPassState).
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassStateError {
    /// `commit` was called before `begin` in the current frame.
    #[error("render pass '{0}' committed before it was begun this frame")]
    NotBegun(&'static str),

    /// The pass has no color or depth targets to bind.
    #[error("render pass '{0}' has no targets")]
    MissingTargets(&'static str),
}

/// The main error type of the crate.
#[derive(Error, Debug)]
pub enum StrataError {
    // ========================================================================
    // Device Errors
    // ========================================================================
    /// A device operation failed.
    #[error("device error: {0}")]
    Device(#[from] DeviceError),

    /// Adapter or device request failed while creating a backend.
    #[error("failed to initialise GPU backend: {0}")]
    BackendInit(String),

    // ========================================================================
    // Frame Data Errors
    // ========================================================================
    /// A frame context lookup failed.
    #[error(transparent)]
    FrameContext(#[from] FrameContextError),

    /// A render pass state was misused.
    #[error(transparent)]
    PassState(#[from] PassStateError),

    // ========================================================================
    // Graph Configuration Errors
    // ========================================================================
    /// The task id is not registered in the graph.
    #[error("unknown task '{0}'")]
    UnknownTask(TaskId),

    /// A task with this id is already registered.
    #[error("task '{0}' is already registered")]
    DuplicateTask(TaskId),

    /// A custom order is not a permutation of the registered tasks.
    #[error("invalid task order: {0}")]
    InvalidOrder(String),

    // ========================================================================
    // Settings Errors
    // ========================================================================
    /// Settings JSON could not be parsed or produced.
    #[error("settings error: {0}")]
    Settings(#[from] serde_json::Error),
}

/// Alias for `Result<T, StrataError>`.
pub type Result<T> = std::result::Result<T, StrataError>;
