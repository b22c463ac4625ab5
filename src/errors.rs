//! Error Types
//!
//! This module defines the error types used throughout the shader cache.
//!
//! # Overview
//!
//! The main error type [`ShaderError`] covers every failure mode of the
//! subsystem:
//! - Render configurations that fall outside the cacheable domain
//! - Resource exhaustion (native object creation, table growth)
//! - Source synthesis, compile and link failures
//! - Use of objects created under a previous device generation
//! - User uniform / attribute registration conflicts
//!
//! None of these are fatal to the process. A failed build is remembered by the
//! cache so the same key is not rebuilt every frame.
//!
//! # Usage
//!
//! All fallible APIs return [`Result<T>`], an alias for
//! `std::result::Result<T, ShaderError>`.

use thiserror::Error;

use crate::pipeline::key::ShaderKey;
use crate::pipeline::ShaderStage;

/// The main error type for the shader cache.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ShaderError {
    // ========================================================================
    // Configuration Errors
    // ========================================================================
    /// The render configuration does not map to a shader key.
    #[error("Render configuration cannot be encoded to a shader key")]
    InvalidConfig,

    // ========================================================================
    // Resource Errors
    // ========================================================================
    /// The native driver refused to create an object.
    #[error("Failed to create native {0}")]
    CreateFailed(&'static str),

    /// The cache has no slot available and cannot evict.
    #[error("Shader table is full (capacity {capacity})")]
    TableFull {
        /// Capacity at the time of the failed insertion
        capacity: usize,
    },

    // ========================================================================
    // Build Errors
    // ========================================================================
    /// The source generator returned an empty string.
    #[error("Shader generator produced no {stage} source for key {key}")]
    EmptySource {
        /// Key being built
        key: ShaderKey,
        /// Stage whose source was empty
        stage: ShaderStage,
    },

    /// Shader compilation failed.
    #[error("Failed to compile {stage} shader: {log}")]
    CompileFailed {
        /// Stage that failed
        stage: ShaderStage,
        /// Driver diagnostic log
        log: String,
    },

    /// Program linking failed.
    #[error("Failed to link program: {0}")]
    LinkFailed(String),

    /// A previous build attempt for this key failed and is not retried.
    #[error("Program for key {0} previously failed to build")]
    BuildFailed(ShaderKey),

    // ========================================================================
    // Handle Errors
    // ========================================================================
    /// The object was created under an older device generation.
    #[error("Stale {0} handle (device generation advanced)")]
    StaleHandle(&'static str),

    /// The handle does not name a live object.
    #[error("Unknown {0} handle")]
    UnknownHandle(&'static str),

    /// The pipeline belongs to the program cache and cannot be edited directly.
    #[error("Pipeline is owned by the program cache")]
    CacheOwned,

    // ========================================================================
    // Registration Errors
    // ========================================================================
    /// The name is reserved by the built-in shaders or the shading language.
    #[error("Name `{0}` is reserved")]
    ReservedName(String),

    /// The name is already registered as a uniform or attribute.
    #[error("Name `{0}` is already registered")]
    DuplicateName(String),
}

/// Alias for `Result<T, ShaderError>`.
pub type Result<T> = std::result::Result<T, ShaderError>;
