//! Shader Cache Settings
//!
//! Configuration for the program cache and the context that owns it.
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use myth_shader_cache::{CacheSettings, ContextSettings};
//!
//! // Default: 64 slots, grows by 64 when full
//! let settings = ContextSettings::default();
//!
//! // Fixed 32-slot table with least-recently-used eviction
//! let settings = ContextSettings {
//!     cache: CacheSettings::fixed(32),
//!     ..Default::default()
//! };
//! ```

use serde::{Deserialize, Serialize};

/// Sizing policy of the shader table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheSettings {
    /// Number of slots allocated up front.
    pub initial_capacity: usize,
    /// Slots added whenever the table is full. `None` keeps the capacity fixed
    /// and evicts the least recently used program instead.
    pub growth: Option<usize>,
}

impl Default for CacheSettings {
    #[inline]
    fn default() -> Self {
        Self {
            initial_capacity: 64,
            growth: Some(64),
        }
    }
}

impl CacheSettings {
    /// Fixed capacity with LRU eviction.
    #[must_use]
    pub fn fixed(capacity: usize) -> Self {
        Self {
            initial_capacity: capacity,
            growth: None,
        }
    }

    /// Growable table starting at `initial_capacity`.
    #[must_use]
    pub fn growable(initial_capacity: usize, step: usize) -> Self {
        Self {
            initial_capacity,
            growth: Some(step),
        }
    }

    #[inline]
    #[must_use]
    pub fn allows_resize(&self) -> bool {
        self.growth.is_some_and(|step| step > 0)
    }
}

/// Settings for a `ShaderContext`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextSettings {
    pub cache: CacheSettings,
    /// Use separable programs when the device supports them.
    ///
    /// Turning this off forces the linked-program path everywhere.
    pub prefer_separable: bool,
    /// Log the wrapped source of stages that fail to compile (debug builds only).
    pub dump_failed_sources: bool,
}

impl Default for ContextSettings {
    fn default() -> Self {
        Self {
            cache: CacheSettings::default(),
            prefer_separable: true,
            dump_failed_sources: true,
        }
    }
}
