//! Shader Pipeline Module
//!
//! Manages shader generation, compilation and program caching:
//! - key: render configuration → dense shader key
//! - shader_gen: default GLSL source synthesis (minijinja templates)
//! - headers: dialect headers injected in front of every source
//! - compiler: compile / link wrappers over the native device
//! - lru_table: open-addressing hash table with LRU eviction
//! - cache: the shader table of built programs
//! - program: stage / pipeline arena and the two uniform protocols
//! - uniforms: uniform values, built-in names, user registrations

pub mod cache;
pub mod compiler;
pub mod headers;
pub mod key;
pub mod lru_table;
pub mod program;
pub mod shader_gen;
pub mod uniforms;

use std::fmt;

pub use cache::{CacheEntry, CacheLookup, CacheStats, EntryState, ShaderCache};
pub use key::{AlphaCompare, PrimitiveClass, RenderConfig, ShaderKey, TextureChannels};
pub use lru_table::LruHashTable;
pub use program::{PipelineId, ProgramRegistry, StageId};
pub use shader_gen::ShaderGenerator;

/// Programmable stage of a shader program.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ShaderStage {
    Vertex,
    Fragment,
}

impl ShaderStage {
    pub const ALL: [ShaderStage; 2] = [ShaderStage::Vertex, ShaderStage::Fragment];

    /// Dense index (vertex = 0, fragment = 1).
    #[inline]
    #[must_use]
    pub fn index(self) -> usize {
        match self {
            ShaderStage::Vertex => 0,
            ShaderStage::Fragment => 1,
        }
    }
}

impl fmt::Display for ShaderStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ShaderStage::Vertex => "vertex",
            ShaderStage::Fragment => "fragment",
        })
    }
}
