//! Native Device Seam
//!
//! Everything the shader cache needs from the GPU driver goes through the
//! [`GlDevice`] trait. Function-pointer loading and version detection happen
//! elsewhere; this module only describes:
//!
//! - [`GlDevice`]: the native calls (compile, link, uniforms, program pipelines)
//! - [`Capabilities`]: the shading-language dialect and optional features
//! - [`DeviceGeneration`] / [`Generational`]: context-loss detection for handles
//! - [`RecordingDevice`]: an in-memory implementation for tests and tools

pub mod recording;

use std::fmt;
use std::num::NonZeroU32;

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use crate::pipeline::ShaderStage;
use crate::pipeline::uniforms::UniformValue;

pub use recording::RecordingDevice;

// ─── Native Handles ──────────────────────────────────────────────────────────

macro_rules! native_handle {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub NonZeroU32);

        impl $name {
            /// Raw driver object name.
            #[inline]
            #[must_use]
            pub fn raw(self) -> u32 {
                self.0.get()
            }
        }
    };
}

native_handle!(
    /// Native shader object name.
    NativeShader
);
native_handle!(
    /// Native program object name.
    NativeProgram
);
native_handle!(
    /// Native program pipeline object name.
    NativePipeline
);

/// Native uniform location inside one program.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UniformLocation(pub i32);

// ─── Capabilities ────────────────────────────────────────────────────────────

/// Detected shading-language version.
///
/// `version` uses the `#version` numbering (`100`, `300`, `120`, `330`, …).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GlslVersion {
    pub version: u16,
    pub es: bool,
}

impl GlslVersion {
    /// OpenGL ES 2.0 / WebGL 1.
    pub const ES_100: Self = Self::es(100);
    /// OpenGL ES 3.0 / WebGL 2.
    pub const ES_300: Self = Self::es(300);
    /// OpenGL 2.1.
    pub const GL_120: Self = Self::desktop(120);
    /// OpenGL 3.3 core.
    pub const GL_330: Self = Self::desktop(330);
    /// OpenGL 4.1 (first desktop version with separable programs in core).
    pub const GL_410: Self = Self::desktop(410);

    #[must_use]
    pub const fn es(version: u16) -> Self {
        Self { version, es: true }
    }

    #[must_use]
    pub const fn desktop(version: u16) -> Self {
        Self { version, es: false }
    }

    /// Whether the dialect uses `in`/`out` instead of `attribute`/`varying`.
    #[inline]
    #[must_use]
    pub fn is_modern(self) -> bool {
        if self.es {
            self.version >= 300
        } else {
            self.version >= 130
        }
    }

    /// Whether precision qualifiers are part of the language.
    #[inline]
    #[must_use]
    pub fn has_precision_qualifiers(self) -> bool {
        self.es || self.version >= 130
    }

    /// Whether separable vertex stages must redeclare `gl_PerVertex`.
    #[inline]
    #[must_use]
    pub fn requires_per_vertex_block(self) -> bool {
        if self.es {
            self.version >= 310
        } else {
            self.version >= 410
        }
    }
}

impl fmt::Display for GlslVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.es && self.version >= 300 {
            write!(f, "{} es", self.version)
        } else {
            write!(f, "{}", self.version)
        }
    }
}

bitflags! {
    /// Optional driver features the cache can take advantage of.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct DeviceFeatures: u32 {
        /// Independently linkable shader stages (`GL_ARB_separate_shader_objects`).
        const SEPARABLE_PROGRAMS = 1 << 0;
        /// Shaders may be compiled to binaries on a secondary context.
        const BACKGROUND_COMPILE = 1 << 1;
        /// Precompiled shader binaries can be loaded.
        const SHADER_BINARY      = 1 << 2;
    }
}

/// What the active context supports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    pub glsl: GlslVersion,
    pub features: DeviceFeatures,
}

impl Capabilities {
    #[must_use]
    pub fn new(glsl: GlslVersion, features: DeviceFeatures) -> Self {
        Self { glsl, features }
    }

    #[inline]
    #[must_use]
    pub fn supports_separable(&self) -> bool {
        self.features.contains(DeviceFeatures::SEPARABLE_PROGRAMS)
    }

    #[inline]
    #[must_use]
    pub fn supports_background_compile(&self) -> bool {
        self.features
            .contains(DeviceFeatures::BACKGROUND_COMPILE | DeviceFeatures::SHADER_BINARY)
    }
}

// ─── Device Generation ───────────────────────────────────────────────────────

/// Monotonic counter bumped every time the GPU context is lost or recreated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct DeviceGeneration(u64);

impl DeviceGeneration {
    #[must_use]
    pub fn new() -> Self {
        Self(1)
    }

    /// Advances to the next generation.
    pub fn bump(&mut self) {
        self.0 = self.0.wrapping_add(1);
    }

    #[inline]
    #[must_use]
    pub fn value(self) -> u64 {
        self.0
    }
}

/// A native handle tagged with the device generation it was created under.
///
/// The handle is dead as soon as the current generation moves past it; no
/// destroy call is needed (or allowed) for it afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Generational<H> {
    handle: H,
    generation: DeviceGeneration,
}

impl<H: Copy> Generational<H> {
    #[must_use]
    pub fn new(handle: H, generation: DeviceGeneration) -> Self {
        Self { handle, generation }
    }

    /// Returns the handle if it is still valid in `current`.
    #[inline]
    #[must_use]
    pub fn get(&self, current: DeviceGeneration) -> Option<H> {
        (self.generation == current).then_some(self.handle)
    }

    #[inline]
    #[must_use]
    pub fn is_stale(&self, current: DeviceGeneration) -> bool {
        self.generation != current
    }

    #[inline]
    #[must_use]
    pub fn generation(&self) -> DeviceGeneration {
        self.generation
    }
}

// ─── GlDevice ────────────────────────────────────────────────────────────────

/// Bit mask of program stages for [`GlDevice::use_program_stages`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageMask {
    Vertex,
    Fragment,
}

impl From<ShaderStage> for StageMask {
    fn from(stage: ShaderStage) -> Self {
        match stage {
            ShaderStage::Vertex => Self::Vertex,
            ShaderStage::Fragment => Self::Fragment,
        }
    }
}

/// Native calls required by the shader cache.
///
/// Implementations map these one-to-one onto the GL entry points. All calls are
/// issued from the rendering thread.
pub trait GlDevice {
    // ---- Shader objects ----
    fn create_shader(&mut self, stage: ShaderStage) -> Option<NativeShader>;
    /// Uploads the concatenation of `sources` and compiles; `Err` carries the info log.
    fn compile_shader(&mut self, shader: NativeShader, sources: &[&str]) -> Result<(), String>;
    /// Loads a precompiled binary in place of source compilation.
    fn load_shader_binary(&mut self, shader: NativeShader, binary: &[u8]) -> Result<(), String>;
    fn delete_shader(&mut self, shader: NativeShader);

    // ---- Program objects ----
    fn create_program(&mut self) -> Option<NativeProgram>;
    fn set_program_separable(&mut self, program: NativeProgram, separable: bool);
    fn attach_shader(&mut self, program: NativeProgram, shader: NativeShader);
    fn detach_shader(&mut self, program: NativeProgram, shader: NativeShader);
    fn bind_attrib_location(&mut self, program: NativeProgram, index: u32, name: &str);
    /// Links; `Err` carries the info log.
    fn link_program(&mut self, program: NativeProgram) -> Result<(), String>;
    fn delete_program(&mut self, program: NativeProgram);
    fn use_program(&mut self, program: Option<NativeProgram>);

    // ---- Introspection ----
    fn attrib_location(&mut self, program: NativeProgram, name: &str) -> Option<u32>;
    fn active_attribute_count(&mut self, program: NativeProgram) -> u32;
    fn uniform_location(&mut self, program: NativeProgram, name: &str) -> Option<UniformLocation>;

    // ---- Uniforms ----
    /// Sets a uniform on the program currently in use.
    fn uniform(&mut self, location: UniformLocation, value: &UniformValue);
    /// Sets a uniform on an explicit program (`glProgramUniform*`).
    fn program_uniform(
        &mut self,
        program: NativeProgram,
        location: UniformLocation,
        value: &UniformValue,
    );

    // ---- Program pipelines ----
    fn create_program_pipeline(&mut self) -> Option<NativePipeline>;
    fn use_program_stages(
        &mut self,
        pipeline: NativePipeline,
        stage: StageMask,
        program: Option<NativeProgram>,
    );
    fn bind_program_pipeline(&mut self, pipeline: Option<NativePipeline>);
    fn delete_program_pipeline(&mut self, pipeline: NativePipeline);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generational_handle_goes_stale_after_bump() {
        let mut generation = DeviceGeneration::new();
        let handle = Generational::new(NativeProgram(NonZeroU32::MIN), generation);
        assert_eq!(handle.get(generation), Some(NativeProgram(NonZeroU32::MIN)));

        generation.bump();
        assert!(handle.is_stale(generation));
        assert_eq!(handle.get(generation), None);
    }

    #[test]
    fn dialect_thresholds() {
        assert!(!GlslVersion::ES_100.is_modern());
        assert!(GlslVersion::ES_300.is_modern());
        assert!(!GlslVersion::GL_120.is_modern());
        assert!(GlslVersion::desktop(130).is_modern());
        assert!(!GlslVersion::GL_120.has_precision_qualifiers());
        assert!(GlslVersion::ES_100.has_precision_qualifiers());
        assert!(GlslVersion::GL_410.requires_per_vertex_block());
        assert!(!GlslVersion::GL_330.requires_per_vertex_block());
        assert_eq!(GlslVersion::ES_300.to_string(), "300 es");
        assert_eq!(GlslVersion::ES_100.to_string(), "100");
    }
}
