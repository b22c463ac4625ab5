#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::too_many_arguments)]

//! Runtime GLSL shader generation and program caching.
//!
//! A draw call describes its fixed-function state as a [`RenderConfig`]. The
//! [`ShaderContext`] turns it into a [`ShaderKey`], looks the key up in a
//! least-recently-used program table and, on a miss, generates, compiles and
//! links the matching vertex and fragment shaders for the detected GLSL
//! dialect. Drivers with separable programs get one program per stage bound
//! into a pipeline; others get classic linked programs with stage-owned
//! uniform values synchronised lazily.
//!
//! All GPU access goes through the [`GlDevice`] trait. [`RecordingDevice`]
//! implements it in memory.
//!
//! ```rust,ignore
//! use myth_shader_cache::*;
//!
//! let caps = Capabilities::new(GlslVersion::ES_300, DeviceFeatures::empty());
//! let mut ctx = ShaderContext::new(RecordingDevice::new(), caps, ContextSettings::default());
//!
//! let selection = ctx.select_program(&RenderConfig::default())?;
//! if selection.changed {
//!     ctx.set_fixed_uniform(FixedUniform::Transform, UniformValue::Mat4(glam::Mat4::IDENTITY))?;
//! }
//! ```

pub mod context;
pub mod device;
pub mod errors;
pub mod pipeline;
pub mod settings;
pub mod worker;

pub use context::{ProgramSelection, ShaderContext};
pub use device::{
    Capabilities, DeviceFeatures, DeviceGeneration, GlDevice, GlslVersion, RecordingDevice,
};
pub use errors::{Result, ShaderError};
pub use pipeline::uniforms::{
    AttributeBindings, AttributeType, FixedUniform, StandardAttribute, UniformType, UniformValue,
    UserAttributeId, UserUniformId,
};
pub use pipeline::{
    AlphaCompare, CacheStats, EntryState, PipelineId, PrimitiveClass, RenderConfig, ShaderGenerator,
    ShaderKey, ShaderStage, StageId, TextureChannels,
};
pub use settings::{CacheSettings, ContextSettings};
pub use worker::BinaryCompiler;
