//! Uniform values, built-in names and user registrations.
//!
//! Built-in uniforms ([`FixedUniform`]) and attributes ([`StandardAttribute`])
//! are the names used by the default generator. Callers may register extra
//! uniforms and attributes once per generator configuration through
//! [`UserRegistry`]; every cached program resolves them independently because
//! locations are program-specific.

use glam::{Mat4, Vec2, Vec3, Vec4};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::device::UniformLocation;
use crate::errors::{Result, ShaderError};
use crate::pipeline::ShaderStage;

// ─── Values ──────────────────────────────────────────────────────────────────

/// GLSL type of a uniform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UniformType {
    Int,
    Float,
    Vec2,
    Vec3,
    Vec4,
    Mat4,
    Sampler2D,
}

impl UniformType {
    /// GLSL spelling of the type.
    #[must_use]
    pub fn glsl_name(self) -> &'static str {
        match self {
            UniformType::Int => "int",
            UniformType::Float => "float",
            UniformType::Vec2 => "vec2",
            UniformType::Vec3 => "vec3",
            UniformType::Vec4 => "vec4",
            UniformType::Mat4 => "mat4",
            UniformType::Sampler2D => "sampler2D",
        }
    }
}

/// A typed uniform value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum UniformValue {
    Int(i32),
    Float(f32),
    Vec2(Vec2),
    Vec3(Vec3),
    Vec4(Vec4),
    Mat4(Mat4),
    /// Texture unit bound to a sampler.
    Sampler(i32),
}

impl UniformValue {
    #[must_use]
    pub fn ty(&self) -> UniformType {
        match self {
            UniformValue::Int(_) => UniformType::Int,
            UniformValue::Float(_) => UniformType::Float,
            UniformValue::Vec2(_) => UniformType::Vec2,
            UniformValue::Vec3(_) => UniformType::Vec3,
            UniformValue::Vec4(_) => UniformType::Vec4,
            UniformValue::Mat4(_) => UniformType::Mat4,
            UniformValue::Sampler(_) => UniformType::Sampler2D,
        }
    }

    /// Raw bytes as uploaded to the driver.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            UniformValue::Int(v) | UniformValue::Sampler(v) => bytemuck::bytes_of(v),
            UniformValue::Float(v) => bytemuck::bytes_of(v),
            UniformValue::Vec2(v) => bytemuck::bytes_of(v),
            UniformValue::Vec3(v) => bytemuck::bytes_of(v),
            UniformValue::Vec4(v) => bytemuck::bytes_of(v),
            UniformValue::Mat4(v) => bytemuck::bytes_of(v),
        }
    }

    /// Bitwise identity (type and bytes), which unlike `==` treats NaN payloads as equal.
    #[inline]
    #[must_use]
    pub fn same_bits(&self, other: &UniformValue) -> bool {
        self.ty() == other.ty() && self.as_bytes() == other.as_bytes()
    }
}

// ─── Built-in names ──────────────────────────────────────────────────────────

/// Uniforms declared by the default generator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FixedUniform {
    Transform,
    PointSize,
    TexOffset,
    FogZ,
    FixedColor,
    Sampler,
    AlphaRef,
    FogParams,
    FogColor,
}

impl FixedUniform {
    pub const COUNT: usize = 9;

    pub const ALL: [FixedUniform; Self::COUNT] = [
        FixedUniform::Transform,
        FixedUniform::PointSize,
        FixedUniform::TexOffset,
        FixedUniform::FogZ,
        FixedUniform::FixedColor,
        FixedUniform::Sampler,
        FixedUniform::AlphaRef,
        FixedUniform::FogParams,
        FixedUniform::FogColor,
    ];

    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            FixedUniform::Transform => "transform",
            FixedUniform::PointSize => "point_size",
            FixedUniform::TexOffset => "tex_offset",
            FixedUniform::FogZ => "fog_z",
            FixedUniform::FixedColor => "fixed_color",
            FixedUniform::Sampler => "texture0",
            FixedUniform::AlphaRef => "alpha_ref",
            FixedUniform::FogParams => "fog_params",
            FixedUniform::FogColor => "fog_color",
        }
    }

    #[inline]
    #[must_use]
    pub fn index(self) -> usize {
        self as usize
    }
}

/// Vertex inputs declared by the default generator, with fixed binding indices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StandardAttribute {
    Position,
    TexCoord,
    Color,
}

impl StandardAttribute {
    pub const ALL: [StandardAttribute; 3] = [
        StandardAttribute::Position,
        StandardAttribute::TexCoord,
        StandardAttribute::Color,
    ];

    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            StandardAttribute::Position => "a_position",
            StandardAttribute::TexCoord => "a_texcoord",
            StandardAttribute::Color => "a_color",
        }
    }

    /// Attribute index requested at link time.
    #[must_use]
    pub fn index(self) -> u32 {
        self as u32
    }
}

/// First attribute index handed to user attributes.
pub const FIRST_USER_ATTRIBUTE: u32 = 3;

const RESERVED_PREFIXES: [&str; 3] = ["gl_", "webgl_", "_"];

/// Names generated code relies on besides the fixed uniforms and attributes.
const RESERVED_NAMES: [&str; 5] = ["color_out", "v_texcoord", "v_color", "v_fog_depth", "texp"];

fn is_reserved(name: &str) -> bool {
    RESERVED_PREFIXES.iter().any(|p| name.starts_with(p))
        || RESERVED_NAMES.contains(&name)
        || FixedUniform::ALL.iter().any(|u| u.name() == name)
        || StandardAttribute::ALL.iter().any(|a| a.name() == name)
}

// ─── Resolved locations ──────────────────────────────────────────────────────

/// Where a uniform lives inside a built pipeline, per stage.
///
/// Separable pipelines record a location for every stage program declaring
/// the name. Linked pipelines record the single shared location under the
/// stage whose store owns the value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct UniformBinding {
    /// Indexed by [`ShaderStage::index`].
    pub locations: [Option<UniformLocation>; 2],
}

impl UniformBinding {
    #[must_use]
    pub fn single(stage: ShaderStage, location: UniformLocation) -> Self {
        let mut binding = Self::default();
        binding.locations[stage.index()] = Some(location);
        binding
    }

    #[inline]
    #[must_use]
    pub fn location(&self, stage: ShaderStage) -> Option<UniformLocation> {
        self.locations[stage.index()]
    }

    /// Stages holding the uniform, vertex first.
    pub fn stages(self) -> impl Iterator<Item = (ShaderStage, UniformLocation)> {
        ShaderStage::ALL
            .into_iter()
            .filter_map(move |stage| self.location(stage).map(|l| (stage, l)))
    }

    /// First stage holding the uniform.
    #[must_use]
    pub fn stage(&self) -> Option<ShaderStage> {
        self.stages().next().map(|(stage, _)| stage)
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.locations.iter().all(Option::is_none)
    }
}

/// Attribute indices of a built vertex stage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AttributeBindings {
    /// Number of active vertex-shader inputs.
    pub input_count: u32,
    pub position: Option<u32>,
    pub texcoord: Option<u32>,
    pub color: Option<u32>,
    /// Indexed by [`UserAttributeId`].
    pub user: Vec<Option<u32>>,
}

impl AttributeBindings {
    #[must_use]
    pub fn standard(&self, attribute: StandardAttribute) -> Option<u32> {
        match attribute {
            StandardAttribute::Position => self.position,
            StandardAttribute::TexCoord => self.texcoord,
            StandardAttribute::Color => self.color,
        }
    }
}

// ─── Per-stage uniform store (linked path) ───────────────────────────────────

/// One locally stored uniform value.
#[derive(Debug, Clone)]
pub struct StoredUniform {
    pub name: String,
    pub value: UniformValue,
    /// Store generation at which this value last changed.
    pub changed_at: u64,
}

/// Uniform values owned by a shader stage when programs are linked.
///
/// Values belong to the stage, not to any linked program, so they are kept
/// here and pushed into whichever linked program uses the stage. Every change
/// bumps [`generation`](Self::generation).
#[derive(Debug, Default)]
pub struct UniformStore {
    entries: Vec<StoredUniform>,
    by_name: FxHashMap<String, usize>,
    generation: u64,
}

impl UniformStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a value; returns `false` if it was already set to identical bits.
    pub fn set(&mut self, name: &str, value: UniformValue) -> bool {
        if let Some(&idx) = self.by_name.get(name) {
            let entry = &mut self.entries[idx];
            if entry.value.same_bits(&value) {
                return false;
            }
            self.generation += 1;
            entry.value = value;
            entry.changed_at = self.generation;
            return true;
        }

        self.generation += 1;
        self.by_name.insert(name.to_owned(), self.entries.len());
        self.entries.push(StoredUniform {
            name: name.to_owned(),
            value,
            changed_at: self.generation,
        });
        true
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&UniformValue> {
        self.by_name.get(name).map(|&idx| &self.entries[idx].value)
    }

    #[inline]
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Values changed after store generation `since`.
    pub fn changed_since(&self, since: u64) -> impl Iterator<Item = &StoredUniform> {
        self.entries.iter().filter(move |u| u.changed_at > since)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// ─── User registrations ──────────────────────────────────────────────────────

/// Index of a registered user uniform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UserUniformId(pub(crate) u32);

impl UserUniformId {
    #[inline]
    #[must_use]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Index of a registered user attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UserAttributeId(pub(crate) u32);

impl UserAttributeId {
    #[inline]
    #[must_use]
    pub fn index(self) -> usize {
        self.0 as usize
    }

    /// Attribute index requested at link time.
    #[inline]
    #[must_use]
    pub fn binding_index(self) -> u32 {
        FIRST_USER_ATTRIBUTE + self.0
    }
}

/// Component layout of a user attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AttributeType {
    Float,
    Vec2,
    Vec3,
    Vec4,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserUniform {
    pub name: String,
    pub ty: UniformType,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserAttribute {
    pub name: String,
    pub ty: AttributeType,
}

/// User uniforms and attributes shared by every program of a generator.
///
/// Uniform and attribute names live in one namespace.
#[derive(Debug, Clone, Default)]
pub struct UserRegistry {
    uniforms: Vec<UserUniform>,
    attributes: Vec<UserAttribute>,
}

impl UserRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn check_name(&self, name: &str) -> Result<()> {
        if name.is_empty() || is_reserved(name) {
            return Err(ShaderError::ReservedName(name.to_owned()));
        }
        if self.uniforms.iter().any(|u| u.name == name)
            || self.attributes.iter().any(|a| a.name == name)
        {
            return Err(ShaderError::DuplicateName(name.to_owned()));
        }
        Ok(())
    }

    pub fn register_uniform(&mut self, name: &str, ty: UniformType) -> Result<UserUniformId> {
        self.check_name(name)?;
        let id = UserUniformId(self.uniforms.len() as u32);
        self.uniforms.push(UserUniform {
            name: name.to_owned(),
            ty,
        });
        Ok(id)
    }

    pub fn register_attribute(&mut self, name: &str, ty: AttributeType) -> Result<UserAttributeId> {
        self.check_name(name)?;
        let id = UserAttributeId(self.attributes.len() as u32);
        self.attributes.push(UserAttribute {
            name: name.to_owned(),
            ty,
        });
        Ok(id)
    }

    #[must_use]
    pub fn uniforms(&self) -> &[UserUniform] {
        &self.uniforms
    }

    #[must_use]
    pub fn attributes(&self) -> &[UserAttribute] {
        &self.attributes
    }

    #[must_use]
    pub fn uniform(&self, id: UserUniformId) -> Option<&UserUniform> {
        self.uniforms.get(id.index())
    }

    /// Attribute names with their link-time indices.
    pub fn attribute_bindings(&self) -> impl Iterator<Item = (u32, &str)> {
        self.attributes
            .iter()
            .enumerate()
            .map(|(i, a)| (FIRST_USER_ATTRIBUTE + i as u32, a.name.as_str()))
    }

    pub fn clear(&mut self) {
        self.uniforms.clear();
        self.attributes.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_bumps_generation_only_on_change() {
        let mut store = UniformStore::new();
        assert!(store.set("tint", UniformValue::Float(1.0)));
        let g1 = store.generation();
        assert!(!store.set("tint", UniformValue::Float(1.0)));
        assert_eq!(store.generation(), g1);
        assert!(store.set("tint", UniformValue::Float(2.0)));
        assert!(store.generation() > g1);
        assert_eq!(store.changed_since(g1).count(), 1);
        assert_eq!(store.changed_since(store.generation()).count(), 0);
    }

    #[test]
    fn store_type_change_counts_as_change() {
        let mut store = UniformStore::new();
        store.set("x", UniformValue::Int(0));
        assert!(store.set("x", UniformValue::Float(0.0)));
    }

    #[test]
    fn registry_rejects_reserved_and_duplicates() {
        let mut reg = UserRegistry::new();
        assert_eq!(
            reg.register_uniform("gl_Color", UniformType::Vec4),
            Err(ShaderError::ReservedName("gl_Color".into()))
        );
        assert_eq!(
            reg.register_uniform("transform", UniformType::Mat4),
            Err(ShaderError::ReservedName("transform".into()))
        );
        assert!(reg.register_attribute("a_position", AttributeType::Vec3).is_err());

        let id = reg.register_uniform("tint", UniformType::Vec4).unwrap();
        assert_eq!(id.index(), 0);
        assert_eq!(
            reg.register_attribute("tint", AttributeType::Vec4),
            Err(ShaderError::DuplicateName("tint".into()))
        );

        let attr = reg.register_attribute("weight", AttributeType::Float).unwrap();
        assert_eq!(attr.binding_index(), FIRST_USER_ATTRIBUTE);
    }
}
