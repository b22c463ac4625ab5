//! Shader Code Generator
//!
//! A [`ShaderGenerator`] is the triple of functions the cache uses on a miss:
//! a key function and two source functions. The built-in triple renders the
//! fixed-function replacement shaders from minijinja templates embedded in the
//! binary; callers may swap any of the three for their own.
//!
//! Source functions return an empty string to signal failure. The cache never
//! compiles an empty source.

use std::borrow::Cow;
use std::fmt;
use std::sync::OnceLock;

use minijinja::{Environment, Error, ErrorKind, syntax::SyntaxConfig};
use rust_embed::RustEmbed;
use serde::Serialize;

use super::key::{RenderConfig, ShaderKey, TextureChannels};

pub static SHADER_ENV: OnceLock<Environment<'static>> = OnceLock::new();

#[derive(RustEmbed)]
#[folder = "src/pipeline/shaders"]
struct ShaderAssets;

pub fn get_env() -> &'static Environment<'static> {
    SHADER_ENV.get_or_init(|| {
        let mut env = Environment::new();

        let syntax = SyntaxConfig::builder()
            .block_delimiters("{$", "$}")
            .variable_delimiters("{{", "}}")
            .line_statement_prefix("$$")
            .build()
            .expect("Failed to configure Jinja2 syntax");

        env.set_syntax(syntax);
        env.set_trim_blocks(true);
        env.set_lstrip_blocks(true);
        env.set_undefined_behavior(minijinja::UndefinedBehavior::SemiStrict);

        env.set_loader(shader_loader);

        env
    })
}

fn shader_loader(name: &str) -> Result<Option<String>, Error> {
    let filename = if std::path::Path::new(name)
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("glsl"))
    {
        Cow::Borrowed(name)
    } else {
        Cow::Owned(format!("{name}.glsl"))
    };

    #[cfg(all(debug_assertions, not(target_arch = "wasm32")))]
    {
        let path = std::path::Path::new("src/pipeline/shaders").join(filename.as_ref());
        if path.exists() {
            match std::fs::read_to_string(&path) {
                Ok(source) => return Ok(Some(source)),
                Err(e) => {
                    return Err(Error::new(
                        ErrorKind::TemplateNotFound,
                        format!("Failed to read file: {e}"),
                    ));
                }
            }
        }
    }

    if let Some(file) = ShaderAssets::get(&filename)
        && let Ok(source) = std::str::from_utf8(file.data.as_ref())
    {
        return Ok(Some(source.to_string()));
    }

    Ok(None)
}

// ─── Default templates ───────────────────────────────────────────────────────

#[derive(Serialize)]
struct DefaultShaderContext {
    position_size: u8,
    texcoord: bool,
    texture: Option<&'static str>,
    texture_offset: bool,
    color_size: u8,
    fixed_color: bool,
    fog: bool,
    alpha_op: Option<&'static str>,
    points: bool,
}

impl DefaultShaderContext {
    fn new(config: &RenderConfig) -> Self {
        Self {
            position_size: config.position_size,
            texcoord: config.has_texcoord(),
            texture: match config.texture {
                TextureChannels::None => None,
                TextureChannels::Rgba => Some("rgba"),
                TextureChannels::Alpha => Some("alpha"),
                TextureChannels::Luminance => Some("luminance"),
            },
            texture_offset: config.texture_offset,
            color_size: config.color_size,
            fixed_color: config.fixed_color,
            fog: config.fog,
            alpha_op: config
                .active_alpha_compare()
                .and_then(super::key::AlphaCompare::glsl_operator),
            points: config.is_points(),
        }
    }
}

fn render_default(template_name: &str, config: &RenderConfig) -> String {
    let ctx = DefaultShaderContext::new(config);
    let rendered = get_env()
        .get_template(template_name)
        .and_then(|template| template.render(&ctx));

    match rendered {
        Ok(source) => source,
        Err(e) => {
            log::error!("Failed to render shader template `{template_name}`: {e}");
            String::new()
        }
    }
}

/// Built-in vertex source for a render configuration.
#[must_use]
pub fn default_vertex_source(config: &RenderConfig) -> String {
    render_default("default_vertex", config)
}

/// Built-in fragment source for a render configuration.
#[must_use]
pub fn default_fragment_source(config: &RenderConfig) -> String {
    render_default("default_fragment", config)
}

// ─── ShaderGenerator ─────────────────────────────────────────────────────────

pub type KeyFn = Box<dyn Fn(&RenderConfig) -> Option<ShaderKey>>;
pub type SourceFn = Box<dyn Fn(&RenderConfig) -> String>;

/// Key function plus vertex and fragment source functions.
///
/// Installing a generator (see `ShaderContext::set_generator`) always clears
/// the program cache, since programs built by another generator are
/// meaningless under the new one.
pub struct ShaderGenerator {
    key_fn: KeyFn,
    vertex_fn: SourceFn,
    fragment_fn: SourceFn,
    custom: bool,
}

impl Default for ShaderGenerator {
    fn default() -> Self {
        Self {
            key_fn: Box::new(ShaderKey::encode),
            vertex_fn: Box::new(default_vertex_source),
            fragment_fn: Box::new(default_fragment_source),
            custom: false,
        }
    }
}

impl fmt::Debug for ShaderGenerator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShaderGenerator")
            .field("custom", &self.custom)
            .finish_non_exhaustive()
    }
}

impl ShaderGenerator {
    /// Builds a generator; each `None` falls back to the built-in function.
    #[must_use]
    pub fn new(
        key_fn: Option<KeyFn>,
        vertex_fn: Option<SourceFn>,
        fragment_fn: Option<SourceFn>,
    ) -> Self {
        let mut generator = Self::default();
        if let Some(f) = key_fn {
            generator.key_fn = f;
            generator.custom = true;
        }
        if let Some(f) = vertex_fn {
            generator.vertex_fn = f;
            generator.custom = true;
        }
        if let Some(f) = fragment_fn {
            generator.fragment_fn = f;
            generator.custom = true;
        }
        generator
    }

    #[must_use]
    pub fn with_key_fn(self, f: impl Fn(&RenderConfig) -> Option<ShaderKey> + 'static) -> Self {
        Self {
            key_fn: Box::new(f),
            custom: true,
            ..self
        }
    }

    #[must_use]
    pub fn with_vertex_source(self, f: impl Fn(&RenderConfig) -> String + 'static) -> Self {
        Self {
            vertex_fn: Box::new(f),
            custom: true,
            ..self
        }
    }

    #[must_use]
    pub fn with_fragment_source(self, f: impl Fn(&RenderConfig) -> String + 'static) -> Self {
        Self {
            fragment_fn: Box::new(f),
            custom: true,
            ..self
        }
    }

    /// Whether any function was replaced.
    #[inline]
    #[must_use]
    pub fn is_custom(&self) -> bool {
        self.custom
    }

    #[must_use]
    pub fn key(&self, config: &RenderConfig) -> Option<ShaderKey> {
        (self.key_fn)(config)
    }

    #[must_use]
    pub fn vertex_source(&self, config: &RenderConfig) -> String {
        (self.vertex_fn)(config)
    }

    #[must_use]
    pub fn fragment_source(&self, config: &RenderConfig) -> String {
        (self.fragment_fn)(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::key::{AlphaCompare, PrimitiveClass};

    #[test]
    fn minimal_config_sources() {
        let config = RenderConfig::default();
        let vs = default_vertex_source(&config);
        let fs = default_fragment_source(&config);

        assert!(vs.contains("uniform highp mat4 transform;"));
        assert!(vs.contains("attribute highp vec3 a_position;"));
        assert!(vs.contains("vec4(a_position, 1.0)"));
        assert!(!vs.contains("a_texcoord"));
        assert!(!vs.contains("gl_PointSize"));
        assert!(!vs.contains("#version"));

        assert!(fs.contains("lowp vec4 color = vec4(1.0);"));
        assert!(fs.contains("color_out = color;"));
        assert!(!fs.contains("discard"));
    }

    #[test]
    fn full_featured_points() {
        let config = RenderConfig {
            primitive: PrimitiveClass::Points,
            position_size: 2,
            texcoord_size: 2,
            texture: TextureChannels::Alpha,
            texture_offset: true,
            color_size: 3,
            fixed_color: true,
            fog: true,
            alpha_test: true,
            alpha_compare: AlphaCompare::GreaterEqual,
        };
        let vs = default_vertex_source(&config);
        let fs = default_fragment_source(&config);

        assert!(vs.contains("vec4(a_position, 0.0, 1.0)"));
        assert!(vs.contains("v_texcoord = a_texcoord + tex_offset;"));
        assert!(vs.contains("attribute lowp vec3 a_color;"));
        assert!(vs.contains("v_color = color * fixed_color;"));
        assert!(vs.contains("v_fog_depth = dot(fog_z, position);"));
        assert!(vs.contains("gl_PointSize = point_size;"));

        assert!(fs.contains("color.a *= texture2D(texture0, v_texcoord).r;"));
        assert!(fs.contains("if (!(color.a >= alpha_ref))"));
        assert!(fs.contains("mix(fog_color.rgb, color.rgb, fog_factor)"));
        assert!(!fs.contains("uniform lowp vec4 fixed_color;"));
    }

    #[test]
    fn fixed_color_without_vertex_color_lives_in_fragment() {
        let config = RenderConfig {
            fixed_color: true,
            texcoord_size: 2,
            texture: TextureChannels::Luminance,
            ..Default::default()
        };
        let vs = default_vertex_source(&config);
        let fs = default_fragment_source(&config);
        assert!(!vs.contains("fixed_color"));
        assert!(fs.contains("uniform lowp vec4 fixed_color;"));
        assert!(fs.contains("color.rgb *= texture2D(texture0, v_texcoord).r;"));
    }

    #[test]
    fn partial_generator_falls_back_to_builtins() {
        let generator = ShaderGenerator::new(None, Some(Box::new(|_| String::new())), None);
        let config = RenderConfig::default();
        assert!(generator.is_custom());
        assert_eq!(generator.key(&config), ShaderKey::encode(&config));
        assert!(generator.vertex_source(&config).is_empty());
        assert!(!generator.fragment_source(&config).is_empty());
    }
}
