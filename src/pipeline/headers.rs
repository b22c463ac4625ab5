//! Dialect headers injected in front of generated GLSL.
//!
//! Generators write a neutral subset of GLSL: `attribute` / `varying`,
//! `texture2D`, precision qualifiers including the synthetic `texp`, and a
//! fragment output named `color_out`. The preamble built here adapts that
//! subset to the detected shading-language version. Generators never emit a
//! `#version` line themselves.

use crate::device::GlslVersion;
use crate::pipeline::ShaderStage;

const NO_PRECISION: &str = "\
#define lowp
#define mediump
#define highp
#define texp
";

const ES_FRAGMENT_PRECISION: &str = "\
#ifdef GL_FRAGMENT_PRECISION_HIGH
#define texp highp
#else
#define texp mediump
#endif
precision mediump float;
";

const MODERN_VERTEX: &str = "\
#define attribute in
#define varying out
#define texture2D texture
";

const MODERN_FRAGMENT: &str = "\
#define varying in
#define texture2D texture
out lowp vec4 color_out;
";

const LEGACY_FRAGMENT: &str = "#define color_out gl_FragColor\n";

const PER_VERTEX_BLOCK: &str = "\
out gl_PerVertex {
    vec4 gl_Position;
    float gl_PointSize;
};
";

/// `#version` line for the dialect.
#[must_use]
pub fn version_header(glsl: GlslVersion) -> String {
    format!("#version {glsl}\n")
}

/// Extension enables needed for separable stages below core support.
#[must_use]
pub fn separable_extension(glsl: GlslVersion) -> Option<&'static str> {
    match (glsl.es, glsl.version) {
        (true, v) if v < 310 => Some("#extension GL_EXT_separate_shader_objects : enable\n"),
        (false, v) if v < 410 => Some("#extension GL_ARB_separate_shader_objects : enable\n"),
        _ => None,
    }
}

/// Precision compatibility: strips qualifiers where the language lacks them
/// and defines `texp` as the best texture-coordinate precision of the stage.
#[must_use]
pub fn precision_header(glsl: GlslVersion, stage: ShaderStage) -> &'static str {
    if !glsl.has_precision_qualifiers() {
        return NO_PRECISION;
    }
    match (glsl.es, stage) {
        (true, ShaderStage::Fragment) => ES_FRAGMENT_PRECISION,
        _ => "#define texp highp\n",
    }
}

/// Bridges `attribute`/`varying`/`gl_FragColor` and `in`/`out`/`color_out`.
#[must_use]
pub fn compatibility_header(glsl: GlslVersion, stage: ShaderStage) -> &'static str {
    match (glsl.is_modern(), stage) {
        (true, ShaderStage::Vertex) => MODERN_VERTEX,
        (true, ShaderStage::Fragment) => MODERN_FRAGMENT,
        (false, ShaderStage::Vertex) => "",
        (false, ShaderStage::Fragment) => LEGACY_FRAGMENT,
    }
}

/// Complete preamble placed before a stage's source.
#[must_use]
pub fn preamble(glsl: GlslVersion, stage: ShaderStage, separable: bool) -> String {
    let mut out = version_header(glsl);
    if separable && let Some(ext) = separable_extension(glsl) {
        out.push_str(ext);
    }
    out.push_str(precision_header(glsl, stage));
    out.push_str(compatibility_header(glsl, stage));
    if separable && stage == ShaderStage::Vertex && glsl.requires_per_vertex_block() {
        out.push_str(PER_VERTEX_BLOCK);
    }
    // Keep driver line numbers aligned with the generator's source.
    out.push_str("#line 1\n");
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn legacy_es_fragment() {
        let p = preamble(GlslVersion::ES_100, ShaderStage::Fragment, false);
        assert!(p.starts_with("#version 100\n"));
        assert!(p.contains("GL_FRAGMENT_PRECISION_HIGH"));
        assert!(p.contains("#define color_out gl_FragColor"));
        assert!(!p.contains("#define varying in"));
    }

    #[test]
    fn modern_es_vertex_uses_in_out() {
        let p = preamble(GlslVersion::ES_300, ShaderStage::Vertex, false);
        assert!(p.starts_with("#version 300 es\n"));
        assert!(p.contains("#define attribute in"));
        assert!(p.contains("#define varying out"));
        assert!(p.contains("#define texp highp"));
    }

    #[test]
    fn old_desktop_strips_precision() {
        let p = preamble(GlslVersion::GL_120, ShaderStage::Fragment, false);
        assert!(p.contains("#define mediump\n"));
        assert!(p.contains("#define texp\n"));
    }

    #[test]
    fn separable_vertex_redeclares_per_vertex_when_required() {
        let core = preamble(GlslVersion::GL_410, ShaderStage::Vertex, true);
        assert!(core.contains("out gl_PerVertex"));
        assert!(!core.contains("#extension"));

        let arb = preamble(GlslVersion::GL_330, ShaderStage::Vertex, true);
        assert!(arb.contains("GL_ARB_separate_shader_objects"));
        assert!(!arb.contains("gl_PerVertex"));

        let linked = preamble(GlslVersion::GL_410, ShaderStage::Vertex, false);
        assert!(!linked.contains("gl_PerVertex"));

        let frag = preamble(GlslVersion::GL_410, ShaderStage::Fragment, true);
        assert!(!frag.contains("gl_PerVertex"));
    }
}
