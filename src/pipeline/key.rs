//! Render configuration → shader key.
//!
//! A [`RenderConfig`] is built on the stack for every draw. It is only used to
//! derive a [`ShaderKey`] and, on a cache miss, to drive source synthesis.
//!
//! The default key is a mixed-radix number. Each field is a digit whose radix
//! is the number of legal values for that field; the primitive class is the
//! most significant digit:
//!
//! | Digit            | Radix | Values                      |
//! |------------------|-------|-----------------------------|
//! | primitive class  | 3     | points, lines, triangles    |
//! | position size    | 3     | 2, 3, 4                     |
//! | texcoord size    | 2     | 0, 2                        |
//! | texture channels | 4     | none, rgba, alpha, lum.     |
//! | texture offset   | 2     | off, on                     |
//! | color size       | 3     | 0, 3, 4                     |
//! | fixed color      | 2     | off, on                     |
//! | fog              | 2     | off, on                     |
//! | alpha test       | 5     | off, <, <=, >=, >           |

use std::fmt;

use serde::{Deserialize, Serialize};

/// Primitive topology class. Only points need distinct shaders (point size).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum PrimitiveClass {
    Points,
    Lines,
    #[default]
    Triangles,
}

/// Channel layout of the bound texture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum TextureChannels {
    /// No texture is sampled.
    #[default]
    None,
    /// Full color texture.
    Rgba,
    /// Alpha-only texture stored in the red channel.
    Alpha,
    /// Luminance-only texture stored in the red channel.
    Luminance,
}

/// Comparison function as tracked by the render state.
///
/// Only `Less`, `LessEqual`, `GreaterEqual` and `Greater` can be expressed by
/// the generated alpha test.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum AlphaCompare {
    Never,
    Less,
    Equal,
    LessEqual,
    Greater,
    NotEqual,
    GreaterEqual,
    #[default]
    Always,
}

impl AlphaCompare {
    /// GLSL operator for the supported comparisons.
    #[must_use]
    pub fn glsl_operator(self) -> Option<&'static str> {
        match self {
            AlphaCompare::Less => Some("<"),
            AlphaCompare::LessEqual => Some("<="),
            AlphaCompare::GreaterEqual => Some(">="),
            AlphaCompare::Greater => Some(">"),
            _ => None,
        }
    }
}

/// Per-draw shader-relevant state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RenderConfig {
    pub primitive: PrimitiveClass,
    /// Components per vertex position (2, 3 or 4).
    pub position_size: u8,
    /// Components per texture coordinate (0 or 2).
    pub texcoord_size: u8,
    pub texture: TextureChannels,
    /// Texture coordinates are offset by the `tex_offset` uniform.
    pub texture_offset: bool,
    /// Components per vertex color (0, 3 or 4).
    pub color_size: u8,
    /// A uniform color modulates the output.
    pub fixed_color: bool,
    pub fog: bool,
    pub alpha_test: bool,
    /// Ignored unless `alpha_test` is set.
    pub alpha_compare: AlphaCompare,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            primitive: PrimitiveClass::Triangles,
            position_size: 3,
            texcoord_size: 0,
            texture: TextureChannels::None,
            texture_offset: false,
            color_size: 0,
            fixed_color: false,
            fog: false,
            alpha_test: false,
            alpha_compare: AlphaCompare::Always,
        }
    }
}

impl RenderConfig {
    #[inline]
    #[must_use]
    pub fn is_points(&self) -> bool {
        self.primitive == PrimitiveClass::Points
    }

    #[inline]
    #[must_use]
    pub fn has_texcoord(&self) -> bool {
        self.texcoord_size > 0
    }

    #[inline]
    #[must_use]
    pub fn has_texture(&self) -> bool {
        self.texture != TextureChannels::None
    }

    #[inline]
    #[must_use]
    pub fn has_vertex_color(&self) -> bool {
        self.color_size > 0
    }

    /// The alpha comparison in effect, if alpha testing is on.
    #[inline]
    #[must_use]
    pub fn active_alpha_compare(&self) -> Option<AlphaCompare> {
        self.alpha_test.then_some(self.alpha_compare)
    }
}

// ─── ShaderKey ───────────────────────────────────────────────────────────────

/// Dense 32-bit identifier of a cacheable render configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ShaderKey(pub u32);

impl fmt::Display for ShaderKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#06x}", self.0)
    }
}

const PRIMITIVES: [PrimitiveClass; 3] = [
    PrimitiveClass::Points,
    PrimitiveClass::Lines,
    PrimitiveClass::Triangles,
];
const POSITION_SIZES: [u8; 3] = [2, 3, 4];
const TEXCOORD_SIZES: [u8; 2] = [0, 2];
const CHANNELS: [TextureChannels; 4] = [
    TextureChannels::None,
    TextureChannels::Rgba,
    TextureChannels::Alpha,
    TextureChannels::Luminance,
];
const COLOR_SIZES: [u8; 3] = [0, 3, 4];
/// Index 0 is "alpha test off".
const ALPHA_TESTS: [Option<AlphaCompare>; 5] = [
    None,
    Some(AlphaCompare::Less),
    Some(AlphaCompare::LessEqual),
    Some(AlphaCompare::GreaterEqual),
    Some(AlphaCompare::Greater),
];

/// Radix of each digit, most significant first.
const RADICES: [u32; 9] = [3, 3, 2, 4, 2, 3, 2, 2, 5];

fn digit<T: PartialEq>(domain: &[T], value: &T) -> Option<u32> {
    domain.iter().position(|v| v == value).map(|i| i as u32)
}

impl ShaderKey {
    /// Number of distinct keys produced by [`ShaderKey::encode`].
    pub const COUNT: u32 = 3 * 3 * 2 * 4 * 2 * 3 * 2 * 2 * 5;

    /// The default key function.
    ///
    /// Returns `None` when any field is outside its domain, when texturing or
    /// a texture offset is requested without texture coordinates, or when the
    /// alpha test uses an unsupported comparison.
    #[must_use]
    pub fn encode(config: &RenderConfig) -> Option<ShaderKey> {
        if !config.has_texcoord() && (config.has_texture() || config.texture_offset) {
            return None;
        }

        let alpha = if config.alpha_test {
            digit(&ALPHA_TESTS, &Some(config.alpha_compare))?
        } else {
            0
        };

        let digits = [
            digit(&PRIMITIVES, &config.primitive)?,
            digit(&POSITION_SIZES, &config.position_size)?,
            digit(&TEXCOORD_SIZES, &config.texcoord_size)?,
            digit(&CHANNELS, &config.texture)?,
            u32::from(config.texture_offset),
            digit(&COLOR_SIZES, &config.color_size)?,
            u32::from(config.fixed_color),
            u32::from(config.fog),
            alpha,
        ];

        let key = digits
            .iter()
            .zip(RADICES)
            .fold(0u32, |acc, (&d, radix)| acc * radix + d);
        Some(ShaderKey(key))
    }

    /// Inverse of [`ShaderKey::encode`].
    ///
    /// Returns the canonical configuration (alpha compare `Always` when the
    /// alpha test is off), or `None` for keys outside the encoded range or
    /// keys whose digits describe an unencodable combination.
    #[must_use]
    pub fn decode(self) -> Option<RenderConfig> {
        if self.0 >= Self::COUNT {
            return None;
        }

        let mut digits = [0u32; 9];
        let mut rest = self.0;
        for (slot, radix) in digits.iter_mut().zip(RADICES).rev() {
            *slot = rest % radix;
            rest /= radix;
        }

        let alpha = ALPHA_TESTS[digits[8] as usize];
        let config = RenderConfig {
            primitive: PRIMITIVES[digits[0] as usize],
            position_size: POSITION_SIZES[digits[1] as usize],
            texcoord_size: TEXCOORD_SIZES[digits[2] as usize],
            texture: CHANNELS[digits[3] as usize],
            texture_offset: digits[4] == 1,
            color_size: COLOR_SIZES[digits[5] as usize],
            fixed_color: digits[6] == 1,
            fog: digits[7] == 1,
            alpha_test: alpha.is_some(),
            alpha_compare: alpha.unwrap_or(AlphaCompare::Always),
        };

        (Self::encode(&config) == Some(self)).then_some(config)
    }

    #[inline]
    #[must_use]
    pub fn raw(self) -> u32 {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn primitive_class_is_most_significant_digit() {
        let points = ShaderKey::encode(&RenderConfig {
            primitive: PrimitiveClass::Points,
            ..Default::default()
        })
        .unwrap();
        let lines = ShaderKey::encode(&RenderConfig {
            primitive: PrimitiveClass::Lines,
            ..Default::default()
        })
        .unwrap();
        assert_eq!(lines.0 - points.0, ShaderKey::COUNT / 3);
    }

    #[test]
    fn alpha_compare_ignored_when_alpha_test_off() {
        let a = RenderConfig {
            alpha_compare: AlphaCompare::Never,
            ..Default::default()
        };
        let b = RenderConfig::default();
        assert_eq!(ShaderKey::encode(&a), ShaderKey::encode(&b));
    }

    #[test]
    fn decode_rejects_out_of_range() {
        assert_eq!(ShaderKey(ShaderKey::COUNT).decode(), None);
        assert_eq!(ShaderKey(u32::MAX).decode(), None);
    }
}
