//! Compile / link wrappers over the native device.
//!
//! Every source is submitted as two strings: the dialect preamble from
//! [`headers`](super::headers) and the generator's source, untouched.
//! Failures are returned to the caller with the driver's info log; in debug
//! builds the numbered wrapped source is logged as well.

use crate::device::{Capabilities, GlDevice, GlslVersion, NativeProgram, NativeShader};
use crate::errors::{Result, ShaderError};
use crate::pipeline::ShaderStage;
use crate::pipeline::headers;

/// Stateless helper bound to the active shading-language version.
#[derive(Debug, Clone, Copy)]
pub struct ShaderCompiler {
    glsl: GlslVersion,
    dump_failed_sources: bool,
}

impl ShaderCompiler {
    #[must_use]
    pub fn new(caps: &Capabilities, dump_failed_sources: bool) -> Self {
        Self {
            glsl: caps.glsl,
            dump_failed_sources,
        }
    }

    #[inline]
    #[must_use]
    pub fn glsl(&self) -> GlslVersion {
        self.glsl
    }

    /// Preamble that precedes `stage` source.
    #[must_use]
    pub fn preamble(&self, stage: ShaderStage, separable: bool) -> String {
        headers::preamble(self.glsl, stage, separable)
    }

    /// Compiles `source` into `shader`, or loads `binary` when one is given
    /// and the driver accepts it.
    pub fn compile(
        &self,
        device: &mut dyn GlDevice,
        shader: NativeShader,
        stage: ShaderStage,
        source: &str,
        separable: bool,
        binary: Option<&[u8]>,
    ) -> Result<()> {
        if source.trim().is_empty() {
            return Err(ShaderError::CompileFailed {
                stage,
                log: "empty source".to_owned(),
            });
        }

        if let Some(binary) = binary {
            match device.load_shader_binary(shader, binary) {
                Ok(()) => return Ok(()),
                Err(log) => {
                    log::debug!("Precompiled {stage} binary rejected ({log}); compiling source");
                }
            }
        }

        let preamble = self.preamble(stage, separable);
        match device.compile_shader(shader, &[&preamble, source]) {
            Ok(()) => Ok(()),
            Err(log) => {
                self.report(&format!("{stage} shader compilation"), &log, &[&preamble, source]);
                Err(ShaderError::CompileFailed { stage, log })
            }
        }
    }

    /// Binds attribute indices and links `program`.
    pub fn link(
        &self,
        device: &mut dyn GlDevice,
        program: NativeProgram,
        attributes: &[(u32, &str)],
    ) -> Result<()> {
        for &(index, name) in attributes {
            device.bind_attrib_location(program, index, name);
        }
        device.link_program(program).map_err(|log| {
            self.report("program link", &log, &[]);
            ShaderError::LinkFailed(log)
        })
    }

    /// Builds a single-stage separable program (the `glCreateShaderProgramv`
    /// sequence). The intermediate shader object is always deleted.
    pub fn build_separable_stage(
        &self,
        device: &mut dyn GlDevice,
        stage: ShaderStage,
        source: &str,
        attributes: &[(u32, &str)],
        binary: Option<&[u8]>,
    ) -> Result<NativeProgram> {
        let shader = device
            .create_shader(stage)
            .ok_or(ShaderError::CreateFailed("shader"))?;

        if let Err(e) = self.compile(device, shader, stage, source, true, binary) {
            device.delete_shader(shader);
            return Err(e);
        }

        let Some(program) = device.create_program() else {
            device.delete_shader(shader);
            return Err(ShaderError::CreateFailed("program"));
        };

        device.set_program_separable(program, true);
        device.attach_shader(program, shader);
        let linked = self.link(device, program, attributes);
        device.detach_shader(program, shader);
        device.delete_shader(shader);

        match linked {
            Ok(()) => Ok(program),
            Err(e) => {
                device.delete_program(program);
                Err(e)
            }
        }
    }

    fn report(&self, what: &str, log: &str, sources: &[&str]) {
        if !cfg!(debug_assertions) {
            return;
        }
        log::error!("{what} failed:\n{log}");
        if self.dump_failed_sources && !sources.is_empty() {
            let numbered: String = sources
                .concat()
                .lines()
                .enumerate()
                .map(|(i, line)| format!("{:4}: {line}\n", i + 1))
                .collect();
            log::error!("================= Failed Shader Source ==================\n{numbered}");
        }
    }
}
