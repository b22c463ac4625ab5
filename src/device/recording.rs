//! In-memory [`GlDevice`].
//!
//! Behaves like a permissive driver: every non-empty source compiles, every
//! program links, and uniform/attribute tables are read from the GLSL
//! declarations. Failures can be injected with marker substrings. All calls
//! are counted so callers can check exactly what reached the "driver".
//!
//! Calls that name an object the device does not know about (deleted, never
//! created, or dropped by [`lose_context`](RecordingDevice::lose_context)) are
//! counted in [`DeviceCounters::invalid_calls`].

use std::num::NonZeroU32;

use rustc_hash::FxHashMap;
use smallvec::SmallVec;

use super::{GlDevice, NativePipeline, NativeProgram, NativeShader, StageMask, UniformLocation};
use crate::pipeline::ShaderStage;
use crate::pipeline::uniforms::UniformValue;
use crate::worker::BinaryCompiler;

/// Prefix of the binaries understood by [`RecordingDevice`].
const BINARY_MAGIC: &[u8] = b"RECBIN\0";

#[derive(Debug, Clone)]
struct ShaderRecord {
    stage: ShaderStage,
    source: String,
    compiled: bool,
}

#[derive(Debug, Clone, Default)]
struct ProgramRecord {
    shaders: SmallVec<[NativeShader; 2]>,
    separable: bool,
    linked: bool,
    requested_attributes: FxHashMap<String, u32>,
    /// Location is the index.
    uniforms: Vec<String>,
    attributes: Vec<(String, u32)>,
    values: FxHashMap<i32, UniformValue>,
}

/// Call counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeviceCounters {
    pub shaders_created: u32,
    pub compiles: u32,
    pub binary_loads: u32,
    pub shaders_deleted: u32,
    pub programs_created: u32,
    pub links: u32,
    pub programs_deleted: u32,
    pub pipelines_created: u32,
    pub pipelines_deleted: u32,
    pub use_program_calls: u32,
    pub uniform_calls: u32,
    pub program_uniform_calls: u32,
    pub invalid_calls: u32,
}

/// One uniform upload, in call order.
#[derive(Debug, Clone, PartialEq)]
pub struct UniformWrite {
    pub program: NativeProgram,
    pub name: String,
    pub value: UniformValue,
}

/// Headless device that records everything.
#[derive(Debug, Default)]
pub struct RecordingDevice {
    next_name: u32,
    shaders: FxHashMap<NativeShader, ShaderRecord>,
    programs: FxHashMap<NativeProgram, ProgramRecord>,
    pipelines: FxHashMap<NativePipeline, [Option<NativeProgram>; 2]>,
    current_program: Option<NativeProgram>,
    current_pipeline: Option<NativePipeline>,
    /// Sources containing this substring fail to compile.
    pub compile_failure_marker: Option<String>,
    /// Programs whose sources contain this substring fail to link.
    pub link_failure_marker: Option<String>,
    /// Whether [`GlDevice::load_shader_binary`] accepts well-formed binaries.
    pub accept_binaries: bool,
    pub counters: DeviceCounters,
    pub uniform_writes: Vec<UniformWrite>,
}

fn declaration_names<'a>(source: &'a str, keywords: &'a [&str]) -> impl Iterator<Item = &'a str> {
    source
        .lines()
        .map(str::trim)
        .filter(move |line| keywords.iter().any(|k| line.starts_with(k)))
        .flat_map(|line| {
            let mut declarators = line.trim_end_matches(';').split(',');
            let first = declarators
                .next()
                .and_then(|d| d.split_whitespace().last());
            first.into_iter().chain(declarators.map(str::trim))
        })
        .map(|name| name.split('[').next().unwrap_or(name).trim())
        .filter(|name| !name.is_empty())
}

impl RecordingDevice {
    #[must_use]
    pub fn new() -> Self {
        Self {
            accept_binaries: true,
            ..Default::default()
        }
    }

    fn next(&mut self) -> NonZeroU32 {
        self.next_name += 1;
        NonZeroU32::new(self.next_name).unwrap_or(NonZeroU32::MIN)
    }

    /// Drops every object, as a driver does when its context goes away.
    /// Names are never reused.
    pub fn lose_context(&mut self) {
        self.shaders.clear();
        self.programs.clear();
        self.pipelines.clear();
        self.current_program = None;
        self.current_pipeline = None;
    }

    #[must_use]
    pub fn live_shaders(&self) -> usize {
        self.shaders.len()
    }

    #[must_use]
    pub fn live_programs(&self) -> usize {
        self.programs.len()
    }

    #[must_use]
    pub fn live_pipelines(&self) -> usize {
        self.pipelines.len()
    }

    #[must_use]
    pub fn current_program(&self) -> Option<NativeProgram> {
        self.current_program
    }

    #[must_use]
    pub fn current_pipeline(&self) -> Option<NativePipeline> {
        self.current_pipeline
    }

    /// Programs attached to a pipeline (vertex, fragment).
    #[must_use]
    pub fn pipeline_stages(&self, pipeline: NativePipeline) -> Option<[Option<NativeProgram>; 2]> {
        self.pipelines.get(&pipeline).copied()
    }

    #[must_use]
    pub fn is_separable(&self, program: NativeProgram) -> bool {
        self.programs.get(&program).is_some_and(|p| p.separable)
    }

    /// Last value uploaded to `name` in `program`.
    #[must_use]
    pub fn uniform_value(&self, program: NativeProgram, name: &str) -> Option<UniformValue> {
        let record = self.programs.get(&program)?;
        let location = record.uniforms.iter().position(|u| u == name)?;
        record.values.get(&(location as i32)).copied()
    }

    /// Uniform names of a linked program, in location order.
    #[must_use]
    pub fn program_uniforms(&self, program: NativeProgram) -> Option<&[String]> {
        self.programs.get(&program).map(|p| p.uniforms.as_slice())
    }

    /// Number of compiled sources containing `needle`.
    #[must_use]
    pub fn compiled_sources_containing(&self, needle: &str) -> usize {
        self.shaders
            .values()
            .filter(|s| s.compiled && s.source.contains(needle))
            .count()
    }

    fn write_uniform(&mut self, program: NativeProgram, location: UniformLocation, value: &UniformValue) {
        let Some(record) = self.programs.get_mut(&program) else {
            self.counters.invalid_calls += 1;
            return;
        };
        let Some(name) = usize::try_from(location.0)
            .ok()
            .and_then(|i| record.uniforms.get(i))
        else {
            self.counters.invalid_calls += 1;
            return;
        };
        self.uniform_writes.push(UniformWrite {
            program,
            name: name.clone(),
            value: *value,
        });
        record.values.insert(location.0, *value);
    }
}

impl GlDevice for RecordingDevice {
    fn create_shader(&mut self, stage: ShaderStage) -> Option<NativeShader> {
        let shader = NativeShader(self.next());
        self.shaders.insert(
            shader,
            ShaderRecord {
                stage,
                source: String::new(),
                compiled: false,
            },
        );
        self.counters.shaders_created += 1;
        Some(shader)
    }

    fn compile_shader(&mut self, shader: NativeShader, sources: &[&str]) -> Result<(), String> {
        let marker = self.compile_failure_marker.clone();
        let Some(record) = self.shaders.get_mut(&shader) else {
            self.counters.invalid_calls += 1;
            return Err("invalid shader".to_owned());
        };
        self.counters.compiles += 1;
        record.source = sources.concat();
        if let Some(marker) = marker
            && record.source.contains(&marker)
        {
            record.compiled = false;
            return Err(format!("0:1: error: forced failure `{marker}`"));
        }
        record.compiled = true;
        Ok(())
    }

    fn load_shader_binary(&mut self, shader: NativeShader, binary: &[u8]) -> Result<(), String> {
        let accept = self.accept_binaries;
        let Some(record) = self.shaders.get_mut(&shader) else {
            self.counters.invalid_calls += 1;
            return Err("invalid shader".to_owned());
        };
        if !accept {
            return Err("binary formats unsupported".to_owned());
        }
        let source = binary
            .strip_prefix(BINARY_MAGIC)
            .and_then(|rest| std::str::from_utf8(rest).ok())
            .ok_or_else(|| "unrecognized binary".to_owned())?;
        self.counters.binary_loads += 1;
        record.source = source.to_owned();
        record.compiled = true;
        Ok(())
    }

    fn delete_shader(&mut self, shader: NativeShader) {
        if self.shaders.remove(&shader).is_some() {
            self.counters.shaders_deleted += 1;
        } else {
            self.counters.invalid_calls += 1;
        }
    }

    fn create_program(&mut self) -> Option<NativeProgram> {
        let program = NativeProgram(self.next());
        self.programs.insert(program, ProgramRecord::default());
        self.counters.programs_created += 1;
        Some(program)
    }

    fn set_program_separable(&mut self, program: NativeProgram, separable: bool) {
        match self.programs.get_mut(&program) {
            Some(record) => record.separable = separable,
            None => self.counters.invalid_calls += 1,
        }
    }

    fn attach_shader(&mut self, program: NativeProgram, shader: NativeShader) {
        match (self.programs.get_mut(&program), self.shaders.contains_key(&shader)) {
            (Some(record), true) => record.shaders.push(shader),
            _ => self.counters.invalid_calls += 1,
        }
    }

    fn detach_shader(&mut self, program: NativeProgram, shader: NativeShader) {
        match self.programs.get_mut(&program) {
            Some(record) => record.shaders.retain(|s| *s != shader),
            None => self.counters.invalid_calls += 1,
        }
    }

    fn bind_attrib_location(&mut self, program: NativeProgram, index: u32, name: &str) {
        match self.programs.get_mut(&program) {
            Some(record) => {
                record.requested_attributes.insert(name.to_owned(), index);
            }
            None => self.counters.invalid_calls += 1,
        }
    }

    fn link_program(&mut self, program: NativeProgram) -> Result<(), String> {
        let Some(record) = self.programs.get(&program) else {
            self.counters.invalid_calls += 1;
            return Err("invalid program".to_owned());
        };
        self.counters.links += 1;

        let mut uniforms: Vec<String> = Vec::new();
        let mut attributes: Vec<(String, u32)> = Vec::new();
        for shader in &record.shaders {
            let Some(shader) = self.shaders.get(shader) else {
                return Err("attached shader was deleted".to_owned());
            };
            if !shader.compiled {
                return Err("attached shader is not compiled".to_owned());
            }
            if let Some(marker) = &self.link_failure_marker
                && shader.source.contains(marker.as_str())
            {
                return Err(format!("error: forced link failure `{marker}`"));
            }
            for name in declaration_names(&shader.source, &["uniform "]) {
                if !uniforms.iter().any(|u| u == name) {
                    uniforms.push(name.to_owned());
                }
            }
            if shader.stage == ShaderStage::Vertex {
                for name in declaration_names(&shader.source, &["attribute ", "in "]) {
                    if !attributes.iter().any(|(a, _)| a == name) {
                        attributes.push((name.to_owned(), 0));
                    }
                }
            }
        }

        let mut next_free = 0;
        let taken: Vec<u32> = attributes
            .iter()
            .filter_map(|(name, _)| record.requested_attributes.get(name).copied())
            .collect();
        for (name, index) in &mut attributes {
            *index = match record.requested_attributes.get(name) {
                Some(&requested) => requested,
                None => {
                    while taken.contains(&next_free) {
                        next_free += 1;
                    }
                    next_free += 1;
                    next_free - 1
                }
            };
        }

        if let Some(record) = self.programs.get_mut(&program) {
            record.uniforms = uniforms;
            record.attributes = attributes;
            record.values.clear();
            record.linked = true;
        }
        Ok(())
    }

    fn delete_program(&mut self, program: NativeProgram) {
        if self.programs.remove(&program).is_some() {
            self.counters.programs_deleted += 1;
            if self.current_program == Some(program) {
                self.current_program = None;
            }
        } else {
            self.counters.invalid_calls += 1;
        }
    }

    fn use_program(&mut self, program: Option<NativeProgram>) {
        self.counters.use_program_calls += 1;
        if let Some(p) = program
            && !self.programs.get(&p).is_some_and(|r| r.linked)
        {
            self.counters.invalid_calls += 1;
            return;
        }
        self.current_program = program;
    }

    fn attrib_location(&mut self, program: NativeProgram, name: &str) -> Option<u32> {
        let record = self.programs.get(&program)?;
        record
            .attributes
            .iter()
            .find(|(a, _)| a == name)
            .map(|(_, index)| *index)
    }

    fn active_attribute_count(&mut self, program: NativeProgram) -> u32 {
        self.programs
            .get(&program)
            .map_or(0, |r| r.attributes.len() as u32)
    }

    fn uniform_location(&mut self, program: NativeProgram, name: &str) -> Option<UniformLocation> {
        let record = self.programs.get(&program)?;
        record
            .uniforms
            .iter()
            .position(|u| u == name)
            .map(|i| UniformLocation(i as i32))
    }

    fn uniform(&mut self, location: UniformLocation, value: &UniformValue) {
        self.counters.uniform_calls += 1;
        let Some(program) = self.current_program else {
            self.counters.invalid_calls += 1;
            return;
        };
        self.write_uniform(program, location, value);
    }

    fn program_uniform(
        &mut self,
        program: NativeProgram,
        location: UniformLocation,
        value: &UniformValue,
    ) {
        self.counters.program_uniform_calls += 1;
        self.write_uniform(program, location, value);
    }

    fn create_program_pipeline(&mut self) -> Option<NativePipeline> {
        let pipeline = NativePipeline(self.next());
        self.pipelines.insert(pipeline, [None, None]);
        self.counters.pipelines_created += 1;
        Some(pipeline)
    }

    fn use_program_stages(
        &mut self,
        pipeline: NativePipeline,
        stage: StageMask,
        program: Option<NativeProgram>,
    ) {
        let slot = match stage {
            StageMask::Vertex => 0,
            StageMask::Fragment => 1,
        };
        match self.pipelines.get_mut(&pipeline) {
            Some(stages) => stages[slot] = program,
            None => self.counters.invalid_calls += 1,
        }
    }

    fn bind_program_pipeline(&mut self, pipeline: Option<NativePipeline>) {
        if let Some(p) = pipeline
            && !self.pipelines.contains_key(&p)
        {
            self.counters.invalid_calls += 1;
            return;
        }
        self.current_pipeline = pipeline;
    }

    fn delete_program_pipeline(&mut self, pipeline: NativePipeline) {
        if self.pipelines.remove(&pipeline).is_some() {
            self.counters.pipelines_deleted += 1;
            if self.current_pipeline == Some(pipeline) {
                self.current_pipeline = None;
            }
        } else {
            self.counters.invalid_calls += 1;
        }
    }
}

/// Binary compiler producing blobs [`RecordingDevice`] accepts.
#[derive(Debug, Default, Clone, Copy)]
pub struct RecordingBinaryCompiler;

impl BinaryCompiler for RecordingBinaryCompiler {
    fn compile(&mut self, _stage: ShaderStage, sources: &[&str]) -> Result<Vec<u8>, String> {
        let source = sources.concat();
        if source.trim().is_empty() {
            return Err("empty source".to_owned());
        }
        let mut binary = BINARY_MAGIC.to_vec();
        binary.extend_from_slice(source.as_bytes());
        Ok(binary)
    }
}
