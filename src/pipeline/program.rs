//! Stage / pipeline arena and the two uniform protocols.
//!
//! A **stage** is one compiled vertex or fragment shader. A **pipeline**
//! combines up to one stage of each kind and is what gets bound for drawing.
//! How both are realised depends on the device, fixed for the registry's
//! lifetime:
//!
//! | Mode        | Stage object                     | Pipeline object           | Uniforms                         |
//! |-------------|----------------------------------|---------------------------|----------------------------------|
//! | `Separable` | single-stage separable program   | native program pipeline   | set on the stage program at once |
//! | `Linked`    | shader object + [`UniformStore`] | one linked program        | stored per stage, pushed on sync |
//!
//! # Linked uniform sync
//!
//! Uniform values belong to a stage, but a linked program merges both stages.
//! Each stage therefore keeps its values locally and bumps a store generation
//! on every change. A linked pipeline remembers the last store generation it
//! pushed for each of its stages and, when bound, only pushes values changed
//! since then. Relinking resets the remembered generations, so a new program
//! receives every stored value with freshly resolved locations.
//!
//! Same-named uniforms in both stages share one location in a linked program;
//! callers must keep such pairs set to the same value.
//!
//! # Ownership graph
//!
//! Stages and pipelines live in slot maps. A pipeline holds the ids of its
//! stages; a stage holds the ids of the pipelines using it. Destroying a stage
//! detaches it from each of those pipelines.
//!
//! # Device generation
//!
//! Every native handle is stored as a [`Generational`]. Calls that touch an
//! object from an older generation are logged and rejected. Destroying such
//! an object frees the host side only.

use rustc_hash::FxHashMap;
use slotmap::{SlotMap, new_key_type};
use smallvec::SmallVec;

use crate::device::{
    DeviceGeneration, GlDevice, Generational, NativePipeline, NativeProgram, NativeShader,
    StageMask, UniformLocation,
};
use crate::errors::{Result, ShaderError};
use crate::pipeline::ShaderStage;
use crate::pipeline::compiler::ShaderCompiler;
use crate::pipeline::uniforms::{
    AttributeBindings, FIRST_USER_ATTRIBUTE, StandardAttribute, UniformBinding, UniformStore,
    UniformValue,
};

new_key_type! {
    /// Handle to a compiled shader stage.
    pub struct StageId;
    /// Handle to a pipeline (a bindable combination of stages).
    pub struct PipelineId;
}

// ─── Stages ──────────────────────────────────────────────────────────────────

#[derive(Debug)]
enum StageKind {
    Separable {
        program: Generational<NativeProgram>,
        locations: FxHashMap<String, Option<UniformLocation>>,
    },
    Linked {
        shader: Generational<NativeShader>,
        uniforms: UniformStore,
        /// Uniform names declared by the source, used to route values.
        declared: Vec<String>,
    },
}

#[derive(Debug)]
struct StageObject {
    stage: ShaderStage,
    generation: DeviceGeneration,
    kind: StageKind,
    /// Vertex inputs of a separable vertex stage.
    attributes: AttributeBindings,
    pipelines: SmallVec<[PipelineId; 4]>,
}

// ─── Pipelines ───────────────────────────────────────────────────────────────

#[derive(Debug)]
struct SeparablePipeline {
    pipeline: Generational<NativePipeline>,
}

#[derive(Debug, Default)]
struct LinkedPipeline {
    /// `None` until linked, and again after a stage is swapped.
    program: Option<Generational<NativeProgram>>,
    /// Store generation last pushed, per stage.
    synced: [u64; 2],
    locations: FxHashMap<String, Option<UniformLocation>>,
    attributes: AttributeBindings,
}

/// The two ways of realising a pipeline.
#[derive(Debug)]
enum Program {
    Separable(SeparablePipeline),
    Linked(LinkedPipeline),
}

#[derive(Debug)]
struct PipelineObject {
    generation: DeviceGeneration,
    stages: [Option<StageId>; 2],
    program: Program,
}

// ─── Registry ────────────────────────────────────────────────────────────────

/// Owner of every stage and pipeline created on the rendering thread.
#[derive(Debug)]
pub struct ProgramRegistry {
    separable: bool,
    compiler: ShaderCompiler,
    generation: DeviceGeneration,
    stages: SlotMap<StageId, StageObject>,
    pipelines: SlotMap<PipelineId, PipelineObject>,
    bound: Option<PipelineId>,
    /// Link-time attribute indices (standard attributes first, then user ones).
    attribute_names: Vec<(u32, String)>,
}

fn stale(what: &'static str) -> ShaderError {
    log::warn!("Ignoring call on stale {what} from a previous device generation");
    ShaderError::StaleHandle(what)
}

/// Names declared by `uniform` lines of a GLSL source, including every
/// declarator of `uniform vec4 a, b[2];`.
fn declared_uniforms(source: &str) -> Vec<String> {
    source
        .lines()
        .map(str::trim)
        .filter(|line| line.starts_with("uniform "))
        .flat_map(|line| {
            let mut declarators = line.trim_end_matches(';').split(',');
            let first = declarators
                .next()
                .and_then(|d| d.split_whitespace().last());
            first.into_iter().chain(declarators.map(str::trim))
        })
        .map(|name| name.split('[').next().unwrap_or(name).trim())
        .filter(|name| !name.is_empty())
        .map(str::to_owned)
        .collect()
}

impl ProgramRegistry {
    #[must_use]
    pub fn new(separable: bool, compiler: ShaderCompiler) -> Self {
        let attribute_names = StandardAttribute::ALL
            .iter()
            .map(|a| (a.index(), a.name().to_owned()))
            .collect();
        Self {
            separable,
            compiler,
            generation: DeviceGeneration::new(),
            stages: SlotMap::with_key(),
            pipelines: SlotMap::with_key(),
            bound: None,
            attribute_names,
        }
    }

    #[inline]
    #[must_use]
    pub fn is_separable(&self) -> bool {
        self.separable
    }

    #[inline]
    #[must_use]
    pub fn generation(&self) -> DeviceGeneration {
        self.generation
    }

    #[inline]
    #[must_use]
    pub fn compiler(&self) -> &ShaderCompiler {
        &self.compiler
    }

    #[inline]
    #[must_use]
    pub fn bound(&self) -> Option<PipelineId> {
        self.bound
    }

    #[must_use]
    pub fn stage_count(&self) -> usize {
        self.stages.len()
    }

    #[must_use]
    pub fn pipeline_count(&self) -> usize {
        self.pipelines.len()
    }

    /// Marks every existing object stale. Nothing native is touched.
    pub fn bump_generation(&mut self) {
        self.generation.bump();
        self.bound = None;
    }

    /// Switches mode and compiler for a new device.
    ///
    /// Objects left over from the old device must already be stale.
    pub fn reconfigure(&mut self, separable: bool, compiler: ShaderCompiler) {
        self.separable = separable;
        self.compiler = compiler;
    }

    /// Replaces the user attributes appended after the standard ones.
    pub fn set_user_attributes<'a>(&mut self, names: impl IntoIterator<Item = (u32, &'a str)>) {
        self.attribute_names.truncate(StandardAttribute::ALL.len());
        self.attribute_names
            .extend(names.into_iter().map(|(i, n)| (i, n.to_owned())));
    }

    fn attribute_list(&self) -> Vec<(u32, &str)> {
        self.attribute_names
            .iter()
            .map(|(i, n)| (*i, n.as_str()))
            .collect()
    }

    fn query_attributes(&self, device: &mut dyn GlDevice, program: NativeProgram) -> AttributeBindings {
        let mut bindings = AttributeBindings {
            input_count: device.active_attribute_count(program),
            ..Default::default()
        };
        for (index, name) in &self.attribute_names {
            let location = device.attrib_location(program, name);
            match *index {
                i if i == StandardAttribute::Position.index() => bindings.position = location,
                i if i == StandardAttribute::TexCoord.index() => bindings.texcoord = location,
                i if i == StandardAttribute::Color.index() => bindings.color = location,
                i if i >= FIRST_USER_ATTRIBUTE => bindings.user.push(location),
                _ => {}
            }
        }
        bindings
    }

    // ── Stages ───────────────────────────────────────────────────────────────

    /// Compiles a stage. `binary` is a precompiled blob to try first.
    pub fn create_stage(
        &mut self,
        device: &mut dyn GlDevice,
        stage: ShaderStage,
        source: &str,
        binary: Option<&[u8]>,
    ) -> Result<StageId> {
        let generation = self.generation;

        let (kind, attributes) = if self.separable {
            let attrs = if stage == ShaderStage::Vertex {
                self.attribute_list()
            } else {
                Vec::new()
            };
            let program = self
                .compiler
                .build_separable_stage(device, stage, source, &attrs, binary)?;
            let attributes = if stage == ShaderStage::Vertex {
                self.query_attributes(device, program)
            } else {
                AttributeBindings::default()
            };
            (
                StageKind::Separable {
                    program: Generational::new(program, generation),
                    locations: FxHashMap::default(),
                },
                attributes,
            )
        } else {
            let shader = device
                .create_shader(stage)
                .ok_or(ShaderError::CreateFailed("shader"))?;
            if let Err(e) = self
                .compiler
                .compile(device, shader, stage, source, false, binary)
            {
                device.delete_shader(shader);
                return Err(e);
            }
            (
                StageKind::Linked {
                    shader: Generational::new(shader, generation),
                    uniforms: UniformStore::new(),
                    declared: declared_uniforms(source),
                },
                AttributeBindings::default(),
            )
        };

        Ok(self.stages.insert(StageObject {
            stage,
            generation,
            kind,
            attributes,
            pipelines: SmallVec::new(),
        }))
    }

    /// Stage kind of a live stage.
    #[must_use]
    pub fn stage_kind(&self, id: StageId) -> Option<ShaderStage> {
        self.stages.get(id).map(|s| s.stage)
    }

    /// Pipelines currently using a stage.
    #[must_use]
    pub fn stage_users(&self, id: StageId) -> Option<&[PipelineId]> {
        self.stages.get(id).map(|s| s.pipelines.as_slice())
    }

    /// Sets a uniform owned by a stage.
    ///
    /// Separable stages receive the value immediately. Linked stages store it;
    /// if the bound pipeline uses the stage the value is pushed right away.
    pub fn set_stage_uniform(
        &mut self,
        device: &mut dyn GlDevice,
        id: StageId,
        name: &str,
        value: UniformValue,
    ) -> Result<()> {
        let generation = self.generation;
        let stage = self
            .stages
            .get_mut(id)
            .ok_or(ShaderError::UnknownHandle("stage"))?;
        if stage.generation != generation {
            return Err(stale("stage"));
        }

        let sync = match &mut stage.kind {
            StageKind::Separable { program, locations } => {
                let program = program.get(generation).ok_or_else(|| stale("stage"))?;
                let location = *locations
                    .entry(name.to_owned())
                    .or_insert_with(|| device.uniform_location(program, name));
                if let Some(location) = location {
                    device.program_uniform(program, location, &value);
                }
                None
            }
            StageKind::Linked { uniforms, .. } => {
                let changed = uniforms.set(name, value);
                self.bound
                    .filter(|bound| changed && stage.pipelines.contains(bound))
            }
        };

        if let Some(bound) = sync {
            self.sync_linked(device, bound);
        }
        Ok(())
    }

    /// Value stored for a linked stage uniform.
    #[must_use]
    pub fn stored_uniform(&self, id: StageId, name: &str) -> Option<UniformValue> {
        match &self.stages.get(id)?.kind {
            StageKind::Linked { uniforms, .. } => uniforms.get(name).copied(),
            StageKind::Separable { .. } => None,
        }
    }

    /// Store generation of a linked stage.
    #[must_use]
    pub fn uniform_generation(&self, id: StageId) -> Option<u64> {
        match &self.stages.get(id)?.kind {
            StageKind::Linked { uniforms, .. } => Some(uniforms.generation()),
            StageKind::Separable { .. } => None,
        }
    }

    /// Destroys a stage and detaches it from every pipeline using it.
    pub fn destroy_stage(&mut self, device: &mut dyn GlDevice, id: StageId) {
        let Some(stage) = self.stages.remove(id) else {
            return;
        };
        let generation = self.generation;

        for pipeline_id in &stage.pipelines {
            if let Some(pipeline) = self.pipelines.get_mut(*pipeline_id) {
                pipeline.stages[stage.stage.index()] = None;
                let live = pipeline.generation == generation;
                match &mut pipeline.program {
                    Program::Separable(sep) => {
                        if live && let Some(native) = sep.pipeline.get(generation) {
                            device.use_program_stages(native, stage.stage.into(), None);
                        }
                    }
                    Program::Linked(linked) => {
                        if let Some(program) = linked.program.take()
                            && let Some(native) = program.get(generation)
                        {
                            device.delete_program(native);
                        }
                        if self.bound == Some(*pipeline_id) {
                            self.bound = None;
                        }
                    }
                }
            }
        }

        match stage.kind {
            StageKind::Separable { program, .. } => {
                if let Some(native) = program.get(generation) {
                    device.delete_program(native);
                }
            }
            StageKind::Linked { shader, .. } => {
                if let Some(native) = shader.get(generation) {
                    device.delete_shader(native);
                }
            }
        }
    }

    // ── Pipelines ────────────────────────────────────────────────────────────

    fn check_stage(&self, id: StageId, expected: ShaderStage) -> Result<()> {
        let stage = self
            .stages
            .get(id)
            .ok_or(ShaderError::UnknownHandle("stage"))?;
        if stage.generation != self.generation {
            return Err(stale("stage"));
        }
        if stage.stage != expected {
            return Err(ShaderError::UnknownHandle("stage of that kind"));
        }
        Ok(())
    }

    /// Creates a pipeline from up to one stage of each kind.
    ///
    /// Linked pipelines are linked immediately so link errors surface here.
    pub fn create_pipeline(
        &mut self,
        device: &mut dyn GlDevice,
        vertex: Option<StageId>,
        fragment: Option<StageId>,
    ) -> Result<PipelineId> {
        if let Some(id) = vertex {
            self.check_stage(id, ShaderStage::Vertex)?;
        }
        if let Some(id) = fragment {
            self.check_stage(id, ShaderStage::Fragment)?;
        }

        let generation = self.generation;
        let program = if self.separable {
            let native = device
                .create_program_pipeline()
                .ok_or(ShaderError::CreateFailed("program pipeline"))?;
            for id in [vertex, fragment].into_iter().flatten() {
                let stage = &self.stages[id];
                if let StageKind::Separable { program, .. } = &stage.kind {
                    device.use_program_stages(native, stage.stage.into(), program.get(generation));
                }
            }
            Program::Separable(SeparablePipeline {
                pipeline: Generational::new(native, generation),
            })
        } else {
            Program::Linked(LinkedPipeline::default())
        };

        let id = self.pipelines.insert(PipelineObject {
            generation,
            stages: [vertex, fragment],
            program,
        });
        for stage_id in [vertex, fragment].into_iter().flatten() {
            self.stages[stage_id].pipelines.push(id);
        }

        if !self.separable
            && let Err(e) = self.relink(device, id)
        {
            self.destroy_pipeline(device, id);
            return Err(e);
        }

        Ok(id)
    }

    /// Stages of a pipeline (vertex, fragment).
    #[must_use]
    pub fn pipeline_stages(&self, id: PipelineId) -> Option<[Option<StageId>; 2]> {
        self.pipelines.get(id).map(|p| p.stages)
    }

    /// Replaces one stage of a pipeline.
    ///
    /// Linked pipelines drop their program and relink on the next bind.
    pub fn attach_stage(
        &mut self,
        device: &mut dyn GlDevice,
        id: PipelineId,
        kind: ShaderStage,
        stage: Option<StageId>,
    ) -> Result<()> {
        let generation = self.generation;
        {
            let pipeline = self
                .pipelines
                .get(id)
                .ok_or(ShaderError::UnknownHandle("pipeline"))?;
            if pipeline.generation != generation {
                return Err(stale("pipeline"));
            }
        }
        if let Some(stage_id) = stage {
            self.check_stage(stage_id, kind)?;
        }

        let slot = kind.index();
        let previous = self.pipelines[id].stages[slot];
        if previous == stage {
            return Ok(());
        }
        if let Some(old) = previous
            && let Some(old_stage) = self.stages.get_mut(old)
        {
            old_stage.pipelines.retain(|p| *p != id);
        }
        if let Some(new) = stage {
            self.stages[new].pipelines.push(id);
        }

        let new_program = stage.and_then(|s| match &self.stages[s].kind {
            StageKind::Separable { program, .. } => program.get(generation),
            StageKind::Linked { .. } => None,
        });

        let pipeline = &mut self.pipelines[id];
        pipeline.stages[slot] = stage;
        match &mut pipeline.program {
            Program::Separable(sep) => {
                if let Some(native) = sep.pipeline.get(generation) {
                    device.use_program_stages(native, kind.into(), new_program);
                }
            }
            Program::Linked(linked) => {
                if let Some(program) = linked.program.take()
                    && let Some(native) = program.get(generation)
                {
                    device.delete_program(native);
                }
                if self.bound == Some(id) {
                    self.bound = None;
                }
            }
        }
        Ok(())
    }

    fn relink(&mut self, device: &mut dyn GlDevice, id: PipelineId) -> Result<()> {
        let generation = self.generation;
        let stages = self.pipelines[id].stages;

        let mut shaders: SmallVec<[NativeShader; 2]> = SmallVec::new();
        for stage_id in stages.into_iter().flatten() {
            let stage = self
                .stages
                .get(stage_id)
                .ok_or(ShaderError::UnknownHandle("stage"))?;
            if let StageKind::Linked { shader, .. } = &stage.kind {
                shaders.push(shader.get(generation).ok_or_else(|| stale("stage"))?);
            }
        }

        let program = device
            .create_program()
            .ok_or(ShaderError::CreateFailed("program"))?;
        for &shader in &shaders {
            device.attach_shader(program, shader);
        }
        let attrs = self.attribute_list();
        let linked = self.compiler.link(device, program, &attrs);
        for &shader in &shaders {
            device.detach_shader(program, shader);
        }
        if let Err(e) = linked {
            device.delete_program(program);
            return Err(e);
        }

        let attributes = self.query_attributes(device, program);
        if let Program::Linked(linked) = &mut self.pipelines[id].program {
            linked.program = Some(Generational::new(program, generation));
            linked.synced = [0; 2];
            linked.locations.clear();
            linked.attributes = attributes;
        }
        Ok(())
    }

    /// Pushes stored stage uniforms changed since the last sync.
    ///
    /// The pipeline's program must be the one in use.
    fn sync_linked(&mut self, device: &mut dyn GlDevice, id: PipelineId) {
        let generation = self.generation;
        let Some(pipeline) = self.pipelines.get_mut(id) else {
            return;
        };
        let Program::Linked(linked) = &mut pipeline.program else {
            return;
        };
        let Some(program) = linked.program.and_then(|p| p.get(generation)) else {
            return;
        };

        for (slot, stage_id) in pipeline.stages.iter().enumerate() {
            let Some(stage) = stage_id.and_then(|s| self.stages.get(s)) else {
                continue;
            };
            let StageKind::Linked { uniforms, .. } = &stage.kind else {
                continue;
            };
            if linked.synced[slot] == uniforms.generation() {
                continue;
            }
            for uniform in uniforms.changed_since(linked.synced[slot]) {
                let location = *linked
                    .locations
                    .entry(uniform.name.clone())
                    .or_insert_with(|| device.uniform_location(program, &uniform.name));
                if let Some(location) = location {
                    device.uniform(location, &uniform.value);
                }
            }
            linked.synced[slot] = uniforms.generation();
        }
    }

    /// Binds a pipeline for drawing (or unbinds with `None`).
    ///
    /// Returns whether the active program changed.
    pub fn bind(&mut self, device: &mut dyn GlDevice, id: Option<PipelineId>) -> Result<bool> {
        let generation = self.generation;

        let Some(id) = id else {
            let changed = self.bound.take().is_some();
            if self.separable {
                device.bind_program_pipeline(None);
            } else {
                device.use_program(None);
            }
            return Ok(changed);
        };

        let pipeline = self
            .pipelines
            .get(id)
            .ok_or(ShaderError::UnknownHandle("pipeline"))?;
        if pipeline.generation != generation {
            return Err(stale("pipeline"));
        }

        let mut changed = self.bound != Some(id);
        let needs_link = match &pipeline.program {
            Program::Separable(sep) => {
                let native = sep.pipeline.get(generation).ok_or_else(|| stale("pipeline"))?;
                if changed {
                    device.use_program(None);
                    device.bind_program_pipeline(Some(native));
                }
                false
            }
            Program::Linked(linked) => linked.program.is_none(),
        };

        if needs_link {
            self.relink(device, id)?;
            changed = true;
        }
        if changed && let Program::Linked(linked) = &self.pipelines[id].program {
            device.use_program(linked.program.and_then(|p| p.get(generation)));
        }

        self.bound = Some(id);
        self.sync_linked(device, id);
        Ok(changed)
    }

    /// Attribute bindings of a pipeline's vertex inputs.
    #[must_use]
    pub fn attributes(&self, id: PipelineId) -> Option<&AttributeBindings> {
        let pipeline = self.pipelines.get(id)?;
        match &pipeline.program {
            Program::Separable(_) => pipeline.stages[ShaderStage::Vertex.index()]
                .and_then(|s| self.stages.get(s))
                .map(|s| &s.attributes),
            Program::Linked(linked) => Some(&linked.attributes),
        }
    }

    /// Resolves where `name` lives in a pipeline.
    ///
    /// Separable pipelines record a location in every stage program that
    /// declares the name. Linked pipelines look up the linked program and attribute the
    /// uniform to the first stage whose source declares it.
    pub fn resolve_uniform(
        &mut self,
        device: &mut dyn GlDevice,
        id: PipelineId,
        name: &str,
    ) -> Option<UniformBinding> {
        let generation = self.generation;
        let pipeline = self.pipelines.get_mut(id)?;
        if pipeline.generation != generation {
            return None;
        }

        match &mut pipeline.program {
            Program::Separable(_) => {
                let mut binding = UniformBinding::default();
                for stage_kind in ShaderStage::ALL {
                    let Some(stage) = pipeline.stages[stage_kind.index()]
                        .and_then(|s| self.stages.get_mut(s))
                    else {
                        continue;
                    };
                    if let StageKind::Separable { program, locations } = &mut stage.kind
                        && let Some(native) = program.get(generation)
                    {
                        binding.locations[stage_kind.index()] = *locations
                            .entry(name.to_owned())
                            .or_insert_with(|| device.uniform_location(native, name));
                    }
                }
                (!binding.is_empty()).then_some(binding)
            }
            Program::Linked(linked) => {
                let native = linked.program.and_then(|p| p.get(generation))?;
                let location = (*linked
                    .locations
                    .entry(name.to_owned())
                    .or_insert_with(|| device.uniform_location(native, name)))?;
                let stage = ShaderStage::ALL
                    .into_iter()
                    .find(|kind| {
                        pipeline.stages[kind.index()]
                            .and_then(|s| self.stages.get(s))
                            .is_some_and(|s| match &s.kind {
                                StageKind::Linked { declared, .. } => {
                                    declared.iter().any(|d| d == name)
                                }
                                StageKind::Separable { .. } => false,
                            })
                    })
                    .unwrap_or(ShaderStage::Vertex);
                Some(UniformBinding::single(stage, location))
            }
        }
    }

    /// Sets a uniform of a pipeline through a pre-resolved binding.
    pub fn set_pipeline_uniform(
        &mut self,
        device: &mut dyn GlDevice,
        id: PipelineId,
        binding: UniformBinding,
        name: &str,
        value: UniformValue,
    ) -> Result<()> {
        let generation = self.generation;
        let pipeline = self
            .pipelines
            .get(id)
            .ok_or(ShaderError::UnknownHandle("pipeline"))?;
        if pipeline.generation != generation {
            return Err(stale("pipeline"));
        }
        if matches!(pipeline.program, Program::Linked(_)) {
            let stage_id = binding
                .stage()
                .and_then(|stage| pipeline.stages[stage.index()])
                .ok_or(ShaderError::UnknownHandle("stage"))?;
            return self.set_stage_uniform(device, stage_id, name, value);
        }

        // Every separable stage declaring the name has its own storage.
        for (stage_kind, location) in binding.stages() {
            let stage = pipeline.stages[stage_kind.index()]
                .and_then(|s| self.stages.get(s))
                .ok_or(ShaderError::UnknownHandle("stage"))?;
            if let StageKind::Separable { program, .. } = &stage.kind {
                let native = program.get(generation).ok_or_else(|| stale("stage"))?;
                device.program_uniform(native, location, &value);
            }
        }
        Ok(())
    }

    /// Destroys a pipeline, leaving its stages alive.
    pub fn destroy_pipeline(&mut self, device: &mut dyn GlDevice, id: PipelineId) {
        let Some(pipeline) = self.pipelines.remove(id) else {
            return;
        };
        let generation = self.generation;

        for stage_id in pipeline.stages.into_iter().flatten() {
            if let Some(stage) = self.stages.get_mut(stage_id) {
                stage.pipelines.retain(|p| *p != id);
            }
        }
        if self.bound == Some(id) {
            self.bound = None;
        }

        match pipeline.program {
            Program::Separable(sep) => {
                if let Some(native) = sep.pipeline.get(generation) {
                    device.delete_program_pipeline(native);
                }
            }
            Program::Linked(linked) => {
                if let Some(native) = linked.program.and_then(|p| p.get(generation)) {
                    device.delete_program(native);
                }
            }
        }
    }

    /// Destroys a pipeline and every stage no other pipeline uses.
    pub fn destroy_pipeline_and_stages(&mut self, device: &mut dyn GlDevice, id: PipelineId) {
        let Some(stages) = self.pipeline_stages(id) else {
            return;
        };
        self.destroy_pipeline(device, id);
        for stage_id in stages.into_iter().flatten() {
            if self
                .stages
                .get(stage_id)
                .is_some_and(|s| s.pipelines.is_empty())
            {
                self.destroy_stage(device, stage_id);
            }
        }
    }
}
