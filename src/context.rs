//! Shader Context
//!
//! [`ShaderContext`] is the single owner of everything this crate manages for
//! one GPU context: the native device, the program cache, the stage/pipeline
//! registry, user registrations and precompiled binaries. It lives on the
//! rendering thread and is passed around explicitly.
//!
//! # Per-draw flow
//!
//! ```text
//! RenderConfig ─► key_fn ─► ShaderCache::lookup
//!                              │ hit ──────────────────────────┐
//!                              └ miss ─► vertex_fn/fragment_fn │
//!                                        compile + link        │
//!                                        resolve uniforms      ▼
//!                                                   ProgramRegistry::bind
//! ```
//!
//! # Context changes
//!
//! | Event                               | Order                  | Native deletes |
//! |-------------------------------------|------------------------|----------------|
//! | [`notify_context_lost`]             | bump, then drain       | none           |
//! | [`release_for_context_change`]      | drain, then bump       | all            |
//! | [`replace_device`]                  | bump, drain, swap      | none           |
//!
//! [`notify_context_lost`]: ShaderContext::notify_context_lost
//! [`release_for_context_change`]: ShaderContext::release_for_context_change
//! [`replace_device`]: ShaderContext::replace_device

use crate::device::{Capabilities, DeviceGeneration, GlDevice};
use crate::errors::{Result, ShaderError};
use crate::pipeline::cache::{CacheEntry, CacheStats, EntryState, ShaderCache};
use crate::pipeline::compiler::ShaderCompiler;
use crate::pipeline::key::{RenderConfig, ShaderKey};
use crate::pipeline::program::{PipelineId, ProgramRegistry, StageId};
use crate::pipeline::shader_gen::ShaderGenerator;
use crate::pipeline::uniforms::{
    AttributeBindings, AttributeType, FixedUniform, UniformType, UniformValue, UserAttributeId,
    UserRegistry, UserUniformId,
};
use crate::pipeline::ShaderStage;
use crate::settings::{CacheSettings, ContextSettings};
use crate::worker::{self, BackgroundCompiler, BinaryCache, BinaryCompiler, CompileJob, CompileOutcome};

/// Result of [`ShaderContext::select_program`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgramSelection {
    pub key: ShaderKey,
    pub pipeline: PipelineId,
    /// The active program differs from the one used by the previous draw.
    /// Uniforms managed outside the cache must be pushed again.
    pub changed: bool,
}

/// Owner of the shader cache for one GPU context.
pub struct ShaderContext<D: GlDevice> {
    device: D,
    caps: Capabilities,
    settings: ContextSettings,
    registry: ProgramRegistry,
    cache: ShaderCache,
    users: UserRegistry,
    /// Key of the program selected by the last draw.
    current: Option<ShaderKey>,
    background: Option<BackgroundCompiler>,
    binaries: BinaryCache,
}

impl<D: GlDevice + std::fmt::Debug> std::fmt::Debug for ShaderContext<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShaderContext")
            .field("device", &self.device)
            .field("caps", &self.caps)
            .field("current", &self.current)
            .field("cache", &self.cache.stats())
            .finish_non_exhaustive()
    }
}

fn uses_separable(caps: &Capabilities, settings: &ContextSettings) -> bool {
    settings.prefer_separable && caps.supports_separable()
}

impl<D: GlDevice> ShaderContext<D> {
    /// Creates a context with the default generator.
    pub fn new(device: D, caps: Capabilities, settings: ContextSettings) -> Self {
        let separable = uses_separable(&caps, &settings);
        log::info!(
            "Shader cache: GLSL {}, {} programs",
            caps.glsl,
            if separable { "separable" } else { "linked" }
        );
        Self {
            device,
            caps,
            settings,
            registry: ProgramRegistry::new(
                separable,
                ShaderCompiler::new(&caps, settings.dump_failed_sources),
            ),
            cache: ShaderCache::new(ShaderGenerator::default(), settings.cache),
            users: UserRegistry::new(),
            current: None,
            background: None,
            binaries: BinaryCache::default(),
        }
    }

    // ── Accessors ────────────────────────────────────────────────────────────

    #[inline]
    #[must_use]
    pub fn device(&self) -> &D {
        &self.device
    }

    #[inline]
    pub fn device_mut(&mut self) -> &mut D {
        &mut self.device
    }

    #[inline]
    #[must_use]
    pub fn capabilities(&self) -> &Capabilities {
        &self.caps
    }

    #[inline]
    #[must_use]
    pub fn settings(&self) -> &ContextSettings {
        &self.settings
    }

    #[inline]
    #[must_use]
    pub fn generation(&self) -> DeviceGeneration {
        self.registry.generation()
    }

    #[inline]
    #[must_use]
    pub fn is_separable(&self) -> bool {
        self.registry.is_separable()
    }

    #[inline]
    #[must_use]
    pub fn registry(&self) -> &ProgramRegistry {
        &self.registry
    }

    #[inline]
    #[must_use]
    pub fn cache(&self) -> &ShaderCache {
        &self.cache
    }

    #[inline]
    #[must_use]
    pub fn current_key(&self) -> Option<ShaderKey> {
        self.current
    }

    #[must_use]
    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    fn current_entry(&self) -> Option<&CacheEntry> {
        self.cache.get(self.current?)
    }

    // ── Program selection ────────────────────────────────────────────────────

    /// Finds, or builds, the program for `config` and makes it current.
    ///
    /// Configurations without a key fail with [`ShaderError::InvalidConfig`]
    /// and leave the cache untouched. A key whose build failed keeps failing
    /// with [`ShaderError::BuildFailed`] until the cache is cleared.
    pub fn select_program(&mut self, config: &RenderConfig) -> Result<ProgramSelection> {
        let key = self
            .cache
            .generator()
            .key(config)
            .ok_or(ShaderError::InvalidConfig)?;

        let lookup = self.cache.lookup(key)?;
        if let Some(evicted) = lookup.evicted {
            self.registry
                .destroy_pipeline_and_stages(&mut self.device, evicted);
            if self.current.is_some_and(|k| self.cache.get(k).is_none()) {
                self.current = None;
            }
        }

        let index = lookup.index;
        if lookup.inserted {
            let built = self.build_entry(key, config);
            let Some(entry) = self.cache.entry_mut(index) else {
                return Err(ShaderError::BuildFailed(key));
            };
            match built {
                Ok(ready) => *entry = ready,
                Err(e) => {
                    log::warn!("Program {key} failed to build: {e}");
                    entry.state = EntryState::Failed;
                    return Err(e);
                }
            }
        }

        let state = self
            .cache
            .entry(index)
            .map_or(EntryState::Failed, |e| e.state);
        let EntryState::Ready(pipeline) = state else {
            return Err(ShaderError::BuildFailed(key));
        };

        let changed = self.registry.bind(&mut self.device, Some(pipeline))?;
        self.current = Some(key);
        Ok(ProgramSelection {
            key,
            pipeline,
            changed,
        })
    }

    fn build_stage(&mut self, key: ShaderKey, stage: ShaderStage, source: &str) -> Result<StageId> {
        if source.is_empty() {
            return Err(ShaderError::EmptySource { key, stage });
        }
        let preamble = self
            .registry
            .compiler()
            .preamble(stage, self.registry.is_separable());
        let hash = worker::source_hash(&preamble, source);
        let binary = self.binaries.get(key, stage, hash);
        self.registry
            .create_stage(&mut self.device, stage, source, binary)
    }

    fn build_entry(&mut self, key: ShaderKey, config: &RenderConfig) -> Result<CacheEntry> {
        let vertex_source = self.cache.generator().vertex_source(config);
        if vertex_source.is_empty() {
            return Err(ShaderError::EmptySource {
                key,
                stage: ShaderStage::Vertex,
            });
        }
        let fragment_source = self.cache.generator().fragment_source(config);
        if fragment_source.is_empty() {
            return Err(ShaderError::EmptySource {
                key,
                stage: ShaderStage::Fragment,
            });
        }

        let vertex = self.build_stage(key, ShaderStage::Vertex, &vertex_source)?;
        let fragment = match self.build_stage(key, ShaderStage::Fragment, &fragment_source) {
            Ok(id) => id,
            Err(e) => {
                self.registry.destroy_stage(&mut self.device, vertex);
                return Err(e);
            }
        };
        let pipeline = match self
            .registry
            .create_pipeline(&mut self.device, Some(vertex), Some(fragment))
        {
            Ok(id) => id,
            Err(e) => {
                self.registry.destroy_stage(&mut self.device, vertex);
                self.registry.destroy_stage(&mut self.device, fragment);
                return Err(e);
            }
        };

        let mut entry = CacheEntry::building();
        entry.state = EntryState::Ready(pipeline);
        for uniform in FixedUniform::ALL {
            entry.fixed_uniforms[uniform.index()] =
                self.registry
                    .resolve_uniform(&mut self.device, pipeline, uniform.name());
        }
        entry.user_uniforms = self
            .users
            .uniforms()
            .iter()
            .map(|u| {
                self.registry
                    .resolve_uniform(&mut self.device, pipeline, &u.name)
            })
            .collect();

        log::debug!("Built program {key}");
        Ok(entry)
    }

    /// Vertex inputs of the active program.
    #[must_use]
    pub fn active_attributes(&self) -> Option<&AttributeBindings> {
        self.registry.attributes(self.registry.bound()?)
    }

    // ── Uniforms ─────────────────────────────────────────────────────────────

    /// Sets a built-in uniform on the current program.
    ///
    /// Returns `false` when the program does not use the uniform.
    pub fn set_fixed_uniform(&mut self, uniform: FixedUniform, value: UniformValue) -> Result<bool> {
        let Some(entry) = self.current_entry() else {
            return Ok(false);
        };
        let (Some(pipeline), Some(binding)) = (entry.pipeline(), entry.fixed(uniform)) else {
            return Ok(false);
        };
        self.registry.set_pipeline_uniform(
            &mut self.device,
            pipeline,
            binding,
            uniform.name(),
            value,
        )?;
        Ok(true)
    }

    /// Sets a registered user uniform on the current program.
    pub fn set_user_uniform(&mut self, id: UserUniformId, value: UniformValue) -> Result<bool> {
        let name = self
            .users
            .uniform(id)
            .ok_or(ShaderError::UnknownHandle("user uniform"))?
            .name
            .clone();
        let Some(entry) = self.current_entry() else {
            return Ok(false);
        };
        let binding = entry.user_uniforms.get(id.index()).copied().flatten();
        let (Some(pipeline), Some(binding)) = (entry.pipeline(), binding) else {
            return Ok(false);
        };
        self.registry
            .set_pipeline_uniform(&mut self.device, pipeline, binding, &name, value)?;
        Ok(true)
    }

    // ── Generator and registrations ──────────────────────────────────────────

    /// Installs a generator (`None` reinstalls the default) and a sizing
    /// policy. Clears the cache, user registrations and precompiled binaries.
    pub fn set_generator(&mut self, generator: Option<ShaderGenerator>, cache: CacheSettings) {
        let released = self.cache.reset(generator.unwrap_or_default(), cache);
        self.release_pipelines(released);
        self.settings.cache = cache;
        self.users.clear();
        self.registry.set_user_attributes(std::iter::empty());
        self.binaries.clear();
        log::debug!(
            "Installed {} shader generator",
            if self.cache.generator().is_custom() { "custom" } else { "default" }
        );
    }

    /// Drops every cached program, keeping the generator.
    pub fn clear_cache(&mut self) {
        let released = self.cache.clear();
        self.release_pipelines(released);
    }

    fn release_pipelines(&mut self, pipelines: Vec<PipelineId>) {
        for pipeline in pipelines {
            self.registry
                .destroy_pipeline_and_stages(&mut self.device, pipeline);
        }
        self.current = None;
    }

    fn invalidate_for_registration(&mut self) {
        if !self.cache.is_empty() {
            log::debug!("User registration changed; clearing program cache");
            self.clear_cache();
        }
    }

    pub fn register_user_uniform(&mut self, name: &str, ty: UniformType) -> Result<UserUniformId> {
        let id = self.users.register_uniform(name, ty)?;
        self.invalidate_for_registration();
        Ok(id)
    }

    pub fn register_user_attribute(
        &mut self,
        name: &str,
        ty: AttributeType,
    ) -> Result<UserAttributeId> {
        let id = self.users.register_attribute(name, ty)?;
        self.registry
            .set_user_attributes(self.users.attribute_bindings());
        self.invalidate_for_registration();
        Ok(id)
    }

    #[inline]
    #[must_use]
    pub fn user_registry(&self) -> &UserRegistry {
        &self.users
    }

    // ── Context changes ──────────────────────────────────────────────────────

    /// Releases every cached program. Stages and pipelines created through
    /// the explicit API stay with their owner and go stale with the bump.
    fn drain(&mut self) {
        let released = self.cache.clear();
        self.release_pipelines(released);
        self.binaries.clear();
    }

    /// The context is already gone: invalidate every handle, then free host
    /// state without touching the device.
    pub fn notify_context_lost(&mut self) {
        self.registry.bump_generation();
        self.drain();
        log::info!(
            "Shader context lost; now at device generation {}",
            self.registry.generation().value()
        );
    }

    /// The context is about to be destroyed: delete every native object, then
    /// invalidate remaining handles.
    pub fn release_for_context_change(&mut self) {
        self.drain();
        self.registry.bump_generation();
    }

    /// Installs the device of a new context and returns the old one.
    ///
    /// Anything created on the old device is treated as lost.
    pub fn replace_device(&mut self, device: D, caps: Capabilities) -> D {
        self.notify_context_lost();
        let old = std::mem::replace(&mut self.device, device);
        self.caps = caps;
        self.registry.reconfigure(
            uses_separable(&caps, &self.settings),
            ShaderCompiler::new(&caps, self.settings.dump_failed_sources),
        );
        if !caps.supports_background_compile() {
            self.background = None;
        }
        old
    }

    // ── Background compilation ───────────────────────────────────────────────

    /// Starts a background compiler. Ignored (returns `false`) when the device
    /// does not report background compilation and binary loading.
    pub fn attach_background_compiler(&mut self, compiler: Box<dyn BinaryCompiler>) -> bool {
        if !self.caps.supports_background_compile() {
            log::debug!("Background shader compilation unsupported on this device");
            return false;
        }
        let worker = BackgroundCompiler::spawn(compiler);
        let running = worker.is_running();
        self.background = running.then_some(worker);
        running
    }

    /// Queues both stages of `config` for background compilation.
    ///
    /// Returns the number of jobs submitted; zero when there is no worker or
    /// the program is already cached.
    pub fn precompile(&mut self, config: &RenderConfig) -> Result<usize> {
        let key = self
            .cache
            .generator()
            .key(config)
            .ok_or(ShaderError::InvalidConfig)?;
        if self.background.is_none() || self.cache.get(key).is_some() {
            return Ok(0);
        }

        let sources = [
            (ShaderStage::Vertex, self.cache.generator().vertex_source(config)),
            (ShaderStage::Fragment, self.cache.generator().fragment_source(config)),
        ];
        if let Some((stage, _)) = sources.iter().find(|(_, s)| s.is_empty()) {
            return Err(ShaderError::EmptySource { key, stage: *stage });
        }

        let separable = self.registry.is_separable();
        let mut submitted = 0;
        for (stage, source) in sources {
            if self.binaries.contains(key, stage) {
                continue;
            }
            let job = CompileJob {
                key,
                stage,
                generation: self.registry.generation(),
                preamble: self.registry.compiler().preamble(stage, separable),
                source,
            };
            if let Some(worker) = &mut self.background
                && worker.submit(job)
            {
                submitted += 1;
            }
        }
        Ok(submitted)
    }

    /// Stores binaries compiled for the current device generation. Jobs
    /// submitted before a context change finish afterwards and are dropped.
    fn store_outcomes(&mut self, outcomes: Vec<CompileOutcome>) -> usize {
        let generation = self.registry.generation();
        let mut stored = 0;
        for outcome in outcomes {
            match outcome {
                CompileOutcome::Compiled(binary) if binary.generation != generation => {
                    log::debug!(
                        "Dropping {} binary for {} from device generation {}",
                        binary.stage,
                        binary.key,
                        binary.generation.value()
                    );
                }
                CompileOutcome::Compiled(binary) => {
                    self.binaries.insert(binary);
                    stored += 1;
                }
                CompileOutcome::Failed { key, stage, log } => {
                    log::warn!("Background compile of {stage} stage for {key} failed: {log}");
                }
            }
        }
        stored
    }

    /// Stores finished background binaries. Returns how many were stored.
    pub fn poll_background(&mut self) -> usize {
        let outcomes = match &mut self.background {
            Some(worker) => worker.poll(),
            None => return 0,
        };
        self.store_outcomes(outcomes)
    }

    /// Blocks until the background worker is idle, then stores its binaries.
    pub fn wait_background(&mut self) -> usize {
        let outcomes = match &mut self.background {
            Some(worker) => worker.wait(),
            None => return 0,
        };
        self.store_outcomes(outcomes)
    }

    #[inline]
    #[must_use]
    pub fn binary_cache(&self) -> &BinaryCache {
        &self.binaries
    }

    // ── Explicit stages and pipelines ────────────────────────────────────────

    /// Compiles a stage outside the program cache.
    pub fn create_stage(&mut self, stage: ShaderStage, source: &str) -> Result<StageId> {
        self.registry
            .create_stage(&mut self.device, stage, source, None)
    }

    pub fn create_pipeline(
        &mut self,
        vertex: Option<StageId>,
        fragment: Option<StageId>,
    ) -> Result<PipelineId> {
        self.registry
            .create_pipeline(&mut self.device, vertex, fragment)
    }

    pub fn attach_stage(
        &mut self,
        pipeline: PipelineId,
        kind: ShaderStage,
        stage: Option<StageId>,
    ) -> Result<()> {
        self.reject_cached(pipeline)?;
        self.registry
            .attach_stage(&mut self.device, pipeline, kind, stage)
    }

    /// Binds a pipeline directly. The next `select_program` reports a change.
    pub fn bind_pipeline(&mut self, pipeline: Option<PipelineId>) -> Result<bool> {
        let changed = self.registry.bind(&mut self.device, pipeline)?;
        if changed {
            self.current = None;
        }
        Ok(changed)
    }

    pub fn set_stage_uniform(
        &mut self,
        stage: StageId,
        name: &str,
        value: UniformValue,
    ) -> Result<()> {
        self.registry
            .set_stage_uniform(&mut self.device, stage, name, value)
    }

    pub fn destroy_stage(&mut self, stage: StageId) -> Result<()> {
        if let Some(users) = self.registry.stage_users(stage) {
            for &pipeline in users {
                self.reject_cached(pipeline)?;
            }
        }
        self.registry.destroy_stage(&mut self.device, stage);
        Ok(())
    }

    pub fn destroy_pipeline(&mut self, pipeline: PipelineId) -> Result<()> {
        self.reject_cached(pipeline)?;
        self.registry.destroy_pipeline(&mut self.device, pipeline);
        Ok(())
    }

    fn reject_cached(&self, pipeline: PipelineId) -> Result<()> {
        if self
            .cache
            .iter()
            .any(|(_, entry)| entry.pipeline() == Some(pipeline))
        {
            return Err(ShaderError::CacheOwned);
        }
        Ok(())
    }
}
