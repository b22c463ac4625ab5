//! Program Cache
//!
//! Maps a [`ShaderKey`] to the pipeline built for it. Storage is an
//! [`LruHashTable`]: growable by default, or fixed-size with least recently
//! used eviction.
//!
//! # Entry lifecycle
//!
//! ```text
//! miss ──► Building ──► Ready(pipeline)
//!                  └──► Failed            (never rebuilt until cleared)
//! ```
//!
//! Each ready entry also records where every fixed and user uniform lives in
//! its pipeline, resolved once after the build.
//!
//! The cache only stores; building is driven by the owning context, which also
//! releases the pipelines of evicted or cleared entries.

use crate::errors::{Result, ShaderError};
use crate::pipeline::key::ShaderKey;
use crate::pipeline::lru_table::LruHashTable;
use crate::pipeline::program::PipelineId;
use crate::pipeline::shader_gen::ShaderGenerator;
use crate::pipeline::uniforms::{FixedUniform, UniformBinding};
use crate::settings::CacheSettings;

/// Build state of a cache entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryState {
    /// Slot claimed, build in progress.
    Building,
    Ready(PipelineId),
    /// Generation or compilation failed. Lookups fail fast.
    Failed,
}

/// One cached program.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub state: EntryState,
    /// Indexed by [`FixedUniform::index`].
    pub fixed_uniforms: [Option<UniformBinding>; FixedUniform::COUNT],
    /// Indexed by `UserUniformId::index`.
    pub user_uniforms: Vec<Option<UniformBinding>>,
}

impl CacheEntry {
    #[must_use]
    pub fn building() -> Self {
        Self {
            state: EntryState::Building,
            fixed_uniforms: [None; FixedUniform::COUNT],
            user_uniforms: Vec::new(),
        }
    }

    #[inline]
    #[must_use]
    pub fn pipeline(&self) -> Option<PipelineId> {
        match self.state {
            EntryState::Ready(id) => Some(id),
            EntryState::Building | EntryState::Failed => None,
        }
    }

    #[inline]
    #[must_use]
    pub fn fixed(&self, uniform: FixedUniform) -> Option<UniformBinding> {
        self.fixed_uniforms[uniform.index()]
    }
}

/// Snapshot of cache occupancy and activity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub capacity: usize,
    pub occupied: usize,
    pub ready: usize,
    pub failed: usize,
    pub evictions: u64,
    pub rehashes: u64,
    /// Entries built since creation.
    pub builds: u64,
}

/// Result of [`ShaderCache::lookup`].
#[derive(Debug)]
pub struct CacheLookup {
    /// Slot index; valid until the next lookup.
    pub index: usize,
    /// The key was missing; the entry is `Building` and must be built.
    pub inserted: bool,
    /// Entries moved during this lookup; indices and entry references taken
    /// earlier must be fetched again.
    pub rehashed: bool,
    /// Pipeline of an entry evicted to make room.
    pub evicted: Option<PipelineId>,
}

/// Key-addressed program table plus the generator that fills it.
#[derive(Debug)]
pub struct ShaderCache {
    table: LruHashTable<CacheEntry>,
    generator: ShaderGenerator,
    settings: CacheSettings,
    builds: u64,
}

impl ShaderCache {
    #[must_use]
    pub fn new(generator: ShaderGenerator, settings: CacheSettings) -> Self {
        Self {
            table: LruHashTable::new(settings.initial_capacity, settings.growth),
            generator,
            settings,
            builds: 0,
        }
    }

    #[inline]
    #[must_use]
    pub fn generator(&self) -> &ShaderGenerator {
        &self.generator
    }

    #[inline]
    #[must_use]
    pub fn settings(&self) -> CacheSettings {
        self.settings
    }

    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.table.len()
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    /// Finds `key` (refreshing its recency) or claims a `Building` slot for it.
    pub fn lookup(&mut self, key: ShaderKey) -> Result<CacheLookup> {
        let lookup = self
            .table
            .lookup_or_insert_with(key.raw(), CacheEntry::building)
            .map_err(|full| ShaderError::TableFull {
                capacity: full.capacity,
            })?;

        if lookup.inserted {
            self.builds += 1;
        }
        if let Some((evicted_key, _)) = &lookup.evicted {
            log::debug!("Evicted program {} to make room for {key}", ShaderKey(*evicted_key));
        }

        Ok(CacheLookup {
            index: lookup.index,
            inserted: lookup.inserted,
            rehashed: lookup.rehashed,
            evicted: lookup.evicted.and_then(|(_, entry)| entry.pipeline()),
        })
    }

    /// Entry for `key`, without touching recency.
    #[must_use]
    pub fn get(&self, key: ShaderKey) -> Option<&CacheEntry> {
        let index = self.table.find(key.raw())?;
        self.table.get(index).map(|slot| &slot.value)
    }

    #[must_use]
    pub fn entry(&self, index: usize) -> Option<&CacheEntry> {
        self.table.get(index).map(|slot| &slot.value)
    }

    pub fn entry_mut(&mut self, index: usize) -> Option<&mut CacheEntry> {
        self.table.get_mut(index).map(|slot| &mut slot.value)
    }

    /// Recency stamp of `key`'s entry.
    #[must_use]
    pub fn last_used(&self, key: ShaderKey) -> Option<u64> {
        let index = self.table.find(key.raw())?;
        self.table.get(index).map(|slot| slot.last_used)
    }

    /// Cached keys with their entries, in slot order.
    pub fn iter(&self) -> impl Iterator<Item = (ShaderKey, &CacheEntry)> {
        self.table
            .iter()
            .map(|(_, slot)| (ShaderKey(slot.key), &slot.value))
    }

    /// Empties the table and returns the pipelines that must be released.
    pub fn clear(&mut self) -> Vec<PipelineId> {
        self.table
            .clear()
            .into_iter()
            .filter_map(|(_, entry)| entry.pipeline())
            .collect()
    }

    /// Installs a generator and sizing policy. Returns the released pipelines.
    pub fn reset(&mut self, generator: ShaderGenerator, settings: CacheSettings) -> Vec<PipelineId> {
        let released = self.clear();
        self.generator = generator;
        self.settings = settings;
        self.table = LruHashTable::new(settings.initial_capacity, settings.growth);
        released
    }

    #[must_use]
    pub fn stats(&self) -> CacheStats {
        let counters = self.table.counters();
        let (ready, failed) = self
            .table
            .iter()
            .fold((0, 0), |(ready, failed), (_, slot)| match slot.value.state {
                EntryState::Ready(_) => (ready + 1, failed),
                EntryState::Failed => (ready, failed + 1),
                EntryState::Building => (ready, failed),
            });
        CacheStats {
            capacity: self.table.capacity(),
            occupied: self.table.len(),
            ready,
            failed,
            evictions: counters.evictions,
            rehashes: counters.rehashes,
            builds: self.builds,
        }
    }
}
