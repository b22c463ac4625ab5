//! Background Binary Compilation
//!
//! On platforms that report [`DeviceFeatures::BACKGROUND_COMPILE`], stage
//! sources can be compiled to driver binaries on a secondary thread that owns
//! its own temporary context. The worker never sees the cache, the registry or
//! any uniform state: it receives fully wrapped source text and sends back an
//! opaque byte buffer. Insertion happens on the rendering thread, which stores
//! the blob and loads it the next time the key is built.
//!
//! Blobs are tagged with an xxh3-128 hash of the exact wrapped source so a
//! binary is never loaded for source it was not compiled from.
//!
//! [`DeviceFeatures::BACKGROUND_COMPILE`]: crate::device::DeviceFeatures::BACKGROUND_COMPILE

use std::thread::{self, JoinHandle};

use rustc_hash::FxHashMap;
use xxhash_rust::xxh3::xxh3_128;

use crate::device::DeviceGeneration;
use crate::pipeline::ShaderStage;
use crate::pipeline::key::ShaderKey;

/// Compiles wrapped stage source to a driver binary on a secondary context.
pub trait BinaryCompiler: Send {
    fn compile(&mut self, stage: ShaderStage, sources: &[&str]) -> Result<Vec<u8>, String>;
}

/// Hash identifying the exact text handed to the driver.
#[must_use]
pub fn source_hash(preamble: &str, source: &str) -> u128 {
    let mut text = String::with_capacity(preamble.len() + source.len());
    text.push_str(preamble);
    text.push_str(source);
    xxh3_128(text.as_bytes())
}

/// One stage to compile.
#[derive(Debug, Clone)]
pub struct CompileJob {
    pub key: ShaderKey,
    pub stage: ShaderStage,
    /// Device generation at submit time.
    pub generation: DeviceGeneration,
    pub preamble: String,
    pub source: String,
}

/// A compiled stage binary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageBinary {
    pub key: ShaderKey,
    pub stage: ShaderStage,
    /// Copied from the job; binaries from an older generation are discarded.
    pub generation: DeviceGeneration,
    pub source_hash: u128,
    pub bytes: Vec<u8>,
}

/// What the worker sends back for each job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompileOutcome {
    Compiled(StageBinary),
    Failed {
        key: ShaderKey,
        stage: ShaderStage,
        log: String,
    },
}

/// Owner of the worker thread.
///
/// Dropping it closes the job channel and joins the thread.
pub struct BackgroundCompiler {
    jobs: Option<flume::Sender<CompileJob>>,
    results: flume::Receiver<CompileOutcome>,
    worker: Option<JoinHandle<()>>,
    pending: usize,
}

impl std::fmt::Debug for BackgroundCompiler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackgroundCompiler")
            .field("pending", &self.pending)
            .finish_non_exhaustive()
    }
}

impl BackgroundCompiler {
    /// Starts the worker thread around `compiler`.
    #[must_use]
    pub fn spawn(mut compiler: Box<dyn BinaryCompiler>) -> Self {
        let (job_tx, job_rx) = flume::unbounded::<CompileJob>();
        let (result_tx, result_rx) = flume::unbounded();

        let worker = thread::Builder::new()
            .name("shader-compile".into())
            .spawn(move || {
                while let Ok(job) = job_rx.recv() {
                    let outcome = match compiler.compile(job.stage, &[&job.preamble, &job.source]) {
                        Ok(bytes) => CompileOutcome::Compiled(StageBinary {
                            key: job.key,
                            stage: job.stage,
                            generation: job.generation,
                            source_hash: source_hash(&job.preamble, &job.source),
                            bytes,
                        }),
                        Err(log) => CompileOutcome::Failed {
                            key: job.key,
                            stage: job.stage,
                            log,
                        },
                    };
                    if result_tx.send(outcome).is_err() {
                        break;
                    }
                }
            });

        let worker = match worker {
            Ok(handle) => Some(handle),
            Err(e) => {
                log::warn!("Failed to start background shader compiler: {e}");
                None
            }
        };

        Self {
            jobs: worker.as_ref().map(|_| job_tx),
            results: result_rx,
            worker,
            pending: 0,
        }
    }

    /// Whether the worker thread is running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.jobs.is_some()
    }

    /// Jobs submitted but not yet collected.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.pending
    }

    /// Queues a job. Returns `false` if the worker is gone.
    pub fn submit(&mut self, job: CompileJob) -> bool {
        let Some(jobs) = &self.jobs else {
            return false;
        };
        if jobs.send(job).is_err() {
            log::warn!("Background shader compiler stopped; dropping job");
            self.jobs = None;
            return false;
        }
        self.pending += 1;
        true
    }

    /// Collects finished jobs without blocking.
    pub fn poll(&mut self) -> Vec<CompileOutcome> {
        let done: Vec<CompileOutcome> = self.results.try_iter().collect();
        self.pending = self.pending.saturating_sub(done.len());
        done
    }

    /// Blocks until every submitted job has finished.
    pub fn wait(&mut self) -> Vec<CompileOutcome> {
        let mut done = Vec::with_capacity(self.pending);
        while self.pending > 0 {
            match self.results.recv() {
                Ok(outcome) => {
                    done.push(outcome);
                    self.pending -= 1;
                }
                Err(_) => {
                    self.pending = 0;
                }
            }
        }
        done
    }
}

impl Drop for BackgroundCompiler {
    fn drop(&mut self) {
        self.jobs = None;
        if let Some(worker) = self.worker.take()
            && worker.join().is_err()
        {
            log::error!("Background shader compiler panicked");
        }
    }
}

/// Compiled binaries waiting to be loaded, keyed by (key, stage).
#[derive(Debug, Default)]
pub struct BinaryCache {
    entries: FxHashMap<(ShaderKey, ShaderStage), StageBinary>,
}

impl BinaryCache {
    pub fn insert(&mut self, binary: StageBinary) {
        self.entries.insert((binary.key, binary.stage), binary);
    }

    /// Blob for `(key, stage)` if it was compiled from exactly this source.
    #[must_use]
    pub fn get(&self, key: ShaderKey, stage: ShaderStage, source_hash: u128) -> Option<&[u8]> {
        self.entries
            .get(&(key, stage))
            .filter(|b| b.source_hash == source_hash)
            .map(|b| b.bytes.as_slice())
    }

    #[must_use]
    pub fn contains(&self, key: ShaderKey, stage: ShaderStage) -> bool {
        self.entries.contains_key(&(key, stage))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Echo;

    impl BinaryCompiler for Echo {
        fn compile(&mut self, _stage: ShaderStage, sources: &[&str]) -> Result<Vec<u8>, String> {
            let text = sources.concat();
            if text.contains("broken") {
                return Err("syntax error".into());
            }
            Ok(text.into_bytes())
        }
    }

    fn job(source: &str) -> CompileJob {
        CompileJob {
            key: ShaderKey(7),
            stage: ShaderStage::Vertex,
            generation: DeviceGeneration::new(),
            preamble: "#version 100\n".into(),
            source: source.into(),
        }
    }

    #[test]
    fn worker_compiles_and_reports_failures() {
        let mut worker = BackgroundCompiler::spawn(Box::new(Echo));
        assert!(worker.submit(job("void main() {}\n")));
        assert!(worker.submit(job("broken")));

        let done = worker.wait();
        assert_eq!(done.len(), 2);
        assert_eq!(worker.pending(), 0);

        let CompileOutcome::Compiled(binary) = &done[0] else {
            panic!("first job should compile");
        };
        assert_eq!(binary.bytes, b"#version 100\nvoid main() {}\n");
        assert_eq!(
            binary.source_hash,
            source_hash("#version 100\n", "void main() {}\n")
        );
        assert!(matches!(done[1], CompileOutcome::Failed { .. }));
    }

    #[test]
    fn binary_cache_checks_source_hash() {
        let mut cache = BinaryCache::default();
        cache.insert(StageBinary {
            key: ShaderKey(1),
            stage: ShaderStage::Fragment,
            generation: DeviceGeneration::new(),
            source_hash: 42,
            bytes: vec![1, 2, 3],
        });
        assert_eq!(cache.get(ShaderKey(1), ShaderStage::Fragment, 42), Some(&[1, 2, 3][..]));
        assert_eq!(cache.get(ShaderKey(1), ShaderStage::Fragment, 43), None);
        assert_eq!(cache.get(ShaderKey(1), ShaderStage::Vertex, 42), None);
    }
}
