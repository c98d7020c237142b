//! The aggregator orchestrator.
//!
//! [`MirrorManager::run`] prepares the root directories, removes orphaned
//! mirrors, fans the configured providers out across a bounded worker pool,
//! and assembles the final `aggregator.json` from the per-provider manifest
//! fragments. Provider failures are logged and omitted from the manifest;
//! orchestration failures abort the run.

use crate::config::{Config, ProviderConfig};
use crate::error::{MirrorError, Result};
use crate::models::{AGGREGATOR_VERSION, Aggregator, AggregatorProvider, CATEGORY_AGGREGATOR};
use crate::transaction::AGGREGATOR_SUBDIR;
use crate::worker::MirrorWorker;
use chrono::Utc;
use std::collections::HashSet;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::{Mutex, mpsc};
use tracing::{error, info, warn};

/// One provider job handed to the worker pool.
struct Job {
    index: usize,
    provider: ProviderConfig,
}

/// Orchestrates a full mirror run across all configured providers.
pub struct MirrorManager {
    config: Arc<Config>,
}

impl MirrorManager {
    /// Create a manager for a validated configuration.
    pub fn new(config: Config) -> Result<Self> {
        config.check()?;
        Ok(Self {
            config: Arc::new(config),
        })
    }

    /// Run the whole mirror pass.
    ///
    /// # Errors
    ///
    /// Fails on orchestration problems (root directories, manifest write)
    /// and on remote-validator infrastructure failures. Per-provider errors
    /// are logged and only drop the provider from the manifest.
    pub async fn run(&self) -> Result<()> {
        if self.config.aggregator.category != CATEGORY_AGGREGATOR {
            return Err(MirrorError::orchestration(format!(
                "aggregator category '{}' does not mirror",
                self.config.aggregator.category
            )));
        }

        ensure_dir(&self.config.folder)?;
        let web_csaf = self.config.web.join(".well-known").join("csaf");
        ensure_dir(&web_csaf)?;

        self.remove_orphans()?;

        let fragments = self.run_pool().await?;
        self.write_aggregator(&web_csaf, fragments)
    }

    /// Fan the providers out over N workers reading one rendezvous channel.
    async fn run_pool(&self) -> Result<Vec<AggregatorProvider>> {
        let provider_count = self.config.providers.len();
        let worker_count = self.config.workers.min(provider_count).max(1);
        info!(workers = worker_count, providers = provider_count, "starting workers");

        // Capacity one: submission blocks until a worker picks the job up,
        // bounding in-flight providers to the pool size.
        let (job_tx, job_rx) = mpsc::channel::<Job>(1);
        let job_rx = Arc::new(Mutex::new(job_rx));
        let (result_tx, mut result_rx) = mpsc::unbounded_channel();

        let mut handles = Vec::with_capacity(worker_count);
        for worker_id in 1..=worker_count {
            let job_rx = Arc::clone(&job_rx);
            let result_tx = result_tx.clone();
            let config = Arc::clone(&self.config);
            handles.push(tokio::spawn(async move {
                loop {
                    let job = { job_rx.lock().await.recv().await };
                    let Some(job) = job else { break };
                    info!(
                        worker = worker_id,
                        provider = %job.provider.name,
                        domain = %job.provider.domain,
                        "mirroring provider"
                    );
                    let result = match MirrorWorker::new(Arc::clone(&config), job.provider) {
                        Ok(worker) => worker.run().await,
                        Err(err) => Err(err),
                    };
                    if result_tx.send((job.index, result)).is_err() {
                        break;
                    }
                }
            }));
        }
        drop(result_tx);

        for (index, provider) in self.config.providers.iter().enumerate() {
            let job = Job {
                index,
                provider: provider.clone(),
            };
            if job_tx.send(job).await.is_err() {
                break;
            }
        }
        drop(job_tx);

        // Collect results in configuration order, filtering out failures.
        let mut fragments: Vec<Option<AggregatorProvider>> =
            (0..provider_count).map(|_| None).collect();
        let mut fatal: Option<MirrorError> = None;
        while let Some((index, result)) = result_rx.recv().await {
            let name = &self.config.providers[index].name;
            match result {
                Ok(fragment) => fragments[index] = Some(fragment),
                Err(err @ MirrorError::RemoteValidator(_)) => {
                    error!(provider = %name, %err, "remote validation infrastructure failed");
                    if fatal.is_none() {
                        fatal = Some(err);
                    }
                }
                Err(err) => error!(provider = %name, %err, "mirroring failed"),
            }
        }
        for handle in handles {
            let _ = handle.await;
        }

        if let Some(err) = fatal {
            return Err(err);
        }
        Ok(fragments.into_iter().flatten().collect())
    }

    /// Remove published mirrors of providers no longer in the configuration.
    ///
    /// Only symlinks that resolve to a directory directly inside `<folder>`
    /// are reaped; real directories and foreign symlinks are left alone.
    fn remove_orphans(&self) -> Result<()> {
        let publish_dir = self.config.web.join(AGGREGATOR_SUBDIR);
        let entries = match fs::read_dir(&publish_dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(()),
            Err(err) => return Err(err.into()),
        };

        let keep: HashSet<&str> = self
            .config
            .providers
            .iter()
            .map(|p| p.name.as_str())
            .collect();
        let folder = fs::canonicalize(&self.config.folder)?;

        for entry in entries {
            let entry = entry?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if keep.contains(name) {
                continue;
            }

            let path = entry.path();
            let meta = match fs::symlink_metadata(&path) {
                Ok(meta) => meta,
                Err(err) => {
                    warn!(path = %path.display(), %err, "cannot inspect web entry");
                    continue;
                }
            };
            if !meta.file_type().is_symlink() {
                continue;
            }

            let resolved = match fs::canonicalize(&path) {
                Ok(resolved) => resolved,
                Err(err) => {
                    warn!(path = %path.display(), %err, "cannot resolve symlink");
                    continue;
                }
            };
            // If it is not a directory it is not a mirror.
            if !resolved.is_dir() {
                continue;
            }
            // Only touch links into our own folder.
            if resolved.parent() != Some(folder.as_path()) {
                continue;
            }

            info!(link = %path.display(), target = %resolved.display(), "removing orphaned mirror");
            if let Err(err) = fs::remove_file(&path) {
                warn!(path = %path.display(), %err, "cannot remove orphaned link");
                continue;
            }
            if let Err(err) = fs::remove_dir_all(&resolved) {
                warn!(path = %resolved.display(), %err, "cannot remove orphaned directory");
            }
        }
        Ok(())
    }

    /// Write `aggregator.json` via a unique temp file in the target
    /// directory, renamed over the destination.
    fn write_aggregator(
        &self,
        web_csaf: &Path,
        providers: Vec<AggregatorProvider>,
    ) -> Result<()> {
        let manifest = Aggregator {
            aggregator: self.config.aggregator.clone(),
            aggregator_version: AGGREGATOR_VERSION.to_string(),
            canonical_url: format!(
                "{}/.well-known/csaf/aggregator.json",
                self.config.domain.trim_end_matches('/')
            ),
            csaf_providers: providers,
            last_updated: Utc::now(),
        };

        let mut tmp = tempfile::NamedTempFile::new_in(web_csaf)?;
        serde_json::to_writer(tmp.as_file_mut(), &manifest)?;
        tmp.as_file_mut().write_all(b"\n")?;
        tmp.persist(web_csaf.join("aggregator.json"))
            .map_err(|err| MirrorError::Io(err.error))?;
        Ok(())
    }
}

fn ensure_dir(path: &Path) -> Result<()> {
    fs::create_dir_all(path)?;
    Ok(())
}
