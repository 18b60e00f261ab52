//! End-to-end conversion: walk the raw tree, normalize every trajectory and
//! write the columnar dataset.
//!
//! ```text
//! find_trajectories(root)
//!   for each trajectory directory:
//!     EpisodeNormalizer::normalize  -> Some(episode) | None (no lupus annotation)
//!     DatasetWriter::write_episode
//! DatasetWriter::finish             -> manifest.json
//! ```
//!
//! Trajectories are processed one at a time. The embedder is built once by
//! the caller and shared by every call.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::config::ConverterConfig;
use crate::dataset::{DatasetManifest, DatasetWriter};
use crate::episode::{EpisodeNormalizer, EpisodeRecord};
use crate::model::Embedder;
use crate::source::{find_trajectories, TrajectoryWalk};

/// Outcome counters for a conversion run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConversionSummary {
    /// Trajectory directories found by the walk.
    pub trajectories: usize,
    /// Episodes written to the dataset.
    pub written: usize,
    /// Trajectories without `annotations/lang_lupus.txt`.
    pub skipped_unannotated: usize,
    /// Trajectories dropped because of malformed files (only with
    /// `skip_malformed`).
    pub failed: usize,
    /// Entries the walk skipped because of their shape.
    pub skipped_entries: usize,
}

/// Drives a full conversion run.
pub struct ConversionPipeline {
    config: ConverterConfig,
    normalizer: EpisodeNormalizer,
}

impl ConversionPipeline {
    pub fn new(config: ConverterConfig) -> Self {
        let normalizer = EpisodeNormalizer::new(&config.episode, config.embedding.dimensions);
        Self { config, normalizer }
    }

    pub fn config(&self) -> &ConverterConfig {
        &self.config
    }

    /// Find every trajectory directory under the configured root.
    pub fn list_trajectories(&self) -> Result<TrajectoryWalk> {
        find_trajectories(&self.config.source.root)
    }

    /// Normalize one trajectory without writing anything.
    pub async fn inspect_trajectory<E: Embedder>(
        &self,
        path: &Path,
        embedder: Option<&E>,
    ) -> Result<Option<(PathBuf, EpisodeRecord)>> {
        self.normalizer.normalize(path, embedder).await
    }

    /// Convert the whole tree and return the counters and manifest.
    pub async fn run<E: Embedder>(
        &self,
        embedder: Option<&E>,
    ) -> Result<(ConversionSummary, DatasetManifest)> {
        let walk = self.list_trajectories()?;
        let total = walk.trajectories.len();
        let mut summary = ConversionSummary {
            trajectories: total,
            skipped_entries: walk.summary.skipped_entries,
            ..ConversionSummary::default()
        };

        let embedding_dim = embedder
            .map(|e| e.dimensions())
            .unwrap_or(self.config.embedding.dimensions);
        let mut writer = DatasetWriter::create(
            &self.config.output.dir,
            self.config.output.overwrite,
            self.normalizer.frame_shape(),
            embedding_dim,
        )?;

        info!(
            root = %self.config.source.root.display(),
            output = %self.config.output.dir.display(),
            trajectories = total,
            embeddings = embedder.is_some(),
            "starting conversion"
        );

        for (processed, path) in walk.trajectories.iter().enumerate() {
            match self.normalizer.normalize(path, embedder).await {
                Ok(Some((key, record))) => {
                    writer.write_episode(&key, &record)?;
                    summary.written += 1;
                }
                Ok(None) => summary.skipped_unannotated += 1,
                Err(err) if self.config.episode.skip_malformed => {
                    warn!(path = %path.display(), error = format!("{err:#}"), "skipping malformed trajectory");
                    summary.failed += 1;
                }
                Err(err) => {
                    return Err(err)
                        .with_context(|| format!("Failed to convert {}", path.display()));
                }
            }
            info!(processed = processed + 1, total, "trajectory done");
        }

        let manifest = writer.finish()?;
        info!(
            written = summary.written,
            skipped_unannotated = summary.skipped_unannotated,
            failed = summary.failed,
            skipped_entries = summary.skipped_entries,
            "conversion complete"
        );
        Ok((summary, manifest))
    }
}
