//! Columnar on-disk output.
//!
//! Each episode becomes one directory of `.npy` columns whose leading axis is
//! the step index, plus JSON files for text columns and metadata:
//!
//! ```text
//! <out>/
//!   manifest.json
//!   episodes.jsonl
//!   episode_000000/
//!     metadata.json
//!     language.json
//!     observation.image_0.npy      (T, H, W, 3) u8
//!     observation.state.npy        (T, 7) f64
//!     action.npy                   (T, 7) f64
//!     new_robot_transform.npy      (T, 4, 4) f64
//!     reward.npy                   (T,) f64
//!     is_last.npy                  (T,) bool
//!     language_embedding.npy       (T, 1, D) f32
//!     ...
//! ```

use std::collections::{BTreeMap, HashSet};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use ndarray::{Array1, Array2, Array3, Array4};
use ndarray_npy::WriteNpyExt;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use crate::episode::language::LANGUAGE_SLOTS;
use crate::episode::{EpisodeMetadata, EpisodeRecord, Frame, FrameShape, StepRecord};

/// File listing every written episode, one JSON object per line.
pub const INDEX_FILE: &str = "episodes.jsonl";
/// Run-level summary written by [`DatasetWriter::finish`].
pub const MANIFEST_FILE: &str = "manifest.json";

/// Shapes shared by every episode in the dataset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetSchema {
    pub frame_height: u32,
    pub frame_width: u32,
    pub embedding_dim: usize,
    pub language_slots: usize,
}

/// Summary of a finished dataset.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetManifest {
    /// Unique identifier of the conversion run (UUID v4).
    pub run_id: String,
    pub created_at: DateTime<Utc>,
    pub schema: DatasetSchema,
    pub episodes: usize,
    pub total_steps: usize,
}

impl DatasetManifest {
    /// Read `manifest.json` from a dataset directory.
    pub fn load(dir: &Path) -> Result<Self> {
        let path = dir.join(MANIFEST_FILE);
        let text = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        serde_json::from_str(&text).with_context(|| format!("Failed to parse {}", path.display()))
    }
}

/// One line of `episodes.jsonl`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexEntry {
    /// Source trajectory path; unique across the dataset.
    pub key: PathBuf,
    /// Episode directory, relative to the dataset root.
    pub dir: String,
    pub metadata: EpisodeMetadata,
}

/// Appends normalized episodes to a dataset directory.
pub struct DatasetWriter {
    root: PathBuf,
    schema: DatasetSchema,
    index: BufWriter<File>,
    keys: HashSet<PathBuf>,
    total_steps: usize,
    created_at: DateTime<Utc>,
    run_id: String,
}

impl DatasetWriter {
    /// Prepare `root` for writing.
    ///
    /// A non-empty existing directory is refused unless `overwrite` is set,
    /// in which case it is removed first.
    pub fn create(
        root: &Path,
        overwrite: bool,
        shape: FrameShape,
        embedding_dim: usize,
    ) -> Result<Self> {
        if root.exists() && !is_empty_dir(root)? {
            if !overwrite {
                bail!(
                    "output directory {} already exists and is not empty",
                    root.display()
                );
            }
            info!(path = %root.display(), "removing existing output directory");
            std::fs::remove_dir_all(root)
                .with_context(|| format!("Failed to remove {}", root.display()))?;
        }
        std::fs::create_dir_all(root)
            .with_context(|| format!("Failed to create {}", root.display()))?;

        let index_path = root.join(INDEX_FILE);
        let index = File::create(&index_path)
            .with_context(|| format!("Failed to create {}", index_path.display()))?;

        Ok(Self {
            root: root.to_path_buf(),
            schema: DatasetSchema {
                frame_height: shape.height,
                frame_width: shape.width,
                embedding_dim,
                language_slots: LANGUAGE_SLOTS,
            },
            index: BufWriter::new(index),
            keys: HashSet::new(),
            total_steps: 0,
            created_at: Utc::now(),
            run_id: Uuid::new_v4().to_string(),
        })
    }

    /// Number of episodes written so far.
    pub fn episodes(&self) -> usize {
        self.keys.len()
    }

    /// Write one episode and return its directory.
    pub fn write_episode(&mut self, key: &Path, record: &EpisodeRecord) -> Result<PathBuf> {
        if self.keys.contains(key) {
            bail!("duplicate episode key {}", key.display());
        }

        let dir_name = format!("episode_{:06}", self.keys.len());
        let dir = self.root.join(&dir_name);
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create {}", dir.display()))?;

        self.write_columns(&dir, &record.steps)
            .with_context(|| format!("Failed to write episode {}", key.display()))?;
        write_json(&dir.join("metadata.json"), &record.metadata)?;

        let entry = IndexEntry {
            key: key.to_path_buf(),
            dir: dir_name,
            metadata: record.metadata.clone(),
        };
        serde_json::to_writer(&mut self.index, &entry)?;
        self.index.write_all(b"\n")?;

        self.keys.insert(key.to_path_buf());
        self.total_steps += record.steps.len();
        debug!(key = %key.display(), dir = %dir.display(), steps = record.steps.len(), "episode written");
        Ok(dir)
    }

    /// Flush the index and write the manifest.
    pub fn finish(mut self) -> Result<DatasetManifest> {
        self.index.flush().context("Failed to flush episode index")?;

        let manifest = DatasetManifest {
            run_id: self.run_id,
            created_at: self.created_at,
            schema: self.schema,
            episodes: self.keys.len(),
            total_steps: self.total_steps,
        };
        write_json(&self.root.join(MANIFEST_FILE), &manifest)?;

        info!(
            path = %self.root.display(),
            episodes = manifest.episodes,
            steps = manifest.total_steps,
            "dataset written"
        );
        Ok(manifest)
    }

    fn write_columns(&self, dir: &Path, steps: &[StepRecord]) -> Result<()> {
        let t = steps.len();

        let cameras: [(&str, fn(&StepRecord) -> &Frame); 5] = [
            ("depth_0", |s| &s.observation.depth_0),
            ("image_0", |s| &s.observation.image_0),
            ("image_1", |s| &s.observation.image_1),
            ("image_2", |s| &s.observation.image_2),
            ("image_3", |s| &s.observation.image_3),
        ];
        for (name, slot) in cameras {
            let frames = self.stack_frames(steps, slot, name)?;
            write_npy(&dir.join(format!("observation.{name}.npy")), &frames)?;
        }

        let vectors: [(&str, fn(&StepRecord) -> &[f64; 7]); 4] = [
            ("observation.state", |s| &s.observation.state),
            ("observation.full_state", |s| &s.observation.full_state),
            ("observation.desired_state", |s| &s.observation.desired_state),
            ("action", |s| &s.action),
        ];
        for (name, field) in vectors {
            let array = Array2::from_shape_fn((t, 7), |(i, j)| field(&steps[i])[j]);
            write_npy(&dir.join(format!("{name}.npy")), &array)?;
        }

        let transforms: [(&str, fn(&StepRecord) -> &[[f64; 4]; 4]); 2] = [
            ("new_robot_transform", |s| &s.new_robot_transform),
            ("delta_robot_transform", |s| &s.delta_robot_transform),
        ];
        for (name, field) in transforms {
            let array = Array3::from_shape_fn((t, 4, 4), |(i, r, c)| field(&steps[i])[r][c]);
            write_npy(&dir.join(format!("{name}.npy")), &array)?;
        }

        let discount: Array1<f64> = steps.iter().map(|s| s.discount).collect();
        write_npy(&dir.join("discount.npy"), &discount)?;
        let reward: Array1<f64> = steps.iter().map(|s| s.reward).collect();
        write_npy(&dir.join("reward.npy"), &reward)?;

        let flags: [(&str, fn(&StepRecord) -> bool); 3] = [
            ("is_first", |s| s.is_first),
            ("is_last", |s| s.is_last),
            ("is_terminal", |s| s.is_terminal),
        ];
        for (name, flag) in flags {
            let array: Array1<bool> = steps.iter().map(flag).collect();
            write_npy(&dir.join(format!("{name}.npy")), &array)?;
        }

        let dim = self.schema.embedding_dim;
        for (i, step) in steps.iter().enumerate() {
            if step.language_embedding.len() != dim {
                bail!(
                    "step {i} embedding has {} values, dataset expects {dim}",
                    step.language_embedding.len()
                );
            }
        }
        let embedding = Array3::from_shape_fn((t, 1, dim), |(i, _, j)| {
            steps[i].language_embedding[j]
        });
        write_npy(&dir.join("language_embedding.npy"), &embedding)?;

        write_json(&dir.join("language.json"), &language_columns(steps))?;
        Ok(())
    }

    fn stack_frames(
        &self,
        steps: &[StepRecord],
        slot: fn(&StepRecord) -> &Frame,
        name: &str,
    ) -> Result<Array4<u8>> {
        let (h, w) = (
            self.schema.frame_height as usize,
            self.schema.frame_width as usize,
        );
        let mut data = Vec::with_capacity(steps.len() * h * w * 3);
        for (i, step) in steps.iter().enumerate() {
            let frame = slot(step);
            if frame.height() as usize != h || frame.width() as usize != w {
                bail!(
                    "{name} step {i} is {}x{}, dataset expects {h}x{w}",
                    frame.height(),
                    frame.width()
                );
            }
            data.extend_from_slice(frame.as_raw());
        }
        Array4::from_shape_vec((steps.len(), h, w, 3), data)
            .with_context(|| format!("Failed to stack {name} frames"))
    }
}

/// Text columns, one list of per-step strings per slot.
fn language_columns(steps: &[StepRecord]) -> BTreeMap<String, Vec<&str>> {
    let mut columns = BTreeMap::new();
    for slot in 0..LANGUAGE_SLOTS {
        columns.insert(
            format!("language_instruction_{slot}"),
            steps
                .iter()
                .map(|s| s.language_instruction[slot].as_str())
                .collect(),
        );
        columns.insert(
            format!("groundtruth_{slot}"),
            steps.iter().map(|s| s.groundtruth[slot].as_str()).collect(),
        );
    }
    columns
}

fn write_npy<T: WriteNpyExt>(path: &Path, array: &T) -> Result<()> {
    let file =
        File::create(path).with_context(|| format!("Failed to create {}", path.display()))?;
    array
        .write_npy(BufWriter::new(file))
        .with_context(|| format!("Failed to write {}", path.display()))
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value)?;
    std::fs::write(path, json).with_context(|| format!("Failed to write {}", path.display()))
}

fn is_empty_dir(path: &Path) -> Result<bool> {
    let mut entries = std::fs::read_dir(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    Ok(entries.next().is_none())
}
