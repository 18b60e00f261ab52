//! Episode normalization: one trajectory directory in, one fixed-schema
//! episode out.
//!
//! The [`EpisodeNormalizer`] runs three stages per trajectory:
//!   1. gate on the required `annotations/lang_lupus.txt`,
//!   2. classify and load every entry of the directory into
//!      [`ExtractedFields`],
//!   3. assemble one [`StepRecord`] per timestep, substituting placeholders
//!      for modalities the trajectory did not record.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use tracing::debug;

use crate::config::EpisodeConfig;
use crate::model::Embedder;
use crate::source::entry::{self, EntryKind};

use super::fields::{load_field, FieldValue};
use super::images::{self, Frame, FrameShape};
use super::language::{self, LANGUAGE_SLOTS};
use super::types::{EpisodeMetadata, EpisodeRecord, Observation, StepRecord};

/// Field keys the normalizer reads.
pub mod keys {
    pub const DEPTH_0: &str = "depth_images0";
    pub const IMAGES: [&str; 4] = ["images0", "images1", "images2", "images3"];
    pub const LANG_LUPUS: &str = "lang_lupus";
    pub const LANG: &str = "lang";
    pub const OBS_DICT: &str = "obs_dict";
    pub const POLICY_OUT: &str = "policy_out";
    pub const AGENT_DATA: &str = "agent_data";
    pub const TERM_T: &str = "term_t";
}

// ---------------------------------------------------------------------------
// Extracted fields
// ---------------------------------------------------------------------------

/// Everything loaded from one trajectory directory, keyed by field name.
#[derive(Debug, Clone, Default)]
pub struct ExtractedFields {
    /// Serialized arrays and objects keyed by file stem.
    pub arrays: BTreeMap<String, FieldValue>,
    /// Image sequences keyed by directory name.
    pub images: BTreeMap<String, Vec<Frame>>,
    /// Raw lupus candidates, before padding and ranking.
    pub lang_lupus: Option<Vec<String>>,
    /// Raw groundtruth candidates, before padding.
    pub lang: Option<Vec<String>>,
}

impl ExtractedFields {
    /// Whether a field with this key was loaded.
    pub fn contains(&self, key: &str) -> bool {
        match key {
            keys::LANG_LUPUS => self.lang_lupus.is_some(),
            keys::LANG => self.lang.is_some(),
            _ => self.images.contains_key(key) || self.arrays.contains_key(key),
        }
    }

    /// Whether an image sequence with this key was loaded.
    pub fn has_frames(&self, key: &str) -> bool {
        self.images.contains_key(key)
    }

    fn array(&self, key: &str) -> Result<&FieldValue> {
        self.arrays
            .get(key)
            .with_context(|| format!("trajectory has no `{key}` field"))
    }
}

// ---------------------------------------------------------------------------
// Normalizer
// ---------------------------------------------------------------------------

/// Turns trajectory directories into [`EpisodeRecord`]s.
///
/// Holds no per-trajectory state; one instance is reused for a whole run.
#[derive(Debug, Clone)]
pub struct EpisodeNormalizer {
    shape: FrameShape,
    use_agent_data: bool,
    embedding_dim: usize,
    placeholder: Frame,
}

impl EpisodeNormalizer {
    /// Create a normalizer.
    ///
    /// * `embedding_dim` -- size of the zero vector written when no embedder
    ///   is supplied.
    pub fn new(config: &EpisodeConfig, embedding_dim: usize) -> Self {
        let shape = FrameShape {
            height: config.frame_height,
            width: config.frame_width,
        };
        Self {
            shape,
            use_agent_data: config.use_agent_data,
            embedding_dim,
            placeholder: images::placeholder_frame(shape),
        }
    }

    /// Frame shape every image slot is normalized to.
    pub fn frame_shape(&self) -> FrameShape {
        self.shape
    }

    /// Normalize one trajectory directory.
    ///
    /// Returns `Ok(None)` when the trajectory lacks the lupus annotation.
    /// Unreadable or malformed files are errors.
    pub async fn normalize<E: Embedder>(
        &self,
        path: &Path,
        embedder: Option<&E>,
    ) -> Result<Option<(PathBuf, EpisodeRecord)>> {
        if !entry::lupus_path(path).is_file() {
            debug!(path = %path.display(), "no lupus annotation, skipping trajectory");
            return Ok(None);
        }

        let fields = self.extract_fields(path)?;
        let record = self
            .assemble(path, fields, embedder)
            .await
            .with_context(|| format!("Failed to assemble episode {}", path.display()))?;

        Ok(Some((path.to_path_buf(), record)))
    }

    /// Load every entry of a trajectory directory.
    pub fn extract_fields(&self, path: &Path) -> Result<ExtractedFields> {
        let mut fields = ExtractedFields::default();

        let entries = std::fs::read_dir(path)
            .with_context(|| format!("Failed to list trajectory {}", path.display()))?;
        for dir_entry in entries {
            let dir_entry =
                dir_entry.with_context(|| format!("Failed to read entry in {}", path.display()))?;
            let entry_path = dir_entry.path();
            let name = dir_entry.file_name().to_string_lossy().into_owned();

            match entry::classify(&name, entry_path.is_dir()) {
                EntryKind::AnnotationDir => {
                    let lupus = entry_path.join(entry::LUPUS_FILE);
                    if lupus.is_file() {
                        fields.lang_lupus = Some(language::read_candidates(&lupus)?);
                    }
                }
                EntryKind::ImageSequenceDir { key } => {
                    let frames = images::load_sequence(&entry_path, self.shape)?;
                    fields.images.insert(key, frames);
                }
                EntryKind::AgentData { key, is_dir } => {
                    if self.use_agent_data && !is_dir {
                        fields.arrays.insert(key, load_field(&entry_path)?);
                    } else {
                        debug!(path = %entry_path.display(), "skipping agent data");
                    }
                }
                EntryKind::LanguageFile => {
                    fields.lang = Some(language::read_candidates(&entry_path)?);
                }
                EntryKind::GenericArrayFile { key } => {
                    fields.arrays.insert(key, load_field(&entry_path)?);
                }
            }
        }

        Ok(fields)
    }

    /// Number of steps: `agent_data.term_t` when agent data was loaded,
    /// otherwise the length of the policy output.
    pub fn trajectory_length(&self, fields: &ExtractedFields) -> Result<usize> {
        if let Some(agent_data) = fields.arrays.get(keys::AGENT_DATA) {
            return agent_data
                .get(keys::TERM_T)
                .and_then(FieldValue::as_usize)
                .context("invalid agent_data.term_t");
        }
        fields
            .array(keys::POLICY_OUT)?
            .len()
            .context("invalid policy_out")
    }

    async fn assemble<E: Embedder>(
        &self,
        path: &Path,
        fields: ExtractedFields,
        embedder: Option<&E>,
    ) -> Result<EpisodeRecord> {
        let traj_length = self.trajectory_length(&fields)?;

        let metadata = EpisodeMetadata {
            file_path: path.to_path_buf(),
            traj_length,
            has_depth_0: fields.has_frames(keys::DEPTH_0),
            has_image_0: fields.has_frames(keys::IMAGES[0]),
            has_image_1: fields.has_frames(keys::IMAGES[1]),
            has_image_2: fields.has_frames(keys::IMAGES[2]),
            has_image_3: fields.has_frames(keys::IMAGES[3]),
            has_language: fields.contains(keys::LANG_LUPUS),
            has_groundtruth: fields.contains(keys::LANG),
        };
        debug!(
            path = %path.display(),
            traj_length,
            has_depth_0 = metadata.has_depth_0,
            has_image_0 = metadata.has_image_0,
            has_image_1 = metadata.has_image_1,
            has_image_2 = metadata.has_image_2,
            has_image_3 = metadata.has_image_3,
            has_language = metadata.has_language,
            has_groundtruth = metadata.has_groundtruth,
            "normalizing trajectory"
        );

        for key in std::iter::once(keys::DEPTH_0).chain(keys::IMAGES) {
            let Some(frames) = fields.images.get(key) else {
                continue;
            };
            if frames.len() < traj_length {
                bail!(
                    "image sequence `{key}` has {} frames, trajectory needs {traj_length}",
                    frames.len()
                );
            }
        }

        let instructions = match fields.lang_lupus.clone() {
            Some(candidates) => language::rank_lupus(candidates),
            None => language::empty_slots(),
        };
        let groundtruth = match fields.lang.clone() {
            Some(candidates) => language::groundtruth_slots(candidates),
            None => language::empty_slots(),
        };
        let language_embedding = self
            .embed_instruction(metadata.has_language, &instructions, embedder)
            .await?;

        let obs_dict = fields.array(keys::OBS_DICT)?;
        let policy_out = fields.array(keys::POLICY_OUT)?;
        let states = obs_dict.get("state")?;
        let full_states = obs_dict.get("full_state")?;
        let desired_states = obs_dict.get("desired_state")?;

        let mut steps = Vec::with_capacity(traj_length);
        for i in 0..traj_length {
            let is_last = i + 1 == traj_length;
            let policy = policy_out
                .row(i)
                .with_context(|| format!("policy_out step {i}"))?;

            steps.push(StepRecord {
                observation: Observation {
                    depth_0: self.frame_or_placeholder(&fields, keys::DEPTH_0, i),
                    image_0: self.frame_or_placeholder(&fields, keys::IMAGES[0], i),
                    image_1: self.frame_or_placeholder(&fields, keys::IMAGES[1], i),
                    image_2: self.frame_or_placeholder(&fields, keys::IMAGES[2], i),
                    image_3: self.frame_or_placeholder(&fields, keys::IMAGES[3], i),
                    state: step_vector(states, i, "obs_dict.state")?,
                    full_state: step_vector(full_states, i, "obs_dict.full_state")?,
                    desired_state: step_vector(desired_states, i, "obs_dict.desired_state")?,
                },
                action: policy
                    .get("actions")?
                    .fixed()
                    .with_context(|| format!("policy_out.actions step {i}"))?,
                new_robot_transform: policy
                    .get("new_robot_transform")?
                    .matrix4()
                    .with_context(|| format!("policy_out.new_robot_transform step {i}"))?,
                delta_robot_transform: policy
                    .get("delta_robot_transform")?
                    .matrix4()
                    .with_context(|| format!("policy_out.delta_robot_transform step {i}"))?,
                discount: 1.0,
                reward: if is_last { 1.0 } else { 0.0 },
                is_first: i == 0,
                is_last,
                is_terminal: is_last,
                language_instruction: instructions.clone(),
                groundtruth: groundtruth.clone(),
                language_embedding: Arc::clone(&language_embedding),
            });
        }

        Ok(EpisodeRecord { steps, metadata })
    }

    /// The instruction embedding shared by every step of the episode.
    async fn embed_instruction<E: Embedder>(
        &self,
        has_language: bool,
        instructions: &[String; LANGUAGE_SLOTS],
        embedder: Option<&E>,
    ) -> Result<Arc<[f32]>> {
        let Some(embedder) = embedder else {
            return Ok(Arc::from(vec![0.0f32; self.embedding_dim]));
        };

        let text = if has_language { instructions[0].as_str() } else { "" };
        let embedding = embedder
            .embed(text)
            .await
            .with_context(|| format!("Failed to embed instruction {text:?}"))?;
        if embedding.len() != embedder.dimensions() {
            bail!(
                "embedder returned {} values, expected {}",
                embedding.len(),
                embedder.dimensions()
            );
        }
        Ok(Arc::from(embedding))
    }

    fn frame_or_placeholder(&self, fields: &ExtractedFields, key: &str, index: usize) -> Frame {
        fields
            .images
            .get(key)
            .and_then(|frames| frames.get(index))
            .map(Arc::clone)
            .unwrap_or_else(|| Arc::clone(&self.placeholder))
    }
}

fn step_vector(rows: &FieldValue, index: usize, name: &str) -> Result<[f64; 7]> {
    rows.row(index)
        .and_then(|row| row.fixed())
        .with_context(|| format!("{name} step {index}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{
        episode_config, write_trajectory, CountingEmbedder, FieldFormat, TrajectoryFixture,
    };
    use crate::model::EmbeddingClient;

    const NO_EMBEDDER: Option<&EmbeddingClient> = None;

    #[tokio::test]
    async fn test_missing_lupus_produces_no_record() {
        let tmp = tempfile::tempdir().unwrap();
        let fixture = TrajectoryFixture {
            lupus: None,
            ..TrajectoryFixture::default()
        };
        write_trajectory(tmp.path(), &fixture);

        let normalizer = EpisodeNormalizer::new(&episode_config(), 512);
        let out = normalizer.normalize(tmp.path(), NO_EMBEDDER).await.unwrap();
        assert!(out.is_none());
    }

    #[tokio::test]
    async fn test_full_episode_shape_and_flags() {
        let tmp = tempfile::tempdir().unwrap();
        let fixture = TrajectoryFixture {
            steps: 4,
            cameras: vec!["images0", "depth_images0"],
            ..TrajectoryFixture::default()
        };
        write_trajectory(tmp.path(), &fixture);

        let normalizer = EpisodeNormalizer::new(&episode_config(), 512);
        let (key, record) = normalizer
            .normalize(tmp.path(), NO_EMBEDDER)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(key, tmp.path());
        assert_eq!(record.len(), 4);
        assert_eq!(record.metadata.traj_length, 4);
        assert!(record.metadata.has_image_0);
        assert!(record.metadata.has_depth_0);
        assert!(!record.metadata.has_image_1);
        assert!(!record.metadata.has_image_3);
        assert!(record.metadata.has_language);
        assert!(record.metadata.has_groundtruth);

        let shape = normalizer.frame_shape();
        for (i, step) in record.steps.iter().enumerate() {
            let obs = &step.observation;
            for frame in [&obs.depth_0, &obs.image_0, &obs.image_1, &obs.image_2, &obs.image_3] {
                assert_eq!((frame.height(), frame.width()), (shape.height, shape.width));
            }
            // Fixture frames carry pixel value 10 + index.
            assert_eq!(obs.image_0.get_pixel(0, 0)[0], 10 + i as u8);
            assert!(obs.image_1.as_raw().iter().all(|&v| v == 1));
            assert_eq!(obs.state, [i as f64; 7]);
            assert!((step.action[0] - i as f64 * 0.1).abs() < 1e-9);
            assert_eq!(step.new_robot_transform[0][0], 1.0);
            assert_eq!(step.discount, 1.0);
            assert!(step.language_embedding.iter().all(|&v| v == 0.0));
            assert_eq!(step.language_embedding.len(), 512);
        }
    }

    #[tokio::test]
    async fn test_terminal_flags_and_reward_only_on_last_step() {
        let tmp = tempfile::tempdir().unwrap();
        write_trajectory(
            tmp.path(),
            &TrajectoryFixture {
                steps: 3,
                ..TrajectoryFixture::default()
            },
        );

        let normalizer = EpisodeNormalizer::new(&episode_config(), 512);
        let (_, record) = normalizer
            .normalize(tmp.path(), NO_EMBEDDER)
            .await
            .unwrap()
            .unwrap();

        let firsts: Vec<bool> = record.steps.iter().map(|s| s.is_first).collect();
        let lasts: Vec<bool> = record.steps.iter().map(|s| s.is_last).collect();
        let terminals: Vec<bool> = record.steps.iter().map(|s| s.is_terminal).collect();
        let rewards: Vec<f64> = record.steps.iter().map(|s| s.reward).collect();
        assert_eq!(firsts, vec![true, false, false]);
        assert_eq!(lasts, vec![false, false, true]);
        assert_eq!(terminals, lasts);
        assert_eq!(rewards, vec![0.0, 0.0, 1.0]);
        assert_eq!(record.total_reward(), 1.0);
    }

    #[tokio::test]
    async fn test_language_slots_are_ranked_and_padded() {
        let tmp = tempfile::tempdir().unwrap();
        write_trajectory(
            tmp.path(),
            &TrajectoryFixture {
                lupus: Some("pick up the red block\nconfidence: 0.8\npick\npick up block\n"),
                lang: Some("put cup on shelf\nconfidence: 0.9\n"),
                ..TrajectoryFixture::default()
            },
        );

        let normalizer = EpisodeNormalizer::new(&episode_config(), 512);
        let (_, record) = normalizer
            .normalize(tmp.path(), NO_EMBEDDER)
            .await
            .unwrap()
            .unwrap();

        for step in &record.steps {
            assert_eq!(
                step.language_instruction,
                ["pick", "pick up block", "pick up the red block"]
            );
            assert_eq!(
                step.groundtruth,
                ["put cup on shelf", "put cup on shelf", "put cup on shelf"]
            );
        }
    }

    #[tokio::test]
    async fn test_missing_groundtruth_uses_empty_strings() {
        let tmp = tempfile::tempdir().unwrap();
        write_trajectory(
            tmp.path(),
            &TrajectoryFixture {
                lang: None,
                ..TrajectoryFixture::default()
            },
        );

        let normalizer = EpisodeNormalizer::new(&episode_config(), 512);
        let (_, record) = normalizer
            .normalize(tmp.path(), NO_EMBEDDER)
            .await
            .unwrap()
            .unwrap();

        assert!(!record.metadata.has_groundtruth);
        assert!(record.metadata.has_language);
        assert_eq!(record.steps[0].groundtruth, ["", "", ""]);
    }

    #[tokio::test]
    async fn test_empty_lupus_file_still_counts_as_language() {
        let tmp = tempfile::tempdir().unwrap();
        write_trajectory(
            tmp.path(),
            &TrajectoryFixture {
                lupus: Some(""),
                ..TrajectoryFixture::default()
            },
        );

        let normalizer = EpisodeNormalizer::new(&episode_config(), 512);
        let (_, record) = normalizer
            .normalize(tmp.path(), NO_EMBEDDER)
            .await
            .unwrap()
            .unwrap();

        assert!(record.metadata.has_language);
        assert_eq!(record.steps[0].language_instruction, ["", "", ""]);
    }

    #[tokio::test]
    async fn test_embedding_computed_once_and_shared() {
        let tmp = tempfile::tempdir().unwrap();
        write_trajectory(
            tmp.path(),
            &TrajectoryFixture {
                steps: 5,
                lupus: Some("open the drawer\nopen\n"),
                ..TrajectoryFixture::default()
            },
        );

        let embedder = CountingEmbedder::new(8);
        let normalizer = EpisodeNormalizer::new(&episode_config(), 8);
        let (_, record) = normalizer
            .normalize(tmp.path(), Some(&embedder))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(embedder.calls(), 1);
        assert_eq!(embedder.texts(), vec!["open".to_string()]);
        let first = &record.steps[0].language_embedding;
        assert_eq!(first.len(), 8);
        assert!(record
            .steps
            .iter()
            .all(|s| s.language_embedding[..] == first[..]));
    }

    #[tokio::test]
    async fn test_agent_data_ignored_by_default() {
        let tmp = tempfile::tempdir().unwrap();
        write_trajectory(
            tmp.path(),
            &TrajectoryFixture {
                steps: 4,
                term_t: Some(2),
                ..TrajectoryFixture::default()
            },
        );

        let normalizer = EpisodeNormalizer::new(&episode_config(), 512);
        let (_, record) = normalizer
            .normalize(tmp.path(), NO_EMBEDDER)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.metadata.traj_length, 4);
    }

    #[tokio::test]
    async fn test_agent_data_term_t_sets_length_when_enabled() {
        let tmp = tempfile::tempdir().unwrap();
        write_trajectory(
            tmp.path(),
            &TrajectoryFixture {
                steps: 4,
                term_t: Some(2),
                ..TrajectoryFixture::default()
            },
        );

        let mut config = episode_config();
        config.use_agent_data = true;
        let normalizer = EpisodeNormalizer::new(&config, 512);
        let (_, record) = normalizer
            .normalize(tmp.path(), NO_EMBEDDER)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.metadata.traj_length, 2);
        assert_eq!(record.len(), 2);
        assert!(record.steps[1].is_last);
    }

    #[tokio::test]
    async fn test_short_image_sequence_is_an_error() {
        let tmp = tempfile::tempdir().unwrap();
        write_trajectory(
            tmp.path(),
            &TrajectoryFixture {
                steps: 3,
                cameras: vec!["images2"],
                frames: Some(2),
                ..TrajectoryFixture::default()
            },
        );

        let normalizer = EpisodeNormalizer::new(&episode_config(), 512);
        let err = normalizer
            .normalize(tmp.path(), NO_EMBEDDER)
            .await
            .unwrap_err();
        assert!(format!("{err:#}").contains("images2"));
    }

    #[tokio::test]
    async fn test_malformed_array_file_is_an_error() {
        let tmp = tempfile::tempdir().unwrap();
        write_trajectory(tmp.path(), &TrajectoryFixture::default());
        std::fs::write(tmp.path().join("policy_out.json"), b"{not json").unwrap();

        let normalizer = EpisodeNormalizer::new(&episode_config(), 512);
        assert!(normalizer.normalize(tmp.path(), NO_EMBEDDER).await.is_err());
    }

    #[tokio::test]
    async fn test_unrelated_directory_without_frames_is_ignored() {
        let tmp = tempfile::tempdir().unwrap();
        write_trajectory(tmp.path(), &TrajectoryFixture::default());
        std::fs::create_dir_all(tmp.path().join("raw_calibration")).unwrap();

        let normalizer = EpisodeNormalizer::new(&episode_config(), 512);
        let (_, record) = normalizer
            .normalize(tmp.path(), NO_EMBEDDER)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.len(), 3);
    }

    #[tokio::test]
    async fn test_lupus_path_that_is_a_directory_does_not_pass_gate() {
        let tmp = tempfile::tempdir().unwrap();
        write_trajectory(
            tmp.path(),
            &TrajectoryFixture {
                lupus: None,
                ..TrajectoryFixture::default()
            },
        );
        std::fs::create_dir_all(tmp.path().join("annotations/lang_lupus.txt")).unwrap();

        let normalizer = EpisodeNormalizer::new(&episode_config(), 512);
        let out = normalizer.normalize(tmp.path(), NO_EMBEDDER).await.unwrap();
        assert!(out.is_none());
    }

    #[tokio::test]
    async fn test_numpy_pickled_trajectory() {
        let tmp = tempfile::tempdir().unwrap();
        write_trajectory(
            tmp.path(),
            &TrajectoryFixture {
                steps: 4,
                term_t: Some(3),
                format: FieldFormat::NumpyPickle,
                ..TrajectoryFixture::default()
            },
        );
        assert!(tmp.path().join("obs_dict.pkl").is_file());

        let mut config = episode_config();
        config.use_agent_data = true;
        let normalizer = EpisodeNormalizer::new(&config, 512);
        let (_, record) = normalizer
            .normalize(tmp.path(), NO_EMBEDDER)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(record.metadata.traj_length, 3);
        for (i, step) in record.steps.iter().enumerate() {
            assert_eq!(step.observation.state, [i as f64; 7]);
            assert_eq!(step.observation.desired_state, [i as f64; 7]);
            assert!((step.action[6] - i as f64 * 0.1).abs() < 1e-9);
            assert_eq!(step.delta_robot_transform[2][2], 1.0);
            assert_eq!(step.delta_robot_transform[2][3], 0.0);
        }
    }

    #[tokio::test]
    async fn test_object_npy_trajectory() {
        let tmp = tempfile::tempdir().unwrap();
        write_trajectory(
            tmp.path(),
            &TrajectoryFixture {
                steps: 2,
                format: FieldFormat::ObjectNpy,
                ..TrajectoryFixture::default()
            },
        );

        let normalizer = EpisodeNormalizer::new(&episode_config(), 512);
        let (_, record) = normalizer
            .normalize(tmp.path(), NO_EMBEDDER)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(record.len(), 2);
        assert_eq!(record.steps[1].observation.full_state, [1.0; 7]);
        assert!((record.steps[1].action[0] - 0.1).abs() < 1e-9);
    }

    #[test]
    fn test_extract_fields_keys() {
        let tmp = tempfile::tempdir().unwrap();
        write_trajectory(
            tmp.path(),
            &TrajectoryFixture {
                cameras: vec!["images0", "images3"],
                ..TrajectoryFixture::default()
            },
        );

        let normalizer = EpisodeNormalizer::new(&episode_config(), 512);
        let fields = normalizer.extract_fields(tmp.path()).unwrap();
        assert!(fields.contains("obs_dict"));
        assert!(fields.contains("policy_out"));
        assert!(fields.contains("images0"));
        assert!(fields.contains("images3"));
        assert!(!fields.contains("images1"));
        assert!(fields.contains("lang_lupus"));
        assert!(fields.contains("lang"));
        assert!(!fields.contains("agent_data"));
    }
}
