//! Normalized episode data types.
//!
//! Every step carries the same fixed set of slots regardless of which
//! modalities the source trajectory recorded; presence is tracked once per
//! episode in [`EpisodeMetadata`].

use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::images::Frame;
use super::language::LANGUAGE_SLOTS;

// ---------------------------------------------------------------------------
// Single step
// ---------------------------------------------------------------------------

/// Camera frames and robot state observed at one timestep.
#[derive(Debug, Clone)]
pub struct Observation {
    /// Depth camera, or the all-ones placeholder.
    pub depth_0: Frame,
    /// Main camera, or the all-ones placeholder.
    pub image_0: Frame,
    pub image_1: Frame,
    pub image_2: Frame,
    pub image_3: Frame,
    /// End-effector state: 3x position, 3x euler orientation, 1x gripper width.
    pub state: [f64; 7],
    pub full_state: [f64; 7],
    pub desired_state: [f64; 7],
}

/// One normalized timestep.
#[derive(Debug, Clone)]
pub struct StepRecord {
    pub observation: Observation,
    /// Delta action: 3x position delta, 3x orientation delta, 1x gripper.
    pub action: [f64; 7],
    /// Opaque 4x4 payload copied from the policy output.
    pub new_robot_transform: [[f64; 4]; 4],
    /// Opaque 4x4 payload copied from the policy output.
    pub delta_robot_transform: [[f64; 4]; 4],
    /// Always 1.0.
    pub discount: f64,
    /// 1.0 on the final step, 0.0 elsewhere.
    pub reward: f64,
    pub is_first: bool,
    pub is_last: bool,
    pub is_terminal: bool,
    /// Lupus candidates, shortest first; empty strings without language.
    pub language_instruction: [String; LANGUAGE_SLOTS],
    /// Groundtruth candidates in file order; empty strings when absent.
    pub groundtruth: [String; LANGUAGE_SLOTS],
    /// Sentence embedding of `language_instruction[0]`, shared by all steps.
    pub language_embedding: Arc<[f32]>,
}

// ---------------------------------------------------------------------------
// Episode metadata
// ---------------------------------------------------------------------------

/// Per-episode modality presence and provenance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EpisodeMetadata {
    /// Source trajectory directory.
    pub file_path: PathBuf,
    /// Number of steps (same as `steps.len()`).
    pub traj_length: usize,
    pub has_depth_0: bool,
    pub has_image_0: bool,
    pub has_image_1: bool,
    pub has_image_2: bool,
    pub has_image_3: bool,
    /// A lupus annotation was present (possibly empty).
    pub has_language: bool,
    /// A `lang.txt` groundtruth annotation was present.
    pub has_groundtruth: bool,
}

// ---------------------------------------------------------------------------
// Full episode
// ---------------------------------------------------------------------------

/// A normalized trajectory.
#[derive(Debug, Clone)]
pub struct EpisodeRecord {
    pub steps: Vec<StepRecord>,
    pub metadata: EpisodeMetadata,
}

impl EpisodeRecord {
    /// Number of steps.
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// Whether the episode has no steps.
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Total reward over the episode.
    pub fn total_reward(&self) -> f64 {
        self.steps.iter().map(|s| s.reward).sum()
    }
}
