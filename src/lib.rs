//! bridge-convert: normalizes raw Bridge robot-teleoperation trajectories into
//! a fixed-schema columnar dataset.
//!
//! Raw trajectories mix serialized arrays, camera frame folders and free-text
//! annotations, with modalities recorded inconsistently from one episode to
//! the next. Conversion pads every episode to the same per-step schema and
//! records modality presence once per episode.

pub mod config;
pub mod dataset;
pub mod episode;
pub mod model;
pub mod pipeline;
pub mod source;

#[cfg(test)]
pub(crate) mod test_support;
