//! Episode parsing and normalization.
//!
//! This module provides:
//! - [`types::EpisodeRecord`], [`types::StepRecord`], [`types::EpisodeMetadata`]
//!   -- the fixed-schema output of one trajectory.
//! - [`normalizer::EpisodeNormalizer`] -- loads a trajectory directory and
//!   assembles its steps.
//! - [`fields`], [`images`], [`language`] -- decoders for the serialized
//!   arrays, camera frames and annotation text a trajectory contains.
//! - [`pickle`] -- pickle decoding that rebuilds numpy arrays.

pub mod fields;
pub mod images;
pub mod language;
pub mod normalizer;
pub mod pickle;
pub mod types;

pub use fields::FieldValue;
pub use images::{Frame, FrameShape};
pub use normalizer::{EpisodeNormalizer, ExtractedFields};
pub use types::{EpisodeMetadata, EpisodeRecord, Observation, StepRecord};
