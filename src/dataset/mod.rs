//! Columnar dataset output.
//!
//! [`writer::DatasetWriter`] lays each normalized episode out as a directory
//! of `.npy` columns and records it in a JSON-lines index and a manifest.

pub mod writer;

pub use writer::{DatasetManifest, DatasetSchema, DatasetWriter, IndexEntry};
