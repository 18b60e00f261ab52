//! Model collaborators used during conversion.
//!
//! - [`embedding::Embedder`] -- the `text -> vector` contract the normalizer
//!   depends on.
//! - [`embedding::EmbeddingClient`] -- OpenAI-compatible HTTP implementation.

pub mod embedding;

pub use embedding::{Embedder, EmbeddingClient};
