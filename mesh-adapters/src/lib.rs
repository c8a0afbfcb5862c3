//! Model and embedding adapters used by the orchestrator.
//!
//! Completion providers implement [`traits::ModelAdapter`]; embedding providers
//! implement [`embeddings::EmbeddingAdapter`]. Both share the hyper client built
//! in [`http_client`].

#![warn(missing_docs, clippy::pedantic)]

pub mod embeddings;
pub mod http_client;
pub mod openai;
pub mod traits;
