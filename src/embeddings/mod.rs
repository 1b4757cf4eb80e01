//! Transcript embedding subsystem

pub mod chunker;
pub mod client;
pub mod job;

pub use client::{format_embedding_for_pg, EmbeddingClient};
pub use job::EmbeddingJob;
