//! LLM client for the analytical cascade

pub mod client;

pub use client::{ChatClient, LlmClient, LlmRequest, LlmResponse, Usage};
