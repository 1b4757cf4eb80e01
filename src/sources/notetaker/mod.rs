//! Notetaker provider adapter
//!
//! Each employee connects their own API key (stored encrypted); syncs run
//! concurrently across employees but serialized per key to respect the
//! provider's 60 requests/min/key limit.

pub mod client;
pub mod keys;
pub mod sync;

pub use client::NotetakerClient;
pub use keys::{Employee, EmployeeKeyStore};
pub use sync::NotetakerSync;
