//! Telephony provider adapter
//!
//! Discovers call recordings from the provider's call log, downloads their
//! media into the staging area, and syncs the provider's video-meeting
//! history. Authentication is a long-lived JWT exchanged for short-lived
//! access tokens.

pub mod auth;
pub mod client;
pub mod sync;
pub mod video;

pub use auth::TokenManager;
pub use client::TelephonyClient;
pub use sync::CallIngestor;
pub use video::VideoMeetingSync;
