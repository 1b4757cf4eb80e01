//! Shared HTTP Client Configuration
//!
//! Provides pre-configured HTTP clients with appropriate timeouts for
//! different use cases (API calls vs media downloads).
//!
//! All provider clients should use these to ensure consistent timeout
//! behavior and connection pooling.

use std::time::Duration;

/// Connect timeout in seconds (time to establish TCP connection)
pub const CONNECT_TIMEOUT_SECS: u64 = 10;

/// Request timeout for regular API requests in seconds
pub const REQUEST_TIMEOUT_SECS: u64 = 60;

/// Request timeout for media downloads in seconds (large recordings stream slowly)
pub const DOWNLOAD_TIMEOUT_SECS: u64 = 600;

/// Create an HTTP client for regular API requests
pub fn api_client() -> reqwest::Client {
    reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
        .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
        .build()
        .expect("Failed to build HTTP client")
}

/// Create an HTTP client for media downloads
///
/// Uses a long total timeout so multi-hundred-megabyte recordings can
/// stream to disk without being cut off mid-transfer.
pub fn download_client() -> reqwest::Client {
    reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
        .timeout(Duration::from_secs(DOWNLOAD_TIMEOUT_SECS))
        .build()
        .expect("Failed to build download HTTP client")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_client_creation() {
        let client = api_client();
        drop(client);
    }

    #[test]
    fn test_download_client_creation() {
        let client = download_client();
        drop(client);
    }
}
