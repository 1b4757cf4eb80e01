//! Telephony token management
//!
//! The provider authenticates with a long-lived JWT exchanged for
//! short-lived access tokens. The manager caches the current token and
//! refreshes it transparently shortly before expiry; on a 401 the caller
//! asks for one forced refresh and retries once.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use tokio::sync::Mutex;

use crate::config::TelephonyConfig;
use crate::error::{Error, Result};

/// Refresh this long before the token actually expires
const EXPIRY_MARGIN_SECS: i64 = 60;

#[derive(Debug, Clone)]
struct CachedToken {
    access_token: String,
    expires_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: i64,
}

/// Caching access-token manager for the telephony provider
#[derive(Clone)]
pub struct TokenManager {
    config: TelephonyConfig,
    client: reqwest::Client,
    cached: Arc<Mutex<Option<CachedToken>>>,
}

impl TokenManager {
    pub fn new(config: TelephonyConfig) -> Self {
        Self {
            config,
            client: crate::http_client::api_client(),
            cached: Arc::new(Mutex::new(None)),
        }
    }

    /// Get a valid access token, exchanging the JWT when needed
    pub async fn access_token(&self) -> Result<String> {
        let mut cached = self.cached.lock().await;

        if let Some(token) = cached.as_ref() {
            if token.expires_at > Utc::now() + Duration::seconds(EXPIRY_MARGIN_SECS) {
                return Ok(token.access_token.clone());
            }
        }

        let fresh = self.exchange_jwt().await?;
        let access_token = fresh.access_token.clone();
        *cached = Some(fresh);

        Ok(access_token)
    }

    /// Drop the cached token and fetch a new one (after a 401)
    pub async fn force_refresh(&self) -> Result<String> {
        let mut cached = self.cached.lock().await;
        let fresh = self.exchange_jwt().await?;
        let access_token = fresh.access_token.clone();
        *cached = Some(fresh);

        Ok(access_token)
    }

    async fn exchange_jwt(&self) -> Result<CachedToken> {
        let url = format!("{}/restapi/oauth/token", self.config.server_url);

        let response = self
            .client
            .post(&url)
            .basic_auth(&self.config.client_id, Some(&self.config.client_secret))
            .form(&[
                ("grant_type", "urn:ietf:params:oauth:grant-type:jwt-bearer"),
                ("assertion", self.config.jwt_token.as_str()),
            ])
            .send()
            .await
            .map_err(|e| Error::Network(format!("Token exchange failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unable to read error response".to_string());
            return Err(Error::Authentication(format!(
                "Token exchange rejected ({status}): {body}"
            )));
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| Error::Other(format!("Failed to parse token response: {e}")))?;

        tracing::debug!(expires_in = token.expires_in, "Exchanged JWT for access token");

        Ok(CachedToken {
            access_token: token.access_token,
            expires_at: Utc::now() + Duration::seconds(token.expires_in),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config(server_url: String) -> TelephonyConfig {
        TelephonyConfig {
            server_url,
            client_id: "client".into(),
            client_secret: "secret".into(),
            jwt_token: "jwt-assertion".into(),
        }
    }

    #[tokio::test]
    async fn test_token_exchange_and_caching() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/restapi/oauth/token")
            .with_status(200)
            .with_body(r#"{"access_token": "token-1", "expires_in": 3600}"#)
            .expect(1)
            .create_async()
            .await;

        let manager = TokenManager::new(test_config(server.url()));

        let first = manager.access_token().await.unwrap();
        let second = manager.access_token().await.unwrap();
        assert_eq!(first, "token-1");
        assert_eq!(second, "token-1");

        // Only one exchange despite two calls
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_force_refresh_fetches_again() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/restapi/oauth/token")
            .with_status(200)
            .with_body(r#"{"access_token": "token-x", "expires_in": 3600}"#)
            .expect(2)
            .create_async()
            .await;

        let manager = TokenManager::new(test_config(server.url()));
        manager.access_token().await.unwrap();
        manager.force_refresh().await.unwrap();

        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_rejected_exchange_is_auth_error() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/restapi/oauth/token")
            .with_status(400)
            .with_body(r#"{"error": "invalid_grant"}"#)
            .create_async()
            .await;

        let manager = TokenManager::new(test_config(server.url()));
        let result = manager.access_token().await;
        assert!(matches!(result, Err(Error::Authentication(_))));
    }
}
