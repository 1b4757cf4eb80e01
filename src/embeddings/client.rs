//! Embedding provider client
//!
//! JSON-over-HTTPS embeddings endpoint with a bearer token; every vector
//! must come back with the configured dimensionality.

use serde::Deserialize;

use crate::config::EmbeddingConfig;
use crate::error::{Error, Result};

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f64>,
}

pub struct EmbeddingClient {
    config: EmbeddingConfig,
    client: reqwest::Client,
}

impl EmbeddingClient {
    pub fn new(config: EmbeddingConfig) -> Self {
        Self {
            config,
            client: crate::http_client::api_client(),
        }
    }

    pub fn model(&self) -> &str {
        &self.config.model
    }

    pub fn dimensions(&self) -> usize {
        self.config.dimensions
    }

    /// Generate an embedding for a single text
    pub async fn embed(&self, text: &str) -> Result<Vec<f64>> {
        let response = self
            .client
            .post(format!("{}/embeddings", self.config.base_url))
            .bearer_auth(&self.config.api_key)
            .json(&serde_json::json!({
                "model": self.config.model,
                "input": text,
            }))
            .send()
            .await
            .map_err(|e| Error::Network(format!("Embedding request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(Error::Http(format!(
                "Embedding API error ({status}): {body}"
            )));
        }

        let parsed: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| Error::Other(format!("Failed to parse embedding response: {e}")))?;

        let embedding = parsed
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| Error::Other("No embedding in response".to_string()))?;

        if embedding.len() != self.config.dimensions {
            return Err(Error::Other(format!(
                "Embedding dimensionality mismatch: expected {}, got {}",
                self.config.dimensions,
                embedding.len()
            )));
        }

        Ok(embedding)
    }

    /// Health probe: embed a trivial text and report reachability
    pub async fn health_check(&self) -> bool {
        match self.embed("health check").await {
            Ok(_) => true,
            Err(e) => {
                tracing::warn!("Embedding provider health check failed: {}", e);
                false
            }
        }
    }
}

/// Format an embedding vector for pgvector insertion
///
/// Converts Vec<f64> to a literal like "[0.1,0.2,0.3]"
pub fn format_embedding_for_pg(embedding: &[f64]) -> String {
    format!(
        "[{}]",
        embedding
            .iter()
            .map(|x| x.to_string())
            .collect::<Vec<_>>()
            .join(",")
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_for(server: &mockito::ServerGuard, dimensions: usize) -> EmbeddingConfig {
        EmbeddingConfig {
            base_url: server.url(),
            api_key: "key".into(),
            model: "text-embedding-ada-002".into(),
            dimensions,
        }
    }

    #[test]
    fn test_format_embedding() {
        let embedding = vec![0.1, 0.2, 0.3];
        assert_eq!(format_embedding_for_pg(&embedding), "[0.1,0.2,0.3]");
    }

    #[tokio::test]
    async fn test_embed_parses_vector() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/embeddings")
            .with_status(200)
            .with_body(r#"{"data": [{"embedding": [0.1, 0.2, 0.3]}]}"#)
            .create_async()
            .await;

        let client = EmbeddingClient::new(config_for(&server, 3));
        let embedding = client.embed("hello").await.unwrap();
        assert_eq!(embedding, vec![0.1, 0.2, 0.3]);
    }

    #[tokio::test]
    async fn test_embed_rejects_wrong_dimensionality() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/embeddings")
            .with_status(200)
            .with_body(r#"{"data": [{"embedding": [0.1, 0.2]}]}"#)
            .create_async()
            .await;

        let client = EmbeddingClient::new(config_for(&server, 3));
        assert!(client.embed("hello").await.is_err());
    }

    #[tokio::test]
    async fn test_embed_surfaces_api_errors() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/embeddings")
            .with_status(429)
            .create_async()
            .await;

        let client = EmbeddingClient::new(config_for(&server, 3));
        assert!(client.embed("hello").await.is_err());
    }
}
