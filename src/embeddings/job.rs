//! Embedding ingest job
//!
//! For every transcript without an embedding row, build the enhanced
//! text (metadata header + body), chunk with overlap when it exceeds the
//! provider's input bound, average the chunk vectors into one
//! representative vector, and upsert it with its filterable facets.

use sqlx::PgPool;

use super::chunker::{average_vectors, create_overlapping_chunks, CHUNK_OVERLAP};
use super::client::{format_embedding_for_pg, EmbeddingClient};
use crate::error::{Error, Result};

/// Provider input bound for the enhanced text, in characters
pub const MAX_ENHANCED_TEXT_CHARS: usize = 1028;

/// Below this remaining body budget, truncate instead of chunking
pub const MIN_BODY_BUDGET_CHARS: usize = 128;

/// Transcripts shorter than this are not worth indexing
pub const MIN_TRANSCRIPT_CHARS: usize = 100;

/// Outcome of one embedding ingest pass
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct EmbeddingJobStats {
    pub processed: usize,
    pub failed: usize,
    pub skipped: usize,
}

/// Facets stored alongside a vector for filtered search
#[derive(Debug, Clone, Default, sqlx::FromRow)]
pub struct EmbeddingSource {
    pub recording_id: String,
    pub transcript_text: String,
    pub customer_name: Option<String>,
    pub employee_name: Option<String>,
    pub call_date: Option<chrono::NaiveDate>,
    pub duration_seconds: Option<i32>,
    pub word_count: Option<i32>,
    pub customer_sentiment: Option<String>,
    pub call_quality_score: Option<f64>,
    pub customer_satisfaction_score: Option<f64>,
    pub call_type: Option<String>,
    pub issue_category: Option<String>,
    pub summary: Option<String>,
    pub key_topics: Option<serde_json::Value>,
}

/// Assemble the enhanced text: canonical header lines, then the body
pub fn enhanced_text(source: &EmbeddingSource) -> String {
    format!(
        "Customer: {}\nEmployee: {}\nDate: {}\nSentiment: {}\nCall Type: {}\nIssue: {}\nSummary: {}\n\nTranscript:\n{}",
        source.customer_name.as_deref().unwrap_or("Unknown"),
        source.employee_name.as_deref().unwrap_or("Unknown"),
        source
            .call_date
            .map(|d| d.to_string())
            .unwrap_or_default(),
        source.customer_sentiment.as_deref().unwrap_or(""),
        source.call_type.as_deref().unwrap_or(""),
        source.issue_category.as_deref().unwrap_or(""),
        source.summary.as_deref().unwrap_or(""),
        source.transcript_text,
    )
}

/// The header lines alone (everything up to and including "Transcript:\n")
pub fn metadata_prefix(source: &EmbeddingSource) -> String {
    let full = enhanced_text(source);
    match full.find("Transcript:\n") {
        Some(idx) => full[..idx + "Transcript:\n".len()].to_string(),
        None => full,
    }
}

pub struct EmbeddingJob {
    pool: PgPool,
    client: EmbeddingClient,
}

impl EmbeddingJob {
    pub fn new(pool: PgPool, client: EmbeddingClient) -> Self {
        Self { pool, client }
    }

    /// Embed every transcript still missing a row, up to `batch_size`
    ///
    /// Also re-embeds rows whose sentiment facet was still null when they
    /// were first indexed but whose insights have since landed, so the
    /// facet snapshot converges once the cascade catches up.
    pub async fn process_all(&self, batch_size: i64) -> Result<EmbeddingJobStats> {
        let mut stats = EmbeddingJobStats::default();

        let candidates = sqlx::query_as::<_, (String,)>(
            r#"
            SELECT t.recording_id
            FROM transcripts t
            LEFT JOIN transcript_embeddings e ON t.recording_id = e.recording_id
            LEFT JOIN meetings m ON m.recording_id = t.recording_id
            LEFT JOIN meeting_insights mi ON mi.meeting_id = m.id
            WHERE t.transcript_text IS NOT NULL
              AND LENGTH(t.transcript_text) >= $1
              AND (e.recording_id IS NULL
                   OR (e.customer_sentiment IS NULL AND mi.id IS NOT NULL))
            ORDER BY t.created_at ASC
            LIMIT $2
            "#,
        )
        .bind(MIN_TRANSCRIPT_CHARS as i32)
        .bind(batch_size)
        .fetch_all(&self.pool)
        .await?;

        for (recording_id,) in candidates {
            match self.process_transcript(&recording_id).await {
                Ok(true) => stats.processed += 1,
                Ok(false) => stats.skipped += 1,
                Err(e) => {
                    stats.failed += 1;
                    tracing::error!(
                        recording_id = %recording_id,
                        error = %e,
                        "Embedding ingest failed"
                    );
                }
            }
        }

        tracing::info!(
            processed = stats.processed,
            failed = stats.failed,
            skipped = stats.skipped,
            "Embedding ingest pass complete"
        );

        Ok(stats)
    }

    /// Embed one transcript; idempotent via upsert on recording_id
    pub async fn process_transcript(&self, recording_id: &str) -> Result<bool> {
        let Some(source) = self.fetch_source(recording_id).await? else {
            tracing::warn!(recording_id, "No transcript found for embedding");
            return Ok(false);
        };

        if source.transcript_text.chars().count() < MIN_TRANSCRIPT_CHARS {
            return Ok(false);
        }

        let embedding = self.embed_source(&source).await?;
        self.upsert(&source, &embedding).await?;

        Ok(true)
    }

    /// Produce one representative vector for the enhanced text
    async fn embed_source(&self, source: &EmbeddingSource) -> Result<Vec<f64>> {
        let full = enhanced_text(source);

        if full.chars().count() <= MAX_ENHANCED_TEXT_CHARS {
            return self.client.embed(&full).await;
        }

        let prefix = metadata_prefix(source);
        let prefix_len = prefix.chars().count();
        let body_budget = MAX_ENHANCED_TEXT_CHARS.saturating_sub(prefix_len);

        if body_budget <= MIN_BODY_BUDGET_CHARS {
            // Header alone nearly fills the budget; truncate and embed once
            let truncated: String = full.chars().take(MAX_ENHANCED_TEXT_CHARS).collect();
            return self.client.embed(&truncated).await;
        }

        let chunks =
            create_overlapping_chunks(&source.transcript_text, body_budget, CHUNK_OVERLAP);
        let mut vectors = Vec::with_capacity(chunks.len());

        for (i, chunk) in chunks.iter().enumerate() {
            let chunk_text = format!("{prefix}{chunk}");
            let vector = self.client.embed(&chunk_text).await?;
            tracing::debug!(chunk = i + 1, total = chunks.len(), "Embedded chunk");
            vectors.push(vector);
        }

        average_vectors(&vectors)
            .ok_or_else(|| Error::Other("No chunk embeddings produced".to_string()))
    }

    /// Transcript plus the facets from the recording's analysis row
    ///
    /// Sentiment, quality, and topics come from the layer-2 insights of
    /// the analysis row every archived recording gets; when the cascade
    /// has not reached the recording yet the facets stay null and the
    /// next ingest pass after analysis refreshes them via the upsert.
    async fn fetch_source(&self, recording_id: &str) -> Result<Option<EmbeddingSource>> {
        let source = sqlx::query_as::<_, EmbeddingSource>(
            r#"
            SELECT
                t.recording_id,
                t.transcript_text,
                t.customer_name,
                t.employee_name,
                r.start_time::date AS call_date,
                r.duration AS duration_seconds,
                t.word_count,
                CASE
                    WHEN mi.id IS NULL THEN NULL
                    WHEN mi.sentiment_negative > mi.sentiment_positive
                     AND mi.sentiment_negative >= mi.sentiment_neutral THEN 'negative'
                    WHEN mi.sentiment_positive >= mi.sentiment_neutral THEN 'positive'
                    ELSE 'neutral'
                END AS customer_sentiment,
                mi.meeting_quality_score::float8 AS call_quality_score,
                mi.customer_health_score::float8 AS customer_satisfaction_score,
                m.meeting_type AS call_type,
                mi.details_json->'key_concerns'->>0 AS issue_category,
                m.summary AS summary,
                COALESCE(mi.details_json->'topics', '[]'::jsonb) AS key_topics
            FROM transcripts t
            JOIN recordings r ON t.recording_id = r.recording_id
            LEFT JOIN meetings m ON m.recording_id = t.recording_id
            LEFT JOIN meeting_insights mi ON mi.meeting_id = m.id
            WHERE t.recording_id = $1
            ORDER BY m.created_at ASC
            LIMIT 1
            "#,
        )
        .bind(recording_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(source)
    }

    async fn upsert(&self, source: &EmbeddingSource, embedding: &[f64]) -> Result<()> {
        let vector_literal = format_embedding_for_pg(embedding);

        sqlx::query(
            r#"
            INSERT INTO transcript_embeddings (
                recording_id, embedding, transcript_text,
                customer_name, employee_name, call_date, duration_seconds, word_count,
                customer_sentiment, call_quality_score, customer_satisfaction_score,
                call_type, issue_category, summary, key_topics, embedding_model
            ) VALUES (
                $1, $2::vector, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16
            )
            ON CONFLICT (recording_id) DO UPDATE SET
                embedding = EXCLUDED.embedding,
                transcript_text = EXCLUDED.transcript_text,
                customer_name = EXCLUDED.customer_name,
                employee_name = EXCLUDED.employee_name,
                customer_sentiment = EXCLUDED.customer_sentiment,
                call_quality_score = EXCLUDED.call_quality_score,
                customer_satisfaction_score = EXCLUDED.customer_satisfaction_score,
                call_type = EXCLUDED.call_type,
                issue_category = EXCLUDED.issue_category,
                summary = EXCLUDED.summary,
                key_topics = EXCLUDED.key_topics,
                embedding_model = EXCLUDED.embedding_model,
                updated_at = NOW()
            "#,
        )
        .bind(&source.recording_id)
        .bind(&vector_literal)
        .bind(&source.transcript_text)
        .bind(&source.customer_name)
        .bind(&source.employee_name)
        .bind(source.call_date)
        .bind(source.duration_seconds)
        .bind(source.word_count)
        .bind(&source.customer_sentiment)
        .bind(source.call_quality_score)
        .bind(source.customer_satisfaction_score)
        .bind(&source.call_type)
        .bind(&source.issue_category)
        .bind(&source.summary)
        .bind(
            source
                .key_topics
                .clone()
                .unwrap_or_else(|| serde_json::json!([])),
        )
        .bind(self.client.model())
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source_with_body(body: &str) -> EmbeddingSource {
        EmbeddingSource {
            recording_id: "REC-1".into(),
            transcript_text: body.to_string(),
            customer_name: Some("Acme".into()),
            employee_name: Some("Ada".into()),
            call_date: chrono::NaiveDate::from_ymd_opt(2025, 9, 21),
            customer_sentiment: Some("positive".into()),
            ..Default::default()
        }
    }

    #[test]
    fn test_enhanced_text_header_lines() {
        let text = enhanced_text(&source_with_body("hello"));
        assert!(text.starts_with("Customer: Acme\nEmployee: Ada\n"));
        assert!(text.contains("Sentiment: positive"));
        assert!(text.ends_with("Transcript:\nhello"));
    }

    #[test]
    fn test_metadata_prefix_stops_at_transcript_marker() {
        let prefix = metadata_prefix(&source_with_body("body text"));
        assert!(prefix.ends_with("Transcript:\n"));
        assert!(!prefix.contains("body text"));
    }

    #[test]
    fn test_short_enhanced_text_fits_single_shot() {
        let text = enhanced_text(&source_with_body("short"));
        assert!(text.chars().count() <= MAX_ENHANCED_TEXT_CHARS);
    }
}
