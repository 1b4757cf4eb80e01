//! Semantic search over transcript embeddings
//!
//! The query text is embedded once; that single vector parameter feeds
//! both the similarity expression and the ORDER BY distance. Filters
//! become SQL conjuncts over the facet columns.

use sqlx::PgPool;

use crate::embeddings::client::{format_embedding_for_pg, EmbeddingClient};
use crate::error::Result;

/// Metadata predicates applied alongside the vector ranking
#[derive(Debug, Clone, Default)]
pub struct SearchFilters {
    pub employee: Option<String>,
    pub customer: Option<String>,
    pub sentiment: Option<String>,
    pub date_from: Option<chrono::NaiveDate>,
    pub date_to: Option<chrono::NaiveDate>,
    pub min_quality: Option<f64>,
}

/// One ranked search hit
#[derive(Debug, Clone, sqlx::FromRow, serde::Serialize)]
pub struct SearchHit {
    pub recording_id: String,
    pub similarity: f64,
    pub customer_name: Option<String>,
    pub employee_name: Option<String>,
    pub call_date: Option<chrono::NaiveDate>,
    pub customer_sentiment: Option<String>,
    pub call_quality_score: Option<f64>,
    pub summary: Option<String>,
    pub call_type: Option<String>,
    pub duration_seconds: Option<i32>,
    pub word_count: Option<i32>,
}

/// Build the ranked query and the textual filter values to bind
///
/// `$1` is the query vector, used for both the similarity column and the
/// ordering; filters occupy `$2..`, and the limit is the last parameter.
pub fn build_search_sql(filters: &SearchFilters) -> (String, Vec<FilterBind>) {
    let mut conjuncts = Vec::new();
    let mut binds = Vec::new();
    let mut param = 2;

    if let Some(employee) = &filters.employee {
        conjuncts.push(format!("employee_name ILIKE ${param}"));
        binds.push(FilterBind::Text(format!("%{employee}%")));
        param += 1;
    }
    if let Some(customer) = &filters.customer {
        conjuncts.push(format!("customer_name ILIKE ${param}"));
        binds.push(FilterBind::Text(format!("%{customer}%")));
        param += 1;
    }
    if let Some(sentiment) = &filters.sentiment {
        conjuncts.push(format!("customer_sentiment = ${param}"));
        binds.push(FilterBind::Text(sentiment.clone()));
        param += 1;
    }
    if let Some(date_from) = filters.date_from {
        conjuncts.push(format!("call_date >= ${param}"));
        binds.push(FilterBind::Date(date_from));
        param += 1;
    }
    if let Some(date_to) = filters.date_to {
        conjuncts.push(format!("call_date <= ${param}"));
        binds.push(FilterBind::Date(date_to));
        param += 1;
    }
    if let Some(min_quality) = filters.min_quality {
        conjuncts.push(format!("call_quality_score >= ${param}"));
        binds.push(FilterBind::Float(min_quality));
        param += 1;
    }

    let where_clause = if conjuncts.is_empty() {
        String::new()
    } else {
        format!("WHERE {}", conjuncts.join(" AND "))
    };

    let sql = format!(
        "SELECT
            recording_id,
            1 - (embedding <=> $1::vector) AS similarity,
            customer_name,
            employee_name,
            call_date,
            customer_sentiment,
            call_quality_score,
            summary,
            call_type,
            duration_seconds,
            word_count
         FROM transcript_embeddings
         {where_clause}
         ORDER BY embedding <=> $1::vector
         LIMIT ${param}"
    );

    (sql, binds)
}

/// A typed filter value awaiting binding
#[derive(Debug, Clone, PartialEq)]
pub enum FilterBind {
    Text(String),
    Date(chrono::NaiveDate),
    Float(f64),
}

pub struct SemanticSearch {
    pool: PgPool,
    client: EmbeddingClient,
}

impl SemanticSearch {
    pub fn new(pool: PgPool, client: EmbeddingClient) -> Self {
        Self { pool, client }
    }

    /// Nearest-neighbour search with metadata filters
    pub async fn search(
        &self,
        query: &str,
        filters: &SearchFilters,
        limit: i64,
    ) -> Result<Vec<SearchHit>> {
        let query_embedding = self.client.embed(query).await?;
        let vector_literal = format_embedding_for_pg(&query_embedding);

        let (sql, binds) = build_search_sql(filters);

        let mut q = sqlx::query_as::<_, SearchHit>(&sql).bind(&vector_literal);
        for bind in &binds {
            q = match bind {
                FilterBind::Text(value) => q.bind(value.clone()),
                FilterBind::Date(value) => q.bind(*value),
                FilterBind::Float(value) => q.bind(*value),
            };
        }
        q = q.bind(limit);

        let hits = q.fetch_all(&self.pool).await?;

        tracing::debug!(query, hits = hits.len(), "Semantic search complete");
        Ok(hits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_sql_without_filters() {
        let (sql, binds) = build_search_sql(&SearchFilters::default());

        assert!(!sql.contains("WHERE"));
        assert!(sql.contains("ORDER BY embedding <=> $1::vector"));
        assert!(sql.contains("1 - (embedding <=> $1::vector) AS similarity"));
        assert!(sql.ends_with("LIMIT $2"));
        assert!(binds.is_empty());
    }

    #[test]
    fn test_build_sql_with_all_filters() {
        let filters = SearchFilters {
            employee: Some("ada".into()),
            customer: Some("acme".into()),
            sentiment: Some("negative".into()),
            date_from: chrono::NaiveDate::from_ymd_opt(2025, 1, 1),
            date_to: chrono::NaiveDate::from_ymd_opt(2025, 12, 31),
            min_quality: Some(7.0),
        };

        let (sql, binds) = build_search_sql(&filters);

        assert!(sql.contains("employee_name ILIKE $2"));
        assert!(sql.contains("customer_name ILIKE $3"));
        assert!(sql.contains("customer_sentiment = $4"));
        assert!(sql.contains("call_date >= $5"));
        assert!(sql.contains("call_date <= $6"));
        assert!(sql.contains("call_quality_score >= $7"));
        assert!(sql.ends_with("LIMIT $8"));

        assert_eq!(binds.len(), 6);
        assert_eq!(binds[0], FilterBind::Text("%ada%".into()));
        assert_eq!(binds[2], FilterBind::Text("negative".into()));
    }

    #[test]
    fn test_query_vector_is_bound_once_and_reused() {
        let (sql, _) = build_search_sql(&SearchFilters::default());
        // The same $1 parameter appears in both the SELECT and the ORDER BY
        assert_eq!(sql.matches("$1::vector").count(), 2);
    }

    #[test]
    fn test_sentiment_filter_alone() {
        let filters = SearchFilters {
            sentiment: Some("negative".into()),
            ..Default::default()
        };
        let (sql, binds) = build_search_sql(&filters);

        assert!(sql.contains("WHERE customer_sentiment = $2"));
        assert!(sql.ends_with("LIMIT $3"));
        assert_eq!(binds, vec![FilterBind::Text("negative".into())]);
    }
}
