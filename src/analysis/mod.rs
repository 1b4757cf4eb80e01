//! Analytical cascade
//!
//! Six ordered layers per meeting, each persisted independently with a
//! completion flag. A layer only runs once its predecessor's flag is
//! true, and one meeting's failure never blocks another: the meeting's
//! flag stays false and the next pass retries it.

pub mod json;
pub mod layers;
pub mod routing;

use std::sync::Arc;

use futures::future::join_all;

use crate::database::meetings::MeetingStore;
use crate::database::models::{Meeting, MeetingType};
use crate::error::Result;
use crate::llm::{LlmClient, LlmRequest};
use json::extract_json;
use layers::PriorOutputs;

/// Outcome of one cascade pass
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct CascadeStats {
    pub meetings_processed: usize,
    pub layers_completed: usize,
    pub layers_defaulted: usize,
    pub layers_failed: usize,
}

pub struct CascadeProcessor {
    meetings: MeetingStore,
    llm: Arc<dyn LlmClient>,
    parallelism: usize,
}

impl CascadeProcessor {
    pub fn new(meetings: MeetingStore, llm: Arc<dyn LlmClient>, parallelism: usize) -> Self {
        Self {
            meetings,
            llm,
            parallelism: parallelism.max(1),
        }
    }

    /// Run layers 1..=6 in order over all eligible meetings
    ///
    /// Ascending order within one pass means a meeting that just finished
    /// layer N is immediately eligible for layer N+1.
    pub async fn run_all(&self, limit: i64) -> Result<CascadeStats> {
        let mut stats = CascadeStats::default();

        for layer in 1..=6u8 {
            let layer_stats = self.run_layer(layer, limit).await?;
            stats.meetings_processed += layer_stats.meetings_processed;
            stats.layers_completed += layer_stats.layers_completed;
            stats.layers_defaulted += layer_stats.layers_defaulted;
            stats.layers_failed += layer_stats.layers_failed;
        }

        Ok(stats)
    }

    /// Run one layer over its pending meetings with bounded parallelism
    pub async fn run_layer(&self, layer: u8, limit: i64) -> Result<CascadeStats> {
        let pending = self.meetings.pending_for_layer(layer, limit).await?;
        if pending.is_empty() {
            return Ok(CascadeStats::default());
        }

        tracing::info!(layer, pending = pending.len(), "Running analysis layer");

        let mut stats = CascadeStats::default();

        for batch in pending.chunks(self.parallelism) {
            let futures: Vec<_> = batch
                .iter()
                .map(|meeting| self.process_meeting(meeting, layer))
                .collect();

            for (meeting, result) in batch.iter().zip(join_all(futures).await) {
                stats.meetings_processed += 1;
                match result {
                    Ok(defaulted) => {
                        stats.layers_completed += 1;
                        if defaulted {
                            stats.layers_defaulted += 1;
                        }
                    }
                    Err(e) => {
                        stats.layers_failed += 1;
                        tracing::error!(
                            meeting_id = meeting.id,
                            layer,
                            error = %e,
                            "Layer analysis failed; meeting stays incomplete"
                        );
                    }
                }
            }
        }

        Ok(stats)
    }

    /// Run one layer for one meeting; returns whether the default was used
    async fn process_meeting(&self, meeting: &Meeting, layer: u8) -> Result<bool> {
        let prior = self.prior_outputs(meeting, layer).await?;
        let params = layers::params_for(layer);
        let prompt = layers::prompt_for(layer, meeting, &prior);

        let response = self
            .llm
            .generate(LlmRequest {
                task: params.task.to_string(),
                prompt,
                system: None,
                max_tokens: params.max_tokens,
                temperature: params.temperature,
            })
            .await?;

        let outcome = extract_json(&response.content);
        let defaulted = !outcome.is_parsed();
        let results = layers::post_process(layer, outcome.or_default(layers::default_for(layer)));

        if layer == 1 {
            // Layer 1 writes onto the meeting row; anything outside the
            // closed meeting-type set maps to `other`.
            let meeting_type = results
                .get("meeting_type")
                .and_then(|v| v.as_str())
                .map(MeetingType::from_label)
                .unwrap_or(MeetingType::Other);
            let crm_matches = results
                .get("crm_matches")
                .cloned()
                .unwrap_or_else(|| serde_json::json!({}));

            self.meetings
                .apply_entity_results(meeting.id, meeting_type, &crm_matches)
                .await?;
        } else {
            self.meetings
                .save_layer_row(meeting.id, layer, &results)
                .await?;

            // The completion flag must never lead its output row
            if !self.meetings.layer_row_exists(meeting.id, layer).await? {
                return Err(crate::error::Error::Database(format!(
                    "Layer {layer} row missing for meeting {} after upsert",
                    meeting.id
                )));
            }
        }

        self.meetings.set_layer_complete(meeting.id, layer, true).await?;

        tracing::debug!(meeting_id = meeting.id, layer, defaulted, "Layer complete");
        Ok(defaulted)
    }

    async fn prior_outputs(&self, meeting: &Meeting, layer: u8) -> Result<PriorOutputs> {
        if layer <= 2 {
            return Ok(PriorOutputs::default());
        }

        Ok(PriorOutputs {
            sentiment: self.meetings.layer_details(meeting.id, 2).await?,
            resolution: if layer >= 4 {
                self.meetings.layer_details(meeting.id, 3).await?
            } else {
                serde_json::json!({})
            },
        })
    }
}
