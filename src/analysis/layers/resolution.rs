//! Layer 3: resolution and outcomes
//!
//! Objectives met, first-contact resolution, escalation, loop closure,
//! action-item quality, decisions, unresolved issues, and follow-ups.

use super::{transcript_window, LayerParams, PriorOutputs};
use crate::database::models::Meeting;

pub const PARAMS: LayerParams = LayerParams {
    task: "support_analysis",
    max_tokens: 2000,
    temperature: 0.3,
};

const WINDOW_CHARS: usize = 15_000;

const PROMPT: &str = r#"Analyze the meeting outcomes and resolution effectiveness:

TRANSCRIPT:
{transcript}

MEETING TYPE: {meeting_type}
SENTIMENT: {sentiment_summary}

Analyze and return JSON with:
{
    "objectives_met_score": 0-100,
    "objectives_met_details": "explanation of objectives met/not met",
    "stated_objectives": ["objectives stated at start of meeting"],
    "achieved_objectives": ["objectives that were achieved"],
    "unmet_objectives": ["objectives not achieved"],

    "fcr_achieved": true/false,
    "fcr_details": "First Contact Resolution explanation",

    "escalation_required": true/false,
    "escalation_reason": "if escalation needed, why",
    "escalation_to": "who/what team for escalation",

    "loop_closure_score": 0-100,
    "open_loops": ["items left unresolved"],
    "closed_loops": ["items fully resolved"],

    "action_item_quality_score": 0-100,
    "action_items_analysis": [
        {
            "item": "action item text",
            "owner": "assigned person",
            "deadline": "mentioned deadline or null",
            "clarity_score": 1-10,
            "measurable": true/false
        }
    ],

    "decisions_made": [
        {
            "decision": "what was decided",
            "context": "why it was decided",
            "impact": "expected impact",
            "stakeholders": ["who was involved"]
        }
    ],

    "unresolved_issues": [
        {
            "issue": "description",
            "blocker": "what's blocking resolution",
            "next_step": "suggested next step"
        }
    ],

    "follow_up_required": true/false,
    "follow_up_items": ["list of follow-up items needed"],
    "recommended_next_meeting": "suggestion for next meeting topic/timing"
}

Return ONLY valid JSON, no additional text."#;

pub fn build_prompt(meeting: &Meeting, prior: &PriorOutputs) -> String {
    let transcript = meeting.transcript_text.as_deref().unwrap_or("");

    let sentiment_summary = format!(
        "NPS: {}\nHealth Score: {}\nChurn Risk: {}\nQuality Score: {}",
        prior.sentiment.get("nps_score").unwrap_or(&serde_json::Value::Null),
        prior
            .sentiment
            .get("customer_health_score")
            .unwrap_or(&serde_json::Value::Null),
        prior
            .sentiment
            .get("churn_risk_level")
            .and_then(|v| v.as_str())
            .unwrap_or("N/A"),
        prior
            .sentiment
            .get("meeting_quality_score")
            .unwrap_or(&serde_json::Value::Null),
    );

    PROMPT
        .replace("{transcript}", transcript_window(transcript, WINDOW_CHARS))
        .replace("{meeting_type}", &meeting.meeting_type.to_string())
        .replace("{sentiment_summary}", &sentiment_summary)
}

pub fn default_response() -> serde_json::Value {
    serde_json::json!({
        "objectives_met_score": 50,
        "fcr_achieved": false,
        "escalation_required": false,
        "loop_closure_score": 50,
        "action_item_quality_score": 50,
        "decisions_made": [],
        "unresolved_issues": [],
        "follow_up_required": true
    })
}
