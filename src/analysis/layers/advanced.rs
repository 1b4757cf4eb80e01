//! Layer 5: advanced metrics
//!
//! Speaking-time distribution, the sales-execution blueprint score and
//! its five components, competitive mentions, deal economics, technical
//! depth, and decision dynamics.

use super::{transcript_window, LayerParams};
use crate::database::models::Meeting;

pub const PARAMS: LayerParams = LayerParams {
    task: "sales_analysis",
    max_tokens: 2500,
    temperature: 0.3,
};

const WINDOW_CHARS: usize = 15_000;

const PROMPT: &str = r#"Perform advanced analysis on this meeting:

TRANSCRIPT:
{transcript}

MEETING TYPE: {meeting_type}
PARTICIPANTS: {participants}

Analyze and return JSON with:
{
    "speaking_time": {
        "host_percentage": 0-100,
        "participant_distribution": [
            {"name": "participant name", "percentage": 0-100}
        ],
        "talk_listen_ratio": 0.0-5.0,
        "monologue_instances": number,
        "average_turn_duration_seconds": number
    },

    "blueprint_score": 0-100,
    "blueprint_components": {
        "value_articulation": {
            "score": 0-100,
            "evidence": ["specific examples from transcript"]
        },
        "objection_handling": {
            "score": 0-100,
            "objections_raised": number,
            "objections_resolved": number
        },
        "urgency_creation": {
            "score": 0-100,
            "techniques_used": ["list of urgency techniques"]
        },
        "trust_building": {
            "score": 0-100,
            "rapport_indicators": ["list of rapport indicators"]
        },
        "close_attempt": {
            "score": 0-100,
            "close_type": "hard|soft|trial|none",
            "outcome": "success|pending|failed|not_applicable"
        }
    },

    "competitive_mentions": [
        {
            "competitor": "competitor name",
            "context": "positive|negative|neutral",
            "feature_comparison": "what was compared",
            "quote": "relevant quote"
        }
    ],

    "deal_value": number or null,
    "deal_currency": "USD|EUR|etc or null",
    "contract_length": number of months or null,

    "financial_indicators": {
        "budget_mentioned": true/false,
        "budget_range": "low|medium|high|enterprise or null",
        "pricing_discussed": true/false,
        "discount_requested": true/false,
        "roi_discussed": true/false
    },

    "technical_depth": {
        "score": 0-100,
        "topics": ["technical topics discussed"],
        "integration_needs": ["integration requirements mentioned"]
    },

    "decision_dynamics": {
        "decision_maker_present": true/false,
        "decision_timeline": "immediate|this_week|this_month|this_quarter|unknown",
        "buying_committee_size": number or null,
        "champion_identified": true/false
    }
}

Return ONLY valid JSON, no additional text."#;

pub fn build_prompt(meeting: &Meeting) -> String {
    let transcript = meeting.transcript_text.as_deref().unwrap_or("");
    let participants =
        serde_json::to_string_pretty(&meeting.participants_json).unwrap_or_else(|_| "[]".into());

    PROMPT
        .replace("{transcript}", transcript_window(transcript, WINDOW_CHARS))
        .replace("{meeting_type}", &meeting.meeting_type.to_string())
        .replace("{participants}", &participants)
}

pub fn default_response() -> serde_json::Value {
    serde_json::json!({
        "speaking_time": {},
        "blueprint_score": 50,
        "blueprint_components": {},
        "competitive_mentions": [],
        "deal_value": null,
        "deal_currency": null,
        "contract_length": null,
        "financial_indicators": {},
        "technical_depth": {},
        "decision_dynamics": {}
    })
}
