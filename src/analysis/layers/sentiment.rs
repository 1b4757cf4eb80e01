//! Layer 2: sentiment and customer health
//!
//! NPS prediction, churn risk, composite health score, expansion
//! signals, sentiment triad, emotional moments, and meeting quality.

use super::{transcript_window, LayerParams};
use crate::database::models::Meeting;

pub const PARAMS: LayerParams = LayerParams {
    task: "sentiment_analysis",
    max_tokens: 2000,
    temperature: 0.3,
};

const WINDOW_CHARS: usize = 15_000;

const PROMPT: &str = r#"Analyze the sentiment and customer health indicators in this meeting:

TRANSCRIPT:
{transcript}

MEETING TYPE: {meeting_type}
PARTICIPANTS: {participants}

Analyze and return JSON with:
{
    "nps_score": 0-10 prediction,
    "nps_confidence": 0.0-1.0,
    "nps_rationale": "why this NPS score",

    "churn_risk_level": "none|low|medium|high|critical",
    "churn_risk_score": 0.0-1.0,
    "churn_indicators": ["list of churn signals observed"],

    "customer_health_score": 0-100,
    "health_indicators": {
        "engagement": 0-100,
        "satisfaction": 0-100,
        "product_fit": 0-100,
        "relationship": 0-100
    },

    "expansion_signals": [
        {
            "signal": "description",
            "type": "upsell|cross-sell|referral|renewal",
            "strength": "strong|moderate|weak"
        }
    ],

    "sentiment_positive": 0.0-1.0,
    "sentiment_negative": 0.0-1.0,
    "sentiment_neutral": 0.0-1.0,

    "emotional_moments": [
        {
            "moment": "description",
            "emotion": "frustration|excitement|confusion|satisfaction",
            "quote": "relevant quote"
        }
    ],

    "meeting_quality_score": 1-10,
    "quality_factors": {
        "clarity": 1-10,
        "productivity": 1-10,
        "engagement": 1-10,
        "outcomes": 1-10
    },

    "topics": ["main topics discussed"],
    "key_concerns": ["customer concerns raised"]
}

The three sentiment values must sum to 1.
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
        "nps_score": 5,
        "nps_confidence": 0.5,
        "churn_risk_level": "low",
        "churn_risk_score": 0.2,
        "customer_health_score": 70,
        "sentiment_positive": 0.33,
        "sentiment_negative": 0.33,
        "sentiment_neutral": 0.34,
        "meeting_quality_score": 5,
        "topics": [],
        "expansion_signals": []
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_sentiment_triad_sums_to_one() {
        let default = default_response();
        let sum = default["sentiment_positive"].as_f64().unwrap()
            + default["sentiment_negative"].as_f64().unwrap()
            + default["sentiment_neutral"].as_f64().unwrap();
        assert!((sum - 1.0).abs() < 1e-9);
    }
}
