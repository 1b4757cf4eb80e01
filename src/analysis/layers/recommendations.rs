//! Layer 4: recommendations
//!
//! Coaching points, sales and customer-success actions, process
//! improvements, knowledge gaps, follow-up priority, and risk mitigation.

use super::{transcript_window, LayerParams, PriorOutputs};
use crate::database::models::Meeting;

pub const PARAMS: LayerParams = LayerParams {
    task: "business_insights",
    max_tokens: 2000,
    temperature: 0.3,
};

const WINDOW_CHARS: usize = 10_000;

const PROMPT: &str = r#"Based on the meeting analysis, generate recommendations:

TRANSCRIPT EXCERPT:
{transcript}

MEETING TYPE: {meeting_type}
MEETING QUALITY: {quality_score}/10
CHURN RISK: {churn_risk}
NPS PREDICTION: {nps_score}
OBJECTIVES MET: {objectives_score}%

UNRESOLVED ISSUES:
{unresolved_issues}

Generate recommendations and return JSON:
{
    "host_coaching": [
        {
            "area": "communication|preparation|follow-up|technical|rapport",
            "observation": "what was observed",
            "recommendation": "specific improvement suggestion",
            "example": "concrete example from transcript if available",
            "priority": "high|medium|low"
        }
    ],

    "sales_recommendations": [
        {
            "opportunity": "description of opportunity",
            "action": "recommended action",
            "timing": "when to take action",
            "expected_impact": "potential revenue/outcome"
        }
    ],

    "customer_success_actions": [
        {
            "action": "what to do",
            "reason": "why it's needed",
            "urgency": "immediate|this_week|this_month",
            "owner_role": "CSM|Support|Sales|Executive"
        }
    ],

    "process_improvements": [
        {
            "process": "which process needs improvement",
            "current_issue": "what's wrong currently",
            "suggestion": "how to improve",
            "benefit": "expected benefit"
        }
    ],

    "knowledge_gaps": [
        {
            "topic": "knowledge area",
            "gap_type": "training|documentation|tooling",
            "recommendation": "how to address"
        }
    ],

    "follow_up_priority": "urgent|high|medium|low",
    "follow_up_deadline": "YYYY-MM-DD or null",
    "follow_up_owner": "suggested owner",
    "follow_up_message": "suggested follow-up message template",

    "risk_mitigation": [
        {
            "risk": "identified risk",
            "mitigation": "how to mitigate",
            "timeline": "when to act"
        }
    ]
}

Return ONLY valid JSON, no additional text."#;

pub fn build_prompt(meeting: &Meeting, prior: &PriorOutputs) -> String {
    let transcript = meeting.transcript_text.as_deref().unwrap_or("");

    let unresolved = prior
        .resolution
        .get("unresolved_issues")
        .and_then(|v| v.as_array())
        .map(|issues| {
            issues
                .iter()
                .map(|issue| {
                    format!(
                        "- {}: {}",
                        issue.get("issue").and_then(|v| v.as_str()).unwrap_or("?"),
                        issue.get("blocker").and_then(|v| v.as_str()).unwrap_or("N/A"),
                    )
                })
                .collect::<Vec<_>>()
                .join("\n")
        })
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "None identified".to_string());

    PROMPT
        .replace("{transcript}", transcript_window(transcript, WINDOW_CHARS))
        .replace("{meeting_type}", &meeting.meeting_type.to_string())
        .replace(
            "{quality_score}",
            &json_scalar(&prior.sentiment, "meeting_quality_score", "5"),
        )
        .replace(
            "{churn_risk}",
            &json_scalar(&prior.sentiment, "churn_risk_level", "low"),
        )
        .replace("{nps_score}", &json_scalar(&prior.sentiment, "nps_score", "5"))
        .replace(
            "{objectives_score}",
            &json_scalar(&prior.resolution, "objectives_met_score", "50"),
        )
        .replace("{unresolved_issues}", &unresolved)
}

fn json_scalar(value: &serde_json::Value, key: &str, fallback: &str) -> String {
    match value.get(key) {
        Some(serde_json::Value::String(s)) => s.clone(),
        Some(serde_json::Value::Null) | None => fallback.to_string(),
        Some(other) => other.to_string(),
    }
}

pub fn default_response() -> serde_json::Value {
    serde_json::json!({
        "host_coaching": [],
        "sales_recommendations": [],
        "customer_success_actions": [],
        "process_improvements": [],
        "knowledge_gaps": [],
        "follow_up_priority": "medium",
        "follow_up_deadline": null,
        "risk_mitigation": []
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_scalar_formats() {
        let value = serde_json::json!({"a": "high", "b": 7, "c": null});
        assert_eq!(json_scalar(&value, "a", "x"), "high");
        assert_eq!(json_scalar(&value, "b", "x"), "7");
        assert_eq!(json_scalar(&value, "c", "x"), "x");
        assert_eq!(json_scalar(&value, "missing", "x"), "x");
    }
}
