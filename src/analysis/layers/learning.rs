//! Layer 6: learning intelligence
//!
//! Scores the meeting's learning dynamics as
//! `L = dS * dC * w_e * cos(phi)` where dS is novelty introduced, dC is
//! coherence achieved, w_e is emotional engagement, and phi is the
//! challenge/support phase alignment scaled to [0, pi/2]. Each factor is
//! extracted by the LLM from the transcript; the composite is recomputed
//! here when the model omits it.

use super::{transcript_window, LayerParams, PriorOutputs};
use crate::database::models::Meeting;

pub const PARAMS: LayerParams = LayerParams {
    task: "business_insights",
    max_tokens: 3000,
    temperature: 0.4,
};

const WINDOW_CHARS: usize = 15_000;

const PROMPT: &str = r#"Analyze this meeting for learning effectiveness:

TRANSCRIPT:
{transcript}

MEETING TYPE: {meeting_type}
QUALITY SCORE: {quality_score}/10
OBJECTIVES MET: {objectives_score}%

Analyze the learning dynamics and return JSON:
{
    "learning_score": 0.0-1.0,
    "learning_rationale": "explanation of learning score",

    "entropy_delta": {
        "score": 0.0-1.0,
        "novel_concepts": ["new concepts introduced"],
        "complexity_level": "low|medium|high",
        "information_density": "sparse|moderate|dense"
    },

    "coherence_delta": {
        "score": 0.0-1.0,
        "understanding_indicators": ["signs of comprehension"],
        "confusion_indicators": ["signs of confusion"],
        "retention_signals": ["signs information will be retained"]
    },

    "emotional_engagement": {
        "score": 0.0-1.0,
        "engagement_type": "intellectual|emotional|practical|mixed",
        "high_points": ["moments of high engagement"],
        "low_points": ["moments of low engagement"]
    },

    "phase_alignment": {
        "score": -1.0 to 1.0,
        "challenge_level": "too_easy|appropriate|too_hard",
        "support_provided": "insufficient|adequate|excellent",
        "pacing": "too_slow|appropriate|too_fast"
    },

    "learning_state": "aha_zone|overwhelmed|bored|disengaged|building|struggling",
    "state_explanation": "why this learning state",

    "knowledge_transfer_rate": 0.0-1.0,
    "knowledge_gaps_identified": ["gaps in understanding observed"],

    "host_teaching_effectiveness": {
        "score": 0-100,
        "strengths": ["teaching strengths observed"],
        "improvements": ["areas for improvement"]
    },

    "participant_learning_indicators": [
        {
            "participant": "name or role",
            "learning_state": "aha_zone|building|struggling|etc",
            "engagement_level": 0.0-1.0,
            "key_takeaways": ["what they seemed to learn"]
        }
    ],

    "pacing_adjustments": {
        "recommended_pacing": "slower|maintain|faster",
        "recommended_depth": "less_detail|maintain|more_detail",
        "recommended_examples": "fewer|maintain|more",
        "recommended_interaction": "less|maintain|more"
    },

    "coaching_recommendations": [
        {
            "for": "host|participant|all",
            "recommendation": "specific coaching suggestion",
            "rationale": "what the learning analysis showed",
            "expected_improvement": "what would improve"
        }
    ]
}

Return ONLY valid JSON, no additional text."#;

pub fn build_prompt(meeting: &Meeting, prior: &PriorOutputs) -> String {
    let transcript = meeting.transcript_text.as_deref().unwrap_or("");

    let quality = prior
        .sentiment
        .get("meeting_quality_score")
        .map(|v| v.to_string())
        .unwrap_or_else(|| "5".to_string());
    let objectives = prior
        .resolution
        .get("objectives_met_score")
        .map(|v| v.to_string())
        .unwrap_or_else(|| "50".to_string());

    PROMPT
        .replace("{transcript}", transcript_window(transcript, WINDOW_CHARS))
        .replace("{meeting_type}", &meeting.meeting_type.to_string())
        .replace("{quality_score}", &quality)
        .replace("{objectives_score}", &objectives)
}

pub fn default_response() -> serde_json::Value {
    serde_json::json!({
        "learning_score": 0.5,
        "entropy_delta": {"score": 0.5},
        "coherence_delta": {"score": 0.5},
        "emotional_engagement": {"score": 0.5},
        "phase_alignment": {"score": 0},
        "learning_state": "building",
        "knowledge_transfer_rate": 0.5,
        "host_teaching_effectiveness": {"score": 50},
        "pacing_adjustments": {},
        "coaching_recommendations": []
    })
}

/// Compute the composite learning score when the model omitted it
///
/// Perfect phase alignment (0) contributes cos(0) = 1; full misalignment
/// (+-1) contributes cos(pi/2) = 0. The product is clamped to [0, 1].
pub fn fill_learning_score(results: &mut serde_json::Value) {
    let present = results
        .get("learning_score")
        .and_then(|v| v.as_f64())
        .is_some();
    if present {
        return;
    }

    let component = |key: &str| {
        results
            .get(key)
            .and_then(|v| v.get("score"))
            .and_then(|v| v.as_f64())
    };

    let entropy = component("entropy_delta").unwrap_or(0.5);
    let coherence = component("coherence_delta").unwrap_or(0.5);
    let engagement = component("emotional_engagement").unwrap_or(0.5);
    let phase = component("phase_alignment").unwrap_or(0.0);

    let phase_factor = (phase.abs() * std::f64::consts::FRAC_PI_2).cos();
    let learning = (entropy * coherence * engagement * phase_factor).clamp(0.0, 1.0);

    if let Some(object) = results.as_object_mut() {
        object.insert("learning_score".to_string(), serde_json::json!(learning));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fill_learning_score_composite() {
        let mut results = serde_json::json!({
            "entropy_delta": {"score": 0.8},
            "coherence_delta": {"score": 0.5},
            "emotional_engagement": {"score": 1.0},
            "phase_alignment": {"score": 0.0}
        });

        fill_learning_score(&mut results);
        let score = results["learning_score"].as_f64().unwrap();
        assert!((score - 0.4).abs() < 1e-9);
    }

    #[test]
    fn test_fill_learning_score_phase_misalignment_zeroes() {
        let mut results = serde_json::json!({
            "entropy_delta": {"score": 1.0},
            "coherence_delta": {"score": 1.0},
            "emotional_engagement": {"score": 1.0},
            "phase_alignment": {"score": 1.0}
        });

        fill_learning_score(&mut results);
        let score = results["learning_score"].as_f64().unwrap();
        assert!(score.abs() < 1e-9);
    }

    #[test]
    fn test_fill_learning_score_keeps_model_value() {
        let mut results = serde_json::json!({"learning_score": 0.9});
        fill_learning_score(&mut results);
        assert!((results["learning_score"].as_f64().unwrap() - 0.9).abs() < 1e-9);
    }

    #[test]
    fn test_fill_learning_score_null_is_recomputed() {
        let mut results = serde_json::json!({
            "learning_score": null,
            "entropy_delta": {"score": 0.6},
            "coherence_delta": {"score": 0.6},
            "emotional_engagement": {"score": 0.6},
            "phase_alignment": {"score": 0.0}
        });

        fill_learning_score(&mut results);
        let score = results["learning_score"].as_f64().unwrap();
        assert!((score - 0.216).abs() < 1e-9);
    }
}
