//! Layer 1: entity extraction
//!
//! Classifies the meeting and pulls out participants, companies, deal
//! signals, competitors, products, key dates, and CRM match hints.

use super::{transcript_window, LayerParams};
use crate::database::models::Meeting;

pub const PARAMS: LayerParams = LayerParams {
    task: "customer_extraction",
    max_tokens: 2000,
    temperature: 0.2,
};

const WINDOW_CHARS: usize = 15_000;
const SUMMARY_WINDOW_CHARS: usize = 2_000;

const PROMPT: &str = r#"Analyze this meeting transcript and extract entities:

TRANSCRIPT:
{transcript}

EXISTING PARTICIPANTS:
{participants}

PROVIDER SUMMARY (if available):
{summary}

Extract and return JSON with:
{
    "meeting_type": "sales|support|training|interview|internal|external",
    "meeting_purpose": "brief description of meeting purpose",
    "participants": [
        {
            "name": "participant name",
            "role": "their role/title if mentioned",
            "company": "their company if mentioned",
            "is_host": true/false,
            "is_external": true/false
        }
    ],
    "companies_mentioned": [
        {
            "name": "company name",
            "context": "how they were mentioned",
            "is_customer": true/false,
            "is_competitor": true/false
        }
    ],
    "deal_signals": [
        {
            "signal_type": "budget|timeline|authority|need",
            "quote": "relevant quote",
            "strength": "strong|moderate|weak"
        }
    ],
    "competitor_mentions": ["list of competitors mentioned"],
    "products_discussed": ["list of products/features discussed"],
    "key_dates": ["any dates or deadlines mentioned"],
    "crm_matches": {
        "potential_contacts": ["emails or names to match"],
        "potential_companies": ["companies to match in CRM"]
    }
}

Return ONLY valid JSON, no additional text."#;

pub fn build_prompt(meeting: &Meeting) -> String {
    let transcript = meeting.transcript_text.as_deref().unwrap_or("");
    let participants =
        serde_json::to_string_pretty(&meeting.participants_json).unwrap_or_else(|_| "[]".into());
    let summary = meeting
        .summary
        .as_deref()
        .map(|s| transcript_window(s, SUMMARY_WINDOW_CHARS).to_string())
        .unwrap_or_else(|| "Not available".to_string());

    PROMPT
        .replace("{transcript}", transcript_window(transcript, WINDOW_CHARS))
        .replace("{participants}", &participants)
        .replace("{summary}", &summary)
}

pub fn default_response() -> serde_json::Value {
    serde_json::json!({
        "meeting_type": "other",
        "participants": [],
        "companies_mentioned": [],
        "deal_signals": [],
        "competitor_mentions": [],
        "products_discussed": [],
        "key_dates": [],
        "crm_matches": {}
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::models::{MeetingSource, MeetingType};

    fn meeting_with_transcript(text: &str) -> Meeting {
        Meeting {
            id: 1,
            recording_id: "vm-1".into(),
            source: MeetingSource::Notetaker,
            content_hash: "h".into(),
            title: Some("Acme demo".into()),
            meeting_type: MeetingType::Other,
            platform: None,
            host_name: None,
            host_email: None,
            host_extension_id: None,
            host_phone: None,
            started_at: None,
            ended_at: None,
            duration_seconds: None,
            participant_count: None,
            has_recording: true,
            transcript_text: Some(text.to_string()),
            transcript_missing: false,
            summary: None,
            participants_json: serde_json::json!([{"name": "Ada"}]),
            action_items_json: serde_json::json!([]),
            crm_deals_json: serde_json::json!({}),
            raw_payload: serde_json::json!({}),
            layer1_complete: false,
            layer2_complete: false,
            layer3_complete: false,
            layer4_complete: false,
            layer5_complete: false,
            layer6_complete: false,
            created_at: chrono::Utc::now(),
            updated_at: chrono::Utc::now(),
        }
    }

    #[test]
    fn test_prompt_includes_transcript_and_participants() {
        let meeting = meeting_with_transcript("We discussed the renewal.");
        let prompt = build_prompt(&meeting);

        assert!(prompt.contains("We discussed the renewal."));
        assert!(prompt.contains("Ada"));
        assert!(prompt.contains("Not available"));
    }

    #[test]
    fn test_prompt_truncates_long_transcripts() {
        let meeting = meeting_with_transcript(&"word ".repeat(10_000));
        let prompt = build_prompt(&meeting);
        assert!(prompt.len() < 20_000 + PROMPT.len());
    }
}
