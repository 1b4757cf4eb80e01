//! The six analysis layers
//!
//! Each layer module carries its prompt template, transcript window,
//! LLM parameters, and the fixed default object substituted when the
//! model's output cannot be parsed. Later layers consume earlier layers'
//! structured outputs.

pub mod advanced;
pub mod entities;
pub mod learning;
pub mod recommendations;
pub mod resolution;
pub mod sentiment;

use crate::database::models::Meeting;

/// Prior-layer outputs handed to later layers
#[derive(Debug, Clone, Default)]
pub struct PriorOutputs {
    /// Layer 2 row (sentiment & customer health), full details object
    pub sentiment: serde_json::Value,
    /// Layer 3 row (resolution & outcomes), full details object
    pub resolution: serde_json::Value,
}

/// LLM parameters for one layer
#[derive(Debug, Clone, Copy)]
pub struct LayerParams {
    pub task: &'static str,
    pub max_tokens: u32,
    pub temperature: f32,
}

/// Truncate a transcript to a layer's context window on a char boundary
pub fn transcript_window(text: &str, max_chars: usize) -> &str {
    if text.len() <= max_chars {
        return text;
    }
    let mut end = max_chars;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

/// Parameters for a layer number
pub fn params_for(layer: u8) -> LayerParams {
    match layer {
        1 => entities::PARAMS,
        2 => sentiment::PARAMS,
        3 => resolution::PARAMS,
        4 => recommendations::PARAMS,
        5 => advanced::PARAMS,
        6 => learning::PARAMS,
        _ => unreachable!("layer out of range"),
    }
}

/// Build the prompt for a layer
pub fn prompt_for(layer: u8, meeting: &Meeting, prior: &PriorOutputs) -> String {
    match layer {
        1 => entities::build_prompt(meeting),
        2 => sentiment::build_prompt(meeting),
        3 => resolution::build_prompt(meeting, prior),
        4 => recommendations::build_prompt(meeting, prior),
        5 => advanced::build_prompt(meeting),
        6 => learning::build_prompt(meeting, prior),
        _ => unreachable!("layer out of range"),
    }
}

/// The fixed default object for a layer
pub fn default_for(layer: u8) -> serde_json::Value {
    match layer {
        1 => entities::default_response(),
        2 => sentiment::default_response(),
        3 => resolution::default_response(),
        4 => recommendations::default_response(),
        5 => advanced::default_response(),
        6 => learning::default_response(),
        _ => unreachable!("layer out of range"),
    }
}

/// Layer-specific fixups applied to the parsed object before persistence
pub fn post_process(layer: u8, mut results: serde_json::Value) -> serde_json::Value {
    if layer == 6 {
        learning::fill_learning_score(&mut results);
    }
    results
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transcript_window_respects_char_boundaries() {
        let text = "héllo".repeat(100);
        let window = transcript_window(&text, 7);
        assert!(window.len() <= 7);
        assert!(text.starts_with(window));
    }

    #[test]
    fn test_every_layer_has_params_and_default() {
        for layer in 1..=6u8 {
            let params = params_for(layer);
            assert!(!params.task.is_empty());
            assert!(params.max_tokens > 0);
            assert!((0.2..=0.4).contains(&params.temperature));
            assert!(default_for(layer).is_object());
        }
    }
}
