//! Transcript post-processing
//!
//! ASR engines occasionally emit runaway phrase repetitions and casual
//! contractions. Normalization collapses repetition runs and applies a
//! fixed substitution table; the whole pass is idempotent.

use crate::database::models::TranscriptSegment;

/// Minimum repetitions of a token sequence before it is collapsed
const REPETITION_THRESHOLD: usize = 3;

/// Longest token sequence considered for repetition collapse
const MAX_SEQUENCE_LEN: usize = 10;

/// Segments with a compression ratio above this look like hallucinations
pub const COMPRESSION_RATIO_THRESHOLD: f64 = 2.4;

/// Segments with an average log-probability below this are uncertain
pub const LOGPROB_THRESHOLD: f64 = -1.0;

/// Segments with a no-speech probability above this are likely silence
pub const NO_SPEECH_THRESHOLD: f64 = 0.6;

const SUBSTITUTIONS: &[(&str, &str)] = &[
    ("gonna", "going to"),
    ("wanna", "want to"),
    ("gotta", "got to"),
];

/// Normalize a transcript: collapse repetitions, then apply substitutions
pub fn normalize(text: &str) -> String {
    fix_common_errors(&remove_repetitions(text))
}

/// Collapse any 1..=10-token sequence repeated three or more times in a row
/// down to a single occurrence.
pub fn remove_repetitions(text: &str) -> String {
    let words: Vec<&str> = text.split_whitespace().collect();
    let mut cleaned: Vec<&str> = Vec::with_capacity(words.len());

    let mut i = 0;
    while i < words.len() {
        let mut collapsed = false;

        for seq_len in 1..=MAX_SEQUENCE_LEN.min(words.len() - i) {
            let sequence = &words[i..i + seq_len];
            let mut count = 1;

            let mut j = i + seq_len;
            while j + seq_len <= words.len() && &words[j..j + seq_len] == sequence {
                count += 1;
                j += seq_len;
            }

            if count >= REPETITION_THRESHOLD {
                cleaned.extend_from_slice(sequence);
                i = j;
                collapsed = true;
                break;
            }
        }

        if !collapsed {
            cleaned.push(words[i]);
            i += 1;
        }
    }

    cleaned.join(" ")
}

/// Apply the fixed substitution table on word boundaries
fn fix_common_errors(text: &str) -> String {
    text.split_whitespace()
        .map(|word| {
            for (from, to) in SUBSTITUTIONS {
                if word == *from {
                    return to.to_string();
                }
            }
            word.to_string()
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Token-weighted confidence over segments, penalized for suspect ones
///
/// Mean of exp(avg_logprob) weighted by token count, minus 0.05 per
/// high-compression segment, 0.03 per low-logprob segment, and 0.02 per
/// high-no-speech segment, clamped to [0, 1].
pub fn calculate_confidence(segments: &[TranscriptSegment]) -> f64 {
    if segments.is_empty() {
        return 0.0;
    }

    let mut total_prob = 0.0;
    let mut total_tokens = 0usize;

    for segment in segments {
        let prob = segment.avg_logprob.exp();
        let tokens = segment.tokens.len();
        if tokens > 0 {
            total_prob += prob * tokens as f64;
            total_tokens += tokens;
        }
    }

    let avg_confidence = if total_tokens > 0 {
        total_prob / total_tokens as f64
    } else {
        0.0
    };

    let mut penalty = 0.0;
    for segment in segments {
        if segment.compression_ratio > COMPRESSION_RATIO_THRESHOLD {
            penalty += 0.05;
        }
        if segment.avg_logprob < LOGPROB_THRESHOLD {
            penalty += 0.03;
        }
        if segment.no_speech_prob > NO_SPEECH_THRESHOLD {
            penalty += 0.02;
        }
    }

    (avg_confidence - penalty).clamp(0.0, 1.0)
}

/// One chunk's transcription, before stitching
#[derive(Debug, Clone)]
pub struct ChunkResult {
    /// Offset of this chunk's start within the full audio, in seconds
    pub offset_seconds: f64,
    pub text: String,
    pub segments: Vec<TranscriptSegment>,
    pub language: String,
    pub language_probability: f64,
}

/// Stitched output of a chunked transcription
#[derive(Debug, Clone)]
pub struct StitchedTranscription {
    pub text: String,
    pub segments: Vec<TranscriptSegment>,
    pub language: String,
    pub language_probability: f64,
}

/// Combine sequential chunk results into one transcription
///
/// Segment timestamps are shifted by each chunk's offset, texts join with
/// a single space, and the language is the probability-weighted winner
/// across chunks.
pub fn stitch_chunks(chunks: &[ChunkResult]) -> StitchedTranscription {
    let mut all_segments = Vec::new();
    let mut texts = Vec::new();
    let mut language_weights: std::collections::HashMap<String, f64> =
        std::collections::HashMap::new();

    for chunk in chunks {
        for segment in &chunk.segments {
            all_segments.push(TranscriptSegment {
                start: segment.start + chunk.offset_seconds,
                end: segment.end + chunk.offset_seconds,
                ..segment.clone()
            });
        }

        if !chunk.text.is_empty() {
            texts.push(chunk.text.clone());
        }

        *language_weights.entry(chunk.language.clone()).or_insert(0.0) +=
            chunk.language_probability;
    }

    let (language, weight) = language_weights
        .into_iter()
        .max_by(|a, b| a.1.total_cmp(&b.1))
        .unwrap_or_else(|| ("unknown".to_string(), 0.0));

    let language_probability = if chunks.is_empty() {
        0.0
    } else {
        weight / chunks.len() as f64
    };

    StitchedTranscription {
        text: texts.join(" "),
        segments: all_segments,
        language,
        language_probability,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn segment(logprob: f64, compression: f64, no_speech: f64, tokens: usize) -> TranscriptSegment {
        TranscriptSegment {
            start: 0.0,
            end: 1.0,
            text: "x".into(),
            avg_logprob: logprob,
            compression_ratio: compression,
            no_speech_prob: no_speech,
            tokens: (0..tokens as i64).collect(),
        }
    }

    #[test]
    fn test_remove_repetitions_collapses_runs() {
        let text = "thank you thank you thank you thank you for calling";
        assert_eq!(remove_repetitions(text), "thank you for calling");
    }

    #[test]
    fn test_remove_repetitions_keeps_short_runs() {
        // Two occurrences stay below the threshold
        let text = "thank you thank you for calling";
        assert_eq!(remove_repetitions(text), text);
    }

    #[test]
    fn test_remove_repetitions_single_word_run() {
        assert_eq!(remove_repetitions("no no no no way"), "no way");
    }

    #[test]
    fn test_substitutions() {
        assert_eq!(normalize("I'm gonna call you"), "I'm going to call you");
        assert_eq!(normalize("we gotta go"), "we got to go");
        // Substring matches inside words are untouched
        assert_eq!(normalize("the iguana jumped"), "the iguana jumped");
    }

    #[test]
    fn test_normalize_is_idempotent() {
        let inputs = [
            "thank you thank you thank you bye",
            "I'm gonna   go go go go now",
            "plain sentence with nothing unusual",
            "",
        ];
        for input in inputs {
            let once = normalize(input);
            assert_eq!(normalize(&once), once, "not idempotent for {input:?}");
        }
    }

    #[test]
    fn test_confidence_empty_segments() {
        assert_eq!(calculate_confidence(&[]), 0.0);
    }

    #[test]
    fn test_confidence_token_weighted() {
        // One confident segment, logprob 0 => prob 1.0
        let segments = vec![segment(0.0, 1.0, 0.0, 10)];
        assert!((calculate_confidence(&segments) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_confidence_penalties_apply() {
        let clean = vec![segment(0.0, 1.0, 0.0, 10)];
        let suspect = vec![segment(0.0, 3.0, 0.7, 10)];

        let clean_score = calculate_confidence(&clean);
        let suspect_score = calculate_confidence(&suspect);

        // Compression (+0.05) and no-speech (+0.02) penalties
        assert!((clean_score - suspect_score - 0.07).abs() < 1e-9);
    }

    #[test]
    fn test_confidence_clamped() {
        let segments = vec![
            segment(-3.0, 3.0, 0.9, 1),
            segment(-3.0, 3.0, 0.9, 1),
            segment(-3.0, 3.0, 0.9, 1),
        ];
        let score = calculate_confidence(&segments);
        assert!((0.0..=1.0).contains(&score));
    }

    #[test]
    fn test_stitch_offsets_and_language() {
        let chunks = vec![
            ChunkResult {
                offset_seconds: 0.0,
                text: "first part".into(),
                segments: vec![segment(0.0, 1.0, 0.0, 2)],
                language: "en".into(),
                language_probability: 0.9,
            },
            ChunkResult {
                offset_seconds: 1798.0,
                text: "second part".into(),
                segments: vec![segment(0.0, 1.0, 0.0, 2)],
                language: "en".into(),
                language_probability: 0.8,
            },
        ];

        let stitched = stitch_chunks(&chunks);
        assert_eq!(stitched.text, "first part second part");
        assert_eq!(stitched.segments.len(), 2);
        assert!((stitched.segments[1].start - 1798.0).abs() < 1e-9);
        assert_eq!(stitched.language, "en");
        assert!((stitched.language_probability - 0.85).abs() < 1e-9);
    }
}
