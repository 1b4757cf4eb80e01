//! Overlap chunking for embedding input
//!
//! Long transcript bodies are split into overlapping windows, preferring
//! natural break points (sentence-ending punctuation, newlines) near the
//! window edge so chunks do not cut sentences mid-word.

/// Characters of overlap between consecutive chunks
pub const CHUNK_OVERLAP: usize = 128;

/// How far back from a window edge to look for a natural break
const BREAK_LOOKBACK: usize = 100;

const BREAK_PAIRS: &[[char; 2]] = &[
    ['.', ' '],
    ['!', ' '],
    ['?', ' '],
    [':', ' '],
    [';', ' '],
];

/// Split text into overlapping chunks of at most `max_chunk_size` chars
pub fn create_overlapping_chunks(text: &str, max_chunk_size: usize, overlap: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();

    if chars.len() <= max_chunk_size {
        return vec![text.to_string()];
    }

    let mut chunks = Vec::new();
    let mut start = 0usize;

    while start < chars.len() {
        let end = start + max_chunk_size;

        if end >= chars.len() {
            let chunk: String = chars[start..].iter().collect();
            if !chunk.trim().is_empty() {
                chunks.push(chunk);
            }
            break;
        }

        // Look backward from the window edge for a natural break
        let mut chunk_end = end;
        for i in 0..BREAK_LOOKBACK.min(chunk_end - start) {
            let pos = chunk_end - i;
            if pos > start && pos < chars.len() && is_break_at(&chars, pos) {
                chunk_end = pos;
                break;
            }
        }

        let chunk: String = chars[start..chunk_end].iter().collect();
        if !chunk.trim().is_empty() {
            chunks.push(chunk);
        }

        start = (start + 1).max(chunk_end.saturating_sub(overlap));
    }

    tracing::debug!(
        chunks = chunks.len(),
        overlap,
        "Created overlapping chunks"
    );

    chunks
}

/// A break exists at `pos` when chars[pos-1..=pos] is a break pair or a newline
fn is_break_at(chars: &[char], pos: usize) -> bool {
    if pos == 0 {
        return false;
    }
    if chars[pos - 1] == '\n' || chars[pos] == '\n' {
        return true;
    }
    BREAK_PAIRS
        .iter()
        .any(|pair| chars[pos - 1] == pair[0] && chars[pos] == pair[1])
}

/// Component-wise mean of several equal-length vectors
pub fn average_vectors(vectors: &[Vec<f64>]) -> Option<Vec<f64>> {
    let first = vectors.first()?;
    let dim = first.len();

    if vectors.iter().any(|v| v.len() != dim) {
        return None;
    }

    let mut sum = vec![0.0; dim];
    for vector in vectors {
        for (acc, value) in sum.iter_mut().zip(vector) {
            *acc += value;
        }
    }

    let count = vectors.len() as f64;
    Some(sum.into_iter().map(|v| v / count).collect())
}

/// Cosine similarity between two equal-length vectors
pub fn cosine_similarity(a: &[f64], b: &[f64]) -> f64 {
    let dot: f64 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f64 = a.iter().map(|x| x * x).sum::<f64>().sqrt();
    let norm_b: f64 = b.iter().map(|x| x * x).sum::<f64>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_text_is_one_chunk() {
        let chunks = create_overlapping_chunks("short text", 100, CHUNK_OVERLAP);
        assert_eq!(chunks, vec!["short text".to_string()]);
    }

    #[test]
    fn test_chunks_overlap() {
        let text = "a".repeat(1000);
        let chunks = create_overlapping_chunks(&text, 400, 128);

        assert!(chunks.len() >= 3);
        for pair in chunks.windows(2) {
            // Each chunk's tail reappears at the head of the next
            let tail: String = pair[0].chars().rev().take(64).collect::<String>();
            let head: String = pair[1].chars().take(64).collect();
            assert_eq!(
                tail.chars().rev().collect::<String>(),
                head,
                "expected >= 64 chars of shared overlap"
            );
        }
    }

    #[test]
    fn test_chunks_prefer_sentence_breaks() {
        let mut text = "x".repeat(350);
        text.push_str(". ");
        text.push_str(&"y".repeat(400));

        let chunks = create_overlapping_chunks(&text, 400, 128);
        // The first chunk ends at the sentence break, not mid-run
        assert!(chunks[0].ends_with('.'));
    }

    #[test]
    fn test_chunks_cover_all_text() {
        let text: String = (0..2000).map(|i| char::from(b'a' + (i % 26) as u8)).collect();
        let chunks = create_overlapping_chunks(&text, 500, 128);

        assert!(text.ends_with(chunks.last().unwrap().as_str()));
        assert!(text.starts_with(chunks.first().unwrap().as_str()));
    }

    #[test]
    fn test_average_vectors() {
        let vectors = vec![vec![1.0, 2.0, 3.0], vec![3.0, 4.0, 5.0]];
        let averaged = average_vectors(&vectors).unwrap();
        assert_eq!(averaged, vec![2.0, 3.0, 4.0]);
    }

    #[test]
    fn test_average_preserves_dimensionality() {
        let vectors = vec![vec![0.5; 1536], vec![1.5; 1536], vec![2.5; 1536]];
        let averaged = average_vectors(&vectors).unwrap();
        assert_eq!(averaged.len(), 1536);
        assert!((averaged[0] - 1.5).abs() < 1e-9);
    }

    #[test]
    fn test_average_rejects_mismatched_dims() {
        let vectors = vec![vec![1.0, 2.0], vec![1.0]];
        assert!(average_vectors(&vectors).is_none());
    }

    #[test]
    fn test_cosine_similarity_ordering() {
        let query = vec![1.0, 0.0, 0.0];
        let same = vec![2.0, 0.0, 0.0];
        let unrelated = vec![0.1, 1.0, 0.4];

        let similar = cosine_similarity(&query, &same);
        let dissimilar = cosine_similarity(&query, &unrelated);

        assert!((similar - 1.0).abs() < 1e-9);
        assert!(dissimilar < similar);
    }
}
