//! Splits unit text into speakable chunks of bounded length.
//!
//! Each pass looks backwards from the length limit for the nearest boundary,
//! trying sentence terminators first, then clause punctuation, then plain
//! whitespace. Candidates that would leave a chunk shorter than
//! [`MIN_CHUNK_FRACTION`] of the limit are rejected in favour of the next
//! boundary tier. Words are never split: a single word longer than the limit
//! is emitted whole.

/// Default limit used by the reader, in characters.
pub const DEFAULT_MAX_CHUNK_LEN: usize = 200;

/// Boundaries closer to the start than this fraction of the limit are too short.
pub const MIN_CHUNK_FRACTION: f64 = 0.3;

const SENTENCE_TERMINATORS: &[char] = &['.', '!', '?', '…'];
const CLAUSE_SEPARATORS: &[char] = &[';', ':', ',', '—', '–'];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Boundary {
    Sentence,
    Clause,
    Space,
}

const BOUNDARY_PRIORITY: [Boundary; 3] = [Boundary::Sentence, Boundary::Clause, Boundary::Space];

/// Split `text` into trimmed, non-empty chunks of at most `max_len` characters.
pub fn chunk(text: &str, max_len: usize) -> Vec<String> {
    let max_len = max_len.max(1);
    let mut chunks = Vec::new();
    let mut remaining = text.trim();

    while !remaining.is_empty() {
        if remaining.chars().count() <= max_len {
            chunks.push(remaining.to_string());
            break;
        }

        let cut = find_cut(remaining, max_len);
        let piece = remaining[..cut].trim();
        if !piece.is_empty() {
            chunks.push(piece.to_string());
        }
        remaining = remaining[cut..].trim_start();
    }

    chunks
}

/// Byte offset at which the next chunk ends. Always greater than zero for a
/// trimmed, non-empty `remaining`.
fn find_cut(remaining: &str, max_len: usize) -> usize {
    let limit = byte_offset_of_char(remaining, max_len);
    // One extra char so a separator's trailing whitespace right after the
    // limit still counts.
    let window_end = byte_offset_of_char(remaining, max_len + 1);
    let min_chars = (max_len as f64 * MIN_CHUNK_FRACTION).ceil() as usize;

    for boundary in BOUNDARY_PRIORITY {
        match last_boundary(remaining, window_end, limit, boundary) {
            Some(end) if remaining[..end].chars().count() >= min_chars => return end,
            _ => {}
        }
    }

    // Every tier was too short; a short chunk still beats splitting a word.
    if let Some(end) = last_boundary(remaining, window_end, limit, Boundary::Space) {
        return end;
    }

    // The leading word alone exceeds the limit: emit it whole.
    remaining
        .char_indices()
        .find(|(_, ch)| ch.is_whitespace())
        .map(|(idx, _)| idx)
        .unwrap_or(remaining.len())
}

/// End offset (exclusive) of the chunk for the last `boundary` in the window.
fn last_boundary(text: &str, window_end: usize, limit: usize, boundary: Boundary) -> Option<usize> {
    let window = &text[..window_end];
    let mut next: Option<char> = None;

    for (idx, ch) in window.char_indices().rev() {
        let followed_by_space = next.is_some_and(char::is_whitespace);
        let found = match boundary {
            Boundary::Sentence => followed_by_space && SENTENCE_TERMINATORS.contains(&ch),
            Boundary::Clause => followed_by_space && CLAUSE_SEPARATORS.contains(&ch),
            Boundary::Space => ch.is_whitespace() && idx > 0,
        };
        if found {
            let end = match boundary {
                Boundary::Space => idx,
                _ => idx + ch.len_utf8(),
            };
            if end > 0 && end <= limit {
                return Some(end);
            }
        }
        next = Some(ch);
    }
    None
}

fn byte_offset_of_char(text: &str, char_idx: usize) -> usize {
    text.char_indices()
        .nth(char_idx)
        .map(|(idx, _)| idx)
        .unwrap_or(text.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn normalize(text: &str) -> String {
        text.split_whitespace().collect::<Vec<_>>().join(" ")
    }

    #[test]
    fn short_text_is_single_chunk() {
        assert_eq!(chunk("A. B.", 200), vec!["A. B.".to_string()]);
    }

    #[test]
    fn blank_text_yields_nothing() {
        assert!(chunk("", 10).is_empty());
        assert!(chunk("   \n\t ", 10).is_empty());
    }

    #[test]
    fn prefers_sentence_boundary() {
        let chunks = chunk("Hello world. This is a test.", 15);
        assert_eq!(chunks[0], "Hello world.");
        assert_eq!(normalize(&chunks.join(" ")), "Hello world. This is a test.");
    }

    #[test]
    fn falls_back_to_clause_then_space() {
        let chunks = chunk("alpha beta gamma, delta epsilon zeta eta", 24);
        assert_eq!(chunks[0], "alpha beta gamma,");

        let chunks = chunk("alpha beta gamma delta epsilon", 14);
        assert_eq!(chunks[0], "alpha beta");
    }

    #[test]
    fn rejects_sentence_boundary_that_is_too_early() {
        // "Hi." is under 30% of the limit, so the clause comma wins.
        let chunks = chunk("Hi. Then a long clause follows, and more words after it", 40);
        assert_eq!(chunks[0], "Hi. Then a long clause follows,");
    }

    #[test]
    fn dash_boundaries_keep_the_dash() {
        let chunks = chunk("one two three four — five six seven eight nine", 22);
        assert_eq!(chunks[0], "one two three four —");
    }

    #[test]
    fn overlong_word_is_emitted_whole() {
        let word = "x".repeat(30);
        let text = format!("{word} tail words");
        let chunks = chunk(&text, 10);
        assert_eq!(chunks[0], word);
        assert_eq!(chunks[1..].join(" "), "tail words");
    }

    #[test]
    fn counts_characters_not_bytes() {
        let text = "ééééé ééééé ééééé";
        let chunks = chunk(text, 11);
        assert_eq!(chunks, vec!["ééééé ééééé".to_string(), "ééééé".to_string()]);
    }

    #[test]
    fn zero_limit_is_treated_as_one() {
        let chunks = chunk("a b", 0);
        assert_eq!(chunks, vec!["a".to_string(), "b".to_string()]);
    }

    proptest! {
        #[test]
        fn chunks_cover_input(text in "[a-zA-Z .,;:!?\\n—-]{0,400}", max_len in 1usize..80) {
            let chunks = chunk(&text, max_len);
            prop_assert_eq!(normalize(&chunks.join(" ")), normalize(&text));
        }

        #[test]
        fn chunks_respect_bound_unless_single_word(
            text in "[a-z]{1,20}( [a-z]{1,20}[.,]?){0,40}",
            max_len in 1usize..60,
        ) {
            for piece in chunk(&text, max_len) {
                prop_assert!(!piece.trim().is_empty());
                if piece.chars().count() > max_len {
                    prop_assert!(!piece.contains(char::is_whitespace), "oversized multi-word chunk {:?}", piece);
                }
            }
        }
    }
}
