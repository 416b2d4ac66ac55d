//! Sliding-window text chunker.
//!
//! Cuts extracted page text into overlapping windows of `chunk_size`
//! characters. When more text remains after a window, the cut moves back to
//! a natural boundary found in the window's second half:
//!
//! 1. the last paragraph break (`"\n\n"`), excluded from the chunk;
//! 2. otherwise the last sentence end (`". "`), keeping the period;
//! 3. otherwise the full window.
//!
//! The next window starts `overlap` characters before the cut, and always at
//! least one character after the previous start, so chunking terminates on
//! any input. Whitespace-only pieces are dropped. Lengths are counted in
//! Unicode scalar values, never bytes, so multi-byte text is never split
//! inside a character.

/// Split `text` into ordered chunk contents. The index in the returned
/// vector is the chunk's position.
pub fn chunk_text(text: &str, chunk_size: usize, overlap: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    let total = chars.len();
    let chunk_size = chunk_size.max(1);
    let mut chunks = Vec::new();
    let mut start = 0;

    while start < total {
        let end = (start + chunk_size).min(total);
        let cut = if end < total {
            find_cut(&chars, start, end)
        } else {
            end
        };

        let piece: String = chars[start..cut].iter().collect();
        let trimmed = piece.trim();
        if !trimmed.is_empty() {
            chunks.push(trimmed.to_string());
        }

        if end >= total {
            break;
        }

        let next = cut.saturating_sub(overlap);
        start = next.max(start + 1);
    }

    chunks
}

/// Best cut point in `chars[start..end]`, searching only the second half.
fn find_cut(chars: &[char], start: usize, end: usize) -> usize {
    let half = start + (end - start) / 2;
    let window = &chars[half..end];

    if let Some(i) = rfind_pair(window, '\n', '\n') {
        let cut = half + i;
        if cut > start {
            return cut;
        }
    }
    if let Some(i) = rfind_pair(window, '.', ' ') {
        return half + i + 1;
    }
    end
}

fn rfind_pair(window: &[char], a: char, b: char) -> Option<usize> {
    window
        .windows(2)
        .rposition(|pair| pair[0] == a && pair[1] == b)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_small_text_single_chunk() {
        let chunks = chunk_text("Hello, world!", 1500, 200);
        assert_eq!(chunks, vec!["Hello, world!".to_string()]);
    }

    #[test]
    fn test_empty_and_whitespace_text() {
        assert!(chunk_text("", 1500, 200).is_empty());
        assert!(chunk_text("   \n\n\t  ", 1500, 200).is_empty());
    }

    #[test]
    fn test_markdown_page_produces_multiple_chunks() {
        let text = format!("# Title\n\n{}", "Paragraph text. ".repeat(200));
        let chunks = chunk_text(&text, 1500, 200);
        assert!(chunks.len() >= 2);
        assert!(chunks[0].starts_with("# Title"));
        assert!(chunks.iter().all(|c| !c.trim().is_empty()));
        // Sentence cuts keep the period.
        assert!(chunks[0].ends_with('.'));
    }

    #[test]
    fn test_prefers_paragraph_break_in_second_half() {
        let mut text = "a".repeat(1000);
        text.push_str("\n\n");
        text.push_str(&"b".repeat(1000));
        let chunks = chunk_text(&text, 1500, 200);
        assert_eq!(chunks[0], "a".repeat(1000));
        assert!(chunks[1].starts_with('a'));
        assert!(chunks[1].ends_with('b'));
    }

    #[test]
    fn test_ignores_paragraph_break_in_first_half() {
        let mut text = "a".repeat(100);
        text.push_str("\n\n");
        text.push_str(&"b".repeat(3000));
        let chunks = chunk_text(&text, 1500, 200);
        assert_eq!(chunks[0].chars().count(), 1500);
    }

    #[test]
    fn test_paragraph_break_beats_sentence_end() {
        let mut text = "x".repeat(800);
        text.push_str("\n\n");
        text.push_str(&"y".repeat(300));
        text.push_str(". ");
        text.push_str(&"z".repeat(1000));
        let chunks = chunk_text(&text, 1500, 200);
        assert_eq!(chunks[0], "x".repeat(800));
    }

    #[test]
    fn test_overlap_repeats_tail() {
        let text = "w".repeat(3000);
        let chunks = chunk_text(&text, 1000, 100);
        // 0..1000, 900..1900, 1800..2800, 2700..3000
        assert_eq!(chunks.len(), 4);
        assert_eq!(chunks[3].len(), 300);
    }

    #[test]
    fn test_terminates_when_overlap_exceeds_window() {
        let text = "q".repeat(50);
        let chunks = chunk_text(&text, 10, 20);
        assert!(!chunks.is_empty());
        assert!(chunks.len() <= 50);
    }

    #[test]
    fn test_multibyte_text_is_safe() {
        let text = "é漢字🙂 ".repeat(600);
        let chunks = chunk_text(&text, 1500, 200);
        assert!(chunks.len() >= 2);
        for c in &chunks {
            assert!(c.chars().count() <= 1500);
        }
    }

    #[test]
    fn test_deterministic() {
        let text = "Alpha. Beta.\n\nGamma. Delta. ".repeat(200);
        assert_eq!(chunk_text(&text, 300, 50), chunk_text(&text, 300, 50));
    }
}
