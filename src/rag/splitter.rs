//! Text splitting for ingestion.
//!
//! Documents are cut into overlapping character windows. A window that does
//! not reach the end of the document is shortened to the last sentence
//! ending found in its final 20%.

use serde::{Deserialize, Serialize};

/// A text chunk with its position in the source document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextChunk {
    pub text: String,
    pub source: String,
    /// Character offset in the original document
    pub start_offset: usize,
    pub chunk_index: usize,
}

#[derive(Debug, Clone)]
pub struct TextSplitter {
    chunk_size: usize,
    chunk_overlap: usize,
}

impl TextSplitter {
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Self {
        let chunk_size = chunk_size.max(1);
        Self {
            chunk_size,
            chunk_overlap: chunk_overlap.min(chunk_size - 1),
        }
    }

    pub fn split(&self, text: &str, source: &str) -> Vec<TextChunk> {
        let chars: Vec<char> = text.chars().collect();
        let total_chars = chars.len();

        let mut chunks = Vec::new();
        let mut start = 0;

        while start < total_chars {
            let end = (start + self.chunk_size).min(total_chars);
            let window: String = chars[start..end].iter().collect();

            let window = if end < total_chars {
                cut_at_sentence_boundary(&window)
            } else {
                window
            };

            let window_chars = window.chars().count();
            let trimmed = window.trim();
            if !trimmed.is_empty() {
                chunks.push(TextChunk {
                    text: trimmed.to_string(),
                    source: source.to_string(),
                    start_offset: start,
                    chunk_index: chunks.len(),
                });
            }

            if end == total_chars {
                break;
            }
            // Resume from where a shortened window actually ended so no text is skipped.
            start += window_chars.saturating_sub(self.chunk_overlap).max(1);
        }

        chunks
    }
}

/// Strips tags plus `<script>` and `<style>` bodies, keeping non-empty text lines.
pub fn strip_html_tags(html: &str) -> String {
    let mut result = String::new();
    let mut in_tag = false;
    let mut skip_until: Option<&'static str> = None;

    let mut i = 0;
    while i < html.len() {
        let rest = &html[i..];

        if let Some(closing) = skip_until {
            match find_ignore_ascii_case(rest, closing) {
                Some(pos) => {
                    i += pos + closing.len();
                    skip_until = None;
                }
                None => break,
            }
            continue;
        }

        if starts_with_ignore_ascii_case(rest, "<script") {
            skip_until = Some("</script>");
            continue;
        }
        if starts_with_ignore_ascii_case(rest, "<style") {
            skip_until = Some("</style>");
            continue;
        }

        let Some(c) = html[i..].chars().next() else {
            break;
        };
        if c == '<' {
            in_tag = true;
        } else if c == '>' {
            in_tag = false;
        } else if !in_tag {
            result.push(c);
        }
        i += c.len_utf8();
    }

    result
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

fn starts_with_ignore_ascii_case(text: &str, prefix: &str) -> bool {
    text.as_bytes()
        .get(..prefix.len())
        .is_some_and(|head| head.eq_ignore_ascii_case(prefix.as_bytes()))
}

/// `needle` must be ASCII so a match always starts on a char boundary.
fn find_ignore_ascii_case(haystack: &str, needle: &str) -> Option<usize> {
    haystack
        .as_bytes()
        .windows(needle.len())
        .position(|window| window.eq_ignore_ascii_case(needle.as_bytes()))
}

fn cut_at_sentence_boundary(text: &str) -> String {
    const SENTENCE_ENDINGS: [&str; 6] = [". ", "! ", "? ", ".\n", "!\n", "?\n"];

    let mut search_start = (text.len() * 80) / 100;
    while !text.is_char_boundary(search_start) {
        search_start += 1;
    }
    let search_text = &text[search_start..];

    let best = SENTENCE_ENDINGS
        .iter()
        .filter_map(|ending| search_text.rfind(ending).map(|pos| pos + ending.len()))
        .max();

    match best {
        Some(offset) => text[..search_start + offset].to_string(),
        None => text.to_string(),
    }
}
