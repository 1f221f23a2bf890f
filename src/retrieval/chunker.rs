use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{NotegrepError, NotegrepResult};

/// Smallest character budget the chunker accepts; smaller values are raised to it.
pub const MIN_CHUNK_CHARS: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    pub id: String,
    pub parent_item_id: String,
    pub ordinal: u32,
    pub heading: String,
    pub text: String,
    pub token_estimate: u32,
}

pub fn chunk_id_for(item_id: &str, ordinal: u32) -> String {
    format!("{item_id}#{ordinal:04}")
}

/// Rough token count used for budgeting: one token per four characters.
pub fn estimate_tokens(text: &str) -> u32 {
    let chars = text.chars().count();
    u32::try_from(chars.div_ceil(4)).unwrap_or(u32::MAX)
}

#[derive(Debug)]
struct Section {
    heading: String,
    body: String,
}

/// Heading-aware markdown splitter with a per-chunk character budget.
#[derive(Debug, Clone)]
pub struct Chunker {
    max_chars: usize,
    heading_pattern: Regex,
}

impl Chunker {
    pub fn new(max_chars: usize) -> NotegrepResult<Self> {
        let heading_pattern = Regex::new(r"^ {0,3}(#{1,6})[ \t]+(.*?)[ \t#]*$").map_err(|err| {
            NotegrepError::Configuration(format!("failed to compile heading regex: {err}"))
        })?;
        Ok(Self {
            max_chars: max_chars.max(MIN_CHUNK_CHARS),
            heading_pattern,
        })
    }

    pub fn max_chars(&self) -> usize {
        self.max_chars
    }

    /// Splits `text` into chunks of at most `max_chars` characters.
    ///
    /// Headings start new sections. Sections over budget are packed paragraph
    /// by paragraph, and a paragraph that alone exceeds the budget is cut on
    /// the last whitespace inside the window (or hard at the budget). Text
    /// before the first heading uses `default_heading`. The output depends
    /// only on the inputs.
    pub fn chunk(&self, item_id: &str, default_heading: &str, text: &str) -> Vec<Chunk> {
        let mut chunks = Vec::<Chunk>::new();

        for section in self.split_sections(text, default_heading.trim()) {
            for piece in split_section_body(&section.body, self.max_chars) {
                let ordinal = u32::try_from(chunks.len()).unwrap_or(u32::MAX);
                chunks.push(Chunk {
                    id: chunk_id_for(item_id, ordinal),
                    parent_item_id: item_id.to_string(),
                    ordinal,
                    heading: section.heading.clone(),
                    token_estimate: estimate_tokens(&piece),
                    text: piece,
                });
            }
        }

        chunks
    }

    fn split_sections(&self, text: &str, default_heading: &str) -> Vec<Section> {
        let mut sections = Vec::<Section>::new();
        let mut heading = default_heading.to_string();
        let mut body = Vec::<&str>::new();
        let mut in_fence = false;

        for line in text.lines() {
            let trimmed = line.trim_start();
            if trimmed.starts_with("```") || trimmed.starts_with("~~~") {
                in_fence = !in_fence;
                body.push(line);
                continue;
            }

            if !in_fence
                && let Some(captures) = self.heading_pattern.captures(line)
            {
                push_section(&mut sections, &heading, &body);
                body.clear();
                let title = captures.get(2).map(|value| value.as_str().trim()).unwrap_or("");
                heading = if title.is_empty() {
                    default_heading.to_string()
                } else {
                    title.to_string()
                };
                continue;
            }

            body.push(line);
        }
        push_section(&mut sections, &heading, &body);

        sections
    }
}

fn push_section(sections: &mut Vec<Section>, heading: &str, lines: &[&str]) {
    let body = lines.join("\n").trim().to_string();
    if body.is_empty() {
        return;
    }
    sections.push(Section {
        heading: heading.to_string(),
        body,
    });
}

fn split_section_body(body: &str, max_chars: usize) -> Vec<String> {
    if body.chars().count() <= max_chars {
        return vec![body.to_string()];
    }

    let mut out = Vec::<String>::new();
    let mut current = String::new();

    for paragraph in split_paragraphs(body) {
        let paragraph_len = paragraph.chars().count();
        if paragraph_len > max_chars {
            flush(&mut out, &mut current);
            out.extend(hard_split(&paragraph, max_chars));
            continue;
        }

        let joined_len = if current.is_empty() {
            paragraph_len
        } else {
            current.chars().count() + 2 + paragraph_len
        };
        if joined_len > max_chars {
            flush(&mut out, &mut current);
        }
        if !current.is_empty() {
            current.push_str("\n\n");
        }
        current.push_str(&paragraph);
    }
    flush(&mut out, &mut current);

    out
}

fn split_paragraphs(body: &str) -> Vec<String> {
    let mut paragraphs = Vec::<String>::new();
    let mut current = Vec::<&str>::new();
    for line in body.lines() {
        if line.trim().is_empty() {
            if !current.is_empty() {
                paragraphs.push(current.join("\n"));
                current.clear();
            }
        } else {
            current.push(line);
        }
    }
    if !current.is_empty() {
        paragraphs.push(current.join("\n"));
    }
    paragraphs
}

fn hard_split(paragraph: &str, max_chars: usize) -> Vec<String> {
    let chars = paragraph.chars().collect::<Vec<char>>();
    let mut out = Vec::<String>::new();
    let mut start = 0usize;

    while start < chars.len() {
        let window_end = (start + max_chars).min(chars.len());
        let mut end = window_end;
        if window_end < chars.len()
            && let Some(offset) = chars[start..window_end]
                .iter()
                .rposition(|character| character.is_whitespace())
            && offset > max_chars / 2
        {
            end = start + offset;
        }

        let piece = chars[start..end].iter().collect::<String>();
        let piece = piece.trim();
        if !piece.is_empty() {
            out.push(piece.to_string());
        }
        start = end;
        while start < chars.len() && chars[start].is_whitespace() {
            start += 1;
        }
    }

    out
}

fn flush(out: &mut Vec<String>, current: &mut String) {
    let trimmed = current.trim();
    if !trimmed.is_empty() {
        out.push(trimmed.to_string());
    }
    current.clear();
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk_note(item_id: &str, heading: &str, text: &str, max_chars: usize) -> Vec<Chunk> {
        Chunker::new(max_chars)
            .expect("chunker")
            .chunk(item_id, heading, text)
    }

    #[test]
    fn splits_on_headings_and_keeps_nearest_heading() {
        let text = "Intro line.\n\n# Weekly Review\nCheck inbox.\n\n## Habits ##\nSleep early.";
        let chunks = chunk_note("n1", "My Note", text, 500);

        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].heading, "My Note");
        assert_eq!(chunks[0].text, "Intro line.");
        assert_eq!(chunks[1].heading, "Weekly Review");
        assert_eq!(chunks[2].heading, "Habits");
        assert_eq!(chunks[2].text, "Sleep early.");
        assert_eq!(chunks[2].id, "n1#0002");
        assert!(chunks.iter().enumerate().all(|(i, c)| c.ordinal as usize == i));
    }

    #[test]
    fn hashes_inside_code_fences_are_not_headings() {
        let text = "# Script\n```sh\n# not a heading\necho hi\n```";
        let chunks = chunk_note("n1", "", text, 500);
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].text.contains("# not a heading"));
    }

    #[test]
    fn oversized_sections_split_on_paragraphs_then_hard_budget() {
        let paragraph = "word ".repeat(30);
        let long_run = "x".repeat(200);
        let text = format!("# Big\n{paragraph}\n\n{paragraph}\n\n{long_run}");
        let chunks = chunk_note("n1", "", &text, 100);

        assert!(chunks.len() >= 4, "got {} chunks", chunks.len());
        for chunk in &chunks {
            assert!(chunk.text.chars().count() <= 100, "chunk over budget: {}", chunk.text.len());
            assert_eq!(chunk.heading, "Big");
        }
    }

    #[test]
    fn chunking_is_deterministic() {
        let text = "# A\none\n\ntwo\n\n# B\nthree ".repeat(40);
        assert_eq!(chunk_note("n", "t", &text, 120), chunk_note("n", "t", &text, 120));
    }

    #[test]
    fn empty_and_heading_only_notes_have_no_chunks() {
        assert!(chunk_note("n", "t", "", 100).is_empty());
        assert!(chunk_note("n", "t", "# Only a heading\n\n", 100).is_empty());
    }

    #[test]
    fn token_estimate_rounds_up() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("abcde"), 2);
    }
}
