use std::fmt;

use unicode_normalization::UnicodeNormalization;
use unicode_normalization::char::is_combining_mark;

/// Query text reduced to something the FTS5 grammar accepts verbatim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SanitizedQuery {
    /// Nothing searchable was left; callers return an empty result list.
    Empty,
    Term(String),
    Phrase(Vec<String>),
}

impl SanitizedQuery {
    pub fn is_empty(&self) -> bool {
        matches!(self, Self::Empty)
    }

    /// The FTS5 `MATCH` expression, or `None` for the empty sentinel.
    pub fn match_expression(&self) -> Option<String> {
        match self {
            Self::Empty => None,
            Self::Term(term) => Some(term.clone()),
            Self::Phrase(words) => Some(format!("\"{}\"", words.join(" "))),
        }
    }
}

impl fmt::Display for SanitizedQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.match_expression() {
            Some(expression) => f.write_str(&expression),
            None => Ok(()),
        }
    }
}

/// Normalizes raw query text into a safe full-text query.
///
/// Letters, digits and combining marks form words; everything else is a
/// separator, which removes FTS5 operators, column filters and every quote
/// character (matched or not). Marks stay inside their word because the
/// `unicode61` tokenizer folds them away, so decomposed input splits the same
/// way the indexed text did. Words are lowercased so bare `AND`/`OR`/`NOT`/
/// `NEAR` lose their operator meaning. Several words become one exact phrase;
/// a single word is passed through unquoted.
pub fn sanitize(raw: &str) -> SanitizedQuery {
    let normalized = raw.nfc().map(fold_case).nfc().collect::<String>();
    let mut words = normalized
        .split(|character: char| !is_word_char(character))
        .filter(|word| !word.is_empty())
        .map(str::to_string)
        .collect::<Vec<String>>();

    match words.len() {
        0 => SanitizedQuery::Empty,
        1 => SanitizedQuery::Term(words.remove(0)),
        _ => SanitizedQuery::Phrase(words),
    }
}

/// Lowercases one character, leaving it alone when the lowercase form expands
/// (`İ` becomes `i` plus a combining dot) so the tokenizer sees the indexed
/// spelling.
fn fold_case(character: char) -> char {
    let mut lower = character.to_lowercase();
    match (lower.next(), lower.next()) {
        (Some(single), None) => single,
        _ => character,
    }
}

fn is_word_char(character: char) -> bool {
    character.is_alphanumeric() || is_combining_mark(character)
}

#[cfg(test)]
mod tests {
    use super::*;

    const AWKWARD_INPUTS: &[&str] = &[
        "",
        "   ",
        "\"",
        "\"weekly review",
        "weekly \"review\" checklist\"",
        "NOT sqlite OR postgres",
        "col:value AND (nested OR group)*",
        "title:^prefix -excluded +required",
        "  tabs\tand\nnewlines  ",
        "emoji 🚀 rocket",
        "Ünïcödé Straße",
        "''''",
        "a",
        "x\"y\"z",
        "NEAR(a b, 3)",
        "c++ / c#",
        "İstanbul notes",
        "nai\u{0308}ve re\u{0301}sume\u{0301}",
        "\u{0301}leading mark",
    ];

    #[test]
    fn sanitize_is_idempotent() {
        for input in AWKWARD_INPUTS {
            let once = sanitize(input);
            let twice = sanitize(&once.to_string());
            assert_eq!(once, twice, "sanitize not idempotent for {input:?}");
        }
    }

    #[test]
    fn empty_and_punctuation_only_become_sentinel() {
        assert!(sanitize("").is_empty());
        assert!(sanitize(" \"' * ( ) ").is_empty());
        assert_eq!(sanitize("???").match_expression(), None);
    }

    #[test]
    fn single_word_passes_through_unwrapped() {
        assert_eq!(sanitize("Performance"), SanitizedQuery::Term("performance".into()));
        assert_eq!(sanitize("  \"sqlite\"  ").to_string(), "sqlite");
    }

    #[test]
    fn multi_word_becomes_exact_phrase() {
        let query = sanitize("Weekly   \"Review");
        assert_eq!(query.to_string(), "\"weekly review\"");
        assert_eq!(
            query,
            SanitizedQuery::Phrase(vec!["weekly".into(), "review".into()])
        );
    }

    #[test]
    fn operators_are_neutralized() {
        assert_eq!(sanitize("NOT").to_string(), "not");
        assert_eq!(
            sanitize("col:value AND x*").to_string(),
            "\"col value and x\""
        );
    }

    #[test]
    fn non_ascii_letters_survive() {
        assert_eq!(sanitize("Straße").to_string(), "straße");
    }

    #[test]
    fn decomposed_words_stay_whole() {
        assert_eq!(
            sanitize("nai\u{0308}ve re\u{0301}sume\u{0301}"),
            sanitize("naïve résumé")
        );
        assert_eq!(sanitize("naïve résumé").to_string(), "\"naïve résumé\"");
    }

    #[test]
    fn dotted_capital_i_is_one_word() {
        assert_eq!(
            sanitize("İstanbul trip"),
            SanitizedQuery::Phrase(vec!["İstanbul".into(), "trip".into()])
        );
    }
}
