//! In-text references to other blocks.
//!
//! Two syntaxes are recognised by a single left-to-right pattern:
//!
//! - `#identifier`: word characters with optional inner hyphens (`#Intro`, `#Intro-2`). The
//!   `#` must open a word, so `C#` or `a#b` are plain text, and the match ends at a word
//!   boundary, so trailing punctuation is not part of the name.
//! - `[free form name]`: anything except brackets, whitespace allowed.
//!
//! There is no escape syntax; a literal `#word` or `[text]` is always read as a reference.

use once_cell::sync::Lazy;
use regex::Regex;
use std::{collections::BTreeSet, ops::Range};

static REFERENCE_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\B#(?P<hash>\w(?:[\w-]*\w)?)|\[(?P<bracket>[^\[\]]+)\]")
        .expect("reference pattern is a valid regex")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReferenceSyntax {
    Hash,
    Bracket,
}

/// A single reference occurrence within a text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reference {
    pub name: String,
    pub syntax: ReferenceSyntax,
    /// Byte span of the whole match, marker and brackets included.
    pub span: Range<usize>,
}

/// All reference occurrences in `text`, in order, duplicates preserved.
pub fn parse_references(text: &str) -> Vec<Reference> {
    REFERENCE_PATTERN
        .captures_iter(text)
        .filter_map(|caps| {
            let whole = caps.get(0)?;
            let (name, syntax) = if let Some(hash) = caps.name("hash") {
                (hash.as_str(), ReferenceSyntax::Hash)
            } else {
                (caps.name("bracket")?.as_str(), ReferenceSyntax::Bracket)
            };
            Some(Reference {
                name: name.to_string(),
                syntax,
                span: whole.range(),
            })
        })
        .collect()
}

/// Ordered referenced names, duplicates preserved.
pub fn referenced_names(text: &str) -> Vec<String> {
    parse_references(text).into_iter().map(|r| r.name).collect()
}

/// Distinct referenced names, compared case-insensitively, in first-seen order. This is the
/// edge set a text contributes to the dependency graph.
pub fn distinct_names(text: &str) -> Vec<String> {
    let mut seen = BTreeSet::new();
    referenced_names(text)
        .into_iter()
        .filter(|name| seen.insert(normalize_name(name)))
        .collect()
}

/// Canonical form used for case-insensitive name comparison.
pub fn normalize_name(name: &str) -> String {
    name.trim().to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    fn test_hash_and_bracket_references() {
        let refs = parse_references("say #A loudly and [long name] twice #A.");
        let names: Vec<_> = refs.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["A", "long name", "A"]);
        assert_eq!(refs[0].syntax, ReferenceSyntax::Hash);
        assert_eq!(refs[1].syntax, ReferenceSyntax::Bracket);
        assert_eq!(&"say #A loudly"[refs[0].span.clone()], "#A");
    }

    #[test]
    fn test_hash_reference_boundaries() {
        assert_eq!(referenced_names("#Intro-2, then"), vec!["Intro-2"]);
        assert_eq!(referenced_names("trailing #dash- here"), vec!["dash"]);
        assert!(referenced_names("no space#joined").is_empty());
        assert!(referenced_names("written in C#").is_empty());
        assert_eq!(referenced_names("(#A) #B#C [x]#D ##E"), vec!["A", "B", "x", "D", "E"]);
        assert!(referenced_names("# heading").is_empty());
        assert!(referenced_names("[]").is_empty());
    }

    #[test]
    fn test_bracket_allows_punctuation() {
        assert_eq!(
            referenced_names("use [Q&A: part 1!] now"),
            vec!["Q&A: part 1!"]
        );
        assert_eq!(referenced_names("[a [b] c]"), vec!["b"]);
    }

    #[test]
    fn test_distinct_names_collapse_case_insensitively() {
        assert_eq!(distinct_names("#A [a] #B #a"), vec!["A", "B"]);
    }
}
