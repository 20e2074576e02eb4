//! Shared query parsing.
//!
//! Every query passes through [`parse_query`] before it reaches an index.
//! Terms are lowercased runs of alphanumeric characters; anything else
//! (colons, parentheses, stars, quotes, minus signs) is a separator. The
//! lexical backends therefore never see index-engine syntax, and a query
//! like `The: (AI) *test*` searches for `the`, `ai`, and `test`.
//!
//! Parsing also extracts keywords (terms minus stopwords, at most
//! [`MAX_KEYWORDS`]) and expands known abbreviations. Lexical search runs
//! on [`ParsedQuery::search_terms`]: keywords plus expansions, or every
//! term when the query is made of stopwords only.

use serde::Serialize;

/// Cap on extracted keywords per query.
pub const MAX_KEYWORDS: usize = 10;

const STOPWORDS: &[&str] = &[
    "the", "a", "an", "and", "or", "but", "in", "on", "at", "to", "for", "of", "with", "by",
    "from", "as", "is", "was", "are", "were", "be", "been", "being", "have", "has", "had", "do",
    "does", "did", "will", "would", "should", "could", "may", "might", "must", "can", "this",
    "that", "these", "those", "i", "you", "he", "she", "it", "we", "they",
];

/// Abbreviation -> terms appended when it appears as a whole term.
const EXPANSIONS: &[(&str, &[&str])] = &[
    ("ai", &["artificial", "intelligence", "machine", "learning"]),
    ("ml", &["machine", "learning"]),
    ("tech", &["technology"]),
];

/// A query after normalization.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParsedQuery {
    /// Text as received.
    pub raw: String,
    /// Trimmed, with internal whitespace collapsed to single spaces.
    pub normalized: String,
    /// Distinct lowercase terms in first-seen order.
    pub terms: Vec<String>,
    /// Terms that are neither stopwords nor single characters.
    pub keywords: Vec<String>,
    /// Terms added by abbreviation expansion, not already in `keywords`.
    pub expansions: Vec<String>,
}

impl ParsedQuery {
    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }

    /// Terms handed to the lexical index.
    pub fn search_terms(&self) -> Vec<&str> {
        if self.keywords.is_empty() {
            return self.terms.iter().map(String::as_str).collect();
        }
        self.keywords
            .iter()
            .chain(self.expansions.iter())
            .map(String::as_str)
            .collect()
    }

    /// FTS5 `MATCH` expression: every search term double-quoted, joined
    /// with `OR`.
    ///
    /// Terms are alphanumeric only, so quoting makes reserved words such as
    /// `AND`, `NOT` or `NEAR` plain string literals.
    pub fn fts_expression(&self) -> String {
        self.search_terms()
            .iter()
            .map(|t| format!("\"{}\"", t))
            .collect::<Vec<_>>()
            .join(" OR ")
    }
}

pub fn parse_query(raw: &str) -> ParsedQuery {
    let normalized = raw.split_whitespace().collect::<Vec<_>>().join(" ");

    let mut terms: Vec<String> = Vec::new();
    for term in tokenize_terms(raw) {
        if !terms.contains(&term) {
            terms.push(term);
        }
    }

    let keywords: Vec<String> = terms
        .iter()
        .filter(|t| t.chars().count() > 1 && !STOPWORDS.contains(&t.as_str()))
        .take(MAX_KEYWORDS)
        .cloned()
        .collect();

    let mut expansions: Vec<String> = Vec::new();
    for (abbrev, expanded) in EXPANSIONS {
        if !keywords.iter().any(|k| k == abbrev) {
            continue;
        }
        for term in *expanded {
            let term = term.to_string();
            if !keywords.contains(&term) && !expansions.contains(&term) {
                expansions.push(term);
            }
        }
    }

    ParsedQuery {
        raw: raw.to_string(),
        normalized,
        terms,
        keywords,
        expansions,
    }
}

/// Lowercased alphanumeric runs of `text`, duplicates included.
///
/// Also used to build the in-memory lexical index, so documents and
/// queries agree on what a term is.
pub fn tokenize_terms(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reserved_syntax_stripped() {
        let q = parse_query("The: (tech) *test*");
        assert_eq!(q.terms, vec!["the", "tech", "test"]);
        assert_eq!(
            q.fts_expression(),
            "\"tech\" OR \"test\" OR \"technology\""
        );
    }

    #[test]
    fn test_boolean_operators_become_terms() {
        let q = parse_query("cats AND NOT dogs OR NEAR(birds)");
        assert_eq!(q.terms, vec!["cats", "and", "not", "dogs", "or", "near", "birds"]);
    }

    #[test]
    fn test_column_filter_and_quotes() {
        let q = parse_query("text:\"hello\" -world ^prefix*");
        assert_eq!(q.terms, vec!["text", "hello", "world", "prefix"]);
    }

    #[test]
    fn test_dedup_keeps_first_seen_order() {
        let q = parse_query("Memory memories MEMORY memories");
        assert_eq!(q.terms, vec!["memory", "memories"]);
    }

    #[test]
    fn test_normalized_collapses_whitespace() {
        let q = parse_query("  hello \n\t world  ");
        assert_eq!(q.normalized, "hello world");
        assert_eq!(q.raw, "  hello \n\t world  ");
    }

    #[test]
    fn test_punctuation_only_is_empty() {
        let q = parse_query("*** () :: \"\"");
        assert!(q.is_empty());
        assert_eq!(q.fts_expression(), "");
    }

    #[test]
    fn test_unicode_terms() {
        let q = parse_query("Größe café");
        assert_eq!(q.terms, vec!["größe", "café"]);
    }

    #[test]
    fn test_keywords_drop_stopwords() {
        let q = parse_query("What are the memories in Presence?");
        assert_eq!(q.keywords, vec!["what", "memories", "presence"]);
        assert!(q.expansions.is_empty());
        assert_eq!(q.search_terms(), vec!["what", "memories", "presence"]);
    }

    #[test]
    fn test_keywords_capped() {
        let q = parse_query("k1 k2 k3 k4 k5 k6 k7 k8 k9 k10 k11 k12");
        assert_eq!(q.terms.len(), 12);
        assert_eq!(q.keywords.len(), MAX_KEYWORDS);
        assert_eq!(q.keywords.last().map(String::as_str), Some("k10"));
    }

    #[test]
    fn test_stopword_only_query_searches_all_terms() {
        let q = parse_query("AND OR the");
        assert!(q.keywords.is_empty());
        assert_eq!(q.search_terms(), vec!["and", "or", "the"]);
        assert_eq!(q.fts_expression(), "\"and\" OR \"or\" OR \"the\"");
    }

    #[test]
    fn test_abbreviations_expand() {
        let q = parse_query("AI and ML for tech");
        assert_eq!(q.keywords, vec!["ai", "ml", "tech"]);
        assert_eq!(
            q.expansions,
            vec!["artificial", "intelligence", "machine", "learning", "technology"]
        );
        assert_eq!(q.search_terms().len(), 8);
    }

    #[test]
    fn test_expansion_matches_whole_terms_only() {
        let q = parse_query("she said the maid retired");
        assert!(q.expansions.is_empty());
        let q = parse_query("machine learning with ml");
        assert!(q.expansions.is_empty());
    }
}
