//! Query text preparation.

use async_trait::async_trait;

use crate::error::Result;
use crate::store::lexical::tokenize;

/// Pulls capability keywords out of a free-text query, typically with a
/// chat model. The keywords replace the query as input to the tags pass.
#[async_trait]
pub trait KeywordExtractor: Send + Sync {
    async fn extract(&self, query: &str) -> Result<Vec<String>>;
}

/// Fixed expansions for abbreviations common in agent descriptions.
const SYNONYMS: &[(&str, &str)] = &[
    ("ai", "artificial intelligence machine learning"),
    ("nlp", "natural language processing text analysis"),
    ("ml", "machine learning artificial intelligence"),
    ("api", "application programming interface service"),
    ("chat", "conversation dialogue chatbot"),
    ("image", "picture photo visual computer vision"),
    ("translate", "translation language conversion"),
    ("summarize", "summary abstract summarization"),
    ("analyze", "analysis analytics examination"),
];

/// Trim and collapse internal whitespace. Returns `None` for blank input.
pub fn normalize_query(query: &str) -> Option<String> {
    let normalized = query.split_whitespace().collect::<Vec<_>>().join(" ");
    if normalized.is_empty() {
        None
    } else {
        Some(normalized)
    }
}

/// Append synonym expansions for every abbreviation that appears as a
/// whole token of `query`. Expansions are appended once each, in table order.
pub fn expand_synonyms(query: &str) -> String {
    let tokens = tokenize(query);
    let mut expanded = query.to_string();
    for (term, expansion) in SYNONYMS {
        if tokens.iter().any(|t| t == term) {
            expanded.push(' ');
            expanded.push_str(expansion);
        }
    }
    expanded
}
