//! LM-based metadata filter extraction.
//!
//! Parses explicitly-stated constraints (author, title, year range, item
//! type, tags, collections) out of a natural-language query into
//! [`FilterArgs`], which feed the same predicate builder as the manual
//! Scope-panel filters. The model is asked for JSON only at temperature 0;
//! the reply is parsed tolerantly (code fences stripped, first `{...}`
//! accepted). Every failure path returns the empty-filter sentinel, never an
//! error.

use std::sync::Arc;

use regex::Regex;
use serde_json::Value;
use std::sync::OnceLock;

use crate::filter::FilterArgs;
use crate::llm::provider::{ChatParams, ProviderManager};
use crate::types::{AppError, Message, Result};

const EXTRACTION_PROMPT: &str = r#"Extract structured metadata filters from this academic library search query.
Return JSON with these fields (use null / empty list when the field is absent):

- year_min   : earliest year as integer (e.g. 2018), or null
- year_max   : latest year as integer (e.g. 2023), or null
- tags       : list of topic/keyword tags EXPLICITLY mentioned (e.g. ["NLP", "deep learning"])
- collections: list of collection names EXPLICITLY mentioned (e.g. ["PhD Research"])
- author     : last name or full name of a specific author EXPLICITLY mentioned, or null
- title      : title fragment of a specific paper/book/thesis EXPLICITLY mentioned, or null
- item_types : list of document types EXPLICITLY mentioned - use only these names:
               "journalArticle", "book", "bookSection", "conferencePaper", "thesis",
               "preprint", "webpage", "report", "presentation", "manuscript"

Rules:
- Only extract what is EXPLICITLY stated. Do not infer topics from the question subject.
  Example: "What does Berlant argue?" -> no tags, no author (just a rhetorical question)
  Example: "Papers by Berlant about optimism" -> author: "Berlant", tags: ["optimism"]
- "thesis", "dissertation", "master's thesis", "PhD thesis" -> item_types: ["thesis"]
- Author names: extract only if the query asks for a specific person's work, not just mentions a name.
- "recent" / "latest" alone is not a year filter.

Query: "{query}"

Return ONLY valid JSON, no explanation:"#;

/// Extracts structured metadata filters from queries via the LM.
pub struct MetadataExtractor {
    provider: Arc<ProviderManager>,
}

impl MetadataExtractor {
    /// Extractor using the shared provider handle.
    pub fn new(provider: Arc<ProviderManager>) -> Self {
        Self { provider }
    }

    /// Extract filters from a query. On any LM or parse failure, returns
    /// the empty-filter sentinel so the caller can proceed unfiltered.
    pub async fn extract(&self, query: &str) -> FilterArgs {
        let prompt = EXTRACTION_PROMPT.replace("{query}", query);
        let params = ChatParams {
            temperature: 0.0,
            max_tokens: 200,
            ..Default::default()
        };

        let response = match self.provider.chat(&[Message::user(prompt)], &params).await {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!(error = %e, "metadata extraction failed; using empty filters");
                return FilterArgs::empty();
            }
        };

        match parse_extraction(&response.content) {
            Ok(filters) => {
                tracing::debug!(?filters, "metadata filters extracted");
                filters
            }
            Err(e) => {
                tracing::warn!(error = %e, "metadata extraction unparseable; using empty filters");
                FilterArgs::empty()
            }
        }
    }
}

/// Parse the model reply tolerantly: a ```json fenced block, or the first
/// `{...}` substring, then a permissive field read.
pub fn parse_extraction(content: &str) -> Result<FilterArgs> {
    static FENCE_RE: OnceLock<Regex> = OnceLock::new();
    let fence = FENCE_RE.get_or_init(|| {
        Regex::new(r"(?s)```json\s*(\{.*?\})\s*```").expect("static regex")
    });

    let json_str = if let Some(captures) = fence.captures(content) {
        captures.get(1).expect("capture group").as_str().to_string()
    } else {
        let start = content.find('{');
        let end = content.rfind('}');
        match (start, end) {
            (Some(start), Some(end)) if end > start => content[start..=end].to_string(),
            _ => {
                return Err(AppError::InvalidInput(
                    "no JSON object in extraction reply".to_string(),
                ))
            }
        }
    };

    let value: Value = serde_json::from_str(&json_str)
        .map_err(|e| AppError::InvalidInput(format!("extraction reply is not JSON: {e}")))?;

    let string_list = |field: &str| -> Vec<String> {
        value[field]
            .as_array()
            .map(|items| {
                items
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    };
    let opt_string = |field: &str| -> Option<String> {
        value[field]
            .as_str()
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    };

    let filters = FilterArgs {
        year_min: value["year_min"].as_i64(),
        year_max: value["year_max"].as_i64(),
        tags: string_list("tags"),
        collections: string_list("collections"),
        author: opt_string("author"),
        title: opt_string("title"),
        item_types: string_list("item_types"),
        has_filters: false,
    };
    Ok(filters.with_flag())
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_plain_json() {
        let filters = parse_extraction(
            r#"{"year_min": 2020, "year_max": null, "tags": ["transformers"],
                "collections": [], "author": null, "title": null, "item_types": []}"#,
        )
        .unwrap();
        assert_eq!(filters.year_min, Some(2020));
        assert_eq!(filters.tags, vec!["transformers"]);
        assert!(filters.has_filters);
    }

    #[test]
    fn test_parse_fenced_json() {
        let reply = "Here are the filters:\n```json\n{\"year_min\": 2018, \"tags\": []}\n```\n";
        let filters = parse_extraction(reply).unwrap();
        assert_eq!(filters.year_min, Some(2018));
    }

    #[test]
    fn test_parse_embedded_object() {
        let reply = "Sure! {\"author\": \"Berlant\", \"tags\": [\"optimism\"]} hope that helps";
        let filters = parse_extraction(reply).unwrap();
        assert_eq!(filters.author.as_deref(), Some("Berlant"));
        assert!(filters.has_filters);
    }

    #[test]
    fn test_parse_empty_fields_yields_no_filters_flag() {
        let filters = parse_extraction(
            r#"{"year_min": null, "year_max": null, "tags": [], "collections": [],
                "author": null, "title": null, "item_types": []}"#,
        )
        .unwrap();
        assert!(!filters.has_filters);
        assert!(filters.is_empty());
    }

    #[test]
    fn test_parse_garbage_is_error() {
        assert!(parse_extraction("no json here at all").is_err());
        assert!(parse_extraction("{ this is not json }").is_err());
    }

    #[test]
    fn test_parse_item_types() {
        let filters =
            parse_extraction(r#"{"item_types": ["thesis"], "tags": []}"#).unwrap();
        assert_eq!(filters.item_types, vec!["thesis"]);
        assert!(filters.has_filters);
    }
}
