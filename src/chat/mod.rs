//! Conversational RAG controller.
//!
//! `chat` is the entry point of a turn: load history, condense follow-ups
//! into standalone retrieval queries, resolve filters (explicit item scope,
//! manual Scope-panel filters, LM-extracted filters), retrieve and rerank,
//! assign citations, assemble the provider-facing messages, call the LM,
//! and persist the turn.
//!
//! A session moves `Fresh -> FirstTurn -> FollowUp*`, driven solely by
//! whether it has produced an assistant message. The first turn embeds the
//! retrieved evidence in the user message; follow-up turns send only the
//! raw question, because the history already carries the evidence -
//! re-embedding instructions there provokes acknowledgment-style replies.

pub mod condenser;
pub mod conversation;
pub mod extractor;
pub mod prompts;

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::db::VectorStore;
use crate::filter::{build_predicate, format_filters_for_display, CmpOp, FilterArgs, FilterValue, MetaValue, Predicate};
use crate::llm::provider::ProviderManager;
use crate::llm::validator::validate_chat_response;
use crate::rag::retriever::{HybridRetriever, Passage, RetrievalOptions};
use crate::types::{
    ChatOutcome, ChatRequest, Citation, Message, MessageRole, Result, Snippet,
};
use crate::migrate::MetadataVersionManager;

pub use condenser::QueryCondenser;
pub use conversation::ConversationStore;
pub use extractor::MetadataExtractor;
pub use prompts::{preset, system_prompt, GenMode};

/// Retrieval width for an ordinary chat turn.
const K_STANDARD: usize = 15;
/// Retrieval width when metadata filters focus the search.
const K_FOCUSED: usize = 25;

/// Counts returned by the filter-scope probe.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilterCount {
    /// Distinct parent items matching the filters.
    pub unique_items: usize,
    /// Total chunks matching the filters.
    pub total_chunks: usize,
}

/// The stateful chat engine over one collection.
pub struct ResearchChat {
    store: Arc<dyn VectorStore>,
    retriever: Arc<HybridRetriever>,
    provider: Arc<ProviderManager>,
    conversations: Arc<ConversationStore>,
    condenser: QueryCondenser,
    extractor: MetadataExtractor,
    versions: Arc<MetadataVersionManager>,
}

impl ResearchChat {
    /// Assemble the controller. All consumers share the one provider
    /// manager handle passed here.
    pub fn new(
        store: Arc<dyn VectorStore>,
        retriever: Arc<HybridRetriever>,
        provider: Arc<ProviderManager>,
        conversations: Arc<ConversationStore>,
        versions: Arc<MetadataVersionManager>,
    ) -> Self {
        Self {
            store,
            retriever,
            condenser: QueryCondenser::new(provider.clone()),
            extractor: MetadataExtractor::new(provider.clone()),
            provider,
            conversations,
            versions,
        }
    }

    /// The shared conversation store.
    pub fn conversations(&self) -> &Arc<ConversationStore> {
        &self.conversations
    }

    /// Process one chat turn.
    pub async fn chat(&self, request: &ChatRequest) -> Result<ChatOutcome> {
        let mut warnings = Vec::new();

        // Step 1: session history. A session is "new" until it has a user turn.
        let (history, is_new_session) = match &request.session_id {
            Some(session_id) => {
                let system = prompts::system_prompt(Some(self.provider.active_provider()));
                self.conversations.ensure_session(session_id, Some(&system));
                let history = self.conversations.messages(session_id);
                let user_turns = history
                    .iter()
                    .filter(|m| m.role == MessageRole::User)
                    .count();
                (history, user_turns == 0)
            }
            None => (Vec::new(), true),
        };

        // Step 2: condensation. Follow-ups are rewritten into standalone
        // queries for retrieval; the raw question is what the user said.
        let retrieval_query = if request.session_id.is_some()
            && QueryCondenser::should_condense(&request.query, &history)
        {
            self.condenser.condense(&request.query, &history).await
        } else {
            request.query.clone()
        };

        // Step 3: filter resolution.
        let item_predicate = request
            .filter_item_ids
            .as_ref()
            .filter(|ids| !ids.is_empty())
            .map(|ids| {
                Predicate::cmp(
                    "item_id",
                    CmpOp::In,
                    FilterValue::List(ids.iter().map(|id| MetaValue::Str(id.clone())).collect()),
                )
            });

        let manual_args = request
            .manual_filters
            .as_ref()
            .filter(|args| !args.is_empty());
        let filters_requested = request.use_metadata_filters || manual_args.is_some();
        let metadata_allowed = if filters_requested {
            let allowed = self.versions.filtering_allowed().await?;
            if !allowed {
                warnings.push(
                    "legacy metadata format; run migration - metadata filters were \
                     ignored for this query"
                        .to_string(),
                );
            }
            allowed
        } else {
            true
        };

        let manual_predicate = if metadata_allowed {
            manual_args.and_then(build_predicate)
        } else {
            None
        };
        let auto_predicate = if request.use_metadata_filters && metadata_allowed {
            let args = self.extractor.extract(&retrieval_query).await;
            if args.has_filters {
                tracing::info!(filters = %format_filters_for_display(&args), "auto filters active");
                build_predicate(&args)
            } else {
                None
            }
        } else {
            None
        };

        let metadata_predicate = Predicate::merge(manual_predicate, auto_predicate);
        let focus = metadata_predicate.is_some();
        let predicate = Predicate::merge(item_predicate, metadata_predicate);

        // Step 4: retrieval, reranking, and diversity capping.
        let k = if focus { K_FOCUSED } else { K_STANDARD };
        let options = RetrievalOptions {
            focus,
            context_length: self.provider.context_length(),
            use_rrf: request.use_rrf,
        };
        let passages = self
            .retriever
            .retrieve(&retrieval_query, k, predicate.as_ref(), &options)
            .await?;

        // Step 5: citation assignment, stable within the turn.
        let (citations, snippets) = assign_citations(&passages);

        // Step 6: prompt assembly. First turn embeds evidence; follow-ups
        // send the raw question only.
        let params = prompts::preset(GenMode::Standard);
        let messages = match &request.session_id {
            Some(session_id) => {
                let user_message = if is_new_session {
                    prompts::first_turn_message(&request.query, &snippets)
                } else {
                    request.query.clone()
                };
                self.conversations
                    .append(session_id, MessageRole::User, user_message);
                let full = self.conversations.messages(session_id);
                ConversationStore::trim_messages(
                    &full,
                    conversation::MAX_MESSAGES,
                    conversation::MAX_CHARS,
                )
            }
            None => vec![Message::user(prompts::answer_prompt(
                &request.query,
                &snippets,
            ))],
        };

        // Step 7: call the LM; fall back to the first snippet on failure.
        let summary = match self.provider.chat(&messages, &params).await {
            Ok(response) => {
                let (valid, issues) =
                    validate_chat_response(&response, self.provider.active_provider());
                if !valid {
                    for issue in &issues {
                        tracing::warn!(
                            provider = %self.provider.active_provider(),
                            issue = %issue,
                            "response validation issue"
                        );
                    }
                    warnings.extend(issues);
                }
                if let Some(session_id) = &request.session_id {
                    self.conversations
                        .append(session_id, MessageRole::Assistant, &response.content);
                }
                response.content
            }
            Err(e) => {
                tracing::error!(error = %e, "language model call failed; falling back");
                warnings.push(format!("language model call failed: {e}"));
                match snippets.first() {
                    Some(snippet) => snippet.snippet.clone(),
                    None => format!("Failed to generate a response: {e}"),
                }
            }
        };

        // Step 8: one extra call for a session title on the first turn.
        let generated_title = if request.session_id.is_some() && is_new_session {
            Some(self.generate_session_title(&request.query, &summary).await)
        } else {
            None
        };

        Ok(ChatOutcome {
            summary,
            citations,
            snippets,
            generated_title,
            warnings,
        })
    }

    /// Generate a 3-8 word session title from the first exchange. Any
    /// failure falls back to a prefix of the question.
    async fn generate_session_title(&self, question: &str, answer: &str) -> String {
        let fallback = || question.chars().take(50).collect::<String>();
        let prompt = prompts::session_title_prompt(question, answer);
        match self
            .provider
            .chat(&[Message::user(prompt)], &prompts::preset(GenMode::Title))
            .await
        {
            Ok(response) => {
                let mut title = response
                    .content
                    .trim()
                    .trim_matches(['"', '\''])
                    .trim()
                    .to_string();
                if title.chars().count() > 80 {
                    title = format!("{}...", title.chars().take(77).collect::<String>());
                }
                if title.is_empty() {
                    fallback()
                } else {
                    title
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "title generation failed");
                fallback()
            }
        }
    }

    /// Count the items and chunks matching a set of filters. Backs the
    /// Scope panel's estimate.
    pub async fn count_filtered(&self, args: &FilterArgs) -> Result<FilterCount> {
        let predicate = build_predicate(args);

        let (store_pred, client_pred) = Predicate::split(predicate.as_ref());
        let records = self.store.get(None, store_pred.as_ref(), None).await?;

        let matching = records
            .metadatas
            .iter()
            .filter(|meta| client_pred.as_ref().map(|p| p.matches(meta)).unwrap_or(true));

        let mut unique_items = std::collections::HashSet::new();
        let mut total_chunks = 0usize;
        for meta in matching {
            total_chunks += 1;
            if let Some(item_id) = meta.get("item_id") {
                unique_items.insert(item_id.to_display_string());
            }
        }

        Ok(FilterCount {
            unique_items: unique_items.len(),
            total_chunks,
        })
    }
}

/// Map capped passages to snippets and a citation list. Citation ids are
/// contiguous `1..N` in first-occurrence order, keyed by
/// `(title, year, pdf_path)`.
fn assign_citations(passages: &[Passage]) -> (Vec<Citation>, Vec<Snippet>) {
    let mut citation_ids: std::collections::HashMap<(String, i64, String), usize> =
        std::collections::HashMap::new();
    let mut citations = Vec::new();
    let mut snippets = Vec::new();

    for passage in passages {
        let meta = &passage.metadata;
        let title = meta
            .get("title")
            .map(|v| v.to_display_string())
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| "Untitled".to_string());
        let year = meta.get("year").and_then(|v| v.as_i64()).unwrap_or(-1);
        let authors = meta
            .get("authors")
            .map(|v| v.to_display_string())
            .unwrap_or_default();
        let pdf_path = meta
            .get("pdf_path")
            .map(|v| v.to_display_string())
            .unwrap_or_default();
        let page = meta.get("page").and_then(|v| v.as_i64());

        let key = (title.clone(), year, pdf_path.clone());
        let citation_id = *citation_ids.entry(key).or_insert_with(|| {
            citations.push(Citation {
                id: citations.len() + 1,
                title: title.clone(),
                year,
                authors: authors.clone(),
                pdf_path: pdf_path.clone(),
            });
            citations.len()
        });

        let snippet_text: String = passage.text.chars().take(800).collect();
        snippets.push(Snippet {
            citation_id,
            snippet: snippet_text,
            title,
            year,
            authors,
            pdf_path,
            page,
        });
    }

    (citations, snippets)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::Metadata;

    fn passage(id: &str, title: &str, year: i64, page: i64) -> Passage {
        let mut meta = Metadata::new();
        meta.insert("title".into(), MetaValue::Str(title.to_string()));
        meta.insert("year".into(), MetaValue::Int(year));
        meta.insert("authors".into(), MetaValue::Str("Doe".into()));
        meta.insert("pdf_path".into(), MetaValue::Str(format!("/{title}.pdf")));
        meta.insert("page".into(), MetaValue::Int(page));
        Passage {
            id: id.to_string(),
            text: format!("text of {id}"),
            metadata: meta,
        }
    }

    #[test]
    fn test_citation_ids_contiguous_and_stable() {
        let passages = vec![
            passage("1:0", "Paper A", 2020, 1),
            passage("1:1", "Paper A", 2020, 2),
            passage("2:0", "Paper B", 2021, 5),
            passage("1:2", "Paper A", 2020, 3),
        ];
        let (citations, snippets) = assign_citations(&passages);

        assert_eq!(citations.len(), 2);
        assert_eq!(citations[0].id, 1);
        assert_eq!(citations[0].title, "Paper A");
        assert_eq!(citations[1].id, 2);

        assert_eq!(snippets[0].citation_id, 1);
        assert_eq!(snippets[2].citation_id, 2);
        assert_eq!(snippets[3].citation_id, 1);
        assert_eq!(snippets[0].page, Some(1));
    }

    #[test]
    fn test_citation_untitled_fallback() {
        let mut meta = Metadata::new();
        meta.insert("year".into(), MetaValue::Int(-1));
        let passages = vec![Passage {
            id: "9:0".into(),
            text: "orphan text".into(),
            metadata: meta,
        }];
        let (citations, snippets) = assign_citations(&passages);
        assert_eq!(citations[0].title, "Untitled");
        assert_eq!(snippets[0].year, -1);
    }
}
