//! Query condensation for multi-turn retrieval.
//!
//! Follow-up questions ("Is there an overlap?", "What about GPT?") retrieve
//! the wrong documents when used verbatim: the pronouns and ellipses only
//! resolve against the conversation. A heuristic gate decides whether a
//! query is such a follow-up; if so, the LM rewrites it into a standalone
//! query using recent history, and retrieval runs on the rewrite. Any
//! failure falls back to the original query.

use std::sync::Arc;

use crate::llm::provider::{ChatParams, ProviderManager};
use crate::types::{Message, MessageRole};

/// Pronouns and determiners whose presence marks an anaphoric follow-up.
const ANAPHORA_WORDS: &[&str] = &[
    "it", "they", "them", "that", "this", "these", "those", "its", "their",
];

/// Formal anaphoric expressions.
const FORMAL_ANAPHORA: &[&str] = &["said", "such", "aforementioned", "the former", "the latter"];

/// Elliptical constructions referring back to earlier turns.
const ELLIPSIS_PHRASES: &[&str] = &[
    "what about",
    "how about",
    "and",
    "also",
    "additionally",
    "the above",
    "the previous",
    "earlier",
    "you mentioned",
    "as mentioned",
    "like you said",
];

/// Comparative cues; combined with a short query they signal a follow-up.
const COMPARISON_PHRASES: &[&str] = &[
    "overlap",
    "relationship",
    "compare",
    "contrast",
    "versus",
    "vs",
    "difference",
    "similar",
    "relate",
    "connection",
    "between",
];

/// Prompt for the condensation call. It asks for extraction rather than new
/// instructions, which keeps acknowledgment-style replies away.
const CONDENSE_PROMPT: &str = "\
You are converting a follow-up question into a standalone question by \
incorporating relevant context from the conversation history.

## Task

Given a conversation history and a follow-up question, rephrase the follow-up \
into a standalone question that:
1. **Replaces pronouns** (it, they, that, these) with specific nouns
2. **Includes implicit context** needed to understand the question
3. **Maintains the original intent** exactly
4. **Is suitable for semantic search** (clear, self-contained)

## Rules

- **Output ONLY the standalone question** - no explanations, no preamble
- **Keep the question format** - if input is a question, output is a question
- **Preserve key terms** from the follow-up exactly
- **Don't add information** not implied by the history
- **Be concise** - only add necessary context

## Examples

**Conversation:**
User: What is multi-task learning in NLP?
Assistant: Multi-task learning (MTL) in NLP is a training paradigm where...

**Follow-up:** Is there an overlap with causal approaches?
**Standalone:** Is there an overlap between multi-task learning in NLP and causal inference approaches?

---

**Conversation:**
User: How does BERT handle contextualized embeddings?
Assistant: BERT generates contextualized embeddings through...

**Follow-up:** What about GPT?
**Standalone:** How does GPT handle contextualized embeddings?

---

Now do the same for the conversation below.";

/// Cap on each history message included in the condensation prompt.
const MAX_MESSAGE_CHARS: usize = 500;
/// Cap on the total history characters in the condensation prompt.
const MAX_HISTORY_CHARS: usize = 1500;

/// Condenses follow-up questions into standalone retrieval queries.
pub struct QueryCondenser {
    provider: Arc<ProviderManager>,
}

impl QueryCondenser {
    /// Condenser using the shared provider handle.
    pub fn new(provider: Arc<ProviderManager>) -> Self {
        Self { provider }
    }

    /// Heuristic gate: does this query need condensation?
    ///
    /// Always false on the first user turn. Otherwise true on anaphora,
    /// elliptical phrases, or comparative cues in a short query.
    pub fn should_condense(query: &str, history: &[Message]) -> bool {
        let user_turns = history
            .iter()
            .filter(|m| m.role == MessageRole::User)
            .count();
        if user_turns == 0 {
            return false;
        }

        let q = query.to_lowercase();
        let words: Vec<String> = q
            .split_whitespace()
            .map(|w| w.trim_matches(|c: char| !c.is_alphanumeric()).to_string())
            .filter(|w| !w.is_empty())
            .collect();

        let has_anaphora = ANAPHORA_WORDS
            .iter()
            .any(|w| words.iter().any(|token| token == w));
        let has_formal_anaphora = FORMAL_ANAPHORA.iter().any(|p| q.contains(p));
        let has_ellipsis = ELLIPSIS_PHRASES.iter().any(|p| {
            if p.contains(' ') {
                q.contains(p)
            } else {
                words.iter().any(|token| token == p)
            }
        });
        let has_comparison = COMPARISON_PHRASES.iter().any(|p| q.contains(p));
        let is_short = words.len() < 8;

        let should = has_anaphora || has_formal_anaphora || has_ellipsis || (has_comparison && is_short);
        if should {
            tracing::debug!(
                anaphora = has_anaphora,
                formal = has_formal_anaphora,
                ellipsis = has_ellipsis,
                comparison = has_comparison,
                short = is_short,
                "query flagged for condensation"
            );
        }
        should
    }

    /// Rewrite a follow-up into a standalone query. Falls back to the
    /// original query on any LM failure or malformed rewrite.
    pub async fn condense(&self, query: &str, history: &[Message]) -> String {
        let history_block = Self::history_block(history);
        if history_block.is_empty() {
            return query.to_string();
        }

        let prompt = format!(
            "{CONDENSE_PROMPT}\n\n## Conversation History\n\n{history_block}\n\n\
             ## Follow-up Question\n\n{query}\n\n## Standalone Question"
        );

        let params = ChatParams {
            temperature: 0.2,
            max_tokens: 150,
            top_p: Some(0.9),
            top_k: Some(40),
            repetition_penalty: Some(1.1),
        };

        match self.provider.chat(&[Message::user(prompt)], &params).await {
            Ok(response) => {
                let standalone = Self::clean_rewrite(&response.content);
                let length = standalone.chars().count();
                if !(5..=300).contains(&length) {
                    tracing::warn!(length, "condensed query malformed; using original");
                    return query.to_string();
                }
                tracing::debug!(original = query, standalone = %standalone, "query condensed");
                standalone
            }
            Err(e) => {
                tracing::warn!(error = %e, "query condensation failed; using original");
                query.to_string()
            }
        }
    }

    /// Last up-to-3 user/assistant turns, each capped, total capped.
    fn history_block(history: &[Message]) -> String {
        let relevant: Vec<&Message> = history
            .iter()
            .filter(|m| m.role != MessageRole::System)
            .collect();
        let tail = &relevant[relevant.len().saturating_sub(6)..];

        let mut lines = Vec::new();
        let mut total = 0usize;
        for message in tail {
            let prefix = match message.role {
                MessageRole::User => "User:",
                _ => "Assistant:",
            };
            let content: String = message.content.chars().take(MAX_MESSAGE_CHARS).collect();
            let line = format!("{prefix} {content}");
            if total + line.len() > MAX_HISTORY_CHARS {
                break;
            }
            total += line.len();
            lines.push(line);
        }
        lines.join("\n")
    }

    fn clean_rewrite(content: &str) -> String {
        let mut cleaned = content.trim().trim_matches(['"', '\'']).trim().to_string();
        const LABEL: &str = "standalone question:";
        if let Some(prefix) = cleaned.get(..LABEL.len()) {
            if prefix.eq_ignore_ascii_case(LABEL) {
                cleaned = cleaned[LABEL.len()..].trim().to_string();
            }
        }
        cleaned
    }
}

// ============================================================================
// Tests
// ============================================================================
