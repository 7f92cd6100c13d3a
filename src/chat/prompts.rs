//! Prompt templates and generation presets for the research assistant.
//!
//! The system prompt is layered: role, citation rules, grounding
//! constraints, output structure, and quality gates. A couple of backends
//! need extra framing (a web-augmented one must be told to stay inside the
//! local library; Gemini answers better with a terse preface), applied as
//! per-provider prefixes.

use crate::llm::provider::{ChatParams, ProviderKind};
use crate::types::Snippet;

/// Base system prompt for every research chat session.
pub const SYSTEM_PROMPT: &str = "\
You are an academic research assistant. Answer questions based on the provided \
documents from the user's reference library and the conversation history.

## Key guidelines

- Synthesize findings from multiple sources into coherent explanations
- Cite sources using the provided citation IDs [1], [2], etc.
- Identify research gaps and contradictions when present
- Answer follow-up questions directly without meta-responses
- Use only the provided context - do not search external sources
- If information is insufficient, state what additional sources would help

## Citation rules

- Add an inline numeric citation `[N]` after every factual claim, where `N` \
matches the citation IDs provided in the context
- Use multiple citations `[1][2]` when several sources support the same point
- When listing full references, format them in Chicago style (notes and \
bibliography) from the available metadata, keyed by the same `[N]` numbers
- If a bibliographic field is missing, omit it rather than guessing

## Grounding constraints

- Use only the information in the provided context and this conversation
- If the context does not contain the information needed, say \"I do not know \
based on the provided sources\" and suggest what kind of work would help
- When wording matters, quote short key phrases with a citation

## Response structure

Use valid Markdown. For standard questions: a 2-3 sentence direct answer with \
at least one citation, then 3-5 bullet points of key evidence (each cited), \
then a short synthesis across sources. When comparing methods or findings \
across papers, use a Markdown table with citations inside the relevant cells.

## Quality constraints

Before finalizing, ensure every factual statement carries a citation, the \
tone is precise and suitable for academic writing, and gaps or contradictions \
in the evidence are explicitly flagged. Avoid speculation.";

/// Prefix keeping a web-augmented backend inside the local library.
const PERPLEXITY_PREFIX: &str = "\
IMPORTANT: You are working with a LOCAL document library, NOT the web.
- Answer ONLY from the provided library documents
- DO NOT search external sources or the web
- NEVER mention web search or external sources in your response
- If information is not in the provided context, say so explicitly

";

/// Prefix nudging Gemini toward direct answers.
const GOOGLE_PREFIX: &str = "Answer based on the provided documents. Be direct and concise.\n\n";

/// System prompt with any provider-specific framing applied.
pub fn system_prompt(provider: Option<ProviderKind>) -> String {
    match provider {
        Some(ProviderKind::Perplexity) => format!("{PERPLEXITY_PREFIX}{SYSTEM_PROMPT}"),
        Some(ProviderKind::Google) => format!("{GOOGLE_PREFIX}{SYSTEM_PROMPT}"),
        _ => SYSTEM_PROMPT.to_string(),
    }
}

/// One evidence block: `[N] title (authors, year, p. page): text`.
fn evidence_block(snippet: &Snippet) -> String {
    let mut attribution = String::new();
    if !snippet.authors.is_empty() {
        attribution.push_str(&snippet.authors);
    }
    if snippet.year >= 0 {
        if !attribution.is_empty() {
            attribution.push_str(", ");
        }
        attribution.push_str(&snippet.year.to_string());
    }
    if let Some(page) = snippet.page {
        if !attribution.is_empty() {
            attribution.push_str(", ");
        }
        attribution.push_str(&format!("p. {page}"));
    }

    if attribution.is_empty() {
        format!("[{}] {}: {}", snippet.citation_id, snippet.title, snippet.snippet)
    } else {
        format!(
            "[{}] {} ({}): {}",
            snippet.citation_id, snippet.title, attribution, snippet.snippet
        )
    }
}

/// First-turn user message: the question plus the retrieved evidence and an
/// instruction block. Follow-up turns never use this; they send the raw
/// question, because the history already carries the evidence.
pub fn first_turn_message(question: &str, snippets: &[Snippet]) -> String {
    if snippets.is_empty() {
        return question.to_string();
    }

    let context = snippets
        .iter()
        .map(evidence_block)
        .collect::<Vec<_>>()
        .join("\n\n");

    format!(
        "{question}\n\n---\n**Evidence from library:**\n\n{context}\n\n---\n\n\
         Answer using the evidence above. Use inline numeric citations `[N]` \
         that match the evidence IDs. If the evidence is insufficient, say so \
         explicitly."
    )
}

/// Single-turn (sessionless) answer prompt with the full instruction block.
pub fn answer_prompt(question: &str, snippets: &[Snippet]) -> String {
    if snippets.is_empty() {
        return no_context_prompt(question);
    }

    let context = snippets
        .iter()
        .map(evidence_block)
        .collect::<Vec<_>>()
        .join("\n\n");

    format!(
        "## Research question\n\n{question}\n\n## Context from library\n\n{context}\n\n---\n\n\
         ## Instructions\n\n\
         Answer the question using **only** the context above. Follow these rules:\n\n\
         1. Add an inline numeric citation `[N]` after every factual claim.\n\
         2. Begin with a 2-3 sentence direct answer.\n\
         3. Provide 3-5 bullet points of key evidence, each with at least one citation.\n\
         4. Synthesize across sources; mention agreements, differences, and limitations.\n\
         5. If the context does not contain enough information, say so instead of speculating.\n\n\
         **Answer:**"
    )
}

/// Prompt used when retrieval found nothing relevant.
pub fn no_context_prompt(question: &str) -> String {
    format!(
        "## Research question\n\n{question}\n\n## Status\n\n\
         No relevant passages were found in the library for this question.\n\n\
         ## Instructions\n\n\
         Respond politely that you cannot find relevant information in the \
         library for this question. Suggest adding relevant papers, rephrasing \
         the question, or checking that PDFs are attached to the items. \
         Maintain a helpful, academic tone and avoid speculation."
    )
}

/// Prompt for generating a 3-8 word session title from the first exchange.
pub fn session_title_prompt(user_question: &str, assistant_response: &str) -> String {
    let question: String = user_question.chars().take(300).collect();
    let response: String = assistant_response.chars().take(300).collect();
    format!(
        "Generate a concise, descriptive title (3-8 words) for this research \
         conversation. Focus on the main topic or research question being explored.\n\n\
         **User Question:** {question}\n\n\
         **Assistant Response:** {response}\n\n\
         Requirements:\n\
         - 3-8 words maximum\n\
         - Capture the core research topic\n\
         - No quotes or punctuation\n\
         - Academic tone\n\n\
         **Title:**"
    )
}

// ============================================================================
// Generation Presets
// ============================================================================

/// Generation presets for the research assistant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenMode {
    /// Balanced, citation-heavy synthesis. The default chat preset.
    Standard,
    /// Exploratory synthesis (literature review, brainstorming).
    Creative,
    /// Precise fact extraction.
    Precise,
    /// Session title generation.
    Title,
}

/// Sampling parameters for a preset.
pub fn preset(mode: GenMode) -> ChatParams {
    match mode {
        GenMode::Standard => ChatParams {
            temperature: 0.35,
            max_tokens: 2000,
            top_p: Some(0.9),
            top_k: Some(50),
            repetition_penalty: Some(1.15),
        },
        GenMode::Creative => ChatParams {
            temperature: 0.45,
            max_tokens: 800,
            top_p: Some(0.92),
            top_k: Some(60),
            repetition_penalty: Some(1.12),
        },
        GenMode::Precise => ChatParams {
            temperature: 0.25,
            max_tokens: 400,
            top_p: Some(0.85),
            top_k: Some(40),
            repetition_penalty: Some(1.18),
        },
        GenMode::Title => ChatParams {
            temperature: 0.7,
            max_tokens: 30,
            top_p: Some(0.9),
            top_k: Some(50),
            repetition_penalty: Some(1.1),
        },
    }
}

// ============================================================================
// Tests
// ============================================================================
