//! fundmatch-rag - Grounded match explanations
//!
//! For a chosen (profile, opportunity) pair, builds a prompt that enumerates
//! the user's own documents, asks the model for a fixed three-section
//! response, and parses it back into a structured explanation. Cited
//! filenames are resolved against the actual document set with a fuzzy
//! lookup, and each resolved citation carries a snippet from the document.
//!
//! The explainer never raises: model failures and unparsable responses
//! resolve to deterministic fallbacks so callers always receive a complete
//! structured result.

pub mod parse;
pub mod prompt;

pub use parse::{extract_snippet, parse_explanation, resolve_document};
pub use prompt::build_prompt;

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, warn};

use fundmatch_common::{Opportunity, ResearcherProfile};
use fundmatch_llm::{GenerateOptions, TextGenerator};

/// One reusable-content citation, resolved to a real document.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ReusableContent {
    pub source: String,
    pub content: String,
    pub relevance: String,
}

/// Structured explanation for one match.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Explanation {
    pub summary: String,
    pub alignment_reasons: Vec<String>,
    pub reusable_content: Vec<ReusableContent>,
    pub next_steps: Vec<String>,
    pub raw_explanation: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Generates grounded explanations for matches.
pub struct MatchExplainer {
    generator: Arc<dyn TextGenerator>,
}

impl MatchExplainer {
    pub fn new(generator: Arc<dyn TextGenerator>) -> Self {
        Self { generator }
    }

    /// Explain why `opportunity` fits `profile`. Never fails; a model error
    /// yields a minimal fallback with `error` set.
    pub async fn explain(
        &self,
        profile: &ResearcherProfile,
        opportunity: &Opportunity,
    ) -> Explanation {
        let prompt = build_prompt(profile, opportunity);
        let opts = GenerateOptions {
            temperature: 0.7,
            max_tokens: 1000,
        };

        match self.generator.generate(&prompt, &opts).await {
            Ok(text) => {
                debug!(chars = text.len(), "parsing explanation response");
                parse_explanation(&text, &profile.extracted_pdfs)
            }
            Err(e) => {
                warn!(error = %e, "explanation generation failed");
                fallback_explanation(&e.to_string())
            }
        }
    }

    /// Explain the top-`n` opportunities in order.
    pub async fn explain_top(
        &self,
        profile: &ResearcherProfile,
        opportunities: &[Opportunity],
        top_n: usize,
    ) -> Vec<(Opportunity, Explanation)> {
        let mut explained = Vec::new();
        for opportunity in opportunities.iter().take(top_n) {
            let explanation = self.explain(profile, opportunity).await;
            explained.push((opportunity.clone(), explanation));
        }
        explained
    }
}

pub(crate) fn fallback_explanation(error: &str) -> Explanation {
    Explanation {
        summary: "Unable to generate detailed explanation".to_string(),
        alignment_reasons: vec!["This opportunity matches your research area".to_string()],
        reusable_content: Vec::new(),
        next_steps: vec![
            "Review the opportunity details".to_string(),
            "Check eligibility requirements".to_string(),
        ],
        raw_explanation: String::new(),
        error: Some(error.to_string()),
    }
}
