//! Response parsing, citation resolution and snippet extraction
//!
//! The model is pinned to three labeled sections; this module splits them
//! back out, resolves mentioned filenames against the real document set
//! (substring first, then token overlap; the model is not trusted to echo
//! exact filenames), and attaches an anchored snippet per citation.

use std::collections::BTreeMap;

use crate::{Explanation, ReusableContent};

const SECTION_KEYWORDS: &[&str] = &[
    "abstract",
    "summary",
    "executive summary",
    "objectives",
    "overview",
    "introduction",
];

#[derive(Debug, Clone, Copy, PartialEq)]
enum Section {
    None,
    Explanation,
    Reusable,
    Steps,
}

/// Parse a model response into a structured explanation, resolving cited
/// documents against `documents`. Empty sections get deterministic
/// fallbacks so the result is always complete.
pub fn parse_explanation(text: &str, documents: &BTreeMap<String, String>) -> Explanation {
    let mut explanation = Explanation {
        raw_explanation: text.to_string(),
        ..Default::default()
    };

    let mut summary_parts: Vec<String> = Vec::new();
    let mut section = Section::None;

    for line in text.lines() {
        let trimmed = line.trim();

        if let Some(rest) = trimmed.strip_prefix("MATCH EXPLANATION:") {
            section = Section::Explanation;
            if !rest.trim().is_empty() {
                summary_parts.push(rest.trim().to_string());
            }
            continue;
        }
        if trimmed.starts_with("REUSABLE CONTENT:") {
            section = Section::Reusable;
            continue;
        }
        if trimmed.starts_with("NEXT STEPS:") {
            section = Section::Steps;
            continue;
        }

        if trimmed.is_empty() {
            continue;
        }

        match section {
            Section::Explanation => summary_parts.push(trimmed.to_string()),
            Section::Reusable => {
                if let Some(item) = trimmed.strip_prefix('-').or_else(|| trimmed.strip_prefix('*'))
                {
                    if let Some((doc_name, relevance)) = item.split_once(':') {
                        let doc_name = doc_name.trim().trim_matches('*');
                        let relevance = relevance.trim();

                        if let Some(resolved) = resolve_document(doc_name, documents) {
                            explanation.reusable_content.push(ReusableContent {
                                content: extract_snippet(&resolved, documents),
                                source: resolved,
                                relevance: relevance.to_string(),
                            });
                        }
                    }
                }
            }
            Section::Steps => {
                let is_step = trimmed.starts_with('-')
                    || trimmed.chars().next().is_some_and(|c| c.is_ascii_digit());
                if is_step {
                    let step = trimmed
                        .trim_start_matches(|c: char| {
                            c.is_ascii_digit() || matches!(c, '.' | '-' | ')' | ' ')
                        })
                        .replace("**", "");
                    if !step.is_empty() {
                        explanation.next_steps.push(step);
                    }
                }
            }
            Section::None => {}
        }
    }

    explanation.summary = summary_parts.join(" ").trim().to_string();
    explanation.alignment_reasons = split_sentences(&explanation.summary);

    apply_fallbacks(&mut explanation, documents);
    explanation
}

fn split_sentences(text: &str) -> Vec<String> {
    text.split(". ")
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            if s.ends_with('.') {
                s.to_string()
            } else {
                format!("{s}.")
            }
        })
        .collect()
}

fn apply_fallbacks(explanation: &mut Explanation, documents: &BTreeMap<String, String>) {
    if explanation.summary.is_empty() {
        explanation.summary = "This opportunity aligns with your research profile.".to_string();
        explanation.alignment_reasons = vec![
            "Your expertise matches the technical requirements.".to_string(),
            "Your research background is relevant to this solicitation.".to_string(),
        ];
    }

    if explanation.next_steps.is_empty() {
        explanation.next_steps = vec![
            "Review the full solicitation at the provided URL".to_string(),
            "Check eligibility requirements".to_string(),
            "Contact the program officer with questions".to_string(),
        ];
    }

    if explanation.reusable_content.is_empty() && !documents.is_empty() {
        for doc_name in documents.keys().take(2) {
            explanation.reusable_content.push(ReusableContent {
                source: doc_name.clone(),
                content: extract_snippet(doc_name, documents),
                relevance: "This document contains relevant research experience and \
                            methodologies that could strengthen your proposal."
                    .to_string(),
            });
        }
    }
}

/// Resolve a mentioned document name against real filenames: substring
/// match in either direction first, then overlap on tokens longer than
/// three characters.
pub fn resolve_document(mentioned: &str, documents: &BTreeMap<String, String>) -> Option<String> {
    let mentioned_lower = mentioned.to_lowercase();

    for doc_name in documents.keys() {
        let doc_lower = doc_name.to_lowercase();
        if doc_lower.contains(&mentioned_lower) || mentioned_lower.contains(&doc_lower) {
            return Some(doc_name.clone());
        }
    }

    let tokens: Vec<&str> = mentioned_lower
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.len() > 3)
        .collect();

    for doc_name in documents.keys() {
        let doc_lower = doc_name.to_lowercase();
        if tokens.iter().any(|t| doc_lower.contains(t)) {
            return Some(doc_name.clone());
        }
    }

    None
}

/// A 200-300 character snippet, preferring the region after a section
/// keyword (abstract, summary, ...) and truncating at a sentence boundary.
pub fn extract_snippet(doc_name: &str, documents: &BTreeMap<String, String>) -> String {
    let Some(content) = documents.get(doc_name) else {
        return format!("Content from {doc_name}");
    };
    if content.trim().is_empty() {
        return format!("Content from {doc_name}");
    }

    let chars: Vec<char> = content.chars().collect();
    let lower: String = content.to_lowercase();
    let lower_chars: Vec<char> = lower.chars().collect();

    for keyword in SECTION_KEYWORDS {
        if let Some(start) = find_chars(&lower_chars, keyword) {
            let end = (start + 300).min(chars.len());
            let mut snippet: String = chars[start..end].iter().collect();

            if snippet.chars().count() > 250 {
                snippet = cut_at_boundary(&snippet, 250, &['.', '!', '?', '\n']);
            }

            return snippet.trim().to_string();
        }
    }

    // No anchor section; fall back to the document prefix
    let end = 250.min(chars.len());
    let mut snippet: String = chars[..end].iter().collect();
    if chars.len() > 250 {
        snippet = cut_at_boundary(&snippet, 200, &['.', '!', '?', '\n', ' ']);
        return format!("{}...", snippet.trim());
    }

    snippet.trim().to_string()
}

/// First char index of `needle` within `haystack`.
fn find_chars(haystack: &[char], needle: &str) -> Option<usize> {
    let needle: Vec<char> = needle.chars().collect();
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    (0..=haystack.len() - needle.len()).find(|&i| haystack[i..i + needle.len()] == needle[..])
}

/// Cut at the first boundary character at or after `from` (char offset).
fn cut_at_boundary(text: &str, from: usize, boundaries: &[char]) -> String {
    let chars: Vec<char> = text.chars().collect();
    for (i, c) in chars.iter().enumerate().skip(from.min(chars.len())) {
        if boundaries.contains(c) {
            return chars[..=i].iter().collect();
        }
    }
    text.to_string()
}
