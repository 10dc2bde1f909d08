//! Rule-based paraphrasing.
//!
//! Deterministic and offline: the question is reduced to its action phrase
//! ("How do I upgrade my plan?" becomes "upgrade my plan"), which is then
//! dropped into fixed templates. Question-word and synonym substitutions on
//! the original wording fill in when the templates run out.

#[cfg(test)]
mod tests;

use async_trait::async_trait;
use itertools::Itertools;
use tracing::{debug, warn};

use super::{VariantProvider, dedup_variants};
use crate::Result;

/// Templates applied to the action phrase, `{}` is replaced by it
const TEMPLATES: &[&str] = &[
    "How do I {}?",
    "Can you tell me how to {}?",
    "I want to {}",
    "Please help me with {}",
    "How can I {}?",
    "I need to {}",
    "Could you explain how to {}?",
    "What's the process to {}?",
    "I'd like to {}",
    "What should I do to {}?",
    "Steps to {}",
    "Tell me how to {}",
];

/// Leading question stems stripped to find the action phrase, longest first
const QUESTION_STEMS: &[&str] = &[
    "could you tell me how to",
    "can you tell me how to",
    "what's the process to",
    "what is the process to",
    "how would i go about",
    "how do i go about",
    "what should i do to",
    "how should i",
    "how would i",
    "how can i",
    "how do i",
    "how do you",
    "how to",
    "can i",
    "i want to",
    "i need to",
    "i'd like to",
    "please help me",
];

const QUESTION_WORD_REPLACEMENTS: &[(&str, &[&str])] = &[
    ("how", &["what", "which"]),
    ("what", &["how", "which"]),
    ("can", &["could", "would", "should"]),
    ("do", &["can", "should"]),
];

const SYNONYMS: &[(&str, &[&str])] = &[
    ("upgrade", &["enhance", "improve", "boost"]),
    ("plan", &["tier", "package", "subscription"]),
    ("change", &["switch", "modify", "update"]),
    ("cancel", &["stop", "end", "terminate"]),
    ("account", &["profile", "settings"]),
    ("billing", &["payment", "charges", "invoice"]),
    ("password", &["passcode", "login"]),
    ("delete", &["remove", "erase"]),
    ("refund", &["reimbursement", "money back"]),
];

#[derive(Debug, Clone, Copy, Default)]
pub struct BuiltinVariantProvider;

impl BuiltinVariantProvider {
    #[inline]
    pub fn new() -> Self {
        Self
    }

    /// All candidate paraphrases in priority order, before deduplication
    #[inline]
    pub fn candidates(question: &str) -> Vec<String> {
        let phrase = action_phrase(question);
        let mut candidates: Vec<String> = if phrase.is_empty() {
            Vec::new()
        } else {
            TEMPLATES
                .iter()
                .map(|template| template.replacen("{}", &phrase, 1))
                .collect()
        };

        let words: Vec<String> = question
            .trim()
            .trim_end_matches(['?', '.', '!'])
            .split_whitespace()
            .map(str::to_lowercase)
            .collect();
        let suffix = if question.trim_end().ends_with('?') {
            "?"
        } else {
            ""
        };

        for table in [QUESTION_WORD_REPLACEMENTS, SYNONYMS] {
            for (index, word) in words.iter().enumerate() {
                let Some((_, replacements)) = table.iter().find(|(w, _)| w == word) else {
                    continue;
                };
                for replacement in *replacements {
                    let sentence = words
                        .iter()
                        .enumerate()
                        .map(|(i, w)| if i == index { *replacement } else { w.as_str() })
                        .join(" ");
                    candidates.push(format!("{}{}", capitalize(&sentence), suffix));
                }
            }
        }

        candidates
    }
}

#[async_trait]
impl VariantProvider for BuiltinVariantProvider {
    fn name(&self) -> &str {
        "builtin"
    }

    async fn generate(&self, question: &str, count: usize) -> Result<Vec<String>> {
        if count == 0 {
            return Ok(Vec::new());
        }

        let variants = dedup_variants(
            &[question.to_string()],
            Self::candidates(question),
            count,
        );

        if variants.len() < count {
            warn!(
                "Generated {} variants instead of requested {} for: {}",
                variants.len(),
                count,
                question
            );
        } else {
            debug!("Generated {} builtin variants", variants.len());
        }

        Ok(variants)
    }
}

/// Lowercased question with terminal punctuation and a leading question
/// stem removed
fn action_phrase(question: &str) -> String {
    let lowered = question
        .trim()
        .trim_end_matches(['?', '.', '!'])
        .split_whitespace()
        .join(" ")
        .to_lowercase();

    QUESTION_STEMS
        .iter()
        .find_map(|stem| {
            lowered
                .strip_prefix(stem)
                .filter(|rest| rest.starts_with(' '))
                .map(|rest| rest.trim().to_string())
        })
        .unwrap_or(lowered)
}

fn capitalize(text: &str) -> String {
    let mut chars = text.chars();
    chars.next().map_or_else(String::new, |first| {
        first.to_uppercase().chain(chars).collect()
    })
}
