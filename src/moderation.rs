//! Static blocked-term check run on every prompt before any work starts

use regex::Regex;
use std::sync::LazyLock;
use tracing::debug;

use crate::config::ModerationConfig;

const DEFAULT_BLOCKED_TERMS: &[&str] = &[
    "nude",
    "naked",
    "nsfw",
    "explicit",
    "pornographic",
    "sexual",
    "xxx",
    "erotic",
    "adult content",
    "lewd",
    "gore",
    "blood",
    "violent",
    "gruesome",
    "mutilated",
    "hate",
    "racist",
    "offensive",
    "discriminatory",
];

static SEPARATORS_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[\s\-_\.]+").unwrap());

/// Lowercase, undo leetspeak, drop separators
pub fn normalize(text: &str) -> String {
    let substituted: String = text
        .to_lowercase()
        .chars()
        .map(|c| match c {
            '0' => 'o',
            '1' => 'i',
            '3' => 'e',
            '4' => 'a',
            '5' => 's',
            '7' => 't',
            '@' => 'a',
            '$' => 's',
            '8' => 'b',
            other => other,
        })
        .collect();
    SEPARATORS_RE.replace_all(&substituted, "").into_owned()
}

/// Keyword classifier over normalized prompts
#[derive(Debug, Clone)]
pub struct ContentFilter {
    blocked: Vec<String>,
}

impl ContentFilter {
    pub fn new(config: &ModerationConfig) -> Self {
        let blocked = DEFAULT_BLOCKED_TERMS
            .iter()
            .copied()
            .chain(config.extra_terms.iter().map(String::as_str))
            .map(normalize)
            .filter(|term| !term.is_empty())
            .collect();
        Self { blocked }
    }

    /// True when the prompt must be rejected
    pub fn is_blocked(&self, prompt: &str) -> bool {
        if prompt.trim().is_empty() {
            return false;
        }
        let normalized = normalize(prompt);
        match self.blocked.iter().find(|term| normalized.contains(term.as_str())) {
            Some(term) => {
                debug!(term = %term, "Prompt matched a blocked term");
                true
            }
            None => false,
        }
    }
}

impl Default for ContentFilter {
    fn default() -> Self {
        Self::new(&ModerationConfig::default())
    }
}
