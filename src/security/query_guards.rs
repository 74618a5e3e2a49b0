//! Query Guards
//!
//! Fast read-only gate: a whole-word, case-insensitive keyword blocklist.

use crate::error::{NlqError, Result};
use regex::Regex;

/// Build `\b(?:A|B|...)\b`, case-insensitive; `None` for an empty list
pub(crate) fn keyword_pattern(keywords: &[String]) -> Result<Option<Regex>> {
    let alternatives: Vec<String> = keywords
        .iter()
        .map(|k| k.trim())
        .filter(|k| !k.is_empty())
        .map(regex::escape)
        .collect();
    if alternatives.is_empty() {
        return Ok(None);
    }
    Regex::new(&format!(r"(?i)\b(?:{})\b", alternatives.join("|")))
        .map(Some)
        .map_err(|e| NlqError::Config(format!("Invalid keyword blocklist: {}", e)))
}

pub struct QueryGuards {
    blocked: Option<Regex>,
}

impl QueryGuards {
    pub fn new(blocked_keywords: &[String]) -> Result<Self> {
        Ok(Self {
            blocked: keyword_pattern(blocked_keywords)?,
        })
    }

    /// True when no blocked keyword appears as a whole word
    pub fn is_safe(&self, sql: &str) -> bool {
        self.blocked.as_ref().map_or(true, |re| !re.is_match(sql))
    }

    /// The first blocked keyword found, uppercased
    pub fn blocked_keyword(&self, sql: &str) -> Option<String> {
        self.blocked
            .as_ref()
            .and_then(|re| re.find(sql))
            .map(|m| m.as_str().to_uppercase())
    }
}
