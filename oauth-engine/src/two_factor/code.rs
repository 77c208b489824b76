//! Verification code extraction from mailbox messages

use crate::error::{FlowEngineError, FlowResult};
use regex::Regex;

lazy_static::lazy_static! {
    // Priority order: labelled codes first, then bare numeric, then bare alphanumeric.
    static ref DEFAULT_PATTERNS: Vec<CodePattern> = vec![
        CodePattern::new(Regex::new(r"(?i)verification code:?\s*([A-Z0-9]{6})\b").unwrap(), false),
        CodePattern::new(Regex::new(r"(?i)following code:?\s*([A-Z0-9]{6})\b").unwrap(), false),
        CodePattern::new(Regex::new(r"(?i)\bcode:\s*([A-Z0-9]{6})\b").unwrap(), false),
        CodePattern::new(Regex::new(r"\b(\d{6})\b").unwrap(), false),
        CodePattern::new(Regex::new(r"\b([A-Z0-9]{6})\b").unwrap(), true),
        CodePattern::new(Regex::new(r"\b([A-Z0-9]{4}-[A-Z0-9]{2})\b").unwrap(), false),
    ];

    static ref NUMERIC_PATTERNS: Vec<CodePattern> = vec![
        CodePattern::new(Regex::new(r"(?i)code:?\s*(\d{6})\b").unwrap(), false),
        CodePattern::new(Regex::new(r"\b(\d{6})\b").unwrap(), false),
    ];
}

/// One extraction pattern. The first capture group is the code.
#[derive(Debug, Clone)]
pub struct CodePattern {
    regex: Regex,
    /// Skip matches without a digit, so plain upper-case words are not taken for codes
    require_digit: bool,
}

impl CodePattern {
    pub fn new(regex: Regex, require_digit: bool) -> Self {
        Self {
            regex,
            require_digit,
        }
    }

    fn find(&self, body: &str) -> Option<String> {
        self.regex
            .captures_iter(body)
            .filter_map(|captures| captures.get(1).map(|m| m.as_str().to_string()))
            .find(|code| !self.require_digit || code.chars().any(|c| c.is_ascii_digit()))
    }
}

/// Ordered list of patterns; the first pattern that matches wins
#[derive(Debug, Clone)]
pub struct CodeExtractor {
    patterns: Vec<CodePattern>,
}

impl Default for CodeExtractor {
    fn default() -> Self {
        Self {
            patterns: DEFAULT_PATTERNS.clone(),
        }
    }
}

impl CodeExtractor {
    /// Six-digit numeric codes only
    pub fn numeric() -> Self {
        Self {
            patterns: NUMERIC_PATTERNS.clone(),
        }
    }

    /// Compile caller-supplied patterns, each with one capture group
    pub fn from_patterns<S: AsRef<str>>(patterns: &[S]) -> FlowResult<Self> {
        let patterns = patterns
            .iter()
            .map(|pattern| {
                let regex = Regex::new(pattern.as_ref()).map_err(|e| {
                    FlowEngineError::Configuration(format!(
                        "Invalid code pattern '{}': {}",
                        pattern.as_ref(),
                        e
                    ))
                })?;
                if regex.captures_len() < 2 {
                    return Err(FlowEngineError::Configuration(format!(
                        "Code pattern '{}' needs a capture group",
                        pattern.as_ref()
                    )));
                }
                Ok(CodePattern::new(regex, false))
            })
            .collect::<FlowResult<Vec<_>>>()?;

        if patterns.is_empty() {
            return Err(FlowEngineError::Configuration(
                "At least one code pattern is required".to_string(),
            ));
        }
        Ok(Self { patterns })
    }

    pub fn extract(&self, body: &str) -> Option<String> {
        self.patterns.iter().find_map(|pattern| pattern.find(body))
    }
}
