use crate::error::{HarError, Result};
use crate::search::SearchMode;
use memchr::memmem::Finder;
use regex::bytes::{Regex, RegexBuilder};

/// A search pattern compiled once and shared read-only by every worker
#[derive(Debug, Clone)]
pub enum CompiledPattern {
    /// Case-sensitive substring
    Literal(Finder<'static>),
    Regex(Regex),
}

impl CompiledPattern {
    /// Compile `pattern`; a case-insensitive literal becomes an escaped regex
    pub fn compile(pattern: &str, mode: SearchMode, case_insensitive: bool) -> Result<Self> {
        let source = match (mode, case_insensitive) {
            (SearchMode::Literal, false) => {
                return Ok(CompiledPattern::Literal(
                    Finder::new(pattern.as_bytes()).into_owned(),
                ));
            }
            (SearchMode::Literal, true) => regex::escape(pattern),
            (SearchMode::Regex, _) => pattern.to_string(),
        };

        RegexBuilder::new(&source)
            .case_insensitive(case_insensitive)
            .build()
            .map(CompiledPattern::Regex)
            .map_err(|source| HarError::InvalidPattern {
                pattern: pattern.to_string(),
                source,
            })
    }

    pub fn is_match(&self, haystack: &[u8]) -> bool {
        match self {
            CompiledPattern::Literal(finder) => finder.find(haystack).is_some(),
            CompiledPattern::Regex(re) => re.is_match(haystack),
        }
    }

    pub fn is_literal(&self) -> bool {
        matches!(self, CompiledPattern::Literal(_))
    }
}
