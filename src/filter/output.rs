//! Line classification and response segmentation.

use std::borrow::Cow;

use regex::Regex;

use super::{DEFAULT_NOISE_PATTERNS, ESCAPE_PATTERN};
use crate::config::FilterConfig;

/// Error type for filter construction.
#[derive(thiserror::Error, Debug)]
pub enum FilterError {
    #[error("Invalid pattern '{pattern}': {source}")]
    InvalidPattern {
        pattern: String,
        source: regex::Error,
    },
}

fn compile(pattern: &str) -> Result<Regex, FilterError> {
    Regex::new(pattern).map_err(|source| FilterError::InvalidPattern {
        pattern: pattern.to_string(),
        source,
    })
}

/// How a single raw line is treated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineClass {
    Blank,
    Noise,
    Prompt,
    Content(String),
}

/// Result of filtering a sequence of raw lines.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilteredOutput {
    /// Retained lines with escapes removed.
    pub lines: Vec<String>,
    /// The sequence ends with the idle prompt.
    pub ready: bool,
    /// Number of lines dropped as noise.
    pub noise_dropped: usize,
}

/// Stateless classifier for assistant output.
#[derive(Debug, Clone)]
pub struct OutputFilter {
    prompt: Regex,
    noise: Vec<Regex>,
    escapes: Regex,
}

impl OutputFilter {
    /// Build a filter from configuration, with the built-in noise set.
    ///
    /// # Errors
    ///
    /// Returns `FilterError::InvalidPattern` if any configured regex is invalid.
    pub fn new(config: &FilterConfig) -> Result<Self, FilterError> {
        let noise = DEFAULT_NOISE_PATTERNS
            .iter()
            .copied()
            .chain(config.extra_noise.iter().map(String::as_str))
            .map(compile)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            prompt: compile(&config.prompt_pattern)?,
            noise,
            escapes: compile(ESCAPE_PATTERN)?,
        })
    }

    /// Remove terminal escape and control sequences from a line.
    #[must_use]
    pub fn strip_escapes<'a>(&self, line: &'a str) -> Cow<'a, str> {
        if !line.bytes().any(|b| (b < 0x20 && b != b'\t') || b == 0x7f) {
            return Cow::Borrowed(line);
        }
        self.escapes.replace_all(line, "")
    }

    /// Whether the line is the idle prompt marker.
    #[must_use]
    pub fn is_prompt(&self, raw: &str) -> bool {
        self.prompt.is_match(self.strip_escapes(raw).trim())
    }

    #[must_use]
    pub fn classify(&self, raw: &str) -> LineClass {
        let cleaned = self.strip_escapes(raw);
        let trimmed = cleaned.trim();

        if trimmed.is_empty() {
            LineClass::Blank
        } else if self.prompt.is_match(trimmed) {
            LineClass::Prompt
        } else if self.noise.iter().any(|re| re.is_match(trimmed)) {
            LineClass::Noise
        } else {
            LineClass::Content(cleaned.trim_end().to_string())
        }
    }

    /// Filter an ordered sequence of raw lines into a response.
    ///
    /// Readiness is reported only when the last non-blank line is the prompt.
    /// Prompt-like lines followed by more output are kept as content.
    #[must_use]
    pub fn filter<S: AsRef<str>>(&self, raw: &[S]) -> FilteredOutput {
        let classes: Vec<LineClass> = raw.iter().map(|l| self.classify(l.as_ref())).collect();
        let last = classes.iter().rposition(|c| *c != LineClass::Blank);
        let ready = last.is_some_and(|i| classes[i] == LineClass::Prompt);

        let mut out = FilteredOutput {
            ready,
            ..Default::default()
        };

        for (i, (class, line)) in classes.into_iter().zip(raw).enumerate() {
            match class {
                LineClass::Blank => {}
                LineClass::Noise => out.noise_dropped += 1,
                LineClass::Prompt if ready && Some(i) == last => {}
                LineClass::Prompt => out
                    .lines
                    .push(self.strip_escapes(line.as_ref()).trim_end().to_string()),
                LineClass::Content(text) => out.lines.push(text),
            }
        }

        if out.noise_dropped > 0 {
            tracing::trace!(dropped = out.noise_dropped, "Filtered noise lines");
        }

        out
    }
}
