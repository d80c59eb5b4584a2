//! Deterministic heuristic spam scoring.
//!
//! Rule weights are kept in hundredths so that sums are exact: three keyword
//! hits score exactly `0.30`, not `0.30000000000000004`.

use regex::Regex;

use crate::error::ConfigError;

const KEYWORD_WEIGHT: u32 = 10;
const PATTERN_WEIGHT: u32 = 15;
const CAPS_WEIGHT: u32 = 20;
const EXCLAMATION_WEIGHT: u32 = 10;
const MAX_SCORE: u32 = 100;

const CAPS_RATIO: f64 = 0.5;
const MAX_EXCLAMATIONS: usize = 2;
const EXPLAIN_KEYWORDS: usize = 3;

/// Pure scorer over subject and bodies. Holds only compiled configuration.
#[derive(Debug, Clone)]
pub struct SpamClassifier {
    keywords: Vec<String>,
    patterns: Vec<Regex>,
}

/// Which rules fired for one message.
#[derive(Debug, Default)]
struct Signals<'a> {
    keywords: Vec<&'a str>,
    patterns: Vec<&'a str>,
    shouting: bool,
    exclamations: bool,
}

impl Signals<'_> {
    fn hundredths(&self) -> u32 {
        let mut total = KEYWORD_WEIGHT * self.keywords.len() as u32
            + PATTERN_WEIGHT * self.patterns.len() as u32;
        if self.shouting {
            total += CAPS_WEIGHT;
        }
        if self.exclamations {
            total += EXCLAMATION_WEIGHT;
        }
        total.min(MAX_SCORE)
    }
}

impl SpamClassifier {
    /// Builds a classifier. Keywords are matched case-insensitively and
    /// counted once each; patterns run against the lowercased content.
    pub fn new<S: AsRef<str>>(keywords: &[S], patterns: &[S]) -> Result<Self, ConfigError> {
        let mut distinct: Vec<String> = Vec::with_capacity(keywords.len());
        for keyword in keywords {
            let keyword = keyword.as_ref().trim().to_lowercase();
            if !keyword.is_empty() && !distinct.contains(&keyword) {
                distinct.push(keyword);
            }
        }

        let patterns = patterns
            .iter()
            .map(|p| {
                Regex::new(p.as_ref()).map_err(|e| ConfigError::InvalidPattern {
                    pattern: p.as_ref().to_string(),
                    reason: e.to_string(),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            keywords: distinct,
            patterns,
        })
    }

    /// Spam score in `[0, 1]`.
    pub fn score(&self, subject: &str, body_text: &str, body_html: &str) -> f64 {
        let content = combined(subject, body_text, body_html);
        f64::from(self.signals(subject, &content).hundredths()) / 100.0
    }

    /// Human-readable list of the rules that fired. Diagnostic only.
    pub fn explain(&self, subject: &str, body_text: &str, body_html: &str) -> Vec<String> {
        let content = combined(subject, body_text, body_html);
        let signals = self.signals(subject, &content);

        let mut reasons = Vec::new();
        if !signals.keywords.is_empty() {
            let shown: Vec<&str> = signals
                .keywords
                .iter()
                .take(EXPLAIN_KEYWORDS)
                .copied()
                .collect();
            let mut line = format!("keywords: {}", shown.join(", "));
            if signals.keywords.len() > EXPLAIN_KEYWORDS {
                line.push_str(&format!(
                    " (+{} more)",
                    signals.keywords.len() - EXPLAIN_KEYWORDS
                ));
            }
            reasons.push(line);
        }
        if let Some(first) = signals.patterns.first() {
            reasons.push(format!("pattern: {}", first));
        }
        if signals.shouting {
            reasons.push("subject is mostly uppercase".to_string());
        }
        if signals.exclamations {
            reasons.push("subject has excessive exclamation marks".to_string());
        }
        reasons
    }

    fn signals<'a>(&'a self, subject: &str, content: &str) -> Signals<'a> {
        Signals {
            keywords: self
                .keywords
                .iter()
                .filter(|k| content.contains(k.as_str()))
                .map(String::as_str)
                .collect(),
            patterns: self
                .patterns
                .iter()
                .filter(|p| p.is_match(content))
                .map(Regex::as_str)
                .collect(),
            shouting: is_shouting(subject),
            exclamations: subject.matches('!').count() > MAX_EXCLAMATIONS,
        }
    }
}

/// `score >= threshold`.
pub fn is_spam(score: f64, threshold: f64) -> bool {
    score >= threshold
}

fn combined(subject: &str, body_text: &str, body_html: &str) -> String {
    let mut content = String::with_capacity(subject.len() + body_text.len() + body_html.len() + 2);
    content.push_str(subject);
    content.push(' ');
    content.push_str(body_text);
    content.push(' ');
    content.push_str(body_html);
    content.to_lowercase()
}

/// Uppercase letters over all letters of the subject. Digits, spaces and
/// punctuation do not count either way.
fn is_shouting(subject: &str) -> bool {
    let (letters, upper) = subject
        .chars()
        .filter(|c| c.is_alphabetic())
        .fold((0usize, 0usize), |(letters, upper), c| {
            (letters + 1, upper + usize::from(c.is_uppercase()))
        });
    letters > 0 && upper as f64 / letters as f64 > CAPS_RATIO
}
