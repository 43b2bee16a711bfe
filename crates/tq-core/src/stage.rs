//! # Pipeline Stages
//!
//! One pipe-delimited segment of a query, classified once at parse time.
//! Every variant keeps the stage's original (trimmed) text so rendering is
//! byte-for-byte stable. Only the keyword prefix is interpreted.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The stage kinds the rewriter knows about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageKind {
    Source,
    Where,
    Project,
    Summarize,
    Raw,
}

impl StageKind {
    /// Keyword that introduces a stage of this kind, if it has one.
    pub fn keyword(self) -> Option<&'static str> {
        match self {
            Self::Where => Some("where"),
            Self::Project => Some("project"),
            Self::Summarize => Some("summarize"),
            Self::Source | Self::Raw => None,
        }
    }
}

/// A classified pipeline stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "text", rename_all = "snake_case")]
pub enum Stage {
    /// Stage 0: the source table expression.
    Source(String),
    Where(String),
    Project(String),
    Summarize(String),
    /// Any other operator (`order by`, `take`, `distinct`, `extend`, ...).
    Raw(String),
}

impl Stage {
    /// Classify a trimmed stage. The first stage of a query is always the source.
    pub fn classify(text: &str, is_first: bool) -> Self {
        let text = text.trim().to_string();
        if is_first {
            return Self::Source(text);
        }
        if strip_keyword(&text, "where").is_some() {
            Self::Where(text)
        } else if strip_keyword(&text, "project").is_some() {
            Self::Project(text)
        } else if strip_keyword(&text, "summarize").is_some() {
            Self::Summarize(text)
        } else {
            Self::Raw(text)
        }
    }

    /// Build a `where` stage from a predicate. A leading `where` keyword is accepted.
    pub fn filter(predicate: &str) -> Self {
        let predicate = predicate.trim();
        match strip_keyword(predicate, "where") {
            Some(_) => Self::Where(predicate.to_string()),
            None => Self::Where(format!("where {predicate}")),
        }
    }

    pub fn kind(&self) -> StageKind {
        match self {
            Self::Source(_) => StageKind::Source,
            Self::Where(_) => StageKind::Where,
            Self::Project(_) => StageKind::Project,
            Self::Summarize(_) => StageKind::Summarize,
            Self::Raw(_) => StageKind::Raw,
        }
    }

    pub fn text(&self) -> &str {
        match self {
            Self::Source(t) | Self::Where(t) | Self::Project(t) | Self::Summarize(t) | Self::Raw(t) => t,
        }
    }

    /// The predicate of a `where` stage, without its keyword.
    pub fn predicate(&self) -> Option<&str> {
        match self {
            Self::Where(t) => strip_keyword(t, "where"),
            _ => None,
        }
    }

    pub fn is_where(&self) -> bool {
        matches!(self, Self::Where(_))
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.text())
    }
}

/// Case-insensitive `keyword` + whitespace prefix match; returns the trimmed remainder.
pub(crate) fn strip_keyword<'a>(text: &'a str, keyword: &str) -> Option<&'a str> {
    let head = text.get(..keyword.len())?;
    if !head.eq_ignore_ascii_case(keyword) {
        return None;
    }
    let rest = &text[keyword.len()..];
    if rest.starts_with(char::is_whitespace) {
        Some(rest.trim())
    } else {
        None
    }
}
