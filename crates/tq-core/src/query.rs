//! # Pipeline Query and Rewriter
//!
//! [`PipelineQuery`] is an ordered list of [`Stage`]s. All rewriting
//! operations take `&self` and return a new query; a stage is never edited
//! in place.
//!
//! Text that starts with a pipe (`| summarize ... | take 20`) parses as a
//! *fragment*: a continuation without a source stage, used for templates
//! that get appended to another query.

use crate::error::QueryError;
use crate::stage::{Stage, StageKind};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;

static DURATION_TOKEN_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"ago\(\s*([0-9]+[mhd])\s*\)").expect("duration token regex"));

/// Delimiter used when rendering stages back to text.
const STAGE_SEPARATOR: &str = " | ";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineQuery {
    stages: Vec<Stage>,
}

impl PipelineQuery {
    /// Split `text` on the pipe delimiter (pipes inside quoted literals are
    /// kept), trim each stage and drop empty ones.
    pub fn parse(text: &str) -> Self {
        let is_fragment = text.trim_start().starts_with('|');
        let stages = split_stages(text)
            .into_iter()
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .enumerate()
            .map(|(i, part)| Stage::classify(part, i == 0 && !is_fragment))
            .collect();
        Self { stages }
    }

    pub fn from_stages(stages: Vec<Stage>) -> Self {
        Self { stages }
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// First word of the source stage.
    pub fn source_table(&self) -> Option<&str> {
        match self.stages.first()? {
            Stage::Source(text) => text.split_whitespace().next(),
            _ => None,
        }
    }

    /// Case-insensitive comparison of the source table name.
    pub fn is_source(&self, table: &str) -> bool {
        self.source_table()
            .is_some_and(|source| source.eq_ignore_ascii_case(table))
    }

    /// Predicates of all `where` stages, in order.
    pub fn where_predicates(&self) -> impl Iterator<Item = &str> {
        self.stages.iter().filter_map(Stage::predicate)
    }

    /// Copy without stages of `kind`.
    pub fn remove_stages_of_kind(&self, kind: StageKind) -> Self {
        Self {
            stages: self
                .stages
                .iter()
                .filter(|stage| stage.kind() != kind)
                .cloned()
                .collect(),
        }
    }

    /// Copy without display-oriented stages.
    pub fn without_project_and_summarize(&self) -> Self {
        self.remove_stages_of_kind(StageKind::Project)
            .remove_stages_of_kind(StageKind::Summarize)
    }

    /// Insert a `where` stage right after the last existing one. Without any
    /// `where` stage the filter goes directly after the source.
    pub fn insert_filter(&self, predicate: &str) -> Self {
        let position = match self.stages.iter().rposition(Stage::is_where) {
            Some(last_where) => last_where + 1,
            None => match self.stages.first() {
                Some(Stage::Source(_)) => 1,
                _ => 0,
            },
        };

        let mut stages = self.stages.clone();
        stages.insert(position, Stage::filter(predicate));
        Self { stages }
    }

    /// The first `ago(<n><m|h|d>)` token, e.g. `"1h"`.
    pub fn extract_duration_token(&self) -> Result<String, QueryError> {
        self.stages
            .iter()
            .find_map(|stage| {
                DURATION_TOKEN_RE
                    .captures(stage.text())
                    .map(|caps| caps[1].to_string())
            })
            .ok_or_else(|| QueryError::MissingDurationToken(self.to_query_string()))
    }

    /// Concatenation, no dedup. A source stage of `other` becomes a plain
    /// stage when it lands after existing stages.
    pub fn append(&self, other: &PipelineQuery) -> Self {
        let mut stages = self.stages.clone();
        let demote = !stages.is_empty();
        stages.extend(other.stages.iter().map(|stage| match stage {
            Stage::Source(text) if demote => Stage::classify(text, false),
            other => other.clone(),
        }));
        Self { stages }
    }

    pub fn to_query_string(&self) -> String {
        let body = self
            .stages
            .iter()
            .map(Stage::text)
            .collect::<Vec<_>>()
            .join(STAGE_SEPARATOR);

        match self.stages.first() {
            Some(Stage::Source(_)) | None => body,
            Some(_) => format!("| {body}"),
        }
    }
}

impl fmt::Display for PipelineQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_query_string())
    }
}

impl From<&str> for PipelineQuery {
    fn from(text: &str) -> Self {
        Self::parse(text)
    }
}

/// Split on `|` outside of string literals. Handles `'...'`, `"..."`,
/// backslash escapes, and `@'...'` verbatim literals (no escapes).
fn split_stages(text: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut start = 0;
    let mut quote: Option<char> = None;
    let mut verbatim = false;
    let mut escaped = false;
    let mut prev: Option<char> = None;

    for (i, c) in text.char_indices() {
        match quote {
            Some(q) => {
                if escaped {
                    escaped = false;
                } else if c == '\\' && !verbatim {
                    escaped = true;
                } else if c == q {
                    quote = None;
                }
            }
            None => match c {
                '\'' | '"' => {
                    quote = Some(c);
                    verbatim = prev == Some('@');
                }
                '|' => {
                    parts.push(&text[start..i]);
                    start = i + c.len_utf8();
                }
                _ => {}
            },
        }
        prev = Some(c);
    }
    parts.push(&text[start..]);
    parts
}
