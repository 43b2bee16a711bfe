//! Exception breakdown by message text.
//!
//! Messages are grouped after variable parts (GUIDs, URLs, digits) are
//! masked, so the same failure with different ids lands in one row.

use super::{cell_text, Analyzer};
use once_cell::sync::Lazy;
use regex::Regex;
use tq_core::search::escape_literal;
use tq_core::TelemetryTable;
use tq_store::Value;

/// Shortest bracket-free run used as the drill excerpt.
const MIN_EXCERPT_LEN: usize = 10;

static GUID_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}")
        .expect("guid regex")
});
static URL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(^|[ '])(http:|https:)*[/]{1,2}(.*?)([ ]|$|\n)").expect("url regex")
});
static DIGIT_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[0-9]").expect("digit regex"));
static X_RUN_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"X+").expect("x run regex"));
static TAG_PREFIX_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[ ]*\[[A-Z]+\][ ]*").expect("tag prefix regex"));
static BRACKET_RUN_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(^|\])(.*?)($|\[)").expect("bracket run regex"));

/// Mask GUIDs, URLs and digits the way the aggregation does store-side.
pub fn scrub_message(message: &str) -> String {
    let message = GUID_RE.replace_all(message, "[GUID]");
    let message = URL_RE.replace_all(&message, " [URL] ");
    DIGIT_RE.replace_all(&message, "[X]").into_owned()
}

/// Display form of a scrubbed message: digit masks collapsed, one sentence
/// per line, leading `[TAG]` markers stripped, repeated sentences dropped.
pub fn tidy_message(message: &str) -> String {
    let collapsed = message.replace("[X]", "X");
    let collapsed = X_RUN_RE.replace_all(&collapsed, "X");

    let mut sentences: Vec<String> = Vec::new();
    for line in collapsed.split('\n') {
        for sentence in split_sentences(line) {
            let sentence = TAG_PREFIX_RE.replace(sentence, "").trim().to_string();
            if !sentence.is_empty() && !sentences.contains(&sentence) {
                sentences.push(sentence);
            }
        }
    }
    sentences.join("\n").trim().to_string()
}

/// Split after every `. `, keeping the period on the sentence.
fn split_sentences(line: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut rest = line;
    while let Some(at) = rest.find(". ") {
        parts.push(&rest[..=at]);
        rest = &rest[at + 2..];
    }
    parts.push(rest);
    parts
}

/// First run between mask tokens longer than ten characters, otherwise the
/// whole message.
pub fn message_excerpt(message: &str) -> String {
    let message = message.trim();
    BRACKET_RUN_RE
        .captures_iter(message)
        .filter_map(|caps| caps.get(2))
        .find(|run| run.as_str().len() > MIN_EXCERPT_LEN)
        .map(|run| run.as_str().trim().to_string())
        .unwrap_or_else(|| message.to_string())
}

pub struct ExceptionMessageAnalyzer;

impl Analyzer for ExceptionMessageAnalyzer {
    fn name(&self) -> &'static str {
        "ExceptionMessageAnalyzer"
    }

    fn title(&self) -> &'static str {
        "Exception messages"
    }

    fn target_table(&self) -> TelemetryTable {
        TelemetryTable::Exceptions
    }

    fn aggregation(&self) -> &'static str {
        r"| project itemCount, message = strcat(outerMessage, ' \n\n ', customDimensions['AdditionalErrorDetails'], ' \n\n ', customDimensions['additionalDetails'])
          | project itemCount, message = replace(@'[0-9a-fA-F]{8}\-[0-9a-fA-F]{4}\-[0-9a-fA-F]{4}\-[0-9a-fA-F]{4}\-[0-9a-fA-F]{12}', '[GUID]', message)
          | project itemCount, message = replace(@'(^|[ ''])(http:|https:)*[/]{1,2}(.*?)([ ]|$|\n)', ' [URL] ', message)
          | project itemCount, message = replace(@'[0-9]', '[X]', message)
          | where message !contains 'username' or message !contains 'password'
          | summarize sum(itemCount) by message
          | order by sum_itemCount desc
          | take 20"
    }

    fn column_names(&self) -> &'static [&'static str] {
        &["Exception message", "Count"]
    }

    // outerMessage is not a classified column, so the composer drops these.
    fn drill_filters(&self, row: &[Value]) -> (String, String) {
        let excerpt = escape_literal(&message_excerpt(&cell_text(row, 0)));
        (
            format!(
                "where outerMessage contains '{excerpt}' \
                 or customDimensions['AdditionalErrorDetails'] contains '{excerpt}' \
                 or customDimensions['additionalDetails'] contains '{excerpt}'"
            ),
            format!(
                "where outerMessage !contains '{excerpt}' \
                 and customDimensions['AdditionalErrorDetails'] !contains '{excerpt}' \
                 and customDimensions['additionalDetails'] !contains '{excerpt}'"
            ),
        )
    }

    fn post_process(&self, row: &mut Vec<Value>) {
        if let Some(message) = row.get_mut(0) {
            *message = Value::String(tidy_message(&scrub_message(&message.to_string())));
        }
    }
}
