//! Free-text search to `where * contains` predicates.
//!
//! Double-quoted segments are kept whole, everything else is split on
//! whitespace. A leading `!` negates the term.

/// Predicates for a free-text search string, in input order.
pub fn search_predicates(text: &str) -> Vec<String> {
    let mut terms = Vec::new();
    for (i, segment) in text.split('"').enumerate() {
        if i % 2 == 1 {
            terms.push(segment);
        } else {
            terms.extend(segment.split_whitespace());
        }
    }

    terms
        .into_iter()
        .map(str::trim)
        .filter(|term| !term.is_empty())
        .filter_map(|term| {
            let escaped = escape_literal(term);
            match escaped.strip_prefix('!') {
                Some(rest) if rest.trim().is_empty() => None,
                Some(rest) => Some(format!("where * !contains '{}'", rest.trim_start())),
                None => Some(format!("where * contains '{escaped}'")),
            }
        })
        .collect()
}

/// Escape backslashes and single quotes for a single-quoted string literal.
pub fn escape_literal(text: &str) -> String {
    text.replace('\\', "\\\\").replace('\'', "\\'")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_words_split_on_whitespace() {
        assert_eq!(
            search_predicates("  timeout   checkout "),
            vec!["where * contains 'timeout'", "where * contains 'checkout'"]
        );
    }

    #[test]
    fn test_quoted_phrase_kept_whole() {
        assert_eq!(
            search_predicates(r#"foo "bar baz" !qux"#),
            vec![
                "where * contains 'foo'",
                "where * contains 'bar baz'",
                "where * !contains 'qux'",
            ]
        );
    }

    #[test]
    fn test_negated_phrase() {
        assert_eq!(
            search_predicates(r#""!connection reset""#),
            vec!["where * !contains 'connection reset'"]
        );
    }

    #[test]
    fn test_escaping() {
        assert_eq!(
            search_predicates(r"it's C:\temp"),
            vec![r"where * contains 'it\'s'", r"where * contains 'C:\\temp'"]
        );
    }

    #[test]
    fn test_empty_and_bare_bang() {
        assert!(search_predicates("").is_empty());
        assert!(search_predicates(r#"  "" ! "#).is_empty());
    }
}
