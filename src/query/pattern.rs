//! Wildcard pattern compilation
//!
//! Two flavours share one translator:
//! - metadata wildcards, where `*` matches any run of characters
//! - select `LIKE` patterns, where `%` matches any run and `_` one character
//!
//! Every other character matches itself. Patterns are anchored at both ends.

use super::error::{QueryError, QueryResult};
use regex::{Regex, RegexBuilder};

/// Upper bound on compiled pattern size
const PATTERN_SIZE_LIMIT: usize = 1 << 20;

/// Compile a metadata wildcard (`*` for any run of characters)
pub fn wildcard_regex(pattern: &str) -> QueryResult<Regex> {
    translate(pattern, '*', None)
}

/// Compile a select `LIKE` pattern (`%` any run, `_` any single character)
pub fn like_regex(pattern: &str) -> QueryResult<Regex> {
    translate(pattern, '%', Some('_'))
}

fn translate(pattern: &str, any_run: char, any_one: Option<char>) -> QueryResult<Regex> {
    let mut source = String::with_capacity(pattern.len() + 8);
    source.push_str("^(?s:");
    let mut literal = String::new();

    for c in pattern.chars() {
        if c == any_run || Some(c) == any_one {
            source.push_str(&regex::escape(&literal));
            literal.clear();
            source.push_str(if c == any_run { ".*" } else { "." });
        } else {
            literal.push(c);
        }
    }
    source.push_str(&regex::escape(&literal));
    source.push_str(")$");

    RegexBuilder::new(&source)
        .size_limit(PATTERN_SIZE_LIMIT)
        .build()
        .map_err(|e| QueryError::InvalidPattern {
            pattern: pattern.to_string(),
            reason: e.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wildcard_matches_runs() {
        let re = wildcard_regex("web-*").unwrap();
        assert!(re.is_match("web-"));
        assert!(re.is_match("web-01"));
        assert!(!re.is_match("db-01"));
        assert!(!re.is_match("xweb-01"));
    }

    #[test]
    fn test_wildcard_escapes_regex_syntax() {
        let re = wildcard_regex("a.b(c)*").unwrap();
        assert!(re.is_match("a.b(c)"));
        assert!(re.is_match("a.b(c)zzz"));
        assert!(!re.is_match("axb(c)"));
    }

    #[test]
    fn test_wildcard_spans_newlines() {
        let re = wildcard_regex("first*last").unwrap();
        assert!(re.is_match("first\nmiddle\nlast"));
    }

    #[test]
    fn test_like_single_and_run() {
        let re = like_regex("h_st%").unwrap();
        assert!(re.is_match("host"));
        assert!(re.is_match("hostname"));
        assert!(!re.is_match("hst"));
        assert!(!re.is_match("hoost"));
    }

    #[test]
    fn test_like_keeps_star_literal() {
        let re = like_regex("a*").unwrap();
        assert!(re.is_match("a*"));
        assert!(!re.is_match("abc"));
    }
}
