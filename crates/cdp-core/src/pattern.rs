//! Dotted-name pattern language: `*`/`#` wildcards and `and`/`or`/`not`
//! combinators over event names.

use serde::{Deserialize, Serialize};

use crate::error::{CdpError, Result};

/// Recursive pattern variant. The empty string is never a valid string
/// pattern; wildcards must occupy a whole word.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Pattern {
    Literal(String),
    And { and: Vec<Pattern> },
    Or { or: Vec<Pattern> },
    Not { not: Box<Pattern> },
}

const MULTI_WILDCARD: &str = "#";
const SINGLE_WILDCARD: &str = "*";

/// Validates a string pattern's word shape. Composite patterns validate each
/// child recursively.
pub fn validate(pattern: &Pattern) -> Result<()> {
    match pattern {
        Pattern::Literal(s) => validate_string_pattern(s),
        Pattern::And { and } | Pattern::Or { or: and } => {
            for p in and {
                validate(p)?;
            }
            Ok(())
        }
        Pattern::Not { not } => validate(not),
    }
}

fn validate_string_pattern(s: &str) -> Result<()> {
    if s.is_empty() {
        return Err(CdpError::InvalidPattern(
            "pattern must not be the empty string".to_string(),
        ));
    }
    for word in s.split('.') {
        if word.is_empty() {
            return Err(CdpError::InvalidPattern(format!(
                "pattern '{s}' has an empty word"
            )));
        }
        if word == SINGLE_WILDCARD || word == MULTI_WILDCARD {
            continue;
        }
        if !word
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        {
            return Err(CdpError::InvalidPattern(format!(
                "pattern '{s}' has an invalid word '{word}'"
            )));
        }
    }
    Ok(())
}

/// Evaluates `pattern` against a dotted event `name`. Assumes `pattern` has
/// already passed [`validate`].
pub fn matches(name: &str, pattern: &Pattern) -> bool {
    match pattern {
        Pattern::Literal(p) => {
            let name_words: Vec<&str> = name.split('.').collect();
            let pattern_words: Vec<&str> = p.split('.').collect();
            match_words(&name_words, &pattern_words)
        }
        Pattern::And { and } => and.iter().all(|p| matches(name, p)),
        Pattern::Or { or } => or.iter().any(|p| matches(name, p)),
        Pattern::Not { not } => !matches(name, not),
    }
}

/// `#` (multi-word wildcard) branches three ways: it can consume zero words
/// by stepping past itself in the pattern only, consume exactly one word by
/// stepping both, or consume one word by stepping only the source while `#`
/// remains pending for the rest. A greedy match (always consuming words
/// until the end) is incorrect because `#` can also appear mid-pattern.
fn match_words(s_words: &[&str], p_words: &[&str]) -> bool {
    match (s_words.first(), p_words.first()) {
        (None, None) => true,
        (None, Some(&MULTI_WILDCARD)) => match_words(s_words, &p_words[1..]),
        (None, Some(_)) => false,
        (Some(_), None) => false,
        (Some(_), Some(&MULTI_WILDCARD)) => {
            match_words(&s_words[1..], p_words)
                || match_words(&s_words[1..], &p_words[1..])
                || match_words(s_words, &p_words[1..])
        }
        (Some(_), Some(&SINGLE_WILDCARD)) => match_words(&s_words[1..], &p_words[1..]),
        (Some(sw), Some(pw)) => *sw == *pw && match_words(&s_words[1..], &p_words[1..]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lit(s: &str) -> Pattern {
        Pattern::Literal(s.to_string())
    }

    #[test]
    fn literal_pattern_is_equivalent_to_equality() {
        assert!(matches("foo.bar", &lit("foo.bar")));
        assert!(!matches("foo.bar.bars", &lit("foo.bar.baz")));
    }

    #[test]
    fn single_wildcard_matches_exactly_one_word() {
        assert!(matches("foo.bar.baz", &lit("foo.*.baz")));
        assert!(!matches("foo.bar.qux.baz", &lit("foo.*.baz")));
    }

    #[test]
    fn multi_wildcard_matches_zero_or_more_words_anywhere() {
        assert!(matches("foo.bar.baz", &lit("#.baz")));
        assert!(matches("baz", &lit("#.baz")));
        assert!(matches("foo.bar.baz", &lit("foo.#")));
        assert!(matches("foo", &lit("foo.#")));
        assert!(matches("foo.bar.baz", &lit("foo.#.baz")));
        assert!(matches("foo.baz", &lit("foo.#.baz")));
    }

    #[test]
    fn pattern_composition_matches_spec_examples() {
        let not_or = Pattern::Not {
            not: Box::new(Pattern::Or {
                or: vec![lit("foo.bar"), lit("foo.baz")],
            }),
        };
        assert!(matches("foo.bar.baz", &not_or));

        let and = Pattern::And {
            and: vec![lit("#.baz"), lit("foo.#")],
        };
        assert!(matches("foo.bar.baz", &and));

        assert!(!matches("foo.bar.bars", &lit("foo.bar.baz")));
    }

    #[test]
    fn invalid_patterns_are_rejected() {
        assert!(validate(&lit("")).is_err());
        assert!(validate(&lit("foo..bar")).is_err());
        assert!(validate(&lit("foo.ba!r")).is_err());
        assert!(validate(&lit("foo.*.bar")).is_ok());
        assert!(validate(&lit("foo.#")).is_ok());
    }
}
