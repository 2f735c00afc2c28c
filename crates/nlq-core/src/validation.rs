//! Natural-language input checks, applied before any external call

use crate::error::ServiceError;
use once_cell::sync::Lazy;
use regex::Regex;

static INJECTION_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r";\s*drop\s+",
        r";\s*truncate\s+",
        r"union\s+select",
        r"exec\s*\(",
        r"execute\s*\(",
    ]
    .iter()
    .filter_map(|p| Regex::new(&format!("(?i){p}")).ok())
    .collect()
});

/// Strip control characters and trim
///
/// Tabs and line breaks become spaces so words stay separated.
#[must_use]
pub fn sanitize_query(raw: &str) -> String {
    raw.chars()
        .filter_map(|c| match c {
            '\t' | '\n' | '\r' => Some(' '),
            c if c.is_control() => None,
            c => Some(c),
        })
        .collect::<String>()
        .trim()
        .to_string()
}

/// Sanitize and validate a query
///
/// # Errors
/// `ServiceError::InvalidInput` when empty, longer than `max_len`
/// characters, or matching an injection pattern.
pub fn validate_query(raw: &str, max_len: usize) -> Result<String, ServiceError> {
    let query = sanitize_query(raw);
    if query.is_empty() {
        return Err(ServiceError::InvalidInput("query cannot be empty".to_string()));
    }
    if query.chars().count() > max_len {
        return Err(ServiceError::InvalidInput(format!(
            "query cannot exceed {max_len} characters"
        )));
    }
    if INJECTION_PATTERNS.iter().any(|re| re.is_match(&query)) {
        return Err(ServiceError::InvalidInput(
            "query contains potentially dangerous patterns".to_string(),
        ));
    }
    Ok(query)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn strips_control_characters() {
        assert_eq!(sanitize_query("  show\u{0}me\nusers\u{7f} "), "showme users");
    }

    #[test]
    fn rejects_empty_and_whitespace() {
        assert!(validate_query("", 10).is_err());
        assert!(validate_query(" \t\n ", 10).is_err());
    }

    #[test]
    fn rejects_oversized() {
        let err = validate_query(&"a".repeat(11), 10).unwrap_err();
        assert_eq!(err.to_string(), "invalid input: query cannot exceed 10 characters");
        assert!(validate_query(&"é".repeat(10), 10).is_ok());
    }

    #[test]
    fn rejects_injection_patterns() {
        for q in [
            "users; DROP TABLE x",
            "a UNION SELECT b",
            "exec (something)",
            "please Execute(now)",
        ] {
            assert!(validate_query(q, 5000).is_err(), "{q}");
        }
        assert!(validate_query("execution time of orders", 5000).is_ok());
    }

    proptest! {
        #[test]
        fn prop_sanitized_has_no_controls(s in "\\PC*|[\\x00-\\x1f]*") {
            let out = sanitize_query(&s);
            prop_assert!(!out.chars().any(char::is_control));
            prop_assert_eq!(out.trim(), out.as_str());
        }
    }
}
