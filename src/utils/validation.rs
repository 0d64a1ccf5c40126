//! Input validation and shell quoting utilities
//!
//! Values that end up inside remote shell commands (database and table
//! names, file name suffixes, paths) are checked or quoted here.

use once_cell::sync::Lazy;
use regex::Regex;

/// Regex for validating database and table identifiers
static IDENTIFIER_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z0-9_][A-Za-z0-9_$-]*$").unwrap()
});

/// Regex for validating appended file name suffixes
static SUFFIX_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z0-9][A-Za-z0-9_-]*$").unwrap()
});

/// Validate a database or table name
pub fn validate_identifier(name: &str) -> bool {
    !name.is_empty() && name.len() <= 64 && IDENTIFIER_REGEX.is_match(name)
}

/// Validate an appended file name suffix
pub fn validate_file_suffix(suffix: &str) -> bool {
    !suffix.is_empty() && suffix.len() <= 64 && SUFFIX_REGEX.is_match(suffix)
}

/// Quote a value for a POSIX shell using single quotes
pub fn sh_quote(value: &str) -> String {
    if !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '/' | '.' | '_' | '-' | ':' | '='))
    {
        return value.to_string();
    }
    format!("'{}'", value.replace('\'', r"'\''"))
}

/// Split a comma-separated list, trimming entries and dropping empty ones
pub fn split_csv(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}
