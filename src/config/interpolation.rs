// Copyright 2026 The Mooring Project
// SPDX-License-Identifier: Apache-2.0

use super::error::ConfigError;

/// Resolves `${VAR_NAME}` references in a string from environment variables.
///
/// `${VAR_NAME:-fallback}` uses `fallback` when the variable is unset.
/// Returns `ConfigError::UndefinedVariable` if a referenced variable is not
/// set and has no fallback.
pub fn resolve_variables(input: &str) -> Result<String, ConfigError> {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && chars.peek() == Some(&'{') {
            chars.next(); // consume '{'
            let mut reference = String::new();
            let mut found_close = false;
            for c in chars.by_ref() {
                if c == '}' {
                    found_close = true;
                    break;
                }
                reference.push(c);
            }
            if !found_close || reference.is_empty() {
                // Malformed interpolation -- treat literally
                result.push('$');
                result.push('{');
                result.push_str(&reference);
                continue;
            }
            let (var_name, fallback) = match reference.split_once(":-") {
                Some((name, fallback)) => (name.to_string(), Some(fallback.to_string())),
                None => (reference, None),
            };
            let value = match (std::env::var(&var_name), fallback) {
                (Ok(value), _) => value,
                (Err(_), Some(fallback)) => fallback,
                (Err(_), None) => {
                    return Err(ConfigError::UndefinedVariable { name: var_name });
                }
            };
            result.push_str(&value);
        } else {
            result.push(ch);
        }
    }

    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_text_is_unchanged() {
        assert_eq!(resolve_variables("http://127.0.0.1:8080").unwrap(), "http://127.0.0.1:8080");
    }

    #[test]
    fn fallback_used_when_variable_unset() {
        std::env::remove_var("MOORING_TEST_UNSET_FALLBACK");
        let out = resolve_variables("${MOORING_TEST_UNSET_FALLBACK:-http://localhost:8080}").unwrap();
        assert_eq!(out, "http://localhost:8080");
    }

    #[test]
    fn malformed_reference_kept_literally() {
        assert_eq!(resolve_variables("${unterminated").unwrap(), "${unterminated");
    }
}
