//! Environment variable expansion for config files.
//!
//! Store credentials normally arrive through the environment rather than the
//! YAML file itself. Supported forms:
//!
//! - `$VAR` or `${VAR}`: substitute, error if unset
//! - `${VAR:-default}`: default when unset or empty
//! - `${VAR-default}`: default only when unset
//! - `$$`: a literal `$`

use regex::{Captures, Regex};
use std::env;
use std::sync::LazyLock;

static VAR_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?x)
        \$\$
        |
        \$\{
            ([A-Za-z_][A-Za-z0-9_]*)
            (?:
                (:?-)
                ([^}]*)
            )?
        \}
        |
        \$([A-Za-z_][A-Za-z0-9_]*)
        ",
    )
    .expect("variable pattern is valid")
});

/// Expanded text plus every problem found along the way.
#[derive(Debug)]
pub struct Interpolated {
    pub text: String,
    pub errors: Vec<String>,
}

impl Interpolated {
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Expand environment references in `input`.
///
/// All missing variables are collected so one run reports them together.
pub fn interpolate(input: &str) -> Interpolated {
    let mut errors = Vec::new();

    let text = VAR_PATTERN
        .replace_all(input, |caps: &Captures| {
            let whole = &caps[0];
            if whole == "$$" {
                return "$".to_string();
            }

            let name = caps
                .get(1)
                .or_else(|| caps.get(4))
                .map(|m| m.as_str())
                .unwrap_or_default();
            let operator = caps.get(2).map(|m| m.as_str());
            let fallback = caps.get(3).map(|m| m.as_str());

            match env::var(name) {
                Ok(value) if value.contains('\n') || value.contains('\r') => {
                    errors.push(format!("environment variable '{}' contains a newline", name));
                    whole.to_string()
                }
                Ok(value) if value.is_empty() && operator == Some(":-") => {
                    fallback.unwrap_or_default().to_string()
                }
                Ok(value) => value,
                Err(_) => match fallback {
                    Some(default) => default.to_string(),
                    None => {
                        errors.push(format!("environment variable '{}' is not set", name));
                        whole.to_string()
                    }
                },
            }
        })
        .into_owned();

    Interpolated { text, errors }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_braced_and_bare_forms() {
        env::set_var("TC_VARS_USER", "migrator");
        let out = interpolate("user: ${TC_VARS_USER} / $TC_VARS_USER");
        assert!(out.is_ok());
        assert_eq!(out.text, "user: migrator / migrator");
        env::remove_var("TC_VARS_USER");
    }

    #[test]
    fn test_missing_variables_are_all_reported() {
        env::remove_var("TC_VARS_MISSING_A");
        env::remove_var("TC_VARS_MISSING_B");
        let out = interpolate("a: $TC_VARS_MISSING_A b: ${TC_VARS_MISSING_B}");
        assert_eq!(out.errors.len(), 2);
        assert!(out.errors[0].contains("TC_VARS_MISSING_A"));
    }

    #[test]
    fn test_defaults() {
        env::remove_var("TC_VARS_UNSET");
        env::set_var("TC_VARS_EMPTY", "");

        assert_eq!(interpolate("${TC_VARS_UNSET:-5432}").text, "5432");
        assert_eq!(interpolate("${TC_VARS_UNSET-5432}").text, "5432");
        assert_eq!(interpolate("${TC_VARS_EMPTY:-fallback}").text, "fallback");
        assert_eq!(interpolate("[${TC_VARS_EMPTY-fallback}]").text, "[]");

        env::remove_var("TC_VARS_EMPTY");
    }

    #[test]
    fn test_escaped_dollar() {
        let out = interpolate("password: pa$$word");
        assert!(out.is_ok());
        assert_eq!(out.text, "password: pa$word");
    }

    #[test]
    fn test_newline_values_rejected() {
        env::set_var("TC_VARS_NEWLINE", "a\nb");
        let out = interpolate("$TC_VARS_NEWLINE");
        assert!(!out.is_ok());
        env::remove_var("TC_VARS_NEWLINE");
    }
}
