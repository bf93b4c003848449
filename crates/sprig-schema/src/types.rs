//! Newtype wrappers for environment and branch names.
//!
//! Both serialize/deserialize as plain strings. `EnvName` can only be built
//! through [`EnvName::parse`], so holding one proves the name was validated.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Deref;
use thiserror::Error;

/// Names that identify the primary checkout and can never name an environment.
pub const RESERVED_NAMES: &[&str] = &["main"];

const MIN_NAME_LEN: usize = 3;
const MAX_NAME_LEN: usize = 50;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NameError {
    #[error("invalid environment name '{0}': must be {MIN_NAME_LEN}-{MAX_NAME_LEN} characters")]
    Length(String),
    #[error("invalid environment name '{0}': must start with a lowercase letter")]
    Start(String),
    #[error("invalid environment name '{name}': character '{ch}' not allowed (use a-z, 0-9, -)")]
    Character { name: String, ch: char },
    #[error("invalid environment name '{0}': reserved for the primary checkout")]
    Reserved(String),
}

macro_rules! string_newtype {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Return the inner string as a slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Consume self and return the inner `String`.
            pub fn into_inner(self) -> String {
                self.0
            }
        }

        impl Deref for $name {
            type Target = str;
            fn deref(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl PartialEq<str> for $name {
            fn eq(&self, other: &str) -> bool {
                self.0 == other
            }
        }

        impl PartialEq<&str> for $name {
            fn eq(&self, other: &&str) -> bool {
                self.0 == *other
            }
        }
    };
}

string_newtype!(
    /// Validated environment slug: lowercase, starts with a letter,
    /// `[a-z0-9-]*`, 3 to 50 characters, not reserved.
    EnvName
);

string_newtype!(
    /// A git branch name as it exists (or will exist) in the repository.
    BranchName
);

impl EnvName {
    pub fn parse(name: &str) -> Result<Self, NameError> {
        validate_env_name(name)?;
        Ok(Self(name.to_owned()))
    }

    /// Trailing decimal digits, if the name ends in any.
    pub fn numeric_suffix(&self) -> Option<u64> {
        let digits: String = self
            .0
            .chars()
            .rev()
            .take_while(char::is_ascii_digit)
            .collect::<Vec<_>>()
            .into_iter()
            .rev()
            .collect();
        if digits.is_empty() {
            return None;
        }
        // Anything longer than u64 is reduced to its last 18 digits; only the
        // value mod 100 is ever used.
        let tail = &digits[digits.len().saturating_sub(18)..];
        tail.parse().ok()
    }
}

impl BranchName {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }
}

pub fn validate_env_name(name: &str) -> Result<(), NameError> {
    if RESERVED_NAMES.contains(&name) {
        return Err(NameError::Reserved(name.to_owned()));
    }
    if name.len() < MIN_NAME_LEN || name.len() > MAX_NAME_LEN {
        return Err(NameError::Length(name.to_owned()));
    }
    if !name.starts_with(|c: char| c.is_ascii_lowercase()) {
        return Err(NameError::Start(name.to_owned()));
    }
    if let Some(ch) = name
        .chars()
        .find(|c| !(c.is_ascii_lowercase() || c.is_ascii_digit() || *c == '-'))
    {
        return Err(NameError::Character {
            name: name.to_owned(),
            ch,
        });
    }
    Ok(())
}

/// Lowercase `input` and collapse every run of characters outside
/// `[a-z0-9]` into a single hyphen, trimming hyphens at both ends.
pub fn slugify(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut pending_hyphen = false;
    for c in input.chars().flat_map(char::to_lowercase) {
        if c.is_ascii_lowercase() || c.is_ascii_digit() {
            if pending_hyphen && !out.is_empty() {
                out.push('-');
            }
            pending_hyphen = false;
            out.push(c);
        } else {
            pending_hyphen = true;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_valid_names() {
        let longest = "x".repeat(50);
        for name in ["abc", "my-feature", "fix-bug-86", "a1b2", longest.as_str()] {
            assert!(EnvName::parse(name).is_ok(), "{name} should be valid");
        }
    }

    #[test]
    fn rejects_bad_length() {
        assert!(matches!(validate_env_name("ab"), Err(NameError::Length(_))));
        assert!(matches!(
            validate_env_name(&"a".repeat(51)),
            Err(NameError::Length(_))
        ));
    }

    #[test]
    fn rejects_bad_start_and_characters() {
        assert!(matches!(validate_env_name("1abc"), Err(NameError::Start(_))));
        assert!(matches!(validate_env_name("-abc"), Err(NameError::Start(_))));
        assert!(matches!(
            validate_env_name("abc_def"),
            Err(NameError::Character { ch: '_', .. })
        ));
        assert!(matches!(
            validate_env_name("Abc"),
            Err(NameError::Start(_))
        ));
    }

    #[test]
    fn rejects_reserved_main() {
        assert!(matches!(validate_env_name("main"), Err(NameError::Reserved(_))));
    }

    #[test]
    fn error_messages_name_the_input() {
        let err = validate_env_name("x").unwrap_err().to_string();
        assert!(err.starts_with("invalid environment name 'x'"));
    }

    #[test]
    fn numeric_suffix_extraction() {
        assert_eq!(EnvName::parse("fix-bug-86").unwrap().numeric_suffix(), Some(86));
        assert_eq!(EnvName::parse("release2024").unwrap().numeric_suffix(), Some(2024));
        assert_eq!(EnvName::parse("feature").unwrap().numeric_suffix(), None);
        let long = format!("n-{}", "9".repeat(30));
        assert_eq!(
            EnvName::parse(&long).unwrap().numeric_suffix().map(|n| n % 100),
            Some(99)
        );
    }

    #[test]
    fn slugify_collapses_and_trims() {
        assert_eq!(slugify("  Feature/Login Page!! "), "feature-login-page");
        assert_eq!(slugify("a__b"), "a-b");
        assert_eq!(slugify("---"), "");
    }
}
