//! String sanitizers applied to book names, rater names, and outgoing text cells.
//!
//! A pipeline is an ordered slice of [`Sanitizer`]s folded left to right. Every
//! sanitizer is total and deterministic, so the same raw value always produces
//! the same normalized key.

use std::{borrow::Cow, fmt, str::FromStr};

use serde::{Deserialize, Serialize};

/// Pipeline used for every lookup key (book and rater names).
pub const NAME_PIPELINE: &[Sanitizer] = &[Sanitizer::Trim, Sanitizer::Lowercase];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Sanitizer {
    /// Strip leading and trailing whitespace.
    Trim,
    /// Lower-case the entire string.
    #[serde(alias = "normalize_case")]
    Lowercase,
}

impl Sanitizer {
    pub fn apply<'a>(&self, input: &'a str) -> Cow<'a, str> {
        match self {
            Sanitizer::Trim => trim(input),
            Sanitizer::Lowercase => lowercase(input),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Sanitizer::Trim => "trim",
            Sanitizer::Lowercase => "lowercase",
        }
    }
}

impl fmt::Display for Sanitizer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Sanitizer {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "trim" => Ok(Sanitizer::Trim),
            "lowercase" | "normalize_case" => Ok(Sanitizer::Lowercase),
            other => Err(format!("Unknown sanitizer '{other}'")),
        }
    }
}

/// Folds `input` through `pipeline` in order.
pub fn apply_pipeline(pipeline: &[Sanitizer], input: &str) -> String {
    pipeline
        .iter()
        .fold(input.to_string(), |value, sanitizer| {
            sanitizer.apply(&value).into_owned()
        })
}

/// Normalizes a book or rater name into its lookup key (trim, then lower-case).
pub fn normalize_name(input: &str) -> String {
    apply_pipeline(NAME_PIPELINE, input)
}

/// Lower-cases, reusing the original string if it has no upper-case characters.
fn lowercase(input: &str) -> Cow<'_, str> {
    if input.chars().all(|ch| !ch.is_uppercase()) {
        Cow::Borrowed(input)
    } else {
        Cow::Owned(input.to_lowercase())
    }
}

fn trim(input: &str) -> Cow<'_, str> {
    Cow::Borrowed(input.trim())
}
