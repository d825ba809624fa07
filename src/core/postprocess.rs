//! Response post-processing: sentinel trimming and the empty-output fallback.

use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::str::FromStr;

/// Marker the model tends to append to its answers.
pub const SENTINEL: &str = " Source: assistant";

/// How the sentinel is removed from the end of a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrimMode {
    /// Strips every trailing character that occurs anywhere in the sentinel.
    /// This is what the service has always done; it also eats the tail of
    /// answers such as "... an assistant".
    #[default]
    CharacterSet,
    /// Strips the sentinel only when it is present as a literal suffix.
    ExactSuffix,
}

impl FromStr for TrimMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "characters" | "character_set" => Ok(TrimMode::CharacterSet),
            "suffix" | "exact_suffix" => Ok(TrimMode::ExactSuffix),
            other => Err(format!("unknown trim mode: {other}")),
        }
    }
}

impl Display for TrimMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TrimMode::CharacterSet => write!(f, "characters"),
            TrimMode::ExactSuffix => write!(f, "suffix"),
        }
    }
}

pub fn trim_sentinel(text: &str, mode: TrimMode) -> &str {
    match mode {
        TrimMode::CharacterSet => text.trim_end_matches(|c: char| SENTINEL.contains(c)),
        TrimMode::ExactSuffix => text.strip_suffix(SENTINEL).unwrap_or(text),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Generated(String),
    /// The provider produced no fragments at all; holds the fallback message.
    Empty(String),
}

impl Reply {
    pub fn text(&self) -> &str {
        match self {
            Reply::Generated(text) | Reply::Empty(text) => text,
        }
    }

    pub fn into_text(self) -> String {
        match self {
            Reply::Generated(text) | Reply::Empty(text) => text,
        }
    }
}

pub fn resolve_reply<S: AsRef<str>>(fragments: &[S], mode: TrimMode, fallback: &str) -> Reply {
    if fragments.is_empty() {
        return Reply::Empty(fallback.to_owned());
    }

    let mut joined = String::new();
    for fragment in fragments {
        joined.push_str(fragment.as_ref());
    }
    Reply::Generated(trim_sentinel(&joined, mode).to_owned())
}
