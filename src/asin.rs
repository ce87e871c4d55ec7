//! Amazon Standard Identification Number.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Number of characters in an ASIN.
pub const ASIN_LEN: usize = 10;

/// A validated 10 character ASIN.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Asin(String);

impl Asin {
    /// Returns `Some` if `value` is exactly 10 ASCII alphanumeric characters.
    pub fn parse(value: &str) -> Option<Self> {
        let value = value.trim();
        (value.len() == ASIN_LEN && value.chars().all(|c| c.is_ascii_alphanumeric()))
            .then(|| Self(value.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Asin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for Asin {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Asin::parse(&value).ok_or_else(|| format!("invalid ASIN: {:?}", value))
    }
}

impl From<Asin> for String {
    fn from(asin: Asin) -> Self {
        asin.0
    }
}
