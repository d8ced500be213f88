//! MAC address normalization and vendor lookup.

pub mod vendor;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use thiserror::Error;

const MAC_HEX_LEN: usize = 12;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MacError {
    #[error("invalid MAC address: {0}")]
    Invalid(String),
}

/// A MAC address stored as 12 uppercase hex digits.
///
/// Accepts the usual separators on input (`:`, `-`, `.`, spaces) and renders
/// the canonical colon-separated form on output.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MacAddress(String);

impl MacAddress {
    /// Normalize user input into the canonical 12-digit form.
    ///
    /// # Errors
    /// Returns `MacError::Invalid` unless exactly 12 hex digits remain after
    /// stripping separators.
    pub fn parse(input: &str) -> Result<Self, MacError> {
        let digits: String = input
            .chars()
            .filter(|&c| !matches!(c, ':' | '-' | '.') && !c.is_whitespace())
            .collect();

        if digits.len() != MAC_HEX_LEN || !digits.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(MacError::Invalid(input.trim().to_string()));
        }

        Ok(Self(digits.to_ascii_uppercase()))
    }

    /// The normalized 12-digit form, e.g. `001422012345`.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Organizationally unique identifier: the first three octets.
    #[must_use]
    pub fn oui(&self) -> &str {
        &self.0[..6]
    }

    /// Colon-separated form, e.g. `00:14:22:01:23:45`.
    #[must_use]
    pub fn formatted(&self) -> String {
        self.0
            .as_bytes()
            .chunks(2)
            .filter_map(|pair| std::str::from_utf8(pair).ok())
            .collect::<Vec<_>>()
            .join(":")
    }
}

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.formatted())
    }
}

impl Serialize for MacAddress {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.formatted())
    }
}

impl<'de> Deserialize<'de> for MacAddress {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw).map_err(serde::de::Error::custom)
    }
}
