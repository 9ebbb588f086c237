//! Recipient identifier parsing: handle-form (`@name`) or phone-number-form.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AddressError {
    #[error("Empty recipient identifier")]
    Empty,

    #[error("Unusable recipient identifier: {0}")]
    Invalid(String),
}

/// A parsed recipient address, ready for a provider call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecipientAddress {
    /// Username without the leading `@`.
    Handle(String),
    /// Normalized phone number: `+` followed by digits only.
    Phone(String),
}

impl RecipientAddress {
    /// Parse a raw identifier. A leading `@` marks a handle; anything else
    /// is treated as a phone number and normalized by dropping every
    /// character except digits and prefixing `+`.
    pub fn parse(identifier: &str) -> Result<Self, AddressError> {
        let trimmed = identifier.trim();
        if trimmed.is_empty() {
            return Err(AddressError::Empty);
        }

        if let Some(handle) = trimmed.strip_prefix('@') {
            if handle.is_empty() {
                return Err(AddressError::Invalid(identifier.to_string()));
            }
            return Ok(Self::Handle(handle.to_string()));
        }

        let digits: String = trimmed.chars().filter(|c| c.is_ascii_digit()).collect();
        if digits.is_empty() {
            return Err(AddressError::Invalid(identifier.to_string()));
        }
        Ok(Self::Phone(format!("+{}", digits)))
    }
}

impl fmt::Display for RecipientAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Handle(name) => write!(f, "@{}", name),
            Self::Phone(number) => write!(f, "{}", number),
        }
    }
}
