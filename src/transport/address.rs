use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{GridError, Result};

/// Unique agent address in `localpart@domain[/resource]` form.
///
/// Equality is plain string equality, so `a@x/1` and `a@x` are distinct
/// addresses. Use [`Address::bare`] to drop the resource.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Address(String);

impl Address {
    /// Parses and validates an address.
    ///
    /// # Errors
    ///
    /// Returns `GridError::InvalidAddress` when the localpart or domain is
    /// missing, or when the text contains whitespace.
    pub fn parse(text: &str) -> Result<Self> {
        let invalid = || GridError::InvalidAddress(text.to_string());

        if text.chars().any(char::is_whitespace) {
            return Err(invalid());
        }
        let (local, rest) = text.split_once('@').ok_or_else(invalid)?;
        let domain = rest.split_once('/').map_or(rest, |(d, _)| d);
        if local.is_empty() || domain.is_empty() || domain.contains('@') {
            return Err(invalid());
        }
        if let Some((_, resource)) = rest.split_once('/') {
            if resource.is_empty() {
                return Err(invalid());
            }
        }
        Ok(Self(text.to_string()))
    }

    /// Builds `local@domain`.
    ///
    /// # Errors
    ///
    /// Returns `GridError::InvalidAddress` if the combination does not parse.
    pub fn new(local: &str, domain: &str) -> Result<Self> {
        Self::parse(&format!("{local}@{domain}"))
    }

    /// Returns the address without its resource part.
    pub fn bare(&self) -> Address {
        match self.0.split_once('/') {
            Some((bare, _)) => Address(bare.to_string()),
            None => self.clone(),
        }
    }

    pub fn localpart(&self) -> &str {
        self.0.split_once('@').map_or("", |(l, _)| l)
    }

    pub fn domain(&self) -> &str {
        let rest = self.0.split_once('@').map_or("", |(_, r)| r);
        rest.split_once('/').map_or(rest, |(d, _)| d)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Address {
    type Err = GridError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Address {
    type Error = GridError;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<Address> for String {
    fn from(address: Address) -> Self {
        address.0
    }
}
