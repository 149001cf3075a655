use std::collections::BTreeMap;

use serde::Serialize;
use serde::de::DeserializeOwned;

use super::Address;
use crate::error::Result;

/// Metadata key carrying the message type.
pub const TYPE_KEY: &str = "type";
/// Metadata key carrying the topic name of a subscribe request.
pub const QUEUE_KEY: &str = "queue";

/// A point-to-point message: destination, UTF-8 body and a metadata map.
///
/// The body is a JSON document (or empty). The sender is stamped by the
/// sending agent, never by the recipient.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Message {
    pub to: Option<Address>,
    pub sender: Option<Address>,
    pub body: String,
    pub metadata: BTreeMap<String, String>,
}

impl Message {
    /// Creates an empty message of the given type.
    pub fn of_kind(kind: &str) -> Self {
        Self::default().with_metadata(TYPE_KEY, kind)
    }

    pub fn with_to(mut self, to: Address) -> Self {
        self.to = Some(to);
        self
    }

    pub fn with_metadata(mut self, key: &str, value: &str) -> Self {
        self.metadata.insert(key.to_string(), value.to_string());
        self
    }

    /// Serializes `body` as JSON into the message body.
    ///
    /// # Errors
    ///
    /// Returns `GridError::Json` if serialization fails.
    pub fn with_json_body<T: Serialize>(mut self, body: &T) -> Result<Self> {
        self.body = serde_json::to_string(body)?;
        Ok(self)
    }

    /// Returns the `type` metadata value, if any.
    pub fn kind(&self) -> Option<&str> {
        self.metadata.get(TYPE_KEY).map(String::as_str)
    }

    pub fn metadata(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).map(String::as_str)
    }

    /// Parses the body into a typed value.
    ///
    /// # Errors
    ///
    /// Returns `GridError::Json` when the body is not valid JSON for `T`.
    pub fn parse_body<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_str(&self.body)?)
    }

    /// Parses the body as an untyped JSON value; an empty body is `null`.
    ///
    /// # Errors
    ///
    /// Returns `GridError::Json` when the body is not valid JSON.
    pub fn json_body(&self) -> Result<serde_json::Value> {
        if self.body.trim().is_empty() {
            return Ok(serde_json::Value::Null);
        }
        self.parse_body()
    }
}
