//! Positional argument decoding for dispatched methods.

use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;

/// Failures that belong to the request itself rather than the cloud.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CommandError {
    #[error("{method}: argument {index} ({name}) {reason}")]
    BadArgument {
        method: String,
        index: usize,
        name: &'static str,
        reason: String,
    },

    #[error("unknown method '{0}'")]
    NotImplemented(String),
}

/// The arguments array of one request.
pub struct Args<'a> {
    method: &'a str,
    values: &'a [Value],
}

impl<'a> Args<'a> {
    #[must_use]
    pub fn new(method: &'a str, values: &'a [Value]) -> Self {
        Self { method, values }
    }

    fn bad(&self, index: usize, name: &'static str, reason: impl Into<String>) -> CommandError {
        CommandError::BadArgument {
            method: self.method.to_string(),
            index,
            name,
            reason: reason.into(),
        }
    }

    fn raw(&self, index: usize) -> Option<&'a Value> {
        self.values.get(index).filter(|v| !v.is_null())
    }

    /// A required argument.
    ///
    /// # Errors
    ///
    /// Returns [`CommandError::BadArgument`] when the argument is missing,
    /// null or of the wrong shape.
    pub fn required<T: DeserializeOwned>(
        &self,
        index: usize,
        name: &'static str,
    ) -> Result<T, CommandError> {
        let value = self.raw(index).ok_or_else(|| self.bad(index, name, "is missing"))?;
        T::deserialize(value).map_err(|e| self.bad(index, name, format!("is invalid: {e}")))
    }

    /// An optional argument; missing or null yields the default.
    ///
    /// # Errors
    ///
    /// Returns [`CommandError::BadArgument`] when present but malformed.
    pub fn optional<T: DeserializeOwned + Default>(
        &self,
        index: usize,
        name: &'static str,
    ) -> Result<T, CommandError> {
        match self.raw(index) {
            Some(value) => {
                T::deserialize(value).map_err(|e| self.bad(index, name, format!("is invalid: {e}")))
            }
            None => Ok(T::default()),
        }
    }

    /// A numeric resource id, sent either as a number or a numeric string.
    ///
    /// # Errors
    ///
    /// Returns [`CommandError::BadArgument`] for anything else.
    pub fn id(&self, index: usize, name: &'static str) -> Result<u64, CommandError> {
        let value = self.raw(index).ok_or_else(|| self.bad(index, name, "is missing"))?;
        numeric_id(value).ok_or_else(|| self.bad(index, name, "is not a numeric id"))
    }
}

/// Parses an id sent as a JSON number or a numeric string.
#[must_use]
pub fn numeric_id(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Renders a scalar JSON value as text; strings lose their quotes.
#[must_use]
pub fn text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
