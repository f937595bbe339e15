use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One CPI invocation as received on stdin.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Request {
    pub method: String,
    #[serde(default)]
    pub arguments: Vec<Value>,
    /// Director context (director uuid, request id). Not interpreted.
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub context: Value,
}

/// Error class reported back to the fleet manager.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ErrorType {
    CloudError,
    CpiError,
    NotImplemented,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ResponseError {
    #[serde(rename = "type")]
    pub kind: ErrorType,
    pub message: String,
    pub ok_to_retry: bool,
}

/// One CPI invocation result as written to stdout.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Response {
    pub result: Value,
    pub error: Option<ResponseError>,
    pub log: String,
}

impl Response {
    #[must_use]
    pub fn ok(result: Value, log: String) -> Self {
        Self {
            result,
            error: None,
            log,
        }
    }

    #[must_use]
    pub fn error(kind: ErrorType, message: String, ok_to_retry: bool, log: String) -> Self {
        Self {
            result: Value::Null,
            error: Some(ResponseError {
                kind,
                message,
                ok_to_retry,
            }),
            log,
        }
    }
}
