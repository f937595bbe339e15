//! Maps dispatch outcomes onto the response envelope.

use cpi_common::{ErrorType, Response};
use serde_json::Value;

use crate::commands::args::CommandError;
use crate::domain::error::{CpiError, find_cpi_error};

/// Envelope error class and retry flag for a failed dispatch.
#[must_use]
pub fn classify(err: &anyhow::Error) -> (ErrorType, bool) {
    match err.chain().find_map(|e| e.downcast_ref::<CommandError>()) {
        Some(CommandError::NotImplemented(_)) => (ErrorType::NotImplemented, false),
        Some(CommandError::BadArgument { .. }) => (ErrorType::CpiError, false),
        None => (
            ErrorType::CloudError,
            find_cpi_error(err).is_some_and(CpiError::is_retryable),
        ),
    }
}

/// Builds the envelope; error messages carry the full context chain.
#[must_use]
pub fn into_response(result: anyhow::Result<Value>, log: String) -> Response {
    match result {
        Ok(value) => Response::ok(value, log),
        Err(err) => {
            let (kind, ok_to_retry) = classify(&err);
            Response::error(kind, format!("{err:#}"), ok_to_retry, log)
        }
    }
}

/// Envelope for failures before dispatch (unreadable request, bad config).
#[must_use]
pub fn invalid_invocation(err: &anyhow::Error, log: String) -> Response {
    Response::error(ErrorType::CpiError, format!("{err:#}"), false, log)
}
