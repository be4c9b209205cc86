//! # Remote outcomes and their queue-row encoding
//!
//! A destination handler answers every queue row with a [`Disposition`] or an
//! [`Error`]. [`status_update`] turns either into the [`StatusUpdate`] the
//! worker writes back, so every destination follows the same rules:
//!
//! - [`Disposition::Success`] and [`Disposition::Ignored`] are terminal and
//!   eligible for cleanup.
//! - [`Disposition::Warning`] is terminal but kept for inspection.
//! - [`Disposition::AwaitingResult`] leaves the row submitted under a batch id
//!   until the destination is polled.
//! - A permanent error parks the row; anything else leaves it retryable.

use crate::Error;
use ezid::{Destination, StatusUpdate};
use reqwest::StatusCode;

/// Longest slice of a response body kept in a row's message or error.
pub const MAX_REASON_LEN: usize = 512;

/// What a destination did with one queue row.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Disposition {
    Success,
    /// Accepted, with a condition worth a human's attention.
    Warning(String),
    /// The record is not meant for this destination.
    Ignored(String),
    /// Accepted for asynchronous processing; poll with `batch_id` later.
    AwaitingResult { batch_id: String, message: String },
}

impl Disposition {
    pub fn ignored(reason: impl Into<String>) -> Self {
        Self::Ignored(reason.into())
    }

    pub fn into_update(self, now: u64) -> StatusUpdate {
        match self {
            Self::Success => StatusUpdate::success(now),
            Self::Warning(message) => StatusUpdate::warning(now, message),
            Self::Ignored(message) => StatusUpdate::ignored(now, message),
            Self::AwaitingResult { batch_id, message } => {
                StatusUpdate::awaiting(now, batch_id, message)
            }
        }
    }
}

/// The row update for a handler result.
pub fn status_update(result: &crate::Result<Disposition>, now: u64) -> StatusUpdate {
    match result {
        Ok(disposition) => disposition.clone().into_update(now),
        Err(e) => StatusUpdate::failure(now, excerpt(&e.to_string()), e.is_permanent()),
    }
}

/// Classifies a non-success HTTP response.
///
/// 5xx, 408 and 429 are retryable, and so are 401 and 403: a credential
/// problem is fixed by an operator, after which the row should go through
/// unattended. Every other status is a permanent rejection.
pub fn classify_status(destination: Destination, status: StatusCode, body: &str) -> Error {
    let reason = if body.trim().is_empty() {
        status.to_string()
    } else {
        format!("{status}: {}", excerpt(body.trim()))
    };
    let retryable = status.is_server_error()
        || matches!(
            status,
            StatusCode::REQUEST_TIMEOUT
                | StatusCode::TOO_MANY_REQUESTS
                | StatusCode::UNAUTHORIZED
                | StatusCode::FORBIDDEN
        );
    if retryable {
        Error::transient(destination, reason)
    } else {
        Error::permanent(destination, reason)
    }
}

/// Connection failures, timeouts and body read errors are always retryable.
pub fn transport_error(destination: Destination, err: &reqwest::Error) -> Error {
    let kind = if err.is_timeout() {
        "timed out"
    } else if err.is_connect() {
        "connection failed"
    } else {
        "request failed"
    };
    Error::transient(destination, format!("{kind}: {err}"))
}

/// At most [`MAX_REASON_LEN`] bytes of `s`, cut on a character boundary.
pub fn excerpt(s: &str) -> String {
    if s.len() <= MAX_REASON_LEN {
        return s.to_owned();
    }
    let mut end = MAX_REASON_LEN;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &s[..end])
}

#[cfg(test)]
mod tests {
    use super::*;
    use ezid::QueueStatus;

    #[test]
    fn server_errors_are_retryable() {
        for code in [500, 502, 503, 408, 429, 401, 403] {
            let status = StatusCode::from_u16(code).unwrap();
            let err = classify_status(Destination::Datacite, status, "");
            assert!(!err.is_permanent(), "{code} should be retryable");
        }
    }

    #[test]
    fn client_errors_are_permanent() {
        for code in [400, 404, 409, 410, 422] {
            let status = StatusCode::from_u16(code).unwrap();
            let err = classify_status(Destination::Binder, status, "bad");
            assert!(err.is_permanent(), "{code} should be permanent");
        }
    }

    #[test]
    fn dispositions_map_to_row_updates() {
        let ok = status_update(&Ok(Disposition::Success), 7);
        assert_eq!(ok, StatusUpdate::success(7));

        let awaiting = status_update(
            &Ok(Disposition::AwaitingResult {
                batch_id: "b1".into(),
                message: "queued".into(),
            }),
            7,
        );
        assert_eq!(awaiting.status, QueueStatus::Submitted);
        assert_eq!(awaiting.batch_id.as_deref(), Some("b1"));

        let transient = status_update(&Err(Error::transient(Destination::Binder, "down")), 7);
        assert_eq!(transient.status, QueueStatus::Failure);
        assert!(!transient.error_is_permanent);
        assert_eq!(transient.error, "binder unavailable: down");

        let permanent = status_update(&Err(Error::permanent(Destination::Binder, "no")), 7);
        assert!(permanent.error_is_permanent);

        let local = status_update(&Err(Error::local("boom")), 7);
        assert!(!local.error_is_permanent);
    }

    #[test]
    fn excerpts_respect_char_boundaries() {
        let long = "é".repeat(MAX_REASON_LEN);
        let cut = excerpt(&long);
        assert!(cut.ends_with("..."));
        assert!(cut.len() <= MAX_REASON_LEN + 3);
        assert_eq!(excerpt("short"), "short");
    }
}
