//! The mock server's error type.
//!
//! Five kinds are surfaced from the core to callers (see the crate-level
//! docs for the suggested HTTP status mapping). Each layer that forwards an
//! error may prepend context with [`Error::context`] without losing the
//! underlying kind, so a caller can always `match` on the variant.

use std::fmt;

/// The mock server's error type.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Error {
    /// No enabled rule matched the request, or a lookup by key failed.
    RuleNotFound(String),

    /// A rule submitted for persistence failed validation, or a matched
    /// rule's data is internally inconsistent (e.g. `scene` strategy with no
    /// `scene` variable).
    InvalidRule(String),

    /// At least one assertion with `fail_on_error = true` failed.
    AssertionFailed(Vec<String>),

    /// The repository failed to complete an I/O operation.
    Backend(String),

    /// The client request could not be used to extract a declared variable,
    /// e.g. the body is not valid JSON but a `body` variable is declared.
    BadRequest(String),
}

impl Error {
    pub fn rule_not_found<T: fmt::Display>(text: T) -> Self {
        Self::RuleNotFound(text.to_string())
    }

    pub fn invalid_rule<T: fmt::Display>(text: T) -> Self {
        Self::InvalidRule(text.to_string())
    }

    pub fn assertion_failed(messages: Vec<String>) -> Self {
        Self::AssertionFailed(messages)
    }

    pub fn backend<T: fmt::Display>(text: T) -> Self {
        Self::Backend(text.to_string())
    }

    pub fn bad_request<T: fmt::Display>(text: T) -> Self {
        Self::BadRequest(text.to_string())
    }

    /// Prepend `context` to the error's message, preserving the variant.
    pub fn context<T: fmt::Display>(self, context: T) -> Self {
        match self {
            Self::RuleNotFound(msg) => {
                Self::RuleNotFound(format!("{}: {}", context, msg))
            }
            Self::InvalidRule(msg) => {
                Self::InvalidRule(format!("{}: {}", context, msg))
            }
            Self::AssertionFailed(mut msgs) => {
                msgs.insert(0, context.to_string());
                Self::AssertionFailed(msgs)
            }
            Self::Backend(msg) => {
                Self::Backend(format!("{}: {}", context, msg))
            }
            Self::BadRequest(msg) => {
                Self::BadRequest(format!("{}: {}", context, msg))
            }
        }
    }

    /// The suggested HTTP status for this error kind (`§7 Error Handling
    /// Design`). Mapping to an actual response is the transport adapter's
    /// job; this is offered as a convenience.
    pub fn suggested_http_status(&self) -> u16 {
        match self {
            Self::RuleNotFound(_) => 404,
            Self::InvalidRule(_) => 400,
            Self::AssertionFailed(_) => 400,
            Self::Backend(_) => 500,
            Self::BadRequest(_) => 400,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::RuleNotFound(msg) => write!(f, "rule not found: {}", msg),
            Self::InvalidRule(msg) => write!(f, "invalid rule: {}", msg),
            Self::AssertionFailed(msgs) => {
                write!(f, "assertion failed: {}", msgs.join("; "))
            }
            Self::Backend(msg) => write!(f, "backend error: {}", msg),
            Self::BadRequest(msg) => write!(f, "bad request: {}", msg),
        }
    }
}

impl std::error::Error for Error {}

/// Simplify mapping another error type into [`Error::Backend`].
#[macro_export]
macro_rules! map_backend_error {
    ($result:expr $(,)?) => {
        ($result).map_err(|e| $crate::Error::backend(e.to_string()))
    };
}
