//! RPC completion status.
//!
//! Every RPC terminates with a `Status`; transport failures and user
//! cancellation travel through the RPC's own callback as a non-OK status,
//! never as an engine-level error.

use std::fmt;

/// Coarse status classification, mirroring the runtime's status space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatusCode {
    Ok,
    Cancelled,
    Unknown,
    InvalidArgument,
    DeadlineExceeded,
    NotFound,
    Unimplemented,
    Internal,
    Unavailable,
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StatusCode::Ok => "ok",
            StatusCode::Cancelled => "cancelled",
            StatusCode::Unknown => "unknown",
            StatusCode::InvalidArgument => "invalid_argument",
            StatusCode::DeadlineExceeded => "deadline_exceeded",
            StatusCode::NotFound => "not_found",
            StatusCode::Unimplemented => "unimplemented",
            StatusCode::Internal => "internal",
            StatusCode::Unavailable => "unavailable",
        };
        f.write_str(name)
    }
}

/// Terminal outcome of an RPC.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Status {
    pub code: StatusCode,
    pub message: String,
}

impl Status {
    pub fn new(code: StatusCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn ok() -> Self {
        Self::new(StatusCode::Ok, "")
    }

    pub fn cancelled(message: impl Into<String>) -> Self {
        Self::new(StatusCode::Cancelled, message)
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(StatusCode::Unavailable, message)
    }

    pub fn unimplemented(message: impl Into<String>) -> Self {
        Self::new(StatusCode::Unimplemented, message)
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::new(StatusCode::InvalidArgument, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::Internal, message)
    }

    pub fn is_ok(&self) -> bool {
        self.code == StatusCode::Ok
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.message.is_empty() {
            write!(f, "{}", self.code)
        } else {
            write!(f, "{}: {}", self.code, self.message)
        }
    }
}

impl std::error::Error for Status {}
