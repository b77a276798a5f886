use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::context::ContextError;

/// Failures raised by the record and image stores.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("record already exists")]
    AlreadyExists,

    #[error("no record with id {0}")]
    NotFound(String),

    #[error("request is cancelled")]
    Cancelled,

    #[error("deadline is exceeded")]
    DeadlineExceeded,

    #[error("stream error: {0}")]
    Stream(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<ContextError> for StoreError {
    fn from(err: ContextError) -> Self {
        match err {
            ContextError::Cancelled => StoreError::Cancelled,
            ContextError::DeadlineExceeded => StoreError::DeadlineExceeded,
        }
    }
}

/// Transport-agnostic status kinds, modelled on RPC status codes.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Code {
    Ok,
    Cancelled,
    Unknown,
    InvalidArgument,
    DeadlineExceeded,
    NotFound,
    AlreadyExists,
    ResourceExhausted,
    Unimplemented,
    Internal,
    Unavailable,
}

impl fmt::Display for Code {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Code::Ok => "OK",
            Code::Cancelled => "CANCELLED",
            Code::Unknown => "UNKNOWN",
            Code::InvalidArgument => "INVALID_ARGUMENT",
            Code::DeadlineExceeded => "DEADLINE_EXCEEDED",
            Code::NotFound => "NOT_FOUND",
            Code::AlreadyExists => "ALREADY_EXISTS",
            Code::ResourceExhausted => "RESOURCE_EXHAUSTED",
            Code::Unimplemented => "UNIMPLEMENTED",
            Code::Internal => "INTERNAL",
            Code::Unavailable => "UNAVAILABLE",
        };
        f.write_str(name)
    }
}

/// Error reported to the caller of an RPC.
#[derive(Error, Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[error("{code}: {message}")]
pub struct Status {
    pub code: Code,
    pub message: String,
}

impl Status {
    pub fn new(code: Code, message: impl Into<String>) -> Self {
        Self { code, message: message.into() }
    }

    pub fn cancelled(message: impl Into<String>) -> Self {
        Self::new(Code::Cancelled, message)
    }

    pub fn unknown(message: impl Into<String>) -> Self {
        Self::new(Code::Unknown, message)
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::new(Code::InvalidArgument, message)
    }

    pub fn deadline_exceeded(message: impl Into<String>) -> Self {
        Self::new(Code::DeadlineExceeded, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(Code::NotFound, message)
    }

    pub fn already_exists(message: impl Into<String>) -> Self {
        Self::new(Code::AlreadyExists, message)
    }

    pub fn resource_exhausted(message: impl Into<String>) -> Self {
        Self::new(Code::ResourceExhausted, message)
    }

    pub fn unimplemented(message: impl Into<String>) -> Self {
        Self::new(Code::Unimplemented, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(Code::Internal, message)
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(Code::Unavailable, message)
    }

    pub fn code(&self) -> Code {
        self.code
    }
}

impl From<ContextError> for Status {
    fn from(err: ContextError) -> Self {
        match err {
            ContextError::Cancelled => Status::cancelled(err.to_string()),
            ContextError::DeadlineExceeded => Status::deadline_exceeded(err.to_string()),
        }
    }
}

/// Client-side transport failures.
impl From<std::io::Error> for Status {
    fn from(err: std::io::Error) -> Self {
        Status::unavailable(err.to_string())
    }
}
