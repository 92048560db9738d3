//! gRPC status codes.

use crate::frame::CodecError;
use crate::metadata::MetadataError;

use std::fmt;

/// gRPC status codes (different from HTTP status codes).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Code {
    /// The operation completed successfully.
    Ok = 0,
    /// The operation was cancelled.
    Cancelled = 1,
    /// Unknown error.
    Unknown = 2,
    /// Invalid argument was provided.
    InvalidArgument = 3,
    /// Deadline expired before operation could complete.
    DeadlineExceeded = 4,
    /// Requested entity was not found.
    NotFound = 5,
    /// Entity already exists.
    AlreadyExists = 6,
    /// Permission denied.
    PermissionDenied = 7,
    /// Resource has been exhausted.
    ResourceExhausted = 8,
    /// System is not in a state required for the operation.
    FailedPrecondition = 9,
    /// Operation was aborted.
    Aborted = 10,
    /// Operation was attempted past the valid range.
    OutOfRange = 11,
    /// Operation is not implemented or supported.
    Unimplemented = 12,
    /// Internal error.
    Internal = 13,
    /// Service is currently unavailable.
    Unavailable = 14,
    /// Unrecoverable data loss or corruption.
    DataLoss = 15,
    /// Request does not have valid authentication credentials.
    Unauthenticated = 16,
}

impl Code {
    /// Create a Code from its numeric value. Unknown values map to
    /// `Unknown`, as the protocol requires.
    pub fn from_u32(value: u32) -> Self {
        match value {
            0 => Code::Ok,
            1 => Code::Cancelled,
            2 => Code::Unknown,
            3 => Code::InvalidArgument,
            4 => Code::DeadlineExceeded,
            5 => Code::NotFound,
            6 => Code::AlreadyExists,
            7 => Code::PermissionDenied,
            8 => Code::ResourceExhausted,
            9 => Code::FailedPrecondition,
            10 => Code::Aborted,
            11 => Code::OutOfRange,
            12 => Code::Unimplemented,
            13 => Code::Internal,
            14 => Code::Unavailable,
            15 => Code::DataLoss,
            16 => Code::Unauthenticated,
            _ => Code::Unknown,
        }
    }

    /// Get the numeric value of this code.
    pub fn as_u32(self) -> u32 {
        self as u32
    }

    /// Check if this is a successful status.
    pub fn is_ok(self) -> bool {
        self == Code::Ok
    }

    /// The canonical upper-snake name of the code.
    pub fn name(self) -> &'static str {
        match self {
            Code::Ok => "OK",
            Code::Cancelled => "CANCELLED",
            Code::Unknown => "UNKNOWN",
            Code::InvalidArgument => "INVALID_ARGUMENT",
            Code::DeadlineExceeded => "DEADLINE_EXCEEDED",
            Code::NotFound => "NOT_FOUND",
            Code::AlreadyExists => "ALREADY_EXISTS",
            Code::PermissionDenied => "PERMISSION_DENIED",
            Code::ResourceExhausted => "RESOURCE_EXHAUSTED",
            Code::FailedPrecondition => "FAILED_PRECONDITION",
            Code::Aborted => "ABORTED",
            Code::OutOfRange => "OUT_OF_RANGE",
            Code::Unimplemented => "UNIMPLEMENTED",
            Code::Internal => "INTERNAL",
            Code::Unavailable => "UNAVAILABLE",
            Code::DataLoss => "DATA_LOSS",
            Code::Unauthenticated => "UNAUTHENTICATED",
        }
    }
}

impl fmt::Display for Code {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// gRPC status returned from an RPC, carried in trailers.
#[derive(Debug, Clone)]
pub struct Status {
    /// The status code.
    code: Code,
    /// Optional human-readable message.
    message: Option<String>,
}

impl Status {
    /// Create a new status.
    pub fn new(code: Code, message: impl Into<String>) -> Self {
        Self {
            code,
            message: Some(message.into()),
        }
    }

    /// Create an OK status.
    pub fn ok() -> Self {
        Self {
            code: Code::Ok,
            message: None,
        }
    }

    /// Create a status from just a code.
    pub fn from_code(code: Code) -> Self {
        Self {
            code,
            message: None,
        }
    }

    /// Get the status code.
    pub fn code(&self) -> Code {
        self.code
    }

    /// Get the status message, if any.
    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    /// Check if this is a successful status.
    pub fn is_ok(&self) -> bool {
        self.code.is_ok()
    }

    /// Create a cancelled status.
    pub fn cancelled(message: impl Into<String>) -> Self {
        Self::new(Code::Cancelled, message)
    }

    /// Create an invalid argument status.
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::new(Code::InvalidArgument, message)
    }

    /// Create a deadline exceeded status.
    pub fn deadline_exceeded(message: impl Into<String>) -> Self {
        Self::new(Code::DeadlineExceeded, message)
    }

    /// Create an out of range status.
    pub fn out_of_range(message: impl Into<String>) -> Self {
        Self::new(Code::OutOfRange, message)
    }

    /// Create an unimplemented status, the answer for unresolved routes.
    pub fn unimplemented(message: impl Into<String>) -> Self {
        Self::new(Code::Unimplemented, message)
    }

    /// Create an internal error status.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(Code::Internal, message)
    }

    /// Create a resource exhausted status.
    pub fn resource_exhausted(message: impl Into<String>) -> Self {
        Self::new(Code::ResourceExhausted, message)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code)?;
        if let Some(msg) = &self.message {
            write!(f, ": {}", msg)?;
        }
        Ok(())
    }
}

impl std::error::Error for Status {}

/// Map a codec failure onto the status an application sees.
///
/// Framing violations are range errors, truncated streams are data loss,
/// oversized messages exhaust a resource limit, and callback failures are
/// internal to the endpoint that configured the callback.
impl From<CodecError> for Status {
    fn from(err: CodecError) -> Self {
        let code = match &err {
            CodecError::Truncated { .. } | CodecError::LengthMismatch { .. } => Code::OutOfRange,
            CodecError::TooLarge { .. } => Code::ResourceExhausted,
            CodecError::Marshal(_) | CodecError::Unmarshal(_) => Code::Internal,
            CodecError::TrailingFrame { .. } => Code::DataLoss,
            CodecError::Closed => Code::Internal,
        };
        Status::new(code, err.to_string())
    }
}

/// Map a metadata failure onto the status an application sees.
///
/// Interval violations are range errors; malformed `-bin` values are
/// invalid arguments from the peer.
impl From<MetadataError> for Status {
    fn from(err: MetadataError) -> Self {
        let code = match &err {
            MetadataError::InvalidInterval(_) | MetadataError::IntervalOutOfRange { .. } => {
                Code::OutOfRange
            }
            MetadataError::InvalidBase64 { .. } => Code::InvalidArgument,
        };
        Status::new(code, err.to_string())
    }
}
