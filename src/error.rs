//! Error types and native result code translation for rasbridge

use crate::native::codes;
use crate::native::EntryPoint;
use thiserror::Error;

/// Raw failure signal from a native entry point.
///
/// Never handed to callers directly; always converted into [`RasError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NativeError {
    pub code: i32,
    pub entry_point: EntryPoint,
}

impl NativeError {
    pub fn new(code: u32, entry_point: EntryPoint) -> Self {
        Self {
            code: code as i32,
            entry_point,
        }
    }
}

/// Main error type for RAS operations
#[derive(Error, Debug)]
pub enum RasError {
    /// Operation referenced a handle that is no longer valid
    #[error("Invalid handle: {0}")]
    InvalidHandle(String),

    /// Parameters are well-formed but jointly insufficient
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Native access-control rejection
    #[error("Access denied by {entry_point}")]
    AccessDenied { entry_point: EntryPoint },

    /// The entry point does not exist at this OS capability level
    #[error("{entry_point} is not supported at this capability level")]
    CapabilityUnsupported { entry_point: EntryPoint },

    /// The buffered-call retry loop did not converge
    #[error("Buffer negotiation for {entry_point} did not converge after {attempts} attempts")]
    BufferProtocolExhausted { entry_point: EntryPoint, attempts: u32 },

    /// Unclassified native failure code
    #[error("{entry_point} failed with native code {code}")]
    Native { code: i32, entry_point: EntryPoint },

    /// A dial was requested while the same session is active
    #[error("Operation already in progress: {0}")]
    OperationAlreadyInProgress(String),

    /// Caller-enforced wall-clock budget elapsed
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// Aborted by caller request
    #[error("Operation cancelled")]
    Cancelled,

    /// Entry has no owning phonebook
    #[error("Entry '{0}' is not attached to a phonebook")]
    NotAttached(String),

    /// Native record shorter than its declared layout, or otherwise undecodable
    #[error("Malformed native record: {0}")]
    MalformedRecord(String),

    /// Configuration file errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Coarse classification of [`RasError`], used for feature detection and matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    InvalidHandle,
    InvalidConfiguration,
    AccessDenied,
    CapabilityUnsupported,
    BufferProtocolExhausted,
    NativeError,
    OperationAlreadyInProgress,
    Timeout,
    Cancelled,
    NotAttached,
    MalformedRecord,
    Config,
    Io,
}

impl RasError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            RasError::InvalidHandle(_) => ErrorKind::InvalidHandle,
            RasError::InvalidConfiguration(_) => ErrorKind::InvalidConfiguration,
            RasError::AccessDenied { .. } => ErrorKind::AccessDenied,
            RasError::CapabilityUnsupported { .. } => ErrorKind::CapabilityUnsupported,
            RasError::BufferProtocolExhausted { .. } => ErrorKind::BufferProtocolExhausted,
            RasError::Native { .. } => ErrorKind::NativeError,
            RasError::OperationAlreadyInProgress(_) => ErrorKind::OperationAlreadyInProgress,
            RasError::Timeout(_) => ErrorKind::Timeout,
            RasError::Cancelled => ErrorKind::Cancelled,
            RasError::NotAttached(_) => ErrorKind::NotAttached,
            RasError::MalformedRecord(_) => ErrorKind::MalformedRecord,
            RasError::Config(_) => ErrorKind::Config,
            RasError::Io(_) => ErrorKind::Io,
        }
    }

    /// Native result code preserved for diagnostics, if any.
    pub fn native_code(&self) -> Option<i32> {
        match self {
            RasError::Native { code, .. } => Some(*code),
            _ => None,
        }
    }

    pub fn is_unsupported(&self) -> bool {
        self.kind() == ErrorKind::CapabilityUnsupported
    }
}

impl Clone for RasError {
    fn clone(&self) -> Self {
        match self {
            RasError::InvalidHandle(s) => RasError::InvalidHandle(s.clone()),
            RasError::InvalidConfiguration(s) => RasError::InvalidConfiguration(s.clone()),
            RasError::AccessDenied { entry_point } => RasError::AccessDenied {
                entry_point: *entry_point,
            },
            RasError::CapabilityUnsupported { entry_point } => RasError::CapabilityUnsupported {
                entry_point: *entry_point,
            },
            RasError::BufferProtocolExhausted {
                entry_point,
                attempts,
            } => RasError::BufferProtocolExhausted {
                entry_point: *entry_point,
                attempts: *attempts,
            },
            RasError::Native { code, entry_point } => RasError::Native {
                code: *code,
                entry_point: *entry_point,
            },
            RasError::OperationAlreadyInProgress(s) => {
                RasError::OperationAlreadyInProgress(s.clone())
            }
            RasError::Timeout(s) => RasError::Timeout(s.clone()),
            RasError::Cancelled => RasError::Cancelled,
            RasError::NotAttached(s) => RasError::NotAttached(s.clone()),
            RasError::MalformedRecord(s) => RasError::MalformedRecord(s.clone()),
            RasError::Config(s) => RasError::Config(s.clone()),
            // io::Error is not Clone; keep kind and message
            RasError::Io(e) => RasError::Io(std::io::Error::new(e.kind(), e.to_string())),
        }
    }
}

/// Translate a native result code into the error taxonomy.
impl From<NativeError> for RasError {
    fn from(err: NativeError) -> Self {
        let entry_point = err.entry_point;
        match err.code as u32 {
            codes::ERROR_INVALID_HANDLE => {
                RasError::InvalidHandle(format!("{entry_point} rejected the handle"))
            }
            codes::ERROR_ACCESS_DENIED => RasError::AccessDenied { entry_point },
            codes::ERROR_PROC_NOT_FOUND => RasError::CapabilityUnsupported { entry_point },
            codes::ERROR_USER_DISCONNECTION | codes::ERROR_CANCELLED => RasError::Cancelled,
            codes::ERROR_REQUEST_TIMEOUT => {
                RasError::Timeout(format!("{entry_point} reported a timeout"))
            }
            _ => RasError::Native {
                code: err.code,
                entry_point,
            },
        }
    }
}

/// Map a raw result code of `entry_point` to `Ok(())` or the translated error.
pub fn check(code: u32, entry_point: EntryPoint) -> Result<()> {
    if code == codes::SUCCESS {
        Ok(())
    } else {
        Err(NativeError::new(code, entry_point).into())
    }
}

/// Result type alias for RAS operations
pub type Result<T> = std::result::Result<T, RasError>;

/// Helper trait for converting errors to RasError
pub trait IntoRasError<T> {
    fn into_ras_error(self, context: &str) -> Result<T>;
}

impl<T, E> IntoRasError<T> for std::result::Result<T, E>
where
    E: std::fmt::Display,
{
    fn into_ras_error(self, context: &str) -> Result<T> {
        self.map_err(|e| RasError::Config(format!("{context}: {e}")))
    }
}

impl From<toml::de::Error> for RasError {
    fn from(err: toml::de::Error) -> Self {
        RasError::Config(format!("TOML parsing error: {err}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = RasError::InvalidConfiguration("no entry".to_string());
        assert_eq!(err.to_string(), "Invalid configuration: no entry");
    }

    #[test]
    fn test_missing_entry_point_is_capability_unsupported() {
        for ep in EntryPoint::ALL {
            let err: RasError = NativeError::new(codes::ERROR_PROC_NOT_FOUND, *ep).into();
            assert_eq!(err.kind(), ErrorKind::CapabilityUnsupported);
            assert!(err.native_code().is_none());
        }
    }

    #[test]
    fn test_translator_special_cases() {
        let ep = EntryPoint::GetConnectStatus;
        let err: RasError = NativeError::new(codes::ERROR_INVALID_HANDLE, ep).into();
        assert_eq!(err.kind(), ErrorKind::InvalidHandle);

        let err: RasError = NativeError::new(codes::ERROR_ACCESS_DENIED, ep).into();
        assert!(matches!(err, RasError::AccessDenied { entry_point } if entry_point == ep));

        let err: RasError = NativeError::new(codes::ERROR_CANCELLED, ep).into();
        assert_eq!(err.kind(), ErrorKind::Cancelled);
    }

    #[test]
    fn test_unknown_code_preserved() {
        let err: RasError = NativeError::new(691, EntryPoint::Dial).into();
        assert_eq!(err.kind(), ErrorKind::NativeError);
        assert_eq!(err.native_code(), Some(691));
        assert!(err.to_string().contains("RasDialW"));
    }

    #[test]
    fn test_check_success() {
        assert!(check(codes::SUCCESS, EntryPoint::HangUp).is_ok());
        assert!(check(codes::ERROR_NO_CONNECTION, EntryPoint::HangUp).is_err());
    }

    #[test]
    fn test_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: RasError = io_err.into();
        assert!(matches!(err, RasError::Io(_)));
        assert_eq!(err.clone().kind(), ErrorKind::Io);
    }

    #[test]
    fn test_into_ras_error_trait() {
        let result: std::result::Result<(), &str> = Err("bad value");
        let ras_result = result.into_ras_error("test context");
        assert!(ras_result.unwrap_err().to_string().contains("test context"));
    }
}
