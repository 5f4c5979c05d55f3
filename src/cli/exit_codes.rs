//! CLI Exit Codes
//!
//! Standard exit codes for CLI operations and automation.

use crate::config::{ConfigError, StoreError};
use crate::core::session::WriteError;
use crate::core::transport::ConnectionError;
use crate::core::workspace::WorkspaceError;
use std::process::ExitCode;

/// Exit code constants
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitCodes;

impl ExitCodes {
    /// Success
    pub const SUCCESS: u8 = 0;

    /// General error
    pub const ERROR: u8 = 1;

    /// Invalid arguments
    pub const INVALID_ARGS: u8 = 2;

    /// Connection failed
    pub const CONNECTION_FAILED: u8 = 3;

    /// File not found
    pub const FILE_NOT_FOUND: u8 = 6;

    /// Permission denied
    pub const PERMISSION_DENIED: u8 = 7;

    /// Configuration error
    pub const CONFIG_ERROR: u8 = 8;

    /// Write to the device failed
    pub const WRITE_FAILED: u8 = 10;

    /// Unsupported port or settings
    pub const UNSUPPORTED: u8 = 11;

    /// Device busy
    pub const DEVICE_BUSY: u8 = 13;

    /// Port not found
    pub const PORT_NOT_FOUND: u8 = 14;

    /// Data validation failed
    pub const VALIDATION_FAILED: u8 = 17;

    /// Internal error
    pub const INTERNAL_ERROR: u8 = 127;
}

/// CLI operation result
#[derive(Debug)]
pub enum CliResult {
    /// Success with optional message
    Success(Option<String>),

    /// Error with code and message
    Error(u8, String),
}

impl CliResult {
    /// Success without a message
    pub fn success() -> Self {
        Self::Success(None)
    }

    /// Success with a message
    pub fn success_with_message(msg: impl Into<String>) -> Self {
        Self::Success(Some(msg.into()))
    }

    /// Failure with an exit code
    pub fn error(code: u8, msg: impl Into<String>) -> Self {
        Self::Error(code, msg.into())
    }

    /// Get exit code
    pub fn code(&self) -> u8 {
        match self {
            Self::Success(_) => ExitCodes::SUCCESS,
            Self::Error(code, _) => *code,
        }
    }

    /// Get message
    pub fn message(&self) -> Option<&str> {
        match self {
            Self::Success(Some(msg)) | Self::Error(_, msg) => Some(msg),
            Self::Success(None) => None,
        }
    }

    /// Convert to ExitCode
    pub fn to_exit_code(&self) -> ExitCode {
        ExitCode::from(self.code())
    }

    /// Is success?
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }
}

impl From<std::io::Error> for CliResult {
    fn from(err: std::io::Error) -> Self {
        use std::io::ErrorKind;

        let code = match err.kind() {
            ErrorKind::NotFound => ExitCodes::FILE_NOT_FOUND,
            ErrorKind::PermissionDenied => ExitCodes::PERMISSION_DENIED,
            _ => ExitCodes::ERROR,
        };

        Self::Error(code, err.to_string())
    }
}

impl From<ConnectionError> for CliResult {
    fn from(err: ConnectionError) -> Self {
        let code = match err {
            ConnectionError::Busy(_) => ExitCodes::DEVICE_BUSY,
            ConnectionError::Denied(_) => ExitCodes::PERMISSION_DENIED,
            ConnectionError::Unsupported(_) => ExitCodes::UNSUPPORTED,
            ConnectionError::NotFound(_) => ExitCodes::PORT_NOT_FOUND,
            ConnectionError::Failed(_) => ExitCodes::CONNECTION_FAILED,
        };
        Self::Error(code, err.to_string())
    }
}

impl From<WriteError> for CliResult {
    fn from(err: WriteError) -> Self {
        let code = match err {
            WriteError::MalformedHex(_) => ExitCodes::VALIDATION_FAILED,
            WriteError::NotConnected | WriteError::Io(_) => ExitCodes::WRITE_FAILED,
        };
        Self::Error(code, err.to_string())
    }
}

impl From<StoreError> for CliResult {
    fn from(err: StoreError) -> Self {
        Self::Error(ExitCodes::CONFIG_ERROR, err.to_string())
    }
}

impl From<ConfigError> for CliResult {
    fn from(err: ConfigError) -> Self {
        Self::Error(ExitCodes::CONFIG_ERROR, err.to_string())
    }
}

impl From<WorkspaceError> for CliResult {
    fn from(err: WorkspaceError) -> Self {
        match err {
            WorkspaceError::Io(e) => e.into(),
            WorkspaceError::Json(e) => {
                Self::Error(ExitCodes::VALIDATION_FAILED, format!("Invalid automation file: {e}"))
            }
            WorkspaceError::Store(e) => e.into(),
        }
    }
}

impl From<anyhow::Error> for CliResult {
    fn from(err: anyhow::Error) -> Self {
        let err = match err.downcast::<ConnectionError>() {
            Ok(e) => return e.into(),
            Err(err) => err,
        };
        let err = match err.downcast::<WriteError>() {
            Ok(e) => return e.into(),
            Err(err) => err,
        };
        let err = match err.downcast::<WorkspaceError>() {
            Ok(e) => return e.into(),
            Err(err) => err,
        };
        let err = match err.downcast::<StoreError>() {
            Ok(e) => return e.into(),
            Err(err) => err,
        };
        let err = match err.downcast::<ConfigError>() {
            Ok(e) => return e.into(),
            Err(err) => err,
        };

        let message = format!("{err:#}");
        let code = match err.downcast_ref::<std::io::Error>() {
            Some(e) => Self::from(std::io::Error::from(e.kind())).code(),
            None => ExitCodes::ERROR,
        };
        Self::Error(code, message)
    }
}

/// Exit code description
pub fn exit_code_description(code: u8) -> &'static str {
    match code {
        0 => "Success",
        1 => "General error",
        2 => "Invalid arguments",
        3 => "Connection failed",
        6 => "File not found",
        7 => "Permission denied",
        8 => "Configuration error",
        10 => "Write failed",
        11 => "Unsupported port or settings",
        13 => "Device busy",
        14 => "Port not found",
        17 => "Validation failed",
        127 => "Internal error",
        _ => "Unknown error",
    }
}

/// Print exit code table
pub fn print_exit_codes() {
    println!("Exit Codes:");
    for code in [0, 1, 2, 3, 6, 7, 8, 10, 11, 13, 14, 17, 127] {
        println!("  {:>3}  {}", code, exit_code_description(code));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_result() {
        let success = CliResult::success();
        assert!(success.is_success());
        assert_eq!(success.code(), 0);

        let error = CliResult::error(3, "Connection failed");
        assert!(!error.is_success());
        assert_eq!(error.code(), 3);
        assert_eq!(error.message(), Some("Connection failed"));
    }

    #[test]
    fn test_from_io_error() {
        let err = std::io::Error::new(std::io::ErrorKind::NotFound, "file missing");
        let result = CliResult::from(err);
        assert_eq!(result.code(), ExitCodes::FILE_NOT_FOUND);
    }

    #[test]
    fn test_connection_errors_map_to_codes() {
        assert_eq!(
            CliResult::from(ConnectionError::Busy("COM3".into())).code(),
            ExitCodes::DEVICE_BUSY
        );
        assert_eq!(
            CliResult::from(ConnectionError::NotFound("COM9".into())).code(),
            ExitCodes::PORT_NOT_FOUND
        );
        assert_eq!(
            CliResult::from(ConnectionError::Denied("ttyS0".into())).code(),
            ExitCodes::PERMISSION_DENIED
        );
    }

    #[test]
    fn test_malformed_hex_is_validation_failure() {
        let err = crate::core::codec::parse_hex_payload("ABC").unwrap_err();
        assert_eq!(
            CliResult::from(WriteError::MalformedHex(err)).code(),
            ExitCodes::VALIDATION_FAILED
        );
    }

    #[test]
    fn test_anyhow_errors_use_component_codes() {
        let err = anyhow::Error::new(ConnectionError::Busy("COM3".into()));
        assert_eq!(CliResult::from(err).code(), ExitCodes::DEVICE_BUSY);

        let err = anyhow::Error::new(WriteError::NotConnected).context("sending command");
        assert_eq!(CliResult::from(err).code(), ExitCodes::WRITE_FAILED);

        let json = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let err = anyhow::Error::new(WorkspaceError::Json(json));
        assert_eq!(CliResult::from(err).code(), ExitCodes::VALIDATION_FAILED);
    }

    #[test]
    fn test_anyhow_io_and_plain_errors() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let err = anyhow::Error::new(io).context("opening capture file");
        let result = CliResult::from(err);
        assert_eq!(result.code(), ExitCodes::PERMISSION_DENIED);
        assert!(result.message().unwrap().starts_with("opening capture file"));

        assert_eq!(CliResult::from(anyhow::anyhow!("boom")).code(), ExitCodes::ERROR);
    }
}
