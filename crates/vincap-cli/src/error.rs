// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

use std::fmt;
use std::process::ExitCode;
use vincap::ErrorCategory;

/// CLI-specific error type with exit code mapping
#[derive(Debug)]
pub enum CliError {
    /// Invalid command-line arguments
    InvalidArgs(String),
    /// Device node missing or inaccessible
    DeviceNotFound(String),
    /// Configuration the device or display cannot run
    Unsupported(String),
    /// Device rejected a request or misbehaved while streaming
    DeviceFault(String),
    /// No frame arrived in time
    Timeout(String),
    /// General error from the vincap library
    General(String),
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CliError::InvalidArgs(msg) => write!(f, "Invalid arguments: {}", msg),
            CliError::DeviceNotFound(msg) => write!(f, "Device not found: {}", msg),
            CliError::Unsupported(msg) => write!(f, "Unsupported: {}", msg),
            CliError::DeviceFault(msg) => write!(f, "Device error: {}", msg),
            CliError::Timeout(msg) => write!(f, "Timeout: {}", msg),
            CliError::General(msg) => write!(f, "Error: {}", msg),
        }
    }
}

impl std::error::Error for CliError {}

impl CliError {
    /// Get the exit code for this error
    pub fn exit_code(&self) -> ExitCode {
        match self {
            CliError::InvalidArgs(_) => ExitCode::from(2),
            CliError::DeviceNotFound(_) => ExitCode::from(3),
            CliError::Unsupported(_) => ExitCode::from(4),
            CliError::DeviceFault(_) => ExitCode::from(5),
            CliError::Timeout(_) => ExitCode::from(6),
            CliError::General(_) => ExitCode::from(1),
        }
    }
}

/// Map vincap::Error to CliError with appropriate exit codes
impl From<vincap::Error> for CliError {
    fn from(err: vincap::Error) -> Self {
        use vincap::Error;

        if let Error::Io(io_err) = &err {
            return match io_err.kind() {
                std::io::ErrorKind::NotFound => CliError::DeviceNotFound(io_err.to_string()),
                std::io::ErrorKind::PermissionDenied => {
                    CliError::DeviceNotFound(format!("Permission denied: {}", io_err))
                }
                _ => CliError::General(format!("I/O error: {}", io_err)),
            };
        }

        match err.category() {
            ErrorCategory::Configuration => CliError::Unsupported(err.to_string()),
            ErrorCategory::Device => CliError::DeviceFault(err.to_string()),
            ErrorCategory::Timeout => CliError::Timeout(err.to_string()),
            ErrorCategory::Logic | ErrorCategory::Io => CliError::General(err.to_string()),
        }
    }
}

/// Helper function to convert result to exit code
pub fn result_to_exit_code<T>(result: Result<T, CliError>) -> ExitCode {
    match result {
        Ok(_) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", e);
            e.exit_code()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_exit_codes() {
        assert_eq!(
            CliError::InvalidArgs("test".into()).exit_code(),
            ExitCode::from(2)
        );
        assert_eq!(
            CliError::DeviceNotFound("test".into()).exit_code(),
            ExitCode::from(3)
        );
        assert_eq!(
            CliError::Unsupported("test".into()).exit_code(),
            ExitCode::from(4)
        );
        assert_eq!(
            CliError::DeviceFault("test".into()).exit_code(),
            ExitCode::from(5)
        );
        assert_eq!(
            CliError::Timeout("test".into()).exit_code(),
            ExitCode::from(6)
        );
        assert_eq!(
            CliError::General("test".into()).exit_code(),
            ExitCode::from(1)
        );
    }

    #[test]
    fn test_error_display() {
        let err = CliError::DeviceNotFound("/dev/video9".to_string());
        assert_eq!(format!("{}", err), "Device not found: /dev/video9");
    }

    #[test]
    fn test_library_error_mapping() {
        let missing = std::io::Error::from(std::io::ErrorKind::NotFound);
        assert!(matches!(
            CliError::from(vincap::Error::Io(missing)),
            CliError::DeviceNotFound(_)
        ));
        assert!(matches!(
            CliError::from(vincap::Error::Unsupported("x".into())),
            CliError::Unsupported(_)
        ));
        assert!(matches!(
            CliError::from(vincap::Error::Timeout(Duration::from_secs(3))),
            CliError::Timeout(_)
        ));
        assert!(matches!(
            CliError::from(vincap::Error::AllocationFailed { size: 4096 }),
            CliError::DeviceFault(_)
        ));
    }
}
