// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

use std::fmt;
use std::process::ExitCode;

/// CLI-specific error type with exit code mapping
#[derive(Debug)]
pub enum CliError {
    /// Invalid command-line arguments
    InvalidArgs(String),
    /// No decoder device matched the requested driver
    DeviceNotFound(String),
    /// Input media or codec the decoder cannot handle
    Unsupported(String),
    /// A device operation failed
    Device(String),
    /// Any other failure
    General(String),
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CliError::InvalidArgs(msg) => write!(f, "Invalid arguments: {}", msg),
            CliError::DeviceNotFound(msg) => write!(f, "Device not found: {}", msg),
            CliError::Unsupported(msg) => write!(f, "Unsupported input: {}", msg),
            CliError::Device(msg) => write!(f, "Device error: {}", msg),
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
            CliError::Device(_) => ExitCode::from(5),
            CliError::General(_) => ExitCode::from(1),
        }
    }
}

/// Map m2mdec::Error to CliError with appropriate exit codes
impl From<m2mdec::Error> for CliError {
    fn from(err: m2mdec::Error) -> Self {
        use m2mdec::Error;

        match err {
            Error::DeviceNotFound(_) => CliError::DeviceNotFound(err.to_string()),

            Error::UnrecognizedCodec(_) | Error::Demux(_) | Error::FormatRejected { .. } => {
                CliError::Unsupported(err.to_string())
            }

            Error::CapabilityMismatch { .. }
            | Error::Ioctl { .. }
            | Error::Mmap { .. }
            | Error::BuffersUnavailable(_)
            | Error::CaptureFormatUnavailable
            | Error::BufferStateViolation(_) => CliError::Device(err.to_string()),

            Error::InvalidConfig(_) => CliError::InvalidArgs(err.to_string()),

            // Opening the input or the device node
            Error::Io(ref io_err) => match io_err.kind() {
                std::io::ErrorKind::NotFound => CliError::InvalidArgs(err.to_string()),
                std::io::ErrorKind::PermissionDenied => CliError::Device(err.to_string()),
                _ => CliError::General(err.to_string()),
            },

            Error::InvalidState { .. } => CliError::General(err.to_string()),
        }
    }
}

impl From<serde_json::Error> for CliError {
    fn from(err: serde_json::Error) -> Self {
        CliError::General(format!("JSON output failed: {}", err))
    }
}

impl From<std::io::Error> for CliError {
    fn from(err: std::io::Error) -> Self {
        CliError::General(format!("I/O error: {}", err))
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
