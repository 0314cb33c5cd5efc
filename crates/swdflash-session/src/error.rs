//! Session error type

use thiserror::Error;

/// Errors surfaced to the front end
#[derive(Debug, Error)]
pub enum SessionError {
    /// Probe string could not be parsed
    #[error("Invalid parameter format: '{0}' (expected key=value)")]
    InvalidParameter(String),

    /// Probe name not known or not compiled in
    #[error("Unknown probe: {0}")]
    UnknownProbe(String),

    /// Probe parameter has a bad value
    #[error("Invalid value '{value}' for probe parameter '{key}'")]
    InvalidValue {
        /// Parameter name
        key: String,
        /// Rejected value
        value: String,
    },

    /// Emulated target could not be configured
    #[cfg(feature = "sim")]
    #[error(transparent)]
    Sim(#[from] swdflash_sim::SimConfigError),

    /// No driver recognised the target
    #[error("No supported device found")]
    NoDevice,

    /// A driver or target operation failed
    #[error(transparent)]
    Nvm(#[from] swdflash_core::Error),

    /// Range not covered by a single NVM region
    #[error("Range 0x{addr:08x}+0x{len:x} is not inside one NVM region")]
    OutOfRange {
        /// Start address
        addr: u32,
        /// Length in bytes
        len: u32,
    },

    /// Read back differs from what was written
    #[error("Verification failed at 0x{addr:08x}")]
    VerifyFailed {
        /// First differing address
        addr: u32,
    },

    /// No generic or driver command by that name
    #[error("Unknown monitor command: {0}")]
    UnknownCommand(String),
}

/// Result alias for session operations
pub type Result<T> = std::result::Result<T, SessionError>;
