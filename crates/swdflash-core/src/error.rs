//! Error types for swdflash-core
//!
//! This module provides a no_std compatible error type that is shared by
//! every NVM driver. Failures are never retried inside the drivers: they
//! are surfaced to whoever issued the original operation.

use core::fmt;

/// Core error type - no_std compatible, Copy for efficiency
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    // Link errors
    /// The debug link reported a fault during a target access
    Transport,

    // Controller errors
    /// The lock bit was still set after the unlock key sequence
    UnlockFailed,
    /// The controller did not report the requested mode bits
    ControllerRejected {
        /// Mode bits that were requested
        expected: u32,
        /// Mode bits that read back
        found: u32,
    },
    /// Error flags were set in the status register once the controller went idle
    HardwareError {
        /// Raw status register value
        status: u32,
    },
    /// A boot ROM (IAP) call returned a non-zero status code
    Iap {
        /// Raw status code returned by the ROM
        status: u32,
    },
    /// Allocation of a region or variant record failed
    OutOfMemory,

    // Option byte errors
    /// Option word halves are not complements of each other
    OptionIntegrity {
        /// Address of the option word
        addr: u32,
        /// Value that failed the check
        value: u32,
    },

    // Usage errors
    /// Address is outside of the region or window being operated on
    AddressOutOfBounds,
    /// Operation requires aligned address or size
    InvalidAlignment,
    /// Argument could not be parsed or is out of range
    InvalidArgument,
    /// No NVM region covers the requested address
    NoRegion,
    /// The driver does not implement this capability
    Unsupported,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transport => write!(f, "debug link error"),
            Self::UnlockFailed => write!(f, "unable to unlock NVM controller"),
            Self::ControllerRejected { expected, found } => write!(
                f,
                "controller rejected mode request: expected 0x{:08x}, found 0x{:08x}",
                expected, found
            ),
            Self::HardwareError { status } => {
                write!(f, "NVM controller reported errors (status 0x{:08x})", status)
            }
            Self::Iap { status } => write!(f, "IAP call failed with status {}", status),
            Self::OutOfMemory => write!(f, "out of memory"),
            Self::OptionIntegrity { addr, value } => write!(
                f,
                "option word 0x{:08x} at 0x{:08x} is not complemented",
                value, addr
            ),
            Self::AddressOutOfBounds => write!(f, "address out of bounds"),
            Self::InvalidAlignment => write!(f, "invalid alignment"),
            Self::InvalidArgument => write!(f, "invalid argument"),
            Self::NoRegion => write!(f, "no NVM region at address"),
            Self::Unsupported => write!(f, "operation not supported by this driver"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for Error {}

/// Result type alias using the core Error type
pub type Result<T> = core::result::Result<T, Error>;
