//! Boot ROM IAP calls
//!
//! A call is staged as one [`IapFrame`] at the base of the IAP RAM window:
//! a Thumb breakpoint the ROM returns into, the command block r0 points at
//! and the status/result block r1 points at. Bulk data for a program
//! command is staged right after the frame.

use core::fmt;
use core::mem::size_of;

use swdflash_core::error::{Error, Result};
use swdflash_core::target::{CoreRegister, Deadline, Target, XPSR_THUMB};
use zerocopy::byteorder::little_endian::{U16, U32};
use zerocopy::{FromBytes, FromZeros, Immutable, IntoBytes, KnownLayout};

use crate::wdt;

/// Progress mark period while a ROM call runs
pub const PROGRESS_PERIOD_MS: u32 = 500;

/// Thumb `bkpt #0`
const BKPT: u16 = 0xbe00;
/// Status word value before the ROM has written it
const STATUS_PENDING: u32 = u32::MAX;

/// IAP command codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum IapCommand {
    /// Prepare sectors for erase/program
    Prepare = 50,
    /// Copy RAM to flash
    Program = 51,
    /// Erase sectors
    Erase = 52,
    /// Blank check sectors
    BlankCheck = 53,
    /// Read part id
    PartId = 54,
    /// Read the 128-bit unique id
    ReadUid = 58,
}

/// Status codes the ROM returns
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IapStatus {
    /// Command executed
    Success,
    /// Unknown command code
    InvalidCommand,
    /// Source address not word aligned
    SrcAddrError,
    /// Destination address not properly aligned
    DstAddrError,
    /// Source address not mapped
    SrcAddrNotMapped,
    /// Destination address not mapped
    DstAddrNotMapped,
    /// Byte count not valid for the command
    CountError,
    /// Sector number out of range or end before start
    InvalidSector,
    /// Sector is not blank
    SectorNotBlank,
    /// Prepare command was not issued first
    SectorNotPrepared,
    /// Source and destination differ
    CompareError,
    /// Flash interface busy
    Busy,
    /// Insufficient number of parameters or invalid parameter
    ParamError,
    /// Address not on a word boundary
    AddrError,
    /// Address not mapped
    AddrNotMapped,
    /// Command locked
    CmdLocked,
    /// Unlock code invalid
    InvalidCode,
    /// Invalid baud rate setting
    InvalidBaudRate,
    /// Invalid stop bit setting
    InvalidStopBit,
    /// Code read protection enabled
    CodeReadProtection,
    /// Code the table does not know
    Unknown(u32),
}

impl IapStatus {
    /// Decode a raw status word
    pub fn from_code(code: u32) -> Self {
        match code {
            0 => Self::Success,
            1 => Self::InvalidCommand,
            2 => Self::SrcAddrError,
            3 => Self::DstAddrError,
            4 => Self::SrcAddrNotMapped,
            5 => Self::DstAddrNotMapped,
            6 => Self::CountError,
            7 => Self::InvalidSector,
            8 => Self::SectorNotBlank,
            9 => Self::SectorNotPrepared,
            10 => Self::CompareError,
            11 => Self::Busy,
            12 => Self::ParamError,
            13 => Self::AddrError,
            14 => Self::AddrNotMapped,
            15 => Self::CmdLocked,
            16 => Self::InvalidCode,
            17 => Self::InvalidBaudRate,
            18 => Self::InvalidStopBit,
            19 => Self::CodeReadProtection,
            other => Self::Unknown(other),
        }
    }

    /// Name as given in the user manual
    pub fn name(self) -> &'static str {
        match self {
            Self::Success => "CMD_SUCCESS",
            Self::InvalidCommand => "INVALID_COMMAND",
            Self::SrcAddrError => "SRC_ADDR_ERROR",
            Self::DstAddrError => "DST_ADDR_ERROR",
            Self::SrcAddrNotMapped => "SRC_ADDR_NOT_MAPPED",
            Self::DstAddrNotMapped => "DST_ADDR_NOT_MAPPED",
            Self::CountError => "COUNT_ERROR",
            Self::InvalidSector => "INVALID_SECTOR",
            Self::SectorNotBlank => "SECTOR_NOT_BLANK",
            Self::SectorNotPrepared => "SECTOR_NOT_PREPARED_FOR_WRITE_OPERATION",
            Self::CompareError => "COMPARE_ERROR",
            Self::Busy => "BUSY",
            Self::ParamError => "PARAM_ERROR",
            Self::AddrError => "ADDR_ERROR",
            Self::AddrNotMapped => "ADDR_NOT_MAPPED",
            Self::CmdLocked => "CMD_LOCKED",
            Self::InvalidCode => "INVALID_CODE",
            Self::InvalidBaudRate => "INVALID_BAUD_RATE",
            Self::InvalidStopBit => "INVALID_STOP_BIT",
            Self::CodeReadProtection => "CODE_READ_PROTECTION_ENABLED",
            Self::Unknown(_) => "UNKNOWN",
        }
    }
}

impl fmt::Display for IapStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unknown(code) => write!(f, "unknown IAP status {}", code),
            other => f.write_str(other.name()),
        }
    }
}

/// Decode the status carried by an [`Error::Iap`]
pub fn error_status(error: &Error) -> Option<IapStatus> {
    match error {
        Error::Iap { status } => Some(IapStatus::from_code(*status)),
        _ => None,
    }
}

/// Status and result words as the ROM leaves them
#[repr(C)]
#[derive(Debug, Clone, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct IapReturn {
    status: U32,
    result: [U32; 4],
}

/// Call frame staged at the base of the IAP RAM window
#[repr(C)]
#[derive(Debug, Clone, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct IapFrame {
    opcode: U16,
    pad: U16,
    command: U32,
    params: [U32; 5],
    ret: IapReturn,
}

/// Size of the staged frame
pub const FRAME_SIZE: u32 = size_of::<IapFrame>() as u32;

const COMMAND_OFFSET: u32 = 4;
const RETURN_OFFSET: u32 = 28;

impl IapFrame {
    /// Frame for `command`, unused parameters zeroed
    pub fn new(command: IapCommand, params: &[u32]) -> Result<Self> {
        let mut frame = Self::new_zeroed();
        if params.len() > frame.params.len() {
            return Err(Error::InvalidArgument);
        }
        frame.opcode = U16::new(BKPT);
        frame.command = U32::new(command as u32);
        for (slot, value) in frame.params.iter_mut().zip(params) {
            *slot = U32::new(*value);
        }
        frame.ret.status = U32::new(STATUS_PENDING);
        Ok(frame)
    }
}

/// Where the boot ROM lives and which RAM it may use
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Iap {
    /// ROM entry (Thumb address)
    pub entry: u32,
    /// Base of the RAM window holding the frame and staged data
    pub ram: u32,
    /// Initial stack pointer, top of the RAM window
    pub msp: u32,
}

impl Iap {
    /// Address bulk data is staged at
    pub fn staging(&self) -> u32 {
        self.ram + FRAME_SIZE
    }

    /// Run one ROM command and return its result words
    ///
    /// The core is resumed at the ROM entry and polled until it hits the
    /// breakpoint in the frame. The watchdog is fed on every poll.
    pub fn call<T: Target + ?Sized>(
        &self,
        target: &mut T,
        command: IapCommand,
        params: &[u32],
    ) -> Result<[u32; 4]> {
        let frame = IapFrame::new(command, params)?;
        target.write_bytes(self.ram, frame.as_bytes())?;

        target.write_core_reg(CoreRegister::R(0), self.ram + COMMAND_OFFSET)?;
        target.write_core_reg(CoreRegister::R(1), self.ram + RETURN_OFFSET)?;
        target.write_core_reg(CoreRegister::Msp, self.msp)?;
        target.write_core_reg(CoreRegister::Lr, self.ram | 1)?;
        target.write_core_reg(CoreRegister::Pc, self.entry)?;
        target.write_core_reg(CoreRegister::Xpsr, XPSR_THUMB)?;

        target.halt_resume(false)?;
        let mut deadline = Deadline::start(target, PROGRESS_PERIOD_MS);
        while !target.halt_poll()? {
            if target.check_error() {
                return Err(Error::Transport);
            }
            wdt::kick(target)?;
            deadline.tick(target);
        }

        let mut ret = IapReturn::new_zeroed();
        target.read_bytes(self.ram + RETURN_OFFSET, ret.as_mut_bytes())?;
        let status = ret.status.get();
        if status != 0 {
            log::debug!("IAP {:?} failed: {}", command, IapStatus::from_code(status));
            return Err(Error::Iap { status });
        }
        Ok(ret.result.map(|word| word.get()))
    }
}
