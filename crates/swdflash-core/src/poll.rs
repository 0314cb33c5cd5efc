//! Busy/error poller
//!
//! Spins on a controller status register until its busy bit clears. The
//! only way out of the loop early is a link fault: there is no operation
//! level timeout, a [`Deadline`] merely paces progress output.

use crate::error::{Error, Result};
use crate::target::{Deadline, Target};

/// Description of a controller status register
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusRegister {
    /// Address of the status register
    pub addr: u32,
    /// Bit that is set while an operation is in flight
    pub busy: u32,
    /// Bits that flag a failed operation
    pub error_mask: u32,
}

/// Wait for the controller to go idle and report the outcome
///
/// Succeeds only if no link error occurred and none of the error bits are
/// set in a status read taken after busy cleared. The final read decides,
/// so an error flag that was already latched before the operation started
/// fails the wait even if busy was never observed.
pub fn busy_wait<T: Target + ?Sized>(
    target: &mut T,
    status: &StatusRegister,
    mut deadline: Option<&mut Deadline>,
) -> Result<()> {
    while target.read32(status.addr)? & status.busy != 0 {
        if target.check_error() {
            return Err(Error::Transport);
        }
        if let Some(deadline) = deadline.as_mut() {
            deadline.tick(target);
        }
    }

    let value = target.read32(status.addr)?;
    if target.check_error() {
        return Err(Error::Transport);
    }
    if value & status.error_mask != 0 {
        log::debug!("NVM status 0x{:08x} has error bits set", value);
        return Err(Error::HardwareError { status: value });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::target::CoreRegister;

    const SR: StatusRegister = StatusRegister {
        addr: 0x4002_2018,
        busy: 1 << 0,
        error_mask: 1 << 8,
    };

    /// Status register that reports busy for a number of reads
    struct ScriptedStatus {
        busy_reads: u32,
        final_status: u32,
        link_error_after: Option<u32>,
        reads: u32,
        clock: u64,
        progress: u32,
    }

    impl ScriptedStatus {
        fn new(busy_reads: u32, final_status: u32) -> Self {
            Self {
                busy_reads,
                final_status,
                link_error_after: None,
                reads: 0,
                clock: 0,
                progress: 0,
            }
        }
    }

    impl Target for ScriptedStatus {
        fn read32(&mut self, _addr: u32) -> Result<u32> {
            self.reads += 1;
            self.clock += 100;
            if self.reads <= self.busy_reads {
                Ok(self.final_status | 1)
            } else {
                Ok(self.final_status)
            }
        }
        fn read16(&mut self, _addr: u32) -> Result<u16> {
            Ok(0)
        }
        fn read_bytes(&mut self, _addr: u32, _buf: &mut [u8]) -> Result<()> {
            Ok(())
        }
        fn write32(&mut self, _addr: u32, _value: u32) -> Result<()> {
            Ok(())
        }
        fn write16(&mut self, _addr: u32, _value: u16) -> Result<()> {
            Ok(())
        }
        fn write8(&mut self, _addr: u32, _value: u8) -> Result<()> {
            Ok(())
        }
        fn write_bytes(&mut self, _addr: u32, _data: &[u8]) -> Result<()> {
            Ok(())
        }
        fn check_error(&mut self) -> bool {
            matches!(self.link_error_after, Some(n) if self.reads >= n)
        }
        fn time_ms(&self) -> u64 {
            self.clock
        }
        fn print_progress(&mut self) {
            self.progress += 1;
        }
        fn write_core_reg(&mut self, _reg: CoreRegister, _value: u32) -> Result<()> {
            Ok(())
        }
        fn read_core_reg(&mut self, _reg: CoreRegister) -> Result<u32> {
            Ok(0)
        }
        fn halt_resume(&mut self, _step: bool) -> Result<()> {
            Ok(())
        }
        fn halt_poll(&mut self) -> Result<bool> {
            Ok(true)
        }
        fn reset(&mut self) -> Result<()> {
            Ok(())
        }
        fn attach(&mut self) -> Result<()> {
            Ok(())
        }
        fn detach(&mut self) {}
    }

    #[test]
    fn test_idle_controller_succeeds() {
        let mut target = ScriptedStatus::new(0, 0);
        assert_eq!(busy_wait(&mut target, &SR, None), Ok(()));
        assert_eq!(target.reads, 2);
    }

    #[test]
    fn test_error_flag_without_busy_fails() {
        let mut target = ScriptedStatus::new(0, 1 << 8);
        assert_eq!(
            busy_wait(&mut target, &SR, None),
            Err(Error::HardwareError { status: 1 << 8 })
        );
    }

    #[test]
    fn test_link_error_aborts_loop() {
        let mut target = ScriptedStatus::new(u32::MAX, 0);
        target.link_error_after = Some(3);
        assert_eq!(busy_wait(&mut target, &SR, None), Err(Error::Transport));
        assert_eq!(target.reads, 3);
    }

    #[test]
    fn test_deadline_only_paces_progress() {
        let mut target = ScriptedStatus::new(20, 0);
        let mut deadline = Deadline::start(&target, 500);
        assert_eq!(busy_wait(&mut target, &SR, Some(&mut deadline)), Ok(()));
        // 20 busy reads at 100 ms each, one mark per 500 ms
        assert_eq!(target.progress, 4);

        let mut quiet = ScriptedStatus::new(20, 0);
        assert_eq!(busy_wait(&mut quiet, &SR, None), Ok(()));
        assert_eq!(quiet.progress, 0);
    }
}
