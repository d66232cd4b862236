//! Process liveness probing
//!
//! A crashed or killed refinery leaves a `running` record behind; the probe
//! is how readers find out the recorded pid no longer exists. Behind a trait
//! so tests can script liveness instead of spawning processes.

use std::io;

/// Capability interface for checking and signalling other processes
pub trait ProcessProbe {
    /// Whether a process with this pid currently exists
    ///
    /// Must not require elevated privilege and must not disturb the target.
    fn is_alive(&self, pid: u32) -> bool;

    /// Request graceful termination of the process
    fn interrupt(&self, pid: u32) -> io::Result<()>;
}

/// Probe backed by the host's process table
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemProbe;

#[cfg(unix)]
impl ProcessProbe for SystemProbe {
    fn is_alive(&self, pid: u32) -> bool {
        // A negative pid_t would address a process group, not a process
        let Ok(pid) = libc::pid_t::try_from(pid) else {
            return false;
        };
        if pid == 0 {
            return false;
        }
        // kill(pid, 0) checks existence without sending a signal
        unsafe { libc::kill(pid, 0) == 0 }
    }

    fn interrupt(&self, pid: u32) -> io::Result<()> {
        let pid = libc::pid_t::try_from(pid)
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "pid out of range"))?;
        if pid == 0 {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "pid 0"));
        }
        let rc = unsafe { libc::kill(pid, libc::SIGINT) };
        if rc == 0 {
            Ok(())
        } else {
            Err(io::Error::last_os_error())
        }
    }
}

#[cfg(not(unix))]
impl ProcessProbe for SystemProbe {
    fn is_alive(&self, _pid: u32) -> bool {
        false
    }

    fn interrupt(&self, _pid: u32) -> io::Result<()> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "process signalling is only supported on Unix",
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[cfg(unix)]
    fn test_own_process_is_alive() {
        assert!(SystemProbe.is_alive(std::process::id()));
    }

    #[test]
    fn test_nonexistent_pid_is_dead() {
        // Above the default pid_max on Linux
        assert!(!SystemProbe.is_alive(2_147_483_647));
    }

    #[test]
    fn test_pid_zero_is_dead() {
        assert!(!SystemProbe.is_alive(0));
    }

    #[test]
    fn test_out_of_range_pid_is_dead() {
        assert!(!SystemProbe.is_alive(4_000_000_000));
    }

    #[test]
    #[cfg(unix)]
    fn test_interrupt_nonexistent_pid_fails() {
        assert!(SystemProbe.interrupt(2_147_483_647).is_err());
    }
}
