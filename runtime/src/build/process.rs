//! Process identity and liveness.

/// Answers which process we are and whether another one still exists.
///
/// Build locks are keyed on process IDs, so swapping this out lets tests
/// play several builders, or a crashed one, inside a single process.
pub trait ProcessTable: Send + Sync {
    fn current_pid(&self) -> u32;

    fn is_alive(&self, pid: u32) -> bool;
}

/// The real process table of the host.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemProcesses;

impl ProcessTable for SystemProcesses {
    fn current_pid(&self) -> u32 {
        std::process::id()
    }

    #[cfg(unix)]
    fn is_alive(&self, pid: u32) -> bool {
        if pid == 0 || pid > i32::MAX as u32 {
            return false;
        }
        // Signal 0 checks existence only. EPERM means it exists but belongs
        // to someone else.
        let rc = unsafe { libc::kill(pid as i32, 0) };
        rc == 0 || std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
    }

    #[cfg(not(unix))]
    fn is_alive(&self, pid: u32) -> bool {
        pid == std::process::id()
    }
}
