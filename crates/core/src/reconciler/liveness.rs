//! Process liveness checks.

/// Answers whether a worker process still exists.
///
/// A pid that was reused by an unrelated process is reported alive; the
/// ticket then stays claimed until that process exits too.
pub trait ProcessLiveness: Send + Sync {
    fn is_alive(&self, pid: u32) -> bool;
}

/// Liveness from the operating system's process table.
#[derive(Debug, Clone, Copy, Default)]
pub struct OsProcessLiveness;

#[cfg(unix)]
impl ProcessLiveness for OsProcessLiveness {
    fn is_alive(&self, pid: u32) -> bool {
        // pid 0 addresses our own process group; anything above i32::MAX
        // would wrap into a negative pid and address a group as well.
        if pid == 0 || pid > i32::MAX as u32 {
            return false;
        }

        // Signal 0 only performs the existence and permission checks.
        let rc = unsafe { libc::kill(pid as libc::pid_t, 0) };
        if rc == 0 {
            return true;
        }
        std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
    }
}

#[cfg(not(unix))]
impl ProcessLiveness for OsProcessLiveness {
    fn is_alive(&self, _pid: u32) -> bool {
        true
    }
}
