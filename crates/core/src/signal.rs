//! Termination signals for spawned services.
//!
//! Services are started as leaders of their own process group, so the whole
//! group is signalled first. Processes that are not group leaders fall back
//! to the single pid. [`terminate_process`] never addresses a group and is
//! used for pids recovered from markers of an older run.

use crate::error::CoreError;
use crate::types::Pid;

/// Result of a successful termination attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalOutcome {
    /// SIGTERM was delivered.
    Delivered,
    /// No such process; it had already exited.
    AlreadyGone,
}

/// Send SIGTERM to `pid` (and its process group when it leads one).
///
/// "No such process" is [`SignalOutcome::AlreadyGone`], not an error. Any
/// other failure (e.g. permission denied) is
/// [`CoreError::SignalDeliveryFailed`].
#[cfg(unix)]
pub fn terminate(pid: Pid) -> Result<SignalOutcome, CoreError> {
    let raw = to_raw_pid(pid)?;

    // SAFETY: kill(2) has no memory-safety preconditions; `-raw` addresses the
    // process group led by `raw`, which is strictly positive here.
    if unsafe { libc::kill(-raw, libc::SIGTERM) } == 0 {
        return Ok(SignalOutcome::Delivered);
    }
    send_sigterm(pid, raw)
}

/// Send SIGTERM to `pid` alone, never to a group.
///
/// Used for pids read from markers of a previous run: the id may have been
/// reused by an unrelated group leader since.
#[cfg(unix)]
pub fn terminate_process(pid: Pid) -> Result<SignalOutcome, CoreError> {
    let raw = to_raw_pid(pid)?;
    send_sigterm(pid, raw)
}

#[cfg(unix)]
fn send_sigterm(pid: Pid, raw: libc::pid_t) -> Result<SignalOutcome, CoreError> {
    // SAFETY: kill(2) has no memory-safety preconditions; `raw` is positive.
    if unsafe { libc::kill(raw, libc::SIGTERM) } == 0 {
        return Ok(SignalOutcome::Delivered);
    }

    let err = std::io::Error::last_os_error();
    if err.raw_os_error() == Some(libc::ESRCH) {
        Ok(SignalOutcome::AlreadyGone)
    } else {
        Err(CoreError::SignalDeliveryFailed {
            pid,
            reason: err.to_string(),
        })
    }
}

#[cfg(not(unix))]
pub fn terminate(pid: Pid) -> Result<SignalOutcome, CoreError> {
    Err(CoreError::SignalDeliveryFailed {
        pid,
        reason: "signal delivery is only supported on Unix".into(),
    })
}

#[cfg(not(unix))]
pub fn terminate_process(pid: Pid) -> Result<SignalOutcome, CoreError> {
    terminate(pid)
}

/// Whether a process with this id currently exists.
#[cfg(unix)]
pub fn is_alive(pid: Pid) -> bool {
    let Ok(raw) = to_raw_pid(pid) else {
        return false;
    };
    // SAFETY: signal 0 performs only the existence and permission check.
    if unsafe { libc::kill(raw, 0) } == 0 {
        return true;
    }
    std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}

#[cfg(not(unix))]
pub fn is_alive(_pid: Pid) -> bool {
    false
}

/// Pids 0 and anything above `pid_t::MAX` would address process groups or
/// wrap around; refuse them.
#[cfg(unix)]
fn to_raw_pid(pid: Pid) -> Result<libc::pid_t, CoreError> {
    match libc::pid_t::try_from(pid) {
        Ok(raw) if raw > 0 => Ok(raw),
        _ => Err(CoreError::SignalDeliveryFailed {
            pid,
            reason: "not a valid process id".into(),
        }),
    }
}
