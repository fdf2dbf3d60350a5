//! The gateway single-instance guard.
//!
//! A JSON lock file at a stable path, written with create-new (O_EXCL)
//! semantics so that two processes racing to acquire it can never both
//! win. Liveness is checked by signalling the recorded pid with a
//! zero-signal; where the platform exposes a process-start identifier
//! (Linux's `/proc/<pid>/stat`), a mismatch against the recorded value
//! catches PID recycling that a bare pid-alive check would miss.

use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::Utc;
use nix::sys::signal::kill;
use nix::unistd::Pid;
use serde::{Deserialize, Serialize};

use crate::error::GatewayError;

/// The persisted shape of the lock file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LockRecord {
    pub pid: u32,
    pub created_at: String,
    pub http_port: Option<u16>,
    /// Process-start identifier, where the platform supports one. Used to
    /// detect a recycled pid: a live process with a matching pid but a
    /// different start time is not the process that wrote this record.
    pub start_time: Option<u64>,
}

impl LockRecord {
    fn for_this_process(http_port: Option<u16>) -> Self {
        let pid = std::process::id();
        Self {
            pid,
            created_at: Utc::now().to_rfc3339(),
            http_port,
            start_time: read_start_time(pid),
        }
    }
}

/// A held lock. Dropping this without calling [`GatewayLock::release`]
/// leaves the file on disk; always release explicitly during shutdown.
pub struct GatewayLock {
    path: PathBuf,
}

impl GatewayLock {
    /// Release the lock by deleting the file.
    pub fn release(self) -> Result<(), GatewayError> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(GatewayError::LockIo {
                reason: format!("failed to remove lock file {}: {e}", self.path.display()),
            }),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Acquire the gateway lock at `path`.
///
/// `allow_multiple` short-circuits to `Ok(None)` (matching
/// `DECA_ALLOW_MULTI_GATEWAY=1` / an explicit override), meaning the
/// caller runs unguarded.
pub fn acquire(path: &Path, http_port: Option<u16>, allow_multiple: bool) -> Result<Option<GatewayLock>, GatewayError> {
    if allow_multiple {
        tracing::warn!("gateway lock skipped (allow_multiple set)");
        return Ok(None);
    }

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| GatewayError::LockIo {
            reason: format!("failed to create lock directory {}: {e}", parent.display()),
        })?;
    }

    if path.exists() {
        match read_record(path) {
            Ok(existing) => {
                if is_live(&existing) {
                    return Err(GatewayError::LockHeld {
                        pid: existing.pid,
                        created_at: existing.created_at,
                        http_port: existing.http_port,
                    });
                }
                tracing::info!(pid = existing.pid, "removing stale gateway lock");
                remove_stale(path)?;
            }
            Err(_) => {
                // Unreadable/corrupt lock file: treat as stale rather than
                // blocking startup forever on a file we can't interpret.
                tracing::warn!(path = %path.display(), "gateway lock file unreadable, treating as stale");
                remove_stale(path)?;
            }
        }
    }

    let record = LockRecord::for_this_process(http_port);
    write_new(path, &record)?;

    Ok(Some(GatewayLock { path: path.to_path_buf() }))
}

/// Check whether a gateway is currently running, without acquiring.
/// Returns the live record if one is found; `None` if the file is
/// absent or its recorded process is dead.
pub fn check_gateway_running(path: &Path) -> Option<LockRecord> {
    let record = read_record(path).ok()?;
    is_live(&record).then_some(record)
}

fn write_new(path: &Path, record: &LockRecord) -> Result<(), GatewayError> {
    let mut file = std::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .map_err(|e| {
            if e.kind() == std::io::ErrorKind::AlreadyExists {
                match read_record(path) {
                    Ok(winner) => GatewayError::LockHeld {
                        pid: winner.pid,
                        created_at: winner.created_at,
                        http_port: winner.http_port,
                    },
                    Err(_) => GatewayError::LockIo {
                        reason: "lock file appeared mid-acquire and could not be read".to_string(),
                    },
                }
            } else {
                GatewayError::LockIo {
                    reason: format!("failed to create lock file {}: {e}", path.display()),
                }
            }
        })?;

    let payload = serde_json::to_vec_pretty(record).map_err(|e| GatewayError::LockIo {
        reason: format!("failed to serialize lock record: {e}"),
    })?;
    file.write_all(&payload).map_err(|e| GatewayError::LockIo {
        reason: format!("failed to write lock file {}: {e}", path.display()),
    })
}

fn read_record(path: &Path) -> Result<LockRecord, GatewayError> {
    let content = std::fs::read_to_string(path).map_err(|e| GatewayError::LockIo {
        reason: format!("failed to read lock file {}: {e}", path.display()),
    })?;
    serde_json::from_str(&content).map_err(|e| GatewayError::LockIo {
        reason: format!("malformed lock file {}: {e}", path.display()),
    })
}

fn remove_stale(path: &Path) -> Result<(), GatewayError> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(GatewayError::LockIo {
            reason: format!("failed to remove stale lock file {}: {e}", path.display()),
        }),
    }
}

/// True if the recorded pid names a live process, and (where recorded)
/// its start-time identifier still matches — i.e. the pid hasn't been
/// recycled by an unrelated process.
fn is_live(record: &LockRecord) -> bool {
    if !pid_alive(record.pid) {
        return false;
    }
    match record.start_time {
        Some(recorded) => match read_start_time(record.pid) {
            Some(current) => current == recorded,
            // Platform doesn't support reading start time for this pid
            // right now (it may have just exited); fall back to the
            // pid-alive result above.
            None => true,
        },
        None => true,
    }
}

fn pid_alive(pid: u32) -> bool {
    kill(Pid::from_raw(pid as i32), None).is_ok()
}

/// Read `/proc/<pid>/stat`'s start-time field (token 22), the Linux
/// process-start identifier used to detect pid recycling. `None` on
/// platforms without `/proc` or if the process has already exited.
#[cfg(target_os = "linux")]
fn read_start_time(pid: u32) -> Option<u64> {
    let stat = std::fs::read_to_string(format!("/proc/{pid}/stat")).ok()?;
    // Fields after the parenthesized comm name can itself contain spaces
    // and parens, so split on the last ')' rather than whitespace.
    let after_comm = stat.rsplit_once(')')?.1;
    after_comm.split_whitespace().nth(19)?.parse().ok()
}

#[cfg(not(target_os = "linux"))]
fn read_start_time(_pid: u32) -> Option<u64> {
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquire_then_check_returns_the_written_record() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gateway.lock");

        let lock = acquire(&path, Some(8787), false).unwrap().unwrap();
        let running = check_gateway_running(&path).unwrap();
        assert_eq!(running.pid, std::process::id());
        assert_eq!(running.http_port, Some(8787));

        lock.release().unwrap();
        assert!(check_gateway_running(&path).is_none());
    }

    #[test]
    fn allow_multiple_skips_the_lock_entirely() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gateway.lock");
        let lock = acquire(&path, None, true).unwrap();
        assert!(lock.is_none());
        assert!(!path.exists());
    }

    #[test]
    fn stale_lock_with_dead_pid_is_removed_and_reacquired() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gateway.lock");

        // A pid vanishingly unlikely to be alive on any test host.
        let stale = LockRecord {
            pid: 999_999,
            created_at: Utc::now().to_rfc3339(),
            http_port: None,
            start_time: None,
        };
        std::fs::write(&path, serde_json::to_vec_pretty(&stale).unwrap()).unwrap();

        let lock = acquire(&path, None, false).unwrap().unwrap();
        let running = check_gateway_running(&path).unwrap();
        assert_eq!(running.pid, std::process::id());
        lock.release().unwrap();
    }

    #[test]
    fn acquire_twice_in_a_row_raises_lock_held_on_the_second() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gateway.lock");

        let first = acquire(&path, None, false).unwrap();
        assert!(first.is_some());

        let second = acquire(&path, None, false);
        assert!(matches!(second, Err(GatewayError::LockHeld { .. })));

        first.unwrap().release().unwrap();
    }

    #[test]
    fn corrupt_lock_file_is_treated_as_stale() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gateway.lock");
        std::fs::write(&path, b"not json").unwrap();

        let lock = acquire(&path, None, false).unwrap();
        assert!(lock.is_some());
        lock.unwrap().release().unwrap();
    }
}
