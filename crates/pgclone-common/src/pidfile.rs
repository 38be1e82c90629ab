//! The working directory's advisory lock (`pgcopydb.pid` in spec.md §6): a
//! single-writer guard preventing two runs from sharing one catalog
//! directory concurrently. Stale detection follows the common PID-file
//! idiom — read the recorded pid, send it signal 0, and treat "no such
//! process" as permission to steal the lock rather than fail the run.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::Error;

pub const PID_FILE_NAME: &str = "pgcopydb.pid";

/// Held for the lifetime of a run; removes the pid file on drop so a clean
/// exit never leaves a stale lock behind for the next invocation.
pub struct PidGuard {
    path: PathBuf,
}

impl PidGuard {
    /// Acquires the working directory's lock, creating `dir` if needed.
    /// Fails with [`Error::ConfigMismatch`] when another live process holds
    /// it; a pid file pointing at a dead process is silently replaced.
    pub fn acquire(dir: &Path) -> Result<Self, Error> {
        fs::create_dir_all(dir).map_err(|e| Error::Other(anyhow::anyhow!("create working directory {dir:?}: {e}")))?;
        let path = dir.join(PID_FILE_NAME);

        if let Some(existing) = read_pid(&path)? {
            if process_alive(existing) {
                return Err(Error::ConfigMismatch(format!(
                    "working directory {dir:?} is locked by running process {existing} ({PID_FILE_NAME})"
                )));
            }
            tracing::warn!(stale_pid = existing, path = %path.display(), "removing stale pid file");
        }

        let mut file = fs::File::create(&path)
            .map_err(|e| Error::Other(anyhow::anyhow!("create pid file {path:?}: {e}")))?;
        write!(file, "{}", std::process::id())
            .map_err(|e| Error::Other(anyhow::anyhow!("write pid file {path:?}: {e}")))?;
        Ok(PidGuard { path })
    }
}

impl Drop for PidGuard {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}

fn read_pid(path: &Path) -> Result<Option<i32>, Error> {
    match fs::read_to_string(path) {
        Ok(contents) => Ok(contents.trim().parse::<i32>().ok()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(Error::Other(anyhow::anyhow!("read pid file {path:?}: {e}"))),
    }
}

#[cfg(unix)]
fn process_alive(pid: i32) -> bool {
    // signal 0 performs no-op existence/permission checks without actually
    // signalling the process.
    unsafe { libc::kill(pid, 0) == 0 || std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM) }
}

#[cfg(not(unix))]
fn process_alive(_pid: i32) -> bool {
    // No portable liveness check off Unix; err on the side of treating the
    // lock as held rather than risking two runs sharing a catalog.
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquire_then_release_clears_the_pid_file() {
        let dir = tempfile_dir();
        {
            let _guard = PidGuard::acquire(&dir).unwrap();
            assert!(dir.join(PID_FILE_NAME).exists());
        }
        assert!(!dir.join(PID_FILE_NAME).exists());
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn a_stale_pid_file_does_not_block_a_new_run() {
        let dir = tempfile_dir();
        fs::create_dir_all(&dir).unwrap();
        // pid 1 belongs to init/systemd and we are (almost certainly) not it,
        // but a pid that has definitely exited is the thing under test; pick
        // one far outside any plausible live range instead.
        fs::write(dir.join(PID_FILE_NAME), "999999").unwrap();
        let guard = PidGuard::acquire(&dir);
        assert!(guard.is_ok());
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn a_live_pid_blocks_a_second_acquire() {
        let dir = tempfile_dir();
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join(PID_FILE_NAME), std::process::id().to_string()).unwrap();
        let err = PidGuard::acquire(&dir).unwrap_err();
        assert!(matches!(err, Error::ConfigMismatch(_)));
        let _ = fs::remove_dir_all(&dir);
    }

    fn tempfile_dir() -> PathBuf {
        std::env::temp_dir().join(format!("pgclone-pidfile-test-{}", std::process::id()))
    }
}
