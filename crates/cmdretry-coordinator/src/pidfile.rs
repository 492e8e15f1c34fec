//! PID file lifecycle: written once on start (mode `0644`), removed on
//! clean shutdown. A stale PID left behind by a crashed process is
//! detected by signalling `0` to the recorded PID (spec §5).

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

/// Mode required for the PID file by spec §6.
const PID_FILE_MODE: u32 = 0o644;

/// Errors raised while managing the PID file.
#[derive(Debug, thiserror::Error)]
pub enum PidFileError {
    /// A live process is already holding the PID file.
    #[error("coordinator already running with pid {pid} (pid file {path})")]
    AlreadyRunning {
        /// The running process's PID.
        pid: i32,
        /// The PID file's path.
        path: String,
    },
    /// The PID file could not be read or written.
    #[error("pid file I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// An active PID file, removed when dropped... except `Drop` can't run
/// async cleanup, so callers should call [`PidFile::remove`] explicitly on
/// clean shutdown; `Drop` is a best-effort fallback.
pub struct PidFile {
    path: PathBuf,
}

impl PidFile {
    /// Checks for a live process already holding `path`, and if none is
    /// found, writes the current PID there with mode `0644`.
    pub fn create(path: &Path) -> Result<Self, PidFileError> {
        if let Some(existing_pid) = read_pid(path)? {
            if process_is_alive(existing_pid) {
                return Err(PidFileError::AlreadyRunning {
                    pid: existing_pid,
                    path: path.display().to_string(),
                });
            }
        }

        let pid = std::process::id();
        std::fs::write(path, pid.to_string())?;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(PID_FILE_MODE))?;

        Ok(Self { path: path.to_path_buf() })
    }

    /// Removes the PID file. Idempotent.
    pub fn remove(&self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

impl Drop for PidFile {
    fn drop(&mut self) {
        self.remove();
    }
}

fn read_pid(path: &Path) -> Result<Option<i32>, std::io::Error> {
    match std::fs::read_to_string(path) {
        Ok(contents) => Ok(contents.trim().parse::<i32>().ok()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err),
    }
}

/// Signals `0` to `pid`: delivers no signal, but fails with `ESRCH` if
/// the process doesn't exist.
fn process_is_alive(pid: i32) -> bool {
    unsafe { libc::kill(pid, 0) == 0 }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_writes_pid_with_mode_0644() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.pid");
        let pid_file = PidFile::create(&path).unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents.trim(), std::process::id().to_string());

        let metadata = std::fs::metadata(&path).unwrap();
        assert_eq!(metadata.permissions().mode() & 0o777, 0o644);

        pid_file.remove();
        assert!(!path.exists());
    }

    #[test]
    fn create_over_dead_pid_succeeds() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stale.pid");
        // PID 1 is init/another process we don't own in a container; use an
        // implausibly large PID instead, which kill(2) will report ESRCH for.
        std::fs::write(&path, "2147483647").unwrap();
        let result = PidFile::create(&path);
        assert!(result.is_ok());
    }

    #[test]
    fn create_over_live_pid_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("live.pid");
        std::fs::write(&path, std::process::id().to_string()).unwrap();
        let result = PidFile::create(&path);
        assert!(matches!(result, Err(PidFileError::AlreadyRunning { .. })));
    }
}
