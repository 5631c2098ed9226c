//! Pid lockfile
//!
//! The storage root is process-owned. `<root>/.lock` holds the owning pid;
//! startup refuses to run while another live process holds the lock, and
//! reclaims locks left behind by dead pids where liveness can be checked.

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{EngineError, Result};

/// Held pid lock on a storage root. Removed on drop.
#[derive(Debug)]
pub struct Lockfile {
    path: PathBuf,
    pid: u32,
}

impl Lockfile {
    /// Acquire `<root>/.lock`, failing with [`EngineError::Locked`] when a
    /// live process already holds it.
    pub fn acquire(root: &Path) -> Result<Self> {
        let path = root.join(".lock");
        let pid = std::process::id();

        if let Ok(existing) = fs::read_to_string(&path) {
            if let Ok(holder) = existing.trim().parse::<u32>() {
                if holder != pid && pid_is_live(holder) {
                    return Err(EngineError::Locked { pid: holder, path });
                }
                if holder != pid {
                    tracing::warn!(holder, "reclaiming stale lockfile from dead process");
                }
            } else {
                tracing::warn!(path = %path.display(), "unparseable lockfile, reclaiming");
            }
        }

        fs::write(&path, format!("{pid}\n"))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let _ = fs::set_permissions(&path, fs::Permissions::from_mode(0o600));
        }
        Ok(Self { path, pid })
    }

    /// The lockfile path.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for Lockfile {
    fn drop(&mut self) {
        // Only remove the file if it still records our pid.
        if let Ok(contents) = fs::read_to_string(&self.path) {
            if contents.trim().parse::<u32>() == Ok(self.pid) {
                let _ = fs::remove_file(&self.path);
            }
        }
    }
}

/// Best-effort liveness probe. Where liveness cannot be determined the pid
/// is assumed live, so a questionable lock is never reclaimed.
fn pid_is_live(pid: u32) -> bool {
    #[cfg(target_os = "linux")]
    {
        Path::new(&format!("/proc/{pid}")).exists()
    }
    #[cfg(not(target_os = "linux"))]
    {
        let _ = pid;
        true
    }
}
