//! RAM-backed build directories.
//!
//! Every successful mount is recorded so it can be released on any exit path:
//! [`ScratchSpace::release`] is awaited by [`crate::pipeline::execute`] after
//! the pipeline finishes, fails or is cancelled, and `Drop` unmounts anything
//! still left.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::{info, warn};

use crate::process::{CommandRunner, Exit, Invocation};

pub fn mount_invocation(dir: &Path) -> Invocation {
    Invocation::new("sudo").args([
        "mount".to_string(),
        "-t".to_string(),
        "tmpfs".to_string(),
        "-o".to_string(),
        "rw".to_string(),
        "tmpfs".to_string(),
        dir.display().to_string(),
    ])
    .foreground()
}

pub fn umount_invocation(dir: &Path) -> Invocation {
    Invocation::new("sudo")
        .args(["umount".to_string(), dir.display().to_string()])
        .foreground()
}

/// Detaches the mount even while something still has files open in it.
pub fn lazy_umount_invocation(dir: &Path) -> Invocation {
    Invocation::new("sudo")
        .args([
            "umount".to_string(),
            "--lazy".to_string(),
            dir.display().to_string(),
        ])
        .foreground()
}

/// Whether `dir` appears as a mount point in `/proc/self/mounts`.
pub fn is_mount_point(dir: &Path) -> bool {
    let Ok(mounts) = std::fs::read_to_string("/proc/self/mounts") else {
        return false;
    };

    let wanted = dir.canonicalize().unwrap_or_else(|_| dir.to_path_buf());

    mounts
        .lines()
        .filter_map(|line| line.split_whitespace().nth(1))
        .any(|point| Path::new(point) == wanted)
}

#[derive(Debug, thiserror::Error)]
pub enum ScratchError {
    #[error("could not run `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: io::Error,
    },

    #[error("`{command}` failed with {exit}")]
    Failed { command: String, exit: Exit },
}

pub struct ScratchSpace {
    runner: Arc<dyn CommandRunner>,
    mounted: Mutex<Vec<PathBuf>>,
}

impl ScratchSpace {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            runner,
            mounted: Mutex::new(vec![]),
        }
    }

    fn mounted(&self) -> MutexGuard<'_, Vec<PathBuf>> {
        // a poisoned list is still the list of what is mounted
        self.mounted.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn active(&self) -> Vec<PathBuf> {
        self.mounted().clone()
    }

    async fn exec(&self, invocation: Invocation) -> Result<(), ScratchError> {
        let exit = self
            .runner
            .run(&invocation)
            .await
            .map_err(|source| ScratchError::Spawn {
                command: invocation.to_string(),
                source,
            })?;

        if !exit.success() {
            return Err(ScratchError::Failed {
                command: invocation.to_string(),
                exit,
            });
        }

        Ok(())
    }

    pub async fn mount(&self, dir: &Path) -> Result<(), ScratchError> {
        self.exec(mount_invocation(dir)).await?;

        info!("mounted tmpfs: {}", dir.display());

        self.mounted().push(dir.to_path_buf());

        Ok(())
    }

    /// Unmounts everything recorded, newest first, detaching lazily when a
    /// plain unmount fails. Mounts that survive both are logged and
    /// returned; the list is emptied either way.
    pub async fn release(&self) -> Vec<(PathBuf, ScratchError)> {
        let dirs: Vec<PathBuf> = self.mounted().drain(..).rev().collect();

        let mut failures = vec![];

        for dir in dirs {
            let Err(busy) = self.exec(umount_invocation(&dir)).await else {
                info!("unmounted tmpfs: {}", dir.display());
                continue;
            };

            warn!("failed to unmount {}: {}, detaching it", dir.display(), busy);

            match self.exec(lazy_umount_invocation(&dir)).await {
                Ok(()) => info!("detached tmpfs: {}", dir.display()),
                Err(err) => {
                    warn!("failed to detach {}: {}", dir.display(), err);
                    failures.push((dir, err));
                }
            }
        }

        failures
    }

    /// Best-effort unmount of a mount left behind by an earlier run.
    pub async fn release_stale(&self, dir: &Path) {
        if !is_mount_point(dir) {
            return;
        }

        if let Err(err) = self.exec(umount_invocation(dir)).await {
            warn!("stale mount {} was not released: {}", dir.display(), err);
        }
    }
}

impl Drop for ScratchSpace {
    fn drop(&mut self) {
        let dirs = std::mem::take(self.mounted.get_mut().unwrap_or_else(|e| e.into_inner()));

        let unmounted = |lazy: &[&str], dir: &Path| {
            std::process::Command::new("sudo")
                .arg("umount")
                .args(lazy)
                .arg(dir)
                .status()
                .is_ok_and(|status| status.success())
        };

        for dir in dirs.iter().rev() {
            if !unmounted(&[], dir) && !unmounted(&["--lazy"], dir) {
                warn!("tmpfs still mounted: {}", dir.display());
            }
        }
    }
}
