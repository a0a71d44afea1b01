use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use crate::process::{CommandRunner, Invocation};
use crate::request::BuildRequest;
use crate::resolver::{Clock, DependencyKind, Mirrors, ResolvedPlan};
use crate::scratch::ScratchSpace;
use crate::store::{paths, BuildDir, Layout};

use super::{StageError, StageResult};

/// Everything a stage may read. Built once before the pipeline starts and
/// never mutated by stages.
pub struct BuildContext {
    pub request: BuildRequest,
    pub plan: ResolvedPlan,
    pub layout: Layout,
    pub mirrors: Mirrors,
    pub runner: Arc<dyn CommandRunner>,
    pub scratch: Arc<ScratchSpace>,
    pub clock: Arc<dyn Clock>,
    pub started: Instant,
}

impl BuildContext {
    pub fn new(
        request: BuildRequest,
        plan: ResolvedPlan,
        root: impl Into<PathBuf>,
        mirrors: Mirrors,
        runner: Arc<dyn CommandRunner>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let layout = Layout::new(root, &plan.target);
        let scratch = Arc::new(ScratchSpace::new(runner.clone()));

        Self {
            request,
            plan,
            layout,
            mirrors,
            runner,
            scratch,
            clock,
            started: Instant::now(),
        }
    }

    /// Environment every build invocation runs with: the new toolchain
    /// first on `PATH`.
    pub fn env(&self) -> Vec<(String, String)> {
        let path = std::env::var("PATH").unwrap_or_default();

        vec![
            (
                "PATH".to_string(),
                format!("{}:{}", self.layout.install_bin().display(), path),
            ),
            ("LC_ALL".to_string(), "C".to_string()),
        ]
    }

    /// Installed program, target-prefixed unless this is a native build.
    pub fn tool(&self, name: &str) -> PathBuf {
        if self.plan.native {
            self.layout.install_bin().join(name)
        } else {
            self.layout.tool(name)
        }
    }

    pub fn source(&self, kind: DependencyKind) -> PathBuf {
        self.layout.source_link(kind)
    }

    pub fn build_dir(&self, dir: BuildDir) -> PathBuf {
        self.layout.build_dir(dir)
    }

    pub fn configure(&self, kind: DependencyKind, dir: BuildDir) -> Invocation {
        Invocation::new(self.source(kind).join("configure").display().to_string())
            .current_dir(self.build_dir(dir))
            .envs(&self.env())
    }

    pub fn make(&self, dir: &Path) -> Invocation {
        Invocation::new("make")
            .arg(format!("-j{}", self.plan.jobs))
            .current_dir(dir)
            .envs(&self.env())
    }

    /// `make install` runs serially, some install rules race under `-j`.
    pub fn make_install(&self, dir: &Path) -> Invocation {
        Invocation::new("make")
            .current_dir(dir)
            .envs(&self.env())
    }

    pub async fn exec(&self, stage: &'static str, invocation: Invocation) -> StageResult {
        let exit = self
            .runner
            .run(&invocation)
            .await
            .map_err(|source| StageError::Spawn {
                stage,
                command: invocation.to_string(),
                source,
            })?;

        if !exit.success() {
            return Err(StageError::ToolFailed {
                stage,
                command: invocation.to_string(),
                exit,
            });
        }

        Ok(())
    }

    pub async fn capture(
        &self,
        stage: &'static str,
        invocation: Invocation,
    ) -> Result<String, StageError> {
        let (exit, stdout) =
            self.runner
                .output(&invocation)
                .await
                .map_err(|source| StageError::Spawn {
                    stage,
                    command: invocation.to_string(),
                    source,
                })?;

        if !exit.success() {
            return Err(StageError::ToolFailed {
                stage,
                command: invocation.to_string(),
                exit,
            });
        }

        Ok(stdout)
    }

    /// Fails unless an earlier stage left `path` behind with content.
    pub fn require(&self, stage: &'static str, what: &'static str, path: &Path) -> StageResult {
        if paths::is_populated(path) {
            return Ok(());
        }

        Err(StageError::MissingArtifact {
            stage,
            what,
            path: path.to_path_buf(),
        })
    }
}
