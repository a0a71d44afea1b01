use std::future::Future;
use std::io;
use std::path::PathBuf;
use std::time::Instant;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{info_span, warn, Instrument};

use crate::log;
use crate::process::Exit;

mod context;
pub mod stages;

pub use context::BuildContext;

#[derive(Debug, Error)]
pub enum StageError {
    #[error("[{stage}] required tool `{tool}` was not found on PATH")]
    MissingTool { stage: &'static str, tool: String },

    #[error("[{stage}] missing {what}: {}", .path.display())]
    MissingArtifact {
        stage: &'static str,
        what: &'static str,
        path: PathBuf,
    },

    #[error("[{stage}] `{command}` failed with {exit}")]
    ToolFailed {
        stage: &'static str,
        command: String,
        exit: Exit,
    },

    #[error("[{stage}] could not run `{command}`: {source}")]
    Spawn {
        stage: &'static str,
        command: String,
        #[source]
        source: io::Error,
    },

    #[error("[{stage}] {} could not be removed: {message}", .path.display())]
    Cleanup {
        stage: &'static str,
        path: PathBuf,
        message: String,
    },

    #[error("[{stage}] {patch} does not apply cleanly to {}", .tree.display())]
    PatchRejected {
        stage: &'static str,
        patch: String,
        tree: PathBuf,
    },

    #[error("[{stage}] {dependency}: {message}")]
    Fetch {
        stage: &'static str,
        dependency: String,
        message: String,
    },

    #[error("[{stage}] {context}: {source}")]
    Io {
        stage: &'static str,
        context: String,
        #[source]
        source: io::Error,
    },
}

impl StageError {
    pub fn stage(&self) -> &'static str {
        match self {
            StageError::MissingTool { stage, .. }
            | StageError::MissingArtifact { stage, .. }
            | StageError::ToolFailed { stage, .. }
            | StageError::Spawn { stage, .. }
            | StageError::Cleanup { stage, .. }
            | StageError::PatchRejected { stage, .. }
            | StageError::Fetch { stage, .. }
            | StageError::Io { stage, .. } => stage,
        }
    }

    pub fn io(stage: &'static str, context: impl Into<String>) -> impl FnOnce(io::Error) -> Self {
        let context = context.into();
        move |source| StageError::Io {
            stage,
            context,
            source,
        }
    }
}

pub type StageResult = Result<(), StageError>;

#[async_trait]
pub trait Stage: Send + Sync {
    fn name(&self) -> &'static str;

    /// Stages that do not apply to a build are reported as skipped.
    fn applies(&self, _ctx: &BuildContext) -> bool {
        true
    }

    async fn run(&self, ctx: &BuildContext) -> StageResult;
}

/// Runs stages strictly in order, stopping at the first failure.
pub struct Pipeline {
    stages: Vec<Box<dyn Stage>>,
}

impl Pipeline {
    pub fn new(stages: Vec<Box<dyn Stage>>) -> Self {
        Self { stages }
    }

    pub fn standard() -> Self {
        Self::new(stages::standard())
    }

    #[cfg(test)]
    pub fn names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|stage| stage.name()).collect()
    }

    pub async fn run(&self, ctx: &BuildContext) -> StageResult {
        for stage in &self.stages {
            let name = stage.name();

            if !stage.applies(ctx) {
                log::print_stage_skipped(name);
                continue;
            }

            log::print_stage_start(name);

            let started = Instant::now();

            match stage.run(ctx).instrument(info_span!("stage", name)).await {
                Ok(()) => log::print_stage_done(name, started.elapsed()),
                Err(err) => {
                    log::print_stage_failed(name, &err.to_string());
                    return Err(err);
                }
            }
        }

        Ok(())
    }
}

/// How a build that did not fail came to an end.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Outcome {
    Finished,
    Cancelled,
}

#[derive(Debug, Error)]
pub enum BuildError {
    #[error(transparent)]
    Stage(#[from] StageError),

    #[error(
        "tmpfs still mounted after the build: {}",
        .0.iter().map(|dir| dir.display().to_string()).collect::<Vec<_>>().join(", ")
    )]
    Mounted(Vec<PathBuf>),
}

/// Process exit code for the result of [`execute`].
pub fn exit_code(result: &Result<Outcome, BuildError>) -> u8 {
    match result {
        Ok(Outcome::Finished) => 0,
        Ok(Outcome::Cancelled) => 130,
        Err(_) => 1,
    }
}

/// Runs `pipeline` until it ends or `interrupt` resolves. Whatever the
/// ending, tools still running are stopped and every scratch mount is
/// released afterwards; a mount that cannot be released fails the build.
pub async fn execute<F>(
    pipeline: &Pipeline,
    ctx: &BuildContext,
    interrupt: F,
) -> Result<Outcome, BuildError>
where
    F: Future<Output = ()>,
{
    let result = tokio::select! {
        result = pipeline.run(ctx) => Some(result),
        _ = interrupt => None,
    };

    ctx.runner.shutdown().await;

    let mounted: Vec<PathBuf> = ctx
        .scratch
        .release()
        .await
        .into_iter()
        .map(|(dir, err)| {
            warn!("{} is still mounted: {}", dir.display(), err);
            dir
        })
        .collect();

    match result {
        Some(Err(err)) => Err(err.into()),
        _ if !mounted.is_empty() => Err(BuildError::Mounted(mounted)),
        Some(Ok(())) => Ok(Outcome::Finished),
        None => Ok(Outcome::Cancelled),
    }
}
