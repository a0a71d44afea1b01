use async_trait::async_trait;
use tokio::fs;

use crate::pipeline::{BuildContext, Stage, StageError, StageResult};
use crate::scratch::ScratchError;
use crate::store::BuildDir;

const NAME: &str = "environment";

/// Prepares the build and install directories, optionally in RAM.
pub struct Environment;

impl From<ScratchError> for StageError {
    fn from(err: ScratchError) -> Self {
        match err {
            ScratchError::Spawn { command, source } => StageError::Spawn {
                stage: NAME,
                command,
                source,
            },
            ScratchError::Failed { command, exit } => StageError::ToolFailed {
                stage: NAME,
                command,
                exit,
            },
        }
    }
}

#[async_trait]
impl Stage for Environment {
    fn name(&self) -> &'static str {
        NAME
    }

    async fn run(&self, ctx: &BuildContext) -> StageResult {
        let install = ctx.layout.install();

        fs::create_dir_all(&install)
            .await
            .map_err(StageError::io(NAME, format!("cannot create {}", install.display())))?;

        for dir in BuildDir::ALL {
            let path = ctx.build_dir(dir);

            fs::create_dir_all(&path)
                .await
                .map_err(StageError::io(NAME, format!("cannot create {}", path.display())))?;

            if ctx.request.tmpfs {
                ctx.scratch.mount(&path).await?;
            }
        }

        Ok(())
    }
}
