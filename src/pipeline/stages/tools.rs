use async_trait::async_trait;
use tracing::debug;

use crate::pipeline::{BuildContext, Stage, StageError, StageResult};

const NAME: &str = "tools";

/// Checks the external programs the build shells out to.
pub struct Tools;

pub(crate) fn required(ctx: &BuildContext) -> Vec<&'static str> {
    // gcc is the host compiler that bootstraps binutils and stage 1
    let mut tools = vec!["gcc", "make", "install", "patch"];

    if ctx.request.tmpfs {
        tools.extend(["sudo", "mount", "umount"]);
    }

    tools
}

pub(crate) fn missing<'a>(tools: &[&'a str]) -> Vec<&'a str> {
    tools
        .iter()
        .copied()
        .filter(|tool| match which::which(tool) {
            Ok(path) => {
                debug!("{} found at {}", tool, path.display());
                false
            }
            Err(_) => true,
        })
        .collect()
}

#[async_trait]
impl Stage for Tools {
    fn name(&self) -> &'static str {
        NAME
    }

    async fn run(&self, ctx: &BuildContext) -> StageResult {
        match missing(&required(ctx)).first() {
            Some(tool) => Err(StageError::MissingTool {
                stage: NAME,
                tool: tool.to_string(),
            }),
            None => Ok(()),
        }
    }
}
