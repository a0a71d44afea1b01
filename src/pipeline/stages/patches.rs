use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::info;

use crate::pipeline::{BuildContext, Stage, StageError, StageResult};
use crate::process::Invocation;
use crate::resolver::{DependencyKind, PatchId};
use crate::source;

const NAME: &str = "patches";

/// Applies the compiler patch the plan selected, if any.
pub struct Patches;

fn patch(tree: &Path, file: &Path, args: &[&str]) -> Invocation {
    Invocation::new("patch")
        .arg("-p1")
        .args(args.iter().copied())
        .arg("-i")
        .arg(file.display().to_string())
        .current_dir(tree)
}

async fn ensure_patch(ctx: &BuildContext, id: PatchId) -> Result<PathBuf, StageError> {
    let file = ctx.layout.patches().join(id.file_name());

    if file.is_file() {
        return Ok(file);
    }

    let Some(mirror) = &ctx.mirrors.patches else {
        return Err(StageError::MissingArtifact {
            stage: NAME,
            what: "patch",
            path: file,
        });
    };

    let url = format!("{}/{}", mirror.trim_end_matches('/'), id.file_name());

    source::download(&url, &file)
        .await
        .map_err(|err| StageError::Fetch {
            stage: NAME,
            dependency: id.file_name(),
            message: format!("{err:#}"),
        })?;

    Ok(file)
}

#[async_trait]
impl Stage for Patches {
    fn name(&self) -> &'static str {
        NAME
    }

    fn applies(&self, ctx: &BuildContext) -> bool {
        ctx.plan.patch.is_some()
    }

    async fn run(&self, ctx: &BuildContext) -> StageResult {
        let Some(id) = ctx.plan.patch else {
            return Ok(());
        };

        let file = ensure_patch(ctx, id).await?;
        let tree = ctx.source(DependencyKind::Gcc);

        ctx.require(NAME, "gcc source", &tree)?;

        // a tree kept with --no-update may carry the patch from a previous run
        let reverse = patch(&tree, &file, &["-R", "--dry-run", "-s"]);
        if let Ok(exit) = ctx.runner.run(&reverse).await {
            if exit.success() {
                info!("{} already applied", id.file_name());
                return Ok(());
            }
        }

        let forward = patch(&tree, &file, &["-N", "--dry-run"]);
        match ctx.exec(NAME, forward).await {
            Ok(()) => {}
            Err(StageError::ToolFailed { .. }) => {
                return Err(StageError::PatchRejected {
                    stage: NAME,
                    patch: id.file_name(),
                    tree,
                })
            }
            Err(err) => return Err(err),
        }

        ctx.exec(NAME, patch(&tree, &file, &["-N"])).await
    }
}
