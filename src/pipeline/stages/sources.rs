use std::io;
use std::path::Path;

use async_trait::async_trait;
use tokio::fs;
use tracing::{debug, info};

use crate::pipeline::{BuildContext, Stage, StageError, StageResult};
use crate::resolver::{Dependency, DependencyKind, Locator};
use crate::source::{resolve_source, tree_path, SourceContext};
use crate::store::{archives, paths};

use super::clean::LINKED_SOURCES;

fn fetch_error(stage: &'static str, dep: &Dependency, err: anyhow::Error) -> StageError {
    StageError::Fetch {
        stage,
        dependency: dep.kind.to_string(),
        message: format!("{err:#}"),
    }
}

/// Clones or downloads every dependency missing from `sources/`.
pub struct Download;

#[async_trait]
impl Stage for Download {
    fn name(&self) -> &'static str {
        "download"
    }

    async fn run(&self, ctx: &BuildContext) -> StageResult {
        for dep in &ctx.plan.dependencies {
            let source = resolve_source(&dep.locator);

            source
                .fetch(&SourceContext::new(&ctx.layout, dep.kind))
                .await
                .map_err(|err| fetch_error(self.name(), dep, err))?;
        }

        Ok(())
    }
}

/// Unpacks tarballs and links every tree under its stable name.
pub struct Extract;

impl Extract {
    const NAME: &'static str = "extract";

    async fn unpack(&self, ctx: &BuildContext, file: &str, dir: &str) -> StageResult {
        let sources = ctx.layout.sources();
        let tree = sources.join(dir);

        if paths::is_populated(&tree) {
            debug!("already extracted: {}", tree.display());
            return Ok(());
        }

        let archive = sources.join(file);

        ctx.require(Self::NAME, "source archive", &archive)?;

        info!("extracting {}", archive.display());

        archives::unpack(&archive, &sources)
            .await
            .map_err(|err| StageError::Io {
                stage: Self::NAME,
                context: format!("failed to unpack {}", archive.display()),
                source: io::Error::other(format!("{err:#}")),
            })?;

        ctx.require(Self::NAME, "extracted source", &tree)
    }

    async fn link(&self, ctx: &BuildContext, dep: &Dependency, link: &Path) -> StageResult {
        let tree = tree_path(&ctx.layout, dep);

        ctx.require(Self::NAME, "source tree", &tree)?;

        let target = fs::canonicalize(&tree)
            .await
            .map_err(StageError::io(Self::NAME, format!("cannot resolve {}", tree.display())))?;

        match fs::symlink_metadata(link).await {
            Ok(meta) if meta.file_type().is_symlink() => fs::remove_file(link)
                .await
                .map_err(StageError::io(Self::NAME, format!("cannot replace {}", link.display())))?,
            Ok(_) => {
                return Err(StageError::Io {
                    stage: Self::NAME,
                    context: format!("cannot link {}", link.display()),
                    source: io::Error::new(io::ErrorKind::AlreadyExists, "not a symlink"),
                })
            }
            Err(_) => {}
        }

        fs::symlink(&target, link)
            .await
            .map_err(StageError::io(Self::NAME, format!("cannot link {}", link.display())))?;

        debug!("{} -> {}", link.display(), target.display());

        Ok(())
    }
}

#[async_trait]
impl Stage for Extract {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    async fn run(&self, ctx: &BuildContext) -> StageResult {
        for dep in ctx.plan.tarball_dependencies() {
            if let Locator::Tarball { file, dir, .. } = &dep.locator {
                self.unpack(ctx, file, dir).await?;
            }
        }

        for kind in LINKED_SOURCES {
            if let Some(dep) = ctx.plan.dependency(kind) {
                self.link(ctx, dep, &ctx.source(kind)).await?;
            }
        }

        let gcc = ctx.source(DependencyKind::Gcc);

        for kind in DependencyKind::IN_TREE {
            if let Some(dep) = ctx.plan.dependency(kind) {
                self.link(ctx, dep, &gcc.join(kind.name())).await?;
            }
        }

        Ok(())
    }
}

/// Hard-resets every clone to its pinned branch.
pub struct Update;

#[async_trait]
impl Stage for Update {
    fn name(&self) -> &'static str {
        "update"
    }

    fn applies(&self, ctx: &BuildContext) -> bool {
        !ctx.request.no_update && ctx.plan.git_dependencies().next().is_some()
    }

    async fn run(&self, ctx: &BuildContext) -> StageResult {
        for dep in ctx.plan.git_dependencies() {
            let source = resolve_source(&dep.locator);

            source
                .update(&SourceContext::new(&ctx.layout, dep.kind))
                .await
                .map_err(|err| fetch_error(self.name(), dep, err))?;
        }

        Ok(())
    }
}
