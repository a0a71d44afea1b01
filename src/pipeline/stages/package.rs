use std::io;
use std::path::PathBuf;

use async_trait::async_trait;
use tokio::fs;
use tracing::info;

use crate::log;
use crate::pipeline::{BuildContext, Stage, StageError, StageResult};
use crate::process::Invocation;
use crate::store::{archives, temps};

/// `{target}-{version}.x-{flavor}-{YYYYMMDD}.tar.{gz|xz}` next to the install
/// directory.
pub fn archive_path(ctx: &BuildContext) -> Option<PathBuf> {
    let compression = ctx.plan.compression?;

    let name = format!(
        "{}-{}.x-{}-{}.{}",
        ctx.plan.target,
        ctx.plan.version,
        ctx.plan.flavor,
        ctx.clock.now().format("%Y%m%d"),
        compression.extension(),
    );

    Some(ctx.layout.root().join(name))
}

pub struct Package;

impl Package {
    const NAME: &'static str = "package";
}

#[async_trait]
impl Stage for Package {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn applies(&self, ctx: &BuildContext) -> bool {
        ctx.plan.compression.is_some()
    }

    async fn run(&self, ctx: &BuildContext) -> StageResult {
        let (Some(compression), Some(archive)) = (ctx.plan.compression, archive_path(ctx)) else {
            return Ok(());
        };

        let install = ctx.layout.install();

        ctx.require(Self::NAME, "installed toolchain", &install)?;

        info!("packaging {} into {}", install.display(), archive.display());

        let partial = temps::partial_path(&archive);

        if let Err(err) = archives::compress(&install, &partial, compression).await {
            let _ = fs::remove_file(&partial).await;

            return Err(StageError::Io {
                stage: Self::NAME,
                context: format!("cannot archive {}", install.display()),
                source: io::Error::other(format!("{err:#}")),
            });
        }

        fs::rename(&partial, &archive)
            .await
            .map_err(StageError::io(Self::NAME, format!("cannot write {}", archive.display())))?;

        log::print_package(&archive);

        Ok(())
    }
}

/// Prints what was built and how long it took.
pub struct Report;

#[async_trait]
impl Stage for Report {
    fn name(&self) -> &'static str {
        "report"
    }

    async fn run(&self, ctx: &BuildContext) -> StageResult {
        let gcc = ctx.tool("gcc");

        ctx.require(self.name(), "compiler", &gcc)?;

        let version = ctx
            .capture(
                self.name(),
                Invocation::new(gcc.display().to_string()).arg("--version"),
            )
            .await?;

        log::print_report(
            version.lines().next().unwrap_or_default(),
            &ctx.layout.install(),
            ctx.started.elapsed(),
        );

        Ok(())
    }
}
