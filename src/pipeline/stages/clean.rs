use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;
use tracing::debug;

use crate::pipeline::{BuildContext, Stage, StageError, StageResult};
use crate::resolver::{DependencyKind, Locator};
use crate::store::BuildDir;

const NAME: &str = "clean";

/// Source trees reached through a symlink at the root.
pub(crate) const LINKED_SOURCES: [DependencyKind; 4] = [
    DependencyKind::Binutils,
    DependencyKind::Gcc,
    DependencyKind::Glibc,
    DependencyKind::Linux,
];

/// Removes everything a previous run produced, keeping downloads.
pub struct Clean;

/// Paths a build creates and a fresh build must not find.
pub(crate) fn leftovers(ctx: &BuildContext) -> Vec<PathBuf> {
    let mut paths: Vec<PathBuf> = BuildDir::ALL
        .iter()
        .map(|dir| ctx.build_dir(*dir))
        .collect();

    paths.push(ctx.layout.install());

    paths.extend(LINKED_SOURCES.iter().map(|kind| ctx.source(*kind)));

    paths.extend(ctx.plan.tarball_dependencies().filter_map(|dep| {
        match &dep.locator {
            Locator::Tarball { dir, .. } => Some(ctx.layout.sources().join(dir)),
            Locator::Git { .. } => None,
        }
    }));

    paths
}

async fn remove(path: &Path) -> io::Result<()> {
    let meta = match fs::symlink_metadata(path).await {
        Ok(meta) => meta,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(err) => return Err(err),
    };

    debug!("removing {}", path.display());

    if meta.is_dir() {
        fs::remove_dir_all(path).await
    } else {
        fs::remove_file(path).await
    }
}

#[async_trait]
impl Stage for Clean {
    fn name(&self) -> &'static str {
        NAME
    }

    async fn run(&self, ctx: &BuildContext) -> StageResult {
        for dir in BuildDir::ALL {
            ctx.scratch.release_stale(&ctx.build_dir(dir)).await;
        }

        for path in leftovers(ctx) {
            remove(&path).await.map_err(|err| StageError::Cleanup {
                stage: NAME,
                path: path.clone(),
                message: err.to_string(),
            })?;

            if fs::symlink_metadata(&path).await.is_ok() {
                return Err(StageError::Cleanup {
                    stage: NAME,
                    path,
                    message: "still present after removal".to_string(),
                });
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::testing;
    use crate::process::testing::RecordingRunner;
    use std::sync::Arc;
    use tempfile::TempDir;

    #[tokio::test]
    async fn removes_build_output_but_keeps_downloads() {
        let tmp = TempDir::new().unwrap();
        let ctx = testing::context(tmp.path(), Arc::new(RecordingRunner::default()));

        let sources = ctx.layout.sources();
        std::fs::create_dir_all(sources.join("gcc")).unwrap();
        std::fs::create_dir_all(sources.join("mpfr-4.0.1")).unwrap();
        std::fs::write(sources.join("mpfr-4.0.1.tar.xz"), "archive").unwrap();

        std::os::unix::fs::symlink(sources.join("gcc"), ctx.source(DependencyKind::Gcc)).unwrap();
        std::fs::create_dir_all(ctx.build_dir(BuildDir::Gcc).join("gcc")).unwrap();
        std::fs::create_dir_all(ctx.layout.install_bin()).unwrap();

        Clean.run(&ctx).await.unwrap();

        for path in leftovers(&ctx) {
            assert!(std::fs::symlink_metadata(&path).is_err(), "{}", path.display());
        }

        assert!(sources.join("gcc").is_dir());
        assert!(sources.join("mpfr-4.0.1.tar.xz").is_file());
    }

    #[tokio::test]
    async fn clean_tree_is_left_alone() {
        let tmp = TempDir::new().unwrap();
        let runner = Arc::new(RecordingRunner::default());
        let ctx = testing::context(tmp.path(), runner.clone());

        Clean.run(&ctx).await.unwrap();

        assert!(runner.calls().is_empty());
    }
}
