use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use git2::{build::RepoBuilder, FetchOptions, Repository, ResetType};
use tokio::fs::{self, File};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};
use url::Url;

use crate::resolver::{Dependency, DependencyKind, HistoryDepth, Locator};
use crate::store::{temps, Layout};

#[derive(Clone, Debug)]
pub struct SourceContext {
    pub kind: DependencyKind,
    pub sources_path: PathBuf,
}

impl SourceContext {
    pub fn new(layout: &Layout, kind: DependencyKind) -> Self {
        Self {
            kind,
            sources_path: layout.sources(),
        }
    }
}

/// A trait that must be implemented by all supported sources.
#[async_trait]
pub trait Source: Send + Sync {
    /// Where the fetched source lives: a clone or an archive file.
    fn path(&self, ctx: &SourceContext) -> PathBuf;

    /// Retrieves the source unless it is already present.
    async fn fetch(&self, ctx: &SourceContext) -> Result<()>;

    /// Brings an existing source to the pinned reference.
    async fn update(&self, ctx: &SourceContext) -> Result<()>;
}

/// Resolves a [`Locator`] to a concrete source implementation.
pub fn resolve_source(locator: &Locator) -> Box<dyn Source> {
    match locator {
        Locator::Git { url, branch, depth } => Box::new(GitSource {
            url: url.clone(),
            branch: branch.clone(),
            depth: *depth,
        }),
        Locator::Tarball { url, file, .. } => Box::new(TarballSource {
            url: url.clone(),
            file: file.clone(),
        }),
    }
}

/// Directory holding the unpacked or cloned source of a dependency.
pub fn tree_path(layout: &Layout, dependency: &Dependency) -> PathBuf {
    match &dependency.locator {
        Locator::Git { .. } => layout.source(dependency.kind),
        Locator::Tarball { dir, .. } => layout.sources().join(dir),
    }
}

#[derive(Clone, Debug)]
pub struct GitSource {
    pub url: String,
    pub branch: String,
    pub depth: HistoryDepth,
}

impl GitSource {
    fn fetch_options(&self) -> FetchOptions<'static> {
        let mut options = FetchOptions::new();

        if self.depth == HistoryDepth::Shallow {
            options.depth(1);
        }

        options
    }

    fn remote_ref(&self) -> String {
        format!("refs/remotes/origin/{}", self.branch)
    }

    fn clone_into(&self, path: &Path) -> Result<()> {
        let mut builder = RepoBuilder::new();

        builder.branch(&self.branch);
        builder.fetch_options(self.fetch_options());
        builder
            .clone(&self.url, path)
            .with_context(|| format!("failed to clone {} ({})", self.url, self.branch))?;

        Ok(())
    }

    fn reset_hard(&self, path: &Path) -> Result<()> {
        let repo = Repository::open(path)?;
        let mut remote = repo.find_remote("origin")?;
        let refspec = format!("+refs/heads/{}:{}", self.branch, self.remote_ref());

        remote
            .fetch(&[refspec.as_str()], Some(&mut self.fetch_options()), None)
            .with_context(|| format!("failed to fetch {} ({})", self.url, self.branch))?;

        let target = repo.revparse_single(&self.remote_ref())?;

        repo.reset(&target, ResetType::Hard, None)?;

        debug!("{} reset to {}", path.display(), target.id());

        Ok(())
    }
}

#[async_trait]
impl Source for GitSource {
    fn path(&self, ctx: &SourceContext) -> PathBuf {
        ctx.sources_path.join(ctx.kind.name())
    }

    async fn fetch(&self, ctx: &SourceContext) -> Result<()> {
        let path = self.path(ctx);

        if path.join(".git").exists() {
            debug!("using existing clone: {}", path.display());
            return Ok(());
        }

        info!("cloning {} ({}) into {}", self.url, self.branch, path.display());

        let source = self.clone();

        tokio::task::spawn_blocking(move || source.clone_into(&path)).await?
    }

    async fn update(&self, ctx: &SourceContext) -> Result<()> {
        let path = self.path(ctx);

        if !path.join(".git").exists() {
            bail!("no clone at {}", path.display());
        }

        info!("resetting {} to origin/{}", path.display(), self.branch);

        let source = self.clone();

        tokio::task::spawn_blocking(move || source.reset_hard(&path)).await?
    }
}

pub struct TarballSource {
    pub url: String,
    pub file: String,
}

#[async_trait]
impl Source for TarballSource {
    fn path(&self, ctx: &SourceContext) -> PathBuf {
        ctx.sources_path.join(&self.file)
    }

    async fn fetch(&self, ctx: &SourceContext) -> Result<()> {
        let path = self.path(ctx);

        // presence is the only check, there are no published checksums to verify
        if path.is_file() {
            debug!("using existing tarball: {}", path.display());
            return Ok(());
        }

        download(&self.url, &path).await
    }

    async fn update(&self, _ctx: &SourceContext) -> Result<()> {
        Ok(())
    }
}

/// Downloads `url` to `path` through a temporary sibling file.
pub async fn download(url: &str, path: &Path) -> Result<()> {
    let url = Url::parse(url)?;

    if url.scheme() != "http" && url.scheme() != "https" {
        bail!("invalid download URL: {}", url);
    }

    info!("downloading: {}", url);

    let mut response = reqwest::get(url.as_str())
        .await?
        .error_for_status()
        .map_err(|err| anyhow!("failed to download {}: {}", url, err))?;

    let partial = temps::partial_path(path);
    let mut file = File::create(&partial).await?;

    let written = async {
        while let Some(chunk) = response.chunk().await? {
            file.write_all(&chunk).await?;
        }

        file.flush().await?;

        Ok::<_, anyhow::Error>(())
    }
    .await;

    drop(file);

    if let Err(err) = written {
        let _ = fs::remove_file(&partial).await;
        bail!("failed to download {}: {}", url, err);
    }

    fs::rename(&partial, path).await?;

    info!("downloaded: {}", path.display());

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn context(tmp: &TempDir, kind: DependencyKind) -> SourceContext {
        SourceContext {
            kind,
            sources_path: tmp.path().to_path_buf(),
        }
    }

    #[test]
    fn locators_pick_the_matching_source() {
        let tmp = TempDir::new().unwrap();

        let git = resolve_source(&Locator::Git {
            url: "https://gcc.gnu.org/git/gcc.git".to_string(),
            branch: "gcc-8-branch".to_string(),
            depth: HistoryDepth::Shallow,
        });

        let tarball = resolve_source(&Locator::Tarball {
            url: "https://ftp.gnu.org/gnu/mpc/mpc-1.1.0.tar.gz".to_string(),
            file: "mpc-1.1.0.tar.gz".to_string(),
            dir: "mpc-1.1.0".to_string(),
        });

        assert_eq!(
            git.path(&context(&tmp, DependencyKind::Gcc)),
            tmp.path().join("gcc")
        );
        assert_eq!(
            tarball.path(&context(&tmp, DependencyKind::Mpc)),
            tmp.path().join("mpc-1.1.0.tar.gz")
        );
    }

    #[tokio::test]
    async fn present_tarball_is_not_downloaded() {
        let tmp = TempDir::new().unwrap();
        let ctx = context(&tmp, DependencyKind::Mpc);
        let source = TarballSource {
            url: "https://invalid.invalid/mpc-1.1.0.tar.gz".to_string(),
            file: "mpc-1.1.0.tar.gz".to_string(),
        };

        std::fs::write(tmp.path().join("mpc-1.1.0.tar.gz"), "cached").unwrap();

        source.fetch(&ctx).await.unwrap();

        assert_eq!(
            std::fs::read_to_string(source.path(&ctx)).unwrap(),
            "cached"
        );
    }

    #[tokio::test]
    async fn existing_clone_is_reused() {
        let tmp = TempDir::new().unwrap();
        let ctx = context(&tmp, DependencyKind::Binutils);
        let source = GitSource {
            url: "https://invalid.invalid/binutils-gdb.git".to_string(),
            branch: "binutils-2_31-branch".to_string(),
            depth: HistoryDepth::Shallow,
        };

        Repository::init(source.path(&ctx)).unwrap();

        source.fetch(&ctx).await.unwrap();
    }

    #[tokio::test]
    async fn update_resets_local_changes() {
        let tmp = TempDir::new().unwrap();

        // a local "upstream" with one commit on the pinned branch
        let upstream_path = tmp.path().join("upstream");
        let upstream = Repository::init(&upstream_path).unwrap();
        std::fs::write(upstream_path.join("configure"), "#!/bin/sh\n").unwrap();

        let mut index = upstream.index().unwrap();
        index.add_path(Path::new("configure")).unwrap();
        let tree = upstream.find_tree(index.write_tree().unwrap()).unwrap();
        let signature = git2::Signature::now("builder", "builder@localhost").unwrap();
        let commit = upstream
            .commit(None, &signature, &signature, "initial", &tree, &[])
            .unwrap();
        upstream
            .branch("release", &upstream.find_commit(commit).unwrap(), true)
            .unwrap();

        let sources = tmp.path().join("sources");
        std::fs::create_dir(&sources).unwrap();
        let ctx = SourceContext {
            kind: DependencyKind::Glibc,
            sources_path: sources,
        };
        let source = GitSource {
            url: upstream_path.display().to_string(),
            branch: "release".to_string(),
            depth: HistoryDepth::Full,
        };

        source.fetch(&ctx).await.unwrap();

        let clone = source.path(&ctx);
        std::fs::write(clone.join("configure"), "local edit\n").unwrap();

        source.update(&ctx).await.unwrap();

        assert_eq!(
            std::fs::read_to_string(clone.join("configure")).unwrap(),
            "#!/bin/sh\n"
        );
    }

    #[tokio::test]
    async fn update_without_clone_fails() {
        let tmp = TempDir::new().unwrap();
        let source = GitSource {
            url: "https://invalid.invalid/glibc.git".to_string(),
            branch: "release/2.28/master".to_string(),
            depth: HistoryDepth::Shallow,
        };

        assert!(source
            .update(&context(&tmp, DependencyKind::Glibc))
            .await
            .is_err());
    }

    #[tokio::test]
    async fn download_rejects_non_http_urls() {
        let tmp = TempDir::new().unwrap();

        let err = download("ftp://ftp.gnu.org/gnu/gmp.tar.xz", &tmp.path().join("gmp"))
            .await
            .unwrap_err();

        assert!(err.to_string().starts_with("invalid download URL"));
    }
}
