use std::path::Path;

use anyhow::Result;
use tokio::fs;
use tracing::info;

pub mod archives;
pub mod paths;
pub mod temps;

pub use paths::{BuildDir, Layout};

/// Creates the persistent directories shared by every run.
pub async fn check(layout: &Layout) -> Result<()> {
    for dir in [layout.sources(), layout.patches()] {
        ensure_dir(&dir).await?;
        info!("{} directory: {}", label(&dir), dir.display());
    }

    Ok(())
}

async fn ensure_dir(dir: &Path) -> Result<()> {
    if !dir.exists() {
        fs::create_dir_all(dir).await?;
    }

    Ok(())
}

fn label(dir: &Path) -> String {
    dir.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn check_creates_persistent_dirs() {
        let tmp = TempDir::new().unwrap();
        let layout = Layout::new(tmp.path(), "arm-linux-gnueabi");

        check(&layout).await.unwrap();
        check(&layout).await.unwrap();

        assert!(layout.sources().is_dir());
        assert!(layout.patches().is_dir());
    }
}
