use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::resolver::DependencyKind;

/// Scratch directories the configure/make steps run in.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum BuildDir {
    Binutils,
    Gcc,
    Glibc,
}

impl BuildDir {
    pub const ALL: [BuildDir; 3] = [BuildDir::Binutils, BuildDir::Gcc, BuildDir::Glibc];

    pub fn name(&self) -> &'static str {
        match self {
            BuildDir::Binutils => "build-binutils",
            BuildDir::Gcc => "build-gcc",
            BuildDir::Glibc => "build-glibc",
        }
    }
}

/// On-disk layout of a build, everything relative to one root directory.
#[derive(Clone, Debug)]
pub struct Layout {
    root: PathBuf,
    target: String,
}

impl Layout {
    pub fn new(root: impl Into<PathBuf>, target: &str) -> Self {
        Self {
            root: root.into(),
            target: target.to_string(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Clones and tarballs, kept between runs.
    pub fn sources(&self) -> PathBuf {
        self.root.join("sources")
    }

    pub fn patches(&self) -> PathBuf {
        self.root.join("patches")
    }

    pub fn source(&self, kind: DependencyKind) -> PathBuf {
        self.sources().join(kind.name())
    }

    /// Stable name the build steps use, linked to the versioned source tree.
    pub fn source_link(&self, kind: DependencyKind) -> PathBuf {
        self.root.join(kind.name())
    }

    pub fn build_dir(&self, dir: BuildDir) -> PathBuf {
        self.root.join(dir.name())
    }

    pub fn install(&self) -> PathBuf {
        self.root.join(&self.target)
    }

    pub fn install_bin(&self) -> PathBuf {
        self.install().join("bin")
    }

    /// Target sysroot inside the install prefix.
    pub fn sysroot(&self) -> PathBuf {
        self.install().join(&self.target)
    }

    pub fn tool(&self, name: &str) -> PathBuf {
        self.install_bin().join(format!("{}-{}", self.target, name))
    }
}

pub fn get_files(source: impl AsRef<Path>) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = WalkDir::new(&source)
        .follow_links(false)
        .into_iter()
        .filter_map(|entry| entry.ok().map(|e| e.into_path()))
        .filter(|path| path != source.as_ref())
        .collect();

    files.sort();

    files
}

/// True if `path` is a directory with at least one entry, or a non-empty file.
pub fn is_populated(path: &Path) -> bool {
    match std::fs::metadata(path) {
        Ok(meta) if meta.is_dir() => std::fs::read_dir(path)
            .map(|mut entries| entries.next().is_some())
            .unwrap_or(false),
        Ok(meta) => meta.len() > 0,
        Err(_) => false,
    }
}
