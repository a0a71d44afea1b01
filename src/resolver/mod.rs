//! Turns a [`BuildRequest`] into a [`ResolvedPlan`]: which branch or tarball
//! each dependency comes from, which patch the compiler needs, and what the
//! target triple is.

use std::fmt;

use thiserror::Error;

use crate::request::{Arch, BuildRequest, Compression, Flavor, SourceMode};

pub mod host;
pub mod snapshot;
pub mod tables;

pub use host::HostInfo;
pub use snapshot::{Clock, FixedClock, SystemClock};

use tables::{Entry, GccRef, Pinned};

/// x86_64 targets need a compiler newer than this major version.
pub const X86_64_MIN_VERSION: u32 = 4;

#[derive(Debug, Error, Eq, PartialEq)]
pub enum ResolveError {
    #[error("unknown architecture `{0}` (expected one of arm, arm64, host, i686, x86_64)")]
    UnknownArch(String),

    #[error("unknown source `{0}` (expected gnu or linaro)")]
    UnknownFlavor(String),

    #[error("unknown compression `{0}` (expected gz or xz)")]
    UnknownCompression(String),

    #[error("{flavor} GCC {version} is not available from {mode} sources: {reason}")]
    UnsupportedVersion {
        flavor: Flavor,
        version: u32,
        mode: SourceMode,
        reason: String,
    },

    #[error("host builds must be newer than the installed GCC {installed}, got {requested}")]
    HostNotNewer { installed: u32, requested: u32 },

    #[error("could not query the installed gcc for its {0}")]
    HostCompilerUnknown(&'static str),

    #[error("x86_64 builds need GCC newer than {minimum}, got {requested}")]
    X86_64TooOld { minimum: u32, requested: u32 },

    #[error("job count must be at least 1")]
    NoJobs,
}

#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum DependencyKind {
    Binutils,
    Gcc,
    Glibc,
    Linux,
    Gmp,
    Mpfr,
    Mpc,
    Isl,
}

impl DependencyKind {
    pub const ALL: [DependencyKind; 8] = [
        DependencyKind::Binutils,
        DependencyKind::Gcc,
        DependencyKind::Glibc,
        DependencyKind::Linux,
        DependencyKind::Gmp,
        DependencyKind::Mpfr,
        DependencyKind::Mpc,
        DependencyKind::Isl,
    ];

    /// Math libraries GCC builds in-tree from symlinks in its source.
    pub const IN_TREE: [DependencyKind; 4] = [
        DependencyKind::Gmp,
        DependencyKind::Mpfr,
        DependencyKind::Mpc,
        DependencyKind::Isl,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            DependencyKind::Binutils => "binutils",
            DependencyKind::Gcc => "gcc",
            DependencyKind::Glibc => "glibc",
            DependencyKind::Linux => "linux",
            DependencyKind::Gmp => "gmp",
            DependencyKind::Mpfr => "mpfr",
            DependencyKind::Mpc => "mpc",
            DependencyKind::Isl => "isl",
        }
    }
}

impl fmt::Display for DependencyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum HistoryDepth {
    Shallow,
    Full,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Locator {
    Git {
        url: String,
        branch: String,
        depth: HistoryDepth,
    },
    Tarball {
        url: String,
        /// Archive file name in the sources directory.
        file: String,
        /// Top-level directory inside the archive.
        dir: String,
    },
}

impl Locator {
    fn tarball(base: &str, file: String, ext: &str) -> Self {
        let dir = file
            .strip_suffix(&format!(".{ext}"))
            .unwrap_or(&file)
            .to_string();

        Locator::Tarball {
            url: format!("{}/{}", base.trim_end_matches('/'), file),
            file,
            dir,
        }
    }

    #[cfg(test)]
    pub fn is_complete(&self) -> bool {
        match self {
            Locator::Git { url, branch, .. } => !url.is_empty() && !branch.is_empty(),
            Locator::Tarball { url, file, dir } => {
                !url.is_empty() && !file.is_empty() && !dir.is_empty()
            }
        }
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Locator::Git { url, branch, .. } => write!(f, "{url} ({branch})"),
            Locator::Tarball { url, .. } => f.write_str(url),
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Dependency {
    pub kind: DependencyKind,
    pub locator: Locator,
}

/// Numbered compiler patch, stored as `gcc-NNNN.patch`.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct PatchId(pub u8);

impl PatchId {
    pub fn file_name(&self) -> String {
        format!("gcc-{:04}.patch", self.0)
    }
}

/// Base URLs every locator is built from.
#[derive(Clone, Debug)]
pub struct Mirrors {
    pub gnu: String,
    pub kernel: String,
    pub linaro: String,
    pub gcc_infrastructure: String,
    pub gmp_snapshots: String,
    pub binutils_git: String,
    pub gcc_git: String,
    pub linaro_git: String,
    pub glibc_git: String,
    pub linux_git: String,
    pub patches: Option<String>,
}

impl Default for Mirrors {
    fn default() -> Self {
        Self {
            gnu: "https://ftp.gnu.org/gnu".to_string(),
            kernel: "https://cdn.kernel.org/pub/linux/kernel".to_string(),
            linaro: "https://releases.linaro.org/components/toolchain/gcc-linaro".to_string(),
            gcc_infrastructure: "https://gcc.gnu.org/pub/gcc/infrastructure".to_string(),
            gmp_snapshots: "https://gmplib.org/download/snapshot/gmp-next".to_string(),
            binutils_git: "https://sourceware.org/git/binutils-gdb.git".to_string(),
            gcc_git: "https://gcc.gnu.org/git/gcc.git".to_string(),
            linaro_git: "https://git.linaro.org/toolchain/gcc.git".to_string(),
            glibc_git: "https://sourceware.org/git/glibc.git".to_string(),
            linux_git: "https://git.kernel.org/pub/scm/linux/kernel/git/stable/linux.git"
                .to_string(),
            patches: None,
        }
    }
}

#[derive(Clone, Debug)]
pub struct ResolvedPlan {
    pub arch: Arch,
    pub flavor: Flavor,
    pub version: u32,
    pub mode: SourceMode,
    pub target: String,
    /// `ARCH=` value for the kernel headers; `None` for native builds.
    pub kernel_arch: Option<&'static str>,
    pub native: bool,
    pub dependencies: Vec<Dependency>,
    pub patch: Option<PatchId>,
    pub compression: Option<Compression>,
    pub jobs: usize,
}

impl ResolvedPlan {
    pub fn dependency(&self, kind: DependencyKind) -> Option<&Dependency> {
        self.dependencies.iter().find(|dep| dep.kind == kind)
    }

    pub fn git_dependencies(&self) -> impl Iterator<Item = &Dependency> {
        self.dependencies
            .iter()
            .filter(|dep| matches!(dep.locator, Locator::Git { .. }))
    }

    pub fn tarball_dependencies(&self) -> impl Iterator<Item = &Dependency> {
        self.dependencies
            .iter()
            .filter(|dep| matches!(dep.locator, Locator::Tarball { .. }))
    }
}

fn target_triple(arch: Arch, host: &HostInfo) -> Result<String, ResolveError> {
    let triple = match arch {
        Arch::Arm => "arm-linux-gnueabi",
        Arch::Arm64 => "aarch64-linux-gnu",
        Arch::I686 => "i686-linux-gnu",
        Arch::X86_64 => "x86_64-linux-gnu",
        Arch::Host => {
            return host
                .triple
                .clone()
                .ok_or(ResolveError::HostCompilerUnknown("target triple"))
        }
    };

    Ok(triple.to_string())
}

fn kernel_arch(arch: Arch) -> Option<&'static str> {
    match arch {
        Arch::Arm => Some("arm"),
        Arch::Arm64 => Some("arm64"),
        Arch::I686 | Arch::X86_64 => Some("x86"),
        Arch::Host => None,
    }
}

fn check_arch(request: &BuildRequest, host: &HostInfo) -> Result<(), ResolveError> {
    match request.arch {
        Arch::Host => {
            let installed = host
                .gcc_major
                .ok_or(ResolveError::HostCompilerUnknown("version"))?;

            if request.version <= installed {
                return Err(ResolveError::HostNotNewer {
                    installed,
                    requested: request.version,
                });
            }
        }
        Arch::X86_64 if request.version <= X86_64_MIN_VERSION => {
            return Err(ResolveError::X86_64TooOld {
                minimum: X86_64_MIN_VERSION,
                requested: request.version,
            });
        }
        _ => {}
    }

    Ok(())
}

fn git_depth(request: &BuildRequest) -> HistoryDepth {
    if request.full_history {
        HistoryDepth::Full
    } else {
        HistoryDepth::Shallow
    }
}

fn gcc_locator(request: &BuildRequest, mirrors: &Mirrors, gcc: GccRef) -> Locator {
    match (gcc, request.flavor) {
        (GccRef::Branch(branch), Flavor::Gnu) => Locator::Git {
            url: mirrors.gcc_git.clone(),
            branch: branch.to_string(),
            depth: git_depth(request),
        },
        (GccRef::Branch(branch), Flavor::Linaro) => Locator::Git {
            url: mirrors.linaro_git.clone(),
            branch: branch.to_string(),
            depth: git_depth(request),
        },
        (GccRef::Release(release, ext), Flavor::Gnu) => Locator::tarball(
            &format!("{}/gcc/gcc-{}", mirrors.gnu, release),
            format!("gcc-{release}.{ext}"),
            ext,
        ),
        (GccRef::Release(release, ext), Flavor::Linaro) => Locator::tarball(
            &format!("{}/{}", mirrors.linaro, release),
            format!("gcc-linaro-{release}.{ext}"),
            ext,
        ),
    }
}

fn release_tarball(base: &str, pinned: &Pinned) -> Locator {
    Locator::tarball(
        base,
        format!("{}-{}.{}", pinned.name, pinned.release, pinned.ext),
        pinned.ext,
    )
}

fn pinned_locator(
    request: &BuildRequest,
    pinned: &Pinned,
    git_url: &str,
    depth: HistoryDepth,
    tarball_base: &str,
) -> Locator {
    match (request.mode(), pinned.branch) {
        (SourceMode::Git, Some(branch)) => Locator::Git {
            url: git_url.to_string(),
            branch: branch.to_string(),
            depth,
        },
        _ => release_tarball(tarball_base, pinned),
    }
}

fn gmp_locator(request: &BuildRequest, mirrors: &Mirrors, clock: &dyn Clock) -> Locator {
    match request.mode() {
        SourceMode::Git => Locator::tarball(
            &mirrors.gmp_snapshots,
            format!(
                "gmp-{}-{}.{}",
                tables::GMP_NEXT,
                snapshot::snapshot_stamp(clock),
                tables::GMP.ext
            ),
            tables::GMP.ext,
        ),
        SourceMode::Tarball => release_tarball(&format!("{}/gmp", mirrors.gnu), &tables::GMP),
    }
}

pub fn patch_for(version: u32) -> Option<PatchId> {
    tables::PATCHES
        .iter()
        .find(|(range, _)| range.contains(&version))
        .map(|(_, id)| PatchId(*id))
}

pub fn resolve(
    request: &BuildRequest,
    host: &HostInfo,
    mirrors: &Mirrors,
    clock: &dyn Clock,
) -> Result<ResolvedPlan, ResolveError> {
    if request.jobs == 0 {
        return Err(ResolveError::NoJobs);
    }

    check_arch(request, host)?;

    let gcc = match tables::lookup(request.mode(), request.flavor, request.version) {
        Entry::Supported(gcc) => gcc,
        Entry::Rejected(reason) => {
            return Err(ResolveError::UnsupportedVersion {
                flavor: request.flavor,
                version: request.version,
                mode: request.mode(),
                reason: reason.to_string(),
            })
        }
    };

    let target = target_triple(request.arch, host)?;
    let depth = git_depth(request);

    let dependencies = vec![
        Dependency {
            kind: DependencyKind::Binutils,
            locator: pinned_locator(
                request,
                &tables::BINUTILS,
                &mirrors.binutils_git,
                depth,
                &format!("{}/binutils", mirrors.gnu),
            ),
        },
        Dependency {
            kind: DependencyKind::Gcc,
            locator: gcc_locator(request, mirrors, gcc),
        },
        Dependency {
            kind: DependencyKind::Glibc,
            locator: pinned_locator(
                request,
                &tables::GLIBC,
                &mirrors.glibc_git,
                depth,
                &format!("{}/glibc", mirrors.gnu),
            ),
        },
        // the stable tree is too large to clone with history
        Dependency {
            kind: DependencyKind::Linux,
            locator: pinned_locator(
                request,
                &tables::LINUX,
                &mirrors.linux_git,
                HistoryDepth::Shallow,
                &format!("{}/v4.x", mirrors.kernel),
            ),
        },
        Dependency {
            kind: DependencyKind::Gmp,
            locator: gmp_locator(request, mirrors, clock),
        },
        Dependency {
            kind: DependencyKind::Mpfr,
            locator: release_tarball(&format!("{}/mpfr", mirrors.gnu), &tables::MPFR),
        },
        Dependency {
            kind: DependencyKind::Mpc,
            locator: release_tarball(&format!("{}/mpc", mirrors.gnu), &tables::MPC),
        },
        Dependency {
            kind: DependencyKind::Isl,
            locator: release_tarball(&mirrors.gcc_infrastructure, &tables::ISL),
        },
    ];

    Ok(ResolvedPlan {
        arch: request.arch,
        flavor: request.flavor,
        version: request.version,
        mode: request.mode(),
        target,
        kernel_arch: kernel_arch(request.arch),
        native: request.arch == Arch::Host,
        dependencies,
        patch: patch_for(request.version),
        compression: request.package,
        jobs: request.jobs,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn clock() -> FixedClock {
        FixedClock(Utc.with_ymd_and_hms(2018, 10, 17, 12, 0, 0).unwrap())
    }

    fn host(major: u32) -> HostInfo {
        HostInfo {
            gcc_major: Some(major),
            triple: Some("x86_64-pc-linux-gnu".to_string()),
        }
    }

    fn request(arch: Arch, flavor: Flavor, version: u32, tarballs: bool) -> BuildRequest {
        let mut request = BuildRequest::new(arch, flavor, version);
        request.tarballs = tarballs;
        request
    }

    fn run(request: &BuildRequest) -> Result<ResolvedPlan, ResolveError> {
        resolve(request, &host(7), &Mirrors::default(), &clock())
    }

    #[test]
    fn every_supported_pair_is_fully_populated() {
        for mode in [SourceMode::Git, SourceMode::Tarball] {
            for ((flavor, version), entry) in tables::for_mode(mode) {
                let req = request(Arch::Arm64, flavor, version, mode == SourceMode::Tarball);

                match entry {
                    Entry::Supported(_) => {
                        let plan = run(&req).unwrap();
                        assert_eq!(plan.dependencies.len(), DependencyKind::ALL.len());
                        for kind in DependencyKind::ALL {
                            let dep = plan.dependency(kind).unwrap();
                            assert!(dep.locator.is_complete(), "{flavor} {version} {kind}");
                        }
                    }
                    Entry::Rejected(reason) => {
                        let err = run(&req).unwrap_err();
                        assert!(err.to_string().ends_with(reason), "{err}");
                    }
                }
            }
        }
    }

    #[test]
    fn unknown_pairs_have_a_stable_reason() {
        let err = run(&request(Arch::Arm, Flavor::Gnu, 3, false)).unwrap_err();

        assert_eq!(
            err.to_string(),
            "gnu GCC 3 is not available from git sources: no such upstream release exists"
        );
    }

    #[test]
    fn tarball_and_git_modes_differ() {
        assert!(run(&request(Arch::Arm, Flavor::Gnu, 9, false)).is_ok());
        assert!(run(&request(Arch::Arm, Flavor::Gnu, 9, true)).is_err());
        assert!(run(&request(Arch::Arm, Flavor::Linaro, 4, false)).is_err());
        assert!(run(&request(Arch::Arm, Flavor::Linaro, 4, true)).is_ok());
    }

    #[test]
    fn host_requires_a_newer_compiler() {
        for version in 4..=7 {
            let err = run(&request(Arch::Host, Flavor::Gnu, version, false)).unwrap_err();
            assert_eq!(
                err,
                ResolveError::HostNotNewer {
                    installed: 7,
                    requested: version
                }
            );
        }

        let plan = run(&request(Arch::Host, Flavor::Gnu, 8, false)).unwrap();
        assert!(plan.native);
        assert_eq!(plan.target, "x86_64-pc-linux-gnu");
        assert_eq!(plan.kernel_arch, None);
    }

    #[test]
    fn host_without_compiler_is_rejected() {
        let req = request(Arch::Host, Flavor::Gnu, 8, false);
        let err = resolve(&req, &HostInfo::default(), &Mirrors::default(), &clock());

        assert_eq!(err.unwrap_err(), ResolveError::HostCompilerUnknown("version"));
    }

    #[test]
    fn x86_64_has_a_minimum_version() {
        let err = run(&request(Arch::X86_64, Flavor::Gnu, 4, false)).unwrap_err();
        assert_eq!(
            err,
            ResolveError::X86_64TooOld {
                minimum: 4,
                requested: 4
            }
        );

        let plan = run(&request(Arch::X86_64, Flavor::Gnu, 5, false)).unwrap();
        assert_eq!(plan.target, "x86_64-linux-gnu");
        assert_eq!(plan.kernel_arch, Some("x86"));
    }

    #[test]
    fn patches_follow_version_ranges() {
        let patch = |v| run(&request(Arch::Arm, Flavor::Gnu, v, false)).unwrap().patch;

        assert_eq!(patch(4), Some(PatchId(1)));
        assert_eq!(patch(6), Some(PatchId(1)));
        assert_eq!(patch(7), Some(PatchId(2)));
        assert_eq!(patch(8), None);
        assert_eq!(PatchId(2).file_name(), "gcc-0002.patch");
    }

    #[test]
    fn gmp_snapshot_follows_the_clock() {
        let plan = run(&request(Arch::Arm, Flavor::Gnu, 8, false)).unwrap();
        let gmp = plan.dependency(DependencyKind::Gmp).unwrap();

        assert_eq!(
            gmp.locator,
            Locator::Tarball {
                url: "https://gmplib.org/download/snapshot/gmp-next/gmp-6.1.99-20181017.tar.xz"
                    .to_string(),
                file: "gmp-6.1.99-20181017.tar.xz".to_string(),
                dir: "gmp-6.1.99-20181017".to_string(),
            }
        );
    }

    #[test]
    fn tarball_mode_uses_releases() {
        let plan = run(&request(Arch::Arm, Flavor::Linaro, 7, true)).unwrap();

        assert_eq!(plan.git_dependencies().count(), 0);
        assert_eq!(
            plan.dependency(DependencyKind::Gcc).unwrap().locator,
            Locator::Tarball {
                url: "https://releases.linaro.org/components/toolchain/gcc-linaro/7.3-2018.05/gcc-linaro-7.3-2018.05.tar.xz".to_string(),
                file: "gcc-linaro-7.3-2018.05.tar.xz".to_string(),
                dir: "gcc-linaro-7.3-2018.05".to_string(),
            }
        );
    }

    #[test]
    fn history_depth_is_asymmetric() {
        let mut req = request(Arch::Arm64, Flavor::Gnu, 8, false);
        req.full_history = true;

        let plan = run(&req).unwrap();
        let depth = |kind| match &plan.dependency(kind).unwrap().locator {
            Locator::Git { depth, .. } => *depth,
            Locator::Tarball { .. } => panic!("{kind} is not a git dependency"),
        };

        assert_eq!(depth(DependencyKind::Gcc), HistoryDepth::Full);
        assert_eq!(depth(DependencyKind::Binutils), HistoryDepth::Full);
        assert_eq!(depth(DependencyKind::Linux), HistoryDepth::Shallow);
    }

    #[test]
    fn zero_jobs_is_rejected() {
        let mut req = request(Arch::Arm, Flavor::Gnu, 8, false);
        req.jobs = 0;

        assert_eq!(run(&req).unwrap_err(), ResolveError::NoJobs);
    }
}
