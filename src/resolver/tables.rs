use std::collections::BTreeMap;
use std::ops::RangeInclusive;

use crate::request::{Flavor, SourceMode};

/// Where a compiler version comes from in a given source mode.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum GccRef {
    /// Branch on the flavor's git remote.
    Branch(&'static str),
    /// Release name and archive extension, e.g. `("7.3.0", "tar.xz")`.
    Release(&'static str, &'static str),
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Entry {
    Supported(GccRef),
    Rejected(&'static str),
}

pub type Table = BTreeMap<(Flavor, u32), Entry>;

pub const NO_SUCH_RELEASE: &str = "no such upstream release exists";

const LINARO_NO_GCC_8: &str = "Linaro has not published a GCC 8 toolchain";

pub fn git() -> Table {
    use Entry::*;
    use Flavor::*;
    use GccRef::*;

    BTreeMap::from([
        ((Gnu, 4), Supported(Branch("gcc-4_9-branch"))),
        ((Gnu, 5), Supported(Branch("gcc-5-branch"))),
        ((Gnu, 6), Supported(Branch("gcc-6-branch"))),
        ((Gnu, 7), Supported(Branch("gcc-7-branch"))),
        ((Gnu, 8), Supported(Branch("gcc-8-branch"))),
        ((Gnu, 9), Supported(Branch("master"))),
        (
            (Linaro, 4),
            Rejected("the Linaro 4.9 branch is not on the git mirror, use --tarballs"),
        ),
        (
            (Linaro, 5),
            Supported(Branch("linaro-local/gcc-5-integration-branch")),
        ),
        (
            (Linaro, 6),
            Supported(Branch("linaro-local/gcc-6-integration-branch")),
        ),
        (
            (Linaro, 7),
            Supported(Branch("linaro-local/gcc-7-integration-branch")),
        ),
        ((Linaro, 8), Rejected(LINARO_NO_GCC_8)),
    ])
}

pub fn tarball() -> Table {
    use Entry::*;
    use Flavor::*;
    use GccRef::*;

    BTreeMap::from([
        ((Gnu, 4), Supported(Release("4.9.4", "tar.bz2"))),
        ((Gnu, 5), Supported(Release("5.5.0", "tar.xz"))),
        ((Gnu, 6), Supported(Release("6.4.0", "tar.xz"))),
        ((Gnu, 7), Supported(Release("7.3.0", "tar.xz"))),
        ((Gnu, 8), Supported(Release("8.2.0", "tar.xz"))),
        (
            (Gnu, 9),
            Rejected("GCC 9 has no release tarball yet, drop --tarballs to build from git"),
        ),
        ((Linaro, 4), Supported(Release("4.9-2017.01", "tar.xz"))),
        ((Linaro, 5), Supported(Release("5.5-2017.10", "tar.xz"))),
        ((Linaro, 6), Supported(Release("6.4-2018.05", "tar.xz"))),
        ((Linaro, 7), Supported(Release("7.3-2018.05", "tar.xz"))),
        ((Linaro, 8), Rejected(LINARO_NO_GCC_8)),
    ])
}

pub fn for_mode(mode: SourceMode) -> Table {
    match mode {
        SourceMode::Git => git(),
        SourceMode::Tarball => tarball(),
    }
}

pub fn lookup(mode: SourceMode, flavor: Flavor, version: u32) -> Entry {
    for_mode(mode)
        .get(&(flavor, version))
        .copied()
        .unwrap_or(Entry::Rejected(NO_SUCH_RELEASE))
}

/// A dependency pinned to one release, shared by every compiler version.
#[derive(Clone, Copy, Debug)]
pub struct Pinned {
    pub name: &'static str,
    pub branch: Option<&'static str>,
    pub release: &'static str,
    pub ext: &'static str,
}

pub const BINUTILS: Pinned = Pinned {
    name: "binutils",
    branch: Some("binutils-2_31-branch"),
    release: "2.31.1",
    ext: "tar.xz",
};

pub const GLIBC: Pinned = Pinned {
    name: "glibc",
    branch: Some("release/2.28/master"),
    release: "2.28",
    ext: "tar.xz",
};

pub const LINUX: Pinned = Pinned {
    name: "linux",
    branch: Some("linux-4.18.y"),
    release: "4.18",
    ext: "tar.xz",
};

pub const GMP: Pinned = Pinned {
    name: "gmp",
    branch: None,
    release: "6.1.2",
    ext: "tar.xz",
};

/// Version prefix of the nightly `gmp-next` snapshots.
pub const GMP_NEXT: &str = "6.1.99";

pub const MPFR: Pinned = Pinned {
    name: "mpfr",
    branch: None,
    release: "4.0.1",
    ext: "tar.xz",
};

pub const MPC: Pinned = Pinned {
    name: "mpc",
    branch: None,
    release: "1.1.0",
    ext: "tar.gz",
};

pub const ISL: Pinned = Pinned {
    name: "isl",
    branch: None,
    release: "0.18",
    ext: "tar.bz2",
};

/// Compiler patches by major version, applied to both flavors.
pub const PATCHES: [(RangeInclusive<u32>, u8); 2] = [(4..=6, 1), (7..=7, 2)];
