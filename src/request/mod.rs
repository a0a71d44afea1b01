use std::fmt;
use std::str::FromStr;

use crate::resolver::ResolveError;

#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum Arch {
    Arm,
    Arm64,
    Host,
    I686,
    X86_64,
}

impl Arch {
    pub const ALL: [Arch; 5] = [Arch::Arm, Arch::Arm64, Arch::Host, Arch::I686, Arch::X86_64];

    pub fn as_str(&self) -> &'static str {
        match self {
            Arch::Arm => "arm",
            Arch::Arm64 => "arm64",
            Arch::Host => "host",
            Arch::I686 => "i686",
            Arch::X86_64 => "x86_64",
        }
    }
}

impl fmt::Display for Arch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Arch {
    type Err = ResolveError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Arch::ALL
            .into_iter()
            .find(|arch| arch.as_str() == s)
            .ok_or_else(|| ResolveError::UnknownArch(s.to_string()))
    }
}

/// Upstream variant of the compiler sources.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum Flavor {
    Gnu,
    Linaro,
}

impl Flavor {
    pub fn as_str(&self) -> &'static str {
        match self {
            Flavor::Gnu => "gnu",
            Flavor::Linaro => "linaro",
        }
    }
}

impl fmt::Display for Flavor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Flavor {
    type Err = ResolveError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "gnu" => Ok(Flavor::Gnu),
            "linaro" => Ok(Flavor::Linaro),
            _ => Err(ResolveError::UnknownFlavor(s.to_string())),
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Compression {
    Gz,
    Xz,
}

impl Compression {
    pub fn extension(&self) -> &'static str {
        match self {
            Compression::Gz => "tar.gz",
            Compression::Xz => "tar.xz",
        }
    }
}

impl FromStr for Compression {
    type Err = ResolveError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "gz" => Ok(Compression::Gz),
            "xz" => Ok(Compression::Xz),
            _ => Err(ResolveError::UnknownCompression(s.to_string())),
        }
    }
}

/// Whether sources come from git mirrors or release tarballs.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum SourceMode {
    Git,
    Tarball,
}

impl fmt::Display for SourceMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceMode::Git => f.write_str("git"),
            SourceMode::Tarball => f.write_str("tarball"),
        }
    }
}

#[derive(Clone, Debug)]
pub struct BuildRequest {
    pub arch: Arch,
    pub flavor: Flavor,
    pub version: u32,
    pub jobs: usize,
    pub tarballs: bool,
    pub tmpfs: bool,
    pub no_update: bool,
    pub full_history: bool,
    pub package: Option<Compression>,
    pub verbose: bool,
}

impl BuildRequest {
    pub fn new(arch: Arch, flavor: Flavor, version: u32) -> Self {
        Self {
            arch,
            flavor,
            version,
            jobs: default_jobs(),
            tarballs: false,
            tmpfs: false,
            no_update: false,
            full_history: false,
            package: None,
            verbose: false,
        }
    }

    pub fn mode(&self) -> SourceMode {
        if self.tarballs {
            SourceMode::Tarball
        } else {
            SourceMode::Git
        }
    }
}

pub fn default_jobs() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arch_parses_every_name() {
        for arch in Arch::ALL {
            assert_eq!(arch.as_str().parse::<Arch>().unwrap(), arch);
        }
    }

    #[test]
    fn arch_rejects_unknown() {
        let err = "mips".parse::<Arch>().unwrap_err();
        assert_eq!(
            err.to_string(),
            "unknown architecture `mips` (expected one of arm, arm64, host, i686, x86_64)"
        );
    }

    #[test]
    fn flavor_and_compression_parse() {
        assert_eq!("linaro".parse::<Flavor>().unwrap(), Flavor::Linaro);
        assert!("llvm".parse::<Flavor>().is_err());
        assert_eq!("xz".parse::<Compression>().unwrap().extension(), "tar.xz");
        assert!("zip".parse::<Compression>().is_err());
    }

    #[test]
    fn mode_follows_tarball_flag() {
        let mut request = BuildRequest::new(Arch::Arm64, Flavor::Gnu, 8);
        assert_eq!(request.mode(), SourceMode::Git);
        request.tarballs = true;
        assert_eq!(request.mode(), SourceMode::Tarball);
    }
}
