// src/arch.rs

//! Operating system / CPU pairs and their compatibility rules
//!
//! A candidate architecture matches a required one when the candidate OS
//! lies in the transitive subset of the required OS (POSIX covers Linux,
//! MacOSX, FreeBSD and Solaris) and the candidate CPU is binary-upward
//! compatible with the required CPU (i386 code runs on an x86_64 host,
//! armv6l on armv7l, ppc on ppc64).
//!
//! `Source` is not a real CPU: source implementations are only selected
//! when the requirements explicitly ask for source, and nothing else
//! satisfies a source request.

use std::fmt;
use std::str::FromStr;

/// Operating system component of an architecture
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Os {
    /// Matches everything; used by OS-independent implementations
    Any,
    /// Abstract family covering all unix-like systems
    Posix,
    Linux,
    MacOsX,
    FreeBsd,
    Solaris,
    Windows,
    /// Parsed but never compatible with a known OS
    Unknown(String),
}

impl Os {
    fn is_posix_family(&self) -> bool {
        matches!(
            self,
            Os::Posix | Os::Linux | Os::MacOsX | Os::FreeBsd | Os::Solaris
        )
    }

    /// True when a candidate declaring `candidate` runs on a host
    /// requiring `self`. POSIX is compatible with the unix family in
    /// both directions: a POSIX-declared build runs on any unix host,
    /// and a unix-wide request takes any unix build.
    pub fn accepts(&self, candidate: &Os) -> bool {
        if matches!(self, Os::Any) || matches!(candidate, Os::Any) {
            return true;
        }
        if self == candidate {
            return true;
        }
        (matches!(self, Os::Posix) || matches!(candidate, Os::Posix))
            && self.is_posix_family()
            && candidate.is_posix_family()
    }
}

impl FromStr for Os {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "*" => Os::Any,
            "POSIX" => Os::Posix,
            "Linux" => Os::Linux,
            "MacOSX" => Os::MacOsX,
            "FreeBSD" => Os::FreeBsd,
            "Solaris" => Os::Solaris,
            "Windows" => Os::Windows,
            other => Os::Unknown(other.to_string()),
        })
    }
}

impl fmt::Display for Os {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Os::Any => "*",
            Os::Posix => "POSIX",
            Os::Linux => "Linux",
            Os::MacOsX => "MacOSX",
            Os::FreeBsd => "FreeBSD",
            Os::Solaris => "Solaris",
            Os::Windows => "Windows",
            Os::Unknown(s) => s,
        };
        write!(f, "{}", name)
    }
}

/// CPU component of an architecture
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Cpu {
    /// Matches everything; used by CPU-independent implementations
    Any,
    /// Source code rather than a binary
    Source,
    I386,
    I486,
    I586,
    I686,
    X86_64,
    Ppc,
    Ppc64,
    ArmV6L,
    ArmV7L,
    AArch64,
    /// Parsed but never compatible with a known CPU
    Unknown(String),
}

/// Binary-compatibility families; a lower rank runs on a higher one
/// within the same family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CpuFamily {
    X86,
    Ppc,
    Arm,
    AArch64,
}

impl Cpu {
    fn family_rank(&self) -> Option<(CpuFamily, u8)> {
        Some(match self {
            Cpu::I386 => (CpuFamily::X86, 0),
            Cpu::I486 => (CpuFamily::X86, 1),
            Cpu::I586 => (CpuFamily::X86, 2),
            Cpu::I686 => (CpuFamily::X86, 3),
            Cpu::X86_64 => (CpuFamily::X86, 4),
            Cpu::Ppc => (CpuFamily::Ppc, 0),
            Cpu::Ppc64 => (CpuFamily::Ppc, 1),
            Cpu::ArmV6L => (CpuFamily::Arm, 0),
            Cpu::ArmV7L => (CpuFamily::Arm, 1),
            Cpu::AArch64 => (CpuFamily::AArch64, 0),
            Cpu::Any | Cpu::Source | Cpu::Unknown(_) => return None,
        })
    }

    /// True when a candidate built for `candidate` runs on a host
    /// requiring `self`
    pub fn accepts(&self, candidate: &Cpu) -> bool {
        // Source is selected only on explicit request and satisfies
        // nothing else.
        match (self, candidate) {
            (Cpu::Source, Cpu::Source) => return true,
            (Cpu::Source, _) | (_, Cpu::Source) => return false,
            _ => {}
        }
        if matches!(self, Cpu::Any) || matches!(candidate, Cpu::Any) {
            return true;
        }
        match (self.family_rank(), candidate.family_rank()) {
            (Some((host_family, host_rank)), Some((cand_family, cand_rank))) => {
                host_family == cand_family && cand_rank <= host_rank
            }
            _ => false,
        }
    }

    /// Distance from an exact match, for candidate ordering: a native
    /// build ranks ahead of an older-generation one.
    pub fn rank_for(&self, candidate: &Cpu) -> u8 {
        match (self.family_rank(), candidate.family_rank()) {
            (Some((_, host_rank)), Some((_, cand_rank))) => host_rank.saturating_sub(cand_rank),
            // CPU-independent candidates sort after native binaries
            _ => u8::MAX,
        }
    }
}

impl FromStr for Cpu {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "*" => Cpu::Any,
            "src" => Cpu::Source,
            "i386" => Cpu::I386,
            "i486" => Cpu::I486,
            "i586" => Cpu::I586,
            "i686" => Cpu::I686,
            "x86_64" => Cpu::X86_64,
            "ppc" => Cpu::Ppc,
            "ppc64" => Cpu::Ppc64,
            "armv6l" => Cpu::ArmV6L,
            "armv7l" => Cpu::ArmV7L,
            "aarch64" => Cpu::AArch64,
            other => Cpu::Unknown(other.to_string()),
        })
    }
}

impl fmt::Display for Cpu {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Cpu::Any => "*",
            Cpu::Source => "src",
            Cpu::I386 => "i386",
            Cpu::I486 => "i486",
            Cpu::I586 => "i586",
            Cpu::I686 => "i686",
            Cpu::X86_64 => "x86_64",
            Cpu::Ppc => "ppc",
            Cpu::Ppc64 => "ppc64",
            Cpu::ArmV6L => "armv6l",
            Cpu::ArmV7L => "armv7l",
            Cpu::AArch64 => "aarch64",
            Cpu::Unknown(s) => s,
        };
        write!(f, "{}", name)
    }
}

/// An `(os, cpu)` pair in the `os-cpu` wire form, `*` for either side
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Architecture {
    pub os: Os,
    pub cpu: Cpu,
}

impl Architecture {
    pub fn new(os: Os, cpu: Cpu) -> Self {
        Architecture { os, cpu }
    }

    /// The wildcard architecture `*-*`
    pub fn any() -> Self {
        Architecture {
            os: Os::Any,
            cpu: Cpu::Any,
        }
    }

    /// The architecture of the machine this code was compiled for
    pub fn host() -> Self {
        let os = match std::env::consts::OS {
            "linux" => Os::Linux,
            "macos" => Os::MacOsX,
            "freebsd" => Os::FreeBsd,
            "solaris" => Os::Solaris,
            "windows" => Os::Windows,
            other => Os::Unknown(other.to_string()),
        };
        let cpu = match std::env::consts::ARCH {
            "x86" => Cpu::I686,
            "x86_64" => Cpu::X86_64,
            "arm" => Cpu::ArmV7L,
            "aarch64" => Cpu::AArch64,
            "powerpc" => Cpu::Ppc,
            "powerpc64" => Cpu::Ppc64,
            other => Cpu::Unknown(other.to_string()),
        };
        Architecture { os, cpu }
    }

    /// True when an implementation built for `candidate` can run here
    pub fn accepts(&self, candidate: &Architecture) -> bool {
        self.os.accepts(&candidate.os) && self.cpu.accepts(&candidate.cpu)
    }
}

impl FromStr for Architecture {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once('-') {
            Some((os, cpu)) => Ok(Architecture {
                os: os.parse()?,
                cpu: cpu.parse()?,
            }),
            // A bare OS name means any CPU
            None => Ok(Architecture {
                os: s.parse()?,
                cpu: Cpu::Any,
            }),
        }
    }
}

impl fmt::Display for Architecture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.os, self.cpu)
    }
}

impl Default for Architecture {
    fn default() -> Self {
        Architecture::any()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn arch(s: &str) -> Architecture {
        s.parse().unwrap()
    }

    #[test]
    fn test_parse_and_display() {
        assert_eq!(arch("Linux-x86_64").to_string(), "Linux-x86_64");
        assert_eq!(arch("*-*").to_string(), "*-*");
        assert_eq!(arch("*-src").to_string(), "*-src");
        assert_eq!(arch("POSIX-i386").to_string(), "POSIX-i386");
    }

    #[test]
    fn test_os_subsets() {
        assert!(Os::Posix.accepts(&Os::Linux));
        assert!(Os::Posix.accepts(&Os::MacOsX));
        assert!(!Os::Posix.accepts(&Os::Windows));
        assert!(!Os::Linux.accepts(&Os::MacOsX));
        assert!(Os::Linux.accepts(&Os::Linux));
        assert!(Os::Linux.accepts(&Os::Posix));
        assert!(!Os::Windows.accepts(&Os::Posix));
        assert!(Os::Any.accepts(&Os::Windows));
        assert!(Os::Windows.accepts(&Os::Any));
    }

    #[test]
    fn test_cpu_upward_compat() {
        assert!(Cpu::X86_64.accepts(&Cpu::I386));
        assert!(Cpu::X86_64.accepts(&Cpu::I686));
        assert!(!Cpu::I386.accepts(&Cpu::X86_64));
        assert!(Cpu::ArmV7L.accepts(&Cpu::ArmV6L));
        assert!(!Cpu::ArmV6L.accepts(&Cpu::ArmV7L));
        assert!(Cpu::Ppc64.accepts(&Cpu::Ppc));
        assert!(!Cpu::X86_64.accepts(&Cpu::Ppc));
        assert!(!Cpu::AArch64.accepts(&Cpu::ArmV7L));
    }

    #[test]
    fn test_source_is_strict() {
        assert!(Cpu::Source.accepts(&Cpu::Source));
        assert!(!Cpu::Source.accepts(&Cpu::Any));
        assert!(!Cpu::Source.accepts(&Cpu::X86_64));
        assert!(!Cpu::X86_64.accepts(&Cpu::Source));
        assert!(!Cpu::Any.accepts(&Cpu::Source));
    }

    #[test]
    fn test_unknown_never_matches_known() {
        let exotic: Cpu = "riscv128".parse().unwrap();
        assert!(matches!(exotic, Cpu::Unknown(_)));
        assert!(!Cpu::X86_64.accepts(&exotic));
        // But the wildcard still takes it
        assert!(Cpu::Any.accepts(&exotic));
    }

    #[test]
    fn test_architecture_accepts() {
        let host = arch("Linux-x86_64");
        assert!(host.accepts(&arch("Linux-i386")));
        assert!(host.accepts(&arch("POSIX-i386")));
        assert!(host.accepts(&arch("*-*")));
        assert!(!host.accepts(&arch("Windows-x86_64")));

        let posix_host = arch("POSIX-x86_64");
        assert!(posix_host.accepts(&arch("Linux-x86_64")));
    }

    #[test]
    fn test_cpu_ranking_prefers_native() {
        let host = Cpu::X86_64;
        assert!(host.rank_for(&Cpu::X86_64) < host.rank_for(&Cpu::I686));
        assert!(host.rank_for(&Cpu::I686) < host.rank_for(&Cpu::Any));
    }

    #[test]
    fn test_bare_os_form() {
        let a = arch("Linux");
        assert_eq!(a.os, Os::Linux);
        assert_eq!(a.cpu, Cpu::Any);
    }
}
