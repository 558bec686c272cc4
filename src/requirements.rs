// src/requirements.rs

//! What the caller asks the solver for
//!
//! `Requirements` names the root interface, the command to run, the
//! target architecture and any extra per-interface version bounds. During
//! a solve these combine with the `Restriction`s contributed by already
//! selected implementations; the effective range for an interface is the
//! intersection of everything that mentions it.

use crate::arch::Architecture;
use crate::feed::InterfaceId;
use crate::version::VersionRange;
use std::collections::BTreeMap;
use std::fmt;

/// A version bound one implementation places on another interface
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Restriction {
    pub interface: InterfaceId,
    pub range: VersionRange,
}

impl fmt::Display for Restriction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} must be {}", self.interface, self.range)
    }
}

/// Inputs to one solve
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Requirements {
    pub interface: InterfaceId,
    /// Command to select on the root implementation; `None` selects a
    /// library (no command)
    pub command: Option<String>,
    pub arch: Architecture,
    /// Preferred languages, most preferred first (`en`, `de`, ...)
    pub languages: Vec<String>,
    /// Extra per-interface version bounds from the caller
    pub extra_restrictions: BTreeMap<InterfaceId, VersionRange>,
}

impl Requirements {
    /// Requirements for running `interface` on the host architecture
    /// with the default `run` command
    pub fn new(interface: InterfaceId) -> Self {
        Requirements {
            interface,
            command: Some("run".to_string()),
            arch: Architecture::host(),
            languages: Vec::new(),
            extra_restrictions: BTreeMap::new(),
        }
    }

    pub fn with_command(mut self, command: impl Into<String>) -> Self {
        self.command = Some(command.into());
        self
    }

    /// Select a library: no command is required on the root
    pub fn without_command(mut self) -> Self {
        self.command = None;
        self
    }

    pub fn with_arch(mut self, arch: Architecture) -> Self {
        self.arch = arch;
        self
    }

    pub fn with_languages(mut self, languages: Vec<String>) -> Self {
        self.languages = languages;
        self
    }

    pub fn with_restriction(mut self, interface: InterfaceId, range: VersionRange) -> Self {
        // Several bounds on one interface tighten each other
        let merged = match self.extra_restrictions.remove(&interface) {
            Some(existing) => existing.intersect(&range),
            None => range,
        };
        self.extra_restrictions.insert(interface, merged);
        self
    }

    /// The caller-supplied restrictions as solver-shaped values
    pub fn restrictions(&self) -> Vec<Restriction> {
        self.extra_restrictions
            .iter()
            .map(|(interface, range)| Restriction {
                interface: interface.clone(),
                range: range.clone(),
            })
            .collect()
    }
}

/// The intersection of every range in `restrictions` that mentions
/// `interface`, starting from the universal range
pub fn effective_versions(restrictions: &[Restriction], interface: &InterfaceId) -> VersionRange {
    let mut effective = VersionRange::any();
    for restriction in restrictions {
        if &restriction.interface == interface {
            effective = effective.intersect(&restriction.range);
        }
    }
    effective
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::version::Version;

    fn iface(s: &str) -> InterfaceId {
        s.parse().unwrap()
    }

    fn v(s: &str) -> Version {
        s.parse().unwrap()
    }

    #[test]
    fn test_defaults() {
        let req = Requirements::new(iface("http://example.com/app.xml"));
        assert_eq!(req.command.as_deref(), Some("run"));
        assert!(req.extra_restrictions.is_empty());
    }

    #[test]
    fn test_builder() {
        let req = Requirements::new(iface("http://example.com/app.xml"))
            .with_command("test")
            .with_arch("Linux-x86_64".parse().unwrap())
            .with_restriction(iface("http://example.com/lib.xml"), "2.0..".parse().unwrap());
        assert_eq!(req.command.as_deref(), Some("test"));
        assert_eq!(req.extra_restrictions.len(), 1);

        let library = Requirements::new(iface("http://example.com/lib.xml")).without_command();
        assert_eq!(library.command, None);
    }

    #[test]
    fn test_repeated_restrictions_tighten() {
        let lib = iface("http://example.com/lib.xml");
        let req = Requirements::new(iface("http://example.com/app.xml"))
            .with_restriction(lib.clone(), "1.0..".parse().unwrap())
            .with_restriction(lib.clone(), "..!3.0".parse().unwrap());

        let range = &req.extra_restrictions[&lib];
        assert!(range.contains(&v("2.0")));
        assert!(!range.contains(&v("0.5")));
        assert!(!range.contains(&v("3.0")));
    }

    #[test]
    fn test_effective_versions_intersects_matching_only() {
        let lib = iface("http://example.com/lib.xml");
        let other = iface("http://example.com/other.xml");
        let restrictions = vec![
            Restriction {
                interface: lib.clone(),
                range: "2.0..".parse().unwrap(),
            },
            Restriction {
                interface: other.clone(),
                range: "..!1.0".parse().unwrap(),
            },
            Restriction {
                interface: lib.clone(),
                range: "..!4.0".parse().unwrap(),
            },
        ];

        let effective = effective_versions(&restrictions, &lib);
        assert!(effective.contains(&v("3.0")));
        assert!(!effective.contains(&v("1.0")));
        assert!(!effective.contains(&v("4.0")));

        // No restrictions means everything goes
        let unconstrained = effective_versions(&restrictions, &iface("/elsewhere.xml"));
        assert!(unconstrained.contains(&v("99")));
    }
}
