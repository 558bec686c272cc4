// src/version/mod.rs

//! Version parsing, ordering and range membership
//!
//! Feed versions are dotted-integer lists separated by named modifiers,
//! e.g. `1.2`, `1.2-pre3`, `0.9-rc1-post`. Modifiers sort
//! `pre < rc < (none) < post`, so `1.0-pre1 < 1.0-rc1 < 1.0 < 1.0-post`.
//!
//! Ranges are unions of intervals with an inclusive lower bound and an
//! exclusive upper bound (`1.0..!2.0`), either bound optional. An exact
//! version used as a range segment is the closed singleton interval.

use crate::error::{Error, Result};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

/// Named separator between dotted-integer lists in a version
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Modifier {
    Pre,
    Rc,
    /// Absence of a modifier; sorts between `rc` and `post`
    None,
    Post,
}

impl Modifier {
    fn as_str(&self) -> &'static str {
        match self {
            Modifier::Pre => "pre",
            Modifier::Rc => "rc",
            Modifier::None => "",
            Modifier::Post => "post",
        }
    }
}

/// One dotted-integer list plus the modifier that introduced it
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct Part {
    modifier: Modifier,
    numbers: Vec<i64>,
}

impl Part {
    /// The padding part used when comparing versions of unequal length.
    /// `1.0` and `1.0-post` compare as if the former ended in this.
    fn filler() -> Self {
        Part {
            modifier: Modifier::None,
            numbers: Vec::new(),
        }
    }

    fn cmp_part(&self, other: &Part) -> Ordering {
        self.modifier
            .cmp(&other.modifier)
            .then_with(|| self.numbers.cmp(&other.numbers))
    }
}

/// An immutable, totally ordered implementation version
///
/// Equality and hashing are structural: `1.0` and `1` are distinct
/// versions (and `1 < 1.0`).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Version {
    parts: Vec<Part>,
}

impl Version {
    /// Parse a version string, failing with `InvalidVersion` on malformed
    /// input. Convenience alias for the `FromStr` impl.
    pub fn parse(s: &str) -> Result<Self> {
        s.parse()
    }
}

fn parse_dotted(chunk: &str, input: &str) -> Result<Vec<i64>> {
    chunk
        .split('.')
        .map(|n| {
            n.parse::<i64>().map_err(|_| Error::InvalidVersion {
                input: input.to_string(),
                reason: format!("'{}' is not an integer", n),
            })
        })
        .collect()
}

impl FromStr for Version {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        if s.is_empty() {
            return Err(Error::InvalidVersion {
                input: s.to_string(),
                reason: "empty string".to_string(),
            });
        }

        let mut parts = Vec::new();
        for (i, chunk) in s.split('-').enumerate() {
            if chunk.is_empty() {
                return Err(Error::InvalidVersion {
                    input: s.to_string(),
                    reason: "empty segment".to_string(),
                });
            }

            let (modifier, rest) = if i == 0 {
                (Modifier::None, chunk)
            } else if let Some(rest) = chunk.strip_prefix("pre") {
                (Modifier::Pre, rest)
            } else if let Some(rest) = chunk.strip_prefix("rc") {
                (Modifier::Rc, rest)
            } else if let Some(rest) = chunk.strip_prefix("post") {
                (Modifier::Post, rest)
            } else {
                (Modifier::None, chunk)
            };

            // The first list is mandatory; modifier lists may be bare
            // ("1.0-post") or carry trailing numbers ("1.0-pre2.1").
            let numbers = if rest.is_empty() {
                if i == 0 {
                    return Err(Error::InvalidVersion {
                        input: s.to_string(),
                        reason: "missing leading dotted list".to_string(),
                    });
                }
                Vec::new()
            } else {
                parse_dotted(rest, s)?
            };

            parts.push(Part { modifier, numbers });
        }

        Ok(Version { parts })
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        let len = self.parts.len().max(other.parts.len());
        let filler = Part::filler();
        for i in 0..len {
            let a = self.parts.get(i).unwrap_or(&filler);
            let b = other.parts.get(i).unwrap_or(&filler);
            match a.cmp_part(b) {
                Ordering::Equal => {}
                ord => return ord,
            }
        }
        Ordering::Equal
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, part) in self.parts.iter().enumerate() {
            if i > 0 {
                write!(f, "-{}", part.modifier.as_str())?;
            }
            let dotted = part
                .numbers
                .iter()
                .map(|n| n.to_string())
                .collect::<Vec<_>>()
                .join(".");
            write!(f, "{}", dotted)?;
        }
        Ok(())
    }
}

/// One interval of a version range
///
/// The lower bound is inclusive. The upper bound is exclusive except for
/// the singleton interval produced by an exact-version segment.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Interval {
    lo: Option<Version>,
    hi: Option<Version>,
    hi_open: bool,
}

impl Interval {
    fn unbounded() -> Self {
        Interval {
            lo: None,
            hi: None,
            hi_open: true,
        }
    }

    fn exact(v: Version) -> Self {
        Interval {
            lo: Some(v.clone()),
            hi: Some(v),
            hi_open: false,
        }
    }

    fn contains(&self, v: &Version) -> bool {
        if let Some(lo) = &self.lo {
            if v < lo {
                return false;
            }
        }
        match &self.hi {
            None => true,
            Some(hi) if self.hi_open => v < hi,
            Some(hi) => v <= hi,
        }
    }

    /// Intersection of two intervals, or `None` when they do not overlap
    fn intersect(&self, other: &Interval) -> Option<Interval> {
        let lo = match (&self.lo, &other.lo) {
            (None, b) => b.clone(),
            (a, None) => a.clone(),
            (Some(a), Some(b)) => Some(a.max(b).clone()),
        };
        let (hi, hi_open) = match (&self.hi, &other.hi) {
            (None, None) => (None, true),
            (Some(h), None) => (Some(h.clone()), self.hi_open),
            (None, Some(h)) => (Some(h.clone()), other.hi_open),
            (Some(a), Some(b)) => match a.cmp(b) {
                Ordering::Less => (Some(a.clone()), self.hi_open),
                Ordering::Greater => (Some(b.clone()), other.hi_open),
                // Same endpoint: open wins over closed
                Ordering::Equal => (Some(a.clone()), self.hi_open || other.hi_open),
            },
        };

        if let (Some(lo), Some(hi)) = (&lo, &hi) {
            match lo.cmp(hi) {
                Ordering::Greater => return None,
                Ordering::Equal if hi_open => return None,
                _ => {}
            }
        }
        Some(Interval { lo, hi, hi_open })
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.lo, &self.hi, self.hi_open) {
            (Some(lo), Some(hi), false) if lo == hi => write!(f, "{}", lo),
            (lo, hi, _) => {
                if let Some(lo) = lo {
                    write!(f, "{}", lo)?;
                }
                write!(f, "..")?;
                if let Some(hi) = hi {
                    write!(f, "!{}", hi)?;
                }
                Ok(())
            }
        }
    }
}

/// A union of version intervals
///
/// The wire form joins interval segments with `|`:
/// `1.0..!2.0 | 3.5 | 4.0..`. An empty union (possible only as the result
/// of an intersection) matches no version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionRange {
    intervals: Vec<Interval>,
}

impl VersionRange {
    /// The range matching every version
    pub fn any() -> Self {
        VersionRange {
            intervals: vec![Interval::unbounded()],
        }
    }

    /// The range matching no version
    pub fn none() -> Self {
        VersionRange {
            intervals: Vec::new(),
        }
    }

    /// The closed singleton range holding exactly `v`
    pub fn exact(v: Version) -> Self {
        VersionRange {
            intervals: vec![Interval::exact(v)],
        }
    }

    pub fn contains(&self, v: &Version) -> bool {
        self.intervals.iter().any(|i| i.contains(v))
    }

    /// True when no version can satisfy this range
    pub fn is_empty(&self) -> bool {
        self.intervals.is_empty()
    }

    /// The range matching versions in both `self` and `other`
    pub fn intersect(&self, other: &VersionRange) -> VersionRange {
        let mut intervals = Vec::new();
        for a in &self.intervals {
            for b in &other.intervals {
                if let Some(i) = a.intersect(b) {
                    intervals.push(i);
                }
            }
        }
        VersionRange { intervals }
    }
}

impl FromStr for VersionRange {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let bad = |reason: &str| Error::InvalidRange {
            input: s.to_string(),
            reason: reason.to_string(),
        };

        let mut intervals = Vec::new();
        for segment in s.split('|') {
            let segment = segment.trim();
            if segment.is_empty() {
                return Err(bad("empty segment"));
            }

            if let Some((lo, hi)) = segment.split_once("..") {
                let lo = if lo.is_empty() {
                    None
                } else {
                    Some(lo.parse::<Version>()?)
                };
                let hi = if hi.is_empty() {
                    None
                } else {
                    // Upper bounds are exclusive and must say so
                    let hi = hi
                        .strip_prefix('!')
                        .ok_or_else(|| bad("upper bound must be written '..!version'"))?;
                    Some(hi.parse::<Version>()?)
                };
                intervals.push(Interval {
                    lo,
                    hi,
                    hi_open: true,
                });
            } else {
                intervals.push(Interval::exact(segment.parse()?));
            }
        }
        Ok(VersionRange { intervals })
    }
}

impl fmt::Display for VersionRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, interval) in self.intervals.iter().enumerate() {
            if i > 0 {
                write!(f, " | ")?;
            }
            write!(f, "{}", interval)?;
        }
        Ok(())
    }
}

/// Shorthand bound pair: `not-before X, before Y`
///
/// Feeds express most restrictions this way; the solver works on the
/// equivalent [`VersionRange`].
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Constraint {
    pub not_before: Option<Version>,
    pub before: Option<Version>,
}

impl Constraint {
    pub fn not_before(v: Version) -> Self {
        Constraint {
            not_before: Some(v),
            before: None,
        }
    }

    pub fn before(v: Version) -> Self {
        Constraint {
            not_before: None,
            before: Some(v),
        }
    }

    pub fn to_range(&self) -> VersionRange {
        VersionRange {
            intervals: vec![Interval {
                lo: self.not_before.clone(),
                hi: self.before.clone(),
                hi_open: true,
            }],
        }
    }
}
