//! Version bounds, ranges and specs.
//!
//! Two grammars share these types. Project compat entries use the *spec*
//! grammar (`parse`), where a bare `"1.2"` means caret. Registry files use the
//! *range* grammar ([`VersionRange::from_str`]), where `"1.2"` is the prefix
//! window of every `1.2.x` and `"0.5-0.6"` is a two-sided window.

use std::fmt;
use std::str::FromStr;

use anyhow::{bail, ensure, Context, Result};
use semver::Version;
use serde::{Deserialize, Serialize};

/// A version bound with 0 to 3 specified components.
///
/// A 0-field bound is unbounded on its side. As a lower bound, `"1.2"` admits
/// everything from `1.2.0` up; as an upper bound it admits every `1.2.x`.
#[derive(Copy, Clone, PartialEq, Eq, Hash)]
pub struct VersionBound {
    t: [u64; 3],
    n: u8,
}

impl VersionBound {
    pub const fn unbounded() -> Self {
        Self { t: [0; 3], n: 0 }
    }

    pub fn new(t: [u64; 3], n: u8) -> Self {
        assert!(n <= 3, "version bound may have at most 3 components");
        let mut t = t;
        // Unspecified components are zeroed so that structural equality works.
        for i in (n as usize)..3 {
            t[i] = 0;
        }
        Self { t, n }
    }

    pub fn exact(v: &Version) -> Self {
        Self::new([v.major, v.minor, v.patch], 3)
    }

    pub fn n(&self) -> u8 {
        self.n
    }

    /// The smallest `(major, minor, patch)` triple admitted when used as a lower bound.
    fn lower_key(&self) -> (u64, u64, u64) {
        (self.t[0], self.t[1], self.t[2])
    }

    /// The largest triple admitted when used as an upper bound (unspecified
    /// components saturate).
    fn upper_key(&self) -> (u64, u64, u64) {
        let f = |i: usize| if (i as u8) < self.n { self.t[i] } else { u64::MAX };
        if self.n == 0 {
            (u64::MAX, u64::MAX, u64::MAX)
        } else {
            (f(0), f(1), f(2))
        }
    }

    /// The lower key of the first triple *past* this bound's upper window.
    fn bump_key(&self) -> (u64, u64, u64) {
        match self.n {
            0 => (u64::MAX, u64::MAX, u64::MAX),
            1 => (self.t[0] + 1, 0, 0),
            2 => (self.t[0], self.t[1] + 1, 0),
            _ => (self.t[0], self.t[1], self.t[2] + 1),
        }
    }

    fn admits_as_lower(&self, v: &Version) -> bool {
        if self.n == 0 {
            return true;
        }
        let triple = (v.major, v.minor, v.patch);
        match triple.cmp(&self.lower_key()) {
            std::cmp::Ordering::Greater => true,
            // A prerelease of the bound itself sorts below the bound.
            std::cmp::Ordering::Equal => v.pre.is_empty(),
            std::cmp::Ordering::Less => false,
        }
    }

    fn admits_as_upper(&self, v: &Version) -> bool {
        if self.n == 0 {
            return true;
        }
        let vt = [v.major, v.minor, v.patch];
        for i in 0..(self.n as usize) {
            if vt[i] < self.t[i] {
                return true;
            }
            if vt[i] > self.t[i] {
                return false;
            }
        }
        true
    }

    pub fn parse(s: &str) -> Result<Self> {
        fn inner(s: &str) -> Result<VersionBound> {
            if s == "*" {
                return Ok(VersionBound::unbounded());
            }
            let fields: Vec<&str> = s.split('.').collect();
            ensure!(
                (1..=3).contains(&fields.len()),
                "expected 1 to 3 dot-separated components"
            );
            let mut t = [0u64; 3];
            for (i, field) in fields.iter().enumerate() {
                t[i] = field
                    .parse()
                    .map_err(|_| anyhow::anyhow!("invalid numeric component `{field}`"))?;
            }
            Ok(VersionBound::new(t, fields.len() as u8))
        }

        inner(s).with_context(|| format!("failed to parse version bound: {s}"))
    }
}

impl fmt::Display for VersionBound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.n {
            0 => write!(f, "*"),
            1 => write!(f, "{}", self.t[0]),
            2 => write!(f, "{}.{}", self.t[0], self.t[1]),
            _ => write!(f, "{}.{}.{}", self.t[0], self.t[1], self.t[2]),
        }
    }
}

impl fmt::Debug for VersionBound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "VersionBound({self})")
    }
}

impl FromStr for VersionBound {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

/// A contiguous window of versions delimited by a lower and an upper [`VersionBound`].
///
/// Both ends are inclusive in prefix terms: `1.2-1.4` admits every `1.4.x`.
#[derive(Copy, Clone, PartialEq, Eq, Hash)]
pub struct VersionRange {
    pub lower: VersionBound,
    pub upper: VersionBound,
}

impl VersionRange {
    pub const fn any() -> Self {
        Self {
            lower: VersionBound::unbounded(),
            upper: VersionBound::unbounded(),
        }
    }

    pub fn new(lower: VersionBound, upper: VersionBound) -> Self {
        Self { lower, upper }
    }

    pub fn exact(v: &Version) -> Self {
        let b = VersionBound::exact(v);
        Self::new(b, b)
    }

    pub fn contains(&self, v: &Version) -> bool {
        self.lower.admits_as_lower(v) && self.upper.admits_as_upper(v)
    }

    pub fn is_empty(&self) -> bool {
        self.lower.lower_key() > self.upper.upper_key()
    }

    pub fn intersect(&self, other: &VersionRange) -> Option<VersionRange> {
        let lower = if self.lower.lower_key() >= other.lower.lower_key() {
            self.lower
        } else {
            other.lower
        };
        let upper = if self.upper.upper_key() <= other.upper.upper_key() {
            self.upper
        } else {
            other.upper
        };
        let range = VersionRange::new(lower, upper);
        (!range.is_empty()).then_some(range)
    }

    /// Whether `other` overlaps this range or starts right past its end,
    /// so that the two merge into one window.
    fn touches(&self, other: &VersionRange) -> bool {
        other.lower.lower_key() <= self.upper.bump_key()
    }
}

impl FromStr for VersionRange {
    type Err = anyhow::Error;

    /// Parses the registry range grammar: `"*"`, a bare prefix (`"1.2"`), or a
    /// hyphenated window (`"0.5-0.6"`).
    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if s == "*" {
            return Ok(VersionRange::any());
        }
        if let Some((lo, hi)) = s.split_once('-') {
            let lower = VersionBound::parse(lo.trim())?;
            let upper = VersionBound::parse(hi.trim())?;
            ensure!(
                lower.n > 0 && upper.n > 0,
                "hyphenated range must have bounds on both sides: {s}"
            );
            return Ok(VersionRange::new(lower, upper));
        }
        let bound = VersionBound::parse(s)?;
        Ok(VersionRange::new(bound, bound))
    }
}

impl fmt::Display for VersionRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.lower.n, self.upper.n) {
            (0, 0) => write!(f, "*"),
            (_, 0) => write!(f, ">= {}", self.lower),
            _ if self.lower == self.upper => {
                if self.lower.n == 3 {
                    write!(f, "= {}", self.lower)
                } else {
                    write!(f, "{} - {}", self.lower, self.upper)
                }
            }
            _ => write!(f, "{} - {}", self.lower, self.upper),
        }
    }
}

impl fmt::Debug for VersionRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "VersionRange({self})")
    }
}

/// A union of non-overlapping [`VersionRange`]s, canonicalized by
/// sort-and-merge.
///
/// The empty spec matches nothing; [`VersionSpec::any`] matches everything.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct VersionSpec {
    ranges: Vec<VersionRange>,
}

impl VersionSpec {
    pub fn any() -> Self {
        Self {
            ranges: vec![VersionRange::any()],
        }
    }

    pub fn empty() -> Self {
        Self { ranges: vec![] }
    }

    pub fn exact(v: &Version) -> Self {
        Self::from_ranges(vec![VersionRange::exact(v)])
    }

    pub fn from_ranges(ranges: Vec<VersionRange>) -> Self {
        let mut ranges: Vec<VersionRange> = ranges.into_iter().filter(|r| !r.is_empty()).collect();
        ranges.sort_by_key(|r| (r.lower.lower_key(), r.upper.upper_key()));
        let mut merged: Vec<VersionRange> = Vec::with_capacity(ranges.len());
        for range in ranges {
            match merged.last_mut() {
                Some(last) if last.touches(&range) => {
                    if range.upper.upper_key() > last.upper.upper_key() {
                        last.upper = range.upper;
                    }
                }
                _ => merged.push(range),
            }
        }
        Self { ranges: merged }
    }

    pub fn ranges(&self) -> &[VersionRange] {
        &self.ranges
    }

    /// Whether this spec matches nothing at all.
    ///
    /// An empty intersection is legal and represented this way.
    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    pub fn is_any(&self) -> bool {
        self.ranges.len() == 1
            && self.ranges[0].lower.n == 0
            && self.ranges[0].upper.n == 0
    }

    pub fn contains(&self, v: &Version) -> bool {
        self.ranges.iter().any(|r| r.contains(v))
    }

    pub fn intersect(&self, other: &VersionSpec) -> VersionSpec {
        let mut out = Vec::new();
        for a in &self.ranges {
            for b in &other.ranges {
                if let Some(r) = a.intersect(b) {
                    out.push(r);
                }
            }
        }
        Self::from_ranges(out)
    }

    pub fn union(&self, other: &VersionSpec) -> VersionSpec {
        let mut ranges = self.ranges.clone();
        ranges.extend(other.ranges.iter().copied());
        Self::from_ranges(ranges)
    }

    /// Parses the spec grammar used by project compat entries.
    ///
    /// Atoms are comma- or whitespace-separated. A bare `"X.Y"` means caret.
    pub fn parse(s: &str) -> Result<Self> {
        let mut atoms: Vec<&str> = Vec::new();
        for chunk in s.split(',') {
            let chunk = chunk.trim();
            if chunk.is_empty() {
                continue;
            }
            // A hyphenated range atom contains spaces; everything else
            // whitespace-splits into further atoms.
            if chunk.contains(" - ") {
                atoms.push(chunk);
            } else {
                atoms.extend(chunk.split_whitespace().filter(|a| !a.is_empty()));
            }
        }
        ensure!(!atoms.is_empty(), "empty version spec: `{s}`");

        // Glue `=`/`>=`/`^`/`~` operators back to their operand when the user
        // wrote them space-separated, e.g. `= 1.2.3`.
        let mut fused: Vec<String> = Vec::with_capacity(atoms.len());
        for atom in atoms {
            match fused.last().map(String::as_str) {
                Some("=" | ">=" | "^" | "~") => {
                    let op = fused.pop().unwrap();
                    fused.push(format!("{op}{atom}"));
                }
                _ => fused.push(atom.to_string()),
            }
        }

        let mut ranges = Vec::with_capacity(fused.len());
        for atom in &fused {
            ranges.push(
                parse_spec_atom(atom).with_context(|| format!("invalid version spec: `{s}`"))?,
            );
        }
        Ok(Self::from_ranges(ranges))
    }
}

fn parse_spec_atom(atom: &str) -> Result<VersionRange> {
    let atom = atom.trim();
    if atom == "*" {
        return Ok(VersionRange::any());
    }
    if let Some((lo, hi)) = atom.split_once(" - ") {
        let lower = VersionBound::parse(lo.trim())?;
        let upper = VersionBound::parse(hi.trim())?;
        ensure!(
            lower.n > 0 && upper.n > 0,
            "hyphenated range must have bounds on both sides"
        );
        return Ok(VersionRange::new(lower, upper));
    }
    if let Some(rest) = atom.strip_prefix(">=") {
        let lower = VersionBound::parse(rest.trim())?;
        return Ok(VersionRange::new(lower, VersionBound::unbounded()));
    }
    if let Some(rest) = atom.strip_prefix('=') {
        let bound = VersionBound::parse(rest.trim())?;
        return Ok(VersionRange::new(bound, bound));
    }
    if let Some(rest) = atom.strip_prefix('~') {
        let bound = VersionBound::parse(rest.trim())?;
        ensure!(bound.n > 0, "tilde spec must name a version");
        return Ok(tilde_range(bound));
    }
    let rest = atom.strip_prefix('^').unwrap_or(atom);
    let bound = VersionBound::parse(rest.trim())?;
    ensure!(bound.n > 0, "caret spec must name a version");
    Ok(caret_range(bound))
}

/// `^1.2.3 → [1.2.3, 2.0.0)`; zero-major narrowing: `^0.2.3 → [0.2.3, 0.3.0)`,
/// `^0.0.3 → [0.0.3, 0.0.4)`.
fn caret_range(bound: VersionBound) -> VersionRange {
    let n = bound.n as usize;
    let nonzero = (0..n).find(|&i| bound.t[i] != 0);
    let upper = match nonzero {
        Some(i) => VersionBound::new(bound.t, (i + 1) as u8),
        // All specified components are zero: the window is the prefix itself.
        None => bound,
    };
    VersionRange::new(bound, upper)
}

/// Tilde fixes the last specified component's parent:
/// `~1.2.3 → [1.2.3, 1.3.0)`, `~1.2 → [1.2.0, 1.3.0)`, `~1 → [1.0.0, 2.0.0)`.
fn tilde_range(bound: VersionBound) -> VersionRange {
    let upper = VersionBound::new(bound.t, bound.n.min(2));
    VersionRange::new(bound, upper)
}

impl FromStr for VersionSpec {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for VersionSpec {
    type Error = anyhow::Error;

    fn try_from(s: String) -> Result<Self> {
        Self::parse(&s)
    }
}

impl From<VersionSpec> for String {
    fn from(spec: VersionSpec) -> Self {
        spec.to_string()
    }
}

impl fmt::Display for VersionSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.ranges.is_empty() {
            return write!(f, "\u{2205}");
        }
        for (i, range) in self.ranges.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{range}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for VersionSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "VersionSpec({self})")
    }
}

#[cfg(test)]
mod tests {
    use semver::Version;
    use test_case::test_case;

    use super::{VersionBound, VersionRange, VersionSpec};

    fn v(s: &str) -> Version {
        Version::parse(s).unwrap()
    }

    #[test_case("^1.2.3", "1.2.3", true)]
    #[test_case("^1.2.3", "1.99.0", true)]
    #[test_case("^1.2.3", "2.0.0", false)]
    #[test_case("^1.2.3", "1.2.2", false)]
    #[test_case("^0.2.3", "0.2.9", true)]
    #[test_case("^0.2.3", "0.3.0", false)]
    #[test_case("^0.0.3", "0.0.3", true)]
    #[test_case("^0.0.3", "0.0.4", false)]
    fn caret(spec: &str, version: &str, expected: bool) {
        let spec = VersionSpec::parse(spec).unwrap();
        assert_eq!(spec.contains(&v(version)), expected);
    }

    #[test_case("~1.2.3", "1.2.3", true)]
    #[test_case("~1.2.3", "1.2.99", true)]
    #[test_case("~1.2.3", "1.3.0", false)]
    #[test_case("~1.2", "1.2.0", true)]
    #[test_case("~1.2", "1.3.0", false)]
    #[test_case("~1", "1.9.9", true)]
    #[test_case("~1", "2.0.0", false)]
    fn tilde(spec: &str, version: &str, expected: bool) {
        let spec = VersionSpec::parse(spec).unwrap();
        assert_eq!(spec.contains(&v(version)), expected);
    }

    #[test]
    fn bare_atom_is_caret() {
        let spec = VersionSpec::parse("1.2").unwrap();
        assert!(spec.contains(&v("1.2.0")));
        assert!(spec.contains(&v("1.9.0")));
        assert!(!spec.contains(&v("2.0.0")));
        assert!(!spec.contains(&v("1.1.9")));
    }

    #[test]
    fn equality_and_inequality_atoms() {
        let eq = VersionSpec::parse("= 1.2.3").unwrap();
        assert!(eq.contains(&v("1.2.3")));
        assert!(!eq.contains(&v("1.2.4")));

        let ge = VersionSpec::parse(">= 1.2").unwrap();
        assert!(ge.contains(&v("1.2.0")));
        assert!(ge.contains(&v("99.0.0")));
        assert!(!ge.contains(&v("1.1.9")));
    }

    #[test]
    fn hyphen_range_upper_is_prefix_inclusive() {
        let spec = VersionSpec::parse("1.2 - 2.3").unwrap();
        assert!(spec.contains(&v("1.2.0")));
        assert!(spec.contains(&v("2.3.9")));
        assert!(!spec.contains(&v("2.4.0")));
        assert!(!spec.contains(&v("1.1.0")));
    }

    #[test]
    fn union_of_atoms() {
        let spec = VersionSpec::parse("0.5, 0.7").unwrap();
        assert!(spec.contains(&v("0.5.3")));
        assert!(!spec.contains(&v("0.6.0")));
        assert!(spec.contains(&v("0.7.1")));
    }

    #[test]
    fn adjacent_ranges_merge() {
        let spec = VersionSpec::parse("0.5, 0.6").unwrap();
        assert_eq!(spec.ranges().len(), 1);
        assert!(spec.contains(&v("0.5.0")));
        assert!(spec.contains(&v("0.6.9")));
        assert!(!spec.contains(&v("0.7.0")));
    }

    #[test]
    fn prerelease_sorts_below_lower_bound() {
        let spec = VersionSpec::parse("^1.2").unwrap();
        assert!(!spec.contains(&v("1.2.0-rc1")));
        assert!(spec.contains(&v("1.3.0-rc1")));
    }

    #[test]
    fn intersect_distributes_over_contains() {
        let a = VersionSpec::parse("0.4, 1.1 - 2").unwrap();
        let b = VersionSpec::parse(">= 1.2").unwrap();
        let i = a.intersect(&b);
        for version in ["0.4.2", "1.1.0", "1.2.0", "1.9.9", "2.1.0", "3.0.0"] {
            let version = v(version);
            assert_eq!(
                i.contains(&version),
                a.contains(&version) && b.contains(&version),
                "mismatch at {version}"
            );
        }
    }

    #[test]
    fn empty_intersection_is_legal() {
        let a = VersionSpec::parse("^1").unwrap();
        let b = VersionSpec::parse("^2").unwrap();
        let i = a.intersect(&b);
        assert!(i.is_empty());
        assert!(!i.contains(&v("1.5.0")));
        assert!(!i.contains(&v("2.5.0")));
    }

    #[test]
    fn structural_equality_after_canonicalization() {
        let a = VersionSpec::parse("0.6, 0.5").unwrap();
        let b = VersionSpec::parse("0.5 - 0.6").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn registry_range_grammar() {
        let r: VersionRange = "0.5-0.6".parse().unwrap();
        assert!(r.contains(&v("0.5.0")));
        assert!(r.contains(&v("0.6.9")));
        assert!(!r.contains(&v("0.7.0")));

        let prefix: VersionRange = "1.2".parse().unwrap();
        assert!(prefix.contains(&v("1.2.9")));
        assert!(!prefix.contains(&v("1.3.0")));

        let star: VersionRange = "*".parse().unwrap();
        assert!(star.contains(&v("0.0.1")));
    }

    #[test]
    fn display_round_trips_through_parse() {
        for s in ["^1.2.3", "~0.3", ">= 2", "= 1.0.0", "1.2 - 1.4", "*"] {
            let spec = VersionSpec::parse(s).unwrap();
            let reparsed = VersionSpec::parse(&spec.to_string()).unwrap();
            assert_eq!(spec, reparsed, "failed for `{s}`");
        }
    }

    #[test]
    fn invalid_atoms_fail() {
        for s in ["abc", "1.2.3.4", "^", ">=", "1.x", ""] {
            assert!(VersionSpec::parse(s).is_err(), "`{s}` should fail");
        }
    }

    #[test]
    fn bound_parse_display() {
        for s in ["*", "1", "1.2", "1.2.3"] {
            let b = VersionBound::parse(s).unwrap();
            assert_eq!(b.to_string(), s);
        }
    }
}
