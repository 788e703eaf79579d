//! Addon version ordering.
//!
//! Versions are dotted numeric strings with at most [`MAX_COMPONENTS`]
//! components, optionally followed by a free-form tag (`1.2.3`, `2.0`,
//! `1.2.3+git4`, `19.0.0~beta2`).
//!
//! Comparison pads missing components with zero, so `2.0 == 2.0.0`, and sorts
//! a tagged version after its untagged base. Strings that fail strict parsing
//! still take part in a total order: whatever numeric prefix exists becomes
//! the components and the remainder becomes the tag.

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Maximum number of numeric components a version carries.
pub const MAX_COMPONENTS: usize = 6;

/// Reasons a version string fails strict parsing.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum VersionError {
    /// The string is empty or whitespace.
    #[error("empty version string")]
    Empty,

    /// The string does not begin with a numeric component.
    #[error("version '{0}' does not start with a number")]
    NoNumericPrefix(String),

    /// More than [`MAX_COMPONENTS`] dotted numbers.
    #[error("version '{0}' has more than {MAX_COMPONENTS} numeric components")]
    TooManyComponents(String),

    /// A component is empty (`1..2`) or does not fit in 64 bits.
    #[error("version '{0}' contains an empty or out-of-range component")]
    InvalidComponent(String),
}

/// An ordered addon version.
///
/// The original string is preserved for display and for file names; ordering
/// and equality use the decomposed form.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct Version {
    raw: String,
    components: [u64; MAX_COMPONENTS],
    tag: Option<String>,
}

struct Decomposed {
    components: [u64; MAX_COMPONENTS],
    tag: Option<String>,
    problem: Option<VersionError>,
}

fn decompose(raw: &str) -> Decomposed {
    let text = raw.trim();
    let mut components = [0u64; MAX_COMPONENTS];

    if text.is_empty() {
        return Decomposed {
            components,
            tag: None,
            problem: Some(VersionError::Empty),
        };
    }

    let mut numeric_end = text
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(text.len());
    // `1.2.beta`: the dot separates the tag, it is not an empty component
    while numeric_end > 0 && text.as_bytes()[numeric_end - 1] == b'.' {
        numeric_end -= 1;
    }

    let (numeric, mut rest) = text.split_at(numeric_end);
    let mut problem = None;

    if numeric.is_empty() {
        problem = Some(VersionError::NoNumericPrefix(raw.to_string()));
    } else {
        let mut offset = 0;
        for (i, piece) in numeric.split('.').enumerate() {
            if i == MAX_COMPONENTS {
                problem.get_or_insert_with(|| VersionError::TooManyComponents(raw.to_string()));
                // keep the separating dot so the overflow stays distinguishable
                rest = &text[offset - 1..];
                break;
            }
            components[i] = if piece.is_empty() {
                problem.get_or_insert_with(|| VersionError::InvalidComponent(raw.to_string()));
                0
            } else {
                piece.parse().unwrap_or_else(|_| {
                    problem
                        .get_or_insert_with(|| VersionError::InvalidComponent(raw.to_string()));
                    u64::MAX
                })
            };
            offset += piece.len() + 1;
        }
    }

    Decomposed {
        components,
        tag: (!rest.is_empty()).then(|| rest.to_string()),
        problem,
    }
}

impl Version {
    /// Parse permissively. Never fails; see the module docs for how
    /// malformed strings are ordered.
    pub fn new(raw: &str) -> Self {
        let parts = decompose(raw);
        Self {
            raw: raw.trim().to_string(),
            components: parts.components,
            tag: parts.tag,
        }
    }

    /// Parse strictly, rejecting anything that is not `N(.N){0,5}[tag]`.
    ///
    /// # Errors
    ///
    /// Returns the first [`VersionError`] found in `raw`.
    pub fn parse_strict(raw: &str) -> Result<Self, VersionError> {
        let parts = decompose(raw);
        if let Some(problem) = parts.problem {
            return Err(problem);
        }
        Ok(Self {
            raw: raw.trim().to_string(),
            components: parts.components,
            tag: parts.tag,
        })
    }

    /// Whether the original string would pass [`Version::parse_strict`].
    pub fn is_well_formed(&self) -> bool {
        decompose(&self.raw).problem.is_none()
    }

    /// The version string as written.
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Numeric components, zero padded to [`MAX_COMPONENTS`].
    pub fn components(&self) -> &[u64; MAX_COMPONENTS] {
        &self.components
    }

    /// Free-form suffix following the numeric components, if any.
    pub fn tag(&self) -> Option<&str> {
        self.tag.as_deref()
    }
}

/// Split a tag into alternating runs of digits and non-digits.
fn tag_chunks(tag: &str) -> Vec<&str> {
    let mut chunks = Vec::new();
    let mut start = 0;
    let mut previous: Option<bool> = None;
    for (i, c) in tag.char_indices() {
        let digit = c.is_ascii_digit();
        if previous.is_some_and(|p| p != digit) {
            chunks.push(&tag[start..i]);
            start = i;
        }
        previous = Some(digit);
    }
    if start < tag.len() {
        chunks.push(&tag[start..]);
    }
    chunks
}

fn compare_chunk(a: &str, b: &str) -> Ordering {
    let a_digits = a.starts_with(|c: char| c.is_ascii_digit());
    let b_digits = b.starts_with(|c: char| c.is_ascii_digit());
    match (a_digits, b_digits) {
        (true, true) => {
            // numeric value without overflow, then spelling so `01` != `1`
            let a_trim = a.trim_start_matches('0');
            let b_trim = b.trim_start_matches('0');
            a_trim
                .len()
                .cmp(&b_trim.len())
                .then_with(|| a_trim.cmp(b_trim))
                .then_with(|| a.len().cmp(&b.len()))
        }
        (true, false) => Ordering::Less,
        (false, true) => Ordering::Greater,
        (false, false) => a.cmp(b),
    }
}

fn compare_tags(a: Option<&str>, b: Option<&str>) -> Ordering {
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(a), Some(b)) => {
            let left = tag_chunks(a);
            let right = tag_chunks(b);
            for (x, y) in left.iter().zip(&right) {
                let ord = compare_chunk(x, y);
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            left.len().cmp(&right.len())
        }
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        self.components
            .cmp(&other.components)
            .then_with(|| compare_tags(self.tag.as_deref(), other.tag.as_deref()))
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Version {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Version {}

impl Hash for Version {
    fn hash<H: Hasher>(&self, state: &mut H) {
        // components are already zero padded, so `2.0` and `2.0.0` agree
        self.components.hash(state);
        self.tag.hash(state);
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.raw)
    }
}

impl FromStr for Version {
    type Err = VersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse_strict(s)
    }
}

impl AsRef<str> for Version {
    fn as_ref(&self) -> &str {
        &self.raw
    }
}

impl From<&str> for Version {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for Version {
    fn from(s: String) -> Self {
        Self::new(&s)
    }
}

impl From<Version> for String {
    fn from(v: Version) -> Self {
        v.raw
    }
}
