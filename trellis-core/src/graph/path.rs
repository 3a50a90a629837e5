//! Paths and Dependency Keys
//!
//! Every location in a state tree is addressed by a [`Path`]: the ordered
//! property names leading from the root to that location. Sequence indices are
//! ordinary decimal segments, so `items.3.qty` names the `qty` field of the
//! fourth element of `items`.
//!
//! A [`DepKey`] is what a tracking scope records when it reads something.
//! Raw keys name a leaf location; computed keys name the location of a derived
//! accessor. The two render differently so they can never collide.

use std::fmt;

use serde::{Serialize, Serializer};
use smallvec::SmallVec;

/// Separator used when rendering a path as a canonical key.
pub const SEPARATOR: char = '.';

/// Reserved prefix for the canonical form of computed keys.
pub const COMPUTED_PREFIX: &str = "$computed:";

/// Synthetic segment that stands for the element count of a sequence.
pub const LENGTH: &str = "length";

/// A single property name used to step from a node to one of its children.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Key(String);

impl Key {
    /// The key as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Interpret the key as a sequence index.
    pub fn index(&self) -> Option<usize> {
        // `+1` and `01` parse with `str::parse`, but they are not indices.
        if self.0.is_empty() || (self.0.len() > 1 && self.0.starts_with('0')) {
            return None;
        }
        if !self.0.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        self.0.parse().ok()
    }

    /// Whether this is the synthetic `length` key.
    pub fn is_length(&self) -> bool {
        self.0 == LENGTH
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Key {
    fn from(key: &str) -> Self {
        Self(key.to_owned())
    }
}

impl From<String> for Key {
    fn from(key: String) -> Self {
        Self(key)
    }
}

impl From<&String> for Key {
    fn from(key: &String) -> Self {
        Self(key.clone())
    }
}

impl From<&Key> for Key {
    fn from(key: &Key) -> Self {
        key.clone()
    }
}

impl From<usize> for Key {
    fn from(index: usize) -> Self {
        Self(index.to_string())
    }
}

/// An absolute location in a state tree.
///
/// Equality is segment-wise, and so are the prefix relations: `items.1` is
/// not an ancestor of `items.10`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Path(SmallVec<[String; 6]>);

impl Path {
    /// The empty path, which addresses a state root.
    pub fn root() -> Self {
        Self(SmallVec::new())
    }

    /// Build a path from its segments.
    pub fn from_segments<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(segments.into_iter().map(Into::into).collect())
    }

    /// Extend the path by one segment.
    pub fn child(&self, key: impl Into<Key>) -> Self {
        let mut segments = self.0.clone();
        segments.push(key.into().0);
        Self(segments)
    }

    /// The path of the parent location, or `None` for the root.
    pub fn parent(&self) -> Option<Self> {
        if self.0.is_empty() {
            return None;
        }
        Some(Self(self.0[..self.0.len() - 1].iter().cloned().collect()))
    }

    pub fn segments(&self) -> &[String] {
        &self.0
    }

    pub fn last(&self) -> Option<&str> {
        self.0.last().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    /// Whether `self` equals `other` or lies beneath it.
    pub fn starts_with(&self, other: &Path) -> bool {
        self.0.len() >= other.0.len() && self.0[..other.0.len()] == other.0[..]
    }

    /// Whether one of the two paths is an ancestor of (or equal to) the other.
    pub fn is_related(&self, other: &Path) -> bool {
        self.starts_with(other) || other.starts_with(self)
    }

    /// Every non-empty prefix, shortest first. The path itself is included.
    ///
    /// `a.b.c` yields `a`, `a.b`, `a.b.c`.
    pub fn prefixes(&self) -> impl Iterator<Item = Path> + '_ {
        (1..=self.0.len()).map(move |n| Self(self.0[..n].iter().cloned().collect()))
    }

    /// Every non-empty strict prefix, shortest first.
    pub fn strict_prefixes(&self) -> impl Iterator<Item = Path> + '_ {
        (1..self.0.len()).map(move |n| Self(self.0[..n].iter().cloned().collect()))
    }

    /// The canonical string key. Lossy when a segment contains
    /// [`SEPARATOR`]; compare paths, not keys.
    pub fn key(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, segment) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, "{SEPARATOR}")?;
            }
            f.write_str(segment)?;
        }
        Ok(())
    }
}

impl From<&str> for Path {
    /// Parse a canonical key. The empty string is the root.
    ///
    /// Every separator starts a new segment, so a path whose segments contain
    /// `.` themselves does not survive a trip through its string form. Build
    /// such paths with [`Path::from_segments`] or [`Path::child`].
    fn from(key: &str) -> Self {
        if key.is_empty() {
            return Self::root();
        }
        Self(key.split(SEPARATOR).map(str::to_owned).collect())
    }
}

impl Serialize for Path {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// What a tracking scope records when it reads through a store.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DepKey {
    /// A leaf location (or an opaque box, or a sequence's `length`).
    Raw(Path),
    /// A derived accessor, identified by the path it is defined at.
    Computed(Path),
}

impl DepKey {
    pub fn path(&self) -> &Path {
        match self {
            DepKey::Raw(path) | DepKey::Computed(path) => path,
        }
    }

    pub fn is_computed(&self) -> bool {
        matches!(self, DepKey::Computed(_))
    }
}

impl fmt::Display for DepKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DepKey::Raw(path) => write!(f, "{path}"),
            DepKey::Computed(path) => write!(f, "{COMPUTED_PREFIX}{path}"),
        }
    }
}

impl Serialize for DepKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}
