//! Structural paths into the state tree
//!
//! A [`Path`] is an ordered sequence of segments addressing a location in
//! a store's live state. Paths are re-resolved on every read; they are
//! never pointers into materialized data.
//!
//! Subscriber routing is built on the *overlap* relation: two paths
//! overlap iff one is a prefix of the other (equality included). The
//! empty path is the store root and overlaps everything.

use std::fmt;

/// One step of a [`Path`]: an object key or a list index.
///
/// Construction from a string applies numeric-string coercion: a string
/// of decimal digits with no leading zero (other than `"0"` itself)
/// becomes an [`Segment::Index`], so `root["3"]` and `root[3]` record
/// identical paths. All other strings stay [`Segment::Key`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Segment {
    Key(String),
    Index(u64),
}

impl Segment {
    /// Whether `s` coerces to an index segment.
    fn is_canonical_number(s: &str) -> bool {
        if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
            return false;
        }
        // "0" is canonical; "03" is a key
        s == "0" || !s.starts_with('0')
    }

    /// The string form of this segment, as used for record-id lookups.
    pub fn as_id(&self) -> String {
        match self {
            Segment::Key(k) => k.clone(),
            Segment::Index(i) => i.to_string(),
        }
    }
}

impl From<&str> for Segment {
    fn from(s: &str) -> Self {
        if Segment::is_canonical_number(s) {
            // Canonical decimal strings always fit u64 far below overflow
            // territory in practice; fall back to a key when they do not.
            match s.parse::<u64>() {
                Ok(n) => Segment::Index(n),
                Err(_) => Segment::Key(s.to_string()),
            }
        } else {
            Segment::Key(s.to_string())
        }
    }
}

impl From<String> for Segment {
    fn from(s: String) -> Self {
        Segment::from(s.as_str())
    }
}

impl From<&String> for Segment {
    fn from(s: &String) -> Self {
        Segment::from(s.as_str())
    }
}

impl From<u64> for Segment {
    fn from(i: u64) -> Self {
        Segment::Index(i)
    }
}

impl From<usize> for Segment {
    fn from(i: usize) -> Self {
        Segment::Index(i as u64)
    }
}

impl fmt::Display for Segment {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        match self {
            Segment::Key(k) => write!(f, "{k}"),
            Segment::Index(i) => write!(f, "{i}"),
        }
    }
}

/// An ordered sequence of segments addressing a location in the state
/// tree. The empty path denotes the store root.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct Path {
    segments: Vec<Segment>,
}

impl Path {
    /// The store root.
    pub fn root() -> Self {
        Self::default()
    }

    /// Build a path from anything segment-like. String segments go
    /// through numeric coercion.
    ///
    /// ```
    /// use statesync_core::{Path, Segment};
    ///
    /// let p = Path::new(["users", "3", "name"]);
    /// assert_eq!(p.segments()[1], Segment::Index(3));
    /// ```
    pub fn new<I>(segments: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<Segment>,
    {
        Self {
            segments: segments.into_iter().map(Into::into).collect(),
        }
    }

    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn first(&self) -> Option<&Segment> {
        self.segments.first()
    }

    /// A new path with one more segment appended.
    pub fn child(
        &self,
        segment: impl Into<Segment>,
    ) -> Self {
        let mut segments = self.segments.clone();
        segments.push(segment.into());
        Self { segments }
    }

    /// A new path with all of `rest`'s segments appended.
    pub fn join(
        &self,
        rest: &Path,
    ) -> Self {
        let mut segments = self.segments.clone();
        segments.extend(rest.segments.iter().cloned());
        Self { segments }
    }

    /// Whether `self` is a prefix of `other` (equality included).
    pub fn is_prefix_of(
        &self,
        other: &Path,
    ) -> bool {
        self.segments.len() <= other.segments.len()
            && self.segments.iter().zip(other.segments.iter()).all(|(a, b)| a == b)
    }

    /// The subscriber-routing relation: one path is a prefix of the
    /// other. The root overlaps every path.
    pub fn overlaps(
        &self,
        other: &Path,
    ) -> bool {
        self.is_prefix_of(other) || other.is_prefix_of(self)
    }
}

impl<S: Into<Segment>> FromIterator<S> for Path {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Path::new(iter)
    }
}

impl fmt::Display for Path {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        if self.segments.is_empty() {
            return write!(f, "$");
        }
        write!(f, "$")?;
        for segment in &self.segments {
            write!(f, ".{segment}")?;
        }
        Ok(())
    }
}
