//! Property paths for addressing within configuration trees
//!
//! Provides [`PropertyPath`] for concrete locations (`series[0].marker.size`)
//! and for patterns with wildcard array indices (`series[].type`).

use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

/// One step of a [`PropertyPath`]
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Segment {
    /// Object key
    Key(String),
    /// Concrete array index
    Index(usize),
    /// Any array index (patterns only)
    AnyIndex,
}

/// Path within a configuration tree
///
/// Displayed in dotted/bracket notation:
/// - `["series", 0, "type"]` → `series[0].type`
/// - `["axes", *, "title"]` → `axes[].title`
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct PropertyPath(Vec<Segment>);

impl PropertyPath {
    /// Create new path from segments
    #[inline]
    #[must_use]
    pub fn new(segments: Vec<Segment>) -> Self {
        Self(segments)
    }

    /// Empty path (root)
    #[inline]
    #[must_use]
    pub fn root() -> Self {
        Self(Vec::new())
    }

    /// Get path segments
    #[inline]
    #[must_use]
    pub fn segments(&self) -> &[Segment] {
        &self.0
    }

    /// Number of segments
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Check if path is empty (root)
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Append a key segment, returning new path
    #[inline]
    #[must_use]
    pub fn key(&self, key: impl Into<String>) -> Self {
        let mut new = self.clone();
        new.0.push(Segment::Key(key.into()));
        new
    }

    /// Append an index segment, returning new path
    #[inline]
    #[must_use]
    pub fn index(&self, index: usize) -> Self {
        let mut new = self.clone();
        new.0.push(Segment::Index(index));
        new
    }

    /// Append a wildcard index segment, returning new path
    #[inline]
    #[must_use]
    pub fn any_index(&self) -> Self {
        let mut new = self.clone();
        new.0.push(Segment::AnyIndex);
        new
    }

    /// Last key segment, skipping trailing indices
    #[must_use]
    pub fn last_key(&self) -> Option<&str> {
        self.0.iter().rev().find_map(|seg| match seg {
            Segment::Key(k) => Some(k.as_str()),
            _ => None,
        })
    }

    /// Check whether this pattern matches a concrete path
    ///
    /// `[]` in the pattern matches any index; everything else must be equal.
    #[must_use]
    pub fn matches(&self, concrete: &Self) -> bool {
        self.0.len() == concrete.0.len()
            && self.0.iter().zip(&concrete.0).all(|(pat, seg)| match (pat, seg) {
                (Segment::AnyIndex, Segment::Index(_) | Segment::AnyIndex) => true,
                (a, b) => a == b,
            })
    }

    /// Replace every concrete index with a wildcard
    ///
    /// `series[3].marker` → `series[].marker`
    #[must_use]
    pub fn generalize(&self) -> Self {
        Self(
            self.0
                .iter()
                .map(|seg| match seg {
                    Segment::Index(_) => Segment::AnyIndex,
                    other => other.clone(),
                })
                .collect(),
        )
    }
}

impl Display for PropertyPath {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        for (i, seg) in self.0.iter().enumerate() {
            match seg {
                Segment::Key(k) if i == 0 => write!(f, "{k}")?,
                Segment::Key(k) => write!(f, ".{k}")?,
                Segment::Index(idx) => write!(f, "[{idx}]")?,
                Segment::AnyIndex => f.write_str("[]")?,
            }
        }
        Ok(())
    }
}

impl FromStr for PropertyPath {
    type Err = PathError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Ok(Self::root());
        }

        let mut segments = Vec::new();
        for part in s.split('.') {
            let (key, mut rest) = match part.find('[') {
                Some(pos) => part.split_at(pos),
                None => (part, ""),
            };
            if key.is_empty() && (segments.is_empty() || rest.is_empty()) {
                return Err(PathError::EmptySegment);
            }
            if key.contains(|c: char| !c.is_alphanumeric() && c != '_') {
                return Err(PathError::InvalidSegment(key.to_string()));
            }
            if !key.is_empty() {
                segments.push(Segment::Key(key.to_string()));
            }
            while !rest.is_empty() {
                let close = rest
                    .find(']')
                    .ok_or_else(|| PathError::UnclosedIndex(part.to_string()))?;
                let inner = &rest[1..close];
                if inner.is_empty() {
                    segments.push(Segment::AnyIndex);
                } else {
                    let idx = inner
                        .parse()
                        .map_err(|_| PathError::InvalidIndex(inner.to_string()))?;
                    segments.push(Segment::Index(idx));
                }
                rest = &rest[close + 1..];
                if !rest.is_empty() && !rest.starts_with('[') {
                    return Err(PathError::InvalidSegment(part.to_string()));
                }
            }
        }

        Ok(Self(segments))
    }
}

impl From<Vec<Segment>> for PropertyPath {
    fn from(segments: Vec<Segment>) -> Self {
        Self(segments)
    }
}

/// Errors related to property paths
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PathError {
    /// Empty segment in path
    #[error("path contains empty segment")]
    EmptySegment,

    /// Invalid key characters
    #[error("invalid segment: {0} (must be alphanumeric or underscore)")]
    InvalidSegment(String),

    /// Index bracket never closed
    #[error("unclosed index in segment: {0}")]
    UnclosedIndex(String),

    /// Index is not a number
    #[error("invalid index: {0}")]
    InvalidIndex(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn path_from_str_keys_and_indices() {
        let path: PropertyPath = "series[2].marker.size".parse().unwrap();
        assert_eq!(
            path.segments(),
            &[
                Segment::Key("series".into()),
                Segment::Index(2),
                Segment::Key("marker".into()),
                Segment::Key("size".into()),
            ]
        );
    }

    #[test]
    fn path_from_str_wildcard() {
        let path: PropertyPath = "series[].type".parse().unwrap();
        assert_eq!(path.segments()[1], Segment::AnyIndex);
    }

    #[test]
    fn path_display_round_trip() {
        for text in ["a", "a.b", "series[0].type", "axes[].title.text", "m[1][2]"] {
            let path: PropertyPath = text.parse().unwrap();
            assert_eq!(path.to_string(), text);
        }
    }

    #[test]
    fn path_root() {
        let path: PropertyPath = "".parse().unwrap();
        assert!(path.is_empty());
        assert_eq!(path.len(), 0);
    }

    #[test]
    fn path_builders() {
        let path = PropertyPath::root().key("series").index(1).key("type");
        assert_eq!(path.to_string(), "series[1].type");
        assert_eq!(path.last_key(), Some("type"));
    }

    #[test]
    fn wildcard_matches_any_index() {
        let pattern: PropertyPath = "series[].type".parse().unwrap();
        let hit: PropertyPath = "series[4].type".parse().unwrap();
        let miss: PropertyPath = "series[4].data".parse().unwrap();
        let short: PropertyPath = "series[4]".parse().unwrap();
        assert!(pattern.matches(&hit));
        assert!(!pattern.matches(&miss));
        assert!(!pattern.matches(&short));
    }

    #[test]
    fn concrete_index_only_matches_itself() {
        let pattern: PropertyPath = "axes[0].title".parse().unwrap();
        assert!(pattern.matches(&"axes[0].title".parse().unwrap()));
        assert!(!pattern.matches(&"axes[1].title".parse().unwrap()));
    }

    #[test]
    fn generalize_replaces_indices() {
        let path: PropertyPath = "series[3].marker".parse().unwrap();
        assert_eq!(path.generalize().to_string(), "series[].marker");
    }

    #[test]
    fn path_from_str_errors() {
        assert_eq!("a..b".parse::<PropertyPath>(), Err(PathError::EmptySegment));
        assert!(matches!(
            "a.b-c".parse::<PropertyPath>(),
            Err(PathError::InvalidSegment(_))
        ));
        assert!(matches!(
            "a[1".parse::<PropertyPath>(),
            Err(PathError::UnclosedIndex(_))
        ));
        assert!(matches!(
            "a[x]".parse::<PropertyPath>(),
            Err(PathError::InvalidIndex(_))
        ));
    }
}
