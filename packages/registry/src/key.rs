//! Dot-segmented registry keys.

use std::fmt;

use crate::error::{Error, Result};

/// A validated registry key.
///
/// Keys are dot-delimited and case-sensitive: `<root>.<namespace>.<name>`.
/// Segments may contain any character except `.`, but must not be empty, so
/// `a..b`, `.a` and `a.` are all rejected. Keys are never empty.
///
/// Namespacing is a convention only; nothing stops two modules from writing
/// under the same root.
#[derive(Clone, Debug, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct Key {
    segments: Vec<String>,
}

impl Key {
    /// Parse a key string, validating its segments.
    ///
    /// ```rust
    /// use openv_registry::Key;
    ///
    /// let key = Key::parse("party.openv.ipc").unwrap();
    /// assert_eq!(key.len(), 3);
    /// assert!(Key::parse("a..b").is_err());
    /// ```
    pub fn parse(s: &str) -> Result<Self> {
        if s.is_empty() {
            return Err(Error::InvalidKey {
                message: "key must not be empty".to_string(),
            });
        }

        let segments: Vec<String> = s.split('.').map(str::to_string).collect();
        for (position, segment) in segments.iter().enumerate() {
            Self::validate_segment(segment, position, s)?;
        }

        Ok(Key { segments })
    }

    fn validate_segment(segment: &str, position: usize, whole: &str) -> Result<()> {
        if segment.is_empty() {
            return Err(Error::InvalidKey {
                message: format!("empty segment at position {} in '{}'", position, whole),
            });
        }
        Ok(())
    }

    /// Append one or more dot-separated segments to this key.
    pub fn join(&self, suffix: &str) -> Result<Key> {
        let tail = Key::parse(suffix)?;
        let mut segments = self.segments.clone();
        segments.extend(tail.segments);
        Ok(Key { segments })
    }

    /// Check whether `prefix` is a whole-segment prefix of this key.
    ///
    /// `a.b` is a prefix of `a.b.c` but not of `a.bc`.
    pub fn has_prefix(&self, prefix: &Key) -> bool {
        prefix.segments.len() <= self.segments.len()
            && prefix.segments == self.segments[..prefix.segments.len()]
    }

    /// Number of segments.
    pub fn len(&self) -> usize {
        self.segments.len()
    }

    /// Always false; keys have at least one segment.
    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Iterate over segments.
    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.segments.iter().map(String::as_str)
    }

    /// The last segment.
    pub fn last(&self) -> &str {
        self.segments.last().map(String::as_str).unwrap_or_default()
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.segments.join("."))
    }
}

impl std::str::FromStr for Key {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Key::parse(s)
    }
}

/// Macro for creating keys from literals.
///
/// # Example
///
/// ```rust
/// use openv_registry::key;
///
/// let k = key!("party.openv.service");
/// assert_eq!(k.to_string(), "party.openv.service");
/// ```
///
/// # Panics
///
/// Panics if the literal is not a valid key.
#[macro_export]
macro_rules! key {
    ($s:expr) => {
        $crate::Key::parse($s).expect("invalid key literal")
    };
}
