use serde::{Deserialize, Serialize};
use std::fmt;

/// A single primitive component of a [`CacheKey`].
///
/// Keys are built from strings, integers and booleans only, so two keys built
/// from the same query parameters always compare (and hash) equal.
///
/// # Examples
///
/// ```
/// use querylito_core::KeyPart;
///
/// assert_eq!(KeyPart::from("regions"), KeyPart::Str("regions".to_string()));
/// assert_eq!(KeyPart::from(5), KeyPart::Int(5));
/// assert_eq!(KeyPart::from(true), KeyPart::Bool(true));
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum KeyPart {
    Str(String),
    Int(i64),
    Bool(bool),
}

impl fmt::Display for KeyPart {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyPart::Str(s) => write!(f, "{:?}", s),
            KeyPart::Int(i) => write!(f, "{}", i),
            KeyPart::Bool(b) => write!(f, "{}", b),
        }
    }
}

impl From<&str> for KeyPart {
    fn from(value: &str) -> Self {
        KeyPart::Str(value.to_string())
    }
}

impl From<String> for KeyPart {
    fn from(value: String) -> Self {
        KeyPart::Str(value)
    }
}

impl From<&String> for KeyPart {
    fn from(value: &String) -> Self {
        KeyPart::Str(value.clone())
    }
}

impl From<bool> for KeyPart {
    fn from(value: bool) -> Self {
        KeyPart::Bool(value)
    }
}

macro_rules! impl_int_key_part {
    ($($t:ty),*) => {
        $(
            impl From<$t> for KeyPart {
                fn from(value: $t) -> Self {
                    KeyPart::Int(i64::from(value))
                }
            }
        )*
    };
}

impl_int_key_part!(i8, i16, i32, i64, u8, u16, u32);

/// Structural identifier of one logical query.
///
/// A key is an ordered sequence of [`KeyPart`]s. Equality is structural: two
/// keys are the same key when they hold equal parts in the same order.
///
/// # Examples
///
/// ```
/// use querylito_core::{cache_key, CacheKey};
///
/// let a = cache_key!["contacts", 5];
/// let b = CacheKey::from("contacts").with(5);
/// assert_eq!(a, b);
/// assert_eq!(a.to_string(), r#"["contacts", 5]"#);
///
/// assert!(a.starts_with(&CacheKey::from("contacts")));
/// ```
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CacheKey(Vec<KeyPart>);

impl CacheKey {
    /// Creates an empty key. The empty key is a prefix of every key.
    pub fn new() -> Self {
        Self(Vec::new())
    }

    pub fn from_parts(parts: Vec<KeyPart>) -> Self {
        Self(parts)
    }

    /// Returns a new key with `part` appended.
    pub fn with(mut self, part: impl Into<KeyPart>) -> Self {
        self.0.push(part.into());
        self
    }

    pub fn parts(&self) -> &[KeyPart] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns true if the first parts of this key equal all parts of `prefix`.
    pub fn starts_with(&self, prefix: &CacheKey) -> bool {
        self.0.starts_with(&prefix.0)
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (i, part) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", part)?;
        }
        write!(f, "]")
    }
}

impl From<&str> for CacheKey {
    fn from(value: &str) -> Self {
        Self(vec![KeyPart::from(value)])
    }
}

impl From<String> for CacheKey {
    fn from(value: String) -> Self {
        Self(vec![KeyPart::from(value)])
    }
}

impl From<&CacheKey> for CacheKey {
    fn from(value: &CacheKey) -> Self {
        value.clone()
    }
}

impl From<Vec<KeyPart>> for CacheKey {
    fn from(parts: Vec<KeyPart>) -> Self {
        Self(parts)
    }
}

impl<P: Into<KeyPart>, const N: usize> From<[P; N]> for CacheKey {
    fn from(parts: [P; N]) -> Self {
        Self(parts.into_iter().map(Into::into).collect())
    }
}

impl<P: Into<KeyPart>> FromIterator<P> for CacheKey {
    fn from_iter<I: IntoIterator<Item = P>>(iter: I) -> Self {
        Self(iter.into_iter().map(Into::into).collect())
    }
}

/// Builds a [`CacheKey`] from a list of values convertible into [`KeyPart`].
///
/// ```
/// use querylito_core::cache_key;
///
/// let key = cache_key!["prison_units", "active", true];
/// assert_eq!(key.len(), 3);
/// ```
#[macro_export]
macro_rules! cache_key {
    ($($part:expr),* $(,)?) => {
        $crate::CacheKey::from_parts(vec![$($crate::KeyPart::from($part)),*])
    };
}
