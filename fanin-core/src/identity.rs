//! Mapping fetched values back to the identifier they were requested by.
//!
//! A bulk fetch returns values in any order; the fetcher routes each one to
//! its waiting caller through an [`IdExtractor`]. Prefer [`IdExtractor::from_fn`]
//! or [`IdExtractor::identify`]. [`IdExtractor::by_field`] reads a named field
//! through a serde round trip and is markedly slower; keep it off hot paths.

use std::fmt;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;

/// Field name used by [`IdExtractor::by_default_field`].
pub const DEFAULT_ID_FIELD: &str = "id";

/// Types that know their own identifier.
pub trait Identify<K> {
    /// Returns the unique identifier for this value.
    fn id(&self) -> K;
}

/// Function from a fetched value to the identifier it answers.
///
/// Returning `None` means the value cannot be routed and is ignored, the same
/// as a value for an identifier nobody asked for.
pub struct IdExtractor<K, V> {
    extract: Arc<dyn Fn(&V) -> Option<K> + Send + Sync>,
    label: &'static str,
}

impl<K, V> Clone for IdExtractor<K, V> {
    fn clone(&self) -> Self {
        Self {
            extract: Arc::clone(&self.extract),
            label: self.label,
        }
    }
}

impl<K, V> fmt::Debug for IdExtractor<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IdExtractor")
            .field("kind", &self.label)
            .finish()
    }
}

impl<K, V> IdExtractor<K, V> {
    /// Extract with an explicit function.
    pub fn from_fn<F>(f: F) -> Self
    where
        F: Fn(&V) -> K + Send + Sync + 'static,
    {
        Self {
            extract: Arc::new(move |v| Some(f(v))),
            label: "fn",
        }
    }

    /// Extract with a function that may decline to produce an identifier.
    pub fn from_fallible_fn<F>(f: F) -> Self
    where
        F: Fn(&V) -> Option<K> + Send + Sync + 'static,
    {
        Self {
            extract: Arc::new(f),
            label: "fallible_fn",
        }
    }

    /// Extract through the value's [`Identify`] implementation.
    pub fn identify() -> Self
    where
        V: Identify<K>,
    {
        Self {
            extract: Arc::new(|v: &V| Some(v.id())),
            label: "identify",
        }
    }

    /// Extract by reading the serialized field `field`.
    ///
    /// The field is converted to `K` through serde, so an integer field
    /// satisfies any integer key type wide enough to hold it and a UUID
    /// field satisfies a `String` key (and the reverse). Values whose field
    /// is missing or unconvertible yield no identifier.
    pub fn by_field(field: &'static str) -> Self
    where
        K: DeserializeOwned,
        V: Serialize,
    {
        Self {
            extract: Arc::new(move |v: &V| field_value(v, field)),
            label: "by_field",
        }
    }

    /// [`IdExtractor::by_field`] on [`DEFAULT_ID_FIELD`].
    pub fn by_default_field() -> Self
    where
        K: DeserializeOwned,
        V: Serialize,
    {
        Self::by_field(DEFAULT_ID_FIELD)
    }

    /// Apply the extractor.
    pub fn extract(&self, value: &V) -> Option<K> {
        (self.extract)(value)
    }
}

fn field_value<K, V>(value: &V, field: &str) -> Option<K>
where
    K: DeserializeOwned,
    V: Serialize,
{
    let serde_json::Value::Object(mut map) = serde_json::to_value(value).ok()? else {
        return None;
    };
    serde_json::from_value(map.remove(field)?).ok()
}
