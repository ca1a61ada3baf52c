//! Raw field maps as read from the wire.
//!
//! Every key of a protocol message must appear at most once. A field map collected from several
//! sources (header, body and query) is built with `insert_or_poison` so that a repeated key can
//! not be used to smuggle a second, differently validated value past a component that reads the
//! fields from the other end.
use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fmt;
use std::iter::FromIterator;

use serde::de;
use serde::Deserializer;

use crate::error::{Error, Result};

/// The raw field normal form.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct NormalizedParameter {
    /// The value is `None` if the key appeared at least twice.
    inner: BTreeMap<Cow<'static, str>, Option<Cow<'static, str>>>,
}

impl NormalizedParameter {
    /// Create an empty map.
    pub fn new() -> Self {
        NormalizedParameter::default()
    }

    /// Insert a key-value-pair or mark key as dead if already present.
    ///
    /// Since each key must appear at most once, we do not remove it from the map but instead mark
    /// the key as having a duplicate entry.
    pub fn insert_or_poison(&mut self, key: Cow<'static, str>, val: Cow<'static, str>) {
        let unique_val = Some(val);
        self.inner
            .entry(key)
            .and_modify(|val| *val = None)
            .or_insert(unique_val);
    }

    /// Merge all pairs of another map, poisoning keys present in both.
    pub fn merge(&mut self, other: NormalizedParameter) {
        for (key, value) in other.inner {
            match value {
                Some(value) => self.insert_or_poison(key, value),
                None => {
                    self.inner.insert(key, None);
                }
            }
        }
    }

    /// Get the **unique** value associated with a key.
    pub fn unique_value(&self, key: &str) -> Option<&str> {
        self.inner
            .get(key)
            .and_then(|val| val.as_ref().map(Cow::as_ref))
    }

    /// Whether no field at all was present.
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Convert into a plain map, failing on the first repeated key.
    pub fn into_unique(self) -> Result<BTreeMap<String, String>> {
        self.inner
            .into_iter()
            .map(|(key, value)| match value {
                Some(value) => Ok((key.into_owned(), value.into_owned())),
                None => Err(Error::violation(format!("parameter `{}` appears more than once", key))),
            })
            .collect()
    }
}

impl<'de> de::Deserialize<'de> for NormalizedParameter {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct Visitor(NormalizedParameter);

        impl<'a> de::Visitor<'a> for Visitor {
            type Value = NormalizedParameter;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                write!(f, "a sequence of key-value-pairs")
            }

            fn visit_seq<A>(mut self, mut access: A) -> std::result::Result<Self::Value, A::Error>
            where
                A: de::SeqAccess<'a>,
            {
                while let Some((key, value)) = access.next_element::<(String, String)>()? {
                    self.0.insert_or_poison(key.into(), value.into())
                }

                Ok(self.0)
            }
        }

        let visitor = Visitor(NormalizedParameter::default());
        deserializer.deserialize_seq(visitor)
    }
}

impl<K, V> FromIterator<(K, V)> for NormalizedParameter
where
    K: Into<Cow<'static, str>>,
    V: Into<Cow<'static, str>>,
{
    fn from_iter<T>(iter: T) -> Self
    where
        T: IntoIterator<Item = (K, V)>,
    {
        let mut target = NormalizedParameter::default();
        iter.into_iter()
            .for_each(|(k, v)| target.insert_or_poison(k.into(), v.into()));
        target
    }
}
