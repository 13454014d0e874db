//! The generic nested document exchanged between sources, the flattener and
//! the reconstructor.

use std::collections::BTreeMap;

use serde::{Serialize, Serializer};
use serde_value::Value;

/// A tree of scalars, lists and mappings.
///
/// Documents are transient: sources produce one per file, the flattener
/// consumes it, and the reconstructor builds a fresh one for every bind.
#[derive(Debug, Clone, PartialEq)]
pub enum Document {
    Null,
    Bool(bool),
    Int(i64),
    UInt(u64),
    Float(f64),
    String(String),
    List(Vec<Document>),
    Map(BTreeMap<String, Document>),
}

impl Document {
    pub fn map() -> Self {
        Document::Map(BTreeMap::new())
    }

    pub fn is_scalar(&self) -> bool {
        !matches!(self, Document::List(_) | Document::Map(_))
    }

    pub fn as_map(&self) -> Option<&BTreeMap<String, Document>> {
        match self {
            Document::Map(map) => Some(map),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Document]> {
        match self {
            Document::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Document::String(s) => Some(s),
            _ => None,
        }
    }

    /// Renders a scalar the way it is kept in the flat store.
    ///
    /// Returns `None` for null, lists and mappings.
    pub fn to_flat_string(&self) -> Option<String> {
        match self {
            Document::Bool(b) => Some(b.to_string()),
            Document::Int(i) => Some(i.to_string()),
            Document::UInt(u) => Some(u.to_string()),
            Document::Float(f) => Some(f.to_string()),
            Document::String(s) => Some(s.clone()),
            Document::Null | Document::List(_) | Document::Map(_) => None,
        }
    }

    /// Looks up a dotted path, indexing lists by numeric segments.
    pub fn get_path(&self, path: &str) -> Option<&Document> {
        path.split('.').try_fold(self, |node, segment| match node {
            Document::Map(map) => map.get(segment),
            Document::List(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
            _ => None,
        })
    }

    /// Deep-merges `other` into `self`. Mappings merge key by key, anything
    /// else in `other` replaces what was there.
    pub fn merge(&mut self, other: Document) {
        match (self, other) {
            (Document::Map(left), Document::Map(right)) => {
                for (key, value) in right {
                    match left.get_mut(&key) {
                        Some(existing) => existing.merge(value),
                        None => {
                            left.insert(key, value);
                        }
                    }
                }
            }
            (slot, other) => *slot = other,
        }
    }

    /// Converts into the generic value used to bind typed records.
    pub fn into_value(self) -> Value {
        match self {
            Document::Null => Value::Unit,
            Document::Bool(b) => Value::Bool(b),
            Document::Int(i) => Value::I64(i),
            Document::UInt(u) => Value::U64(u),
            Document::Float(f) => Value::F64(f),
            Document::String(s) => Value::String(s),
            Document::List(items) => {
                Value::Seq(items.into_iter().map(Document::into_value).collect())
            }
            Document::Map(map) => Value::Map(
                map.into_iter()
                    .map(|(k, v)| (Value::String(k), v.into_value()))
                    .collect(),
            ),
        }
    }
}

impl From<serde_json::Value> for Document {
    fn from(value: serde_json::Value) -> Self {
        use serde_json::Value as Json;

        match value {
            Json::Null => Document::Null,
            Json::Bool(b) => Document::Bool(b),
            Json::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Document::Int(i)
                } else if let Some(u) = n.as_u64() {
                    Document::UInt(u)
                } else {
                    Document::Float(n.as_f64().unwrap_or(f64::NAN))
                }
            }
            Json::String(s) => Document::String(s),
            Json::Array(items) => Document::List(items.into_iter().map(Document::from).collect()),
            Json::Object(map) => {
                Document::Map(map.into_iter().map(|(k, v)| (k, Document::from(v))).collect())
            }
        }
    }
}

impl From<toml::Value> for Document {
    fn from(value: toml::Value) -> Self {
        use toml::Value as Toml;

        match value {
            Toml::String(s) => Document::String(s),
            Toml::Integer(i) => Document::Int(i),
            Toml::Float(f) => Document::Float(f),
            Toml::Boolean(b) => Document::Bool(b),
            Toml::Datetime(dt) => Document::String(dt.to_string()),
            Toml::Array(items) => Document::List(items.into_iter().map(Document::from).collect()),
            Toml::Table(table) => Document::Map(
                table
                    .into_iter()
                    .map(|(k, v)| (k, Document::from(v)))
                    .collect(),
            ),
        }
    }
}

impl From<&str> for Document {
    fn from(value: &str) -> Self {
        Document::String(value.to_string())
    }
}

impl From<String> for Document {
    fn from(value: String) -> Self {
        Document::String(value)
    }
}

impl From<bool> for Document {
    fn from(value: bool) -> Self {
        Document::Bool(value)
    }
}

impl From<i64> for Document {
    fn from(value: i64) -> Self {
        Document::Int(value)
    }
}

impl From<f64> for Document {
    fn from(value: f64) -> Self {
        Document::Float(value)
    }
}

impl<T: Into<Document>> From<Vec<T>> for Document {
    fn from(items: Vec<T>) -> Self {
        Document::List(items.into_iter().map(Into::into).collect())
    }
}

impl Serialize for Document {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Document::Null => serializer.serialize_unit(),
            Document::Bool(b) => serializer.serialize_bool(*b),
            Document::Int(i) => serializer.serialize_i64(*i),
            Document::UInt(u) => serializer.serialize_u64(*u),
            Document::Float(f) => serializer.serialize_f64(*f),
            Document::String(s) => serializer.serialize_str(s),
            Document::List(items) => items.serialize(serializer),
            Document::Map(map) => map.serialize(serializer),
        }
    }
}

/// Builds a [`Document::Map`] from `key => value` pairs.
#[macro_export]
macro_rules! doc {
    ($($key:expr => $value:expr),* $(,)?) => {{
        #[allow(unused_mut)]
        let mut map = ::std::collections::BTreeMap::new();
        $(map.insert(::std::string::String::from($key), $crate::Document::from($value));)*
        $crate::Document::Map(map)
    }};
}
