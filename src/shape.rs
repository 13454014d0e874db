//! Type descriptions that drive type-correct reconstruction.
//!
//! A record describes itself through the [`Shape`] trait: every primitive it
//! contains contributes a `path -> Kind` entry to a [`ShapeMap`]. The
//! [`record`](crate::record) attribute macro implements [`Shape`] and
//! [`Record`] for structs; both can also be implemented by hand.
//!
//! ```rust
//! use flat_config::{Kind, extract, record};
//!
//! #[record]
//! #[derive(Debug, Default)]
//! struct Server {
//!     #[record(path = "host")]
//!     host: String,
//!     #[record(path = "port")]
//!     port: u16,
//! }
//!
//! #[record]
//! #[derive(Debug, Default)]
//! struct AppConfig {
//!     #[record(path = "servers")]
//!     servers: Vec<Server>,
//! }
//!
//! let shapes = extract::<AppConfig>();
//! assert_eq!(shapes.get("servers.port"), Some(Kind::Int));
//! ```
use std::collections::HashMap;

use serde::{Serialize, de::DeserializeOwned};

use crate::Document;

/// The primitive kind a record expects at a path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Kind {
    String,
    Int,
    Float,
    Bool,
}

impl Kind {
    /// Parses `raw` as this kind. `None` when the value does not parse.
    ///
    /// Integers that overflow `i64` are kept as unsigned when they fit `u64`.
    pub fn coerce(self, raw: &str) -> Option<Document> {
        match self {
            Kind::String => Some(Document::String(raw.to_string())),
            Kind::Int => raw
                .parse::<i64>()
                .map(Document::Int)
                .or_else(|_| raw.parse::<u64>().map(Document::UInt))
                .ok(),
            Kind::Float => raw.parse::<f64>().ok().map(Document::Float),
            Kind::Bool => parse_bool(raw).map(Document::Bool),
        }
    }
}

/// Lenient boolean parsing used for paths declared as `bool`.
pub(crate) fn parse_bool(raw: &str) -> Option<bool> {
    match raw {
        "1" | "t" | "T" | "true" | "TRUE" | "True" => Some(true),
        "0" | "f" | "F" | "false" | "FALSE" | "False" => Some(false),
        _ => None,
    }
}

/// Infers a type for a value no record describes.
///
/// Tries bool, then integer, then float, and falls back to the string. Only
/// the words `true`/`false` count as booleans here, so `"1"` becomes the
/// integer 1. Non-finite floats such as `"inf"` stay strings.
pub fn auto_detect(raw: &str) -> Document {
    match raw {
        "true" | "TRUE" | "True" => return Document::Bool(true),
        "false" | "FALSE" | "False" => return Document::Bool(false),
        _ => {}
    }
    if let Ok(i) = raw.parse::<i64>() {
        return Document::Int(i);
    }
    match raw.parse::<f64>() {
        Ok(f) if f.is_finite() => Document::Float(f),
        _ => Document::String(raw.to_string()),
    }
}

/// A bound on the values a declared kind accepts, beyond parsing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Limit {
    /// Integers must lie in `min..=max`.
    Range { min: i128, max: i128 },
    /// Strings must hold exactly one character.
    SingleChar,
}

impl Limit {
    pub fn admits(self, value: &Document) -> bool {
        match (self, value) {
            (Limit::Range { min, max }, Document::Int(i)) => (min..=max).contains(&i128::from(*i)),
            (Limit::Range { min, max }, Document::UInt(u)) => (min..=max).contains(&i128::from(*u)),
            (Limit::SingleChar, Document::String(s)) => s.chars().count() == 1,
            _ => true,
        }
    }
}

/// Mapping from index-free dotted paths to the kind expected there.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShapeMap {
    kinds: HashMap<String, Kind>,
    limits: HashMap<String, Limit>,
}

impl ShapeMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, path: impl Into<String>, kind: Kind) {
        self.kinds.insert(path.into(), kind);
    }

    /// Declares `kind` at `path` together with the bound its values must meet.
    pub fn insert_limited(&mut self, path: impl Into<String>, kind: Kind, limit: Limit) {
        let path = path.into();
        self.limits.insert(path.clone(), limit);
        self.kinds.insert(path, kind);
    }

    pub fn get(&self, path: &str) -> Option<Kind> {
        self.kinds.get(path).copied()
    }

    /// Looks up `path` exactly, then with every numeric segment removed so a
    /// single entry covers all elements of an array.
    pub fn resolve(&self, path: &str) -> Option<Kind> {
        lookup(&self.kinds, path).copied()
    }

    /// The bound declared for `path`, looked up like [`resolve`](ShapeMap::resolve).
    pub fn limit(&self, path: &str) -> Option<Limit> {
        lookup(&self.limits, path).copied()
    }

    /// Whether a coerced `value` at `path` fits the declared bound.
    pub fn admits(&self, path: &str, value: &Document) -> bool {
        self.limit(path).is_none_or(|limit| limit.admits(value))
    }

    pub fn len(&self) -> usize {
        self.kinds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.kinds.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, Kind)> {
        self.kinds.iter().map(|(k, v)| (k.as_str(), *v))
    }
}

fn lookup<'a, V>(map: &'a HashMap<String, V>, path: &str) -> Option<&'a V> {
    map.get(path).or_else(|| {
        if path.split('.').any(is_index) {
            map.get(&strip_indices(path))
        } else {
            None
        }
    })
}

impl<K: Into<String>> FromIterator<(K, Kind)> for ShapeMap {
    fn from_iter<I: IntoIterator<Item = (K, Kind)>>(iter: I) -> Self {
        Self {
            kinds: iter.into_iter().map(|(k, v)| (k.into(), v)).collect(),
            limits: HashMap::new(),
        }
    }
}

pub(crate) fn is_index(segment: &str) -> bool {
    !segment.is_empty() && segment.bytes().all(|b| b.is_ascii_digit())
}

/// `servers.0.port` -> `servers.port`, `numbers.1` -> `numbers`.
pub fn strip_indices(path: &str) -> String {
    let mut out = String::with_capacity(path.len());
    for segment in path.split('.').filter(|s| !is_index(s)) {
        if !out.is_empty() {
            out.push('.');
        }
        out.push_str(segment);
    }
    out
}

/// Joins a path prefix and a (possibly dotted) segment.
pub fn join(prefix: &str, segment: &str) -> String {
    if prefix.is_empty() {
        segment.to_string()
    } else {
        format!("{prefix}.{segment}")
    }
}

/// A type that can describe the kinds it expects below a path.
pub trait Shape {
    /// Whether this type is a record. Only plain records (not `Option` or
    /// collections of records) count when choosing a [`BindMode`].
    const IS_RECORD: bool = false;

    fn describe(path: &str, shapes: &mut ShapeMap);
}

macro_rules! primitive_shape {
    ($kind:expr => $($ty:ty),+ $(,)?) => {
        $(
            impl Shape for $ty {
                fn describe(path: &str, shapes: &mut ShapeMap) {
                    shapes.insert(path, $kind);
                }
            }
        )+
    };
}

primitive_shape!(Kind::String => String);
primitive_shape!(Kind::Bool => bool);
primitive_shape!(Kind::Float => f32, f64);

macro_rules! integer_shape {
    ($($ty:ty),+ $(,)?) => {
        $(
            impl Shape for $ty {
                fn describe(path: &str, shapes: &mut ShapeMap) {
                    let limit = Limit::Range {
                        min: i128::try_from(<$ty>::MIN).unwrap_or(i128::MIN),
                        max: i128::try_from(<$ty>::MAX).unwrap_or(i128::MAX),
                    };
                    shapes.insert_limited(path, Kind::Int, limit);
                }
            }
        )+
    };
}

integer_shape!(i8, i16, i32, i64, i128, isize, u8, u16, u32, u64, u128, usize);

impl Shape for char {
    fn describe(path: &str, shapes: &mut ShapeMap) {
        shapes.insert_limited(path, Kind::String, Limit::SingleChar);
    }
}

/// Every element shares the list's own path; indices never reach the map.
impl<T: Shape> Shape for Vec<T> {
    fn describe(path: &str, shapes: &mut ShapeMap) {
        T::describe(path, shapes);
    }
}

impl<T: Shape> Shape for Option<T> {
    fn describe(path: &str, shapes: &mut ShapeMap) {
        T::describe(path, shapes);
    }
}

impl<T: Shape> Shape for Box<T> {
    const IS_RECORD: bool = T::IS_RECORD;

    fn describe(path: &str, shapes: &mut ShapeMap) {
        T::describe(path, shapes);
    }
}

/// A top-level field of a record and the path it is bound from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldPath {
    pub path: &'static str,
    /// Whether the field's type is itself a record.
    pub record: bool,
}

/// How a record's fields map onto the reconstructed document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindMode {
    /// Fields hold nested records under undotted paths; the whole document is
    /// bound as-is.
    Nested,
    /// Fields carry full dotted paths; each is looked up individually.
    Flat,
}

/// A record that can be rebuilt from a flat store.
///
/// Usually implemented through the [`record`](crate::record) attribute macro.
pub trait Record: Shape + DeserializeOwned {
    const FIELDS: &'static [FieldPath];

    /// Stable identity used as the shape cache key.
    fn type_identity() -> &'static str {
        std::any::type_name::<Self>()
    }

    fn bind_mode() -> BindMode {
        let nested = Self::FIELDS
            .iter()
            .any(|field| field.record && !field.path.contains('.'));

        if nested {
            BindMode::Nested
        } else {
            BindMode::Flat
        }
    }
}

/// Walks `T`'s description into a fresh [`ShapeMap`].
pub fn extract<T: Shape + ?Sized>() -> ShapeMap {
    let mut shapes = ShapeMap::new();
    T::describe("", &mut shapes);
    shapes
}

/// A record registered at compile time by the [`record`](crate::record)
/// macro.
pub struct RegisteredRecord {
    pub type_identity: fn() -> &'static str,
    pub extract: fn() -> ShapeMap,
}

impl RegisteredRecord {
    pub const fn new<T: Record>() -> Self {
        Self {
            type_identity: T::type_identity,
            extract: extract::<T>,
        }
    }
}

inventory::collect!(RegisteredRecord);

/// Iterates over every record registered with the macro.
pub fn registered() -> impl Iterator<Item = &'static RegisteredRecord> {
    inventory::iter::<RegisteredRecord>.into_iter()
}
