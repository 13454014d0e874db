//! Turns nested documents into flat store entries.

use crate::{Document, FlatStore};

/// Flattens `doc` into a fresh [`FlatStore`].
///
/// Mapping keys extend the path with `.key`, list elements with `.index`.
/// Null values, empty mappings and empty lists produce no entries.
///
/// ```rust
/// use flat_config::{doc, flatten};
///
/// let store = flatten(&doc! {
///     "app" => doc! { "name" => "x", "debug" => true },
///     "ports" => vec![80i64, 443],
/// });
///
/// assert_eq!(store.get("app.debug"), Some("true"));
/// assert_eq!(store.get("ports.1"), Some("443"));
/// ```
pub fn flatten(doc: &Document) -> FlatStore {
    let mut store = FlatStore::new();
    flatten_into(doc, &mut store);
    store
}

/// Flattens `doc` into an existing store. Existing entries at the same paths
/// are overwritten.
pub fn flatten_into(doc: &Document, store: &mut FlatStore) {
    let mut path = String::with_capacity(64);
    walk(doc, &mut path, store);
}

fn walk(node: &Document, path: &mut String, store: &mut FlatStore) {
    match node {
        Document::Map(map) => {
            for (key, value) in map {
                descend(path, key, |path| walk(value, path, store));
            }
        }
        Document::List(items) => {
            for (index, value) in items.iter().enumerate() {
                descend(path, &index.to_string(), |path| walk(value, path, store));
            }
        }
        scalar => {
            if let Some(value) = scalar.to_flat_string() {
                store.insert(path.as_str(), value);
            }
        }
    }
}

/// Runs `f` with `segment` appended to `path`, restoring `path` afterwards.
fn descend(path: &mut String, segment: &str, f: impl FnOnce(&mut String)) {
    let len = path.len();
    if !path.is_empty() {
        path.push('.');
    }
    path.push_str(segment);
    f(path);
    path.truncate(len);
}
