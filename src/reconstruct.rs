//! Rebuilds nested, typed documents from a flat store.
//!
//! # Algorithm
//!
//! 1. Every entry's kind is resolved through the [`ShapeMap`] (exact path,
//!    then the path without index segments). Unknown paths fall back to
//!    [`auto_detect`].
//! 2. The value is coerced to that kind. A value that does not parse keeps
//!    its string form. When binding, a value that does not parse or falls
//!    outside the declared [`Limit`](crate::Limit) (e.g. `70000` for a `u16`)
//!    is left out instead.
//! 3. The value is inserted into a tree of mappings by splitting its path
//!    on `.`.
//! 4. Every mapping whose keys are exactly `0..n` is turned into a list.
//!
//! Entries are inserted in path order. When two paths disagree about the
//! shape of a node (`a = 1` next to `a.b = 2`), the first one in path order
//! keeps the node and the other entry is dropped.
use std::collections::BTreeMap;

use crate::{
    BindMode, Document, FlatStore, Record, ShapeMap,
    error::{Error, Result},
    shape::auto_detect,
};

/// What to do with a value that fails to parse as its declared kind or does
/// not fit its declared limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mismatch {
    /// Keep the raw string. Limits are not checked.
    Keep,
    /// Leave the path out so the bound field keeps its default.
    Drop,
}

/// Rebuilds the nested document described by `store`, typed by `shapes`.
///
/// ```rust
/// use flat_config::{Document, FlatStore, Kind, ShapeMap, reconstruct};
///
/// let store: FlatStore = [("user.id", "0001234"), ("user.age", "42")].into_iter().collect();
/// let shapes: ShapeMap = [("user.id", Kind::String)].into_iter().collect();
///
/// let doc = reconstruct(&store, &shapes);
/// assert_eq!(doc.get_path("user.id"), Some(&Document::from("0001234")));
/// assert_eq!(doc.get_path("user.age"), Some(&Document::Int(42)));
/// ```
pub fn reconstruct(store: &FlatStore, shapes: &ShapeMap) -> Document {
    build(store, shapes, Mismatch::Keep)
}

/// Binds `store` onto `T`, choosing the mode from [`Record::bind_mode`].
pub fn bind<T: Record>(store: &FlatStore, shapes: &ShapeMap) -> Result<T> {
    match T::bind_mode() {
        BindMode::Nested => bind_nested(store, shapes),
        BindMode::Flat => bind_flat(store, shapes),
    }
}

/// Binds the whole reconstructed document onto `T`.
///
/// Values that do not parse as the kind `T` declares, or do not fit the
/// field's integer width, are left out, so the affected fields keep their
/// defaults instead of failing the bind.
pub fn bind_nested<T: Record>(store: &FlatStore, shapes: &ShapeMap) -> Result<T> {
    deserialize(build(store, shapes, Mismatch::Drop))
}

/// Binds `T` field by field, looking each field's dotted path up in the
/// reconstructed document.
pub fn bind_flat<T: Record>(store: &FlatStore, shapes: &ShapeMap) -> Result<T> {
    let doc = build(store, shapes, Mismatch::Drop);

    let projected = T::FIELDS
        .iter()
        .filter_map(|field| {
            doc.get_path(field.path)
                .map(|node| (field.path.to_string(), node.clone()))
        })
        .collect();

    deserialize(Document::Map(projected))
}

fn deserialize<T: Record>(doc: Document) -> Result<T> {
    serde::Deserialize::deserialize(doc.into_value()).map_err(|source| Error::InvalidTarget {
        target: T::type_identity(),
        source,
    })
}

fn build(store: &FlatStore, shapes: &ShapeMap, mismatch: Mismatch) -> Document {
    let mut root = BTreeMap::new();

    for (path, raw) in store.sorted() {
        let value = match shapes.resolve(path) {
            Some(kind) => {
                let coerced = kind
                    .coerce(raw)
                    .filter(|value| mismatch == Mismatch::Keep || shapes.admits(path, value));
                match coerced {
                    Some(value) => value,
                    None if mismatch == Mismatch::Drop => {
                        tracing::debug!(path, value = raw, ?kind, "dropping value that does not fit");
                        continue;
                    }
                    None => Document::String(raw.to_string()),
                }
            }
            None => auto_detect(raw),
        };
        insert(&mut root, path, value);
    }

    lists_from_index_maps(Document::Map(root))
}

fn insert(root: &mut BTreeMap<String, Document>, path: &str, value: Document) {
    let mut node = root;
    let mut segments = path.split('.').peekable();

    while let Some(segment) = segments.next() {
        if segments.peek().is_none() {
            node.entry(segment.to_string()).or_insert(value);
            return;
        }

        let child = node
            .entry(segment.to_string())
            .or_insert_with(Document::map);
        match child {
            Document::Map(map) => node = map,
            _ => return,
        }
    }
}

/// Replaces every mapping keyed exactly by `0..n` with a list, recursively.
/// Mappings with gaps, extra keys or no keys stay mappings.
fn lists_from_index_maps(doc: Document) -> Document {
    match doc {
        Document::Map(mut map) if is_index_map(&map) => Document::List(
            (0..map.len())
                .filter_map(|i| map.remove(&i.to_string()))
                .map(lists_from_index_maps)
                .collect(),
        ),
        Document::Map(map) => Document::Map(
            map.into_iter()
                .map(|(k, v)| (k, lists_from_index_maps(v)))
                .collect(),
        ),
        Document::List(items) => {
            Document::List(items.into_iter().map(lists_from_index_maps).collect())
        }
        scalar => scalar,
    }
}

fn is_index_map(map: &BTreeMap<String, Document>) -> bool {
    !map.is_empty() && (0..map.len()).all(|i| map.contains_key(&i.to_string()))
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;
    use crate::{Kind, doc, extract, flatten, record};

    fn store(entries: &[(&str, &str)]) -> FlatStore {
        entries.iter().copied().collect()
    }

    #[record]
    #[derive(Debug, Default, PartialEq)]
    struct Server {
        #[record(path = "host")]
        host: String,
        #[record(path = "port")]
        port: u16,
    }

    #[record]
    #[derive(Debug, Default, PartialEq)]
    struct App {
        #[record(path = "name")]
        name: String,
        #[record(path = "debug")]
        debug: bool,
    }

    #[record]
    #[derive(Debug, Default, PartialEq)]
    struct Settings {
        #[record(path = "app")]
        app: App,
        #[record(path = "servers")]
        servers: Vec<Server>,
    }

    #[record]
    #[derive(Debug, Default, PartialEq)]
    struct FlatSettings {
        #[record(path = "database.host")]
        host: String,
        #[record(path = "database.port")]
        port: i64,
        #[record(path = "database.replicas")]
        replicas: Vec<String>,
    }

    #[record]
    #[derive(Debug, Default, PartialEq)]
    struct Net {
        #[record(path = "net.host")]
        host: String,
        #[record(path = "net.port")]
        port: u16,
        #[record(path = "net.retries")]
        retries: Vec<u8>,
    }

    #[test]
    fn test_empty_store_gives_empty_document() {
        assert_eq!(reconstruct(&FlatStore::new(), &ShapeMap::new()), Document::map());
    }

    #[test]
    fn test_contiguous_indices_become_list() {
        let doc = reconstruct(
            &store(&[("arr.0", "a"), ("arr.1", "b"), ("arr.2", "c")]),
            &ShapeMap::new(),
        );

        assert_eq!(doc, doc! { "arr" => vec!["a", "b", "c"] });
    }

    #[test]
    fn test_gapped_indices_stay_mapping() {
        let doc = reconstruct(&store(&[("arr.0", "a"), ("arr.2", "c")]), &ShapeMap::new());

        assert_eq!(doc, doc! { "arr" => doc! { "0" => "a", "2" => "c" } });
    }

    #[test]
    fn test_lists_keep_numeric_order_past_ten() {
        let entries: Vec<(String, String)> =
            (0..12).map(|i| (format!("n.{i}"), i.to_string())).collect();
        let store: FlatStore = entries.into_iter().collect();

        let doc = reconstruct(&store, &ShapeMap::new());
        let expected: Vec<i64> = (0..12).collect();
        assert_eq!(doc, doc! { "n" => expected });
    }

    #[test]
    fn test_declared_string_is_not_converted() {
        let shapes: ShapeMap = [("user.id", Kind::String)].into_iter().collect();
        let doc = reconstruct(&store(&[("user.id", "0001234")]), &shapes);

        assert_eq!(doc.get_path("user.id"), Some(&Document::from("0001234")));
    }

    #[test]
    fn test_failed_coercion_keeps_string() {
        let shapes: ShapeMap = [("app.port", Kind::Int)].into_iter().collect();
        let doc = reconstruct(&store(&[("app.port", "eighty")]), &shapes);

        assert_eq!(doc.get_path("app.port"), Some(&Document::from("eighty")));
    }

    #[test]
    fn test_element_kind_comes_from_index_free_path() {
        let shapes: ShapeMap = [("ids", Kind::String)].into_iter().collect();
        let doc = reconstruct(&store(&[("ids.0", "007"), ("ids.1", "8")]), &shapes);

        assert_eq!(doc, doc! { "ids" => vec!["007", "8"] });
    }

    #[test]
    fn test_first_path_wins_on_shape_conflict() {
        let doc = reconstruct(&store(&[("a", "1"), ("a.b", "2")]), &ShapeMap::new());

        assert_eq!(doc, doc! { "a" => 1i64 });
    }

    #[test]
    fn test_bind_end_to_end_scenario() {
        let json: serde_json::Value = serde_json::from_str(
            r#"{"app":{"name":"x","debug":true},"servers":[{"host":"a","port":1},{"host":"b","port":2}]}"#,
        )
        .unwrap();
        let flat = flatten(&Document::from(json));

        let settings: Settings = bind(&flat, &extract::<Settings>()).unwrap();

        assert_eq!(settings.app.name, "x");
        assert!(settings.app.debug);
        assert_eq!(settings.servers.len(), 2);
        assert_eq!(settings.servers[1].port, 2);
    }

    #[test]
    fn test_bind_drops_unparseable_values() {
        let flat = store(&[("app.name", "x"), ("app.debug", "maybe")]);

        let settings: Settings = bind(&flat, &extract::<Settings>()).unwrap();

        assert_eq!(settings.app.name, "x");
        assert!(!settings.app.debug);
    }

    #[test]
    fn test_bind_flat_record() {
        let flat = store(&[
            ("database.host", "db"),
            ("database.port", "5432"),
            ("database.replicas.0", "r1"),
            ("database.replicas.1", "r2"),
        ]);

        let settings: FlatSettings = bind(&flat, &extract::<FlatSettings>()).unwrap();

        assert_eq!(settings.host, "db");
        assert_eq!(settings.port, 5432);
        assert_eq!(settings.replicas, vec!["r1", "r2"]);
    }

    #[test]
    fn test_bind_drops_integers_outside_field_width() {
        for port in ["70000", "-1", "eighty"] {
            let flat = store(&[
                ("net.host", "db"),
                ("net.port", port),
                ("net.retries.0", "3"),
                ("net.retries.1", "300"),
            ]);

            let net: Net = bind(&flat, &extract::<Net>()).unwrap();

            assert_eq!(net.host, "db", "port = {port}");
            assert_eq!(net.port, 0, "port = {port}");
            assert_eq!(net.retries, vec![3], "port = {port}");
        }
    }

    #[test]
    fn test_reconstruct_keeps_out_of_range_integers() {
        let doc = reconstruct(&store(&[("net.port", "70000")]), &extract::<Net>());

        assert_eq!(doc.get_path("net.port"), Some(&Document::Int(70000)));
    }

    #[test]
    fn test_gapped_list_cannot_bind() {
        let flat = store(&[("servers.0.host", "a"), ("servers.2.host", "c")]);

        let result = bind::<Settings>(&flat, &extract::<Settings>());

        assert!(matches!(result, Err(Error::InvalidTarget { .. })));
    }

    fn scalar() -> impl Strategy<Value = Document> {
        prop_oneof![
            any::<bool>().prop_map(Document::Bool),
            any::<i64>().prop_map(Document::Int),
            "[a-z][a-z0-9 ]{0,8}".prop_map(Document::String),
        ]
    }

    fn leaf() -> impl Strategy<Value = Document> {
        prop_oneof![
            "[a-z0-9 ]{0,8}".prop_map(Document::String),
            any::<bool>().prop_map(Document::Bool),
            any::<i64>().prop_map(Document::Int),
            prop::num::f64::NORMAL.prop_map(Document::Float),
            // Integral floats flatten to "1", "-3", ...
            (-1000i64..1000).prop_map(|i| Document::Float(i as f64)),
        ]
    }

    fn key() -> impl Strategy<Value = String> {
        "[a-z][a-z_]{0,5}"
    }

    fn document() -> impl Strategy<Value = Document> {
        let node = leaf().prop_recursive(3, 32, 4, |inner| {
            prop_oneof![
                prop::collection::vec(inner.clone(), 1..4).prop_map(Document::List),
                prop::collection::btree_map(key(), inner, 1..4).prop_map(Document::Map),
            ]
        });
        prop::collection::btree_map(key(), node, 1..4).prop_map(Document::Map)
    }

    /// Declares every leaf of `doc` at its exact path.
    fn own_shapes(doc: &Document, path: &str, shapes: &mut ShapeMap) {
        let segment = |s: &str| crate::shape::join(path, s);
        match doc {
            Document::Map(map) => map.iter().for_each(|(k, v)| own_shapes(v, &segment(k), shapes)),
            Document::List(items) => items
                .iter()
                .enumerate()
                .for_each(|(i, v)| own_shapes(v, &segment(&i.to_string()), shapes)),
            Document::String(_) => shapes.insert(path, Kind::String),
            Document::Bool(_) => shapes.insert(path, Kind::Bool),
            Document::Int(_) | Document::UInt(_) => shapes.insert(path, Kind::Int),
            Document::Float(_) => shapes.insert(path, Kind::Float),
            Document::Null => {}
        }
    }

    #[test]
    fn test_round_trip_with_own_shape() {
        let original = doc! {
            "user" => doc! { "id" => "007", "score" => 1.0 },
            "servers" => vec![
                doc! { "host" => "a", "port" => 1i64, "tls" => true },
                doc! { "host" => "b", "port" => 2i64, "tls" => false },
            ],
        };
        let mut shapes = ShapeMap::new();
        own_shapes(&original, "", &mut shapes);

        assert_eq!(reconstruct(&flatten(&original), &shapes), original);
    }

    proptest! {
        #[test]
        fn prop_flatten_then_reconstruct_round_trips(original in document()) {
            let mut shapes = ShapeMap::new();
            own_shapes(&original, "", &mut shapes);

            prop_assert_eq!(reconstruct(&flatten(&original), &shapes), original);
        }

        #[test]
        fn prop_index_maps_become_lists_of_same_length(items in prop::collection::vec(scalar(), 1..20)) {
            let flat = flatten(&doc! { "list" => Document::List(items.clone()) });
            let shapes: ShapeMap = [("list", Kind::String)].into_iter().collect();

            let doc = reconstruct(&flat, &shapes);
            let list = doc.get_path("list").and_then(Document::as_list).map(<[Document]>::len);
            prop_assert_eq!(list, Some(items.len()));
        }

        #[test]
        fn prop_gaps_never_become_lists(len in 2usize..20, gap in 0usize..19) {
            let gap = gap % len;
            let flat: FlatStore = (0..len)
                .filter(|i| *i != gap)
                .map(|i| (format!("list.{i}"), "v".to_string()))
                .collect();

            let doc = reconstruct(&flat, &ShapeMap::new());
            let is_list = doc.get_path("list").and_then(Document::as_list).is_some();
            // Removing the last index leaves a shorter, still contiguous list.
            prop_assert_eq!(is_list, gap == len - 1);
        }
    }
}
