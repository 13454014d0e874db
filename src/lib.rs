//! A flat, hot-reloadable configuration store.
//!
//! Sources (INI-like text, JSON or TOML) are flattened into dot-joined paths
//! such as `servers.0.host`. Typed records are rebuilt from those paths using
//! a shape derived from the record type, so `"0001234"` stays a string where
//! the record expects one and becomes an integer where it does not.
//!
//! See [`Config`] for the entry point and [`record`] for describing records.
extern crate self as flat_config;

pub mod cache;
pub mod config;
pub mod document;
pub mod error;
pub mod flatten;
pub mod reconstruct;
pub mod shape;
pub mod source;
pub mod store;
mod watch;

pub use cache::ShapeCache;
pub use config::{Config, ConfigOptions, ConfigOptionsBuilder, ConfigStats, WatchStart};
pub use document::Document;
pub use error::{Error, ParseError, Result};
pub use flatten::{flatten, flatten_into};
pub use reconstruct::{bind, bind_flat, bind_nested, reconstruct};
pub use shape::{
    BindMode, FieldPath, Kind, Limit, Record, RegisteredRecord, Shape, ShapeMap, auto_detect,
    extract,
};
pub use store::FlatStore;

// re-export macro
pub use flat_config_macros::record;

#[doc(hidden)]
pub mod __private {
    pub use inventory;
    pub use serde;
}
