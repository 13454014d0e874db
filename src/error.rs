use std::path::PathBuf;

use thiserror::Error;

use crate::config::ConfigOptionsBuilderError;

/// Errors returned by [`Config`](crate::Config) operations.
#[derive(Debug, Error)]
pub enum Error {
    /// [`Config::open`](crate::Config::open) was called without any source path.
    #[error("no configuration source given")]
    EmptyInput,

    #[error("failed to read {}: {source}", path.display())]
    SourceRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {}: {source}", path.display())]
    SourceParse {
        path: PathBuf,
        #[source]
        source: ParseError,
    },

    /// [`Config::reload`](crate::Config::reload) was called before any source
    /// was opened.
    #[error("no configuration source loaded")]
    NoSourceLoaded,

    /// The file watcher could not be created, or a source could not be
    /// watched. The store itself stays usable.
    #[error("failed to watch {}: {source}", watch_target(path))]
    WatchSetup {
        path: Option<PathBuf>,
        #[source]
        source: notify::Error,
    },

    /// The reconstructed document could not be bound onto the target record.
    ///
    /// The contained string is the record's type identity.
    #[error("cannot bind configuration onto {target}: {source}")]
    InvalidTarget {
        target: &'static str,
        #[source]
        source: serde_value::DeserializerError,
    },

    #[error("JSON export: {0}")]
    Export(#[from] serde_json::Error),

    #[error("Options: {0}")]
    Options(#[from] ConfigOptionsBuilderError),
}

/// Errors produced while turning source text into a [`Document`](crate::Document).
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("line {line}: {message}")]
    Ini { line: usize, message: String },

    #[error("top level of a source must be a mapping")]
    NotAMapping,
}

fn watch_target(path: &Option<PathBuf>) -> String {
    match path {
        Some(path) => path.display().to_string(),
        None => "configuration sources".to_string(),
    }
}

pub type Result<T> = std::result::Result<T, Error>;
