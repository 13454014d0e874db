//! Reading configuration sources into documents.
//!
//! The file extension picks the parser:
//!
//! | extension | parser            |
//! |-----------|-------------------|
//! | `.json`   | JSON              |
//! | `.toml`   | TOML              |
//! | other     | INI-like ([`ini`]) |
use std::path::{Path, PathBuf};

use crate::{
    Document, FlatStore,
    error::{Error, ParseError, Result},
    flatten::flatten_into,
};

pub mod ini;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Json,
    Toml,
    Ini,
}

impl Format {
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => Format::Json,
            Some("toml") => Format::Toml,
            _ => Format::Ini,
        }
    }
}

/// Parses every source in order and flattens them into one store. Later
/// sources override earlier ones.
pub fn build_store(paths: &[PathBuf]) -> Result<FlatStore> {
    let mut store = FlatStore::new();
    for path in paths {
        let doc = load(path, paths)?;
        flatten_into(&doc, &mut store);
    }
    Ok(store)
}

/// Parses a single source. `sources` is the full list being loaded; INI
/// includes pointing at one of them are skipped.
pub fn load(path: &Path, sources: &[PathBuf]) -> Result<Document> {
    tracing::debug!(path = %path.display(), "reading configuration source");

    match Format::from_path(path) {
        Format::Json => parse_json(&read(path)?).map_err(|source| parse_error(path, source)),
        Format::Toml => parse_toml(&read(path)?).map_err(|source| parse_error(path, source)),
        Format::Ini => ini::load(path, sources),
    }
}

pub fn parse_json(text: &str) -> std::result::Result<Document, ParseError> {
    match serde_json::from_str::<serde_json::Value>(text)? {
        value @ serde_json::Value::Object(_) => Ok(Document::from(value)),
        _ => Err(ParseError::NotAMapping),
    }
}

pub fn parse_toml(text: &str) -> std::result::Result<Document, ParseError> {
    let table = toml::from_str::<toml::Table>(text)?;
    Ok(Document::from(toml::Value::Table(table)))
}

pub(crate) fn read(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).map_err(|source| Error::SourceRead {
        path: path.to_path_buf(),
        source,
    })
}

pub(crate) fn parse_error(path: &Path, source: ParseError) -> Error {
    Error::SourceParse {
        path: path.to_path_buf(),
        source,
    }
}
