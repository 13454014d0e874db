//! The INI-like source grammar.
//!
//! ```text
//! top = 1                      # keys before any section live at the root
//! [database]
//! host = localhost             # -> database.host
//! pool.size = 4                // -> database.pool.size
//! name = "quoted # value"      # quotes are removed, comments stripped
//! include shared.conf          # merged in here, relative to this file
//! ```
//!
//! Lines that match none of these forms are ignored.
use std::{
    collections::HashSet,
    convert::Infallible,
    path::{Path, PathBuf},
};

use crate::{
    Document, doc,
    error::{ParseError, Result},
    source::{parse_error, read},
};

#[derive(Debug, PartialEq, Eq)]
enum Line<'a> {
    Section(&'a str),
    Entry(&'a str, &'a str),
    Include(&'a str),
    Ignored,
}

fn is_key_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '.'
}

fn is_section_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

fn classify(line: &str) -> Line<'_> {
    let trimmed = line.trim_start();

    if let Some((key, value)) = trimmed.split_once('=') {
        let key = key.trim_end();
        if !key.is_empty() && key.chars().all(is_key_char) {
            return Line::Entry(key, value);
        }
    }

    let header = trimmed.strip_prefix('-').unwrap_or(trimmed);
    if let Some(rest) = header.strip_prefix('[') {
        if let Some((name, _)) = rest.split_once(']') {
            if !name.is_empty() && name.chars().all(is_section_char) {
                return Line::Section(name);
            }
        }
    }

    if let Some(rest) = line.strip_prefix("include") {
        if rest.is_empty() || rest.starts_with(char::is_whitespace) {
            return Line::Include(rest.trim());
        }
    }

    Line::Ignored
}

/// Cuts a trailing ` # ...` or ` // ...` comment.
fn strip_comment(raw: &str) -> &str {
    for (i, c) in raw.char_indices() {
        if c.is_whitespace() {
            let rest = raw[i..].trim_start();
            if rest.starts_with('#') || rest.starts_with("//") {
                return &raw[..i];
            }
        }
    }
    raw
}

fn value(raw: &str) -> &str {
    let trimmed = raw.trim();
    if let Some(inner) = trimmed.strip_prefix('"') {
        if let Some(end) = inner.find('"') {
            return &inner[..end];
        }
    }
    strip_comment(raw).trim()
}

/// Parses INI text without following includes.
pub fn parse(text: &str) -> std::result::Result<Document, ParseError> {
    let mut root = Document::map();
    walk(text, |_, _| Ok::<(), Infallible>(()), &mut root).map_err(|e| match e {
        WalkError::Parse(e) => e,
        WalkError::Include(never) => match never {},
    })?;
    Ok(root)
}

enum WalkError<E> {
    Parse(ParseError),
    Include(E),
}

fn walk<E>(
    text: &str,
    mut include: impl FnMut(&str, &mut Document) -> std::result::Result<(), E>,
    root: &mut Document,
) -> std::result::Result<(), WalkError<E>> {
    let mut section: Option<&str> = None;

    for (index, line) in text.lines().enumerate() {
        match classify(line) {
            Line::Entry(key, raw) => {
                let entry = doc! { key => value(raw) };
                match section {
                    Some(section) => root.merge(doc! { section => entry }),
                    None => root.merge(entry),
                }
            }
            Line::Section(name) => section = Some(name),
            Line::Include("") => {
                return Err(WalkError::Parse(ParseError::Ini {
                    line: index + 1,
                    message: "include without a path".to_string(),
                }));
            }
            Line::Include(target) => include(target, root).map_err(WalkError::Include)?,
            Line::Ignored => {}
        }
    }

    Ok(())
}

fn normalize(path: &Path) -> PathBuf {
    path.canonicalize().unwrap_or_else(|_| path.to_path_buf())
}

/// Loads an INI file, following `include` directives.
///
/// An include is resolved relative to the including file and skipped when it
/// names one of `sources` or a file already read during this load.
pub fn load(path: &Path, sources: &[PathBuf]) -> Result<Document> {
    let mut seen: HashSet<PathBuf> = sources.iter().map(|p| normalize(p)).collect();
    seen.insert(normalize(path));

    let mut root = Document::map();
    load_into(path, &mut seen, &mut root)?;
    Ok(root)
}

fn load_into(path: &Path, seen: &mut HashSet<PathBuf>, root: &mut Document) -> Result<()> {
    let text = read(path)?;
    let base = path.parent().map(Path::to_path_buf).unwrap_or_default();

    let result = walk(
        &text,
        |target, root| -> Result<()> {
            let target = base.join(target);
            if !seen.insert(normalize(&target)) {
                tracing::debug!(path = %target.display(), "include already read, skipping");
                return Ok(());
            }

            let mut included = Document::map();
            load_into(&target, seen, &mut included)?;
            root.merge(included);
            Ok(())
        },
        root,
    );

    match result {
        Ok(()) => Ok(()),
        Err(WalkError::Parse(source)) => Err(parse_error(path, source)),
        Err(WalkError::Include(e)) => Err(e),
    }
}
