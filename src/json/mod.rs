//! Purpose: Structured-value accessor over `serde_json::Value` for event payloads.
//! Exports: `parse`, `dump`, `dump_to`, `render`, `lookup`, `get`, `JsonTree`.
//! Role: Stateless helpers callers use on payloads delivered by `StreamConnection`.
//! Invariants: Failures are synchronous `Error`s (`Parse`, `Lookup`, `TypeMismatch`).
//! Invariants: Path walks only descend through objects; arrays are leaves for lookup.

pub mod parse;
mod render;

use std::io::{self, Write};

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::core::error::{Error, ErrorKind};

pub use render::render;

pub type JsonTree = Value;

pub fn parse(text: &str) -> Result<JsonTree, Error> {
    parse::from_str(text).map_err(|err| {
        let hint = parse::hint_for_error(&err, "json.parse");
        Error::new(ErrorKind::Parse)
            .with_message("invalid json")
            .with_hint(hint)
            .with_source(err)
    })
}

/// Writes an indented rendering of `value` to stdout.
pub fn dump(value: &JsonTree) {
    let stdout = io::stdout();
    let mut handle = stdout.lock();
    // A closed stdout is not worth failing a diagnostic dump over.
    let _ = dump_to(value, &mut handle);
}

pub fn dump_to<W: Write>(value: &JsonTree, out: &mut W) -> Result<(), Error> {
    writeln!(out, "{}", render(value, false)).map_err(|err| {
        Error::new(ErrorKind::Io)
            .with_message("failed to write json dump")
            .with_source(err)
    })
}

/// Walks `path` through nested objects and borrows the node it names.
///
/// # Panics
///
/// Panics if `path` is empty.
pub fn lookup<'a, S: AsRef<str>>(value: &'a JsonTree, path: &[S]) -> Result<&'a JsonTree, Error> {
    assert!(!path.is_empty(), "json path must name at least one key");
    let mut node = value;
    for (depth, key) in path.iter().enumerate() {
        let key = key.as_ref();
        let Some(object) = node.as_object() else {
            return Err(Error::new(ErrorKind::Lookup)
                .with_message(format!("cannot index {} with key {key:?}", shape(node)))
                .with_path(join_path(&path[..depth + 1])));
        };
        node = object.get(key).ok_or_else(|| {
            Error::new(ErrorKind::Lookup)
                .with_message(format!("missing key {key:?}"))
                .with_path(join_path(&path[..depth + 1]))
        })?;
    }
    Ok(node)
}

/// Walks `path` and converts the final node into `T`.
///
/// # Panics
///
/// Panics if `path` is empty.
pub fn get<T, S>(value: &JsonTree, path: &[S]) -> Result<T, Error>
where
    T: DeserializeOwned,
    S: AsRef<str>,
{
    let node = lookup(value, path)?;
    T::deserialize(node).map_err(|err| {
        Error::new(ErrorKind::TypeMismatch)
            .with_message(format!(
                "{} does not convert to {}",
                shape(node),
                std::any::type_name::<T>()
            ))
            .with_path(join_path(path))
            .with_source(err)
    })
}

fn shape(node: &JsonTree) -> &'static str {
    match node {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn join_path<S: AsRef<str>>(path: &[S]) -> String {
    path.iter()
        .map(|key| key.as_ref())
        .collect::<Vec<_>>()
        .join(".")
}
