//! Text formats of configuration files.
//!
//! A [`Format`] turns text into a value tree and back. [`Json`] and [`Toml`] are always
//! available, [`Ini`] is behind the `ini` feature (on by default). Other formats can be plugged
//! into the [`File`][crate::store::File] store by implementing the trait.

use std::error::Error;
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use err_context::prelude::*;
use fallible_iterator::FallibleIterator;
use log::trace;
use serde_json::{Map, Value};

use crate::error::AnyError;
use crate::keypath;

/// A configuration file format.
pub trait Format: Send + Sync {
    /// Name of the format, as used in the `format` option of file stores.
    fn name(&self) -> &'static str;

    /// Parses the text into a value tree.
    fn parse(&self, text: &str) -> Result<Value, AnyError>;

    /// Turns the value tree into text.
    fn stringify(&self, value: &Value) -> Result<String, AnyError>;
}

/// The JSON format, pretty-printed with two spaces of indentation.
#[derive(Copy, Clone, Debug, Default)]
pub struct Json;

impl Format for Json {
    fn name(&self) -> &'static str {
        "json"
    }

    fn parse(&self, text: &str) -> Result<Value, AnyError> {
        Ok(serde_json::from_str(text)?)
    }

    fn stringify(&self, value: &Value) -> Result<String, AnyError> {
        Ok(serde_json::to_string_pretty(value)?)
    }
}

/// The TOML format.
#[derive(Copy, Clone, Debug, Default)]
pub struct Toml;

impl Format for Toml {
    fn name(&self) -> &'static str {
        "toml"
    }

    fn parse(&self, text: &str) -> Result<Value, AnyError> {
        Ok(toml::from_str(text)?)
    }

    fn stringify(&self, value: &Value) -> Result<String, AnyError> {
        // The toml serializer doesn't like if a scalar value comes after a table :-(. The
        // `Value` type doesn't mind and reorders the output, so we go indirectly.
        let value = toml::Value::try_from(value).context("Value not representable in TOML")?;
        Ok(toml::to_string_pretty(&value)?)
    }
}

/// The INI format.
///
/// Dotted section names (`[database.replica]`) are nested objects, `true`, `false` and `null`
/// are turned into the corresponding values and repeated `key[]` entries form arrays. Other
/// values stay strings.
#[cfg(feature = "ini")]
#[derive(Copy, Clone, Debug, Default)]
pub struct Ini;

#[cfg(feature = "ini")]
mod ini_impl {
    use super::*;

    fn literal(text: &str) -> Value {
        match text {
            "true" => Value::Bool(true),
            "false" => Value::Bool(false),
            "null" => Value::Null,
            other => Value::String(other.to_owned()),
        }
    }

    fn text(value: &Value) -> String {
        match value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        }
    }

    fn section_mut<'a>(
        root: &'a mut Map<String, Value>,
        name: &str,
    ) -> Option<&'a mut Map<String, Value>> {
        let mut current = root;
        for part in name.split('.') {
            let entry = current
                .entry(part.to_owned())
                .or_insert_with(|| Value::Object(Map::new()));
            if !entry.is_object() {
                *entry = Value::Object(Map::new());
            }
            current = entry.as_object_mut()?;
        }
        Some(current)
    }

    fn write_section(ini: &mut ini::Ini, name: Option<&str>, map: &Map<String, Value>) {
        let section = name.map(str::to_owned);
        for (key, value) in map {
            match value {
                Value::Object(_) => (),
                Value::Array(items) => {
                    let props = ini.entry(section.clone()).or_insert_with(Default::default);
                    for item in items {
                        props.append(format!("{}[]", key), text(item));
                    }
                }
                other => {
                    ini.with_section(section.clone()).set(key.as_str(), text(other));
                }
            }
        }
        for (key, value) in map {
            if let Value::Object(child) = value {
                let child_name = keypath::keyed(".", name.into_iter().chain(Some(key.as_str())));
                write_section(ini, Some(&child_name), child);
            }
        }
    }

    impl Format for Ini {
        fn name(&self) -> &'static str {
            "ini"
        }

        fn parse(&self, text: &str) -> Result<Value, AnyError> {
            let parsed = ini::Ini::load_from_str(text)?;
            let mut root = Map::new();
            for (section, props) in parsed.iter() {
                let target = match section {
                    None => Some(&mut root),
                    Some(name) => section_mut(&mut root, name),
                };
                let target = match target {
                    Some(target) => target,
                    None => continue,
                };
                for (key, value) in props.iter() {
                    if let Some(key) = key.strip_suffix("[]") {
                        let entry = target
                            .entry(key.to_owned())
                            .or_insert_with(|| Value::Array(Vec::new()));
                        if !entry.is_array() {
                            *entry = Value::Array(Vec::new());
                        }
                        if let Value::Array(items) = entry {
                            items.push(literal(value));
                        }
                    } else {
                        target.insert(key.to_owned(), literal(value));
                    }
                }
            }
            Ok(Value::Object(root))
        }

        fn stringify(&self, value: &Value) -> Result<String, AnyError> {
            let mut out = ini::Ini::new();
            if let Value::Object(map) = value {
                write_section(&mut out, None, map);
            }
            let mut buffer = Vec::new();
            out.write_to(&mut buffer)?;
            Ok(String::from_utf8(buffer)?)
        }
    }
}

/// Looks up a built-in format by its name.
pub fn format_by_name(name: &str) -> Option<Arc<dyn Format>> {
    match name.to_lowercase().as_str() {
        "json" => Some(Arc::new(Json)),
        "toml" => Some(Arc::new(Toml)),
        #[cfg(feature = "ini")]
        "ini" => Some(Arc::new(Ini)),
        _ => None,
    }
}

/// Picks the format by the extension of the file, defaulting to JSON.
pub fn format_for_path(path: &Path) -> Arc<dyn Format> {
    path.extension()
        .and_then(|ext| ext.to_str())
        .and_then(format_by_name)
        .unwrap_or_else(|| Arc::new(Json))
}

/// An error returned whenever something not a file nor a directory is passed as configuration.
#[derive(Debug)]
pub struct InvalidFileType(pub PathBuf);

impl Display for InvalidFileType {
    fn fmt(&self, fmt: &mut Formatter) -> FmtResult {
        write!(
            fmt,
            "Configuration path {:?} is not a file nor a directory",
            self.0
        )
    }
}

impl Error for InvalidFileType {}

/// Returned if configuration path is missing.
#[derive(Debug)]
pub struct MissingFile(pub PathBuf);

impl Display for MissingFile {
    fn fmt(&self, fmt: &mut Formatter) -> FmtResult {
        write!(fmt, "Configuration path {:?} does not exist", self.0)
    }
}

impl Error for MissingFile {}

/// Reads and parses a single file, picking the format by its extension.
pub fn load_file(path: &Path) -> Result<Value, AnyError> {
    trace!("Loading config file {:?}", path);
    let text = fs::read_to_string(path)
        .with_context(|_| format!("Failed to read config file {:?}", path))?;
    let value = format_for_path(path)
        .parse(&text)
        .with_context(|_| format!("Failed to parse config file {:?}", path))?;
    Ok(value)
}

/// Regular files directly inside the directory that have a known format, sorted by name.
fn config_files_in(dir: &Path) -> Result<Vec<PathBuf>, AnyError> {
    trace!("Scanning directory {:?}", dir);
    let mut files = fallible_iterator::convert(dir.read_dir()?)
        .map(|entry| Ok(entry.path()))
        .filter_map(|path| {
            let known = path
                .extension()
                .and_then(|ext| ext.to_str())
                .and_then(format_by_name)
                .is_some();
            if known && path.symlink_metadata()?.is_file() {
                Ok(Some(path))
            } else {
                trace!("Skipping {:?}", path);
                Ok(None)
            }
        })
        .collect::<Vec<_>>()
        .with_context(|_| format!("Failed to scan config directory {:?}", dir))?;
    files.sort();
    Ok(files)
}

/// Loads and merges multiple files.
///
/// Later files override earlier ones. Directories are scanned (not recursively) and the files
/// with a known extension in them are loaded, in the lexicographical order of their names.
pub fn load_files<P: AsRef<Path>>(paths: &[P]) -> Result<Value, AnyError> {
    let mut loaded = Vec::new();
    for path in paths {
        let path = path.as_ref();
        if path.is_file() {
            loaded.push(load_file(path)?);
        } else if path.is_dir() {
            for file in config_files_in(path)? {
                loaded.push(load_file(&file)?);
            }
        } else if path.exists() {
            return Err(InvalidFileType(path.to_owned()).into());
        } else {
            return Err(MissingFile(path.to_owned()).into());
        }
    }
    loaded.reverse();
    Ok(keypath::merge_all(loaded))
}
