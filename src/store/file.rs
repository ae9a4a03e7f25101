//! A store backed by a configuration file.

use std::fmt::{Debug, Formatter, Result as FmtResult};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use err_context::prelude::*;
use log::{debug, trace};
use serde::Deserialize;
use serde_json::{Map, Value};

use crate::error::{AnyError, RootNotObject};
use crate::formats::{self, Format};
use crate::options::{self, StoreOptions};
use crate::store::{Capabilities, Memory, Mode, Store};
use crate::utils;

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FileOptions {
    file: PathBuf,
    #[serde(default)]
    dir: Option<PathBuf>,
    #[serde(default)]
    search: bool,
    #[serde(default)]
    format: Option<String>,
}

/// Looks for the file in the base directory and all its parents.
///
/// Returns the first existing one, closest to the base.
fn search(file: &Path, base: &Path) -> Option<PathBuf> {
    base.ancestors()
        .map(|dir| dir.join(file))
        .inspect(|candidate| trace!("Looking for config file at {:?}", candidate))
        .find(|candidate| candidate.is_file())
}

/// The file store.
///
/// Backend options:
///
/// * `file`: the path of the file (required).
/// * `dir`: a directory relative paths are resolved against.
/// * `search`: look for the file in `dir` (or the current directory) and all its parents.
/// * `format`: `json`, `toml` or `ini`. Derived from the extension by default, falling back to
///   JSON.
///
/// A missing file loads as an empty object. Saving writes the current content of the store.
pub struct File {
    memory: Memory,
    path: PathBuf,
    format: Arc<dyn Format>,
}

impl File {
    /// Creates the store from options.
    ///
    /// The file is not read until loaded.
    pub fn new(options: &StoreOptions) -> Result<Self, AnyError> {
        let settings: FileOptions = options::backend_options("file", options)?;
        let format = match &settings.format {
            Some(name) => formats::format_by_name(name)
                .ok_or_else(|| format!("Unknown config file format {}", name))?,
            None => formats::format_for_path(&settings.file),
        };
        let found = if settings.search && !settings.file.is_absolute() {
            let base = utils::absolute_path(Path::new(""), settings.dir.as_deref());
            search(&settings.file, &base)
        } else {
            None
        };
        let path = found
            .unwrap_or_else(|| utils::absolute_path(&settings.file, settings.dir.as_deref()));
        debug!("File store at {:?} in {} format", path, format.name());
        let memory = Memory::with_kind("file", options, false)?;
        Ok(File {
            memory,
            path,
            format,
        })
    }

    /// Creates the store with a custom format.
    pub fn with_format<F: Format + 'static>(options: &StoreOptions, format: F) -> Result<Self, AnyError> {
        let mut file = Self::new(options)?;
        file.format = Arc::new(format);
        Ok(file)
    }

    /// The resolved path of the file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The format used to read and write the file.
    pub fn format(&self) -> &dyn Format {
        &*self.format
    }

    fn read(&self) -> Result<Value, AnyError> {
        let text = match fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("Config file {:?} doesn't exist, starting empty", self.path);
                return Ok(Value::Object(Map::new()));
            }
            Err(e) => {
                return Err(e)
                    .with_context(|_| format!("Failed to read config file {:?}", self.path))
                    .map_err(AnyError::from)
            }
        };
        let value = self
            .format
            .parse(&text)
            .with_context(|_| format!("Failed to parse config file {:?}", self.path))?;
        Ok(value)
    }
}

impl Debug for File {
    fn fmt(&self, fmt: &mut Formatter) -> FmtResult {
        fmt.debug_struct("File")
            .field("memory", &self.memory)
            .field("path", &self.path)
            .field("format", &self.format.name())
            .finish()
    }
}

impl Store for File {
    delegate_to_memory!(memory);

    fn capabilities(&self) -> Capabilities {
        Capabilities::sync_memory()
            .with_load(Mode::Sync)
            .with_save(Mode::Sync)
    }

    fn load_sync(&mut self) -> Result<Value, AnyError> {
        let value = self.read()?;
        if !value.is_object() {
            return Err(RootNotObject)
                .with_context(|_| format!("Config file {:?} doesn't hold an object", self.path))
                .map_err(AnyError::from);
        }
        self.memory.force_set("", value);
        self.memory.load_sync()
    }

    fn save_sync(&mut self, _value: Option<&Value>) -> Result<Option<Value>, AnyError> {
        let tree = self.memory.tree().clone();
        let text = self
            .format
            .stringify(&tree)
            .with_context(|_| format!("Failed to serialize config file {:?}", self.path))?;
        trace!("Writing config file {:?}", self.path);
        fs::write(&self.path, text)
            .with_context(|_| format!("Failed to write config file {:?}", self.path))?;
        Ok(Some(tree))
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn opts(path: &Path) -> StoreOptions {
        StoreOptions::of_type("file").set("file", path.to_string_lossy().into_owned())
    }

    #[test]
    fn missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let mut file = File::new(&opts(&dir.path().join("missing.json"))).unwrap();
        assert_eq!(json!({}), file.load_sync().unwrap());
    }

    #[test]
    fn save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let mut file = File::new(&opts(&path)).unwrap();
        file.set("db:host", json!("localhost")).unwrap();
        file.set("db:port", json!(5432)).unwrap();
        let saved = file.save_sync(None).unwrap().unwrap();
        assert_eq!(json!({"db": {"host": "localhost", "port": 5432}}), saved);

        let mut again = File::new(&opts(&path)).unwrap();
        assert_eq!(saved, again.load_sync().unwrap());
        assert_eq!(Some(json!(5432)), again.get("db:port").unwrap());
    }

    #[test]
    fn toml_by_extension() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "[server]\nport = 80\n").unwrap();
        let mut file = File::new(&opts(&path)).unwrap();
        assert_eq!("toml", file.format().name());
        file.load_sync().unwrap();
        assert_eq!(Some(json!(80)), file.get("server:port").unwrap());
    }

    #[test]
    fn explicit_format() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.conf");
        fs::write(&path, "[server]\nport = 80\n").unwrap();
        let mut file = File::new(&opts(&path).set("format", "toml")).unwrap();
        file.load_sync().unwrap();
        assert_eq!(Some(json!(80)), file.get("server:port").unwrap());

        assert!(File::new(&opts(&path).set("format", "yaml")).is_err());
    }

    #[test]
    fn parse_error_names_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.json");
        fs::write(&path, "{not json").unwrap();
        let mut file = File::new(&opts(&path)).unwrap();
        let err = file.load_sync().unwrap_err();
        assert!(err.to_string().contains("broken.json"));
    }

    #[test]
    fn search_in_parents() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("a").join("b");
        fs::create_dir_all(&nested).unwrap();
        fs::write(dir.path().join("app.json"), r#"{"found": true}"#).unwrap();
        let options = StoreOptions::of_type("file")
            .set("file", "app.json")
            .set("dir", nested.to_string_lossy().into_owned())
            .set("search", true);
        let mut file = File::new(&options).unwrap();
        file.load_sync().unwrap();
        assert_eq!(Some(json!(true)), file.get("found").unwrap());
    }

    #[test]
    fn missing_file_option() {
        assert!(File::new(&StoreOptions::of_type("file")).is_err());
    }

    #[test]
    fn custom_format() {
        struct Lines;

        impl Format for Lines {
            fn name(&self) -> &'static str {
                "lines"
            }
            fn parse(&self, text: &str) -> Result<Value, AnyError> {
                let mut map = Map::new();
                for line in text.lines() {
                    let pos = line.find('=').ok_or("Missing =")?;
                    map.insert(line[..pos].to_owned(), Value::String(line[pos + 1..].to_owned()));
                }
                Ok(Value::Object(map))
            }
            fn stringify(&self, value: &Value) -> Result<String, AnyError> {
                let map = value.as_object().ok_or(RootNotObject)?;
                Ok(map
                    .iter()
                    .map(|(k, v)| format!("{}={}\n", k, v.as_str().unwrap_or_default()))
                    .collect())
            }
        }

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.lines");
        fs::write(&path, "a=1\nb=2\n").unwrap();
        let mut file = File::with_format(&opts(&path), Lines).unwrap();
        assert_eq!(json!({"a": "1", "b": "2"}), file.load_sync().unwrap());
        file.set("c", json!("3")).unwrap();
        file.save_sync(None).unwrap();
        assert_eq!("a=1\nb=2\nc=3\n", fs::read_to_string(&path).unwrap());
    }
}
