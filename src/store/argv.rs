//! A store filled from the command line.
//!
//! Either a small built-in parser handles the raw arguments or a [`StructOpt`] type does the
//! parsing and its serialized form is used.

use std::collections::HashSet;
use std::env;
use std::ffi::OsString;
use std::iter::Peekable;

use log::{debug, trace};
use serde::Serialize;
use serde_json::{Number, Value};
use structopt::StructOpt;

use crate::error::AnyError;
use crate::keypath;
use crate::options::StoreOptions;
use crate::store::{Capabilities, Memory, Mode, Store};

/// The key collecting positional arguments.
pub const POSITIONAL: &str = "_";

fn coerce(raw: &str) -> Value {
    match raw {
        "true" => return Value::Bool(true),
        "false" => return Value::Bool(false),
        _ => (),
    }
    if let Ok(int) = raw.parse::<i64>() {
        return Value::Number(int.into());
    }
    raw.parse::<f64>()
        .ok()
        .filter(|_| raw.chars().any(|c| c.is_ascii_digit()))
        .and_then(Number::from_f64)
        .map(Value::Number)
        .unwrap_or_else(|| Value::String(raw.to_owned()))
}

fn is_option(arg: &str) -> bool {
    arg.len() > 1 && arg.starts_with('-') && !matches!(coerce(arg), Value::Number(_))
}

// The value of an option is the next argument, unless it looks like another option.
fn value_of<I: Iterator<Item = String>>(args: &mut Peekable<I>) -> Value {
    match args.peek() {
        Some(next) if !is_option(next) => args
            .next()
            .map(|v| coerce(&v))
            .unwrap_or(Value::Bool(true)),
        _ => Value::Bool(true),
    }
}

/// Parses raw command line arguments into `(key, value)` pairs.
///
/// * `--key=value` and `--key value` set the key.
/// * `--flag` alone sets `true`, `--no-flag` sets `false`.
/// * `-abc` sets `a`, `b` and `c` to `true`; the last one of them can take a value (`-p 80`).
/// * Numeric values become numbers, `true` and `false` become booleans.
/// * Everything else (and everything after `--`) is positional and goes under `_`.
///
/// Dots in the keys are kept, they are turned into nesting by the store.
pub fn parse_args<I, S>(args: I) -> Vec<(String, Value)>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let mut args = args.into_iter().map(Into::into).peekable();
    let mut pairs = Vec::new();
    let mut positional = Vec::new();

    while let Some(arg) = args.next() {
        if arg == "--" {
            positional.extend(args.by_ref().map(|a| coerce(&a)));
            break;
        }
        if let Some(long) = arg.strip_prefix("--") {
            if let Some(pos) = long.find('=') {
                pairs.push((long[..pos].to_owned(), coerce(&long[pos + 1..])));
            } else if let Some(negated) = long.strip_prefix("no-") {
                pairs.push((negated.to_owned(), Value::Bool(false)));
            } else {
                let value = value_of(&mut args);
                pairs.push((long.to_owned(), value));
            }
        } else if is_option(&arg) {
            let short = &arg[1..];
            if let Some(pos) = short.find('=') {
                pairs.push((short[..pos].to_owned(), coerce(&short[pos + 1..])));
                continue;
            }
            let letters = short.chars().collect::<Vec<_>>();
            if let Some((last, init)) = letters.split_last() {
                for letter in init {
                    pairs.push((letter.to_string(), Value::Bool(true)));
                }
                let value = value_of(&mut args);
                pairs.push((last.to_string(), value));
            }
        } else {
            positional.push(coerce(&arg));
        }
    }

    pairs.push((POSITIONAL.to_owned(), Value::Array(positional)));
    pairs
}

/// The command line store.
///
/// Read only unless the options say `readOnly: false`. The arguments are (re)applied on each
/// load; the provider loads the store as soon as it is added.
///
/// ```rust
/// use serde_json::json;
/// use strata::StoreOptions;
/// use strata::store::{Argv, Store};
///
/// let mut argv = Argv::from_args(
///     &StoreOptions::new(),
///     vec!["--db.port=5432", "--verbose", "run"],
/// ).unwrap();
/// argv.load_sync().unwrap();
/// assert_eq!(Some(json!(5432)), argv.get("db:port").unwrap());
/// assert_eq!(Some(json!(true)), argv.get("verbose").unwrap());
/// assert_eq!(Some(json!(["run"])), argv.get("_").unwrap());
/// ```
#[derive(Clone, Debug)]
pub struct Argv {
    memory: Memory,
    pairs: Vec<(String, Value)>,
}

impl Argv {
    /// Creates the store from the arguments of the current process.
    ///
    /// If the options contain `args` (a list of strings), these are used instead.
    pub fn new(options: &StoreOptions) -> Result<Self, AnyError> {
        match options.extra.get("args") {
            Some(Value::Array(args)) => {
                let args = args
                    .iter()
                    .map(|arg| match arg {
                        Value::String(s) => s.clone(),
                        other => other.to_string(),
                    })
                    .collect::<Vec<_>>();
                Self::from_args(options, args)
            }
            Some(_) => Err("The args option of argv store must be a list".into()),
            None => Self::from_args(options, env::args().skip(1)),
        }
    }

    /// Creates the store from the given arguments (without the program name).
    pub fn from_args<I, S>(options: &StoreOptions, args: I) -> Result<Self, AnyError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::with_pairs(options, parse_args(args))
    }

    /// Creates the store by parsing the process arguments with a [`StructOpt`] type.
    ///
    /// Fields that are not present (`None`) are left out.
    pub fn from_structopt<O>(options: &StoreOptions) -> Result<Self, AnyError>
    where
        O: StructOpt + Serialize,
    {
        Self::from_structopt_iter::<O, _>(options, env::args_os())
    }

    /// Like [`from_structopt`][Argv::from_structopt], but with explicit arguments.
    ///
    /// The first argument is the program name, as with the [`StructOpt`] methods.
    pub fn from_structopt_iter<O, I>(options: &StoreOptions, args: I) -> Result<Self, AnyError>
    where
        O: StructOpt + Serialize,
        I: IntoIterator,
        I::Item: Into<OsString> + Clone,
    {
        let parsed = O::from_iter_safe(args)?;
        let pairs = match serde_json::to_value(&parsed)? {
            Value::Object(map) => map
                .into_iter()
                .filter(|(_, value)| !value.is_null())
                .collect(),
            _ => Vec::new(),
        };
        Self::with_pairs(options, pairs)
    }

    fn with_pairs(options: &StoreOptions, pairs: Vec<(String, Value)>) -> Result<Self, AnyError> {
        let memory = Memory::with_kind("argv", options, true)?;
        Ok(Argv { memory, pairs })
    }

    fn populate(&mut self) {
        let transform = self.memory.options().transform.clone();
        let separator = self.memory.access_separator().to_owned();
        let mut seen = HashSet::new();
        for (key, value) in self.pairs.clone() {
            let (key, value) = match &transform {
                Some(transform) => match transform(key, value) {
                    Some(pair) => pair,
                    None => continue,
                },
                None => (key, value),
            };
            let key = keypath::keyed(&separator, key.split('.'));
            if key.is_empty() {
                continue;
            }
            // Repeated options accumulate into a list
            let value = match self.memory.get(&key) {
                Ok(Some(previous)) if seen.contains(&key) => match previous {
                    Value::Array(mut items) => {
                        items.push(value);
                        Value::Array(items)
                    }
                    previous => Value::Array(vec![previous, value]),
                },
                _ => value,
            };
            trace!("Setting {} from the command line", key);
            self.memory.force_set(&key, value);
            seen.insert(key);
        }
        debug!("Loaded {} command line keys", seen.len());
    }
}

impl Store for Argv {
    delegate_to_memory!(memory);

    fn capabilities(&self) -> Capabilities {
        Capabilities::sync_memory().with_load(Mode::Sync)
    }

    fn load_sync(&mut self) -> Result<Value, AnyError> {
        self.populate();
        self.memory.load_sync()
    }
}

#[cfg(test)]
mod tests {
    use serde::Serialize;
    use serde_json::json;

    use super::*;

    fn loaded(options: &StoreOptions, args: &[&str]) -> Argv {
        let mut argv = Argv::from_args(options, args.iter().copied()).unwrap();
        argv.load_sync().unwrap();
        argv
    }

    #[test]
    fn parse_long_options() {
        let pairs = parse_args(vec!["--a=1", "--b", "x", "--c", "--no-d", "--e", "--", "--f"]);
        assert_eq!(
            vec![
                ("a".to_owned(), json!(1)),
                ("b".to_owned(), json!("x")),
                ("c".to_owned(), json!(true)),
                ("d".to_owned(), json!(false)),
                ("e".to_owned(), json!(true)),
                ("_".to_owned(), json!(["--f"])),
            ],
            pairs
        );
    }

    #[test]
    fn parse_short_options() {
        let pairs = parse_args(vec!["-abc", "-p", "80", "pos", "-5", "-x=y"]);
        assert_eq!(
            vec![
                ("a".to_owned(), json!(true)),
                ("b".to_owned(), json!(true)),
                ("c".to_owned(), json!(true)),
                ("p".to_owned(), json!(80)),
                ("x".to_owned(), json!("y")),
                ("_".to_owned(), json!(["pos", -5])),
            ],
            pairs
        );
    }

    #[test]
    fn numbers_coerced() {
        assert_eq!(json!(1.5), coerce("1.5"));
        assert_eq!(json!(-3), coerce("-3"));
        assert_eq!(json!("inf"), coerce("inf"));
        assert_eq!(json!("1.2.3"), coerce("1.2.3"));
    }

    #[test]
    fn foo_from_argv() {
        let argv = loaded(&StoreOptions::new(), &["--foo", "1"]);
        assert_eq!(Some(json!(1)), argv.get("foo").unwrap());
    }

    #[test]
    fn dotted_keys_nest() {
        let argv = loaded(&StoreOptions::new(), &["--db.host=local", "--db.port", "5432"]);
        assert_eq!(
            Some(json!({"host": "local", "port": 5432})),
            argv.get("db").unwrap()
        );
    }

    #[test]
    fn repeated_options_accumulate() {
        let argv = loaded(&StoreOptions::new(), &["--tag=a", "--tag=b", "--tag=c"]);
        assert_eq!(Some(json!(["a", "b", "c"])), argv.get("tag").unwrap());
    }

    #[test]
    fn read_only_by_default() {
        let mut argv = loaded(&StoreOptions::new(), &["--foo=1"]);
        assert!(argv.read_only());
        assert!(!argv.set("foo", json!(2)).unwrap());

        let mut argv = loaded(&StoreOptions::new().read_only(false), &["--foo=1"]);
        assert!(argv.set("foo", json!(2)).unwrap());
        assert_eq!(Some(json!(2)), argv.get("foo").unwrap());
    }

    #[test]
    fn transform_reshapes_and_drops() {
        let opts = StoreOptions::new().transform(|key, value| {
            if key == "secret" {
                None
            } else {
                Some((key.to_uppercase(), value))
            }
        });
        let argv = loaded(&opts, &["--secret=x", "--name=y"]);
        assert_eq!(None, argv.get("secret").unwrap());
        assert_eq!(Some(json!("y")), argv.get("NAME").unwrap());
    }

    #[test]
    fn args_option() {
        let opts = StoreOptions::of_type("argv").set("args", json!(["--port=8080"]));
        let mut argv = Argv::new(&opts).unwrap();
        argv.load_sync().unwrap();
        assert_eq!(Some(json!(8080)), argv.get("port").unwrap());

        let opts = StoreOptions::of_type("argv").set("args", "--port=8080");
        assert!(Argv::new(&opts).is_err());
    }

    #[derive(Debug, Serialize, StructOpt)]
    struct Opts {
        #[structopt(long)]
        port: Option<u16>,
        #[structopt(long)]
        host: Option<String>,
        #[structopt(short, long)]
        verbose: bool,
    }

    #[test]
    fn from_structopt() {
        let mut argv =
            Argv::from_structopt_iter::<Opts, _>(&StoreOptions::new(), vec!["app", "--port", "80"])
                .unwrap();
        argv.load_sync().unwrap();
        assert_eq!(Some(json!(80)), argv.get("port").unwrap());
        assert_eq!(Some(json!(false)), argv.get("verbose").unwrap());
        assert_eq!(None, argv.get("host").unwrap());

        assert!(Argv::from_structopt_iter::<Opts, _>(
            &StoreOptions::new(),
            vec!["app", "--unknown"]
        )
        .is_err());
    }
}
