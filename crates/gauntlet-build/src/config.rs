//! The resolved build configuration record.
//!
//! A human-facing build file is parsed into an untyped TOML table first;
//! [`BuildConfig::from_directives`] then dispatches each key through the
//! [`DIRECTIVES`] table to a typed parser. Unknown keys are rejected.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use gauntlet_compose::{resolve_namespace, Namespace};
use gauntlet_types::{ComposeEntry, ContentHash};
use serde::Deserialize;
use toml::Value;

use crate::error::{BuildError, BuildResult};

pub const DEFAULT_BUILD_PATH: &str = "build";
pub const DEFAULT_TASK: &str = "/build.exec";
pub const DEFAULT_FETCH_CONCURRENCY: usize = 4;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BuildConfig {
    /// Label given to the output shard.
    pub name: String,
    /// Local tree copied into the root before anything else.
    pub build_init: Option<PathBuf>,
    /// Where `build_init` lands inside the root, and the anchor for
    /// relative `files` paths.
    pub build_path: String,
    /// Executable run inside the root, as seen from inside it.
    pub task: String,
    /// Linked dependencies.
    pub compose: Vec<ComposeEntry>,
    /// Dependencies present only while the task runs.
    pub compose_buildonly: Vec<ComposeEntry>,
    /// Drop list recorded in the output shard.
    pub drop: Vec<String>,
    /// Mode overrides recorded in the output shard.
    pub chmod: BTreeMap<String, u16>,
    /// Objects written verbatim into the root: path to hash.
    pub files: BTreeMap<String, ContentHash>,
    /// Repository URLs the store should index before dependencies are fetched.
    pub git_hint: Vec<String>,
    /// Directory inside the root packaged as the output shard's payload.
    pub output_path: Option<String>,
    /// Upper bound on concurrent dependency downloads.
    pub fetch_concurrency: usize,
    /// Kill the task after this many seconds.
    pub timeout_secs: Option<u64>,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            build_init: None,
            build_path: DEFAULT_BUILD_PATH.to_string(),
            task: DEFAULT_TASK.to_string(),
            compose: Vec::new(),
            compose_buildonly: Vec::new(),
            drop: Vec::new(),
            chmod: BTreeMap::new(),
            files: BTreeMap::new(),
            git_hint: Vec::new(),
            output_path: None,
            fetch_concurrency: DEFAULT_FETCH_CONCURRENCY,
            timeout_secs: None,
        }
    }
}

/// Parses one directive's value into the record.
pub type DirectiveParser = fn(&mut BuildConfig, Value) -> BuildResult<()>;

/// Every recognised directive, by its name in the build file.
pub static DIRECTIVES: &[(&str, DirectiveParser)] = &[
    ("name", parse_name),
    ("build-init", parse_build_init),
    ("build-path", parse_build_path),
    ("task", parse_task),
    ("compose", parse_compose),
    ("compose-buildonly", parse_compose_buildonly),
    ("drop", parse_drop),
    ("chmod", parse_chmod),
    ("files", parse_files),
    ("git-hint", parse_git_hint),
    ("output-path", parse_output_path),
    ("fetch-concurrency", parse_fetch_concurrency),
    ("timeout-secs", parse_timeout_secs),
];

fn lookup(name: &str) -> Option<DirectiveParser> {
    DIRECTIVES
        .iter()
        .find(|(directive, _)| *directive == name)
        .map(|(_, parser)| *parser)
}

impl BuildConfig {
    /// Build a record from an untyped table, starting from defaults.
    pub fn from_directives(table: toml::Table) -> BuildResult<Self> {
        let mut config = Self::default();
        for (key, value) in table {
            let parser = lookup(&key).ok_or_else(|| BuildError::UnknownDirective(key.clone()))?;
            parser(&mut config, value)?;
        }
        Ok(config)
    }

    pub fn from_toml(text: &str) -> BuildResult<Self> {
        let table: toml::Table = text
            .parse()
            .map_err(|e: toml::de::Error| BuildError::directive("<file>", e.to_string()))?;
        Self::from_directives(table)
    }

    pub fn load(path: &Path) -> BuildResult<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml(&text)
    }

    /// Timeout as a duration.
    pub fn timeout(&self) -> Option<std::time::Duration> {
        self.timeout_secs.map(std::time::Duration::from_secs)
    }
}

fn typed<T: for<'de> Deserialize<'de>>(directive: &str, value: Value) -> BuildResult<T> {
    value
        .try_into()
        .map_err(|e: toml::de::Error| BuildError::directive(directive, e.message().to_string()))
}

fn parse_name(config: &mut BuildConfig, value: Value) -> BuildResult<()> {
    config.name = typed("name", value)?;
    Ok(())
}

fn parse_build_init(config: &mut BuildConfig, value: Value) -> BuildResult<()> {
    config.build_init = Some(typed("build-init", value)?);
    Ok(())
}

fn parse_build_path(config: &mut BuildConfig, value: Value) -> BuildResult<()> {
    let path: String = typed("build-path", value)?;
    if path.trim_matches('/').is_empty() {
        return Err(BuildError::directive("build-path", "must name a subdirectory"));
    }
    config.build_path = path;
    Ok(())
}

fn parse_task(config: &mut BuildConfig, value: Value) -> BuildResult<()> {
    let task: String = typed("task", value)?;
    if !task.starts_with('/') {
        return Err(BuildError::directive("task", format!("'{task}' must be an absolute path")));
    }
    config.task = task;
    Ok(())
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct RawEntry {
    package: String,
    hash: String,
}

fn compose_entries(
    directive: &str,
    value: Value,
    namespace: Namespace,
) -> BuildResult<Vec<ComposeEntry>> {
    let raw: Vec<RawEntry> = typed(directive, value)?;
    let entries = raw
        .into_iter()
        .map(|e| {
            let hash = ContentHash::from_hex(&e.hash)
                .map_err(|err| BuildError::directive(directive, err.to_string()))?;
            ComposeEntry::new(e.package, hash)
                .map_err(|err| BuildError::directive(directive, err.to_string()))
        })
        .collect::<BuildResult<Vec<_>>>()?;
    Ok(resolve_namespace(&entries, namespace)?)
}

fn parse_compose(config: &mut BuildConfig, value: Value) -> BuildResult<()> {
    config.compose = compose_entries("compose", value, Namespace::Linked)?;
    Ok(())
}

fn parse_compose_buildonly(config: &mut BuildConfig, value: Value) -> BuildResult<()> {
    config.compose_buildonly = compose_entries("compose-buildonly", value, Namespace::BuildOnly)?;
    Ok(())
}

fn parse_drop(config: &mut BuildConfig, value: Value) -> BuildResult<()> {
    config.drop = typed("drop", value)?;
    Ok(())
}

/// Modes may be TOML integers (`0o755`) or octal strings (`"0755"`).
fn parse_chmod(config: &mut BuildConfig, value: Value) -> BuildResult<()> {
    let table = match value {
        Value::Table(table) => table,
        other => {
            return Err(BuildError::directive(
                "chmod",
                format!("expected a table, found {}", other.type_str()),
            ))
        }
    };
    let mut chmod = BTreeMap::new();
    for (path, mode) in table {
        let mode = match &mode {
            Value::Integer(n) => u16::try_from(*n).ok().filter(|m| *m <= 0o7777),
            Value::String(s) => u16::from_str_radix(s, 8).ok().filter(|m| *m <= 0o7777),
            _ => None,
        }
        .ok_or_else(|| BuildError::directive("chmod", format!("invalid mode for '{path}': {mode}")))?;
        chmod.insert(path, mode);
    }
    config.chmod = chmod;
    Ok(())
}

fn parse_files(config: &mut BuildConfig, value: Value) -> BuildResult<()> {
    let raw: BTreeMap<String, String> = typed("files", value)?;
    config.files = raw
        .into_iter()
        .map(|(path, hash)| {
            ContentHash::from_hex(&hash)
                .map(|hash| (path, hash))
                .map_err(|e| BuildError::directive("files", e.to_string()))
        })
        .collect::<BuildResult<_>>()?;
    Ok(())
}

fn parse_git_hint(config: &mut BuildConfig, value: Value) -> BuildResult<()> {
    config.git_hint = typed("git-hint", value)?;
    Ok(())
}

fn parse_output_path(config: &mut BuildConfig, value: Value) -> BuildResult<()> {
    config.output_path = Some(typed("output-path", value)?);
    Ok(())
}

fn parse_fetch_concurrency(config: &mut BuildConfig, value: Value) -> BuildResult<()> {
    let n: usize = typed("fetch-concurrency", value)?;
    if n == 0 {
        return Err(BuildError::directive("fetch-concurrency", "must be at least 1"));
    }
    config.fetch_concurrency = n;
    Ok(())
}

fn parse_timeout_secs(config: &mut BuildConfig, value: Value) -> BuildResult<()> {
    config.timeout_secs = Some(typed("timeout-secs", value)?);
    Ok(())
}
