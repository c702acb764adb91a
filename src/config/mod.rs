
use std::{collections::HashSet, fs, path::{Path, PathBuf}};

use regex::{escape, RegexSet};
use serde::Deserialize;

use crate::{error::Result, locks::LockMode};

/// Extensions of files whose content is final once written.
pub const DEFAULT_IMMUTABLE_EXTENSIONS: &[&str] = &["mp4", "wav", "ts", "mp3", "mov"];

/// Editor caches that are regenerated on demand.
pub const DEFAULT_IGNORE_PATTERNS: &[&str] = &[
    "Adobe Premiere Pro Auto-Save",
    "Adobe Premiere Pro Audio Previews",
    "Adobe Premiere Pro Video Previews",
];

pub const DEFAULT_IGNORE_NAMES: &[&str] = &["desktop.ini", "thumbs.db", ".ds_store"];

pub const SOURCE_PLACEHOLDER: &str = "{source}";
pub const DESTINATION_PLACEHOLDER: &str = "{destination}";

pub const DEFAULT_TRANSFER_ARGS: &[&str] = &["copy", SOURCE_PLACEHOLDER, DESTINATION_PLACEHOLDER];

pub const DEFAULT_TASK_COUNT: usize = 8;

/// Everything a single run needs, built once by the caller.
#[derive(Debug, Clone)]
pub struct Config {
    pub source_dir: PathBuf,
    pub mirror_dir: PathBuf,
    pub policy: Policy,
    pub task_count: usize,
    pub remote_lock_mode: LockMode,
    pub dry_run: bool,
}

impl Config {
    pub fn new<P: Into<PathBuf>, Q: Into<PathBuf>>(
        source_dir: P,
        mirror_dir: Q,
        policy: Policy,
    ) -> Self {
        Config {
            source_dir: source_dir.into(),
            mirror_dir: mirror_dir.into(),
            policy,
            task_count: DEFAULT_TASK_COUNT,
            remote_lock_mode: LockMode::Global,
            dry_run: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Policy {
    immutable_extensions: HashSet<String>,
    ignore_patterns: RegexSet,
    ignore_names: HashSet<String>,
    skip_hidden: bool,
}

impl Policy {
    pub fn new<S: AsRef<str>>(
        immutable_extensions: &[S],
        ignore_patterns: &[S],
        ignore_names: &[S],
        skip_hidden: bool,
    ) -> Result<Self> {
        let immutable_extensions = immutable_extensions
            .iter()
            .map(|ext| normalize_extension(ext.as_ref()))
            .collect();
        let ignore_patterns = RegexSet::new(ignore_patterns.iter().map(AsRef::as_ref))?;
        let ignore_names = ignore_names
            .iter()
            .map(|name| name.as_ref().to_lowercase())
            .collect();

        Ok(Policy {
            immutable_extensions,
            ignore_patterns,
            ignore_names,
            skip_hidden,
        })
    }

    /// Extension match is case-insensitive: `EP1.MP4` is as final as `ep1.mp4`.
    pub fn is_immutable(&self, identity: &str) -> bool {
        Path::new(identity)
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| self.immutable_extensions.contains(&normalize_extension(ext)))
    }

    pub fn is_ignored_identity(&self, identity: &str) -> bool {
        self.ignore_patterns.is_match(identity)
    }

    pub fn is_ignored_name(&self, name: &str) -> bool {
        self.ignore_names.contains(&name.to_lowercase())
    }

    pub fn skip_hidden(&self) -> bool {
        self.skip_hidden
    }
}

fn normalize_extension(ext: &str) -> String {
    ext.trim_start_matches('.').to_lowercase()
}

/// Optional JSON overrides; absent fields keep their defaults.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConfigFile {
    pub immutable_extensions: Option<Vec<String>>,
    /// Regular expressions matched against identities.
    pub ignore_patterns: Option<Vec<String>>,
    pub ignore_names: Option<Vec<String>>,
    pub skip_hidden: Option<bool>,
    pub transfer_args: Option<Vec<String>>,
}

impl ConfigFile {
    pub fn load(path: &Path) -> Result<Self> {
        let bytes = fs::read(path)?;
        let config_file = serde_json::from_slice(&bytes)?;
        Ok(config_file)
    }

    pub fn policy(&self) -> Result<Policy> {
        let default_patterns = DEFAULT_IGNORE_PATTERNS
            .iter()
            .map(|s| escape(s))
            .collect::<Vec<_>>();

        Policy::new(
            self.immutable_extensions
                .as_deref()
                .unwrap_or(&to_owned_vec(DEFAULT_IMMUTABLE_EXTENSIONS)),
            self.ignore_patterns.as_deref().unwrap_or(&default_patterns),
            self.ignore_names
                .as_deref()
                .unwrap_or(&to_owned_vec(DEFAULT_IGNORE_NAMES)),
            self.skip_hidden.unwrap_or(true),
        )
    }

    pub fn transfer_args(&self) -> Vec<String> {
        self.transfer_args
            .clone()
            .unwrap_or_else(|| to_owned_vec(DEFAULT_TRANSFER_ARGS))
    }
}

fn to_owned_vec(values: &[&str]) -> Vec<String> {
    values.iter().map(|s| (*s).to_owned()).collect()
}
