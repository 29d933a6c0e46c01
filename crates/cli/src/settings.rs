//! `tcat.toml` loading.
//!
//! The file is taken from `--config` (or `$TCAT_CONFIG`, which clap folds into
//! the same flag) when given, otherwise from the platform config directory.
//! A missing default file means built-in defaults.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use tcat_import::{CategorizeOptions, CsvImportProfile, TagPolicy};
use tracing::debug;

pub const CONFIG_FILE: &str = "tcat.toml";

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct CategorizeSettings {
    /// Union matched tags with existing ones instead of replacing them.
    pub merge_tags: bool,
    pub extra_tags: BTreeSet<String>,
}

impl Default for CategorizeSettings {
    fn default() -> Self {
        Self {
            merge_tags: true,
            extra_tags: BTreeSet::new(),
        }
    }
}

impl CategorizeSettings {
    pub fn options(&self) -> CategorizeOptions {
        CategorizeOptions {
            policy: if self.merge_tags {
                TagPolicy::Merge
            } else {
                TagPolicy::Replace
            },
            extra_tags: self.extra_tags.clone(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Rule file or directory. `~` is expanded; relative paths are resolved
    /// against the config file's directory.
    pub rules: Option<PathBuf>,
    pub categorize: CategorizeSettings,
    pub import: CsvImportProfile,
    #[serde(skip)]
    source: Option<PathBuf>,
}

fn project_dirs() -> Option<directories::ProjectDirs> {
    directories::ProjectDirs::from("", "", "tcat")
}

pub fn default_config_path() -> Option<PathBuf> {
    project_dirs().map(|dirs| dirs.config_dir().join(CONFIG_FILE))
}

fn expand_home(path: &Path) -> PathBuf {
    let Ok(rest) = path.strip_prefix("~") else {
        return path.to_path_buf();
    };
    match directories::BaseDirs::new() {
        Some(base) => base.home_dir().join(rest),
        None => path.to_path_buf(),
    }
}

impl Settings {
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse TOML")
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        let mut settings =
            Self::parse(&content).with_context(|| format!("Invalid config {}", path.display()))?;
        settings.source = Some(path.to_path_buf());
        Ok(settings)
    }

    /// Loads `explicit` when given (it must exist), else the default config
    /// file if present, else defaults.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::from_file(&expand_home(path));
        }
        match default_config_path() {
            Some(path) if path.is_file() => Self::from_file(&path),
            _ => {
                debug!("No config file found, using defaults");
                Ok(Self::default())
            }
        }
    }

    /// The file these settings came from, if any.
    pub fn source(&self) -> Option<&Path> {
        self.source.as_deref()
    }

    /// Rule location: `override_path` if given, else the configured `rules`,
    /// else `rules/` next to the default config file.
    pub fn rules_path(&self, override_path: Option<&Path>) -> Option<PathBuf> {
        if let Some(path) = override_path {
            return Some(expand_home(path));
        }
        match &self.rules {
            Some(path) => {
                let path = expand_home(path);
                match self.source.as_deref().and_then(Path::parent) {
                    Some(base) if path.is_relative() => Some(base.join(path)),
                    _ => Some(path),
                }
            }
            None => project_dirs().map(|dirs| dirs.config_dir().join("rules")),
        }
    }
}
