//! CLI configuration management.

use anyhow::{Context, Result, bail};
use monobuild_runner::RunnerConfig;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

const CONFIG_FILE: &str = "monobuild.yaml";

/// Contents of `monobuild.yaml`.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct BuildConfig {
    /// Unit graph file, relative to the config file.
    #[serde(default = "default_graph")]
    pub graph: PathBuf,
    /// Monorepo root, relative to the config file.
    #[serde(default = "default_source_root")]
    pub source_root: PathBuf,
    #[serde(default)]
    pub max_concurrency: Option<usize>,
    #[serde(flatten)]
    pub runner: RunnerConfig,
}

fn default_graph() -> PathBuf {
    PathBuf::from("graph.yaml")
}

fn default_source_root() -> PathBuf {
    PathBuf::from(".")
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            graph: default_graph(),
            source_root: default_source_root(),
            max_concurrency: None,
            runner: RunnerConfig::default(),
        }
    }
}

impl BuildConfig {
    /// Load from an explicit path, or from `./monobuild.yaml`, or from the
    /// user config directory, falling back to defaults.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            if !path.exists() {
                bail!("Config file not found: {}", path.display());
            }
            return Self::from_path(path);
        }

        let local = Path::new(CONFIG_FILE);
        if local.exists() {
            return Self::from_path(local);
        }

        if let Some(user) = Self::user_config_path().filter(|p| p.exists()) {
            return Self::from_path(&user);
        }

        Ok(Self::default())
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let mut config = Self::from_yaml_str(&content)
            .with_context(|| format!("Invalid config file {}", path.display()))?;
        if let Some(base) = path.parent() {
            config.resolve_relative_to(base);
        }
        Ok(config)
    }

    pub fn from_yaml_str(content: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(content)?;
        config.runner.validate()?;
        if config.max_concurrency == Some(0) {
            bail!("max_concurrency must be at least 1");
        }
        Ok(config)
    }

    /// User-level config file location.
    pub fn user_config_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("dev", "monobuild", "monobuild")
            .map(|dirs| dirs.config_dir().join("config.yaml"))
    }

    fn resolve_relative_to(&mut self, base: &Path) {
        if self.graph.is_relative() {
            self.graph = base.join(&self.graph);
        }
        if self.source_root.is_relative() {
            self.source_root = base.join(&self.source_root);
        }
    }
}
