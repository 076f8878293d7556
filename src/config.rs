use std::fs;
use std::path::PathBuf;

use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};

use crate::domain::CyclePolicy;
use crate::error::FactError;
use crate::stats::{Dimension, StatsQuery};

pub const CONFIG_FILE: &str = "c2m2-facts.json";
pub const DEFAULT_OUTPUT: &str = "derived";

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub schema_version: Option<u32>,
    #[serde(default)]
    pub sources: Vec<SourceEntry>,
    #[serde(default)]
    pub output: Option<String>,
    #[serde(default)]
    pub cycle_policy: Option<CyclePolicy>,
    #[serde(default)]
    pub parallel: Option<bool>,
    #[serde(default)]
    pub stats: Vec<Vec<Dimension>>,
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(untagged)]
pub enum SourceEntry {
    Shorthand(String),
    Detailed(SourceEntryObject),
}

#[derive(Debug, Deserialize, Serialize)]
pub struct SourceEntryObject {
    pub path: String,
    #[serde(default)]
    pub label: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Source {
    pub path: Utf8PathBuf,
    pub label: String,
}

#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub schema_version: u32,
    pub sources: Vec<Source>,
    pub output: Utf8PathBuf,
    pub cycle_policy: CyclePolicy,
    pub parallel: bool,
    pub stats: Vec<StatsQuery>,
}

impl Default for ResolvedConfig {
    fn default() -> Self {
        Self {
            schema_version: 1,
            sources: Vec::new(),
            output: Utf8PathBuf::from(DEFAULT_OUTPUT),
            cycle_policy: CyclePolicy::Reject,
            parallel: true,
            stats: Vec::new(),
        }
    }
}

impl ResolvedConfig {
    pub fn source_paths(&self) -> Vec<Utf8PathBuf> {
        self.sources.iter().map(|source| source.path.clone()).collect()
    }
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// Reads the config at `path`, or `c2m2-facts.json` in the working directory.
    /// Only an explicitly named file is required to exist.
    pub fn resolve(path: Option<&str>) -> Result<ResolvedConfig, FactError> {
        let config_path = match path {
            Some(path) => PathBuf::from(path),
            None => PathBuf::from(CONFIG_FILE),
        };

        if path.is_none() && !config_path.exists() {
            return Err(FactError::MissingConfig);
        }

        let content = fs::read_to_string(&config_path)
            .map_err(|_| FactError::ConfigRead(config_path.clone()))?;
        let config: Config = serde_json::from_str(&content)
            .map_err(|err| FactError::ConfigParse(err.to_string()))?;

        Self::resolve_config(config)
    }

    pub fn resolve_or_default(path: Option<&str>) -> Result<ResolvedConfig, FactError> {
        match Self::resolve(path) {
            Err(FactError::MissingConfig) => Ok(ResolvedConfig::default()),
            other => other,
        }
    }

    pub fn resolve_config(config: Config) -> Result<ResolvedConfig, FactError> {
        let schema_version = config.schema_version.unwrap_or(1);
        if schema_version != 1 {
            return Err(FactError::ConfigParse(format!(
                "unsupported schema_version {schema_version}"
            )));
        }

        let sources = config
            .sources
            .into_iter()
            .map(|entry| {
                let (path, label) = match entry {
                    SourceEntry::Shorthand(path) => (path, None),
                    SourceEntry::Detailed(obj) => (obj.path, obj.label),
                };
                if path.trim().is_empty() {
                    return Err(FactError::ConfigParse("empty source path".to_string()));
                }
                let path = Utf8PathBuf::from(path);
                let label = label.unwrap_or_else(|| default_label(&path));
                Ok(Source { path, label })
            })
            .collect::<Result<Vec<_>, FactError>>()?;

        let stats = config
            .stats
            .into_iter()
            .map(|dimensions| {
                if dimensions.is_empty() {
                    return Err(FactError::ConfigParse(
                        "stats entries need at least one dimension".to_string(),
                    ));
                }
                Ok(StatsQuery::new(dimensions, false))
            })
            .collect::<Result<Vec<_>, FactError>>()?;

        Ok(ResolvedConfig {
            schema_version,
            sources,
            output: config
                .output
                .map(Utf8PathBuf::from)
                .unwrap_or_else(|| Utf8PathBuf::from(DEFAULT_OUTPUT)),
            cycle_policy: config.cycle_policy.unwrap_or_default(),
            parallel: config.parallel.unwrap_or(true),
            stats,
        })
    }
}

fn default_label(path: &Utf8PathBuf) -> String {
    path.file_stem()
        .map(str::to_string)
        .unwrap_or_else(|| path.to_string())
}
