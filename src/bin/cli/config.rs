use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use strata::admin::AuditLevel;
use thiserror::Error;

#[derive(Debug, Clone, Serialize)]
pub struct Profile {
    pub name: String,
    pub store: Option<PathBuf>,
    pub schema: Option<PathBuf>,
    pub max_findings: Option<usize>,
    pub level: Option<AuditLevel>,
    pub jobs: Option<usize>,
}

#[derive(Debug, Default)]
pub struct CliConfig {
    path: Option<PathBuf>,
    data: RawConfig,
    profiles: BTreeMap<String, Profile>,
}

impl CliConfig {
    pub fn load(explicit: Option<PathBuf>) -> Result<Self, ConfigError> {
        let path = explicit.or_else(default_config_path);
        let data = match path.as_ref() {
            Some(config_path) if config_path.exists() => read_file(config_path)?,
            _ => RawConfig::default(),
        };
        let profiles = parse_profiles(&data)?;
        Ok(Self {
            path,
            data,
            profiles,
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn default_store(&self) -> Option<&PathBuf> {
        self.data.store.default_path.as_ref()
    }

    pub fn schema(&self) -> Option<&PathBuf> {
        self.data.schema.as_ref()
    }

    pub fn log_filter(&self) -> Option<&str> {
        self.data.log_filter.as_deref()
    }

    pub fn default_profile_name(&self) -> Option<&str> {
        self.data
            .default_profile
            .as_deref()
            .filter(|name| self.profiles.contains_key(*name))
    }

    pub fn profile(&self, name: &str) -> Result<&Profile, ConfigError> {
        self.profiles
            .get(name)
            .ok_or_else(|| ConfigError::ProfileNotFound {
                name: name.to_string(),
            })
    }

    pub fn profiles(&self) -> impl Iterator<Item = &Profile> {
        self.profiles.values()
    }

    pub fn set_default_profile(&mut self, name: Option<&str>) -> Result<(), ConfigError> {
        if let Some(name) = name {
            if !self.profiles.contains_key(name) {
                return Err(ConfigError::ProfileNotFound {
                    name: name.to_string(),
                });
            }
            self.data.default_profile = Some(name.to_string());
        } else {
            self.data.default_profile = None;
        }
        Ok(())
    }

    pub fn upsert_profile(&mut self, name: &str, update: ProfileUpdate) -> Result<(), ConfigError> {
        let entry = self.data.profiles.entry(name.to_string()).or_default();
        if let Some(store) = update.store {
            entry.store = Some(store);
        }
        if let Some(schema) = update.schema {
            entry.schema = Some(schema);
        }
        if let Some(max_findings) = update.max_findings {
            entry.max_findings = Some(max_findings);
        }
        if let Some(level) = update.level {
            entry.level = Some(level.to_string());
        }
        if let Some(jobs) = update.jobs {
            entry.jobs = Some(jobs);
        }
        self.profiles = parse_profiles(&self.data)?;
        Ok(())
    }

    pub fn delete_profile(&mut self, name: &str) -> Result<(), ConfigError> {
        if self.data.profiles.remove(name).is_none() {
            return Err(ConfigError::ProfileNotFound {
                name: name.to_string(),
            });
        }
        if self.data.default_profile.as_deref() == Some(name) {
            self.data.default_profile = None;
        }
        self.profiles = parse_profiles(&self.data)?;
        Ok(())
    }

    pub fn persist(&self) -> Result<PathBuf, ConfigError> {
        let target = match &self.path {
            Some(path) => path.clone(),
            None => default_config_path().ok_or(ConfigError::NoConfigPath)?,
        };
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).map_err(|source| ConfigError::CreateDir {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let serialized = toml::to_string_pretty(&self.data)
            .map_err(|source| ConfigError::Serialize { source })?;
        fs::write(&target, serialized).map_err(|source| ConfigError::Write {
            path: target.clone(),
            source,
        })?;
        Ok(target)
    }
}

fn read_file(path: &Path) -> Result<RawConfig, ConfigError> {
    let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str(&contents).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

fn parse_profiles(data: &RawConfig) -> Result<BTreeMap<String, Profile>, ConfigError> {
    let mut profiles = BTreeMap::new();
    for (name, raw) in &data.profiles {
        profiles.insert(name.clone(), convert_profile(name, raw)?);
    }
    if let Some(default_name) = data.default_profile.as_ref() {
        if !profiles.contains_key(default_name) {
            return Err(ConfigError::ProfileNotFound {
                name: default_name.clone(),
            });
        }
    }
    Ok(profiles)
}

fn convert_profile(name: &str, raw: &RawProfile) -> Result<Profile, ConfigError> {
    let level = match raw.level.as_deref() {
        Some(value) => Some(AuditLevel::from_str(value).map_err(|_| ConfigError::InvalidLevel {
            profile: name.to_string(),
            value: value.to_string(),
        })?),
        None => None,
    };
    Ok(Profile {
        name: name.to_string(),
        store: raw.store.clone(),
        schema: raw.schema.clone(),
        max_findings: raw.max_findings,
        level,
        jobs: raw.jobs,
    })
}

#[derive(Debug, Default, Deserialize, Serialize)]
struct RawConfig {
    #[serde(default)]
    schema: Option<PathBuf>,
    #[serde(default)]
    log_filter: Option<String>,
    #[serde(default)]
    default_profile: Option<String>,
    #[serde(default)]
    store: StoreSection,
    #[serde(default)]
    profiles: BTreeMap<String, RawProfile>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
struct StoreSection {
    #[serde(rename = "default")]
    default_path: Option<PathBuf>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
struct RawProfile {
    store: Option<PathBuf>,
    schema: Option<PathBuf>,
    max_findings: Option<usize>,
    level: Option<String>,
    jobs: Option<usize>,
}

#[derive(Debug, Default)]
pub struct ProfileUpdate {
    pub store: Option<PathBuf>,
    pub schema: Option<PathBuf>,
    pub max_findings: Option<usize>,
    pub level: Option<AuditLevel>,
    pub jobs: Option<usize>,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read CLI config {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse CLI config {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("failed to serialize CLI config: {source}")]
    Serialize { source: toml::ser::Error },
    #[error("failed to write CLI config {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to create config directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("profile '{name}' not found")]
    ProfileNotFound { name: String },
    #[error("profile '{profile}' audit level '{value}' is invalid")]
    InvalidLevel { profile: String, value: String },
    #[error("no config directory found; pass --config or set STRATA_CONFIG")]
    NoConfigPath,
}

pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|base| base.join("strata").join("cli.toml"))
}
