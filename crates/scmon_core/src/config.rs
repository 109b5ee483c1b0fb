use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

const PROJECT_ID_TOKEN: &str = "{project_id}";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("unsupported config format for {0} (expected .yaml, .yml or .toml)")]
    UnsupportedFormat(String),
    #[error("services[{index}] must map exactly one display name, found {found}")]
    MalformedEntry { index: usize, found: usize },
}

/// One service the cloud is expected to advertise.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpectedService {
    pub name: String,
    pub service_type: String,
    pub expected_suffix: String,
}

impl ExpectedService {
    pub fn new(
        name: impl Into<String>,
        service_type: impl Into<String>,
        expected_suffix: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            service_type: service_type.into(),
            expected_suffix: expected_suffix.into(),
        }
    }

    /// Suffix with `{project_id}` filled in and trailing slashes removed.
    pub fn resolved_suffix(&self, project_id: &str) -> String {
        self.expected_suffix
            .replace(PROJECT_ID_TOKEN, project_id)
            .trim_end_matches('/')
            .to_owned()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
struct ServiceSpec {
    service_type: String,
    expected_suffix: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct RawServiceConfig {
    #[serde(default)]
    services: Vec<BTreeMap<String, ServiceSpec>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServiceConfig {
    pub services: Vec<ExpectedService>,
}

impl ServiceConfig {
    pub fn from_path(path: &Path) -> Result<Self> {
        let data = fs::read_to_string(path)
            .with_context(|| format!("failed to read service config {}", path.display()))?;
        let ext = path
            .extension()
            .and_then(|v| v.to_str())
            .unwrap_or_default();
        let raw: RawServiceConfig = match ext {
            "yml" | "yaml" => serde_yaml::from_str(&data)
                .with_context(|| format!("invalid YAML in {}", path.display()))?,
            "toml" => toml::from_str(&data)
                .with_context(|| format!("invalid TOML in {}", path.display()))?,
            _ => return Err(ConfigError::UnsupportedFormat(path.display().to_string()).into()),
        };
        Ok(Self::from_raw(raw)?)
    }

    pub fn from_yaml_str(data: &str) -> Result<Self> {
        let raw: RawServiceConfig = serde_yaml::from_str(data)?;
        Ok(Self::from_raw(raw)?)
    }

    fn from_raw(raw: RawServiceConfig) -> Result<Self, ConfigError> {
        let mut services = Vec::with_capacity(raw.services.len());
        for (index, entry) in raw.services.into_iter().enumerate() {
            if entry.len() != 1 {
                return Err(ConfigError::MalformedEntry {
                    index,
                    found: entry.len(),
                });
            }
            for (name, spec) in entry {
                services.push(ExpectedService {
                    name,
                    service_type: spec.service_type,
                    expected_suffix: spec.expected_suffix,
                });
            }
        }
        Ok(Self { services })
    }

    /// Baseline expectation every OpenStack cloud satisfies.
    pub fn default_known() -> Self {
        Self {
            services: vec![ExpectedService::new("identity", "identity", "/v3")],
        }
    }

    pub fn to_yaml(&self) -> Result<String> {
        let raw = RawServiceConfig {
            services: self
                .services
                .iter()
                .map(|s| {
                    BTreeMap::from([(
                        s.name.clone(),
                        ServiceSpec {
                            service_type: s.service_type.clone(),
                            expected_suffix: s.expected_suffix.clone(),
                        },
                    )])
                })
                .collect(),
        };
        Ok(serde_yaml::to_string(&raw)?)
    }
}
