use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::debug;

use super::CloudError;

/// `clouds.yaml` locations, searched in order. `~` expands to `$HOME`.
pub const CLOUDS_YAML_PATHS: [&str; 3] = [
    "clouds.yaml",
    "~/.config/openstack/clouds.yaml",
    "/etc/openstack/clouds.yaml",
];

const DEFAULT_DOMAIN: &str = "Default";

/// Password credentials for Keystone v3.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CloudCredentials {
    pub auth_url: String,
    pub username: String,
    pub password: String,
    #[serde(default)]
    pub project_id: Option<String>,
    #[serde(default)]
    pub project_name: Option<String>,
    #[serde(default = "default_domain")]
    pub user_domain_name: String,
    #[serde(default = "default_domain")]
    pub project_domain_name: String,
    #[serde(default)]
    pub region_name: Option<String>,
}

fn default_domain() -> String {
    DEFAULT_DOMAIN.to_owned()
}

#[derive(Debug, Deserialize)]
struct CloudsFile {
    #[serde(default)]
    clouds: BTreeMap<String, CloudEntry>,
}

#[derive(Debug, Deserialize)]
struct CloudEntry {
    auth: CloudCredentials,
    #[serde(default)]
    region_name: Option<String>,
}

impl CloudCredentials {
    /// Picks a named cloud from `clouds.yaml` when `cloud` or `OS_CLOUD` is
    /// set, otherwise reads `OS_*` variables.
    pub fn resolve(cloud: Option<&str>) -> Result<Self, CloudError> {
        let lookup = |key: &str| std::env::var(key).ok().filter(|v| !v.is_empty());
        let name = cloud.map(str::to_owned).or_else(|| lookup("OS_CLOUD"));
        match name {
            Some(name) => {
                let mut paths = Vec::new();
                if let Some(explicit) = lookup("OS_CLIENT_CONFIG_FILE") {
                    paths.push(PathBuf::from(explicit));
                }
                paths.extend(candidate_paths(lookup("HOME").as_deref()));
                Self::from_clouds_yaml(&name, &paths)
            }
            None => Self::from_env_with(lookup),
        }
    }

    pub fn from_env_with(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, CloudError> {
        let require = |key: &'static str| lookup(key).ok_or(CloudError::MissingCredential(key));
        let creds = Self {
            auth_url: require("OS_AUTH_URL")?,
            username: require("OS_USERNAME")?,
            password: require("OS_PASSWORD")?,
            project_id: lookup("OS_PROJECT_ID"),
            project_name: lookup("OS_PROJECT_NAME"),
            user_domain_name: lookup("OS_USER_DOMAIN_NAME").unwrap_or_else(default_domain),
            project_domain_name: lookup("OS_PROJECT_DOMAIN_NAME").unwrap_or_else(default_domain),
            region_name: lookup("OS_REGION_NAME"),
        };
        creds.ensure_project()?;
        Ok(creds)
    }

    pub fn from_clouds_yaml(name: &str, paths: &[PathBuf]) -> Result<Self, CloudError> {
        for path in paths.iter().filter(|p| p.is_file()) {
            let mut file = read_clouds_file(path)?;
            if let Some(entry) = file.clouds.remove(name) {
                debug!(target: "scmon.keystone", cloud = name, path = %path.display(), "cloud found");
                let mut creds = entry.auth;
                if creds.region_name.is_none() {
                    creds.region_name = entry.region_name;
                }
                creds.ensure_project()?;
                return Ok(creds);
            }
        }
        Err(CloudError::UnknownCloud(name.to_owned()))
    }

    fn ensure_project(&self) -> Result<(), CloudError> {
        if self.project_id.is_none() && self.project_name.is_none() {
            return Err(CloudError::MissingCredential("OS_PROJECT_ID or OS_PROJECT_NAME"));
        }
        Ok(())
    }
}

fn read_clouds_file(path: &Path) -> Result<CloudsFile, CloudError> {
    let to_err = |message: String| CloudError::CloudsFile {
        path: path.display().to_string(),
        message,
    };
    let text = fs::read_to_string(path).map_err(|e| to_err(e.to_string()))?;
    serde_yaml::from_str(&text).map_err(|e| to_err(e.to_string()))
}

fn candidate_paths(home: Option<&str>) -> Vec<PathBuf> {
    CLOUDS_YAML_PATHS
        .iter()
        .filter_map(|p| match p.strip_prefix("~/") {
            Some(rest) => home.map(|h| Path::new(h).join(rest)),
            None => Some(PathBuf::from(p)),
        })
        .collect()
}
