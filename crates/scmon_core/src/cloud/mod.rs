//! Access to the cloud under test: token catalog, regions and per-endpoint
//! version discovery.

mod credentials;
mod discovery;
mod keystone;

pub use credentials::{CloudCredentials, CLOUDS_YAML_PATHS};
pub use keystone::KeystoneSession;

use crate::catalog::{CatalogEntry, Endpoint};

#[derive(Debug, thiserror::Error)]
pub enum CloudError {
    #[error("missing credential {0}")]
    MissingCredential(&'static str),
    #[error("cloud {0:?} not found in any clouds.yaml")]
    UnknownCloud(String),
    #[error("failed to read {path}: {message}")]
    CloudsFile { path: String, message: String },
    #[error("http request to {url} failed: {source}")]
    Http {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("{url} answered with status {status}")]
    Status { url: String, status: u16 },
    #[error("authentication response missing {0}")]
    MalformedToken(&'static str),
    #[error("malformed {0} response")]
    MalformedResponse(&'static str),
    #[error("no identity endpoint in catalog")]
    NoIdentityEndpoint,
}

/// Metadata learned from an endpoint's version document.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EndpointData {
    pub service_url: Option<String>,
    pub catalog_url: Option<String>,
}

/// Result of version discovery against a single endpoint. Failure is an
/// expected outcome, so it is a value rather than an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiscoveryOutcome {
    Discovered(EndpointData),
    Failed { reason: String },
}

impl DiscoveryOutcome {
    pub fn failed(reason: impl Into<String>) -> Self {
        DiscoveryOutcome::Failed {
            reason: reason.into(),
        }
    }

    /// Discovery counts as supported only if it produced a service URL.
    pub fn supports_discovery(&self) -> bool {
        matches!(
            self,
            DiscoveryOutcome::Discovered(EndpointData {
                service_url: Some(_),
                ..
            })
        )
    }

    /// URL to check against the expected suffix: discovered service URL,
    /// then discovered catalog URL, then the static endpoint URL.
    pub fn resolved_url<'a>(&'a self, endpoint: &'a Endpoint) -> &'a str {
        match self {
            DiscoveryOutcome::Discovered(data) => data
                .service_url
                .as_deref()
                .or(data.catalog_url.as_deref())
                .unwrap_or(&endpoint.url),
            DiscoveryOutcome::Failed { .. } => &endpoint.url,
        }
    }
}

pub trait CloudSession {
    fn service_catalog(&self) -> Result<Vec<CatalogEntry>, CloudError>;

    fn regions(&self) -> Result<Vec<String>, CloudError>;

    fn current_project_id(&self) -> &str;

    fn discover(&self, service_type: &str, endpoint: &Endpoint) -> DiscoveryOutcome;
}
