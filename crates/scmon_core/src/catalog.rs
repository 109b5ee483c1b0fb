use std::collections::BTreeMap;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::cloud::CloudSession;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    pub region_id: String,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interface: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

impl Endpoint {
    pub fn new(region_id: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            region_id: region_id.into(),
            url: url.into(),
            interface: None,
            id: None,
        }
    }
}

/// One service record from the token catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogEntry {
    #[serde(rename = "type")]
    pub service_type: String,
    #[serde(default)]
    pub endpoints: Vec<Endpoint>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl CatalogEntry {
    pub fn new(service_type: impl Into<String>, endpoints: Vec<Endpoint>) -> Self {
        Self {
            service_type: service_type.into(),
            endpoints,
            id: None,
            name: None,
        }
    }

    pub fn has_region(&self, region: &str) -> bool {
        self.endpoints.iter().any(|ep| ep.region_id == region)
    }
}

/// Catalog keyed by service type. A repeated type keeps the last entry seen.
pub type NormalizedCatalog = BTreeMap<String, CatalogEntry>;

pub fn normalize(entries: &[CatalogEntry]) -> NormalizedCatalog {
    let mut catalog = NormalizedCatalog::new();
    for entry in entries {
        catalog.insert(entry.service_type.clone(), entry.clone());
    }
    catalog
}

/// Everything a run needs from the cloud, fetched once up front.
#[derive(Debug, Clone)]
pub struct CatalogSnapshot {
    pub entries: Vec<CatalogEntry>,
    pub regions: Vec<String>,
    pub project_id: String,
}

impl CatalogSnapshot {
    pub fn load(session: &dyn CloudSession) -> Result<Self> {
        let entries = session
            .service_catalog()
            .context("failed to fetch service catalog")?;
        let regions = session.regions().context("failed to list regions")?;
        let project_id = session.current_project_id().to_owned();
        info!(
            target: "scmon.catalog",
            services = entries.len(),
            regions = regions.len(),
            project_id = %project_id,
            "catalog snapshot loaded"
        );
        debug!(target: "scmon.catalog", ?regions);
        Ok(Self {
            entries,
            regions,
            project_id,
        })
    }

    pub fn normalized(&self) -> NormalizedCatalog {
        normalize(&self.entries)
    }
}
