use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use scmon_core::sinks::{MetricsError, Point, PointWriter};
use scmon_core::{
    CatalogEntry, CloudError, CloudSession, DiscoveryOutcome, Endpoint, EndpointData,
    ExpectedService, ServiceConfig,
};

/// In-memory cloud. Endpoints without a registered discovery outcome fail
/// to discover.
#[derive(Default)]
pub struct FakeCloud {
    pub catalog: Vec<CatalogEntry>,
    pub regions: Vec<String>,
    pub project_id: String,
    pub discovery: HashMap<String, DiscoveryOutcome>,
    pub catalog_unavailable: bool,
    pub discovered: RefCell<Vec<String>>,
}

impl FakeCloud {
    pub fn new(project_id: &str, regions: &[&str]) -> Self {
        Self {
            project_id: project_id.to_owned(),
            regions: regions.iter().map(|r| r.to_string()).collect(),
            ..Self::default()
        }
    }

    pub fn service(mut self, service_type: &str, endpoints: &[(&str, &str)]) -> Self {
        let endpoints = endpoints
            .iter()
            .map(|(region, url)| Endpoint::new(*region, *url))
            .collect();
        self.catalog.push(CatalogEntry::new(service_type, endpoints));
        self
    }

    pub fn discovers(mut self, url: &str, service_url: &str) -> Self {
        self.discovery.insert(
            url.to_owned(),
            DiscoveryOutcome::Discovered(EndpointData {
                service_url: Some(service_url.to_owned()),
                catalog_url: Some(url.to_owned()),
            }),
        );
        self
    }
}

impl CloudSession for FakeCloud {
    fn service_catalog(&self) -> Result<Vec<CatalogEntry>, CloudError> {
        if self.catalog_unavailable {
            return Err(CloudError::Status {
                url: "https://iam.example/v3/auth/tokens".into(),
                status: 401,
            });
        }
        Ok(self.catalog.clone())
    }

    fn regions(&self) -> Result<Vec<String>, CloudError> {
        Ok(self.regions.clone())
    }

    fn current_project_id(&self) -> &str {
        &self.project_id
    }

    fn discover(&self, _service_type: &str, endpoint: &Endpoint) -> DiscoveryOutcome {
        self.discovered.borrow_mut().push(endpoint.url.clone());
        self.discovery
            .get(&endpoint.url)
            .cloned()
            .unwrap_or_else(|| DiscoveryOutcome::failed("connection refused"))
    }
}

#[derive(Clone, Default)]
pub struct RecordingWriter {
    pub lines: Rc<RefCell<Vec<String>>>,
}

impl PointWriter for RecordingWriter {
    fn write_points(&self, points: &[Point]) -> Result<(), MetricsError> {
        self.lines
            .borrow_mut()
            .extend(points.iter().map(Point::to_line));
        Ok(())
    }
}

pub fn expect(services: &[(&str, &str)]) -> ServiceConfig {
    ServiceConfig {
        services: services
            .iter()
            .map(|(service_type, suffix)| ExpectedService::new(*service_type, *service_type, *suffix))
            .collect(),
    }
}
