pub mod catalog;
pub mod cloud;
pub mod config;
pub mod pipeline;
pub mod report;
pub mod sinks;
pub mod validators;

pub use catalog::{normalize, CatalogEntry, CatalogSnapshot, Endpoint, NormalizedCatalog};
pub use cloud::{
    CloudCredentials, CloudError, CloudSession, DiscoveryOutcome, EndpointData, KeystoneSession,
};
pub use config::{ConfigError, ExpectedService, ServiceConfig};
pub use pipeline::run;
pub use report::{
    CheckRecord, ReportStatus, RunReport, Severity, SeverityCounts, ValidationResult,
    GENERAL_SERVICE,
};
pub use sinks::{build_sinks, ConsoleSink, InfluxSettings, MetricsSink, ResultSink, SinkKind};
pub use validators::run_validations;
