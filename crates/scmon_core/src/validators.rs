use std::collections::HashSet;

use tracing::{info, warn};

use crate::catalog::{CatalogEntry, CatalogSnapshot, NormalizedCatalog};
use crate::cloud::{CloudSession, DiscoveryOutcome};
use crate::config::ServiceConfig;
use crate::report::{Severity, ValidationResult, GENERAL_SERVICE};

pub const CHECK_CATALOG: &str = "catalog";
pub const CHECK_TOKEN_CATALOG: &str = "token_catalog";
pub const CHECK_VERSION_DISCOVERY: &str = "service_version_discovery";

/// Runs every check against one snapshot. Findings never abort the run.
pub fn run_validations(
    session: &dyn CloudSession,
    snapshot: &CatalogSnapshot,
    config: &ServiceConfig,
) -> ValidationResult {
    let mut result = ValidationResult::new();
    let catalog = snapshot.normalized();

    validate_catalog_unique(&snapshot.entries, &mut result);
    validate_known_in_regions(&catalog, config, &snapshot.regions, &mut result);
    validate_version_discovery(session, &catalog, config, &snapshot.project_id, &mut result);

    info!(
        target: "scmon.validate",
        services = config.services.len(),
        errors = result.total(Severity::Error),
        warnings = result.total(Severity::Warn),
        "validation finished"
    );
    result
}

/// Flags every repeated service type against `general`.
pub fn validate_catalog_unique(entries: &[CatalogEntry], result: &mut ValidationResult) {
    let mut seen = HashSet::new();
    let mut any_repeat = false;
    for entry in entries {
        let repeated = !seen.insert(entry.service_type.as_str());
        if repeated {
            any_repeat = true;
            result.error(
                CHECK_CATALOG,
                GENERAL_SERVICE,
                format!("Service {} present multiple times", entry.service_type),
            );
        }
        result.record_check(
            Some(entry.service_type.as_str()),
            "single_in_catalog",
            repeated,
        );
    }
    result.record_check(None, "catalog_valid", any_repeat);
}

/// Checks that each configured service is in the catalog and registered in
/// every region. Findings are keyed by `service_type` (e.g. `volumev2`), never
/// by the configured display name (e.g. "Block Storage"), so every check of a
/// service lands under the same key as its metric tag.
pub fn validate_known_in_regions(
    catalog: &NormalizedCatalog,
    config: &ServiceConfig,
    regions: &[String],
    result: &mut ValidationResult,
) {
    for service in &config.services {
        let service_type = service.service_type.as_str();
        let Some(entry) = catalog.get(service_type) else {
            result.error(
                CHECK_TOKEN_CATALOG,
                service_type,
                format!("Service {service_type} is not known in catalog"),
            );
            result.record_check(Some(service_type), "service_in_catalog", true);
            result.record_check(Some(service_type), "endpoint_present_in_region", true);
            continue;
        };
        result.record_check(Some(service_type), "service_in_catalog", false);

        let mut missing = false;
        for region in regions.iter().filter(|r| !entry.has_region(r)) {
            missing = true;
            result.error(
                CHECK_TOKEN_CATALOG,
                service_type,
                format!("Service {service_type} is not registered in region {region}"),
            );
        }
        if !missing {
            result.success(
                CHECK_TOKEN_CATALOG,
                service_type,
                format!("Service {service_type} is registered in all regions"),
            );
        }
        result.record_check(Some(service_type), "endpoint_present_in_region", missing);
    }
}

/// Runs version discovery on every endpoint of every configured service
/// present in the catalog. Services missing from the catalog are skipped; the
/// region check already reported them.
pub fn validate_version_discovery(
    session: &dyn CloudSession,
    catalog: &NormalizedCatalog,
    config: &ServiceConfig,
    project_id: &str,
    result: &mut ValidationResult,
) {
    for service in &config.services {
        let service_type = service.service_type.as_str();
        let Some(entry) = catalog.get(service_type) else {
            continue;
        };
        let expected_suffix = service.resolved_suffix(project_id);

        for endpoint in &entry.endpoints {
            let outcome = session.discover(service_type, endpoint);
            let discovered = outcome.supports_discovery();
            if !discovered {
                if let DiscoveryOutcome::Failed { reason } = &outcome {
                    warn!(
                        target: "scmon.validate",
                        service_type,
                        url = %endpoint.url,
                        %reason,
                        "version discovery failed"
                    );
                }
                result.warn(
                    CHECK_VERSION_DISCOVERY,
                    service_type,
                    format!("Service {service_type} does not support version discovery properly"),
                );
            }
            result.record_check(Some(service_type), "version_discovery", !discovered);

            let url = outcome.resolved_url(endpoint);
            let suffix_ok = url.trim_end_matches('/').ends_with(&expected_suffix);
            if !suffix_ok {
                result.warn(
                    CHECK_VERSION_DISCOVERY,
                    service_type,
                    format!(
                        "Service {service_type} exposes wrong suffix: {url} does not end with {expected_suffix}"
                    ),
                );
            }
            result.record_check(Some(service_type), "expected_suffix", !suffix_ok);

            if discovered && suffix_ok {
                result.success(
                    CHECK_VERSION_DISCOVERY,
                    service_type,
                    format!(
                        "Service {service_type} supports version discovery in region {}",
                        endpoint.region_id
                    ),
                );
            }
        }
    }
}
