use anyhow::{Context, Result};
use tracing::info;

use crate::catalog::CatalogSnapshot;
use crate::cloud::CloudSession;
use crate::config::ServiceConfig;
use crate::report::RunReport;
use crate::sinks::ResultSink;
use crate::validators::run_validations;

/// Load the catalog, run every check and hand the report to each sink in
/// order. Only catalog loading and sink failures propagate.
pub fn run(
    session: &dyn CloudSession,
    config: &ServiceConfig,
    sinks: &mut [Box<dyn ResultSink>],
    run_id: &str,
) -> Result<RunReport> {
    let snapshot = CatalogSnapshot::load(session)?;
    let result = run_validations(session, &snapshot, config);
    let report = RunReport::new(run_id, result);

    for sink in sinks.iter_mut() {
        info!(target: "scmon.sinks", sink = sink.name(), "emitting results");
        sink.emit(&report, config)
            .with_context(|| format!("{} sink failed", sink.name()))?;
    }
    Ok(report)
}
