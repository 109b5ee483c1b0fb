//! Destinations for a finished run.

mod console;
mod metrics;

pub use console::ConsoleSink;
pub use metrics::{
    build_points, FieldValue, InfluxClient, InfluxSettings, MetricsError, MetricsSink, Point,
    PointWriter, MEASUREMENT,
};

use anyhow::Result;
use tracing::{info, warn};

use crate::config::ServiceConfig;
use crate::report::RunReport;

pub trait ResultSink {
    fn name(&self) -> &'static str;

    fn emit(&mut self, report: &RunReport, config: &ServiceConfig) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkKind {
    Console,
    Metrics,
    None,
}

/// Builds the requested sinks. The metrics sink is only created when
/// connection settings are present; without them nothing touches the network.
pub fn build_sinks(
    kinds: &[SinkKind],
    influx: Option<InfluxSettings>,
) -> Vec<Box<dyn ResultSink>> {
    let mut sinks: Vec<Box<dyn ResultSink>> = Vec::new();
    let mut influx = influx;
    for kind in kinds {
        match kind {
            SinkKind::Console => sinks.push(Box::new(ConsoleSink::stdout())),
            SinkKind::Metrics => match influx.take() {
                Some(settings) => match InfluxClient::new(settings) {
                    Ok(client) => sinks.push(Box::new(MetricsSink::new(client))),
                    Err(err) => {
                        warn!(target: "scmon.sinks", error = %err, "metrics sink disabled")
                    }
                },
                None => info!(target: "scmon.sinks", "metrics settings absent, skipping"),
            },
            SinkKind::None => {}
        }
    }
    sinks
}
