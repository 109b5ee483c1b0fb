use std::io::{self, Write};

use anyhow::{Context, Result};

use super::ResultSink;
use crate::config::ServiceConfig;
use crate::report::RunReport;

/// Prints the findings map as pretty JSON with sorted keys.
pub struct ConsoleSink<W: Write> {
    out: W,
}

impl ConsoleSink<io::Stdout> {
    pub fn stdout() -> Self {
        Self { out: io::stdout() }
    }
}

impl<W: Write> ConsoleSink<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write> ResultSink for ConsoleSink<W> {
    fn name(&self) -> &'static str {
        "console"
    }

    fn emit(&mut self, report: &RunReport, _config: &ServiceConfig) -> Result<()> {
        let text = serde_json::to_string_pretty(&report.results)?;
        writeln!(self.out, "{text}").context("failed to write results")?;
        self.out.flush()?;
        Ok(())
    }
}
