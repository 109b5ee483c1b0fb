use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use anyhow::Result;
use reqwest::blocking::Client;
use reqwest::Url;
use tracing::{debug, info, warn};

use super::ResultSink;
use crate::config::ServiceConfig;
use crate::report::{RunReport, GENERAL_SERVICE};

pub const MEASUREMENT: &str = "scmon";

const DEFAULT_PORT: u16 = 8080;
const DEFAULT_DATABASE: &str = "default";

#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    #[error("invalid metrics endpoint {0}")]
    InvalidUrl(String),
    #[error("metrics write failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("metrics store answered with status {0}")]
    Status(u16),
}

/// Connection parameters for an InfluxDB 1.x store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InfluxSettings {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub database: String,
    pub ssl: bool,
}

impl InfluxSettings {
    pub fn from_env() -> Option<Self> {
        Self::from_env_with(|key| std::env::var(key).ok())
    }

    /// `None` unless host, user and password are all set.
    pub fn from_env_with(lookup: impl Fn(&str) -> Option<String>) -> Option<Self> {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.is_empty());
        let host = non_empty("INFLUXDB_HOST")?;
        let user = non_empty("INFLUXDB_USER")?;
        let password = non_empty("INFLUXDB_PASSWORD")?;
        let port = match non_empty("INFLUXDB_PORT") {
            Some(raw) => match raw.parse() {
                Ok(port) => port,
                Err(_) => {
                    warn!(target: "scmon.sinks", port = %raw, "invalid INFLUXDB_PORT");
                    return None;
                }
            },
            None => DEFAULT_PORT,
        };
        let ssl = non_empty("INFLUXDB_SSL")
            .map_or(true, |v| !matches!(v.to_ascii_lowercase().as_str(), "0" | "false" | "no"));
        Some(Self {
            host,
            port,
            user,
            password,
            database: non_empty("INFLUXDB_DATABASE").unwrap_or_else(|| DEFAULT_DATABASE.into()),
            ssl,
        })
    }

    pub fn write_url(&self) -> Result<Url, MetricsError> {
        let scheme = if self.ssl { "https" } else { "http" };
        let base = format!("{scheme}://{}:{}/write", self.host, self.port);
        Url::parse_with_params(&base, &[("db", self.database.as_str())])
            .map_err(|_| MetricsError::InvalidUrl(base))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldValue {
    Int(i64),
    Str(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Point {
    pub measurement: String,
    pub tags: BTreeMap<String, String>,
    pub fields: BTreeMap<String, FieldValue>,
}

impl Point {
    fn new(measurement: &str) -> Self {
        Self {
            measurement: measurement.to_owned(),
            tags: BTreeMap::new(),
            fields: BTreeMap::new(),
        }
    }

    fn tag(mut self, key: &str, value: impl Into<String>) -> Self {
        self.tags.insert(key.to_owned(), value.into());
        self
    }

    fn field(mut self, key: &str, value: FieldValue) -> Self {
        self.fields.insert(key.to_owned(), value);
        self
    }

    /// Line protocol without timestamp; the store stamps on arrival.
    pub fn to_line(&self) -> String {
        let mut line = escape(&self.measurement, &[',', ' ']);
        for (key, value) in &self.tags {
            line.push(',');
            line.push_str(&escape(key, &[',', '=', ' ']));
            line.push('=');
            line.push_str(&escape(value, &[',', '=', ' ']));
        }
        let fields: Vec<String> = self
            .fields
            .iter()
            .map(|(key, value)| {
                let value = match value {
                    FieldValue::Int(n) => format!("{n}i"),
                    FieldValue::Str(s) => format!("\"{}\"", escape(s, &['"', '\\'])),
                };
                format!("{}={value}", escape(key, &[',', '=', ' ']))
            })
            .collect();
        line.push(' ');
        line.push_str(&fields.join(","));
        line
    }
}

fn escape(raw: &str, special: &[char]) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        if special.contains(&c) {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

fn count(n: usize) -> FieldValue {
    FieldValue::Int(i64::try_from(n).unwrap_or(i64::MAX))
}

/// One summary point per configured service plus `general`, followed by one
/// point per recorded check.
pub fn build_points(report: &RunReport, config: &ServiceConfig) -> Vec<Point> {
    let mut seen = BTreeSet::new();
    let services = config
        .services
        .iter()
        .map(|s| s.service_type.as_str())
        .chain(std::iter::once(GENERAL_SERVICE))
        .filter(|s| seen.insert(*s));

    let mut points: Vec<Point> = services
        .map(|service| {
            let counts = report.counts(service);
            Point::new(MEASUREMENT)
                .tag("service_type", service)
                .field("error", count(counts.error))
                .field("warn", count(counts.warn))
                .field("success", count(counts.success))
        })
        .collect();

    for record in &report.checks {
        let status = if record.failed { "failed" } else { "succeeded" };
        let mut point = Point::new(MEASUREMENT)
            .tag("check", record.check.as_str())
            .tag("status", status)
            .field("failed", FieldValue::Int(i64::from(record.failed)))
            .field("succeeded", FieldValue::Int(i64::from(!record.failed)));
        if let Some(service) = &record.service {
            point = point
                .tag("service_type", service.as_str())
                .field("service", FieldValue::Str(service.clone()));
        }
        points.push(point);
    }
    points
}

pub trait PointWriter {
    fn write_points(&self, points: &[Point]) -> Result<(), MetricsError>;
}

pub struct InfluxClient {
    client: Client,
    settings: InfluxSettings,
    url: Url,
}

impl InfluxClient {
    pub fn new(settings: InfluxSettings) -> Result<Self, MetricsError> {
        let url = settings.write_url()?;
        let client = Client::builder().timeout(Duration::from_secs(10)).build()?;
        Ok(Self {
            client,
            settings,
            url,
        })
    }
}

impl PointWriter for InfluxClient {
    fn write_points(&self, points: &[Point]) -> Result<(), MetricsError> {
        let body = points
            .iter()
            .map(Point::to_line)
            .collect::<Vec<_>>()
            .join("\n");
        let response = self
            .client
            .post(self.url.clone())
            .basic_auth(&self.settings.user, Some(&self.settings.password))
            .body(body)
            .send()?;
        if !response.status().is_success() {
            return Err(MetricsError::Status(response.status().as_u16()));
        }
        Ok(())
    }
}

/// Best-effort side channel: write failures are logged, never returned.
pub struct MetricsSink<P: PointWriter> {
    writer: P,
}

impl<P: PointWriter> MetricsSink<P> {
    pub fn new(writer: P) -> Self {
        Self { writer }
    }
}

impl<P: PointWriter> ResultSink for MetricsSink<P> {
    fn name(&self) -> &'static str {
        "metrics"
    }

    fn emit(&mut self, report: &RunReport, config: &ServiceConfig) -> Result<()> {
        let points = build_points(report, config);
        debug!(target: "scmon.sinks", points = points.len(), "writing metrics");
        match self.writer.write_points(&points) {
            Ok(()) => info!(target: "scmon.sinks", points = points.len(), "metrics written"),
            Err(err) => warn!(target: "scmon.sinks", error = %err, "metrics write failed"),
        }
        Ok(())
    }
}
