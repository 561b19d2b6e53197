use crate::nimbus_api::client::Scope;
use crate::nimbus_api::resources::{ListOptions, PaginatedResponse, StatusResponse};
use crate::nimbus_api::types::NimbusError;
use crate::nimbus_api::url::{validate_identifier, Service};
use chrono::{DateTime, Utc};
use reqwest::Method;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// One measurement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataPoint {
    pub value: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub tags: HashMap<String, String>,
}

impl DataPoint {
    pub fn new(value: f64) -> Self {
        Self {
            value,
            timestamp: None,
            tags: HashMap::new(),
        }
    }

    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    pub fn tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }
}

#[derive(Serialize)]
struct RecordRequest<'a> {
    points: &'a [DataPoint],
}

/// Aggregation applied server-side when querying a metric
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Aggregation {
    Avg,
    Sum,
    Min,
    Max,
    Count,
}

impl Aggregation {
    fn as_str(self) -> &'static str {
        match self {
            Aggregation::Avg => "avg",
            Aggregation::Sum => "sum",
            Aggregation::Min => "min",
            Aggregation::Max => "max",
            Aggregation::Count => "count",
        }
    }
}

/// Time range and bucketing for a metric query
#[derive(Debug, Clone)]
pub struct MetricQuery {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
    pub aggregation: Option<Aggregation>,
    /// Bucket width in seconds
    pub interval_secs: Option<u64>,
}

impl MetricQuery {
    pub fn between(from: DateTime<Utc>, to: DateTime<Utc>) -> Self {
        Self {
            from,
            to,
            aggregation: None,
            interval_secs: None,
        }
    }

    pub fn aggregate(mut self, aggregation: Aggregation, interval_secs: u64) -> Self {
        self.aggregation = Some(aggregation);
        self.interval_secs = Some(interval_secs);
        self
    }

    fn validate(&self) -> Result<(), NimbusError> {
        if self.from > self.to {
            return Err(NimbusError::Validation(format!(
                "query range starts after it ends ({} > {})",
                self.from.to_rfc3339(),
                self.to.to_rfc3339()
            )));
        }
        if self.interval_secs == Some(0) {
            return Err(NimbusError::Validation(
                "aggregation interval must be at least one second".to_string(),
            ));
        }
        Ok(())
    }
}

/// Query result for one metric
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Series {
    pub metric: String,
    #[serde(default)]
    pub points: Vec<DataPoint>,
}

/// Metric known to the realm
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricInfo {
    pub name: String,
    #[serde(default)]
    pub unit: Option<String>,
    #[serde(default)]
    pub last_recorded: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct Metrics<'a> {
    scope: Scope<'a>,
}

impl<'a> Metrics<'a> {
    pub(crate) fn new(scope: Scope<'a>) -> Self {
        Self { scope }
    }

    pub async fn record(&self, metric: &str, points: &[DataPoint]) -> Result<StatusResponse, NimbusError> {
        validate_identifier("metric", metric)?;
        if points.is_empty() {
            return Err(NimbusError::Validation(
                "at least one data point is required".to_string(),
            ));
        }
        if let Some(point) = points.iter().find(|p| !p.value.is_finite()) {
            return Err(NimbusError::Validation(format!(
                "data point values must be finite, got {}",
                point.value
            )));
        }

        let url = self
            .scope
            .realm_url(Service::Metrics)
            .await?
            .segment(metric)
            .build()?;
        tracing::debug!("Recording {} points for {}", points.len(), metric);
        let status: Option<StatusResponse> = self
            .scope
            .send_json(Method::POST, url, &RecordRequest { points })
            .await?;
        Ok(status.unwrap_or(StatusResponse {
            success: true,
            message: None,
        }))
    }

    pub async fn query(&self, metric: &str, query: &MetricQuery) -> Result<Series, NimbusError> {
        validate_identifier("metric", metric)?;
        query.validate()?;

        let url = self
            .scope
            .realm_url(Service::Metrics)
            .await?
            .segment(metric)
            .query("from", query.from.to_rfc3339())
            .query("to", query.to.to_rfc3339())
            .query_opt("aggregation", query.aggregation.map(Aggregation::as_str))
            .query_opt("interval", query.interval_secs)
            .build()?;
        self.scope.send(Method::GET, url).await
    }

    pub async fn list(&self, options: &ListOptions) -> Result<PaginatedResponse<MetricInfo>, NimbusError> {
        let url = self.scope.realm_url(Service::Metrics).await?;
        let url = options.apply(url).build()?;
        self.scope.send(Method::GET, url).await
    }
}
