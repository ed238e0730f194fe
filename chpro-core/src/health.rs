//! Host health check types
//!
//! Results of pinging cluster members, reported by every health cycle of the
//! connection pool.

use crate::config::HostAddress;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Health status of one host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Last ping succeeded
    Healthy,
    /// Last ping failed
    Unhealthy,
}

/// Result of pinging one host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostHealth {
    pub host: HostAddress,
    pub status: HealthStatus,
    /// Ping error, if any
    pub message: Option<String>,
    pub response_time_ms: Option<i64>,
    pub checked_at: DateTime<Utc>,
}

impl HostHealth {
    /// Create a healthy check result.
    pub fn healthy(host: HostAddress) -> Self {
        Self {
            host,
            status: HealthStatus::Healthy,
            message: None,
            response_time_ms: None,
            checked_at: Utc::now(),
        }
    }

    /// Create an unhealthy check result.
    pub fn unhealthy(host: HostAddress, message: impl Into<String>) -> Self {
        Self {
            host,
            status: HealthStatus::Unhealthy,
            message: Some(message.into()),
            response_time_ms: None,
            checked_at: Utc::now(),
        }
    }

    /// Set the response time.
    pub fn with_response_time(mut self, ms: i64) -> Self {
        self.response_time_ms = Some(ms);
        self
    }

    pub fn is_healthy(&self) -> bool {
        self.status == HealthStatus::Healthy
    }
}

/// Outcome of one committed health cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthCycleReport {
    /// One entry per configured host
    pub checks: Vec<HostHealth>,
    /// Hosts that moved from live to dead in this cycle
    pub went_down: Vec<HostAddress>,
    /// Hosts that moved from dead to live in this cycle
    pub came_up: Vec<HostAddress>,
}

impl HealthCycleReport {
    pub fn live_count(&self) -> usize {
        self.checks.iter().filter(|c| c.is_healthy()).count()
    }

    pub fn dead_count(&self) -> usize {
        self.checks.len() - self.live_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constructors() {
        let host = HostAddress::new("ch1", 9000);
        let ok = HostHealth::healthy(host.clone()).with_response_time(3);
        assert!(ok.is_healthy());
        assert_eq!(ok.response_time_ms, Some(3));
        assert!(ok.message.is_none());

        let down = HostHealth::unhealthy(host, "connection refused");
        assert!(!down.is_healthy());
        assert_eq!(down.message.as_deref(), Some("connection refused"));
    }

    #[test]
    fn test_report_counts() {
        let report = HealthCycleReport {
            checks: vec![
                HostHealth::healthy(HostAddress::new("a", 9000)),
                HostHealth::unhealthy(HostAddress::new("b", 9000), "timeout"),
                HostHealth::healthy(HostAddress::new("c", 9000)),
            ],
            went_down: vec![HostAddress::new("b", 9000)],
            came_up: vec![],
        };
        assert_eq!(report.live_count(), 2);
        assert_eq!(report.dead_count(), 1);
    }

    #[test]
    fn test_status_serializes_lowercase() {
        let json = serde_json::to_string(&HealthStatus::Unhealthy).unwrap();
        assert_eq!(json, "\"unhealthy\"");
    }
}
