// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Abuse patterns for simulation.

use super::generators;
use std::time::Duration;

/// One simulated traffic pattern.
#[derive(Debug, Clone)]
pub struct AbusePattern {
    /// Total number of requests to send
    pub total_requests: usize,
    /// Simulated requests per second
    pub requests_per_second: f64,
    /// Number of distinct origins, used round-robin
    pub unique_ips: usize,
    /// Signed-in subject and its reputation; origins are ignored when set
    pub subject: Option<(String, i64)>,
    /// Endpoints hit round-robin
    pub endpoints: Vec<String>,
    pub method: &'static str,
    pub user_agent: Option<&'static str>,
    /// Status the application answers with when the gate admits
    pub status_when_admitted: u16,
}

impl Default for AbusePattern {
    fn default() -> Self {
        Self {
            total_requests: 100,
            requests_per_second: 10.0,
            unique_ips: 1,
            subject: None,
            endpoints: vec!["main.issue_list".to_string()],
            method: "GET",
            user_agent: Some(generators::BROWSER_UA),
            status_when_admitted: 200,
        }
    }
}

impl AbusePattern {
    /// Password spraying against the login form from one origin.
    pub fn credential_stuffing() -> Self {
        Self {
            total_requests: 200,
            requests_per_second: 10.0,
            endpoints: vec!["main.login".to_string()],
            method: "POST",
            user_agent: Some(generators::SCRIPT_UA),
            status_when_admitted: 401,
            ..Default::default()
        }
    }

    /// Automated crawling across many listing endpoints.
    pub fn scraper_flood() -> Self {
        Self {
            total_requests: 300,
            requests_per_second: 5.0,
            endpoints: generators::listing_endpoints(12),
            user_agent: Some(generators::SCRAPER_UA),
            ..Default::default()
        }
    }

    /// Many origins each filing a handful of reports.
    pub fn distributed_reports() -> Self {
        Self {
            total_requests: 500,
            requests_per_second: 50.0,
            unique_ips: 100,
            endpoints: vec!["main.report_issue".to_string()],
            method: "POST",
            status_when_admitted: 201,
            ..Default::default()
        }
    }

    /// A reputable resident browsing once a minute.
    pub fn steady_citizen() -> Self {
        Self {
            total_requests: 30,
            requests_per_second: 1.0 / 60.0,
            subject: Some(("citizen-7".to_string(), 150)),
            ..Default::default()
        }
    }

    /// Simulated time between consecutive requests.
    pub fn interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.requests_per_second)
    }

    /// Simulated duration of the whole pattern.
    pub fn expected_duration(&self) -> Duration {
        self.interval() * self.total_requests as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expected_duration() {
        let pattern = AbusePattern::credential_stuffing();
        assert_eq!(pattern.interval(), Duration::from_millis(100));
        assert_eq!(pattern.expected_duration(), Duration::from_secs(20));
    }
}
