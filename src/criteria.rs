// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Typed award criteria for badges and challenges.
//!
//! Criteria are data, interpreted by a pure evaluator. Stored legacy
//! criteria of the form `"issues_count >= 5"` are parsed into the same
//! typed form; anything else is rejected rather than executed.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Per-user statistic a criterion can test.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    IssuesCount,
    TotalUpvotes,
    ResolvedIssues,
}

impl Metric {
    pub fn name(self) -> &'static str {
        match self {
            Metric::IssuesCount => "issues_count",
            Metric::TotalUpvotes => "total_upvotes",
            Metric::ResolvedIssues => "resolved_issues",
        }
    }
}

impl FromStr for Metric {
    type Err = CriterionParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "issues_count" => Ok(Metric::IssuesCount),
            "total_upvotes" => Ok(Metric::TotalUpvotes),
            "resolved_issues" => Ok(Metric::ResolvedIssues),
            other => Err(CriterionParseError::UnknownMetric(other.to_string())),
        }
    }
}

/// Snapshot of the statistics criteria are evaluated against.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserStats {
    pub issues_count: u64,
    pub total_upvotes: u64,
    pub resolved_issues: u64,
}

impl UserStats {
    pub fn get(&self, metric: Metric) -> u64 {
        match metric {
            Metric::IssuesCount => self.issues_count,
            Metric::TotalUpvotes => self.total_upvotes,
            Metric::ResolvedIssues => self.resolved_issues,
        }
    }
}

/// Award predicate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Criterion {
    MinCount { metric: Metric, at_least: u64 },
    All { of: Vec<Criterion> },
    Any { of: Vec<Criterion> },
}

impl Criterion {
    pub fn min_count(metric: Metric, at_least: u64) -> Self {
        Criterion::MinCount { metric, at_least }
    }

    pub fn evaluate(&self, stats: &UserStats) -> bool {
        match self {
            Criterion::MinCount { metric, at_least } => stats.get(*metric) >= *at_least,
            Criterion::All { of } => of.iter().all(|c| c.evaluate(stats)),
            Criterion::Any { of } => of.iter().any(|c| c.evaluate(stats)),
        }
    }

    /// Progress value shown on a challenge: the first metric the criterion
    /// refers to.
    pub fn progress(&self, stats: &UserStats) -> u64 {
        self.primary_metric().map_or(0, |m| stats.get(m))
    }

    fn primary_metric(&self) -> Option<Metric> {
        match self {
            Criterion::MinCount { metric, .. } => Some(*metric),
            Criterion::All { of } | Criterion::Any { of } => of.iter().find_map(Criterion::primary_metric),
        }
    }
}

fn write_joined(f: &mut fmt::Formatter<'_>, of: &[Criterion], sep: &str) -> fmt::Result {
    for (i, c) in of.iter().enumerate() {
        if i > 0 {
            f.write_str(sep)?;
        }
        write!(f, "({c})")?;
    }
    Ok(())
}

impl fmt::Display for Criterion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Criterion::MinCount { metric, at_least } => write!(f, "{} >= {}", metric.name(), at_least),
            Criterion::All { of } => write_joined(f, of, " and "),
            Criterion::Any { of } => write_joined(f, of, " or "),
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CriterionParseError {
    #[error("unknown metric '{0}'")]
    UnknownMetric(String),

    #[error("unsupported criterion '{0}': expected '<metric> >= <n>'")]
    Unsupported(String),

    #[error("invalid threshold '{0}'")]
    InvalidThreshold(String),
}

impl FromStr for Criterion {
    type Err = CriterionParseError;

    /// Parse the legacy textual form `<metric> >= <n>`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (metric, threshold) = s
            .split_once(">=")
            .ok_or_else(|| CriterionParseError::Unsupported(s.to_string()))?;
        let metric: Metric = metric.trim().parse()?;
        let threshold = threshold.trim();
        let at_least = threshold
            .parse()
            .map_err(|_| CriterionParseError::InvalidThreshold(threshold.to_string()))?;
        Ok(Criterion::min_count(metric, at_least))
    }
}

/// A badge awarded once its criterion holds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Badge {
    pub name: String,
    pub description: String,
    pub criterion: Criterion,
}

/// A challenge that grants reputation when completed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Challenge {
    pub name: String,
    pub description: String,
    pub criterion: Criterion,
    pub reward_points: i64,
}

impl Challenge {
    pub fn progress(&self, stats: &UserStats) -> ChallengeProgress {
        ChallengeProgress {
            name: self.name.clone(),
            progress: self.criterion.progress(stats),
            completed: self.criterion.evaluate(stats),
            reward_points: self.reward_points,
        }
    }
}

/// Where a user stands on one challenge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChallengeProgress {
    pub name: String,
    pub progress: u64,
    pub completed: bool,
    pub reward_points: i64,
}

/// Built-in badge catalogue.
pub fn default_badges() -> Vec<Badge> {
    let badge = |name: &str, description: &str, metric, at_least| Badge {
        name: name.to_string(),
        description: description.to_string(),
        criterion: Criterion::min_count(metric, at_least),
    };
    vec![
        badge("First Reporter", "Reported your first issue", Metric::IssuesCount, 1),
        badge("Active Reporter", "Reported 10 issues", Metric::IssuesCount, 10),
        badge("Community Hero", "Reported 50 issues", Metric::IssuesCount, 50),
        badge("Upvote Collector", "Received 50 upvotes on your issues", Metric::TotalUpvotes, 50),
        badge("Resolution Master", "Had 10 issues resolved", Metric::ResolvedIssues, 10),
    ]
}

/// Built-in challenge catalogue.
pub fn default_challenges() -> Vec<Challenge> {
    let challenge = |name: &str, description: &str, metric, at_least, reward_points| Challenge {
        name: name.to_string(),
        description: description.to_string(),
        criterion: Criterion::min_count(metric, at_least),
        reward_points,
    };
    vec![
        challenge("Report 5 Issues", "Report 5 issues to get started", Metric::IssuesCount, 5, 10),
        challenge("Get 20 Upvotes", "Receive 20 upvotes on your issues", Metric::TotalUpvotes, 20, 15),
        challenge("Resolve Issues", "Have 5 of your issues resolved", Metric::ResolvedIssues, 5, 20),
    ]
}

/// Badges from `catalogue` whose criteria hold and are not yet held.
pub fn earned_badges<'a>(catalogue: &'a [Badge], held: &[String], stats: &UserStats) -> Vec<&'a Badge> {
    catalogue
        .iter()
        .filter(|b| !held.contains(&b.name) && b.criterion.evaluate(stats))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_legacy_criteria() {
        assert_eq!(
            "issues_count >= 5".parse::<Criterion>().unwrap(),
            Criterion::min_count(Metric::IssuesCount, 5)
        );
        assert_eq!(
            "total_upvotes>=20".parse::<Criterion>().unwrap(),
            Criterion::min_count(Metric::TotalUpvotes, 20)
        );
    }

    #[test]
    fn test_reject_expressions() {
        assert!(matches!(
            "__import__('os').system('rm -rf /') >= 1".parse::<Criterion>(),
            Err(CriterionParseError::UnknownMetric(_))
        ));
        assert!(matches!(
            "issues_count > 5".parse::<Criterion>(),
            Err(CriterionParseError::Unsupported(_))
        ));
        assert!(matches!(
            "issues_count >= 5 or True".parse::<Criterion>(),
            Err(CriterionParseError::InvalidThreshold(_))
        ));
    }

    #[test]
    fn test_evaluate_and_progress() {
        let stats = UserStats {
            issues_count: 12,
            total_upvotes: 3,
            resolved_issues: 0,
        };
        let both = Criterion::All {
            of: vec![
                Criterion::min_count(Metric::IssuesCount, 10),
                Criterion::min_count(Metric::TotalUpvotes, 5),
            ],
        };
        let either = Criterion::Any {
            of: vec![
                Criterion::min_count(Metric::ResolvedIssues, 1),
                Criterion::min_count(Metric::IssuesCount, 10),
            ],
        };

        assert!(!both.evaluate(&stats));
        assert!(either.evaluate(&stats));
        assert_eq!(both.progress(&stats), 12);
        assert_eq!(either.progress(&stats), 0);
    }

    #[test]
    fn test_earned_badges_skips_held() {
        let stats = UserStats {
            issues_count: 10,
            total_upvotes: 60,
            resolved_issues: 0,
        };
        let catalogue = default_badges();
        let held = vec!["First Reporter".to_string()];

        let names: Vec<_> = earned_badges(&catalogue, &held, &stats)
            .into_iter()
            .map(|b| b.name.as_str())
            .collect();
        assert_eq!(names, ["Active Reporter", "Upvote Collector"]);
    }

    #[test]
    fn test_serde_tagged_form() {
        let c: Criterion =
            serde_json::from_str(r#"{"kind": "min_count", "metric": "resolved_issues", "at_least": 5}"#).unwrap();
        assert_eq!(c, Criterion::min_count(Metric::ResolvedIssues, 5));
        assert_eq!(c.to_string(), "resolved_issues >= 5");
    }

    #[test]
    fn test_challenge_progress() {
        let challenges = default_challenges();
        let stats = UserStats {
            issues_count: 7,
            total_upvotes: 4,
            resolved_issues: 0,
        };

        let report = challenges[0].progress(&stats);
        assert_eq!(report.progress, 7);
        assert!(report.completed);
        assert_eq!(report.reward_points, 10);

        let upvotes = challenges[1].progress(&stats);
        assert_eq!(upvotes.progress, 4);
        assert!(!upvotes.completed);
    }
}
