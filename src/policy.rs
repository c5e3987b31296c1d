// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Limit resolution.
//!
//! Effective quotas come from three layers:
//! 1. a behavior band chosen by the aggregate score (or the base quotas,
//!    raised for reputable users);
//! 2. a static per-endpoint override table;
//! 3. for each period an override defines, the override replaces the
//!    dynamic value. Periods it omits keep the dynamic value.

use crate::cache::Cache;
use crate::clock::{SharedClock, SystemClock};
use crate::config::CacheConfig;
use crate::endpoints;
use crate::error::ConfigError;
use crate::identity::Identity;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

/// Reputation above which well-behaved users get the raised quotas.
pub const REPUTATION_BONUS_THRESHOLD: i64 = 100;

/// Quota period.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Period {
    Minute,
    Hour,
    Day,
}

impl Period {
    pub const ALL: [Period; 3] = [Period::Minute, Period::Hour, Period::Day];

    pub fn label(self) -> &'static str {
        match self {
            Period::Minute => "minute",
            Period::Hour => "hour",
            Period::Day => "day",
        }
    }

    pub fn duration(self) -> Duration {
        match self {
            Period::Minute => Duration::from_secs(60),
            Period::Hour => Duration::from_secs(3600),
            Period::Day => Duration::from_secs(86_400),
        }
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for Period {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "s" | "sec" | "second" | "seconds" => Err("per-second limits are not supported".to_string()),
            "m" | "min" | "minute" | "minutes" => Ok(Period::Minute),
            "h" | "hr" | "hour" | "hours" => Ok(Period::Hour),
            "d" | "day" | "days" => Ok(Period::Day),
            other => Err(format!("unknown period '{other}'")),
        }
    }
}

/// A single `amount per period` limit, e.g. `"10 per minute"` or `"5/hour"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitItem {
    pub amount: u32,
    pub period: Period,
}

impl RateLimitItem {
    pub fn new(amount: u32, period: Period) -> Self {
        Self { amount, period }
    }
}

impl fmt::Display for RateLimitItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} per {}", self.amount, self.period)
    }
}

impl FromStr for RateLimitItem {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = |reason: String| ConfigError::InvalidLimit {
            value: s.to_string(),
            reason,
        };

        let (amount, period) = if let Some((amount, period)) = s.split_once('/') {
            (amount, period)
        } else if let Some((amount, period)) = s.split_once(" per ") {
            (amount, period)
        } else {
            return Err(invalid("expected '<n> per <period>' or '<n>/<period>'".to_string()));
        };

        let amount: u32 = amount
            .trim()
            .parse()
            .map_err(|_| invalid(format!("'{}' is not a count", amount.trim())))?;
        if amount == 0 {
            return Err(invalid("amount must be positive".to_string()));
        }
        let period = period.parse::<Period>().map_err(invalid)?;

        Ok(Self { amount, period })
    }
}

/// Parse a list of limit strings, failing on the first malformed one.
pub fn parse_limits<S: AsRef<str>>(limits: &[S]) -> Result<Vec<RateLimitItem>, ConfigError> {
    limits.iter().map(|s| s.as_ref().parse()).collect()
}

/// Quotas in force for one request. Every period is at least 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct EffectiveLimits {
    pub per_minute: u32,
    pub per_hour: u32,
    pub per_day: u32,
}

impl EffectiveLimits {
    pub const BASE: EffectiveLimits = EffectiveLimits::new(10, 100, 500);
    pub const REPUTABLE: EffectiveLimits = EffectiveLimits::new(15, 150, 1000);
    pub const SLIGHTLY_SUSPICIOUS: EffectiveLimits = EffectiveLimits::new(7, 75, 300);
    pub const MODERATELY_SUSPICIOUS: EffectiveLimits = EffectiveLimits::new(5, 50, 200);
    pub const VERY_SUSPICIOUS: EffectiveLimits = EffectiveLimits::new(2, 20, 50);

    /// Build limits, raising any zero to 1.
    pub const fn new(per_minute: u32, per_hour: u32, per_day: u32) -> Self {
        const fn at_least_one(v: u32) -> u32 {
            if v == 0 {
                1
            } else {
                v
            }
        }
        Self {
            per_minute: at_least_one(per_minute),
            per_hour: at_least_one(per_hour),
            per_day: at_least_one(per_day),
        }
    }

    pub fn get(&self, period: Period) -> u32 {
        match period {
            Period::Minute => self.per_minute,
            Period::Hour => self.per_hour,
            Period::Day => self.per_day,
        }
    }

    fn set(&mut self, period: Period, value: u32) {
        let value = value.max(1);
        match period {
            Period::Minute => self.per_minute = value,
            Period::Hour => self.per_hour = value,
            Period::Day => self.per_day = value,
        }
    }

    /// Iterate `(period, limit)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (Period, u32)> + '_ {
        Period::ALL.into_iter().map(move |p| (p, self.get(p)))
    }
}

/// Behavior band selected by an aggregate score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BehaviorBand {
    VerySuspicious,
    ModeratelySuspicious,
    SlightlySuspicious,
    Normal,
}

impl BehaviorBand {
    pub fn for_score(score: u8) -> Self {
        match score {
            s if s > 75 => BehaviorBand::VerySuspicious,
            s if s > 50 => BehaviorBand::ModeratelySuspicious,
            s if s > 25 => BehaviorBand::SlightlySuspicious,
            _ => BehaviorBand::Normal,
        }
    }
}

/// Caps for the periods an endpoint overrides.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointOverride {
    pub per_minute: Option<u32>,
    pub per_hour: Option<u32>,
    pub per_day: Option<u32>,
}

impl EndpointOverride {
    pub fn get(&self, period: Period) -> Option<u32> {
        match period {
            Period::Minute => self.per_minute,
            Period::Hour => self.per_hour,
            Period::Day => self.per_day,
        }
    }

    /// Build an override from limit items; each period may appear once.
    pub fn from_items(endpoint: &str, items: &[RateLimitItem]) -> Result<Self, ConfigError> {
        let mut out = EndpointOverride::default();
        for item in items {
            let slot = match item.period {
                Period::Minute => &mut out.per_minute,
                Period::Hour => &mut out.per_hour,
                Period::Day => &mut out.per_day,
            };
            if slot.is_some() {
                return Err(ConfigError::DuplicatePeriod {
                    endpoint: endpoint.to_string(),
                    period: item.period.label(),
                });
            }
            *slot = Some(item.amount);
        }
        Ok(out)
    }

    fn apply(&self, limits: &mut EffectiveLimits) {
        for period in Period::ALL {
            if let Some(cap) = self.get(period) {
                limits.set(period, cap);
            }
        }
    }
}

/// Static per-endpoint override table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OverrideTable {
    entries: HashMap<String, EndpointOverride>,
}

impl Default for OverrideTable {
    fn default() -> Self {
        let entry = |m, h, d| EndpointOverride {
            per_minute: m,
            per_hour: h,
            per_day: d,
        };
        let entries = [
            (endpoints::REPORT_ISSUE, entry(Some(5), Some(20), None)),
            (endpoints::UPVOTE, entry(Some(20), Some(100), None)),
            (endpoints::NOTIFICATIONS, entry(Some(30), Some(200), None)),
            (endpoints::REVERSE_GEOCODE, entry(Some(30), Some(150), None)),
            (endpoints::CHECK_DUPLICATES, entry(Some(10), Some(50), None)),
            (endpoints::GENERATE_REPORT, entry(None, None, Some(5))),
            (endpoints::LOGIN, entry(Some(5), Some(20), None)),
            (endpoints::REGISTER, entry(None, Some(10), None)),
        ]
        .into_iter()
        .map(|(endpoint, o)| (endpoint.to_string(), o))
        .collect();

        Self { entries }
    }
}

impl OverrideTable {
    pub fn empty() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    /// Build a table from configuration strings. Any malformed or zero
    /// limit, or a period given twice for one endpoint, is rejected.
    pub fn from_config(table: &BTreeMap<String, Vec<String>>) -> Result<Self, ConfigError> {
        let mut entries = HashMap::with_capacity(table.len());
        for (endpoint, limits) in table {
            let items = parse_limits(limits)?;
            entries.insert(endpoint.clone(), EndpointOverride::from_items(endpoint, &items)?);
        }
        Ok(Self { entries })
    }

    pub fn get(&self, endpoint: &str) -> Option<&EndpointOverride> {
        self.entries.get(endpoint)
    }

    pub fn insert(&mut self, endpoint: impl Into<String>, o: EndpointOverride) -> Result<(), ConfigError> {
        let endpoint = endpoint.into();
        if [o.per_minute, o.per_hour, o.per_day].contains(&Some(0)) {
            return Err(ConfigError::InvalidLimit {
                value: endpoint,
                reason: "override caps must be positive".to_string(),
            });
        }
        self.entries.insert(endpoint, o);
        Ok(())
    }
}

/// Supplies the reputation of signed-in users.
#[async_trait]
pub trait ReputationSource: Send + Sync {
    async fn reputation(&self, subject_id: &str) -> Option<i64>;
}

/// Reputations reported by callers. Bounded and expiring, so arbitrary
/// subject ids cannot grow it without limit.
pub struct ReportedReputation {
    points: Cache<i64>,
}

impl ReportedReputation {
    pub fn new(config: &CacheConfig) -> Result<Self, ConfigError> {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    pub fn with_clock(config: &CacheConfig, clock: SharedClock) -> Result<Self, ConfigError> {
        Ok(Self {
            points: Cache::with_clock(config, clock)?,
        })
    }

    pub fn set(&self, subject_id: impl Into<String>, points: i64) {
        self.points.set(subject_id, points, None);
    }

    /// Number of reputations held, including expired ones not yet swept.
    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

#[async_trait]
impl ReputationSource for ReportedReputation {
    async fn reputation(&self, subject_id: &str) -> Option<i64> {
        self.points.get(subject_id)
    }
}

/// Resolves [`EffectiveLimits`] from a behavior score.
#[derive(Debug, Clone, Default)]
pub struct LimitPolicy {
    overrides: OverrideTable,
}

impl LimitPolicy {
    pub fn new(overrides: OverrideTable) -> Self {
        Self { overrides }
    }

    /// Build from configuration, falling back to the built-in table.
    pub fn from_config(table: Option<&BTreeMap<String, Vec<String>>>) -> Result<Self, ConfigError> {
        let overrides = match table {
            Some(table) => OverrideTable::from_config(table)?,
            None => OverrideTable::default(),
        };
        Ok(Self::new(overrides))
    }

    pub fn overrides(&self) -> &OverrideTable {
        &self.overrides
    }

    /// Limits before endpoint overrides.
    pub fn dynamic_limits(&self, score: u8, reputation: Option<i64>) -> EffectiveLimits {
        match BehaviorBand::for_score(score) {
            BehaviorBand::VerySuspicious => EffectiveLimits::VERY_SUSPICIOUS,
            BehaviorBand::ModeratelySuspicious => EffectiveLimits::MODERATELY_SUSPICIOUS,
            BehaviorBand::SlightlySuspicious => EffectiveLimits::SLIGHTLY_SUSPICIOUS,
            BehaviorBand::Normal => match reputation {
                Some(points) if points > REPUTATION_BONUS_THRESHOLD => EffectiveLimits::REPUTABLE,
                _ => EffectiveLimits::BASE,
            },
        }
    }

    /// Final limits for `endpoint`: dynamic limits with the endpoint's
    /// override replacing each period it defines.
    pub fn resolve(&self, score: u8, reputation: Option<i64>, endpoint: &str) -> EffectiveLimits {
        let mut limits = self.dynamic_limits(score, reputation);
        if let Some(o) = self.overrides.get(endpoint) {
            o.apply(&mut limits);
        }
        limits
    }

    /// Look up reputation for user identities; anonymous callers have none.
    pub async fn reputation_for(
        &self,
        identity: &Identity,
        source: &dyn ReputationSource,
    ) -> Option<i64> {
        if identity.is_user() {
            source.reputation(&identity.key).await
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::LimitsConfig;

    #[test]
    fn test_parse_limit_strings() {
        assert_eq!(
            "10 per minute".parse::<RateLimitItem>().unwrap(),
            RateLimitItem::new(10, Period::Minute)
        );
        assert_eq!("5/hour".parse::<RateLimitItem>().unwrap(), RateLimitItem::new(5, Period::Hour));
        assert_eq!("3 / day".parse::<RateLimitItem>().unwrap(), RateLimitItem::new(3, Period::Day));
        assert_eq!("20/min".parse::<RateLimitItem>().unwrap(), RateLimitItem::new(20, Period::Minute));
    }

    #[test]
    fn test_reject_malformed_limit_strings() {
        for bad in ["", "ten per minute", "0 per minute", "5 per fortnight", "5", "5/second"] {
            assert!(bad.parse::<RateLimitItem>().is_err(), "{bad:?} should be rejected");
        }
    }

    #[test]
    fn test_zero_telemetry_gets_base_limits() {
        let policy = LimitPolicy::default();
        assert_eq!(policy.resolve(0, None, "main.issue_list"), EffectiveLimits::new(10, 100, 500));
    }

    #[test]
    fn test_bands_high_to_low() {
        let policy = LimitPolicy::default();
        assert_eq!(policy.dynamic_limits(100, None), EffectiveLimits::new(2, 20, 50));
        assert_eq!(policy.dynamic_limits(76, None), EffectiveLimits::new(2, 20, 50));
        assert_eq!(policy.dynamic_limits(75, None), EffectiveLimits::new(5, 50, 200));
        assert_eq!(policy.dynamic_limits(51, None), EffectiveLimits::new(5, 50, 200));
        assert_eq!(policy.dynamic_limits(50, None), EffectiveLimits::new(7, 75, 300));
        assert_eq!(policy.dynamic_limits(26, None), EffectiveLimits::new(7, 75, 300));
        assert_eq!(policy.dynamic_limits(25, None), EffectiveLimits::BASE);
    }

    #[test]
    fn test_reputation_bonus_only_in_normal_band() {
        let policy = LimitPolicy::default();
        assert_eq!(policy.dynamic_limits(0, Some(101)), EffectiveLimits::new(15, 150, 1000));
        assert_eq!(policy.dynamic_limits(0, Some(100)), EffectiveLimits::BASE);
        assert_eq!(policy.dynamic_limits(60, Some(5000)), EffectiveLimits::MODERATELY_SUSPICIOUS);
    }

    #[test]
    fn test_override_wins_per_period() {
        let policy = LimitPolicy::default();
        let login = policy.resolve(0, None, "main.login");
        assert_eq!(login.per_minute, 5);
        assert_eq!(login.per_hour, 20);
        // Day is not overridden and keeps the dynamic value
        assert_eq!(login.per_day, 500);

        let report = policy.resolve(0, Some(500), "main.generate_report");
        assert_eq!(report, EffectiveLimits::new(15, 150, 5));
    }

    #[test]
    fn test_override_replaces_even_when_looser() {
        let policy = LimitPolicy::default();
        // Very suspicious band allows 2/min, the upvote override says 20/min
        let upvote = policy.resolve(90, None, "main.upvote");
        assert_eq!(upvote, EffectiveLimits::new(20, 100, 50));
    }

    #[test]
    fn test_limits_never_below_one() {
        assert_eq!(EffectiveLimits::new(0, 0, 0), EffectiveLimits::new(1, 1, 1));
        let policy = LimitPolicy::default();
        for score in 0..=100u8 {
            for rep in [None, Some(0), Some(1000)] {
                let limits = policy.resolve(score, rep, "main.login");
                assert!(limits.iter().all(|(_, v)| v >= 1));
            }
        }
    }

    #[test]
    fn test_override_table_from_config() {
        let mut table = BTreeMap::new();
        table.insert("main.login".to_string(), vec!["3 per minute".to_string()]);
        let policy = LimitPolicy::from_config(Some(&table)).unwrap();

        assert_eq!(policy.resolve(0, None, "main.login"), EffectiveLimits::new(3, 100, 500));
        // Replacing the table drops the built-in entries
        assert_eq!(policy.resolve(0, None, "main.upvote"), EffectiveLimits::BASE);
    }

    #[test]
    fn test_override_table_rejects_duplicates_and_zero() {
        let mut table = BTreeMap::new();
        table.insert("main.login".to_string(), vec!["3/minute".to_string(), "4/min".to_string()]);
        assert!(matches!(
            OverrideTable::from_config(&table),
            Err(ConfigError::DuplicatePeriod { .. })
        ));

        let mut table = OverrideTable::empty();
        let zero = EndpointOverride {
            per_minute: Some(0),
            ..Default::default()
        };
        assert!(table.insert("main.login", zero).is_err());
    }

    #[test]
    fn test_reputation_only_for_users() {
        let source = ReportedReputation::new(&LimitsConfig::default().reputation_cache()).unwrap();
        source.set("42", 250);
        source.set("10.0.0.1", 250);
        let policy = LimitPolicy::default();

        tokio_test::block_on(async {
            assert_eq!(policy.reputation_for(&Identity::user("42"), &source).await, Some(250));
            assert_eq!(policy.reputation_for(&Identity::anonymous("10.0.0.1"), &source).await, None);
        });
    }

    #[test]
    fn test_reported_reputation_is_bounded_and_expires() {
        let clock = ManualClock::starting_now();
        let config = CacheConfig {
            max_size: 2,
            default_ttl_secs: Some(60),
        };
        let source = ReportedReputation::with_clock(&config, Arc::new(clock.clone())).unwrap();

        for (i, subject) in ["a", "b", "c", "d"].into_iter().enumerate() {
            source.set(subject, i as i64 * 100);
            clock.advance(chrono::Duration::seconds(1));
        }
        assert_eq!(source.len(), 2);

        tokio_test::block_on(async {
            assert_eq!(source.reputation("a").await, None);
            assert_eq!(source.reputation("d").await, Some(300));

            clock.advance(chrono::Duration::seconds(60));
            assert_eq!(source.reputation("d").await, None);
        });
        assert!(source.is_empty());
    }
}
