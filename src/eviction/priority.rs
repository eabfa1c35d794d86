// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::Instant;

use crate::config::EvictionConfig;

/// Sensitivity of a cached value.
///
/// Drives the eviction base score and whether the entry may leave the
/// process (high-sensitivity entries stay local).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SensitivityTag {
    #[default]
    Low,
    Medium,
    High,
}

impl SensitivityTag {
    pub const ALL: [SensitivityTag; 3] = [Self::Low, Self::Medium, Self::High];

    #[must_use]
    pub fn rank(self) -> u8 {
        self as u8
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }

    /// Whether entries with this tag may be mirrored to the secondary tier
    #[must_use]
    pub fn allows_secondary(self) -> bool {
        !matches!(self, Self::High)
    }
}

impl std::fmt::Display for SensitivityTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Cache entry metadata for eviction scoring
#[derive(Debug, Clone)]
pub struct EntryMeta {
    pub key: String,
    pub sensitivity: SensitivityTag,
    pub access_count: u64,
    pub created_at: Instant,
    /// Insertion sequence number; earlier inserts lose ties
    pub seq: u64,
}

/// Priority eviction policy: sensitivity base + capped access bonus + linear recency bonus.
///
/// Higher score = more valuable = evicted last. The sensitivity margin is
/// larger than the combined access and recency bonuses, so a sensitive entry
/// never loses to a routine one on access count alone.
#[derive(Debug, Clone)]
pub struct PriorityPolicy {
    pub sensitivity_margin: f64,
    pub access_weight: f64,
    pub max_access_bonus: f64,
    pub max_recency_bonus: f64,
    pub recency_window: Duration,
    /// Fraction of entries evicted per sweep
    pub batch_fraction: f64,
}

impl Default for PriorityPolicy {
    fn default() -> Self {
        Self::from_config(&EvictionConfig::default())
    }
}

impl PriorityPolicy {
    #[must_use]
    pub fn from_config(config: &EvictionConfig) -> Self {
        Self {
            sensitivity_margin: config.sensitivity_margin,
            access_weight: config.access_weight,
            max_access_bonus: config.max_access_bonus,
            max_recency_bonus: config.max_recency_bonus,
            recency_window: config.recency_window(),
            batch_fraction: config.batch_fraction,
        }
    }

    fn base(&self, tag: SensitivityTag) -> f64 {
        f64::from(tag.rank()) * self.sensitivity_margin
    }

    /// Linear decay from `max_recency_bonus` at age 0 to zero at `recency_window`.
    #[must_use]
    pub fn recency_bonus(&self, age: Duration) -> f64 {
        let window = self.recency_window.as_secs_f64();
        if window <= 0.0 {
            return 0.0;
        }
        let remaining = 1.0 - age.as_secs_f64() / window;
        (self.max_recency_bonus * remaining).max(0.0)
    }

    /// Calculate eviction score (higher = keep)
    #[must_use]
    pub fn score(&self, entry: &EntryMeta, now: Instant) -> f64 {
        let access = (entry.access_count as f64 * self.access_weight).min(self.max_access_bonus);
        let age = now.saturating_duration_since(entry.created_at);
        self.base(entry.sensitivity) + access + self.recency_bonus(age)
    }

    /// Number of victims for one sweep over `len` entries.
    #[must_use]
    pub fn batch_size(&self, len: usize) -> usize {
        if len == 0 {
            return 0;
        }
        ((len as f64 * self.batch_fraction).ceil() as usize).clamp(1, len)
    }

    /// Select victims (returns keys sorted by score, lowest first; ties by insertion order)
    #[must_use]
    pub fn select_victims(&self, entries: &[EntryMeta], count: usize, now: Instant) -> Vec<String> {
        let mut scored: Vec<_> = entries
            .iter()
            .map(|e| (self.score(e, now), e.seq, &e.key))
            .collect();

        scored.sort_by(|a, b| {
            a.0.partial_cmp(&b.0)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.1.cmp(&b.1))
        });
        scored.into_iter().take(count).map(|(_, _, key)| key.clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_entry(key: &str, tag: SensitivityTag, access_count: u64, age_secs: u64, seq: u64) -> EntryMeta {
        let now = Instant::now();
        EntryMeta {
            key: key.to_string(),
            sensitivity: tag,
            access_count,
            created_at: now.checked_sub(Duration::from_secs(age_secs)).unwrap_or(now),
            seq,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_recency_bonus_decays_to_zero() {
        let policy = PriorityPolicy::default();
        assert_eq!(policy.recency_bonus(Duration::ZERO), 100.0);
        let half = policy.recency_bonus(policy.recency_window / 2);
        assert!((half - 50.0).abs() < 1e-9);
        assert_eq!(policy.recency_bonus(policy.recency_window), 0.0);
        assert_eq!(policy.recency_bonus(policy.recency_window * 3), 0.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sensitivity_dominates_access_count() {
        let policy = PriorityPolicy::default();
        let now = Instant::now();

        let hot_low = make_entry("hot", SensitivityTag::Low, 1_000_000, 0, 0);
        let cold_high = EntryMeta { created_at: now, ..make_entry("cold", SensitivityTag::High, 0, 0, 1) };
        // Age the high-sensitivity entry past the recency window
        tokio::time::advance(policy.recency_window * 2).await;
        let now = Instant::now();

        assert!(policy.score(&cold_high, now) > policy.score(&hot_low, now));
    }

    #[tokio::test(start_paused = true)]
    async fn test_access_count_raises_score() {
        let policy = PriorityPolicy::default();
        let now = Instant::now();

        let unused = make_entry("unused", SensitivityTag::Medium, 0, 0, 0);
        let used = make_entry("used", SensitivityTag::Medium, 10, 0, 1);

        assert!(policy.score(&used, now) > policy.score(&unused, now));
        assert_eq!(policy.score(&used, now) - policy.score(&unused, now), 10.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ties_broken_by_insertion_order() {
        let policy = PriorityPolicy::default();
        let now = Instant::now();

        let entries = vec![
            make_entry("third", SensitivityTag::Low, 0, 0, 3),
            make_entry("first", SensitivityTag::Low, 0, 0, 1),
            make_entry("second", SensitivityTag::Low, 0, 0, 2),
        ];

        let victims = policy.select_victims(&entries, 2, now);
        assert_eq!(victims, vec!["first".to_string(), "second".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_select_victims_lowest_first() {
        let policy = PriorityPolicy::default();
        let now = Instant::now();

        let entries = vec![
            make_entry("secret", SensitivityTag::High, 0, 0, 0),
            make_entry("routine", SensitivityTag::Low, 0, 0, 1),
            make_entry("popular", SensitivityTag::Low, 50, 0, 2),
            make_entry("internal", SensitivityTag::Medium, 0, 0, 3),
        ];

        let victims = policy.select_victims(&entries, 4, now);
        assert_eq!(victims, vec!["routine", "popular", "internal", "secret"]);
    }

    #[test]
    fn test_batch_size_is_twenty_percent_rounded_up() {
        let policy = PriorityPolicy::default();
        assert_eq!(policy.batch_size(0), 0);
        assert_eq!(policy.batch_size(1), 1);
        assert_eq!(policy.batch_size(5), 1);
        assert_eq!(policy.batch_size(10), 2);
        assert_eq!(policy.batch_size(11), 3);
        assert_eq!(policy.batch_size(100), 20);
    }

    #[test]
    fn test_sensitivity_tag_serde() {
        assert_eq!(serde_json::to_string(&SensitivityTag::High).unwrap(), "\"high\"");
        let tag: SensitivityTag = serde_json::from_str("\"medium\"").unwrap();
        assert_eq!(tag, SensitivityTag::Medium);
        assert!(SensitivityTag::Low.allows_secondary());
        assert!(!SensitivityTag::High.allows_secondary());
    }
}
