//! Expiry classification
//!
//! Maps a batch's expiry date to a status tier, an urgency tier and a signed
//! day count. Both tiers are ordered so that "more urgent" compares greater.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Expiry status of a batch, ordered from least to most severe
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExpiryStatus {
    Good,
    Warning,
    Critical,
    Expired,
}

impl ExpiryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExpiryStatus::Good => "good",
            ExpiryStatus::Warning => "warning",
            ExpiryStatus::Critical => "critical",
            ExpiryStatus::Expired => "expired",
        }
    }
}

/// Urgency tier, ordered from least to most urgent
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Urgency {
    Low,
    Medium,
    High,
    Critical,
}

impl Urgency {
    pub fn as_str(&self) -> &'static str {
        match self {
            Urgency::Low => "low",
            Urgency::Medium => "medium",
            Urgency::High => "high",
            Urgency::Critical => "critical",
        }
    }
}

impl std::fmt::Display for Urgency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Computed expiry classification of a batch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpiryTag {
    pub status: ExpiryStatus,
    /// Negative once the batch has expired; `None` when expiry is not tracked.
    pub days_until_expiry: Option<i64>,
    pub urgency: Urgency,
}

impl ExpiryTag {
    /// Tag for a batch without expiry tracking.
    pub const UNTRACKED: ExpiryTag = ExpiryTag {
        status: ExpiryStatus::Good,
        days_until_expiry: None,
        urgency: Urgency::Low,
    };

    pub fn is_expired(&self) -> bool {
        self.status == ExpiryStatus::Expired
    }

    /// Human-readable summary, e.g. "3 days until expiry" or "Expired 2 days ago".
    pub fn display(&self) -> String {
        match self.days_until_expiry {
            None => "No expiry".to_string(),
            Some(0) => "Expires today".to_string(),
            Some(1) => "1 day until expiry".to_string(),
            Some(-1) => "Expired 1 day ago".to_string(),
            Some(days) if days < 0 => format!("Expired {} days ago", -days),
            Some(days) => format!("{} days until expiry", days),
        }
    }
}

/// Classify a batch's expiry as of `as_of`.
///
/// Thresholds: expired below zero days, critical up to a third of the
/// warning window, warning up to the full window, good beyond it.
pub fn classify_expiry(
    expiry_date: Option<NaiveDate>,
    as_of: NaiveDate,
    warning_window_days: u32,
) -> ExpiryTag {
    let Some(expiry) = expiry_date else {
        return ExpiryTag::UNTRACKED;
    };

    let days = (expiry - as_of).num_days();
    let window = i64::from(warning_window_days);
    let critical_window = window / 3;

    let (status, urgency) = if days < 0 {
        (ExpiryStatus::Expired, Urgency::Critical)
    } else if days <= critical_window {
        (ExpiryStatus::Critical, Urgency::High)
    } else if days <= window {
        (ExpiryStatus::Warning, Urgency::Medium)
    } else {
        (ExpiryStatus::Good, Urgency::Low)
    };

    ExpiryTag {
        status,
        days_until_expiry: Some(days),
        urgency,
    }
}
