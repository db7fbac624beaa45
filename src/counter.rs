//! Profile view counters
//!
//! Daily, monthly and yearly counters roll over on calendar boundaries
//! relative to the last recorded view. Every qualifying render counts; there
//! is no per-visitor deduplication.

use chrono::NaiveDate;
use serde::Serialize;
use tracing::warn;

use crate::db::Database;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ViewCounters {
    pub daily_views: u32,
    pub monthly_views: u32,
    pub yearly_views: u32,
    pub last_viewed_date: Option<NaiveDate>,
}

impl ViewCounters {
    /// Counters after one more view on `today`.
    /// Mirrors the single UPDATE statement the store executes; the store
    /// tests replay it against the real query.
    #[cfg(test)]
    pub(crate) fn advance(self, today: NaiveDate) -> Self {
        use chrono::Datelike;

        let last = self.last_viewed_date;

        let daily_views = if last == Some(today) { self.daily_views.saturating_add(1) } else { 1 };

        let same_month = last.is_some_and(|d| d.year() == today.year() && d.month() == today.month());
        let monthly_views = if same_month { self.monthly_views.saturating_add(1) } else { 1 };

        let same_year = last.is_some_and(|d| d.year() == today.year());
        let yearly_views = if same_year { self.yearly_views.saturating_add(1) } else { 1 };

        Self {
            daily_views,
            monthly_views,
            yearly_views,
            last_viewed_date: Some(today),
        }
    }
}

/// Sums over an account's own profile and its child profiles
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AccountSummary {
    pub account_id: i64,
    pub total_profiles: i64,
    pub daily_views: i64,
    pub monthly_views: i64,
    pub yearly_views: i64,
}

#[derive(Clone)]
pub struct ViewCounterService {
    db: Database,
}

impl ViewCounterService {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Count a render of a public profile. Storage errors are logged and
    /// swallowed; the page is served either way.
    pub async fn record_view(&self, profile_id: i64, today: NaiveDate) -> Option<ViewCounters> {
        match self.db.record_profile_view(profile_id, today).await {
            Ok(counters) => counters,
            Err(e) => {
                warn!("Failed to update view counters for profile {}: {:#}", profile_id, e);
                None
            }
        }
    }

    pub async fn account_summary(&self, account_id: i64, today: NaiveDate) -> anyhow::Result<AccountSummary> {
        self.db.account_summary(account_id, today).await
    }
}
