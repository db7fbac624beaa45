//! Dashboard aggregation
//!
//! Everything here is computed at read time from the visit and click logs.
//! Counts always cover the whole history of a profile; display limits only
//! apply to the listing sections.

use anyhow::Result;
use chrono::{DateTime, Days, NaiveDate, TimeZone, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};

use crate::config::AnalyticsConfig;
use crate::db::{ButtonStat, ClickEvent, CountryStat, Database, Profile, VisitEvent};
use crate::device::{self, DeviceType};

/// Key for clicks and visits without a device IP
pub const ANONYMOUS_KEY: &str = "anon";

/// Longest time series a caller may ask for
pub const MAX_WINDOW_DAYS: u32 = 366;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DeviceSplit {
    pub mobile: i64,
    pub tablet: i64,
    pub desktop: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SeriesPoint {
    /// e.g. "01 Mar"
    pub label: String,
    pub date: NaiveDate,
    pub count: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClickSummary {
    /// Counts for the well-known buttons, zero when never clicked
    pub tracked: BTreeMap<String, i64>,
    pub breakdown: Vec<ButtonStat>,
    pub total: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DashboardData {
    pub profile_id: i64,
    pub today: NaiveDate,
    pub window_days: u32,
    pub total_views: i64,
    pub gps_count: i64,
    pub ip_count: i64,
    pub devices: DeviceSplit,
    pub series: Vec<SeriesPoint>,
    pub top_countries: Vec<CountryStat>,
    /// Distinct buttons per device IP, most recent first
    pub buttons_by_ip: BTreeMap<String, Vec<String>>,
    /// Recent visit id to the buttons clicked from the same device IP.
    /// Shared IPs make this an approximation.
    pub lead_buttons: BTreeMap<String, Vec<String>>,
    pub clicks: ClickSummary,
    pub recent_visits: Vec<VisitEvent>,
    pub recent_clicks: Vec<ClickEvent>,
}

#[derive(Clone)]
pub struct AnalyticsAggregator {
    db: Database,
    config: AnalyticsConfig,
}

impl AnalyticsAggregator {
    pub fn new(db: Database, config: AnalyticsConfig) -> Self {
        Self { db, config }
    }

    pub fn default_window(&self) -> u32 {
        self.config.window_days
    }

    pub async fn build_dashboard(&self, profile: &Profile, today: NaiveDate, window_days: u32) -> Result<DashboardData> {
        let window_days = window_days.clamp(1, MAX_WINDOW_DAYS);
        let (since, until) = window_bounds(today, window_days);

        let total_views = self.db.count_visits(profile.id).await?;
        let gps_count = self.db.count_gps_visits(profile.id).await?;
        let user_agents = self.db.user_agent_counts(profile.id).await?;
        let daily = self.db.daily_visit_counts(profile.id, since, until).await?;
        let top_countries = self.db.top_countries(profile.id, self.config.top_countries).await?;
        let pairs = self.db.click_pairs(profile.id).await?;
        let button_counts = self.db.button_counts(profile.id).await?;
        let recent_visits = self.db.recent_visits(profile.id, self.config.recent_visits).await?;
        let recent_clicks = self.db.recent_clicks(profile.id, self.config.recent_clicks).await?;

        let buttons_by_ip = buttons_by_key(&pairs);
        let lead_buttons = lead_buttons(&recent_visits, self.config.recent_leads as usize, &buttons_by_ip);

        Ok(DashboardData {
            profile_id: profile.id,
            today,
            window_days,
            total_views,
            gps_count,
            ip_count: total_views - gps_count,
            devices: device_split(&user_agents, total_views),
            series: time_series(&daily, today, window_days),
            top_countries,
            buttons_by_ip,
            lead_buttons,
            clicks: click_summary(button_counts, &self.config.tracked_buttons),
            recent_visits,
            recent_clicks,
        })
    }
}

fn start_of_day(date: NaiveDate) -> DateTime<Utc> {
    Utc.from_utc_datetime(&date.and_time(chrono::NaiveTime::MIN))
}

/// `[first day 00:00, day after today 00:00)` in UTC
pub fn window_bounds(today: NaiveDate, window_days: u32) -> (DateTime<Utc>, DateTime<Utc>) {
    let first = today
        .checked_sub_days(Days::new(u64::from(window_days.saturating_sub(1))))
        .unwrap_or(NaiveDate::MIN);
    let after = today.checked_add_days(Days::new(1)).unwrap_or(NaiveDate::MAX);
    (start_of_day(first), start_of_day(after))
}

/// Mobile and tablet are counted from the grouped user agents; desktop takes
/// the remainder so the split always adds up to `total`
pub fn device_split(user_agents: &[(String, i64)], total: i64) -> DeviceSplit {
    let mut split = DeviceSplit::default();
    for (ua, count) in user_agents {
        match device::classify(ua) {
            DeviceType::Mobile => split.mobile += count,
            DeviceType::Tablet => split.tablet += count,
            DeviceType::Desktop => {}
        }
    }
    split.desktop = total - (split.mobile + split.tablet);
    split
}

/// One point per day, oldest first, days without visits at zero
pub fn time_series(daily: &[(String, i64)], today: NaiveDate, window_days: u32) -> Vec<SeriesPoint> {
    let counts: HashMap<&str, i64> = daily.iter().map(|(day, count)| (day.as_str(), *count)).collect();

    (0..window_days)
        .rev()
        .filter_map(|offset| today.checked_sub_days(Days::new(u64::from(offset))))
        .map(|date| {
            let key = date.format("%Y-%m-%d").to_string();
            SeriesPoint {
                label: date.format("%d %b").to_string(),
                count: counts.get(key.as_str()).copied().unwrap_or(0),
                date,
            }
        })
        .collect()
}

fn ip_key(ip: Option<&str>) -> String {
    match ip {
        Some(ip) if !ip.is_empty() => ip.to_string(),
        _ => ANONYMOUS_KEY.to_string(),
    }
}

/// Group distinct (ip, button) pairs by ip, preserving the input order
pub fn buttons_by_key(pairs: &[(Option<String>, String)]) -> BTreeMap<String, Vec<String>> {
    let mut map: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for (ip, button) in pairs {
        if button.is_empty() {
            continue;
        }
        let buttons = map.entry(ip_key(ip.as_deref())).or_default();
        if !buttons.contains(button) {
            buttons.push(button.clone());
        }
    }
    map
}

pub fn lead_buttons(
    visits: &[VisitEvent],
    limit: usize,
    by_key: &BTreeMap<String, Vec<String>>,
) -> BTreeMap<String, Vec<String>> {
    visits
        .iter()
        .take(limit)
        .map(|visit| {
            let buttons = by_key
                .get(&ip_key(visit.device_ip.as_deref()))
                .cloned()
                .unwrap_or_default();
            (visit.id.clone(), buttons)
        })
        .collect()
}

pub fn click_summary(breakdown: Vec<ButtonStat>, tracked_buttons: &[String]) -> ClickSummary {
    let tracked = tracked_buttons
        .iter()
        .map(|name| {
            let count = breakdown
                .iter()
                .find(|stat| &stat.button_type == name)
                .map_or(0, |stat| stat.count);
            (name.clone(), count)
        })
        .collect();
    let total = breakdown.iter().map(|stat| stat.count).sum();

    ClickSummary { tracked, breakdown, total }
}
