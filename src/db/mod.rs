//! Database module

mod schema;
mod write_buffer;

pub use write_buffer::{start_write_buffer, WriteSender};

use anyhow::Result;
use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Pool, Sqlite, SqliteConnection};

use crate::config::DatabaseConfig;
use crate::counter::{AccountSummary, ViewCounters};
use crate::location::LocationSource;

/// A public profile as seen by the analytics core
#[derive(Debug, Clone, Serialize)]
pub struct Profile {
    pub id: i64,
    pub slug: String,
    pub public_id: String,
    pub display_name: String,
    /// Parent account for child profiles
    pub owner_id: Option<i64>,
    pub is_public: bool,
    pub counters: ViewCounters,
}

impl Profile {
    /// The profile itself and its parent account may read its analytics
    pub fn is_managed_by(&self, account_id: i64) -> bool {
        self.id == account_id || self.owner_id == Some(account_id)
    }
}

#[derive(Debug, Clone)]
pub struct NewProfile {
    pub slug: String,
    pub display_name: String,
    pub owner_id: Option<i64>,
    pub is_public: bool,
}

/// A recorded profile view with its resolved location
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VisitEvent {
    pub id: String,
    pub profile_id: i64,
    pub visitor_id: Option<i64>,
    pub device_ip: Option<String>,
    pub user_agent: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub country: String,
    pub region: String,
    pub locality: String,
    pub postal_code: String,
    pub accuracy_score: u8,
    pub location_source: LocationSource,
    pub timestamp: DateTime<Utc>,
}

/// A recorded button interaction
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClickEvent {
    pub id: String,
    pub profile_id: i64,
    pub visitor_id: Option<i64>,
    pub button_type: String,
    pub device_ip: Option<String>,
    pub user_agent: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub timestamp: DateTime<Utc>,
}

/// Anything the write buffer can persist
#[derive(Debug, Clone)]
pub enum EventRecord {
    Visit(VisitEvent),
    Click(ClickEvent),
}

impl EventRecord {
    pub fn id(&self) -> &str {
        match self {
            EventRecord::Visit(visit) => &visit.id,
            EventRecord::Click(click) => &click.id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CountryStat {
    pub country: String,
    pub count: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ButtonStat {
    pub button_type: String,
    pub count: i64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct EventLogWatermark {
    pub visits: i64,
    pub last_visit_row: i64,
    pub clicks: i64,
    pub last_click_row: i64,
}

type ProfileRow = (i64, String, String, String, Option<i64>, bool, i64, i64, i64, Option<String>);

type VisitRow = (
    String,
    i64,
    Option<i64>,
    Option<String>,
    Option<String>,
    Option<f64>,
    Option<f64>,
    String,
    String,
    String,
    String,
    i64,
    String,
    i64,
);

type ClickRow = (
    String,
    i64,
    Option<i64>,
    String,
    Option<String>,
    Option<String>,
    Option<f64>,
    Option<f64>,
    i64,
);

const PROFILE_COLUMNS: &str = "id, slug, public_id, display_name, owner_id, is_public, daily_views, monthly_views, yearly_views, last_viewed_date";

fn parse_date(value: Option<String>) -> Option<NaiveDate> {
    value.and_then(|s| NaiveDate::parse_from_str(&s, "%Y-%m-%d").ok())
}

fn from_millis(ts: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ts).unwrap_or_else(Utc::now)
}

fn counter_value(value: i64) -> u32 {
    u32::try_from(value.max(0)).unwrap_or(u32::MAX)
}

fn profile_from_row(row: ProfileRow) -> Profile {
    let (id, slug, public_id, display_name, owner_id, is_public, daily, monthly, yearly, last_viewed) = row;
    Profile {
        id,
        slug,
        public_id,
        display_name,
        owner_id,
        is_public,
        counters: ViewCounters {
            daily_views: counter_value(daily),
            monthly_views: counter_value(monthly),
            yearly_views: counter_value(yearly),
            last_viewed_date: parse_date(last_viewed),
        },
    }
}

fn visit_from_row(row: VisitRow) -> Result<VisitEvent> {
    let (
        id,
        profile_id,
        visitor_id,
        device_ip,
        user_agent,
        latitude,
        longitude,
        country,
        region,
        locality,
        postal_code,
        accuracy_score,
        location_source,
        ts,
    ) = row;
    Ok(VisitEvent {
        id,
        profile_id,
        visitor_id,
        device_ip,
        user_agent,
        latitude,
        longitude,
        country,
        region,
        locality,
        postal_code,
        accuracy_score: accuracy_score.clamp(0, 100) as u8,
        location_source: location_source.parse()?,
        timestamp: from_millis(ts),
    })
}

fn click_from_row(row: ClickRow) -> ClickEvent {
    let (id, profile_id, visitor_id, button_type, device_ip, user_agent, latitude, longitude, ts) = row;
    ClickEvent {
        id,
        profile_id,
        visitor_id,
        button_type,
        device_ip,
        user_agent,
        latitude,
        longitude,
        timestamp: from_millis(ts),
    }
}

#[derive(Clone)]
pub struct Database {
    pool: Pool<Sqlite>,
}

impl Database {
    pub async fn new(config: &DatabaseConfig) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .connect(&format!("sqlite:{}?mode=rwc", config.url))
            .await?;
        Ok(Self { pool })
    }

    /// Private in-memory database; a single connection so every query sees the same data
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        let db = Self { pool };
        db.run_migrations().await?;
        Ok(db)
    }

    pub async fn run_migrations(&self) -> Result<()> {
        // Enable WAL mode for better concurrency
        sqlx::query("PRAGMA journal_mode=WAL")
            .execute(&self.pool)
            .await?;
        sqlx::query("PRAGMA synchronous=NORMAL")
            .execute(&self.pool)
            .await?;

        for statement in schema::ALL {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    pub async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    // === Profiles ===

    /// Profiles are owned by the account subsystem; this exists for seeding and tests
    pub async fn create_profile(&self, profile: &NewProfile) -> Result<Profile> {
        let public_id = uuid::Uuid::new_v4().to_string();
        let result = sqlx::query(
            "INSERT INTO profiles (slug, public_id, display_name, owner_id, is_public) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&profile.slug)
        .bind(&public_id)
        .bind(&profile.display_name)
        .bind(profile.owner_id)
        .bind(profile.is_public)
        .execute(&self.pool)
        .await?;

        let id = result.last_insert_rowid();
        self.find_profile_by_id(id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("profile {} vanished after insert", id))
    }

    pub async fn find_profile_by_id(&self, id: i64) -> Result<Option<Profile>> {
        let row: Option<ProfileRow> =
            sqlx::query_as(&format!("SELECT {} FROM profiles WHERE id = ?", PROFILE_COLUMNS))
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(profile_from_row))
    }

    pub async fn find_profile_by_slug(&self, slug: &str) -> Result<Option<Profile>> {
        let row: Option<ProfileRow> =
            sqlx::query_as(&format!("SELECT {} FROM profiles WHERE slug = ?", PROFILE_COLUMNS))
                .bind(slug)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(profile_from_row))
    }

    pub async fn find_profile_by_public_id(&self, public_id: &str) -> Result<Option<Profile>> {
        let row: Option<ProfileRow> =
            sqlx::query_as(&format!("SELECT {} FROM profiles WHERE public_id = ?", PROFILE_COLUMNS))
                .bind(public_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(profile_from_row))
    }

    /// Count one view with day/month/year rollover in a single statement.
    /// Returns `None` when the profile is missing or private.
    pub async fn record_profile_view(&self, profile_id: i64, today: NaiveDate) -> Result<Option<ViewCounters>> {
        let today = today.to_string();
        let row: Option<(i64, i64, i64, Option<String>)> = sqlx::query_as(
            r#"
            UPDATE profiles SET
                daily_views = CASE WHEN last_viewed_date = ? THEN daily_views + 1 ELSE 1 END,
                monthly_views = CASE WHEN substr(last_viewed_date, 1, 7) = substr(?, 1, 7) THEN monthly_views + 1 ELSE 1 END,
                yearly_views = CASE WHEN substr(last_viewed_date, 1, 4) = substr(?, 1, 4) THEN yearly_views + 1 ELSE 1 END,
                last_viewed_date = ?
            WHERE id = ? AND is_public = 1
            RETURNING daily_views, monthly_views, yearly_views, last_viewed_date
            "#,
        )
        .bind(&today)
        .bind(&today)
        .bind(&today)
        .bind(&today)
        .bind(profile_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|(daily, monthly, yearly, last)| ViewCounters {
            daily_views: counter_value(daily),
            monthly_views: counter_value(monthly),
            yearly_views: counter_value(yearly),
            last_viewed_date: parse_date(last),
        }))
    }

    /// Sum the counters of an account's own profile and its child profiles.
    /// Counters not touched in the current period count as zero.
    pub async fn account_summary(&self, account_id: i64, today: NaiveDate) -> Result<AccountSummary> {
        let today = today.to_string();
        let row: (i64, i64, i64, i64) = sqlx::query_as(
            r#"
            SELECT
                COUNT(*),
                COALESCE(SUM(CASE WHEN last_viewed_date = ? THEN daily_views ELSE 0 END), 0),
                COALESCE(SUM(CASE WHEN substr(last_viewed_date, 1, 7) = substr(?, 1, 7) THEN monthly_views ELSE 0 END), 0),
                COALESCE(SUM(CASE WHEN substr(last_viewed_date, 1, 4) = substr(?, 1, 4) THEN yearly_views ELSE 0 END), 0)
            FROM profiles
            WHERE id = ? OR owner_id = ?
            "#,
        )
        .bind(&today)
        .bind(&today)
        .bind(&today)
        .bind(account_id)
        .bind(account_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(AccountSummary {
            account_id,
            total_profiles: row.0,
            daily_views: row.1,
            monthly_views: row.2,
            yearly_views: row.3,
        })
    }

    // === Event writes ===

    pub async fn insert_visit(&self, event: &VisitEvent) -> Result<()> {
        let mut conn = self.pool.acquire().await?;
        insert_visit(&mut *conn, event).await
    }

    pub async fn insert_click(&self, event: &ClickEvent) -> Result<()> {
        let mut conn = self.pool.acquire().await?;
        insert_click(&mut *conn, event).await
    }

    pub async fn insert_event(&self, event: &EventRecord) -> Result<()> {
        match event {
            EventRecord::Visit(visit) => self.insert_visit(visit).await,
            EventRecord::Click(click) => self.insert_click(click).await,
        }
    }

    /// Persist a batch in one transaction
    pub async fn batch_insert_events(&self, events: &[EventRecord]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for event in events {
            match event {
                EventRecord::Visit(visit) => insert_visit(&mut *tx, visit).await?,
                EventRecord::Click(click) => insert_click(&mut *tx, click).await?,
            }
        }
        tx.commit().await?;
        Ok(())
    }

    // === Dashboard queries (always the full population of one profile) ===

    /// Changes whenever an event is appended for the profile.
    /// The logs are append-only, so row count and highest rowid identify a state.
    pub async fn event_log_watermark(&self, profile_id: i64) -> Result<EventLogWatermark> {
        let row: (i64, i64, i64, i64) = sqlx::query_as(
            r#"
            SELECT
                (SELECT COUNT(*) FROM visit_events WHERE profile_id = ?),
                (SELECT COALESCE(MAX(rowid), 0) FROM visit_events WHERE profile_id = ?),
                (SELECT COUNT(*) FROM click_events WHERE profile_id = ?),
                (SELECT COALESCE(MAX(rowid), 0) FROM click_events WHERE profile_id = ?)
            "#,
        )
        .bind(profile_id)
        .bind(profile_id)
        .bind(profile_id)
        .bind(profile_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(EventLogWatermark {
            visits: row.0,
            last_visit_row: row.1,
            clicks: row.2,
            last_click_row: row.3,
        })
    }

    pub async fn count_visits(&self, profile_id: i64) -> Result<i64> {
        let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM visit_events WHERE profile_id = ?")
            .bind(profile_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(row.0)
    }

    /// Visits carrying coordinates, whichever provider supplied them
    pub async fn count_gps_visits(&self, profile_id: i64) -> Result<i64> {
        let row: (i64,) = sqlx::query_as(
            r#"
            SELECT COUNT(*) FROM visit_events
            WHERE profile_id = ? AND latitude IS NOT NULL AND longitude IS NOT NULL
            "#,
        )
        .bind(profile_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.0)
    }

    /// Visit counts grouped by raw user agent (missing agents grouped as "")
    pub async fn user_agent_counts(&self, profile_id: i64) -> Result<Vec<(String, i64)>> {
        let rows: Vec<(String, i64)> = sqlx::query_as(
            r#"
            SELECT COALESCE(user_agent, '') AS ua, COUNT(*) AS count
            FROM visit_events
            WHERE profile_id = ?
            GROUP BY ua
            "#,
        )
        .bind(profile_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Visits per UTC calendar day in `[since, until)`, keyed `YYYY-MM-DD`
    pub async fn daily_visit_counts(
        &self,
        profile_id: i64,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<Vec<(String, i64)>> {
        let rows: Vec<(String, i64)> = sqlx::query_as(
            r#"
            SELECT date(timestamp / 1000, 'unixepoch') AS day, COUNT(*) AS count
            FROM visit_events
            WHERE profile_id = ? AND timestamp >= ? AND timestamp < ?
            GROUP BY day
            "#,
        )
        .bind(profile_id)
        .bind(since.timestamp_millis())
        .bind(until.timestamp_millis())
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn top_countries(&self, profile_id: i64, limit: u32) -> Result<Vec<CountryStat>> {
        let rows: Vec<(String, i64)> = sqlx::query_as(
            r#"
            SELECT country, COUNT(*) AS count
            FROM visit_events
            WHERE profile_id = ?
            GROUP BY country
            ORDER BY count DESC, country ASC
            LIMIT ?
            "#,
        )
        .bind(profile_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(|(country, count)| CountryStat { country, count }).collect())
    }

    pub async fn recent_visits(&self, profile_id: i64, limit: u32) -> Result<Vec<VisitEvent>> {
        let rows: Vec<VisitRow> = sqlx::query_as(
            r#"
            SELECT id, profile_id, visitor_id, device_ip, user_agent, latitude, longitude,
                   country, region, locality, postal_code, accuracy_score, location_source, timestamp
            FROM visit_events
            WHERE profile_id = ?
            ORDER BY timestamp DESC, rowid DESC
            LIMIT ?
            "#,
        )
        .bind(profile_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(visit_from_row).collect()
    }

    pub async fn recent_clicks(&self, profile_id: i64, limit: u32) -> Result<Vec<ClickEvent>> {
        let rows: Vec<ClickRow> = sqlx::query_as(
            r#"
            SELECT id, profile_id, visitor_id, button_type, device_ip, user_agent, latitude, longitude, timestamp
            FROM click_events
            WHERE profile_id = ?
            ORDER BY timestamp DESC, rowid DESC
            LIMIT ?
            "#,
        )
        .bind(profile_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(click_from_row).collect())
    }

    /// Distinct (device ip, button) pairs, most recently clicked first
    pub async fn click_pairs(&self, profile_id: i64) -> Result<Vec<(Option<String>, String)>> {
        let rows: Vec<(Option<String>, String)> = sqlx::query_as(
            r#"
            SELECT device_ip, button_type
            FROM click_events
            WHERE profile_id = ?
            GROUP BY device_ip, button_type
            ORDER BY MAX(timestamp) DESC, MAX(rowid) DESC
            "#,
        )
        .bind(profile_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn button_counts(&self, profile_id: i64) -> Result<Vec<ButtonStat>> {
        let rows: Vec<(String, i64)> = sqlx::query_as(
            r#"
            SELECT button_type, COUNT(*) AS count
            FROM click_events
            WHERE profile_id = ?
            GROUP BY button_type
            ORDER BY count DESC, button_type ASC
            "#,
        )
        .bind(profile_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(|(button_type, count)| ButtonStat { button_type, count }).collect())
    }
}

async fn insert_visit(conn: &mut SqliteConnection, event: &VisitEvent) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO visit_events (id, profile_id, visitor_id, device_ip, user_agent, latitude, longitude,
                                  country, region, locality, postal_code, accuracy_score, location_source, timestamp)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&event.id)
    .bind(event.profile_id)
    .bind(event.visitor_id)
    .bind(&event.device_ip)
    .bind(&event.user_agent)
    .bind(event.latitude)
    .bind(event.longitude)
    .bind(&event.country)
    .bind(&event.region)
    .bind(&event.locality)
    .bind(&event.postal_code)
    .bind(event.accuracy_score as i64)
    .bind(event.location_source.as_str())
    .bind(event.timestamp.timestamp_millis())
    .execute(&mut *conn)
    .await?;
    Ok(())
}

async fn insert_click(conn: &mut SqliteConnection, event: &ClickEvent) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO click_events (id, profile_id, visitor_id, button_type, device_ip, user_agent, latitude, longitude, timestamp)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&event.id)
    .bind(event.profile_id)
    .bind(event.visitor_id)
    .bind(&event.button_type)
    .bind(&event.device_ip)
    .bind(&event.user_agent)
    .bind(event.latitude)
    .bind(event.longitude)
    .bind(event.timestamp.timestamp_millis())
    .execute(&mut *conn)
    .await?;
    Ok(())
}
