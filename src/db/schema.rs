//! Database schema definitions

pub const CREATE_PROFILES_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS profiles (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    slug TEXT NOT NULL UNIQUE,
    public_id TEXT NOT NULL UNIQUE,
    display_name TEXT NOT NULL DEFAULT '',
    owner_id INTEGER REFERENCES profiles(id) ON DELETE SET NULL,
    is_public BOOLEAN NOT NULL DEFAULT 1,
    daily_views INTEGER NOT NULL DEFAULT 0,
    monthly_views INTEGER NOT NULL DEFAULT 0,
    yearly_views INTEGER NOT NULL DEFAULT 0,
    last_viewed_date TEXT                -- YYYY-MM-DD
)
"#;

// visitor_id is a weak reference: no FK, a deleted account leaves history intact
pub const CREATE_VISIT_EVENTS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS visit_events (
    id TEXT PRIMARY KEY,
    profile_id INTEGER NOT NULL REFERENCES profiles(id) ON DELETE CASCADE,
    visitor_id INTEGER,
    device_ip TEXT,
    user_agent TEXT,
    latitude REAL,
    longitude REAL,
    country TEXT NOT NULL DEFAULT 'Unknown',
    region TEXT NOT NULL DEFAULT 'Unknown',
    locality TEXT NOT NULL DEFAULT 'Unknown',
    postal_code TEXT NOT NULL DEFAULT '-',
    accuracy_score INTEGER NOT NULL,
    location_source TEXT NOT NULL CHECK (location_source IN ('GPS', 'IP')),
    timestamp BIGINT NOT NULL            -- unix millis, UTC
)
"#;

pub const CREATE_CLICK_EVENTS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS click_events (
    id TEXT PRIMARY KEY,
    profile_id INTEGER NOT NULL REFERENCES profiles(id) ON DELETE CASCADE,
    visitor_id INTEGER,
    button_type TEXT NOT NULL,
    device_ip TEXT,
    user_agent TEXT,
    latitude REAL,
    longitude REAL,
    timestamp BIGINT NOT NULL
)
"#;

// === COVERING INDEXES (dashboard queries are always scoped to one profile) ===

// Totals, time series and recent-visit listing
pub const CREATE_INDEX_VISITS_PROFILE_TS: &str =
    "CREATE INDEX IF NOT EXISTS idx_visits_profile_ts ON visit_events(profile_id, timestamp)";

// Top countries
pub const CREATE_INDEX_VISITS_PROFILE_COUNTRY: &str =
    "CREATE INDEX IF NOT EXISTS idx_visits_profile_country ON visit_events(profile_id, country)";

// Device split
pub const CREATE_INDEX_VISITS_PROFILE_UA: &str =
    "CREATE INDEX IF NOT EXISTS idx_visits_profile_ua ON visit_events(profile_id, user_agent)";

// GPS/IP split
pub const CREATE_INDEX_VISITS_PROFILE_SOURCE: &str =
    "CREATE INDEX IF NOT EXISTS idx_visits_profile_source ON visit_events(profile_id, location_source)";

// Per-IP button lists and button totals
pub const CREATE_INDEX_CLICKS_PROFILE_IP: &str =
    "CREATE INDEX IF NOT EXISTS idx_clicks_profile_ip ON click_events(profile_id, device_ip, button_type)";

pub const CREATE_INDEX_CLICKS_PROFILE_TS: &str =
    "CREATE INDEX IF NOT EXISTS idx_clicks_profile_ts ON click_events(profile_id, timestamp)";

// Account summary
pub const CREATE_INDEX_PROFILES_OWNER: &str =
    "CREATE INDEX IF NOT EXISTS idx_profiles_owner ON profiles(owner_id)";

pub const ALL: &[&str] = &[
    CREATE_PROFILES_TABLE,
    CREATE_VISIT_EVENTS_TABLE,
    CREATE_CLICK_EVENTS_TABLE,
    CREATE_INDEX_VISITS_PROFILE_TS,
    CREATE_INDEX_VISITS_PROFILE_COUNTRY,
    CREATE_INDEX_VISITS_PROFILE_UA,
    CREATE_INDEX_VISITS_PROFILE_SOURCE,
    CREATE_INDEX_CLICKS_PROFILE_IP,
    CREATE_INDEX_CLICKS_PROFILE_TS,
    CREATE_INDEX_PROFILES_OWNER,
];
