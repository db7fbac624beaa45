//! Configuration management

use anyhow::Result;
use serde::Deserialize;
use std::net::IpAddr;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    #[serde(default)]
    pub geocoding: GeocodingConfig,
    #[serde(default)]
    pub geoip: GeoIpConfig,
    pub logging: LoggingConfig,
    #[serde(default)]
    pub analytics: AnalyticsConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    /// Bounding boxes whose GPS fixes are pinned to a canonical locality
    #[serde(default)]
    pub locality_overrides: Vec<LocalityOverride>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub http_port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_max_connections() -> u32 {
    8
}

/// Reverse geocoding (GPS coordinates -> address)
#[derive(Debug, Clone, Deserialize)]
pub struct GeocodingConfig {
    /// Empty disables reverse geocoding; GPS visits then keep default fields
    #[serde(default = "default_reverse_url")]
    pub reverse_url: String,
    #[serde(default = "default_geocoder_user_agent")]
    pub user_agent: String,
    /// Nominatim detail level, 18 = building
    #[serde(default = "default_zoom")]
    pub zoom: u8,
    #[serde(default = "default_language")]
    pub language: String,
    #[serde(default = "default_provider_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for GeocodingConfig {
    fn default() -> Self {
        Self {
            reverse_url: default_reverse_url(),
            user_agent: default_geocoder_user_agent(),
            zoom: default_zoom(),
            language: default_language(),
            timeout_ms: default_provider_timeout_ms(),
        }
    }
}

fn default_reverse_url() -> String {
    "https://nominatim.openstreetmap.org/reverse".to_string()
}

fn default_geocoder_user_agent() -> String {
    concat!("profile-analytics/", env!("CARGO_PKG_VERSION")).to_string()
}

fn default_zoom() -> u8 {
    18
}

fn default_language() -> String {
    "en".to_string()
}

fn default_provider_timeout_ms() -> u64 {
    3000
}

/// IP geolocation: a local MaxMind database wins over the external API
#[derive(Debug, Clone, Deserialize)]
pub struct GeoIpConfig {
    #[serde(default)]
    pub database: String,
    /// `{ip}` is replaced with the client address
    #[serde(default)]
    pub api_url: String,
    #[serde(default = "default_provider_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for GeoIpConfig {
    fn default() -> Self {
        Self {
            database: String::new(),
            api_url: String::new(),
            timeout_ms: default_provider_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AnalyticsConfig {
    #[serde(default = "default_window_days")]
    pub window_days: u32,
    #[serde(default = "default_user_agent_max_len")]
    pub user_agent_max_len: usize,
    /// Visits listed on the dashboard
    #[serde(default = "default_recent_visits")]
    pub recent_visits: u32,
    /// Visits that get a clicked-buttons lookup
    #[serde(default = "default_recent_leads")]
    pub recent_leads: u32,
    #[serde(default = "default_recent_clicks")]
    pub recent_clicks: u32,
    #[serde(default = "default_top_countries")]
    pub top_countries: u32,
    #[serde(default = "default_tracked_buttons")]
    pub tracked_buttons: Vec<String>,
}

impl Default for AnalyticsConfig {
    fn default() -> Self {
        Self {
            window_days: default_window_days(),
            user_agent_max_len: default_user_agent_max_len(),
            recent_visits: default_recent_visits(),
            recent_leads: default_recent_leads(),
            recent_clicks: default_recent_clicks(),
            top_countries: default_top_countries(),
            tracked_buttons: default_tracked_buttons(),
        }
    }
}

fn default_window_days() -> u32 {
    15
}

fn default_user_agent_max_len() -> usize {
    500
}

fn default_recent_visits() -> u32 {
    200
}

fn default_recent_leads() -> u32 {
    50
}

fn default_recent_clicks() -> u32 {
    50
}

fn default_top_countries() -> u32 {
    5
}

fn default_tracked_buttons() -> Vec<String> {
    vec!["connect".to_string(), "save".to_string(), "call".to_string()]
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    /// Header carrying the authenticated account id, set by the upstream auth proxy.
    /// The value is taken at face value: with `trusted_proxies` empty, the
    /// proxy in front of this service must strip any client-supplied copy or
    /// anyone can read any dashboard.
    #[serde(default = "default_identity_header")]
    pub identity_header: String,
    /// Peer addresses allowed to assert an identity; empty trusts every peer
    #[serde(default)]
    pub trusted_proxies: Vec<IpAddr>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            identity_header: default_identity_header(),
            trusted_proxies: Vec::new(),
        }
    }
}

fn default_identity_header() -> String {
    "x-user-id".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct LocalityOverride {
    pub locality: String,
    #[serde(default)]
    pub region: Option<String>,
    pub min_lat: f64,
    pub max_lat: f64,
    pub min_lon: f64,
    pub max_lon: f64,
}

impl LocalityOverride {
    pub fn contains(&self, lat: f64, lon: f64) -> bool {
        (self.min_lat..=self.max_lat).contains(&lat) && (self.min_lon..=self.max_lon).contains(&lon)
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let config_path =
            std::env::var("PROFILE_ANALYTICS_CONFIG").unwrap_or_else(|_| "config.toml".to_string());

        let builder = config::Config::builder()
            .add_source(config::File::with_name(&config_path))
            .add_source(config::Environment::with_prefix("PROFILE_ANALYTICS").separator("__"));

        let settings = builder.build()?;
        let config: Config = settings.try_deserialize()?;

        // Validate configuration
        config.validate()?;

        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.server.http_port == 0 {
            anyhow::bail!("Invalid http_port: 0 is not allowed");
        }
        if self.server.host.is_empty() {
            anyhow::bail!("Server host cannot be empty");
        }

        if self.database.url.is_empty() {
            anyhow::bail!("Database URL cannot be empty");
        }
        if self.database.max_connections == 0 {
            anyhow::bail!("Database max_connections must be at least 1");
        }

        if self.geocoding.timeout_ms == 0 || self.geoip.timeout_ms == 0 {
            anyhow::bail!("Provider timeouts must be greater than zero");
        }
        if !self.geoip.api_url.is_empty() && !self.geoip.api_url.contains("{ip}") {
            anyhow::bail!("geoip.api_url must contain an {{ip}} placeholder");
        }

        if self.analytics.window_days == 0 || self.analytics.window_days > 366 {
            anyhow::bail!(
                "Invalid analytics.window_days {}. Must be between 1 and 366",
                self.analytics.window_days
            );
        }
        if self.analytics.user_agent_max_len == 0 {
            anyhow::bail!("analytics.user_agent_max_len must be greater than zero");
        }

        if self.auth.identity_header.trim().is_empty() {
            anyhow::bail!("auth.identity_header cannot be empty");
        }

        for entry in &self.locality_overrides {
            if entry.locality.trim().is_empty() {
                anyhow::bail!("Locality override with an empty name");
            }
            if entry.min_lat > entry.max_lat || entry.min_lon > entry.max_lon {
                anyhow::bail!("Locality override '{}' has an inverted bounding box", entry.locality);
            }
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.to_lowercase().as_str()) {
            anyhow::bail!(
                "Invalid logging level '{}'. Must be one of: {:?}",
                self.logging.level,
                valid_levels
            );
        }

        Ok(())
    }
}

#[cfg(test)]
pub(crate) fn test_config() -> Config {
    Config {
        server: ServerConfig {
            host: "127.0.0.1".to_string(),
            http_port: 8080,
        },
        database: DatabaseConfig {
            url: ":memory:".to_string(),
            max_connections: 1,
        },
        geocoding: GeocodingConfig::default(),
        geoip: GeoIpConfig::default(),
        logging: LoggingConfig {
            level: "info".to_string(),
        },
        analytics: AnalyticsConfig::default(),
        auth: AuthConfig::default(),
        locality_overrides: Vec::new(),
    }
}
