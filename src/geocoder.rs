//! Reverse geocoding of GPS fixes (Nominatim-compatible API)

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use crate::config::GeocodingConfig;
use crate::error::GeoError;

/// Region-level keys, most specific first
const REGION_KEYS: &[&str] = &["state_district", "county", "state"];

/// Locality-level keys, first non-empty wins
const LOCALITY_KEYS: &[&str] = &["town", "city", "municipality", "village", "suburb"];

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Address {
    pub country: Option<String>,
    pub region: Option<String>,
    pub locality: Option<String>,
    pub postal_code: Option<String>,
}

impl Address {
    /// Build from a Nominatim `address` object
    pub fn from_components(components: &Map<String, Value>) -> Self {
        let pick = |keys: &[&str]| {
            keys.iter()
                .filter_map(|k| components.get(*k).and_then(Value::as_str))
                .map(str::trim)
                .find(|v| !v.is_empty())
                .map(String::from)
        };

        Self {
            country: pick(&["country"]),
            region: pick(REGION_KEYS),
            locality: pick(LOCALITY_KEYS),
            postal_code: pick(&["postcode"]),
        }
    }
}

#[async_trait]
pub trait ReverseGeocoder: Send + Sync {
    async fn reverse(&self, latitude: f64, longitude: f64) -> Result<Address, GeoError>;

    fn name(&self) -> &'static str;
}

pub type SharedGeocoder = Arc<dyn ReverseGeocoder>;

pub fn from_config(config: &GeocodingConfig) -> SharedGeocoder {
    if config.reverse_url.is_empty() {
        info!("Reverse geocoding disabled");
        return Arc::new(DisabledGeocoder);
    }
    info!("Reverse geocoding via {}", config.reverse_url);
    Arc::new(NominatimGeocoder::new(config))
}

#[derive(Debug, Deserialize)]
struct NominatimResponse {
    #[serde(default)]
    address: Option<Map<String, Value>>,
    #[serde(default)]
    error: Option<String>,
}

pub struct NominatimGeocoder {
    url: String,
    user_agent: String,
    zoom: String,
    language: String,
    agent: ureq::Agent,
}

impl NominatimGeocoder {
    pub fn new(config: &GeocodingConfig) -> Self {
        let agent = ureq::Agent::config_builder()
            .timeout_global(Some(Duration::from_millis(config.timeout_ms)))
            .build()
            .into();
        Self {
            url: config.reverse_url.clone(),
            user_agent: config.user_agent.clone(),
            zoom: config.zoom.to_string(),
            language: config.language.clone(),
            agent,
        }
    }

    fn fetch(
        agent: &ureq::Agent,
        url: &str,
        user_agent: &str,
        zoom: &str,
        language: &str,
        latitude: f64,
        longitude: f64,
    ) -> Result<Address, GeoError> {
        let response = agent
            .get(url)
            .header("User-Agent", user_agent)
            .query("format", "json")
            .query("lat", latitude.to_string())
            .query("lon", longitude.to_string())
            .query("zoom", zoom)
            .query("accept-language", language)
            .query("addressdetails", "1")
            .call()
            .map_err(|e| GeoError::Request(e.to_string()))?;

        let body: NominatimResponse = response
            .into_body()
            .read_json()
            .map_err(|e| GeoError::Malformed(e.to_string()))?;

        if let Some(error) = body.error {
            debug!("Geocoder returned error: {}", error);
            return Err(GeoError::NotFound);
        }
        let components = body.address.ok_or(GeoError::NotFound)?;
        Ok(Address::from_components(&components))
    }
}

#[async_trait]
impl ReverseGeocoder for NominatimGeocoder {
    async fn reverse(&self, latitude: f64, longitude: f64) -> Result<Address, GeoError> {
        let agent = self.agent.clone();
        let url = self.url.clone();
        let user_agent = self.user_agent.clone();
        let zoom = self.zoom.clone();
        let language = self.language.clone();

        tokio::task::spawn_blocking(move || {
            Self::fetch(&agent, &url, &user_agent, &zoom, &language, latitude, longitude)
        })
        .await
        .map_err(|e| GeoError::Request(e.to_string()))?
    }

    fn name(&self) -> &'static str {
        "Nominatim"
    }
}

pub struct DisabledGeocoder;

#[async_trait]
impl ReverseGeocoder for DisabledGeocoder {
    async fn reverse(&self, _latitude: f64, _longitude: f64) -> Result<Address, GeoError> {
        Err(GeoError::Unavailable)
    }

    fn name(&self) -> &'static str {
        "Disabled"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn components(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn region_prefers_state_district() {
        let addr = Address::from_components(&components(json!({
            "country": "Bangladesh",
            "state": "Dhaka Division",
            "county": "Tangail",
            "state_district": "Tangail District",
            "town": "Mirzapur",
            "postcode": "1940"
        })));
        assert_eq!(addr.country.as_deref(), Some("Bangladesh"));
        assert_eq!(addr.region.as_deref(), Some("Tangail District"));
        assert_eq!(addr.locality.as_deref(), Some("Mirzapur"));
        assert_eq!(addr.postal_code.as_deref(), Some("1940"));
    }

    #[test]
    fn locality_skips_empty_values() {
        let addr = Address::from_components(&components(json!({
            "town": "",
            "city": "  ",
            "village": "Gorai",
            "suburb": "Ward 3"
        })));
        assert_eq!(addr.locality.as_deref(), Some("Gorai"));
        assert_eq!(addr.region, None);
        assert_eq!(addr.postal_code, None);
    }

    #[test]
    fn municipality_beats_village() {
        let addr = Address::from_components(&components(json!({
            "municipality": "Kalihati",
            "village": "Ballah",
            "state": "Dhaka Division"
        })));
        assert_eq!(addr.locality.as_deref(), Some("Kalihati"));
        assert_eq!(addr.region.as_deref(), Some("Dhaka Division"));
    }

    #[test]
    fn error_response_parses() {
        let body: NominatimResponse = serde_json::from_str(r#"{"error":"Unable to geocode"}"#).unwrap();
        assert!(body.address.is_none());
        assert_eq!(body.error.as_deref(), Some("Unable to geocode"));
    }
}
