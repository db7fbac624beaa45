//! Location resolution for profile visits
//!
//! Chooses between the browser's GPS fix and server-side IP geolocation,
//! enriches the winner through the matching provider and normalizes the
//! result. Provider trouble never escapes this module: fields fall back to
//! "Unknown" and the visit is still recorded.

use serde::{Deserialize, Serialize};
use std::future::Future;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::accuracy::{self, GpsDecision, IP_ACCURACY_SCORE};
use crate::config::{Config, LocalityOverride};
use crate::error::GeoError;
use crate::geocoder::{Address, SharedGeocoder};
use crate::geoip::{IpLocation, SharedGeolocator};

pub const UNKNOWN: &str = "Unknown";
pub const NO_POSTAL_CODE: &str = "-";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LocationSource {
    #[serde(rename = "GPS")]
    Gps,
    #[serde(rename = "IP")]
    Ip,
}

impl LocationSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            LocationSource::Gps => "GPS",
            LocationSource::Ip => "IP",
        }
    }
}

impl FromStr for LocationSource {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "GPS" => Ok(LocationSource::Gps),
            "IP" => Ok(LocationSource::Ip),
            other => anyhow::bail!("unknown location source '{}'", other),
        }
    }
}

/// Location fields as submitted by the browser, before validation.
/// Both short and long parameter names are accepted.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawLocation {
    pub lat: Option<String>,
    pub latitude: Option<String>,
    pub lon: Option<String>,
    pub longitude: Option<String>,
    pub accuracy: Option<String>,
}

fn first_present<'a>(short: Option<&'a str>, long: Option<&'a str>) -> Option<&'a str> {
    short.filter(|s| !s.trim().is_empty()).or(long)
}

fn parse_number(raw: Option<&str>) -> Option<f64> {
    raw.map(str::trim)
        .filter(|s| !s.is_empty())
        .and_then(|s| s.parse::<f64>().ok())
        .filter(|v| v.is_finite())
}

impl RawLocation {
    pub fn latitude(&self) -> Option<f64> {
        parse_number(first_present(self.lat.as_deref(), self.latitude.as_deref())).filter(|v| (-90.0..=90.0).contains(v))
    }

    pub fn longitude(&self) -> Option<f64> {
        parse_number(first_present(self.lon.as_deref(), self.longitude.as_deref())).filter(|v| (-180.0..=180.0).contains(v))
    }

    /// Non-numeric input is treated as absent
    pub fn accuracy_meters(&self) -> Option<f64> {
        parse_number(self.accuracy.as_deref())
    }
}

/// Validated request context for one visit
#[derive(Debug, Clone, Default)]
pub struct VisitContext {
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub accuracy_meters: Option<f64>,
    pub client_ip: Option<String>,
    pub user_agent: Option<String>,
}

impl VisitContext {
    pub fn new(raw: &RawLocation, client_ip: Option<String>, user_agent: Option<String>) -> Self {
        Self {
            latitude: raw.latitude(),
            longitude: raw.longitude(),
            accuracy_meters: raw.accuracy_meters(),
            client_ip,
            user_agent,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResolvedLocation {
    pub source: LocationSource,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub country: String,
    pub region: String,
    pub locality: String,
    pub postal_code: String,
    pub accuracy_score: u8,
}

impl ResolvedLocation {
    fn unresolved(source: LocationSource, latitude: Option<f64>, longitude: Option<f64>, accuracy_score: u8) -> Self {
        Self {
            source,
            latitude,
            longitude,
            country: UNKNOWN.to_string(),
            region: UNKNOWN.to_string(),
            locality: UNKNOWN.to_string(),
            postal_code: NO_POSTAL_CODE.to_string(),
            accuracy_score,
        }
    }

    fn apply_address(&mut self, address: Address) {
        fill(&mut self.country, address.country);
        fill(&mut self.region, address.region);
        fill(&mut self.locality, address.locality);
        fill(&mut self.postal_code, address.postal_code);
    }

    fn apply_ip_location(&mut self, location: IpLocation) {
        fill(&mut self.country, location.country);
        fill(&mut self.region, location.region);
        fill(&mut self.locality, location.locality);
        fill(&mut self.postal_code, location.postal_code);
        if let (Some(lat), Some(lon)) = (location.latitude, location.longitude) {
            self.latitude = Some(lat);
            self.longitude = Some(lon);
        }
    }
}

fn fill(field: &mut String, value: Option<String>) {
    if let Some(value) = value {
        *field = value;
    }
}

#[derive(Clone)]
pub struct LocationResolver {
    geocoder: SharedGeocoder,
    geolocator: SharedGeolocator,
    overrides: Arc<Vec<LocalityOverride>>,
    geocoder_timeout: Duration,
    geoip_timeout: Duration,
}

impl LocationResolver {
    pub fn new(
        geocoder: SharedGeocoder,
        geolocator: SharedGeolocator,
        overrides: Vec<LocalityOverride>,
        geocoder_timeout: Duration,
        geoip_timeout: Duration,
    ) -> Self {
        Self {
            geocoder,
            geolocator,
            overrides: Arc::new(overrides),
            geocoder_timeout,
            geoip_timeout,
        }
    }

    pub fn from_config(config: &Config, geocoder: SharedGeocoder, geolocator: SharedGeolocator) -> Self {
        Self::new(
            geocoder,
            geolocator,
            config.locality_overrides.clone(),
            Duration::from_millis(config.geocoding.timeout_ms),
            Duration::from_millis(config.geoip.timeout_ms),
        )
    }

    pub async fn resolve(&self, ctx: &VisitContext) -> ResolvedLocation {
        let assessment = accuracy::assess(ctx.latitude, ctx.longitude, ctx.accuracy_meters);

        match (assessment.decision, ctx.latitude, ctx.longitude) {
            (GpsDecision::Accept, Some(lat), Some(lon)) => self.resolve_gps(lat, lon, assessment.score).await,
            _ => self.resolve_ip(ctx.client_ip.as_deref()).await,
        }
    }

    async fn resolve_gps(&self, lat: f64, lon: f64, score: u8) -> ResolvedLocation {
        let mut resolved = ResolvedLocation::unresolved(LocationSource::Gps, Some(lat), Some(lon), score);

        let lookup = with_timeout(self.geocoder_timeout, self.geocoder.reverse(lat, lon)).await;
        match lookup {
            Ok(address) => resolved.apply_address(address),
            Err(e) => warn!("Reverse geocoding ({}) failed for {:.4},{:.4}: {}", self.geocoder.name(), lat, lon, e),
        }

        if let Some(entry) = self.overrides.iter().find(|o| o.contains(lat, lon)) {
            debug!("Locality override '{}' applied", entry.locality);
            resolved.locality = entry.locality.clone();
            if let Some(region) = &entry.region {
                resolved.region = region.clone();
            }
        }

        resolved
    }

    async fn resolve_ip(&self, client_ip: Option<&str>) -> ResolvedLocation {
        let mut resolved = ResolvedLocation::unresolved(LocationSource::Ip, None, None, IP_ACCURACY_SCORE);

        let Some(ip) = client_ip else {
            debug!("No client IP available, location left unresolved");
            return resolved;
        };

        match with_timeout(self.geoip_timeout, self.geolocator.locate(ip)).await {
            Ok(location) => resolved.apply_ip_location(location),
            Err(GeoError::UnroutableAddress(_)) => debug!("Skipping IP lookup for unroutable address {}", ip),
            Err(e) => warn!("IP geolocation ({}) failed for {}: {}", self.geolocator.name(), ip, e),
        }

        resolved
    }
}

async fn with_timeout<T, F>(limit: Duration, call: F) -> Result<T, GeoError>
where
    F: Future<Output = Result<T, GeoError>>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => Err(GeoError::Timeout(limit.as_millis() as u64)),
    }
}


#[cfg(test)]
mod tests {
    use super::mock::*;
    use super::*;

    fn resolver(geocoder: Arc<MockGeocoder>, geolocator: Arc<MockGeolocator>) -> LocationResolver {
        LocationResolver::new(
            geocoder,
            geolocator,
            vec![LocalityOverride {
                locality: "Mirzapur".to_string(),
                region: Some("Tangail District".to_string()),
                min_lat: 24.14,
                max_lat: 24.20,
                min_lon: 90.00,
                max_lon: 90.08,
            }],
            Duration::from_millis(50),
            Duration::from_millis(50),
        )
    }

    fn gps_context(lat: f64, lon: f64, accuracy: f64) -> VisitContext {
        VisitContext {
            latitude: Some(lat),
            longitude: Some(lon),
            accuracy_meters: Some(accuracy),
            client_ip: Some("8.8.8.8".to_string()),
            user_agent: None,
        }
    }

    #[tokio::test]
    async fn gps_kept_when_geocoder_unreachable() {
        let geocoder = Arc::new(MockGeocoder::failing(GeoError::Request("connection refused".into())));
        let geolocator = Arc::new(MockGeolocator::ok(dhaka()));
        let resolved = resolver(geocoder.clone(), geolocator.clone())
            .resolve(&gps_context(24.10, 90.05, 8.0))
            .await;

        assert_eq!(resolved.source, LocationSource::Gps);
        assert_eq!(resolved.accuracy_score, 92);
        assert_eq!(resolved.country, UNKNOWN);
        assert_eq!(resolved.locality, UNKNOWN);
        assert_eq!(resolved.postal_code, NO_POSTAL_CODE);
        assert_eq!(resolved.latitude, Some(24.10));
        assert_eq!(resolved.longitude, Some(90.05));
        assert_eq!(geocoder.calls(), 1);
        assert_eq!(geolocator.calls(), 0);
    }

    #[tokio::test]
    async fn gps_enriched_by_geocoder() {
        let geocoder = Arc::new(MockGeocoder::ok(Address {
            country: Some("Bangladesh".into()),
            region: Some("Dhaka District".into()),
            locality: Some("Savar".into()),
            postal_code: None,
        }));
        let resolved = resolver(geocoder, Arc::new(MockGeolocator::ok(dhaka())))
            .resolve(&gps_context(23.85, 90.26, 4.0))
            .await;

        assert_eq!(resolved.source, LocationSource::Gps);
        assert_eq!(resolved.accuracy_score, 98);
        assert_eq!(resolved.country, "Bangladesh");
        assert_eq!(resolved.region, "Dhaka District");
        assert_eq!(resolved.locality, "Savar");
        assert_eq!(resolved.postal_code, NO_POSTAL_CODE);
    }

    #[tokio::test]
    async fn geocoder_timeout_is_a_failure() {
        let geocoder = Arc::new(MockGeocoder {
            result: Ok(Address { country: Some("Bangladesh".into()), ..Default::default() }),
            delay: Some(Duration::from_millis(500)),
            calls: Default::default(),
        });
        let resolved = resolver(geocoder, Arc::new(MockGeolocator::ok(dhaka())))
            .resolve(&gps_context(23.85, 90.26, 30.0))
            .await;

        assert_eq!(resolved.source, LocationSource::Gps);
        assert_eq!(resolved.accuracy_score, 70);
        assert_eq!(resolved.country, UNKNOWN);
    }

    #[tokio::test]
    async fn coarse_fix_falls_back_to_ip() {
        let geocoder = Arc::new(MockGeocoder::ok(Address::default()));
        let geolocator = Arc::new(MockGeolocator::failing(GeoError::Unavailable));
        let resolved = resolver(geocoder.clone(), geolocator.clone())
            .resolve(&gps_context(51.5, -0.12, 500.0))
            .await;

        assert_eq!(resolved.source, LocationSource::Ip);
        assert_eq!(resolved.latitude, None);
        assert_eq!(resolved.longitude, None);
        assert_eq!(resolved.accuracy_score, IP_ACCURACY_SCORE);
        assert_eq!(resolved.country, UNKNOWN);
        assert_eq!(geocoder.calls(), 0);
        assert_eq!(geolocator.calls(), 1);
    }

    #[tokio::test]
    async fn ip_success_uses_lookup_coordinates() {
        let geolocator = Arc::new(MockGeolocator::ok(dhaka()));
        let ctx = VisitContext { client_ip: Some("103.4.145.2".into()), ..Default::default() };
        let resolved = resolver(Arc::new(MockGeocoder::ok(Address::default())), geolocator.clone())
            .resolve(&ctx)
            .await;

        assert_eq!(resolved.source, LocationSource::Ip);
        assert_eq!(resolved.accuracy_score, IP_ACCURACY_SCORE);
        assert_eq!(resolved.country, "Bangladesh");
        assert_eq!(resolved.locality, "Dhaka");
        assert_eq!(resolved.latitude, Some(23.81));
        assert_eq!(geolocator.last_ip.lock().unwrap().as_deref(), Some("103.4.145.2"));
    }

    #[tokio::test]
    async fn browser_coordinates_never_reach_ip_path() {
        let geolocator = Arc::new(MockGeolocator::ok(IpLocation {
            country: Some("Germany".into()),
            ..Default::default()
        }));
        let resolved = resolver(Arc::new(MockGeocoder::ok(Address::default())), geolocator)
            .resolve(&gps_context(24.17, 90.05, 900.0))
            .await;

        assert_eq!(resolved.source, LocationSource::Ip);
        assert_eq!(resolved.country, "Germany");
        assert_eq!(resolved.latitude, None);
        assert_eq!(resolved.locality, UNKNOWN);
    }

    #[tokio::test]
    async fn missing_ip_skips_lookup() {
        let geolocator = Arc::new(MockGeolocator::ok(dhaka()));
        let resolved = resolver(Arc::new(MockGeocoder::ok(Address::default())), geolocator.clone())
            .resolve(&VisitContext::default())
            .await;

        assert_eq!(resolved.source, LocationSource::Ip);
        assert_eq!(resolved.country, UNKNOWN);
        assert_eq!(geolocator.calls(), 0);
    }

    #[tokio::test]
    async fn override_box_pins_locality() {
        let geocoder = Arc::new(MockGeocoder::ok(Address {
            country: Some("Bangladesh".into()),
            region: Some("Dhaka Division".into()),
            locality: Some("Gorai".into()),
            postal_code: Some("1940".into()),
        }));
        let resolved = resolver(geocoder, Arc::new(MockGeolocator::ok(dhaka())))
            .resolve(&gps_context(24.17, 90.05, 15.0))
            .await;

        assert_eq!(resolved.locality, "Mirzapur");
        assert_eq!(resolved.region, "Tangail District");
        assert_eq!(resolved.country, "Bangladesh");
        assert_eq!(resolved.postal_code, "1940");
    }

    #[test]
    fn raw_input_is_validated() {
        let raw = RawLocation {
            lat: Some("abc".into()),
            latitude: None,
            lon: None,
            longitude: Some("90.05".into()),
            accuracy: Some(" 12.5 ".into()),
        };
        assert_eq!(raw.latitude(), None);
        assert_eq!(raw.longitude(), Some(90.05));
        assert_eq!(raw.accuracy_meters(), Some(12.5));

        let out_of_range = RawLocation { lat: Some("95".into()), accuracy: Some("NaN".into()), ..Default::default() };
        assert_eq!(out_of_range.latitude(), None);
        assert_eq!(out_of_range.accuracy_meters(), None);
    }

    #[test]
    fn source_round_trips_through_text() {
        assert_eq!("GPS".parse::<LocationSource>().unwrap(), LocationSource::Gps);
        assert_eq!(LocationSource::Ip.as_str(), "IP");
        assert!("gps".parse::<LocationSource>().is_err());
        assert_eq!(serde_json::to_string(&LocationSource::Gps).unwrap(), "\"GPS\"");
    }
}
