//! IP geolocation providers
//!
//! A local MaxMind GeoLite2 City database is preferred. Without one, an
//! external JSON API (ip-api.com format) is used; with neither, every lookup
//! fails and visits fall back to "Unknown".

use async_trait::async_trait;
use maxminddb::{geoip2, Reader};
use serde::Deserialize;
use std::net::IpAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::GeoIpConfig;
use crate::error::GeoError;

/// IP lookup result; every field may be missing
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IpLocation {
    pub country: Option<String>,
    pub region: Option<String>,
    pub locality: Option<String>,
    pub postal_code: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

#[async_trait]
pub trait IpGeolocator: Send + Sync {
    async fn locate(&self, ip: &str) -> Result<IpLocation, GeoError>;

    fn name(&self) -> &'static str;
}

pub type SharedGeolocator = Arc<dyn IpGeolocator>;

/// Pick a provider from configuration
pub fn from_config(config: &GeoIpConfig) -> SharedGeolocator {
    if !config.database.is_empty() {
        match MaxMindGeolocator::open(&config.database) {
            Ok(provider) => {
                info!("GeoIP database loaded: {}", config.database);
                return Arc::new(provider);
            }
            Err(e) => warn!("Failed to load GeoIP database {}: {}", config.database, e),
        }
    }

    if !config.api_url.is_empty() {
        info!("GeoIP using external API");
        return Arc::new(ExternalApiGeolocator::new(&config.api_url, Duration::from_millis(config.timeout_ms)));
    }

    warn!("GeoIP disabled: no database or API configured");
    Arc::new(DisabledGeolocator)
}

fn parse_public_ip(ip: &str) -> Result<IpAddr, GeoError> {
    let addr: IpAddr = ip
        .trim()
        .parse()
        .map_err(|_| GeoError::UnroutableAddress(ip.to_string()))?;
    if is_private_ip(&addr) {
        return Err(GeoError::UnroutableAddress(ip.to_string()));
    }
    Ok(addr)
}

/// Check if an IP address is private/local
fn is_private_ip(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(ipv4) => {
            ipv4.is_private()
                || ipv4.is_loopback()
                || ipv4.is_link_local()
                || ipv4.is_broadcast()
                || ipv4.is_documentation()
                || ipv4.is_unspecified()
        }
        IpAddr::V6(ipv6) => {
            ipv6.is_loopback()
                || ipv6.is_unspecified()
                || (ipv6.segments()[0] & 0xfe00) == 0xfc00
                || (ipv6.segments()[0] & 0xffc0) == 0xfe80
        }
    }
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value.map(str::trim).filter(|s| !s.is_empty()).map(String::from)
}

/// MaxMind GeoLite2 City reader
pub struct MaxMindGeolocator {
    reader: Reader<Vec<u8>>,
}

impl MaxMindGeolocator {
    pub fn open(database_path: &str) -> anyhow::Result<Self> {
        let path = Path::new(database_path);
        if !path.exists() {
            anyhow::bail!("GeoIP database not found at: {}", database_path);
        }
        let reader = Reader::open_readfile(path)?;
        Ok(Self { reader })
    }
}

#[async_trait]
impl IpGeolocator for MaxMindGeolocator {
    async fn locate(&self, ip: &str) -> Result<IpLocation, GeoError> {
        let ip_addr = parse_public_ip(ip)?;

        let result = self
            .reader
            .lookup(ip_addr)
            .map_err(|e| GeoError::Malformed(e.to_string()))?;
        let city: geoip2::City = result
            .decode()
            .map_err(|e| GeoError::Malformed(e.to_string()))?
            .ok_or(GeoError::NotFound)?;

        Ok(IpLocation {
            country: non_empty(city.country.names.english),
            region: city.subdivisions.first().and_then(|s| non_empty(s.names.english)),
            locality: non_empty(city.city.names.english),
            postal_code: non_empty(city.postal.code),
            latitude: city.location.latitude,
            longitude: city.location.longitude,
        })
    }

    fn name(&self) -> &'static str {
        "MaxMind"
    }
}

/// ip-api.com response shape
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IpApiResponse {
    status: Option<String>,
    message: Option<String>,
    country: Option<String>,
    region_name: Option<String>,
    city: Option<String>,
    zip: Option<String>,
    lat: Option<f64>,
    lon: Option<f64>,
}

impl IpApiResponse {
    fn into_location(self) -> Result<IpLocation, GeoError> {
        if self.status.as_deref() == Some("fail") {
            return Err(GeoError::Request(self.message.unwrap_or_else(|| "fail".to_string())));
        }
        Ok(IpLocation {
            country: non_empty(self.country.as_deref()),
            region: non_empty(self.region_name.as_deref()),
            locality: non_empty(self.city.as_deref()),
            postal_code: non_empty(self.zip.as_deref()),
            latitude: self.lat,
            longitude: self.lon,
        })
    }
}

/// External JSON API provider
pub struct ExternalApiGeolocator {
    url_template: String,
    agent: ureq::Agent,
}

impl ExternalApiGeolocator {
    pub fn new(url_template: &str, timeout: Duration) -> Self {
        let agent = ureq::Agent::config_builder()
            .timeout_global(Some(timeout))
            .build()
            .into();
        Self {
            url_template: url_template.to_string(),
            agent,
        }
    }

    fn fetch(agent: &ureq::Agent, url: &str) -> Result<IpLocation, GeoError> {
        let response = agent
            .get(url)
            .call()
            .map_err(|e| GeoError::Request(e.to_string()))?;
        let body: IpApiResponse = response
            .into_body()
            .read_json()
            .map_err(|e| GeoError::Malformed(e.to_string()))?;
        body.into_location()
    }
}

#[async_trait]
impl IpGeolocator for ExternalApiGeolocator {
    async fn locate(&self, ip: &str) -> Result<IpLocation, GeoError> {
        let ip_addr = parse_public_ip(ip)?;
        let url = self.url_template.replace("{ip}", &ip_addr.to_string());
        let agent = self.agent.clone();

        debug!("GeoIP API lookup for {}", ip_addr);
        tokio::task::spawn_blocking(move || Self::fetch(&agent, &url))
            .await
            .map_err(|e| GeoError::Request(e.to_string()))?
    }

    fn name(&self) -> &'static str {
        "ExternalAPI"
    }
}

pub struct DisabledGeolocator;

#[async_trait]
impl IpGeolocator for DisabledGeolocator {
    async fn locate(&self, _ip: &str) -> Result<IpLocation, GeoError> {
        Err(GeoError::Unavailable)
    }

    fn name(&self) -> &'static str {
        "Disabled"
    }
}
