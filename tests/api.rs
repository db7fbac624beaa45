use async_trait::async_trait;
use axum::{
    body::Body,
    http::{header, Request, StatusCode},
    Router,
};
use axum::extract::ConnectInfo;
use chrono::Utc;
use serde_json::Value;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

use profile_analytics::config::{
    AnalyticsConfig, AuthConfig, Config, DatabaseConfig, GeoIpConfig, GeocodingConfig, LocalityOverride,
    LoggingConfig, ServerConfig,
};
use profile_analytics::db::{start_write_buffer, Database, NewProfile, Profile};
use profile_analytics::error::GeoError;
use profile_analytics::geocoder::{Address, ReverseGeocoder};
use profile_analytics::geoip::{IpGeolocator, IpLocation};
use profile_analytics::web::{router, AppState};

struct UnreachableGeocoder;

#[async_trait]
impl ReverseGeocoder for UnreachableGeocoder {
    async fn reverse(&self, _latitude: f64, _longitude: f64) -> Result<Address, GeoError> {
        Err(GeoError::Request("connection refused".to_string()))
    }

    fn name(&self) -> &'static str {
        "Unreachable"
    }
}

struct FixedGeolocator;

#[async_trait]
impl IpGeolocator for FixedGeolocator {
    async fn locate(&self, _ip: &str) -> Result<IpLocation, GeoError> {
        Ok(IpLocation {
            country: Some("Bangladesh".to_string()),
            region: Some("Dhaka Division".to_string()),
            locality: Some("Dhaka".to_string()),
            postal_code: Some("1000".to_string()),
            latitude: Some(23.81),
            longitude: Some(90.41),
        })
    }

    fn name(&self) -> &'static str {
        "Fixed"
    }
}

fn config() -> Config {
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
        locality_overrides: vec![LocalityOverride {
            locality: "Mirzapur".to_string(),
            region: Some("Tangail District".to_string()),
            min_lat: 24.14,
            max_lat: 24.20,
            min_lon: 90.00,
            max_lon: 90.08,
        }],
    }
}

struct TestApp {
    app: Router,
    db: Database,
}

async fn setup() -> TestApp {
    setup_with(config()).await
}

async fn setup_with(config: Config) -> TestApp {
    let db = Database::in_memory().await.unwrap();
    let (write_tx, _handle) = start_write_buffer(Arc::new(db.clone()));
    let state = AppState::new(
        config,
        db.clone(),
        Arc::new(UnreachableGeocoder),
        Arc::new(FixedGeolocator),
        write_tx,
    );
    TestApp {
        app: router(Arc::new(state)).unwrap(),
        db,
    }
}

async fn profile(db: &Database, slug: &str, owner_id: Option<i64>, is_public: bool) -> Profile {
    db.create_profile(&NewProfile {
        slug: slug.to_string(),
        display_name: slug.to_string(),
        owner_id,
        is_public,
    })
    .await
    .unwrap()
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, body)
}

fn get(uri: &str) -> Request<Body> {
    Request::get(uri).body(Body::empty()).unwrap()
}

fn get_as(uri: &str, account_id: i64) -> Request<Body> {
    Request::get(uri)
        .header("x-user-id", account_id.to_string())
        .body(Body::empty())
        .unwrap()
}

fn form_post(uri: &str, body: &str) -> Request<Body> {
    Request::post(uri)
        .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
        .header("x-real-ip", "203.0.113.5")
        .header(header::USER_AGENT, "Mozilla/5.0 (iPhone; CPU iPhone OS 17_0 like Mac OS X) Mobile/15E148 Safari/604.1")
        .body(Body::from(body.to_string()))
        .unwrap()
}

/// Let the write buffer flush
async fn settle() {
    tokio::time::sleep(Duration::from_millis(600)).await;
}

#[tokio::test]
async fn precise_gps_visit_survives_geocoder_outage() {
    let t = setup().await;
    let p = profile(&t.db, "alice", None, true).await;

    let request = Request::get("/p/alice/visit?lat=24.10&lon=90.05&accuracy=8")
        .header("x-real-ip", "203.0.113.5")
        .body(Body::empty())
        .unwrap();
    let (status, body) = send(&t.app, request).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "saved");
    assert_eq!(body["source"], "GPS");
    assert_eq!(body["accuracy"], 92);
    assert_eq!(body["country"], "Unknown");

    settle().await;
    let visits = t.db.recent_visits(p.id, 10).await.unwrap();
    assert_eq!(visits.len(), 1);
    assert_eq!(visits[0].id, body["event_id"].as_str().unwrap());
    assert_eq!(visits[0].latitude, Some(24.10));
}

#[tokio::test]
async fn coarse_visit_uses_ip_location() {
    let t = setup().await;
    profile(&t.db, "alice", None, true).await;

    let (status, body) = send(&t.app, form_post("/p/alice/visit", "latitude=24.17&longitude=90.05&accuracy=500")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["source"], "IP");
    assert_eq!(body["accuracy"], 40);
    assert_eq!(body["locality"], "Dhaka");
}

#[tokio::test]
async fn override_applies_to_gps_visits() {
    let t = setup().await;
    profile(&t.db, "alice", None, true).await;

    let (_, body) = send(&t.app, get("/p/alice/visit?lat=24.17&lon=90.05&accuracy=12")).await;
    assert_eq!(body["source"], "GPS");
    assert_eq!(body["locality"], "Mirzapur");
    assert_eq!(body["region"], "Tangail District");
}

#[tokio::test]
async fn private_and_missing_profiles_are_not_found() {
    let t = setup().await;
    let hidden = profile(&t.db, "hidden", None, false).await;

    let (status, body) = send(&t.app, get("/p/hidden")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "profile_not_found");

    let (status, _) = send(&t.app, get("/p/nobody/visit")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send(&t.app, get(&format!("/id/{}", hidden.public_id))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn profile_view_counts_each_render() {
    let t = setup().await;
    profile(&t.db, "alice", None, true).await;

    send(&t.app, get("/p/alice")).await;
    let (status, body) = send(&t.app, get("/p/alice")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["counters"]["daily_views"], 2);
    assert_eq!(body["counters"]["monthly_views"], 2);
    assert_eq!(
        body["counters"]["last_viewed_date"],
        Utc::now().date_naive().format("%Y-%m-%d").to_string()
    );
}

#[tokio::test]
async fn permanent_link_redirects_to_slug() {
    let t = setup().await;
    let p = profile(&t.db, "alice", None, true).await;

    let response = t.app.clone().oneshot(get(&format!("/id/{}", p.public_id))).await.unwrap();
    assert_eq!(response.status(), StatusCode::PERMANENT_REDIRECT);
    assert_eq!(response.headers()[header::LOCATION], "/p/alice");
}

#[tokio::test]
async fn click_is_normalized_and_requires_action() {
    let t = setup().await;
    let p = profile(&t.db, "alice", None, true).await;

    let (status, body) = send(&t.app, form_post("/p/alice/click", "action=%20Connect%20")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["saved"], true);
    assert_eq!(body["action"], "connect");

    let (status, body) = send(&t.app, form_post("/p/alice/click", "lat=24.1")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "validation_error");

    settle().await;
    let clicks = t.db.recent_clicks(p.id, 10).await.unwrap();
    assert_eq!(clicks.len(), 1);
    assert_eq!(clicks[0].device_ip.as_deref(), Some("203.0.113.5"));
    assert_eq!(t.db.recent_visits(p.id, 10).await.unwrap().len(), 1);
}

#[tokio::test]
async fn click_also_counts_as_a_visit() {
    let t = setup().await;
    let p = profile(&t.db, "alice", None, true).await;

    let (status, body) = send(&t.app, form_post("/p/alice/click", "action=call&lat=24.10&lon=90.05&accuracy=8")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["action"], "call");
    assert_eq!(body["source"], "GPS");
    assert_eq!(body["accuracy"], 92);
    settle().await;

    let visits = t.db.recent_visits(p.id, 10).await.unwrap();
    assert_eq!(visits.len(), 1);
    assert_eq!(visits[0].latitude, Some(24.10));
    assert_eq!(visits[0].device_ip.as_deref(), Some("203.0.113.5"));

    let (_, body) = send(&t.app, get_as(&format!("/api/profiles/{}/dashboard", p.id), p.id)).await;
    assert_eq!(body["total_views"], 1);
    assert_eq!(body["gps_count"], 1);
    assert_eq!(body["clicks"]["tracked"]["call"], 1);
}

#[tokio::test]
async fn save_reports_device_and_source() {
    let t = setup().await;
    profile(&t.db, "alice", None, true).await;

    let (status, body) = send(&t.app, form_post("/p/alice/save", "lat=24.10&lon=90.05&accuracy=4")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["gps_used"], true);
    assert_eq!(body["source"], "GPS");
    assert_eq!(body["device"], "Mobile");
    assert_eq!(body["os"], "iOS");
    assert!(body["lead_id"].as_str().is_some());
}

#[tokio::test]
async fn dashboard_requires_owner() {
    let t = setup().await;
    let owner = profile(&t.db, "alice", None, true).await;
    let child = profile(&t.db, "acme", Some(owner.id), true).await;
    let stranger = profile(&t.db, "mallory", None, true).await;
    let uri = format!("/api/profiles/{}/dashboard", child.id);

    let (status, body) = send(&t.app, get(&uri)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "unauthorized");

    let (status, _) = send(&t.app, get_as(&uri, stranger.id)).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = send(&t.app, get_as(&uri, owner.id)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["series"].as_array().unwrap().len(), 15);

    let (status, _) = send(&t.app, get_as(&uri, child.id)).await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = send(&t.app, get_as(&format!("{}?days=0", uri), owner.id)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn dashboard_reflects_recorded_events() {
    let t = setup().await;
    let p = profile(&t.db, "alice", None, true).await;

    send(&t.app, form_post("/p/alice/visit", "lat=24.10&lon=90.05&accuracy=8")).await;
    send(&t.app, form_post("/p/alice/visit", "")).await;
    send(&t.app, form_post("/p/alice/click", "action=save")).await;
    settle().await;

    let (status, body) = send(&t.app, get_as(&format!("/api/profiles/{}/dashboard?days=3", p.id), p.id)).await;
    assert_eq!(status, StatusCode::OK);
    // The click is a visit too; the IP lookups supply coordinates
    assert_eq!(body["total_views"], 3);
    assert_eq!(body["gps_count"], 3);
    assert_eq!(body["ip_count"], 0);
    assert_eq!(body["devices"]["mobile"], 3);
    assert_eq!(body["series"].as_array().unwrap().len(), 3);
    assert_eq!(body["series"][2]["count"], 3);
    assert_eq!(body["clicks"]["tracked"]["save"], 1);
    assert_eq!(body["buttons_by_ip"]["203.0.113.5"][0], "save");
}

#[tokio::test]
async fn dashboard_shows_events_recorded_after_first_fetch() {
    let t = setup().await;
    let p = profile(&t.db, "alice", None, true).await;
    let uri = format!("/api/profiles/{}/dashboard?days=7", p.id);

    let (_, body) = send(&t.app, get_as(&uri, p.id)).await;
    assert_eq!(body["total_views"], 0);

    send(&t.app, form_post("/p/alice/visit", "")).await;
    settle().await;
    let (_, body) = send(&t.app, get_as(&uri, p.id)).await;
    assert_eq!(body["total_views"], 1);

    send(&t.app, form_post("/p/alice/click", "action=email")).await;
    settle().await;
    let (_, body) = send(&t.app, get_as(&uri, p.id)).await;
    assert_eq!(body["total_views"], 2);
    assert_eq!(body["clicks"]["tracked"]["email"], 1);
}

#[tokio::test]
async fn identity_header_needs_a_trusted_peer_when_proxies_are_listed() {
    let mut config = config();
    config.auth.trusted_proxies = vec!["10.0.0.1".parse().unwrap()];
    let t = setup_with(config).await;
    let p = profile(&t.db, "alice", None, true).await;
    let uri = format!("/api/profiles/{}/dashboard", p.id);

    let request = |peer: &str| {
        let mut request = get_as(&uri, p.id);
        request
            .extensions_mut()
            .insert(ConnectInfo(peer.parse::<SocketAddr>().unwrap()));
        request
    };

    let (status, _) = send(&t.app, get_as(&uri, p.id)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = send(&t.app, request("203.0.113.9:5555")).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = send(&t.app, request("10.0.0.1:5555")).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn account_summary_is_private_to_the_account() {
    let t = setup().await;
    let owner = profile(&t.db, "alice", None, true).await;
    profile(&t.db, "acme", Some(owner.id), true).await;

    send(&t.app, get("/p/alice")).await;
    send(&t.app, get("/p/acme")).await;
    send(&t.app, get("/p/acme")).await;

    let uri = format!("/api/accounts/{}/summary", owner.id);
    let (status, body) = send(&t.app, get_as(&uri, owner.id)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total_profiles"], 2);
    assert_eq!(body["daily_views"], 3);

    let (status, _) = send(&t.app, get_as(&uri, owner.id + 100)).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn health_reports_ok() {
    let t = setup().await;
    let (status, body) = send(&t.app, get("/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}
