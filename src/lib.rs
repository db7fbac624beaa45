//! Visitor engagement and location analytics for public profiles
//!
//! Records profile visits and button clicks with a best-effort location
//! (browser GPS when it is precise enough, IP geolocation otherwise), keeps
//! per-profile view counters and serves owner dashboards.

pub mod accuracy;
pub mod analytics;
pub mod config;
pub mod counter;
pub mod db;
pub mod device;
pub mod error;
pub mod geocoder;
pub mod geoip;
pub mod location;
pub mod recorder;
pub mod web;
