//! HTTP routes with response caching

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Redirect},
    Form, Json,
};
use cached::proc_macro::cached;
use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::middleware::ClientInfo;
use super::AppState;
use crate::analytics::{AnalyticsAggregator, DashboardData, MAX_WINDOW_DAYS};
use crate::counter::{AccountSummary, ViewCounters};
use crate::db::{EventLogWatermark, Profile};
use crate::device::{DeviceInfo, DeviceType};
use crate::error::AppError;
use crate::location::{LocationSource, RawLocation, ResolvedLocation, VisitContext};

fn today() -> NaiveDate {
    Utc::now().date_naive()
}

/// Public profile by slug; private profiles look missing
async fn public_profile(state: &AppState, slug: &str) -> Result<Profile, AppError> {
    match state.db.find_profile_by_slug(slug).await? {
        Some(profile) if profile.is_public => Ok(profile),
        _ => Err(AppError::ProfileNotFound),
    }
}

fn require_caller(client: &ClientInfo) -> Result<i64, AppError> {
    client.account_id.ok_or(AppError::Unauthorized)
}

#[derive(Debug, Serialize)]
pub struct PublicProfileResponse {
    pub slug: String,
    pub public_id: String,
    pub display_name: String,
    pub counters: ViewCounters,
}

/// Public profile page data; every render counts as a view
pub async fn profile_view(
    State(state): State<Arc<AppState>>,
    Path(slug): Path<String>,
) -> Result<Json<PublicProfileResponse>, AppError> {
    let profile = public_profile(&state, &slug).await?;
    let counters = state
        .counter
        .record_view(profile.id, today())
        .await
        .unwrap_or(profile.counters);

    Ok(Json(PublicProfileResponse {
        slug: profile.slug,
        public_id: profile.public_id,
        display_name: profile.display_name,
        counters,
    }))
}

/// Permanent id lookup, redirects to the slug URL
pub async fn permanent_link(
    State(state): State<Arc<AppState>>,
    Path(public_id): Path<String>,
) -> Result<Redirect, AppError> {
    match state.db.find_profile_by_public_id(&public_id).await? {
        Some(profile) if profile.is_public => Ok(Redirect::permanent(&format!("/p/{}", profile.slug))),
        _ => Err(AppError::ProfileNotFound),
    }
}

#[derive(Debug, Serialize)]
pub struct VisitAck {
    pub status: &'static str,
    pub event_id: String,
    pub source: LocationSource,
    pub accuracy: u8,
    pub country: String,
    pub region: String,
    pub locality: String,
}

async fn resolve_and_record(
    state: &AppState,
    profile: &Profile,
    client: ClientInfo,
    raw: &RawLocation,
) -> (String, ResolvedLocation, VisitContext) {
    let ctx = VisitContext::new(raw, client.ip, client.user_agent);
    let resolved = state.resolver.resolve(&ctx).await;
    let event = state.recorder.record_visit(profile, client.account_id, &resolved, &ctx);
    (event.id, resolved, ctx)
}

async fn visit(state: &AppState, slug: &str, client: ClientInfo, raw: RawLocation) -> Result<Json<VisitAck>, AppError> {
    let profile = public_profile(state, slug).await?;
    let (event_id, resolved, _) = resolve_and_record(state, &profile, client, &raw).await;

    tracing::info!(
        "Visit recorded for {} via {} ({})",
        profile.slug,
        resolved.source.as_str(),
        resolved.locality
    );

    Ok(Json(VisitAck {
        status: "saved",
        event_id,
        source: resolved.source,
        accuracy: resolved.accuracy_score,
        country: resolved.country,
        region: resolved.region,
        locality: resolved.locality,
    }))
}

/// Visit trigger, location in the query string
pub async fn visit_get(
    State(state): State<Arc<AppState>>,
    Path(slug): Path<String>,
    client: ClientInfo,
    Query(raw): Query<RawLocation>,
) -> Result<Json<VisitAck>, AppError> {
    visit(&state, &slug, client, raw).await
}

/// Visit trigger, location in a form body
pub async fn visit_post(
    State(state): State<Arc<AppState>>,
    Path(slug): Path<String>,
    client: ClientInfo,
    Form(raw): Form<RawLocation>,
) -> Result<Json<VisitAck>, AppError> {
    visit(&state, &slug, client, raw).await
}

#[derive(Debug, Deserialize)]
pub struct ClickForm {
    #[serde(default)]
    pub action: String,
    #[serde(flatten)]
    pub location: RawLocation,
}

#[derive(Debug, Serialize)]
pub struct ClickAck {
    pub saved: bool,
    pub action: String,
    pub source: LocationSource,
    pub accuracy: u8,
    pub country: String,
    pub locality: String,
}

/// Button click: the tap is also a visit, so both events are recorded
pub async fn click(
    State(state): State<Arc<AppState>>,
    Path(slug): Path<String>,
    client: ClientInfo,
    Form(form): Form<ClickForm>,
) -> Result<Json<ClickAck>, AppError> {
    if form.action.trim().is_empty() {
        return Err(AppError::Validation("action is required".to_string()));
    }

    let profile = public_profile(&state, &slug).await?;
    let caller = client.account_id;
    let (_, resolved, ctx) = resolve_and_record(&state, &profile, client, &form.location).await;
    let event = state.recorder.record_click(&profile, caller, &form.action, &ctx);

    tracing::info!("Click '{}' recorded for {}", event.button_type, profile.slug);

    Ok(Json(ClickAck {
        saved: true,
        action: event.button_type,
        source: resolved.source,
        accuracy: resolved.accuracy_score,
        country: resolved.country,
        locality: resolved.locality,
    }))
}

#[derive(Debug, Serialize)]
pub struct SaveAck {
    pub success: bool,
    pub lead_id: String,
    pub gps_used: bool,
    pub source: LocationSource,
    pub device: DeviceType,
    pub browser: Option<&'static str>,
    pub os: Option<&'static str>,
}

/// Contact save: recorded as a visit, acknowledged with the parsed device
pub async fn save_contact(
    State(state): State<Arc<AppState>>,
    Path(slug): Path<String>,
    client: ClientInfo,
    Form(raw): Form<RawLocation>,
) -> Result<Json<SaveAck>, AppError> {
    let profile = public_profile(&state, &slug).await?;
    let (lead_id, resolved, ctx) = resolve_and_record(&state, &profile, client, &raw).await;
    let info = DeviceInfo::parse(ctx.user_agent.as_deref().unwrap_or_default());

    Ok(Json(SaveAck {
        success: true,
        lead_id,
        gps_used: resolved.source == LocationSource::Gps,
        source: resolved.source,
        device: info.device,
        browser: info.browser,
        os: info.os,
    }))
}

#[derive(Debug, Deserialize)]
pub struct DashboardQuery {
    pub days: Option<u32>,
}

/// Cached dashboard - keyed on the event log watermark, so a cached entry
/// is only reused while no event has been added; bounded and expiring
#[cached(
    size = 256,
    time = 300,
    result = true,
    key = "(String, NaiveDate, u32, EventLogWatermark)",
    convert = r#"{ (profile.public_id.clone(), today, days, watermark) }"#
)]
async fn get_cached_dashboard(
    profile: Profile,
    today: NaiveDate,
    days: u32,
    watermark: EventLogWatermark,
    aggregator: AnalyticsAggregator,
) -> Result<DashboardData, AppError> {
    tracing::debug!("Building dashboard for profile {} at {:?}", profile.id, watermark);
    Ok(aggregator.build_dashboard(&profile, today, days).await?)
}

/// API: dashboard for the profile itself or its parent account
pub async fn dashboard(
    State(state): State<Arc<AppState>>,
    Path(profile_id): Path<i64>,
    client: ClientInfo,
    Query(query): Query<DashboardQuery>,
) -> Result<Json<DashboardData>, AppError> {
    let caller = require_caller(&client)?;
    let profile = state
        .db
        .find_profile_by_id(profile_id)
        .await?
        .ok_or(AppError::ProfileNotFound)?;
    if !profile.is_managed_by(caller) {
        return Err(AppError::Forbidden);
    }

    let days = query.days.unwrap_or_else(|| state.aggregator.default_window());
    if !(1..=MAX_WINDOW_DAYS).contains(&days) {
        return Err(AppError::Validation(format!(
            "days must be between 1 and {}",
            MAX_WINDOW_DAYS
        )));
    }

    let watermark = state.db.event_log_watermark(profile.id).await?;
    let data = get_cached_dashboard(profile, today(), days, watermark, state.aggregator.clone()).await?;
    Ok(Json(data))
}

/// API: view counters summed over an account and its child profiles
pub async fn account_summary(
    State(state): State<Arc<AppState>>,
    Path(account_id): Path<i64>,
    client: ClientInfo,
) -> Result<Json<AccountSummary>, AppError> {
    let caller = require_caller(&client)?;
    if caller != account_id {
        return Err(AppError::Forbidden);
    }
    if state.db.find_profile_by_id(account_id).await?.is_none() {
        return Err(AppError::ProfileNotFound);
    }

    Ok(Json(state.counter.account_summary(account_id, today()).await?))
}

pub async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match state.db.ping().await {
        Ok(()) => (StatusCode::OK, Json(serde_json::json!({ "status": "ok" }))),
        Err(e) => {
            tracing::warn!("Health check failed: {:#}", e);
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(serde_json::json!({ "status": "unavailable" })),
            )
        }
    }
}
