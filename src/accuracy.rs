//! GPS accuracy scoring
//!
//! Maps the browser-reported accuracy radius (meters) to a 0-100 confidence
//! score and decides whether the fix is trustworthy enough to beat IP lookup.

/// Largest radius (meters) still accepted as a GPS fix
pub const MAX_GPS_RADIUS_M: f64 = 350.0;

/// Score used when no accuracy was submitted at all
pub const MISSING_ACCURACY_SCORE: u8 = 50;

/// Score assigned to every IP-sourced location
pub const IP_ACCURACY_SCORE: u8 = 40;

/// Radius ceilings and their scores, smallest radius first
const SCORE_STEPS: &[(f64, u8)] = &[(5.0, 98), (10.0, 92), (20.0, 85), (50.0, 70), (100.0, 55)];

const COARSE_SCORE: u8 = 35;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GpsDecision {
    Accept,
    Reject,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Assessment {
    pub score: u8,
    pub decision: GpsDecision,
}

/// Score a raw radius. Absent input yields the neutral score; non-finite or
/// negative radii are scored as the coarsest step.
pub fn score(raw_meters: Option<f64>) -> u8 {
    let Some(meters) = raw_meters else {
        return MISSING_ACCURACY_SCORE;
    };
    if !meters.is_finite() || meters < 0.0 {
        return COARSE_SCORE;
    }

    SCORE_STEPS
        .iter()
        .find(|(ceiling, _)| meters <= *ceiling)
        .map(|(_, score)| *score)
        .unwrap_or(COARSE_SCORE)
}

/// Decide whether a submitted fix can be used as GPS.
pub fn assess(latitude: Option<f64>, longitude: Option<f64>, raw_meters: Option<f64>) -> Assessment {
    let score = score(raw_meters);

    let usable = latitude.is_some()
        && longitude.is_some()
        && raw_meters.is_some_and(|m| m.is_finite() && (0.0..=MAX_GPS_RADIUS_M).contains(&m));

    Assessment {
        score,
        decision: if usable { GpsDecision::Accept } else { GpsDecision::Reject },
    }
}
