//! User-agent heuristics
//!
//! Plain substring tables, matched case-sensitively against the raw header.
//! Extend the tables rather than adding conditionals at call sites.

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum DeviceType {
    Mobile,
    Tablet,
    Desktop,
}

/// Checked before the mobile markers; an iPad UA often also says "Mobile"
const TABLET_MARKERS: &[&str] = &["iPad", "Tablet"];
const MOBILE_MARKERS: &[&str] = &["Mobile", "Android", "iPhone"];

/// First row whose markers all appear wins
const BROWSER_RULES: &[(&[&str], &str)] = &[
    (&["Edg"], "Edge"),
    (&["Chrome", "Safari"], "Chrome"),
    (&["Firefox"], "Firefox"),
    (&["Safari"], "Safari"),
];

const OS_RULES: &[(&[&str], &str)] = &[
    (&["Windows"], "Windows"),
    (&["iPhone"], "iOS"),
    (&["iPad"], "iOS"),
    (&["Android"], "Android"),
    (&["Mac OS"], "macOS"),
    (&["Macintosh"], "macOS"),
    (&["Linux"], "Linux"),
];

pub fn classify(user_agent: &str) -> DeviceType {
    if TABLET_MARKERS.iter().any(|m| user_agent.contains(m)) {
        DeviceType::Tablet
    } else if MOBILE_MARKERS.iter().any(|m| user_agent.contains(m)) {
        DeviceType::Mobile
    } else {
        DeviceType::Desktop
    }
}

fn first_match(user_agent: &str, rules: &[(&[&str], &'static str)]) -> Option<&'static str> {
    rules
        .iter()
        .find(|(markers, _)| markers.iter().all(|m| user_agent.contains(m)))
        .map(|(_, name)| *name)
}

pub fn browser(user_agent: &str) -> Option<&'static str> {
    first_match(user_agent, BROWSER_RULES)
}

pub fn operating_system(user_agent: &str) -> Option<&'static str> {
    first_match(user_agent, OS_RULES)
}

/// Device, browser and OS for the acknowledgement payloads
#[derive(Debug, Clone, Serialize)]
pub struct DeviceInfo {
    pub device: DeviceType,
    pub browser: Option<&'static str>,
    pub os: Option<&'static str>,
}

impl DeviceInfo {
    pub fn parse(user_agent: &str) -> Self {
        Self {
            device: classify(user_agent),
            browser: browser(user_agent),
            os: operating_system(user_agent),
        }
    }
}
