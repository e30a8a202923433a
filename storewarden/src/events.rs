// storewarden/src/events.rs
//
// Shared domain types flowing through the engine: ingestion payloads from
// the tracking snippet, provider signal bundles, scored visit events, and
// the alert records they can raise.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ── Identifiers ───────────────────────────────────────────────────────────────
// Explicit newtypes instead of ad-hoc concatenated strings: a session key is
// never interchangeable with a visitor id, and the compiler enforces it.

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StoreId(pub String);

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VisitorId(pub String);

/// Correlation key shared by every page-view event of one browsing session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionKey(pub String);

impl std::fmt::Display for StoreId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::fmt::Display for VisitorId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::fmt::Display for SessionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for StoreId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<&str> for VisitorId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<&str> for SessionKey {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Profile key — one VisitorProfile per (store, visitor) pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VisitorKey {
    pub store: StoreId,
    pub visitor: VisitorId,
}

impl std::fmt::Display for VisitorKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.store, self.visitor)
    }
}

// ── Ingestion payload ─────────────────────────────────────────────────────────

/// One page-view report from the tracking snippet, as received on the
/// ingestion boundary. `session_key` also accepts the snippet's legacy
/// `requestId` field name.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VisitPayload {
    pub store_id: StoreId,
    pub visitor_id: VisitorId,
    #[serde(alias = "requestId")]
    pub session_key: SessionKey,
    #[serde(alias = "page", default = "default_path")]
    pub path: String,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub client_signals: Option<ClientSignals>,
}

fn default_path() -> String {
    "/".to_string()
}

/// Signals observed in the browser by the snippet itself.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ClientSignals {
    pub dev_tools_open: bool,
}

// ── Provider signal bundle ────────────────────────────────────────────────────
// The enrichment provider's response varies by which detectors are enabled
// for the account, so every slot is optional. The scoring engine reads the
// slots it knows and ignores the rest.

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SignalBundle {
    pub suspect_score: Option<SuspectScore>,
    pub bot: Option<BotDetection>,
    pub vpn: Option<DetectorResult>,
    pub proxy: Option<DetectorResult>,
    pub tor: Option<DetectorResult>,
    pub ip_info: Option<IpInfo>,
    pub incognito: Option<DetectorResult>,
    pub virtual_machine: Option<DetectorResult>,
    pub tampering: Option<TamperingResult>,
    pub cloned_app: Option<DetectorResult>,
    pub emulator: Option<DetectorResult>,
    pub rooted_device: Option<DetectorResult>,
    pub velocity: Option<VelocityResult>,
    pub high_activity: Option<HighActivityResult>,
}

/// The provider's aggregate suspicion score, on its raw 0–20 scale.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SuspectScore {
    pub result: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BotDetection {
    pub result: BotVerdict,
    #[serde(default)]
    pub bot_type: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum BotVerdict {
    #[default]
    #[serde(rename = "notDetected")]
    NotDetected,
    #[serde(rename = "good")]
    Good,
    #[serde(rename = "bad")]
    Bad,
}

/// Generic boolean detector slot (VPN, proxy, Tor, incognito, VM, ...).
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorResult {
    pub result: bool,
    pub confidence: Option<f32>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TamperingResult {
    pub result: bool,
    pub anomaly_score: Option<f32>,
    pub anti_detect_browser: Option<bool>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct IpInfo {
    pub datacenter: Option<DatacenterInfo>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DatacenterInfo {
    pub result: bool,
    pub name: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct VelocityResult {
    pub events_last_5m: Option<u32>,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HighActivityResult {
    pub result: bool,
    pub daily_requests: Option<u64>,
}

// ── Risk analysis ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    /// Operator guidance shown next to the level on the dashboard.
    pub fn recommendation(&self) -> &'static str {
        match self {
            Self::Critical => "Likely scraper or copycat. Consider blocking this visitor.",
            Self::High => "Suspicious behavior detected. Monitor closely.",
            Self::Medium => "Some risk signals present. Keep on watchlist.",
            Self::Low => "Normal visitor behavior.",
        }
    }
}

impl std::fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Low => write!(f, "low"),
            Self::Medium => write!(f, "medium"),
            Self::High => write!(f, "high"),
            Self::Critical => write!(f, "critical"),
        }
    }
}

/// One contributing signal with a fixed severity tag. Factors explain "why
/// flagged" for the operator; they never change the score.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RiskFactor {
    pub signal: String,
    pub severity: RiskLevel,
    pub detail: String,
}

/// Output of the scoring engine for one visit event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskAnalysis {
    pub score: u8,
    pub level: RiskLevel,
    pub factors: Vec<RiskFactor>,
    pub recommendation: String,
}

// ── Visit event ───────────────────────────────────────────────────────────────

/// One observed page view, enriched and scored. Immutable once created;
/// retained in a bounded per-store recent window.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VisitEvent {
    pub id: String,
    pub store_id: StoreId,
    pub visitor_id: VisitorId,
    pub session_key: SessionKey,
    pub path: String,
    pub timestamp: DateTime<Utc>,
    pub client_signals: Option<ClientSignals>,
    pub server_signals: Option<SignalBundle>,
    pub risk: RiskAnalysis,
}

impl VisitEvent {
    /// Collision-resistant event id from the identifying fields.
    pub fn generate_id(store: &StoreId, visitor: &VisitorId, ts: DateTime<Utc>) -> String {
        use sha2::{Digest, Sha256};
        let mut h = Sha256::new();
        h.update(b"sw_visit:");
        h.update(store.0.as_bytes());
        h.update(b":");
        h.update(visitor.0.as_bytes());
        h.update(ts.timestamp_nanos_opt().unwrap_or(0).to_le_bytes());
        hex::encode(&h.finalize()[..12])
    }
}

// ── Alerts ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertStatus {
    New,
    Reviewed,
    Dismissed,
}

impl AlertStatus {
    /// Legal operator transitions. One-way: `dismissed` is terminal and
    /// nothing re-opens automatically.
    pub fn can_transition(self, to: AlertStatus) -> bool {
        matches!(
            (self, to),
            (Self::New, Self::Reviewed) | (Self::New, Self::Dismissed) | (Self::Reviewed, Self::Dismissed)
        )
    }
}

impl std::fmt::Display for AlertStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::New => write!(f, "new"),
            Self::Reviewed => write!(f, "reviewed"),
            Self::Dismissed => write!(f, "dismissed"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Alert {
    pub id: String,
    pub store_id: StoreId,
    pub visitor_id: VisitorId,
    pub risk_score: u8,
    pub risk_factors: Vec<RiskFactor>,
    pub created_at: DateTime<Utc>,
    pub status: AlertStatus,
}

impl Alert {
    /// Build a `new`-status alert carrying the score and factor snapshot of
    /// the triggering event.
    pub fn from_event(event: &VisitEvent) -> Self {
        let created_at = Utc::now();
        Self {
            id: Self::generate_id(&event.store_id, &event.visitor_id, created_at),
            store_id: event.store_id.clone(),
            visitor_id: event.visitor_id.clone(),
            risk_score: event.risk.score,
            risk_factors: event.risk.factors.clone(),
            created_at,
            status: AlertStatus::New,
        }
    }

    pub fn generate_id(store: &StoreId, visitor: &VisitorId, ts: DateTime<Utc>) -> String {
        use sha2::{Digest, Sha256};
        let mut h = Sha256::new();
        h.update(b"sw_alert:");
        h.update(store.0.as_bytes());
        h.update(b":");
        h.update(visitor.0.as_bytes());
        h.update(ts.timestamp_nanos_opt().unwrap_or(0).to_le_bytes());
        hex::encode(&h.finalize()[..12])
    }

    pub fn to_jsonl(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}
