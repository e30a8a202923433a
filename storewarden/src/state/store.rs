// storewarden/src/state/store.rs
//
// Concurrent operational state.
// DashMap = sharded concurrent HashMap — safe across tokio tasks with no
// global mutex; per-entry RwLocks serialize same-key writers while distinct
// visitors proceed in parallel.
//
// Three collections, each addressable by its own key:
//   - Sessions         keyed by session correlation key
//   - VisitorProfiles  keyed by (store, visitor)
//   - Alerts           keyed by alert id
// plus a bounded per-store window of recent visit events (the audit trail
// behind the activity feed; eviction never touches the aggregates).

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::events::{
    Alert, RiskFactor, RiskLevel, SessionKey, SignalBundle, StoreId, VisitEvent, VisitorId,
    VisitorKey,
};

/// Recent visit events retained per store, evicted oldest-first.
pub const RECENT_VISITS_PER_STORE: usize = 1000;

// ── Session ───────────────────────────────────────────────────────────────────

/// One browsing session. Exactly one record exists per correlation key; a
/// repeat event mutates it instead of creating a sibling.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub key: SessionKey,
    pub store_id: StoreId,
    pub visitor_id: VisitorId,
    /// Distinct page paths in first-seen order.
    pub pages: Vec<String>,
    pub first_activity: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
}

impl Session {
    fn new(
        key: &SessionKey,
        store: &StoreId,
        visitor: &VisitorId,
        path: &str,
        ts: DateTime<Utc>,
    ) -> Self {
        Self {
            key: key.clone(),
            store_id: store.clone(),
            visitor_id: visitor.clone(),
            pages: vec![path.to_string()],
            first_activity: ts,
            last_activity: ts,
        }
    }

    fn touch(&mut self, path: &str, ts: DateTime<Utc>) {
        if !self.pages.iter().any(|p| p == path) {
            self.pages.push(path.to_string());
        }
        if ts > self.last_activity {
            self.last_activity = ts;
        }
    }
}

// ── Visitor profile ───────────────────────────────────────────────────────────

/// Long-lived risk and activity summary for one visitor at one store.
/// Created lazily on first reference, mutated in place, never deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VisitorProfile {
    pub store_id: StoreId,
    pub visitor_id: VisitorId,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    /// Count of distinct sessions, never of visit events.
    pub session_count: u64,
    /// Distinct page paths ever visited, in first-seen order.
    pub pages_visited: Vec<String>,
    /// Monotone non-decreasing over the profile's lifetime.
    pub highest_risk_score: u8,
    /// Level and factor snapshot of the single event that set
    /// `highest_risk_score`; ties keep the earlier snapshot.
    pub risk_level: RiskLevel,
    pub risk_factors: Vec<RiskFactor>,
    pub last_signals: Option<SignalBundle>,
}

impl VisitorProfile {
    fn new(event: &VisitEvent) -> Self {
        Self {
            store_id: event.store_id.clone(),
            visitor_id: event.visitor_id.clone(),
            first_seen: event.timestamp,
            last_seen: event.timestamp,
            session_count: 0,
            pages_visited: Vec::new(),
            highest_risk_score: 0,
            risk_level: RiskLevel::Low,
            risk_factors: Vec::new(),
            last_signals: None,
        }
    }

    fn merge(&mut self, event: &VisitEvent, is_new_session: bool) {
        self.last_seen = event.timestamp;
        self.last_signals = event.server_signals.clone();

        if !self.pages_visited.iter().any(|p| p == &event.path) {
            self.pages_visited.push(event.path.clone());
        }

        if is_new_session {
            self.session_count += 1;
        }

        // Max-by-score reduction, strict greater-than. Never a sum.
        if event.risk.score > self.highest_risk_score {
            self.highest_risk_score = event.risk.score;
            self.risk_level = event.risk.level;
            self.risk_factors = event.risk.factors.clone();
        }
    }
}

// ── State store ───────────────────────────────────────────────────────────────

pub struct StateStore {
    sessions: DashMap<SessionKey, Arc<RwLock<Session>>>,
    visitors: DashMap<VisitorKey, Arc<RwLock<VisitorProfile>>>,
    alerts: DashMap<String, Arc<RwLock<Alert>>>,
    recent: DashMap<StoreId, Arc<RwLock<VecDeque<VisitEvent>>>>,

    pub total_events: AtomicU64,
    pub total_sessions: AtomicU64,
}

impl StateStore {
    pub fn new() -> Self {
        Self {
            sessions: DashMap::new(),
            visitors: DashMap::new(),
            alerts: DashMap::new(),
            recent: DashMap::new(),
            total_events: AtomicU64::new(0),
            total_sessions: AtomicU64::new(0),
        }
    }

    /// Deduplicate a visit into its session. Returns true iff this call
    /// created the Session. Check-and-create happens under the map's entry
    /// lock, so the loser of a same-key race always observes `false` against
    /// the winner's record.
    pub fn record_session(
        &self,
        key: &SessionKey,
        store: &StoreId,
        visitor: &VisitorId,
        path: &str,
        ts: DateTime<Utc>,
    ) -> bool {
        let mut created = false;
        let session = self
            .sessions
            .entry(key.clone())
            .or_insert_with(|| {
                created = true;
                Arc::new(RwLock::new(Session::new(key, store, visitor, path, ts)))
            })
            .clone();

        if created {
            self.total_sessions.fetch_add(1, Ordering::Relaxed);
        } else {
            session.write().touch(path, ts);
        }
        created
    }

    /// Append the event to the store's bounded recent window.
    pub fn push_visit(&self, event: VisitEvent) {
        self.total_events.fetch_add(1, Ordering::Relaxed);
        let window = self
            .recent
            .entry(event.store_id.clone())
            .or_insert_with(|| Arc::new(RwLock::new(VecDeque::new())))
            .clone();

        let mut w = window.write();
        w.push_back(event);
        while w.len() > RECENT_VISITS_PER_STORE {
            w.pop_front();
        }
    }

    /// Merge one scored event into the visitor's profile.
    pub fn apply_visit(&self, event: &VisitEvent, is_new_session: bool) {
        let key = VisitorKey {
            store: event.store_id.clone(),
            visitor: event.visitor_id.clone(),
        };
        let profile = self
            .visitors
            .entry(key)
            .or_insert_with(|| Arc::new(RwLock::new(VisitorProfile::new(event))))
            .clone();

        profile.write().merge(event, is_new_session);
    }

    pub fn insert_alert(&self, alert: Alert) {
        self.alerts
            .insert(alert.id.clone(), Arc::new(RwLock::new(alert)));
    }

    // ── Queries ───────────────────────────────────────────────────────────────

    pub fn get_session(&self, key: &SessionKey) -> Option<Session> {
        self.sessions.get(key).map(|s| s.read().clone())
    }

    pub fn get_profile(&self, store: &StoreId, visitor: &VisitorId) -> Option<VisitorProfile> {
        let key = VisitorKey {
            store: store.clone(),
            visitor: visitor.clone(),
        };
        self.visitors.get(&key).map(|p| p.read().clone())
    }

    pub fn profiles_for_store(&self, store: &StoreId) -> Vec<VisitorProfile> {
        self.visitors
            .iter()
            .filter(|e| &e.key().store == store)
            .map(|e| e.value().read().clone())
            .collect()
    }

    pub fn get_alert(&self, id: &str) -> Option<Arc<RwLock<Alert>>> {
        self.alerts.get(id).map(|a| a.clone())
    }

    pub fn alerts_for_store(&self, store: &StoreId) -> Vec<Alert> {
        self.alerts
            .iter()
            .map(|e| e.value().read().clone())
            .filter(|a| &a.store_id == store)
            .collect()
    }

    /// Most recent visit events for a store, newest first.
    pub fn recent_visits(&self, store: &StoreId, limit: usize) -> Vec<VisitEvent> {
        self.recent
            .get(store)
            .map(|w| w.read().iter().rev().take(limit).cloned().collect())
            .unwrap_or_default()
    }

    /// Recent visit events attributed to one visitor, newest first. Bounded
    /// by the store's retention window.
    pub fn visits_for_visitor(
        &self,
        store: &StoreId,
        visitor: &VisitorId,
        limit: usize,
    ) -> Vec<VisitEvent> {
        self.recent
            .get(store)
            .map(|w| {
                w.read()
                    .iter()
                    .rev()
                    .filter(|v| &v.visitor_id == visitor)
                    .take(limit)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn n_sessions(&self) -> usize {
        self.sessions.len()
    }

    pub fn n_visitors(&self) -> usize {
        self.visitors.len()
    }

    pub fn n_alerts(&self) -> usize {
        self.alerts.len()
    }
}

impl Default for StateStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{RiskAnalysis, RiskLevel};
    use chrono::Duration;

    fn event(store: &str, visitor: &str, session: &str, path: &str, score: u8) -> VisitEvent {
        event_at(store, visitor, session, path, score, Utc::now())
    }

    fn event_at(
        store: &str,
        visitor: &str,
        session: &str,
        path: &str,
        score: u8,
        ts: DateTime<Utc>,
    ) -> VisitEvent {
        let store_id = StoreId::from(store);
        let visitor_id = VisitorId::from(visitor);
        VisitEvent {
            id: VisitEvent::generate_id(&store_id, &visitor_id, ts),
            store_id,
            visitor_id,
            session_key: SessionKey::from(session),
            path: path.to_string(),
            timestamp: ts,
            client_signals: None,
            server_signals: None,
            risk: RiskAnalysis {
                score,
                level: crate::scoring::level_for(score),
                factors: vec![RiskFactor {
                    signal: format!("marker-{}", score),
                    severity: RiskLevel::Low,
                    detail: String::new(),
                }],
                recommendation: String::new(),
            },
        }
    }

    #[test]
    fn repeat_session_key_mutates_the_existing_record() {
        let store = StateStore::new();
        let (sid, vid, key) = (StoreId::from("s1"), VisitorId::from("v1"), SessionKey::from("r1"));
        let t0 = Utc::now();

        assert!(store.record_session(&key, &sid, &vid, "/", t0));
        assert!(!store.record_session(&key, &sid, &vid, "/pricing", t0 + Duration::seconds(5)));
        assert!(!store.record_session(&key, &sid, &vid, "/", t0 + Duration::seconds(9)));

        let session = store.get_session(&key).unwrap();
        assert_eq!(session.pages, vec!["/", "/pricing"]);
        assert_eq!(session.first_activity, t0);
        assert_eq!(session.last_activity, t0 + Duration::seconds(9));
        assert_eq!(store.n_sessions(), 1);
    }

    #[test]
    fn session_count_tracks_sessions_not_events() {
        let store = StateStore::new();
        let e1 = event("s1", "v1", "r1", "/", 10);
        let e2 = event("s1", "v1", "r1", "/a", 10);
        let e3 = event("s1", "v1", "r2", "/b", 10);

        for e in [&e1, &e2, &e3] {
            let is_new =
                store.record_session(&e.session_key, &e.store_id, &e.visitor_id, &e.path, e.timestamp);
            store.apply_visit(e, is_new);
        }

        let profile = store
            .get_profile(&StoreId::from("s1"), &VisitorId::from("v1"))
            .unwrap();
        assert_eq!(profile.session_count, 2);
        assert_eq!(profile.pages_visited, vec!["/", "/a", "/b"]);
    }

    #[test]
    fn risk_merge_is_max_by_score_with_snapshot() {
        let store = StateStore::new();
        for (session, score) in [("r1", 15u8), ("r2", 45), ("r3", 30)] {
            let e = event("s1", "v1", session, "/", score);
            let is_new =
                store.record_session(&e.session_key, &e.store_id, &e.visitor_id, &e.path, e.timestamp);
            store.apply_visit(&e, is_new);
        }

        let profile = store
            .get_profile(&StoreId::from("s1"), &VisitorId::from("v1"))
            .unwrap();
        assert_eq!(profile.session_count, 3);
        assert_eq!(profile.highest_risk_score, 45);
        assert_eq!(profile.risk_level, RiskLevel::High);
        assert_eq!(profile.risk_factors[0].signal, "marker-45");
    }

    #[test]
    fn risk_merge_tie_keeps_the_earlier_snapshot() {
        let store = StateStore::new();
        let first = event("s1", "v1", "r1", "/", 45);
        let mut tied = event("s1", "v1", "r2", "/", 45);
        tied.risk.factors[0].signal = "marker-45-later".to_string();

        store.apply_visit(&first, true);
        store.apply_visit(&tied, true);

        let profile = store
            .get_profile(&StoreId::from("s1"), &VisitorId::from("v1"))
            .unwrap();
        assert_eq!(profile.highest_risk_score, 45);
        assert_eq!(profile.risk_factors, first.risk.factors);
    }

    #[test]
    fn recent_window_is_bounded_and_newest_first() {
        let store = StateStore::new();
        for i in 0..(RECENT_VISITS_PER_STORE + 25) {
            let e = event("s1", "v1", &format!("r{}", i), &format!("/p{}", i), 0);
            store.push_visit(e);
        }

        let all = store.recent_visits(&StoreId::from("s1"), usize::MAX);
        assert_eq!(all.len(), RECENT_VISITS_PER_STORE);
        // Oldest evicted, newest first.
        assert_eq!(all[0].path, format!("/p{}", RECENT_VISITS_PER_STORE + 24));
        assert_eq!(all.last().unwrap().path, "/p25");
    }

    #[test]
    fn eviction_spares_sessions_and_profiles() {
        let store = StateStore::new();
        for i in 0..(RECENT_VISITS_PER_STORE + 10) {
            let e = event("s1", "v1", &format!("r{}", i), "/", 0);
            let is_new =
                store.record_session(&e.session_key, &e.store_id, &e.visitor_id, &e.path, e.timestamp);
            store.apply_visit(&e, is_new);
            store.push_visit(e);
        }

        assert_eq!(store.n_sessions(), RECENT_VISITS_PER_STORE + 10);
        let profile = store
            .get_profile(&StoreId::from("s1"), &VisitorId::from("v1"))
            .unwrap();
        assert_eq!(profile.session_count, (RECENT_VISITS_PER_STORE + 10) as u64);
    }

    #[test]
    fn stores_do_not_share_windows() {
        let store = StateStore::new();
        store.push_visit(event("s1", "v1", "r1", "/a", 0));
        store.push_visit(event("s2", "v2", "r2", "/b", 0));

        let s1 = store.recent_visits(&StoreId::from("s1"), 10);
        assert_eq!(s1.len(), 1);
        assert_eq!(s1[0].path, "/a");
    }
}
