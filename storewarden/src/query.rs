// storewarden/src/query.rs
//
// Read-only projections over the state store, consumed by the dashboard.
// Non-mutating; each read reflects a consistent snapshot of committed state.

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::error::QueryError;
use crate::events::{Alert, AlertStatus, StoreId, VisitEvent, VisitorId};
use crate::scoring::HIGH_AT;
use crate::state::store::{StateStore, VisitorProfile};

pub const DEFAULT_VISITOR_PAGE: usize = 50;
pub const DEFAULT_ACTIVITY_LIMIT: usize = 20;
const DETAIL_VISIT_LIMIT: usize = 50;
const SUMMARY_TOP_N: usize = 5;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardSummary {
    pub total_visitors: usize,
    pub visits_today: usize,
    pub critical_threats: usize,
    pub high_risk_visitors: usize,
    pub new_alerts: usize,
    pub recent_visitors: Vec<VisitorProfile>,
    pub top_threats: Vec<VisitorProfile>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VisitorDetail {
    #[serde(flatten)]
    pub profile: VisitorProfile,
    pub visits: Vec<VisitEvent>,
}

pub fn dashboard_summary(store: &StateStore, store_id: &StoreId) -> DashboardSummary {
    let profiles = store.profiles_for_store(store_id);
    let alerts = store.alerts_for_store(store_id);

    let today = Utc::now()
        .date_naive()
        .and_hms_opt(0, 0, 0)
        .map(|t| t.and_utc());
    let visits_today = match today {
        Some(midnight) => store
            .recent_visits(store_id, usize::MAX)
            .iter()
            .filter(|v| v.timestamp >= midnight)
            .count(),
        None => 0,
    };

    let critical_threats = profiles
        .iter()
        .filter(|p| p.risk_level == crate::events::RiskLevel::Critical)
        .count();
    let high_risk_visitors = profiles
        .iter()
        .filter(|p| p.risk_level == crate::events::RiskLevel::High)
        .count();
    let new_alerts = alerts.iter().filter(|a| a.status == AlertStatus::New).count();

    let mut recent = profiles.clone();
    recent.sort_by(|a, b| b.last_seen.cmp(&a.last_seen));
    recent.truncate(SUMMARY_TOP_N);

    let mut threats: Vec<VisitorProfile> = profiles
        .iter()
        .filter(|p| p.highest_risk_score >= HIGH_AT)
        .cloned()
        .collect();
    threats.sort_by(|a, b| b.highest_risk_score.cmp(&a.highest_risk_score));
    threats.truncate(SUMMARY_TOP_N);

    DashboardSummary {
        total_visitors: profiles.len(),
        visits_today,
        critical_threats,
        high_risk_visitors,
        new_alerts,
        recent_visitors: recent,
        top_threats: threats,
    }
}

/// Visitor list for a store, highest risk first, paged.
pub fn visitors(
    store: &StateStore,
    store_id: &StoreId,
    limit: usize,
    offset: usize,
) -> Vec<VisitorProfile> {
    let mut profiles = store.profiles_for_store(store_id);
    profiles.sort_by(|a, b| {
        b.highest_risk_score
            .cmp(&a.highest_risk_score)
            .then_with(|| b.last_seen.cmp(&a.last_seen))
    });
    profiles.into_iter().skip(offset).take(limit).collect()
}

/// Single visitor: profile plus its recent visit events.
pub fn visitor_detail(
    store: &StateStore,
    store_id: &StoreId,
    visitor_id: &VisitorId,
) -> Result<VisitorDetail, QueryError> {
    let profile = store
        .get_profile(store_id, visitor_id)
        .ok_or(QueryError::VisitorNotFound)?;
    let visits = store.visits_for_visitor(store_id, visitor_id, DETAIL_VISIT_LIMIT);
    Ok(VisitorDetail { profile, visits })
}

/// Alerts for a store, newest first, optionally filtered by status.
pub fn alerts(store: &StateStore, store_id: &StoreId, status: Option<AlertStatus>) -> Vec<Alert> {
    let mut list: Vec<Alert> = store
        .alerts_for_store(store_id)
        .into_iter()
        .filter(|a| status.map(|s| a.status == s).unwrap_or(true))
        .collect();
    list.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    list
}

/// Recency-ordered live activity feed.
pub fn activity(store: &StateStore, store_id: &StoreId, limit: usize) -> Vec<VisitEvent> {
    store.recent_visits(store_id, limit)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{RiskAnalysis, RiskFactor, RiskLevel, SessionKey};
    use crate::scoring::level_for;
    use chrono::{DateTime, Duration};

    fn seed_visit(store: &StateStore, visitor: &str, session: &str, score: u8, ts: DateTime<Utc>) {
        let store_id = StoreId::from("s1");
        let visitor_id = VisitorId::from(visitor);
        let event = VisitEvent {
            id: VisitEvent::generate_id(&store_id, &visitor_id, ts),
            store_id,
            visitor_id,
            session_key: SessionKey::from(session),
            path: "/".to_string(),
            timestamp: ts,
            client_signals: None,
            server_signals: None,
            risk: RiskAnalysis {
                score,
                level: level_for(score),
                factors: Vec::<RiskFactor>::new(),
                recommendation: String::new(),
            },
        };
        let is_new = store.record_session(
            &event.session_key,
            &event.store_id,
            &event.visitor_id,
            &event.path,
            event.timestamp,
        );
        store.push_visit(event.clone());
        store.apply_visit(&event, is_new);
    }

    fn seeded() -> StateStore {
        let store = StateStore::new();
        let now = Utc::now();
        seed_visit(&store, "calm", "r1", 5, now - Duration::minutes(50));
        seed_visit(&store, "watch", "r2", 25, now - Duration::minutes(40));
        seed_visit(&store, "shady", "r3", 45, now - Duration::minutes(30));
        seed_visit(&store, "hostile", "r4", 80, now - Duration::minutes(20));
        store
    }

    #[test]
    fn visitors_are_sorted_by_risk_descending_and_paged() {
        let store = seeded();
        let sid = StoreId::from("s1");

        let page = visitors(&store, &sid, 50, 0);
        let order: Vec<&str> = page.iter().map(|p| p.visitor_id.0.as_str()).collect();
        assert_eq!(order, vec!["hostile", "shady", "watch", "calm"]);

        let second = visitors(&store, &sid, 2, 2);
        assert_eq!(second.len(), 2);
        assert_eq!(second[0].visitor_id.0, "watch");
    }

    #[test]
    fn summary_counts_and_top_lists() {
        let store = seeded();
        let summary = dashboard_summary(&store, &StoreId::from("s1"));

        assert_eq!(summary.total_visitors, 4);

        // Seeds lie within the last hour; unless the test straddles midnight
        // UTC they all count as today.
        let midnight = Utc::now().date_naive().and_hms_opt(0, 0, 0).unwrap().and_utc();
        let expected_today = [50i64, 40, 30, 20]
            .iter()
            .filter(|m| Utc::now() - Duration::minutes(**m) >= midnight)
            .count();
        assert_eq!(summary.visits_today, expected_today);
        assert_eq!(summary.critical_threats, 1);
        assert_eq!(summary.high_risk_visitors, 1);

        // Cutoff at the high tier: 45 and 80 qualify, 25 does not.
        let threats: Vec<&str> = summary
            .top_threats
            .iter()
            .map(|p| p.visitor_id.0.as_str())
            .collect();
        assert_eq!(threats, vec!["hostile", "shady"]);

        // Most recently seen first.
        assert_eq!(summary.recent_visitors[0].visitor_id.0, "hostile");
    }

    #[test]
    fn unknown_visitor_is_not_found() {
        let store = seeded();
        let err = visitor_detail(&store, &StoreId::from("s1"), &VisitorId::from("ghost"));
        assert!(matches!(err, Err(QueryError::VisitorNotFound)));
    }

    #[test]
    fn visitor_detail_includes_recent_visits() {
        let store = seeded();
        let detail =
            visitor_detail(&store, &StoreId::from("s1"), &VisitorId::from("hostile")).unwrap();
        assert_eq!(detail.profile.highest_risk_score, 80);
        assert_eq!(detail.visits.len(), 1);
        assert_eq!(detail.visits[0].risk.score, 80);
    }

    #[test]
    fn activity_feed_is_newest_first_and_bounded() {
        let store = seeded();
        let feed = activity(&store, &StoreId::from("s1"), 2);
        assert_eq!(feed.len(), 2);
        assert_eq!(feed[0].visitor_id.0, "hostile");
        assert_eq!(feed[1].visitor_id.0, "shady");
    }
}
