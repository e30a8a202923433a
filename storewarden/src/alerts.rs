// storewarden/src/alerts.rs
//
// Alert manager. Creates an alert for every qualifying visit event (no
// dedup against open alerts for the same visitor) and owns the one-way
// operator status machine. Created alerts and status changes are appended
// as JSONL to the output directory; the in-memory store stays authoritative
// for dashboard queries.

use std::path::PathBuf;

use anyhow::Result;
use chrono::Utc;
use serde_json::json;
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tracing::info;

use crate::error::AlertError;
use crate::events::{Alert, AlertStatus, VisitEvent};
use crate::state::store::StateStore;

/// Visit score at or above which an alert is raised, on the 0–100 scale.
pub const ALERT_THRESHOLD: u8 = 50;

pub struct AlertManager {
    out: PathBuf,
}

impl AlertManager {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        let out: PathBuf = output_dir.into();
        std::fs::create_dir_all(&out).expect("Failed to create output directory");
        Self { out }
    }

    /// Raise an alert iff the event's score crosses the threshold. Every
    /// qualifying event produces a fresh alert record.
    pub async fn maybe_alert(&self, store: &StateStore, event: &VisitEvent) -> Result<Option<Alert>> {
        if event.risk.score < ALERT_THRESHOLD {
            return Ok(None);
        }

        let alert = Alert::from_event(event);
        store.insert_alert(alert.clone());

        let line = alert.to_jsonl() + "\n";
        self.write("alerts.jsonl", &line).await?;
        self.write("audit_log.jsonl", &line).await?;

        info!(
            "ALERT store={} visitor={} score={} level={}",
            alert.store_id, alert.visitor_id, alert.risk_score, event.risk.level
        );
        Ok(Some(alert))
    }

    /// Operator triage. Permitted: new -> reviewed, new -> dismissed,
    /// reviewed -> dismissed. Everything else is rejected.
    pub async fn update_status(
        &self,
        store: &StateStore,
        alert_id: &str,
        new_status: AlertStatus,
    ) -> Result<Alert, AlertError> {
        let entry = store
            .get_alert(alert_id)
            .ok_or_else(|| AlertError::NotFound(alert_id.to_string()))?;

        let updated = {
            let mut alert = entry.write();
            if !alert.status.can_transition(new_status) {
                return Err(AlertError::InvalidTransition {
                    from: alert.status,
                    to: new_status,
                });
            }
            alert.status = new_status;
            alert.clone()
        };

        let audit = json!({
            "alertId": updated.id,
            "status": updated.status,
            "changedAt": Utc::now(),
        });
        self.write("audit_log.jsonl", &(audit.to_string() + "\n")).await?;

        info!("alert {} -> {}", updated.id, updated.status);
        Ok(updated)
    }

    async fn write(&self, file: &str, content: &str) -> std::io::Result<()> {
        let mut f = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.out.join(file))
            .await?;
        f.write_all(content.as_bytes()).await?;
        Ok(())
    }
}
