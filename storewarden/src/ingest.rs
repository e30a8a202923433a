// storewarden/src/ingest.rs
//
// Ingestion pipeline: validate → enrich → score → dedup session → merge
// profile → maybe alert. The provider call is the only external I/O and
// happens before any per-key state is touched; on provider failure the
// event continues with a null bundle.

use std::sync::Arc;

use anyhow::Context;
use chrono::Utc;
use tracing::{debug, warn};

use crate::alerts::AlertManager;
use crate::enrich::SignalProvider;
use crate::error::IngestError;
use crate::events::{Alert, VisitEvent, VisitPayload};
use crate::scoring;
use crate::state::store::StateStore;

pub struct Pipeline {
    pub store: Arc<StateStore>,
    provider: Arc<SignalProvider>,
    alerts: Arc<AlertManager>,
}

impl Pipeline {
    pub fn new(store: Arc<StateStore>, provider: Arc<SignalProvider>, alerts: Arc<AlertManager>) -> Self {
        Self { store, provider, alerts }
    }

    /// Process one visit report end to end. Returns the alert raised by this
    /// event, if any. Reprocessing the same payload is safe: session
    /// creation is idempotent and the profile merge is monotonic.
    pub async fn process(&self, payload: VisitPayload) -> Result<Option<Alert>, IngestError> {
        validate(&payload)?;

        debug!("visit store={} visitor={}", payload.store_id, payload.visitor_id);

        // Enrichment, outside any per-key lock. Degrades to no server
        // signals; never fails the event.
        let server_signals = match self.provider.lookup(&payload.session_key).await {
            Ok(bundle) => Some(bundle),
            Err(e) => {
                warn!("signal lookup failed for {}: {}", payload.session_key, e);
                None
            }
        };

        let risk = scoring::analyze(server_signals.as_ref(), payload.client_signals.as_ref());
        let timestamp = payload.timestamp.unwrap_or_else(Utc::now);

        let event = VisitEvent {
            id: VisitEvent::generate_id(&payload.store_id, &payload.visitor_id, timestamp),
            store_id: payload.store_id,
            visitor_id: payload.visitor_id,
            session_key: payload.session_key,
            path: payload.path,
            timestamp,
            client_signals: payload.client_signals,
            server_signals,
            risk,
        };

        // Locked aggregation phase, per-key only.
        let is_new_session = self.store.record_session(
            &event.session_key,
            &event.store_id,
            &event.visitor_id,
            &event.path,
            event.timestamp,
        );
        self.store.push_visit(event.clone());
        self.store.apply_visit(&event, is_new_session);

        let alert = self
            .alerts
            .maybe_alert(&self.store, &event)
            .await
            .context("alert persistence")?;
        Ok(alert)
    }
}

fn validate(payload: &VisitPayload) -> Result<(), IngestError> {
    if payload.store_id.0.trim().is_empty() {
        return Err(IngestError::Validation("storeId"));
    }
    if payload.visitor_id.0.trim().is_empty() {
        return Err(IngestError::Validation("visitorId"));
    }
    if payload.session_key.0.trim().is_empty() {
        return Err(IngestError::Validation("sessionKey"));
    }
    Ok(())
}
