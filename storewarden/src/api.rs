// storewarden/src/api.rs
//
// Dashboard query API.
//
// Exposes the read-only query surface (plus the alert status update) to the
// dashboard over a simple framing protocol rather than full HTTP, keeping
// the engine free of a web-server dependency. The dashboard gateway owns
// the browser-facing transport.
//
// Frame format:
//   [4 bytes little-endian length] [JSON payload]
//
// Bind address defaults to 127.0.0.1:7461.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{info, warn};

use crate::alerts::AlertManager;
use crate::error::AlertError;
use crate::events::{AlertStatus, StoreId, VisitorId};
use crate::query;
use crate::state::store::StateStore;

const MAX_FRAME: usize = 1_048_576;

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum QueryRequest {
    Dashboard {
        store_id: StoreId,
    },
    Visitors {
        store_id: StoreId,
        limit: Option<usize>,
        offset: Option<usize>,
    },
    Visitor {
        store_id: StoreId,
        visitor_id: VisitorId,
    },
    Alerts {
        store_id: StoreId,
        status: Option<AlertStatus>,
    },
    UpdateAlert {
        alert_id: String,
        status: AlertStatus,
    },
    Activity {
        store_id: StoreId,
        limit: Option<usize>,
    },
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum QueryResponse {
    Ok { data: serde_json::Value },
    NotFound { error: String },
    Error { error: String },
}

impl QueryResponse {
    fn ok<T: Serialize>(data: &T) -> Self {
        match serde_json::to_value(data) {
            Ok(v) => Self::Ok { data: v },
            Err(e) => Self::Error { error: e.to_string() },
        }
    }
}

pub struct QueryServer {
    store: Arc<StateStore>,
    alerts: Arc<AlertManager>,
    addr: SocketAddr,
}

impl QueryServer {
    pub fn new(store: Arc<StateStore>, alerts: Arc<AlertManager>, addr: SocketAddr) -> Self {
        Self { store, alerts, addr }
    }

    pub async fn serve(self: Arc<Self>) -> Result<()> {
        let listener = TcpListener::bind(self.addr).await?;
        info!("query API listening on {}", self.addr);

        loop {
            let (stream, peer) = listener.accept().await?;
            let srv = Arc::clone(&self);
            tokio::spawn(async move {
                if let Err(e) = srv.handle_connection(stream).await {
                    warn!("query connection error from {}: {}", peer, e);
                }
            });
        }
    }

    async fn handle_connection(&self, mut stream: TcpStream) -> Result<()> {
        loop {
            let mut len_buf = [0u8; 4];
            match stream.read_exact(&mut len_buf).await {
                Ok(_) => {}
                Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
                Err(e) => return Err(e.into()),
            }
            let len = u32::from_le_bytes(len_buf) as usize;
            if len > MAX_FRAME {
                anyhow::bail!("frame too large: {} bytes", len);
            }

            let mut body = vec![0u8; len];
            stream.read_exact(&mut body).await?;

            let resp = match serde_json::from_slice::<QueryRequest>(&body) {
                Ok(req) => self.dispatch(req).await,
                Err(e) => QueryResponse::Error { error: format!("bad request: {}", e) },
            };
            let resp_bytes = serde_json::to_vec(&resp)?;

            stream.write_all(&(resp_bytes.len() as u32).to_le_bytes()).await?;
            stream.write_all(&resp_bytes).await?;
        }
        Ok(())
    }

    pub async fn dispatch(&self, req: QueryRequest) -> QueryResponse {
        match req {
            QueryRequest::Dashboard { store_id } => {
                QueryResponse::ok(&query::dashboard_summary(&self.store, &store_id))
            }
            QueryRequest::Visitors { store_id, limit, offset } => QueryResponse::ok(&query::visitors(
                &self.store,
                &store_id,
                limit.unwrap_or(query::DEFAULT_VISITOR_PAGE),
                offset.unwrap_or(0),
            )),
            QueryRequest::Visitor { store_id, visitor_id } => {
                match query::visitor_detail(&self.store, &store_id, &visitor_id) {
                    Ok(detail) => QueryResponse::ok(&detail),
                    Err(e) => QueryResponse::NotFound { error: e.to_string() },
                }
            }
            QueryRequest::Alerts { store_id, status } => {
                QueryResponse::ok(&query::alerts(&self.store, &store_id, status))
            }
            QueryRequest::UpdateAlert { alert_id, status } => {
                match self.alerts.update_status(&self.store, &alert_id, status).await {
                    Ok(alert) => QueryResponse::ok(&alert),
                    Err(e @ AlertError::NotFound(_)) => QueryResponse::NotFound { error: e.to_string() },
                    Err(e) => QueryResponse::Error { error: e.to_string() },
                }
            }
            QueryRequest::Activity { store_id, limit } => QueryResponse::ok(&query::activity(
                &self.store,
                &store_id,
                limit.unwrap_or(query::DEFAULT_ACTIVITY_LIMIT),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn server() -> (Arc<QueryServer>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let srv = QueryServer::new(
            Arc::new(StateStore::new()),
            Arc::new(AlertManager::new(dir.path())),
            "127.0.0.1:0".parse().unwrap(),
        );
        (Arc::new(srv), dir)
    }

    #[tokio::test]
    async fn unknown_visitor_maps_to_not_found() {
        let (srv, _dir) = server();
        let resp = srv
            .dispatch(QueryRequest::Visitor {
                store_id: StoreId::from("s1"),
                visitor_id: VisitorId::from("ghost"),
            })
            .await;
        assert!(matches!(resp, QueryResponse::NotFound { .. }));
    }

    #[tokio::test]
    async fn dashboard_request_round_trips_as_json() {
        let (srv, _dir) = server();
        let raw = r#"{"op":"dashboard","store_id":"s1"}"#;
        let req: QueryRequest = serde_json::from_str(raw).unwrap();
        let resp = srv.dispatch(req).await;
        match resp {
            QueryResponse::Ok { data } => {
                assert_eq!(data["totalVisitors"], 0);
                assert_eq!(data["newAlerts"], 0);
            }
            other => panic!("unexpected response: {:?}", other),
        }
    }

    #[tokio::test]
    async fn update_alert_on_missing_id_is_not_found() {
        let (srv, _dir) = server();
        let resp = srv
            .dispatch(QueryRequest::UpdateAlert {
                alert_id: "missing".to_string(),
                status: AlertStatus::Reviewed,
            })
            .await;
        assert!(matches!(resp, QueryResponse::NotFound { .. }));
    }
}
