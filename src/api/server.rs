//! API server lifecycle: bind → spawn background task → return a handle
//! with a shutdown channel.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::api::router::api_router;
use crate::core_state::CoreState;

/// Handle to a running API server.
pub struct ApiServer {
    pub addr: SocketAddr,
    /// RFC 3339 start time.
    pub started_at: String,
    shutdown_tx: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl ApiServer {
    /// Ask the server to stop accepting connections and drain.
    pub fn shutdown(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
            tracing::info!("API server shutdown signal sent");
        }
    }

    /// Wait until the server task has exited.
    pub async fn stopped(self) {
        if let Err(e) = self.task.await {
            tracing::error!("API server task failed: {e}");
        }
    }
}

pub async fn start_api_server(core: Arc<CoreState>, bind: SocketAddr) -> Result<ApiServer, String> {
    let listener = tokio::net::TcpListener::bind(bind)
        .await
        .map_err(|e| format!("Failed to bind API server on {bind}: {e}"))?;
    let addr = listener
        .local_addr()
        .map_err(|e| format!("Failed to get server address: {e}"))?;

    let app = api_router(core);
    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

    let task = tokio::spawn(async move {
        let shutdown_signal = async move {
            let _ = shutdown_rx.await;
            tracing::info!("API server received shutdown signal");
        };

        tracing::info!(%addr, "API server started");

        if let Err(e) = axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal)
            .await
        {
            tracing::error!("API server error: {e}");
        }

        tracing::info!("API server stopped");
    });

    Ok(ApiServer {
        addr,
        started_at: chrono::Utc::now().to_rfc3339(),
        shutdown_tx: Some(shutdown_tx),
        task,
    })
}

/// Serve until Ctrl-C.
pub async fn serve_until_ctrl_c(core: Arc<CoreState>, bind: SocketAddr) -> Result<(), String> {
    let mut server = start_api_server(core, bind).await?;
    tokio::signal::ctrl_c()
        .await
        .map_err(|e| format!("Failed to listen for Ctrl-C: {e}"))?;
    server.shutdown();
    server.stopped().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::router::tests::{stub_core, EchoCompletion};
    use std::net::{IpAddr, Ipv4Addr};

    fn localhost() -> SocketAddr {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 0)
    }

    #[tokio::test]
    async fn start_serve_and_stop() {
        let core = stub_core(Arc::new(EchoCompletion { code: "I10" }));
        let mut server = start_api_server(core, localhost()).await.expect("server should start");
        assert!(server.addr.port() > 0);
        assert!(chrono::DateTime::parse_from_rfc3339(&server.started_at).is_ok());

        let client = reqwest::Client::new();
        let health: serde_json::Value = client
            .get(format!("http://{}/health", server.addr))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(health["status"], "ok");

        let response = client
            .post(format!("http://{}/process_note", server.addr))
            .json(&serde_json::json!({"note": "Hypertension, cough."}))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::OK);
        let body: serde_json::Value = response.json().await.unwrap();
        assert_eq!(body["icd10_codes"][0]["code"], "I10");

        server.shutdown();
        server.stopped().await;
    }

    #[tokio::test]
    async fn bind_conflict_reports_error() {
        let core = stub_core(Arc::new(EchoCompletion { code: "I10" }));
        let mut first = start_api_server(core.clone(), localhost()).await.unwrap();
        let err = start_api_server(core, first.addr).await.err().unwrap();
        assert!(err.contains("Failed to bind"));
        first.shutdown();
    }
}
