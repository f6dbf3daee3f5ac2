//! Read-only admin surface
//!
//! Serves typedef introspection as JSON from an embedded HTTP server running
//! on its own thread.
//!
//! # Endpoints
//!
//! - `GET /api/v1/health` - Health check
//! - `GET /api/v1/targets` - Targets with their lazy flag
//! - `GET /api/v1/targets/:name` - Dump of one target's fields

use std::collections::BTreeMap;
use std::net::{SocketAddr, TcpListener};
use std::sync::Arc;
use std::thread::JoinHandle;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::Serialize;
use tokio::sync::oneshot;
use tracing::{error, info};

use crate::config::AdminConfig;
use crate::error::TypedefError;
use crate::field::FieldDescriptor;
use crate::manager::{TargetSummary, TypedefManager};

/// API error response
#[derive(Serialize)]
pub struct ApiError {
    pub error: String,
    pub code: u16,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(self)).into_response()
    }
}

impl From<TypedefError> for ApiError {
    fn from(err: TypedefError) -> Self {
        let code = match err {
            TypedefError::TargetNotFound(_) => 404,
            TypedefError::InvalidArgument(_) => 400,
            _ => 500,
        };
        Self {
            error: err.to_string(),
            code,
        }
    }
}

/// Dump of one target
#[derive(Serialize)]
pub struct TargetDump {
    pub name: String,
    pub lazy: bool,
    pub generated_at: String,
    pub fields: BTreeMap<String, FieldDescriptor>,
}

/// GET /api/v1/health
async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

/// GET /api/v1/targets
async fn targets(State(manager): State<Arc<TypedefManager>>) -> Json<Vec<TargetSummary>> {
    Json(manager.targets())
}

/// GET /api/v1/targets/:name
async fn target(
    State(manager): State<Arc<TypedefManager>>,
    Path(name): Path<String>,
) -> Result<Json<TargetDump>, ApiError> {
    let typedef = manager.get(&name)?;
    Ok(Json(TargetDump {
        lazy: typedef.is_lazy(),
        fields: typedef.dump(),
        generated_at: chrono::Utc::now().to_rfc3339(),
        name,
    }))
}

/// API routes
pub fn router(manager: Arc<TypedefManager>) -> Router {
    Router::new()
        .route("/api/v1/health", get(health))
        .route("/api/v1/targets", get(targets))
        .route("/api/v1/targets/:name", get(target))
        .with_state(manager)
}

struct Running {
    local_addr: SocketAddr,
    shutdown: oneshot::Sender<()>,
    thread: JoinHandle<std::io::Result<()>>,
}

/// Embedded admin HTTP server
pub struct AdminServer {
    manager: Arc<TypedefManager>,
    config: AdminConfig,
    running: Option<Running>,
}

impl AdminServer {
    pub fn new(manager: Arc<TypedefManager>, config: AdminConfig) -> Self {
        Self {
            manager,
            config,
            running: None,
        }
    }

    /// Address the server is bound to, once started
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.running.as_ref().map(|r| r.local_addr)
    }

    /// Bind and start serving on a dedicated thread.
    pub fn start(&mut self) -> std::io::Result<SocketAddr> {
        if let Some(running) = &self.running {
            return Ok(running.local_addr);
        }

        let listener = TcpListener::bind(self.config.bind_addr())?;
        listener.set_nonblocking(true)?;
        let local_addr = listener.local_addr()?;

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(self.config.threads.max(1))
            .thread_name("typedefs-admin")
            .enable_all()
            .build()?;

        let app = router(Arc::clone(&self.manager));
        let (shutdown, signal) = oneshot::channel::<()>();

        let thread = std::thread::Builder::new()
            .name("typedefs-admin".to_string())
            .spawn(move || {
                runtime.block_on(async move {
                    let listener = tokio::net::TcpListener::from_std(listener)?;
                    axum::serve(listener, app)
                        .with_graceful_shutdown(async {
                            let _ = signal.await;
                        })
                        .await
                })
            })?;

        info!(
            "admin server {}:{}, {} threads",
            self.config.host, local_addr.port(), self.config.threads
        );
        self.running = Some(Running {
            local_addr,
            shutdown,
            thread,
        });
        Ok(local_addr)
    }

    /// Stop serving and wait for the server thread to finish.
    pub fn stop(&mut self) {
        let Some(running) = self.running.take() else {
            return;
        };
        let _ = running.shutdown.send(());
        match running.thread.join() {
            Ok(Ok(())) => info!("admin server stopped"),
            Ok(Err(e)) => error!(error = %e, "admin server failed"),
            Err(_) => error!("admin server thread panicked"),
        }
    }
}

impl Drop for AdminServer {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::FieldType;
    use std::io::{Read, Write};
    use std::net::TcpStream;

    fn get(addr: SocketAddr, path: &str) -> String {
        let mut stream = TcpStream::connect(addr).unwrap();
        write!(
            stream,
            "GET {} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n",
            path
        )
        .unwrap();
        let mut response = String::new();
        stream.read_to_string(&mut response).unwrap();
        response
    }

    fn test_config() -> AdminConfig {
        AdminConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
            threads: 1,
        }
    }

    #[test]
    fn test_serves_dump() {
        let manager = Arc::new(TypedefManager::new());
        manager
            .add_target("access_log", [("path", FieldType::String), ("req.id", FieldType::Long)])
            .unwrap();

        let mut server = AdminServer::new(Arc::clone(&manager), test_config());
        let addr = server.start().unwrap();
        assert_eq!(server.local_addr(), Some(addr));

        let health = get(addr, "/api/v1/health");
        assert!(health.starts_with("HTTP/1.1 200"));
        assert!(health.contains(r#""status":"ok""#));

        let targets = get(addr, "/api/v1/targets");
        assert!(targets.contains(r#""name":"access_log""#));

        let dump = get(addr, "/api/v1/targets/access_log");
        assert!(dump.contains(r#""path""#));
        assert!(dump.contains(r#""type":"hash""#));
        assert!(!dump.contains("req.id"));

        let missing = get(addr, "/api/v1/targets/nope");
        assert!(missing.starts_with("HTTP/1.1 404"));

        server.stop();
        assert!(server.local_addr().is_none());
    }

    #[test]
    fn test_stop_without_start() {
        let mut server = AdminServer::new(Arc::new(TypedefManager::new()), test_config());
        server.stop();
        assert!(server.local_addr().is_none());
    }
}
