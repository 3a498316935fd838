//! Liveness endpoint for external uptime monitors.
//!
//! Carries no forwarding state; it only proves the process is up.

use anyhow::{Context, Result};
use axum::{routing::get, Router};
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tracing::{error, info, warn};

pub const DEFAULT_PORT: u16 = 8080;

const RUNNING_BODY: &str = "Telegram Forwarder is running!";

pub fn router() -> Router {
    Router::new()
        .route("/", get(|| async { RUNNING_BODY }))
        .route("/status", get(|| async { "OK" }))
}

/// `--port`, then `PORT`, then 8080.
pub fn port_from(flag: Option<u16>, env: &dyn Fn(&str) -> Option<String>) -> u16 {
    if let Some(port) = flag {
        return port;
    }
    match env("PORT") {
        Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
            warn!("Ignoring invalid PORT '{}', using {}", raw, DEFAULT_PORT);
            DEFAULT_PORT
        }),
        None => DEFAULT_PORT,
    }
}

pub async fn serve(listener: TcpListener) -> Result<()> {
    axum::serve(listener, router())
        .await
        .context("Keep-alive server error")
}

/// Run the server on its own task. Errors are logged and never reach the
/// forwarding loop.
pub fn spawn(port: u16) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let addr = SocketAddr::from(([0, 0, 0, 0], port));
        let listener = match TcpListener::bind(addr).await {
            Ok(listener) => listener,
            Err(e) => {
                error!("Failed to bind keep-alive server to {}: {}", addr, e);
                return;
            }
        };
        info!("Keep-alive server started on port {}", port);
        if let Err(e) = serve(listener).await {
            error!("{:#}", e);
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn start() -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(serve(listener));
        addr
    }

    #[tokio::test]
    async fn test_root_reports_running() {
        let addr = start().await;
        let resp = reqwest::get(format!("http://{}/", addr)).await.unwrap();
        assert_eq!(resp.status(), reqwest::StatusCode::OK);
        assert_eq!(resp.text().await.unwrap(), "Telegram Forwarder is running!");
    }

    #[tokio::test]
    async fn test_status_is_ok() {
        let addr = start().await;
        let resp = reqwest::get(format!("http://{}/status", addr)).await.unwrap();
        assert_eq!(resp.status(), reqwest::StatusCode::OK);
        assert_eq!(resp.text().await.unwrap(), "OK");
    }

    #[test]
    fn test_port_precedence() {
        let env = |name: &str| (name == "PORT").then(|| "9000".to_string());
        let no_env = |_: &str| -> Option<String> { None };
        let bad_env = |_: &str| Some("http".to_string());

        assert_eq!(port_from(Some(7000), &env), 7000);
        assert_eq!(port_from(None, &env), 9000);
        assert_eq!(port_from(None, &no_env), DEFAULT_PORT);
        assert_eq!(port_from(None, &bad_env), DEFAULT_PORT);
    }
}
