// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Server process
//!
//! Handles:
//! - Service wiring and the HTTP listener (`server`)
//! - The HTTP client the CLI commands use (`client`)
//! - Health checks

use anyhow::Result;
use std::time::Duration;

pub mod client;
pub mod server;

pub use client::AtlasClient;
pub use server::start_server;

#[derive(Debug, Clone)]
pub enum ServerStatus {
    Running { uptime: Option<u64> },
    Stopped,
    Unhealthy { error: String },
}

pub fn base_url(host: &str, port: u16) -> String {
    if host.starts_with("http://") || host.starts_with("https://") {
        format!("{}:{}", host.trim_end_matches('/'), port)
    } else {
        format!("http://{}:{}", host, port)
    }
}

/// Check `GET /health` with a short timeout
pub async fn check_server_running(host: &str, port: u16) -> Result<ServerStatus> {
    let client = reqwest::Client::builder()
        .timeout(Duration::from_millis(500))
        .build()?;

    let health_url = format!("{}/health", base_url(host, port));
    match client.get(&health_url).send().await {
        Ok(resp) if resp.status().is_success() => {
            let uptime = resp
                .json::<serde_json::Value>()
                .await
                .ok()
                .and_then(|v| v["uptime_seconds"].as_u64());
            Ok(ServerStatus::Running { uptime })
        }
        Ok(resp) => Ok(ServerStatus::Unhealthy {
            error: format!("HTTP {}", resp.status()),
        }),
        Err(e) if e.is_connect() || e.is_timeout() => Ok(ServerStatus::Stopped),
        Err(e) => Ok(ServerStatus::Unhealthy { error: e.to_string() }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url() {
        assert_eq!(base_url("127.0.0.1", 8000), "http://127.0.0.1:8000");
        assert_eq!(base_url("https://atlas.internal/", 443), "https://atlas.internal:443");
    }

    #[tokio::test]
    async fn test_health_check_reports_uptime() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/health")
            .with_status(200)
            .with_body(r#"{"status":"healthy","uptime_seconds":42}"#)
            .create_async()
            .await;

        let url = server.url();
        let (host, port) = url.rsplit_once(':').unwrap();
        let status = check_server_running(host, port.parse().unwrap()).await.unwrap();
        assert!(matches!(status, ServerStatus::Running { uptime: Some(42) }));
        mock.assert_async().await;
    }
}
