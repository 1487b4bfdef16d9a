// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Escalation notifiers.
//!
//! [`WebhookNotifier`] POSTs `{target, priority, message}` to the URL
//! configured for a target. [`LogNotifier`] writes escalations to the log
//! and is used when no channels are configured.

use crate::domain::escalation::{EscalationPriority, Notifier, NotifierError};
use async_trait::async_trait;
use serde::Serialize;
use std::collections::HashMap;
use std::time::Duration;
use tracing::warn;

const DELIVERY_TIMEOUT: Duration = Duration::from_secs(10);

pub struct WebhookNotifier {
    client: reqwest::Client,
    targets: HashMap<String, String>,
}

#[derive(Serialize)]
struct NotificationBody<'a> {
    target: &'a str,
    priority: EscalationPriority,
    message: &'a str,
}

impl WebhookNotifier {
    pub fn new(targets: HashMap<String, String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            targets,
        }
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn send(&self, target: &str, message: &str, priority: EscalationPriority) -> Result<(), NotifierError> {
        let url = self
            .targets
            .get(target)
            .ok_or_else(|| NotifierError::UnknownTarget(target.to_string()))?;

        let response = self
            .client
            .post(url)
            .timeout(DELIVERY_TIMEOUT)
            .json(&NotificationBody { target, priority, message })
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    NotifierError::Timeout
                } else {
                    NotifierError::Delivery(e.to_string())
                }
            })?;

        if !response.status().is_success() {
            return Err(NotifierError::Delivery(format!("HTTP {}", response.status())));
        }
        Ok(())
    }
}

/// Delivers escalations to the process log
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, target: &str, message: &str, priority: EscalationPriority) -> Result<(), NotifierError> {
        warn!(target_channel = %target, priority = %priority, "ESCALATION: {}", message);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_webhook_delivery() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/hooks/supervisor")
            .match_body(mockito::Matcher::PartialJson(serde_json::json!({"target": "supervisor", "priority": "critical"})))
            .with_status(204)
            .create_async()
            .await;

        let notifier = WebhookNotifier::new(HashMap::from([(
            "supervisor".to_string(),
            format!("{}/hooks/supervisor", server.url()),
        )]));
        notifier
            .send("supervisor", "[critical] deploy broke", EscalationPriority::Critical)
            .await
            .unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_unconfigured_target() {
        let notifier = WebhookNotifier::new(HashMap::new());
        let err = notifier.send("project-owner", "x", EscalationPriority::Normal).await.unwrap_err();
        assert!(matches!(err, NotifierError::UnknownTarget(t) if t == "project-owner"));
    }

    #[tokio::test]
    async fn test_failed_delivery() {
        let mut server = mockito::Server::new_async().await;
        server.mock("POST", "/").with_status(503).create_async().await;

        let notifier = WebhookNotifier::new(HashMap::from([("supervisor".to_string(), server.url())]));
        assert!(matches!(
            notifier.send("supervisor", "x", EscalationPriority::High).await,
            Err(NotifierError::Delivery(_))
        ));
    }
}
