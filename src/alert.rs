//! Operator escalation.
//!
//! A failed fund recovery leaves custodial funds stranded mid-flow, so it is
//! paged, not just logged. Plain request failures page at a lower level.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use url::Url;
use uuid::Uuid;

use crate::swap::events::EventBus;
use crate::swap::messages::SwapEvent;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertLevel {
    Warning,
    Critical,
}

impl AlertLevel {
    pub fn emoji(&self) -> &'static str {
        match self {
            AlertLevel::Warning => "⚠️",
            AlertLevel::Critical => "🚨",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Alert {
    pub level: AlertLevel,
    pub title: String,
    pub message: String,
    pub request_id: Uuid,
    pub timestamp: DateTime<Utc>,
}

impl Alert {
    pub fn new(level: AlertLevel, title: &str, message: String, request_id: Uuid) -> Self {
        Self {
            level,
            title: title.to_string(),
            message,
            request_id,
            timestamp: Utc::now(),
        }
    }
}

/// Maps a queue event to the alert it warrants, if any.
pub fn alert_for(event: &SwapEvent) -> Option<Alert> {
    match event {
        SwapEvent::FundRecoveryFailed { reason, request } => Some(Alert::new(
            AlertLevel::Critical,
            "Fund recovery failed",
            format!(
                "User {} swap {} → {} ({}) failed and could not be recovered: {}. Manual intervention required.",
                request.user_address, request.from_token, request.to_token, request.amount, reason
            ),
            request.id,
        )),
        SwapEvent::RequestFailed { request } => Some(Alert::new(
            AlertLevel::Warning,
            "Swap failed",
            format!(
                "Swap {} for {} failed in {}: {}",
                request.short_id(),
                request.user_address,
                request.phase,
                request.error.as_deref().unwrap_or("unknown error")
            ),
            request.id,
        )),
        _ => None,
    }
}

// ─────────────────────────────────────────────────────────
// Pager
// ─────────────────────────────────────────────────────────

pub struct WebhookPager {
    client: reqwest::Client,
    webhook_url: Option<Url>,
}

impl WebhookPager {
    pub fn new(webhook_url: Option<Url>) -> Self {
        if webhook_url.is_none() {
            warn!("⚠️ No SWAP_ALERT_WEBHOOK_URL: alerts are logged only");
        }
        Self {
            client: reqwest::Client::new(),
            webhook_url,
        }
    }

    pub async fn page(&self, alert: &Alert) -> anyhow::Result<()> {
        match alert.level {
            AlertLevel::Critical => error!("{} [{}] {}: {}", alert.level.emoji(), alert.request_id, alert.title, alert.message),
            AlertLevel::Warning => warn!("{} [{}] {}: {}", alert.level.emoji(), alert.request_id, alert.title, alert.message),
        }

        let Some(url) = &self.webhook_url else {
            return Ok(());
        };
        let resp = self.client.post(url.clone()).json(alert).send().await?;
        if !resp.status().is_success() {
            anyhow::bail!("webhook returned status {}", resp.status());
        }
        Ok(())
    }
}

/// Pages on every failure published to `bus` until the bus closes.
pub fn spawn_escalation(bus: &EventBus, pager: Arc<WebhookPager>) -> JoinHandle<()> {
    let mut rx = bus.subscribe();
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => {
                    let Some(alert) = alert_for(&event) else {
                        continue;
                    };
                    if let Err(e) = pager.page(&alert).await {
                        error!("🚨 Failed to deliver {:?} alert for {}: {:#}", alert.level, alert.request_id, e);
                    }
                }
                Err(RecvError::Lagged(n)) => {
                    error!("🚨 Escalation lagged, {} event(s) dropped: check logs for fundRecoveryFailed", n);
                }
                Err(RecvError::Closed) => {
                    info!("Escalation stopped: event bus closed");
                    break;
                }
            }
        }
    })
}
