//! Domain events and notification delivery.
//!
//! Business logic never holds a transport handle. It emits
//! [`DomainEvent`] values onto an [`EventBus`]; a [`dispatcher::Dispatcher`]
//! task owns the receiving end and forwards each event to the
//! [`NotificationChannel`] implementations whose routing admits its
//! severity. Delivery is fire-and-forget: a failing channel is logged
//! and never propagates back into the request path.

pub mod channels;
pub mod dispatcher;
pub mod routing;

#[cfg(test)]
mod tests;

use anyhow::Result;
use async_trait::async_trait;
use cloudwise_common::types::{AlertCategory, Provider, Severity};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// Something that happened in the core that the outside world may care
/// about. Each variant carries enough to render a notification without
/// a database read.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DomainEvent {
    AccountConnected {
        user_id: String,
        provider: Provider,
        account_id: String,
        display_name: String,
    },
    AccountSynced {
        user_id: String,
        provider: Provider,
        account_id: String,
        display_name: String,
        cost_rows: usize,
        resources: usize,
    },
    AccountSyncFailed {
        user_id: String,
        provider: Provider,
        account_id: String,
        display_name: String,
        error: String,
    },
    RecommendationStatusChanged {
        user_id: String,
        recommendation_id: String,
        title: String,
        previous_status: String,
        new_status: String,
        potential_savings: Decimal,
    },
    AlertRaised {
        user_id: String,
        severity: Severity,
        category: AlertCategory,
        title: String,
        message: String,
        source: String,
    },
}

impl DomainEvent {
    pub fn user_id(&self) -> &str {
        match self {
            DomainEvent::AccountConnected { user_id, .. }
            | DomainEvent::AccountSynced { user_id, .. }
            | DomainEvent::AccountSyncFailed { user_id, .. }
            | DomainEvent::RecommendationStatusChanged { user_id, .. }
            | DomainEvent::AlertRaised { user_id, .. } => user_id,
        }
    }

    pub fn severity(&self) -> Severity {
        match self {
            DomainEvent::AccountConnected { .. } | DomainEvent::AccountSynced { .. } => {
                Severity::Info
            }
            DomainEvent::AccountSyncFailed { .. } => Severity::High,
            DomainEvent::RecommendationStatusChanged { .. } => Severity::Low,
            DomainEvent::AlertRaised { severity, .. } => *severity,
        }
    }

    pub fn title(&self) -> String {
        match self {
            DomainEvent::AccountConnected {
                provider,
                display_name,
                ..
            } => format!("{provider} account connected: {display_name}"),
            DomainEvent::AccountSynced {
                provider,
                display_name,
                ..
            } => format!("{provider} account synced: {display_name}"),
            DomainEvent::AccountSyncFailed {
                provider,
                display_name,
                ..
            } => format!("{provider} sync failed: {display_name}"),
            DomainEvent::RecommendationStatusChanged { title, .. } => {
                format!("Recommendation updated: {title}")
            }
            DomainEvent::AlertRaised { title, .. } => title.clone(),
        }
    }

    pub fn message(&self) -> String {
        match self {
            DomainEvent::AccountConnected { provider, .. } => {
                format!("Credentials validated against {provider}; first sync queued")
            }
            DomainEvent::AccountSynced {
                cost_rows,
                resources,
                ..
            } => format!("Ingested {cost_rows} cost rows and {resources} resources"),
            DomainEvent::AccountSyncFailed { error, .. } => error.clone(),
            DomainEvent::RecommendationStatusChanged {
                previous_status,
                new_status,
                potential_savings,
                ..
            } => format!(
                "Status moved {previous_status} -> {new_status} (potential savings {potential_savings})"
            ),
            DomainEvent::AlertRaised { message, .. } => message.clone(),
        }
    }
}

/// Sending half of the event queue; cheap to clone into any component
/// that needs to emit.
#[derive(Clone)]
pub struct EventBus {
    tx: mpsc::UnboundedSender<DomainEvent>,
}

impl EventBus {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<DomainEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Enqueue an event. Never blocks and never fails the caller; if the
    /// dispatcher is gone the event is dropped with a warning.
    pub fn emit(&self, event: DomainEvent) {
        if self.tx.send(event).is_err() {
            tracing::warn!("Event bus receiver dropped; domain event discarded");
        }
    }
}

/// A notification delivery channel that pushes domain events to an
/// external service (SMTP, webhook endpoint).
#[async_trait]
pub trait NotificationChannel: Send + Sync {
    /// Delivers the event through this channel.
    ///
    /// # Errors
    ///
    /// Returns an error if delivery fails after retries (if applicable).
    async fn send(&self, event: &DomainEvent) -> Result<()>;

    /// Returns the channel type name (e.g., `"email"`, `"webhook"`).
    fn channel_name(&self) -> &str;
}
