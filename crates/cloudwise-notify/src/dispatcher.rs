use crate::routing::ChannelRoute;
use crate::{DomainEvent, NotificationChannel};
use tokio::sync::mpsc;

/// Consumes the event bus and fans events out to channels.
///
/// One dispatcher task owns the receiving end of the queue; the core
/// never waits on delivery. Channel failures are logged and swallowed —
/// a dead webhook must not take cost aggregation down with it.
pub struct Dispatcher {
    channels: Vec<Box<dyn NotificationChannel>>,
    routes: Vec<ChannelRoute>,
}

impl Dispatcher {
    pub fn new(channels: Vec<Box<dyn NotificationChannel>>, routes: Vec<ChannelRoute>) -> Self {
        Self { channels, routes }
    }

    pub async fn dispatch(&self, event: &DomainEvent) {
        let severity = event.severity();
        for route in &self.routes {
            if !route.should_send(severity) {
                continue;
            }
            if let Some(channel) = self.channels.get(route.channel_index) {
                if let Err(e) = channel.send(event).await {
                    tracing::error!(
                        channel = channel.channel_name(),
                        error = %e,
                        "Failed to send notification"
                    );
                }
            }
        }
    }

    /// Drain the queue until every sender is dropped.
    pub async fn run(self, mut rx: mpsc::UnboundedReceiver<DomainEvent>) {
        while let Some(event) = rx.recv().await {
            self.dispatch(&event).await;
        }
        tracing::info!("Event bus closed; dispatcher exiting");
    }
}
