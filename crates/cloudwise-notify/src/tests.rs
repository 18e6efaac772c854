use crate::dispatcher::Dispatcher;
use crate::routing::ChannelRoute;
use crate::{DomainEvent, EventBus, NotificationChannel};
use anyhow::Result;
use async_trait::async_trait;
use cloudwise_common::types::{AlertCategory, Provider, Severity};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

struct CountingChannel {
    name: &'static str,
    sent: Arc<AtomicUsize>,
}

#[async_trait]
impl NotificationChannel for CountingChannel {
    async fn send(&self, _event: &DomainEvent) -> Result<()> {
        self.sent.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn channel_name(&self) -> &str {
        self.name
    }
}

struct FailingChannel;

#[async_trait]
impl NotificationChannel for FailingChannel {
    async fn send(&self, _event: &DomainEvent) -> Result<()> {
        anyhow::bail!("transport down")
    }

    fn channel_name(&self) -> &str {
        "failing"
    }
}

fn sync_failed_event() -> DomainEvent {
    DomainEvent::AccountSyncFailed {
        user_id: "alice".to_string(),
        provider: Provider::Aws,
        account_id: "acct-1".to_string(),
        display_name: "prod".to_string(),
        error: "throttled".to_string(),
    }
}

fn info_event() -> DomainEvent {
    DomainEvent::AccountConnected {
        user_id: "alice".to_string(),
        provider: Provider::Gcp,
        account_id: "acct-2".to_string(),
        display_name: "analytics".to_string(),
    }
}

#[tokio::test]
async fn routes_filter_by_minimum_severity() {
    let critical_only = Arc::new(AtomicUsize::new(0));
    let everything = Arc::new(AtomicUsize::new(0));

    let dispatcher = Dispatcher::new(
        vec![
            Box::new(CountingChannel {
                name: "pager",
                sent: critical_only.clone(),
            }),
            Box::new(CountingChannel {
                name: "audit",
                sent: everything.clone(),
            }),
        ],
        vec![
            ChannelRoute {
                min_severity: Severity::Critical,
                channel_index: 0,
            },
            ChannelRoute {
                min_severity: Severity::Info,
                channel_index: 1,
            },
        ],
    );

    // High-severity sync failure: audit yes, pager no
    dispatcher.dispatch(&sync_failed_event()).await;
    assert_eq!(critical_only.load(Ordering::SeqCst), 0);
    assert_eq!(everything.load(Ordering::SeqCst), 1);

    // Info event: still audit only
    dispatcher.dispatch(&info_event()).await;
    assert_eq!(critical_only.load(Ordering::SeqCst), 0);
    assert_eq!(everything.load(Ordering::SeqCst), 2);

    // Critical alert reaches both
    dispatcher
        .dispatch(&DomainEvent::AlertRaised {
            user_id: "alice".to_string(),
            severity: Severity::Critical,
            category: AlertCategory::Cost,
            title: "Spend spike".to_string(),
            message: "3x daily average".to_string(),
            source: "anomaly".to_string(),
        })
        .await;
    assert_eq!(critical_only.load(Ordering::SeqCst), 1);
    assert_eq!(everything.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn failing_channel_does_not_block_the_rest() {
    let sent = Arc::new(AtomicUsize::new(0));
    let dispatcher = Dispatcher::new(
        vec![
            Box::new(FailingChannel),
            Box::new(CountingChannel {
                name: "audit",
                sent: sent.clone(),
            }),
        ],
        vec![
            ChannelRoute {
                min_severity: Severity::Info,
                channel_index: 0,
            },
            ChannelRoute {
                min_severity: Severity::Info,
                channel_index: 1,
            },
        ],
    );

    dispatcher.dispatch(&sync_failed_event()).await;
    assert_eq!(sent.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn bus_delivers_to_running_dispatcher() {
    let sent = Arc::new(AtomicUsize::new(0));
    let dispatcher = Dispatcher::new(
        vec![Box::new(CountingChannel {
            name: "audit",
            sent: sent.clone(),
        })],
        vec![ChannelRoute {
            min_severity: Severity::Info,
            channel_index: 0,
        }],
    );

    let (bus, rx) = EventBus::new();
    let handle = tokio::spawn(dispatcher.run(rx));

    bus.emit(info_event());
    bus.emit(sync_failed_event());
    drop(bus);

    // run() exits once all senders are gone and the queue is drained
    handle.await.unwrap();
    assert_eq!(sent.load(Ordering::SeqCst), 2);
}

#[test]
fn event_severity_mapping_is_stable() {
    assert_eq!(info_event().severity(), Severity::Info);
    assert_eq!(sync_failed_event().severity(), Severity::High);
    let ev = DomainEvent::RecommendationStatusChanged {
        user_id: "u".to_string(),
        recommendation_id: "r".to_string(),
        title: "t".to_string(),
        previous_status: "open".to_string(),
        new_status: "implemented".to_string(),
        potential_savings: rust_decimal::Decimal::new(100, 0),
    };
    assert_eq!(ev.severity(), Severity::Low);
    assert!(ev.message().contains("open -> implemented"));
}
