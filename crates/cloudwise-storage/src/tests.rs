use crate::store::Store;
use crate::{
    AlertFilter, AlertRow, CloudAccountRow, CostDatumRow, CostFilter, RecommendationFilter,
    RecommendationRow, ResourceRow, StatusUpdateOutcome,
};
use chrono::{NaiveDate, Utc};
use cloudwise_common::types::{
    AccountRef, AccountStatus, AlertCategory, AlertStatus, Impact, Provider,
    RecommendationStatus, Severity,
};
use rust_decimal_macros::dec;
use std::collections::HashMap;
use tempfile::TempDir;

async fn setup() -> (TempDir, Store) {
    cloudwise_common::id::init(1, 1);
    let dir = TempDir::new().unwrap();
    // File-backed SQLite: a pooled in-memory database would give each
    // pool connection its own empty schema.
    let db_url = format!("sqlite://{}/test.db?mode=rwc", dir.path().display());
    let store = Store::new(&db_url, dir.path()).await.unwrap();
    (dir, store)
}

async fn connect_account(store: &Store, user: &str, provider: Provider, external: &str) -> String {
    let id = cloudwise_common::id::next_id();
    let row = CloudAccountRow {
        id: id.clone(),
        user_id: user.to_string(),
        provider,
        external_id: external.to_string(),
        display_name: format!("{provider} {external}"),
        encrypted_credentials: "opaque".to_string(),
        status: AccountStatus::Connected,
        error_message: None,
        last_sync_at: None,
        created_at: Utc::now(),
        updated_at: Utc::now(),
    };
    store.insert_cloud_account(&row).await.unwrap();
    id
}

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

fn cost_row(account: AccountRef, day: NaiveDate, service: &str, cost: rust_decimal::Decimal) -> CostDatumRow {
    CostDatumRow {
        id: cloudwise_common::id::next_id(),
        account,
        date: day,
        service: service.to_string(),
        cost,
        usage_quantity: None,
        currency: "USD".to_string(),
        created_at: Utc::now(),
    }
}

#[tokio::test]
async fn resolver_returns_empty_lists_for_unknown_user() {
    let (_dir, store) = setup().await;
    let owned = store.resolve_owned_account_ids("nobody").await.unwrap();
    assert!(owned.is_empty());
    assert!(owned.aws.is_empty() && owned.azure.is_empty() && owned.gcp.is_empty());
}

#[tokio::test]
async fn resolver_groups_accounts_by_provider() {
    let (_dir, store) = setup().await;
    let a1 = connect_account(&store, "alice", Provider::Aws, "111111111111").await;
    let a2 = connect_account(&store, "alice", Provider::Aws, "222222222222").await;
    let g1 = connect_account(&store, "alice", Provider::Gcp, "my-project").await;
    connect_account(&store, "bob", Provider::Azure, "sub-1").await;

    let owned = store.resolve_owned_account_ids("alice").await.unwrap();
    assert_eq!(owned.aws.len(), 2);
    assert!(owned.aws.contains(&a1) && owned.aws.contains(&a2));
    assert!(owned.azure.is_empty());
    assert_eq!(owned.gcp, vec![g1]);
}

#[tokio::test]
async fn scoped_cost_query_never_leaks_other_users_rows() {
    let (_dir, store) = setup().await;
    let alice_acct = connect_account(&store, "alice", Provider::Aws, "111111111111").await;
    let bob_acct = connect_account(&store, "bob", Provider::Aws, "999999999999").await;

    let day = date(2024, 1, 15);
    store
        .replace_cost_window(
            &AccountRef::Aws(alice_acct.clone()),
            day,
            day,
            &[cost_row(AccountRef::Aws(alice_acct.clone()), day, "EC2", dec!(12.50))],
        )
        .await
        .unwrap();
    store
        .replace_cost_window(
            &AccountRef::Aws(bob_acct.clone()),
            day,
            day,
            &[cost_row(AccountRef::Aws(bob_acct.clone()), day, "EC2", dec!(99.00))],
        )
        .await
        .unwrap();

    let alice_owned = store.resolve_owned_account_ids("alice").await.unwrap();
    let rows = store
        .query_cost_data(&alice_owned, &CostFilter::default())
        .await
        .unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].account, AccountRef::Aws(alice_acct));
    assert_eq!(rows[0].cost, dec!(12.50));
}

#[tokio::test]
async fn empty_owner_set_short_circuits_every_query() {
    let (_dir, store) = setup().await;
    let owned = store.resolve_owned_account_ids("nobody").await.unwrap();

    let costs = store
        .query_cost_data(&owned, &CostFilter::default())
        .await
        .unwrap();
    assert!(costs.is_empty());

    let resources = store.query_all_resources(&owned).await.unwrap();
    assert!(resources.is_empty());

    let recs = store
        .query_recommendations(&owned, &RecommendationFilter::default(), 20, 0)
        .await
        .unwrap();
    assert!(recs.is_empty());
}

#[tokio::test]
async fn soft_deleted_account_disappears_from_scope() {
    let (_dir, store) = setup().await;
    let acct = connect_account(&store, "alice", Provider::Azure, "sub-1").await;

    let day = date(2024, 3, 1);
    store
        .replace_cost_window(
            &AccountRef::Azure(acct.clone()),
            day,
            day,
            &[cost_row(AccountRef::Azure(acct.clone()), day, "VM", dec!(5))],
        )
        .await
        .unwrap();

    assert!(store.soft_delete_cloud_account("alice", &acct).await.unwrap());

    let owned = store.resolve_owned_account_ids("alice").await.unwrap();
    assert!(owned.is_empty());
    let rows = store
        .query_cost_data(&owned, &CostFilter::default())
        .await
        .unwrap();
    assert!(rows.is_empty());

    // Deleting again is a no-op
    assert!(!store.soft_delete_cloud_account("alice", &acct).await.unwrap());
}

#[tokio::test]
async fn replace_cost_window_swaps_the_slice() {
    let (_dir, store) = setup().await;
    let acct = connect_account(&store, "alice", Provider::Aws, "111111111111").await;
    let account = AccountRef::Aws(acct);
    let start = date(2024, 2, 1);
    let end = date(2024, 2, 2);

    store
        .replace_cost_window(
            &account,
            start,
            end,
            &[
                cost_row(account.clone(), start, "EC2", dec!(10)),
                cost_row(account.clone(), end, "S3", dec!(2)),
            ],
        )
        .await
        .unwrap();

    // Re-sync with corrected figures for the same window
    store
        .replace_cost_window(
            &account,
            start,
            end,
            &[cost_row(account.clone(), start, "EC2", dec!(11))],
        )
        .await
        .unwrap();

    let owned = store.resolve_owned_account_ids("alice").await.unwrap();
    let rows = store
        .query_cost_data(&owned, &CostFilter::default())
        .await
        .unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].cost, dec!(11));
}

#[tokio::test]
async fn resource_upsert_is_idempotent_on_identity() {
    let (_dir, store) = setup().await;
    let acct = connect_account(&store, "alice", Provider::Gcp, "proj-1").await;
    let account = AccountRef::Gcp(acct);

    let mut row = ResourceRow {
        id: cloudwise_common::id::next_id(),
        account: account.clone(),
        resource_id: "vm-1".to_string(),
        name: Some("worker".to_string()),
        resource_type: "compute_instance".to_string(),
        region: "us-central1".to_string(),
        status: "running".to_string(),
        utilization: Some(55.0),
        cost_per_month: dec!(30),
        tags: HashMap::new(),
        metrics: serde_json::json!({}),
        last_synced_at: Utc::now(),
        created_at: Utc::now(),
        updated_at: Utc::now(),
    };
    store.upsert_resource(&row).await.unwrap();

    row.id = cloudwise_common::id::next_id();
    row.status = "stopped".to_string();
    store.upsert_resource(&row).await.unwrap();

    let owned = store.resolve_owned_account_ids("alice").await.unwrap();
    let rows = store.query_all_resources(&owned).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].status, "stopped");
}

#[tokio::test]
async fn recommendation_transition_appends_history() {
    let (_dir, store) = setup().await;
    let acct = connect_account(&store, "alice", Provider::Aws, "111111111111").await;
    let account = AccountRef::Aws(acct);

    let rec = RecommendationRow {
        id: cloudwise_common::id::next_id(),
        account,
        resource_id: "i-0abc".to_string(),
        recommendation_type: "rightsizing".to_string(),
        title: "Downsize i-0abc".to_string(),
        description: None,
        status: RecommendationStatus::Open,
        potential_savings: dec!(42.00),
        impact: Impact::High,
        status_history: Vec::new(),
        metadata: serde_json::json!({}),
        created_at: Utc::now(),
        updated_at: Utc::now(),
    };
    let rec = store.insert_recommendation(&rec).await.unwrap();

    let owned = store.resolve_owned_account_ids("alice").await.unwrap();
    let outcome = store
        .update_recommendation_status(&owned, &rec.id, RecommendationStatus::InProgress, "alice")
        .await
        .unwrap();
    let updated = match outcome {
        StatusUpdateOutcome::Updated(row) => row,
        other => panic!("expected Updated, got {other:?}"),
    };
    assert_eq!(updated.status, RecommendationStatus::InProgress);
    assert_eq!(updated.status_history.len(), 1);
    assert_eq!(
        updated.status_history[0].previous_status,
        RecommendationStatus::Open
    );
    assert_eq!(updated.status_history[0].user_id, "alice");

    // Second transition appends rather than rewriting
    let outcome = store
        .update_recommendation_status(&owned, &rec.id, RecommendationStatus::Implemented, "alice")
        .await
        .unwrap();
    let updated = match outcome {
        StatusUpdateOutcome::Updated(row) => row,
        other => panic!("expected Updated, got {other:?}"),
    };
    assert_eq!(updated.status_history.len(), 2);
}

#[tokio::test]
async fn recommendation_transition_rejects_invalid_moves() {
    let (_dir, store) = setup().await;
    let acct = connect_account(&store, "alice", Provider::Aws, "111111111111").await;

    let rec = RecommendationRow {
        id: cloudwise_common::id::next_id(),
        account: AccountRef::Aws(acct),
        resource_id: "i-0abc".to_string(),
        recommendation_type: "rightsizing".to_string(),
        title: "Downsize".to_string(),
        description: None,
        status: RecommendationStatus::Open,
        potential_savings: dec!(10),
        impact: Impact::Low,
        status_history: Vec::new(),
        metadata: serde_json::json!({}),
        created_at: Utc::now(),
        updated_at: Utc::now(),
    };
    let rec = store.insert_recommendation(&rec).await.unwrap();
    let owned = store.resolve_owned_account_ids("alice").await.unwrap();

    // open cannot skip straight to implemented
    let outcome = store
        .update_recommendation_status(&owned, &rec.id, RecommendationStatus::Implemented, "alice")
        .await
        .unwrap();
    assert!(matches!(
        outcome,
        StatusUpdateOutcome::InvalidTransition {
            from: RecommendationStatus::Open
        }
    ));

    // dismissed is terminal
    store
        .update_recommendation_status(&owned, &rec.id, RecommendationStatus::Dismissed, "alice")
        .await
        .unwrap();
    let outcome = store
        .update_recommendation_status(&owned, &rec.id, RecommendationStatus::InProgress, "alice")
        .await
        .unwrap();
    assert!(matches!(
        outcome,
        StatusUpdateOutcome::InvalidTransition {
            from: RecommendationStatus::Dismissed
        }
    ));
}

#[tokio::test]
async fn recommendation_update_is_invisible_across_users() {
    let (_dir, store) = setup().await;
    let alice_acct = connect_account(&store, "alice", Provider::Aws, "111111111111").await;
    connect_account(&store, "mallory", Provider::Aws, "555555555555").await;

    let rec = RecommendationRow {
        id: cloudwise_common::id::next_id(),
        account: AccountRef::Aws(alice_acct),
        resource_id: "i-0abc".to_string(),
        recommendation_type: "idle_cleanup".to_string(),
        title: "Remove idle volume".to_string(),
        description: None,
        status: RecommendationStatus::Open,
        potential_savings: dec!(7),
        impact: Impact::Medium,
        status_history: Vec::new(),
        metadata: serde_json::json!({}),
        created_at: Utc::now(),
        updated_at: Utc::now(),
    };
    let rec = store.insert_recommendation(&rec).await.unwrap();

    // Mallory owns an account on the same provider but not this one;
    // the row reads as absent, not as forbidden.
    let mallory_owned = store.resolve_owned_account_ids("mallory").await.unwrap();
    let outcome = store
        .update_recommendation_status(&mallory_owned, &rec.id, RecommendationStatus::Dismissed, "mallory")
        .await
        .unwrap();
    assert!(matches!(outcome, StatusUpdateOutcome::NotFound));
}

#[tokio::test]
async fn alert_status_moves_forward_with_guard() {
    let (_dir, store) = setup().await;
    let alert = AlertRow {
        id: cloudwise_common::id::next_id(),
        user_id: "alice".to_string(),
        severity: Severity::High,
        status: AlertStatus::New,
        category: AlertCategory::Cost,
        title: "Spend anomaly".to_string(),
        message: "Daily cost tripled".to_string(),
        source: "anomaly".to_string(),
        created_at: Utc::now(),
        updated_at: Utc::now(),
    };
    let alert = store.insert_alert(&alert).await.unwrap();

    let updated = store
        .update_alert_status(
            "alice",
            &alert.id,
            AlertStatus::New,
            AlertStatus::Acknowledged,
        )
        .await
        .unwrap()
        .unwrap();
    assert_eq!(updated.status, AlertStatus::Acknowledged);

    // Stale expected status no longer matches
    let stale = store
        .update_alert_status("alice", &alert.id, AlertStatus::New, AlertStatus::Resolved)
        .await
        .unwrap();
    assert!(stale.is_none());

    // Other users never see the row
    let foreign = store
        .update_alert_status("bob", &alert.id, AlertStatus::Acknowledged, AlertStatus::Resolved)
        .await
        .unwrap();
    assert!(foreign.is_none());

    let summary = store.alert_summary("alice").await.unwrap();
    assert_eq!(summary.total, 1);
    assert_eq!(summary.by_severity.get("high"), Some(&1));
    assert_eq!(summary.by_status.get("acknowledged"), Some(&1));
}

#[tokio::test]
async fn alert_list_filters_compose() {
    let (_dir, store) = setup().await;
    for (sev, cat) in [
        (Severity::Critical, AlertCategory::Cost),
        (Severity::Info, AlertCategory::Security),
        (Severity::Critical, AlertCategory::Security),
    ] {
        let alert = AlertRow {
            id: cloudwise_common::id::next_id(),
            user_id: "alice".to_string(),
            severity: sev,
            status: AlertStatus::New,
            category: cat,
            title: "t".to_string(),
            message: "m".to_string(),
            source: "sync".to_string(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        store.insert_alert(&alert).await.unwrap();
    }

    let filter = AlertFilter {
        severity_eq: Some(Severity::Critical),
        category_eq: Some(AlertCategory::Security),
        ..Default::default()
    };
    let rows = store.list_alerts("alice", &filter, 20, 0).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(store.count_alerts("alice", &filter).await.unwrap(), 1);
}

#[tokio::test]
async fn duplicate_external_id_is_rejected_per_user() {
    let (_dir, store) = setup().await;
    connect_account(&store, "alice", Provider::Aws, "111111111111").await;

    let dup = CloudAccountRow {
        id: cloudwise_common::id::next_id(),
        user_id: "alice".to_string(),
        provider: Provider::Aws,
        external_id: "111111111111".to_string(),
        display_name: "dup".to_string(),
        encrypted_credentials: "opaque".to_string(),
        status: AccountStatus::Pending,
        error_message: None,
        last_sync_at: None,
        created_at: Utc::now(),
        updated_at: Utc::now(),
    };
    assert!(store.insert_cloud_account(&dup).await.is_err());

    // A different user may connect the same external account
    connect_account(&store, "bob", Provider::Aws, "111111111111").await;
}
