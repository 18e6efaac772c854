use crate::aggregate::{
    count_by, percentage, pivot_daily_by_provider, sum_amounts_by, sum_by, total_cost,
    CostGroupBy, GroupKey,
};
use crate::anomaly::score;
use crate::forecast::{days_in_month, forecast, previous_month_bounds};
use crate::idle::find_idle;
use crate::{CostRecord, ResourceUsage};
use chrono::NaiveDate;
use cloudwise_common::types::{AccountRef, OwnedAccountIds, Provider};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

fn record(provider: Provider, account: &str, day: NaiveDate, service: &str, cost: Decimal) -> CostRecord {
    CostRecord {
        account: AccountRef::new(provider, account),
        date: day,
        service: service.to_string(),
        cost,
    }
}

#[test]
fn scope_filter_excludes_foreign_accounts() {
    let owned = OwnedAccountIds {
        aws: vec!["a1".into()],
        azure: vec!["s1".into()],
        gcp: vec![],
    };
    let records = vec![
        record(Provider::Aws, "a1", date(2024, 1, 1), "EC2", dec!(10)),
        record(Provider::Aws, "a2", date(2024, 1, 1), "EC2", dec!(99)),
        record(Provider::Azure, "s1", date(2024, 1, 1), "VM", dec!(5)),
        // gcp id equal to an owned aws id must not slip through
        record(Provider::Gcp, "a1", date(2024, 1, 1), "GCE", dec!(77)),
    ];

    let visible: Vec<CostRecord> = records
        .into_iter()
        .filter(|r| owned.contains(&r.account))
        .collect();
    assert_eq!(visible.len(), 2);
    assert_eq!(total_cost(&visible), dec!(15));
}

#[test]
fn empty_owner_set_aggregates_to_zero() {
    let owned = OwnedAccountIds::default();
    assert!(owned.is_empty());

    let records: Vec<CostRecord> = Vec::new();
    assert_eq!(total_cost(&records), Decimal::ZERO);
    assert!(sum_by(&records, CostGroupBy::Service).is_empty());
    let pivot = pivot_daily_by_provider(&records, date(2024, 1, 1), date(2024, 1, 3));
    assert_eq!(pivot.len(), 3);
    assert!(pivot.iter().all(|r| r.total == Decimal::ZERO));
}

#[test]
fn pivot_is_dense_over_the_range() {
    // Cost only for aws on the first three days of a 5-day range
    let records = vec![
        record(Provider::Aws, "a1", date(2024, 1, 1), "EC2", dec!(10)),
        record(Provider::Aws, "a1", date(2024, 1, 2), "EC2", dec!(20)),
        record(Provider::Aws, "a1", date(2024, 1, 3), "EC2", dec!(30)),
    ];
    let rows = pivot_daily_by_provider(&records, date(2024, 1, 1), date(2024, 1, 5));

    assert_eq!(rows.len(), 5);
    assert_eq!(rows[0].date, date(2024, 1, 1));
    assert_eq!(rows[0].aws, dec!(10));
    assert_eq!(rows[0].azure, Decimal::ZERO);
    assert_eq!(rows[0].gcp, Decimal::ZERO);
    // Days 4 and 5 exist with all-zero provider columns
    assert_eq!(rows[3].total, Decimal::ZERO);
    assert_eq!(rows[4].total, Decimal::ZERO);
    // Dates ascend
    for pair in rows.windows(2) {
        assert!(pair[0].date < pair[1].date);
    }
}

#[test]
fn pivot_splits_providers_per_day() {
    let day = date(2024, 6, 10);
    let records = vec![
        record(Provider::Aws, "a1", day, "EC2", dec!(1.25)),
        record(Provider::Azure, "s1", day, "VM", dec!(2.50)),
        record(Provider::Gcp, "g1", day, "GCE", dec!(4.00)),
        record(Provider::Aws, "a1", day, "S3", dec!(0.75)),
    ];
    let rows = pivot_daily_by_provider(&records, day, day);
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].aws, dec!(2.00));
    assert_eq!(rows[0].azure, dec!(2.50));
    assert_eq!(rows[0].gcp, dec!(4.00));
    assert_eq!(rows[0].total, dec!(8.50));
}

#[test]
fn service_grouping_sorts_descending_by_total() {
    let day = date(2024, 1, 1);
    let records = vec![
        record(Provider::Aws, "a1", day, "EC2", dec!(500)),
        record(Provider::Aws, "a1", day, "S3", dec!(200)),
        record(Provider::Aws, "a1", day, "Lambda", dec!(800)),
    ];
    let rows = sum_by(&records, CostGroupBy::Service);
    let labels: Vec<String> = rows.iter().map(|r| r.key.label()).collect();
    assert_eq!(labels, vec!["Lambda", "EC2", "S3"]);
}

#[test]
fn equal_totals_break_ties_by_key() {
    let day = date(2024, 1, 1);
    let records = vec![
        record(Provider::Aws, "a1", day, "SQS", dec!(10)),
        record(Provider::Aws, "a1", day, "ECS", dec!(10)),
        record(Provider::Aws, "a1", day, "EKS", dec!(10)),
    ];
    let rows = sum_by(&records, CostGroupBy::Service);
    let labels: Vec<String> = rows.iter().map(|r| r.key.label()).collect();
    assert_eq!(labels, vec!["ECS", "EKS", "SQS"]);
}

#[test]
fn date_grouping_sorts_ascending() {
    let records = vec![
        record(Provider::Aws, "a1", date(2024, 1, 3), "EC2", dec!(1)),
        record(Provider::Aws, "a1", date(2024, 1, 1), "EC2", dec!(3)),
        record(Provider::Aws, "a1", date(2024, 1, 2), "EC2", dec!(2)),
    ];
    let rows = sum_by(&records, CostGroupBy::Date);
    let dates: Vec<GroupKey> = rows.iter().map(|r| r.key.clone()).collect();
    assert_eq!(
        dates,
        vec![
            GroupKey::Date(date(2024, 1, 1)),
            GroupKey::Date(date(2024, 1, 2)),
            GroupKey::Date(date(2024, 1, 3)),
        ]
    );
}

#[test]
fn provider_service_grouping_keys_on_both() {
    let day = date(2024, 1, 1);
    let records = vec![
        record(Provider::Aws, "a1", day, "Storage", dec!(5)),
        record(Provider::Azure, "s1", day, "Storage", dec!(7)),
    ];
    let rows = sum_by(&records, CostGroupBy::ProviderService);
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].key, GroupKey::ProviderService(Provider::Azure, "Storage".into()));
    assert_eq!(rows[1].key, GroupKey::ProviderService(Provider::Aws, "Storage".into()));
}

#[test]
fn decimal_sums_do_not_drift() {
    // 0.1 + 0.2 repeated; f64 would accumulate representation error
    let day = date(2024, 1, 1);
    let mut records = Vec::new();
    for _ in 0..1000 {
        records.push(record(Provider::Aws, "a1", day, "EC2", dec!(0.1)));
        records.push(record(Provider::Aws, "a1", day, "EC2", dec!(0.2)));
    }
    assert_eq!(total_cost(&records), dec!(300.0));
}

#[test]
fn aggregation_is_idempotent() {
    let records = vec![
        record(Provider::Aws, "a1", date(2024, 1, 2), "EC2", dec!(10)),
        record(Provider::Gcp, "g1", date(2024, 1, 1), "GCE", dec!(10)),
        record(Provider::Azure, "s1", date(2024, 1, 3), "VM", dec!(10)),
    ];
    let first = sum_by(&records, CostGroupBy::Provider);
    let second = sum_by(&records, CostGroupBy::Provider);
    assert_eq!(first, second);

    let p1 = pivot_daily_by_provider(&records, date(2024, 1, 1), date(2024, 1, 3));
    let p2 = pivot_daily_by_provider(&records, date(2024, 1, 1), date(2024, 1, 3));
    assert_eq!(p1, p2);
}

#[test]
fn count_and_amount_groupings_are_deterministic() {
    let items = vec!["rightsizing", "idle_cleanup", "rightsizing", "reserved_instances"];
    let counts = count_by(&items, |s| s.to_string());
    assert_eq!(counts[0].key, "rightsizing");
    assert_eq!(counts[0].count, 2);
    // Tie between the two singletons resolves alphabetically
    assert_eq!(counts[1].key, "idle_cleanup");
    assert_eq!(counts[2].key, "reserved_instances");

    let amounts = sum_amounts_by(
        &[("a", dec!(1)), ("b", dec!(3)), ("a", dec!(2))],
        |(k, _)| k.to_string(),
        |(_, v)| *v,
    );
    assert_eq!(amounts[0].key, "a");
    assert_eq!(amounts[0].total, dec!(3));
}

#[test]
fn percentage_rounds_and_guards_zero() {
    assert_eq!(percentage(dec!(1), dec!(3)), dec!(33.33));
    assert_eq!(percentage(dec!(5), Decimal::ZERO), Decimal::ZERO);
    assert_eq!(percentage(dec!(5), dec!(-1)), Decimal::ZERO);
}

#[test]
fn forecast_matches_run_rate_arithmetic() {
    let f = forecast(dec!(300), 10, 30, dec!(280));
    assert_eq!(f.daily_average, dec!(30));
    assert_eq!(f.projected_cost, dec!(900));
    assert_eq!(f.change_amount, dec!(620));
    assert_eq!(f.change_percentage, dec!(221.43));
}

#[test]
fn forecast_guards_division_by_zero() {
    let f = forecast(Decimal::ZERO, 0, 30, Decimal::ZERO);
    assert_eq!(f.daily_average, Decimal::ZERO);
    assert_eq!(f.projected_cost, Decimal::ZERO);
    assert_eq!(f.change_amount, Decimal::ZERO);
    assert_eq!(f.change_percentage, Decimal::ZERO);
}

#[test]
fn forecast_with_zero_previous_month_stays_finite() {
    let f = forecast(dec!(150), 15, 30, Decimal::ZERO);
    assert_eq!(f.projected_cost, dec!(300));
    assert_eq!(f.change_amount, dec!(300));
    // No Infinity: the percentage is pinned to zero
    assert_eq!(f.change_percentage, Decimal::ZERO);
}

#[test]
fn month_helpers_handle_boundaries() {
    assert_eq!(days_in_month(date(2024, 2, 10)), 29);
    assert_eq!(days_in_month(date(2023, 2, 10)), 28);
    assert_eq!(days_in_month(date(2024, 12, 31)), 31);

    let (start, end) = previous_month_bounds(date(2024, 1, 15));
    assert_eq!(start, date(2023, 12, 1));
    assert_eq!(end, date(2023, 12, 31));
}

#[test]
fn constant_series_has_no_anomalies() {
    let points = score(&[5.0, 5.0, 5.0, 5.0], 2.0);
    assert_eq!(points.len(), 4);
    assert!(points.iter().all(|p| !p.is_anomaly));
    assert!(points.iter().all(|p| p.z_score == 0.0));
}

#[test]
fn spike_is_flagged_and_baseline_is_not() {
    let points = score(&[10.0, 10.0, 10.0, 10.0, 100.0], 2.0);
    assert!(points[4].is_anomaly, "spike should be flagged: {points:?}");
    for p in &points[..4] {
        assert!(!p.is_anomaly, "baseline flagged: {p:?}");
    }
}

#[test]
fn empty_series_scores_to_nothing() {
    assert!(score(&[], 2.0).is_empty());
}

#[test]
fn anomaly_threshold_is_respected() {
    let series = [10.0, 12.0, 11.0, 9.0, 20.0];
    let strict = score(&series, 10.0);
    assert!(strict.iter().all(|p| !p.is_anomaly));
    let loose = score(&series, 1.5);
    assert!(loose.iter().any(|p| p.is_anomaly));
}

fn usage(id: &str, status: &str, utilization: Option<f64>, cost: Decimal) -> ResourceUsage {
    ResourceUsage {
        account: AccountRef::Aws("a1".into()),
        resource_id: id.to_string(),
        name: None,
        resource_type: "instance".to_string(),
        region: "us-east-1".to_string(),
        status: status.to_string(),
        utilization,
        cost_per_month: cost,
    }
}

#[test]
fn idle_detection_filters_and_sorts() {
    let resources = vec![
        usage("i-busy", "running", Some(80.0), dec!(100)),
        usage("i-idle-cheap", "running", Some(3.0), dec!(10)),
        usage("i-idle-pricey", "running", Some(5.0), dec!(200)),
        usage("i-stopped", "stopped", Some(0.0), dec!(50)),
        usage("i-unknown", "running", None, dec!(75)),
    ];
    let idle = find_idle(&resources, 10.0);
    let ids: Vec<&str> = idle.iter().map(|r| r.resource_id.as_str()).collect();
    // Stopped and unmeasured resources are excluded; pricier idle first
    assert_eq!(ids, vec!["i-idle-pricey", "i-idle-cheap"]);
}

#[test]
fn idle_threshold_is_configurable() {
    let resources = vec![usage("i-1", "running", Some(15.0), dec!(10))];
    assert!(find_idle(&resources, 10.0).is_empty());
    assert_eq!(find_idle(&resources, 20.0).len(), 1);
}
