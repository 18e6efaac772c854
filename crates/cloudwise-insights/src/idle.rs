//! Idle-resource detection.

use crate::ResourceUsage;

/// Statuses that count as "on and billing" for idleness purposes.
fn is_active(status: &str) -> bool {
    matches!(
        status.to_lowercase().as_str(),
        "running" | "active" | "started"
    )
}

/// Resources that are powered on but barely used: utilization below
/// `utilization_threshold` percent. Sorted descending by monthly cost so
/// the most expensive idle spend surfaces first; resource id breaks
/// ties. Resources without a utilization reading are skipped — absence
/// of data is not evidence of idleness.
///
/// The threshold is caller-supplied (server config, default 10.0).
pub fn find_idle(resources: &[ResourceUsage], utilization_threshold: f64) -> Vec<ResourceUsage> {
    let mut idle: Vec<ResourceUsage> = resources
        .iter()
        .filter(|r| is_active(&r.status))
        .filter(|r| {
            r.utilization
                .is_some_and(|u| u < utilization_threshold)
        })
        .cloned()
        .collect();
    idle.sort_by(|a, b| {
        b.cost_per_month
            .cmp(&a.cost_per_month)
            .then_with(|| a.resource_id.cmp(&b.resource_id))
    });
    idle
}
