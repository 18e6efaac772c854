//! Z-score outlier flagging over a numeric series.

use serde::{Deserialize, Serialize};

/// One scored point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnomalyPoint {
    pub index: usize,
    pub value: f64,
    pub z_score: f64,
    pub is_anomaly: bool,
}

/// Score every point in `series` against the population mean and
/// standard deviation of the whole series; a point whose |z| exceeds
/// `threshold` is flagged.
///
/// A constant series has zero standard deviation; dividing there would
/// make every z-score NaN or Infinity, so the degenerate case is pinned:
/// identical values are by definition not outliers, and no point is
/// flagged regardless of threshold.
pub fn score(series: &[f64], threshold: f64) -> Vec<AnomalyPoint> {
    if series.is_empty() {
        return Vec::new();
    }

    let n = series.len() as f64;
    let mean = series.iter().sum::<f64>() / n;
    let variance = series.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    let std_dev = variance.sqrt();

    if std_dev == 0.0 {
        return series
            .iter()
            .enumerate()
            .map(|(index, &value)| AnomalyPoint {
                index,
                value,
                z_score: 0.0,
                is_anomaly: false,
            })
            .collect();
    }

    series
        .iter()
        .enumerate()
        .map(|(index, &value)| {
            let z_score = (value - mean).abs() / std_dev;
            AnomalyPoint {
                index,
                value,
                z_score,
                is_anomaly: z_score > threshold,
            }
        })
        .collect()
}
