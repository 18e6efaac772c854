//! Month-end spend projection from partial-month actuals.

use chrono::{Datelike, NaiveDate};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Run-rate forecast for the current month.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Forecast {
    pub projected_cost: Decimal,
    pub daily_average: Decimal,
    pub change_amount: Decimal,
    /// Percentage vs. the previous month, rounded to 2 decimals.
    pub change_percentage: Decimal,
}

/// Project month-end spend from a daily-average run rate.
///
/// `daily_average = month_to_date / day_of_month` (zero when
/// `day_of_month` is zero); the projection extends that average over the
/// remaining days. `change_percentage` is zero when the previous month
/// had no positive cost — dividing there would put Infinity into a JSON
/// response.
///
/// This is a naive linear projection: no seasonality, no trend
/// adjustment, and a spend spike early in the month inflates the whole
/// projection. Known limitation, kept deliberately.
pub fn forecast(
    month_to_date: Decimal,
    day_of_month: u32,
    days_in_month: u32,
    previous_month: Decimal,
) -> Forecast {
    let daily_average = if day_of_month == 0 {
        Decimal::ZERO
    } else {
        month_to_date / Decimal::from(day_of_month)
    };

    let remaining_days = days_in_month.saturating_sub(day_of_month);
    let projected_cost = month_to_date + daily_average * Decimal::from(remaining_days);
    let change_amount = projected_cost - previous_month;
    let change_percentage = if previous_month > Decimal::ZERO {
        (change_amount / previous_month * Decimal::ONE_HUNDRED).round_dp(2)
    } else {
        Decimal::ZERO
    };

    Forecast {
        projected_cost,
        daily_average,
        change_amount,
        change_percentage,
    }
}

/// Number of days in the month containing `date`.
pub fn days_in_month(date: NaiveDate) -> u32 {
    let (next_year, next_month) = if date.month() == 12 {
        (date.year() + 1, 1)
    } else {
        (date.year(), date.month() + 1)
    };
    NaiveDate::from_ymd_opt(next_year, next_month, 1)
        .and_then(|first_of_next| {
            first_of_next
                .signed_duration_since(NaiveDate::from_ymd_opt(date.year(), date.month(), 1)?)
                .num_days()
                .try_into()
                .ok()
        })
        .unwrap_or(30)
}

/// First day of the month containing `date`.
pub fn first_of_month(date: NaiveDate) -> NaiveDate {
    date.with_day(1).unwrap_or(date)
}

/// First and last day of the month preceding the one containing `date`.
pub fn previous_month_bounds(date: NaiveDate) -> (NaiveDate, NaiveDate) {
    let first = first_of_month(date);
    let last_of_prev = first.pred_opt().unwrap_or(first);
    (first_of_month(last_of_prev), last_of_prev)
}
