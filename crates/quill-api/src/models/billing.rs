// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Revenue aggregates served by the `billings` group.

use quill_registry_api::{FieldDef, FieldType};
use serde::{Deserialize, Serialize};

/// Revenue booked in one billing period.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonthlySales {
    /// Billing period, `YYYY-MM`.
    pub period: String,
    /// Sum of payment amounts in the period.
    pub total: f64,
}

/// All-time revenue plus month-over-month change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TotalSales {
    /// Sum of every payment.
    pub total: f64,
    /// Change of the latest period against the one before, in percent.
    pub percentage_change: f64,
}

/// Wire schema of [`TotalSales`].
pub const TOTAL_SALES_FIELDS: &[FieldDef] = &[
    FieldDef::required("total", FieldType::Number),
    FieldDef::required("percentageChange", FieldType::Number),
];

/// Wire schema of [`MonthlySales`].
pub const MONTHLY_SALES_FIELDS: &[FieldDef] = &[
    FieldDef::required("period", FieldType::String),
    FieldDef::required("total", FieldType::Number),
];

/// Group `(period, amount)` pairs into per-period totals, oldest first.
pub fn monthly_sales<'a>(payments: impl IntoIterator<Item = (&'a str, f64)>) -> Vec<MonthlySales> {
    let mut months: std::collections::BTreeMap<&str, f64> = std::collections::BTreeMap::new();
    for (period, amount) in payments {
        *months.entry(period).or_default() += amount;
    }
    months
        .into_iter()
        .map(|(period, total)| MonthlySales {
            period: period.to_string(),
            total,
        })
        .collect()
}

/// Summarise monthly totals; a missing or zero previous month yields 0% change.
pub fn total_sales(months: &[MonthlySales]) -> TotalSales {
    let total = months.iter().map(|m| m.total).sum::<f64>();
    let percentage_change = match months {
        [.., previous, latest] if previous.total.abs() > f64::EPSILON => {
            (latest.total - previous.total) / previous.total * 100.0
        }
        _ => 0.0,
    };
    TotalSales {
        total,
        percentage_change,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn months_are_grouped_and_sorted() {
        let months = monthly_sales([("2026-10", 10.0), ("2026-09", 5.0), ("2026-10", 2.5)]);
        assert_eq!(months.len(), 2);
        assert_eq!(months[0].period, "2026-09");
        assert!((months[1].total - 12.5).abs() < f64::EPSILON);
    }

    #[test]
    fn change_is_latest_against_previous() {
        let months = monthly_sales([("2026-09", 200.0), ("2026-10", 150.0)]);
        let summary = total_sales(&months);
        assert!((summary.total - 350.0).abs() < f64::EPSILON);
        assert!((summary.percentage_change + 25.0).abs() < 1e-9);
    }

    #[test]
    fn single_month_has_no_change() {
        let summary = total_sales(&monthly_sales([("2026-10", 99.0)]));
        assert!(summary.percentage_change.abs() < f64::EPSILON);
        assert!(total_sales(&[]).total.abs() < f64::EPSILON);
    }
}
