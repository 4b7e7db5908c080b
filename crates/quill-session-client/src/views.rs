// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Read-only views over cached queries.

use quill_api::models::billing::TotalSales;
use quill_app_core::format::{format_currency, format_percentage_change};
use quill_registry_api::{CallError, Transport};
use serde::Deserialize;
use serde_json::Value;

use crate::cache::QueryCache;

/// Dashboard card for `billings.getTotalSales`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RevenueCard {
    /// Card heading.
    pub title: &'static str,
    /// Formatted all-time revenue (`"$1,000.00"`).
    pub amount: String,
    /// Formatted change line (`"-5.2% from last month"`).
    pub change: String,
}

impl RevenueCard {
    /// Render `totals`.
    pub fn from_totals(totals: &TotalSales) -> Self {
        Self {
            title: "Total Revenue",
            amount: format_currency(totals.total),
            change: format_percentage_change(totals.percentage_change),
        }
    }
}

fn decode<T: for<'de> Deserialize<'de>>(value: Value) -> Result<T, CallError> {
    serde_json::from_value(value).map_err(|e| CallError::remote("decode", e.to_string()))
}

/// Query total sales and render the revenue card.
pub async fn total_revenue<T: Transport>(cache: &QueryCache<T>) -> Result<RevenueCard, CallError> {
    let value = cache.query("billings", "getTotalSales", Value::Null).await?;
    let totals: TotalSales = decode(value)?;
    Ok(RevenueCard::from_totals(&totals))
}

/// One button on the login page.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LoginProvider {
    /// Record id (`"provider-google"`).
    pub id: String,
    /// Provider id (`"google"`).
    pub name: String,
    /// Button label (`"Google"`).
    pub label: String,
}

/// Providers to offer on the login page: enabled and fully configured.
pub async fn login_providers<T: Transport>(cache: &QueryCache<T>) -> Result<Vec<LoginProvider>, CallError> {
    let value = cache
        .query("settings", "socialAuthProviders", Value::Null)
        .await?;
    decode(value)
}
