// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! `billings` group: revenue reports derived from the `payments` collection.

use std::future::ready;
use std::sync::Arc;

use quill_registry_api::{CallError, ProcedureGroup, Schema};
use serde_json::Value;

use crate::models::billing::{
    monthly_sales, total_sales, MonthlySales, MONTHLY_SALES_FIELDS, TOTAL_SALES_FIELDS,
};
use crate::store::Store;
use crate::PAYMENTS;

fn months(store: &dyn Store) -> Result<Vec<MonthlySales>, CallError> {
    let payments = store.list(PAYMENTS)?;
    Ok(monthly_sales(payments.iter().filter_map(|p| {
        Some((p.get("period")?.as_str()?, p.get("amount")?.as_f64()?))
    })))
}

fn encode<T: serde::Serialize>(value: &T) -> Result<Value, CallError> {
    serde_json::to_value(value).map_err(|e| CallError::remote("encode", e.to_string()))
}

/// Build the `billings` group.
pub fn billings_group(store: Arc<dyn Store>) -> ProcedureGroup {
    let totals = Arc::clone(&store);
    ProcedureGroup::new()
        .query(
            "getTotalSales",
            Schema::Unit,
            Schema::Object(TOTAL_SALES_FIELDS),
            move |_, _| ready(months(&*totals).and_then(|m| encode(&total_sales(&m)))),
        )
        .query(
            "getMonthlySales",
            Schema::Unit,
            Schema::List(MONTHLY_SALES_FIELDS),
            move |_, _| ready(months(&*store).and_then(|m| encode(&m))),
        )
}
