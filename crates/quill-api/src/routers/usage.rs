// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! `usage` group: metered consumption records plus a per-metric summary.

use std::collections::BTreeMap;
use std::future::ready;
use std::sync::Arc;

use quill_registry_api::{CallError, FieldDef, FieldType, ProcedureGroup, Schema};
use serde_json::{json, Value};

use super::{crud_group, USAGE_FIELDS};
use crate::store::Store;
use crate::USAGE;

const SUMMARY_FIELDS: &[FieldDef] = &[
    FieldDef::required("metric", FieldType::String),
    FieldDef::required("quantity", FieldType::Integer),
    FieldDef::required("records", FieldType::Integer),
];

fn summary(store: &dyn Store) -> Result<Value, CallError> {
    let mut totals: BTreeMap<String, (i64, u64)> = BTreeMap::new();
    for record in store.list(USAGE)? {
        let Some(metric) = record.get("metric").and_then(Value::as_str) else {
            continue;
        };
        let quantity = record.get("quantity").and_then(Value::as_i64).unwrap_or(0);
        let slot = totals.entry(metric.to_string()).or_default();
        slot.0 = slot.0.saturating_add(quantity);
        slot.1 += 1;
    }
    Ok(Value::Array(
        totals
            .into_iter()
            .map(|(metric, (quantity, records))| {
                json!({ "metric": metric, "quantity": quantity, "records": records })
            })
            .collect(),
    ))
}

/// Build the `usage` group: CRUD over `usage` plus `summary`.
pub fn usage_group(store: Arc<dyn Store>) -> ProcedureGroup {
    crud_group(Arc::clone(&store), USAGE, USAGE_FIELDS).query(
        "summary",
        Schema::Unit,
        Schema::List(SUMMARY_FIELDS),
        move |_, _| ready(summary(&*store)),
    )
}
