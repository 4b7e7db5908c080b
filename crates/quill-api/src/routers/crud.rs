// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Admin CRUD group over one store collection.
//!
//! Declares `list`, `byId`, `create`, `update` and `delete`; the record
//! fields given by the caller become both the create input schema and the
//! output record schema.

use std::future::ready;
use std::sync::Arc;

use quill_registry_api::error::REMOTE_MISSING_RECORD;
use quill_registry_api::{CallError, Context, FieldDef, FieldType, ProcedureGroup, Schema};
use serde_json::{json, Value};
use tracing::info;

use crate::store::Store;

const BY_ID: &[FieldDef] = &[FieldDef::required("id", FieldType::String).min_len(1)];
const UPDATE: &[FieldDef] = &[
    FieldDef::required("id", FieldType::String).min_len(1),
    FieldDef::required("data", FieldType::Map),
];
const DELETED: &[FieldDef] = &[FieldDef::required("deleted", FieldType::Bool)];

fn id_of(input: &Value) -> Result<&str, CallError> {
    input
        .get("id")
        .and_then(Value::as_str)
        .ok_or_else(|| CallError::invalid_field("id", "required"))
}

fn by_id(store: &dyn Store, collection: &str, input: &Value) -> Result<Value, CallError> {
    let id = id_of(input)?;
    store.get(collection, id)?.ok_or_else(|| {
        CallError::remote(
            REMOTE_MISSING_RECORD,
            format!("no record {id} in {collection}"),
        )
    })
}

fn create(store: &dyn Store, ctx: &Context, collection: &str, input: Value) -> Result<Value, CallError> {
    let record = store.insert(collection, input)?;
    info!(collection, id = %record["id"], actor = ?ctx.actor, "record created");
    Ok(record)
}

fn update(
    store: &dyn Store,
    ctx: &Context,
    collection: &str,
    fields: &'static [FieldDef],
    input: &Value,
) -> Result<Value, CallError> {
    let id = id_of(input)?;
    let patch = input.get("data").cloned().unwrap_or(Value::Null);
    Schema::Object(fields)
        .validate_patch(&patch)
        .map_err(CallError::validation)?;
    let record = store.update(collection, id, patch)?;
    info!(collection, id, actor = ?ctx.actor, "record updated");
    Ok(record)
}

fn delete(store: &dyn Store, ctx: &Context, collection: &str, input: &Value) -> Result<Value, CallError> {
    let id = id_of(input)?;
    let deleted = store.remove(collection, id)?;
    info!(collection, id, deleted, actor = ?ctx.actor, "record deleted");
    Ok(json!({ "deleted": deleted }))
}

/// Build the CRUD group for `collection`.
pub fn crud_group(
    store: Arc<dyn Store>,
    collection: &'static str,
    fields: &'static [FieldDef],
) -> ProcedureGroup {
    let (list_store, get_store, create_store, update_store) = (
        Arc::clone(&store),
        Arc::clone(&store),
        Arc::clone(&store),
        Arc::clone(&store),
    );
    ProcedureGroup::new()
        .query("list", Schema::Unit, Schema::RecordList(fields), move |_, _| {
            ready(list_store.list(collection).map(Value::Array).map_err(CallError::from))
        })
        .query("byId", Schema::Object(BY_ID), Schema::Record(fields), move |_, input| {
            ready(by_id(&*get_store, collection, &input))
        })
        .mutation("create", Schema::Object(fields), Schema::Record(fields), move |ctx, input| {
            ready(create(&*create_store, &ctx, collection, input))
        })
        .mutation("update", Schema::Object(UPDATE), Schema::Record(fields), move |ctx, input| {
            ready(update(&*update_store, &ctx, collection, fields, &input))
        })
        .mutation("delete", Schema::Object(BY_ID), Schema::Object(DELETED), move |ctx, input| {
            ready(delete(&*store, &ctx, collection, &input))
        })
}
