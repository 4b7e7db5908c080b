// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! `user` group: the calling identity plus admin CRUD over `users`.

use std::future::ready;
use std::sync::Arc;

use quill_registry_api::{Context, FieldDef, FieldType, ProcedureGroup, Schema};
use serde_json::json;

use super::{crud_group, USER_FIELDS};
use crate::store::Store;
use crate::USERS;

const ME_FIELDS: &[FieldDef] = &[
    FieldDef::optional("actor", FieldType::String),
    FieldDef::required("sessionId", FieldType::String),
];

/// Build the `user` group.
pub fn user_group(store: Arc<dyn Store>) -> ProcedureGroup {
    crud_group(store, USERS, USER_FIELDS).query(
        "me",
        Schema::Unit,
        Schema::Object(ME_FIELDS),
        |ctx: Arc<Context>, _| ready(Ok(json!({ "actor": ctx.actor, "sessionId": ctx.session_id }))),
    )
}
