// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! `settings` group: social-login configuration.

use std::future::ready;
use std::sync::Arc;

use quill_registry_api::{CallError, Context, ProcedureGroup, Schema};
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::models::settings::{
    check_auth_settings, AuthSettings, AUTH_SETTINGS_FIELDS, PROVIDER_SUMMARY_FIELDS,
};
use crate::store::Store;

fn to_value(settings: &AuthSettings) -> Result<Value, CallError> {
    serde_json::to_value(settings).map_err(|e| CallError::remote("encode", e.to_string()))
}

fn social_auth(store: &dyn Store) -> Result<Value, CallError> {
    to_value(&store.auth_settings()?)
}

// Shown on the login page: enabled providers that are actually usable.
fn social_auth_providers(store: &dyn Store) -> Result<Value, CallError> {
    let settings = store.auth_settings()?;
    let missing = settings.providers_missing_credentials();
    let providers: Vec<Value> = settings
        .enabled_providers
        .iter()
        .filter(|p| !missing.contains(*p))
        .map(|p| json!({ "id": format!("provider-{}", p.id()), "name": p.id(), "label": p.label() }))
        .collect();
    Ok(Value::Array(providers))
}

fn update_social_auth(store: &dyn Store, ctx: &Context, input: Value) -> Result<Value, CallError> {
    let settings: AuthSettings = serde_json::from_value(input)
        .map_err(|e| CallError::invalid_field("$", e.to_string()))?;
    if let Err(err) = check_auth_settings(&settings) {
        warn!(actor = ?ctx.actor, kind = ?err.kind(), "social auth update rejected");
        return Err(err);
    }
    store.save_auth_settings(&settings)?;
    info!(
        actor = ?ctx.actor,
        providers = settings.enabled_providers.len(),
        "social auth settings saved"
    );
    to_value(&settings)
}

/// Build the `settings` group.
pub fn settings_group(store: Arc<dyn Store>) -> ProcedureGroup {
    let read = Arc::clone(&store);
    let providers = Arc::clone(&store);
    ProcedureGroup::new()
        .query(
            "socialAuth",
            Schema::Unit,
            Schema::Object(AUTH_SETTINGS_FIELDS),
            move |_, _| ready(social_auth(&*read)),
        )
        .query(
            "socialAuthProviders",
            Schema::Unit,
            Schema::RecordList(PROVIDER_SUMMARY_FIELDS),
            move |_, _| ready(social_auth_providers(&*providers)),
        )
        .mutation(
            "updateSocialAuth",
            Schema::Object(AUTH_SETTINGS_FIELDS),
            Schema::Object(AUTH_SETTINGS_FIELDS),
            move |ctx, input| ready(update_social_auth(&*store, &ctx, input)),
        )
}
