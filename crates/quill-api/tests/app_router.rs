// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>

#![allow(missing_docs)]
#![allow(clippy::unwrap_used, clippy::panic)]

use std::sync::Arc;

use quill_api::models::settings::{AuthSettings, ProviderCredentials, SocialProvider};
use quill_api::{app_router, seed_demo, MemoryStore, Store, GROUP_NAMES, PAYMENTS};
use quill_registry_api::{CallError, Caller, Context, ErrorKind, OpKind, RegistryError};
use serde_json::{json, Value};

fn caller_over(store: Arc<MemoryStore>) -> Caller {
    let dyn_store: Arc<dyn Store> = store;
    let registry = Arc::new(app_router(&dyn_store).unwrap());
    registry.create_caller(Context::new("s-1").with_actor("admin"))
}

fn strong_settings() -> Value {
    json!({
        "enabledProviders": ["google"],
        "providerCredentials": { "google": { "clientId": "cid", "clientSecret": "csecret" } },
        "secret": "x".repeat(32),
    })
}

#[test]
fn groups_register_in_declared_order() {
    let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
    let registry = app_router(&store).unwrap();
    let names: Vec<_> = registry.group_names().collect();
    assert_eq!(names, GROUP_NAMES);
}

#[test]
fn every_listed_procedure_resolves_to_itself() {
    let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
    let registry = app_router(&store).unwrap();
    let mut seen = 0;
    for def in registry.procedures() {
        let resolved = registry.resolve(def.group, def.name).unwrap();
        assert_eq!(resolved, def);
        seen += 1;
    }
    assert_eq!(seen, registry.len());
    assert_eq!(
        registry.resolve("settings", "updateSocialAuth").unwrap().kind,
        OpKind::Mutation
    );
    assert_eq!(
        registry.resolve("billings", "getTotalSales").unwrap().kind,
        OpKind::Query
    );
}

#[test]
fn unknown_pairs_are_not_found() {
    let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
    let registry = app_router(&store).unwrap();
    assert!(matches!(
        registry.resolve("settings", "nope"),
        Err(RegistryError::NotFound { .. })
    ));
    assert!(matches!(
        registry.resolve("invoices", "list"),
        Err(RegistryError::NotFound { .. })
    ));
}

#[tokio::test]
async fn unknown_call_is_not_found_not_validation() {
    let caller = caller_over(Arc::new(MemoryStore::new()));
    let err = caller.call("billings", "refund", Value::Null).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[tokio::test]
async fn me_reports_the_calling_context() {
    let caller = caller_over(Arc::new(MemoryStore::new()));
    let me = caller.call("user", "me", Value::Null).await.unwrap();
    assert_eq!(me, json!({ "actor": "admin", "sessionId": "s-1" }));
}

#[tokio::test]
async fn social_auth_update_persists_and_lists_usable_providers() {
    let store = Arc::new(MemoryStore::new());
    let caller = caller_over(Arc::clone(&store));
    let saved = caller
        .call("settings", "updateSocialAuth", strong_settings())
        .await
        .unwrap();
    assert_eq!(saved, strong_settings());

    let read = caller.call("settings", "socialAuth", Value::Null).await.unwrap();
    assert_eq!(read, strong_settings());

    let providers = caller
        .call("settings", "socialAuthProviders", Value::Null)
        .await
        .unwrap();
    assert_eq!(
        providers,
        json!([{ "id": "provider-google", "name": "google", "label": "Google" }])
    );
}

#[tokio::test]
async fn server_rejects_missing_credentials_without_saving() {
    let store = Arc::new(MemoryStore::new());
    let caller = caller_over(Arc::clone(&store));
    let mut input = strong_settings();
    input["enabledProviders"] = json!(["google", "github"]);
    let err = caller
        .call("settings", "updateSocialAuth", input)
        .await
        .unwrap_err();
    match err {
        CallError::MissingCredentials { options, message } => {
            assert_eq!(options, vec!["github".to_string()]);
            assert!(message.ends_with("for: github"));
        }
        other => panic!("unexpected {other:?}"),
    }
    assert_eq!(store.auth_settings().unwrap(), AuthSettings::default());
}

#[tokio::test]
async fn server_rejects_short_secret() {
    let caller = caller_over(Arc::new(MemoryStore::new()));
    let mut input = strong_settings();
    input["secret"] = json!("x".repeat(20));
    let err = caller
        .call("settings", "updateSocialAuth", input)
        .await
        .unwrap_err();
    match err {
        CallError::Validation { issues, .. } => assert_eq!(issues[0].field, "secret"),
        other => panic!("unexpected {other:?}"),
    }
}

#[tokio::test]
async fn malformed_settings_fail_schema_validation() {
    let caller = caller_over(Arc::new(MemoryStore::new()));
    let err = caller
        .call("settings", "updateSocialAuth", json!({ "secret": 5, "extra": true }))
        .await
        .unwrap_err();
    let CallError::Validation { issues, .. } = err else {
        panic!("expected validation");
    };
    let fields: Vec<_> = issues.iter().map(|i| i.field.as_str()).collect();
    assert!(fields.contains(&"enabledProviders"));
    assert!(fields.contains(&"secret"));
    assert!(fields.contains(&"extra"));
}

#[tokio::test]
async fn database_outage_is_a_remote_database_error() {
    let store = Arc::new(MemoryStore::new());
    let caller = caller_over(Arc::clone(&store));
    store.set_outage(Some("connection reset"));
    let err = caller
        .call("settings", "updateSocialAuth", strong_settings())
        .await
        .unwrap_err();
    assert!(matches!(err, CallError::Remote { ref code, .. } if code == "database"));
    assert!(err.is_retryable());
}

#[tokio::test]
async fn total_sales_compares_latest_two_periods() {
    let store = Arc::new(MemoryStore::new());
    seed_demo(&*store).unwrap();
    let caller = caller_over(Arc::clone(&store));
    let totals = caller
        .call("billings", "getTotalSales", Value::Null)
        .await
        .unwrap();
    assert!((totals["total"].as_f64().unwrap() - 3896.0).abs() < 1e-9);
    assert!((totals["percentageChange"].as_f64().unwrap() + 5.2).abs() < 1e-9);

    let months = caller
        .call("billings", "getMonthlySales", Value::Null)
        .await
        .unwrap();
    assert_eq!(months.as_array().unwrap().len(), 2);
    assert_eq!(months[0]["period"], "2026-08");
}

#[tokio::test]
async fn crud_round_trip_through_the_payments_group() {
    let store = Arc::new(MemoryStore::new());
    let caller = caller_over(Arc::clone(&store));
    let created = caller
        .call(
            "payments",
            "create",
            json!({ "customer": "acme", "amount": 10.5, "period": "2026-10" }),
        )
        .await
        .unwrap();
    let id = created["id"].as_str().unwrap().to_string();
    assert_eq!(store.count(PAYMENTS), 1);

    let updated = caller
        .call("payments", "update", json!({ "id": id, "data": { "amount": 11.0 } }))
        .await
        .unwrap();
    assert_eq!(updated["amount"], 11.0);

    let bad = caller
        .call("payments", "update", json!({ "id": id, "data": { "amount": "lots" } }))
        .await
        .unwrap_err();
    assert_eq!(bad.kind(), ErrorKind::Validation);

    let deleted = caller
        .call("payments", "delete", json!({ "id": id }))
        .await
        .unwrap();
    assert_eq!(deleted, json!({ "deleted": true }));
    let missing = caller
        .call("payments", "byId", json!({ "id": id }))
        .await
        .unwrap_err();
    assert!(matches!(missing, CallError::Remote { ref code, .. } if code == "missing_record"));
}

#[tokio::test]
async fn update_cannot_null_a_required_field() {
    let store = Arc::new(MemoryStore::new());
    let caller = caller_over(Arc::clone(&store));
    let created = caller
        .call("products", "create", json!({ "name": "Pen", "price": 1 }))
        .await
        .unwrap();
    let id = created["id"].as_str().unwrap().to_string();

    let err = caller
        .call("products", "update", json!({ "id": id, "data": { "name": null } }))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
    assert_eq!(store.get("products", &id).unwrap().unwrap()["name"], "Pen");

    let listed = caller.call("products", "list", Value::Null).await.unwrap();
    assert_eq!(listed.as_array().unwrap().len(), 1);

    let cleared = caller
        .call("products", "update", json!({ "id": id, "data": { "description": null } }))
        .await
        .unwrap();
    assert_eq!(cleared["name"], "Pen");
}

#[tokio::test]
async fn usage_summary_aggregates_per_metric() {
    let store = Arc::new(MemoryStore::new());
    let caller = caller_over(Arc::clone(&store));
    for (metric, quantity) in [("tokens", 100), ("images", 2), ("tokens", 50)] {
        caller
            .call(
                "usage",
                "create",
                json!({ "metric": metric, "quantity": quantity, "period": "2026-10" }),
            )
            .await
            .unwrap();
    }
    let summary = caller.call("usage", "summary", Value::Null).await.unwrap();
    assert_eq!(
        summary,
        json!([
            { "metric": "images", "quantity": 2, "records": 1 },
            { "metric": "tokens", "quantity": 150, "records": 2 },
        ])
    );
}

#[tokio::test]
async fn usage_summary_saturates_instead_of_overflowing() {
    let store = Arc::new(MemoryStore::new());
    let caller = caller_over(Arc::clone(&store));
    for _ in 0..2 {
        caller
            .call(
                "usage",
                "create",
                json!({ "metric": "tokens", "quantity": i64::MAX, "period": "2026-10" }),
            )
            .await
            .unwrap();
    }
    let summary = caller.call("usage", "summary", Value::Null).await.unwrap();
    assert_eq!(
        summary,
        json!([{ "metric": "tokens", "quantity": i64::MAX, "records": 2 }])
    );
}

#[tokio::test]
async fn providers_without_credentials_are_hidden_from_login() {
    let mut settings = AuthSettings {
        secret: "y".repeat(40),
        ..AuthSettings::default()
    };
    settings.set_enabled(SocialProvider::Github, true);
    settings.set_enabled(SocialProvider::Discord, true);
    settings.provider_credentials.insert(
        SocialProvider::Discord,
        ProviderCredentials {
            client_id: "d".into(),
            client_secret: "s".into(),
        },
    );
    let caller = caller_over(Arc::new(MemoryStore::with_settings(settings)));
    let providers = caller
        .call("settings", "socialAuthProviders", Value::Null)
        .await
        .unwrap();
    assert_eq!(providers.as_array().unwrap().len(), 1);
    assert_eq!(providers[0]["name"], "discord");
}
