// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Application router for the Quill dashboard.
//!
//! [`app_router`] aggregates every procedure group under its stable
//! top-level name. Groups share one [`Store`]; swapping the store swaps the
//! backend for every group at once.

pub mod models;
pub mod routers;
pub mod store;

use std::sync::Arc;

use quill_registry_api::{Registry, RegistryError};
use serde_json::json;

use crate::models::settings::{AuthSettings, ProviderCredentials, SocialProvider};
use crate::routers::{
    billings_group, crud_group, settings_group, usage_group, user_group, BLOG_FIELDS,
    GENERATION_FIELDS, HASHTAG_FIELDS, PAYMENT_FIELDS, PRODUCT_FIELDS, SECURITY_FIELDS,
    TEMPLATE_FIELDS,
};
pub use crate::store::{MemoryStore, Store, StoreError};

/// `users` collection.
pub const USERS: &str = "users";
/// `payments` collection; the source of every billing aggregate.
pub const PAYMENTS: &str = "payments";
/// `products` collection.
pub const PRODUCTS: &str = "products";
/// `usage` collection.
pub const USAGE: &str = "usage";
/// `generations` collection.
pub const GENERATIONS: &str = "generations";
/// `hashtags` collection.
pub const HASHTAGS: &str = "hashtags";
/// `templates` collection.
pub const TEMPLATES: &str = "templates";
/// `security` collection.
pub const SECURITY: &str = "security";
/// `blog` collection.
pub const BLOG: &str = "blog";

/// Top-level group names, in registration order.
pub const GROUP_NAMES: [&str; 11] = [
    "user",
    "settings",
    "payments",
    "products",
    "billings",
    "usage",
    "generations",
    "hashtags",
    "templates",
    "security",
    "blog",
];

/// Build the application registry over `store`.
pub fn app_router(store: &Arc<dyn Store>) -> Result<Registry, RegistryError> {
    let mut registry = Registry::new();
    registry.register("user", user_group(Arc::clone(store)))?;
    registry.register("settings", settings_group(Arc::clone(store)))?;
    registry.register("payments", crud_group(Arc::clone(store), PAYMENTS, PAYMENT_FIELDS))?;
    registry.register("products", crud_group(Arc::clone(store), PRODUCTS, PRODUCT_FIELDS))?;
    registry.register("billings", billings_group(Arc::clone(store)))?;
    registry.register("usage", usage_group(Arc::clone(store)))?;
    registry.register(
        "generations",
        crud_group(Arc::clone(store), GENERATIONS, GENERATION_FIELDS),
    )?;
    registry.register("hashtags", crud_group(Arc::clone(store), HASHTAGS, HASHTAG_FIELDS))?;
    registry.register("templates", crud_group(Arc::clone(store), TEMPLATES, TEMPLATE_FIELDS))?;
    registry.register("security", crud_group(Arc::clone(store), SECURITY, SECURITY_FIELDS))?;
    registry.register("blog", crud_group(Arc::clone(store), BLOG, BLOG_FIELDS))?;
    tracing::debug!(groups = registry.group_names().count(), "app router built");
    Ok(registry)
}

/// Populate `store` with a small demo data set (two months of payments,
/// Google login enabled with credentials).
pub fn seed_demo(store: &dyn Store) -> Result<(), StoreError> {
    for (customer, amount, period) in [
        ("acme", 1200.0, "2026-08"),
        ("globex", 800.0, "2026-08"),
        ("acme", 1100.0, "2026-09"),
        ("initech", 796.0, "2026-09"),
    ] {
        store.insert(
            PAYMENTS,
            json!({ "customer": customer, "amount": amount, "period": period }),
        )?;
    }
    store.insert(PRODUCTS, json!({ "name": "Quill Pro", "price": 49.0, "active": true }))?;
    let mut settings = AuthSettings {
        secret: "demo-secret-demo-secret-demo-secret".to_string(),
        ..AuthSettings::default()
    };
    settings.set_enabled(SocialProvider::Google, true);
    settings.provider_credentials.insert(
        SocialProvider::Google,
        ProviderCredentials {
            client_id: "demo-client".to_string(),
            client_secret: "demo-client-secret".to_string(),
        },
    );
    store.save_auth_settings(&settings)
}
