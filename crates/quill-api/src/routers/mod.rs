// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Per-domain procedure groups.

mod billings;
mod crud;
mod settings;
mod usage;
mod user;

use quill_registry_api::{FieldDef, FieldType};

pub use billings::billings_group;
pub use crud::crud_group;
pub use settings::settings_group;
pub use usage::usage_group;
pub use user::user_group;

/// `products` records.
pub const PRODUCT_FIELDS: &[FieldDef] = &[
    FieldDef::required("name", FieldType::String).min_len(1),
    FieldDef::required("price", FieldType::Number),
    FieldDef::optional("description", FieldType::String),
    FieldDef::optional("active", FieldType::Bool),
];

/// `payments` records; `period` is `YYYY-MM`.
pub const PAYMENT_FIELDS: &[FieldDef] = &[
    FieldDef::required("customer", FieldType::String).min_len(1),
    FieldDef::required("amount", FieldType::Number),
    FieldDef::required("period", FieldType::String).min_len(7),
];

/// `generations` records.
pub const GENERATION_FIELDS: &[FieldDef] = &[
    FieldDef::required("prompt", FieldType::String).min_len(1),
    FieldDef::optional("output", FieldType::String),
    FieldDef::optional("model", FieldType::String),
];

/// `hashtags` records.
pub const HASHTAG_FIELDS: &[FieldDef] = &[
    FieldDef::required("tag", FieldType::String).min_len(2),
    FieldDef::optional("category", FieldType::String),
];

/// `templates` records.
pub const TEMPLATE_FIELDS: &[FieldDef] = &[
    FieldDef::required("name", FieldType::String).min_len(1),
    FieldDef::required("body", FieldType::String),
    FieldDef::optional("tags", FieldType::StringList),
];

/// `usage` records (metered consumption).
pub const USAGE_FIELDS: &[FieldDef] = &[
    FieldDef::required("metric", FieldType::String).min_len(1),
    FieldDef::required("quantity", FieldType::Integer),
    FieldDef::required("period", FieldType::String).min_len(7),
];

/// `security` records (audit events).
pub const SECURITY_FIELDS: &[FieldDef] = &[
    FieldDef::required("event", FieldType::String).min_len(1),
    FieldDef::optional("actor", FieldType::String),
    FieldDef::optional("severity", FieldType::String),
];

/// `blog` records.
pub const BLOG_FIELDS: &[FieldDef] = &[
    FieldDef::required("title", FieldType::String).min_len(1),
    FieldDef::required("slug", FieldType::String).min_len(1),
    FieldDef::required("content", FieldType::String),
    FieldDef::optional("published", FieldType::Bool),
];

/// `users` records.
pub const USER_FIELDS: &[FieldDef] = &[
    FieldDef::required("email", FieldType::String).min_len(3),
    FieldDef::optional("name", FieldType::String),
    FieldDef::optional("role", FieldType::String),
];
