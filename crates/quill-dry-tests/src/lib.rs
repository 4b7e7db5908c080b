// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Shared test doubles and fixtures for Quill crates.
#![forbid(unsafe_code)]
//!
//! # Modules
//!
//! - [`config`] - In-memory config store fake for testing without filesystem
//! - [`transport`] - Scripted and counting transports for cache/draft tests
//! - [`fixtures`] - Settings documents and in-process app wiring

pub mod config;
pub mod fixtures;
pub mod transport;

pub use config::InMemoryConfigStore;
pub use fixtures::{
    app_transport, auth_settings, settings_with_missing_credentials, valid_auth_settings,
    weak_secret_settings, AppHarness,
};
pub use transport::{CountingTransport, ScriptedTransport};
