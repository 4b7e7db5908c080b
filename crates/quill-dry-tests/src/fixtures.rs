// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Settings documents and in-process wiring of the application router.

use std::sync::Arc;

use quill_api::models::settings::{AuthSettings, ProviderCredentials, SocialProvider, MIN_SECRET_LEN};
use quill_api::{app_router, seed_demo, MemoryStore, Store};
use quill_registry_api::{Caller, Context, InProcessTransport, Registry};

/// Settings with `enabled` providers switched on, complete credentials for
/// `with_credentials`, and the given secret.
pub fn auth_settings(
    enabled: &[SocialProvider],
    with_credentials: &[SocialProvider],
    secret: &str,
) -> AuthSettings {
    let mut settings = AuthSettings {
        secret: secret.to_string(),
        ..AuthSettings::default()
    };
    for provider in enabled {
        settings.set_enabled(*provider, true);
    }
    for provider in with_credentials {
        settings.provider_credentials.insert(
            *provider,
            ProviderCredentials {
                client_id: format!("{provider}-client-id"),
                client_secret: format!("{provider}-client-secret"),
            },
        );
    }
    settings
}

/// Google enabled with credentials and a secret of exactly the minimum length.
pub fn valid_auth_settings() -> AuthSettings {
    auth_settings(
        &[SocialProvider::Google],
        &[SocialProvider::Google],
        &"k".repeat(MIN_SECRET_LEN),
    )
}

/// Google enabled without credentials; otherwise valid.
pub fn settings_with_missing_credentials() -> AuthSettings {
    auth_settings(&[SocialProvider::Google], &[], &"k".repeat(MIN_SECRET_LEN))
}

/// Valid credentials but a 20-character secret.
pub fn weak_secret_settings() -> AuthSettings {
    auth_settings(&[SocialProvider::Google], &[SocialProvider::Google], &"k".repeat(20))
}

/// Application router over a fresh [`MemoryStore`].
pub struct AppHarness {
    /// Backing store, for seeding and outage simulation.
    pub store: Arc<MemoryStore>,
    /// Registry built by [`app_router`].
    pub registry: Arc<Registry>,
}

impl AppHarness {
    /// Empty store.
    pub fn new() -> Self {
        Self::over(Arc::new(MemoryStore::new()))
    }

    /// Store seeded with the demo data set.
    pub fn seeded() -> Self {
        let store = Arc::new(MemoryStore::new());
        // The in-memory store only fails while an outage is set.
        let _ = seed_demo(&*store);
        Self::over(store)
    }

    /// Harness over an existing store.
    pub fn over(store: Arc<MemoryStore>) -> Self {
        let shared: Arc<dyn Store> = store.clone();
        let registry = match app_router(&shared) {
            Ok(registry) => registry,
            // Group names are compile-time constants; a clash is a bug in quill-api.
            Err(err) => unreachable!("app router failed to build: {err}"),
        };
        Self {
            store,
            registry: Arc::new(registry),
        }
    }

    /// Caller acting as `actor`.
    pub fn caller(&self, actor: &str) -> Caller {
        self.registry
            .create_caller(Context::new("test-session").with_actor(actor))
    }

    /// In-process transport acting as `"admin"`.
    pub fn transport(&self) -> InProcessTransport {
        InProcessTransport::new(self.caller("admin"))
    }
}

impl Default for AppHarness {
    fn default() -> Self {
        Self::new()
    }
}

/// In-process transport over a fresh empty store.
pub fn app_transport() -> InProcessTransport {
    AppHarness::new().transport()
}
