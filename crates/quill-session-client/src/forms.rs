// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Social authentication settings form.

use std::time::Instant;

use quill_api::models::settings::{
    require_credentials, require_strong_secret, AuthSettings, ProviderCredentials, SocialProvider,
    AUTH_SETTINGS_FIELDS,
};
use quill_app_core::toast::{ToastKind, ToastMessage, ToastService, DEFAULT_TOAST_TTL};
use quill_registry_api::{CallError, Schema, Transport};
use serde_json::Value;
use tracing::debug;

use crate::cache::{Observer, QueryCache};
use crate::draft::{Draft, DraftState, InvalidationTarget, MutationBinding, SubmitError};

/// `settings.updateSocialAuth`; refreshes both settings queries.
pub const UPDATE_SOCIAL_AUTH: MutationBinding = MutationBinding {
    group: "settings",
    operation: "updateSocialAuth",
    invalidates: &[
        InvalidationTarget::query("settings", "socialAuth"),
        InvalidationTarget::query("settings", "socialAuthProviders"),
    ],
};

/// Toast title shown after a successful save.
pub const SAVED_TITLE: &str = "Success";
/// Toast body shown after a successful save.
pub const SAVED_BODY: &str = "Your social authentication settings have been saved successfully.";

fn decode(value: Value) -> Result<AuthSettings, CallError> {
    serde_json::from_value(value).map_err(|e| CallError::remote("decode", e.to_string()))
}

/// Edit session over the social auth settings document.
///
/// Holds an observer on `settings.socialAuth` for as long as it lives, so a
/// save elsewhere refreshes the form while it has no local edits.
#[derive(Debug)]
pub struct SocialAuthForm<T> {
    cache: QueryCache<T>,
    draft: Draft<AuthSettings>,
    observer: Observer,
}

impl<T: Transport> SocialAuthForm<T> {
    /// Suspend until the current settings arrive, then open a clean draft.
    pub async fn load(cache: &QueryCache<T>) -> Result<Self, CallError> {
        let (value, observer) = cache.suspend("settings", "socialAuth", Value::Null).await?;
        let draft = Draft::new(
            UPDATE_SOCIAL_AUTH,
            Schema::Object(AUTH_SETTINGS_FIELDS),
            decode(value)?,
        )
        .with_rule(require_credentials)
        .with_rule(require_strong_secret)
        .with_issue_title("secret", "Invalid Auth Secret");
        Ok(Self {
            cache: cache.clone(),
            draft,
            observer,
        })
    }

    /// The underlying draft.
    pub fn draft(&self) -> &Draft<AuthSettings> {
        &self.draft
    }

    /// Settings as currently edited.
    pub fn settings(&self) -> &AuthSettings {
        self.draft.value()
    }

    /// Switch a provider on or off. Credentials are kept either way.
    pub fn toggle_provider(&mut self, provider: SocialProvider, enabled: bool) {
        self.draft.edit(|s| s.set_enabled(provider, enabled));
    }

    /// Set both credential halves for `provider`.
    pub fn set_credentials(&mut self, provider: SocialProvider, client_id: &str, client_secret: &str) {
        self.draft.edit(|s| {
            s.provider_credentials.insert(
                provider,
                ProviderCredentials {
                    client_id: client_id.to_string(),
                    client_secret: client_secret.to_string(),
                },
            );
        });
    }

    /// Set the signing secret.
    pub fn set_secret(&mut self, secret: &str) {
        self.draft.edit(|s| s.secret = secret.to_string());
    }

    /// Whether the save button is enabled.
    pub fn can_save(&self) -> bool {
        self.draft.can_submit()
    }

    /// Submit the draft and report the outcome as a toast.
    pub async fn save(&mut self, toasts: &mut ToastService, now: Instant) -> Result<AuthSettings, SubmitError> {
        let result = self.draft.submit(&self.cache).await;
        self.report(result, toasts, now)
    }

    /// Re-send the last failed payload and report the outcome as a toast.
    pub async fn retry(&mut self, toasts: &mut ToastService, now: Instant) -> Result<AuthSettings, SubmitError> {
        let result = self.draft.retry(&self.cache).await;
        self.report(result, toasts, now)
    }

    fn report(
        &self,
        result: Result<Value, SubmitError>,
        toasts: &mut ToastService,
        now: Instant,
    ) -> Result<AuthSettings, SubmitError> {
        match result {
            Ok(_) => {
                toasts.push(
                    ToastMessage::new(ToastKind::Success, SAVED_TITLE).with_body(SAVED_BODY),
                    DEFAULT_TOAST_TTL,
                    now,
                );
                Ok(self.draft.baseline().clone())
            }
            Err(err) => {
                if err.call_error().is_some() {
                    self.draft.present_error(toasts, now);
                }
                Err(err)
            }
        }
    }

    /// Adopt a refreshed server value if one arrived and the form has no
    /// local edits. Returns `true` when the draft was reset.
    pub fn sync(&mut self) -> bool {
        match self.observer.take_update() {
            Some(value) => self.adopt(value),
            None => false,
        }
    }

    /// Wait for the next refreshed server value and adopt it as [`Self::sync`]
    /// does. Returns `false` once the cache entry is gone.
    pub async fn changed(&mut self) -> bool {
        match self.observer.changed().await {
            Some(value) => {
                self.adopt(value);
                true
            }
            None => false,
        }
    }

    fn adopt(&mut self, value: Value) -> bool {
        let idle = matches!(self.draft.state(), DraftState::Clean | DraftState::Submitted);
        if !idle {
            debug!(state = ?self.draft.state(), "settings refreshed under local edits; keeping draft");
            return false;
        }
        match decode(value) {
            Ok(settings) => {
                self.draft.reset_to(settings);
                true
            }
            Err(err) => {
                debug!(%err, "ignoring undecodable settings refresh");
                false
            }
        }
    }
}
