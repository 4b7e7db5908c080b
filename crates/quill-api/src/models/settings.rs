// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Social-login settings and the rules both ends enforce before persisting.

use std::collections::BTreeMap;
use std::fmt;

use quill_registry_api::{CallError, FieldDef, FieldType};
use serde::{Deserialize, Serialize};

/// Minimum length of the auth signing secret, in characters.
pub const MIN_SECRET_LEN: usize = 32;

/// Supported third-party login providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SocialProvider {
    /// Google OAuth.
    Google,
    /// GitHub OAuth.
    Github,
    /// Discord OAuth.
    Discord,
}

/// Every provider, in display order.
pub const SOCIAL_PROVIDERS: [SocialProvider; 3] = [
    SocialProvider::Google,
    SocialProvider::Github,
    SocialProvider::Discord,
];

impl SocialProvider {
    /// Wire identifier (`"google"`).
    pub fn id(self) -> &'static str {
        match self {
            Self::Google => "google",
            Self::Github => "github",
            Self::Discord => "discord",
        }
    }

    /// Capitalised label (`"Google"`).
    pub fn label(self) -> &'static str {
        match self {
            Self::Google => "Google",
            Self::Github => "Github",
            Self::Discord => "Discord",
        }
    }
}

impl fmt::Display for SocialProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

/// OAuth client credentials for one provider.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderCredentials {
    /// OAuth client id.
    #[serde(default)]
    pub client_id: String,
    /// OAuth client secret.
    #[serde(default)]
    pub client_secret: String,
}

impl ProviderCredentials {
    /// Both halves present (non-blank).
    pub fn is_complete(&self) -> bool {
        !self.client_id.trim().is_empty() && !self.client_secret.trim().is_empty()
    }
}

/// Social authentication settings document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthSettings {
    /// Providers shown on the login page.
    pub enabled_providers: Vec<SocialProvider>,
    /// Credentials keyed by provider; may hold entries for disabled providers.
    pub provider_credentials: BTreeMap<SocialProvider, ProviderCredentials>,
    /// Session signing secret.
    pub secret: String,
}

/// Wire schema of [`AuthSettings`].
pub const AUTH_SETTINGS_FIELDS: &[FieldDef] = &[
    FieldDef::required("enabledProviders", FieldType::StringList),
    FieldDef::required("providerCredentials", FieldType::Map),
    FieldDef::required("secret", FieldType::String),
];

/// Wire schema of one entry returned by `settings.socialAuthProviders`.
pub const PROVIDER_SUMMARY_FIELDS: &[FieldDef] = &[
    FieldDef::required("name", FieldType::String),
    FieldDef::required("label", FieldType::String),
];

impl AuthSettings {
    /// Toggle a provider, keeping `enabled_providers` free of duplicates.
    pub fn set_enabled(&mut self, provider: SocialProvider, enabled: bool) {
        let present = self.enabled_providers.contains(&provider);
        if enabled && !present {
            self.enabled_providers.push(provider);
        } else if !enabled {
            self.enabled_providers.retain(|p| *p != provider);
        }
    }

    /// Whether `provider` is enabled.
    pub fn is_enabled(&self, provider: SocialProvider) -> bool {
        self.enabled_providers.contains(&provider)
    }

    /// Enabled providers whose credential pair is incomplete, in enabled order.
    pub fn providers_missing_credentials(&self) -> Vec<SocialProvider> {
        self.enabled_providers
            .iter()
            .copied()
            .filter(|p| {
                !self
                    .provider_credentials
                    .get(p)
                    .is_some_and(ProviderCredentials::is_complete)
            })
            .collect()
    }
}

/// Every enabled provider must carry a complete credential pair.
pub fn require_credentials(settings: &AuthSettings) -> Result<(), CallError> {
    let missing = settings.providers_missing_credentials();
    if missing.is_empty() {
        return Ok(());
    }
    let names: Vec<String> = missing.iter().map(ToString::to_string).collect();
    Err(CallError::MissingCredentials {
        message: format!(
            "Please provide both Client ID and Client Secret for: {}",
            names.join(", ")
        ),
        options: names,
    })
}

/// The signing secret must be at least [`MIN_SECRET_LEN`] characters.
pub fn require_strong_secret(settings: &AuthSettings) -> Result<(), CallError> {
    if settings.secret.chars().count() < MIN_SECRET_LEN {
        return Err(CallError::invalid_field(
            "secret",
            format!("Auth secret must be at least {MIN_SECRET_LEN} characters long for security."),
        ));
    }
    Ok(())
}

/// Cross-field rules in the order the form applies them.
pub fn check_auth_settings(settings: &AuthSettings) -> Result<(), CallError> {
    require_credentials(settings)?;
    require_strong_secret(settings)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use quill_registry_api::{ErrorKind, Schema};

    fn strong() -> AuthSettings {
        AuthSettings {
            secret: "s".repeat(MIN_SECRET_LEN),
            ..AuthSettings::default()
        }
    }

    #[test]
    fn wire_shape_matches_schema() {
        let mut settings = strong();
        settings.set_enabled(SocialProvider::Google, true);
        settings.provider_credentials.insert(
            SocialProvider::Google,
            ProviderCredentials {
                client_id: "id".into(),
                client_secret: "secret".into(),
            },
        );
        let json = serde_json::to_value(&settings).unwrap();
        assert_eq!(json["enabledProviders"][0], "google");
        assert_eq!(json["providerCredentials"]["google"]["clientId"], "id");
        assert!(Schema::Object(AUTH_SETTINGS_FIELDS).validate(&json).is_ok());
    }

    #[test]
    fn enabled_provider_without_credentials_is_reported() {
        let mut settings = strong();
        settings.set_enabled(SocialProvider::Google, true);
        settings.set_enabled(SocialProvider::Github, true);
        settings.provider_credentials.insert(
            SocialProvider::Github,
            ProviderCredentials {
                client_id: "gh".into(),
                client_secret: " ".into(),
            },
        );
        let err = check_auth_settings(&settings).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MissingCredentials);
        assert_eq!(
            err,
            CallError::MissingCredentials {
                options: vec!["google".into(), "github".into()],
                message: "Please provide both Client ID and Client Secret for: google, github"
                    .into(),
            }
        );
    }

    #[test]
    fn short_secret_is_a_validation_error() {
        let settings = AuthSettings {
            secret: "x".repeat(20),
            ..AuthSettings::default()
        };
        let err = check_auth_settings(&settings).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[test]
    fn toggling_is_idempotent() {
        let mut settings = AuthSettings::default();
        settings.set_enabled(SocialProvider::Discord, true);
        settings.set_enabled(SocialProvider::Discord, true);
        assert_eq!(settings.enabled_providers, vec![SocialProvider::Discord]);
        settings.set_enabled(SocialProvider::Discord, false);
        assert!(!settings.is_enabled(SocialProvider::Discord));
    }
}
