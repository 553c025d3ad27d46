//! API credential resolution
//!
//! The session asks a [`CredentialResolver`] for a key on every connect, so a
//! key saved mid-run is picked up by the next session without a restart.

use secrecy::SecretString;

use crate::db::SettingsRepo;
use crate::{Error, Result};

/// Environment variables consulted when no key is stored, in order
pub const KEY_ENV_VARS: [&str; 2] = ["GEMINI_API_KEY", "API_KEY"];

/// A resolved credential
#[derive(Debug, Clone)]
pub struct Credential {
    /// API key for the live model endpoint
    pub api_key: SecretString,

    /// Endpoint override saved alongside the key
    pub endpoint: Option<String>,
}

/// Source of API credentials
pub trait CredentialResolver {
    /// Resolve the credential for a new session
    ///
    /// # Errors
    ///
    /// Returns `MissingCredential` if no key is available
    fn resolve(&self) -> Result<Credential>;
}

/// Resolves from the settings store, falling back to the environment
pub struct SettingsCredentialResolver {
    settings: SettingsRepo,
    env: Box<dyn Fn(&str) -> Option<String>>,
}

impl SettingsCredentialResolver {
    /// Resolver reading the process environment
    #[must_use]
    pub fn new(settings: SettingsRepo) -> Self {
        Self::with_env(settings, |key| std::env::var(key).ok())
    }

    /// Resolver with a custom environment lookup
    #[must_use]
    pub fn with_env(
        settings: SettingsRepo,
        env: impl Fn(&str) -> Option<String> + 'static,
    ) -> Self {
        Self {
            settings,
            env: Box::new(env),
        }
    }
}

impl CredentialResolver for SettingsCredentialResolver {
    fn resolve(&self) -> Result<Credential> {
        let stored = self.settings.get()?;
        let endpoint = stored.as_ref().and_then(|s| s.api_endpoint.clone());

        if let Some(key) = stored.and_then(|s| s.api_key) {
            tracing::debug!(source = "settings", "resolved api key");
            return Ok(Credential {
                api_key: SecretString::from(key),
                endpoint,
            });
        }

        for var in KEY_ENV_VARS {
            if let Some(key) = (self.env)(var).filter(|k| !k.trim().is_empty()) {
                tracing::debug!(source = var, "resolved api key");
                return Ok(Credential {
                    api_key: SecretString::from(key.trim().to_string()),
                    endpoint,
                });
            }
        }

        Err(Error::MissingCredential(format!(
            "no stored key and none of {} set",
            KEY_ENV_VARS.join(", ")
        )))
    }
}

/// Fixed credential, for embedding callers and tests
#[derive(Debug, Clone)]
pub struct StaticCredentialResolver {
    credential: Option<Credential>,
}

impl StaticCredentialResolver {
    /// Always resolve to `api_key`
    #[must_use]
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            credential: Some(Credential {
                api_key: SecretString::from(api_key.into()),
                endpoint: None,
            }),
        }
    }

    /// Never resolve
    #[must_use]
    pub const fn missing() -> Self {
        Self { credential: None }
    }
}

impl CredentialResolver for StaticCredentialResolver {
    fn resolve(&self) -> Result<Credential> {
        self.credential
            .clone()
            .ok_or_else(|| Error::MissingCredential("no key configured".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use secrecy::ExposeSecret;

    use super::*;
    use crate::db::init_memory;

    fn repo() -> SettingsRepo {
        SettingsRepo::new(init_memory().unwrap())
    }

    #[test]
    fn test_stored_key_wins_over_env() {
        let settings = repo();
        settings.save("stored", Some("https://proxy.example.com")).unwrap();

        let resolver = SettingsCredentialResolver::with_env(settings, |_| Some("env".to_string()));
        let credential = resolver.resolve().unwrap();

        assert_eq!(credential.api_key.expose_secret(), "stored");
        assert_eq!(credential.endpoint.as_deref(), Some("https://proxy.example.com"));
    }

    #[test]
    fn test_env_fallback_order() {
        let resolver = SettingsCredentialResolver::with_env(repo(), |k| match k {
            "GEMINI_API_KEY" => Some("gemini".to_string()),
            "API_KEY" => Some("generic".to_string()),
            _ => None,
        });
        assert_eq!(resolver.resolve().unwrap().api_key.expose_secret(), "gemini");

        let resolver = SettingsCredentialResolver::with_env(repo(), |k| {
            (k == "API_KEY").then(|| "generic".to_string())
        });
        assert_eq!(resolver.resolve().unwrap().api_key.expose_secret(), "generic");
    }

    #[test]
    fn test_missing_everywhere() {
        let resolver = SettingsCredentialResolver::with_env(repo(), |_| Some("   ".to_string()));
        assert!(matches!(resolver.resolve(), Err(Error::MissingCredential(_))));
    }

    #[test]
    fn test_static_resolver() {
        let credential = StaticCredentialResolver::new("k").resolve().unwrap();
        assert_eq!(credential.api_key.expose_secret(), "k");
        assert!(StaticCredentialResolver::missing().resolve().is_err());
    }
}
