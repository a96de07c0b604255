use std::fmt;

use zeroize::{Zeroize, ZeroizeOnDrop};

use super::ProviderError;

// ──────────────────────────────────────────────
// Credential
// ──────────────────────────────────────────────

/// Bearer credential for a model provider.
///
/// Wiped from memory on drop. `Debug` is redacted so a provider can be
/// logged or asserted on without leaking the key.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct Credential(String);

impl Credential {
    pub fn new(secret: impl Into<String>) -> Self {
        Self(secret.into())
    }

    /// Raw secret. Only the transport header builder should call this.
    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(***)")
    }
}

// ──────────────────────────────────────────────
// Provider
// ──────────────────────────────────────────────

/// A named capability endpoint: base URL + credential + model identifier.
///
/// Immutable once built. Several providers may share one credential.
#[derive(Debug, Clone)]
pub struct Provider {
    name: String,
    base_url: String,
    credential: Credential,
    model: String,
}

impl Provider {
    /// Build a provider, rejecting empty fields and non-HTTP base URLs.
    pub fn new(
        name: &str,
        base_url: &str,
        credential: Credential,
        model: &str,
    ) -> Result<Self, ProviderError> {
        let check = |field: &'static str, value: &str| {
            if value.trim().is_empty() {
                Err(ProviderError::EmptyField {
                    provider: name.to_string(),
                    field,
                })
            } else {
                Ok(())
            }
        };
        check("name", name)?;
        check("base_url", base_url)?;
        check("model", model)?;
        if credential.is_empty() {
            return Err(ProviderError::EmptyField {
                provider: name.to_string(),
                field: "credential",
            });
        }
        validate_base_url(base_url)?;

        Ok(Self {
            name: name.trim().to_string(),
            base_url: base_url.trim().trim_end_matches('/').to_string(),
            credential,
            model: model.trim().to_string(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn credential(&self) -> &Credential {
        &self.credential
    }

    /// Join a path onto the base URL. An empty path yields the base URL itself.
    pub fn endpoint(&self, path: &str) -> String {
        if path.is_empty() {
            self.base_url.clone()
        } else {
            format!("{}/{}", self.base_url, path.trim_start_matches('/'))
        }
    }

    /// Identity used for call pacing: base URL and model fully determine the
    /// remote capability.
    pub fn capability_key(&self) -> String {
        format!("{}#{}", self.base_url, self.model)
    }
}

/// Accept only `http://` or `https://` URLs with a non-empty host.
fn validate_base_url(url: &str) -> Result<(), ProviderError> {
    let after_scheme = url
        .trim()
        .strip_prefix("http://")
        .or_else(|| url.trim().strip_prefix("https://"))
        .ok_or_else(|| ProviderError::InvalidUrl(url.to_string()))?;

    let host = after_scheme.split(['/', ':']).next().unwrap_or("");
    if host.is_empty() {
        return Err(ProviderError::InvalidUrl(url.to_string()));
    }
    Ok(())
}
