//! Reconfigurable API key authenticator
//!
//! The authenticator validates a credential taken from a request header
//! against a set of accepted keys, with an optional dynamic validator as
//! fallback. Its settings can be replaced at runtime while requests are
//! being validated; see [`super::store`] for the two publication strategies.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use axum::http::{Extensions, HeaderMap};
use subtle::{Choice, ConstantTimeEq};

use super::store::{new_store, ReadStrategy, SettingsStore};

/// Header used when the configured header name is blank
pub const DEFAULT_HEADER_NAME: &str = "X-API-Key";

/// Custom credential check consulted when no static key matches
///
/// Receives the request-scoped extensions and the presented credential.
pub type DynamicValidator = Arc<dyn Fn(&Extensions, &str) -> bool + Send + Sync>;

/// Authenticator settings, replaced wholesale on every change
#[derive(Clone)]
pub struct AuthSettings {
    /// Whether credential checks are enforced
    pub enabled: bool,

    /// Header carrying the credential (never empty)
    pub header_name: String,

    /// Accepted static keys (never contains an empty string)
    pub accepted_keys: BTreeSet<String>,

    /// Optional fallback validator
    pub dynamic_validator: Option<DynamicValidator>,
}

impl AuthSettings {
    /// Create normalized settings
    ///
    /// The header name is trimmed and falls back to [`DEFAULT_HEADER_NAME`]
    /// when blank. Keys are trimmed and empty keys are dropped.
    pub fn new<I, S>(enabled: bool, header_name: &str, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            enabled,
            header_name: normalize_header_name(header_name),
            accepted_keys: normalize_keys(keys),
            dynamic_validator: None,
        }
    }
}

impl Default for AuthSettings {
    fn default() -> Self {
        Self::new(false, DEFAULT_HEADER_NAME, Vec::<String>::new())
    }
}

impl fmt::Debug for AuthSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Keys are secrets; only their count is shown.
        f.debug_struct("AuthSettings")
            .field("enabled", &self.enabled)
            .field("header_name", &self.header_name)
            .field("accepted_keys", &self.accepted_keys.len())
            .field("dynamic_validator", &self.dynamic_validator.is_some())
            .finish()
    }
}

fn normalize_header_name(header_name: &str) -> String {
    let trimmed = header_name.trim();
    if trimmed.is_empty() {
        DEFAULT_HEADER_NAME.to_string()
    } else {
        trimmed.to_string()
    }
}

fn normalize_keys<I, S>(keys: I) -> BTreeSet<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    keys.into_iter()
        .map(|k| k.as_ref().trim().to_string())
        .filter(|k| !k.is_empty())
        .collect()
}

/// How a request was authenticated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMethod {
    /// Matched one of the accepted static keys
    StaticKey,
    /// Accepted by the dynamic validator
    DynamicValidator,
}

/// Marker inserted into the request extensions on successful authentication
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Authenticated(pub AuthMethod);

/// Result of checking a presented credential
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthOutcome {
    /// Authentication is disabled; the request passes through
    Disabled,
    /// No credential was presented; other mechanisms decide
    NoCredential,
    /// The credential was accepted
    Accepted(AuthMethod),
    /// A credential was presented and rejected
    Rejected,
}

impl AuthOutcome {
    /// Whether the request may proceed
    pub fn is_allowed(&self) -> bool {
        !matches!(self, AuthOutcome::Rejected)
    }
}

/// Runtime-reconfigurable credential authenticator
pub struct Authenticator {
    store: Box<dyn SettingsStore>,
}

impl Authenticator {
    /// Create a disabled authenticator using the given read strategy
    pub fn new(strategy: ReadStrategy) -> Self {
        Self::with_settings(strategy, AuthSettings::default())
    }

    /// Create an authenticator with initial settings
    pub fn with_settings(strategy: ReadStrategy, settings: AuthSettings) -> Self {
        Self {
            store: new_store(strategy, settings),
        }
    }

    /// The read strategy in use
    pub fn strategy(&self) -> ReadStrategy {
        self.store.strategy()
    }

    /// Current settings snapshot
    pub fn settings(&self) -> Arc<AuthSettings> {
        self.store.load()
    }

    /// Whether credential checks are enforced
    pub fn is_enabled(&self) -> bool {
        self.store.load().enabled
    }

    /// Header carrying the credential
    pub fn header_name(&self) -> String {
        self.store.load().header_name.clone()
    }

    /// Replace enabled flag, header name and key set in one atomic update
    ///
    /// The installed dynamic validator is kept.
    pub fn configure<I, S>(&self, enabled: bool, header_name: &str, keys: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut next = AuthSettings::new(enabled, header_name, keys);
        let key_count = next.accepted_keys.len();
        let header = next.header_name.clone();

        self.store.update(&mut |current| {
            next.dynamic_validator = current.dynamic_validator.clone();
            next.clone()
        });

        tracing::debug!(enabled, header = %header, keys = key_count, "Authenticator reconfigured");
    }

    /// Replace or clear the dynamic validator
    pub fn set_dynamic_validator(&self, validator: Option<DynamicValidator>) {
        let installed = validator.is_some();
        self.store.update(&mut |current| {
            let mut next = current.clone();
            next.dynamic_validator = validator.clone();
            next
        });

        tracing::debug!(installed, "Dynamic validator replaced");
    }

    /// Check a credential without touching the request extensions
    pub fn check(&self, ctx: &Extensions, incoming: &str) -> AuthOutcome {
        let settings = self.store.load();
        evaluate(&settings, ctx, incoming)
    }

    /// Validate a credential, marking the request on success
    ///
    /// Returns `true` when disabled, when no credential is presented, or when
    /// the credential is accepted. Only an accepted credential inserts the
    /// [`Authenticated`] marker.
    pub fn authenticate(&self, ctx: &mut Extensions, incoming: &str) -> bool {
        let outcome = self.check(ctx, incoming);
        mark(ctx, outcome);
        outcome.is_allowed()
    }

    /// Validate the credential found in `headers`
    ///
    /// The header name and the keys come from the same snapshot.
    pub fn authenticate_headers(&self, headers: &HeaderMap, ctx: &mut Extensions) -> AuthOutcome {
        let settings = self.store.load();
        if !settings.enabled {
            return AuthOutcome::Disabled;
        }

        let outcome = match headers.get(settings.header_name.as_str()) {
            None => AuthOutcome::NoCredential,
            Some(value) => match value.to_str() {
                Ok(incoming) => evaluate(&settings, ctx, incoming),
                // Opaque bytes can never equal a configured key.
                Err(_) => AuthOutcome::Rejected,
            },
        };
        mark(ctx, outcome);
        outcome
    }
}

impl Default for Authenticator {
    fn default() -> Self {
        Self::new(ReadStrategy::default())
    }
}

fn evaluate(settings: &AuthSettings, ctx: &Extensions, incoming: &str) -> AuthOutcome {
    if !settings.enabled {
        return AuthOutcome::Disabled;
    }
    if incoming.is_empty() {
        return AuthOutcome::NoCredential;
    }
    if matches_any_key(&settings.accepted_keys, incoming) {
        return AuthOutcome::Accepted(AuthMethod::StaticKey);
    }
    match &settings.dynamic_validator {
        Some(validator) if validator(ctx, incoming) => {
            AuthOutcome::Accepted(AuthMethod::DynamicValidator)
        }
        _ => AuthOutcome::Rejected,
    }
}

fn mark(ctx: &mut Extensions, outcome: AuthOutcome) {
    if let AuthOutcome::Accepted(method) = outcome {
        ctx.insert(Authenticated(method));
    }
}

/// Compare `incoming` against every key in constant time
///
/// All keys are compared even after a match.
fn matches_any_key(keys: &BTreeSet<String>, incoming: &str) -> bool {
    let mut found = Choice::from(0u8);
    for key in keys {
        found |= key.as_bytes().ct_eq(incoming.as_bytes());
    }
    found.into()
}
