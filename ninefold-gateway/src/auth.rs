//! Authentication and principal store.
//!
//! Two credential paths, tried in order: an exact API-key match, then an
//! HS256 session token. Principals are created once at startup and the
//! table is read-only afterwards. Token expiry is checked by this module
//! (strict less-than) rather than delegated, so `now == expires_at`
//! always rejects.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use ninefold_core::types::Tier;
use ninefold_core::{Error, Result};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{info, warn};

/// An API principal. Lifetime is process lifetime.
#[derive(Debug, Clone, Serialize)]
pub struct Principal {
    pub username: String,
    pub email: String,
    pub tier: Tier,
    pub api_key: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    sub: String,
    email: String,
    tier: Tier,
    exp: u64,
}

pub struct AuthManager {
    principals: HashMap<String, Principal>,
    api_keys: HashMap<String, String>,
    encoding: EncodingKey,
    decoding: DecodingKey,
    token_lifetime: Duration,
}

fn random_token() -> String {
    let mut bytes = [0u8; 32];
    rand::rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

impl AuthManager {
    /// Build the store with the demo principal set. An empty secret gets
    /// replaced by a process-local random one, which means issued tokens
    /// do not survive a restart.
    pub fn new(secret: &str, token_lifetime: Duration) -> Self {
        let secret = if secret.is_empty() {
            warn!("no token secret configured, generating an ephemeral one");
            random_token()
        } else {
            secret.to_string()
        };

        let mut manager = Self {
            principals: HashMap::new(),
            api_keys: HashMap::new(),
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            token_lifetime,
        };

        manager.add_principal("demo", "demo@ninefold.local", Tier::Free);
        manager.add_principal("beta_tester", "beta@ninefold.local", Tier::Beta);
        manager.add_principal("premium", "premium@ninefold.local", Tier::Premium);
        manager
    }

    fn add_principal(&mut self, username: &str, email: &str, tier: Tier) {
        let api_key = format!("nf-{}", random_token());
        self.api_keys.insert(api_key.clone(), username.to_string());
        self.principals.insert(
            username.to_string(),
            Principal {
                username: username.to_string(),
                email: email.to_string(),
                tier,
                api_key,
            },
        );
        info!(username, %tier, "created principal");
    }

    pub fn principal(&self, username: &str) -> Option<&Principal> {
        self.principals.get(username)
    }

    pub fn principals(&self) -> impl Iterator<Item = &Principal> {
        self.principals.values()
    }

    /// Credential seam. The in-process implementation accepts any secret
    /// for a known username; a real verifier slots in here.
    pub fn verify_credentials(&self, username: &str, _secret: &str) -> Result<&Principal> {
        self.principals
            .get(username)
            .ok_or_else(|| Error::Unauthorised("invalid credentials".to_string()))
    }

    /// Issue a fresh session token for a principal.
    pub fn issue_token(&self, principal: &Principal) -> Result<String> {
        let claims = Claims {
            sub: principal.username.clone(),
            email: principal.email.clone(),
            tier: principal.tier,
            exp: jsonwebtoken::get_current_timestamp() + self.token_lifetime.as_secs(),
        };

        jsonwebtoken::encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|e| Error::Internal(format!("token signing failed: {}", e)))
    }

    pub fn token_lifetime(&self) -> Duration {
        self.token_lifetime
    }

    /// Exact API-key lookup.
    pub fn verify_api_key(&self, api_key: &str) -> Option<&Principal> {
        self.api_keys
            .get(api_key)
            .and_then(|username| self.principals.get(username))
    }

    /// Verify a session token: signature first, then strict expiry, then
    /// the embedded principal.
    pub fn verify_token(&self, token: &str) -> Result<&Principal> {
        // Expiry is enforced manually below with strict semantics.
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = false;

        let data = jsonwebtoken::decode::<Claims>(token, &self.decoding, &validation)
            .map_err(|_| Error::TokenInvalid)?;

        if jsonwebtoken::get_current_timestamp() >= data.claims.exp {
            return Err(Error::TokenExpired);
        }

        self.principals
            .get(&data.claims.sub)
            .ok_or(Error::TokenInvalid)
    }
}
