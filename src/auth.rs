use std::collections::HashMap;

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use parking_lot::RwLock;
use sha2::Sha256;

use crate::error::HubError;
use crate::ids::{ExternalAuthId, GameId};

type HmacSha256 = Hmac<Sha256>;

/// External identity provider seam: a bearer token resolves to the
/// opaque subject identifier the provider assigned. Verification against
/// the real provider lives outside this crate.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn verify_bearer(&self, token: &str) -> Result<ExternalAuthId, HubError>;
}

/// Token-table provider for development and tests: tokens registered up
/// front map directly to subjects.
pub struct StaticIdentityProvider {
    tokens: RwLock<HashMap<String, ExternalAuthId>>,
}

impl StaticIdentityProvider {
    pub fn new() -> Self {
        Self {
            tokens: RwLock::new(HashMap::new()),
        }
    }

    pub fn register(&self, token: impl Into<String>, subject: ExternalAuthId) {
        self.tokens.write().insert(token.into(), subject);
    }
}

impl Default for StaticIdentityProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl IdentityProvider for StaticIdentityProvider {
    async fn verify_bearer(&self, token: &str) -> Result<ExternalAuthId, HubError> {
        self.tokens
            .read()
            .get(token)
            .cloned()
            .ok_or(HubError::InvalidToken)
    }
}

/// Game-backend request authentication: a keyed MAC over the literal
/// request body bytes, compared in constant time.
pub trait SignatureVerifier: Send + Sync {
    fn verify(&self, game_id: &GameId, body: &[u8], signature_hex: &str) -> bool;
}

/// Holds each game's shared secret in memory; the catalog only ever
/// stores the one-way digest.
pub struct HmacSignatureVerifier {
    secrets: RwLock<HashMap<GameId, Vec<u8>>>,
}

impl HmacSignatureVerifier {
    pub fn new() -> Self {
        Self {
            secrets: RwLock::new(HashMap::new()),
        }
    }

    pub fn register(&self, game_id: GameId, secret: impl Into<Vec<u8>>) {
        self.secrets.write().insert(game_id, secret.into());
    }

    /// Sign a body the way a game backend would; lowercase hex output.
    pub fn sign(&self, game_id: &GameId, body: &[u8]) -> Option<String> {
        let secrets = self.secrets.read();
        let secret = secrets.get(game_id)?;
        let mut mac = HmacSha256::new_from_slice(secret).expect("hmac key");
        mac.update(body);
        Some(hex::encode(mac.finalize().into_bytes()))
    }
}

impl Default for HmacSignatureVerifier {
    fn default() -> Self {
        Self::new()
    }
}

impl SignatureVerifier for HmacSignatureVerifier {
    fn verify(&self, game_id: &GameId, body: &[u8], signature_hex: &str) -> bool {
        let Ok(signature) = hex::decode(signature_hex) else {
            return false;
        };
        let secrets = self.secrets.read();
        let Some(secret) = secrets.get(game_id) else {
            return false;
        };
        let mut mac = HmacSha256::new_from_slice(secret).expect("hmac key");
        mac.update(body);
        mac.verify_slice(&signature).is_ok()
    }
}
