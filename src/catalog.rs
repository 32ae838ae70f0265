use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::amount::Amount;
use crate::error::HubError;
use crate::ids::{ContractId, GameId};

/// A registered game backend. Immutable after creation; the stored secret
/// digest is one-way, the plaintext secret lives only with the backend and
/// the signature verifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Game {
    pub game_id: GameId,
    pub name: String,
    pub client_secret_digest: String,
    pub callback_url: Option<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

/// One-way digest of a game's shared secret, hex-encoded.
pub fn digest_client_secret(secret: &[u8]) -> String {
    hex::encode(Sha256::digest(secret))
}

/// Immutable economic rule template governing a class of matches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contract {
    pub contract_id: ContractId,
    pub game_id: GameId,
    pub name: String,
    pub entry_fee: Amount,
    /// Whole-percent platform cut, floored at settlement.
    pub platform_fee_percent: u32,
    pub min_players: u32,
    pub max_players: u32,
    pub ttl_seconds: u64,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

impl Contract {
    pub fn validate(&self) -> Result<(), HubError> {
        if self.min_players < 1 {
            return Err(HubError::validation_field(
                "minPlayers",
                "must be at least 1",
            ));
        }
        if self.max_players < self.min_players {
            return Err(HubError::validation_field(
                "maxPlayers",
                "cannot be below minPlayers",
            ));
        }
        if self.ttl_seconds == 0 {
            return Err(HubError::validation_field(
                "ttlSeconds",
                "must be greater than zero",
            ));
        }
        if self.platform_fee_percent > 100 {
            return Err(HubError::validation_field(
                "platformFeePercent",
                "cannot exceed 100",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn contract() -> Contract {
        Contract {
            contract_id: ContractId::generate(),
            game_id: GameId::generate(),
            name: "heads-up".into(),
            entry_fee: Amount::from(100),
            platform_fee_percent: 5,
            min_players: 2,
            max_players: 2,
            ttl_seconds: 300,
            is_active: true,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn well_formed_contract_passes() {
        assert!(contract().validate().is_ok());
    }

    #[test]
    fn player_bounds_and_ttl_are_enforced() {
        let mut c = contract();
        c.min_players = 0;
        assert!(c.validate().is_err());

        let mut c = contract();
        c.max_players = 1;
        c.min_players = 3;
        assert!(c.validate().is_err());

        let mut c = contract();
        c.ttl_seconds = 0;
        assert!(c.validate().is_err());

        let mut c = contract();
        c.platform_fee_percent = 101;
        assert!(c.validate().is_err());
    }

    #[test]
    fn secret_digest_is_stable_hex_sha256() {
        let digest = digest_client_secret(b"topsecret");
        assert_eq!(digest.len(), 64);
        assert_eq!(digest, digest_client_secret(b"topsecret"));
        assert_ne!(digest, digest_client_secret(b"other"));
    }
}
