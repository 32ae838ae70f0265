use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::amount::Amount;
use crate::error::HubError;
use crate::ids::{ContractId, SessionId, UserId};

type HmacSha256 = Hmac<Sha256>;

/// Fixed token header; only one algorithm family is ever minted.
const HEADER_JSON: &str = r#"{"alg":"HS256","typ":"JWT"}"#;

/// Claims carried by a session token. The token is a self-contained
/// capability: the engine can verify it without touching the session
/// store. `expires_at` here is informational; the session row is the
/// authority on expiry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionTokenClaims {
    pub session_id: SessionId,
    pub contract_id: ContractId,
    pub player_ids: Vec<UserId>,
    pub total_pot: Amount,
    pub expires_at: DateTime<Utc>,
    pub iat: i64,
}

/// Mints and verifies `header.body.tag` session tokens with a
/// process-wide secret. The tag is HMAC-SHA256 over `header.body`;
/// verification compares in constant time.
pub struct SessionTokenCodec {
    secret: Vec<u8>,
}

impl SessionTokenCodec {
    pub fn new(secret: impl Into<Vec<u8>>) -> Self {
        Self {
            secret: secret.into(),
        }
    }

    pub fn mint(&self, claims: &SessionTokenClaims) -> Result<String, HubError> {
        let header = URL_SAFE_NO_PAD.encode(HEADER_JSON);
        let body_json = serde_json::to_vec(claims)
            .map_err(|err| HubError::internal(format!("token body encoding failed: {err}")))?;
        let body = URL_SAFE_NO_PAD.encode(body_json);
        let signing_input = format!("{header}.{body}");
        let tag = URL_SAFE_NO_PAD.encode(self.tag(signing_input.as_bytes()));
        Ok(format!("{signing_input}.{tag}"))
    }

    /// Returns the decoded claims iff the MAC verifies. Every malformed or
    /// tampered input collapses to the same `InvalidToken` error.
    pub fn verify(&self, token: &str) -> Result<SessionTokenClaims, HubError> {
        let mut parts = token.split('.');
        let (Some(header), Some(body), Some(tag), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(HubError::InvalidToken);
        };

        let tag_bytes = URL_SAFE_NO_PAD
            .decode(tag)
            .map_err(|_| HubError::InvalidToken)?;
        let signing_input = format!("{header}.{body}");
        let mut mac = self.mac();
        mac.update(signing_input.as_bytes());
        mac.verify_slice(&tag_bytes)
            .map_err(|_| HubError::InvalidToken)?;

        let header_bytes = URL_SAFE_NO_PAD
            .decode(header)
            .map_err(|_| HubError::InvalidToken)?;
        if header_bytes != HEADER_JSON.as_bytes() {
            return Err(HubError::InvalidToken);
        }

        let body_bytes = URL_SAFE_NO_PAD
            .decode(body)
            .map_err(|_| HubError::InvalidToken)?;
        serde_json::from_slice(&body_bytes).map_err(|_| HubError::InvalidToken)
    }

    fn mac(&self) -> HmacSha256 {
        // HMAC accepts keys of any length
        HmacSha256::new_from_slice(&self.secret).expect("hmac key")
    }

    fn tag(&self, input: &[u8]) -> Vec<u8> {
        let mut mac = self.mac();
        mac.update(input);
        mac.finalize().into_bytes().to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn claims() -> SessionTokenClaims {
        let minted_at = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        SessionTokenClaims {
            session_id: SessionId::from("sess_1"),
            contract_id: ContractId::from("ctr_1"),
            player_ids: vec![UserId::from("usr_a"), UserId::from("usr_b")],
            total_pot: Amount::from(200),
            expires_at: minted_at + chrono::Duration::seconds(300),
            iat: minted_at.timestamp(),
        }
    }

    #[test]
    fn mint_then_verify_round_trips() {
        let codec = SessionTokenCodec::new(b"test-secret".to_vec());
        let token = codec.mint(&claims()).unwrap();
        assert_eq!(token.matches('.').count(), 2);
        assert_eq!(codec.verify(&token).unwrap(), claims());
    }

    #[test]
    fn tampering_with_any_part_fails_verification() {
        let codec = SessionTokenCodec::new(b"test-secret".to_vec());
        let token = codec.mint(&claims()).unwrap();
        let parts: Vec<&str> = token.split('.').collect();

        for idx in 0..3 {
            let mut mutated = parts.clone();
            let flipped = flip_last_char(mutated[idx]);
            mutated[idx] = &flipped;
            let tampered = mutated.join(".");
            assert_eq!(
                codec.verify(&tampered).unwrap_err(),
                HubError::InvalidToken,
                "part {idx} tamper must fail"
            );
        }
    }

    fn flip_last_char(part: &str) -> String {
        let mut chars: Vec<char> = part.chars().collect();
        let last = chars.last_mut().unwrap();
        *last = if *last == 'A' { 'B' } else { 'A' };
        chars.into_iter().collect()
    }

    #[test]
    fn wrong_secret_and_malformed_tokens_are_rejected() {
        let codec = SessionTokenCodec::new(b"test-secret".to_vec());
        let other = SessionTokenCodec::new(b"other-secret".to_vec());
        let token = codec.mint(&claims()).unwrap();

        assert_eq!(other.verify(&token).unwrap_err(), HubError::InvalidToken);
        assert_eq!(codec.verify("not-a-token").unwrap_err(), HubError::InvalidToken);
        assert_eq!(codec.verify("a.b").unwrap_err(), HubError::InvalidToken);
        assert_eq!(codec.verify("a.b.c.d").unwrap_err(), HubError::InvalidToken);
    }

    #[test]
    fn pot_travels_as_a_decimal_string() {
        let codec = SessionTokenCodec::new(b"test-secret".to_vec());
        let token = codec.mint(&claims()).unwrap();
        let body = token.split('.').nth(1).unwrap();
        let json = URL_SAFE_NO_PAD.decode(body).unwrap();
        let value: serde_json::Value = serde_json::from_slice(&json).unwrap();
        assert_eq!(value["totalPot"], serde_json::json!("200"));
    }
}
