//! HMAC-based signing for peer-RPC bearer tokens and event integrity tags
//! (spec.md §4.1, §3 Event). Both share one primitive: HMAC-SHA256 over a
//! canonical string, hex-encoded, compared in constant time.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

fn mac(secret: &str, message: &str) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).expect("hmac accepts any key length");
    mac.update(message.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

fn verify(secret: &str, message: &str, signature: &str) -> bool {
    let expected = mac(secret, message);
    let expected = expected.as_bytes();
    let actual = signature.as_bytes();
    if expected.len() != actual.len() {
        return false;
    }
    expected.ct_eq(actual).into()
}

/// Default tolerance for clock skew between cluster nodes when validating a
/// bearer token's embedded timestamp.
pub const TOKEN_SKEW_TOLERANCE_SECS: u64 = 30;

/// Signs a short-lived bearer token binding `server_id` to the shared
/// secret, per spec.md §4.1's "signed short-lived token with the calling
/// server's ID in its claims" suggestion.
pub fn sign_bearer_token(secret: &str, server_id: &str, issued_at_unix: u64) -> String {
    let claims = format!("{}.{}", server_id, issued_at_unix);
    let signature = mac(secret, &claims);
    format!("{}.{}", claims, signature)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenClaims {
    pub server_id: String,
    pub issued_at_unix: u64,
}

/// Verifies a bearer token produced by [`sign_bearer_token`], returning the
/// embedded claims if the signature is valid and the timestamp is within
/// `TOKEN_SKEW_TOLERANCE_SECS` of `now_unix`.
pub fn verify_bearer_token(secret: &str, token: &str, now_unix: u64) -> Option<TokenClaims> {
    let mut parts = token.rsplitn(2, '.');
    let signature = parts.next()?;
    let claims_part = parts.next()?;
    if !verify(secret, claims_part, signature) {
        return None;
    }
    let mut claim_parts = claims_part.splitn(2, '.');
    let server_id = claim_parts.next()?.to_string();
    let issued_at_unix: u64 = claim_parts.next()?.parse().ok()?;
    let skew = now_unix.abs_diff(issued_at_unix);
    if skew > TOKEN_SKEW_TOLERANCE_SECS {
        return None;
    }
    Some(TokenClaims {
        server_id,
        issued_at_unix,
    })
}

/// Computes the integrity tag for an Event's first five fields
/// (spec.md §3): `seq`, `match_id`, `timestamp`, the event's type tag, and
/// `player_id`.
pub fn sign_event(secret: &str, seq: u64, match_id: &str, timestamp: u64, type_tag: &str, player_id: &str) -> String {
    let message = format!("{}|{}|{}|{}|{}", seq, match_id, timestamp, type_tag, player_id);
    mac(secret, &message)
}

pub fn verify_event(
    secret: &str,
    seq: u64,
    match_id: &str,
    timestamp: u64,
    type_tag: &str,
    player_id: &str,
    signature: &str,
) -> bool {
    let message = format!("{}|{}|{}|{}|{}", seq, match_id, timestamp, type_tag, player_id);
    verify(secret, &message, signature)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bearer_token_round_trips() {
        let token = sign_bearer_token("secret", "s1", 1_000);
        let claims = verify_bearer_token("secret", &token, 1_010).unwrap();
        assert_eq!(claims.server_id, "s1");
        assert_eq!(claims.issued_at_unix, 1_000);
    }

    #[test]
    fn bearer_token_rejects_wrong_secret() {
        let token = sign_bearer_token("secret", "s1", 1_000);
        assert!(verify_bearer_token("other", &token, 1_010).is_none());
    }

    #[test]
    fn bearer_token_rejects_expired_skew() {
        let token = sign_bearer_token("secret", "s1", 1_000);
        assert!(verify_bearer_token("secret", &token, 1_000 + TOKEN_SKEW_TOLERANCE_SECS + 1).is_none());
    }

    #[test]
    fn event_signature_round_trips() {
        let sig = sign_event("secret", 1, "m1", 100, "CardPlayed", "a");
        assert!(verify_event("secret", 1, "m1", 100, "CardPlayed", "a", &sig));
        assert!(!verify_event("secret", 2, "m1", 100, "CardPlayed", "a", &sig));
    }
}
