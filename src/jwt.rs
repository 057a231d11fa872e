//! JWT payload inspection.
//!
//! Tokens are issued by the identity service and only ever read here: the
//! payload segment is decoded to learn the expiry and the identity claims.
//! Signatures are not verified; the cookies carrying the tokens are
//! `HttpOnly` and only travel over the gateway's own origin.

use base64::Engine;
use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use chrono::Utc;
use serde_json::{Map, Value};

/// Tokens expiring within this window are treated as already expired, so a
/// page load never races a token that lapses mid-request.
pub const DEFAULT_EXPIRY_BUFFER_SECS: i64 = 5 * 60;

/// Candidate keys for the subject id, in priority order.
pub const SUBJECT_CLAIM_KEYS: &[&str] = &["Uid", "sub", "userId", "id", "nameid", "unique_name"];

/// Candidate keys for the email address, in priority order.
pub const EMAIL_CLAIM_KEYS: &[&str] = &["Email", "email"];

/// Candidate keys for the display name, in priority order.
pub const NAME_CLAIM_KEYS: &[&str] = &["FullName", "name", "fullName"];

/// Candidate keys for the role, in priority order.
pub const ROLE_CLAIM_KEYS: &[&str] = &[
    "Role",
    "role",
    "http://schemas.microsoft.com/ws/2008/06/identity/claims/role",
];

// Identity tokens are base64url but some issuers keep the padding.
const PAYLOAD_ENGINE: GeneralPurpose = GeneralPurpose::new(
    &alphabet::URL_SAFE,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// Claims extracted from a token payload. Never stored; recomputed on demand.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Claims {
    pub subject_id: Option<String>,
    pub email: Option<String>,
    pub full_name: Option<String>,
    pub role: Option<String>,
    /// Expiration time (Unix seconds)
    pub exp: Option<i64>,
    /// Issued at (Unix seconds)
    pub iat: Option<i64>,
}

/// Decode the payload segment of a bearer token.
///
/// Returns `None` when the token has no payload segment, the segment is not
/// valid base64url, or it does not hold a JSON object.
pub fn decode_claims(token: &str) -> Option<Claims> {
    let payload = token.split('.').nth(1)?;
    let bytes = PAYLOAD_ENGINE.decode(payload).ok()?;
    let object: Map<String, Value> = serde_json::from_slice(&bytes).ok()?;

    Some(Claims {
        subject_id: first_claim(&object, SUBJECT_CLAIM_KEYS, true),
        email: first_claim(&object, EMAIL_CLAIM_KEYS, false),
        full_name: first_claim(&object, NAME_CLAIM_KEYS, false),
        role: first_claim(&object, ROLE_CLAIM_KEYS, false),
        exp: object.get("exp").and_then(timestamp),
        iat: object.get("iat").and_then(timestamp),
    })
}

/// Whether the token is expired, or expires within `buffer_secs` from now.
pub fn is_expired(token: &str, buffer_secs: i64) -> bool {
    is_expired_at(token, buffer_secs, Utc::now().timestamp_millis())
}

/// Same as [`is_expired`] against an explicit clock (Unix milliseconds).
///
/// Undecodable tokens and tokens without `exp` count as expired.
pub fn is_expired_at(token: &str, buffer_secs: i64, now_millis: i64) -> bool {
    match decode_claims(token).and_then(|claims| claims.exp) {
        Some(exp) => {
            exp.saturating_mul(1000) <= now_millis.saturating_add(buffer_secs.saturating_mul(1000))
        }
        None => true,
    }
}

fn first_claim(object: &Map<String, Value>, keys: &[&str], allow_numbers: bool) -> Option<String> {
    keys.iter().find_map(|key| match object.get(*key)? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) if allow_numbers => Some(n.to_string()),
        _ => None,
    })
}

fn timestamp(value: &Value) -> Option<i64> {
    value
        .as_i64()
        .or_else(|| value.as_f64().map(|secs| secs.floor() as i64))
}
