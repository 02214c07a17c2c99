//! Session token handling.
//!
//! The push channel room is derived from the user id inside the stored JWT.
//! The token is only decoded here, never verified: the room join is routing,
//! and the backend authenticates every REST call on its own.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::Deserialize;
use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum TokenError {
    #[error("Token is not a three-part JWT")]
    Malformed,
    #[error("Token payload is not base64url: {0}")]
    Base64(String),
    #[error("Token payload is not JSON: {0}")]
    Json(String),
    #[error("Token carries no user id")]
    MissingUserId,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Claims {
    #[serde(default)]
    id: Option<serde_json::Value>,
    #[serde(default, rename = "_id")]
    underscore_id: Option<serde_json::Value>,
    #[serde(default)]
    user_id: Option<serde_json::Value>,
    #[serde(default)]
    sub: Option<serde_json::Value>,
    #[serde(default)]
    user: Option<NestedUser>,
}

#[derive(Deserialize)]
struct NestedUser {
    #[serde(default, alias = "_id")]
    id: Option<serde_json::Value>,
}

/// Extract the user id from a JWT payload without checking its signature.
///
/// Looks at `id`, `_id`, `userId`, `sub`, then `user.id`. Numeric ids are
/// accepted and rendered as strings.
pub fn decode_user_id(token: &str) -> Result<String, TokenError> {
    let token = token.trim().trim_start_matches("Bearer ").trim();
    let mut parts = token.split('.');
    let (Some(_header), Some(payload), Some(_sig), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(TokenError::Malformed);
    };

    let bytes = URL_SAFE_NO_PAD
        .decode(payload.trim_end_matches('='))
        .map_err(|e| TokenError::Base64(e.to_string()))?;
    let claims: Claims =
        serde_json::from_slice(&bytes).map_err(|e| TokenError::Json(e.to_string()))?;

    [
        claims.id,
        claims.underscore_id,
        claims.user_id,
        claims.sub,
        claims.user.and_then(|u| u.id),
    ]
    .into_iter()
    .flatten()
    .find_map(|v| match v {
        serde_json::Value::String(s) if !s.is_empty() => Some(s),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
    .ok_or(TokenError::MissingUserId)
}

/// Push channel room for a user.
pub fn user_room(user_id: &str) -> String {
    format!("user_{user_id}")
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn jwt_with(payload: serde_json::Value) -> String {
        let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
        let body = URL_SAFE_NO_PAD.encode(payload.to_string());
        format!("{header}.{body}.signature")
    }

    #[test]
    fn reads_id_claim() {
        let token = jwt_with(serde_json::json!({"id": "u42", "role": "patient"}));
        assert_eq!(decode_user_id(&token).unwrap(), "u42");
    }

    #[test]
    fn falls_back_through_claim_names() {
        let token = jwt_with(serde_json::json!({"sub": "s1"}));
        assert_eq!(decode_user_id(&token).unwrap(), "s1");
        let token = jwt_with(serde_json::json!({"user": {"_id": "nested"}}));
        assert_eq!(decode_user_id(&token).unwrap(), "nested");
        let token = jwt_with(serde_json::json!({"userId": 7}));
        assert_eq!(decode_user_id(&token).unwrap(), "7");
    }

    #[test]
    fn bearer_prefix_is_tolerated() {
        let token = format!("Bearer {}", jwt_with(serde_json::json!({"_id": "u1"})));
        assert_eq!(decode_user_id(&token).unwrap(), "u1");
    }

    #[test]
    fn rejects_malformed_tokens() {
        assert_eq!(decode_user_id("abc"), Err(TokenError::Malformed));
        assert_eq!(decode_user_id("a.b.c.d"), Err(TokenError::Malformed));
        assert!(matches!(decode_user_id("a.!!!.c"), Err(TokenError::Base64(_))));
        let not_json = format!("h.{}.s", URL_SAFE_NO_PAD.encode("nope"));
        assert!(matches!(decode_user_id(&not_json), Err(TokenError::Json(_))));
    }

    #[test]
    fn missing_user_id() {
        let token = jwt_with(serde_json::json!({"role": "patient", "id": ""}));
        assert_eq!(decode_user_id(&token), Err(TokenError::MissingUserId));
    }

    #[test]
    fn room_name() {
        assert_eq!(user_room("u42"), "user_u42");
    }
}
