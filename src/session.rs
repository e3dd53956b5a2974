//! Session context and bearer-token scope validation
//!
//! The upstream API is session-scoped: every request carries a bearer token
//! plus four identity cookies replicated from an authenticated browser
//! session. Tokens and cookies can desynchronize (e.g. after a concurrent
//! delegation switch), and a desynchronized pair would silently fetch
//! another member's billing data under the wrong identity.
//!
//! `SessionContext` is an explicit value passed into every upstream call,
//! never ambient state, so the scope check is testable in isolation. The
//! bearer token is decoded WITHOUT signature verification: this is an
//! internal consistency check between two credentials we already hold, not
//! an authorization check.

use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use tracing::error;

/// Session-layer failures. Both are fatal for the call that hits them and
/// must never be retried: they signal a session-handling bug, not a
/// transient condition.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// One or more of the four critical session identifiers is missing
    #[error("Missing session context: {0}")]
    MissingContext(String),

    /// A claim embedded in the bearer token disagrees with the session
    #[error("Token scope mismatch on '{claim}': token has '{token_value}', session has '{session_value}'")]
    ScopeMismatch {
        claim: String,
        token_value: String,
        session_value: String,
    },

    /// The bearer token could not be decoded at all
    #[error("Undecodable bearer token: {0}")]
    UndecodableToken(String),
}

/// The four critical identifiers of the active upstream session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionContext {
    /// Upstream session id
    pub session_id: String,
    /// Identity being acted on behalf of (delegation target)
    pub delegated_user_id: String,
    /// Identity that performed the login
    pub logged_in_user_id: String,
    /// Session access token cookie value
    pub access_token: String,
}

/// Identity claims embedded in the upstream bearer token.
///
/// All three are optional: the vendor omits claims depending on how the
/// token was minted. A claim that is absent cannot mismatch.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenClaims {
    #[serde(rename = "delegatedUserId")]
    pub delegated_user_id: Option<String>,
    #[serde(rename = "loggedInUserId")]
    pub logged_in_user_id: Option<String>,
    #[serde(rename = "sessionId")]
    pub session_id: Option<String>,
}

impl SessionContext {
    /// Verify all four critical session identifiers are present.
    pub fn validate(&self) -> Result<(), SessionError> {
        let mut missing = Vec::new();
        if self.session_id.trim().is_empty() {
            missing.push("session_id");
        }
        if self.delegated_user_id.trim().is_empty() {
            missing.push("delegated_user_id");
        }
        if self.logged_in_user_id.trim().is_empty() {
            missing.push("logged_in_user_id");
        }
        if self.access_token.trim().is_empty() {
            missing.push("access_token");
        }

        if missing.is_empty() {
            Ok(())
        } else {
            Err(SessionError::MissingContext(missing.join(", ")))
        }
    }

    /// Cross-check the bearer token's embedded identity claims against this
    /// session. Each claim, if present in the token, must equal the
    /// corresponding session identifier.
    pub fn check_token_scope(&self, token: &str) -> Result<(), SessionError> {
        let claims = decode_claims(token)?;

        check_claim("sessionId", claims.session_id.as_deref(), &self.session_id)?;
        check_claim(
            "delegatedUserId",
            claims.delegated_user_id.as_deref(),
            &self.delegated_user_id,
        )?;
        check_claim(
            "loggedInUserId",
            claims.logged_in_user_id.as_deref(),
            &self.logged_in_user_id,
        )?;

        Ok(())
    }

    /// Build the Cookie header value carrying the four identity cookies.
    pub fn cookie_header(&self) -> String {
        format!(
            "sessionId={}; delegatedUserId={}; loggedInUserId={}; accessToken={}",
            self.session_id, self.delegated_user_id, self.logged_in_user_id, self.access_token
        )
    }
}

fn check_claim(
    claim: &str,
    token_value: Option<&str>,
    session_value: &str,
) -> Result<(), SessionError> {
    match token_value {
        Some(value) if value != session_value => {
            // Security-relevant: a mismatched scope means we were about to
            // fetch data under the wrong identity.
            error!(
                claim = claim,
                token_value = value,
                session_value = session_value,
                "Bearer token scope does not match active session"
            );
            Err(SessionError::ScopeMismatch {
                claim: claim.to_string(),
                token_value: value.to_string(),
                session_value: session_value.to_string(),
            })
        }
        _ => Ok(()),
    }
}

/// Decode the identity claims from a bearer token without verifying its
/// signature or expiry. We do not hold the vendor's signing key and do not
/// need to: the token was already accepted by upstream.
pub fn decode_claims(token: &str) -> Result<TokenClaims, SessionError> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.insecure_disable_signature_validation();
    validation.validate_exp = false;
    validation.required_spec_claims.clear();

    let data = decode::<TokenClaims>(token, &DecodingKey::from_secret(&[]), &validation)
        .map_err(|e| SessionError::UndecodableToken(e.to_string()))?;

    Ok(data.claims)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use jsonwebtoken::{encode, EncodingKey, Header};
    use serde_json::json;

    /// Mint an HS256 token with the given claims (any secret: we never
    /// verify signatures when decoding)
    pub(crate) fn mint_token(claims: serde_json::Value) -> String {
        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(b"test-secret"),
        )
        .unwrap()
    }

    pub(crate) fn test_session() -> SessionContext {
        SessionContext {
            session_id: "sess-1".into(),
            delegated_user_id: "user-d".into(),
            logged_in_user_id: "user-l".into(),
            access_token: "tok-abc".into(),
        }
    }

    #[test]
    fn test_validate_complete_session() {
        assert!(test_session().validate().is_ok());
    }

    #[test]
    fn test_validate_missing_identifiers() {
        let mut session = test_session();
        session.session_id = "".into();
        session.access_token = "  ".into();

        let err = session.validate().unwrap_err();
        match err {
            SessionError::MissingContext(fields) => {
                assert!(fields.contains("session_id"));
                assert!(fields.contains("access_token"));
            }
            other => panic!("Expected MissingContext, got {:?}", other),
        }
    }

    #[test]
    fn test_matching_scope_accepted() {
        let session = test_session();
        let token = mint_token(json!({
            "sessionId": "sess-1",
            "delegatedUserId": "user-d",
            "loggedInUserId": "user-l",
        }));

        assert!(session.check_token_scope(&token).is_ok());
    }

    #[test]
    fn test_absent_claims_accepted() {
        // A token minted without identity claims cannot mismatch
        let session = test_session();
        let token = mint_token(json!({ "sub": "whatever" }));

        assert!(session.check_token_scope(&token).is_ok());
    }

    #[test]
    fn test_session_id_mismatch_rejected() {
        let session = test_session();
        let token = mint_token(json!({ "sessionId": "sess-OTHER" }));

        let err = session.check_token_scope(&token).unwrap_err();
        match err {
            SessionError::ScopeMismatch { claim, token_value, session_value } => {
                assert_eq!(claim, "sessionId");
                assert_eq!(token_value, "sess-OTHER");
                assert_eq!(session_value, "sess-1");
            }
            other => panic!("Expected ScopeMismatch, got {:?}", other),
        }
    }

    #[test]
    fn test_delegated_user_mismatch_rejected() {
        let session = test_session();
        let token = mint_token(json!({
            "sessionId": "sess-1",
            "delegatedUserId": "user-OTHER",
        }));

        assert!(matches!(
            session.check_token_scope(&token),
            Err(SessionError::ScopeMismatch { .. })
        ));
    }

    #[test]
    fn test_garbage_token_rejected() {
        let session = test_session();
        assert!(matches!(
            session.check_token_scope("not-a-jwt"),
            Err(SessionError::UndecodableToken(_))
        ));
    }

    #[test]
    fn test_cookie_header() {
        let header = test_session().cookie_header();
        assert_eq!(
            header,
            "sessionId=sess-1; delegatedUserId=user-d; loggedInUserId=user-l; accessToken=tok-abc"
        );
    }
}
