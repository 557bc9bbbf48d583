//! Session token issuance and verification.
//!
//! Tokens are HS256 JWTs signed with the process-wide secret from configuration.
//! They are never stored server-side and cannot be revoked early; the access gate
//! re-reads live account state on every request instead of trusting the claims.

use crate::entity::user_account::{self, ApprovalState, Role};
use crate::error::TokenError;
use jsonwebtoken::{
    Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode, errors::ErrorKind,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use time::OffsetDateTime;

/// Claims carried by a session token. The state and role are snapshots taken at
/// issuance and are only used for attribution, never for authorization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionClaims {
    pub sub: String,
    pub email: String,
    pub approval_state: ApprovalState,
    pub role: Role,
    pub iat: i64,
    pub exp: i64,
}

/// A freshly issued bearer credential.
#[derive(Debug, Clone)]
pub struct SessionToken {
    pub token: String,
    pub expires_at: OffsetDateTime,
}

pub struct TokenService {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
    validity: Duration,
}

impl std::fmt::Debug for TokenService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenService")
            .field("validity", &self.validity)
            .finish_non_exhaustive()
    }
}

impl TokenService {
    pub fn new(secret: &str, validity: Duration) -> Result<Self, TokenError> {
        if secret.is_empty() {
            return Err(TokenError::MissingSecret);
        }

        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.validate_exp = true;
        validation.set_required_spec_claims(&["exp", "sub"]);

        Ok(Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            validation,
            validity,
        })
    }

    pub fn validity(&self) -> Duration {
        self.validity
    }

    /// Sign a token for `user`. The caller is responsible for having checked that the
    /// account is approved; this service trusts its input.
    pub fn issue(&self, user: &user_account::Model) -> Result<SessionToken, TokenError> {
        self.issue_at(user, OffsetDateTime::now_utc())
    }

    /// Like [`TokenService::issue`] with an explicit issuance instant.
    #[tracing::instrument(skip(self, user), fields(user_id = %user.id))]
    pub fn issue_at(
        &self,
        user: &user_account::Model,
        issued_at: OffsetDateTime,
    ) -> Result<SessionToken, TokenError> {
        let expires_at = time::Duration::try_from(self.validity)
            .ok()
            .and_then(|validity| issued_at.checked_add(validity))
            .ok_or(TokenError::ValidityOutOfRange(self.validity))?;
        let claims = SessionClaims {
            sub: user.id.clone(),
            email: user.email.clone(),
            approval_state: user.approval_state,
            role: user.role,
            iat: issued_at.unix_timestamp(),
            exp: expires_at.unix_timestamp(),
        };

        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|e| TokenError::Signing(e.to_string()))?;

        Ok(SessionToken { token, expires_at })
    }

    /// Check signature and expiry. Does not consult the credential store.
    pub fn verify(&self, token: &str) -> Result<SessionClaims, TokenError> {
        decode::<SessionClaims>(token, &self.decoding, &self.validation)
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                ErrorKind::ExpiredSignature => TokenError::Expired,
                other => TokenError::Invalid(format!("{other:?}")),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "0123456789abcdef0123456789abcdef";

    fn user(state: ApprovalState) -> user_account::Model {
        user_account::Model {
            id: "user-1".into(),
            identity_key: Some("abc123".into()),
            email: "a@x.com".into(),
            display_name: Some("Ana".into()),
            surname: None,
            photo_url: None,
            approval_state: state,
            role: Role::User,
            created_at: OffsetDateTime::now_utc(),
            approved_at: None,
            approved_by: None,
            last_access_at: None,
        }
    }

    fn service() -> TokenService {
        TokenService::new(SECRET, Duration::from_secs(8 * 3600)).unwrap()
    }

    #[test]
    fn empty_secret_is_refused() {
        assert!(matches!(
            TokenService::new("", Duration::from_secs(60)),
            Err(TokenError::MissingSecret)
        ));
    }

    #[test]
    fn issued_token_verifies_with_snapshot_claims() {
        let tokens = service();
        let issued = tokens.issue(&user(ApprovalState::Approved)).unwrap();
        let claims = tokens.verify(&issued.token).unwrap();

        assert_eq!(claims.sub, "user-1");
        assert_eq!(claims.email, "a@x.com");
        assert_eq!(claims.approval_state, ApprovalState::Approved);
        assert_eq!(claims.role, Role::User);
        assert_eq!(claims.exp - claims.iat, 8 * 3600);
        assert_eq!(claims.exp, issued.expires_at.unix_timestamp());
    }

    #[test]
    fn expired_token_is_expired_not_invalid() {
        let tokens = service();
        let issued_at = OffsetDateTime::now_utc() - time::Duration::hours(9);
        let issued = tokens
            .issue_at(&user(ApprovalState::Approved), issued_at)
            .unwrap();

        assert!(matches!(tokens.verify(&issued.token), Err(TokenError::Expired)));
    }

    #[test]
    fn foreign_signature_is_invalid() {
        let other = TokenService::new("another-secret-another-secret-xx", Duration::from_secs(60))
            .unwrap();
        let issued = other.issue(&user(ApprovalState::Approved)).unwrap();

        assert!(matches!(
            service().verify(&issued.token),
            Err(TokenError::Invalid(_))
        ));
    }

    #[test]
    fn expired_foreign_token_is_invalid() {
        let other = TokenService::new("another-secret-another-secret-xx", Duration::from_secs(60))
            .unwrap();
        let issued = other
            .issue_at(
                &user(ApprovalState::Approved),
                OffsetDateTime::now_utc() - time::Duration::hours(1),
            )
            .unwrap();

        assert!(matches!(
            service().verify(&issued.token),
            Err(TokenError::Invalid(_))
        ));
    }

    #[test]
    fn overflowing_validity_is_an_error() {
        let tokens =
            TokenService::new(SECRET, Duration::from_secs(1_000_000_000_000)).unwrap();
        assert!(matches!(
            tokens.issue(&user(ApprovalState::Approved)),
            Err(TokenError::ValidityOutOfRange(_))
        ));
    }

    #[test]
    fn garbage_is_invalid() {
        let tokens = service();
        for input in ["", "not-a-jwt", "a.b.c"] {
            assert!(matches!(tokens.verify(input), Err(TokenError::Invalid(_))));
        }
    }
}
