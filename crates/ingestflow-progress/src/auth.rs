//! Bearer-token auth for the Subscriber Gateway (spec §4.7: "A subscriber
//! authenticates with a bearer token ... the Gateway derives `tenant_id`
//! from the token"). Grounded in
//! `control-plane::auth::jwt::JwtService::validate_access_token`, trimmed
//! to the one claim the Gateway needs and adapted to the HMAC secret
//! sourced from `ingestflow_core::config::Config` rather than its own
//! `JwtConfig`.

use jsonwebtoken::{decode, DecodingKey, Validation};
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct SubscriberClaims {
    pub tenant_id: i64,
    pub exp: i64,
}

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("invalid or expired bearer token")]
    InvalidToken,
}

#[derive(Clone)]
pub struct AuthValidator {
    decoding_key: DecodingKey,
}

impl AuthValidator {
    pub fn new(hmac_secret: &str) -> Self {
        Self {
            decoding_key: DecodingKey::from_secret(hmac_secret.as_bytes()),
        }
    }

    /// Validate at handshake only (spec §4.7: "token refresh does not tear
    /// down existing subscriptions; authentication is at handshake only").
    pub fn validate(&self, token: &str) -> Result<SubscriberClaims, AuthError> {
        let mut validation = Validation::default();
        validation.validate_exp = true;

        decode::<SubscriberClaims>(token, &self.decoding_key, &validation)
            .map(|data| data.claims)
            .map_err(|_| AuthError::InvalidToken)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use jsonwebtoken::{encode, EncodingKey, Header};

    fn token_for(tenant_id: i64, secret: &str, exp: i64) -> String {
        let claims = SubscriberClaims { tenant_id, exp };
        encode(&Header::default(), &claims, &EncodingKey::from_secret(secret.as_bytes())).unwrap()
    }

    #[test]
    fn valid_token_yields_tenant_id() {
        let validator = AuthValidator::new("secret");
        let token = token_for(42, "secret", (Utc::now() + chrono::Duration::hours(1)).timestamp());
        let claims = validator.validate(&token).unwrap();
        assert_eq!(claims.tenant_id, 42);
    }

    #[test]
    fn expired_token_is_rejected() {
        let validator = AuthValidator::new("secret");
        let token = token_for(42, "secret", (Utc::now() - chrono::Duration::hours(1)).timestamp());
        assert!(validator.validate(&token).is_err());
    }

    #[test]
    fn token_signed_with_wrong_secret_is_rejected() {
        let validator = AuthValidator::new("secret");
        let token = token_for(42, "other-secret", (Utc::now() + chrono::Duration::hours(1)).timestamp());
        assert!(validator.validate(&token).is_err());
    }
}
