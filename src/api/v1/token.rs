use std::str::FromStr;

use jsonwebtoken::TokenData;
use serde::{Deserialize, Serialize};
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

use crate::error::{Error, UnauthorizedType};

use super::auth::{UserAccess, UserModel, UserRole};

#[derive(Clone)]
pub struct JwtState {
    validation: jsonwebtoken::Validation,
    header: jsonwebtoken::Header,

    encoding_key: jsonwebtoken::EncodingKey,
    decoding_key: jsonwebtoken::DecodingKey,

    expires_in: Duration,
}

impl JwtState {
    pub fn new(secret: &[u8], expires_in: Duration) -> Self {
        let header = jsonwebtoken::Header::new(jsonwebtoken::Algorithm::HS256);
        let mut validation = jsonwebtoken::Validation::new(jsonwebtoken::Algorithm::HS256);
        // expiry is checked without leeway in `AccessTokenClaims::validate`
        validation.validate_exp = false;

        Self {
            header,
            validation,

            encoding_key: jsonwebtoken::EncodingKey::from_secret(secret),
            decoding_key: jsonwebtoken::DecodingKey::from_secret(secret),

            expires_in,
        }
    }
}

pub fn current_timestamp() -> OffsetDateTime {
    OffsetDateTime::now_utc()
}

/// Token payload exactly as it travels on the wire.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct AccessTokenClaims {
    pub sub: String,
    pub role: String,
    pub exp: i64,
}

#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum ClaimsError {
    #[error("subject is not a uuid: {0}")]
    InvalidSubject(String),

    #[error("unknown role: {0}")]
    InvalidRole(String),

    #[error("token expired at {0}")]
    Expired(i64),
}

impl AccessTokenClaims {
    pub fn is_expired(&self) -> bool {
        self.exp < current_timestamp().unix_timestamp()
    }

    /// Turns a verified payload into the caller identity, rejecting anything
    /// that is not `{sub: uuid, role: ADMIN | DELIVERYMAN}` or already expired.
    pub fn validate(self) -> Result<UserAccess, ClaimsError> {
        if self.is_expired() {
            return Err(ClaimsError::Expired(self.exp));
        }

        let id = Uuid::parse_str(&self.sub).map_err(|_| ClaimsError::InvalidSubject(self.sub))?;
        let role = UserRole::from_str(&self.role).map_err(|_| ClaimsError::InvalidRole(self.role))?;

        Ok(UserAccess { id, role })
    }
}

pub struct GenerateAccessTokenResponse {
    pub expired_at: OffsetDateTime,
    pub token: String,
}

pub fn generate_access_token(
    jwt_state: &JwtState,
    user: &UserModel,
) -> Result<GenerateAccessTokenResponse, Error> {
    let expired_at = current_timestamp() + jwt_state.expires_in;
    let token = generate_access_token_with_exp(jwt_state, user, expired_at.unix_timestamp())?;

    Ok(GenerateAccessTokenResponse { expired_at, token })
}

pub fn generate_access_token_with_exp(
    jwt_state: &JwtState,
    user: &UserModel,
    exp: i64,
) -> Result<String, Error> {
    encode_claims(
        jwt_state,
        &AccessTokenClaims {
            sub: user.id.to_string(),
            role: user.role.as_str().to_string(),
            exp,
        },
    )
}

pub fn encode_claims(jwt_state: &JwtState, claims: &AccessTokenClaims) -> Result<String, Error> {
    jsonwebtoken::encode(&jwt_state.header, claims, &jwt_state.encoding_key).map_err(Into::into)
}

/// Verifies the signature and decodes the payload shape. Every failure is an
/// invalid access token from the caller's point of view.
pub fn decode_access_token(
    jwt_state: &JwtState,
    token: &str,
) -> Result<TokenData<AccessTokenClaims>, Error> {
    jsonwebtoken::decode(token, &jwt_state.decoding_key, &jwt_state.validation).map_err(|err| {
        tracing::debug!("rejected access token: {}", err);
        Error::Unauthorized(UnauthorizedType::InvalidAccessToken)
    })
}
