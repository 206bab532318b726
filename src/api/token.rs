use bson::oid::ObjectId;
use jsonwebtoken::errors::ErrorKind;
use serde::{Deserialize, Serialize};
use time::{Duration, OffsetDateTime};

use crate::{error::Error, util::ObjectIdString};

#[derive(Clone)]
pub struct JwtState {
    validation: jsonwebtoken::Validation,
    header: jsonwebtoken::Header,

    encoding_key: jsonwebtoken::EncodingKey,
    decoding_key: jsonwebtoken::DecodingKey,

    expiration: Duration,
}

impl JwtState {
    pub fn new(secret: &str, expiration_days: i64) -> Self {
        let encoding_key = jsonwebtoken::EncodingKey::from_secret(secret.as_bytes());
        let decoding_key = jsonwebtoken::DecodingKey::from_secret(secret.as_bytes());

        let header = jsonwebtoken::Header::new(jsonwebtoken::Algorithm::HS256);
        let mut validation = jsonwebtoken::Validation::new(jsonwebtoken::Algorithm::HS256);
        validation.leeway = 0;

        Self {
            header,
            validation,

            encoding_key,
            decoding_key,

            expiration: Duration::days(expiration_days),
        }
    }
}

pub fn current_timestamp() -> OffsetDateTime {
    OffsetDateTime::now_utc()
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct AccessTokenClaims {
    #[serde(rename = "userId")]
    pub user_id: ObjectIdString,
    pub iat: i64,
    pub exp: i64,
}

#[derive(Debug)]
pub enum TokenStatus {
    Valid(AccessTokenClaims),
    Expired,
    Invalid,
}

pub fn generate_access_token(jwt_state: &JwtState, user_id: ObjectId) -> Result<String, Error> {
    let expired_at = current_timestamp() + jwt_state.expiration;

    generate_access_token_with_exp(jwt_state, user_id, expired_at.unix_timestamp())
}

pub fn generate_access_token_with_exp(
    jwt_state: &JwtState,
    user_id: ObjectId,
    exp: i64,
) -> Result<String, Error> {
    jsonwebtoken::encode(
        &jwt_state.header,
        &AccessTokenClaims {
            user_id: user_id.into(),
            iat: current_timestamp().unix_timestamp(),
            exp,
        },
        &jwt_state.encoding_key,
    )
    .map_err(Into::into)
}

pub fn verify_access_token(jwt_state: &JwtState, token: &str) -> TokenStatus {
    match jsonwebtoken::decode::<AccessTokenClaims>(
        token,
        &jwt_state.decoding_key,
        &jwt_state.validation,
    ) {
        Ok(data) => TokenStatus::Valid(data.claims),
        Err(err) => match err.kind() {
            ErrorKind::ExpiredSignature => TokenStatus::Expired,
            _ => {
                tracing::debug!("rejected access token: {}", err);
                TokenStatus::Invalid
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    fn jwt() -> JwtState {
        JwtState::new("test-secret", 30)
    }

    #[test]
    pub fn test_access_token() {
        let jwt = jwt();
        let user_id = ObjectId::new();

        let token = generate_access_token(&jwt, user_id).unwrap();

        let claims = assert_matches!(verify_access_token(&jwt, &token), TokenStatus::Valid(it) => it);
        assert_eq!(claims.user_id, user_id);
        assert!(claims.exp > current_timestamp().unix_timestamp() + 29 * 24 * 60 * 60);
    }

    #[test]
    pub fn test_expired_access_token() {
        let jwt = jwt();

        let token = generate_access_token_with_exp(
            &jwt,
            ObjectId::new(),
            (current_timestamp() + Duration::seconds(-10)).unix_timestamp(),
        )
        .unwrap();

        assert_matches!(verify_access_token(&jwt, &token), TokenStatus::Expired);
    }

    #[test]
    pub fn test_invalid_access_token() {
        let jwt = jwt();

        assert_matches!(verify_access_token(&jwt, "garbage"), TokenStatus::Invalid);

        let foreign = generate_access_token(&JwtState::new("another-secret", 30), ObjectId::new())
            .unwrap();
        assert_matches!(verify_access_token(&jwt, &foreign), TokenStatus::Invalid);

        let mut tampered = generate_access_token(&jwt, ObjectId::new()).unwrap();
        tampered.push('x');
        assert_matches!(verify_access_token(&jwt, &tampered), TokenStatus::Invalid);
    }
}
