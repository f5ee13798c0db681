use argon2::{Argon2, PasswordHash, PasswordHasher, PasswordVerifier};
use axum::{
    extract::{FromRequest, FromRequestParts, Path},
    http::{request::Parts, Request},
    response::{IntoResponse, Response},
};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tap::TapFallible;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::Error;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct FormattedDateTime(#[serde(with = "time::serde::rfc3339")] pub OffsetDateTime);

impl From<OffsetDateTime> for FormattedDateTime {
    fn from(value: OffsetDateTime) -> Self {
        Self(value)
    }
}

/// Well-formed argon2id hash no password matches. Verified against on
/// unknown accounts so both login failures cost one argon2 run.
pub const UNKNOWN_USER_HASH: &str =
    "$argon2id$v=19$m=19456,t=2,p=1$c29tZXNhbHRzb21lc2FsdA$AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA";

pub fn verify_password(argon: &Argon2, password: &str, hashed: &str) -> bool {
    let hashed = match PasswordHash::new(hashed) {
        Ok(hashed) => hashed,
        Err(_) => return false,
    };

    argon.verify_password(password.as_bytes(), &hashed).is_ok()
}

pub fn hash_password(argon: &Argon2, password: &str) -> Result<String, Error> {
    let salt = password_hash::SaltString::generate(&mut password_hash::rand_core::OsRng);

    argon
        .hash_password(password.as_bytes(), &salt)
        .map(|it| it.to_string())
        .map_err(Into::into)
}

/// `:id` path segment parsed as a UUID. Anything else is reported as a
/// missing resource.
#[derive(Debug, Clone, Copy)]
pub struct PathUuid(pub Uuid);

#[axum::async_trait]
impl<S> FromRequestParts<S> for PathUuid
where
    S: Send + Sync,
{
    type Rejection = Error;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Path(id) = Path::<String>::from_request_parts(parts, state).await?;

        Uuid::parse_str(&id)
            .map(Self)
            .map_err(|_| Error::NoResource)
            .tap_err(|_| tracing::debug!(%id, "path id is not a uuid"))
    }
}

/// JSON body extractor and response whose rejection is reported through
/// [`Error`] like every other failure.
#[derive(Debug, Clone)]
pub struct Json<T>(pub T);

#[axum::async_trait]
impl<S, B, T> FromRequest<S, B> for Json<T>
where
    T: DeserializeOwned,
    axum::Json<T>: FromRequest<S, B, Rejection = axum::extract::rejection::JsonRejection>,
    S: Send + Sync,
    B: Send + 'static,
{
    type Rejection = Error;

    async fn from_request(req: Request<B>, state: &S) -> Result<Self, Self::Rejection> {
        let axum::Json(value) = axum::Json::<T>::from_request(req, state).await?;

        Ok(Self(value))
    }
}

impl<T> IntoResponse for Json<T>
where
    T: Serialize,
{
    fn into_response(self) -> Response {
        axum::Json(self.0).into_response()
    }
}

#[cfg(test)]
mod tests {
    use argon2::{Algorithm, Params, Version};
    use axum::{extract::FromRequestParts, routing, Router};
    use tower::ServiceExt;

    use super::*;

    #[test]
    fn test_hash_and_verify() {
        let argon = Argon2::new(
            Algorithm::Argon2id,
            Version::V0x13,
            Params::new(1024, 1, 1, None).unwrap(),
        );

        let hashed = hash_password(&argon, "secret").unwrap();

        assert_ne!(hashed, "secret");
        assert!(verify_password(&argon, "secret", &hashed));
        assert!(!verify_password(&argon, "wrong", &hashed));
        assert!(!verify_password(&argon, "secret", "not a phc string"));
    }

    #[test]
    fn test_unknown_user_hash() {
        let hash = PasswordHash::new(UNKNOWN_USER_HASH).unwrap();
        assert_eq!(hash.algorithm.as_str(), "argon2id");
        assert_eq!(hash.hash.map(|it| it.len()), Some(32));

        assert!(!verify_password(&Argon2::default(), "", UNKNOWN_USER_HASH));
        assert!(!verify_password(&Argon2::default(), "password", UNKNOWN_USER_HASH));
    }

    #[test]
    fn test_formatted_date_time() {
        let it = FormattedDateTime(time::macros::datetime!(2024-03-01 10:00 UTC));

        assert_eq!(
            serde_json::to_string(&it).unwrap(),
            "\"2024-03-01T10:00:00Z\""
        );
    }

    #[tokio::test]
    async fn test_path_uuid() {
        let app = Router::new().route(
            "/:id",
            routing::get(|PathUuid(id): PathUuid| async move { id.to_string() }),
        );

        let id = Uuid::new_v4();
        let response = app
            .clone()
            .oneshot(
                Request::get(format!("/{id}"))
                    .body(axum::body::Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), axum::http::StatusCode::OK);

        let response = app
            .oneshot(
                Request::get("/not-a-uuid")
                    .body(axum::body::Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), axum::http::StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_path_uuid_without_route_params() {
        let (mut parts, _) = Request::get("http://localhost")
            .body(())
            .unwrap()
            .into_parts();

        let err = PathUuid::from_request_parts(&mut parts, &()).await.unwrap_err();

        assert!(matches!(err, Error::NoResource));
    }
}
