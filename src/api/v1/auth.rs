use std::{str::FromStr, sync::Arc};

use argon2::Argon2;
use axum::{
    extract::{FromRef, FromRequestParts, State},
    headers::{authorization::Bearer, Authorization, HeaderMapExt},
    http::{request::Parts, Request},
    middleware::Next,
    response::Response,
};
use serde::{Deserialize, Serialize};
use tap::TapFallible;
use time::OffsetDateTime;
use uuid::Uuid;
use validator::Validate;

use crate::{
    error::{Error, Resource, UnauthorizedType},
    store::UserRepository,
    util::{hash_password, verify_password, FormattedDateTime, Json, UNKNOWN_USER_HASH},
};

use super::token::{generate_access_token, decode_access_token, JwtState};

#[derive(Clone)]
pub struct UserCollection(pub Arc<dyn UserRepository>);

impl std::ops::Deref for UserCollection {
    type Target = dyn UserRepository;

    fn deref(&self) -> &Self::Target {
        self.0.as_ref()
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct UserModel {
    pub id: Uuid,

    pub name: String,
    pub cpf: String,
    pub password: String,
    pub role: UserRole,

    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UserRole {
    Admin,
    Deliveryman,
}

impl UserRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Admin => "ADMIN",
            Self::Deliveryman => "DELIVERYMAN",
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown role {0}")]
pub struct UnknownRole(String);

impl FromStr for UserRole {
    type Err = UnknownRole;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ADMIN" => Ok(Self::Admin),
            "DELIVERYMAN" => Ok(Self::Deliveryman),
            other => Err(UnknownRole(other.to_string())),
        }
    }
}

/// Authenticated caller identity, taken from a verified access token only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UserAccess {
    pub id: Uuid,
    pub role: UserRole,
}

impl UserAccess {
    pub fn from_token(jwt_state: &JwtState, token: &str) -> Result<Self, Error> {
        let token = decode_access_token(jwt_state, token)?;

        token
            .claims
            .validate()
            .tap_err(|err| tracing::debug!("rejected access token payload: {}", err))
            .map_err(|_| Error::Unauthorized(UnauthorizedType::InvalidAccessToken))
    }
}

#[axum::async_trait]
impl<S> FromRequestParts<S> for UserAccess
where
    JwtState: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = Error;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        if let Some(access) = parts.extensions.get::<UserAccess>() {
            return Ok(*access);
        }

        let token = parts
            .headers
            .typed_get::<Authorization<Bearer>>()
            .ok_or(Error::Unauthorized(UnauthorizedType::InvalidAccessToken))?;

        let jwt = JwtState::from_ref(state);

        Self::from_token(&jwt, token.token())
    }
}

/// Allowed-role set of one route group, checked by [`access_guard`].
#[derive(Clone)]
pub struct AccessGuard {
    jwt_state: JwtState,
    allowed: &'static [UserRole],
}

impl AccessGuard {
    pub fn new(jwt_state: JwtState, allowed: &'static [UserRole]) -> Self {
        Self { jwt_state, allowed }
    }

    pub fn authorize(&self, token: Option<&str>) -> Result<UserAccess, Error> {
        let token = token.ok_or(Error::Unauthorized(UnauthorizedType::InvalidAccessToken))?;
        let access = UserAccess::from_token(&self.jwt_state, token)?;

        if !self.allowed.contains(&access.role) {
            tracing::debug!(user = ?access, allowed = ?self.allowed, "role not allowed");
            return Err(Error::Forbidden);
        }

        Ok(access)
    }
}

pub async fn access_guard<B>(
    State(guard): State<AccessGuard>,
    mut request: Request<B>,
    next: Next<B>,
) -> Result<Response, Error> {
    let token = request.headers().typed_get::<Authorization<Bearer>>();
    let access = guard.authorize(token.as_ref().map(|it| it.token()))?;

    request.extensions_mut().insert(access);

    Ok(next.run(request).await)
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct UserResponse {
    pub id: Uuid,

    pub name: String,
    pub cpf: String,
    pub role: UserRole,

    pub created_at: FormattedDateTime,
    pub updated_at: FormattedDateTime,
}

impl From<UserModel> for UserResponse {
    fn from(value: UserModel) -> Self {
        Self {
            id: value.id,
            name: value.name,
            cpf: value.cpf,
            role: value.role,

            created_at: value.created_at.into(),
            updated_at: value.updated_at.into(),
        }
    }
}

#[derive(Validate, Debug, Clone)]
pub struct CreateUserRequest {
    #[validate(length(min = 1, max = 124))]
    pub name: String,

    #[validate(length(min = 1, max = 32))]
    pub cpf: String,

    #[validate(length(min = 6, max = 64))]
    pub password: String,

    pub role: UserRole,
}

pub async fn create_user(
    users: &UserCollection,
    argon: &Argon2<'_>,
    request: CreateUserRequest,
) -> Result<UserModel, Error> {
    request.validate()?;

    if users.find_by_cpf(&request.cpf).await?.is_some() {
        return Err(Error::MustUniqueError("cpf".to_string()))
            .tap_err(|_| tracing::debug!("tried creating user with existing cpf"));
    }

    let now = OffsetDateTime::now_utc();
    let model = UserModel {
        id: Uuid::new_v4(),
        name: request.name,
        cpf: request.cpf,
        password: hash_password(argon, &request.password)?,
        role: request.role,
        created_at: now,
        updated_at: now,
    };
    users.insert(&model).await?;

    Ok(model)
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct LoginRequest {
    pub cpf: String,
    pub password: String,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct LoginResponse {
    pub access_token: String,
}

pub async fn login(
    State(users): State<UserCollection>,
    State(jwt_state): State<JwtState>,
    State(argon): State<Argon2<'static>>,
    Json(request): Json<LoginRequest>,
) -> Result<Json<LoginResponse>, Error> {
    let user = users.find_by_cpf(&request.cpf).await?;

    let hashed = user
        .as_ref()
        .map_or(UNKNOWN_USER_HASH, |it| it.password.as_str());
    let verified = verify_password(&argon, &request.password, hashed);

    let user = match user {
        Some(user) if verified => user,
        _ => {
            return Err(Error::Unauthorized(UnauthorizedType::WrongCpfOrPassword))
                .tap_err(|_| tracing::debug!("rejected session request"))
        }
    };

    let access_token = generate_access_token(&jwt_state, &user)?;

    Ok(Json(LoginResponse {
        access_token: access_token.token,
    }))
}

pub async fn profile(
    State(users): State<UserCollection>,
    user: UserAccess,
) -> Result<Json<UserResponse>, Error> {
    let model = users
        .find_by_id(user.id)
        .await?
        .ok_or(Error::NotFound(Resource::User))?;

    Ok(Json(model.into()))
}

#[cfg(test)]
mod test {
    use assert_matches::assert_matches;
    use axum::{
        body::Body,
        extract::FromRequestParts,
        http::{Request, StatusCode},
        middleware, routing, Router,
    };
    use time::Duration;
    use tower::ServiceExt;

    use crate::{
        api::v1::{
            tests::bootstrap,
            token::{current_timestamp, generate_access_token_with_exp},
        },
        error::{Error, Resource, UnauthorizedType},
        util::Json,
    };

    use super::{AccessGuard, UserAccess, UserRole};

    #[tokio::test]
    async fn test_login() {
        let bootstrap = bootstrap().await;

        let Json(session) = super::login(
            bootstrap.user_collection(),
            bootstrap.jwt_state(),
            bootstrap.argon(),
            Json(super::LoginRequest {
                cpf: bootstrap.user_cpf(),
                password: bootstrap.user_password(),
            }),
        )
        .await
        .unwrap();

        let access =
            UserAccess::from_token(&bootstrap.app_state.jwt_state, &session.access_token).unwrap();
        assert_eq!(access.id, bootstrap.user_id());
        assert_eq!(access.role, UserRole::Admin);
    }

    #[tokio::test]
    async fn test_login_failures_are_indistinguishable() {
        let bootstrap = bootstrap().await;

        let wrong_password = super::login(
            bootstrap.user_collection(),
            bootstrap.jwt_state(),
            bootstrap.argon(),
            Json(super::LoginRequest {
                cpf: bootstrap.user_cpf(),
                password: "wrongpassword".to_string(),
            }),
        )
        .await
        .unwrap_err();

        let unknown_cpf = super::login(
            bootstrap.user_collection(),
            bootstrap.jwt_state(),
            bootstrap.argon(),
            Json(super::LoginRequest {
                cpf: "99999999999".to_string(),
                password: "wrongpassword".to_string(),
            }),
        )
        .await
        .unwrap_err();

        assert_eq!(wrong_password.to_string(), unknown_cpf.to_string());
        assert_eq!(
            wrong_password.to_string_variant(),
            unknown_cpf.to_string_variant()
        );
        assert_matches!(
            wrong_password,
            Error::Unauthorized(UnauthorizedType::WrongCpfOrPassword)
        );
        assert_matches!(
            unknown_cpf,
            Error::Unauthorized(UnauthorizedType::WrongCpfOrPassword)
        );
    }

    #[tokio::test]
    async fn test_unique_cpf() {
        let bootstrap = bootstrap().await;

        let err = super::create_user(
            &bootstrap.app_state.user_collection,
            &bootstrap.app_state.argon,
            super::CreateUserRequest {
                name: "other".to_string(),
                cpf: bootstrap.user_cpf(),
                password: "password".to_string(),
                role: UserRole::Deliveryman,
            },
        )
        .await
        .expect_err("created user with duplicated cpf");

        assert_matches!(err, Error::MustUniqueError(field) if field == "cpf");
    }

    #[tokio::test]
    async fn test_create_user_validation() {
        let bootstrap = bootstrap().await;

        let err = super::create_user(
            &bootstrap.app_state.user_collection,
            &bootstrap.app_state.argon,
            super::CreateUserRequest {
                name: "".to_string(),
                cpf: "123".to_string(),
                password: "short".to_string(),
                role: UserRole::Deliveryman,
            },
        )
        .await
        .unwrap_err();

        assert_matches!(err, Error::ValidationError(errors) => {
            let fields = errors.field_errors();
            assert!(fields.contains_key("name"));
            assert!(fields.contains_key("password"));
        });
    }

    #[tokio::test]
    pub async fn test_user_access() {
        let bootstrap = bootstrap().await;

        let (mut parts, _) = Request::get("http://localhost")
            .header(
                "Authorization",
                format!("Bearer {}", bootstrap.user_token()),
            )
            .body(())
            .unwrap()
            .into_parts();

        let user = UserAccess::from_request_parts(&mut parts, &bootstrap.app_state)
            .await
            .unwrap();

        assert_eq!(user.id, bootstrap.user_id());
    }

    #[tokio::test]
    pub async fn test_user_access_expired() {
        let bootstrap = bootstrap().await;

        let (mut parts, _) = Request::get("http://localhost")
            .header(
                "Authorization",
                format!(
                    "Bearer {}",
                    generate_access_token_with_exp(
                        &bootstrap.app_state.jwt_state,
                        &bootstrap.user_model,
                        0
                    )
                    .unwrap()
                ),
            )
            .body(())
            .unwrap()
            .into_parts();

        let err = UserAccess::from_request_parts(&mut parts, &bootstrap.app_state)
            .await
            .unwrap_err();
        assert_matches!(
            err,
            Error::Unauthorized(UnauthorizedType::InvalidAccessToken)
        );
    }

    #[tokio::test]
    pub async fn test_user_access_missing_header() {
        let bootstrap = bootstrap().await;

        let (mut parts, _) = Request::get("http://localhost")
            .body(())
            .unwrap()
            .into_parts();

        let err = UserAccess::from_request_parts(&mut parts, &bootstrap.app_state)
            .await
            .unwrap_err();
        assert_matches!(
            err,
            Error::Unauthorized(UnauthorizedType::InvalidAccessToken)
        );
    }

    #[tokio::test]
    async fn test_access_guard_roles() {
        let bootstrap = bootstrap().await;
        let deliveryman = bootstrap
            .derive("22222222222", "password", UserRole::Deliveryman)
            .await;

        let guard = AccessGuard::new(bootstrap.app_state.jwt_state.clone(), &[UserRole::Admin]);

        let access = guard.authorize(Some(&bootstrap.user_token())).unwrap();
        assert_eq!(access.id, bootstrap.user_id());

        let err = guard.authorize(Some(&deliveryman.user_token())).unwrap_err();
        assert_matches!(err, Error::Forbidden);

        let err = guard.authorize(None).unwrap_err();
        assert_matches!(
            err,
            Error::Unauthorized(UnauthorizedType::InvalidAccessToken)
        );

        let expired = generate_access_token_with_exp(
            &bootstrap.app_state.jwt_state,
            &bootstrap.user_model,
            (current_timestamp() - Duration::minutes(5)).unix_timestamp(),
        )
        .unwrap();
        let err = guard.authorize(Some(&expired)).unwrap_err();
        assert_matches!(
            err,
            Error::Unauthorized(UnauthorizedType::InvalidAccessToken)
        );
    }

    #[tokio::test]
    async fn test_access_guard_middleware() {
        let bootstrap = bootstrap().await;
        let deliveryman = bootstrap
            .derive("33333333333", "password", UserRole::Deliveryman)
            .await;

        let guard = AccessGuard::new(
            bootstrap.app_state.jwt_state.clone(),
            &[UserRole::Deliveryman],
        );
        let app = Router::new()
            .route(
                "/whoami",
                routing::get(|user: UserAccess| async move { user.id.to_string() }),
            )
            .route_layer(middleware::from_fn_with_state(guard, super::access_guard))
            .with_state(bootstrap.app_state.clone());

        let request = |token: Option<String>| {
            let builder = Request::get("/whoami");
            let builder = match token {
                Some(token) => builder.header("Authorization", format!("Bearer {token}")),
                None => builder,
            };
            builder.body(Body::empty()).unwrap()
        };

        let response = app
            .clone()
            .oneshot(request(Some(deliveryman.user_token())))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = hyper::body::to_bytes(response.into_body()).await.unwrap();
        assert_eq!(body, deliveryman.user_id().to_string());

        let response = app
            .clone()
            .oneshot(request(Some(bootstrap.user_token())))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);

        let response = app.clone().oneshot(request(None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let response = app
            .oneshot(request(Some("garbage".to_string())))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_profile() {
        let bootstrap = bootstrap().await;

        let Json(profile) = super::profile(bootstrap.user_collection(), bootstrap.user_access())
            .await
            .unwrap();
        assert_eq!(profile.id, bootstrap.user_id());
        assert_eq!(profile.cpf, bootstrap.user_cpf());

        bootstrap
            .app_state
            .user_collection
            .delete(bootstrap.user_id())
            .await
            .unwrap();

        let err = super::profile(bootstrap.user_collection(), bootstrap.user_access())
            .await
            .unwrap_err();
        assert_matches!(err, Error::NotFound(Resource::User));
    }
}
