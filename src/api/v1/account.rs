use argon2::Argon2;
use axum::extract::State;
use serde::{Deserialize, Serialize};
use tap::TapFallible;
use time::OffsetDateTime;
use uuid::Uuid;
use validator::Validate;

use crate::{
    error::{Error, Resource},
    store::{OrderRepository, Reference, UserRepository},
    util::{hash_password, Json, PathUuid},
};

use super::{
    auth::{CreateUserRequest, UserAccess, UserCollection, UserModel, UserResponse, UserRole},
    order::{with_recipients, Order, OrderCollection},
    recipient::RecipientCollection,
};

/// Resolves a user, optionally only when it has `role`. Users of another
/// role are reported as missing.
async fn find_user(
    users: &UserCollection,
    id: Uuid,
    role: Option<UserRole>,
) -> Result<UserModel, Error> {
    let resource = match role {
        Some(UserRole::Deliveryman) => Resource::Deliveryman,
        _ => Resource::User,
    };

    users
        .find_by_id(id)
        .await?
        .filter(|it| role.map_or(true, |role| it.role == role))
        .ok_or(Error::NotFound(resource))
        .tap_err(|_| tracing::debug!(%id, "tried accessing non existing {}", resource))
}

pub async fn index(State(users): State<UserCollection>) -> Result<Json<Vec<UserResponse>>, Error> {
    let users = users.find_all(None).await?;

    Ok(Json(users.into_iter().map(Into::into).collect()))
}

pub async fn show(
    State(users): State<UserCollection>,
    PathUuid(user_id): PathUuid,
) -> Result<Json<UserResponse>, Error> {
    Ok(Json(find_user(&users, user_id, None).await?.into()))
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct AccountRequest {
    pub name: String,
    pub cpf: String,
    pub password: String,
    pub role: UserRole,
}

#[tracing::instrument(skip_all)]
pub async fn create(
    State(users): State<UserCollection>,
    State(argon): State<Argon2<'static>>,
    Json(request): Json<AccountRequest>,
) -> Result<Json<UserResponse>, Error> {
    let model = super::auth::create_user(
        &users,
        &argon,
        CreateUserRequest {
            name: request.name,
            cpf: request.cpf,
            password: request.password,
            role: request.role,
        },
    )
    .await?;

    tracing::debug!(id = %model.id, role = ?model.role, "created user");
    Ok(Json(model.into()))
}

#[derive(Validate, Serialize, Deserialize, Debug, Clone, Default)]
pub struct UpdateRequest {
    #[validate(length(min = 1, max = 124))]
    pub name: Option<String>,

    #[validate(length(min = 1, max = 32))]
    pub cpf: Option<String>,

    #[validate(length(min = 6, max = 64))]
    pub password: Option<String>,

    pub role: Option<UserRole>,
}

/// Partial update. `scope` restricts the target to one role and keeps that
/// role fixed.
async fn update_user(
    users: &UserCollection,
    orders: &OrderCollection,
    argon: &Argon2<'_>,
    user_id: Uuid,
    request: UpdateRequest,
    scope: Option<UserRole>,
) -> Result<UserModel, Error> {
    request.validate()?;

    let account = find_user(users, user_id, scope).await?;

    if let Some(cpf) = &request.cpf {
        if cpf != &account.cpf && users.find_by_cpf(cpf).await?.is_some() {
            return Err(Error::MustUniqueError("cpf".to_string()))
                .tap_err(|_| tracing::debug!("tried taking an existing cpf"));
        }
    }

    let role = match scope {
        Some(role) => role,
        None => request.role.unwrap_or(account.role),
    };

    if account.role == UserRole::Deliveryman
        && role != UserRole::Deliveryman
        && orders
            .is_referenced(Reference::Deliveryman(account.id))
            .await?
    {
        return Err(Error::StillReferenced("user"))
            .tap_err(|_| tracing::debug!("tried changing role of user with assigned orders"));
    }

    let account = UserModel {
        id: account.id,
        name: request.name.unwrap_or(account.name),
        cpf: request.cpf.unwrap_or(account.cpf),
        password: request
            .password
            .map(|it| hash_password(argon, &it))
            .unwrap_or(Ok(account.password))?,
        role,
        updated_at: OffsetDateTime::now_utc(),
        created_at: account.created_at,
    };

    if !users.update(&account).await? {
        return Err(Error::NotFound(Resource::User));
    }

    Ok(account)
}

#[tracing::instrument(skip_all, fields(id = %user_id))]
pub async fn update(
    State(users): State<UserCollection>,
    State(orders): State<OrderCollection>,
    State(argon): State<Argon2<'static>>,
    PathUuid(user_id): PathUuid,
    Json(request): Json<UpdateRequest>,
) -> Result<Json<UserResponse>, Error> {
    Ok(Json(
        update_user(&users, &orders, &argon, user_id, request, None)
            .await?
            .into(),
    ))
}

async fn delete_user(
    users: &UserCollection,
    orders: &OrderCollection,
    user_id: Uuid,
    scope: Option<UserRole>,
) -> Result<(), Error> {
    find_user(users, user_id, scope).await?;

    if orders
        .is_referenced(Reference::Deliveryman(user_id))
        .await?
    {
        return Err(Error::StillReferenced("user"))
            .tap_err(|_| tracing::debug!("tried deleting user with assigned orders"));
    }

    tracing::debug!("deleting user");
    users.delete(user_id).await?;

    Ok(())
}

#[tracing::instrument(skip_all, fields(id = %user_id))]
pub async fn delete(
    State(users): State<UserCollection>,
    State(orders): State<OrderCollection>,
    PathUuid(user_id): PathUuid,
) -> Result<(), Error> {
    delete_user(&users, &orders, user_id, None).await
}

/// Every order assigned to the user. Deliverymen may only list their own.
pub async fn orders(
    State(users): State<UserCollection>,
    State(orders): State<OrderCollection>,
    State(recipients): State<RecipientCollection>,
    user: UserAccess,
    PathUuid(user_id): PathUuid,
) -> Result<Json<Vec<Order>>, Error> {
    if user.role == UserRole::Deliveryman && user.id != user_id {
        return Err(Error::Forbidden)
            .tap_err(|_| tracing::debug!("tried listing other deliveryman orders"));
    }

    find_user(&users, user_id, None).await?;

    let orders = orders.find_by_deliveryman(user_id, None).await?;

    Ok(Json(with_recipients(orders, &recipients).await?))
}

pub async fn index_deliverymen(
    State(users): State<UserCollection>,
) -> Result<Json<Vec<UserResponse>>, Error> {
    let users = users.find_all(Some(UserRole::Deliveryman)).await?;

    Ok(Json(users.into_iter().map(Into::into).collect()))
}

pub async fn show_deliveryman(
    State(users): State<UserCollection>,
    PathUuid(user_id): PathUuid,
) -> Result<Json<UserResponse>, Error> {
    Ok(Json(
        find_user(&users, user_id, Some(UserRole::Deliveryman))
            .await?
            .into(),
    ))
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct DeliverymanRequest {
    pub name: String,
    pub cpf: String,
    pub password: String,
}

#[tracing::instrument(skip_all)]
pub async fn create_deliveryman(
    State(users): State<UserCollection>,
    State(argon): State<Argon2<'static>>,
    Json(request): Json<DeliverymanRequest>,
) -> Result<Json<UserResponse>, Error> {
    let model = super::auth::create_user(
        &users,
        &argon,
        CreateUserRequest {
            name: request.name,
            cpf: request.cpf,
            password: request.password,
            role: UserRole::Deliveryman,
        },
    )
    .await?;

    tracing::debug!(id = %model.id, "created deliveryman");
    Ok(Json(model.into()))
}

#[tracing::instrument(skip_all, fields(id = %user_id))]
pub async fn update_deliveryman(
    State(users): State<UserCollection>,
    State(orders): State<OrderCollection>,
    State(argon): State<Argon2<'static>>,
    PathUuid(user_id): PathUuid,
    Json(request): Json<UpdateRequest>,
) -> Result<Json<UserResponse>, Error> {
    Ok(Json(
        update_user(
            &users,
            &orders,
            &argon,
            user_id,
            request,
            Some(UserRole::Deliveryman),
        )
        .await?
        .into(),
    ))
}

#[tracing::instrument(skip_all, fields(id = %user_id))]
pub async fn delete_deliveryman(
    State(users): State<UserCollection>,
    State(orders): State<OrderCollection>,
    PathUuid(user_id): PathUuid,
) -> Result<(), Error> {
    delete_user(&users, &orders, user_id, Some(UserRole::Deliveryman)).await
}
