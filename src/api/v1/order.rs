use std::{collections::HashMap, str::FromStr, sync::Arc};

use axum::extract::{multipart::MultipartRejection, DefaultBodyLimit, Multipart, State};
use serde::{Deserialize, Serialize};
use tap::TapFallible;
use time::OffsetDateTime;
use uuid::Uuid;
use validator::Validate;

use crate::{
    error::{Error, InvalidStateType, PhotoRejection, Resource},
    store::{OrderPatch, OrderRepository, StatusChange, TransitionGuard},
    upload::{read_photo, Photo, PhotoStorage, UPLOAD_BODY_LIMIT},
    util::{FormattedDateTime, Json, PathUuid},
};

use super::{
    auth::{UserAccess, UserCollection, UserModel, UserResponse, UserRole},
    recipient::{Recipient, RecipientCollection, RecipientModel},
};

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    Waiting,
    Withdrawn,
    Delivered,
    Returned,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Waiting => "WAITING",
            Self::Withdrawn => "WITHDRAWN",
            Self::Delivered => "DELIVERED",
            Self::Returned => "RETURNED",
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown order status {0}")]
pub struct UnknownStatus(String);

impl FromStr for OrderStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "WAITING" => Ok(Self::Waiting),
            "WITHDRAWN" => Ok(Self::Withdrawn),
            "DELIVERED" => Ok(Self::Delivered),
            "RETURNED" => Ok(Self::Returned),
            other => Err(UnknownStatus(other.to_string())),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct OrderModel {
    pub id: Uuid,
    pub recipient_id: Uuid,
    pub deliveryman_id: Uuid,

    pub tracking_code: String,
    pub status: OrderStatus,
    pub photo_url: Option<String>,

    pub withdrawn_at: Option<OffsetDateTime>,
    pub delivered_at: Option<OffsetDateTime>,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

impl OrderModel {
    /// Moves the order to `change.status`. `withdrawn_at` and `delivered_at`
    /// are only ever filled once.
    pub fn apply(&mut self, change: &StatusChange) {
        self.status = change.status;

        match change.status {
            OrderStatus::Withdrawn => {
                self.withdrawn_at.get_or_insert(change.at);
            }
            OrderStatus::Delivered => {
                self.delivered_at.get_or_insert(change.at);
            }
            OrderStatus::Waiting | OrderStatus::Returned => {}
        }

        if let Some(photo_url) = &change.photo_url {
            self.photo_url = Some(photo_url.clone());
        }

        self.updated_at = change.at;
    }

    /// Writes the fields set in `patch`, keeping everything else as stored.
    pub fn patch(&mut self, patch: &OrderPatch, at: OffsetDateTime) {
        if let Some(recipient_id) = patch.recipient_id {
            self.recipient_id = recipient_id;
        }
        if let Some(deliveryman_id) = patch.deliveryman_id {
            self.deliveryman_id = deliveryman_id;
        }
        if let Some(tracking_code) = &patch.tracking_code {
            self.tracking_code = tracking_code.clone();
        }

        if let Some(photo_url) = &patch.photo_url {
            self.photo_url = Some(photo_url.clone());
        }
        if let Some(status) = patch.status {
            self.apply(&StatusChange {
                status,
                photo_url: None,
                at,
            });
        }

        self.updated_at = at;
    }
}

#[derive(Clone)]
pub struct OrderCollection(pub Arc<dyn OrderRepository>);

impl std::ops::Deref for OrderCollection {
    type Target = dyn OrderRepository;

    fn deref(&self) -> &Self::Target {
        self.0.as_ref()
    }
}

/// `TRK-` followed by 8 upper-case hex digits.
pub fn generate_tracking_code() -> String {
    format!("TRK-{:08X}", rand::random::<u32>())
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Order {
    pub id: Uuid,
    pub recipient_id: Uuid,
    pub deliveryman_id: Uuid,

    pub tracking_code: String,
    pub status: OrderStatus,
    pub photo_url: Option<String>,

    pub withdrawn_at: Option<FormattedDateTime>,
    pub delivered_at: Option<FormattedDateTime>,
    pub created_at: FormattedDateTime,
    pub updated_at: FormattedDateTime,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub recipient: Option<Recipient>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deliveryman: Option<UserResponse>,
}

impl From<OrderModel> for Order {
    fn from(value: OrderModel) -> Self {
        Self {
            id: value.id,
            recipient_id: value.recipient_id,
            deliveryman_id: value.deliveryman_id,

            tracking_code: value.tracking_code,
            status: value.status,
            photo_url: value.photo_url,

            withdrawn_at: value.withdrawn_at.map(Into::into),
            delivered_at: value.delivered_at.map(Into::into),
            created_at: value.created_at.into(),
            updated_at: value.updated_at.into(),

            recipient: None,
            deliveryman: None,
        }
    }
}

impl Order {
    fn with_recipient(mut self, recipient: Option<RecipientModel>) -> Self {
        self.recipient = recipient.map(Into::into);
        self
    }

    fn with_deliveryman(mut self, deliveryman: Option<UserModel>) -> Self {
        self.deliveryman = deliveryman.map(Into::into);
        self
    }
}

/// Orders with their recipient embedded, in the order given.
pub async fn with_recipients(
    orders: Vec<OrderModel>,
    recipients: &RecipientCollection,
) -> Result<Vec<Order>, Error> {
    let recipients: HashMap<Uuid, RecipientModel> = recipients
        .find_all()
        .await?
        .into_iter()
        .map(|it| (it.id, it))
        .collect();

    Ok(orders
        .into_iter()
        .map(|order| {
            let recipient = recipients.get(&order.recipient_id).cloned();
            Order::from(order).with_recipient(recipient)
        })
        .collect())
}

pub async fn index(
    State(orders): State<OrderCollection>,
    State(recipients): State<RecipientCollection>,
    State(users): State<UserCollection>,
) -> Result<Json<Vec<Order>>, Error> {
    let users: HashMap<Uuid, UserModel> = users
        .find_all(None)
        .await?
        .into_iter()
        .map(|it| (it.id, it))
        .collect();

    let orders = with_recipients(orders.find_all().await?, &recipients)
        .await?
        .into_iter()
        .map(|order| {
            let deliveryman = users.get(&order.deliveryman_id).cloned();
            order.with_deliveryman(deliveryman)
        })
        .collect();

    Ok(Json(orders))
}

pub async fn show(
    State(orders): State<OrderCollection>,
    State(recipients): State<RecipientCollection>,
    State(users): State<UserCollection>,
    PathUuid(order_id): PathUuid,
) -> Result<Json<Order>, Error> {
    let order = orders
        .find_by_id(order_id)
        .await?
        .ok_or(Error::NotFound(Resource::Order))
        .tap_err(|_| tracing::debug!("tried accessing non existing order"))?;

    let recipient = recipients.find_by_id(order.recipient_id).await?;
    let deliveryman = users.find_by_id(order.deliveryman_id).await?;

    Ok(Json(
        Order::from(order)
            .with_recipient(recipient)
            .with_deliveryman(deliveryman),
    ))
}

async fn ensure_recipient(recipients: &RecipientCollection, id: Uuid) -> Result<(), Error> {
    recipients
        .find_by_id(id)
        .await?
        .map(|_| ())
        .ok_or(Error::NotFound(Resource::Recipient))
        .tap_err(|_| tracing::debug!(%id, "order references non existing recipient"))
}

async fn ensure_deliveryman(users: &UserCollection, id: Uuid) -> Result<(), Error> {
    users
        .find_by_id(id)
        .await?
        .filter(|it| it.role == UserRole::Deliveryman)
        .map(|_| ())
        .ok_or(Error::NotFound(Resource::Deliveryman))
        .tap_err(|_| tracing::debug!(%id, "order references non existing deliveryman"))
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct CreateRequest {
    pub recipient_id: Uuid,
    pub deliveryman_id: Uuid,
}

#[tracing::instrument(skip_all, fields(recipient_id = %request.recipient_id, deliveryman_id = %request.deliveryman_id))]
pub async fn create(
    State(orders): State<OrderCollection>,
    State(recipients): State<RecipientCollection>,
    State(users): State<UserCollection>,
    Json(request): Json<CreateRequest>,
) -> Result<Json<Order>, Error> {
    ensure_recipient(&recipients, request.recipient_id).await?;
    ensure_deliveryman(&users, request.deliveryman_id).await?;

    let tracking_code = loop {
        let code = generate_tracking_code();

        if !orders.exists_tracking_code(&code).await? {
            break code;
        }
        tracing::debug!(%code, "tracking code collision, retrying");
    };

    let now = OffsetDateTime::now_utc();
    let model = OrderModel {
        id: Uuid::new_v4(),
        recipient_id: request.recipient_id,
        deliveryman_id: request.deliveryman_id,
        tracking_code,
        status: OrderStatus::Waiting,
        photo_url: None,
        withdrawn_at: None,
        delivered_at: None,
        created_at: now,
        updated_at: now,
    };

    tracing::debug!("creating order {:#?}", model);
    orders.insert(&model).await?;

    Ok(Json(model.into()))
}

#[derive(Validate, Serialize, Deserialize, Debug, Clone, Default)]
pub struct UpdateRequest {
    pub recipient_id: Option<Uuid>,
    pub deliveryman_id: Option<Uuid>,
    pub status: Option<OrderStatus>,
    pub photo_url: Option<String>,

    #[validate(length(min = 1, max = 64))]
    pub tracking_code: Option<String>,
}

#[tracing::instrument(skip_all, fields(id = %order_id))]
pub async fn update(
    State(orders): State<OrderCollection>,
    State(recipients): State<RecipientCollection>,
    State(users): State<UserCollection>,
    PathUuid(order_id): PathUuid,
    Json(request): Json<UpdateRequest>,
) -> Result<Json<Order>, Error> {
    request.validate()?;

    let current = orders
        .find_by_id(order_id)
        .await?
        .ok_or(Error::NotFound(Resource::Order))
        .tap_err(|_| tracing::debug!("tried updating non existing order"))?;

    if let Some(recipient_id) = request.recipient_id {
        ensure_recipient(&recipients, recipient_id).await?;
    }

    if let Some(deliveryman_id) = request.deliveryman_id {
        ensure_deliveryman(&users, deliveryman_id).await?;
    }

    let tracking_code = request
        .tracking_code
        .filter(|it| *it != current.tracking_code);
    if let Some(tracking_code) = &tracking_code {
        if orders.exists_tracking_code(tracking_code).await? {
            return Err(Error::MustUniqueError("tracking_code".to_string()))
                .tap_err(|_| tracing::debug!("tried reusing a tracking code"));
        }
    }

    let patch = OrderPatch {
        recipient_id: request.recipient_id,
        deliveryman_id: request.deliveryman_id,
        tracking_code,
        status: request.status,
        photo_url: request.photo_url,
    };

    tracing::debug!("patching order {:#?}", patch);
    let order = orders
        .update(order_id, &patch, OffsetDateTime::now_utc())
        .await?
        .ok_or(Error::NotFound(Resource::Order))
        .tap_err(|_| tracing::debug!("order removed before update applied"))?;

    Ok(Json(order.into()))
}

#[tracing::instrument(skip_all, fields(id = %order_id))]
pub async fn delete(
    State(orders): State<OrderCollection>,
    PathUuid(order_id): PathUuid,
) -> Result<(), Error> {
    if !orders.delete(order_id).await? {
        return Err(Error::NotFound(Resource::Order))
            .tap_err(|_| tracing::debug!("tried deleting non existing order"));
    }

    Ok(())
}

async fn override_status(
    orders: &OrderCollection,
    order_id: Uuid,
    status: OrderStatus,
) -> Result<Json<Order>, Error> {
    let order = orders
        .transition(order_id, TransitionGuard::Any, StatusChange::new(status))
        .await?
        .ok_or(Error::NotFound(Resource::Order))
        .tap_err(|_| tracing::debug!(?status, "tried overriding status of non existing order"))?;

    Ok(Json(order.into()))
}

#[tracing::instrument(skip_all, fields(id = %order_id))]
pub async fn mark_withdrawn(
    State(orders): State<OrderCollection>,
    PathUuid(order_id): PathUuid,
) -> Result<Json<Order>, Error> {
    override_status(&orders, order_id, OrderStatus::Withdrawn).await
}

#[tracing::instrument(skip_all, fields(id = %order_id))]
pub async fn mark_delivered(
    State(orders): State<OrderCollection>,
    PathUuid(order_id): PathUuid,
) -> Result<Json<Order>, Error> {
    override_status(&orders, order_id, OrderStatus::Delivered).await
}

/// Served on `/status/canceled`; the stored state is `RETURNED`.
#[tracing::instrument(skip_all, fields(id = %order_id))]
pub async fn mark_canceled(
    State(orders): State<OrderCollection>,
    PathUuid(order_id): PathUuid,
) -> Result<Json<Order>, Error> {
    override_status(&orders, order_id, OrderStatus::Returned).await
}

pub async fn index_delivery(
    State(orders): State<OrderCollection>,
    State(recipients): State<RecipientCollection>,
    user: UserAccess,
) -> Result<Json<Vec<Order>>, Error> {
    let orders = orders
        .find_by_deliveryman(user.id, Some(OrderStatus::Delivered))
        .await?;

    Ok(Json(with_recipients(orders, &recipients).await?))
}

/// Ownership and state checks shared by the deliveryman transitions.
async fn find_owned(
    orders: &OrderCollection,
    user: UserAccess,
    order_id: Uuid,
    expected: OrderStatus,
) -> Result<OrderModel, Error> {
    let order = orders
        .find_by_id(order_id)
        .await?
        .ok_or(Error::NotFound(Resource::Order))?;

    if order.deliveryman_id != user.id {
        return Err(Error::NotYourOrder)
            .tap_err(|_| tracing::debug!("tried moving other deliveryman order"));
    }

    if order.status != expected {
        return Err(Error::InvalidState(invalid_state(expected)))
            .tap_err(|_| tracing::debug!(status = ?order.status, "order in unexpected status"));
    }

    Ok(order)
}

fn invalid_state(expected: OrderStatus) -> InvalidStateType {
    match expected {
        OrderStatus::Withdrawn => InvalidStateType::NotWithdrawn,
        _ => InvalidStateType::NotWaiting,
    }
}

#[tracing::instrument(skip_all, fields(user = ?user, id = %order_id))]
pub async fn pickup(
    State(orders): State<OrderCollection>,
    user: UserAccess,
    PathUuid(order_id): PathUuid,
) -> Result<Json<Order>, Error> {
    find_owned(&orders, user, order_id, OrderStatus::Waiting).await?;

    let guard = TransitionGuard::Owned {
        deliveryman_id: user.id,
        expected: OrderStatus::Waiting,
    };
    let order = orders
        .transition(order_id, guard, StatusChange::new(OrderStatus::Withdrawn))
        .await?
        .ok_or(Error::InvalidState(InvalidStateType::NotWaiting))
        .tap_err(|_| tracing::debug!("order changed before pickup applied"))?;

    Ok(Json(order.into()))
}

/// Completes a delivery. `photo` is the outcome of reading the upload and is
/// only looked at once the order itself passed its checks.
pub async fn deliver_order(
    orders: &OrderCollection,
    storage: &PhotoStorage,
    user: UserAccess,
    order_id: Uuid,
    photo: Result<Photo, Error>,
) -> Result<OrderModel, Error> {
    find_owned(orders, user, order_id, OrderStatus::Withdrawn).await?;

    let photo = photo.tap_err(|err| tracing::debug!("rejected photo upload: {}", err))?;
    let extension = photo
        .check()
        .tap_err(|err| tracing::debug!("rejected photo: {}", err))?;

    let file_name = storage.store(&photo, extension).await?;

    let guard = TransitionGuard::Owned {
        deliveryman_id: user.id,
        expected: OrderStatus::Withdrawn,
    };
    let change = StatusChange::new(OrderStatus::Delivered).with_photo(file_name.clone());

    match orders.transition(order_id, guard, change).await {
        Ok(Some(order)) => Ok(order),
        Ok(None) => {
            tracing::debug!("order changed before delivery applied");
            storage.discard(&file_name).await;
            Err(Error::InvalidState(InvalidStateType::NotWithdrawn))
        }
        Err(err) => {
            storage.discard(&file_name).await;
            Err(err)
        }
    }
}

#[tracing::instrument(skip_all, fields(user = ?user, id = %order_id))]
pub async fn deliver(
    State(orders): State<OrderCollection>,
    State(storage): State<PhotoStorage>,
    user: UserAccess,
    PathUuid(order_id): PathUuid,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<Order>, Error> {
    let photo = match multipart {
        Ok(multipart) => read_photo(multipart).await,
        Err(rejection) => {
            tracing::debug!("not a multipart body: {}", rejection);
            Err(PhotoRejection::Missing.into())
        }
    };

    let order = deliver_order(&orders, &storage, user, order_id, photo).await?;

    Ok(Json(order.into()))
}

pub fn deliver_body_limit() -> DefaultBodyLimit {
    DefaultBodyLimit::max(UPLOAD_BODY_LIMIT)
}
