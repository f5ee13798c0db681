use std::sync::Arc;

use axum::extract::State;
use serde::{Deserialize, Serialize};
use tap::TapFallible;
use time::OffsetDateTime;
use uuid::Uuid;
use validator::Validate;

use crate::{
    error::{Error, Resource},
    store::{OrderRepository, RecipientRepository, Reference},
    util::{FormattedDateTime, Json, PathUuid},
};

use super::order::OrderCollection;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct RecipientModel {
    pub id: Uuid,

    pub name: String,
    pub street: String,
    pub number: i32,
    pub complement: Option<String>,
    pub city: String,
    pub state: String,
    pub zipcode: String,

    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

#[derive(Clone)]
pub struct RecipientCollection(pub Arc<dyn RecipientRepository>);

impl std::ops::Deref for RecipientCollection {
    type Target = dyn RecipientRepository;

    fn deref(&self) -> &Self::Target {
        self.0.as_ref()
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Recipient {
    pub id: Uuid,

    pub name: String,
    pub street: String,
    pub number: i32,
    pub complement: Option<String>,
    pub city: String,
    pub state: String,
    pub zipcode: String,

    pub created_at: FormattedDateTime,
    pub updated_at: FormattedDateTime,
}

impl From<RecipientModel> for Recipient {
    fn from(value: RecipientModel) -> Self {
        Self {
            id: value.id,
            name: value.name,
            street: value.street,
            number: value.number,
            complement: value.complement,
            city: value.city,
            state: value.state,
            zipcode: value.zipcode,

            created_at: value.created_at.into(),
            updated_at: value.updated_at.into(),
        }
    }
}

pub async fn index(
    State(recipients): State<RecipientCollection>,
) -> Result<Json<Vec<Recipient>>, Error> {
    let recipients = recipients.find_all().await?;

    Ok(Json(recipients.into_iter().map(Into::into).collect()))
}

pub async fn show(
    State(recipients): State<RecipientCollection>,
    PathUuid(recipient_id): PathUuid,
) -> Result<Json<Recipient>, Error> {
    let recipient = recipients
        .find_by_id(recipient_id)
        .await?
        .ok_or(Error::NotFound(Resource::Recipient))
        .tap_err(|_| tracing::debug!("tried accessing non existing recipient"))?;

    Ok(Json(recipient.into()))
}

#[derive(Validate, Serialize, Deserialize, Debug, Clone)]
pub struct CreateRequest {
    #[validate(length(min = 1, max = 124))]
    pub name: String,

    #[validate(length(min = 1))]
    pub street: String,

    pub number: i32,

    pub complement: Option<String>,

    #[validate(length(min = 1))]
    pub city: String,

    #[validate(length(min = 1))]
    pub state: String,

    #[validate(length(min = 1))]
    pub zipcode: String,
}

#[tracing::instrument(skip_all)]
pub async fn create(
    State(recipients): State<RecipientCollection>,
    Json(request): Json<CreateRequest>,
) -> Result<Json<Recipient>, Error> {
    request.validate()?;

    let now = OffsetDateTime::now_utc();
    let model = RecipientModel {
        id: Uuid::new_v4(),
        name: request.name,
        street: request.street,
        number: request.number,
        complement: request.complement,
        city: request.city,
        state: request.state,
        zipcode: request.zipcode,
        created_at: now,
        updated_at: now,
    };

    tracing::debug!("creating recipient {:#?}", model);
    recipients.insert(&model).await?;

    Ok(Json(model.into()))
}

#[derive(Validate, Serialize, Deserialize, Debug, Clone, Default)]
pub struct UpdateRequest {
    #[validate(length(min = 1, max = 124))]
    pub name: Option<String>,

    #[validate(length(min = 1))]
    pub street: Option<String>,

    pub number: Option<i32>,

    pub complement: Option<String>,

    #[validate(length(min = 1))]
    pub city: Option<String>,

    #[validate(length(min = 1))]
    pub state: Option<String>,

    #[validate(length(min = 1))]
    pub zipcode: Option<String>,
}

#[tracing::instrument(
    skip_all,
    fields(
        id = %recipient_id,
    )
)]
pub async fn update(
    State(recipients): State<RecipientCollection>,
    PathUuid(recipient_id): PathUuid,
    Json(request): Json<UpdateRequest>,
) -> Result<Json<Recipient>, Error> {
    request.validate()?;

    let recipient = recipients
        .find_by_id(recipient_id)
        .await?
        .ok_or(Error::NotFound(Resource::Recipient))
        .tap_err(|_| tracing::debug!("tried updating non existing recipient"))?;

    let recipient = RecipientModel {
        name: request.name.unwrap_or(recipient.name),
        street: request.street.unwrap_or(recipient.street),
        number: request.number.unwrap_or(recipient.number),
        complement: request.complement.or(recipient.complement),
        city: request.city.unwrap_or(recipient.city),
        state: request.state.unwrap_or(recipient.state),
        zipcode: request.zipcode.unwrap_or(recipient.zipcode),

        id: recipient.id,
        created_at: recipient.created_at,
        updated_at: OffsetDateTime::now_utc(),
    };

    tracing::debug!("updating recipient {:#?}", recipient);
    if !recipients.update(&recipient).await? {
        return Err(Error::NotFound(Resource::Recipient));
    }

    Ok(Json(recipient.into()))
}

#[tracing::instrument(
    skip_all,
    fields(
        id = %recipient_id,
    )
)]
pub async fn delete(
    State(recipients): State<RecipientCollection>,
    State(orders): State<OrderCollection>,
    PathUuid(recipient_id): PathUuid,
) -> Result<(), Error> {
    recipients
        .find_by_id(recipient_id)
        .await?
        .ok_or(Error::NotFound(Resource::Recipient))
        .tap_err(|_| tracing::debug!("tried deleting non existing recipient"))?;

    if orders
        .is_referenced(Reference::Recipient(recipient_id))
        .await?
    {
        return Err(Error::StillReferenced("recipient"))
            .tap_err(|_| tracing::debug!("tried deleting recipient with orders"));
    }

    tracing::debug!("deleting recipient");
    recipients.delete(recipient_id).await?;

    Ok(())
}
