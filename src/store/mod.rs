//! Repository interfaces, one per entity.
//!
//! `postgres` backs the running server, `memory` backs the test suite. Both
//! must agree on the conditional status update in
//! [`OrderRepository::transition`], which is the only place order state is
//! mutated outside of a full admin edit.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::{
    api::v1::{
        auth::{UserModel, UserRole},
        order::{OrderModel, OrderStatus},
        recipient::RecipientModel,
    },
    error::Error,
};

#[async_trait]
pub trait UserRepository: Send + Sync {
    /// Fails with `MustUniqueError("cpf")` when the cpf is taken.
    async fn insert(&self, user: &UserModel) -> Result<(), Error>;

    async fn find_by_id(&self, id: Uuid) -> Result<Option<UserModel>, Error>;

    async fn find_by_cpf(&self, cpf: &str) -> Result<Option<UserModel>, Error>;

    async fn find_all(&self, role: Option<UserRole>) -> Result<Vec<UserModel>, Error>;

    /// Returns `false` when no row has `user.id`.
    async fn update(&self, user: &UserModel) -> Result<bool, Error>;

    async fn delete(&self, id: Uuid) -> Result<bool, Error>;
}

#[async_trait]
pub trait RecipientRepository: Send + Sync {
    async fn insert(&self, recipient: &RecipientModel) -> Result<(), Error>;

    async fn find_by_id(&self, id: Uuid) -> Result<Option<RecipientModel>, Error>;

    async fn find_all(&self) -> Result<Vec<RecipientModel>, Error>;

    async fn update(&self, recipient: &RecipientModel) -> Result<bool, Error>;

    async fn delete(&self, id: Uuid) -> Result<bool, Error>;
}

/// Row an order points at, used to refuse deleting referenced records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reference {
    Recipient(Uuid),
    Deliveryman(Uuid),
}

/// Precondition of a status update, evaluated atomically with the write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionGuard {
    /// Admin override: only the order id has to match.
    Any,
    /// Deliveryman transition: the order must belong to `deliveryman_id`
    /// and currently be in `expected`.
    Owned {
        deliveryman_id: Uuid,
        expected: OrderStatus,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusChange {
    pub status: OrderStatus,
    pub photo_url: Option<String>,
    pub at: OffsetDateTime,
}

impl StatusChange {
    pub fn new(status: OrderStatus) -> Self {
        Self {
            status,
            photo_url: None,
            at: OffsetDateTime::now_utc(),
        }
    }

    pub fn with_photo(mut self, photo_url: String) -> Self {
        self.photo_url = Some(photo_url);
        self
    }
}

/// Admin edit of an order. Only the `Some` fields are written; a new status
/// fills its timestamp the same way a [`StatusChange`] does.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OrderPatch {
    pub recipient_id: Option<Uuid>,
    pub deliveryman_id: Option<Uuid>,
    pub tracking_code: Option<String>,
    pub status: Option<OrderStatus>,
    pub photo_url: Option<String>,
}

#[async_trait]
pub trait OrderRepository: Send + Sync {
    /// Fails with `MustUniqueError("tracking_code")` on a duplicate code.
    async fn insert(&self, order: &OrderModel) -> Result<(), Error>;

    async fn find_by_id(&self, id: Uuid) -> Result<Option<OrderModel>, Error>;

    async fn find_all(&self) -> Result<Vec<OrderModel>, Error>;

    /// Orders assigned to `deliveryman_id`, optionally leaving out one status.
    async fn find_by_deliveryman(
        &self,
        deliveryman_id: Uuid,
        except: Option<OrderStatus>,
    ) -> Result<Vec<OrderModel>, Error>;

    async fn exists_tracking_code(&self, tracking_code: &str) -> Result<bool, Error>;

    async fn is_referenced(&self, reference: Reference) -> Result<bool, Error>;

    /// Writes the fields set in `patch` on top of the stored row, in a single
    /// write. `None` means the order does not exist.
    async fn update(
        &self,
        id: Uuid,
        patch: &OrderPatch,
        at: OffsetDateTime,
    ) -> Result<Option<OrderModel>, Error>;

    async fn delete(&self, id: Uuid) -> Result<bool, Error>;

    /// Applies `change` in a single conditional write. `None` means the
    /// order does not exist or `guard` did not hold at write time.
    async fn transition(
        &self,
        id: Uuid,
        guard: TransitionGuard,
        change: StatusChange,
    ) -> Result<Option<OrderModel>, Error>;
}
