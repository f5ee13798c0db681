use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::{
    api::v1::{
        auth::{UserModel, UserRole},
        order::{OrderModel, OrderStatus},
        recipient::RecipientModel,
    },
    error::Error,
};

use super::{
    OrderPatch, OrderRepository, RecipientRepository, Reference, StatusChange, TransitionGuard,
    UserRepository,
};

/// In-memory repositories for tests. Uniqueness rules mirror the database
/// constraints.
#[derive(Clone, Debug, Default)]
pub struct MemoryStore {
    users: Arc<RwLock<HashMap<Uuid, UserModel>>>,
    recipients: Arc<RwLock<HashMap<Uuid, RecipientModel>>>,
    orders: Arc<RwLock<HashMap<Uuid, OrderModel>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn by_creation<T>(mut items: Vec<T>, created_at: impl Fn(&T) -> time::OffsetDateTime) -> Vec<T> {
    items.sort_by_key(|it| created_at(it));
    items
}

#[async_trait]
impl UserRepository for MemoryStore {
    async fn insert(&self, user: &UserModel) -> Result<(), Error> {
        let mut users = self.users.write().await;

        if users.values().any(|it| it.cpf == user.cpf) {
            return Err(Error::MustUniqueError("cpf".to_string()));
        }

        users.insert(user.id, user.clone());
        Ok(())
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<UserModel>, Error> {
        Ok(self.users.read().await.get(&id).cloned())
    }

    async fn find_by_cpf(&self, cpf: &str) -> Result<Option<UserModel>, Error> {
        Ok(self
            .users
            .read()
            .await
            .values()
            .find(|it| it.cpf == cpf)
            .cloned())
    }

    async fn find_all(&self, role: Option<UserRole>) -> Result<Vec<UserModel>, Error> {
        let users = self
            .users
            .read()
            .await
            .values()
            .filter(|it| role.map_or(true, |role| it.role == role))
            .cloned()
            .collect();

        Ok(by_creation(users, |it| it.created_at))
    }

    async fn update(&self, user: &UserModel) -> Result<bool, Error> {
        let mut users = self.users.write().await;

        if users
            .values()
            .any(|it| it.id != user.id && it.cpf == user.cpf)
        {
            return Err(Error::MustUniqueError("cpf".to_string()));
        }

        match users.get_mut(&user.id) {
            Some(it) => {
                *it = user.clone();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn delete(&self, id: Uuid) -> Result<bool, Error> {
        Ok(self.users.write().await.remove(&id).is_some())
    }
}

#[async_trait]
impl RecipientRepository for MemoryStore {
    async fn insert(&self, recipient: &RecipientModel) -> Result<(), Error> {
        self.recipients
            .write()
            .await
            .insert(recipient.id, recipient.clone());
        Ok(())
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<RecipientModel>, Error> {
        Ok(self.recipients.read().await.get(&id).cloned())
    }

    async fn find_all(&self) -> Result<Vec<RecipientModel>, Error> {
        let recipients = self.recipients.read().await.values().cloned().collect();

        Ok(by_creation(recipients, |it| it.created_at))
    }

    async fn update(&self, recipient: &RecipientModel) -> Result<bool, Error> {
        match self.recipients.write().await.get_mut(&recipient.id) {
            Some(it) => {
                *it = recipient.clone();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn delete(&self, id: Uuid) -> Result<bool, Error> {
        Ok(self.recipients.write().await.remove(&id).is_some())
    }
}

#[async_trait]
impl OrderRepository for MemoryStore {
    async fn insert(&self, order: &OrderModel) -> Result<(), Error> {
        let mut orders = self.orders.write().await;

        if orders
            .values()
            .any(|it| it.tracking_code == order.tracking_code)
        {
            return Err(Error::MustUniqueError("tracking_code".to_string()));
        }

        orders.insert(order.id, order.clone());
        Ok(())
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<OrderModel>, Error> {
        Ok(self.orders.read().await.get(&id).cloned())
    }

    async fn find_all(&self) -> Result<Vec<OrderModel>, Error> {
        let orders = self.orders.read().await.values().cloned().collect();

        Ok(by_creation(orders, |it| it.created_at))
    }

    async fn find_by_deliveryman(
        &self,
        deliveryman_id: Uuid,
        except: Option<OrderStatus>,
    ) -> Result<Vec<OrderModel>, Error> {
        let orders = self
            .orders
            .read()
            .await
            .values()
            .filter(|it| it.deliveryman_id == deliveryman_id)
            .filter(|it| except != Some(it.status))
            .cloned()
            .collect();

        Ok(by_creation(orders, |it| it.created_at))
    }

    async fn exists_tracking_code(&self, tracking_code: &str) -> Result<bool, Error> {
        Ok(self
            .orders
            .read()
            .await
            .values()
            .any(|it| it.tracking_code == tracking_code))
    }

    async fn is_referenced(&self, reference: Reference) -> Result<bool, Error> {
        Ok(self
            .orders
            .read()
            .await
            .values()
            .any(|it| match reference {
                Reference::Recipient(id) => it.recipient_id == id,
                Reference::Deliveryman(id) => it.deliveryman_id == id,
            }))
    }

    async fn update(
        &self,
        id: Uuid,
        patch: &OrderPatch,
        at: time::OffsetDateTime,
    ) -> Result<Option<OrderModel>, Error> {
        let mut orders = self.orders.write().await;

        if let Some(tracking_code) = &patch.tracking_code {
            if orders
                .values()
                .any(|it| it.id != id && &it.tracking_code == tracking_code)
            {
                return Err(Error::MustUniqueError("tracking_code".to_string()));
            }
        }

        let Some(order) = orders.get_mut(&id) else {
            return Ok(None);
        };
        order.patch(patch, at);

        Ok(Some(order.clone()))
    }

    async fn delete(&self, id: Uuid) -> Result<bool, Error> {
        Ok(self.orders.write().await.remove(&id).is_some())
    }

    async fn transition(
        &self,
        id: Uuid,
        guard: TransitionGuard,
        change: StatusChange,
    ) -> Result<Option<OrderModel>, Error> {
        let mut orders = self.orders.write().await;

        let Some(order) = orders.get_mut(&id) else {
            return Ok(None);
        };

        if let TransitionGuard::Owned {
            deliveryman_id,
            expected,
        } = guard
        {
            if order.deliveryman_id != deliveryman_id || order.status != expected {
                return Ok(None);
            }
        }

        order.apply(&change);

        Ok(Some(order.clone()))
    }
}

#[cfg(test)]
mod tests {
    use time::{Duration, OffsetDateTime};

    use super::*;

    fn order(deliveryman_id: Uuid, tracking_code: &str) -> OrderModel {
        let now = OffsetDateTime::now_utc();

        OrderModel {
            id: Uuid::new_v4(),
            recipient_id: Uuid::new_v4(),
            deliveryman_id,
            tracking_code: tracking_code.to_string(),
            status: OrderStatus::Waiting,
            photo_url: None,
            withdrawn_at: None,
            delivered_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn test_guarded_transition() {
        let store = MemoryStore::new();
        let deliveryman = Uuid::new_v4();
        let model = order(deliveryman, "TRK-00000001");
        OrderRepository::insert(&store, &model).await.unwrap();

        let guard = TransitionGuard::Owned {
            deliveryman_id: deliveryman,
            expected: OrderStatus::Waiting,
        };

        let first = store
            .transition(model.id, guard, StatusChange::new(OrderStatus::Withdrawn))
            .await
            .unwrap()
            .expect("first pickup should apply");
        assert_eq!(first.status, OrderStatus::Withdrawn);
        assert!(first.withdrawn_at.is_some());

        let second = store
            .transition(model.id, guard, StatusChange::new(OrderStatus::Withdrawn))
            .await
            .unwrap();
        assert!(second.is_none(), "second pickup must lose the race");

        let other = TransitionGuard::Owned {
            deliveryman_id: Uuid::new_v4(),
            expected: OrderStatus::Withdrawn,
        };
        let stolen = store
            .transition(model.id, other, StatusChange::new(OrderStatus::Delivered))
            .await
            .unwrap();
        assert!(stolen.is_none());
    }

    #[tokio::test]
    async fn test_override_keeps_timestamps() {
        let store = MemoryStore::new();
        let model = order(Uuid::new_v4(), "TRK-00000002");
        OrderRepository::insert(&store, &model).await.unwrap();

        let first = store
            .transition(
                model.id,
                TransitionGuard::Any,
                StatusChange::new(OrderStatus::Withdrawn),
            )
            .await
            .unwrap()
            .unwrap();
        let withdrawn_at = first.withdrawn_at.unwrap();

        let mut later = StatusChange::new(OrderStatus::Withdrawn);
        later.at = later.at + Duration::hours(1);
        let second = store
            .transition(model.id, TransitionGuard::Any, later)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(second.withdrawn_at, Some(withdrawn_at));

        let missing = store
            .transition(
                Uuid::new_v4(),
                TransitionGuard::Any,
                StatusChange::new(OrderStatus::Returned),
            )
            .await
            .unwrap();
        assert!(missing.is_none());
    }

    #[tokio::test]
    async fn test_unique_tracking_code() {
        let store = MemoryStore::new();
        OrderRepository::insert(&store, &order(Uuid::new_v4(), "TRK-AAAAAAAA"))
            .await
            .unwrap();

        let err = OrderRepository::insert(&store, &order(Uuid::new_v4(), "TRK-AAAAAAAA"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::MustUniqueError(field) if field == "tracking_code"));
        assert!(store.exists_tracking_code("TRK-AAAAAAAA").await.unwrap());
        assert!(!store.exists_tracking_code("TRK-BBBBBBBB").await.unwrap());
    }

    #[tokio::test]
    async fn test_find_by_deliveryman_excludes_status() {
        let store = MemoryStore::new();
        let deliveryman = Uuid::new_v4();

        let waiting = order(deliveryman, "TRK-00000010");
        let mut delivered = order(deliveryman, "TRK-00000011");
        delivered.status = OrderStatus::Delivered;
        let foreign = order(Uuid::new_v4(), "TRK-00000012");

        for it in [&waiting, &delivered, &foreign] {
            OrderRepository::insert(&store, it).await.unwrap();
        }

        let all = store.find_by_deliveryman(deliveryman, None).await.unwrap();
        assert_eq!(all.len(), 2);

        let open = store
            .find_by_deliveryman(deliveryman, Some(OrderStatus::Delivered))
            .await
            .unwrap();
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].id, waiting.id);

        assert!(store
            .is_referenced(Reference::Deliveryman(deliveryman))
            .await
            .unwrap());
        assert!(!store
            .is_referenced(Reference::Recipient(Uuid::new_v4()))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_patch_keeps_concurrent_delivery() {
        let store = MemoryStore::new();
        let deliveryman = Uuid::new_v4();
        let model = order(deliveryman, "TRK-00000020");
        OrderRepository::insert(&store, &model).await.unwrap();

        // admin loads the order for editing while it is still on the way
        let seen = OrderRepository::find_by_id(&store, model.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(seen.status, OrderStatus::Waiting);

        for (expected, change) in [
            (OrderStatus::Waiting, StatusChange::new(OrderStatus::Withdrawn)),
            (
                OrderStatus::Withdrawn,
                StatusChange::new(OrderStatus::Delivered).with_photo("proof.png".to_string()),
            ),
        ] {
            let guard = TransitionGuard::Owned {
                deliveryman_id: deliveryman,
                expected,
            };
            store
                .transition(model.id, guard, change)
                .await
                .unwrap()
                .unwrap();
        }

        let recipient_id = Uuid::new_v4();
        let patched = OrderRepository::update(
            &store,
            seen.id,
            &OrderPatch {
                recipient_id: Some(recipient_id),
                ..Default::default()
            },
            OffsetDateTime::now_utc(),
        )
        .await
        .unwrap()
        .unwrap();

        assert_eq!(patched.recipient_id, recipient_id);
        assert_eq!(patched.status, OrderStatus::Delivered);
        assert_eq!(patched.photo_url.as_deref(), Some("proof.png"));
        assert!(patched.withdrawn_at.is_some());
        assert!(patched.delivered_at.is_some());
    }

    #[tokio::test]
    async fn test_patch_status_and_tracking_code() {
        let store = MemoryStore::new();
        let first = order(Uuid::new_v4(), "TRK-00000030");
        let second = order(Uuid::new_v4(), "TRK-00000031");
        OrderRepository::insert(&store, &first).await.unwrap();
        OrderRepository::insert(&store, &second).await.unwrap();

        let now = OffsetDateTime::now_utc();
        let withdrawn = OrderRepository::update(
            &store,
            first.id,
            &OrderPatch {
                status: Some(OrderStatus::Withdrawn),
                ..Default::default()
            },
            now,
        )
        .await
        .unwrap()
        .unwrap();
        assert_eq!(withdrawn.withdrawn_at, Some(now));

        let again = OrderRepository::update(
            &store,
            first.id,
            &OrderPatch {
                status: Some(OrderStatus::Withdrawn),
                ..Default::default()
            },
            now + Duration::hours(1),
        )
        .await
        .unwrap()
        .unwrap();
        assert_eq!(again.withdrawn_at, Some(now));

        let err = OrderRepository::update(
            &store,
            first.id,
            &OrderPatch {
                tracking_code: Some(second.tracking_code.clone()),
                ..Default::default()
            },
            now,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, Error::MustUniqueError(field) if field == "tracking_code"));

        let missing = OrderRepository::update(&store, Uuid::new_v4(), &OrderPatch::default(), now)
            .await
            .unwrap();
        assert!(missing.is_none());
    }
}
