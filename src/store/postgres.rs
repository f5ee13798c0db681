use std::str::FromStr;

use async_trait::async_trait;
use sqlx::{FromRow, PgPool};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::{
    api::v1::{
        auth::{UserModel, UserRole},
        order::{OrderModel, OrderStatus},
        recipient::RecipientModel,
    },
    error::{Error, Resource},
};

use super::{
    OrderPatch, OrderRepository, RecipientRepository, Reference, StatusChange, TransitionGuard,
    UserRepository,
};

fn decode_error(column: &str, value: &str) -> sqlx::Error {
    sqlx::Error::Decode(Box::new(std::io::Error::new(
        std::io::ErrorKind::InvalidData,
        format!("invalid {column} '{value}'"),
    )))
}

#[derive(FromRow)]
struct UserRow {
    id: Uuid,
    name: String,
    cpf: String,
    password: String,
    role: String,
    created_at: OffsetDateTime,
    updated_at: OffsetDateTime,
}

impl TryFrom<UserRow> for UserModel {
    type Error = sqlx::Error;

    fn try_from(row: UserRow) -> Result<Self, Self::Error> {
        let role = UserRole::from_str(&row.role).map_err(|_| decode_error("role", &row.role))?;

        Ok(Self {
            id: row.id,
            name: row.name,
            cpf: row.cpf,
            password: row.password,
            role,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

const USER_COLUMNS: &str = "id, name, cpf, password, role, created_at, updated_at";

#[derive(Clone)]
pub struct PgUserRepository {
    pool: PgPool,
}

impl PgUserRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UserRepository for PgUserRepository {
    async fn insert(&self, user: &UserModel) -> Result<(), Error> {
        sqlx::query(
            r#"
            INSERT INTO users (id, name, cpf, password, role, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(user.id)
        .bind(&user.name)
        .bind(&user.cpf)
        .bind(&user.password)
        .bind(user.role.as_str())
        .bind(user.created_at)
        .bind(user.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<UserModel>, Error> {
        let row: Option<UserRow> =
            sqlx::query_as(&format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1"))
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;

        Ok(row.map(UserModel::try_from).transpose()?)
    }

    async fn find_by_cpf(&self, cpf: &str) -> Result<Option<UserModel>, Error> {
        let row: Option<UserRow> =
            sqlx::query_as(&format!("SELECT {USER_COLUMNS} FROM users WHERE cpf = $1"))
                .bind(cpf)
                .fetch_optional(&self.pool)
                .await?;

        Ok(row.map(UserModel::try_from).transpose()?)
    }

    async fn find_all(&self, role: Option<UserRole>) -> Result<Vec<UserModel>, Error> {
        let rows: Vec<UserRow> = sqlx::query_as(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE $1::text IS NULL OR role = $1 ORDER BY created_at"
        ))
        .bind(role.map(|it| it.as_str()))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(UserModel::try_from)
            .collect::<Result<_, _>>()?)
    }

    async fn update(&self, user: &UserModel) -> Result<bool, Error> {
        let result = sqlx::query(
            r#"
            UPDATE users
            SET name = $2, cpf = $3, password = $4, role = $5, updated_at = $6
            WHERE id = $1
            "#,
        )
        .bind(user.id)
        .bind(&user.name)
        .bind(&user.cpf)
        .bind(&user.password)
        .bind(user.role.as_str())
        .bind(user.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn delete(&self, id: Uuid) -> Result<bool, Error> {
        let result = sqlx::query("DELETE FROM users WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}

const RECIPIENT_COLUMNS: &str =
    "id, name, street, number, complement, city, state, zipcode, created_at, updated_at";

#[derive(Clone)]
pub struct PgRecipientRepository {
    pool: PgPool,
}

impl PgRecipientRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RecipientRepository for PgRecipientRepository {
    async fn insert(&self, recipient: &RecipientModel) -> Result<(), Error> {
        sqlx::query(
            r#"
            INSERT INTO recipients
                (id, name, street, number, complement, city, state, zipcode, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(recipient.id)
        .bind(&recipient.name)
        .bind(&recipient.street)
        .bind(recipient.number)
        .bind(&recipient.complement)
        .bind(&recipient.city)
        .bind(&recipient.state)
        .bind(&recipient.zipcode)
        .bind(recipient.created_at)
        .bind(recipient.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<RecipientModel>, Error> {
        Ok(sqlx::query_as(&format!(
            "SELECT {RECIPIENT_COLUMNS} FROM recipients WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?)
    }

    async fn find_all(&self) -> Result<Vec<RecipientModel>, Error> {
        Ok(sqlx::query_as(&format!(
            "SELECT {RECIPIENT_COLUMNS} FROM recipients ORDER BY created_at"
        ))
        .fetch_all(&self.pool)
        .await?)
    }

    async fn update(&self, recipient: &RecipientModel) -> Result<bool, Error> {
        let result = sqlx::query(
            r#"
            UPDATE recipients
            SET name = $2, street = $3, number = $4, complement = $5,
                city = $6, state = $7, zipcode = $8, updated_at = $9
            WHERE id = $1
            "#,
        )
        .bind(recipient.id)
        .bind(&recipient.name)
        .bind(&recipient.street)
        .bind(recipient.number)
        .bind(&recipient.complement)
        .bind(&recipient.city)
        .bind(&recipient.state)
        .bind(&recipient.zipcode)
        .bind(recipient.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn delete(&self, id: Uuid) -> Result<bool, Error> {
        let result = sqlx::query("DELETE FROM recipients WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}

#[derive(FromRow)]
struct OrderRow {
    id: Uuid,
    recipient_id: Uuid,
    deliveryman_id: Uuid,
    tracking_code: String,
    status: String,
    photo_url: Option<String>,
    withdrawn_at: Option<OffsetDateTime>,
    delivered_at: Option<OffsetDateTime>,
    created_at: OffsetDateTime,
    updated_at: OffsetDateTime,
}

impl TryFrom<OrderRow> for OrderModel {
    type Error = sqlx::Error;

    fn try_from(row: OrderRow) -> Result<Self, Self::Error> {
        let status =
            OrderStatus::from_str(&row.status).map_err(|_| decode_error("status", &row.status))?;

        Ok(Self {
            id: row.id,
            recipient_id: row.recipient_id,
            deliveryman_id: row.deliveryman_id,
            tracking_code: row.tracking_code,
            status,
            photo_url: row.photo_url,
            withdrawn_at: row.withdrawn_at,
            delivered_at: row.delivered_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

fn into_orders(rows: Vec<OrderRow>) -> Result<Vec<OrderModel>, Error> {
    Ok(rows
        .into_iter()
        .map(OrderModel::try_from)
        .collect::<Result<_, _>>()?)
}

/// A foreign key failing on an order write means the referenced row is gone,
/// unlike a failing delete on `users` or `recipients`.
fn order_write_error(err: sqlx::Error) -> Error {
    if let sqlx::Error::Database(db) = &err {
        if db.code().as_deref() == Some("23503") {
            match db.constraint() {
                Some("orders_recipient_id_fkey") => return Error::NotFound(Resource::Recipient),
                Some("orders_deliveryman_id_fkey") => {
                    return Error::NotFound(Resource::Deliveryman)
                }
                _ => {}
            }
        }
    }

    err.into()
}

const ORDER_COLUMNS: &str = "id, recipient_id, deliveryman_id, tracking_code, status, photo_url, \
                             withdrawn_at, delivered_at, created_at, updated_at";

#[derive(Clone)]
pub struct PgOrderRepository {
    pool: PgPool,
}

impl PgOrderRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl OrderRepository for PgOrderRepository {
    async fn insert(&self, order: &OrderModel) -> Result<(), Error> {
        sqlx::query(
            r#"
            INSERT INTO orders
                (id, recipient_id, deliveryman_id, tracking_code, status, photo_url,
                 withdrawn_at, delivered_at, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(order.id)
        .bind(order.recipient_id)
        .bind(order.deliveryman_id)
        .bind(&order.tracking_code)
        .bind(order.status.as_str())
        .bind(&order.photo_url)
        .bind(order.withdrawn_at)
        .bind(order.delivered_at)
        .bind(order.created_at)
        .bind(order.updated_at)
        .execute(&self.pool)
        .await
        .map_err(order_write_error)?;

        Ok(())
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<OrderModel>, Error> {
        let row: Option<OrderRow> =
            sqlx::query_as(&format!("SELECT {ORDER_COLUMNS} FROM orders WHERE id = $1"))
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;

        Ok(row.map(OrderModel::try_from).transpose()?)
    }

    async fn find_all(&self) -> Result<Vec<OrderModel>, Error> {
        let rows: Vec<OrderRow> = sqlx::query_as(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders ORDER BY created_at"
        ))
        .fetch_all(&self.pool)
        .await?;

        into_orders(rows)
    }

    async fn find_by_deliveryman(
        &self,
        deliveryman_id: Uuid,
        except: Option<OrderStatus>,
    ) -> Result<Vec<OrderModel>, Error> {
        let rows: Vec<OrderRow> = sqlx::query_as(&format!(
            r#"
            SELECT {ORDER_COLUMNS} FROM orders
            WHERE deliveryman_id = $1 AND ($2::text IS NULL OR status <> $2)
            ORDER BY created_at
            "#
        ))
        .bind(deliveryman_id)
        .bind(except.map(|it| it.as_str()))
        .fetch_all(&self.pool)
        .await?;

        into_orders(rows)
    }

    async fn exists_tracking_code(&self, tracking_code: &str) -> Result<bool, Error> {
        Ok(
            sqlx::query_scalar::<_, bool>("SELECT EXISTS(SELECT 1 FROM orders WHERE tracking_code = $1)")
                .bind(tracking_code)
                .fetch_one(&self.pool)
                .await?,
        )
    }

    async fn is_referenced(&self, reference: Reference) -> Result<bool, Error> {
        let (query, id) = match reference {
            Reference::Recipient(id) => (
                "SELECT EXISTS(SELECT 1 FROM orders WHERE recipient_id = $1)",
                id,
            ),
            Reference::Deliveryman(id) => (
                "SELECT EXISTS(SELECT 1 FROM orders WHERE deliveryman_id = $1)",
                id,
            ),
        };

        Ok(sqlx::query_scalar::<_, bool>(query)
            .bind(id)
            .fetch_one(&self.pool)
            .await?)
    }

    async fn update(
        &self,
        id: Uuid,
        patch: &OrderPatch,
        at: OffsetDateTime,
    ) -> Result<Option<OrderModel>, Error> {
        let row: Option<OrderRow> = sqlx::query_as(&format!(
            r#"
            UPDATE orders
            SET recipient_id = COALESCE($2, recipient_id),
                deliveryman_id = COALESCE($3, deliveryman_id),
                tracking_code = COALESCE($4, tracking_code),
                status = COALESCE($5, status),
                withdrawn_at = CASE WHEN $5 = 'WITHDRAWN' THEN COALESCE(withdrawn_at, $7)
                                    ELSE withdrawn_at END,
                delivered_at = CASE WHEN $5 = 'DELIVERED' THEN COALESCE(delivered_at, $7)
                                    ELSE delivered_at END,
                photo_url = COALESCE($6, photo_url),
                updated_at = $7
            WHERE id = $1
            RETURNING {ORDER_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(patch.recipient_id)
        .bind(patch.deliveryman_id)
        .bind(&patch.tracking_code)
        .bind(patch.status.map(|it| it.as_str()))
        .bind(&patch.photo_url)
        .bind(at)
        .fetch_optional(&self.pool)
        .await
        .map_err(order_write_error)?;

        Ok(row.map(OrderModel::try_from).transpose()?)
    }

    async fn delete(&self, id: Uuid) -> Result<bool, Error> {
        let result = sqlx::query("DELETE FROM orders WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn transition(
        &self,
        id: Uuid,
        guard: TransitionGuard,
        change: StatusChange,
    ) -> Result<Option<OrderModel>, Error> {
        let (owner, expected) = match guard {
            TransitionGuard::Any => (None, None),
            TransitionGuard::Owned {
                deliveryman_id,
                expected,
            } => (Some(deliveryman_id), Some(expected.as_str())),
        };

        let row: Option<OrderRow> = sqlx::query_as(&format!(
            r#"
            UPDATE orders
            SET status = $2,
                withdrawn_at = CASE WHEN $2 = 'WITHDRAWN' THEN COALESCE(withdrawn_at, $4)
                                    ELSE withdrawn_at END,
                delivered_at = CASE WHEN $2 = 'DELIVERED' THEN COALESCE(delivered_at, $4)
                                    ELSE delivered_at END,
                photo_url = COALESCE($3, photo_url),
                updated_at = $4
            WHERE id = $1
              AND ($5::uuid IS NULL OR (deliveryman_id = $5 AND status = $6))
            RETURNING {ORDER_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(change.status.as_str())
        .bind(change.photo_url)
        .bind(change.at)
        .bind(owner)
        .bind(expected)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(OrderModel::try_from).transpose()?)
    }
}
