use std::sync::Arc;

use axum::extract::FromRef;
use sqlx::PgPool;

use crate::{
    api::v1::{
        auth::UserCollection, order::OrderCollection, recipient::RecipientCollection,
        token::JwtState,
    },
    config::Config,
    store::{
        memory::MemoryStore,
        postgres::{PgOrderRepository, PgRecipientRepository, PgUserRepository},
    },
    upload::PhotoStorage,
};

#[derive(FromRef, Clone)]
pub struct AppState {
    pub argon: argon2::Argon2<'static>,
    pub jwt_state: JwtState,
    pub photo_storage: PhotoStorage,

    pub user_collection: UserCollection,
    pub recipient_collection: RecipientCollection,
    pub order_collection: OrderCollection,
}

impl AppState {
    pub fn new(pool: PgPool, config: &Config) -> Self {
        Self {
            argon: argon2::Argon2::default(),
            jwt_state: JwtState::new(config.jwt_secret.as_bytes(), config.jwt_expires_in),
            photo_storage: PhotoStorage::new(&config.upload_dir),

            user_collection: UserCollection(Arc::new(PgUserRepository::new(pool.clone()))),
            recipient_collection: RecipientCollection(Arc::new(PgRecipientRepository::new(
                pool.clone(),
            ))),
            order_collection: OrderCollection(Arc::new(PgOrderRepository::new(pool))),
        }
    }

    /// State backed by a single [`MemoryStore`], used by the test suite.
    pub fn in_memory(
        argon: argon2::Argon2<'static>,
        jwt_state: JwtState,
        photo_storage: PhotoStorage,
    ) -> Self {
        let store = MemoryStore::new();

        Self {
            argon,
            jwt_state,
            photo_storage,

            user_collection: UserCollection(Arc::new(store.clone())),
            recipient_collection: RecipientCollection(Arc::new(store.clone())),
            order_collection: OrderCollection(Arc::new(store)),
        }
    }
}
