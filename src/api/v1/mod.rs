pub mod account;
pub mod auth;
pub mod order;
pub mod recipient;
pub mod token;

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::Arc;

    use argon2::Argon2;
    use axum::extract::State;
    use tempfile::TempDir;
    use time::OffsetDateTime;
    use uuid::Uuid;

    use crate::{app::AppState, store::OrderRepository, upload::PhotoStorage};

    use super::{
        auth::{UserAccess, UserCollection, UserModel, UserRole},
        order::{OrderCollection, OrderModel, OrderStatus},
        recipient::{RecipientCollection, RecipientModel},
        token::JwtState,
    };

    pub struct Bootstrap {
        pub user_model: UserModel,
        user_password: String,
        pub app_state: AppState,

        _upload_dir: Arc<TempDir>,
    }

    impl Bootstrap {
        pub fn user_access(&self) -> UserAccess {
            UserAccess::from_token(&self.app_state.jwt_state, &self.user_token()).unwrap()
        }

        pub fn user_token(&self) -> String {
            super::token::generate_access_token(&self.app_state.jwt_state, &self.user_model)
                .unwrap()
                .token
        }

        pub fn user_id(&self) -> Uuid {
            self.user_model.id
        }

        pub fn user_cpf(&self) -> String {
            self.user_model.cpf.clone()
        }

        pub fn user_password(&self) -> String {
            self.user_password.clone()
        }

        pub async fn derive(&self, cpf: &str, password: &str, user_role: UserRole) -> Bootstrap {
            let user = create_user(&self.app_state, cpf, password, user_role).await;

            Bootstrap {
                user_model: user,
                user_password: password.to_string(),
                app_state: self.app_state.clone(),

                _upload_dir: self._upload_dir.clone(),
            }
        }

        pub fn argon(&self) -> State<Argon2<'static>> {
            State(self.app_state.argon.clone())
        }

        pub fn jwt_state(&self) -> State<JwtState> {
            State(self.app_state.jwt_state.clone())
        }

        pub fn user_collection(&self) -> State<UserCollection> {
            State(self.app_state.user_collection.clone())
        }

        pub fn recipient_collection(&self) -> State<RecipientCollection> {
            State(self.app_state.recipient_collection.clone())
        }

        pub fn order_collection(&self) -> State<OrderCollection> {
            State(self.app_state.order_collection.clone())
        }

        pub async fn recipient(&self) -> RecipientModel {
            let now = OffsetDateTime::now_utc();
            let model = RecipientModel {
                id: Uuid::new_v4(),
                name: "Maria".to_string(),
                street: "Rua das Flores".to_string(),
                number: 42,
                complement: None,
                city: "Recife".to_string(),
                state: "PE".to_string(),
                zipcode: "50000-000".to_string(),
                created_at: now,
                updated_at: now,
            };

            self.app_state
                .recipient_collection
                .insert(&model)
                .await
                .unwrap();

            model
        }

        /// Fresh WAITING order for a new recipient.
        pub async fn order_for(&self, deliveryman_id: Uuid) -> OrderModel {
            let recipient = self.recipient().await;

            let now = OffsetDateTime::now_utc();
            let model = OrderModel {
                id: Uuid::new_v4(),
                recipient_id: recipient.id,
                deliveryman_id,
                tracking_code: super::order::generate_tracking_code(),
                status: OrderStatus::Waiting,
                photo_url: None,
                withdrawn_at: None,
                delivered_at: None,
                created_at: now,
                updated_at: now,
            };

            self.app_state
                .order_collection
                .insert(&model)
                .await
                .unwrap();

            model
        }

        /// Order assigned to a newly created deliveryman.
        pub async fn order(&self) -> OrderModel {
            let cpf = format!("9{:010}", rand::random::<u32>());
            let deliveryman = self.derive(&cpf, "password", UserRole::Deliveryman).await;

            self.order_for(deliveryman.user_id()).await
        }
    }

    pub async fn create_user(app: &AppState, cpf: &str, password: &str, role: UserRole) -> UserModel {
        super::auth::create_user(
            &app.user_collection,
            &app.argon,
            super::auth::CreateUserRequest {
                name: "name".to_string(),
                cpf: cpf.to_string(),
                password: password.to_string(),
                role,
            },
        )
        .await
        .unwrap()
    }

    /// Cheap hashing parameters, the defaults make every test crawl.
    pub fn test_argon() -> Argon2<'static> {
        Argon2::new(
            argon2::Algorithm::Argon2id,
            argon2::Version::V0x13,
            argon2::Params::new(1024, 1, 1, None).unwrap(),
        )
    }

    pub async fn bootstrap() -> Bootstrap {
        let upload_dir = tempfile::tempdir().unwrap();

        let app_state = AppState::in_memory(
            test_argon(),
            JwtState::new(b"bootstrap-secret", time::Duration::minutes(10)),
            PhotoStorage::new(upload_dir.path()),
        );

        let password = "password";
        let user = create_user(&app_state, "11111111111", password, UserRole::Admin).await;

        Bootstrap {
            app_state,
            user_model: user,
            user_password: password.to_string(),

            _upload_dir: Arc::new(upload_dir),
        }
    }
}
