use sqlx::PgPool;

use crate::{
    api::v1::auth::{create_user, CreateUserRequest, UserModel, UserRole},
    app::AppState,
    config::AdminSeed,
    error::Error,
};

pub async fn run_migration(pool: &PgPool) -> Result<(), sqlx::migrate::MigrateError> {
    tracing::debug!("running migrations");

    sqlx::migrate!("./migrations").run(pool).await
}

impl AppState {
    /// Creates the configured administrator unless its cpf is already taken.
    pub async fn seed_admin(&self, seed: &AdminSeed) -> Result<Option<UserModel>, Error> {
        if self.user_collection.find_by_cpf(&seed.cpf).await?.is_some() {
            tracing::debug!("admin seed skipped, cpf already registered");
            return Ok(None);
        }

        let admin = create_user(
            &self.user_collection,
            &self.argon,
            CreateUserRequest {
                name: seed.name.clone(),
                cpf: seed.cpf.clone(),
                password: seed.password.clone(),
                role: UserRole::Admin,
            },
        )
        .await?;

        tracing::info!(id = %admin.id, "seeded admin user");
        Ok(Some(admin))
    }
}

#[cfg(test)]
mod tests {
    use crate::{
        api::v1::{auth::UserRole, tests::bootstrap},
        config::AdminSeed,
        util::verify_password,
    };

    #[tokio::test]
    async fn test_seed_admin() {
        let bootstrap = bootstrap().await;
        let seed = AdminSeed {
            name: "Administrator".to_string(),
            cpf: "00000000000".to_string(),
            password: "123456".to_string(),
        };

        let admin = bootstrap
            .app_state
            .seed_admin(&seed)
            .await
            .unwrap()
            .expect("admin should be seeded once");
        assert_eq!(admin.role, UserRole::Admin);
        assert!(verify_password(
            &bootstrap.app_state.argon,
            "123456",
            &admin.password
        ));

        let again = bootstrap.app_state.seed_admin(&seed).await.unwrap();
        assert!(again.is_none());
    }
}
