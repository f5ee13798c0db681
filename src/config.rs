//! Process configuration read from environment variables.
//!
//! `.env` is loaded by `main` through `dotenvy` before [`Config::from_env`]
//! runs, so local development can keep secrets out of the shell.

use std::{
    net::{IpAddr, Ipv4Addr, SocketAddr},
    path::PathBuf,
};

use time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    Missing(&'static str),

    #[error("invalid value for {name}: {value:?}")]
    Invalid { name: &'static str, value: String },
}

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub jwt_secret: String,
    pub jwt_expires_in: Duration,
    pub upload_dir: PathBuf,
    pub public_dir: PathBuf,
    pub addr: SocketAddr,
    pub admin: Option<AdminSeed>,
}

/// Administrator created at startup when no user owns `cpf` yet.
#[derive(Debug, Clone)]
pub struct AdminSeed {
    pub name: String,
    pub cpf: String,
    pub password: String,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let required = |name: &'static str| {
            lookup(name)
                .filter(|it| !it.is_empty())
                .ok_or(ConfigError::Missing(name))
        };

        let database_url = required("DATABASE_URL")?;
        let jwt_secret = required("JWT_SECRET")?;

        let jwt_expires_in = match lookup("JWT_EXPIRES_IN_MINUTES") {
            Some(value) => value
                .parse::<i64>()
                .ok()
                .filter(|it| *it > 0)
                .map(Duration::minutes)
                .ok_or(ConfigError::Invalid {
                    name: "JWT_EXPIRES_IN_MINUTES",
                    value,
                })?,
            None => Duration::days(1),
        };

        let host = match lookup("HOST") {
            Some(value) => value.parse::<IpAddr>().map_err(|_| ConfigError::Invalid {
                name: "HOST",
                value,
            })?,
            None => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
        };
        let port = match lookup("PORT") {
            Some(value) => value.parse::<u16>().map_err(|_| ConfigError::Invalid {
                name: "PORT",
                value,
            })?,
            None => 3333,
        };
        let addr = SocketAddr::new(host, port);

        let admin = match (lookup("ADMIN_CPF"), lookup("ADMIN_PASSWORD")) {
            (Some(cpf), Some(password)) if !cpf.is_empty() && !password.is_empty() => {
                Some(AdminSeed {
                    name: lookup("ADMIN_NAME").unwrap_or_else(|| "Administrator".to_string()),
                    cpf,
                    password,
                })
            }
            _ => None,
        };

        Ok(Self {
            database_url,
            jwt_secret,
            jwt_expires_in,
            upload_dir: lookup("UPLOAD_DIR")
                .unwrap_or_else(|| "./uploads".to_string())
                .into(),
            public_dir: lookup("PUBLIC_DIR")
                .unwrap_or_else(|| "public".to_string())
                .into(),
            addr,
            admin,
        })
    }
}
