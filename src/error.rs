use axum::{http::StatusCode, response::IntoResponse, Json};
use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("validation error: {0}")]
    ValidationError(#[from] validator::ValidationErrors),

    #[error("{0} not found")]
    NotFound(Resource),

    #[error("No resource found")]
    NoResource,

    #[error("{0}")]
    PasswordHashError(#[from] password_hash::Error),

    #[error("{0}")]
    DatabaseError(sqlx::Error),

    #[error("{0}")]
    JWTError(#[from] jsonwebtoken::errors::Error),

    #[error("{0}")]
    IoError(#[from] std::io::Error),

    #[error("{0} must be unique")]
    MustUniqueError(String),

    #[error("{0} is still referenced by orders")]
    StillReferenced(&'static str),

    #[error("{0}")]
    MalformedRequest(String),

    #[error("{0}")]
    Unauthorized(UnauthorizedType),

    #[error("You have no permission to access this resource")]
    Forbidden,

    #[error("This order is not yours.")]
    NotYourOrder,

    #[error("{0}")]
    InvalidState(InvalidStateType),

    #[error("{0}")]
    InvalidPhoto(PhotoRejection),

    #[error("{0}")]
    Multipart(#[from] axum::extract::multipart::MultipartError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum Resource {
    #[error("User")]
    User,

    #[error("Deliveryman")]
    Deliveryman,

    #[error("Recipient")]
    Recipient,

    #[error("Order")]
    Order,
}

#[derive(Debug, thiserror::Error)]
pub enum UnauthorizedType {
    #[error("User credentials do not match.")]
    WrongCpfOrPassword,

    #[error("Invalid access token")]
    InvalidAccessToken,
}

#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum InvalidStateType {
    #[error("Order status is not WAITING.")]
    NotWaiting,

    #[error("Order must be WITHDRAWN before delivered.")]
    NotWithdrawn,
}

#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum PhotoRejection {
    #[error("File is required")]
    Missing,

    #[error("Only JPEG and PNG images are allowed. Received: {0}")]
    UnsupportedType(String),

    #[error("File must not be larger than {max} bytes. Received: {size}")]
    TooLarge { size: usize, max: usize },
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorJson {
    #[serde(skip_serializing_if = "Option::is_none")]
    errors: Option<serde_json::Value>,
    r#type: String,
    message: String,
}

impl From<Error> for ErrorJson {
    fn from(err: Error) -> Self {
        let message = err.to_string();

        let r#type = err.to_string_variant();

        let errors = match err {
            Error::ValidationError(err) => serde_json::to_value(err).ok(),
            Error::NotFound(..)
            | Error::NoResource
            | Error::PasswordHashError(..)
            | Error::DatabaseError(..)
            | Error::JWTError(..)
            | Error::IoError(..)
            | Error::MustUniqueError(..)
            | Error::StillReferenced(..)
            | Error::MalformedRequest(..)
            | Error::Unauthorized(..)
            | Error::Forbidden
            | Error::NotYourOrder
            | Error::InvalidState(..)
            | Error::InvalidPhoto(..)
            | Error::Multipart(..) => None,
        };

        Self {
            errors,
            message,
            r#type,
        }
    }
}

impl Error {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Unauthorized(..) => StatusCode::UNAUTHORIZED,
            Self::ValidationError(..)
            | Self::MustUniqueError(..)
            | Self::StillReferenced(..)
            | Self::MalformedRequest(..)
            | Self::InvalidPhoto(..)
            | Self::Multipart(..) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::InvalidState(..) => StatusCode::BAD_REQUEST,
            Self::Forbidden | Self::NotYourOrder => StatusCode::FORBIDDEN,
            Self::NotFound(..) | Self::NoResource => StatusCode::NOT_FOUND,
            Self::PasswordHashError(..)
            | Self::DatabaseError(..)
            | Self::JWTError(..)
            | Self::IoError(..) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn to_string_variant(&self) -> String {
        macro_rules! match_var {
            ($id:ident !) => {
                Self::$id
            };
            ($id:ident (..)) => {
                Self::$id(..)
            };
        }

        macro_rules! variant {
            ($($name:ident $tt:tt),+) => {
                match self {
                    $(
                        match_var!($name $tt) => {
                            stringify!($name)
                       }
                    )+
                }
            };
        }

        variant! {
            NotFound(..),
            NoResource!,
            Forbidden!,
            NotYourOrder!,
            ValidationError(..),
            PasswordHashError(..),
            DatabaseError(..),
            JWTError(..),
            IoError(..),
            MustUniqueError(..),
            StillReferenced(..),
            MalformedRequest(..),
            Unauthorized(..),
            InvalidState(..),
            InvalidPhoto(..),
            Multipart(..)
        }
        .to_string()
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> axum::response::Response {
        tracing::error!("error: {:?}", self);
        let status = self.status();

        let error = ErrorJson::from(self);

        (status, Json(error)).into_response()
    }
}

impl From<sqlx::Error> for Error {
    fn from(err: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db) = &err {
            match db.code().as_deref() {
                Some("23505") => {
                    let field = match db.constraint() {
                        Some(it) if it.contains("cpf") => "cpf",
                        Some(it) if it.contains("tracking_code") => "tracking_code",
                        _ => "value",
                    };
                    return Self::MustUniqueError(field.to_string());
                }
                Some("23503") => {
                    let table = match db.constraint() {
                        Some("orders_recipient_id_fkey") => "recipient",
                        Some("orders_deliveryman_id_fkey") => "user",
                        _ => "record",
                    };
                    return Self::StillReferenced(table);
                }
                _ => {}
            }
        }

        Self::DatabaseError(err)
    }
}

impl From<axum::extract::rejection::PathRejection> for Error {
    fn from(_value: axum::extract::rejection::PathRejection) -> Self {
        Self::NoResource
    }
}

impl From<axum::extract::rejection::JsonRejection> for Error {
    fn from(value: axum::extract::rejection::JsonRejection) -> Self {
        Self::MalformedRequest(value.body_text())
    }
}

impl From<PhotoRejection> for Error {
    fn from(value: PhotoRejection) -> Self {
        Self::InvalidPhoto(value)
    }
}
