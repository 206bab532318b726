use axum::{
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("validation error: {0}")]
    ValidationError(#[from] validator::ValidationErrors),

    #[error("{0}")]
    MalformedBody(String),

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("User already exists")]
    UserExists,

    #[error("Member already exists for this user")]
    MemberExists,

    #[error("{0} must be unique")]
    MustUniqueError(String),

    #[error("{0}")]
    Unauthorized(UnauthorizedType),

    #[error("{0}")]
    PasswordHashError(#[from] password_hash::Error),

    #[error("{0}")]
    DatabaseError(#[from] mongodb::error::Error),

    #[error("{0}")]
    JWTError(#[from] jsonwebtoken::errors::Error),

    #[error("{0}")]
    BSONSerError(#[from] bson::ser::Error),

    #[error("{0}")]
    BSONDeError(#[from] bson::de::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum UnauthorizedType {
    #[error("No token, authorization denied")]
    MissingToken,

    #[error("Token has expired")]
    ExpiredToken,

    #[error("Token is not valid")]
    InvalidToken,

    #[error("Invalid credentials")]
    InvalidCredentials,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorJson {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub errors: Option<serde_json::Value>,
    pub r#type: String,
    pub message: String,
}

impl From<Error> for ErrorJson {
    fn from(err: Error) -> Self {
        let message = err.to_string();

        let r#type = err.to_string_variant();

        let errors = match err {
            Error::ValidationError(err) => serde_json::to_value(err).ok(),
            Error::MalformedBody(..)
            | Error::NotFound(..)
            | Error::UserExists
            | Error::MemberExists
            | Error::MustUniqueError(..)
            | Error::Unauthorized(..)
            | Error::PasswordHashError(..)
            | Error::DatabaseError(..)
            | Error::JWTError(..)
            | Error::BSONSerError(..)
            | Error::BSONDeError(..) => None,
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
            | Self::MalformedBody(..)
            | Self::UserExists
            | Self::MemberExists
            | Self::MustUniqueError(..) => StatusCode::BAD_REQUEST,
            Self::NotFound(..) => StatusCode::NOT_FOUND,
            Self::PasswordHashError(..)
            | Self::DatabaseError(..)
            | Self::JWTError(..)
            | Self::BSONSerError(..)
            | Self::BSONDeError(..) => StatusCode::INTERNAL_SERVER_ERROR,
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
            ValidationError(..),
            MalformedBody(..),
            NotFound(..),
            UserExists!,
            MemberExists!,
            MustUniqueError(..),
            Unauthorized(..),
            PasswordHashError(..),
            DatabaseError(..),
            JWTError(..),
            BSONSerError(..),
            BSONDeError(..)
        }
        .to_string()
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> axum::response::Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!("error: {:?}", self);
        } else {
            tracing::debug!("rejected: {}", self);
        }

        let error = ErrorJson::from(self);

        (status, Json(error)).into_response()
    }
}

impl From<JsonRejection> for Error {
    fn from(value: JsonRejection) -> Self {
        Self::MalformedBody(value.body_text())
    }
}
