use argon2::Argon2;
use axum::{
    extract::{FromRef, FromRequestParts, State},
    headers::{authorization::Bearer, Authorization},
    http::{request::Parts, StatusCode},
    Json, RequestPartsExt, TypedHeader,
};
use bson::oid::ObjectId;
use serde::{Deserialize, Serialize};
use tap::TapFallible;
use validator::{Validate, ValidationErrors};

use crate::{
    error::{Error, UnauthorizedType},
    mongo_ext::{map_duplicate, Collection, Identified},
    util::{
        hash_password, into_result, not_blank, reject_null, validation_error, verify_password,
        FormattedDateTime, ObjectIdString, Patch, UpdateDocument, ValidJson,
    },
};

use super::token::{generate_access_token, verify_access_token, JwtState, TokenStatus};

#[derive(Clone)]
pub struct UserCollection(pub Collection<UserModel>);

impl std::ops::Deref for UserCollection {
    type Target = Collection<UserModel>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UserModel {
    #[serde(rename = "_id")]
    pub id: ObjectId,

    pub name: String,
    pub email: String,
    pub password: String,
    #[serde(default)]
    pub role: UserRole,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(default)]
    pub avatar: String,

    pub created_at: bson::DateTime,
    pub updated_at: bson::DateTime,
}

impl Identified for UserModel {
    fn id(&self) -> ObjectId {
        self.id
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum UserRole {
    Admin,
    Trainer,
    #[default]
    Member,
}

impl UserRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Admin => "admin",
            Self::Trainer => "trainer",
            Self::Member => "member",
        }
    }
}

/// Public view of a user; the password hash never leaves the server.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: ObjectIdString,
    pub name: String,
    pub email: String,
    pub role: UserRole,
    pub phone: Option<String>,
    pub avatar: String,
}

impl From<&UserModel> for User {
    fn from(value: &UserModel) -> Self {
        Self {
            id: value.id.into(),
            name: value.name.clone(),
            email: value.email.clone(),
            role: value.role,
            phone: value.phone.clone(),
            avatar: value.avatar.clone(),
        }
    }
}

/// Full profile returned by `/me`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    #[serde(flatten)]
    pub user: User,
    pub created_at: FormattedDateTime,
    pub updated_at: FormattedDateTime,
}

impl From<UserModel> for UserProfile {
    fn from(value: UserModel) -> Self {
        Self {
            user: (&value).into(),
            created_at: value.created_at.into(),
            updated_at: value.updated_at.into(),
        }
    }
}

/// Referenced user as embedded in other resources. `phone` and `avatar` are only
/// present where the contact details are expanded.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UserSummary {
    pub id: ObjectIdString,
    pub name: String,
    pub email: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
}

impl UserSummary {
    pub fn brief(user: &UserModel) -> Self {
        Self {
            id: user.id.into(),
            name: user.name.clone(),
            email: user.email.clone(),
            phone: None,
            avatar: None,
        }
    }

    pub fn contact(user: &UserModel) -> Self {
        Self {
            phone: user.phone.clone(),
            avatar: Some(user.avatar.clone()),
            ..Self::brief(user)
        }
    }
}

/// Identity attached to an authenticated request.
#[derive(Debug, Clone, Copy)]
pub struct UserAccess {
    pub id: ObjectId,
}

impl UserAccess {
    pub fn from_token(jwt_state: &JwtState, token: &str) -> Result<Self, Error> {
        match verify_access_token(jwt_state, token) {
            TokenStatus::Valid(claims) => Ok(Self {
                id: claims.user_id.0,
            }),
            TokenStatus::Expired => Err(Error::Unauthorized(UnauthorizedType::ExpiredToken)),
            TokenStatus::Invalid => Err(Error::Unauthorized(UnauthorizedType::InvalidToken)),
        }
    }
}

#[axum::async_trait]
impl<S> FromRequestParts<S> for UserAccess
where
    JwtState: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = Error;
    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let TypedHeader(Authorization(token)) = parts
            .extract::<TypedHeader<Authorization<Bearer>>>()
            .await
            .map_err(|_| Error::Unauthorized(UnauthorizedType::MissingToken))
            .tap_err(|_| tracing::debug!("request without bearer token"))?;

        let jwt = JwtState::from_ref(state);

        Self::from_token(&jwt, token.token())
    }
}

/// Absent fields deserialize as empty so validation reports every missing one by name.
#[derive(Validate, Serialize, Deserialize, Debug, Clone, Default)]
#[serde(default)]
pub struct RegisterRequest {
    #[validate(custom = "not_blank")]
    pub name: String,

    #[validate(email(message = "Please enter a valid email"))]
    pub email: String,

    #[validate(length(min = 6, message = "Password must be at least 6 characters"))]
    pub password: String,

    pub phone: Option<String>,

    pub role: Option<UserRole>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct AuthResponse {
    pub token: String,
    pub user: User,
}

pub struct CreateUserRequest {
    pub name: String,
    pub email: String,
    pub password: String,
    pub phone: Option<String>,
    pub role: UserRole,
}

pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

pub async fn create_user(
    users: UserCollection,
    argon: Argon2<'_>,
    request: CreateUserRequest,
) -> Result<UserModel, Error> {
    let email = normalize_email(&request.email);
    let count = users
        .count_documents(bson::doc! { "email": &email }, None)
        .await?;

    if count > 0 {
        return Err(Error::UserExists)
            .tap_err(|_| tracing::debug!("tried registering existing email"));
    }

    let now = bson::DateTime::now();
    let model = UserModel {
        id: ObjectId::new(),
        name: request.name.trim().to_string(),
        email,
        password: hash_password(&argon, &request.password)?,
        role: request.role,
        phone: request
            .phone
            .map(|it| it.trim().to_string())
            .filter(|it| !it.is_empty()),
        avatar: String::new(),
        created_at: now,
        updated_at: now,
    };
    users
        .insert_one(&model, None)
        .await
        .map_err(|err| map_duplicate(err, || Error::UserExists))?;

    Ok(model)
}

#[tracing::instrument(skip_all)]
pub async fn register(
    State(users): State<UserCollection>,
    State(argon): State<Argon2<'static>>,
    State(jwt_state): State<JwtState>,
    ValidJson(request): ValidJson<RegisterRequest>,
) -> Result<(StatusCode, Json<AuthResponse>), Error> {
    let user = create_user(
        users,
        argon,
        CreateUserRequest {
            name: request.name,
            email: request.email,
            password: request.password,
            phone: request.phone,
            role: request.role.unwrap_or_default(),
        },
    )
    .await?;

    tracing::debug!("registered user {}", user.id);
    let token = generate_access_token(&jwt_state, user.id)?;

    Ok((
        StatusCode::CREATED,
        Json(AuthResponse {
            token,
            user: (&user).into(),
        }),
    ))
}

#[derive(Validate, Serialize, Deserialize, Debug, Clone, Default)]
#[serde(default)]
pub struct LoginRequest {
    #[validate(email(message = "Please enter a valid email"))]
    pub email: String,

    #[validate(length(min = 1, message = "Password is required"))]
    pub password: String,
}

pub async fn login(
    State(users): State<UserCollection>,
    State(jwt_state): State<JwtState>,
    State(argon): State<Argon2<'static>>,
    ValidJson(request): ValidJson<LoginRequest>,
) -> Result<Json<AuthResponse>, Error> {
    let user = users
        .find_one(bson::doc! { "email": normalize_email(&request.email) }, None)
        .await?;

    let user = match user {
        Some(user) if verify_password(&argon, &request.password, &user.password) => user,
        _ => {
            return Err(Error::Unauthorized(UnauthorizedType::InvalidCredentials))
                .tap_err(|_| tracing::debug!("failed login attempt"))
        }
    };

    let token = generate_access_token(&jwt_state, user.id)?;

    Ok(Json(AuthResponse {
        token,
        user: (&user).into(),
    }))
}

pub async fn me(
    State(users): State<UserCollection>,
    user: UserAccess,
) -> Result<Json<UserProfile>, Error> {
    let model = users
        .get_one_by_id(user.id)
        .await?
        .ok_or(Error::NotFound("User"))?;

    Ok(Json(model.into()))
}

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(default)]
pub struct ProfileRequest {
    pub name: Patch<String>,
    pub phone: Patch<String>,
    pub avatar: Patch<String>,
}

impl Validate for ProfileRequest {
    fn validate(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();

        reject_null(&mut errors, "name", &self.name);
        reject_null(&mut errors, "avatar", &self.avatar);
        if let Some(name) = self.name.value() {
            if not_blank(name).is_err() {
                errors.add("name", validation_error("blank", "Name is required"));
            }
        }

        into_result(errors)
    }
}

#[tracing::instrument(skip_all, fields(user = %user.id))]
pub async fn update_profile(
    State(users): State<UserCollection>,
    user: UserAccess,
    ValidJson(request): ValidJson<ProfileRequest>,
) -> Result<Json<User>, Error> {
    let mut update = UpdateDocument::new();
    update
        .required("name", request.name.map(|it| it.trim().to_string()))?
        .optional("phone", request.phone)?
        .required("avatar", request.avatar)?;

    let model = users
        .update_one_returning(user.id, update.build(bson::DateTime::now()))
        .await?
        .ok_or(Error::NotFound("User"))
        .tap_err(|_| tracing::debug!("tried updating profile of missing user"))?;

    Ok(Json((&model).into()))
}
