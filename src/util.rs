use std::{borrow::Cow, collections::HashMap, str::FromStr};

use argon2::{Argon2, PasswordHash, PasswordHasher, PasswordVerifier};
use axum::{
    async_trait,
    body::HttpBody,
    extract::{FromRequest, Json},
    http::Request,
    BoxError,
};
use bson::oid::ObjectId;
use serde::{de::DeserializeOwned, Deserialize, Deserializer, Serialize};
use time::{format_description::well_known::Rfc3339, macros::format_description, OffsetDateTime};
use validator::{Validate, ValidationError, ValidationErrors};

use crate::error::Error;

#[derive(Serialize, Deserialize, Debug, Clone, Copy)]
pub struct ObjectIdString(#[serde(with = "object_id_string")] pub ObjectId);

impl From<ObjectId> for ObjectIdString {
    fn from(value: ObjectId) -> Self {
        Self(value)
    }
}

impl From<ObjectIdString> for ObjectId {
    fn from(value: ObjectIdString) -> Self {
        value.0
    }
}

impl std::ops::Deref for ObjectIdString {
    type Target = ObjectId;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl std::cmp::PartialEq for ObjectIdString {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}
impl std::cmp::Eq for ObjectIdString {}

impl std::cmp::PartialEq<ObjectId> for ObjectIdString {
    fn eq(&self, other: &ObjectId) -> bool {
        self.0 == *other
    }
}

impl From<ObjectIdString> for bson::Bson {
    fn from(value: ObjectIdString) -> Self {
        value.0.into()
    }
}

mod object_id_string {
    use bson::oid::ObjectId;
    use serde::{self, Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(id: &ObjectId, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&id.to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<ObjectId, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Parses a path segment, treating anything that is not an ObjectId as a missing resource.
pub fn parse_object_id(id: &str, resource: &'static str) -> Result<ObjectId, Error> {
    ObjectId::from_str(id).map_err(|_| Error::NotFound(resource))
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct FormattedDateTime(#[serde(with = "time::serde::rfc3339")] pub OffsetDateTime);

impl From<bson::DateTime> for FormattedDateTime {
    fn from(value: bson::DateTime) -> Self {
        Self(value.into())
    }
}

impl From<OffsetDateTime> for FormattedDateTime {
    fn from(value: OffsetDateTime) -> Self {
        Self(value)
    }
}

/// Parses either an RFC 3339 timestamp or a bare `YYYY-MM-DD` date (midnight UTC).
pub fn parse_date(value: &str) -> Option<OffsetDateTime> {
    if let Ok(it) = OffsetDateTime::parse(value, &Rfc3339) {
        return Some(it);
    }

    time::Date::parse(value, format_description!("[year]-[month]-[day]"))
        .ok()
        .map(|date| date.midnight().assume_utc())
}

/// Same wall-clock time one calendar month earlier. The day is clamped to the length of
/// the previous month, so March 31 maps to the last day of February.
pub fn one_month_ago(now: OffsetDateTime) -> OffsetDateTime {
    let (year, month) = match now.month() {
        time::Month::January => (now.year() - 1, time::Month::December),
        month => (now.year(), month.previous()),
    };
    let day = now.day().min(time::util::days_in_year_month(year, month));

    time::Date::from_calendar_date(year, month, day)
        .map(|date| now.replace_date(date))
        .unwrap_or_else(|_| now - time::Duration::days(30))
}

/// Date accepted in request bodies, see [`parse_date`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InputDate(pub OffsetDateTime);

impl<'de> Deserialize<'de> for InputDate {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;

        parse_date(&raw)
            .map(Self)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid date `{raw}`")))
    }
}

impl Serialize for InputDate {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        bson::DateTime::from(*self).serialize(serializer)
    }
}

impl From<InputDate> for bson::DateTime {
    fn from(value: InputDate) -> Self {
        value.0.into()
    }
}

/// Parses an optional query-string date, rejecting unparseable input with a field error.
pub fn parse_query_date(
    field: &'static str,
    value: Option<&str>,
) -> Result<Option<bson::DateTime>, Error> {
    match value.filter(|it| !it.is_empty()) {
        None => Ok(None),
        Some(raw) => parse_date(raw)
            .map(|it| Some(it.into()))
            .ok_or_else(|| field_error(field, "date", "must be an RFC 3339 timestamp or YYYY-MM-DD")),
    }
}

/// A field of a partial update.
///
/// `Missing` leaves the stored value alone, `Null` clears it and `Value` replaces it,
/// regardless of whether the value is falsy.
#[derive(Debug, Clone, PartialEq)]
pub enum Patch<T> {
    Missing,
    Null,
    Value(T),
}

impl<T> Default for Patch<T> {
    fn default() -> Self {
        Self::Missing
    }
}

impl<T> Patch<T> {
    pub fn value(&self) -> Option<&T> {
        match self {
            Self::Value(it) => Some(it),
            Self::Missing | Self::Null => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    pub fn is_missing(&self) -> bool {
        matches!(self, Self::Missing)
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Patch<U> {
        match self {
            Self::Missing => Patch::Missing,
            Self::Null => Patch::Null,
            Self::Value(it) => Patch::Value(f(it)),
        }
    }
}

impl<'de, T> Deserialize<'de> for Patch<T>
where
    T: Deserialize<'de>,
{
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        Option::<T>::deserialize(deserializer).map(|it| match it {
            Some(it) => Self::Value(it),
            None => Self::Null,
        })
    }
}

/// Collects `$set` / `$unset` operations from [`Patch`] fields. `updatedAt` is always touched.
#[derive(Debug, Default)]
pub struct UpdateDocument {
    set: bson::Document,
    unset: bson::Document,
}

impl UpdateDocument {
    pub fn new() -> Self {
        Self::default()
    }

    /// Field that must always hold a value. `Null` is rejected before this is reached.
    pub fn required<T: Serialize>(&mut self, key: &str, patch: Patch<T>) -> Result<&mut Self, Error> {
        if let Patch::Value(value) = patch {
            self.set.insert(key, bson::to_bson(&value)?);
        }

        Ok(self)
    }

    pub fn optional<T: Serialize>(&mut self, key: &str, patch: Patch<T>) -> Result<&mut Self, Error> {
        match patch {
            Patch::Missing => {}
            Patch::Null => {
                self.unset.insert(key, "");
            }
            Patch::Value(value) => {
                self.set.insert(key, bson::to_bson(&value)?);
            }
        }

        Ok(self)
    }

    pub fn build(self, now: bson::DateTime) -> bson::Document {
        let mut set = self.set;
        set.insert("updatedAt", now);

        let mut update = bson::doc! { "$set": set };
        if !self.unset.is_empty() {
            update.insert("$unset", self.unset);
        }

        update
    }
}

/// Records an error when a required field is explicitly set to `null`.
pub fn reject_null<T>(errors: &mut ValidationErrors, field: &'static str, patch: &Patch<T>) {
    if patch.is_null() {
        errors.add(field, validation_error("required", format!("{field} cannot be null")));
    }
}

/// Records an error when a field required on creation is absent or `null`.
pub fn require_present<T>(errors: &mut ValidationErrors, field: &'static str, value: &Option<T>) {
    if value.is_none() {
        errors.add(field, validation_error("required", format!("{field} is required")));
    }
}

pub fn validation_error(code: &'static str, message: impl Into<Cow<'static, str>>) -> ValidationError {
    ValidationError {
        code: Cow::Borrowed(code),
        message: Some(message.into()),
        params: HashMap::new(),
    }
}

pub fn field_error(field: &'static str, code: &'static str, message: &'static str) -> Error {
    let mut errors = ValidationErrors::new();
    errors.add(field, validation_error(code, message));
    Error::ValidationError(errors)
}

pub fn into_result(errors: ValidationErrors) -> Result<(), ValidationErrors> {
    if errors.errors().is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

pub fn not_blank(value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        return Err(validation_error("blank", "must not be blank"));
    }

    Ok(())
}

/// JSON body that is deserialized and then validated; both failures are reported as 400.
#[derive(Debug)]
pub struct ValidJson<T>(pub T);

#[async_trait]
impl<T, S, B> FromRequest<S, B> for ValidJson<T>
where
    T: DeserializeOwned + Validate,
    S: Send + Sync,
    B: HttpBody + Send + 'static,
    B::Data: Send,
    B::Error: Into<BoxError>,
{
    type Rejection = Error;

    async fn from_request(req: Request<B>, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state).await?;
        value.validate()?;

        Ok(Self(value))
    }
}

/// Reference that is replaced by the referenced document when it can be loaded.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(untagged)]
pub enum Populated<T> {
    Id(ObjectIdString),
    Doc(T),
}

impl<T> Populated<T> {
    pub fn resolve<M>(id: ObjectId, map: &HashMap<ObjectId, M>, f: impl FnOnce(&M) -> T) -> Self {
        match map.get(&id) {
            Some(it) => Self::Doc(f(it)),
            None => Self::Id(id.into()),
        }
    }

    pub fn doc(&self) -> Option<&T> {
        match self {
            Self::Doc(it) => Some(it),
            Self::Id(..) => None,
        }
    }
}

pub fn verify_password(argon: &Argon2, password: &str, hashed: &str) -> bool {
    let hashed = match PasswordHash::new(hashed) {
        Ok(hashed) => hashed,
        Err(_) => return false,
    };

    argon.verify_password(password.as_bytes(), &hashed).is_ok()
}

pub fn hash_password(argon: &Argon2, password: &str) -> Result<String, Error> {
    let salt = password_hash::SaltString::generate(&mut password_hash::rand_core::OsRng);

    argon
        .hash_password(password.as_bytes(), &salt)
        .map(|it| it.to_string())
        .map_err(Into::into)
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use serde::Deserialize;
    use time::macros::datetime;

    use super::*;

    #[derive(Deserialize)]
    struct PatchBody {
        #[serde(default)]
        notes: Patch<String>,
        #[serde(default)]
        amount: Patch<f64>,
        #[serde(default)]
        public: Patch<bool>,
    }

    #[test]
    fn test_patch_distinguishes_missing_null_and_falsy_values() {
        let body: PatchBody =
            serde_json::from_str(r#"{ "notes": "", "amount": 0, "public": false }"#).unwrap();
        assert_eq!(body.notes, Patch::Value(String::new()));
        assert_eq!(body.amount, Patch::Value(0.0));
        assert_eq!(body.public, Patch::Value(false));

        let body: PatchBody = serde_json::from_str(r#"{ "notes": null }"#).unwrap();
        assert!(body.notes.is_null());
        assert!(body.amount.is_missing());
        assert!(body.public.is_missing());
    }

    #[test]
    fn test_update_document_sets_unsets_and_touches() {
        let now = bson::DateTime::now();
        let mut update = UpdateDocument::new();
        update
            .required("amount", Patch::Value(0.0))
            .unwrap()
            .required("notes", Patch::<String>::Missing)
            .unwrap()
            .optional("transactionId", Patch::<String>::Null)
            .unwrap();

        let doc = update.build(now);
        let set = doc.get_document("$set").unwrap();
        assert_eq!(set.get_f64("amount").unwrap(), 0.0);
        assert!(set.get("notes").is_none());
        assert_eq!(set.get_datetime("updatedAt").unwrap(), &now);
        assert!(doc.get_document("$unset").unwrap().contains_key("transactionId"));
    }

    #[test]
    fn test_update_document_without_unset() {
        let doc = UpdateDocument::new().build(bson::DateTime::now());
        assert!(doc.get("$unset").is_none());
    }

    #[test]
    fn test_parse_date() {
        assert_eq!(parse_date("2099-01-01"), Some(datetime!(2099-01-01 0:00 UTC)));
        assert_eq!(
            parse_date("2024-03-05T10:30:00Z"),
            Some(datetime!(2024-03-05 10:30 UTC))
        );
        assert_eq!(parse_date("yesterday"), None);
    }

    #[test]
    fn test_one_month_ago() {
        assert_eq!(
            one_month_ago(datetime!(2024-05-15 10:00 UTC)),
            datetime!(2024-04-15 10:00 UTC)
        );
        assert_eq!(
            one_month_ago(datetime!(2024-01-10 0:00 UTC)),
            datetime!(2023-12-10 0:00 UTC)
        );
        assert_eq!(
            one_month_ago(datetime!(2024-03-31 8:30 UTC)),
            datetime!(2024-02-29 8:30 UTC)
        );
        assert_eq!(
            one_month_ago(datetime!(2023-03-31 8:30 UTC)),
            datetime!(2023-02-28 8:30 UTC)
        );
    }

    #[test]
    fn test_parse_query_date_rejects_garbage() {
        assert_matches!(parse_query_date("startDate", None), Ok(None));
        assert_matches!(parse_query_date("startDate", Some("")), Ok(None));
        assert_matches!(parse_query_date("startDate", Some("2024-01-01")), Ok(Some(_)));
        assert_matches!(
            parse_query_date("startDate", Some("01/02/2024")),
            Err(Error::ValidationError(_))
        );
    }

    #[test]
    fn test_populated_serializes_as_id_or_document() {
        let id = ObjectId::new();
        let mut map = HashMap::new();

        let missing: Populated<String> = Populated::resolve(id, &map, |it: &String| it.clone());
        assert_eq!(serde_json::to_value(&missing).unwrap(), id.to_string());

        map.insert(id, "found".to_string());
        let found: Populated<String> = Populated::resolve(id, &map, |it| it.clone());
        assert_eq!(found.doc().map(String::as_str), Some("found"));
    }

    #[test]
    fn test_password_roundtrip() {
        let argon = Argon2::default();
        let hashed = hash_password(&argon, "secret123").unwrap();

        assert!(verify_password(&argon, "secret123", &hashed));
        assert!(!verify_password(&argon, "secret124", &hashed));
        assert!(!verify_password(&argon, "secret123", "not-a-hash"));
    }
}
