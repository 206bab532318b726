use std::{collections::HashMap, str::FromStr};

use axum::{
    extract::{FromRef, Path, Query, State},
    http::StatusCode,
    Json,
};
use bson::{oid::ObjectId, Document};
use serde::{Deserialize, Serialize};
use tap::TapFallible;
use validator::{Validate, ValidationErrors};

use crate::{
    app::AppState,
    error::Error,
    mongo_ext::{
        count_of, eq_filter, fill_counts, is_duplicate_key, map_duplicate, Collection, GroupCount,
        Identified,
    },
    util::{
        field_error, into_result, one_month_ago, parse_object_id, reject_null, require_present,
        validation_error, FormattedDateTime, InputDate, ObjectIdString, Patch, Populated,
        UpdateDocument, ValidJson,
    },
};

use super::{
    auth::{UserAccess, UserCollection, UserModel, UserSummary},
    member::{Member, MemberCollection, MemberModel, MembershipType},
    MessageResponse,
};

const RECEIPT_ATTEMPTS: usize = 3;

#[derive(Clone)]
pub struct PaymentCollection(pub Collection<PaymentModel>);

impl std::ops::Deref for PaymentCollection {
    type Target = Collection<PaymentModel>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    Cash,
    Card,
    BankTransfer,
    Online,
    Other,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    #[default]
    Pending,
    Completed,
    Failed,
    Refunded,
}

impl PaymentStatus {
    pub const NAMES: [&'static str; 4] = ["pending", "completed", "failed", "refunded"];
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PaymentType {
    Membership,
    PersonalTraining,
    EquipmentRental,
    Other,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(bound(deserialize = "D: Deserialize<'de>"))]
#[serde(rename_all = "camelCase")]
pub struct Period<D> {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_date: Option<D>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_date: Option<D>,
}

impl<D> Period<D> {
    pub fn map_date<E>(self, f: impl Fn(D) -> E) -> Period<E> {
        Period {
            start_date: self.start_date.map(&f),
            end_date: self.end_date.map(&f),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PaymentModel {
    #[serde(rename = "_id")]
    pub id: ObjectId,
    pub member_id: ObjectId,

    pub amount: f64,
    #[serde(default = "default_currency")]
    pub currency: String,
    pub payment_method: PaymentMethod,
    #[serde(default)]
    pub payment_status: PaymentStatus,
    pub payment_date: bson::DateTime,
    pub payment_type: PaymentType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub membership_type: Option<MembershipType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub period: Option<Period<bson::DateTime>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transaction_id: Option<String>,
    pub receipt_number: String,
    #[serde(default)]
    pub notes: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processed_by: Option<ObjectId>,

    pub created_at: bson::DateTime,
    pub updated_at: bson::DateTime,
}

fn default_currency() -> String {
    "USD".to_string()
}

impl Identified for PaymentModel {
    fn id(&self) -> ObjectId {
        self.id
    }
}

/// `GYM-<unix millis>-<count + 1>`.
pub fn receipt_number(now_millis: i64, count: u64) -> String {
    format!("GYM-{}-{}", now_millis, count + 1)
}

#[derive(Default)]
pub struct PaymentRelations {
    pub members: HashMap<ObjectId, MemberModel>,
    pub users: HashMap<ObjectId, UserModel>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Payment {
    pub id: ObjectIdString,
    pub member_id: Populated<Member>,
    pub amount: f64,
    pub currency: String,
    pub payment_method: PaymentMethod,
    pub payment_status: PaymentStatus,
    pub payment_date: FormattedDateTime,
    pub payment_type: PaymentType,
    pub membership_type: Option<MembershipType>,
    pub period: Option<Period<FormattedDateTime>>,
    pub transaction_id: Option<String>,
    pub receipt_number: String,
    pub notes: String,
    pub processed_by: Option<Populated<UserSummary>>,
    pub created_at: FormattedDateTime,
    pub updated_at: FormattedDateTime,
}

impl Payment {
    pub fn new(model: PaymentModel, relations: &PaymentRelations) -> Self {
        Self {
            id: model.id.into(),
            member_id: Populated::resolve(model.member_id, &relations.members, |it| {
                it.clone().into()
            }),
            amount: model.amount,
            currency: model.currency,
            payment_method: model.payment_method,
            payment_status: model.payment_status,
            payment_date: model.payment_date.into(),
            payment_type: model.payment_type,
            membership_type: model.membership_type,
            period: model.period.map(|it| it.map_date(FormattedDateTime::from)),
            transaction_id: model.transaction_id,
            receipt_number: model.receipt_number,
            notes: model.notes,
            processed_by: model
                .processed_by
                .map(|id| Populated::resolve(id, &relations.users, UserSummary::brief)),
            created_at: model.created_at.into(),
            updated_at: model.updated_at.into(),
        }
    }
}

impl From<PaymentModel> for Payment {
    fn from(value: PaymentModel) -> Self {
        Self::new(value, &PaymentRelations::default())
    }
}

/// Collections needed to expand the references of a payment.
#[derive(Clone)]
pub struct PaymentDeps {
    pub users: UserCollection,
    pub members: MemberCollection,
}

impl FromRef<AppState> for PaymentDeps {
    fn from_ref(input: &AppState) -> Self {
        Self {
            users: input.user_collection.clone(),
            members: input.member_collection.clone(),
        }
    }
}

impl PaymentDeps {
    pub async fn expand(&self, models: Vec<PaymentModel>) -> Result<Vec<Payment>, Error> {
        let relations = PaymentRelations {
            members: self
                .members
                .find_map_by_ids(models.iter().map(|it| it.member_id))
                .await?,
            users: self
                .users
                .find_map_by_ids(models.iter().filter_map(|it| it.processed_by))
                .await?,
        };

        Ok(models
            .into_iter()
            .map(|it| Payment::new(it, &relations))
            .collect())
    }

    pub async fn expand_one(&self, model: PaymentModel) -> Result<Payment, Error> {
        let id = model.id;

        self.expand(vec![model])
            .await?
            .pop()
            .ok_or(Error::NotFound("Payment"))
            .tap_err(|_| tracing::error!("payment {} vanished while expanding", id))
    }
}

#[derive(Deserialize, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub struct IndexQuery {
    pub status: Option<String>,
    pub payment_type: Option<String>,
    pub member_id: Option<String>,
}

pub async fn index(
    State(payments): State<PaymentCollection>,
    State(deps): State<PaymentDeps>,
    _user: UserAccess,
    Query(query): Query<IndexQuery>,
) -> Result<Json<Vec<Payment>>, Error> {
    let mut filter = eq_filter([
        ("paymentStatus", query.status),
        ("paymentType", query.payment_type),
    ]);
    if let Some(member_id) = query.member_id.filter(|it| !it.is_empty()) {
        match ObjectId::from_str(&member_id) {
            Ok(member_id) => {
                filter.insert("memberId", member_id);
            }
            // no member can have this id
            Err(_) => return Ok(Json(vec![])),
        }
    }

    let models = payments.find_all_sorted_desc(filter, "paymentDate").await?;

    Ok(Json(deps.expand(models).await?))
}

pub async fn show(
    State(payments): State<PaymentCollection>,
    State(deps): State<PaymentDeps>,
    _user: UserAccess,
    Path(payment_id): Path<String>,
) -> Result<Json<Payment>, Error> {
    let payment_id = parse_object_id(&payment_id, "Payment")?;

    let model = payments
        .get_one_by_id(payment_id)
        .await?
        .ok_or(Error::NotFound("Payment"))
        .tap_err(|_| tracing::debug!("tried accessing non existing payment"))?;

    Ok(Json(deps.expand_one(model).await?))
}

fn check_amount(errors: &mut ValidationErrors, amount: Option<&f64>) {
    if let Some(amount) = amount {
        if amount.is_nan() || *amount < 0.0 {
            errors.add("amount", validation_error("range", "amount must be at least 0"));
        }
    }
}

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct CreateRequest {
    pub member_id: Option<ObjectIdString>,
    pub amount: Option<f64>,
    pub payment_method: Option<PaymentMethod>,
    pub payment_type: Option<PaymentType>,
    pub membership_type: Option<MembershipType>,
    pub period: Option<Period<InputDate>>,
    #[serde(default)]
    pub notes: String,
}

impl Validate for CreateRequest {
    fn validate(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();

        require_present(&mut errors, "memberId", &self.member_id);
        if self.amount.is_none() {
            errors.add("amount", validation_error("required", "Amount is required"));
        }
        check_amount(&mut errors, self.amount.as_ref());
        require_present(&mut errors, "paymentMethod", &self.payment_method);
        require_present(&mut errors, "paymentType", &self.payment_type);

        into_result(errors)
    }
}

/// Inserts the payment under a fresh receipt number, retrying when the number is taken.
async fn insert_with_receipt(
    payments: &PaymentCollection,
    model: &mut PaymentModel,
) -> Result<(), Error> {
    for attempt in 1..=RECEIPT_ATTEMPTS {
        let count = payments.count_documents(bson::doc! {}, None).await?;
        model.receipt_number =
            receipt_number(bson::DateTime::now().timestamp_millis(), count);

        match payments.insert_one(&*model, None).await {
            Ok(_) => return Ok(()),
            Err(err) if is_duplicate_key(&err) => {
                tracing::debug!(
                    "receipt number {} taken on attempt {}",
                    model.receipt_number,
                    attempt
                );
            }
            Err(err) => return Err(err.into()),
        }
    }

    Err(Error::MustUniqueError("receiptNumber".to_string()))
}

/// Inserts the payment and links it to its member. When linking fails the payment is
/// removed again so no orphan is left behind.
#[tracing::instrument(skip_all, fields(user = %user.id))]
pub async fn create(
    State(payments): State<PaymentCollection>,
    State(deps): State<PaymentDeps>,
    user: UserAccess,
    ValidJson(request): ValidJson<CreateRequest>,
) -> Result<(StatusCode, Json<Payment>), Error> {
    let member_id: ObjectId = request
        .member_id
        .ok_or_else(|| field_error("memberId", "required", "memberId is required"))?
        .into();
    let amount = request
        .amount
        .ok_or_else(|| field_error("amount", "required", "Amount is required"))?;
    let payment_method = request
        .payment_method
        .ok_or_else(|| field_error("paymentMethod", "required", "paymentMethod is required"))?;
    let payment_type = request
        .payment_type
        .ok_or_else(|| field_error("paymentType", "required", "paymentType is required"))?;

    if !deps.members.exists_by_id(member_id).await? {
        return Err(Error::NotFound("Member"))
            .tap_err(|_| tracing::debug!("tried paying for non existing member"));
    }

    let now = bson::DateTime::now();
    let mut model = PaymentModel {
        id: ObjectId::new(),
        member_id,
        amount,
        currency: default_currency(),
        payment_method,
        payment_status: PaymentStatus::default(),
        payment_date: now,
        payment_type,
        membership_type: request.membership_type,
        period: request.period.map(|it| it.map_date(bson::DateTime::from)),
        transaction_id: None,
        receipt_number: String::new(),
        notes: request.notes,
        processed_by: Some(user.id),
        created_at: now,
        updated_at: now,
    };

    insert_with_receipt(&payments, &mut model).await?;
    tracing::debug!("created payment {} ({})", model.id, model.receipt_number);

    let linked = deps
        .members
        .update_one(
            bson::doc! { "_id": member_id },
            bson::doc! {
                "$addToSet": { "payments": model.id },
                "$set": { "updatedAt": now },
            },
            None,
        )
        .await;

    let failure = match linked {
        Ok(result) if result.matched_count > 0 => None,
        Ok(_) => Some(Error::NotFound("Member")),
        Err(err) => Some(err.into()),
    };
    if let Some(err) = failure {
        tracing::warn!("linking payment {} failed, removing it", model.id);
        if let Err(cleanup) = payments
            .delete_one(bson::doc! { "_id": model.id }, None)
            .await
        {
            tracing::error!("failed removing unlinked payment {}: {}", model.id, cleanup);
        }

        return Err(err);
    }

    Ok((StatusCode::CREATED, Json(deps.expand_one(model).await?)))
}

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct UpdateRequest {
    pub amount: Patch<f64>,
    pub payment_method: Patch<PaymentMethod>,
    pub payment_status: Patch<PaymentStatus>,
    pub payment_type: Patch<PaymentType>,
    pub membership_type: Patch<MembershipType>,
    pub period: Patch<Period<InputDate>>,
    pub transaction_id: Patch<String>,
    pub notes: Patch<String>,
}

impl Validate for UpdateRequest {
    fn validate(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();

        reject_null(&mut errors, "amount", &self.amount);
        check_amount(&mut errors, self.amount.value());
        reject_null(&mut errors, "paymentMethod", &self.payment_method);
        reject_null(&mut errors, "paymentStatus", &self.payment_status);
        reject_null(&mut errors, "paymentType", &self.payment_type);
        reject_null(&mut errors, "notes", &self.notes);

        into_result(errors)
    }
}

#[tracing::instrument(skip_all, fields(user = %user.id, id = %payment_id))]
pub async fn update(
    State(payments): State<PaymentCollection>,
    State(deps): State<PaymentDeps>,
    user: UserAccess,
    Path(payment_id): Path<String>,
    ValidJson(request): ValidJson<UpdateRequest>,
) -> Result<Json<Payment>, Error> {
    let payment_id = parse_object_id(&payment_id, "Payment")?;

    // an empty transaction id would collide in the sparse unique index
    let transaction_id = match request.transaction_id {
        Patch::Value(it) if it.trim().is_empty() => Patch::Null,
        other => other.map(|it| it.trim().to_string()),
    };

    let mut update = UpdateDocument::new();
    update
        .required("amount", request.amount)?
        .required("paymentMethod", request.payment_method)?
        .required("paymentStatus", request.payment_status)?
        .required("paymentType", request.payment_type)?
        .optional("membershipType", request.membership_type)?
        .optional("period", request.period)?
        .optional("transactionId", transaction_id)?
        .required("notes", request.notes)?;

    let model = payments
        .update_one_returning(payment_id, update.build(bson::DateTime::now()))
        .await
        .map_err(|err| match err {
            Error::DatabaseError(err) => {
                map_duplicate(err, || Error::MustUniqueError("transactionId".to_string()))
            }
            other => other,
        })?
        .ok_or(Error::NotFound("Payment"))
        .tap_err(|_| tracing::debug!("tried updating non existing payment"))?;

    Ok(Json(deps.expand_one(model).await?))
}

/// Unlinks the payment from its member, then deletes it. The link is restored when the
/// delete fails.
#[tracing::instrument(skip_all, fields(user = %user.id, id = %payment_id))]
pub async fn delete(
    State(payments): State<PaymentCollection>,
    State(members): State<MemberCollection>,
    user: UserAccess,
    Path(payment_id): Path<String>,
) -> Result<Json<MessageResponse>, Error> {
    let payment_id = parse_object_id(&payment_id, "Payment")?;

    let model = payments
        .get_one_by_id(payment_id)
        .await?
        .ok_or(Error::NotFound("Payment"))
        .tap_err(|_| tracing::debug!("tried deleting non existing payment"))?;

    let unlinked = members
        .update_one(
            bson::doc! { "_id": model.member_id },
            bson::doc! {
                "$pull": { "payments": payment_id },
                "$set": { "updatedAt": bson::DateTime::now() },
            },
            None,
        )
        .await?;

    if let Err(err) = payments
        .delete_one(bson::doc! { "_id": payment_id }, None)
        .await
    {
        if unlinked.modified_count > 0 {
            tracing::warn!("deleting payment {} failed, relinking it", payment_id);
            if let Err(relink) = members
                .update_one(
                    bson::doc! { "_id": model.member_id },
                    bson::doc! { "$addToSet": { "payments": payment_id } },
                    None,
                )
                .await
            {
                tracing::error!("failed relinking payment {}: {}", payment_id, relink);
            }
        }

        return Err(err.into());
    }

    Ok(Json(MessageResponse::new("Payment deleted successfully")))
}

/// `{_id, total}` row of a `$group` stage summing `amount`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct GroupTotal {
    #[serde(rename = "_id")]
    pub id: Option<String>,
    pub total: f64,
}

pub fn completed() -> Document {
    bson::doc! { "paymentStatus": "completed" }
}

/// Completed payments at or after `since`, or all of them.
pub fn completed_since(since: Option<bson::DateTime>) -> Document {
    let mut filter = completed();
    if let Some(since) = since {
        filter.insert("paymentDate", bson::doc! { "$gte": since });
    }

    filter
}

pub async fn revenue(payments: &PaymentCollection, filter: Document) -> Result<f64, Error> {
    let rows: Vec<GroupTotal> = payments
        .aggregate_into(vec![
            bson::doc! { "$match": filter },
            bson::doc! { "$group": { "_id": null, "total": { "$sum": "$amount" } } },
        ])
        .await?;

    Ok(rows.first().map(|it| it.total).unwrap_or(0.0))
}

pub async fn revenue_by(payments: &PaymentCollection, field: &str) -> Result<Vec<GroupTotal>, Error> {
    payments
        .aggregate_into(vec![
            bson::doc! { "$match": completed() },
            bson::doc! {
                "$group": { "_id": format!("${field}"), "total": { "$sum": "$amount" } }
            },
        ])
        .await
}

pub fn monthly_window_start() -> bson::DateTime {
    one_month_ago(time::OffsetDateTime::now_utc()).into()
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StatsResponse {
    pub total_revenue: f64,
    pub monthly_revenue: f64,
    pub pending_payments: i64,
    pub total_payments: i64,
    pub by_status: Vec<GroupCount>,
    pub by_type: Vec<GroupTotal>,
    pub by_method: Vec<GroupTotal>,
}

pub async fn stats(
    State(payments): State<PaymentCollection>,
    _user: UserAccess,
) -> Result<Json<StatsResponse>, Error> {
    let total_revenue = revenue(&payments, completed_since(None)).await?;
    let monthly_revenue = revenue(&payments, completed_since(Some(monthly_window_start()))).await?;

    let by_status = fill_counts(
        &PaymentStatus::NAMES,
        payments.count_by("paymentStatus", None).await?,
    );
    let total_payments = by_status.iter().map(|it| it.count).sum();
    let pending_payments = count_of(&by_status, "pending");

    let by_type = revenue_by(&payments, "paymentType").await?;
    let by_method = revenue_by(&payments, "paymentMethod").await?;

    Ok(Json(StatsResponse {
        total_revenue,
        monthly_revenue,
        pending_payments,
        total_payments,
        by_status,
        by_type,
        by_method,
    }))
}
