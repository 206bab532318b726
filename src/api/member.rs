use std::collections::HashMap;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use bson::oid::ObjectId;
use serde::{Deserialize, Serialize};
use tap::TapFallible;
use validator::{Validate, ValidationErrors};

use crate::{
    error::Error,
    mongo_ext::{eq_filter, map_duplicate, Collection, Identified},
    util::{
        field_error, into_result, parse_object_id, reject_null, require_present,
        FormattedDateTime, InputDate, ObjectIdString, Patch, Populated, UpdateDocument, ValidJson,
    },
};

use super::{
    auth::{UserAccess, UserCollection, UserModel, UserSummary},
    payment::{Payment, PaymentCollection, PaymentModel},
    workout::{Workout, WorkoutCollection, WorkoutModel},
    MessageResponse,
};

#[derive(Clone)]
pub struct MemberCollection(pub Collection<MemberModel>);

impl std::ops::Deref for MemberCollection {
    type Target = Collection<MemberModel>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MembershipType {
    #[default]
    Basic,
    Standard,
    Premium,
    Vip,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MembershipStatus {
    #[default]
    Active,
    Expired,
    Suspended,
    Pending,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Gender {
    Male,
    Female,
    Other,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct EmergencyContact {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relationship: Option<String>,
}

/// `D` is the date representation: `bson::DateTime` when stored, [`InputDate`] in
/// requests and [`FormattedDateTime`] in responses.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(bound(deserialize = "D: Deserialize<'de>"))]
#[serde(rename_all = "camelCase")]
pub struct PersonalDetails<D> {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_of_birth: Option<D>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gender: Option<Gender>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub emergency_contact: Option<EmergencyContact>,
}

impl<D> PersonalDetails<D> {
    pub fn map_date<E>(self, f: impl FnOnce(D) -> E) -> PersonalDetails<E> {
        PersonalDetails {
            date_of_birth: self.date_of_birth.map(f),
            gender: self.gender,
            address: self.address,
            emergency_contact: self.emergency_contact,
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Attendance<D> {
    pub date: D,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub check_in: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub check_out: Option<String>,
}

impl<D> Attendance<D> {
    pub fn map_date<E>(self, f: impl FnOnce(D) -> E) -> Attendance<E> {
        Attendance {
            date: f(self.date),
            check_in: self.check_in,
            check_out: self.check_out,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MemberModel {
    #[serde(rename = "_id")]
    pub id: ObjectId,
    pub user_id: ObjectId,

    #[serde(default)]
    pub membership_type: MembershipType,
    pub membership_start_date: bson::DateTime,
    pub membership_end_date: bson::DateTime,
    #[serde(default)]
    pub membership_status: MembershipStatus,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub personal_details: Option<PersonalDetails<bson::DateTime>>,
    #[serde(default)]
    pub fitness_goals: Vec<String>,
    #[serde(default)]
    pub health_conditions: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assigned_trainer: Option<ObjectId>,

    #[serde(default)]
    pub attendance: Vec<Attendance<bson::DateTime>>,
    #[serde(default)]
    pub payments: Vec<ObjectId>,
    #[serde(default)]
    pub workouts: Vec<ObjectId>,
    #[serde(default)]
    pub notes: String,

    pub created_at: bson::DateTime,
    pub updated_at: bson::DateTime,
}

impl Identified for MemberModel {
    fn id(&self) -> ObjectId {
        self.id
    }
}

impl MemberModel {
    /// A membership is active while its status is active and its end date is strictly
    /// after `now`.
    pub fn is_active_at(&self, now: bson::DateTime) -> bool {
        self.membership_status == MembershipStatus::Active && self.membership_end_date > now
    }

    fn user_ids(&self) -> impl Iterator<Item = ObjectId> {
        std::iter::once(self.user_id).chain(self.assigned_trainer)
    }
}

/// Documents referenced by members, loaded in batches before building responses.
#[derive(Default)]
pub struct MemberRelations {
    pub users: HashMap<ObjectId, UserModel>,
    pub payments: HashMap<ObjectId, PaymentModel>,
    pub workouts: HashMap<ObjectId, WorkoutModel>,
}

impl MemberRelations {
    pub async fn users(users: &UserCollection, members: &[MemberModel]) -> Result<Self, Error> {
        Ok(Self {
            users: users
                .find_map_by_ids(members.iter().flat_map(MemberModel::user_ids))
                .await?,
            ..Default::default()
        })
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Member {
    pub id: ObjectIdString,
    pub user_id: Populated<UserSummary>,

    pub membership_type: MembershipType,
    pub membership_start_date: FormattedDateTime,
    pub membership_end_date: FormattedDateTime,
    pub membership_status: MembershipStatus,
    pub is_active: bool,

    pub personal_details: Option<PersonalDetails<FormattedDateTime>>,
    pub fitness_goals: Vec<String>,
    pub health_conditions: String,
    pub assigned_trainer: Option<Populated<UserSummary>>,

    pub attendance: Vec<Attendance<FormattedDateTime>>,
    pub payments: Vec<Populated<Payment>>,
    pub workouts: Vec<Populated<Workout>>,
    pub notes: String,

    pub created_at: FormattedDateTime,
    pub updated_at: FormattedDateTime,
}

impl Member {
    pub fn new(model: MemberModel, relations: &MemberRelations) -> Self {
        let is_active = model.is_active_at(bson::DateTime::now());

        Self {
            id: model.id.into(),
            user_id: Populated::resolve(model.user_id, &relations.users, UserSummary::contact),
            membership_type: model.membership_type,
            membership_start_date: model.membership_start_date.into(),
            membership_end_date: model.membership_end_date.into(),
            membership_status: model.membership_status,
            is_active,
            personal_details: model
                .personal_details
                .map(|it| it.map_date(FormattedDateTime::from)),
            fitness_goals: model.fitness_goals,
            health_conditions: model.health_conditions,
            assigned_trainer: model
                .assigned_trainer
                .map(|id| Populated::resolve(id, &relations.users, UserSummary::brief)),
            attendance: model
                .attendance
                .into_iter()
                .map(|it| it.map_date(FormattedDateTime::from))
                .collect(),
            payments: model
                .payments
                .into_iter()
                .map(|id| Populated::resolve(id, &relations.payments, |it| it.clone().into()))
                .collect(),
            workouts: model
                .workouts
                .into_iter()
                .map(|id| Populated::resolve(id, &relations.workouts, |it| it.clone().into()))
                .collect(),
            notes: model.notes,
            created_at: model.created_at.into(),
            updated_at: model.updated_at.into(),
        }
    }
}

impl From<MemberModel> for Member {
    fn from(value: MemberModel) -> Self {
        Self::new(value, &MemberRelations::default())
    }
}

async fn with_users(users: &UserCollection, model: MemberModel) -> Result<Member, Error> {
    let relations = MemberRelations::users(users, std::slice::from_ref(&model)).await?;

    Ok(Member::new(model, &relations))
}

#[derive(Deserialize, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub struct IndexQuery {
    pub status: Option<String>,
    pub membership_type: Option<String>,
}

pub async fn index(
    State(members): State<MemberCollection>,
    State(users): State<UserCollection>,
    _user: UserAccess,
    Query(query): Query<IndexQuery>,
) -> Result<Json<Vec<Member>>, Error> {
    let filter = eq_filter([
        ("membershipStatus", query.status),
        ("membershipType", query.membership_type),
    ]);

    let models = members.find_all_sorted_desc(filter, "createdAt").await?;
    let relations = MemberRelations::users(&users, &models).await?;

    Ok(Json(
        models
            .into_iter()
            .map(|it| Member::new(it, &relations))
            .collect(),
    ))
}

pub async fn show(
    State(members): State<MemberCollection>,
    State(users): State<UserCollection>,
    State(payments): State<PaymentCollection>,
    State(workouts): State<WorkoutCollection>,
    _user: UserAccess,
    Path(member_id): Path<String>,
) -> Result<Json<Member>, Error> {
    let member_id = parse_object_id(&member_id, "Member")?;

    let model = members
        .get_one_by_id(member_id)
        .await?
        .ok_or(Error::NotFound("Member"))
        .tap_err(|_| tracing::debug!("tried accessing non existing member"))?;

    let mut relations = MemberRelations::users(&users, std::slice::from_ref(&model)).await?;
    relations.payments = payments
        .find_map_by_ids(model.payments.iter().copied())
        .await?;
    relations.workouts = workouts
        .find_map_by_ids(model.workouts.iter().copied())
        .await?;

    Ok(Json(Member::new(model, &relations)))
}

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct CreateRequest {
    pub user_id: Option<ObjectIdString>,
    pub membership_type: Option<MembershipType>,
    pub membership_end_date: Option<InputDate>,
    pub personal_details: Option<PersonalDetails<InputDate>>,
    #[serde(default)]
    pub fitness_goals: Vec<String>,
    #[serde(default)]
    pub health_conditions: String,
    pub assigned_trainer: Option<ObjectIdString>,
    #[serde(default)]
    pub notes: String,
}

impl Validate for CreateRequest {
    fn validate(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();

        require_present(&mut errors, "userId", &self.user_id);
        require_present(&mut errors, "membershipEndDate", &self.membership_end_date);

        into_result(errors)
    }
}

#[tracing::instrument(skip_all, fields(user = %user.id))]
pub async fn create(
    State(members): State<MemberCollection>,
    State(users): State<UserCollection>,
    user: UserAccess,
    ValidJson(request): ValidJson<CreateRequest>,
) -> Result<(StatusCode, Json<Member>), Error> {
    let user_id = request
        .user_id
        .ok_or_else(|| field_error("userId", "required", "userId is required"))?;
    let membership_end_date = request.membership_end_date.ok_or_else(|| {
        field_error("membershipEndDate", "required", "membershipEndDate is required")
    })?;

    let existing = members
        .count_documents(bson::doc! { "userId": user_id }, None)
        .await?;
    if existing > 0 {
        return Err(Error::MemberExists)
            .tap_err(|_| tracing::debug!("tried creating second member for user {}", *user_id));
    }

    let now = bson::DateTime::now();
    let model = MemberModel {
        id: ObjectId::new(),
        user_id: user_id.into(),
        membership_type: request.membership_type.unwrap_or_default(),
        membership_start_date: now,
        membership_end_date: membership_end_date.into(),
        membership_status: MembershipStatus::default(),
        personal_details: request
            .personal_details
            .map(|it| it.map_date(bson::DateTime::from)),
        fitness_goals: request.fitness_goals,
        health_conditions: request.health_conditions,
        assigned_trainer: request.assigned_trainer.map(Into::into),
        attendance: vec![],
        payments: vec![],
        workouts: vec![],
        notes: request.notes,
        created_at: now,
        updated_at: now,
    };

    tracing::debug!("creating member {}", model.id);
    members
        .insert_one(&model, None)
        .await
        .map_err(|err| map_duplicate(err, || Error::MemberExists))?;

    Ok((StatusCode::CREATED, Json(with_users(&users, model).await?)))
}

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct UpdateRequest {
    pub membership_type: Patch<MembershipType>,
    pub membership_end_date: Patch<InputDate>,
    pub membership_status: Patch<MembershipStatus>,
    pub personal_details: Patch<PersonalDetails<InputDate>>,
    pub fitness_goals: Patch<Vec<String>>,
    pub health_conditions: Patch<String>,
    pub assigned_trainer: Patch<ObjectIdString>,
    pub notes: Patch<String>,
}

impl Validate for UpdateRequest {
    fn validate(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();

        reject_null(&mut errors, "membershipType", &self.membership_type);
        reject_null(&mut errors, "membershipEndDate", &self.membership_end_date);
        reject_null(&mut errors, "membershipStatus", &self.membership_status);
        reject_null(&mut errors, "fitnessGoals", &self.fitness_goals);
        reject_null(&mut errors, "healthConditions", &self.health_conditions);
        reject_null(&mut errors, "notes", &self.notes);

        into_result(errors)
    }
}

#[tracing::instrument(skip_all, fields(user = %user.id, id = %member_id))]
pub async fn update(
    State(members): State<MemberCollection>,
    State(users): State<UserCollection>,
    user: UserAccess,
    Path(member_id): Path<String>,
    ValidJson(request): ValidJson<UpdateRequest>,
) -> Result<Json<Member>, Error> {
    let member_id = parse_object_id(&member_id, "Member")?;

    let mut update = UpdateDocument::new();
    update
        .required("membershipType", request.membership_type)?
        .required("membershipEndDate", request.membership_end_date)?
        .required("membershipStatus", request.membership_status)?
        .optional("personalDetails", request.personal_details)?
        .required("fitnessGoals", request.fitness_goals)?
        .required("healthConditions", request.health_conditions)?
        .optional("assignedTrainer", request.assigned_trainer.map(ObjectId::from))?
        .required("notes", request.notes)?;

    let model = members
        .update_one_returning(member_id, update.build(bson::DateTime::now()))
        .await?
        .ok_or(Error::NotFound("Member"))
        .tap_err(|_| tracing::debug!("tried updating non existing member"))?;

    Ok(Json(with_users(&users, model).await?))
}

#[tracing::instrument(skip_all, fields(user = %user.id, id = %member_id))]
pub async fn delete(
    State(members): State<MemberCollection>,
    user: UserAccess,
    Path(member_id): Path<String>,
) -> Result<Json<MessageResponse>, Error> {
    let member_id = parse_object_id(&member_id, "Member")?;

    let result = members
        .delete_one(bson::doc! { "_id": member_id }, None)
        .await?;
    if result.deleted_count == 0 {
        return Err(Error::NotFound("Member"))
            .tap_err(|_| tracing::debug!("tried deleting non existing member"));
    }

    Ok(Json(MessageResponse::new("Member deleted successfully")))
}

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceRequest {
    pub check_in: Option<String>,
    pub check_out: Option<String>,
}

/// Appends a check-in record dated now. The body is optional.
#[tracing::instrument(skip_all, fields(user = %user.id, id = %member_id))]
pub async fn add_attendance(
    State(members): State<MemberCollection>,
    State(users): State<UserCollection>,
    user: UserAccess,
    Path(member_id): Path<String>,
    request: Option<Json<AttendanceRequest>>,
) -> Result<Json<Member>, Error> {
    let member_id = parse_object_id(&member_id, "Member")?;
    let request = request.map(|Json(it)| it).unwrap_or_default();

    let now = bson::DateTime::now();
    let entry = Attendance {
        date: now,
        check_in: request.check_in,
        check_out: request.check_out,
    };

    let model = members
        .update_one_returning(
            member_id,
            bson::doc! {
                "$push": { "attendance": bson::to_bson(&entry)? },
                "$set": { "updatedAt": now },
            },
        )
        .await?
        .ok_or(Error::NotFound("Member"))
        .tap_err(|_| tracing::debug!("tried adding attendance to non existing member"))?;

    Ok(Json(with_users(&users, model).await?))
}

pub async fn attendance(
    State(members): State<MemberCollection>,
    _user: UserAccess,
    Path(member_id): Path<String>,
) -> Result<Json<Vec<Attendance<FormattedDateTime>>>, Error> {
    let member_id = parse_object_id(&member_id, "Member")?;

    let model = members
        .get_one_by_id(member_id)
        .await?
        .ok_or(Error::NotFound("Member"))?;

    Ok(Json(
        model
            .attendance
            .into_iter()
            .map(|it| it.map_date(FormattedDateTime::from))
            .collect(),
    ))
}
