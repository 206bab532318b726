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
    mongo_ext::{eq_filter, Collection, Identified},
    util::{
        field_error, into_result, not_blank, parse_object_id, reject_null, require_present,
        validation_error, FormattedDateTime, ObjectIdString, Patch, Populated, UpdateDocument,
        ValidJson,
    },
};

use super::{
    auth::{UserAccess, UserCollection, UserModel, UserSummary},
    equipment::{Equipment, EquipmentCollection, EquipmentModel},
    member::{Member, MemberCollection, MemberModel},
    MessageResponse,
};

#[derive(Clone)]
pub struct WorkoutCollection(pub Collection<WorkoutModel>);

impl std::ops::Deref for WorkoutCollection {
    type Target = Collection<WorkoutModel>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum WorkoutType {
    Cardio,
    Strength,
    Flexibility,
    Hiit,
    Yoga,
    Crossfit,
    Other,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Difficulty {
    Beginner,
    #[default]
    Intermediate,
    Advanced,
}

fn default_sets() -> i32 {
    3
}

fn default_rest_time() -> i32 {
    60
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Exercise {
    #[serde(default)]
    pub name: String,
    #[serde(default = "default_sets")]
    pub sets: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reps: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight: Option<f64>,
    #[serde(default = "default_rest_time")]
    pub rest_time: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

impl Exercise {
    pub fn named(name: &str) -> Self {
        Self {
            name: name.to_string(),
            sets: default_sets(),
            reps: None,
            duration: None,
            weight: None,
            rest_time: default_rest_time(),
            notes: None,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WorkoutModel {
    #[serde(rename = "_id")]
    pub id: ObjectId,

    pub name: String,
    pub r#type: WorkoutType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub duration: i32,
    #[serde(default)]
    pub difficulty: Difficulty,
    #[serde(default)]
    pub exercises: Vec<Exercise>,
    #[serde(default)]
    pub equipment_needed: Vec<ObjectId>,
    pub created_by: ObjectId,
    #[serde(default)]
    pub assigned_to: Vec<ObjectId>,
    #[serde(default)]
    pub calories_burned: f64,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub image_url: String,
    #[serde(default)]
    pub is_public: bool,

    pub created_at: bson::DateTime,
    pub updated_at: bson::DateTime,
}

impl Identified for WorkoutModel {
    fn id(&self) -> ObjectId {
        self.id
    }
}

#[derive(Default)]
pub struct WorkoutRelations {
    pub users: HashMap<ObjectId, UserModel>,
    pub equipment: HashMap<ObjectId, EquipmentModel>,
    pub members: HashMap<ObjectId, MemberModel>,
}

impl WorkoutRelations {
    pub async fn load(
        users: &UserCollection,
        equipment: &EquipmentCollection,
        members: &MemberCollection,
        workouts: &[WorkoutModel],
    ) -> Result<Self, Error> {
        Ok(Self {
            users: users
                .find_map_by_ids(workouts.iter().map(|it| it.created_by))
                .await?,
            equipment: equipment
                .find_map_by_ids(workouts.iter().flat_map(|it| it.equipment_needed.iter().copied()))
                .await?,
            members: members
                .find_map_by_ids(workouts.iter().flat_map(|it| it.assigned_to.iter().copied()))
                .await?,
        })
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Workout {
    pub id: ObjectIdString,
    pub name: String,
    pub r#type: WorkoutType,
    pub description: Option<String>,
    pub duration: i32,
    pub difficulty: Difficulty,
    pub exercises: Vec<Exercise>,
    pub equipment_needed: Vec<Populated<Equipment>>,
    pub created_by: Populated<UserSummary>,
    pub assigned_to: Vec<Populated<Member>>,
    pub calories_burned: f64,
    pub tags: Vec<String>,
    pub image_url: String,
    pub is_public: bool,
    pub created_at: FormattedDateTime,
    pub updated_at: FormattedDateTime,
}

impl Workout {
    pub fn new(model: WorkoutModel, relations: &WorkoutRelations) -> Self {
        Self {
            id: model.id.into(),
            name: model.name,
            r#type: model.r#type,
            description: model.description,
            duration: model.duration,
            difficulty: model.difficulty,
            exercises: model.exercises,
            equipment_needed: model
                .equipment_needed
                .into_iter()
                .map(|id| Populated::resolve(id, &relations.equipment, |it| it.clone().into()))
                .collect(),
            created_by: Populated::resolve(model.created_by, &relations.users, UserSummary::brief),
            assigned_to: model
                .assigned_to
                .into_iter()
                .map(|id| Populated::resolve(id, &relations.members, |it| it.clone().into()))
                .collect(),
            calories_burned: model.calories_burned,
            tags: model.tags,
            image_url: model.image_url,
            is_public: model.is_public,
            created_at: model.created_at.into(),
            updated_at: model.updated_at.into(),
        }
    }
}

impl From<WorkoutModel> for Workout {
    fn from(value: WorkoutModel) -> Self {
        Self::new(value, &WorkoutRelations::default())
    }
}

/// Collections needed to expand the references of a workout.
#[derive(Clone)]
pub struct WorkoutDeps {
    pub users: UserCollection,
    pub equipment: EquipmentCollection,
    pub members: MemberCollection,
}

impl WorkoutDeps {
    async fn expand(&self, models: Vec<WorkoutModel>) -> Result<Vec<Workout>, Error> {
        let relations =
            WorkoutRelations::load(&self.users, &self.equipment, &self.members, &models).await?;

        Ok(models
            .into_iter()
            .map(|it| Workout::new(it, &relations))
            .collect())
    }

    async fn expand_one(&self, model: WorkoutModel) -> Result<Workout, Error> {
        let relations = WorkoutRelations::load(
            &self.users,
            &self.equipment,
            &self.members,
            std::slice::from_ref(&model),
        )
        .await?;

        Ok(Workout::new(model, &relations))
    }
}

impl axum::extract::FromRef<crate::app::AppState> for WorkoutDeps {
    fn from_ref(input: &crate::app::AppState) -> Self {
        Self {
            users: input.user_collection.clone(),
            equipment: input.equipment_collection.clone(),
            members: input.member_collection.clone(),
        }
    }
}

fn check_exercises(errors: &mut ValidationErrors, exercises: &[Exercise]) {
    for (index, exercise) in exercises.iter().enumerate() {
        if not_blank(&exercise.name).is_err() {
            errors.add(
                "exercises",
                validation_error("required", format!("exercises[{index}].name is required")),
            );
        }
    }
}

fn check_duration(errors: &mut ValidationErrors, duration: Option<&i32>) {
    if let Some(duration) = duration {
        if *duration < 1 {
            errors.add(
                "duration",
                validation_error("range", "duration must be at least 1"),
            );
        }
    }
}

fn into_ids(ids: Vec<ObjectIdString>) -> Vec<ObjectId> {
    ids.into_iter().map(Into::into).collect()
}

/// Mirrors a workout's `assignedTo` onto `members.workouts`. Listed members gain the
/// workout and every other member loses it.
async fn sync_members(
    members: &MemberCollection,
    workout_id: ObjectId,
    assigned_to: &[ObjectId],
    now: bson::DateTime,
) -> Result<(), Error> {
    members
        .update_many(
            bson::doc! { "_id": { "$nin": assigned_to.to_vec() }, "workouts": workout_id },
            bson::doc! {
                "$pull": { "workouts": workout_id },
                "$set": { "updatedAt": now },
            },
            None,
        )
        .await?;

    if !assigned_to.is_empty() {
        members
            .update_many(
                bson::doc! { "_id": { "$in": assigned_to.to_vec() } },
                bson::doc! {
                    "$addToSet": { "workouts": workout_id },
                    "$set": { "updatedAt": now },
                },
                None,
            )
            .await?;
    }

    Ok(())
}

#[derive(Deserialize, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub struct IndexQuery {
    pub r#type: Option<String>,
    pub difficulty: Option<String>,
    pub is_public: Option<String>,
}

pub async fn index(
    State(workouts): State<WorkoutCollection>,
    State(deps): State<WorkoutDeps>,
    _user: UserAccess,
    Query(query): Query<IndexQuery>,
) -> Result<Json<Vec<Workout>>, Error> {
    let mut filter = eq_filter([("type", query.r#type), ("difficulty", query.difficulty)]);
    if let Some(is_public) = query.is_public {
        filter.insert("isPublic", is_public == "true");
    }

    let models = workouts.find_all_sorted_desc(filter, "createdAt").await?;

    Ok(Json(deps.expand(models).await?))
}

pub async fn show(
    State(workouts): State<WorkoutCollection>,
    State(deps): State<WorkoutDeps>,
    _user: UserAccess,
    Path(workout_id): Path<String>,
) -> Result<Json<Workout>, Error> {
    let workout_id = parse_object_id(&workout_id, "Workout")?;

    let model = workouts
        .get_one_by_id(workout_id)
        .await?
        .ok_or(Error::NotFound("Workout"))
        .tap_err(|_| tracing::debug!("tried accessing non existing workout"))?;

    Ok(Json(deps.expand_one(model).await?))
}

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct CreateRequest {
    pub name: Option<String>,
    pub r#type: Option<WorkoutType>,
    pub description: Option<String>,
    pub duration: Option<i32>,
    pub difficulty: Option<Difficulty>,
    #[serde(default)]
    pub exercises: Vec<Exercise>,
    #[serde(default)]
    pub equipment_needed: Vec<ObjectIdString>,
    #[serde(default)]
    pub assigned_to: Vec<ObjectIdString>,
    #[serde(default)]
    pub calories_burned: f64,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub image_url: String,
    #[serde(default)]
    pub is_public: bool,
}

impl Validate for CreateRequest {
    fn validate(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();

        match &self.name {
            Some(name) if not_blank(name).is_ok() => {}
            _ => errors.add("name", validation_error("required", "Workout name is required")),
        }
        require_present(&mut errors, "type", &self.r#type);
        require_present(&mut errors, "duration", &self.duration);
        check_duration(&mut errors, self.duration.as_ref());
        check_exercises(&mut errors, &self.exercises);

        into_result(errors)
    }
}

#[tracing::instrument(skip_all, fields(user = %user.id))]
pub async fn create(
    State(workouts): State<WorkoutCollection>,
    State(deps): State<WorkoutDeps>,
    user: UserAccess,
    ValidJson(request): ValidJson<CreateRequest>,
) -> Result<(StatusCode, Json<Workout>), Error> {
    let name = request
        .name
        .map(|it| it.trim().to_string())
        .ok_or_else(|| field_error("name", "required", "Workout name is required"))?;
    let r#type = request
        .r#type
        .ok_or_else(|| field_error("type", "required", "Workout type is required"))?;
    let duration = request
        .duration
        .ok_or_else(|| field_error("duration", "required", "Duration is required"))?;

    let now = bson::DateTime::now();
    let model = WorkoutModel {
        id: ObjectId::new(),
        name,
        r#type,
        description: request
            .description
            .map(|it| it.trim().to_string())
            .filter(|it| !it.is_empty()),
        duration,
        difficulty: request.difficulty.unwrap_or_default(),
        exercises: request.exercises,
        equipment_needed: into_ids(request.equipment_needed),
        created_by: user.id,
        assigned_to: into_ids(request.assigned_to),
        calories_burned: request.calories_burned,
        tags: request.tags,
        image_url: request.image_url,
        is_public: request.is_public,
        created_at: now,
        updated_at: now,
    };

    tracing::debug!("creating workout {}", model.id);
    workouts.insert_one(&model, None).await?;
    if !model.assigned_to.is_empty() {
        sync_members(&deps.members, model.id, &model.assigned_to, now).await?;
    }

    Ok((StatusCode::CREATED, Json(deps.expand_one(model).await?)))
}

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct UpdateRequest {
    pub name: Patch<String>,
    pub r#type: Patch<WorkoutType>,
    pub description: Patch<String>,
    pub duration: Patch<i32>,
    pub difficulty: Patch<Difficulty>,
    pub exercises: Patch<Vec<Exercise>>,
    pub equipment_needed: Patch<Vec<ObjectIdString>>,
    pub assigned_to: Patch<Vec<ObjectIdString>>,
    pub calories_burned: Patch<f64>,
    pub tags: Patch<Vec<String>>,
    pub image_url: Patch<String>,
    pub is_public: Patch<bool>,
}

impl Validate for UpdateRequest {
    fn validate(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();

        reject_null(&mut errors, "name", &self.name);
        if let Some(name) = self.name.value() {
            if not_blank(name).is_err() {
                errors.add("name", validation_error("blank", "Workout name is required"));
            }
        }
        reject_null(&mut errors, "type", &self.r#type);
        reject_null(&mut errors, "duration", &self.duration);
        check_duration(&mut errors, self.duration.value());
        reject_null(&mut errors, "difficulty", &self.difficulty);
        reject_null(&mut errors, "exercises", &self.exercises);
        if let Some(exercises) = self.exercises.value() {
            check_exercises(&mut errors, exercises);
        }
        reject_null(&mut errors, "equipmentNeeded", &self.equipment_needed);
        reject_null(&mut errors, "assignedTo", &self.assigned_to);
        reject_null(&mut errors, "caloriesBurned", &self.calories_burned);
        reject_null(&mut errors, "tags", &self.tags);
        reject_null(&mut errors, "imageUrl", &self.image_url);
        reject_null(&mut errors, "isPublic", &self.is_public);

        into_result(errors)
    }
}

#[tracing::instrument(skip_all, fields(user = %user.id, id = %workout_id))]
pub async fn update(
    State(workouts): State<WorkoutCollection>,
    State(deps): State<WorkoutDeps>,
    user: UserAccess,
    Path(workout_id): Path<String>,
    ValidJson(request): ValidJson<UpdateRequest>,
) -> Result<Json<Workout>, Error> {
    let workout_id = parse_object_id(&workout_id, "Workout")?;
    let reassigned = !request.assigned_to.is_missing();

    let mut update = UpdateDocument::new();
    update
        .required("name", request.name.map(|it| it.trim().to_string()))?
        .required("type", request.r#type)?
        .optional("description", request.description)?
        .required("duration", request.duration)?
        .required("difficulty", request.difficulty)?
        .required("exercises", request.exercises)?
        .required("equipmentNeeded", request.equipment_needed.map(into_ids))?
        .required("assignedTo", request.assigned_to.map(into_ids))?
        .required("caloriesBurned", request.calories_burned)?
        .required("tags", request.tags)?
        .required("imageUrl", request.image_url)?
        .required("isPublic", request.is_public)?;

    let now = bson::DateTime::now();
    let model = workouts
        .update_one_returning(workout_id, update.build(now))
        .await?
        .ok_or(Error::NotFound("Workout"))
        .tap_err(|_| tracing::debug!("tried updating non existing workout"))?;
    if reassigned {
        sync_members(&deps.members, model.id, &model.assigned_to, now).await?;
    }

    Ok(Json(deps.expand_one(model).await?))
}

#[tracing::instrument(skip_all, fields(user = %user.id, id = %workout_id))]
pub async fn delete(
    State(workouts): State<WorkoutCollection>,
    State(members): State<MemberCollection>,
    user: UserAccess,
    Path(workout_id): Path<String>,
) -> Result<Json<MessageResponse>, Error> {
    let workout_id = parse_object_id(&workout_id, "Workout")?;

    let result = workouts
        .delete_one(bson::doc! { "_id": workout_id }, None)
        .await?;
    if result.deleted_count == 0 {
        return Err(Error::NotFound("Workout"))
            .tap_err(|_| tracing::debug!("tried deleting non existing workout"));
    }
    sync_members(&members, workout_id, &[], bson::DateTime::now()).await?;

    Ok(Json(MessageResponse::new("Workout deleted successfully")))
}

/// Assigns the workout to a member. Both sides use set semantics so repeating the call
/// changes nothing.
#[tracing::instrument(skip_all, fields(user = %user.id, id = %workout_id, member = %member_id))]
pub async fn assign(
    State(workouts): State<WorkoutCollection>,
    State(deps): State<WorkoutDeps>,
    user: UserAccess,
    Path((workout_id, member_id)): Path<(String, String)>,
) -> Result<Json<Workout>, Error> {
    let workout_id = parse_object_id(&workout_id, "Workout")?;
    let member_id = parse_object_id(&member_id, "Member")?;

    if !workouts.exists_by_id(workout_id).await? {
        return Err(Error::NotFound("Workout"))
            .tap_err(|_| tracing::debug!("tried assigning non existing workout"));
    }
    if !deps.members.exists_by_id(member_id).await? {
        return Err(Error::NotFound("Member"))
            .tap_err(|_| tracing::debug!("tried assigning workout to non existing member"));
    }

    let now = bson::DateTime::now();
    let model = workouts
        .update_one_returning(
            workout_id,
            bson::doc! {
                "$addToSet": { "assignedTo": member_id },
                "$set": { "updatedAt": now },
            },
        )
        .await?
        .ok_or(Error::NotFound("Workout"))?;

    deps.members
        .update_one(
            bson::doc! { "_id": member_id },
            bson::doc! {
                "$addToSet": { "workouts": workout_id },
                "$set": { "updatedAt": now },
            },
            None,
        )
        .await?;

    Ok(Json(deps.expand_one(model).await?))
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use axum::{
        extract::{Path, Query, State},
        Json,
    };
    use validator::Validate;

    use crate::{
        api::{
            member::tests::create_member,
            tests::{bootstrap, Bootstrap},
        },
        error::Error,
        util::{Patch, ValidJson},
    };

    use super::*;

    fn request(name: &str) -> CreateRequest {
        CreateRequest {
            name: Some(name.to_string()),
            r#type: Some(WorkoutType::Strength),
            duration: Some(45),
            ..Default::default()
        }
    }

    fn deps(bootstrap: &Bootstrap) -> State<WorkoutDeps> {
        State(WorkoutDeps {
            users: bootstrap.app_state.user_collection.clone(),
            equipment: bootstrap.app_state.equipment_collection.clone(),
            members: bootstrap.app_state.member_collection.clone(),
        })
    }

    async fn create_workout(bootstrap: &Bootstrap, request: CreateRequest) -> Workout {
        let (_, Json(workout)) = create(
            bootstrap.workout_collection(),
            deps(bootstrap),
            bootstrap.user_access(),
            ValidJson(request),
        )
        .await
        .unwrap();

        workout
    }

    #[test]
    fn test_exercise_defaults() {
        let exercise: Exercise = serde_json::from_str(r#"{ "name": "Squat" }"#).unwrap();

        assert_eq!(exercise, Exercise::named("Squat"));
        assert_eq!(exercise.sets, 3);
        assert_eq!(exercise.rest_time, 60);
    }

    #[test]
    fn test_create_validation() {
        let errors = CreateRequest {
            duration: Some(0),
            exercises: vec![Exercise::named(" ")],
            ..Default::default()
        }
        .validate()
        .unwrap_err();
        let errors = errors.field_errors();

        assert!(errors.contains_key("name"));
        assert!(errors.contains_key("type"));
        assert!(errors.contains_key("duration"));
        assert!(errors.contains_key("exercises"));

        assert!(request("Leg day").validate().is_ok());
    }

    #[test]
    fn test_update_accepts_false_and_zero() {
        let request: UpdateRequest =
            serde_json::from_str(r#"{ "isPublic": false, "caloriesBurned": 0 }"#).unwrap();
        assert!(request.validate().is_ok());
        assert_eq!(request.is_public, Patch::Value(false));

        let request: UpdateRequest = serde_json::from_str(r#"{ "isPublic": null }"#).unwrap();
        assert!(request.validate().is_err());
    }

    #[tokio::test]
    #[ignore = "requires MongoDB"]
    async fn test_create_and_filter() {
        let bootstrap = bootstrap().await;

        let workout = create_workout(
            &bootstrap,
            CreateRequest {
                is_public: true,
                exercises: vec![Exercise::named("Squat")],
                ..request("Leg day")
            },
        )
        .await;
        assert_eq!(
            workout.created_by.doc().map(|it| it.id),
            Some(bootstrap.user_id().into())
        );
        assert_eq!(workout.difficulty, Difficulty::Intermediate);
        assert_eq!(workout.exercises[0].sets, 3);

        create_workout(&bootstrap, request("Arm day")).await;

        let Json(public) = index(
            bootstrap.workout_collection(),
            deps(&bootstrap),
            bootstrap.user_access(),
            Query(IndexQuery {
                is_public: Some("true".to_string()),
                ..Default::default()
            }),
        )
        .await
        .unwrap();
        assert_eq!(public.len(), 1);
        assert_eq!(public[0].id, workout.id);

        let Json(private) = index(
            bootstrap.workout_collection(),
            deps(&bootstrap),
            bootstrap.user_access(),
            Query(IndexQuery {
                is_public: Some("yes".to_string()),
                ..Default::default()
            }),
        )
        .await
        .unwrap();
        assert_eq!(private.len(), 1);
        assert_eq!(private[0].name, "Arm day");

        let Json(updated) = update(
            bootstrap.workout_collection(),
            deps(&bootstrap),
            bootstrap.user_access(),
            Path(workout.id.to_string()),
            ValidJson(UpdateRequest {
                is_public: Patch::Value(false),
                calories_burned: Patch::Value(0.0),
                ..Default::default()
            }),
        )
        .await
        .unwrap();
        assert!(!updated.is_public);
        assert_eq!(updated.name, "Leg day");
    }

    #[tokio::test]
    #[ignore = "requires MongoDB"]
    async fn test_assign_is_idempotent() {
        let bootstrap = bootstrap().await;

        let workout = create_workout(&bootstrap, request("Leg day")).await;
        let member = create_member(&bootstrap, bootstrap.user_id()).await;

        for _ in 0..2 {
            let Json(assigned) = assign(
                bootstrap.workout_collection(),
                deps(&bootstrap),
                bootstrap.user_access(),
                Path((workout.id.to_string(), member.id.to_string())),
            )
            .await
            .unwrap();

            assert_eq!(assigned.assigned_to.len(), 1);
            assert_eq!(
                assigned.assigned_to[0].doc().map(|it| it.id),
                Some(member.id)
            );
        }

        let member = bootstrap
            .app_state
            .member_collection
            .get_one_by_id(member.id.into())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(member.workouts, vec![ObjectId::from(workout.id)]);

        let err = assign(
            bootstrap.workout_collection(),
            deps(&bootstrap),
            bootstrap.user_access(),
            Path((workout.id.to_string(), ObjectId::new().to_string())),
        )
        .await
        .unwrap_err();
        assert_matches!(err, Error::NotFound("Member"));

        let err = assign(
            bootstrap.workout_collection(),
            deps(&bootstrap),
            bootstrap.user_access(),
            Path((ObjectId::new().to_string(), member.id.to_string())),
        )
        .await
        .unwrap_err();
        assert_matches!(err, Error::NotFound("Workout"));
    }

    async fn member_workouts(bootstrap: &Bootstrap, member: &Member) -> Vec<ObjectId> {
        bootstrap
            .app_state
            .member_collection
            .get_one_by_id(member.id.into())
            .await
            .unwrap()
            .unwrap()
            .workouts
    }

    #[tokio::test]
    #[ignore = "requires MongoDB"]
    async fn test_assigned_to_keeps_members_in_sync() {
        let bootstrap = bootstrap().await;

        let first = create_member(&bootstrap, bootstrap.user_id()).await;
        let other_user = bootstrap.create_user("other@example.com").await;
        let second = create_member(&bootstrap, other_user).await;

        let workout = create_workout(
            &bootstrap,
            CreateRequest {
                assigned_to: vec![first.id],
                ..request("Leg day")
            },
        )
        .await;
        let workout_id = ObjectId::from(workout.id);
        assert_eq!(member_workouts(&bootstrap, &first).await, vec![workout_id]);
        assert!(member_workouts(&bootstrap, &second).await.is_empty());

        let Json(updated) = update(
            bootstrap.workout_collection(),
            deps(&bootstrap),
            bootstrap.user_access(),
            Path(workout.id.to_string()),
            ValidJson(UpdateRequest {
                assigned_to: Patch::Value(vec![second.id]),
                ..Default::default()
            }),
        )
        .await
        .unwrap();
        assert_eq!(updated.assigned_to.len(), 1);
        assert!(member_workouts(&bootstrap, &first).await.is_empty());
        assert_eq!(member_workouts(&bootstrap, &second).await, vec![workout_id]);

        // leaving assignedTo out of the patch leaves members untouched
        update(
            bootstrap.workout_collection(),
            deps(&bootstrap),
            bootstrap.user_access(),
            Path(workout.id.to_string()),
            ValidJson(UpdateRequest {
                duration: Patch::Value(30),
                ..Default::default()
            }),
        )
        .await
        .unwrap();
        assert_eq!(member_workouts(&bootstrap, &second).await, vec![workout_id]);
    }

    #[tokio::test]
    #[ignore = "requires MongoDB"]
    async fn test_delete() {
        let bootstrap = bootstrap().await;

        let workout = create_workout(&bootstrap, request("Leg day")).await;
        let member = create_member(&bootstrap, bootstrap.user_id()).await;
        assign(
            bootstrap.workout_collection(),
            deps(&bootstrap),
            bootstrap.user_access(),
            Path((workout.id.to_string(), member.id.to_string())),
        )
        .await
        .unwrap();
        assert_eq!(member_workouts(&bootstrap, &member).await.len(), 1);

        delete(
            bootstrap.workout_collection(),
            bootstrap.member_collection(),
            bootstrap.user_access(),
            Path(workout.id.to_string()),
        )
        .await
        .unwrap();
        assert!(member_workouts(&bootstrap, &member).await.is_empty());

        let err = delete(
            bootstrap.workout_collection(),
            bootstrap.member_collection(),
            bootstrap.user_access(),
            Path(workout.id.to_string()),
        )
        .await
        .unwrap_err();
        assert_matches!(err, Error::NotFound("Workout"));
    }
}
