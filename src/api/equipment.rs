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
    mongo_ext::{count_of, eq_filter, fill_counts, map_duplicate, Collection, GroupCount, Identified},
    util::{
        field_error, into_result, not_blank, parse_object_id, reject_null, require_present,
        validation_error, FormattedDateTime, InputDate, Patch, UpdateDocument, ValidJson,
        ObjectIdString,
    },
};

use super::{auth::UserAccess, MessageResponse};

#[derive(Clone)]
pub struct EquipmentCollection(pub Collection<EquipmentModel>);

impl std::ops::Deref for EquipmentCollection {
    type Target = Collection<EquipmentModel>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EquipmentCategory {
    Cardio,
    Strength,
    Flexibility,
    Weights,
    Accessories,
    Other,
}

impl EquipmentCategory {
    pub const NAMES: [&'static str; 6] = [
        "cardio",
        "strength",
        "flexibility",
        "weights",
        "accessories",
        "other",
    ];
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EquipmentCondition {
    Excellent,
    #[default]
    Good,
    Fair,
    Poor,
    MaintenanceNeeded,
}

impl EquipmentCondition {
    pub const NAMES: [&'static str; 5] = ["excellent", "good", "fair", "poor", "maintenance_needed"];
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EquipmentStatus {
    #[default]
    Available,
    InUse,
    Maintenance,
    OutOfService,
}

impl EquipmentStatus {
    pub const NAMES: [&'static str; 4] = ["available", "in_use", "maintenance", "out_of_service"];
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EquipmentModel {
    #[serde(rename = "_id")]
    pub id: ObjectId,

    pub name: String,
    pub category: EquipmentCategory,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub brand: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub serial_number: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub purchase_date: Option<bson::DateTime>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub purchase_price: Option<f64>,
    #[serde(default)]
    pub current_condition: EquipmentCondition,
    #[serde(default)]
    pub status: EquipmentStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_maintenance_date: Option<bson::DateTime>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_maintenance_date: Option<bson::DateTime>,
    #[serde(default)]
    pub maintenance_notes: String,
    #[serde(default)]
    pub image_url: String,

    pub created_at: bson::DateTime,
    pub updated_at: bson::DateTime,
}

impl Identified for EquipmentModel {
    fn id(&self) -> ObjectId {
        self.id
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Equipment {
    pub id: ObjectIdString,
    pub name: String,
    pub category: EquipmentCategory,
    pub brand: Option<String>,
    pub model: Option<String>,
    pub serial_number: Option<String>,
    pub purchase_date: Option<FormattedDateTime>,
    pub purchase_price: Option<f64>,
    pub current_condition: EquipmentCondition,
    pub status: EquipmentStatus,
    pub location: Option<String>,
    pub last_maintenance_date: Option<FormattedDateTime>,
    pub next_maintenance_date: Option<FormattedDateTime>,
    pub maintenance_notes: String,
    pub image_url: String,
    pub created_at: FormattedDateTime,
    pub updated_at: FormattedDateTime,
}

impl From<EquipmentModel> for Equipment {
    fn from(value: EquipmentModel) -> Self {
        Self {
            id: value.id.into(),
            name: value.name,
            category: value.category,
            brand: value.brand,
            model: value.model,
            serial_number: value.serial_number,
            purchase_date: value.purchase_date.map(Into::into),
            purchase_price: value.purchase_price,
            current_condition: value.current_condition,
            status: value.status,
            location: value.location,
            last_maintenance_date: value.last_maintenance_date.map(Into::into),
            next_maintenance_date: value.next_maintenance_date.map(Into::into),
            maintenance_notes: value.maintenance_notes,
            image_url: value.image_url,
            created_at: value.created_at.into(),
            updated_at: value.updated_at.into(),
        }
    }
}

/// Trims a free-text field, dropping it when nothing is left. An empty serial number
/// must not be stored since the sparse unique index only skips absent fields.
fn trimmed(value: Option<String>) -> Option<String> {
    value
        .map(|it| it.trim().to_string())
        .filter(|it| !it.is_empty())
}

/// Serial numbers (and the required name) treat a blank value as a clear. Other free-text
/// fields store whatever trimmed value they are given, `""` included.
fn trimmed_patch(value: Patch<String>) -> Patch<String> {
    match value {
        Patch::Value(it) => match trimmed(Some(it)) {
            Some(it) => Patch::Value(it),
            None => Patch::Null,
        },
        other => other,
    }
}

fn trim(value: String) -> String {
    value.trim().to_string()
}

fn serial_number_taken() -> Error {
    Error::MustUniqueError("serialNumber".to_string())
}

#[derive(Deserialize, Debug, Default)]
pub struct IndexQuery {
    pub category: Option<String>,
    pub status: Option<String>,
    pub condition: Option<String>,
}

pub async fn index(
    State(equipment): State<EquipmentCollection>,
    _user: UserAccess,
    Query(query): Query<IndexQuery>,
) -> Result<Json<Vec<Equipment>>, Error> {
    let filter = eq_filter([
        ("category", query.category),
        ("status", query.status),
        ("currentCondition", query.condition),
    ]);

    let models = equipment.find_all_sorted_desc(filter, "createdAt").await?;

    Ok(Json(models.into_iter().map(Into::into).collect()))
}

pub async fn show(
    State(equipment): State<EquipmentCollection>,
    _user: UserAccess,
    Path(equipment_id): Path<String>,
) -> Result<Json<Equipment>, Error> {
    let equipment_id = parse_object_id(&equipment_id, "Equipment")?;

    let model = equipment
        .get_one_by_id(equipment_id)
        .await?
        .ok_or(Error::NotFound("Equipment"))
        .tap_err(|_| tracing::debug!("tried accessing non existing equipment"))?;

    Ok(Json(model.into()))
}

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct CreateRequest {
    pub name: Option<String>,
    pub category: Option<EquipmentCategory>,
    pub brand: Option<String>,
    pub model: Option<String>,
    pub serial_number: Option<String>,
    pub purchase_date: Option<InputDate>,
    pub purchase_price: Option<f64>,
    pub current_condition: Option<EquipmentCondition>,
    pub status: Option<EquipmentStatus>,
    pub location: Option<String>,
    pub last_maintenance_date: Option<InputDate>,
    pub next_maintenance_date: Option<InputDate>,
    #[serde(default)]
    pub maintenance_notes: String,
    #[serde(default)]
    pub image_url: String,
}

fn check_price(errors: &mut ValidationErrors, price: Option<&f64>) {
    if let Some(price) = price {
        if price.is_nan() || *price < 0.0 {
            errors.add(
                "purchasePrice",
                validation_error("range", "purchasePrice must be at least 0"),
            );
        }
    }
}

impl Validate for CreateRequest {
    fn validate(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();

        match &self.name {
            Some(name) if not_blank(name).is_ok() => {}
            _ => errors.add("name", validation_error("required", "Equipment name is required")),
        }
        require_present(&mut errors, "category", &self.category);
        check_price(&mut errors, self.purchase_price.as_ref());

        into_result(errors)
    }
}

#[tracing::instrument(skip_all, fields(user = %user.id))]
pub async fn create(
    State(equipment): State<EquipmentCollection>,
    user: UserAccess,
    ValidJson(request): ValidJson<CreateRequest>,
) -> Result<(StatusCode, Json<Equipment>), Error> {
    let name = trimmed(request.name)
        .ok_or_else(|| field_error("name", "required", "Equipment name is required"))?;
    let category = request
        .category
        .ok_or_else(|| field_error("category", "required", "Category is required"))?;

    let now = bson::DateTime::now();
    let model = EquipmentModel {
        id: ObjectId::new(),
        name,
        category,
        brand: trimmed(request.brand),
        model: trimmed(request.model),
        serial_number: trimmed(request.serial_number),
        purchase_date: request.purchase_date.map(Into::into),
        purchase_price: request.purchase_price,
        current_condition: request.current_condition.unwrap_or_default(),
        status: request.status.unwrap_or_default(),
        location: trimmed(request.location),
        last_maintenance_date: request.last_maintenance_date.map(Into::into),
        next_maintenance_date: request.next_maintenance_date.map(Into::into),
        maintenance_notes: request.maintenance_notes,
        image_url: request.image_url,
        created_at: now,
        updated_at: now,
    };

    tracing::debug!("creating equipment {}", model.id);
    equipment
        .insert_one(&model, None)
        .await
        .map_err(|err| map_duplicate(err, serial_number_taken))?;

    Ok((StatusCode::CREATED, Json(model.into())))
}

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct UpdateRequest {
    pub name: Patch<String>,
    pub category: Patch<EquipmentCategory>,
    pub brand: Patch<String>,
    pub model: Patch<String>,
    pub serial_number: Patch<String>,
    pub purchase_date: Patch<InputDate>,
    pub purchase_price: Patch<f64>,
    pub current_condition: Patch<EquipmentCondition>,
    pub status: Patch<EquipmentStatus>,
    pub location: Patch<String>,
    pub last_maintenance_date: Patch<InputDate>,
    pub next_maintenance_date: Patch<InputDate>,
    pub maintenance_notes: Patch<String>,
    pub image_url: Patch<String>,
}

impl Validate for UpdateRequest {
    fn validate(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();

        reject_null(&mut errors, "name", &self.name);
        if let Some(name) = self.name.value() {
            if not_blank(name).is_err() {
                errors.add("name", validation_error("blank", "Equipment name is required"));
            }
        }
        reject_null(&mut errors, "category", &self.category);
        reject_null(&mut errors, "currentCondition", &self.current_condition);
        reject_null(&mut errors, "status", &self.status);
        reject_null(&mut errors, "maintenanceNotes", &self.maintenance_notes);
        reject_null(&mut errors, "imageUrl", &self.image_url);
        check_price(&mut errors, self.purchase_price.value());

        into_result(errors)
    }
}

#[tracing::instrument(skip_all, fields(user = %user.id, id = %equipment_id))]
pub async fn update(
    State(equipment): State<EquipmentCollection>,
    user: UserAccess,
    Path(equipment_id): Path<String>,
    ValidJson(request): ValidJson<UpdateRequest>,
) -> Result<Json<Equipment>, Error> {
    let equipment_id = parse_object_id(&equipment_id, "Equipment")?;

    let mut update = UpdateDocument::new();
    update
        .required("name", trimmed_patch(request.name))?
        .required("category", request.category)?
        .optional("brand", request.brand.map(trim))?
        .optional("model", request.model.map(trim))?
        .optional("serialNumber", trimmed_patch(request.serial_number))?
        .optional("purchaseDate", request.purchase_date)?
        .optional("purchasePrice", request.purchase_price)?
        .required("currentCondition", request.current_condition)?
        .required("status", request.status)?
        .optional("location", request.location.map(trim))?
        .optional("lastMaintenanceDate", request.last_maintenance_date)?
        .optional("nextMaintenanceDate", request.next_maintenance_date)?
        .required("maintenanceNotes", request.maintenance_notes)?
        .required("imageUrl", request.image_url)?;

    let model = equipment
        .update_one_returning(equipment_id, update.build(bson::DateTime::now()))
        .await
        .map_err(|err| match err {
            Error::DatabaseError(err) => map_duplicate(err, serial_number_taken),
            other => other,
        })?
        .ok_or(Error::NotFound("Equipment"))
        .tap_err(|_| tracing::debug!("tried updating non existing equipment"))?;

    Ok(Json(model.into()))
}

#[tracing::instrument(skip_all, fields(user = %user.id, id = %equipment_id))]
pub async fn delete(
    State(equipment): State<EquipmentCollection>,
    user: UserAccess,
    Path(equipment_id): Path<String>,
) -> Result<Json<MessageResponse>, Error> {
    let equipment_id = parse_object_id(&equipment_id, "Equipment")?;

    let result = equipment
        .delete_one(bson::doc! { "_id": equipment_id }, None)
        .await?;
    if result.deleted_count == 0 {
        return Err(Error::NotFound("Equipment"))
            .tap_err(|_| tracing::debug!("tried deleting non existing equipment"));
    }

    Ok(Json(MessageResponse::new("Equipment deleted successfully")))
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StatsResponse {
    pub total: i64,
    pub available: i64,
    pub in_use: i64,
    pub maintenance: i64,
    pub out_of_service: i64,
    pub by_status: Vec<GroupCount>,
    pub by_category: Vec<GroupCount>,
    pub by_condition: Vec<GroupCount>,
}

impl StatsResponse {
    pub fn new(
        by_status: Vec<GroupCount>,
        by_category: Vec<GroupCount>,
        by_condition: Vec<GroupCount>,
    ) -> Self {
        let by_status = fill_counts(&EquipmentStatus::NAMES, by_status);

        Self {
            total: by_status.iter().map(|it| it.count).sum(),
            available: count_of(&by_status, "available"),
            in_use: count_of(&by_status, "in_use"),
            maintenance: count_of(&by_status, "maintenance"),
            out_of_service: count_of(&by_status, "out_of_service"),
            by_category: fill_counts(&EquipmentCategory::NAMES, by_category),
            by_condition: fill_counts(&EquipmentCondition::NAMES, by_condition),
            by_status,
        }
    }
}

pub async fn stats(
    State(equipment): State<EquipmentCollection>,
    _user: UserAccess,
) -> Result<Json<StatsResponse>, Error> {
    let by_status = equipment.count_by("status", None).await?;
    let by_category = equipment.count_by("category", None).await?;
    let by_condition = equipment.count_by("currentCondition", None).await?;

    Ok(Json(StatsResponse::new(by_status, by_category, by_condition)))
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use axum::{extract::Path, Json};
    use validator::Validate;

    use crate::{
        api::tests::{bootstrap, Bootstrap},
        error::Error,
        mongo_ext::GroupCount,
        util::{Patch, ValidJson},
    };

    use super::*;

    fn request(name: &str, category: EquipmentCategory) -> CreateRequest {
        CreateRequest {
            name: Some(name.to_string()),
            category: Some(category),
            ..Default::default()
        }
    }

    async fn create_equipment(bootstrap: &Bootstrap, request: CreateRequest) -> Equipment {
        let (_, Json(equipment)) = create(
            bootstrap.equipment_collection(),
            bootstrap.user_access(),
            ValidJson(request),
        )
        .await
        .unwrap();

        equipment
    }

    #[test]
    fn test_create_validation() {
        let errors = CreateRequest {
            name: Some("  ".to_string()),
            purchase_price: Some(-1.0),
            ..Default::default()
        }
        .validate()
        .unwrap_err();
        let errors = errors.field_errors();

        assert!(errors.contains_key("name"));
        assert!(errors.contains_key("category"));
        assert!(errors.contains_key("purchasePrice"));

        assert!(request("Treadmill", EquipmentCategory::Cardio)
            .validate()
            .is_ok());
    }

    #[test]
    fn test_update_validation() {
        let request: UpdateRequest =
            serde_json::from_str(r#"{ "status": null, "purchasePrice": -5 }"#).unwrap();
        let errors = request.validate().unwrap_err();
        assert!(errors.field_errors().contains_key("status"));
        assert!(errors.field_errors().contains_key("purchasePrice"));

        let request: UpdateRequest =
            serde_json::from_str(r#"{ "brand": null, "purchasePrice": 0 }"#).unwrap();
        assert!(request.validate().is_ok());
        assert_eq!(request.purchase_price, Patch::Value(0.0));
    }

    #[test]
    fn test_blank_text_patches() {
        assert_eq!(trimmed_patch(Patch::Value("  ".to_string())), Patch::Null);
        assert_eq!(
            trimmed_patch(Patch::Value(" SN-1 ".to_string())),
            Patch::Value("SN-1".to_string())
        );
        assert_eq!(trimmed_patch(Patch::Missing), Patch::Missing);

        assert_eq!(
            Patch::Value("  ".to_string()).map(trim),
            Patch::Value(String::new())
        );
    }

    #[test]
    fn test_stats_sum_to_total() {
        let stats = StatsResponse::new(
            vec![GroupCount::new("available", 2), GroupCount::new("maintenance", 1)],
            vec![GroupCount::new("cardio", 3)],
            vec![GroupCount::new("good", 2), GroupCount::new("poor", 1)],
        );

        assert_eq!(stats.total, 3);
        assert_eq!(stats.available, 2);
        assert_eq!(stats.in_use, 0);
        assert_eq!(stats.by_status.len(), EquipmentStatus::NAMES.len());
        assert_eq!(stats.by_category.len(), EquipmentCategory::NAMES.len());
        for list in [&stats.by_status, &stats.by_category, &stats.by_condition] {
            assert_eq!(list.iter().map(|it| it.count).sum::<i64>(), stats.total);
        }
    }

    #[tokio::test]
    #[ignore = "requires MongoDB"]
    async fn test_crud_and_stats() {
        let bootstrap = bootstrap().await;

        let treadmill = create_equipment(
            &bootstrap,
            CreateRequest {
                serial_number: Some(" SN-1 ".to_string()),
                purchase_price: Some(0.0),
                ..request(" Treadmill ", EquipmentCategory::Cardio)
            },
        )
        .await;
        assert_eq!(treadmill.name, "Treadmill");
        assert_eq!(treadmill.serial_number.as_deref(), Some("SN-1"));
        assert_eq!(treadmill.status, EquipmentStatus::Available);
        assert_eq!(treadmill.current_condition, EquipmentCondition::Good);

        create_equipment(&bootstrap, request("Bench", EquipmentCategory::Strength)).await;
        create_equipment(&bootstrap, request("Mat", EquipmentCategory::Flexibility)).await;

        let Json(updated) = update(
            bootstrap.equipment_collection(),
            bootstrap.user_access(),
            Path(treadmill.id.to_string()),
            ValidJson(UpdateRequest {
                status: Patch::Value(EquipmentStatus::Maintenance),
                maintenance_notes: Patch::Value(String::new()),
                ..Default::default()
            }),
        )
        .await
        .unwrap();
        assert_eq!(updated.status, EquipmentStatus::Maintenance);
        assert_eq!(updated.name, "Treadmill");

        let Json(updated) = update(
            bootstrap.equipment_collection(),
            bootstrap.user_access(),
            Path(treadmill.id.to_string()),
            ValidJson(UpdateRequest {
                brand: Patch::Value(String::new()),
                location: Patch::Value(" ".to_string()),
                serial_number: Patch::Value(String::new()),
                ..Default::default()
            }),
        )
        .await
        .unwrap();
        assert_eq!(updated.brand.as_deref(), Some(""));
        assert_eq!(updated.location.as_deref(), Some(""));
        assert_eq!(updated.serial_number, None);

        let Json(stats) = stats(bootstrap.equipment_collection(), bootstrap.user_access())
            .await
            .unwrap();
        assert_eq!(stats.total, 3);
        assert_eq!(stats.available, 2);
        assert_eq!(stats.maintenance, 1);
        for list in [&stats.by_status, &stats.by_category, &stats.by_condition] {
            assert_eq!(list.iter().map(|it| it.count).sum::<i64>(), 3);
        }

        let Json(response) = delete(
            bootstrap.equipment_collection(),
            bootstrap.user_access(),
            Path(treadmill.id.to_string()),
        )
        .await
        .unwrap();
        assert_eq!(response.message, "Equipment deleted successfully");

        let err = show(
            bootstrap.equipment_collection(),
            bootstrap.user_access(),
            Path(treadmill.id.to_string()),
        )
        .await
        .unwrap_err();
        assert_matches!(err, Error::NotFound("Equipment"));
    }

    #[tokio::test]
    #[ignore = "requires MongoDB"]
    async fn test_serial_number_unique() {
        let bootstrap = bootstrap().await;

        let serial = || CreateRequest {
            serial_number: Some("SN-42".to_string()),
            ..request("Rower", EquipmentCategory::Cardio)
        };

        create_equipment(&bootstrap, serial()).await;
        // equipment without a serial number never collides
        create_equipment(&bootstrap, request("Rope", EquipmentCategory::Accessories)).await;
        create_equipment(&bootstrap, request("Ball", EquipmentCategory::Accessories)).await;

        let err = create(
            bootstrap.equipment_collection(),
            bootstrap.user_access(),
            ValidJson(serial()),
        )
        .await
        .unwrap_err();
        assert_matches!(err, Error::MustUniqueError(field) if field == "serialNumber");
    }
}
