use axum::extract::FromRef;

use crate::{
    api::{
        auth::UserCollection,
        equipment::EquipmentCollection,
        member::MemberCollection,
        payment::PaymentCollection,
        token::JwtState,
        workout::WorkoutCollection,
    },
    config::Config,
    migrate::MigrationCollection,
};

#[derive(FromRef, Clone)]
pub struct AppState {
    pub argon: argon2::Argon2<'static>,
    pub jwt_state: JwtState,

    pub migrate_collection: MigrationCollection,
    pub user_collection: UserCollection,
    pub member_collection: MemberCollection,
    pub equipment_collection: EquipmentCollection,
    pub payment_collection: PaymentCollection,
    pub workout_collection: WorkoutCollection,
}

impl AppState {
    /// Builds the state without touching the server; the driver connects on first use.
    pub async fn new(config: &Config) -> Result<Self, Box<dyn std::error::Error + Send + Sync>> {
        let argon = argon2::Argon2::default();
        let jwt_state = JwtState::new(&config.jwt_secret, config.jwt_expiration_days);

        let mongo_client_opt = mongodb::options::ClientOptions::parse(&config.mongodb_uri).await?;
        let database_name = config
            .database_name
            .clone()
            .or_else(|| mongo_client_opt.default_database.clone())
            .unwrap_or_else(|| Config::default_database().to_string());
        let mongo_client = mongodb::Client::with_options(mongo_client_opt)?;

        tracing::debug!("using database {}", database_name);
        let db = mongo_client.database(&database_name);
        Ok(Self {
            argon,
            jwt_state,

            migrate_collection: MigrationCollection(db.collection("migrations").into()),
            user_collection: UserCollection(db.collection("users").into()),
            member_collection: MemberCollection(db.collection("members").into()),
            equipment_collection: EquipmentCollection(db.collection("equipment").into()),
            payment_collection: PaymentCollection(db.collection("payments").into()),
            workout_collection: WorkoutCollection(db.collection("workouts").into()),
        })
    }
}

#[cfg(test)]
mod tests {
    use crate::config::Config;

    use super::AppState;

    #[tokio::test]
    async fn test_database_name_falls_back_to_uri() {
        let config = Config {
            database_name: None,
            ..Config::for_database("mongodb://127.0.0.1:27017/gym-from-uri", "unused")
        };
        let state = AppState::new(&config).await.unwrap();
        assert_eq!(state.user_collection.namespace().db, "gym-from-uri");
        assert_eq!(state.member_collection.namespace().coll, "members");

        let config = Config::for_database("mongodb://127.0.0.1:27017/gym-from-uri", "gym-named");
        let state = AppState::new(&config).await.unwrap();
        assert_eq!(state.workout_collection.namespace().db, "gym-named");
    }
}
