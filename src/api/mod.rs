pub mod auth;
pub mod equipment;
pub mod member;
pub mod payment;
pub mod report;
pub mod token;
pub mod workout;

use axum::{routing, Json, Router};
use serde::{Deserialize, Serialize};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::app::AppState;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct MessageResponse {
    pub message: String,
}

impl MessageResponse {
    pub fn new(message: &str) -> Self {
        Self {
            message: message.to_string(),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct HealthResponse {
    pub status: String,
    pub message: String,
}

pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        message: "Gym OS API is running".to_string(),
    })
}

pub fn router(state: AppState) -> Router {
    let api = Router::new()
        .nest(
            "/auth",
            Router::new()
                .route("/register", routing::post(auth::register))
                .route("/login", routing::post(auth::login))
                .route("/me", routing::get(auth::me))
                .route("/profile", routing::put(auth::update_profile)),
        )
        .nest(
            "/members",
            Router::new()
                .route("/", routing::get(member::index).post(member::create))
                .route(
                    "/:id",
                    routing::get(member::show)
                        .put(member::update)
                        .delete(member::delete),
                )
                .route(
                    "/:id/attendance",
                    routing::get(member::attendance).post(member::add_attendance),
                ),
        )
        .nest(
            "/equipment",
            Router::new()
                .route("/", routing::get(equipment::index).post(equipment::create))
                .route("/stats/summary", routing::get(equipment::stats))
                .route(
                    "/:id",
                    routing::get(equipment::show)
                        .put(equipment::update)
                        .delete(equipment::delete),
                ),
        )
        .nest(
            "/workouts",
            Router::new()
                .route("/", routing::get(workout::index).post(workout::create))
                .route(
                    "/:id",
                    routing::get(workout::show)
                        .put(workout::update)
                        .delete(workout::delete),
                )
                .route("/:id/assign/:member_id", routing::post(workout::assign)),
        )
        .nest(
            "/payments",
            Router::new()
                .route("/", routing::get(payment::index).post(payment::create))
                .route("/stats/summary", routing::get(payment::stats))
                .route(
                    "/:id",
                    routing::get(payment::show)
                        .put(payment::update)
                        .delete(payment::delete),
                ),
        )
        .nest(
            "/reports",
            Router::new()
                .route("/dashboard", routing::get(report::dashboard))
                .route("/members", routing::get(report::members_report))
                .route("/revenue", routing::get(report::revenue_report))
                .route("/attendance", routing::get(report::attendance_report)),
        )
        .route("/health", routing::get(health));

    Router::new()
        .nest("/api", api)
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

#[cfg(test)]
pub mod tests {
    use axum::{
        body::Body,
        extract::State,
        http::{header, Method, Request, StatusCode},
    };
    use bson::oid::ObjectId;
    use tower::ServiceExt;

    use crate::{app::AppState, config::Config, error::ErrorJson};

    use super::{
        auth::{create_user, CreateUserRequest, UserAccess, UserCollection, UserModel, UserRole},
        equipment::EquipmentCollection,
        member::MemberCollection,
        payment::PaymentCollection,
        token::{generate_access_token, generate_access_token_with_exp, JwtState},
        workout::WorkoutCollection,
        HealthResponse,
    };

    pub struct Bootstrap {
        user_model: UserModel,
        pub app_state: AppState,
    }

    impl Bootstrap {
        pub fn user_access(&self) -> UserAccess {
            let token =
                generate_access_token(&self.app_state.jwt_state, self.user_model.id).unwrap();

            UserAccess::from_token(&self.app_state.jwt_state, &token).unwrap()
        }

        pub fn user_id(&self) -> ObjectId {
            self.user_model.id
        }

        pub fn argon(&self) -> State<argon2::Argon2<'static>> {
            State(self.app_state.argon.clone())
        }

        pub fn jwt_state(&self) -> State<JwtState> {
            State(self.app_state.jwt_state.clone())
        }

        pub fn user_collection(&self) -> State<UserCollection> {
            State(self.app_state.user_collection.clone())
        }

        pub fn member_collection(&self) -> State<MemberCollection> {
            State(self.app_state.member_collection.clone())
        }

        pub fn equipment_collection(&self) -> State<EquipmentCollection> {
            State(self.app_state.equipment_collection.clone())
        }

        pub fn payment_collection(&self) -> State<PaymentCollection> {
            State(self.app_state.payment_collection.clone())
        }

        pub fn workout_collection(&self) -> State<WorkoutCollection> {
            State(self.app_state.workout_collection.clone())
        }

        /// Seeds another member-role user and returns its id.
        pub async fn create_user(&self, email: &str) -> ObjectId {
            create_user(
                self.app_state.user_collection.clone(),
                self.app_state.argon.clone(),
                CreateUserRequest {
                    name: "Member".to_string(),
                    email: email.to_string(),
                    password: "password".to_string(),
                    phone: None,
                    role: UserRole::Member,
                },
            )
            .await
            .unwrap()
            .id
        }
    }

    /// Fresh database with a seeded admin. Tests using it are `#[ignore]`d and need
    /// `MONGODB_URI`; run them with `cargo test -- --ignored`.
    pub async fn bootstrap() -> Bootstrap {
        dotenvy::dotenv().ok();
        let mongodb_uri = std::env::var("MONGODB_URI")
            .expect("MONGODB_URI must point at a MongoDB server for database tests");

        let database_name = format!("gym-test-{}", ObjectId::new());
        let app_state = AppState::new(&Config::for_database(&mongodb_uri, &database_name))
            .await
            .unwrap();
        app_state.run_migration().await.unwrap();

        let user_model = create_user(
            app_state.user_collection.clone(),
            app_state.argon.clone(),
            CreateUserRequest {
                name: "Admin".to_string(),
                email: "admin@example.com".to_string(),
                password: "password".to_string(),
                phone: None,
                role: UserRole::Admin,
            },
        )
        .await
        .unwrap();

        Bootstrap {
            user_model,
            app_state,
        }
    }

    /// State whose client never connects unless a handler reaches the database.
    pub async fn offline_state() -> AppState {
        AppState::new(&Config::for_database(
            "mongodb://127.0.0.1:27017",
            "gym-offline",
        ))
        .await
        .unwrap()
    }

    async fn send(request: Request<Body>) -> (StatusCode, Vec<u8>) {
        let app = super::router(offline_state().await);
        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let body = hyper::body::to_bytes(response.into_body()).await.unwrap();

        (status, body.to_vec())
    }

    fn json_request(uri: &str, token: Option<&str>, body: &str) -> Request<Body> {
        let mut builder = Request::builder()
            .method(Method::POST)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json");
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }

        builder.body(Body::from(body.to_string())).unwrap()
    }

    async fn token() -> String {
        let state = offline_state().await;
        generate_access_token(&state.jwt_state, ObjectId::new()).unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let (status, body) = send(
            Request::builder()
                .uri("/api/health")
                .body(Body::empty())
                .unwrap(),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        let health: HealthResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(health.status, "ok");
        assert_eq!(health.message, "Gym OS API is running");
    }

    #[tokio::test]
    async fn test_protected_routes_reject_missing_token() {
        for uri in [
            "/api/auth/me",
            "/api/members",
            "/api/equipment/stats/summary",
            "/api/reports/dashboard",
        ] {
            let (status, body) =
                send(Request::builder().uri(uri).body(Body::empty()).unwrap()).await;

            assert_eq!(status, StatusCode::UNAUTHORIZED, "{uri}");
            let error: ErrorJson = serde_json::from_slice(&body).unwrap();
            assert_eq!(error.r#type, "Unauthorized");
            assert_eq!(error.message, "No token, authorization denied");
        }
    }

    #[tokio::test]
    async fn test_rejects_invalid_and_expired_tokens() {
        let (status, body) = send(
            Request::builder()
                .uri("/api/payments")
                .header(header::AUTHORIZATION, "Bearer not-a-token")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        let error: ErrorJson = serde_json::from_slice(&body).unwrap();
        assert_eq!(error.message, "Token is not valid");

        let state = offline_state().await;
        let expired = generate_access_token_with_exp(&state.jwt_state, ObjectId::new(), 0).unwrap();
        let (status, body) = send(
            Request::builder()
                .uri("/api/workouts")
                .header(header::AUTHORIZATION, format!("Bearer {expired}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        let error: ErrorJson = serde_json::from_slice(&body).unwrap();
        assert_eq!(error.message, "Token has expired");
    }

    #[tokio::test]
    async fn test_member_create_requires_user_id() {
        let token = token().await;
        let (status, body) = send(json_request(
            "/api/members",
            Some(&token),
            r#"{ "membershipEndDate": "2099-01-01" }"#,
        ))
        .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        let error: ErrorJson = serde_json::from_slice(&body).unwrap();
        assert_eq!(error.r#type, "ValidationError");
        assert!(error.errors.unwrap().get("userId").is_some());
    }

    #[tokio::test]
    async fn test_malformed_body() {
        let token = token().await;
        let (status, body) = send(json_request("/api/equipment", Some(&token), "{")).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        let error: ErrorJson = serde_json::from_slice(&body).unwrap();
        assert_eq!(error.r#type, "MalformedBody");
    }

    #[tokio::test]
    async fn test_register_validation_needs_no_database() {
        let (status, body) = send(json_request(
            "/api/auth/register",
            None,
            r#"{ "name": "", "email": "nope", "password": "123" }"#,
        ))
        .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        let error: ErrorJson = serde_json::from_slice(&body).unwrap();
        let errors = error.errors.unwrap();
        assert!(errors.get("email").is_some());
        assert!(errors.get("password").is_some());
    }

    #[tokio::test]
    async fn test_missing_auth_fields_are_field_errors() {
        let (status, body) = send(json_request(
            "/api/auth/register",
            None,
            r#"{"email":"a@b.co","password":"secret1"}"#,
        ))
        .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        let error: ErrorJson = serde_json::from_slice(&body).unwrap();
        assert_eq!(error.r#type, "ValidationError");
        let errors = error.errors.unwrap();
        assert!(errors.get("name").is_some());
        assert!(errors.get("email").is_none());

        let (status, body) = send(json_request("/api/auth/login", None, "{}")).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        let error: ErrorJson = serde_json::from_slice(&body).unwrap();
        assert_eq!(error.r#type, "ValidationError");
        let errors = error.errors.unwrap();
        assert!(errors.get("email").is_some());
        assert!(errors.get("password").is_some());
    }
}
