//! Server configuration read from the process environment (and an optional `.env`).

type BoxError = Box<dyn std::error::Error + Send + Sync>;

const DEFAULT_MONGODB_URI: &str = "mongodb://localhost:27017/gym-os";
const DEFAULT_DATABASE: &str = "gym-os";
const DEVELOPMENT_JWT_SECRET: &str = "dev-jwt-secret-not-for-production";
const DEFAULT_JWT_EXPIRATION_DAYS: i64 = 30;
/// Ten years.
const MAX_JWT_EXPIRATION_DAYS: i64 = 3650;

#[derive(Debug, Clone)]
pub struct Config {
    pub mongodb_uri: String,
    /// Falls back to the database named in the URI, then `gym-os`.
    pub database_name: Option<String>,
    pub jwt_secret: String,
    pub jwt_expiration_days: i64,
    pub port: u16,
    /// development | staging | production
    pub environment: String,
}

impl Config {
    pub fn from_env() -> Result<Self, BoxError> {
        let environment = std::env::var("ENVIRONMENT").unwrap_or_else(|_| "development".into());

        Ok(Self {
            mongodb_uri: std::env::var("MONGODB_URI")
                .ok()
                .filter(|it| !it.is_empty())
                .unwrap_or_else(|| DEFAULT_MONGODB_URI.to_string()),
            database_name: std::env::var("MONGODB_DATABASE")
                .ok()
                .filter(|it| !it.is_empty()),
            jwt_secret: Self::require_secret("JWT_SECRET", &environment)?,
            jwt_expiration_days: Self::expiration_days(
                std::env::var("JWT_EXPIRATION_DAYS").ok().as_deref(),
            )?,
            port: std::env::var("PORT")
                .ok()
                .and_then(|it| it.parse().ok())
                .unwrap_or(5000),
            environment,
        })
    }

    /// Secrets may only fall back to a built-in value while developing.
    fn require_secret(name: &str, environment: &str) -> Result<String, BoxError> {
        match std::env::var(name) {
            Ok(value) if !value.is_empty() => Ok(value),
            _ if environment == "development" => {
                tracing::warn!("{name} is not set, using an insecure development secret");
                Ok(DEVELOPMENT_JWT_SECRET.to_string())
            }
            _ => Err(format!("{name} must be set in {environment} environment").into()),
        }
    }

    /// Token lifetime in whole days, within `1..=3650`. Unset or blank means the default.
    fn expiration_days(raw: Option<&str>) -> Result<i64, BoxError> {
        let Some(raw) = raw.map(str::trim).filter(|it| !it.is_empty()) else {
            return Ok(DEFAULT_JWT_EXPIRATION_DAYS);
        };

        match raw.parse::<i64>() {
            Ok(days) if (1..=MAX_JWT_EXPIRATION_DAYS).contains(&days) => Ok(days),
            _ => Err(format!(
                "JWT_EXPIRATION_DAYS must be a whole number of days between 1 and {MAX_JWT_EXPIRATION_DAYS}, got {raw:?}"
            )
            .into()),
        }
    }

    /// Configuration for tests and local tooling that never reads the environment.
    pub fn for_database(mongodb_uri: &str, database_name: &str) -> Self {
        Self {
            mongodb_uri: mongodb_uri.to_string(),
            database_name: Some(database_name.to_string()),
            jwt_secret: DEVELOPMENT_JWT_SECRET.to_string(),
            jwt_expiration_days: DEFAULT_JWT_EXPIRATION_DAYS,
            port: 5000,
            environment: "development".to_string(),
        }
    }

    pub fn default_database() -> &'static str {
        DEFAULT_DATABASE
    }
}

#[cfg(test)]
mod tests {
    use super::Config;

    #[test]
    fn test_secret_fallback_only_in_development() {
        // Uses a variable name nothing else sets.
        let name = "GYM_TEST_UNSET_SECRET";

        assert_eq!(
            Config::require_secret(name, "development").unwrap(),
            super::DEVELOPMENT_JWT_SECRET
        );
        assert!(Config::require_secret(name, "production").is_err());
    }

    #[test]
    fn test_expiration_days_range() {
        assert_eq!(Config::expiration_days(None).unwrap(), 30);
        assert_eq!(Config::expiration_days(Some(" ")).unwrap(), 30);
        assert_eq!(Config::expiration_days(Some("7")).unwrap(), 7);
        assert_eq!(Config::expiration_days(Some("3650")).unwrap(), 3650);

        for raw in ["0", "-1", "3651", "9223372036854775807", "seven"] {
            assert!(Config::expiration_days(Some(raw)).is_err(), "{raw} accepted");
        }
    }

    #[test]
    fn test_for_database() {
        let config = Config::for_database("mongodb://127.0.0.1:27017", "gym-test");

        assert_eq!(config.database_name.as_deref(), Some("gym-test"));
        assert_eq!(config.jwt_expiration_days, 30);
    }
}
