use std::env;
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),
    #[error("Invalid value for {key}: {value}")]
    Invalid { key: &'static str, value: String },
}

#[derive(Clone, Debug)]
pub struct Config {
    pub mongo_uri: String,
    pub database_name: String,
    pub jwt_secret: String,
    pub jwt_ttl_hours: i64,
    pub bind_addr: String,
    pub frontend_origin: String,
    /// Shared key that unlocks the maintenance dashboard after login.
    pub maintenance_key: String,
    /// Base URL of the external reset function, if one is deployed.
    pub reset_service_url: Option<String>,
    pub bcrypt_cost: u32,
    pub admin_email: Option<String>,
    pub admin_password: Option<String>,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenv::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(get: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |key: &'static str| {
            get(key)
                .filter(|v| !v.trim().is_empty())
                .ok_or(ConfigError::Missing(key))
        };
        let optional = |key: &str| get(key).filter(|v| !v.trim().is_empty());

        let jwt_ttl_hours = match optional("JWT_TTL_HOURS") {
            Some(raw) => raw
                .parse::<i64>()
                .ok()
                .filter(|h| *h > 0)
                .ok_or(ConfigError::Invalid { key: "JWT_TTL_HOURS", value: raw })?,
            None => 24,
        };
        let bcrypt_cost = match optional("BCRYPT_COST") {
            Some(raw) => raw
                .parse::<u32>()
                .ok()
                .filter(|c| (4..=31).contains(c))
                .ok_or(ConfigError::Invalid { key: "BCRYPT_COST", value: raw })?,
            None => 10,
        };

        Ok(Self {
            mongo_uri: required("MONGO_URI")?,
            database_name: optional("DATABASE_NAME").unwrap_or_else(|| "complaint_portal".to_string()),
            jwt_secret: required("JWT_SECRET")?,
            jwt_ttl_hours,
            bind_addr: optional("BIND_ADDR").unwrap_or_else(|| "0.0.0.0:8080".to_string()),
            frontend_origin: optional("FRONTEND_ORIGIN")
                .unwrap_or_else(|| "http://localhost:3000".to_string()),
            maintenance_key: required("MAINTENANCE_KEY")?,
            reset_service_url: optional("RESET_SERVICE_URL"),
            bcrypt_cost,
            admin_email: optional("ADMIN_EMAIL").map(|e| e.trim().to_lowercase()),
            admin_password: optional("ADMIN_PASSWORD"),
        })
    }
}

#[cfg(test)]
pub fn test_config() -> Config {
    Config {
        mongo_uri: "mongodb://127.0.0.1:27017".to_string(),
        database_name: "complaint_portal_test".to_string(),
        jwt_secret: "test-secret".to_string(),
        jwt_ttl_hours: 1,
        bind_addr: "127.0.0.1:0".to_string(),
        frontend_origin: "http://localhost:3000".to_string(),
        maintenance_key: "open-sesame".to_string(),
        reset_service_url: None,
        bcrypt_cost: 4,
        admin_email: None,
        admin_password: None,
    }
}
