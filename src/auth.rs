// src/auth.rs

use actix_web::{web, HttpMessage, HttpRequest, HttpResponse};
use bcrypt::{hash, verify};
use chrono::{Duration, NaiveDate, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use log::{error, info, warn};
use mongodb::bson::doc;
use regex::Regex;
use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;
use uuid::Uuid;

use crate::app_state::AppState;
use crate::config::Config;
use crate::db::MongoDB;
use crate::error::ApiError;
use crate::models::{PublicUser, Role, User};

pub const MIN_PASSWORD_LEN: usize = 6;

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub role: Role,
    /// Maintenance key verified for this session.
    #[serde(default)]
    pub mv: bool,
    pub exp: usize,
}

/// Identity the middleware attaches to each request carrying a valid token.
#[derive(Debug, Clone, PartialEq)]
pub struct AuthUser {
    pub user_id: String,
    pub role: Role,
    pub maintenance_verified: bool,
}

impl From<Claims> for AuthUser {
    fn from(c: Claims) -> Self {
        Self {
            user_id: c.sub,
            role: c.role,
            maintenance_verified: c.mv,
        }
    }
}

impl AuthUser {
    pub fn require_role(&self, allowed: &[Role]) -> Result<(), ApiError> {
        if allowed.contains(&self.role) {
            Ok(())
        } else {
            Err(ApiError::forbidden("You do not have access to this action"))
        }
    }
}

pub fn create_jwt(user_id: &str, role: Role, maintenance_verified: bool, config: &Config) -> Result<String, ApiError> {
    let expiration = Utc::now() + Duration::hours(config.jwt_ttl_hours);
    let claims = Claims {
        sub: user_id.to_string(),
        role,
        mv: maintenance_verified,
        exp: expiration.timestamp() as usize,
    };
    Ok(encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(config.jwt_secret.as_ref()),
    )?)
}

pub fn validate_jwt(token: &str, secret: &str) -> Result<Claims, jsonwebtoken::errors::Error> {
    let token_data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_ref()),
        &Validation::default(),
    )?;
    Ok(token_data.claims)
}

/// The caller attached by the authentication middleware.
pub fn current_user(req: &HttpRequest) -> Result<AuthUser, ApiError> {
    req.extensions()
        .get::<AuthUser>()
        .cloned()
        .ok_or_else(|| ApiError::unauthorized("Unauthorized"))
}

pub async fn load_user(data: &AppState, user_id: &str) -> Result<User, ApiError> {
    data.mongodb
        .users()
        .find_one(doc! { "user_id": user_id })
        .await?
        .ok_or_else(|| ApiError::not_found("User not found"))
}

pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/* -------------------------------------------------------------------------- */
/* Passwords                                                                  */
/* -------------------------------------------------------------------------- */

pub fn is_bcrypt_hash(stored: &str) -> bool {
    ["$2a$", "$2b$", "$2y$"].iter().any(|p| stored.starts_with(p))
}

/// Trimmed new password, or a 400 when it is too short.
pub fn normalize_new_password(raw: &str) -> Result<String, ApiError> {
    let trimmed = raw.trim();
    if trimmed.chars().count() < MIN_PASSWORD_LEN {
        return Err(ApiError::bad_request(format!(
            "Password must be at least {} characters long",
            MIN_PASSWORD_LEN
        )));
    }
    Ok(trimmed.to_string())
}

/// Compares shared secrets without short-circuiting on the first mismatch.
pub fn secrets_match(candidate: &str, expected: &str) -> bool {
    candidate.as_bytes().ct_eq(expected.as_bytes()).into()
}

pub async fn hash_password(password: String, cost: u32) -> Result<String, ApiError> {
    web::block(move || hash(password, cost))
        .await
        .map_err(|e| ApiError::Internal(format!("hashing task failed: {}", e)))?
        .map_err(ApiError::from)
}

/// Checks a candidate against a stored bcrypt hash, or against a legacy
/// plaintext value for records created before hashing was enforced.
pub async fn verify_password(candidate: String, stored: String) -> Result<bool, ApiError> {
    if stored.is_empty() {
        return Ok(false);
    }
    if !is_bcrypt_hash(&stored) {
        return Ok(secrets_match(&candidate, &stored));
    }
    web::block(move || verify(candidate, &stored))
        .await
        .map_err(|e| ApiError::Internal(format!("verification task failed: {}", e)))?
        .map_err(ApiError::from)
}

/* -------------------------------------------------------------------------- */
/* Signup                                                                     */
/* -------------------------------------------------------------------------- */

#[derive(Debug, Deserialize)]
pub struct SignupRequest {
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub dob: String,
    pub department: Option<String>,
    pub category: Option<String>,
}

#[derive(Debug, PartialEq)]
pub struct NewAccount {
    pub email: String,
    pub password: String,
    pub name: String,
    pub role: Role,
    pub dob: String,
    pub department: Option<String>,
    pub category: Option<String>,
}

fn matches_domain(email: &str, domain: &str) -> Result<bool, ApiError> {
    let pattern = format!(r"^[a-zA-Z0-9._%+-]+@{}$", regex::escape(domain));
    let re = Regex::new(&pattern).map_err(|e| ApiError::Internal(e.to_string()))?;
    Ok(re.is_match(email))
}

pub fn validate_signup(req: &SignupRequest) -> Result<NewAccount, ApiError> {
    let email = normalize_email(&req.email);
    if email.is_empty() || req.password.trim().is_empty() {
        return Err(ApiError::bad_request("Email and Password are required."));
    }
    let dob = req.dob.trim();
    if dob.is_empty() {
        return Err(ApiError::bad_request("Date of Birth is required."));
    }
    if NaiveDate::parse_from_str(dob, "%Y-%m-%d").is_err() {
        return Err(ApiError::bad_request("Date of Birth must be in YYYY-MM-DD format."));
    }

    let role: Role = req
        .role
        .as_deref()
        .unwrap_or("student")
        .parse()
        .map_err(ApiError::BadRequest)?;
    if !role.can_self_register() {
        return Err(ApiError::forbidden("Admin accounts cannot be self-registered."));
    }

    if let Some(domain) = role.email_domain() {
        if !matches_domain(&email, domain)? {
            return Err(ApiError::bad_request(format!(
                "Please sign up with your official {} email ending with @{}",
                role, domain
            )));
        }
    }

    let category = req
        .category
        .as_deref()
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .map(str::to_string);
    if role == Role::Supervisor && category.is_none() {
        return Err(ApiError::bad_request("Please select a category for supervisor role."));
    }

    let password = normalize_new_password(&req.password)?;

    let department = if role == Role::Student {
        req.department
            .as_deref()
            .map(str::trim)
            .filter(|d| !d.is_empty())
            .map(str::to_string)
    } else {
        None
    };

    Ok(NewAccount {
        email,
        password,
        name: req.name.trim().to_string(),
        role,
        dob: dob.to_string(),
        department,
        category: if role == Role::Supervisor { category } else { None },
    })
}

/// POST /api/signup
pub async fn signup(
    data: web::Data<AppState>,
    payload: web::Json<SignupRequest>,
) -> Result<HttpResponse, ApiError> {
    let account = validate_signup(&payload)?;
    let users = data.mongodb.users();

    if users.find_one(doc! { "email": &account.email }).await?.is_some() {
        return Err(ApiError::Conflict("Email already registered.".to_string()));
    }

    let password = hash_password(account.password, data.config.bcrypt_cost).await?;
    let new_user = User {
        user_id: Uuid::new_v4().to_string(),
        email: account.email,
        role: account.role,
        name: account.name,
        dob: account.dob,
        department: account.department,
        category: account.category,
        profile_image_url: None,
        password,
        created_at: Utc::now(),
    };

    if let Err(e) = users.insert_one(&new_user).await {
        // The unique index catches a concurrent signup with the same email.
        if is_duplicate_key(&e) {
            return Err(ApiError::Conflict("Email already registered.".to_string()));
        }
        return Err(e.into());
    }
    info!("User created: {} ({})", new_user.user_id, new_user.role);
    Ok(HttpResponse::Created().json(PublicUser::from(new_user)))
}

fn is_duplicate_key(e: &mongodb::error::Error) -> bool {
    use mongodb::error::{ErrorKind, WriteFailure};
    matches!(
        e.kind.as_ref(),
        ErrorKind::Write(WriteFailure::WriteError(we)) if we.code == 11000
    )
}

/* -------------------------------------------------------------------------- */
/* Login                                                                      */
/* -------------------------------------------------------------------------- */

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct LoginUser {
    #[serde(flatten)]
    pub profile: PublicUser,
    pub uid: String,
    pub redirect: &'static str,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub ok: bool,
    pub message: &'static str,
    pub token: String,
    pub user: LoginUser,
}

/// POST /api/login
pub async fn login(
    data: web::Data<AppState>,
    payload: web::Json<LoginRequest>,
) -> Result<HttpResponse, ApiError> {
    let email = normalize_email(&payload.email);
    let password = payload.password.trim().to_string();
    if email.is_empty() || password.is_empty() {
        return Err(ApiError::bad_request("Email and password are required"));
    }

    let users = data.mongodb.users();
    let user = match users.find_one(doc! { "email": &email }).await? {
        Some(u) => u,
        None => {
            warn!("Login attempt for unknown email");
            return Err(ApiError::unauthorized("Invalid credentials"));
        }
    };

    let legacy = !is_bcrypt_hash(&user.password);
    if !verify_password(password.clone(), user.password.clone()).await? {
        warn!("Failed login for user {}", user.user_id);
        return Err(ApiError::unauthorized("Invalid credentials"));
    }

    if legacy {
        // Upgrade plaintext records in place; a failure here must not block login.
        match hash_password(password, data.config.bcrypt_cost).await {
            Ok(hashed) => {
                if let Err(e) = users
                    .update_one(doc! { "user_id": &user.user_id }, doc! { "$set": { "password": hashed } })
                    .await
                {
                    error!("Failed to upgrade legacy password for {}: {}", user.user_id, e);
                } else {
                    info!("Upgraded legacy password for {}", user.user_id);
                }
            }
            Err(e) => error!("Failed to hash legacy password for {}: {}", user.user_id, e),
        }
    }

    let token = create_jwt(&user.user_id, user.role, false, &data.config)?;
    let redirect = user.role.dashboard_path();
    let uid = user.user_id.clone();
    info!("User {} logged in as {}", uid, user.role);
    Ok(HttpResponse::Ok().json(LoginResponse {
        ok: true,
        message: "Login successful",
        token,
        user: LoginUser {
            profile: PublicUser::from(user),
            uid,
            redirect,
        },
    }))
}

/* -------------------------------------------------------------------------- */
/* Maintenance gate                                                           */
/* -------------------------------------------------------------------------- */

#[derive(Debug, Deserialize)]
pub struct MaintenanceKeyRequest {
    #[serde(default)]
    pub key: String,
}

/// POST /api/maintenance/verify
/// Exchanges a maintenance session for one that may act on complaints.
pub async fn verify_maintenance_key(
    req: HttpRequest,
    data: web::Data<AppState>,
    payload: web::Json<MaintenanceKeyRequest>,
) -> Result<HttpResponse, ApiError> {
    let caller = current_user(&req)?;
    caller.require_role(&[Role::Maintenance])?;

    if !secrets_match(&payload.key, &data.config.maintenance_key) {
        warn!("Invalid maintenance key from {}", caller.user_id);
        return Err(ApiError::unauthorized("Invalid maintenance key"));
    }

    let token = create_jwt(&caller.user_id, Role::Maintenance, true, &data.config)?;
    Ok(HttpResponse::Ok().json(serde_json::json!({
        "token": token,
        "redirect": Role::Maintenance.dashboard_path(),
    })))
}

/// Creates the configured bootstrap admin if that email is not registered yet.
pub async fn ensure_admin(mongodb: &MongoDB, config: &Config) -> Result<(), ApiError> {
    let (Some(email), Some(password)) = (&config.admin_email, &config.admin_password) else {
        return Ok(());
    };
    let users = mongodb.users();
    if users.find_one(doc! { "email": email }).await?.is_some() {
        return Ok(());
    }
    let password = normalize_new_password(password)?;
    let admin = User {
        user_id: Uuid::new_v4().to_string(),
        email: email.clone(),
        role: Role::Admin,
        name: "Administrator".to_string(),
        dob: String::new(),
        department: None,
        category: None,
        profile_image_url: None,
        password: hash_password(password, config.bcrypt_cost).await?,
        created_at: Utc::now(),
    };
    users.insert_one(&admin).await?;
    info!("Bootstrap admin {} created", admin.email);
    Ok(())
}
