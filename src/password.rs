// src/password.rs
//
// Password change and the email + date-of-birth recovery helpers.

use actix_web::{http::StatusCode, web, HttpRequest, HttpResponse};
use log::{error, info, warn};
use mongodb::bson::doc;
use rand::RngCore;
use serde::Deserialize;
use serde_json::Value;

use crate::app_state::AppState;
use crate::auth::{current_user, hash_password, load_user, normalize_email, normalize_new_password, verify_password};
use crate::error::ApiError;

const UPSTREAM_SNIPPET_LEN: usize = 200;

#[derive(Debug, Deserialize)]
pub struct ChangePasswordRequest {
    pub email: Option<String>,
    #[serde(default, alias = "currentPassword")]
    pub current_password: String,
    #[serde(default, alias = "newPassword")]
    pub new_password: String,
}

#[derive(Debug, Deserialize)]
pub struct IdentityRequest {
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub dob: String,
}

#[derive(Debug, Deserialize)]
pub struct UpdatePasswordRequest {
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub dob: String,
    #[serde(default, alias = "newPassword")]
    pub new_password: String,
}

/// POST /api/change-password
pub async fn change_password(
    req: HttpRequest,
    data: web::Data<AppState>,
    payload: web::Json<ChangePasswordRequest>,
) -> Result<HttpResponse, ApiError> {
    let caller = current_user(&req)?;
    if payload.current_password.trim().is_empty() || payload.new_password.trim().is_empty() {
        return Err(ApiError::bad_request("Current password and new password are required"));
    }
    let new_password = normalize_new_password(&payload.new_password)?;

    let user = load_user(&data, &caller.user_id).await?;
    if let Some(email) = &payload.email {
        if normalize_email(email) != user.email {
            return Err(ApiError::forbidden("You can only change your own password"));
        }
    }

    if !verify_password(payload.current_password.trim().to_string(), user.password.clone()).await? {
        warn!("Wrong current password for {}", user.user_id);
        return Err(ApiError::unauthorized("Current password is incorrect"));
    }

    let hashed = hash_password(new_password, data.config.bcrypt_cost).await?;
    data.mongodb
        .users()
        .update_one(doc! { "user_id": &user.user_id }, doc! { "$set": { "password": hashed } })
        .await?;
    info!("Password changed for {}", user.user_id);
    Ok(HttpResponse::Ok().json(serde_json::json!({ "message": "Password changed successfully" })))
}

fn identity_filter(email: &str, dob: &str) -> Result<mongodb::bson::Document, ApiError> {
    let email = normalize_email(email);
    let dob = dob.trim();
    if email.is_empty() || dob.is_empty() {
        return Err(ApiError::bad_request("Email and Date of Birth are required"));
    }
    Ok(doc! { "email": email, "dob": dob })
}

/// POST /api/verify-user
pub async fn verify_user(
    data: web::Data<AppState>,
    payload: web::Json<IdentityRequest>,
) -> Result<HttpResponse, ApiError> {
    let filter = identity_filter(&payload.email, &payload.dob)?;
    match data.mongodb.users().find_one(filter).await? {
        Some(_) => Ok(HttpResponse::Ok().json(serde_json::json!({ "message": "User verified successfully." }))),
        None => Err(ApiError::not_found("User not found.")),
    }
}

/// 16 hex characters from 8 random bytes.
pub fn generate_temporary_password() -> String {
    let mut bytes = [0u8; 8];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// POST /api/forgot-password
/// Issues a temporary password. Only its hash is stored.
pub async fn forgot_password(
    data: web::Data<AppState>,
    payload: web::Json<IdentityRequest>,
) -> Result<HttpResponse, ApiError> {
    let filter = identity_filter(&payload.email, &payload.dob)?;
    let users = data.mongodb.users();
    let user = users
        .find_one(filter)
        .await?
        .ok_or_else(|| ApiError::not_found("User not found or Date of Birth does not match"))?;

    let new_password = generate_temporary_password();
    let hashed = hash_password(new_password.clone(), data.config.bcrypt_cost).await?;
    users
        .update_one(doc! { "user_id": &user.user_id }, doc! { "$set": { "password": hashed } })
        .await?;
    info!("Temporary password issued for {}", user.user_id);

    Ok(HttpResponse::Ok().json(serde_json::json!({
        "message": format!("Password reset successful. Your new password is: {}", new_password),
        "new_password": new_password,
    })))
}

/// POST /api/update-password
pub async fn update_password(
    data: web::Data<AppState>,
    payload: web::Json<UpdatePasswordRequest>,
) -> Result<HttpResponse, ApiError> {
    let filter = identity_filter(&payload.email, &payload.dob)?;
    if payload.new_password.trim().is_empty() {
        return Err(ApiError::bad_request("New password is required"));
    }
    let new_password = normalize_new_password(&payload.new_password)?;

    let users = data.mongodb.users();
    let user = users
        .find_one(filter)
        .await?
        .ok_or_else(|| ApiError::not_found("User not found."))?;

    let hashed = hash_password(new_password, data.config.bcrypt_cost).await?;
    users
        .update_one(doc! { "user_id": &user.user_id }, doc! { "$set": { "password": hashed } })
        .await?;
    info!("Password updated through recovery for {}", user.user_id);
    Ok(HttpResponse::Ok().json(serde_json::json!({ "message": "Password updated successfully. Please log in." })))
}

/// Maps an upstream reply onto the status and JSON body we hand back.
pub fn interpret_upstream(status: u16, body: &str) -> Result<(StatusCode, Value), ApiError> {
    let parsed: Value = serde_json::from_str(body).map_err(|e| {
        error!("Reset service returned non-JSON body: {}", e);
        ApiError::InvalidUpstream(body.chars().take(UPSTREAM_SNIPPET_LEN).collect())
    })?;
    let status = StatusCode::from_u16(status).unwrap_or(StatusCode::BAD_GATEWAY);
    if status.is_success() {
        Ok((StatusCode::OK, parsed))
    } else {
        Ok((status, parsed))
    }
}

/// POST /api/reset-password-with-verification
/// Forwards the body to the external reset function.
pub async fn reset_password_with_verification(
    data: web::Data<AppState>,
    payload: web::Json<Value>,
) -> Result<HttpResponse, ApiError> {
    let base = data
        .config
        .reset_service_url
        .as_deref()
        .ok_or_else(|| ApiError::BadGateway("Password reset service is not configured".to_string()))?;
    let url = format!("{}/resetPasswordWithVerification", base.trim_end_matches('/'));

    let resp = data
        .http_client
        .post(&url)
        .json(&payload.into_inner())
        .send()
        .await
        .map_err(|e| {
            error!("Reset service unreachable: {}", e);
            ApiError::BadGateway("Password reset service is unreachable".to_string())
        })?;
    let status = resp.status().as_u16();
    let body = resp.text().await.map_err(|e| {
        error!("Failed to read reset service response: {}", e);
        ApiError::BadGateway("Password reset service sent an unreadable response".to_string())
    })?;
    info!("Reset service answered with status {}", status);

    let (status, json) = interpret_upstream(status, &body)?;
    Ok(HttpResponse::build(status).json(json))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app_state::test_state;
    use actix_web::{test as actix_test, App};

    #[test]
    fn temporary_passwords_are_sixteen_hex_chars() {
        let a = generate_temporary_password();
        let b = generate_temporary_password();
        assert_eq!(a.len(), 16);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, b);
    }

    #[test]
    fn identity_filter_requires_both_fields() {
        assert!(identity_filter("a@gmail.com", "").is_err());
        assert!(identity_filter("  ", "2001-01-01").is_err());
        let filter = identity_filter(" A@Gmail.com ", "2001-01-01").unwrap();
        assert_eq!(filter.get_str("email").unwrap(), "a@gmail.com");
    }

    #[test]
    fn password_bodies_accept_camel_case_fields() {
        let change: ChangePasswordRequest = serde_json::from_value(serde_json::json!({
            "email": "a@gmail.com",
            "currentPassword": "old-one",
            "newPassword": "new-one",
        }))
        .unwrap();
        assert_eq!(change.current_password, "old-one");
        assert_eq!(change.new_password, "new-one");

        let update: UpdatePasswordRequest = serde_json::from_value(serde_json::json!({
            "email": "a@gmail.com",
            "dob": "2001-01-01",
            "newPassword": "fresh-one",
        }))
        .unwrap();
        assert_eq!(update.new_password, "fresh-one");

        let snake: ChangePasswordRequest = serde_json::from_value(serde_json::json!({
            "current_password": "x",
            "new_password": "yyyyyy",
        }))
        .unwrap();
        assert_eq!(snake.new_password, "yyyyyy");
    }

    #[test]
    fn upstream_success_becomes_ok() {
        let (status, json) = interpret_upstream(201, r#"{"ok":true}"#).unwrap();
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["ok"], true);
    }

    #[test]
    fn upstream_errors_are_mirrored() {
        let (status, json) = interpret_upstream(403, r#"{"error":"Verification failed"}"#).unwrap();
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(json["error"], "Verification failed");
    }

    #[test]
    fn non_json_upstream_is_truncated() {
        let body = "<html>".repeat(100);
        match interpret_upstream(200, &body) {
            Err(ApiError::InvalidUpstream(snippet)) => assert_eq!(snippet.chars().count(), 200),
            other => panic!("unexpected: {:?}", other.map(|(s, _)| s)),
        }
    }

    #[actix_web::test]
    async fn proxy_without_configured_service_is_bad_gateway() {
        let app = actix_test::init_service(
            App::new()
                .app_data(web::Data::new(test_state().await))
                .route("/reset", web::post().to(reset_password_with_verification)),
        )
        .await;
        let req = actix_test::TestRequest::post()
            .uri("/reset")
            .set_json(serde_json::json!({ "email": "a@gmail.com" }))
            .to_request();
        let resp = actix_test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_GATEWAY);
    }

    #[actix_web::test]
    async fn forgot_password_validates_before_lookup() {
        let app = actix_test::init_service(
            App::new()
                .app_data(web::Data::new(test_state().await))
                .route("/forgot", web::post().to(forgot_password)),
        )
        .await;
        let req = actix_test::TestRequest::post()
            .uri("/forgot")
            .set_json(serde_json::json!({ "email": "a@gmail.com" }))
            .to_request();
        let resp = actix_test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[actix_web::test]
    async fn change_password_needs_a_caller() {
        let app = actix_test::init_service(
            App::new()
                .app_data(web::Data::new(test_state().await))
                .route("/change", web::post().to(change_password)),
        )
        .await;
        let req = actix_test::TestRequest::post()
            .uri("/change")
            .set_json(serde_json::json!({ "current_password": "a", "new_password": "bbbbbb" }))
            .to_request();
        let resp = actix_test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }
}
