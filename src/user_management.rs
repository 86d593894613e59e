use actix_web::{web, HttpRequest, HttpResponse};
use chrono::NaiveDate;
use futures_util::StreamExt;
use log::{error, info};
use mongodb::bson::{doc, Document};
use serde::Deserialize;

use crate::app_state::AppState;
use crate::auth::{current_user, load_user};
use crate::error::ApiError;
use crate::models::{PublicUser, Role, User};

#[derive(Debug, Deserialize)]
pub struct UpdateProfileRequest {
    pub name: Option<String>,
    pub department: Option<String>,
    pub profile_image_url: Option<String>,
    pub dob: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UsersQuery {
    pub role: Option<String>,
}

/// GET /api/users/me
pub async fn get_me(req: HttpRequest, data: web::Data<AppState>) -> Result<HttpResponse, ApiError> {
    let caller = current_user(&req)?;
    let user = load_user(&data, &caller.user_id).await?;
    Ok(HttpResponse::Ok().json(PublicUser::from(user)))
}

/// Builds the `$set` document for a profile edit. Department only applies
/// to students.
pub fn profile_update(role: Role, payload: &UpdateProfileRequest) -> Result<Document, ApiError> {
    let mut update_doc = doc! {};
    if let Some(name) = &payload.name {
        let name = name.trim();
        if name.is_empty() {
            return Err(ApiError::bad_request("Name cannot be empty"));
        }
        update_doc.insert("name", name);
    }
    if let Some(department) = &payload.department {
        if role != Role::Student {
            return Err(ApiError::bad_request("Only students have a department"));
        }
        update_doc.insert("department", department.trim());
    }
    if let Some(url) = &payload.profile_image_url {
        update_doc.insert("profile_image_url", url.trim());
    }
    if let Some(dob) = &payload.dob {
        let dob = dob.trim();
        if NaiveDate::parse_from_str(dob, "%Y-%m-%d").is_err() {
            return Err(ApiError::bad_request("Date of Birth must be in YYYY-MM-DD format."));
        }
        update_doc.insert("dob", dob);
    }
    if update_doc.is_empty() {
        return Err(ApiError::bad_request("No fields to update"));
    }
    Ok(update_doc)
}

/// PUT /api/users/me
pub async fn update_me(
    req: HttpRequest,
    data: web::Data<AppState>,
    payload: web::Json<UpdateProfileRequest>,
) -> Result<HttpResponse, ApiError> {
    let caller = current_user(&req)?;
    let update_doc = profile_update(caller.role, &payload)?;

    let users = data.mongodb.users();
    let res = users
        .update_one(doc! { "user_id": &caller.user_id }, doc! { "$set": update_doc })
        .await?;
    if res.matched_count == 0 {
        return Err(ApiError::not_found("User not found"));
    }
    info!("Profile updated for {}", caller.user_id);

    let user = load_user(&data, &caller.user_id).await?;
    Ok(HttpResponse::Ok().json(PublicUser::from(user)))
}

/// GET /api/users?role=supervisor
pub async fn list_users(
    req: HttpRequest,
    data: web::Data<AppState>,
    query: web::Query<UsersQuery>,
) -> Result<HttpResponse, ApiError> {
    let caller = current_user(&req)?;
    caller.require_role(&[Role::Admin])?;

    let filter = match query.role.as_deref().map(str::trim).filter(|r| !r.is_empty()) {
        Some(raw) => {
            let role: Role = raw.parse().map_err(ApiError::BadRequest)?;
            doc! { "role": role.as_str() }
        }
        None => doc! {},
    };

    let mut cursor = data.mongodb.users().find(filter).await?;
    let mut users: Vec<PublicUser> = Vec::new();
    while let Some(result) = cursor.next().await {
        match result {
            Ok(user) => users.push(PublicUser::from(user)),
            Err(err) => {
                error!("Error iterating users: {}", err);
                return Err(err.into());
            }
        }
    }
    users.sort_by(|a, b| a.email.cmp(&b.email));
    Ok(HttpResponse::Ok().json(users))
}

/// User ids holding any of the given roles.
pub async fn user_ids_with_roles(data: &AppState, roles: &[Role]) -> Result<Vec<String>, ApiError> {
    let role_names: Vec<&str> = roles.iter().map(Role::as_str).collect();
    let mut cursor = data
        .mongodb
        .users()
        .find(doc! { "role": { "$in": role_names } })
        .await?;
    let mut ids = Vec::new();
    while let Some(user) = cursor.next().await {
        let user: User = user?;
        ids.push(user.user_id);
    }
    Ok(ids)
}

/// Supervisors overseeing the given category, compared case-insensitively.
pub async fn supervisor_ids_for_category(data: &AppState, category: &str) -> Result<Vec<String>, ApiError> {
    let mut cursor = data
        .mongodb
        .users()
        .find(doc! { "role": Role::Supervisor.as_str() })
        .await?;
    let wanted = category.trim().to_lowercase();
    let mut ids = Vec::new();
    while let Some(user) = cursor.next().await {
        let user: User = user?;
        if user.category.as_deref().map(|c| c.trim().to_lowercase()) == Some(wanted.clone()) {
            ids.push(user.user_id);
        }
    }
    Ok(ids)
}
