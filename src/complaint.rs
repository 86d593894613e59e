// src/complaint.rs

use actix_web::{web, HttpRequest, HttpResponse};
use chrono::Utc;
use futures_util::StreamExt;
use log::{error, info, warn};
use mongodb::bson::{doc, Bson, Document};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::app_state::AppState;
use crate::auth::{current_user, load_user, AuthUser};
use crate::error::ApiError;
use crate::live_hub::{LiveEvent, Push};
use crate::models::{Complaint, ComplaintStatus, Role, User};
use crate::notification::{fan_out, unique_recipients, FanOut, NotificationDraft};
use crate::user_management::{supervisor_ids_for_category, user_ids_with_roles};

/* -------------------------------------------------------------------------- */
/* Access scope                                                               */
/* -------------------------------------------------------------------------- */

/// The complaints a caller may see.
#[derive(Debug, Clone, PartialEq)]
pub enum Scope {
    /// Submitters see what they filed.
    Own(String),
    /// Supervisors see their category.
    Category(String),
    All,
}

impl Scope {
    pub fn for_caller(caller: &AuthUser, user: &User) -> Result<Scope, ApiError> {
        match user.role {
            Role::Student | Role::Staff => Ok(Scope::Own(user.user_id.clone())),
            Role::Supervisor => user
                .category
                .as_deref()
                .map(str::trim)
                .filter(|c| !c.is_empty())
                .map(|c| Scope::Category(c.to_string()))
                .ok_or_else(|| ApiError::forbidden("Supervisor account has no category assigned")),
            Role::Maintenance if caller.maintenance_verified => Ok(Scope::All),
            Role::Maintenance => Err(ApiError::forbidden("Maintenance key verification required")),
            Role::Admin => Ok(Scope::All),
        }
    }

    pub fn filter(&self) -> Document {
        match self {
            Scope::Own(user_id) => doc! { "user_id": user_id },
            Scope::Category(category) => doc! {
                "category": { "$regex": format!("^{}$", regex::escape(category)), "$options": "i" }
            },
            Scope::All => doc! {},
        }
    }

    pub fn allows(&self, complaint: &Complaint) -> bool {
        match self {
            Scope::Own(user_id) => &complaint.user_id == user_id,
            Scope::Category(category) => complaint.category.trim().eq_ignore_ascii_case(category.trim()),
            Scope::All => true,
        }
    }
}

/// Resolves the caller's record and scope in one go.
pub async fn caller_scope(data: &AppState, caller: &AuthUser) -> Result<(User, Scope), ApiError> {
    let user = load_user(data, &caller.user_id).await?;
    let scope = Scope::for_caller(caller, &user)?;
    Ok((user, scope))
}

/// Complaints within `scope` that also match `extra`, newest first.
pub async fn find_in_scope(data: &AppState, scope: &Scope, extra: Document) -> Result<Vec<Complaint>, ApiError> {
    let mut filter = scope.filter();
    filter.extend(extra);

    let mut cursor = data.mongodb.complaints().find(filter).await?;
    let mut complaints = Vec::new();
    while let Some(res) = cursor.next().await {
        match res {
            Ok(c) => complaints.push(c),
            Err(e) => {
                error!("Error reading complaints: {}", e);
                return Err(e.into());
            }
        }
    }
    complaints.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    Ok(complaints)
}

pub async fn fetch_complaint(data: &AppState, complaint_id: &str) -> Result<Complaint, ApiError> {
    data.mongodb
        .complaints()
        .find_one(doc! { "complaint_id": complaint_id })
        .await?
        .ok_or_else(|| ApiError::not_found("Complaint not found"))
}

/// Fetches a complaint and hides it from callers outside its scope.
pub async fn fetch_in_scope(data: &AppState, scope: &Scope, complaint_id: &str) -> Result<Complaint, ApiError> {
    let complaint = fetch_complaint(data, complaint_id).await?;
    if !scope.allows(&complaint) {
        return Err(ApiError::not_found("Complaint not found"));
    }
    Ok(complaint)
}

/// Users who follow a complaint live: its submitter, admins, verified or not
/// maintenance staff, and the supervisors of its category.
async fn watchers(data: &AppState, complaint: &Complaint) -> Vec<String> {
    let (staff, supervisors) = tokio::join!(
        user_ids_with_roles(data, &[Role::Admin, Role::Maintenance]),
        supervisor_ids_for_category(data, &complaint.category),
    );
    let mut ids = vec![complaint.user_id.clone()];
    for found in [staff, supervisors] {
        match found {
            Ok(found) => ids.extend(found),
            Err(e) => warn!("Could not resolve complaint watchers: {}", e),
        }
    }
    ids
}

async fn announce(data: &AppState, complaint: &Complaint, deleted: bool) {
    let user_ids = unique_recipients(watchers(data, complaint).await, None);
    data.live_hub.do_send(Push {
        user_ids,
        event: LiveEvent::ComplaintUpdated {
            complaint_id: complaint.complaint_id.clone(),
            title: complaint.title.clone(),
            status: complaint.status.clone(),
            deleted,
        },
    });
}

fn display_name(user: &User) -> String {
    if user.name.trim().is_empty() {
        user.email.clone()
    } else {
        user.name.trim().to_string()
    }
}

/* -------------------------------------------------------------------------- */
/* Create                                                                     */
/* -------------------------------------------------------------------------- */

#[derive(Debug, Deserialize)]
pub struct CreateComplaintRequest {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub building: String,
    #[serde(default)]
    pub room: String,
    #[serde(default)]
    pub category: String,
    pub contact_number: Option<String>,
    pub preferred_date: Option<String>,
    pub preferred_time: Option<String>,
    pub image_url: Option<String>,
}

fn non_blank(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// Checks the form and builds the pending complaint for `user`.
pub fn new_complaint(user: &User, req: &CreateComplaintRequest) -> Result<Complaint, ApiError> {
    let required = [
        ("title", &req.title),
        ("description", &req.description),
        ("building", &req.building),
        ("category", &req.category),
    ];
    for (field, value) in required {
        if value.trim().is_empty() {
            return Err(ApiError::bad_request(format!("Complaint {} is required", field)));
        }
    }

    let contact_number = non_blank(&req.contact_number);
    if let Some(number) = &contact_number {
        let valid = (10..=15).contains(&number.len()) && number.chars().all(|c| c.is_ascii_digit());
        if !valid {
            return Err(ApiError::bad_request("Contact number must be 10 to 15 digits"));
        }
    }

    let now = Utc::now();
    Ok(Complaint {
        complaint_id: Uuid::new_v4().to_string(),
        title: req.title.trim().to_string(),
        description: req.description.trim().to_string(),
        building: req.building.trim().to_string(),
        room: req.room.trim().to_string(),
        category: req.category.trim().to_string(),
        contact_number,
        preferred_date: non_blank(&req.preferred_date),
        preferred_time: non_blank(&req.preferred_time),
        status: ComplaintStatus::Pending.to_string(),
        user_id: user.user_id.clone(),
        user_email: user.email.clone(),
        submitted_by: user.role.to_string(),
        image_url: non_blank(&req.image_url),
        image_file_id: None,
        image_content_type: None,
        reopen_reason: None,
        reopened_at: None,
        last_updated_by: None,
        last_updated_by_role: None,
        created_at: now,
        updated_at: now,
    })
}

#[derive(Debug, Serialize)]
pub struct CreatedComplaint {
    #[serde(flatten)]
    pub complaint: Complaint,
    pub notified: usize,
    #[serde(skip_serializing_if = "is_zero")]
    pub notification_failures: usize,
}

fn is_zero(n: &usize) -> bool {
    *n == 0
}

/// POST /api/complaints
pub async fn create_complaint(
    req: HttpRequest,
    data: web::Data<AppState>,
    payload: web::Json<CreateComplaintRequest>,
) -> Result<HttpResponse, ApiError> {
    let caller = current_user(&req)?;
    caller.require_role(&[Role::Student, Role::Staff])?;
    let user = load_user(&data, &caller.user_id).await?;
    let complaint = new_complaint(&user, &payload)?;

    if let Err(e) = data.mongodb.complaints().insert_one(&complaint).await {
        error!("Error inserting complaint: {}", e);
        return Err(e.into());
    }
    info!("Complaint created: {} by {}", complaint.complaint_id, user.user_id);

    let recipients = user_ids_with_roles(&data, &[Role::Admin, Role::Supervisor])
        .await
        .unwrap_or_else(|e| {
            error!("Could not resolve notification recipients: {}", e);
            Vec::new()
        });
    let FanOut { delivered, failed } = fan_out(
        &data,
        recipients,
        Some(&user.user_id),
        NotificationDraft {
            message: format!("New complaint submitted: \"{}\" ({})", complaint.title, complaint.category),
            complaint_id: Some(complaint.complaint_id.clone()),
            complaint_title: Some(complaint.title.clone()),
            category: Some(complaint.category.clone()),
            updated_by: None,
        },
    )
    .await;
    announce(&data, &complaint, false).await;

    Ok(HttpResponse::Created().json(CreatedComplaint {
        complaint,
        notified: delivered,
        notification_failures: failed,
    }))
}

/* -------------------------------------------------------------------------- */
/* List / get                                                                 */
/* -------------------------------------------------------------------------- */

#[derive(Debug, Default, Deserialize)]
pub struct ComplaintQuery {
    pub status: Option<String>,
    pub category: Option<String>,
    pub building: Option<String>,
    pub room: Option<String>,
    pub search: Option<String>,
    pub submitted_by: Option<String>,
}

/// Parsed list filters. Blank query values mean "any".
#[derive(Debug, Default, PartialEq)]
pub struct ComplaintFilter {
    pub status: Option<ComplaintStatus>,
    pub category: Option<String>,
    pub building: Option<String>,
    pub room: Option<String>,
    pub search: Option<String>,
    pub submitted_by: Option<String>,
}

impl ComplaintFilter {
    pub fn from_query(q: &ComplaintQuery) -> Result<Self, ApiError> {
        let lower = |v: &Option<String>| non_blank(v).map(|s| s.to_lowercase());
        let status = match non_blank(&q.status) {
            Some(raw) => Some(raw.parse::<ComplaintStatus>().map_err(ApiError::BadRequest)?),
            None => None,
        };
        Ok(Self {
            status,
            category: lower(&q.category),
            building: lower(&q.building),
            room: lower(&q.room),
            search: lower(&q.search),
            submitted_by: lower(&q.submitted_by),
        })
    }

    pub fn matches(&self, c: &Complaint) -> bool {
        let eq = |want: &Option<String>, have: &str| {
            want.as_deref().map_or(true, |w| have.trim().to_lowercase() == w)
        };
        if let Some(status) = self.status {
            if c.status_kind() != Some(status) {
                return false;
            }
        }
        if let Some(term) = &self.search {
            let hit = c.title.to_lowercase().contains(term.as_str())
                || c.description.to_lowercase().contains(term.as_str());
            if !hit {
                return false;
            }
        }
        eq(&self.category, &c.category)
            && eq(&self.building, &c.building)
            && eq(&self.room, &c.room)
            && eq(&self.submitted_by, &c.submitted_by)
    }
}

/// GET /api/complaints
pub async fn list_complaints(
    req: HttpRequest,
    data: web::Data<AppState>,
    query: web::Query<ComplaintQuery>,
) -> Result<HttpResponse, ApiError> {
    let caller = current_user(&req)?;
    let filter = ComplaintFilter::from_query(&query)?;
    let (_, scope) = caller_scope(&data, &caller).await?;

    let complaints: Vec<Complaint> = find_in_scope(&data, &scope, doc! {})
        .await?
        .into_iter()
        .filter(|c| filter.matches(c))
        .collect();
    Ok(HttpResponse::Ok().json(complaints))
}

/// GET /api/complaints/{complaint_id}
pub async fn get_complaint(
    req: HttpRequest,
    data: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    let caller = current_user(&req)?;
    let (_, scope) = caller_scope(&data, &caller).await?;
    let complaint = fetch_in_scope(&data, &scope, &path).await?;
    Ok(HttpResponse::Ok().json(complaint))
}

/* -------------------------------------------------------------------------- */
/* Status                                                                     */
/* -------------------------------------------------------------------------- */

#[derive(Debug, Deserialize)]
pub struct UpdateStatusRequest {
    #[serde(default)]
    pub status: String,
    pub message: Option<String>,
}

/// Parses the requested status and enforces the progress-note rule.
pub fn parse_status_update(req: &UpdateStatusRequest) -> Result<(ComplaintStatus, Option<String>), ApiError> {
    if req.status.trim().is_empty() {
        return Err(ApiError::bad_request("New status is required"));
    }
    let status: ComplaintStatus = req.status.parse().map_err(ApiError::BadRequest)?;
    let message = non_blank(&req.message);
    if status == ComplaintStatus::InProgress && message.is_none() {
        return Err(ApiError::bad_request(
            "A message is required when marking a complaint in progress",
        ));
    }
    Ok((status, message))
}

/// Body of the flat status route the dashboards post to.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusChangeRequest {
    #[serde(default)]
    pub complaint_id: String,
    #[serde(default)]
    pub new_status: String,
    pub message: Option<String>,
}

impl StatusChangeRequest {
    pub fn split(self) -> Result<(String, UpdateStatusRequest), ApiError> {
        let complaint_id = self.complaint_id.trim().to_string();
        if complaint_id.is_empty() {
            return Err(ApiError::bad_request("Complaint ID is required"));
        }
        Ok((
            complaint_id,
            UpdateStatusRequest {
                status: self.new_status,
                message: self.message,
            },
        ))
    }
}

/// PUT /api/complaints/{complaint_id}/status
pub async fn update_complaint_status(
    req: HttpRequest,
    data: web::Data<AppState>,
    path: web::Path<String>,
    payload: web::Json<UpdateStatusRequest>,
) -> Result<HttpResponse, ApiError> {
    let caller = current_user(&req)?;
    apply_status_update(&data, caller, &path, &payload).await
}

/// POST /api/update-complaint-status
pub async fn update_complaint_status_flat(
    req: HttpRequest,
    data: web::Data<AppState>,
    payload: web::Json<StatusChangeRequest>,
) -> Result<HttpResponse, ApiError> {
    let caller = current_user(&req)?;
    caller.require_role(&[Role::Admin, Role::Supervisor, Role::Maintenance])?;
    let (complaint_id, update) = payload.into_inner().split()?;
    apply_status_update(&data, caller, &complaint_id, &update).await
}

async fn apply_status_update(
    data: &AppState,
    caller: AuthUser,
    complaint_id: &str,
    payload: &UpdateStatusRequest,
) -> Result<HttpResponse, ApiError> {
    caller.require_role(&[Role::Admin, Role::Supervisor, Role::Maintenance])?;
    let (status, message) = parse_status_update(payload)?;

    let (user, scope) = caller_scope(data, &caller).await?;
    let mut complaint = fetch_in_scope(data, &scope, complaint_id).await?;

    let now = Utc::now();
    let updater = display_name(&user);
    let update_doc = doc! {
        "status": status.as_str(),
        "updated_at": Bson::String(now.to_rfc3339_opts(chrono::SecondsFormat::AutoSi, true)),
        "last_updated_by": &updater,
        "last_updated_by_role": user.role.as_str(),
    };
    let res = data
        .mongodb
        .complaints()
        .update_one(doc! { "complaint_id": &complaint.complaint_id }, doc! { "$set": update_doc })
        .await?;
    if res.matched_count == 0 {
        return Err(ApiError::not_found("Complaint not found"));
    }
    info!(
        "Complaint {} status -> {} by {}",
        complaint.complaint_id, status, user.user_id
    );

    complaint.status = status.to_string();
    complaint.updated_at = now;
    complaint.last_updated_by = Some(updater.clone());
    complaint.last_updated_by_role = Some(user.role.to_string());

    let text = message.unwrap_or_else(|| {
        format!(
            "Your complaint \"{}\" status has been updated to {}",
            complaint.title, status
        )
    });
    fan_out(
        data,
        vec![complaint.user_id.clone()],
        Some(&user.user_id),
        NotificationDraft {
            message: text,
            complaint_id: Some(complaint.complaint_id.clone()),
            complaint_title: Some(complaint.title.clone()),
            category: Some(complaint.category.clone()),
            updated_by: Some(updater),
        },
    )
    .await;
    announce(data, &complaint, false).await;

    Ok(HttpResponse::Ok().json(serde_json::json!({
        "success": true,
        "message": "Complaint status updated successfully",
        "complaint": complaint,
    })))
}

/* -------------------------------------------------------------------------- */
/* Reopen                                                                     */
/* -------------------------------------------------------------------------- */

#[derive(Debug, Default, Deserialize)]
pub struct ReopenRequest {
    pub reason: Option<String>,
}

/// Who may reopen, and with what reason. Only completed work can be reopened.
pub fn check_reopen(user: &User, scope: &Scope, complaint: &Complaint, reason: Option<String>) -> Result<Option<String>, ApiError> {
    let is_owner = complaint.user_id == user.user_id;
    match user.role {
        Role::Student | Role::Staff if is_owner => {
            if reason.is_none() {
                return Err(ApiError::bad_request("A reason is required to reopen a complaint"));
            }
        }
        Role::Admin | Role::Supervisor if scope.allows(complaint) => {}
        _ => return Err(ApiError::forbidden("You cannot reopen this complaint")),
    }
    if complaint.status_kind() != Some(ComplaintStatus::Completed) {
        return Err(ApiError::Conflict("Only completed complaints can be reopened".to_string()));
    }
    Ok(reason)
}

/// POST /api/complaints/{complaint_id}/reopen
pub async fn reopen_complaint(
    req: HttpRequest,
    data: web::Data<AppState>,
    path: web::Path<String>,
    payload: Option<web::Json<ReopenRequest>>,
) -> Result<HttpResponse, ApiError> {
    let caller = current_user(&req)?;
    let reason = payload.and_then(|p| non_blank(&p.into_inner().reason));

    let (user, scope) = caller_scope(&data, &caller).await?;
    let mut complaint = fetch_in_scope(&data, &scope, &path).await?;
    let reason = check_reopen(&user, &scope, &complaint, reason)?;

    let now = Utc::now();
    let stamp = now.to_rfc3339_opts(chrono::SecondsFormat::AutoSi, true);
    let updater = display_name(&user);
    let mut update_doc = doc! {
        "status": ComplaintStatus::Reopened.as_str(),
        "reopened_at": &stamp,
        "updated_at": &stamp,
        "last_updated_by": &updater,
        "last_updated_by_role": user.role.as_str(),
    };
    if let Some(r) = &reason {
        update_doc.insert("reopen_reason", r.as_str());
    }
    data.mongodb
        .complaints()
        .update_one(doc! { "complaint_id": &complaint.complaint_id }, doc! { "$set": update_doc })
        .await?;
    info!("Complaint {} reopened by {}", complaint.complaint_id, user.user_id);

    complaint.status = ComplaintStatus::Reopened.to_string();
    complaint.reopened_at = Some(now);
    complaint.updated_at = now;
    if reason.is_some() {
        complaint.reopen_reason = reason.clone();
    }
    complaint.last_updated_by = Some(updater.clone());
    complaint.last_updated_by_role = Some(user.role.to_string());

    let recipients = if user.role.is_submitter() {
        let (admins, supervisors) = tokio::join!(
            user_ids_with_roles(&data, &[Role::Admin]),
            supervisor_ids_for_category(&data, &complaint.category),
        );
        let mut ids = Vec::new();
        for found in [admins, supervisors] {
            match found {
                Ok(found) => ids.extend(found),
                Err(e) => error!("Could not resolve reopen recipients: {}", e),
            }
        }
        ids
    } else {
        vec![complaint.user_id.clone()]
    };
    let message = match &reason {
        Some(r) => format!("Complaint \"{}\" was reopened: {}", complaint.title, r),
        None => format!("Complaint \"{}\" was reopened", complaint.title),
    };
    fan_out(
        &data,
        recipients,
        Some(&user.user_id),
        NotificationDraft {
            message,
            complaint_id: Some(complaint.complaint_id.clone()),
            complaint_title: Some(complaint.title.clone()),
            category: Some(complaint.category.clone()),
            updated_by: Some(updater),
        },
    )
    .await;
    announce(&data, &complaint, false).await;

    Ok(HttpResponse::Ok().json(complaint))
}

/* -------------------------------------------------------------------------- */
/* Delete                                                                     */
/* -------------------------------------------------------------------------- */

pub fn check_delete(user: &User, complaint: &Complaint) -> Result<(), ApiError> {
    match user.role {
        Role::Admin => Ok(()),
        // Owners may withdraw untouched work or clear finished/reopened history.
        Role::Student | Role::Staff if complaint.user_id == user.user_id => match complaint.status_kind() {
            Some(ComplaintStatus::Pending | ComplaintStatus::Completed | ComplaintStatus::Reopened) => Ok(()),
            _ => Err(ApiError::forbidden("Complaints in progress cannot be deleted")),
        },
        _ => Err(ApiError::forbidden("You cannot delete this complaint")),
    }
}

/// DELETE /api/complaints/{complaint_id}
pub async fn delete_complaint(
    req: HttpRequest,
    data: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    let caller = current_user(&req)?;
    let (user, scope) = caller_scope(&data, &caller).await?;
    let complaint = fetch_in_scope(&data, &scope, &path).await?;
    check_delete(&user, &complaint)?;

    let res = data
        .mongodb
        .complaints()
        .delete_one(doc! { "complaint_id": &complaint.complaint_id })
        .await?;
    if res.deleted_count == 0 {
        return Err(ApiError::not_found("Complaint not found or already deleted"));
    }

    if let Some(file_id) = &complaint.image_file_id {
        if let Err(e) = data.mongodb.images().delete(Bson::String(file_id.clone())).await {
            warn!("Could not delete image {} of complaint {}: {}", file_id, complaint.complaint_id, e);
        }
    }
    match data
        .mongodb
        .notifications()
        .delete_many(doc! { "complaint_id": &complaint.complaint_id })
        .await
    {
        Ok(r) => info!(
            "Complaint {} deleted with {} notification(s)",
            complaint.complaint_id, r.deleted_count
        ),
        Err(e) => error!("Could not delete notifications of {}: {}", complaint.complaint_id, e),
    }
    announce(&data, &complaint, true).await;

    Ok(HttpResponse::Ok().json(serde_json::json!({ "message": "Complaint deleted successfully" })))
}
