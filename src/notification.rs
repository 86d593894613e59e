// src/notification.rs

use actix_web::{web, HttpRequest, HttpResponse};
use chrono::Utc;
use futures_util::StreamExt;
use log::{error, info, warn};
use mongodb::bson::doc;
use mongodb::error::ErrorKind;
use serde::Deserialize;
use std::collections::HashSet;
use uuid::Uuid;

use crate::app_state::AppState;
use crate::auth::current_user;
use crate::error::ApiError;
use crate::live_hub::{LiveEvent, Push};
use crate::models::Notification;

/// Content shared by every notification of one fan-out.
#[derive(Debug, Clone, Default)]
pub struct NotificationDraft {
    pub message: String,
    pub complaint_id: Option<String>,
    pub complaint_title: Option<String>,
    pub category: Option<String>,
    pub updated_by: Option<String>,
}

/// Outcome of a fan-out; the triggering write is never rolled back.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct FanOut {
    pub delivered: usize,
    pub failed: usize,
}

/// Drops blanks, repeats and the acting user while keeping first-seen order.
pub fn unique_recipients(recipients: Vec<String>, actor: Option<&str>) -> Vec<String> {
    let mut seen = HashSet::new();
    recipients
        .into_iter()
        .filter(|r| !r.is_empty() && Some(r.as_str()) != actor)
        .filter(|r| seen.insert(r.clone()))
        .collect()
}

pub fn build_notifications(recipients: &[String], draft: &NotificationDraft) -> Vec<Notification> {
    let now = Utc::now();
    recipients
        .iter()
        .map(|user_id| Notification {
            notification_id: Uuid::new_v4().to_string(),
            user_id: user_id.clone(),
            message: draft.message.clone(),
            complaint_id: draft.complaint_id.clone(),
            complaint_title: draft.complaint_title.clone(),
            category: draft.category.clone(),
            read: false,
            updated_by: draft.updated_by.clone(),
            created_at: now,
        })
        .collect()
}

/// Writes one notification per recipient in a single unordered batch and
/// pushes each stored one to the recipient's open sessions.
pub async fn fan_out(
    data: &AppState,
    recipients: Vec<String>,
    actor: Option<&str>,
    draft: NotificationDraft,
) -> FanOut {
    let recipients = unique_recipients(recipients, actor);
    if recipients.is_empty() {
        return FanOut::default();
    }
    let notifications = build_notifications(&recipients, &draft);

    let total = notifications.len();
    let rejected = match data
        .mongodb
        .notifications()
        .insert_many(&notifications)
        .ordered(false)
        .await
    {
        Ok(_) => HashSet::new(),
        Err(e) => {
            error!("Notification fan-out failed for some of {} recipient(s): {}", total, e);
            rejected_indices(&e, total)
        }
    };

    let (written, failed) = split_written(notifications, &rejected);
    let delivered = written.len();
    for notification in written {
        data.live_hub.do_send(Push {
            user_ids: vec![notification.user_id.clone()],
            event: LiveEvent::Notification { notification },
        });
    }
    if delivered > 0 {
        info!("Notified {} user(s): {}", delivered, draft.message);
    }
    FanOut { delivered, failed }
}

/// Positions of the batch that were not stored. Only per-document write
/// errors are partial; any other failure means nothing was written.
fn rejected_indices(err: &mongodb::error::Error, total: usize) -> HashSet<usize> {
    match err.kind.as_ref() {
        ErrorKind::InsertMany(e) => e.write_errors.iter().flatten().map(|w| w.index).collect(),
        _ => (0..total).collect(),
    }
}

/// Keeps the stored notifications and counts the rest.
fn split_written(notifications: Vec<Notification>, rejected: &HashSet<usize>) -> (Vec<Notification>, usize) {
    let total = notifications.len();
    let written: Vec<Notification> = notifications
        .into_iter()
        .enumerate()
        .filter(|(i, _)| !rejected.contains(i))
        .map(|(_, n)| n)
        .collect();
    let failed = total - written.len();
    (written, failed)
}

#[derive(Debug, Deserialize)]
pub struct NotificationQuery {
    #[serde(default)]
    pub unread_only: bool,
}

/// GET /api/notifications
pub async fn list_notifications(
    req: HttpRequest,
    data: web::Data<AppState>,
    query: web::Query<NotificationQuery>,
) -> Result<HttpResponse, ApiError> {
    let caller = current_user(&req)?;
    let mut filter = doc! { "user_id": &caller.user_id };
    if query.unread_only {
        filter.insert("read", false);
    }

    let mut cursor = data.mongodb.notifications().find(filter).await?;
    let mut notifications = Vec::new();
    while let Some(res) = cursor.next().await {
        match res {
            Ok(n) => notifications.push(n),
            Err(e) => {
                error!("Error reading notifications: {}", e);
                return Err(e.into());
            }
        }
    }
    notifications.sort_by(|a: &Notification, b: &Notification| b.created_at.cmp(&a.created_at));
    Ok(HttpResponse::Ok().json(notifications))
}

/// GET /api/notifications/unread-count
pub async fn unread_count(req: HttpRequest, data: web::Data<AppState>) -> Result<HttpResponse, ApiError> {
    let caller = current_user(&req)?;
    let unread = data
        .mongodb
        .notifications()
        .count_documents(doc! { "user_id": &caller.user_id, "read": false })
        .await?;
    Ok(HttpResponse::Ok().json(serde_json::json!({ "unread": unread })))
}

/// PUT /api/notifications/{notification_id}/read
pub async fn mark_read(
    req: HttpRequest,
    data: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    let caller = current_user(&req)?;
    let notification_id = path.into_inner();
    let res = data
        .mongodb
        .notifications()
        .update_one(
            doc! { "notification_id": &notification_id, "user_id": &caller.user_id },
            doc! { "$set": { "read": true } },
        )
        .await?;
    if res.matched_count == 0 {
        warn!("Notification {} not found for {}", notification_id, caller.user_id);
        return Err(ApiError::not_found("Notification not found"));
    }
    Ok(HttpResponse::Ok().json(serde_json::json!({ "message": "Notification marked as read" })))
}

/// PUT /api/notifications/read-all
pub async fn mark_all_read(req: HttpRequest, data: web::Data<AppState>) -> Result<HttpResponse, ApiError> {
    let caller = current_user(&req)?;
    let res = data
        .mongodb
        .notifications()
        .update_many(
            doc! { "user_id": &caller.user_id, "read": false },
            doc! { "$set": { "read": true } },
        )
        .await?;
    Ok(HttpResponse::Ok().json(serde_json::json!({ "updated": res.modified_count })))
}

/// DELETE /api/notifications
pub async fn clear_all(req: HttpRequest, data: web::Data<AppState>) -> Result<HttpResponse, ApiError> {
    let caller = current_user(&req)?;
    let res = data
        .mongodb
        .notifications()
        .delete_many(doc! { "user_id": &caller.user_id })
        .await?;
    info!("Cleared {} notification(s) for {}", res.deleted_count, caller.user_id);
    Ok(HttpResponse::Ok().json(serde_json::json!({ "deleted": res.deleted_count })))
}
